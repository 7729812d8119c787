//! PipeWire-backed [`super::CaptureSource`]: negotiates a DMA-BUF capable
//! video stream against a node already exposed by the compositor. The
//! portal/monitor-picking negotiation that yields `stream_node` is out of
//! scope here — the platform's own picker/portal UI resolves that
//! externally and hands this crate the result.

use std::{
    os::fd::{FromRawFd, OwnedFd, RawFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use crossbeam::channel::Sender;
use pipewire::{
    self as pw,
    context::Context,
    core::{Core, Listener},
    main_loop::MainLoop,
    spa::{
        self,
        buffer::{Data, DataType},
        pod::{Pod, Property, PropertyFlags},
        utils::{Choice, ChoiceEnum, ChoiceFlags, Direction},
    },
    properties::properties,
    stream::{Stream, StreamFlags, StreamListener, StreamState},
};

use crate::error::{Error, Result};
use crate::types::video_frame::RawVideoFrame;
use crate::utils::TIME_UNIT_100NS;

use super::{CaptureSource, Terminate};

// Same DMA-BUF modifier list the desktop capture tooling in this space
// settled on; required to get zero-copy buffers out of the NVIDIA driver.
const NVIDIA_MODIFIERS: &[i64] = &[
    216172782120099856,
    216172782120099857,
    216172782120099858,
    216172782120099859,
    216172782120099860,
    216172782120099861,
    216172782128496656,
    216172782128496657,
    216172782128496658,
    216172782128496659,
    216172782128496660,
    216172782128496661,
    72057594037927935,
];

/// Bounded retry budget for [`run_with_bounded_reinit`]: an AccessLost
/// stream error rebuilds the whole PipeWire stream this many times,
/// this far apart, before the capture source gives up.
pub const MAX_REINIT_ATTEMPTS: u32 = 10;
pub const REINIT_BACKOFF: Duration = Duration::from_millis(100);

pub struct PipewireCaptureSource {
    termination_recv: Option<pw::channel::Receiver<Terminate>>,
    stream_errored: Arc<AtomicBool>,
    state: PipewireState,
}

struct PipewireState {
    pw_loop: MainLoop,
    _pw_context: Context,
    _core: Core,
    _core_listener: Listener,
    _stream: Stream,
    _stream_listener: StreamListener<UserData>,
}

#[derive(Clone, Copy, Default)]
struct UserData {
    video_format: spa::param::video::VideoInfoRaw,
}

impl PipewireCaptureSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipewire_fd: RawFd,
        stream_node: u32,
        video_ready: Arc<AtomicBool>,
        audio_ready: Arc<AtomicBool>,
        use_nvidia_modifiers: bool,
        start_time: Instant,
        frame_tx: Sender<RawVideoFrame>,
        termination_recv: pw::channel::Receiver<Terminate>,
    ) -> Result<Self> {
        let pw_loop = MainLoop::new(None)?;
        let context = Context::new(&pw_loop)?;
        let mut core =
            context.connect_fd(unsafe { OwnedFd::from_raw_fd(pipewire_fd) }, None)?;
        let core_listener = Self::setup_core_listener(&mut core)?;
        let mut stream = Self::create_stream(&core)?;
        let stream_errored = Arc::new(AtomicBool::new(false));
        let stream_listener = Self::setup_stream_listener(
            &mut stream,
            UserData::default(),
            &video_ready,
            &audio_ready,
            start_time,
            frame_tx.clone(),
            Arc::clone(&stream_errored),
            pw_loop.clone(),
        )?;
        Self::connect_stream(&mut stream, stream_node, use_nvidia_modifiers)?;

        Ok(Self {
            termination_recv: Some(termination_recv),
            stream_errored,
            state: PipewireState {
                pw_loop,
                _pw_context: context,
                _core: core,
                _core_listener: core_listener,
                _stream: stream,
                _stream_listener: stream_listener,
            },
        })
    }

    fn create_stream(core: &Core) -> Result<Stream> {
        Stream::new(
            core,
            "replaybuffer-video",
            properties! {
                *pw::keys::MEDIA_TYPE => "Video",
                *pw::keys::MEDIA_CATEGORY => "Capture",
                *pw::keys::MEDIA_ROLE => "Screen",
            },
        )
        .map_err(Error::from)
    }

    fn setup_core_listener(core: &mut Core) -> Result<Listener> {
        Ok(core
            .add_listener_local()
            .info(|i| log::debug!("video core:\n{i:#?}"))
            .error(|e, f, g, h| log::error!("{e},{f},{g},{h}"))
            .done(|d, _| log::debug!("done: {d}"))
            .register())
    }

    #[allow(clippy::too_many_arguments)]
    fn setup_stream_listener(
        stream: &mut Stream,
        data: UserData,
        video_ready: &Arc<AtomicBool>,
        audio_ready: &Arc<AtomicBool>,
        start_time: Instant,
        frame_tx: Sender<RawVideoFrame>,
        stream_errored: Arc<AtomicBool>,
        terminate_loop: MainLoop,
    ) -> Result<StreamListener<UserData>> {
        let ready_clone = Arc::clone(video_ready);
        let audio_ready_clone = Arc::clone(audio_ready);

        let listener = stream
            .add_local_listener_with_user_data(data)
            .state_changed(move |_, _, old, new| {
                log::info!("video stream state changed: {old:?} -> {new:?}");
                ready_clone.store(
                    new == StreamState::Streaming,
                    std::sync::atomic::Ordering::Release,
                );
                if let StreamState::Error(ref reason) = new {
                    log::warn!("video stream entered error state: {reason}");
                    stream_errored.store(true, Ordering::Release);
                    terminate_loop.quit();
                }
            })
            .param_changed(move |_, user_data, id, param| {
                let Some(param) = param else {
                    return;
                };
                if id != pw::spa::param::ParamType::Format.as_raw() {
                    return;
                }
                let Ok((media_type, media_subtype)) =
                    pw::spa::param::format_utils::parse_format(param)
                else {
                    return;
                };
                if media_type != pw::spa::param::format::MediaType::Video
                    || media_subtype != pw::spa::param::format::MediaSubtype::Raw
                {
                    return;
                }
                if user_data.video_format.parse(param).is_err() {
                    log::error!("failed to parse video format param");
                    return;
                }
                log::debug!(
                    "negotiated size {}x{}",
                    user_data.video_format.size().width,
                    user_data.video_format.size().height
                );
            })
            .process(move |stream, _udata| {
                let Some(mut buffer) = stream.dequeue_buffer() else {
                    log::debug!("out of buffers");
                    return;
                };

                if !audio_ready_clone.load(std::sync::atomic::Ordering::Acquire) {
                    return;
                }

                let datas = buffer.datas_mut();
                if datas.is_empty() {
                    return;
                }

                let pts_100ns =
                    (start_time.elapsed().as_nanos() / 100) as i64;
                let data = &mut datas[0];
                let fd = Self::get_dmabuf_fd(data);

                match frame_tx.try_send(RawVideoFrame {
                    data: data.data().unwrap_or_default().to_vec(),
                    pts: pts_100ns,
                    dmabuf_fd: fd,
                    stride: data.chunk().stride(),
                    offset: data.chunk().offset(),
                    width: 0,
                    height: 0,
                }) {
                    Ok(_) => {}
                    Err(crossbeam::channel::TrySendError::Full(frame)) => {
                        log::error!(
                            "could not send video frame at {}: channel full",
                            frame.pts
                        );
                    }
                    Err(crossbeam::channel::TrySendError::Disconnected(frame)) => {
                        log::error!(
                            "could not send video frame at {}: channel disconnected",
                            frame.pts
                        );
                    }
                }
            })
            .register()?;

        Ok(listener)
    }

    fn connect_stream(
        stream: &mut Stream,
        stream_node: u32,
        use_nvidia_modifiers: bool,
    ) -> Result<()> {
        let pw_obj = if use_nvidia_modifiers {
            let nvidia_mod_property = Property {
                key: pw::spa::param::format::FormatProperties::VideoModifier.as_raw(),
                flags: PropertyFlags::empty(),
                value: spa::pod::Value::Choice(spa::pod::ChoiceValue::Long(Choice::<i64>(
                    ChoiceFlags::empty(),
                    ChoiceEnum::<i64>::Enum {
                        default: NVIDIA_MODIFIERS[0],
                        alternatives: NVIDIA_MODIFIERS.to_vec(),
                    },
                ))),
            };

            pw::spa::pod::object!(
                pw::spa::utils::SpaTypes::ObjectParamFormat,
                pw::spa::param::ParamType::EnumFormat,
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::MediaType,
                    Id,
                    pw::spa::param::format::MediaType::Video
                ),
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::MediaSubtype,
                    Id,
                    pw::spa::param::format::MediaSubtype::Raw
                ),
                nvidia_mod_property,
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::VideoFormat,
                    Choice,
                    Enum,
                    Id,
                    pw::spa::param::video::VideoFormat::NV12,
                    pw::spa::param::video::VideoFormat::I420,
                    pw::spa::param::video::VideoFormat::BGRA,
                ),
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::VideoSize,
                    Choice,
                    Range,
                    Rectangle,
                    pw::spa::utils::Rectangle { width: 2560, height: 1440 },
                    pw::spa::utils::Rectangle { width: 1, height: 1 },
                    pw::spa::utils::Rectangle { width: 4096, height: 4096 }
                ),
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::VideoFramerate,
                    Choice,
                    Range,
                    Fraction,
                    pw::spa::utils::Fraction { num: 240, denom: 1 },
                    pw::spa::utils::Fraction { num: 0, denom: 1 },
                    pw::spa::utils::Fraction { num: 244, denom: 1 }
                ),
            )
        } else {
            pw::spa::pod::object!(
                pw::spa::utils::SpaTypes::ObjectParamFormat,
                pw::spa::param::ParamType::EnumFormat,
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::MediaType,
                    Id,
                    pw::spa::param::format::MediaType::Video
                ),
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::MediaSubtype,
                    Id,
                    pw::spa::param::format::MediaSubtype::Raw
                ),
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::VideoModifier,
                    Long,
                    0
                ),
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::VideoFormat,
                    Choice,
                    Enum,
                    Id,
                    pw::spa::param::video::VideoFormat::NV12,
                    pw::spa::param::video::VideoFormat::I420,
                    pw::spa::param::video::VideoFormat::BGRA,
                ),
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::VideoSize,
                    Choice,
                    Range,
                    Rectangle,
                    pw::spa::utils::Rectangle { width: 2560, height: 1440 },
                    pw::spa::utils::Rectangle { width: 1, height: 1 },
                    pw::spa::utils::Rectangle { width: 4096, height: 4096 }
                ),
                pw::spa::pod::property!(
                    pw::spa::param::format::FormatProperties::VideoFramerate,
                    Choice,
                    Range,
                    Fraction,
                    pw::spa::utils::Fraction { num: 240, denom: 1 },
                    pw::spa::utils::Fraction { num: 0, denom: 1 },
                    pw::spa::utils::Fraction { num: 244, denom: 1 }
                ),
            )
        };

        let video_spa_values: Vec<u8> = pw::spa::pod::serialize::PodSerializer::serialize(
            std::io::Cursor::new(Vec::new()),
            &pw::spa::pod::Value::Object(pw_obj),
        )
        .map_err(|_| Error::InitFailure("failed to serialize video format pod".into()))?
        .0
        .into_inner();

        let mut video_params = [Pod::from_bytes(&video_spa_values)
            .ok_or_else(|| Error::InitFailure("invalid video format pod bytes".into()))?];

        stream.connect(
            Direction::Input,
            Some(stream_node),
            StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS,
            &mut video_params,
        )?;

        Ok(())
    }

    fn get_dmabuf_fd(data: &Data) -> Option<RawFd> {
        let raw_data = data.as_raw();
        if data.type_() == DataType::DmaBuf && raw_data.fd > 0 {
            return Some(raw_data.fd as i32);
        }
        None
    }
}

impl CaptureSource for PipewireCaptureSource {
    /// Blocks; must run on its own thread. `termination_recv` breaks the
    /// loop from [`Terminate`] sent on the paired sender. The loop can
    /// also exit on its own if the stream reports an error state
    /// (AccessLost and similar device hiccups), in which case this
    /// returns `Error::TransientDeviceError` so a caller can rebuild the
    /// stream via [`run_with_bounded_reinit`] instead of treating it as
    /// a fatal pipeline failure.
    fn run(&mut self) -> Result<()> {
        let terminate_loop = self.state.pw_loop.clone();
        let terminate_recv = self
            .termination_recv
            .take()
            .ok_or_else(|| Error::Precondition("PipewireCaptureSource::run called twice".into()))?;
        let _recv = terminate_recv.attach(self.state.pw_loop.loop_(), move |_| {
            log::debug!("terminating video capture loop");
            terminate_loop.quit();
        });
        self.state.pw_loop.run();

        if self.stream_errored.load(Ordering::Acquire) {
            return Err(Error::TransientDeviceError(
                "video stream reported an error state (access lost)".into(),
            ));
        }
        Ok(())
    }
}

/// Runs a [`PipewireCaptureSource`] and, whenever it exits with
/// `Error::TransientDeviceError` (stream AccessLost/Error rather than a
/// requested [`Terminate`]), rebuilds it from scratch and runs again, up
/// to `MAX_REINIT_ATTEMPTS` times, `REINIT_BACKOFF` apart. `terminate_slot`
/// is kept pointed at whichever generation's terminate sender is
/// currently live so a caller's `stop()` always reaches the running
/// instance. Gives up with `Error::DeviceLost` once the budget is spent.
#[allow(clippy::too_many_arguments)]
pub fn run_with_bounded_reinit(
    pipewire_fd: RawFd,
    stream_node: u32,
    video_ready: Arc<AtomicBool>,
    audio_ready: Arc<AtomicBool>,
    use_nvidia_modifiers: bool,
    start_time: Instant,
    frame_tx: Sender<RawVideoFrame>,
    terminate_slot: Arc<Mutex<Option<pw::channel::Sender<Terminate>>>>,
) -> Result<()> {
    let mut attempts = 0u32;
    loop {
        let (tx, rx) = pw::channel::channel();
        *terminate_slot.lock().unwrap() = Some(tx);

        let mut source = PipewireCaptureSource::new(
            pipewire_fd,
            stream_node,
            Arc::clone(&video_ready),
            Arc::clone(&audio_ready),
            use_nvidia_modifiers,
            start_time,
            frame_tx.clone(),
            rx,
        )?;

        match source.run() {
            Ok(()) => return Ok(()),
            Err(Error::TransientDeviceError(msg)) => {
                attempts += 1;
                log::warn!(
                    "video capture access lost ({msg}), reinit attempt {attempts}/{MAX_REINIT_ATTEMPTS}"
                );
                if attempts >= MAX_REINIT_ATTEMPTS {
                    return Err(Error::DeviceLost(format!(
                        "video capture did not recover after {MAX_REINIT_ATTEMPTS} attempts: {msg}"
                    )));
                }
                std::thread::sleep(REINIT_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}

#[allow(dead_code)]
fn clock_100ns(nanos: u128) -> i64 {
    (nanos / (TIME_UNIT_100NS as u128 / 1_000_000)) as i64
}
