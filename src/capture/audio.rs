//! PipeWire-backed audio endpoint capture. One
//! [`PipewireAudioSource`] per configured endpoint; each stamps its raw
//! samples with its own `device_id` so [`crate::mixer::AudioMixer`] can
//! align and sum up to three concurrent endpoints.

use std::{
    process::Command,
    sync::{atomic::AtomicBool, Arc},
    time::Instant,
};

use crossbeam::channel::Sender;
use pipewire::{
    self as pw,
    context::Context,
    main_loop::MainLoop,
    properties::properties,
    spa::{
        self,
        param::format::{MediaSubtype, MediaType},
        pod::Pod,
        utils::Direction,
    },
    stream::{StreamFlags, StreamState},
};

use crate::error::{Error, Result};
use crate::types::audio_frame::RawAudioFrame;

use super::{CaptureSource, Terminate};

#[derive(Clone, Copy, Default)]
struct UserData {
    audio_format: spa::param::audio::AudioInfoRaw,
}

pub struct PipewireAudioSource {
    device_id: usize,
    sink_name: Option<String>,
    video_ready: Arc<AtomicBool>,
    audio_ready: Arc<AtomicBool>,
    start_time: Instant,
    frame_tx: Sender<RawAudioFrame>,
    termination_recv: Option<pw::channel::Receiver<Terminate>>,
}

impl PipewireAudioSource {
    pub fn new(
        device_id: usize,
        sink_name: Option<String>,
        video_ready: Arc<AtomicBool>,
        audio_ready: Arc<AtomicBool>,
        start_time: Instant,
        frame_tx: Sender<RawAudioFrame>,
        termination_recv: pw::channel::Receiver<Terminate>,
    ) -> Self {
        Self {
            device_id,
            sink_name,
            video_ready,
            audio_ready,
            start_time,
            frame_tx,
            termination_recv: Some(termination_recv),
        }
    }
}

impl CaptureSource for PipewireAudioSource {
    fn run(&mut self) -> Result<()> {
        let pw_loop = MainLoop::new(None)?;
        let terminate_loop = pw_loop.clone();
        let terminate_recv = self
            .termination_recv
            .take()
            .ok_or_else(|| Error::Precondition("PipewireAudioSource::run called twice".into()))?;
        let _recv = terminate_recv.attach(pw_loop.loop_(), move |_| {
            log::debug!("terminating audio capture loop");
            terminate_loop.quit();
        });

        let pw_context = Context::new(&pw_loop)?;
        let audio_core = pw_context.connect(None)?;

        let _audio_core_listener = audio_core
            .add_listener_local()
            .info(|i| log::debug!("audio core:\n{i:#?}"))
            .error(|e, f, g, h| log::error!("{e},{f},{g},{h}"))
            .done(|d, _| log::debug!("done: {d}"))
            .register();

        let data = UserData::default();
        let audio_stream = pw::stream::Stream::new(
            &audio_core,
            "replaybuffer-audio",
            properties! {
                *pw::keys::MEDIA_TYPE => "Audio",
                *pw::keys::MEDIA_CATEGORY => "Capture",
                *pw::keys::MEDIA_ROLE => "Music",
                *pw::keys::NODE_LATENCY => "1024/48000",
            },
        )?;

        let video_ready_clone = Arc::clone(&self.video_ready);
        let audio_ready_clone = Arc::clone(&self.audio_ready);
        let start_time = self.start_time;
        let frame_tx = self.frame_tx.clone();
        let device_id = self.device_id;

        let _listener = audio_stream
            .add_local_listener_with_user_data(data)
            .state_changed(move |_, _, old, new| {
                log::debug!("audio stream [{device_id}] state changed: {old:?} -> {new:?}");
                audio_ready_clone.store(
                    new == StreamState::Streaming,
                    std::sync::atomic::Ordering::Release,
                );
            })
            .param_changed(|_, udata, id, param| {
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
                if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                    return;
                }
                if udata.audio_format.parse(param).is_err() {
                    log::error!("failed to parse audio format param");
                    return;
                }
                log::debug!(
                    "capturing rate={} channels={}",
                    udata.audio_format.rate(),
                    udata.audio_format.channels()
                );
            })
            .process(move |stream, _| {
                let Some(mut buffer) = stream.dequeue_buffer() else {
                    log::debug!("out of audio buffers");
                    return;
                };

                if !video_ready_clone.load(std::sync::atomic::Ordering::Acquire) {
                    return;
                }

                let datas = buffer.datas_mut();
                if datas.is_empty() {
                    return;
                }

                let pts_100ns = (start_time.elapsed().as_nanos() / 100) as i64;
                let data = &mut datas[0];
                let n_samples = data.chunk().size() / std::mem::size_of::<f32>() as u32;

                if let Some(samples) = data.data() {
                    let samples_f32: &[f32] = bytemuck::cast_slice(samples);
                    let samples = &samples_f32[..n_samples as usize];
                    if frame_tx
                        .try_send(RawAudioFrame {
                            samples: samples.to_vec(),
                            timestamp: pts_100ns,
                            device_id,
                        })
                        .is_err()
                    {
                        log::error!("could not send audio frame [{device_id}] at {pts_100ns}");
                    }
                }
            })
            .register()?;

        let audio_spa_obj = pw::spa::pod::object! {
            pw::spa::utils::SpaTypes::ObjectParamFormat,
            pw::spa::param::ParamType::EnumFormat,
            pw::spa::pod::property!(
                pw::spa::param::format::FormatProperties::MediaType,
                Id,
                pw::spa::param::format::MediaType::Audio
            ),
            pw::spa::pod::property!(
                pw::spa::param::format::FormatProperties::MediaSubtype,
                Id,
                pw::spa::param::format::MediaSubtype::Raw
            ),
            pw::spa::pod::property!(
                pw::spa::param::format::FormatProperties::AudioFormat,
                Id,
                pw::spa::param::audio::AudioFormat::F32LE
            )
        };

        let audio_spa_values: Vec<u8> = pw::spa::pod::serialize::PodSerializer::serialize(
            std::io::Cursor::new(Vec::new()),
            &pw::spa::pod::Value::Object(audio_spa_obj),
        )
        .map_err(|_| Error::InitFailure("failed to serialize audio format pod".into()))?
        .0
        .into_inner();

        let mut audio_params = [Pod::from_bytes(&audio_spa_values)
            .ok_or_else(|| Error::InitFailure("invalid audio format pod bytes".into()))?];

        let node_id = match &self.sink_name {
            Some(name) => resolve_sink_node_id(name),
            None => resolve_default_sink_node_id(),
        };
        log::debug!("audio endpoint [{device_id}] resolved node id: {node_id:?}");

        audio_stream.connect(
            Direction::Input,
            node_id,
            StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS | StreamFlags::RT_PROCESS,
            &mut audio_params,
        )?;

        pw_loop.run();
        Ok(())
    }
}

fn resolve_default_sink_node_id() -> Option<u32> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(r#"pactl list sinks | awk -v sink="$(pactl info | grep 'Default Sink' | cut -d' ' -f3)" '$0 ~ "Name: " sink { found=1 } found && /object.id/ { print $NF; exit }'"#)
        .output()
        .ok()?;
    parse_node_id(&output.stdout)
}

fn resolve_sink_node_id(sink_name: &str) -> Option<u32> {
    let script = format!(
        r#"pactl list sinks | awk -v sink="{sink_name}" '$0 ~ "Name: " sink {{ found=1 }} found && /object.id/ {{ print $NF; exit }}'"#
    );
    let output = Command::new("sh").arg("-c").arg(script).output().ok()?;
    parse_node_id(&output.stdout)
}

fn parse_node_id(stdout: &[u8]) -> Option<u32> {
    String::from_utf8_lossy(stdout)
        .replace('"', "")
        .trim()
        .parse::<u32>()
        .ok()
}
