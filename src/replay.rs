//! Rolling replay buffer orchestrator.
//!
//! Wires a capture -> color conversion -> hardware encode producer chain,
//! but sinks into a [`FrameRing`] instead of an output channel, and
//! exposes [`ReplayBuffer::save_async`] to extract the trailing window to
//! a file on demand. Implements [`PipelineDriver`] so a
//! [`crate::supervisor::Supervisor`] can own its lifecycle.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError};
use ffmpeg_next::{self as ffmpeg, Rational};

use crate::capture::audio::PipewireAudioSource;
use crate::capture::video::run_with_bounded_reinit;
use crate::capture::{CaptureSource, CaptureState, Terminate};
use crate::config::Configuration;
use crate::encoders::aac::AacEncoder;
use crate::encoders::audio::AudioEncoder;
use crate::encoders::dynamic::DynamicVideoEncoder;
use crate::encoders::video::{bitrate_kbps, VideoEncoder};
use crate::error::Result;
use crate::logger::AsyncLogger;
use crate::mixer::AudioMixer;
use crate::mux::batch::BatchMuxer;
use crate::mux::{AudioStreamParams, VideoStreamParams};
use crate::ring::{unwind_partial_copy, ExtractResult, FrameRing};
use crate::supervisor::PipelineDriver;
use crate::types::state::Counters;
use crate::types::video_frame::EncodedFrame;
use crate::utils::TIME_UNIT_100NS;

/// Audio chunks arrive one [`crate::mixer`]'s `MIX_WINDOW`-sample window at
/// a time at 48kHz, roughly 50/s; used only to size the audio ring the way
/// `ring_capacity` sizes the video ring off fps.
const AUDIO_CHUNK_RATE_HZ: u32 = 50;

/// Re-copies an already-extracted sample set into a freshly allocated
/// `Vec` before handing it to the muxer, so a save under genuine memory
/// pressure unwinds cleanly instead of extracting into a vector the OS
/// then can't back. `drain_for_extract` itself never partially fails
/// (Vec growth either succeeds or aborts), so this is the actual
/// `AllocFailed` path exercised outside the ring's own unit tests.
fn copy_or_unwind<T>(samples: Vec<T>) -> Result<Vec<T>> {
    let mut out: Vec<T> = Vec::new();
    if out.try_reserve_exact(samples.len()).is_err() {
        return unwind_partial_copy(out).map(|_| Vec::new());
    }
    out.extend(samples);
    Ok(out)
}

/// Identifies the already-negotiated PipeWire video node this buffer reads
/// from. Resolved by the UI collaborator (portal negotiation, monitor/window
/// picking) before it reaches the core, same scope line `capture::video`
/// draws around `stream_node`.
#[derive(Debug, Clone)]
pub struct CaptureHandles {
    pub pipewire_fd: RawFd,
    pub stream_node: u32,
    pub use_nvidia_modifiers: bool,
}

pub struct ReplayBuffer {
    config: Configuration,
    logger: AsyncLogger,
    counters: Arc<Counters>,
    handles: CaptureHandles,
    width: u32,
    height: u32,

    video_ring: Arc<FrameRing<EncodedFrame>>,
    audio_ring: Option<Arc<FrameRing<crate::types::audio_frame::EncodedAudioSample>>>,

    video_encoder: Arc<Mutex<DynamicVideoEncoder>>,
    audio_mixer: Option<Arc<Mutex<AudioMixer>>>,

    state: Arc<CaptureState>,
    stop: Arc<AtomicBool>,
    video_terminate_tx: Arc<Mutex<Option<pipewire::channel::Sender<Terminate>>>>,
    audio_terminate_txs: Vec<pipewire::channel::Sender<Terminate>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl ReplayBuffer {
    pub fn new(
        config: Configuration,
        handles: CaptureHandles,
        width: u32,
        height: u32,
        logger: AsyncLogger,
    ) -> Result<Self> {
        let video_ring = Arc::new(FrameRing::new(config.replay_duration_s, config.fps.as_u32()));
        let audio_ring = if config.audio_enabled {
            Some(Arc::new(FrameRing::new(
                config.replay_duration_s,
                AUDIO_CHUNK_RATE_HZ,
            )))
        } else {
            None
        };

        let video_encoder = Arc::new(Mutex::new(DynamicVideoEncoder::new(
            width,
            height,
            config.fps.as_u32(),
            config.output_format.is_hevc(),
            config.quality,
            None,
        )?));

        let audio_mixer = if config.audio_enabled {
            let encoder: Box<dyn AudioEncoder> = Box::new(AacEncoder::new(48_000, 128_000)?);
            let gains: Vec<(usize, u8)> = config
                .audio_sources
                .iter()
                .enumerate()
                .map(|(idx, src)| (idx, src.gain_pct))
                .collect();
            Some(Arc::new(Mutex::new(AudioMixer::new(encoder, &gains))))
        } else {
            None
        };

        Ok(Self {
            config,
            logger,
            counters: Arc::new(Counters::default()),
            handles,
            width,
            height,
            video_ring,
            audio_ring,
            video_encoder,
            audio_mixer,
            state: Arc::new(CaptureState::new()),
            stop: Arc::new(AtomicBool::new(true)),
            video_terminate_tx: Arc::new(Mutex::new(None)),
            audio_terminate_txs: Vec::new(),
            worker_handles: Vec::new(),
        })
    }

    pub fn span_s(&self) -> f64 {
        self.video_ring.span_s()
    }

    pub fn memory_bytes(&self) -> u64 {
        self.video_ring.memory_bytes()
            + self
                .audio_ring
                .as_ref()
                .map(|r| r.memory_bytes())
                .unwrap_or(0)
    }

    fn video_stream_params(&self) -> VideoStreamParams {
        VideoStreamParams {
            codec_id: if self.config.output_format.is_hevc() {
                ffmpeg::codec::Id::HEVC
            } else {
                ffmpeg::codec::Id::H264
            },
            width: self.width,
            height: self.height,
            time_base: Rational::new(1, TIME_UNIT_100NS as i32),
            bit_rate: bitrate_kbps(
                self.width,
                self.height,
                self.config.fps.as_u32(),
                self.config.quality,
            ) as usize
                * 1000,
        }
    }

    fn audio_stream_params(&self) -> AudioStreamParams {
        AudioStreamParams {
            codec_id: ffmpeg::codec::Id::AAC,
            sample_rate: 48_000,
            channels: 2,
            time_base: Rational::new(1, 48_000),
            bit_rate: 128_000,
        }
    }

    /// Extracts the trailing window from both rings and writes it to
    /// `path` on a background thread. Returns immediately; join the
    /// handle to observe the result.
    pub fn save_async(&self, path: String) -> JoinHandle<Result<()>> {
        let video_ring = Arc::clone(&self.video_ring);
        let audio_ring = self.audio_ring.clone();
        let video_params = self.video_stream_params();
        let audio_params = self.audio_ring.as_ref().map(|_| self.audio_stream_params());
        let logger = self.logger.clone();

        std::thread::spawn(move || -> Result<()> {
            let video = match video_ring.drain_for_extract() {
                ExtractResult::Extracted { samples, .. } => samples,
                ExtractResult::Empty => {
                    logger.log("save requested but video ring is empty".into());
                    return Ok(());
                }
                ExtractResult::NoKeyframe => {
                    logger.log("save requested but no keyframe buffered yet".into());
                    return Ok(());
                }
                ExtractResult::AllocFailed => {
                    logger.log("save aborted: allocation failure during extract".into());
                    return Ok(());
                }
            };
            let video = match copy_or_unwind(video) {
                Ok(v) => v,
                Err(e) => {
                    logger.log(format!("save aborted: {e}"));
                    return Ok(());
                }
            };

            let audio = match &audio_ring {
                Some(ring) => match ring.drain_for_extract() {
                    ExtractResult::Extracted { samples, .. } => samples,
                    _ => Vec::new(),
                },
                None => Vec::new(),
            };
            let audio = match copy_or_unwind(audio) {
                Ok(a) => a,
                Err(e) => {
                    logger.log(format!("save aborted: {e}"));
                    return Ok(());
                }
            };

            BatchMuxer::write(&path, &video, &audio, &video_params, audio_params.as_ref())?;
            logger.log(format!("saved replay clip to {path}"));
            Ok(())
        })
    }
}

impl PipelineDriver for ReplayBuffer {
    fn start(&mut self) -> Result<()> {
        self.stop.store(false, Ordering::Release);
        let start_time = Instant::now();

        let (frame_tx, frame_rx) = bounded(10);
        let video_terminate_tx = Arc::clone(&self.video_terminate_tx);
        let video_ready = Arc::clone(&self.state.video_ready);
        let audio_ready = Arc::clone(&self.state.audio_ready);
        let pipewire_fd = self.handles.pipewire_fd;
        let stream_node = self.handles.stream_node;
        let use_nvidia_modifiers = self.handles.use_nvidia_modifiers;
        let capture_logger = self.logger.clone();
        self.worker_handles.push(std::thread::spawn(move || {
            if let Err(e) = run_with_bounded_reinit(
                pipewire_fd,
                stream_node,
                video_ready,
                audio_ready,
                use_nvidia_modifiers,
                start_time,
                frame_tx,
                video_terminate_tx,
            ) {
                capture_logger.log(format!("video capture loop exited: {e}"));
            }
        }));

        let video_encoder = Arc::clone(&self.video_encoder);
        let video_ring = Arc::clone(&self.video_ring);
        let counters = Arc::clone(&self.counters);
        let stop = Arc::clone(&self.stop);
        let logger = self.logger.clone();
        self.worker_handles.push(std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                match frame_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(frame) => {
                        logger.heartbeat("replay_video_encode");
                        let mut enc = video_encoder.lock().unwrap();
                        if let Err(e) = enc.submit(&frame) {
                            logger.log(format!("video encode submit failed: {e}"));
                            continue;
                        }
                        match enc.drain() {
                            Ok(encoded) => {
                                if video_ring.sequence_header().is_empty() {
                                    if let Some(header) = enc.sequence_header() {
                                        video_ring.set_sequence_header(header);
                                    }
                                }
                                for ef in encoded {
                                    video_ring.add(ef, &counters);
                                }
                            }
                            Err(e) => logger.log(format!("video encode drain failed: {e}")),
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }));

        if !self.config.audio_enabled {
            self.state.audio_ready.store(true, Ordering::Release);
        } else {
            let (audio_tx, audio_rx) = bounded(20);
            for (idx, source_cfg) in self.config.audio_sources.iter().enumerate() {
                let (pw_tx, pw_rx) = pipewire::channel::channel();
                self.audio_terminate_txs.push(pw_tx);

                let mut audio_source = PipewireAudioSource::new(
                    idx,
                    Some(source_cfg.device_id.clone()),
                    Arc::clone(&self.state.video_ready),
                    Arc::clone(&self.state.audio_ready),
                    start_time,
                    audio_tx.clone(),
                    pw_rx,
                );
                let audio_logger = self.logger.clone();
                self.worker_handles.push(std::thread::spawn(move || {
                    if let Err(e) = audio_source.run() {
                        audio_logger.log(format!("audio capture[{idx}] loop exited: {e}"));
                    }
                }));
            }
            drop(audio_tx);

            let mixer = Arc::clone(self.audio_mixer.as_ref().unwrap());
            let audio_ring = Arc::clone(self.audio_ring.as_ref().unwrap());
            let counters = Arc::clone(&self.counters);
            let stop = Arc::clone(&self.stop);
            let logger = self.logger.clone();
            self.worker_handles.push(std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    match audio_rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(frame) => {
                            logger.heartbeat("replay_audio_mix");
                            let mut mixer = mixer.lock().unwrap();
                            mixer.ingest(frame);
                            match mixer.drain_mixed() {
                                Ok(samples) => {
                                    for sample in samples {
                                        audio_ring.add(sample, &counters);
                                    }
                                }
                                Err(e) => logger.log(format!("audio mix/encode failed: {e}")),
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }));
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(tx) = self.video_terminate_tx.lock().unwrap().take() {
            let _ = tx.send(Terminate);
        }
        for tx in self.audio_terminate_txs.drain(..) {
            let _ = tx.send(Terminate);
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
        self.state.video_ready.store(false, Ordering::Release);
        self.state.audio_ready.store(false, Ordering::Release);

        let trailing = self.video_encoder.lock().unwrap().flush()?;
        let counters = Arc::clone(&self.counters);
        for ef in trailing {
            self.video_ring.add(ef, &counters);
        }

        if let Some(mixer) = &self.audio_mixer {
            let mut mixer = mixer.lock().unwrap();
            let tail = mixer.drain_encoder()?;
            if let Some(ring) = &self.audio_ring {
                for sample in tail {
                    ring.add(sample, &counters);
                }
            }
            mixer.reset()?;
        }
        self.video_encoder.lock().unwrap().reset()?;
        Ok(())
    }
}

impl Drop for ReplayBuffer {
    fn drop(&mut self) {
        if !self.stop.load(Ordering::Acquire) {
            let _ = PipelineDriver::stop(self);
        }
    }
}
