//! Continuous streaming recorder orchestrator.
//!
//! Drives the same capture -> encode producer chain as [`crate::replay::ReplayBuffer`]
//! but sinks straight into a [`StreamingMuxer`] instead of a [`crate::ring::FrameRing`] —
//! there is no rolling window to maintain, packets are written as they
//! arrive. Implements [`PipelineDriver`] so a [`crate::supervisor::Supervisor`]
//! can own its lifecycle.

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
use crate::mux::streaming::StreamingMuxer;
use crate::mux::{AudioStreamParams, VideoStreamParams};
use crate::replay::CaptureHandles;
use crate::supervisor::PipelineDriver;
use crate::utils::TIME_UNIT_100NS;

pub struct Recorder {
    config: Configuration,
    logger: AsyncLogger,
    handles: CaptureHandles,

    muxer: Arc<Mutex<StreamingMuxer>>,
    video_encoder: Arc<Mutex<DynamicVideoEncoder>>,
    audio_mixer: Option<Arc<Mutex<AudioMixer>>>,

    state: Arc<CaptureState>,
    stop: Arc<AtomicBool>,
    video_terminate_tx: Arc<Mutex<Option<pipewire::channel::Sender<Terminate>>>>,
    audio_terminate_txs: Vec<pipewire::channel::Sender<Terminate>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl Recorder {
    pub fn new(
        config: Configuration,
        handles: CaptureHandles,
        width: u32,
        height: u32,
        output_path: &str,
        logger: AsyncLogger,
    ) -> Result<Self> {
        let video_params = VideoStreamParams {
            codec_id: if config.output_format.is_hevc() {
                ffmpeg::codec::Id::HEVC
            } else {
                ffmpeg::codec::Id::H264
            },
            width,
            height,
            time_base: Rational::new(1, TIME_UNIT_100NS as i32),
            bit_rate: bitrate_kbps(width, height, config.fps.as_u32(), config.quality) as usize
                * 1000,
        };
        let audio_params = config.audio_enabled.then(|| AudioStreamParams {
            codec_id: ffmpeg::codec::Id::AAC,
            sample_rate: 48_000,
            channels: 2,
            time_base: Rational::new(1, 48_000),
            bit_rate: 128_000,
        });

        let muxer = StreamingMuxer::new(output_path, &video_params, audio_params.as_ref())?;

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
            handles,
            muxer: Arc::new(Mutex::new(muxer)),
            video_encoder,
            audio_mixer,
            state: Arc::new(CaptureState::new()),
            stop: Arc::new(AtomicBool::new(true)),
            video_terminate_tx: Arc::new(Mutex::new(None)),
            audio_terminate_txs: Vec::new(),
            worker_handles: Vec::new(),
        })
    }
}

impl PipelineDriver for Recorder {
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
        let muxer = Arc::clone(&self.muxer);
        let stop = Arc::clone(&self.stop);
        let logger = self.logger.clone();
        self.worker_handles.push(std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                match frame_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(frame) => {
                        logger.heartbeat("record_video_encode");
                        let mut enc = video_encoder.lock().unwrap();
                        if let Err(e) = enc.submit(&frame) {
                            logger.log(format!("video encode submit failed: {e}"));
                            continue;
                        }
                        match enc.drain() {
                            Ok(encoded) => {
                                let mut muxer = muxer.lock().unwrap();
                                for ef in &encoded {
                                    if let Err(e) = muxer.write_video(ef) {
                                        logger.log(format!("video write failed: {e}"));
                                    }
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
            let muxer = Arc::clone(&self.muxer);
            let stop = Arc::clone(&self.stop);
            let logger = self.logger.clone();
            self.worker_handles.push(std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    match audio_rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(frame) => {
                            logger.heartbeat("record_audio_mix");
                            let mut mixer = mixer.lock().unwrap();
                            mixer.ingest(frame);
                            match mixer.drain_mixed() {
                                Ok(samples) => {
                                    let mut muxer = muxer.lock().unwrap();
                                    for sample in &samples {
                                        if let Err(e) = muxer.write_audio(sample) {
                                            logger.log(format!("audio write failed: {e}"));
                                        }
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

        let flushed = self.video_encoder.lock().unwrap().flush()?;
        {
            let mut muxer = self.muxer.lock().unwrap();
            for frame in &flushed {
                muxer.write_video(frame)?;
            }
            if let Some(mixer) = &self.audio_mixer {
                let tail = mixer.lock().unwrap().drain_encoder()?;
                for sample in &tail {
                    muxer.write_audio(sample)?;
                }
            }
            muxer.finish()?;
        }
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if !self.stop.load(Ordering::Acquire) {
            let _ = PipelineDriver::stop(self);
        }
    }
}
