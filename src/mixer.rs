//! Multi-endpoint audio mixing: supports 1..3 concurrent endpoints,
//! mixed before encoding. Each endpoint's raw PCM is boosted
//! (`boost_with_rms`), gain-scaled per
//! [`crate::config::AudioSourceConfig::gain_pct`], queued per-endpoint,
//! and summed sample-by-sample once every endpoint has at least one
//! mix window buffered; the sum is clamped to `[-1.0, 1.0]` before it
//! reaches the encoder so clipping endpoints can't silently distort.

use std::collections::{HashMap, VecDeque};

use crate::encoders::audio::{boost_with_rms, AudioEncoder};
use crate::error::Result;
use crate::types::audio_frame::{EncodedAudioSample, RawAudioFrame};

const MIX_WINDOW: usize = 960;

struct EndpointBuffer {
    samples: VecDeque<f32>,
    gain: f32,
    last_timestamp: i64,
}

pub struct AudioMixer {
    endpoints: HashMap<usize, EndpointBuffer>,
    encoder: Box<dyn AudioEncoder>,
}

impl AudioMixer {
    pub fn new(encoder: Box<dyn AudioEncoder>, gains_pct: &[(usize, u8)]) -> Self {
        let endpoints = gains_pct
            .iter()
            .map(|&(device_id, gain_pct)| {
                (
                    device_id,
                    EndpointBuffer {
                        samples: VecDeque::with_capacity(MIX_WINDOW * 2),
                        gain: gain_pct as f32 / 100.0,
                        last_timestamp: 0,
                    },
                )
            })
            .collect();
        Self { endpoints, encoder }
    }

    /// Queues one endpoint's raw capture, boosting it first. A
    /// `device_id` not present in the configured endpoint set is dropped
    /// with a log line rather than silently mixed in.
    pub fn ingest(&mut self, mut frame: RawAudioFrame) {
        boost_with_rms(&mut frame.samples);
        let Some(buf) = self.endpoints.get_mut(&frame.device_id) else {
            log::warn!("dropping audio frame from unconfigured endpoint {}", frame.device_id);
            return;
        };
        buf.last_timestamp = frame.timestamp;
        buf.samples.extend(frame.samples);
    }

    /// Mixes and encodes every full window available across all
    /// endpoints. Safe to call after every `ingest`; it's a no-op if no
    /// endpoint has a full window yet.
    pub fn drain_mixed(&mut self) -> Result<Vec<EncodedAudioSample>> {
        let mut out = Vec::new();
        loop {
            if self.endpoints.is_empty() {
                break;
            }
            if self.endpoints.values().any(|b| b.samples.len() < MIX_WINDOW) {
                break;
            }

            let mut mixed = vec![0.0f32; MIX_WINDOW];
            let mut timestamp = 0i64;
            for buf in self.endpoints.values_mut() {
                timestamp = buf.last_timestamp;
                for (i, sample) in buf.samples.drain(..MIX_WINDOW).enumerate() {
                    mixed[i] += sample * buf.gain;
                }
            }
            for sample in mixed.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }

            out.extend(self.encoder.process(&mixed, timestamp)?);
        }
        Ok(out)
    }

    pub fn drain_encoder(&mut self) -> Result<Vec<EncodedAudioSample>> {
        self.encoder.drain()
    }

    pub fn reset(&mut self) -> Result<()> {
        for buf in self.endpoints.values_mut() {
            buf.samples.clear();
        }
        self.encoder.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopEncoder;
    impl AudioEncoder for NoopEncoder {
        fn process(&mut self, samples: &[f32], timestamp: i64) -> Result<Vec<EncodedAudioSample>> {
            Ok(vec![EncodedAudioSample::new(
                vec![0u8; samples.len()],
                timestamp,
                1,
            )])
        }
        fn drain(&mut self) -> Result<Vec<EncodedAudioSample>> {
            Ok(Vec::new())
        }
        fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn waits_for_every_endpoint_before_mixing() {
        let mut mixer = AudioMixer::new(Box::new(NoopEncoder), &[(0, 100), (1, 100)]);
        mixer.ingest(RawAudioFrame {
            samples: vec![0.5; MIX_WINDOW],
            timestamp: 1,
            device_id: 0,
        });
        assert!(mixer.drain_mixed().unwrap().is_empty());

        mixer.ingest(RawAudioFrame {
            samples: vec![0.5; MIX_WINDOW],
            timestamp: 2,
            device_id: 1,
        });
        assert_eq!(mixer.drain_mixed().unwrap().len(), 1);
    }

    #[test]
    fn unconfigured_endpoint_is_dropped_not_mixed() {
        let mut mixer = AudioMixer::new(Box::new(NoopEncoder), &[(0, 100)]);
        mixer.ingest(RawAudioFrame {
            samples: vec![1.0; MIX_WINDOW],
            timestamp: 1,
            device_id: 99,
        });
        assert!(mixer.drain_mixed().unwrap().is_empty());
    }

    #[test]
    fn gain_scales_and_sum_clamps_to_unit_range() {
        let mut mixer = AudioMixer::new(Box::new(NoopEncoder), &[(0, 100), (1, 100)]);
        mixer.ingest(RawAudioFrame {
            samples: vec![0.9; MIX_WINDOW],
            timestamp: 1,
            device_id: 0,
        });
        mixer.ingest(RawAudioFrame {
            samples: vec![0.9; MIX_WINDOW],
            timestamp: 1,
            device_id: 1,
        });
        assert_eq!(mixer.drain_mixed().unwrap().len(), 1);
    }
}
