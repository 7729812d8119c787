use crate::error::Result;
use crate::types::audio_frame::EncodedAudioSample;

const MIN_RMS: f32 = 0.01;

/// A software audio encoder consuming already-mixed PCM: mixing happens
/// before encoding, never after.
pub trait AudioEncoder: Send {
    fn process(&mut self, samples: &[f32], timestamp: i64) -> Result<Vec<EncodedAudioSample>>;
    fn drain(&mut self) -> Result<Vec<EncodedAudioSample>>;
    fn reset(&mut self) -> Result<()>;
}

/// Boosts quiet input up toward a floor RMS so a near-silent capture
/// endpoint doesn't mix into inaudibility; never boosts by more than 5x.
pub fn boost_with_rms(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let sum_sqrs = samples.iter().map(|&s| s * s).sum::<f32>();
    let rms = (sum_sqrs / samples.len() as f32).sqrt();

    let gain = if rms > 0.0 && rms < MIN_RMS {
        MIN_RMS / rms
    } else {
        1.0
    };
    let gain = gain.min(5.0);
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boost_raises_quiet_signal_toward_floor() {
        let mut samples = vec![0.001f32; 480];
        boost_with_rms(&mut samples);
        let rms = (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        assert!(rms >= MIN_RMS - 1e-4);
    }

    #[test]
    fn boost_never_amplifies_past_5x() {
        let mut samples = vec![0.0001f32; 480];
        boost_with_rms(&mut samples);
        assert!(samples[0] <= 0.0001 * 5.0 + 1e-6);
    }

    #[test]
    fn boost_is_a_no_op_on_silence() {
        let mut samples = vec![0.0f32; 480];
        boost_with_rms(&mut samples);
        assert!(samples.iter().all(|&s| s == 0.0));
    }
}
