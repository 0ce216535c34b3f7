use std::path::{Path, PathBuf};

use certivo_core::source::resample_linear;
use certivo_core::{AudioError, AudioSource};
use hound::{SampleFormat, WavReader};

/// A WAV file on disk.
pub struct WavAudio {
    path: PathBuf,
}

impl WavAudio {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSource for WavAudio {
    fn load(&self, target_rate: u32) -> Result<Vec<f32>, AudioError> {
        let reader = WavReader::open(&self.path)
            .map_err(|e| AudioError::Open(format!("{}: {e}", self.path.display())))?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(AudioError::Unsupported(format!(
                "{} channel(s) at {} Hz",
                spec.channels, spec.sample_rate
            )));
        }

        let interleaved = read_normalized(reader)?;
        let mono = mixdown(&interleaved, spec.channels as usize);

        tracing::debug!(
            path = %self.path.display(),
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            samples = mono.len(),
            "audio decoded"
        );

        Ok(resample_linear(&mono, spec.sample_rate, target_rate))
    }
}

/// Decode every sample to f32 in [-1, 1].
fn read_normalized<R: std::io::Read>(reader: WavReader<R>) -> Result<Vec<f32>, AudioError> {
    let spec = reader.spec();
    match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map_err(|e| AudioError::Decode(e.to_string())))
            .collect(),
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(AudioError::Unsupported(format!(
                    "{}-bit integer PCM",
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| {
                    s.map(|v| v as f32 / scale)
                        .map_err(|e| AudioError::Decode(e.to_string()))
                })
                .collect()
        }
    }
}

/// Average interleaved channels into one.
fn mixdown(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn temp_wav(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "certivo-audio-{tag}-{}.wav",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn missing_file_is_open_error() {
        let audio = WavAudio::new("/nonexistent/certivo.wav");
        assert!(matches!(audio.load(16_000), Err(AudioError::Open(_))));
    }

    #[test]
    fn garbage_file_is_open_error() {
        let path = temp_wav("garbage");
        std::fs::write(&path, b"RIFF but not really").unwrap();
        assert!(WavAudio::new(&path).load(16_000).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn int16_stereo_is_normalized_mixed_and_resampled() {
        let path = temp_wav("stereo");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 32_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..32_000 {
            writer.write_sample(16_384i16).unwrap(); // 0.5
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let samples = WavAudio::new(&path).load(16_000).unwrap();
        assert_eq!(samples.len(), 16_000);
        assert!(samples.iter().all(|s| (s - 0.25).abs() < 1e-4));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn float_mono_passes_through() {
        let path = temp_wav("float");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..160 {
            writer.write_sample(if i % 2 == 0 { 0.02f32 } else { -0.02 }).unwrap();
        }
        writer.finalize().unwrap();

        let samples = WavAudio::new(&path).load(16_000).unwrap();
        assert_eq!(samples.len(), 160);
        let energy = samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32;
        assert!((energy - 0.02).abs() < 1e-6);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn mixdown_averages_channels() {
        assert_eq!(mixdown(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(mixdown(&[0.3, 0.4], 1), vec![0.3, 0.4]);
    }
}
