use num_complex::Complex32;

use super::format::{check_frequency, read_config, read_header, ByteReader};
use super::{
    CaptureDecoder, CaptureFile, DecodeError, FileKind, FrequencyBand, SpectralDataBlock,
    SpectralSegment,
};
use crate::math::{FftHelper, FixedShort};

pub const DEFAULT_FFT_SIZE: usize = 256;

/// Interleaved IQ samples as stored in a raw-IQ capture body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqRecording {
    pub center_frequency_hz: u64,
    pub sample_rate_hz: u32,
    pub samples: Vec<(i16, i16)>,
}

impl IqRecording {
    /// Band sampled around the centre frequency, clamped at 0 Hz.
    pub fn band(&self) -> Result<FrequencyBand, DecodeError> {
        let half = u64::from(self.sample_rate_hz / 2);
        let stop_hz = self
            .center_frequency_hz
            .checked_add(half)
            .ok_or_else(|| DecodeError::Malformed("raw-IQ band runs past u64::MAX".into()))?;
        Ok(FrequencyBand {
            start_hz: self.center_frequency_hz.saturating_sub(half),
            stop_hz: check_frequency("raw-IQ band stop", stop_hz)?,
        })
    }
}

/// Decoder for raw-IQ captures. The samples are reduced to a single spectral
/// block: a frame-averaged power spectrum covering the sampled band.
#[derive(Debug, Clone, Copy)]
pub struct RawIqDecoder {
    fft_size: usize,
}

impl RawIqDecoder {
    pub fn new(fft_size: usize) -> Self {
        Self {
            fft_size: fft_size.max(1),
        }
    }

    pub fn read_recording(reader: &mut ByteReader<'_>) -> Result<IqRecording, DecodeError> {
        let center_frequency_hz = reader.u64("center_hz")?;
        let sample_rate_hz = reader.u32("sample_rate_hz")?;
        let count = reader.u32("sample_count")? as usize;
        if reader.remaining() < count.saturating_mul(4) {
            return Err(DecodeError::Truncated {
                offset: reader.offset(),
                field: "iq_samples",
            });
        }
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            samples.push((reader.i16("i")?, reader.i16("q")?));
        }
        Ok(IqRecording {
            center_frequency_hz,
            sample_rate_hz,
            samples,
        })
    }

    fn spectrum(&self, recording: &IqRecording, band: FrequencyBand) -> Result<SpectralSegment, DecodeError> {
        if recording.sample_rate_hz == 0 {
            return Err(DecodeError::Malformed("raw-IQ sample rate is zero".into()));
        }
        let size = self.fft_size.min(recording.samples.len());
        if size == 0 {
            return Err(DecodeError::Malformed("raw-IQ capture holds no samples".into()));
        }
        let samples: Vec<Complex32> = recording
            .samples
            .iter()
            .map(|&(i, q)| Complex32::new(f32::from(i) / 32_768.0, f32::from(q) / 32_768.0))
            .collect();
        let power = FftHelper::new(size).averaged_power_db(&samples);
        Ok(SpectralSegment {
            start_frequency_hz: band.start_hz,
            step_hz: recording.sample_rate_hz / size as u32,
            readings: power.into_iter().map(FixedShort::from_db).collect(),
        })
    }
}

impl Default for RawIqDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

impl CaptureDecoder for RawIqDecoder {
    fn kind(&self) -> FileKind {
        FileKind::RawIq
    }

    fn decode(&self, bytes: &[u8]) -> Result<CaptureFile, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let header = read_header(&mut reader)?;
        if header.kind != FileKind::RawIq {
            return Err(DecodeError::KindMismatch {
                expected: FileKind::RawIq,
                found: header.kind,
            });
        }
        let config = read_config(&mut reader)?;
        let recording = Self::read_recording(&mut reader)?;
        reader.finish()?;

        let band = recording.band()?;
        let segment = self.spectrum(&recording, band)?;
        Ok(CaptureFile {
            blocks: vec![SpectralDataBlock {
                timestamp: config.timestamp,
                segments: vec![segment],
            }],
            config,
            kind: FileKind::RawIq,
            compression: header.compression,
            iq_band: Some(band),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureWriter, ConfigBlock};
    use chrono::{TimeZone, Utc};
    use std::f32::consts::PI;

    fn config() -> ConfigBlock {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        ConfigBlock {
            station_id: "harbour".into(),
            timestamp: ts,
            config_modified: ts,
            hardware_info: "hackrf".into(),
            sensors: Vec::new(),
        }
    }

    fn tone_recording(bin: usize, size: usize) -> IqRecording {
        let samples = (0..size * 4)
            .map(|n| {
                let phase = 2.0 * PI * bin as f32 * n as f32 / size as f32;
                ((phase.cos() * 16_000.0) as i16, (phase.sin() * 16_000.0) as i16)
            })
            .collect();
        IqRecording {
            center_frequency_hz: 433_000_000,
            sample_rate_hz: 2_000_000,
            samples,
        }
    }

    #[test]
    fn spectrum_spans_the_sampled_band() {
        let bytes = CaptureWriter::encode_raw_iq(&config(), &tone_recording(4, 32)).unwrap();
        let capture = RawIqDecoder::new(32).decode(&bytes).unwrap();
        let band = capture.frequency_span().unwrap();
        assert_eq!(band.start_hz, 432_000_000);
        assert_eq!(band.stop_hz, 434_000_000);

        let segment = &capture.blocks[0].segments[0];
        assert_eq!(segment.readings.len(), 32);
        assert_eq!(segment.step_hz, 62_500);
        let peak = segment
            .readings
            .iter()
            .enumerate()
            .max_by_key(|(_, r)| r.raw())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 16 + 4);
    }

    #[test]
    fn bands_past_the_ceiling_are_malformed() {
        let mut recording = tone_recording(1, 8);
        recording.center_frequency_hz = u64::MAX;
        assert!(matches!(recording.band(), Err(DecodeError::Malformed(_))));

        recording.center_frequency_hz = 1_000_000_000_000_000_000;
        let bytes = CaptureWriter::encode_raw_iq(&config(), &recording).unwrap();
        assert!(matches!(
            RawIqDecoder::new(8).decode(&bytes),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn empty_recording_is_rejected() {
        let recording = IqRecording {
            center_frequency_hz: 1,
            sample_rate_hz: 1_000,
            samples: Vec::new(),
        };
        let bytes = CaptureWriter::encode_raw_iq(&config(), &recording).unwrap();
        assert!(matches!(
            RawIqDecoder::default().decode(&bytes),
            Err(DecodeError::Malformed(_))
        ));
    }
}
