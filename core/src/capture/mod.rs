//! Binary capture files uploaded by sensor stations.
//!
//! A capture is a config block followed either by spectral data blocks (scan
//! files) or by interleaved IQ samples (raw-IQ files). See [`format`] for the
//! byte layout.

pub mod format;
pub mod iq;
pub mod scan;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::math::FixedShort;
use crate::store::object::{RAW_IQ_CONTAINER, SCAN_CONTAINER};

pub use iq::RawIqDecoder;
pub use scan::ScanDecoder;
pub use writer::CaptureWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Scan,
    RawIq,
}

impl FileKind {
    pub fn tag(self) -> u8 {
        match self {
            FileKind::Scan => 0,
            FileKind::RawIq => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(FileKind::Scan),
            1 => Ok(FileKind::RawIq),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }

    /// Container the upload pipeline writes this kind of file to.
    pub fn container(self) -> &'static str {
        match self {
            FileKind::Scan => SCAN_CONTAINER,
            FileKind::RawIq => RAW_IQ_CONTAINER,
        }
    }

    pub fn from_container(container: &str) -> Result<Self, DecodeError> {
        match container {
            SCAN_CONTAINER => Ok(FileKind::Scan),
            RAW_IQ_CONTAINER => Ok(FileKind::RawIq),
            other => Err(DecodeError::UnknownLocation(other.to_string())),
        }
    }
}

/// How readings are packed in a scan body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    /// `i16` hundredths of a dB.
    None,
    /// `u8` half-dB steps above -160 dB.
    Byte,
}

impl CompressionType {
    pub fn tag(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Byte => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Byte),
            other => Err(DecodeError::UnknownCompression(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescription {
    pub sensor_id: u16,
    pub start_frequency_hz: u64,
    pub stop_frequency_hz: u64,
    pub step_hz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBlock {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    /// When the station's configuration was last edited.
    pub config_modified: DateTime<Utc>,
    pub hardware_info: String,
    pub sensors: Vec<SensorDescription>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub start_hz: u64,
    pub stop_hz: u64,
}

/// Contiguous readings starting at one frequency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectralSegment {
    pub start_frequency_hz: u64,
    pub step_hz: u32,
    pub readings: Vec<FixedShort>,
}

impl SpectralSegment {
    fn frequency_at(&self, index: usize) -> Option<u64> {
        u64::try_from(index)
            .ok()?
            .checked_mul(u64::from(self.step_hz))?
            .checked_add(self.start_frequency_hz)
    }

    /// Frequency of the last reading; `None` for an empty segment or one that
    /// runs past `u64::MAX`.
    pub fn stop_frequency_hz(&self) -> Option<u64> {
        self.frequency_at(self.readings.len().checked_sub(1)?)
    }

    /// `(frequency, reading)` pairs in ascending frequency order. Stops at the
    /// first frequency that would overflow.
    pub fn points(&self) -> impl Iterator<Item = (u64, FixedShort)> + '_ {
        self.readings
            .iter()
            .enumerate()
            .map_while(move |(i, &reading)| Some((self.frequency_at(i)?, reading)))
    }
}

/// One time slice of a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectralDataBlock {
    pub timestamp: DateTime<Utc>,
    pub segments: Vec<SpectralSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub config: ConfigBlock,
    pub kind: FileKind,
    pub compression: CompressionType,
    pub blocks: Vec<SpectralDataBlock>,
    /// Sampled band of a raw-IQ capture.
    pub iq_band: Option<FrequencyBand>,
}

impl CaptureFile {
    /// Frequency coverage: the raw-IQ band, else lowest start and highest stop
    /// across sensors, else the span of the decoded segments.
    pub fn frequency_span(&self) -> Option<FrequencyBand> {
        if let Some(band) = self.iq_band {
            return Some(band);
        }
        let sensors = &self.config.sensors;
        if !sensors.is_empty() {
            let start_hz = sensors.iter().map(|s| s.start_frequency_hz).min()?;
            let stop_hz = sensors.iter().map(|s| s.stop_frequency_hz).max()?;
            return Some(FrequencyBand { start_hz, stop_hz });
        }
        let mut points = self
            .blocks
            .iter()
            .flat_map(|b| b.segments.iter())
            .flat_map(|s| s.points().map(|(f, _)| f));
        let first = points.next()?;
        let (start_hz, stop_hz) = points.fold((first, first), |(lo, hi), f| (lo.min(f), hi.max(f)));
        Some(FrequencyBand { start_hz, stop_hz })
    }
}

/// Decoder for one file kind.
pub trait CaptureDecoder: Send + Sync {
    fn kind(&self) -> FileKind;
    fn decode(&self, bytes: &[u8]) -> Result<CaptureFile, DecodeError>;
}

/// Pick the decoder for a file kind.
pub fn decoder_for(kind: FileKind) -> Box<dyn CaptureDecoder> {
    match kind {
        FileKind::Scan => Box::new(ScanDecoder),
        FileKind::RawIq => Box::new(RawIqDecoder::default()),
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("capture truncated at offset {offset} while reading {field}")]
    Truncated { offset: usize, field: &'static str },
    #[error("bad capture magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported capture format version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown file kind tag {0}")]
    UnknownKind(u8),
    #[error("unknown compression tag {0}")]
    UnknownCompression(u8),
    #[error("expected a {expected:?} capture, found {found:?}")]
    KindMismatch { expected: FileKind, found: FileKind },
    #[error("invalid UTF-8 in {0}")]
    InvalidText(&'static str),
    #[error("invalid timestamp {0} ms")]
    InvalidTimestamp(i64),
    #[error("{0} trailing bytes after capture body")]
    TrailingBytes(usize),
    #[error("unrecognised capture location {0}")]
    UnknownLocation(String),
    #[error("malformed capture: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(sensors: Vec<SensorDescription>) -> ConfigBlock {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ConfigBlock {
            station_id: "st-1".into(),
            timestamp: ts,
            config_modified: ts,
            hardware_info: String::new(),
            sensors,
        }
    }

    fn sensor(id: u16, start: u64, stop: u64) -> SensorDescription {
        SensorDescription {
            sensor_id: id,
            start_frequency_hz: start,
            stop_frequency_hz: stop,
            step_hz: 1_000,
        }
    }

    #[test]
    fn span_covers_all_sensors() {
        let capture = CaptureFile {
            config: config(vec![sensor(1, 400, 900), sensor(2, 100, 300)]),
            kind: FileKind::Scan,
            compression: CompressionType::None,
            blocks: Vec::new(),
            iq_band: None,
        };
        assert_eq!(
            capture.frequency_span(),
            Some(FrequencyBand {
                start_hz: 100,
                stop_hz: 900
            })
        );
    }

    #[test]
    fn raw_iq_band_wins_over_sensors() {
        let band = FrequencyBand {
            start_hz: 10,
            stop_hz: 20,
        };
        let capture = CaptureFile {
            config: config(vec![sensor(1, 400, 900)]),
            kind: FileKind::RawIq,
            compression: CompressionType::None,
            blocks: Vec::new(),
            iq_band: Some(band),
        };
        assert_eq!(capture.frequency_span(), Some(band));
    }

    #[test]
    fn points_stop_short_of_overflow() {
        let segment = SpectralSegment {
            start_frequency_hz: u64::MAX - 10,
            step_hz: 100,
            readings: vec![FixedShort::from_db(-40.0); 2],
        };
        let points: Vec<u64> = segment.points().map(|(f, _)| f).collect();
        assert_eq!(points, vec![u64::MAX - 10]);
        assert_eq!(segment.stop_frequency_hz(), None);

        let fits = SpectralSegment {
            start_frequency_hz: 1_000,
            step_hz: 250,
            readings: vec![FixedShort::NAN; 5],
        };
        assert_eq!(fits.stop_frequency_hz(), Some(2_000));
    }

    #[test]
    fn kinds_map_to_containers() {
        for kind in [FileKind::Scan, FileKind::RawIq] {
            assert_eq!(FileKind::from_container(kind.container()).unwrap(), kind);
        }
        assert!(FileKind::from_container("logs").is_err());
    }
}
