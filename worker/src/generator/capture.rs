use anyhow::Context;
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use spectrumcore::capture::{
    CaptureFile, CaptureWriter, CompressionType, ConfigBlock, FileKind, SensorDescription,
    SpectralDataBlock, SpectralSegment,
};
use spectrumcore::math::FixedShort;

/// Shape of the synthetic sweeps used by the offline driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub start_frequency_hz: u64,
    pub step_hz: u32,
    pub points: usize,
    pub blocks_per_file: usize,
    pub noise_floor_db: f32,
    pub noise_db: f32,
    /// Carrier as `(point index, level in dB)`.
    pub carrier: Option<(usize, f32)>,
    pub compression: CompressionType,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            start_frequency_hz: 88_000_000,
            step_hz: 100_000,
            points: 200,
            blocks_per_file: 4,
            noise_floor_db: -105.0,
            noise_db: 3.0,
            carrier: Some((120, -45.0)),
            compression: CompressionType::Byte,
            seed: 0,
        }
    }
}

impl GeneratorConfig {
    fn stop_frequency_hz(&self) -> u64 {
        let span = self.points.saturating_sub(1) as u64 * u64::from(self.step_hz);
        self.start_frequency_hz + span
    }
}

/// Deterministic scan-capture source; each call advances the random stream.
pub struct CaptureGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl CaptureGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn scan(&mut self, station_id: &str, timestamp: DateTime<Utc>) -> CaptureFile {
        let cfg = &self.config;
        let mut blocks = Vec::with_capacity(cfg.blocks_per_file);
        for block in 0..cfg.blocks_per_file {
            let readings = (0..cfg.points)
                .map(|point| {
                    let jitter = self.rng.gen_range(-cfg.noise_db..=cfg.noise_db);
                    let level = match cfg.carrier {
                        Some((index, db)) if index == point => db,
                        _ => cfg.noise_floor_db,
                    };
                    FixedShort::from_db(level + jitter)
                })
                .collect();
            blocks.push(SpectralDataBlock {
                timestamp: timestamp + chrono::Duration::seconds(block as i64),
                segments: vec![SpectralSegment {
                    start_frequency_hz: cfg.start_frequency_hz,
                    step_hz: cfg.step_hz,
                    readings,
                }],
            });
        }

        CaptureFile {
            config: ConfigBlock {
                station_id: station_id.to_string(),
                timestamp,
                config_modified: timestamp,
                hardware_info: "synthetic receiver".to_string(),
                sensors: vec![SensorDescription {
                    sensor_id: 1,
                    start_frequency_hz: cfg.start_frequency_hz,
                    stop_frequency_hz: cfg.stop_frequency_hz(),
                    step_hz: cfg.step_hz,
                }],
            },
            kind: FileKind::Scan,
            compression: cfg.compression,
            blocks,
            iq_band: None,
        }
    }

    pub fn scan_bytes(&mut self, station_id: &str, timestamp: DateTime<Utc>) -> anyhow::Result<Vec<u8>> {
        let capture = self.scan(station_id, timestamp);
        CaptureWriter::encode(&capture)
            .with_context(|| format!("encoding synthetic capture for {}", station_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use spectrumcore::capture::{CaptureDecoder, ScanDecoder};

    #[test]
    fn generator_is_repeatable_per_seed() {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let first = CaptureGenerator::new(GeneratorConfig::default()).scan_bytes("s", at).unwrap();
        let second = CaptureGenerator::new(GeneratorConfig::default()).scan_bytes("s", at).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn carrier_stands_out_of_the_noise() {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let config = GeneratorConfig {
            compression: CompressionType::None,
            ..GeneratorConfig::default()
        };
        let bytes = CaptureGenerator::new(config).scan_bytes("s", at).unwrap();
        let decoded = ScanDecoder.decode(&bytes).unwrap();

        assert_eq!(decoded.blocks.len(), 4);
        let readings = &decoded.blocks[0].segments[0].readings;
        assert!(readings[120].to_db() > -50.0);
        assert!(readings[0].to_db() < -100.0);
        assert_eq!(decoded.frequency_span().unwrap().stop_hz, 88_000_000 + 199 * 100_000);
    }
}
