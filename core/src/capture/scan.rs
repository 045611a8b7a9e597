use super::format::{check_frequency, read_config, read_header, ByteReader};
use super::{CaptureDecoder, CaptureFile, DecodeError, FileKind, SpectralDataBlock, SpectralSegment};

/// Decoder for swept-spectrum scan files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanDecoder;

impl CaptureDecoder for ScanDecoder {
    fn kind(&self) -> FileKind {
        FileKind::Scan
    }

    fn decode(&self, bytes: &[u8]) -> Result<CaptureFile, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let header = read_header(&mut reader)?;
        if header.kind != FileKind::Scan {
            return Err(DecodeError::KindMismatch {
                expected: FileKind::Scan,
                found: header.kind,
            });
        }
        let config = read_config(&mut reader)?;

        let block_count = reader.u32("block_count")?;
        let mut blocks = Vec::new();
        for _ in 0..block_count {
            let timestamp = reader.timestamp("block_timestamp")?;
            let segment_count = reader.u16("segment_count")?;
            let mut segments = Vec::with_capacity(usize::from(segment_count));
            for _ in 0..segment_count {
                let start_frequency_hz = reader.u64("segment_start_hz")?;
                let step_hz = reader.u32("segment_step_hz")?;
                let count = reader.u32("segment_len")? as usize;
                if step_hz == 0 && count > 1 {
                    return Err(DecodeError::Malformed(format!(
                        "segment at {} Hz has {} readings and no step",
                        start_frequency_hz, count
                    )));
                }
                check_frequency("segment start", start_frequency_hz)?;
                let readings = reader.readings(count, header.compression)?;
                let segment = SpectralSegment {
                    start_frequency_hz,
                    step_hz,
                    readings,
                };
                if let Some(last) = segment.readings.len().checked_sub(1) {
                    let stop = segment.stop_frequency_hz().ok_or_else(|| {
                        DecodeError::Malformed(format!(
                            "segment at {} Hz overflows at reading {}",
                            start_frequency_hz, last
                        ))
                    })?;
                    check_frequency("segment stop", stop)?;
                }
                segments.push(segment);
            }
            blocks.push(SpectralDataBlock { timestamp, segments });
        }
        reader.finish()?;

        Ok(CaptureFile {
            config,
            kind: FileKind::Scan,
            compression: header.compression,
            blocks,
            iq_band: None,
        })
    }
}
