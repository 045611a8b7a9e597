use super::format::{write_config, write_header, ByteWriter};
use super::iq::IqRecording;
use super::{CaptureFile, CompressionType, ConfigBlock, DecodeError, FileKind};

/// Encoder for the capture layout, used by the generator and the tests.
pub struct CaptureWriter;

impl CaptureWriter {
    /// Encode a scan capture; raw-IQ captures carry samples and go through
    /// [`CaptureWriter::encode_raw_iq`].
    pub fn encode(capture: &CaptureFile) -> Result<Vec<u8>, DecodeError> {
        if capture.kind != FileKind::Scan {
            return Err(DecodeError::Malformed(
                "decoded raw-IQ captures no longer hold their samples".into(),
            ));
        }
        let mut writer = ByteWriter::new();
        write_header(&mut writer, FileKind::Scan, capture.compression);
        write_config(&mut writer, &capture.config);

        let block_count = u32::try_from(capture.blocks.len())
            .map_err(|_| DecodeError::Malformed("too many blocks".into()))?;
        writer.u32(block_count);
        for block in &capture.blocks {
            let segment_count = u16::try_from(block.segments.len())
                .map_err(|_| DecodeError::Malformed("too many segments in one block".into()))?;
            writer.timestamp(block.timestamp).u16(segment_count);
            for segment in &block.segments {
                let len = u32::try_from(segment.readings.len())
                    .map_err(|_| DecodeError::Malformed("segment too long".into()))?;
                writer
                    .u64(segment.start_frequency_hz)
                    .u32(segment.step_hz)
                    .u32(len)
                    .readings(&segment.readings, capture.compression);
            }
        }
        Ok(writer.into_bytes())
    }

    pub fn encode_raw_iq(config: &ConfigBlock, recording: &IqRecording) -> Result<Vec<u8>, DecodeError> {
        let len = u32::try_from(recording.samples.len())
            .map_err(|_| DecodeError::Malformed("too many IQ samples".into()))?;
        let mut writer = ByteWriter::new();
        write_header(&mut writer, FileKind::RawIq, CompressionType::None);
        write_config(&mut writer, config);
        writer
            .u64(recording.center_frequency_hz)
            .u32(recording.sample_rate_hz)
            .u32(len);
        for &(i, q) in &recording.samples {
            writer.i16(i).i16(q);
        }
        Ok(writer.into_bytes())
    }
}
