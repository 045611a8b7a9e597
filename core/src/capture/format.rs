//! Little-endian capture layout.
//!
//! ```text
//! magic "RSCF" | u8 version | u8 kind | u8 compression | u8 reserved
//! str station_id | i64 timestamp_ms | i64 config_modified_ms | str hardware_info
//! u16 sensor_count { u16 id | u64 start_hz | u64 stop_hz | u32 step_hz }
//! scan:   u32 block_count { i64 timestamp_ms | u16 segments { u64 start_hz | u32 step_hz | u32 n | readings } }
//! raw iq: u64 center_hz | u32 sample_rate_hz | u32 n | n x (i16 I, i16 Q)
//! ```
//!
//! `str` is a `u16` byte length followed by UTF-8.

use chrono::{DateTime, TimeZone, Utc};

use super::{CompressionType, ConfigBlock, DecodeError, FileKind, SensorDescription};
use crate::math::FixedShort;

pub const MAGIC: [u8; 4] = *b"RSCF";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 8;
/// Highest frequency a capture may describe (3 THz).
pub const MAX_FREQUENCY_HZ: u64 = 3_000_000_000_000;

/// Reject `hz` above [`MAX_FREQUENCY_HZ`].
pub fn check_frequency(field: &str, hz: u64) -> Result<u64, DecodeError> {
    if hz > MAX_FREQUENCY_HZ {
        return Err(DecodeError::Malformed(format!(
            "{} of {} Hz is above the {} Hz ceiling",
            field, hz, MAX_FREQUENCY_HZ
        )));
    }
    Ok(hz)
}

/// Kind and packing read from the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: FileKind,
    pub compression: CompressionType,
}

/// Bounds-checked cursor over a capture buffer.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                offset: self.offset,
                field,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.array::<1>(field)?[0])
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array(field)?))
    }

    pub fn i16(&mut self, field: &'static str) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.array(field)?))
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array(field)?))
    }

    pub fn u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array(field)?))
    }

    pub fn i64(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.array(field)?))
    }

    pub fn str(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = usize::from(self.u16(field)?);
        let raw = self.take(len, field)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidText(field))
    }

    pub fn timestamp(&mut self, field: &'static str) -> Result<DateTime<Utc>, DecodeError> {
        let millis = self.i64(field)?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or(DecodeError::InvalidTimestamp(millis))
    }

    /// `count` readings packed according to `compression`.
    pub fn readings(
        &mut self,
        count: usize,
        compression: CompressionType,
    ) -> Result<Vec<FixedShort>, DecodeError> {
        match compression {
            CompressionType::None => {
                let raw = self.take(count.saturating_mul(2), "readings")?;
                Ok(raw
                    .chunks_exact(2)
                    .map(|pair| FixedShort::from_raw(i16::from_le_bytes([pair[0], pair[1]])))
                    .collect())
            }
            CompressionType::Byte => {
                let raw = self.take(count, "readings")?;
                Ok(raw.iter().map(|&b| FixedShort::from_byte(b)).collect())
            }
        }
    }

    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(DecodeError::TrailingBytes(extra)),
        }
    }
}

pub fn read_header(reader: &mut ByteReader<'_>) -> Result<Header, DecodeError> {
    let magic: [u8; 4] = reader.array("magic")?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let version = reader.u8("version")?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let kind = FileKind::from_tag(reader.u8("kind")?)?;
    let compression = CompressionType::from_tag(reader.u8("compression")?)?;
    reader.u8("reserved")?;
    Ok(Header { kind, compression })
}

pub fn read_config(reader: &mut ByteReader<'_>) -> Result<ConfigBlock, DecodeError> {
    let station_id = reader.str("station_id")?;
    if station_id.is_empty() {
        return Err(DecodeError::Malformed("empty station id".into()));
    }
    let timestamp = reader.timestamp("timestamp")?;
    let config_modified = reader.timestamp("config_modified")?;
    let hardware_info = reader.str("hardware_info")?;
    let sensor_count = reader.u16("sensor_count")?;
    let mut sensors = Vec::with_capacity(usize::from(sensor_count));
    for _ in 0..sensor_count {
        let sensor = SensorDescription {
            sensor_id: reader.u16("sensor_id")?,
            start_frequency_hz: reader.u64("sensor_start_hz")?,
            stop_frequency_hz: reader.u64("sensor_stop_hz")?,
            step_hz: reader.u32("sensor_step_hz")?,
        };
        check_frequency("sensor start", sensor.start_frequency_hz)?;
        check_frequency("sensor stop", sensor.stop_frequency_hz)?;
        if sensor.stop_frequency_hz < sensor.start_frequency_hz {
            return Err(DecodeError::Malformed(format!(
                "sensor {} stops below its start",
                sensor.sensor_id
            )));
        }
        sensors.push(sensor);
    }
    Ok(ConfigBlock {
        station_id,
        timestamp,
        config_modified,
        hardware_info,
        sensors,
    })
}

/// Append-only little-endian buffer mirroring [`ByteReader`].
#[derive(Debug, Default)]
pub struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Strings longer than `u16::MAX` bytes are cut at a char boundary.
    pub fn str(&mut self, value: &str) -> &mut Self {
        let mut end = value.len().min(usize::from(u16::MAX));
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.u16(end as u16);
        self.bytes.extend_from_slice(&value.as_bytes()[..end]);
        self
    }

    pub fn timestamp(&mut self, value: DateTime<Utc>) -> &mut Self {
        self.i64(value.timestamp_millis())
    }

    pub fn readings(&mut self, readings: &[FixedShort], compression: CompressionType) -> &mut Self {
        for reading in readings {
            match compression {
                CompressionType::None => self.i16(reading.raw()),
                CompressionType::Byte => self.u8(reading.to_byte()),
            };
        }
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn write_header(writer: &mut ByteWriter, kind: FileKind, compression: CompressionType) {
    writer.bytes.extend_from_slice(&MAGIC);
    writer
        .u8(FORMAT_VERSION)
        .u8(kind.tag())
        .u8(compression.tag())
        .u8(0);
}

pub fn write_config(writer: &mut ByteWriter, config: &ConfigBlock) {
    writer
        .str(&config.station_id)
        .timestamp(config.timestamp)
        .timestamp(config.config_modified)
        .str(&config.hardware_info)
        .u16(config.sensors.len() as u16);
    for sensor in config.sensors.iter().take(usize::from(u16::MAX)) {
        writer
            .u16(sensor.sensor_id)
            .u64(sensor.start_frequency_hz)
            .u64(sensor.stop_frequency_hz)
            .u32(sensor.step_hz);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_foreign_magic_and_versions() {
        let mut bad = ByteReader::new(b"XXXX\x01\x00\x00\x00");
        assert!(matches!(read_header(&mut bad), Err(DecodeError::BadMagic(_))));

        let mut future = ByteReader::new(b"RSCF\x09\x00\x00\x00");
        assert_eq!(read_header(&mut future), Err(DecodeError::UnsupportedVersion(9)));

        let mut kind = ByteReader::new(b"RSCF\x01\x07\x00\x00");
        assert_eq!(read_header(&mut kind), Err(DecodeError::UnknownKind(7)));
    }

    #[test]
    fn short_reads_report_offset_and_field() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert_eq!(reader.u16("first").unwrap(), 0x0201);
        assert_eq!(
            reader.u32("second"),
            Err(DecodeError::Truncated {
                offset: 2,
                field: "second"
            })
        );
    }

    #[test]
    fn strings_and_readings_read_back() {
        let mut writer = ByteWriter::new();
        writer.str("stn-ä").readings(
            &[FixedShort::from_db(-80.5), FixedShort::NAN],
            CompressionType::Byte,
        );
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.str("name").unwrap(), "stn-ä");
        let readings = reader.readings(2, CompressionType::Byte).unwrap();
        assert_eq!(readings[0].to_db(), -80.5);
        assert!(readings[1].is_nan());
        assert!(reader.finish().is_ok());
    }
}
