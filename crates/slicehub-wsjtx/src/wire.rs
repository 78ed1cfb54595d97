//! Binary wire primitives for the decoder UDP protocol.
//!
//! All integers are big-endian. Strings are 32-bit length-prefixed; a
//! length of `0xFFFFFFFF` denotes a null string and `0` an empty one. The
//! protocol nominally specifies a 16-bit character encoding, but the actual
//! sender emits single-byte Latin-1, so that is what we read and write.
//!
//! Structured timestamps are 13 bytes: a 64-bit signed Julian day number, a
//! 32-bit milliseconds-of-day, and an 8-bit time-spec byte. Julian day 0 is
//! treated as null.

use chrono::{DateTime, Timelike, Utc};

use slicehub_core::{Error, Result};

/// Frame magic, first four bytes of every datagram.
pub const MAGIC: u32 = 0xADBC_CBDA;

/// Protocol schema version we speak.
pub const SCHEMA_VERSION: u32 = 2;

/// Length prefix marking a null string.
const NULL_LEN: u32 = 0xFFFF_FFFF;

/// Unix epoch (1970-01-01) as a Julian day number.
const JULIAN_UNIX_EPOCH: i64 = 2_440_588;

const MS_PER_DAY: i64 = 86_400_000;

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Cursor over a received datagram.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Protocol(format!(
                "frame truncated: wanted {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a length-prefixed Latin-1 string. `None` means null.
    pub fn read_string(&mut self) -> Result<Option<String>> {
        let len = self.read_u32()?;
        if len == NULL_LEN {
            return Ok(None);
        }
        let bytes = self.take(len as usize)?;
        Ok(Some(bytes.iter().map(|&b| b as char).collect()))
    }

    /// Read a string, mapping null to empty.
    pub fn read_string_or_empty(&mut self) -> Result<String> {
        Ok(self.read_string()?.unwrap_or_default())
    }

    /// Read a 13-byte structured timestamp. `None` for the null encoding.
    pub fn read_datetime(&mut self) -> Result<Option<DateTime<Utc>>> {
        let julian = self.read_i64()?;
        let ms_of_day = self.read_u32()?;
        let _spec = self.read_u8()?;
        if julian == 0 {
            return Ok(None);
        }
        let unix_ms = (julian - JULIAN_UNIX_EPOCH) * MS_PER_DAY + ms_of_day as i64;
        Ok(DateTime::<Utc>::from_timestamp_millis(unix_ms))
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Builds an outbound datagram.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Start a frame: magic, schema version, message type, and the
    /// identifier string.
    pub fn frame(msg_type: u32, id: &str) -> Self {
        let mut w = Writer {
            buf: Vec::with_capacity(64),
        };
        w.write_u32(MAGIC);
        w.write_u32(SCHEMA_VERSION);
        w.write_u32(msg_type);
        w.write_string(Some(id));
        w
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    /// Write a Latin-1 string; `None` writes the null marker. Characters
    /// outside Latin-1 degrade to `'?'`.
    pub fn write_string(&mut self, s: Option<&str>) {
        match s {
            None => self.write_u32(NULL_LEN),
            Some(s) => {
                let bytes: Vec<u8> = s
                    .chars()
                    .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
                    .collect();
                self.write_u32(bytes.len() as u32);
                self.buf.extend_from_slice(&bytes);
            }
        }
    }

    /// Write a 13-byte structured timestamp; `None` writes the null form.
    pub fn write_datetime(&mut self, t: Option<DateTime<Utc>>) {
        match t {
            None => {
                self.write_i64(0);
                self.write_u32(0);
                self.write_u8(0);
            }
            Some(t) => {
                let unix_ms = t.timestamp_millis();
                let days = unix_ms.div_euclid(MS_PER_DAY);
                let ms_of_day = unix_ms.rem_euclid(MS_PER_DAY);
                self.write_i64(days + JULIAN_UNIX_EPOCH);
                self.write_u32(ms_of_day as u32);
                self.write_u8(1); // UTC
            }
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Milliseconds since UTC midnight for a timestamp, as used by the
/// protocol's decode-time field.
pub fn ms_since_midnight(t: DateTime<Utc>) -> u32 {
    t.time().num_seconds_from_midnight() * 1000 + t.timestamp_subsec_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn integers_round_trip() {
        let mut w = Writer::default();
        w.write_u32(0xDEAD_BEEF);
        w.write_i32(-42);
        w.write_u64(14_074_000);
        w.write_f64(-0.3);
        let buf = w.finish();

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_i32().unwrap(), -42);
        assert_eq!(r.read_u64().unwrap(), 14_074_000);
        assert_eq!(r.read_f64().unwrap(), -0.3);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn integers_are_big_endian() {
        let mut w = Writer::default();
        w.write_u32(1);
        assert_eq!(w.finish(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn strings_round_trip() {
        let mut w = Writer::default();
        w.write_string(Some("CQ DL9XYZ JO31"));
        w.write_string(Some(""));
        w.write_string(None);
        let buf = w.finish();

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_string().unwrap().as_deref(), Some("CQ DL9XYZ JO31"));
        assert_eq!(r.read_string().unwrap().as_deref(), Some(""));
        assert_eq!(r.read_string().unwrap(), None);
    }

    #[test]
    fn latin1_high_bytes_round_trip() {
        // 0xDC is 'Ü' in Latin-1; it must survive a round trip as one byte.
        let mut w = Writer::default();
        w.write_string(Some("M\u{dc}NCHEN"));
        let buf = w.finish();
        assert_eq!(buf[4..], [b'M', 0xDC, b'N', b'C', b'H', b'E', b'N']);

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_string().unwrap().as_deref(), Some("M\u{dc}NCHEN"));
    }

    #[test]
    fn non_latin1_degrades() {
        let mut w = Writer::default();
        w.write_string(Some("\u{4eba}"));
        let buf = w.finish();
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_string().unwrap().as_deref(), Some("?"));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut w = Writer::default();
        w.write_u32(10); // claims 10 bytes of string data
        let buf = w.finish();
        let mut r = Reader::new(&buf);
        assert!(r.read_string().is_err());
    }

    #[test]
    fn datetime_round_trips_to_millisecond() {
        let t = Utc.with_ymd_and_hms(2025, 6, 15, 13, 45, 30).unwrap()
            + chrono::Duration::milliseconds(250);
        let mut w = Writer::default();
        w.write_datetime(Some(t));
        let buf = w.finish();
        assert_eq!(buf.len(), 13);

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_datetime().unwrap(), Some(t));
    }

    #[test]
    fn null_datetime() {
        let mut w = Writer::default();
        w.write_datetime(None);
        let buf = w.finish();
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_datetime().unwrap(), None);
    }

    #[test]
    fn known_julian_day() {
        // 2451545 is 2000-01-01 (the J2000 epoch day).
        let mut w = Writer::default();
        w.write_i64(2_451_545);
        w.write_u32(0);
        w.write_u8(1);
        let buf = w.finish();
        let mut r = Reader::new(&buf);
        let t = r.read_datetime().unwrap().unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn ms_since_midnight_extraction() {
        let t = Utc.with_ymd_and_hms(2025, 6, 15, 1, 2, 3).unwrap()
            + chrono::Duration::milliseconds(400);
        assert_eq!(ms_since_midnight(t), ((3600 + 120 + 3) * 1000 + 400) as u32);
    }
}
