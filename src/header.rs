//! The FITS-like header store: an ordered sequence of fixed-width 80-byte
//! records kept as a flat, 2880-byte-aligned byte buffer (not a parsed map),
//! so that unknown keywords round-trip untouched.

use crate::error::{Error, Result};

pub const RECORD_LEN: usize = 80;
pub const BLOCK_LEN: usize = 2880;
pub const RECORDS_PER_BLOCK: usize = BLOCK_LEN / RECORD_LEN;

const KEY_LEN: usize = 8;
const VALUE_START: usize = 10;
const VALUE_LEN: usize = RECORD_LEN - VALUE_START;
const NUMERIC_WIDTH: usize = 20;
const BOOL_OFFSET: usize = NUMERIC_WIDTH - 1; // byte 29 (column 30), relative to VALUE_START

#[derive(Debug, Clone)]
pub struct Header {
    buf: Vec<u8>,
}

fn pad_key(key: &str) -> Result<[u8; KEY_LEN]> {
    let upper = key.to_ascii_uppercase();
    if upper.len() > KEY_LEN || !upper.is_ascii() {
        return Err(Error::user_input(format!("header keyword too long: {key}")));
    }
    let mut out = [b' '; KEY_LEN];
    out[..upper.len()].copy_from_slice(upper.as_bytes());
    Ok(out)
}

fn encode_int(value: i64) -> Result<[u8; NUMERIC_WIDTH]> {
    let s = format!("{value:>NUMERIC_WIDTH$}");
    if s.len() != NUMERIC_WIDTH {
        return Err(Error::user_input(format!("integer {value} does not fit header field")));
    }
    let mut out = [b' '; NUMERIC_WIDTH];
    out.copy_from_slice(s.as_bytes());
    Ok(out)
}

fn encode_flt(value: f64) -> Result<[u8; NUMERIC_WIDTH]> {
    if !value.is_finite() {
        return Err(Error::user_input("non-finite float cannot be stored in header"));
    }

    let sign = if value.is_sign_negative() && value != 0.0 { "-" } else { "" };
    let abs = value.abs();

    let (mantissa, exp) = if abs == 0.0 {
        (0.0f64, 0i32)
    } else {
        let mut exp = abs.log10().floor() as i32;
        let mut mant = abs / 10f64.powi(exp);
        if mant >= 10.0 {
            mant /= 10.0;
            exp += 1;
        }
        if mant < 1.0 {
            mant *= 10.0;
            exp -= 1;
        }
        (mant, exp)
    };

    let mut mant_str = format!("{mantissa:.11}");
    let mut exp = exp;
    if mant_str.starts_with("10.") {
        mant_str = format!("{:.11}", mantissa / 10.0);
        exp += 1;
    }

    let exp_sign = if exp < 0 { "-" } else { "+" };
    let body = format!("{sign}{mant_str}E{exp_sign}{:02}", exp.abs());

    let s = format!("{body:>NUMERIC_WIDTH$}");
    if s.len() != NUMERIC_WIDTH {
        return Err(Error::user_input(format!("float {value} does not fit header field")));
    }
    let mut out = [b' '; NUMERIC_WIDTH];
    out.copy_from_slice(s.as_bytes());
    Ok(out)
}

fn encode_str(content: &str) -> Result<[u8; VALUE_LEN]> {
    let escaped = content.replace('\'', "''");
    if escaped.len() > VALUE_LEN - 2 {
        return Err(Error::user_input("string value too long for header record"));
    }
    let body = format!("'{escaped}'");
    let s = format!("{body:<VALUE_LEN$}");
    let mut out = [b' '; VALUE_LEN];
    out.copy_from_slice(s.as_bytes());
    Ok(out)
}

fn decode_str(field: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(field).ok()?;
    let trimmed = text.trim_end();
    let rest = trimmed.strip_prefix('\'')?;
    // Find the closing quote, treating '' as an escaped literal quote.
    let bytes = rest.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                out.push('\'');
                i += 2;
                continue;
            }
            return Some(out);
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    None
}

impl Header {
    /// A minimal valid header: `SIMPLE`, `BITPIX`, `NAXIS`, one `NAXISn` per
    /// axis, terminated by `END`, padded to one 2880-byte block.
    pub fn new_minimal(bitpix: i64, axis_sizes: &[i64]) -> Result<Self> {
        let mut h = Header {
            buf: vec![b' '; BLOCK_LEN],
        };
        h.write_end_at(0)?;

        h.put_bool("SIMPLE", true)?;
        h.put_int("BITPIX", bitpix)?;
        h.put_int("NAXIS", axis_sizes.len() as i64)?;
        for (i, &size) in axis_sizes.iter().enumerate() {
            h.put_int(&format!("NAXIS{}", i + 1), size)?;
        }

        Ok(h)
    }

    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        if buf.is_empty() || buf.len() % BLOCK_LEN != 0 {
            return Err(Error::format("header size is not a multiple of 2880 bytes"));
        }
        let h = Header { buf };
        h.find_end_index()
            .ok_or_else(|| Error::format("header has no END record"))?;
        Ok(h)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn record(&self, idx: usize) -> &[u8] {
        &self.buf[idx * RECORD_LEN..(idx + 1) * RECORD_LEN]
    }

    fn record_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.buf[idx * RECORD_LEN..(idx + 1) * RECORD_LEN]
    }

    fn num_records(&self) -> usize {
        self.buf.len() / RECORD_LEN
    }

    fn find_end_index(&self) -> Option<usize> {
        (0..self.num_records()).find(|&i| &self.record(i)[..3] == b"END")
    }

    /// 1-based position of the first record matching `key`, or 0 if absent.
    pub fn check(&self, key: &str) -> usize {
        let Ok(padded) = pad_key(key) else {
            return 0;
        };
        for i in 0..self.num_records() {
            let rec = self.record(i);
            if &rec[..KEY_LEN] == &padded && (rec[8] == b' ' || rec[8] == b'=') {
                return i + 1;
            }
        }
        0
    }

    fn value_field(&self, line: usize) -> &[u8] {
        let rec = self.record(line - 1);
        &rec[VALUE_START..RECORD_LEN]
    }

    pub fn get_int(&self, key: &str) -> i64 {
        let line = self.check(key);
        if line == 0 {
            return 0;
        }
        let field = self.value_field(line);
        std::str::from_utf8(field)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }

    pub fn get_flt(&self, key: &str) -> f64 {
        let line = self.check(key);
        if line == 0 {
            return f64::NAN;
        }
        let field = self.value_field(line);
        std::str::from_utf8(field)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(f64::NAN)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        let line = self.check(key);
        if line == 0 {
            return false;
        }
        let field = self.value_field(line);
        field[BOOL_OFFSET] == b'T'
    }

    pub fn get_str(&self, key: &str) -> Result<String> {
        let line = self.check(key);
        if line == 0 {
            return Err(Error::key_missing(key));
        }
        decode_str(self.value_field(line)).ok_or_else(|| Error::format(format!("malformed string value for {key}")))
    }

    fn write_end_at(&mut self, idx: usize) -> Result<()> {
        let rec = self.record_mut(idx);
        rec.copy_from_slice(&[b' '; RECORD_LEN]);
        rec[..3].copy_from_slice(b"END");
        Ok(())
    }

    fn write_value_record(&mut self, idx: usize, key: &str, value_field: &[u8]) -> Result<()> {
        assert_eq!(value_field.len(), VALUE_LEN);
        let padded_key = pad_key(key)?;
        let rec = self.record_mut(idx);
        rec[..KEY_LEN].copy_from_slice(&padded_key);
        rec[KEY_LEN] = b'=';
        rec[KEY_LEN + 1] = b' ';
        rec[VALUE_START..].copy_from_slice(value_field);
        Ok(())
    }

    /// Ensures there is a free record slot immediately before `END`,
    /// growing the buffer by one 2880-byte block if `END` currently sits in
    /// the last slot of the buffer.
    fn ensure_room_before_end(&mut self) -> usize {
        let end_idx = self.find_end_index().expect("header always has END");
        if end_idx == self.num_records() - 1 {
            self.buf.extend(std::iter::repeat(b' ').take(BLOCK_LEN));
        }
        self.find_end_index().expect("header always has END")
    }

    fn put_value(&mut self, key: &str, value_field: &[u8]) -> Result<bool> {
        let line = self.check(key);
        if line != 0 {
            self.write_value_record(line - 1, key, value_field)?;
            return Ok(false);
        }

        let end_idx = self.ensure_room_before_end();
        self.write_value_record(end_idx, key, value_field)?;
        self.write_end_at(end_idx + 1)?;
        Ok(true)
    }

    pub fn put_int(&mut self, key: &str, value: i64) -> Result<bool> {
        let field = encode_int(value)?;
        let mut full = [b' '; VALUE_LEN];
        full[..NUMERIC_WIDTH].copy_from_slice(&field);
        self.put_value(key, &full)
    }

    pub fn put_flt(&mut self, key: &str, value: f64) -> Result<bool> {
        let field = encode_flt(value)?;
        let mut full = [b' '; VALUE_LEN];
        full[..NUMERIC_WIDTH].copy_from_slice(&field);
        self.put_value(key, &full)
    }

    pub fn put_bool(&mut self, key: &str, value: bool) -> Result<bool> {
        let mut full = [b' '; VALUE_LEN];
        full[BOOL_OFFSET] = if value { b'T' } else { b'F' };
        self.put_value(key, &full)
    }

    pub fn put_str(&mut self, key: &str, value: &str) -> Result<bool> {
        let field = encode_str(value)?;
        self.put_value(key, &field)
    }

    /// Removes every record matching `key`, shifting later records up and
    /// space-filling the vacated tail; shrinks the header by whole blocks
    /// when doing so leaves only blank records beyond `END`'s block.
    pub fn del(&mut self, key: &str) {
        loop {
            let line = self.check(key);
            if line == 0 {
                break;
            }
            let idx = line - 1;
            let n = self.num_records();
            for i in idx..n - 1 {
                let (left, right) = self.buf.split_at_mut((i + 1) * RECORD_LEN);
                let dst = &mut left[i * RECORD_LEN..(i + 1) * RECORD_LEN];
                let src = &right[..RECORD_LEN];
                dst.copy_from_slice(src);
            }
            self.record_mut(n - 1).copy_from_slice(&[b' '; RECORD_LEN]);
        }
        self.shrink_trailing_blank_blocks();
    }

    fn shrink_trailing_blank_blocks(&mut self) {
        let end_idx = match self.find_end_index() {
            Some(i) => i,
            None => return,
        };
        let end_block = end_idx / RECORDS_PER_BLOCK;
        let mut keep_blocks = self.buf.len() / BLOCK_LEN;

        while keep_blocks > end_block + 1 {
            let start = (keep_blocks - 1) * BLOCK_LEN;
            if self.buf[start..start + BLOCK_LEN].iter().all(|&b| b == b' ') {
                keep_blocks -= 1;
            } else {
                break;
            }
        }
        self.buf.truncate(keep_blocks * BLOCK_LEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_header_round_trips_basics() {
        let h = Header::new_minimal(-32, &[10, 10, 10]).unwrap();
        assert_eq!(h.get_int("BITPIX"), -32);
        assert_eq!(h.get_int("NAXIS"), 3);
        assert_eq!(h.get_int("NAXIS1"), 10);
        assert!(h.get_bool("SIMPLE"));
        assert_eq!(h.len() % BLOCK_LEN, 0);
    }

    #[test]
    fn put_then_get_all_types() {
        let mut h = Header::new_minimal(8, &[1]).unwrap();
        assert!(h.put_int("FOO", 42).unwrap());
        assert_eq!(h.get_int("FOO"), 42);

        assert!(h.put_flt("BAR", 3.5).unwrap());
        assert!((h.get_flt("BAR") - 3.5).abs() < 1e-9);

        assert!(h.put_bool("BAZ", true).unwrap());
        assert!(h.get_bool("BAZ"));

        assert!(h.put_str("QUX", "hello 'world'").unwrap());
        assert_eq!(h.get_str("QUX").unwrap(), "hello 'world'");
    }

    #[test]
    fn put_overwrites_in_place() {
        let mut h = Header::new_minimal(8, &[1]).unwrap();
        assert!(h.put_int("FOO", 1).unwrap());
        let len_before = h.len();
        assert!(!h.put_int("FOO", 2).unwrap());
        assert_eq!(h.get_int("FOO"), 2);
        assert_eq!(h.len(), len_before);
    }

    #[test]
    fn put_then_del_then_get_fails() {
        let mut h = Header::new_minimal(8, &[1]).unwrap();
        h.put_str("FOO", "bar").unwrap();
        h.del("FOO");
        assert!(matches!(h.get_str("FOO"), Err(Error::KeyMissing(_))));
        assert_eq!(h.get_int("FOO"), 0);
        assert!(h.get_flt("FOO").is_nan());
        assert!(!h.get_bool("FOO"));
    }

    #[test]
    fn put_grows_header_across_block_boundary() {
        let mut h = Header::new_minimal(8, &[1]).unwrap();
        let initial_blocks = h.len() / BLOCK_LEN;
        // Fill up the rest of the first block.
        for i in 0..40 {
            h.put_int(&format!("K{i}"), i as i64).unwrap();
        }
        assert!(h.len() / BLOCK_LEN > initial_blocks);
        assert_eq!(h.get_int("K39"), 39);
        assert_eq!(h.len() % BLOCK_LEN, 0);
    }

    #[test]
    fn del_shrinks_trailing_blank_blocks() {
        let mut h = Header::new_minimal(8, &[1]).unwrap();
        for i in 0..40 {
            h.put_int(&format!("K{i}"), i as i64).unwrap();
        }
        let grown_len = h.len();
        for i in 0..40 {
            h.del(&format!("K{i}"));
        }
        assert!(h.len() < grown_len);
        assert_eq!(h.len() % BLOCK_LEN, 0);
    }

    #[test]
    fn check_ignores_records_with_odd_byte8() {
        let mut h = Header::new_minimal(8, &[1]).unwrap();
        h.put_int("FOO", 1).unwrap();
        // Corrupt byte 8 (the '=' column) to something else.
        let line = h.check("FOO");
        h.record_mut(line - 1)[8] = b'X';
        assert_eq!(h.check("FOO"), 0);
    }
}
