use crate::error::Error;
use byteorder::{ByteOrder, LE};

/// Separates artifact metadata from the record stream.
pub const END_OF_METADATA: &[u8; 3] = b">>>";

/// Longest algorithm name accepted when decoding.
const MAX_NAME_LEN: usize = 256;

/// Why a decoder could not produce a value from the buffered bytes.
#[derive(Debug)]
pub(crate) enum Need {
    /// The value continues past the end of the buffer.
    More,
    /// The bytes are malformed.
    Fail(Error),
}

impl From<Error> for Need {
    fn from(e: Error) -> Self {
        Need::Fail(e)
    }
}

/// A decoded value and the number of bytes it occupied.
pub(crate) type Decoded<T> = Result<(T, usize), Need>;

/// Field reader over a partially filled buffer.
pub(crate) struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Fields { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], Need> {
        if self.buf.len() - self.pos < n {
            return Err(Need::More);
        }
        let b = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(b)
    }

    pub fn u8(&mut self) -> Result<u8, Need> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, Need> {
        Ok(LE::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, Need> {
        Ok(LE::read_u32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, Need> {
        Ok(LE::read_u64(self.bytes(8)?))
    }

    /// Little-endian integer of `width` bytes (at most 4).
    pub fn uint(&mut self, width: usize) -> Result<u32, Need> {
        Ok(LE::read_uint(self.bytes(width)?, width) as u32)
    }

    /// Expect a fixed marker.
    pub fn marker(&mut self, expected: &[u8], what: &str) -> Result<(), Need> {
        if self.bytes(expected.len())? != expected {
            return Err(Error::format(format!("missing {}", what)).into());
        }
        Ok(())
    }

    /// Name with a 7-bit variable-length length prefix.
    pub fn name(&mut self) -> Result<String, Need> {
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let b = self.u8()?;
            len |= ((b & 0x7f) as usize) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 28 {
                return Err(Error::format("malformed name length").into());
            }
        }
        if len > MAX_NAME_LEN {
            return Err(Error::format(format!("algorithm name of {} bytes", len)).into());
        }
        let bytes = self.bytes(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => Err(Error::format("algorithm name is not valid UTF-8").into()),
        }
    }
}

/// Appends a name with its 7-bit variable-length length prefix.
pub fn put_name(out: &mut Vec<u8>, name: &str) {
    let mut n = name.len();
    while n >= 0x80 {
        out.push((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
    out.push(n as u8);
    out.extend_from_slice(name.as_bytes());
}

#[inline]
pub fn put_u16(out: &mut Vec<u8>, x: u16) {
    let mut b = [0; 2];
    LE::write_u16(&mut b, x);
    out.extend_from_slice(&b[..]);
}

#[inline]
pub fn put_u32(out: &mut Vec<u8>, x: u32) {
    let mut b = [0; 4];
    LE::write_u32(&mut b, x);
    out.extend_from_slice(&b[..]);
}

#[inline]
pub fn put_u64(out: &mut Vec<u8>, x: u64) {
    let mut b = [0; 8];
    LE::write_u64(&mut b, x);
    out.extend_from_slice(&b[..]);
}

/// Little-endian integer of `width` bytes (at most 4).
#[inline]
pub fn put_uint(out: &mut Vec<u8>, x: u32, width: usize) {
    let mut b = [0; 4];
    LE::write_u32(&mut b, x);
    out.extend_from_slice(&b[..width]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_prefix() {
        let mut out = Vec::new();
        put_name(&mut out, "XXH64");
        assert_eq!(out, b"\x05XXH64");

        let long = "x".repeat(200);
        let mut out = Vec::new();
        put_name(&mut out, &long);
        assert_eq!(&out[..2], &[0xc8, 0x01]);

        let mut f = Fields::new(&out[..]);
        assert_eq!(f.name().unwrap(), long);
        assert_eq!(f.consumed(), out.len());
    }

    #[test]
    fn short_buffer_needs_more() {
        let mut f = Fields::new(b"\x05XX");
        assert!(matches!(f.name(), Err(Need::More)));
        let mut f = Fields::new(b"\x01\x02");
        assert!(matches!(f.u32(), Err(Need::More)));
    }

    #[test]
    fn oversized_name_fails() {
        let mut f = Fields::new(b"\xff\xff\xff\xff\xff\x01");
        assert!(matches!(f.name(), Err(Need::Fail(Error::Format(_)))));
        let mut f = Fields::new(b"\x81\x04");
        assert!(matches!(f.name(), Err(Need::Fail(Error::Format(_)))));
    }

    #[test]
    fn fixed_width_fields() {
        let mut out = Vec::new();
        put_u16(&mut out, 0x040d);
        put_uint(&mut out, 0x6cf4fc2f, 4);
        put_u64(&mut out, 7);
        assert_eq!(&out[..6], &[0x0d, 0x04, 0x2f, 0xfc, 0xf4, 0x6c]);

        let mut f = Fields::new(&out[..]);
        assert_eq!(f.u16().unwrap(), 0x040d);
        assert_eq!(f.uint(4).unwrap(), 0x6cf4fc2f);
        assert_eq!(f.u64().unwrap(), 7);
        assert!(matches!(f.u8(), Err(Need::More)));
    }

    #[test]
    fn marker_mismatch() {
        let mut f = Fields::new(b">>?");
        assert!(matches!(
            f.marker(END_OF_METADATA, "end of metadata"),
            Err(Need::Fail(Error::Format(_)))
        ));
    }
}
