/*!
Input buffering shared by the blocking and async forms.

Decoders only ever look at buffered bytes; the two forms differ in how the
buffer gets refilled.
*/

use crate::error::{Error, Result};
use crate::utils::{Decoded, Need};
use std::io::{self, ErrorKind, Read};

#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncReadExt};

/// Bytes requested from the underlying reader per refill.
pub const READ_SIZE: usize = 16384;

/// Bytes pulled from a stream but not yet consumed.
pub(crate) struct InputBuffer {
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    consumed: u64,
}

impl InputBuffer {
    pub fn new() -> Self {
        InputBuffer {
            buf: Vec::with_capacity(READ_SIZE),
            pos: 0,
            eof: false,
            consumed: 0,
        }
    }

    pub fn available(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub fn consume(&mut self, n: usize) {
        let n = Ord::min(n, self.buf.len() - self.pos);
        self.pos += n;
        self.consumed += n as u64;
    }

    /// Total bytes consumed since creation.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Take up to `max` buffered bytes.
    pub fn take(&mut self, max: usize) -> &[u8] {
        let start = self.pos;
        let n = Ord::min(max, self.buf.len() - start);
        self.pos += n;
        self.consumed += n as u64;
        &self.buf[start..start + n]
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Drop consumed bytes and grow the tail; returns where new bytes go.
    fn reserve(&mut self) -> usize {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let filled = self.buf.len();
        self.buf.resize(filled + READ_SIZE, 0);
        filled
    }

    fn commit(&mut self, filled: usize, n: usize) {
        self.buf.truncate(filled + n);
        if n == 0 {
            self.eof = true;
        }
    }

    /// Read once more from `r`; zero means end of stream.
    pub fn fill<R: Read>(&mut self, r: &mut R) -> io::Result<usize> {
        let filled = self.reserve();
        let n = loop {
            match r.read(&mut self.buf[filled..]) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.truncate(filled);
                    return Err(e);
                }
            }
        };
        self.commit(filled, n);
        Ok(n)
    }

    #[cfg(feature = "async")]
    pub async fn fill_async<R: AsyncRead + Unpin>(&mut self, r: &mut R) -> io::Result<usize> {
        let filled = self.reserve();
        let n = match r.read(&mut self.buf[filled..]).await {
            Ok(n) => n,
            Err(e) => {
                self.buf.truncate(filled);
                return Err(e);
            }
        };
        self.commit(filled, n);
        Ok(n)
    }

    /// Try to decode one value from the buffered bytes.
    ///
    /// `Ok(None)` means more input is needed; `what` names the value in
    /// truncation errors once the stream has ended.
    fn poll_decode<T, D>(&mut self, decode: &mut D, what: &str) -> Result<Option<T>>
    where
        D: FnMut(&[u8]) -> Decoded<T>,
    {
        match decode(self.available()) {
            Ok((value, n)) => {
                self.consume(n);
                Ok(Some(value))
            }
            Err(Need::Fail(e)) => Err(e),
            Err(Need::More) if self.eof => Err(Error::truncated(what)),
            Err(Need::More) => Ok(None),
        }
    }

    /// Decode one value, refilling from `r` as needed.
    pub fn decode<R, T, D>(&mut self, r: &mut R, mut decode: D, what: &str) -> Result<T>
    where
        R: Read,
        D: FnMut(&[u8]) -> Decoded<T>,
    {
        loop {
            if let Some(value) = self.poll_decode(&mut decode, what)? {
                return Ok(value);
            }
            self.fill(r)?;
        }
    }

    #[cfg(feature = "async")]
    pub async fn decode_async<R, T, D>(&mut self, r: &mut R, mut decode: D, what: &str) -> Result<T>
    where
        R: AsyncRead + Unpin,
        D: FnMut(&[u8]) -> Decoded<T>,
    {
        loop {
            if let Some(value) = self.poll_decode(&mut decode, what)? {
                return Ok(value);
            }
            self.fill_async(r).await?;
        }
    }

    /// Whether the stream ended exactly here, refilling from `r` to find out.
    pub fn at_end<R: Read>(&mut self, r: &mut R) -> io::Result<bool> {
        while self.available().is_empty() {
            if self.eof || self.fill(r)? == 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[cfg(feature = "async")]
    pub async fn at_end_async<R: AsyncRead + Unpin>(&mut self, r: &mut R) -> io::Result<bool> {
        while self.available().is_empty() {
            if self.eof || self.fill_async(r).await? == 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
pub fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}

#[cfg(feature = "async")]
pub async fn read_full_async<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]).await? {
            0 => break,
            k => n += k,
        }
    }
    Ok(n)
}
