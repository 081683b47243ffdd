#![forbid(unsafe_code)]
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::progress::*;
use crate::rolling::RollingChecksum;
use crate::signature::{ChunkSignature, SignatureEncoder, SignatureHeader};
use crate::stream::read_full;
use std::io::{Read, Write};
use tracing::debug;

#[cfg(feature = "async")]
use crate::stream::read_full_async;
#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Default chunk size of a signature.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Largest chunk size accepted.
pub const MAX_CHUNK_SIZE: usize = 31 * 1024;

/// Single-pass signature builder.
///
/// Sign a basis with 1 KiB chunks:
/// ```
/// use std::io;
/// use rsdelta::SignatureBuilder;
///
/// fn sign(basis: &[u8]) -> rsdelta::Result<Vec<u8>> {
///     let mut signature = Vec::new();
///     SignatureBuilder::new()
///         .chunk_size(1024)
///         .build(basis, io::Cursor::new(&mut signature))?;
///     Ok(signature)
/// }
/// ```
pub struct SignatureBuilder {
    header: SignatureHeader,
    chunk_size: usize,
    input_len: Option<u64>,
    progress: Option<Box<dyn ProgressReporter>>,
    cancel: Option<CancelToken>,
}

impl SignatureBuilder {
    pub fn new() -> Self {
        SignatureBuilder {
            header: SignatureHeader::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            input_len: None,
            progress: None,
            cancel: None,
        }
    }

    /// Set the chunk size (`1..=MAX_CHUNK_SIZE`, default is `DEFAULT_CHUNK_SIZE`).
    ///
    /// Out of range values are reported when building.
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n;
        self
    }

    /// Set the strong hash (default is XXH64).
    pub fn hash_algorithm(mut self, hash: &'static dyn HashAlgorithm) -> Self {
        self.header.hash = hash;
        self
    }

    /// Set the rolling checksum (default is Adler32).
    pub fn rolling_checksum(mut self, rolling: &'static dyn RollingChecksum) -> Self {
        self.header.rolling = rolling;
        self
    }

    /// Basis length, used to express progress as a percentage.
    pub fn input_len(mut self, n: u64) -> Self {
        self.input_len = Some(n);
        self
    }

    pub fn progress<P: ProgressReporter + 'static>(mut self, reporter: P) -> Self {
        self.progress = Some(Box::new(reporter));
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<SignJob<'_>> {
        self.validate()?;
        debug!(
            hash = self.header.hash.name(),
            rolling = self.header.rolling.name(),
            chunk_size = self.chunk_size,
            "building signature"
        );

        let mut out = Vec::with_capacity(64);
        let encoder = SignatureEncoder::new(self.header, &mut out);
        Ok(SignJob {
            encoder,
            tracker: ProgressTracker::new(
                ProgressOperation::BuildingSignature,
                self.input_len,
                self.progress.as_mut(),
            ),
            cancel: &self.cancel,
            chunk: vec![0; self.chunk_size],
            out,
            chunks: 0,
        })
    }

    /// Read the basis once and write its signature.
    ///
    /// The size of the signature would be returned if no error occurs.
    pub fn build<R: Read, W: Write>(&mut self, mut basis: R, mut signature: W) -> Result<u64> {
        let mut job = self.start()?;
        signature.write_all(job.pending())?;
        loop {
            let n = read_full(&mut basis, job.chunk_buf()?)?;
            let more = job.push(n)?;
            signature.write_all(job.pending())?;
            if !more {
                break;
            }
        }
        signature.flush()?;
        Ok(job.finish())
    }

    /// Async form of [`build`](Self::build), producing identical bytes.
    #[cfg(feature = "async")]
    pub async fn build_async<R, W>(&mut self, mut basis: R, mut signature: W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut job = self.start()?;
        signature.write_all(job.pending()).await?;
        loop {
            let n = read_full_async(&mut basis, job.chunk_buf()?).await?;
            let more = job.push(n)?;
            signature.write_all(job.pending()).await?;
            if !more {
                break;
            }
        }
        signature.flush().await?;
        Ok(job.finish())
    }
}

/// One signature build; both the blocking and async forms drive it.
struct SignJob<'a> {
    encoder: SignatureEncoder,
    tracker: ProgressTracker<'a>,
    cancel: &'a Option<CancelToken>,
    chunk: Vec<u8>,
    // encoded bytes not yet written
    out: Vec<u8>,
    chunks: u64,
}

impl SignJob<'_> {
    fn pending(&self) -> &[u8] {
        &self.out[..]
    }

    /// Buffer for the next basis chunk, once cancellation was checked.
    fn chunk_buf(&mut self) -> Result<&mut [u8]> {
        checkpoint(self.cancel)?;
        Ok(&mut self.chunk[..])
    }

    /// Encode the `n` bytes just read; false once the basis ended.
    fn push(&mut self, n: usize) -> Result<bool> {
        self.out.clear();
        if n == 0 {
            return Ok(false);
        }
        let header = *self.encoder.header();
        let chunk = ChunkSignature::compute(&header, &self.chunk[..n]);
        self.encoder.chunk(&chunk, &mut self.out)?;
        self.chunks += 1;
        self.tracker.advance(n as u64);
        Ok(n == self.chunk.len())
    }

    fn finish(mut self) -> u64 {
        self.tracker.finish();
        let written = self.encoder.written();
        debug!(chunks = self.chunks, bytes = written, "signature complete");
        written
    }
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Sha1Hash;
    use crate::rolling::Adler32V2;
    use crate::signature::read_signature;
    use std::io::Cursor;

    fn sign(basis: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        SignatureBuilder::new()
            .chunk_size(chunk_size)
            .build(basis, Cursor::new(&mut out))
            .unwrap();
        out
    }

    #[test]
    fn exact_multiple_has_no_tail() {
        let basis = vec![7u8; 4 * 64];
        let sig = read_signature(Cursor::new(sign(&basis[..], 64))).unwrap();
        assert_eq!(sig.chunks.len(), 4);
        assert!(sig.chunks.iter().all(|c| c.length == 64));
    }

    #[test]
    fn one_extra_byte_adds_tail_chunk() {
        let basis = vec![7u8; 4 * 64 + 1];
        let sig = read_signature(Cursor::new(sign(&basis[..], 64))).unwrap();
        assert_eq!(sig.chunks.len(), 5);
        assert_eq!(sig.chunks[4].length, 1);
    }

    #[test]
    fn empty_basis_has_no_chunks() {
        let sig = read_signature(Cursor::new(sign(b"", 64))).unwrap();
        assert!(sig.chunks.is_empty());
        assert_eq!(sig.chunk_size, 0);
    }

    #[test]
    fn returns_signature_size() {
        let mut out = Vec::new();
        let n = SignatureBuilder::new()
            .chunk_size(16)
            .hash_algorithm(&Sha1Hash)
            .rolling_checksum(&Adler32V2)
            .build(&[1u8; 40][..], Cursor::new(&mut out))
            .unwrap();
        assert_eq!(n, out.len() as u64);
        let sig = read_signature(Cursor::new(out)).unwrap();
        assert_eq!(sig.header.hash.name(), "SHA1");
        assert_eq!(sig.header.rolling.name(), "Adler32V2");
        assert_eq!(sig.chunks.len(), 3);
    }

    #[test]
    fn rejects_bad_chunk_size() {
        for &size in [0, MAX_CHUNK_SIZE + 1].iter() {
            let e = SignatureBuilder::new()
                .chunk_size(size)
                .build(&b"abc"[..], Vec::new())
                .unwrap_err();
            assert!(matches!(e, Error::Config(_)));
        }
    }

    #[test]
    fn cancelled_before_first_chunk() {
        let token = CancelToken::new();
        token.cancel();
        let e = SignatureBuilder::new()
            .cancel_token(token)
            .build(&b"abc"[..], Vec::new())
            .unwrap_err();
        assert!(matches!(e, Error::Cancelled));
    }
}
