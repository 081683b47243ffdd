#![forbid(unsafe_code)]
use crate::delta::{DeltaHeader, DeltaOperation, DeltaReader, Fingerprint};
use crate::error::{hex, Error, Result};
use crate::hash::{HashAlgorithm, HashState};
use crate::progress::*;
use crate::stream::{read_full, READ_SIZE};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::mem;
use tracing::{debug, warn};

#[cfg(feature = "async")]
use crate::delta::AsyncDeltaReader;
#[cfg(feature = "async")]
use crate::stream::read_full_async;
#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Sans-IO basis fingerprinting: hashes fixed-size chunks of whatever is
/// fed in, then hashes the chunk digests.
pub(crate) struct BasisFingerprint {
    hash: &'static dyn HashAlgorithm,
    chunk_size: usize,
    chunk: Box<dyn HashState>,
    filled: usize,
    digests: Fingerprint,
}

impl BasisFingerprint {
    /// A chunk size of 0 hashes the whole basis as a single chunk.
    pub fn new(hash: &'static dyn HashAlgorithm, chunk_size: usize) -> Self {
        BasisFingerprint {
            hash,
            chunk_size,
            chunk: hash.start(),
            filled: 0,
            digests: Fingerprint::new(hash),
        }
    }

    pub fn feed(&mut self, mut data: &[u8]) {
        if self.chunk_size == 0 {
            self.chunk.update(data);
            self.filled += data.len();
            return;
        }
        while !data.is_empty() {
            let n = Ord::min(self.chunk_size - self.filled, data.len());
            self.chunk.update(&data[..n]);
            self.filled += n;
            data = &data[n..];
            if self.filled == self.chunk_size {
                self.end_chunk();
            }
        }
    }

    fn end_chunk(&mut self) {
        let chunk = mem::replace(&mut self.chunk, self.hash.start());
        self.digests.push_digest(&chunk.finish()[..]);
        self.filled = 0;
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.end_chunk();
        }
        self.digests.finish()
    }
}

/// Reconstructs a target from its basis and a delta.
///
/// Apply a delta, rejecting it if the basis is not the one it was built
/// against:
/// ```
/// use std::io;
/// use rsdelta::DeltaApplier;
///
/// fn patch(basis: &[u8], delta: &[u8]) -> rsdelta::Result<Vec<u8>> {
///     let mut target = Vec::new();
///     DeltaApplier::new().apply(io::Cursor::new(basis), delta, &mut target)?;
///     Ok(target)
/// }
/// ```
///
/// Output is written incrementally; on error the target holds a partial,
/// invalid result.
pub struct DeltaApplier {
    skip_verification: bool,
    input_len: Option<u64>,
    progress: Option<Box<dyn ProgressReporter>>,
    cancel: Option<CancelToken>,
}

impl DeltaApplier {
    pub fn new() -> Self {
        DeltaApplier {
            skip_verification: false,
            input_len: None,
            progress: None,
            cancel: None,
        }
    }

    /// Apply without checking the basis fingerprint (default is false).
    ///
    /// A delta applied to the wrong basis silently produces a wrong target.
    pub fn skip_verification(mut self, skip: bool) -> Self {
        self.skip_verification = skip;
        self
    }

    /// Delta artifact length, used to express progress as a percentage.
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

    /// Whether the basis has to be fingerprinted before applying.
    fn wants_check(&self, header: &DeltaHeader) -> bool {
        match (&header.basis_check, self.skip_verification) {
            (Some(_), false) => true,
            (Some(_), true) => {
                warn!("skipping basis file verification");
                false
            }
            (None, _) => {
                debug!("delta carries no basis fingerprint");
                false
            }
        }
    }

    fn start(&mut self, header: &DeltaHeader, basis_len: u64) -> ApplyJob<'_> {
        debug!(hash = header.hash.name(), basis_len, "applying delta");
        let check = match &header.basis_check {
            Some(check) if self.wants_check(header) => Some((
                BasisFingerprint::new(header.hash, check.chunk_size as usize),
                check.digest.clone(),
            )),
            _ => None,
        };
        ApplyJob {
            buf: if check.is_some() {
                vec![0; READ_SIZE]
            } else {
                Vec::new()
            },
            check,
            basis_len,
            tracker: ProgressTracker::new(
                ProgressOperation::ApplyingDelta,
                self.input_len,
                self.progress.as_mut(),
            ),
            cancel: &self.cancel,
            written: 0,
            ops: 0,
        }
    }

    /// Replay the delta against the basis, writing the target.
    ///
    /// The size of the target would be returned if no error occurs.
    pub fn apply<B, D, W>(&mut self, mut basis: B, delta: D, mut target: W) -> Result<u64>
    where
        B: Read + Seek,
        D: Read,
        W: Write,
    {
        let mut reader = DeltaReader::new(delta)?;
        let basis_len = basis.seek(SeekFrom::End(0))?;
        let mut job = self.start(reader.header(), basis_len);

        if job.verifying() {
            basis.seek(SeekFrom::Start(0))?;
            loop {
                let n = read_full(&mut basis, job.check_buf()?)?;
                if !job.check(n)? {
                    break;
                }
            }
        }

        loop {
            checkpoint(job.cancel)?;
            let op = match reader.next_operation()? {
                Some(op) => job.admit(op)?,
                None => break,
            };
            match op {
                DeltaOperation::Copy { offset, length } => {
                    basis.seek(SeekFrom::Start(offset))?;
                    let n = io::copy(&mut (&mut basis).take(length), &mut target)?;
                    check_copied(n, length)?;
                }
                DeltaOperation::Data(bytes) => target.write_all(&bytes[..])?,
            }
            job.applied(reader.consumed());
        }
        target.flush()?;
        Ok(job.finish(reader.consumed()))
    }

    /// Async form of [`apply`](Self::apply), producing identical bytes.
    #[cfg(feature = "async")]
    pub async fn apply_async<B, D, W>(&mut self, mut basis: B, delta: D, mut target: W) -> Result<u64>
    where
        B: AsyncRead + AsyncSeek + Unpin,
        D: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = AsyncDeltaReader::new(delta).await?;
        let basis_len = basis.seek(SeekFrom::End(0)).await?;
        let mut job = self.start(reader.header(), basis_len);

        if job.verifying() {
            basis.seek(SeekFrom::Start(0)).await?;
            loop {
                let n = read_full_async(&mut basis, job.check_buf()?).await?;
                if !job.check(n)? {
                    break;
                }
            }
        }

        loop {
            checkpoint(job.cancel)?;
            let op = match reader.next_operation().await? {
                Some(op) => job.admit(op)?,
                None => break,
            };
            match op {
                DeltaOperation::Copy { offset, length } => {
                    basis.seek(SeekFrom::Start(offset)).await?;
                    let n = tokio::io::copy(&mut (&mut basis).take(length), &mut target).await?;
                    check_copied(n, length)?;
                }
                DeltaOperation::Data(bytes) => target.write_all(&bytes[..]).await?,
            }
            job.applied(reader.consumed());
        }
        target.flush().await?;
        Ok(job.finish(reader.consumed()))
    }
}

/// One delta application; both the blocking and async forms drive it.
struct ApplyJob<'a> {
    // basis fingerprint in progress and the digest it must match
    check: Option<(BasisFingerprint, Vec<u8>)>,
    buf: Vec<u8>,
    basis_len: u64,
    tracker: ProgressTracker<'a>,
    cancel: &'a Option<CancelToken>,
    written: u64,
    ops: u64,
}

impl ApplyJob<'_> {
    fn verifying(&self) -> bool {
        self.check.is_some()
    }

    /// Buffer for the next basis bytes to fingerprint.
    fn check_buf(&mut self) -> Result<&mut [u8]> {
        checkpoint(self.cancel)?;
        Ok(&mut self.buf[..])
    }

    /// Fingerprint the `n` bytes just read; at the end of the basis, verify
    /// and return false.
    fn check(&mut self, n: usize) -> Result<bool> {
        match self.check.as_mut() {
            Some((fingerprint, _)) if n > 0 => {
                fingerprint.feed(&self.buf[..n]);
                Ok(true)
            }
            _ => {
                if let Some((fingerprint, expected)) = self.check.take() {
                    verify(&expected[..], fingerprint.finish())?;
                }
                Ok(false)
            }
        }
    }

    /// Account for an operation about to be replayed.
    fn admit(&mut self, op: DeltaOperation) -> Result<DeltaOperation> {
        if let DeltaOperation::Copy { offset, length } = op {
            check_range(offset, length, self.basis_len)?;
        }
        self.written += op.output_len();
        Ok(op)
    }

    fn applied(&mut self, consumed: u64) {
        self.ops += 1;
        self.tracker.set(consumed);
    }

    fn finish(mut self, consumed: u64) -> u64 {
        self.tracker.set(consumed);
        self.tracker.finish();
        debug!(operations = self.ops, bytes = self.written, "delta applied");
        self.written
    }
}

impl Default for DeltaApplier {
    fn default() -> Self {
        Self::new()
    }
}

fn verify(expected: &[u8], actual: Vec<u8>) -> Result<()> {
    if expected != &actual[..] {
        return Err(Error::Verification {
            expected: hex(expected),
            actual: hex(&actual[..]),
        });
    }
    debug!("basis file verified");
    Ok(())
}

fn check_range(offset: u64, length: u64, basis_len: u64) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= basis_len => Ok(()),
        _ => Err(Error::Range {
            offset,
            length,
            basis_len,
        }),
    }
}

/// The basis shrank while being read.
fn check_copied(copied: u64, length: u64) -> Result<()> {
    if copied < length {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "basis file ended during copy").into());
    }
    Ok(())
}
