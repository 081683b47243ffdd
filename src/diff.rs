#![forbid(unsafe_code)]
use crate::delta::{put_copy, put_data, put_end, BasisCheck, DeltaHeader, Fingerprint};
use crate::error::Result;
use crate::hash::HashAlgorithm;
use crate::progress::*;
use crate::rolling::RollingChecksum;
use crate::signature::{ChunkSignature, SignatureHeader, SignatureReader};
use crate::stream::read_full;
use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use tracing::{debug, trace};

#[cfg(feature = "async")]
use crate::signature::AsyncSignatureReader;
#[cfg(feature = "async")]
use crate::stream::read_full_async;
#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Default buffer size for reading the target.
pub const BUFFER_SIZE: usize = 16384;

/// Longest literal run held back before it is written as a data operation.
pub const MAX_LITERAL: usize = 1 << 20;

/// Basis chunk as seen by the matcher.
#[derive(Debug, Clone)]
struct IndexedChunk {
    offset: u64,
    length: usize,
    hash: Vec<u8>,
}

/// Signature chunks bucketed by rolling checksum.
///
/// Buckets keep basis order, so the earliest matching chunk wins.
pub struct ChunkIndex {
    hash: &'static dyn HashAlgorithm,
    rolling: &'static dyn RollingChecksum,
    chunk_size: usize,
    chunks: Vec<IndexedChunk>,
    buckets: FxHashMap<u32, Vec<u32>>,
    tail_len: usize,
    basis_len: u64,
}

impl ChunkIndex {
    pub fn new(header: SignatureHeader, chunk_size: usize) -> Self {
        ChunkIndex {
            hash: header.hash,
            rolling: header.rolling,
            chunk_size,
            chunks: Vec::new(),
            buckets: FxHashMap::default(),
            tail_len: 0,
            basis_len: 0,
        }
    }

    /// Append the next chunk in basis order.
    pub fn insert(&mut self, chunk: ChunkSignature) {
        let id = self.chunks.len() as u32;
        if chunk.length < self.chunk_size {
            self.tail_len = chunk.length;
        }
        self.buckets
            .entry(chunk.rolling_checksum)
            .or_insert_with(Vec::new)
            .push(id);
        self.chunks.push(IndexedChunk {
            offset: self.basis_len,
            length: chunk.length,
            hash: chunk.hash,
        });
        self.basis_len += chunk.length as u64;
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Length of the basis the signature describes.
    pub fn basis_len(&self) -> u64 {
        self.basis_len
    }

    /// Find a chunk with the same length, rolling checksum and strong hash
    /// as `window`.
    ///
    /// The strong hash of `window` is computed at most once, and only when a
    /// candidate exists.
    fn find(&self, window: &[u8], checksum: u32) -> Option<&IndexedChunk> {
        let candidates = self.buckets.get(&checksum)?;
        let mut digest = None;
        for &id in candidates.iter() {
            let chunk = &self.chunks[id as usize];
            if chunk.length != window.len() {
                continue;
            }
            let digest = digest.get_or_insert_with(|| self.hash.compute(window));
            if *digest == chunk.hash {
                return Some(chunk);
            }
        }
        None
    }
}

/// Counters reported once a delta is complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub copy_ops: u64,
    pub copied_bytes: u64,
    pub data_ops: u64,
    pub literal_bytes: u64,
}

/// Sans-IO delta scanner.
///
/// Target bytes are pushed in with [`feed`](Self::feed); encoded delta
/// operations are appended to the caller's buffer as soon as they are
/// settled. A window of one chunk slides over the target; on a verified
/// match it jumps by the whole chunk, otherwise it rotates by one byte and
/// the leading byte becomes literal.
pub struct Matcher {
    index: ChunkIndex,
    buf: Vec<u8>,
    // window start
    pos: usize,
    // start of the pending literal run, always <= pos
    literal: usize,
    // rolling checksum of the window at `pos`, and whether it was probed
    sum: Option<u32>,
    probed: bool,
    // contiguous copies are merged before being written
    copy: Option<(u64, u64)>,
    stats: MatchStats,
}

impl Matcher {
    pub fn new(index: ChunkIndex) -> Self {
        Matcher {
            index,
            buf: Vec::new(),
            pos: 0,
            literal: 0,
            sum: None,
            probed: false,
            copy: None,
            stats: MatchStats::default(),
        }
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn stats(&self) -> MatchStats {
        self.stats
    }

    /// Scan more target bytes.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<u8>) {
        self.buf.extend_from_slice(data);
        if self.index.chunk_size == 0 {
            self.pos = self.buf.len();
            self.flush_full_literals(out);
        } else {
            self.scan(out);
        }
        self.compact();
    }

    /// Settle the remaining bytes once the target ended.
    ///
    /// Bytes left after the last full window can only match the tail chunk
    /// of the basis; everything else becomes literal.
    pub fn finish(mut self, out: &mut Vec<u8>) -> MatchStats {
        let end = self.buf.len();
        let tail = self.index.tail_len;
        if tail > 0 && end - self.pos >= tail {
            let start = end - tail;
            let window = &self.buf[start..];
            let checksum = self.index.rolling.compute(window);
            if let Some(chunk) = self.index.find(window, checksum) {
                let (offset, length) = (chunk.offset, chunk.length as u64);
                self.pos = start;
                self.flush_full_literals(out);
                self.flush_literal(out);
                self.push_copy(offset, length, out);
                self.pos = end;
                self.literal = end;
            }
        }
        self.pos = end;
        self.flush_full_literals(out);
        self.flush_literal(out);
        self.flush_copy(out);
        self.stats
    }

    fn scan(&mut self, out: &mut Vec<u8>) {
        let n = self.index.chunk_size;
        while self.pos + n <= self.buf.len() {
            let sum = match self.sum {
                Some(sum) => sum,
                None => {
                    let sum = self.index.rolling.compute(&self.buf[self.pos..self.pos + n]);
                    self.sum = Some(sum);
                    self.probed = false;
                    sum
                }
            };

            if !self.probed {
                let window = &self.buf[self.pos..self.pos + n];
                if let Some(chunk) = self.index.find(window, sum) {
                    let (offset, length) = (chunk.offset, chunk.length as u64);
                    trace!(target_offset = self.pos, offset, length, "chunk matched");
                    self.flush_literal(out);
                    self.push_copy(offset, length, out);
                    self.pos += n;
                    self.literal = self.pos;
                    self.sum = None;
                    continue;
                }
                self.probed = true;
            }

            if self.pos + n == self.buf.len() {
                break;
            }
            let outgoing = self.buf[self.pos];
            let incoming = self.buf[self.pos + n];
            self.sum = Some(self.index.rolling.rotate(sum, outgoing, incoming, n));
            self.probed = false;
            self.pos += 1;
            if self.pos - self.literal >= MAX_LITERAL {
                self.flush_literal(out);
            }
        }
    }

    /// Write literal runs that reached `MAX_LITERAL`.
    fn flush_full_literals(&mut self, out: &mut Vec<u8>) {
        while self.pos - self.literal >= MAX_LITERAL {
            self.flush_copy(out);
            let end = self.literal + MAX_LITERAL;
            self.emit_data(end, out);
        }
    }

    /// Write the pending literal run `literal..pos`, if any.
    fn flush_literal(&mut self, out: &mut Vec<u8>) {
        if self.pos > self.literal {
            self.flush_copy(out);
            self.emit_data(self.pos, out);
        }
    }

    fn emit_data(&mut self, end: usize, out: &mut Vec<u8>) {
        let bytes = &self.buf[self.literal..end];
        trace!(length = bytes.len(), "literal run");
        put_data(out, bytes);
        self.stats.data_ops += 1;
        self.stats.literal_bytes += bytes.len() as u64;
        self.literal = end;
    }

    fn push_copy(&mut self, offset: u64, length: u64, out: &mut Vec<u8>) {
        if let Some((start, len)) = self.copy.as_mut() {
            if *start + *len == offset {
                *len += length;
                return;
            }
        }
        self.flush_copy(out);
        self.copy = Some((offset, length));
    }

    fn flush_copy(&mut self, out: &mut Vec<u8>) {
        if let Some((offset, length)) = self.copy.take() {
            put_copy(out, offset, length);
            self.stats.copy_ops += 1;
            self.stats.copied_bytes += length;
        }
    }

    /// Drop settled bytes once they make up half of the buffer.
    fn compact(&mut self) {
        if self.literal > 0 && self.literal * 2 >= self.buf.len() {
            self.buf.drain(..self.literal);
            self.pos -= self.literal;
            self.literal = 0;
        }
    }
}

/// Single-pass delta builder.
///
/// Builds the chunk index from a signature, then scans the target once.
///
/// ```
/// use std::io;
/// use rsdelta::{DeltaBuilder, SignatureBuilder};
///
/// fn diff(basis: &[u8], target: &[u8]) -> rsdelta::Result<Vec<u8>> {
///     let mut signature = Vec::new();
///     SignatureBuilder::new().build(basis, io::Cursor::new(&mut signature))?;
///
///     let mut delta = Vec::new();
///     DeltaBuilder::new().build(target, &signature[..], io::Cursor::new(&mut delta))?;
///     Ok(delta)
/// }
/// ```
pub struct DeltaBuilder {
    basis_check: bool,
    bsize: usize,
    input_len: Option<u64>,
    progress: Option<Box<dyn ProgressReporter>>,
    cancel: Option<CancelToken>,
}

impl DeltaBuilder {
    pub fn new() -> Self {
        DeltaBuilder {
            basis_check: true,
            bsize: BUFFER_SIZE,
            input_len: None,
            progress: None,
            cancel: None,
        }
    }

    /// Record the basis fingerprint in the delta (default is true).
    pub fn basis_check(mut self, enabled: bool) -> Self {
        self.basis_check = enabled;
        self
    }

    /// Set the buffer size for reading the target (`bs >= 128`, default is `BUFFER_SIZE`).
    pub fn buffer_size(mut self, mut bs: usize) -> Self {
        if bs < 128 {
            bs = 128;
        }
        self.bsize = bs;
        self
    }

    /// Target length, used to express progress as a percentage.
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

    /// Settle the header once every signature chunk has been indexed.
    fn start(&mut self, indexer: Indexer) -> DeltaJob<'_> {
        let Indexer { index, fingerprint } = indexer;
        debug!(
            hash = index.hash.name(),
            rolling = index.rolling.name(),
            chunk_size = index.chunk_size,
            chunks = index.len(),
            "building delta"
        );

        let basis_check = if self.basis_check {
            Some(BasisCheck {
                chunk_size: index.chunk_size as u32,
                digest: fingerprint.finish(),
            })
        } else {
            None
        };
        let mut out = Vec::new();
        DeltaHeader::new(index.hash, basis_check).encode(&mut out);

        DeltaJob {
            written: out.len() as u64,
            out,
            matcher: Some(Matcher::new(index)),
            tracker: ProgressTracker::new(
                ProgressOperation::BuildingDelta,
                self.input_len,
                self.progress.as_mut(),
            ),
            cancel: &self.cancel,
            buf: vec![0; self.bsize],
        }
    }

    /// Scan the target against the signature and write the delta.
    ///
    /// The size of the delta would be returned if no error occurs.
    pub fn build<T, S, W>(&mut self, mut target: T, signature: S, mut delta: W) -> Result<u64>
    where
        T: Read,
        S: Read,
        W: Write,
    {
        let mut reader = SignatureReader::new(signature)?;
        let mut indexer = Indexer::new(*reader.header(), reader.chunk_size());
        while let Some(chunk) = reader.next_chunk()? {
            indexer.push(chunk, &self.cancel)?;
        }

        let mut job = self.start(indexer);
        loop {
            delta.write_all(job.pending())?;
            let n = read_full(&mut target, job.read_buf()?)?;
            if !job.feed(n) {
                break;
            }
        }
        delta.write_all(job.pending())?;
        delta.flush()?;
        Ok(job.finish())
    }

    /// Async form of [`build`](Self::build), producing identical bytes.
    #[cfg(feature = "async")]
    pub async fn build_async<T, S, W>(&mut self, mut target: T, signature: S, mut delta: W) -> Result<u64>
    where
        T: AsyncRead + Unpin,
        S: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = AsyncSignatureReader::new(signature).await?;
        let mut indexer = Indexer::new(*reader.header(), reader.chunk_size());
        while let Some(chunk) = reader.next_chunk().await? {
            indexer.push(chunk, &self.cancel)?;
        }

        let mut job = self.start(indexer);
        loop {
            delta.write_all(job.pending()).await?;
            let n = read_full_async(&mut target, job.read_buf()?).await?;
            if !job.feed(n) {
                break;
            }
        }
        delta.write_all(job.pending()).await?;
        delta.flush().await?;
        Ok(job.finish())
    }
}

/// Chunk index and basis fingerprint, built from signature chunks.
struct Indexer {
    index: ChunkIndex,
    fingerprint: Fingerprint,
}

impl Indexer {
    fn new(header: SignatureHeader, chunk_size: usize) -> Self {
        Indexer {
            index: ChunkIndex::new(header, chunk_size),
            fingerprint: Fingerprint::new(header.hash),
        }
    }

    fn push(&mut self, chunk: ChunkSignature, cancel: &Option<CancelToken>) -> Result<()> {
        checkpoint(cancel)?;
        self.fingerprint.push_digest(&chunk.hash[..]);
        self.index.insert(chunk);
        Ok(())
    }
}

/// One target scan; both the blocking and async forms drive it.
struct DeltaJob<'a> {
    // taken once the target ended
    matcher: Option<Matcher>,
    tracker: ProgressTracker<'a>,
    cancel: &'a Option<CancelToken>,
    buf: Vec<u8>,
    // encoded bytes not yet written
    out: Vec<u8>,
    written: u64,
}

impl DeltaJob<'_> {
    fn pending(&self) -> &[u8] {
        &self.out[..]
    }

    /// Buffer for the next target bytes, once cancellation was checked.
    fn read_buf(&mut self) -> Result<&mut [u8]> {
        checkpoint(self.cancel)?;
        self.out.clear();
        Ok(&mut self.buf[..])
    }

    /// Scan the `n` bytes just read. At the end of the target, settle
    /// everything left and return false.
    fn feed(&mut self, n: usize) -> bool {
        match self.matcher.take() {
            Some(mut matcher) if n > 0 => {
                matcher.feed(&self.buf[..n], &mut self.out);
                self.matcher = Some(matcher);
                self.tracker.advance(n as u64);
            }
            Some(matcher) => {
                let stats = matcher.finish(&mut self.out);
                put_end(&mut self.out);
                debug!(
                    copies = stats.copy_ops,
                    copied = stats.copied_bytes,
                    literals = stats.data_ops,
                    literal_bytes = stats.literal_bytes,
                    "target scanned"
                );
            }
            None => {}
        }
        self.written += self.out.len() as u64;
        self.matcher.is_some()
    }

    fn finish(mut self) -> u64 {
        self.tracker.finish();
        debug!(bytes = self.written, "delta complete");
        self.written
    }
}

impl Default for DeltaBuilder {
    fn default() -> Self {
        Self::new()
    }
}
