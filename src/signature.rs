/*!
Signature artifact: per-chunk fingerprints of a basis file.

```text
"OCTOSIG" | version | hash name | rolling name | ">>>" | record*
record = u16 LE length | rolling checksum (LE) | strong hash
```

Records run until end of stream. The chunk size of a signature is the
length of its first record, at most `MAX_CHUNK_SIZE`; only the last record
may be shorter.
*/

use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm};
use crate::rolling::{self, RollingChecksum};
use crate::sign::MAX_CHUNK_SIZE;
use crate::stream::InputBuffer;
use crate::utils::*;
use std::fmt;
use std::io::{Read, Write};

#[cfg(feature = "async")]
use tokio::io::AsyncRead;

/// Leading bytes of every signature artifact.
pub const SIGNATURE_MAGIC: &[u8; 7] = b"OCTOSIG";

/// Signature format version written and accepted.
pub const SIGNATURE_VERSION: u8 = 1;

/// Algorithms a signature was built with.
#[derive(Clone, Copy)]
pub struct SignatureHeader {
    pub hash: &'static dyn HashAlgorithm,
    pub rolling: &'static dyn RollingChecksum,
}

impl SignatureHeader {
    pub fn new(hash: &'static dyn HashAlgorithm, rolling: &'static dyn RollingChecksum) -> Self {
        SignatureHeader { hash, rolling }
    }

    /// Encoded size of one chunk record.
    pub fn record_len(&self) -> usize {
        2 + self.rolling.checksum_len() + self.hash.digest_len()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SIGNATURE_MAGIC[..]);
        out.push(SIGNATURE_VERSION);
        put_name(out, self.hash.name());
        put_name(out, self.rolling.name());
        out.extend_from_slice(&END_OF_METADATA[..]);
    }

    fn decode(buf: &[u8]) -> Decoded<Self> {
        let mut f = Fields::new(buf);
        f.marker(&SIGNATURE_MAGIC[..], "signature magic")?;
        let version = f.u8()?;
        if version != SIGNATURE_VERSION {
            return Err(Error::format(format!("unsupported signature version {}", version)).into());
        }
        let hash_name = f.name()?;
        let rolling_name = f.name()?;
        f.marker(&END_OF_METADATA[..], "end of signature metadata")?;

        let hash = hash::hash_algorithm(&hash_name).ok_or(Error::UnknownHashAlgorithm(hash_name))?;
        let rolling = rolling::rolling_checksum(&rolling_name)
            .ok_or(Error::UnknownRollingChecksum(rolling_name))?;
        Ok((SignatureHeader { hash, rolling }, f.consumed()))
    }
}

impl Default for SignatureHeader {
    fn default() -> Self {
        SignatureHeader::new(hash::DEFAULT_HASH, rolling::DEFAULT_ROLLING)
    }
}

impl fmt::Debug for SignatureHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureHeader")
            .field("hash", &self.hash.name())
            .field("rolling", &self.rolling.name())
            .finish()
    }
}

/// Fingerprint of one basis chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSignature {
    pub length: usize,
    pub rolling_checksum: u32,
    pub hash: Vec<u8>,
}

impl ChunkSignature {
    /// Fingerprint `chunk` with the algorithms of `header`.
    pub fn compute(header: &SignatureHeader, chunk: &[u8]) -> Self {
        ChunkSignature {
            length: chunk.len(),
            rolling_checksum: header.rolling.compute(chunk),
            hash: header.hash.compute(chunk),
        }
    }

    /// Append the record; fails for lengths outside `1..=MAX_CHUNK_SIZE`
    /// or a digest of the wrong size.
    pub(crate) fn encode(&self, header: &SignatureHeader, out: &mut Vec<u8>) -> Result<()> {
        let length = match u16::try_from(self.length) {
            Ok(n) if n > 0 && self.length <= MAX_CHUNK_SIZE => n,
            _ => {
                return Err(Error::Config(format!(
                    "signature chunk of {} bytes, must be between 1 and {}",
                    self.length, MAX_CHUNK_SIZE
                )))
            }
        };
        if self.hash.len() != header.hash.digest_len() {
            return Err(Error::Config(format!(
                "{} digest of {} bytes",
                header.hash.name(),
                self.hash.len()
            )));
        }
        put_u16(out, length);
        put_uint(out, self.rolling_checksum, header.rolling.checksum_len());
        out.extend_from_slice(&self.hash[..]);
        Ok(())
    }
}

/// Fully decoded signature.
#[derive(Debug, Clone)]
pub struct Signature {
    pub header: SignatureHeader,
    pub chunk_size: usize,
    pub chunks: Vec<ChunkSignature>,
}

/// Record decoding state: enforces the chunk layout across records.
struct ChunkDecoder {
    header: SignatureHeader,
    chunk_size: Option<usize>,
    tail_seen: bool,
}

impl ChunkDecoder {
    fn new(header: SignatureHeader) -> Self {
        ChunkDecoder {
            header,
            chunk_size: None,
            tail_seen: false,
        }
    }

    fn decode(&mut self, buf: &[u8]) -> Decoded<ChunkSignature> {
        let mut f = Fields::new(buf);
        let length = f.u16()? as usize;
        let rolling_checksum = f.uint(self.header.rolling.checksum_len())?;
        let hash = f.bytes(self.header.hash.digest_len())?.to_vec();

        if length == 0 {
            return Err(Error::format("zero-length signature chunk").into());
        }
        if length > MAX_CHUNK_SIZE {
            return Err(Error::format(format!(
                "signature chunk of {} bytes exceeds {}",
                length, MAX_CHUNK_SIZE
            ))
            .into());
        }
        if self.tail_seen {
            return Err(Error::format("signature chunk after the tail chunk").into());
        }
        match self.chunk_size {
            None => self.chunk_size = Some(length),
            Some(size) if length > size => {
                return Err(Error::format(format!(
                    "signature chunk of {} bytes exceeds chunk size {}",
                    length, size
                ))
                .into());
            }
            Some(size) if length < size => self.tail_seen = true,
            Some(_) => {}
        }

        let chunk = ChunkSignature {
            length,
            rolling_checksum,
            hash,
        };
        Ok((chunk, f.consumed()))
    }
}

/// Sans-IO signature encoder: appends encoded bytes to a caller buffer.
pub(crate) struct SignatureEncoder {
    header: SignatureHeader,
    written: u64,
}

impl SignatureEncoder {
    /// Append the header.
    pub fn new(header: SignatureHeader, out: &mut Vec<u8>) -> Self {
        let start = out.len();
        header.encode(out);
        SignatureEncoder {
            header,
            written: (out.len() - start) as u64,
        }
    }

    pub fn header(&self) -> &SignatureHeader {
        &self.header
    }

    pub fn chunk(&mut self, chunk: &ChunkSignature, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        chunk.encode(&self.header, out)?;
        self.written += (out.len() - start) as u64;
        Ok(())
    }

    /// Bytes encoded so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

/// Encodes a signature artifact.
pub struct SignatureWriter<W> {
    writer: W,
    encoder: SignatureEncoder,
    buf: Vec<u8>,
}

impl<W: Write> SignatureWriter<W> {
    /// Write the header and prepare for chunk records.
    pub fn new(mut writer: W, header: SignatureHeader) -> Result<Self> {
        let mut buf = Vec::with_capacity(64);
        let encoder = SignatureEncoder::new(header, &mut buf);
        writer.write_all(&buf[..])?;
        Ok(SignatureWriter {
            writer,
            encoder,
            buf,
        })
    }

    /// Write one record.
    ///
    /// Chunks of 0 or more than `MAX_CHUNK_SIZE` bytes are rejected with
    /// `Error::Config` and nothing is written.
    pub fn write_chunk(&mut self, chunk: &ChunkSignature) -> Result<()> {
        self.buf.clear();
        self.encoder.chunk(chunk, &mut self.buf)?;
        self.writer.write_all(&self.buf[..])?;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.encoder.written()
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Streaming signature decoder.
///
/// Chunks are produced lazily in basis order; the reader is forward-only.
/// The first record is read eagerly so [`chunk_size`](Self::chunk_size) is
/// known up front.
pub struct SignatureReader<R> {
    reader: R,
    input: InputBuffer,
    chunks: ChunkDecoder,
    peeked: Option<ChunkSignature>,
    failed: bool,
}

impl<R: Read> SignatureReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut input = InputBuffer::new();
        let header = input.decode(&mut reader, SignatureHeader::decode, "signature header")?;
        let mut this = SignatureReader {
            reader,
            input,
            chunks: ChunkDecoder::new(header),
            peeked: None,
            failed: false,
        };
        this.peeked = this.read_chunk()?;
        Ok(this)
    }

    pub fn header(&self) -> &SignatureHeader {
        &self.chunks.header
    }

    /// Basis chunk size, or 0 for a signature without chunks.
    pub fn chunk_size(&self) -> usize {
        self.chunks.chunk_size.unwrap_or(0)
    }

    fn read_chunk(&mut self) -> Result<Option<ChunkSignature>> {
        if self.input.at_end(&mut self.reader)? {
            return Ok(None);
        }
        let decoder = &mut self.chunks;
        let chunk = self
            .input
            .decode(&mut self.reader, |buf| decoder.decode(buf), "signature chunk")?;
        Ok(Some(chunk))
    }

    /// Next chunk in basis order, `None` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<ChunkSignature>> {
        if let Some(chunk) = self.peeked.take() {
            return Ok(Some(chunk));
        }
        self.read_chunk()
    }

    /// Decode every remaining chunk.
    pub fn into_signature(mut self) -> Result<Signature> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            chunks.push(chunk);
        }
        Ok(Signature {
            header: self.chunks.header,
            chunk_size: self.chunk_size(),
            chunks,
        })
    }
}

impl<R: Read> Iterator for SignatureReader<R> {
    type Item = Result<ChunkSignature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.next_chunk();
        self.failed = next.is_err();
        next.transpose()
    }
}

/// Decode a whole signature artifact.
pub fn read_signature<R: Read>(reader: R) -> Result<Signature> {
    SignatureReader::new(reader)?.into_signature()
}

/// Async counterpart of [`SignatureReader`].
#[cfg(feature = "async")]
pub struct AsyncSignatureReader<R> {
    reader: R,
    input: InputBuffer,
    chunks: ChunkDecoder,
    peeked: Option<ChunkSignature>,
}

#[cfg(feature = "async")]
impl<R: AsyncRead + Unpin> AsyncSignatureReader<R> {
    pub async fn new(mut reader: R) -> Result<Self> {
        let mut input = InputBuffer::new();
        let header = input
            .decode_async(&mut reader, SignatureHeader::decode, "signature header")
            .await?;
        let mut this = AsyncSignatureReader {
            reader,
            input,
            chunks: ChunkDecoder::new(header),
            peeked: None,
        };
        this.peeked = this.read_chunk().await?;
        Ok(this)
    }

    pub fn header(&self) -> &SignatureHeader {
        &self.chunks.header
    }

    pub fn chunk_size(&self) -> usize {
        self.chunks.chunk_size.unwrap_or(0)
    }

    async fn read_chunk(&mut self) -> Result<Option<ChunkSignature>> {
        if self.input.at_end_async(&mut self.reader).await? {
            return Ok(None);
        }
        let decoder = &mut self.chunks;
        let chunk = self
            .input
            .decode_async(&mut self.reader, |buf| decoder.decode(buf), "signature chunk")
            .await?;
        Ok(Some(chunk))
    }

    pub async fn next_chunk(&mut self) -> Result<Option<ChunkSignature>> {
        if let Some(chunk) = self.peeked.take() {
            return Ok(Some(chunk));
        }
        self.read_chunk().await
    }
}
