/*!
Delta artifact: instructions rebuilding a target from its basis.

```text
"OCTODELTA" | version | hash name | basis check | ">>>" | operation* | [0x00]
basis check = 0x00 | 0x01 u32 chunk size | u32 digest length | digest
operation   = 0x60 u64 offset | u64 length
            | 0x80 u64 length | bytes
```

All integers are little-endian. Readers accept either the end marker or a
clean end of stream after the last operation.
*/

use crate::error::{hex, Error, Result};
use crate::hash::{self, HashAlgorithm, HashState};
use crate::sign::MAX_CHUNK_SIZE;
use crate::stream::InputBuffer;
use crate::utils::*;
use std::fmt;
use std::io::{Read, Write};

#[cfg(feature = "async")]
use tokio::io::AsyncRead;

/// Leading bytes of every delta artifact.
pub const DELTA_MAGIC: &[u8; 9] = b"OCTODELTA";

/// Delta format version written and accepted.
pub const DELTA_VERSION: u8 = 1;

const OP_COPY: u8 = 0x60;
const OP_DATA: u8 = 0x80;
const OP_END: u8 = 0x00;

/// Initial allocation bound for a literal payload of untrusted length.
const DATA_RESERVE: u64 = 1 << 20;

/// One step of target reconstruction.
#[derive(Clone, PartialEq, Eq)]
pub enum DeltaOperation {
    /// Reuse `length` basis bytes starting at `offset`.
    Copy { offset: u64, length: u64 },
    /// Literal target bytes.
    Data(Vec<u8>),
}

impl DeltaOperation {
    /// Bytes this operation contributes to the target.
    pub fn output_len(&self) -> u64 {
        match self {
            DeltaOperation::Copy { length, .. } => *length,
            DeltaOperation::Data(bytes) => bytes.len() as u64,
        }
    }

    /// Bytes this operation occupies in a delta artifact.
    pub fn encoded_len(&self) -> u64 {
        match self {
            DeltaOperation::Copy { .. } => 17,
            DeltaOperation::Data(bytes) => 9 + bytes.len() as u64,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        match self {
            DeltaOperation::Copy { offset, length } => put_copy(out, *offset, *length),
            DeltaOperation::Data(bytes) => put_data(out, &bytes[..]),
        }
    }
}

impl fmt::Debug for DeltaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaOperation::Copy { offset, length } => {
                write!(f, "Copy {{ offset: {}, length: {} }}", offset, length)
            }
            DeltaOperation::Data(bytes) => write!(f, "Data({} bytes)", bytes.len()),
        }
    }
}

pub(crate) fn put_copy(out: &mut Vec<u8>, offset: u64, length: u64) {
    out.push(OP_COPY);
    put_u64(out, offset);
    put_u64(out, length);
}

pub(crate) fn put_data(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(OP_DATA);
    put_u64(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub(crate) fn put_end(out: &mut Vec<u8>) {
    out.push(OP_END);
}

/// Fingerprint of the basis a delta was built against.
///
/// `digest` is the strong hash of the concatenated strong hashes of every
/// `chunk_size` basis chunk. A chunk size of 0 stands for an unchunked
/// basis: no digests when empty, otherwise the digest of the whole basis.
#[derive(Clone, PartialEq, Eq)]
pub struct BasisCheck {
    pub chunk_size: u32,
    pub digest: Vec<u8>,
}

impl fmt::Debug for BasisCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasisCheck")
            .field("chunk_size", &self.chunk_size)
            .field("digest", &hex(&self.digest[..]))
            .finish()
    }
}

/// Accumulates chunk digests into a basis fingerprint.
pub(crate) struct Fingerprint {
    state: Box<dyn HashState>,
}

impl Fingerprint {
    pub fn new(hash: &dyn HashAlgorithm) -> Self {
        Fingerprint {
            state: hash.start(),
        }
    }

    pub fn push_digest(&mut self, digest: &[u8]) {
        self.state.update(digest);
    }

    pub fn finish(self) -> Vec<u8> {
        self.state.finish()
    }
}

/// Delta metadata preceding the operations.
#[derive(Clone)]
pub struct DeltaHeader {
    pub hash: &'static dyn HashAlgorithm,
    pub basis_check: Option<BasisCheck>,
}

impl DeltaHeader {
    pub fn new(hash: &'static dyn HashAlgorithm, basis_check: Option<BasisCheck>) -> Self {
        DeltaHeader { hash, basis_check }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&DELTA_MAGIC[..]);
        out.push(DELTA_VERSION);
        put_name(out, self.hash.name());
        match &self.basis_check {
            None => out.push(0),
            Some(check) => {
                out.push(1);
                put_u32(out, check.chunk_size);
                put_u32(out, check.digest.len() as u32);
                out.extend_from_slice(&check.digest[..]);
            }
        }
        out.extend_from_slice(&END_OF_METADATA[..]);
    }

    fn decode(buf: &[u8]) -> Decoded<Self> {
        let mut f = Fields::new(buf);
        f.marker(&DELTA_MAGIC[..], "delta magic")?;
        let version = f.u8()?;
        if version != DELTA_VERSION {
            return Err(Error::format(format!("unsupported delta version {}", version)).into());
        }
        let name = f.name()?;
        let hash = hash::hash_algorithm(&name).ok_or(Error::UnknownHashAlgorithm(name))?;

        let basis_check = match f.u8()? {
            0 => None,
            1 => {
                let chunk_size = f.u32()?;
                if chunk_size as usize > MAX_CHUNK_SIZE {
                    return Err(Error::format(format!(
                        "basis check chunk size {} exceeds {}",
                        chunk_size, MAX_CHUNK_SIZE
                    ))
                    .into());
                }
                let digest_len = f.u32()? as usize;
                if digest_len != hash.digest_len() {
                    return Err(Error::format(format!(
                        "basis digest of {} bytes for {}",
                        digest_len,
                        hash.name()
                    ))
                    .into());
                }
                let digest = f.bytes(digest_len)?.to_vec();
                Some(BasisCheck { chunk_size, digest })
            }
            flag => {
                return Err(Error::format(format!("invalid basis check flag {:#04x}", flag)).into())
            }
        };
        f.marker(&END_OF_METADATA[..], "end of delta metadata")?;
        Ok((DeltaHeader { hash, basis_check }, f.consumed()))
    }
}

impl fmt::Debug for DeltaHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaHeader")
            .field("hash", &self.hash.name())
            .field("basis_check", &self.basis_check)
            .finish()
    }
}

/// Operation record head; literal bytes follow a `Data` head.
enum OpHead {
    Copy { offset: u64, length: u64 },
    Data(u64),
    End,
}

fn decode_op(buf: &[u8]) -> Decoded<OpHead> {
    let mut f = Fields::new(buf);
    let head = match f.u8()? {
        OP_COPY => {
            let offset = f.u64()?;
            let length = f.u64()?;
            OpHead::Copy { offset, length }
        }
        OP_DATA => OpHead::Data(f.u64()?),
        OP_END => OpHead::End,
        op => return Err(Error::format(format!("unknown delta opcode {:#04x}", op)).into()),
    };
    Ok((head, f.consumed()))
}

/// Encodes a delta artifact.
pub struct DeltaWriter<W> {
    writer: W,
    buf: Vec<u8>,
    written: u64,
}

impl<W: Write> DeltaWriter<W> {
    /// Write the header and prepare for operations.
    pub fn new(mut writer: W, header: &DeltaHeader) -> Result<Self> {
        let mut buf = Vec::with_capacity(64);
        header.encode(&mut buf);
        writer.write_all(&buf[..])?;
        Ok(DeltaWriter {
            writer,
            written: buf.len() as u64,
            buf,
        })
    }

    pub fn write_operation(&mut self, op: &DeltaOperation) -> Result<()> {
        self.buf.clear();
        op.encode(&mut self.buf);
        self.write_buf()
    }

    fn write_buf(&mut self) -> Result<()> {
        self.writer.write_all(&self.buf[..])?;
        self.written += self.buf.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write the end marker and flush; returns the artifact size.
    pub fn finish(mut self) -> Result<u64> {
        self.buf.clear();
        put_end(&mut self.buf);
        self.write_buf()?;
        self.writer.flush()?;
        Ok(self.written)
    }
}

/// Streaming delta decoder.
///
/// Operations are produced lazily in target order. Literal payloads are
/// read incrementally, so a truncated payload is reported as such rather
/// than allocated up front.
pub struct DeltaReader<R> {
    reader: R,
    input: InputBuffer,
    header: DeltaHeader,
    done: bool,
}

impl<R: Read> DeltaReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut input = InputBuffer::new();
        let header = input.decode(&mut reader, DeltaHeader::decode, "delta header")?;
        Ok(DeltaReader {
            reader,
            input,
            header,
            done: false,
        })
    }

    pub fn header(&self) -> &DeltaHeader {
        &self.header
    }

    /// Delta bytes consumed so far, header included.
    pub fn consumed(&self) -> u64 {
        self.input.consumed()
    }

    /// Next operation in target order, `None` after the last one.
    pub fn next_operation(&mut self) -> Result<Option<DeltaOperation>> {
        if self.done {
            return Ok(None);
        }
        if self.input.at_end(&mut self.reader)? {
            self.done = true;
            return Ok(None);
        }
        let head = self
            .input
            .decode(&mut self.reader, decode_op, "delta operation");
        let op = match head {
            Ok(OpHead::Copy { offset, length }) => DeltaOperation::Copy { offset, length },
            Ok(OpHead::Data(len)) => {
                let mut bytes = Vec::with_capacity(Ord::min(len, DATA_RESERVE) as usize);
                while (bytes.len() as u64) < len {
                    let want = (len - bytes.len() as u64) as usize;
                    let part = self.input.take(want);
                    if part.is_empty() {
                        if self.input.is_eof() || self.input.fill(&mut self.reader)? == 0 {
                            self.done = true;
                            return Err(Error::truncated("delta data"));
                        }
                        continue;
                    }
                    bytes.extend_from_slice(part);
                }
                DeltaOperation::Data(bytes)
            }
            Ok(OpHead::End) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        Ok(Some(op))
    }
}

impl<R: Read> Iterator for DeltaReader<R> {
    type Item = Result<DeltaOperation>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next_operation();
        if next.is_err() {
            self.done = true;
        }
        next.transpose()
    }
}

/// Fully decoded delta.
#[derive(Debug, Clone)]
pub struct Delta {
    pub header: DeltaHeader,
    pub operations: Vec<DeltaOperation>,
}

impl Delta {
    /// Length of the target this delta rebuilds.
    pub fn target_len(&self) -> u64 {
        self.operations.iter().map(DeltaOperation::output_len).sum()
    }
}

/// Decode a whole delta artifact.
pub fn read_delta<R: Read>(reader: R) -> Result<Delta> {
    let mut reader = DeltaReader::new(reader)?;
    let mut operations = Vec::new();
    while let Some(op) = reader.next_operation()? {
        operations.push(op);
    }
    Ok(Delta {
        header: reader.header,
        operations,
    })
}

/// Async counterpart of [`DeltaReader`].
#[cfg(feature = "async")]
pub struct AsyncDeltaReader<R> {
    reader: R,
    input: InputBuffer,
    header: DeltaHeader,
    done: bool,
}

#[cfg(feature = "async")]
impl<R: AsyncRead + Unpin> AsyncDeltaReader<R> {
    pub async fn new(mut reader: R) -> Result<Self> {
        let mut input = InputBuffer::new();
        let header = input
            .decode_async(&mut reader, DeltaHeader::decode, "delta header")
            .await?;
        Ok(AsyncDeltaReader {
            reader,
            input,
            header,
            done: false,
        })
    }

    pub fn header(&self) -> &DeltaHeader {
        &self.header
    }

    pub fn consumed(&self) -> u64 {
        self.input.consumed()
    }

    pub async fn next_operation(&mut self) -> Result<Option<DeltaOperation>> {
        if self.done {
            return Ok(None);
        }
        if self.input.at_end_async(&mut self.reader).await? {
            self.done = true;
            return Ok(None);
        }
        let head = self
            .input
            .decode_async(&mut self.reader, decode_op, "delta operation")
            .await;
        let op = match head {
            Ok(OpHead::Copy { offset, length }) => DeltaOperation::Copy { offset, length },
            Ok(OpHead::Data(len)) => {
                let mut bytes = Vec::with_capacity(Ord::min(len, DATA_RESERVE) as usize);
                while (bytes.len() as u64) < len {
                    let want = (len - bytes.len() as u64) as usize;
                    let part = self.input.take(want);
                    if part.is_empty() {
                        if self.input.is_eof() || self.input.fill_async(&mut self.reader).await? == 0
                        {
                            self.done = true;
                            return Err(Error::truncated("delta data"));
                        }
                        continue;
                    }
                    bytes.extend_from_slice(part);
                }
                DeltaOperation::Data(bytes)
            }
            Ok(OpHead::End) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        Ok(Some(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Sha1Hash, XxHash64};
    use std::io::Cursor;

    fn encode(header: &DeltaHeader, ops: &[DeltaOperation]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = DeltaWriter::new(&mut out, header).unwrap();
        for op in ops.iter() {
            w.write_operation(op).unwrap();
        }
        let n = w.finish().unwrap();
        assert_eq!(n, out.len() as u64);
        out
    }

    fn sample_ops() -> Vec<DeltaOperation> {
        vec![
            DeltaOperation::Data(b"hello".to_vec()),
            DeltaOperation::Copy {
                offset: 4096,
                length: 2048,
            },
            DeltaOperation::Data(Vec::new()),
        ]
    }

    #[test]
    fn header_without_check() {
        let bytes = encode(&DeltaHeader::new(&XxHash64, None), &[]);
        assert_eq!(bytes, b"OCTODELTA\x01\x05XXH64\x00>>>\x00");
    }

    #[test]
    fn reads_back_operations() {
        let check = BasisCheck {
            chunk_size: 2048,
            digest: Sha1Hash.compute(b"digests"),
        };
        let header = DeltaHeader::new(&Sha1Hash, Some(check.clone()));
        let ops = sample_ops();
        let bytes = encode(&header, &ops[..]);
        let expected_len = 9 + 1 + 5 + 1 + 4 + 4 + 20 + 3 + 1
            + ops.iter().map(DeltaOperation::encoded_len).sum::<u64>();
        assert_eq!(bytes.len() as u64, expected_len);

        let delta = read_delta(Cursor::new(bytes)).unwrap();
        assert_eq!(delta.header.hash.name(), "SHA1");
        assert_eq!(delta.header.basis_check, Some(check));
        assert_eq!(delta.operations, ops);
        assert_eq!(delta.target_len(), 5 + 2048);
    }

    #[test]
    fn end_of_stream_ends_operations() {
        let mut bytes = encode(&DeltaHeader::new(&XxHash64, None), &sample_ops()[..]);
        assert_eq!(bytes.pop(), Some(OP_END));
        let delta = read_delta(Cursor::new(bytes)).unwrap();
        assert_eq!(delta.operations.len(), 3);
    }

    #[test]
    fn consumed_counts_every_byte() {
        let bytes = encode(&DeltaHeader::new(&XxHash64, None), &sample_ops()[..]);
        let total = bytes.len() as u64;
        let mut reader = DeltaReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.consumed(), 9 + 1 + 6 + 1 + 3);
        while reader.next_operation().unwrap().is_some() {}
        assert_eq!(reader.consumed(), total);
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut bytes = encode(&DeltaHeader::new(&XxHash64, None), &[]);
        *bytes.last_mut().unwrap() = 0x42;
        let results: Vec<_> = DeltaReader::new(Cursor::new(bytes)).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::Format(_))));
    }

    #[test]
    fn truncated_data_payload() {
        let mut bytes = encode(&DeltaHeader::new(&XxHash64, None), &sample_ops()[..1]);
        bytes.pop();
        bytes.pop();
        let mut reader = DeltaReader::new(Cursor::new(bytes)).unwrap();
        let e = reader.next_operation().unwrap_err();
        assert_eq!(e.to_string(), "invalid format: truncated delta data");
        assert!(reader.next_operation().unwrap().is_none());
    }

    #[test]
    fn truncated_copy() {
        let mut bytes = encode(&DeltaHeader::new(&XxHash64, None), &sample_ops()[1..2]);
        bytes.truncate(bytes.len() - 4);
        let e = read_delta(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(e, Error::Format(_)));
    }

    #[test]
    fn rejects_bad_header() {
        let e = DeltaReader::new(Cursor::new(b"OCTOSIG\x01".to_vec())).err().unwrap();
        assert!(matches!(e, Error::Format(_)));

        let e = DeltaReader::new(Cursor::new(b"OCTODELTA\x02".to_vec())).err().unwrap();
        assert!(matches!(e, Error::Format(_)));

        let e = DeltaReader::new(Cursor::new(b"OCTODELTA\x01\x04CRC9\x00>>>".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(e, Error::UnknownHashAlgorithm(ref n) if n == "CRC9"));

        let e = DeltaReader::new(Cursor::new(b"OCTODELTA\x01\x05XXH64\x07>>>".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(e, Error::Format(_)));
    }

    #[test]
    fn rejects_bad_basis_check() {
        let header = DeltaHeader::new(
            &XxHash64,
            Some(BasisCheck {
                chunk_size: (MAX_CHUNK_SIZE + 1) as u32,
                digest: vec![0; 8],
            }),
        );
        let e = DeltaReader::new(Cursor::new(encode(&header, &[]))).err().unwrap();
        assert!(matches!(e, Error::Format(_)));

        let header = DeltaHeader::new(
            &XxHash64,
            Some(BasisCheck {
                chunk_size: 16,
                digest: vec![0; 20],
            }),
        );
        let e = DeltaReader::new(Cursor::new(encode(&header, &[]))).err().unwrap();
        assert!(matches!(e, Error::Format(_)));
    }

    #[test]
    fn fingerprint_hashes_digests() {
        let mut fp = Fingerprint::new(&XxHash64);
        fp.push_digest(b"ab");
        fp.push_digest(b"cd");
        assert_eq!(fp.finish(), XxHash64.compute(b"abcd"));
    }
}
