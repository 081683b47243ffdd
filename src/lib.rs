/*!
Streaming rsync-style signature, delta and patch engines.

A receiver holding an old *basis* file sends its [signature](SignatureBuilder);
the sender scans the new *target* against it and produces a compact
[delta](DeltaBuilder) of basis copies and literal bytes; the receiver
[applies](DeltaApplier) the delta to its basis to rebuild the target.

Each engine reads its inputs once (the applier also seeks the basis), keeps
memory bounded by the chunk size and the pending literal run, and is
available in a blocking form and, with the default `async` feature, a tokio
form producing identical bytes.

```
use std::io;
use rsdelta::{DeltaApplier, DeltaBuilder, SignatureBuilder};

fn sync_files(basis: &[u8], target: &[u8]) -> rsdelta::Result<Vec<u8>> {
    let mut signature = Vec::new();
    SignatureBuilder::new().build(basis, &mut signature)?;

    let mut delta = Vec::new();
    DeltaBuilder::new().build(target, &signature[..], &mut delta)?;

    let mut rebuilt = Vec::new();
    DeltaApplier::new().apply(io::Cursor::new(basis), &delta[..], &mut rebuilt)?;
    Ok(rebuilt)
}

let basis = b"the quick brown fox jumps over the lazy dog".repeat(100);
let mut target = basis.clone();
target[1234] ^= 0xff;
assert_eq!(sync_files(&basis, &target).unwrap(), target);
```
*/

#![forbid(unsafe_code)]

pub mod delta;
pub mod diff;
mod error;
pub mod hash;
pub mod patch;
pub mod progress;
pub mod rolling;
pub mod sign;
pub mod signature;
mod stream;
mod utils;

pub use delta::{read_delta, BasisCheck, Delta, DeltaHeader, DeltaOperation, DeltaReader, DeltaWriter};
pub use diff::{ChunkIndex, DeltaBuilder, MatchStats, Matcher};
pub use error::{Error, Result};
pub use hash::{hash_algorithm, HashAlgorithm, Md5Hash, Sha1Hash, XxHash64};
pub use patch::DeltaApplier;
pub use progress::{CancelToken, ProgressOperation, ProgressReport, ProgressReporter};
pub use rolling::{rolling_checksum, Adler32, Adler32V2, RollingChecksum};
pub use sign::{SignatureBuilder, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use signature::{read_signature, ChunkSignature, Signature, SignatureHeader, SignatureReader, SignatureWriter};

#[cfg(feature = "async")]
pub use delta::AsyncDeltaReader;
#[cfg(feature = "async")]
pub use signature::AsyncSignatureReader;
