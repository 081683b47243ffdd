/*!
Strong hash algorithms used to confirm rolling checksum candidates.

Algorithms are stateless values looked up by the name recorded in signature
and delta artifacts.
*/

use digest::Digest;
use xxhash_rust::xxh64::{xxh64, Xxh64};

/// Incremental hashing state produced by [`HashAlgorithm::start`].
pub trait HashState: Send {
    fn update(&mut self, data: &[u8]);
    fn finish(self: Box<Self>) -> Vec<u8>;
}

/// Strong hash capability.
pub trait HashAlgorithm: Send + Sync {
    /// Name written into artifacts.
    fn name(&self) -> &'static str;

    /// Fixed digest length in bytes.
    fn digest_len(&self) -> usize;

    /// Begin an incremental hash.
    fn start(&self) -> Box<dyn HashState>;

    /// One-shot digest of `data`.
    fn compute(&self, data: &[u8]) -> Vec<u8> {
        let mut state = self.start();
        state.update(data);
        state.finish()
    }
}

/// XXH64 with seed 0, digest written little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct XxHash64;

impl XxHash64 {
    pub const NAME: &'static str = "XXH64";
}

impl HashState for Xxh64 {
    fn update(&mut self, data: &[u8]) {
        Xxh64::update(self, data);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        self.digest().to_le_bytes().to_vec()
    }
}

impl HashAlgorithm for XxHash64 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn digest_len(&self) -> usize {
        8
    }

    fn start(&self) -> Box<dyn HashState> {
        Box::new(Xxh64::new(0))
    }

    fn compute(&self, data: &[u8]) -> Vec<u8> {
        xxh64(data, 0).to_le_bytes().to_vec()
    }
}

/// Adapter from any RustCrypto digest to [`HashState`].
struct DigestState<D>(D);

impl<D: Digest + Send> HashState for DigestState<D> {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

/// SHA-1.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Hash;

impl Sha1Hash {
    pub const NAME: &'static str = "SHA1";
}

impl HashAlgorithm for Sha1Hash {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn digest_len(&self) -> usize {
        20
    }

    fn start(&self) -> Box<dyn HashState> {
        Box::new(DigestState(sha1::Sha1::new()))
    }
}

/// MD5.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hash;

impl Md5Hash {
    pub const NAME: &'static str = "MD5";
}

impl HashAlgorithm for Md5Hash {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn digest_len(&self) -> usize {
        16
    }

    fn start(&self) -> Box<dyn HashState> {
        Box::new(DigestState(md5::Md5::new()))
    }
}

/// Default strong hash.
pub const DEFAULT_HASH: &dyn HashAlgorithm = &XxHash64;

/// Every strong hash known to this build.
pub fn hash_algorithms() -> [&'static dyn HashAlgorithm; 3] {
    [&XxHash64, &Sha1Hash, &Md5Hash]
}

/// Find a strong hash by its artifact name.
pub fn hash_algorithm(name: &str) -> Option<&'static dyn HashAlgorithm> {
    hash_algorithms().into_iter().find(|a| a.name() == name)
}
