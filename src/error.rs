use std::io;
use thiserror::Error;

/// Errors raised by the signature, delta and patch engines.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying stream failure, passed through untouched.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Artifact is not of the expected kind, version, or is truncated.
    #[error("invalid format: {0}")]
    Format(String),

    /// Artifact names a strong hash this build does not provide.
    #[error("unsupported hash algorithm `{0}`")]
    UnknownHashAlgorithm(String),

    /// Artifact names a rolling checksum this build does not provide.
    #[error("unsupported rolling checksum algorithm `{0}`")]
    UnknownRollingChecksum(String),

    /// The basis file is not the one the delta was built against.
    #[error("basis file verification failed: expected fingerprint {expected}, got {actual}")]
    Verification { expected: String, actual: String },

    /// A copy operation points outside the basis file.
    #[error("copy of {length} bytes at offset {offset} exceeds basis length {basis_len}")]
    Range {
        offset: u64,
        length: u64,
        basis_len: u64,
    },

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The operation was stopped through its cancel token.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn format<S: Into<String>>(reason: S) -> Self {
        Error::Format(reason.into())
    }

    pub(crate) fn truncated(what: &str) -> Self {
        Error::Format(format!("truncated {}", what))
    }
}

/// Lower-case hex rendering used in verification messages.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let e = Error::Range {
            offset: 10,
            length: 4,
            basis_len: 12,
        };
        assert_eq!(
            e.to_string(),
            "copy of 4 bytes at offset 10 exceeds basis length 12"
        );
        assert_eq!(
            Error::truncated("delta header").to_string(),
            "invalid format: truncated delta header"
        );
        assert_eq!(hex(&[0x00, 0xab, 0x7f]), "00ab7f");
    }

    #[test]
    fn io_errors_convert() {
        let e: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(e, Error::Io(_)));
    }
}
