use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: {0} bytes (expected {expected})", expected = crate::COMBINED_KEY_LEN)]
    InvalidKeyLength(usize),

    #[error("invalid IV length: {0} bytes (expected {expected})", expected = crate::IV_LEN)]
    InvalidIvLength(usize),

    #[error("container too short for crypto overhead: {0} bytes (minimum {min})", min = crate::CRYPTO_OVERHEAD)]
    ContainerTooShort(u64),

    #[error("seek to {offset} past end of plaintext ({length} bytes)")]
    SeekPastEndOfFile { offset: u64, length: u64 },

    #[error("bad mac")]
    BadMac,

    #[error("bad digest")]
    BadDigest,

    #[error("incorrect plaintext length: expected {expected}, decrypted {actual}")]
    IncorrectPlaintextLength { expected: u64, actual: u64 },

    #[error("missing digest")]
    MissingDigest,

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("cipher failure: {0}")]
    CipherFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// True for failures that a tampered or truncated container can cause
    /// before the MAC has been checked.
    pub(crate) fn may_mask_bad_mac(&self) -> bool {
        matches!(self, CryptoError::CipherFailure(_) | CryptoError::Io(_))
    }
}
