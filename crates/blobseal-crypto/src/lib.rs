//! blobseal-crypto: streaming, authenticated, size-obfuscating encryption for attachments
//!
//! Container layout (bit-exact, no version field):
//! ```text
//! [16 bytes: IV][N bytes: AES-256-CBC ciphertext, PKCS#7][32 bytes: HMAC-SHA256(IV || ciphertext)]
//! ```
//!
//! Combined key:
//! ```text
//! [32 bytes: AES-256 key][32 bytes: HMAC-SHA256 key]
//! ```
//!
//! Pipeline:
//! - encrypt: plaintext → (optional zero padding up to a size bucket) → CBC/PKCS#7
//!   → HMAC → SHA-256 digest over the whole container
//! - decrypt: seekable handle over the container; the verifying driver walks it once,
//!   recomputing MAC and digest, and rejects anything that does not authenticate
//!
//! Memory use is bounded by one disk page on encryption and one cipher block of
//! chaining state (plus one buffered block) on decryption, independent of blob size.

pub mod cipher;
pub mod decrypt;
pub mod encrypt;
pub mod error;
pub mod handle;
pub mod keys;
pub mod mac;
pub mod metadata;
pub mod padding;

pub use decrypt::{
    decrypt_all, decrypt_attachment, decrypt_file, decrypt_file_with,
    decrypt_file_without_validating, decrypt_stream, validate, validate_attachment, validate_file,
    DecryptOptions,
};
pub use encrypt::{
    encrypt, encrypt_attachment, encrypt_file, encrypt_stream, reencrypt, EncryptOptions,
};
pub use error::{CryptoError, CryptoResult};
pub use handle::{open_attachment_handle, open_file_handle, open_seekable, EncryptedFileHandle};
pub use keys::{random_iv, CombinedKey};
pub use mac::sha256_file;
pub use metadata::{EncryptionMetadata, PaddingStrategy};
pub use padding::padded_size;

/// AES-256 key size in bytes
pub const AES_KEY_LEN: usize = 32;

/// HMAC-SHA256 key size in bytes
pub const HMAC_KEY_LEN: usize = 32;

/// Size of the combined AES + HMAC key carried in metadata
pub const COMBINED_KEY_LEN: usize = AES_KEY_LEN + HMAC_KEY_LEN;

/// AES block size; also the CBC IV size
pub const BLOCK_LEN: usize = 16;

/// Size of the IV prefixed to every container
pub const IV_LEN: usize = BLOCK_LEN;

/// Size of the HMAC-SHA256 tag appended to every container
pub const MAC_LEN: usize = 32;

/// Size of a SHA-256 digest
pub const DIGEST_LEN: usize = 32;

/// Bytes of framing around the ciphertext (IV + MAC)
pub const CRYPTO_OVERHEAD: usize = IV_LEN + MAC_LEN;

/// Read/write granularity for file I/O
pub const PAGE_SIZE: usize = 8192;

/// Plaintext chunk size used by the verifying decrypt driver
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
