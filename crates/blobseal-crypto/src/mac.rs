//! HMAC-SHA256 and SHA-256 accumulators, plus constant-time tag comparison
//!
//! Both accumulators are one-shot: `finalize` consumes them.

use std::io::Read;
use std::path::Path;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, CryptoResult};
use crate::{DIGEST_LEN, HMAC_KEY_LEN, MAC_LEN, PAGE_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Keyed HMAC-SHA256 over everything passed to `update`.
pub struct MacAccumulator {
    inner: HmacSha256,
}

impl MacAccumulator {
    pub fn new(key: &[u8; HMAC_KEY_LEN]) -> CryptoResult<Self> {
        let inner = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::CipherFailure(format!("HMAC init failed: {e}")))?;
        Ok(Self { inner })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> [u8; MAC_LEN] {
        let mut tag = [0u8; MAC_LEN];
        tag.copy_from_slice(&self.inner.finalize().into_bytes());
        tag
    }
}

/// Unkeyed SHA-256 over everything passed to `update`.
#[derive(Default)]
pub struct DigestAccumulator {
    inner: Sha256,
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> [u8; DIGEST_LEN] {
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&self.inner.finalize());
        digest
    }
}

/// Compare two byte strings without leaking the position of the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// SHA-256 of a file's contents, streamed one disk page at a time.
///
/// Used as the content identifier for plaintext deduplication.
pub fn sha256_file(path: &Path) -> CryptoResult<[u8; DIGEST_LEN]> {
    let mut file = std::fs::File::open(path)?;
    let mut digest = DigestAccumulator::new();
    let mut buf = vec![0u8; PAGE_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize())
}
