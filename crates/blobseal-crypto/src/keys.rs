//! Combined attachment key (AES-256 key || HMAC-SHA256 key) and IV generation

use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::{AES_KEY_LEN, COMBINED_KEY_LEN, HMAC_KEY_LEN, IV_LEN};

/// A 64-byte attachment key: bytes 0..32 are the AES-256 key, bytes 32..64 the
/// HMAC-SHA256 key. Always split at the same offset. Zeroized on drop.
#[derive(Clone)]
pub struct CombinedKey {
    aes: [u8; AES_KEY_LEN],
    hmac: [u8; HMAC_KEY_LEN],
}

impl CombinedKey {
    pub fn from_bytes(bytes: [u8; COMBINED_KEY_LEN]) -> Self {
        let mut aes = [0u8; AES_KEY_LEN];
        let mut hmac = [0u8; HMAC_KEY_LEN];
        aes.copy_from_slice(&bytes[..AES_KEY_LEN]);
        hmac.copy_from_slice(&bytes[AES_KEY_LEN..]);
        let mut bytes = bytes;
        bytes.zeroize();
        Self { aes, hmac }
    }

    /// Build a key from untrusted input; anything other than 64 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != COMBINED_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        let mut aes = [0u8; AES_KEY_LEN];
        let mut hmac = [0u8; HMAC_KEY_LEN];
        aes.copy_from_slice(&bytes[..AES_KEY_LEN]);
        hmac.copy_from_slice(&bytes[AES_KEY_LEN..]);
        Ok(Self { aes, hmac })
    }

    /// Generate a random key from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut aes = [0u8; AES_KEY_LEN];
        let mut hmac = [0u8; HMAC_KEY_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut aes);
        rng.fill_bytes(&mut hmac);
        Self { aes, hmac }
    }

    /// The concatenated 64-byte form, as carried in metadata.
    pub fn to_bytes(&self) -> Zeroizing<[u8; COMBINED_KEY_LEN]> {
        let mut out = Zeroizing::new([0u8; COMBINED_KEY_LEN]);
        out[..AES_KEY_LEN].copy_from_slice(&self.aes);
        out[AES_KEY_LEN..].copy_from_slice(&self.hmac);
        out
    }

    pub fn aes_key(&self) -> &[u8; AES_KEY_LEN] {
        &self.aes
    }

    pub fn hmac_key(&self) -> &[u8; HMAC_KEY_LEN] {
        &self.hmac
    }
}

impl Drop for CombinedKey {
    fn drop(&mut self) {
        self.aes.zeroize();
        self.hmac.zeroize();
    }
}

impl std::fmt::Debug for CombinedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 16-byte CBC IV.
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let k1 = CombinedKey::generate();
        let k2 = CombinedKey::generate();
        assert_ne!(*k1.to_bytes(), *k2.to_bytes(), "random keys must differ");
    }

    #[test]
    fn test_key_split_offsets() {
        let mut bytes = [0u8; COMBINED_KEY_LEN];
        bytes[..AES_KEY_LEN].fill(0xAA);
        bytes[AES_KEY_LEN..].fill(0xBB);
        let key = CombinedKey::from_bytes(bytes);

        assert_eq!(key.aes_key(), &[0xAAu8; AES_KEY_LEN]);
        assert_eq!(key.hmac_key(), &[0xBBu8; HMAC_KEY_LEN]);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        for len in [0usize, 32, 63, 65, 128] {
            let result = CombinedKey::from_slice(&vec![1u8; len]);
            assert!(
                matches!(result, Err(CryptoError::InvalidKeyLength(n)) if n == len),
                "length {len} must be rejected"
            );
        }
        let key = CombinedKey::from_slice(&[1u8; COMBINED_KEY_LEN]).unwrap();
        assert_eq!(*key.to_bytes(), [1u8; COMBINED_KEY_LEN]);
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let key = CombinedKey::from_bytes([0x5Au8; COMBINED_KEY_LEN]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("90"), "no raw key bytes in debug output");
    }
}
