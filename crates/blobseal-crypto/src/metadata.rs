//! Encryption metadata: the side-channel that travels with every container
//!
//! JSON form (binary fields as standard base64):
//! ```text
//! {"key":"<64 bytes>","digest":"<32 bytes>","length":1234,"plaintext_length":1100}
//! ```
//! `digest`, `length` and `plaintext_length` are omitted when absent.

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::CombinedKey;
use crate::DIGEST_LEN;

/// Produced once at encryption time, consumed read-only at decryption time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// AES key || HMAC key
    #[serde(with = "key_b64")]
    pub key: CombinedKey,
    /// SHA-256 over IV || ciphertext || MAC
    #[serde(default, with = "digest_b64", skip_serializing_if = "Option::is_none")]
    pub digest: Option<[u8; DIGEST_LEN]>,
    /// Total container length in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    /// Unpadded plaintext length claimed by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext_length: Option<u64>,
}

impl EncryptionMetadata {
    /// Metadata carrying only a key; decryption trusts PKCS#7 alone and skips the digest.
    pub fn with_key(key: CombinedKey) -> Self {
        Self {
            key,
            digest: None,
            length: None,
            plaintext_length: None,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Metadata(format!("serialization: {e}")))
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CryptoError::Metadata(format!("deserialization: {e}")))
    }
}

/// How the decryptor finds the end of the plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingStrategy {
    /// The sender padded with extra bytes before PKCS#7 and told us the true
    /// length; everything after it is discarded.
    CustomPadding { plaintext_length: u64 },
    /// Only PKCS#7 padding was applied; every byte that survives unpadding is
    /// plaintext.
    Pkcs7Only,
}

impl PaddingStrategy {
    pub fn from_metadata(metadata: &EncryptionMetadata) -> Self {
        match metadata.plaintext_length {
            Some(plaintext_length) => PaddingStrategy::CustomPadding { plaintext_length },
            None => PaddingStrategy::Pkcs7Only,
        }
    }
}

fn b64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

fn b64_decode(s: &str) -> Result<Vec<u8>, String> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(s).map_err(|e| format!("base64 decode: {e}"))
}

mod key_b64 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use zeroize::Zeroize;

    use crate::keys::CombinedKey;

    pub fn serialize<S: Serializer>(key: &CombinedKey, serializer: S) -> Result<S::Ok, S::Error> {
        let mut encoded = super::b64_encode(key.to_bytes().as_slice());
        let result = serializer.serialize_str(&encoded);
        encoded.zeroize();
        result
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CombinedKey, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let mut bytes = super::b64_decode(&encoded).map_err(D::Error::custom)?;
        let key = CombinedKey::from_slice(&bytes).map_err(D::Error::custom);
        bytes.zeroize();
        key
    }
}

mod digest_b64 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::DIGEST_LEN;

    pub fn serialize<S: Serializer>(
        digest: &Option<[u8; DIGEST_LEN]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match digest {
            Some(d) => serializer.serialize_some(&super::b64_encode(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; DIGEST_LEN]>, D::Error> {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let bytes = super::b64_decode(&encoded).map_err(D::Error::custom)?;
        let digest: [u8; DIGEST_LEN] = bytes.as_slice().try_into().map_err(|_| {
            D::Error::custom(format!(
                "digest must be {DIGEST_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Some(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::COMBINED_KEY_LEN;

    #[test]
    fn test_metadata_json_roundtrip() {
        let metadata = EncryptionMetadata {
            key: CombinedKey::generate(),
            digest: Some([0xCDu8; DIGEST_LEN]),
            length: Some(640),
            plaintext_length: Some(500),
        };

        let bytes = metadata.to_bytes().unwrap();
        let restored = EncryptionMetadata::from_bytes(&bytes).unwrap();

        assert_eq!(*restored.key.to_bytes(), *metadata.key.to_bytes());
        assert_eq!(restored.digest, metadata.digest);
        assert_eq!(restored.length, Some(640));
        assert_eq!(restored.plaintext_length, Some(500));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let metadata = EncryptionMetadata::with_key(CombinedKey::from_bytes([1u8; COMBINED_KEY_LEN]));
        let json = String::from_utf8(metadata.to_bytes().unwrap()).unwrap();

        assert!(json.contains("\"key\""));
        assert!(!json.contains("digest"));
        assert!(!json.contains("plaintext_length"));

        let restored = EncryptionMetadata::from_bytes(json.as_bytes()).unwrap();
        assert!(restored.digest.is_none());
        assert_eq!(PaddingStrategy::from_metadata(&restored), PaddingStrategy::Pkcs7Only);
    }

    #[test]
    fn test_rejects_short_key() {
        let json = format!(r#"{{"key":"{}"}}"#, b64_encode(&[0u8; 32]));
        let err = EncryptionMetadata::from_bytes(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("invalid key length"), "{err}");
    }

    #[test]
    fn test_rejects_wrong_digest_length() {
        let json = format!(
            r#"{{"key":"{}","digest":"{}"}}"#,
            b64_encode(&[0u8; COMBINED_KEY_LEN]),
            b64_encode(&[0u8; 20])
        );
        assert!(EncryptionMetadata::from_bytes(json.as_bytes()).is_err());
    }

    #[test]
    fn test_padding_strategy_from_metadata() {
        let mut metadata = EncryptionMetadata::with_key(CombinedKey::generate());
        assert_eq!(PaddingStrategy::from_metadata(&metadata), PaddingStrategy::Pkcs7Only);

        metadata.plaintext_length = Some(42);
        assert_eq!(
            PaddingStrategy::from_metadata(&metadata),
            PaddingStrategy::CustomPadding { plaintext_length: 42 }
        );
    }
}
