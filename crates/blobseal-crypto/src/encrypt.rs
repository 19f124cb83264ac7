//! Streaming encryptor
//!
//! Output layout:
//! ```text
//! [16 bytes: IV][AES-256-CBC(plaintext || zero padding?) with PKCS#7][32 bytes: HMAC-SHA256]
//! ```
//! The IV is sent in the clear but covered by both the MAC and the digest.
//! The MAC covers IV || ciphertext; the digest covers IV || ciphertext || MAC.
//!
//! Plaintext is consumed one page at a time, so memory use does not grow with
//! input size.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::cipher::{BlockCipherContext, Chaining, Direction, Padding};
use crate::error::{CryptoError, CryptoResult};
use crate::handle::EncryptedFileHandle;
use crate::keys::{random_iv, CombinedKey};
use crate::mac::{DigestAccumulator, MacAccumulator};
use crate::metadata::EncryptionMetadata;
use crate::padding::padded_size;
use crate::{IV_LEN, PAGE_SIZE};

/// Encryption parameters. The default is a random key and IV, PKCS#7 padding
/// only, and page-sized reads.
#[derive(Debug, Clone)]
pub struct EncryptOptions {
    /// Key to encrypt with; a random one is generated when `None`
    pub key: Option<CombinedKey>,
    /// IV to use; a random one is generated when `None`
    pub iv: Option<[u8; IV_LEN]>,
    /// Zero-pad the plaintext up to its size bucket before PKCS#7
    pub extra_padding: bool,
    /// Plaintext read size
    pub page_size: usize,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            key: None,
            iv: None,
            extra_padding: false,
            page_size: PAGE_SIZE,
        }
    }
}

impl EncryptOptions {
    pub fn with_key(key: CombinedKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn extra_padding(mut self, enabled: bool) -> Self {
        self.extra_padding = enabled;
        self
    }

    /// Use a caller-supplied IV instead of a random one.
    pub fn iv_from_slice(mut self, iv: &[u8]) -> CryptoResult<Self> {
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvLength(iv.len()))?;
        self.iv = Some(iv);
        Ok(self)
    }
}

/// Everything emitted goes through here so the MAC, digest and sink see the
/// same bytes in the same order.
struct ContainerWriter<W> {
    sink: W,
    mac: MacAccumulator,
    digest: DigestAccumulator,
    emitted: u64,
}

impl<W: Write> ContainerWriter<W> {
    fn emit(&mut self, bytes: &[u8]) -> CryptoResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.mac.update(bytes);
        self.digest.update(bytes);
        self.sink.write_all(bytes)?;
        self.emitted += bytes.len() as u64;
        Ok(())
    }
}

/// Encrypt everything readable from `input` into a container written to `output`.
///
/// Any error aborts the whole operation; whatever was already written to
/// `output` is not a valid container.
pub fn encrypt_stream<R: Read, W: Write>(
    mut input: R,
    output: W,
    options: EncryptOptions,
) -> CryptoResult<EncryptionMetadata> {
    let key = options.key.unwrap_or_else(CombinedKey::generate);
    let iv = options.iv.unwrap_or_else(random_iv);

    let mut cipher = BlockCipherContext::new(
        Direction::Encrypt,
        Padding::Pkcs7,
        key.aes_key(),
        Chaining::Cbc(iv),
    );
    let mut writer = ContainerWriter {
        sink: output,
        mac: MacAccumulator::new(key.hmac_key())?,
        digest: DigestAccumulator::new(),
        emitted: 0,
    };

    writer.emit(&iv)?;

    let mut unpadded_length: u64 = 0;
    let mut page = vec![0u8; options.page_size.max(1)];
    loop {
        let n = match input.read(&mut page) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        unpadded_length += n as u64;
        let ciphertext = cipher.update(&page[..n]);
        writer.emit(&ciphertext)?;
    }

    if options.extra_padding {
        let padded_length = padded_size(unpadded_length);
        if padded_length > unpadded_length {
            let mut remaining = padded_length - unpadded_length;
            page.fill(0);
            while remaining > 0 {
                let take = remaining.min(page.len() as u64) as usize;
                let ciphertext = cipher.update(&page[..take]);
                writer.emit(&ciphertext)?;
                remaining -= take as u64;
            }
        }
    }

    let final_block = cipher.finalize()?;
    writer.emit(&final_block)?;

    let ContainerWriter {
        mut sink,
        mac,
        mut digest,
        emitted,
    } = writer;
    let tag = mac.finalize();
    digest.update(&tag);
    sink.write_all(&tag)?;
    sink.flush()?;
    let total_length = emitted + tag.len() as u64;
    let digest = digest.finalize();

    debug!(
        plaintext_bytes = unpadded_length,
        container_bytes = total_length,
        extra_padding = options.extra_padding,
        "encrypted stream"
    );

    Ok(EncryptionMetadata {
        key,
        digest: Some(digest),
        length: Some(total_length),
        plaintext_length: Some(unpadded_length),
    })
}

/// Encrypt an in-memory buffer, returning the container bytes and metadata.
pub fn encrypt(data: &[u8], options: EncryptOptions) -> CryptoResult<(Vec<u8>, EncryptionMetadata)> {
    let mut container = Vec::with_capacity(data.len() + 2 * IV_LEN + crate::MAC_LEN);
    let metadata = encrypt_stream(data, &mut container, options)?;
    Ok((container, metadata))
}

/// Encrypt a file with PKCS#7 padding only.
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    key: Option<CombinedKey>,
) -> CryptoResult<EncryptionMetadata> {
    let source = File::open(input)?;
    write_container_file(output, |sink| {
        encrypt_stream(source, sink, EncryptOptions { key, ..EncryptOptions::default() })
    })
}

/// Encrypt an attachment file: PKCS#7 plus zero padding up to the size bucket.
pub fn encrypt_attachment(
    input: &Path,
    output: &Path,
    key: Option<CombinedKey>,
) -> CryptoResult<EncryptionMetadata> {
    let source = File::open(input)?;
    write_container_file(output, |sink| {
        encrypt_stream(
            source,
            sink,
            EncryptOptions {
                key,
                extra_padding: true,
                ..EncryptOptions::default()
            },
        )
    })
}

/// Re-encrypt the plaintext behind an open handle into a new container file,
/// starting from the handle's current offset.
pub fn reencrypt<R: Read + Seek>(
    handle: &mut EncryptedFileHandle<R>,
    output: &Path,
    key: Option<CombinedKey>,
    extra_padding: bool,
) -> CryptoResult<EncryptionMetadata> {
    write_container_file(output, |sink| {
        encrypt_stream(
            handle,
            sink,
            EncryptOptions {
                key,
                extra_padding,
                ..EncryptOptions::default()
            },
        )
    })
}

/// Create `output`, run `encrypt` against it, and remove it again if anything fails.
fn write_container_file<F>(output: &Path, encrypt: F) -> CryptoResult<EncryptionMetadata>
where
    F: FnOnce(&mut BufWriter<File>) -> CryptoResult<EncryptionMetadata>,
{
    let mut sink = BufWriter::with_capacity(PAGE_SIZE, File::create(output)?);
    let result = encrypt(&mut sink).and_then(|metadata| {
        sink.flush()?;
        Ok(metadata)
    });
    if result.is_err() {
        drop(sink);
        if let Err(e) = std::fs::remove_file(output) {
            warn!(path = %output.display(), "failed to remove partial container: {e}");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BLOCK_LEN, CRYPTO_OVERHEAD, MAC_LEN};

    fn container_len(plaintext_len: usize) -> usize {
        IV_LEN + (plaintext_len / BLOCK_LEN + 1) * BLOCK_LEN + MAC_LEN
    }

    #[test]
    fn test_container_layout() {
        let iv = [0x11u8; IV_LEN];
        let options = EncryptOptions {
            iv: Some(iv),
            ..EncryptOptions::default()
        };
        let (container, metadata) = encrypt(b"hello, attachment", options).unwrap();

        assert_eq!(container.len(), container_len(17));
        assert_eq!(&container[..IV_LEN], &iv, "IV is stored in the clear");
        assert_eq!(metadata.length, Some(container.len() as u64));
        assert_eq!(metadata.plaintext_length, Some(17));
    }

    #[test]
    fn test_mac_and_digest_cover_container() {
        let (container, metadata) = encrypt(&[5u8; 100], EncryptOptions::default()).unwrap();
        let split = container.len() - MAC_LEN;

        let mut mac = MacAccumulator::new(metadata.key.hmac_key()).unwrap();
        mac.update(&container[..split]);
        assert_eq!(mac.finalize().as_slice(), &container[split..]);

        let mut digest = DigestAccumulator::new();
        digest.update(&container);
        assert_eq!(Some(digest.finalize()), metadata.digest);
    }

    #[test]
    fn test_empty_plaintext_is_one_block() {
        let (container, metadata) = encrypt(b"", EncryptOptions::default()).unwrap();
        assert_eq!(container.len(), CRYPTO_OVERHEAD + BLOCK_LEN);
        assert_eq!(metadata.plaintext_length, Some(0));
    }

    #[test]
    fn test_extra_padding_reaches_bucket() {
        let options = EncryptOptions::default().extra_padding(true);
        let (container, metadata) = encrypt(&[9u8; 10], options).unwrap();

        // 10 bytes pads to 541, then PKCS#7 rounds up to the next block.
        assert_eq!(container.len(), container_len(541));
        assert_eq!(metadata.plaintext_length, Some(10));
    }

    #[test]
    fn test_iv_from_slice_checks_length() {
        let options = EncryptOptions::default().iv_from_slice(&[7u8; IV_LEN]).unwrap();
        let (container, _) = encrypt(b"x", options).unwrap();
        assert_eq!(&container[..IV_LEN], &[7u8; IV_LEN]);

        for len in [0usize, 12, 17, 32] {
            let err = EncryptOptions::default().iv_from_slice(&vec![0u8; len]).unwrap_err();
            assert!(matches!(err, CryptoError::InvalidIvLength(n) if n == len));
        }
    }

    #[test]
    fn test_same_key_and_iv_is_deterministic() {
        let key = CombinedKey::from_bytes([3u8; crate::COMBINED_KEY_LEN]);
        let options = EncryptOptions {
            key: Some(key),
            iv: Some([4u8; IV_LEN]),
            ..EncryptOptions::default()
        };
        let (a, meta_a) = encrypt(b"deterministic", options.clone()).unwrap();
        let (b, meta_b) = encrypt(b"deterministic", options).unwrap();
        assert_eq!(a, b);
        assert_eq!(meta_a.digest, meta_b.digest);
    }

    #[test]
    fn test_random_iv_per_encryption() {
        let key = CombinedKey::generate();
        let (a, _) = encrypt(b"same", EncryptOptions::with_key(key.clone())).unwrap();
        let (b, _) = encrypt(b"same", EncryptOptions::with_key(key)).unwrap();
        assert_ne!(&a[..IV_LEN], &b[..IV_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_small_pages_match_single_page() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        let key = CombinedKey::generate();
        let base = EncryptOptions {
            key: Some(key),
            iv: Some([0u8; IV_LEN]),
            ..EncryptOptions::default()
        };
        let (whole, _) = encrypt(&data, base.clone()).unwrap();
        let (paged, _) = encrypt(&data, EncryptOptions { page_size: 7, ..base }).unwrap();
        assert_eq!(whole, paged);
    }
}
