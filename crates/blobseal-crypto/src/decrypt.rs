//! Verifying decryption driver
//!
//! Streams plaintext out of a container while accumulating the MAC (and the
//! digest, when the metadata has one) over exactly the ciphertext bytes read,
//! then drains whatever the plaintext reads did not touch and checks:
//!
//! ```text
//! 1. HMAC-SHA256(IV || ciphertext)        == stored MAC   else BadMac
//! 2. SHA-256(IV || ciphertext || MAC)     == digest       else BadDigest
//! 3. bytes written                        == claimed len  else IncorrectPlaintextLength
//! ```
//!
//! A tampered container can also surface as a padding or I/O failure before
//! the MAC is reached. Those errors are re-checked against a plain MAC scan
//! of the container so tampering is always reported as `BadMac`.
//!
//! Plaintext is written to the sink before verification completes. File
//! helpers remove their output when any check fails.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{CryptoError, CryptoResult};
use crate::handle::{open_seekable, EncryptedFileHandle};
use crate::keys::CombinedKey;
use crate::mac::{constant_time_eq, DigestAccumulator, MacAccumulator};
use crate::metadata::{EncryptionMetadata, PaddingStrategy};
use crate::{DEFAULT_CHUNK_SIZE, DIGEST_LEN, MAC_LEN, PAGE_SIZE};

#[derive(Debug, Clone)]
pub struct DecryptOptions {
    /// Check the MAC and digest; disabling this only makes sense for
    /// containers that were validated earlier
    pub validate: bool,
    /// Plaintext bytes requested per read from the handle
    pub chunk_size: usize,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            validate: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl DecryptOptions {
    pub fn without_validation() -> Self {
        Self {
            validate: false,
            ..Self::default()
        }
    }
}

struct ContainerVerifier {
    mac: MacAccumulator,
    digest: Option<DigestAccumulator>,
}

impl ContainerVerifier {
    fn new(key: &CombinedKey, with_digest: bool) -> CryptoResult<Self> {
        Ok(Self {
            mac: MacAccumulator::new(key.hmac_key())?,
            digest: with_digest.then(DigestAccumulator::new),
        })
    }

    fn update(&mut self, bytes: &[u8]) {
        self.mac.update(bytes);
        if let Some(digest) = self.digest.as_mut() {
            digest.update(bytes);
        }
    }

    fn verify(
        self,
        stored_mac: &[u8; MAC_LEN],
        expected_digest: Option<&[u8; DIGEST_LEN]>,
    ) -> CryptoResult<()> {
        let tag = self.mac.finalize();
        if !constant_time_eq(&tag, stored_mac) {
            return Err(CryptoError::BadMac);
        }
        if let (Some(mut digest), Some(expected)) = (self.digest, expected_digest) {
            digest.update(&tag);
            if !constant_time_eq(&digest.finalize(), expected) {
                return Err(CryptoError::BadDigest);
            }
        }
        Ok(())
    }
}

/// Decrypt the container in `source` into `output`, verifying it on the way.
/// Returns the number of plaintext bytes written.
pub fn decrypt_stream<R: Read + Seek, W: Write>(
    source: &mut R,
    metadata: &EncryptionMetadata,
    options: &DecryptOptions,
    mut output: W,
) -> CryptoResult<u64> {
    let result = open_seekable(&mut *source, metadata)
        .and_then(|handle| stream_plaintext(handle, metadata, options, &mut output));

    match result {
        Err(err) if options.validate && err.may_mask_bad_mac() => {
            Err(prefer_bad_mac(source, &metadata.key, err))
        }
        other => other,
    }
}

fn stream_plaintext<R: Read + Seek, W: Write>(
    mut handle: EncryptedFileHandle<R>,
    metadata: &EncryptionMetadata,
    options: &DecryptOptions,
    output: &mut W,
) -> CryptoResult<u64> {
    let chunk_size = options.chunk_size.max(1);
    let mut verifier = if options.validate {
        let mut verifier = ContainerVerifier::new(&metadata.key, metadata.digest.is_some())?;
        verifier.update(handle.iv());
        Some(verifier)
    } else {
        None
    };

    let mut written: u64 = 0;
    loop {
        let plaintext = handle.read_with(chunk_size, |ciphertext| {
            if let Some(verifier) = verifier.as_mut() {
                verifier.update(ciphertext);
            }
        })?;
        if plaintext.is_empty() {
            break;
        }
        output.write_all(&plaintext)?;
        written += plaintext.len() as u64;
    }
    output.flush()?;

    let strategy = handle.padding_strategy();
    if let Some(mut verifier) = verifier {
        let stored_mac = handle
            .drain_remaining_ciphertext(chunk_size, |ciphertext| verifier.update(ciphertext))?;
        verifier.verify(&stored_mac, metadata.digest.as_ref())?;
    }

    if let PaddingStrategy::CustomPadding { plaintext_length } = strategy {
        if written != plaintext_length {
            return Err(CryptoError::IncorrectPlaintextLength {
                expected: plaintext_length,
                actual: written,
            });
        }
    }

    debug!(plaintext_bytes = written, validated = options.validate, "decrypted stream");
    Ok(written)
}

/// Return `BadMac` instead of `original` if the container's MAC does not match.
fn prefer_bad_mac<R: Read + Seek>(
    source: &mut R,
    key: &CombinedKey,
    original: CryptoError,
) -> CryptoError {
    match container_mac_matches(source, key) {
        Ok(true) => original,
        Ok(false) => {
            debug!(error = %original, "decryption failed on a container with a bad mac");
            CryptoError::BadMac
        }
        Err(e) => {
            debug!(error = %e, "mac re-check failed");
            original
        }
    }
}

fn container_mac_matches<R: Read + Seek>(source: &mut R, key: &CombinedKey) -> CryptoResult<bool> {
    let container_length = source.seek(SeekFrom::End(0))?;
    if container_length < MAC_LEN as u64 {
        return Ok(false);
    }
    source.seek(SeekFrom::Start(0))?;

    let mut mac = MacAccumulator::new(key.hmac_key())?;
    let mut remaining = container_length - MAC_LEN as u64;
    let mut chunk = vec![0u8; PAGE_SIZE];
    while remaining > 0 {
        let n = remaining.min(chunk.len() as u64) as usize;
        source.read_exact(&mut chunk[..n])?;
        mac.update(&chunk[..n]);
        remaining -= n as u64;
    }

    let mut stored = [0u8; MAC_LEN];
    source.read_exact(&mut stored)?;
    Ok(constant_time_eq(&mac.finalize(), &stored))
}

/// Decrypt and verify an in-memory container.
pub fn decrypt_all(container: &[u8], metadata: &EncryptionMetadata) -> CryptoResult<Vec<u8>> {
    let mut plaintext = Vec::with_capacity(container.len());
    decrypt_stream(
        &mut Cursor::new(container),
        metadata,
        &DecryptOptions::default(),
        &mut plaintext,
    )?;
    Ok(plaintext)
}

/// True when the container decrypts cleanly and passes every check.
pub fn validate(container: &[u8], metadata: &EncryptionMetadata) -> bool {
    validate_source(&mut Cursor::new(container), metadata)
}

fn validate_source<R: Read + Seek>(source: &mut R, metadata: &EncryptionMetadata) -> bool {
    match decrypt_stream(source, metadata, &DecryptOptions::default(), io::sink()) {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "container failed validation");
            false
        }
    }
}

/// Decrypt and verify `input` into `output`. `output` is removed if any
/// check fails.
pub fn decrypt_file(input: &Path, metadata: &EncryptionMetadata, output: &Path) -> CryptoResult<u64> {
    decrypt_file_with(input, metadata, output, &DecryptOptions::default())
}

/// Decrypt `input` into `output` without checking the MAC or digest.
pub fn decrypt_file_without_validating(
    input: &Path,
    metadata: &EncryptionMetadata,
    output: &Path,
) -> CryptoResult<u64> {
    decrypt_file_with(input, metadata, output, &DecryptOptions::without_validation())
}

/// Decrypt `input` into `output` with explicit options.
pub fn decrypt_file_with(
    input: &Path,
    metadata: &EncryptionMetadata,
    output: &Path,
    options: &DecryptOptions,
) -> CryptoResult<u64> {
    let mut source = BufReader::with_capacity(PAGE_SIZE, File::open(input)?);
    let mut sink = BufWriter::with_capacity(PAGE_SIZE, File::create(output)?);

    let result = decrypt_stream(&mut source, metadata, options, &mut sink);
    if result.is_err() {
        drop(sink);
        if let Err(e) = std::fs::remove_file(output) {
            warn!(path = %output.display(), "failed to remove partial plaintext: {e}");
        }
    }
    result
}

/// Verify a container file without writing plaintext anywhere.
pub fn validate_file(input: &Path, metadata: &EncryptionMetadata) -> bool {
    match File::open(input) {
        Ok(file) => validate_source(&mut BufReader::with_capacity(PAGE_SIZE, file), metadata),
        Err(e) => {
            debug!(path = %input.display(), error = %e, "cannot open container");
            false
        }
    }
}

/// Decrypt an attachment. Attachments must carry a digest.
pub fn decrypt_attachment(
    input: &Path,
    metadata: &EncryptionMetadata,
    output: &Path,
) -> CryptoResult<u64> {
    if metadata.digest.is_none() {
        return Err(CryptoError::MissingDigest);
    }
    decrypt_file(input, metadata, output)
}

/// Verify an attachment. Attachments without a digest never validate.
pub fn validate_attachment(input: &Path, metadata: &EncryptionMetadata) -> bool {
    if metadata.digest.is_none() {
        debug!(path = %input.display(), "attachment metadata has no digest");
        return false;
    }
    validate_file(input, metadata)
}
