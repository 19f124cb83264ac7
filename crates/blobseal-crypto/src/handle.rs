//! Seekable decrypting handle over a container
//!
//! Presents the plaintext as a read-only virtual file: `offset`, `seek` and
//! `read` address plaintext bytes, never container bytes.
//!
//! Random access relies on CBC algebra: decrypting ciphertext block `i` needs
//! only block `i` and block `i - 1`. A seek therefore reads the block preceding
//! the target and uses it as the IV of a fresh cipher context. The container's
//! IV occupies the first 16 bytes, so plaintext block `n` is container block
//! `n + 1` and is chained from container block `n`.
//!
//! No integrity check happens here. Callers that need one go through
//! [`crate::decrypt`] (or trust an earlier validation of the same container).

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;
use zeroize::Zeroizing;

use crate::cipher::{pkcs7_pad_len, BlockCipherContext, Chaining, Direction, Padding};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::CombinedKey;
use crate::metadata::{EncryptionMetadata, PaddingStrategy};
use crate::{AES_KEY_LEN, BLOCK_LEN, CRYPTO_OVERHEAD, IV_LEN, MAC_LEN, PAGE_SIZE};

/// At most one block of decrypted plaintext left over from the previous read.
/// `len == 0` means the contents are stale.
#[derive(Default)]
struct PlaintextBuffer {
    bytes: [u8; BLOCK_LEN],
    start: usize,
    len: usize,
}

impl PlaintextBuffer {
    fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }

    fn drain_into(&mut self, out: &mut Vec<u8>, max: usize) {
        let n = self.len.min(max);
        out.extend_from_slice(&self.bytes[self.start..self.start + n]);
        self.start += n;
        self.len -= n;
        if self.len == 0 {
            self.start = 0;
        }
    }

    fn store(&mut self, bytes: &[u8]) {
        debug_assert!(self.len == 0 && bytes.len() <= BLOCK_LEN);
        self.bytes[..bytes.len()].copy_from_slice(bytes);
        self.start = 0;
        self.len = bytes.len();
    }
}

impl Drop for PlaintextBuffer {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.bytes);
    }
}

/// A read-only handle to an encrypted container that reads out plaintext.
///
/// Not safe for concurrent use; distinct handles over distinct sources are
/// independent.
pub struct EncryptedFileHandle<R> {
    source: R,
    aes_key: Zeroizing<[u8; AES_KEY_LEN]>,
    iv: [u8; IV_LEN],
    mac: [u8; MAC_LEN],
    strategy: PaddingStrategy,
    /// Plaintext length excluding all padding; reads are truncated here
    plaintext_length: u64,
    /// Excluding IV and MAC, including all padding
    ciphertext_length: u64,
    virtual_offset: u64,
    /// Position of `source` in container bytes
    cursor: u64,
    /// `None` once the final block has been finalized
    cipher: Option<BlockCipherContext>,
    buffer: PlaintextBuffer,
}

impl<R: Read + Seek> EncryptedFileHandle<R> {
    /// Open a container, reading its IV and MAC and working out where the
    /// plaintext ends.
    ///
    /// With [`PaddingStrategy::Pkcs7Only`] the plaintext length is derived
    /// without decrypting the whole container: only the last ciphertext block
    /// is decrypted (raw, in ECB) and its final byte XORed with the final byte
    /// of the block before it to recover the PKCS#7 pad length.
    pub fn open(mut source: R, key: &CombinedKey, strategy: PaddingStrategy) -> CryptoResult<Self> {
        let container_length = source.seek(SeekFrom::End(0))?;
        if container_length < CRYPTO_OVERHEAD as u64 {
            return Err(CryptoError::ContainerTooShort(container_length));
        }
        let ciphertext_length = container_length - CRYPTO_OVERHEAD as u64;
        if ciphertext_length == 0 || ciphertext_length % BLOCK_LEN as u64 != 0 {
            return Err(CryptoError::CipherFailure(format!(
                "ciphertext length {ciphertext_length} is not a positive multiple of {BLOCK_LEN}"
            )));
        }

        let mut mac = [0u8; MAC_LEN];
        source.seek(SeekFrom::Start(container_length - MAC_LEN as u64))?;
        source.read_exact(&mut mac)?;

        let aes_key = Zeroizing::new(*key.aes_key());

        let plaintext_length = match strategy {
            PaddingStrategy::CustomPadding { plaintext_length } => plaintext_length,
            PaddingStrategy::Pkcs7Only => {
                let pad = peek_pkcs7_pad_len(&mut source, &aes_key, container_length)?;
                ciphertext_length - pad as u64
            }
        };

        let mut iv = [0u8; IV_LEN];
        source.seek(SeekFrom::Start(0))?;
        source.read_exact(&mut iv)?;

        debug!(
            container_bytes = container_length,
            plaintext_bytes = plaintext_length,
            strategy = ?strategy,
            "opened encrypted handle"
        );

        Ok(Self {
            cipher: Some(BlockCipherContext::new(
                Direction::Decrypt,
                Padding::Pkcs7,
                &aes_key,
                Chaining::Cbc(iv),
            )),
            source,
            aes_key,
            iv,
            mac,
            strategy,
            plaintext_length,
            ciphertext_length,
            virtual_offset: 0,
            cursor: IV_LEN as u64,
            buffer: PlaintextBuffer::default(),
        })
    }

    /// Length of the virtual plaintext file.
    pub fn plaintext_length(&self) -> u64 {
        self.plaintext_length
    }

    /// Current position within the virtual plaintext file.
    pub fn offset(&self) -> u64 {
        self.virtual_offset
    }

    pub fn padding_strategy(&self) -> PaddingStrategy {
        self.strategy
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// The MAC stored at the end of the container (not verified by the handle).
    pub fn mac(&self) -> &[u8; MAC_LEN] {
        &self.mac
    }

    /// Move to `to` within the plaintext. Seeking to exactly the end is allowed.
    pub fn seek(&mut self, to: u64) -> CryptoResult<()> {
        self.reposition(to)
    }

    /// Read up to `up_to` plaintext bytes from the current offset.
    /// Returns an empty buffer at end of file.
    pub fn read(&mut self, up_to: usize) -> CryptoResult<Vec<u8>> {
        self.read_with(up_to, |_| {})
    }

    fn ciphertext_end(&self) -> u64 {
        IV_LEN as u64 + self.ciphertext_length
    }

    fn reposition(&mut self, to: u64) -> CryptoResult<()> {
        if to > self.plaintext_length {
            return Err(CryptoError::SeekPastEndOfFile {
                offset: to,
                length: self.plaintext_length,
            });
        }
        self.buffer.clear();

        let block_len = BLOCK_LEN as u64;
        let offset_in_block = to % block_len;
        // Container offset of the block preceding the target block.
        let chain_offset = to - offset_in_block;
        let end = self.ciphertext_end();

        self.virtual_offset = chain_offset;
        if chain_offset + block_len >= end {
            // Only reachable when the sender's claimed length overstates the
            // ciphertext; there is nothing left to decrypt.
            self.source.seek(SeekFrom::Start(end))?;
            self.cursor = end;
            self.cipher = None;
        } else {
            self.source.seek(SeekFrom::Start(chain_offset))?;
            let mut chain = [0u8; BLOCK_LEN];
            self.source.read_exact(&mut chain)?;
            self.cursor = chain_offset + block_len;
            self.cipher = Some(BlockCipherContext::new(
                Direction::Decrypt,
                Padding::Pkcs7,
                &self.aes_key,
                Chaining::Cbc(chain),
            ));
        }

        // Decrypt the owning block and drop the bytes before the target; the
        // rest stays buffered for the next read.
        if offset_in_block > 0 {
            self.read_with(offset_in_block as usize, |_| {})?;
        }
        self.virtual_offset = to;
        Ok(())
    }

    /// Read up to `up_to` plaintext bytes, passing every ciphertext block read
    /// from the source to `on_ciphertext` before it is decrypted.
    pub(crate) fn read_with<F: FnMut(&[u8])>(
        &mut self,
        up_to: usize,
        mut on_ciphertext: F,
    ) -> CryptoResult<Vec<u8>> {
        if self.virtual_offset >= self.plaintext_length {
            return Ok(Vec::new());
        }
        let wanted = (up_to as u64).min(self.plaintext_length - self.virtual_offset) as usize;
        let mut out = Vec::with_capacity(wanted);

        self.buffer.drain_into(&mut out, wanted);

        let end = self.ciphertext_end();
        while out.len() < wanted {
            let plaintext = if self.cursor < end {
                let Some(cipher) = self.cipher.as_mut() else {
                    break;
                };
                let mut block = [0u8; BLOCK_LEN];
                self.source.read_exact(&mut block)?;
                self.cursor += BLOCK_LEN as u64;
                on_ciphertext(&block);
                cipher.update(&block)
            } else {
                // The true last block: finalize so PKCS#7 padding is stripped.
                let Some(cipher) = self.cipher.take() else {
                    break;
                };
                cipher.finalize()?
            };

            let take = plaintext.len().min(wanted - out.len());
            out.extend_from_slice(&plaintext[..take]);
            if take < plaintext.len() {
                self.buffer.store(&plaintext[take..]);
            }
        }

        self.virtual_offset += out.len() as u64;
        Ok(out)
    }

    /// Feed every ciphertext byte not yet read (custom padding past the
    /// plaintext end, the held-back final block) to `on_ciphertext`, then
    /// return the container's stored MAC. Consumes the handle: its source
    /// position no longer matches its decryption state afterwards.
    pub(crate) fn drain_remaining_ciphertext<F: FnMut(&[u8])>(
        mut self,
        chunk_size: usize,
        mut on_ciphertext: F,
    ) -> CryptoResult<[u8; MAC_LEN]> {
        let end = self.ciphertext_end();
        let mut chunk = vec![0u8; chunk_size.max(BLOCK_LEN)];
        while self.cursor < end {
            let n = (end - self.cursor).min(chunk.len() as u64) as usize;
            self.source.read_exact(&mut chunk[..n])?;
            on_ciphertext(&chunk[..n]);
            self.cursor += n as u64;
        }
        Ok(self.mac)
    }
}

/// Recover the PKCS#7 pad length from the last two ciphertext blocks.
fn peek_pkcs7_pad_len<R: Read + Seek>(
    source: &mut R,
    aes_key: &[u8; AES_KEY_LEN],
    container_length: u64,
) -> CryptoResult<usize> {
    // Skip the MAC, then back up over the padding block and the block before it
    // (which may be the IV itself).
    let offset = container_length - MAC_LEN as u64 - 2 * BLOCK_LEN as u64;
    source.seek(SeekFrom::Start(offset))?;

    let mut previous = [0u8; BLOCK_LEN];
    let mut last = [0u8; BLOCK_LEN];
    source.read_exact(&mut previous)?;
    source.read_exact(&mut last)?;

    // ECB so the padding bytes come back untouched; we do the CBC XOR ourselves.
    let mut ecb = BlockCipherContext::new(Direction::Decrypt, Padding::None, aes_key, Chaining::Ecb);
    let mut raw = ecb.update(&last);
    raw.extend(ecb.finalize()?);

    let pad_byte = raw[BLOCK_LEN - 1] ^ previous[BLOCK_LEN - 1];
    pkcs7_pad_len(pad_byte)
}

impl<R: Read + Seek> Read for EncryptedFileHandle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.read_with(buf.len(), |_| {}).map_err(into_io_error)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
}

impl<R: Read + Seek> Seek for EncryptedFileHandle<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.plaintext_length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.virtual_offset.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")
        })?;
        self.reposition(target).map_err(into_io_error)?;
        Ok(target)
    }
}

fn into_io_error(err: CryptoError) -> io::Error {
    match err {
        CryptoError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Open a seekable handle over any container source, choosing the padding
/// strategy from `metadata`. No integrity check is performed.
pub fn open_seekable<R: Read + Seek>(
    source: R,
    metadata: &EncryptionMetadata,
) -> CryptoResult<EncryptedFileHandle<R>> {
    EncryptedFileHandle::open(source, &metadata.key, PaddingStrategy::from_metadata(metadata))
}

/// Open an attachment container whose sender supplied the unpadded length.
pub fn open_attachment_handle(
    path: &Path,
    plaintext_length: u64,
    key: &CombinedKey,
) -> CryptoResult<EncryptedFileHandle<BufReader<File>>> {
    let file = BufReader::with_capacity(PAGE_SIZE, File::open(path)?);
    EncryptedFileHandle::open(file, key, PaddingStrategy::CustomPadding { plaintext_length })
}

/// Open a container that uses PKCS#7 padding only.
pub fn open_file_handle(
    path: &Path,
    key: &CombinedKey,
) -> CryptoResult<EncryptedFileHandle<BufReader<File>>> {
    let file = BufReader::with_capacity(PAGE_SIZE, File::open(path)?);
    EncryptedFileHandle::open(file, key, PaddingStrategy::Pkcs7Only)
}
