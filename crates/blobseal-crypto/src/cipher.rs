//! One-shot AES-256 block cipher context (CBC or ECB, PKCS#7 or no padding)
//!
//! The context is fed with `update` any number of times and then consumed by
//! `finalize`. Consuming `self` makes reuse after finalization a compile error.
//!
//! CBC is done by hand on top of the raw AES block primitive so the chaining
//! block can be chosen freely: the seekable decryptor starts a fresh context at
//! any block boundary by passing the preceding ciphertext block as the IV.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};

use crate::error::{CryptoError, CryptoResult};
use crate::{AES_KEY_LEN, BLOCK_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Pkcs7,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chaining {
    /// CBC with the given IV (or preceding ciphertext block)
    Cbc([u8; BLOCK_LEN]),
    /// Each block independently; used to peek at raw padding bytes
    Ecb,
}

pub struct BlockCipherContext {
    cipher: Aes256,
    direction: Direction,
    padding: Padding,
    /// Previous ciphertext block; `None` in ECB mode
    chain: Option<[u8; BLOCK_LEN]>,
    pending: [u8; BLOCK_LEN],
    pending_len: usize,
}

impl BlockCipherContext {
    pub fn new(
        direction: Direction,
        padding: Padding,
        key: &[u8; AES_KEY_LEN],
        chaining: Chaining,
    ) -> Self {
        let chain = match chaining {
            Chaining::Cbc(iv) => Some(iv),
            Chaining::Ecb => None,
        };
        Self {
            cipher: Aes256::new(key.into()),
            direction,
            padding,
            chain,
            pending: [0u8; BLOCK_LEN],
            pending_len: 0,
        }
    }

    /// Feed input bytes, returning every output block that is now complete.
    ///
    /// When decrypting with PKCS#7 the last full block is held back until more
    /// input arrives or `finalize` runs, since it may be the padding block.
    pub fn update(&mut self, mut input: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(input.len() + BLOCK_LEN);
        loop {
            if self.pending_len == BLOCK_LEN {
                if self.holds_last_block() && input.is_empty() {
                    break;
                }
                let block = self.pending;
                self.pending_len = 0;
                output.extend_from_slice(&self.process_block(block));
            }
            if input.is_empty() {
                break;
            }
            let take = (BLOCK_LEN - self.pending_len).min(input.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&input[..take]);
            self.pending_len += take;
            input = &input[take..];
        }
        output
    }

    /// Flush the context. Emits the PKCS#7 block when encrypting, strips and
    /// validates padding when decrypting.
    pub fn finalize(mut self) -> CryptoResult<Vec<u8>> {
        match (self.direction, self.padding) {
            (Direction::Encrypt, Padding::Pkcs7) => {
                let pad = (BLOCK_LEN - self.pending_len) as u8;
                let mut block = self.pending;
                block[self.pending_len..].fill(pad);
                Ok(self.process_block(block).to_vec())
            }
            (Direction::Decrypt, Padding::Pkcs7) => {
                if self.pending_len != BLOCK_LEN {
                    return Err(CryptoError::CipherFailure(format!(
                        "ciphertext is not block aligned ({} trailing bytes)",
                        self.pending_len
                    )));
                }
                let block = self.process_block(self.pending);
                let pad = pkcs7_pad_len(block[BLOCK_LEN - 1])?;
                if !block[BLOCK_LEN - pad..].iter().all(|&b| b as usize == pad) {
                    return Err(CryptoError::CipherFailure("invalid PKCS#7 padding".into()));
                }
                Ok(block[..BLOCK_LEN - pad].to_vec())
            }
            (_, Padding::None) => {
                if self.pending_len != 0 {
                    return Err(CryptoError::CipherFailure(format!(
                        "input is not a multiple of the block size ({} trailing bytes)",
                        self.pending_len
                    )));
                }
                Ok(Vec::new())
            }
        }
    }

    fn holds_last_block(&self) -> bool {
        self.direction == Direction::Decrypt && self.padding == Padding::Pkcs7
    }

    fn process_block(&mut self, input: [u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        match self.direction {
            Direction::Encrypt => {
                let mut block = Block::from(input);
                if let Some(prev) = self.chain {
                    xor_in_place(&mut block, &prev);
                }
                self.cipher.encrypt_block(&mut block);
                let mut out = [0u8; BLOCK_LEN];
                out.copy_from_slice(&block);
                if self.chain.is_some() {
                    self.chain = Some(out);
                }
                out
            }
            Direction::Decrypt => {
                let mut block = Block::from(input);
                self.cipher.decrypt_block(&mut block);
                if let Some(prev) = self.chain {
                    xor_in_place(&mut block, &prev);
                    self.chain = Some(input);
                }
                let mut out = [0u8; BLOCK_LEN];
                out.copy_from_slice(&block);
                out
            }
        }
    }
}

/// Validate a PKCS#7 pad byte, returning the pad length.
pub(crate) fn pkcs7_pad_len(byte: u8) -> CryptoResult<usize> {
    let pad = byte as usize;
    if pad == 0 || pad > BLOCK_LEN {
        return Err(CryptoError::CipherFailure(format!(
            "invalid PKCS#7 padding length {pad}"
        )));
    }
    Ok(pad)
}

fn xor_in_place(block: &mut Block, other: &[u8; BLOCK_LEN]) {
    for (b, o) in block.iter_mut().zip(other.iter()) {
        *b ^= o;
    }
}
