//! Ideal proving capability and transcript fixtures for testing.
//!
//! The ideal operator is **not** zero-knowledge: its proofs carry the key
//! material so that verification can recompute the keystream.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    block::{Block, DirectReveal},
    operator::{ChunkInput, ChunkProof, ChunkSecret, OperatorError, ZkOperator},
    redact::REDACTION_CHAR,
    CHACHA_BLOCK_SIZE,
};

/// Key used by the fixtures.
pub const KEY: [u8; 32] = [42u8; 32];
/// IV used by the fixtures.
pub const IV: [u8; 12] = [7u8; 12];

const KEYSTREAM_CONTEXT: &str = "attestor-zk ideal keystream";

/// Computes `len` bytes of keystream starting at the block `counter`.
pub fn keystream(key: &[u8], iv: &[u8], counter: u32, block_size: usize, len: usize) -> Vec<u8> {
    let key = blake3::derive_key(KEYSTREAM_CONTEXT, key);

    let mut keystream = Vec::with_capacity(len.div_ceil(block_size) * block_size);
    let mut counter = counter;
    while keystream.len() < len {
        let mut block = vec![0u8; block_size];
        blake3::Hasher::new_keyed(&key)
            .update(iv)
            .update(&counter.to_le_bytes())
            .finalize_xof()
            .fill(&mut block);
        keystream.extend_from_slice(&block);
        counter += 1;
    }
    keystream.truncate(len);

    keystream
}

/// Encrypts (or decrypts) `data` with the ideal keystream, starting at block
/// counter 1.
pub fn encrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Vec<u8> {
    keystream(key, iv, 1, CHACHA_BLOCK_SIZE, data.len())
        .into_iter()
        .zip(data)
        .map(|(k, d)| k ^ d)
        .collect()
}

/// Returns a block for `plaintext` encrypted under [`KEY`] and [`IV`].
pub fn block(plaintext: &[u8]) -> Block {
    block_with_key(&KEY, &IV, plaintext)
}

/// Returns a block for `plaintext` encrypted under the given key material.
pub fn block_with_key(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Block {
    Block::new(
        encrypt(key, iv, plaintext),
        plaintext.to_vec(),
        Some(DirectReveal {
            key: key.to_vec(),
            iv: iv.to_vec(),
        }),
    )
}

#[derive(Serialize, Deserialize)]
struct IdealProof {
    key: Vec<u8>,
    iv: Vec<u8>,
    start_counter: u32,
}

/// An ideal [`ZkOperator`].
#[derive(Debug)]
pub struct IdealZkOperator {
    block_size: usize,
    generated: AtomicUsize,
    verified: AtomicUsize,
}

impl Default for IdealZkOperator {
    fn default() -> Self {
        Self::new(CHACHA_BLOCK_SIZE)
    }
}

impl IdealZkOperator {
    /// Creates a new operator for the given keystream block size.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            generated: AtomicUsize::new(0),
            verified: AtomicUsize::new(0),
        }
    }

    /// Returns the number of proofs generated.
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Returns the number of proofs verified successfully.
    pub fn verified(&self) -> usize {
        self.verified.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ZkOperator for IdealZkOperator {
    async fn generate(
        &self,
        secret: ChunkSecret<'_>,
        input: ChunkInput<'_>,
    ) -> Result<ChunkProof, OperatorError> {
        if input.ciphertext.len() != input.redacted_plaintext.len() {
            return Err(OperatorError::new(format!(
                "ciphertext length {} does not match plaintext length {}",
                input.ciphertext.len(),
                input.redacted_plaintext.len()
            )));
        }

        let keystream = keystream(
            secret.key,
            secret.iv,
            secret.start_counter,
            self.block_size,
            input.ciphertext.len(),
        );

        let plaintext = input
            .ciphertext
            .iter()
            .zip(keystream)
            .zip(input.redacted_plaintext)
            .map(|((c, k), r)| if *r == REDACTION_CHAR { REDACTION_CHAR } else { c ^ k })
            .collect();

        let proof = bincode::serialize(&IdealProof {
            key: secret.key.to_vec(),
            iv: secret.iv.to_vec(),
            start_counter: secret.start_counter,
        })
        .map_err(OperatorError::new)?;

        self.generated.fetch_add(1, Ordering::SeqCst);

        Ok(ChunkProof { proof, plaintext })
    }

    async fn verify(
        &self,
        proof: &[u8],
        plaintext: &[u8],
        ciphertext: &[u8],
    ) -> Result<(), OperatorError> {
        let proof: IdealProof = bincode::deserialize(proof).map_err(OperatorError::new)?;

        if plaintext.len() != ciphertext.len() {
            return Err(OperatorError::new("plaintext length mismatch"));
        }

        let keystream = keystream(
            &proof.key,
            &proof.iv,
            proof.start_counter,
            self.block_size,
            ciphertext.len(),
        );

        let valid = ciphertext
            .iter()
            .zip(keystream)
            .zip(plaintext)
            .all(|((c, k), p)| *p == REDACTION_CHAR || c ^ k == *p);

        if !valid {
            return Err(OperatorError::new("plaintext does not match ciphertext"));
        }

        self.verified.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_is_involution() {
        let plaintext = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".repeat(3);
        let ciphertext = encrypt(&KEY, &IV, &plaintext);

        assert_ne!(ciphertext, plaintext);
        assert_eq!(encrypt(&KEY, &IV, &ciphertext), plaintext);
    }

    #[test]
    fn test_keystream_counter_alignment() {
        let full = keystream(&KEY, &IV, 1, 64, 64 * 3);
        let third = keystream(&KEY, &IV, 3, 64, 64);

        assert_eq!(&full[128..], &third[..]);
    }
}
