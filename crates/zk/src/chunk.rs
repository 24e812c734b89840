//! Splitting of redacted plaintext into keystream-aligned chunks.

use crate::redact::is_fully_redacted;

/// A keystream-aligned slice of a block's redacted plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Redacted plaintext of the chunk.
    pub data: Vec<u8>,
    /// Keystream block counter, starting at 1 for the first chunk of a block.
    pub counter: u32,
}

impl Chunk {
    /// Returns the offset of the chunk within its block.
    pub fn start_idx(&self, block_size: usize) -> usize {
        (self.counter as usize - 1) * block_size
    }

    /// Returns the end offset of the chunk within its block, given the length
    /// of the block.
    pub fn end_idx(&self, block_size: usize, block_len: usize) -> usize {
        (self.counter as usize * block_size).min(block_len)
    }
}

/// Splits `redacted_plaintext` into chunks of `block_size` bytes.
///
/// Fully redacted chunks are dropped since they reveal nothing. The counters
/// of the remaining chunks keep their position in the block, so they can be
/// used as keystream block indices.
///
/// # Panics
///
/// Panics if `block_size` is zero.
pub fn chunk(redacted_plaintext: &[u8], block_size: usize) -> Vec<Chunk> {
    redacted_plaintext
        .chunks(block_size)
        .zip(1u32..)
        .filter(|(data, _)| !is_fully_redacted(data))
        .map(|(data, counter)| Chunk {
            data: data.to_vec(),
            counter,
        })
        .collect()
}
