//! Redaction utilities.
//!
//! Hidden bytes are represented by [`REDACTION_CHAR`] in every buffer visible
//! to the proof system or the verifier.

use std::ops::Range;

use rangeset::RangeSet;

use crate::block::Block;

/// Byte which replaces hidden plaintext.
///
/// Plaintext bytes equal to `REDACTION_CHAR` are indistinguishable from hidden
/// bytes. They are never proven and are revealed as hidden.
pub const REDACTION_CHAR: u8 = b'*';

/// Normalizes a list of possibly overlapping, unsorted ranges into a set
/// bounded by `len`.
pub fn normalize_ranges(ranges: &[Range<usize>], len: usize) -> RangeSet<usize> {
    let ranges: Vec<Range<usize>> = ranges
        .iter()
        .map(|range| range.start.min(len)..range.end.min(len))
        .filter(|range| !range.is_empty())
        .collect();

    RangeSet::new(&ranges)
}

/// Returns a copy of `plaintext` with the bytes in `ranges` replaced by
/// [`REDACTION_CHAR`].
pub fn redact(plaintext: &[u8], ranges: &RangeSet<usize>) -> Vec<u8> {
    let mut redacted = plaintext.to_vec();
    for range in ranges.iter_ranges() {
        let end = range.end.min(redacted.len());
        if range.start < end {
            redacted[range.start..end].fill(REDACTION_CHAR);
        }
    }

    redacted
}

/// Returns `true` if every byte is [`REDACTION_CHAR`].
pub fn is_fully_redacted(data: &[u8]) -> bool {
    data.iter().all(|byte| *byte == REDACTION_CHAR)
}

/// Returns `true` if `decrypted` agrees with `redacted` at every position which
/// is not redacted in `redacted`.
pub fn is_redaction_congruent(redacted: &[u8], decrypted: &[u8]) -> bool {
    redacted.len() == decrypted.len()
        && redacted
            .iter()
            .zip(decrypted)
            .all(|(r, d)| *r == REDACTION_CHAR || r == d)
}

/// A block with at least one hidden byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactedBlock {
    /// Index of the block in the transcript.
    pub index: usize,
    /// Plaintext of the block with the hidden bytes redacted.
    pub redacted_plaintext: Vec<u8>,
}

/// Blocks which must be revealed with proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlocksToReveal {
    /// Nothing is hidden, every block can be revealed directly.
    All,
    /// Blocks containing hidden bytes.
    Some(Vec<RedactedBlock>),
}

/// Applies `redact_fn` to every block and collects the blocks that have hidden
/// bytes.
pub fn blocks_to_reveal<F>(blocks: &[Block], mut redact_fn: F) -> BlocksToReveal
where
    F: FnMut(&[u8]) -> Vec<Range<usize>>,
{
    let mut redacted_blocks = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        let plaintext = block.plaintext();
        let ranges = normalize_ranges(&redact_fn(plaintext), plaintext.len());
        if ranges.is_empty() {
            continue;
        }

        redacted_blocks.push(RedactedBlock {
            index,
            redacted_plaintext: redact(plaintext, &ranges),
        });
    }

    if redacted_blocks.is_empty() {
        BlocksToReveal::All
    } else {
        BlocksToReveal::Some(redacted_blocks)
    }
}
