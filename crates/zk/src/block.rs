use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key material which decrypts a block without any proof.
///
/// Only valid for blocks which are revealed in full.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct DirectReveal {
    /// Cipher key.
    pub key: Vec<u8>,
    /// Cipher IV (nonce).
    pub iv: Vec<u8>,
}

impl std::fmt::Debug for DirectReveal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectReveal")
            .field("key", &"{{ ... }}")
            .field("iv", &"{{ ... }}")
            .finish()
    }
}

/// Proof that a chunk of a block decrypts to the revealed plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    /// Opaque proof data.
    pub proof: Vec<u8>,
    /// The plaintext the proof attests to, masked at the redacted positions.
    pub decrypted_redacted_ciphertext: Vec<u8>,
    /// The redacted plaintext presented to the verifier.
    pub redacted_plaintext: Vec<u8>,
    /// Offset of the chunk within the block's ciphertext.
    pub start_idx: usize,
}

/// Proofs revealing a block with hidden bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkReveal {
    /// Proofs, one per chunk with at least one revealed byte.
    pub proofs: Vec<ProofArtifact>,
}

/// The part of a [`Block`] which is sent to the verifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReveal {
    /// Key material, present if the block is revealed in full.
    pub direct_reveal: Option<DirectReveal>,
    /// Proofs, present if the block has hidden bytes.
    pub zk_reveal: Option<ZkReveal>,
}

/// A block of a transcript, as held by the prover.
///
/// The plaintext never leaves the prover. Use [`Block::to_reveal`] to obtain
/// the data which is sent to the verifier. The plaintext and key material are
/// zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Block {
    #[zeroize(skip)]
    ciphertext: Vec<u8>,
    plaintext: Vec<u8>,
    pub(crate) direct_reveal: Option<DirectReveal>,
    #[zeroize(skip)]
    pub(crate) zk_reveal: Option<ZkReveal>,
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.ciphertext.len())
            .field("direct_reveal", &self.direct_reveal.is_some())
            .field("zk_reveal", &self.zk_reveal)
            .finish_non_exhaustive()
    }
}

impl Block {
    /// Creates a new block.
    ///
    /// # Arguments
    ///
    /// * `ciphertext` - The ciphertext as observed on the wire.
    /// * `plaintext` - The decrypted ciphertext.
    /// * `direct_reveal` - The key material of the block.
    pub fn new(
        ciphertext: Vec<u8>,
        plaintext: Vec<u8>,
        direct_reveal: Option<DirectReveal>,
    ) -> Self {
        Self {
            ciphertext,
            plaintext,
            direct_reveal,
            zk_reveal: None,
        }
    }

    /// Returns the ciphertext.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Returns the plaintext.
    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    /// Returns the key material, if the block is revealed directly.
    pub fn direct_reveal(&self) -> Option<&DirectReveal> {
        self.direct_reveal.as_ref()
    }

    /// Returns the proofs, if the block has been proven.
    pub fn zk_reveal(&self) -> Option<&ZkReveal> {
        self.zk_reveal.as_ref()
    }

    /// Returns the data which is sent to the verifier.
    pub fn to_reveal(&self) -> BlockReveal {
        BlockReveal {
            direct_reveal: self.direct_reveal.clone(),
            zk_reveal: self.zk_reveal.clone(),
        }
    }
}
