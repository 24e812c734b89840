//! Proof verification.

use std::{collections::HashSet, sync::Arc};

use futures::future::try_join_all;
use tracing::{debug, info, info_span, instrument, Span};

use crate::{
    block::{BlockReveal, DirectReveal, ProofArtifact, ZkReveal},
    config::ZkConfig,
    operator::ZkOperator,
    redact::{is_redaction_congruent, REDACTION_CHAR},
    ZkError,
};

/// Outcome of [`ZkVerifier::verify_reveal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revealed {
    /// The block is revealed in full with its key material.
    Direct(DirectReveal),
    /// The verified plaintext of the block. Bytes which were not proven are
    /// [`REDACTION_CHAR`] and must be treated as unrevealed.
    Redacted(Vec<u8>),
}

/// Verifies proofs produced by [`ZkProver`](crate::ZkProver).
pub struct ZkVerifier {
    config: ZkConfig,
    operator: Arc<dyn ZkOperator>,
    span: Span,
}

impl std::fmt::Debug for ZkVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZkVerifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ZkVerifier {
    /// Creates a new verifier.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the verifier.
    /// * `operator` - The proving capability.
    pub fn new(config: ZkConfig, operator: Arc<dyn ZkOperator>) -> Self {
        Self {
            config,
            operator,
            span: info_span!("zk_verifier"),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ZkConfig {
        &self.config
    }

    /// Verifies the reveal of a block.
    ///
    /// Proofs take precedence over a direct reveal.
    pub async fn verify_reveal(
        &self,
        ciphertext: &[u8],
        reveal: &BlockReveal,
    ) -> Result<Revealed, ZkError> {
        match (&reveal.zk_reveal, &reveal.direct_reveal) {
            (Some(zk_reveal), _) => self
                .verify_block(ciphertext, Some(zk_reveal))
                .await
                .map(Revealed::Redacted),
            (None, Some(direct_reveal)) => Ok(Revealed::Direct(direct_reveal.clone())),
            (None, None) => Err(ZkError::missing_reveal()),
        }
    }

    /// Verifies the proofs of a block and returns its redacted plaintext.
    ///
    /// The output starts fully redacted and only the plaintext of verified
    /// proofs is written into it, so the prover can not reveal bytes it has not
    /// proven.
    ///
    /// # Arguments
    ///
    /// * `ciphertext` - The ciphertext of the block as observed on the wire.
    /// * `reveal` - The proofs of the block.
    #[instrument(parent = &self.span, level = "info", skip_all, err)]
    pub async fn verify_block(
        &self,
        ciphertext: &[u8],
        reveal: Option<&ZkReveal>,
    ) -> Result<Vec<u8>, ZkError> {
        let reveal = reveal.ok_or_else(ZkError::missing_reveal)?;

        self.check_layout(ciphertext.len(), &reveal.proofs)?;

        try_join_all(
            reveal
                .proofs
                .iter()
                .enumerate()
                .map(|(i, proof)| self.verify_proof(i, ciphertext, proof)),
        )
        .await?;

        let mut redacted_plaintext = vec![REDACTION_CHAR; ciphertext.len()];
        for proof in &reveal.proofs {
            let end_idx = proof.start_idx + proof.redacted_plaintext.len();
            redacted_plaintext[proof.start_idx..end_idx].copy_from_slice(&proof.redacted_plaintext);
        }

        info!(proofs = reveal.proofs.len(), "verified block");

        Ok(redacted_plaintext)
    }

    /// Checks that every proof covers a distinct chunk within the ciphertext.
    fn check_layout(&self, len: usize, proofs: &[ProofArtifact]) -> Result<(), ZkError> {
        let block_size = self.config.block_size();
        let mut starts = HashSet::with_capacity(proofs.len());
        for (i, proof) in proofs.iter().enumerate() {
            let chunk_len = proof.redacted_plaintext.len();
            if chunk_len == 0 || chunk_len > block_size {
                return Err(ZkError::bounds(format!(
                    "proof ({i}) has invalid length {chunk_len}"
                )));
            }

            if proof.start_idx % block_size != 0 {
                return Err(ZkError::bounds(format!(
                    "proof ({i}) is not aligned to the block size: {}",
                    proof.start_idx
                )));
            }

            match proof.start_idx.checked_add(chunk_len) {
                Some(end) if end <= len => {}
                _ => {
                    return Err(ZkError::bounds(format!(
                        "proof ({i}) exceeds ciphertext length {len}"
                    )))
                }
            }

            if !starts.insert(proof.start_idx) {
                return Err(ZkError::bounds(format!(
                    "proof ({i}) duplicates chunk at {}",
                    proof.start_idx
                )));
            }
        }

        Ok(())
    }

    async fn verify_proof(
        &self,
        index: usize,
        ciphertext: &[u8],
        proof: &ProofArtifact,
    ) -> Result<(), ZkError> {
        let start_idx = proof.start_idx;
        let end_idx = start_idx + proof.redacted_plaintext.len();
        let ciphertext_chunk = &ciphertext[start_idx..end_idx];

        if !is_redaction_congruent(
            &proof.redacted_plaintext,
            &proof.decrypted_redacted_ciphertext,
        ) {
            return Err(ZkError::congruence(index));
        }

        self.operator
            .verify(
                &proof.proof,
                &proof.decrypted_redacted_ciphertext,
                ciphertext_chunk,
            )
            .await
            .map_err(|e| ZkError::cryptographic(index, e))?;

        debug!(start_idx, end_idx, "verified proof");

        Ok(())
    }
}
