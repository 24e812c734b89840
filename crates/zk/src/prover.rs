//! Proof generation.

use std::{ops::Range, sync::Arc};

use futures::future::try_join_all;
use tracing::{debug, info, info_span, instrument, Span};

use crate::{
    block::{Block, DirectReveal, ProofArtifact, ZkReveal},
    chunk::{chunk, Chunk},
    config::ZkConfig,
    operator::{ChunkInput, ChunkSecret, ZkOperator},
    redact::{blocks_to_reveal, BlocksToReveal},
    ZkError,
};

/// Result of [`ZkProver::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    /// Nothing is hidden. No proofs were generated and every block keeps its
    /// direct reveal.
    All,
    /// Proofs were generated.
    Proved {
        /// Indices of the blocks which were proven.
        blocks: Vec<usize>,
        /// Total number of chunks proven.
        total_chunks: usize,
    },
}

/// Generates proofs for the revealed portions of a transcript.
pub struct ZkProver {
    config: ZkConfig,
    operator: Arc<dyn ZkOperator>,
    span: Span,
}

impl std::fmt::Debug for ZkProver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZkProver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ZkProver {
    /// Creates a new prover.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the prover.
    /// * `operator` - The proving capability.
    pub fn new(config: ZkConfig, operator: Arc<dyn ZkOperator>) -> Self {
        Self {
            config,
            operator,
            span: info_span!("zk_prover"),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ZkConfig {
        &self.config
    }

    /// Prepares the blocks of a transcript for reveal.
    ///
    /// `redact_fn` returns the ranges of a block's plaintext which must stay
    /// hidden. If no block has hidden bytes, [`Prepared::All`] is returned and
    /// the blocks are left untouched.
    ///
    /// Otherwise every block with hidden bytes is proven chunk by chunk. On
    /// success the proofs are attached to the block and its direct reveal is
    /// erased. On failure no block is modified.
    ///
    /// # Arguments
    ///
    /// * `blocks` - The blocks of the transcript.
    /// * `redact_fn` - Selects the ranges to hide.
    #[instrument(parent = &self.span, level = "info", skip_all, err)]
    pub async fn prepare<F>(&self, blocks: &mut [Block], redact_fn: F) -> Result<Prepared, ZkError>
    where
        F: FnMut(&[u8]) -> Vec<Range<usize>>,
    {
        let redacted_blocks = match blocks_to_reveal(blocks, redact_fn) {
            BlocksToReveal::All => {
                debug!("nothing to redact, revealing all blocks");
                return Ok(Prepared::All);
            }
            BlocksToReveal::Some(redacted_blocks) => redacted_blocks,
        };

        info!(len = redacted_blocks.len(), "preparing proofs for blocks");

        let block_size = self.config.block_size();
        let zk_blocks: Vec<(usize, Vec<Chunk>)> = redacted_blocks
            .into_iter()
            .map(|block| (block.index, chunk(&block.redacted_plaintext, block_size)))
            .collect();

        let total_chunks = zk_blocks.iter().map(|(_, chunks)| chunks.len()).sum();
        if total_chunks > self.config.max_chunks() {
            return Err(ZkError::resource_limit(
                total_chunks,
                self.config.max_chunks(),
            ));
        }

        info!(total_chunks, "extracted chunks");

        let reveals = {
            let blocks: &[Block] = blocks;
            try_join_all(zk_blocks.iter().map(|(index, chunks)| {
                let block = &blocks[*index];
                async move {
                    let secret = block
                        .direct_reveal
                        .as_ref()
                        .ok_or_else(|| ZkError::missing_secret(*index))?;

                    self.prove_block(block.ciphertext(), secret, chunks).await
                }
            }))
            .await?
        };

        let mut proved = Vec::with_capacity(reveals.len());
        for ((index, _), reveal) in zk_blocks.into_iter().zip(reveals) {
            let block = &mut blocks[index];
            block.zk_reveal = Some(reveal);
            // Dropping the reveal zeroizes the key material.
            block.direct_reveal = None;
            proved.push(index);
        }

        Ok(Prepared::Proved {
            blocks: proved,
            total_chunks,
        })
    }

    async fn prove_block(
        &self,
        ciphertext: &[u8],
        secret: &DirectReveal,
        chunks: &[Chunk],
    ) -> Result<ZkReveal, ZkError> {
        let proofs = try_join_all(
            chunks
                .iter()
                .map(|chunk| self.prove_chunk(ciphertext, secret, chunk)),
        )
        .await?;

        Ok(ZkReveal { proofs })
    }

    async fn prove_chunk(
        &self,
        ciphertext: &[u8],
        secret: &DirectReveal,
        chunk: &Chunk,
    ) -> Result<ProofArtifact, ZkError> {
        let start_idx = chunk.start_idx(self.config.block_size());
        let end_idx = start_idx + chunk.data.len();
        let ciphertext_chunk = ciphertext.get(start_idx..end_idx).ok_or_else(|| {
            ZkError::bounds(format!(
                "chunk {start_idx}..{end_idx} exceeds ciphertext length {}",
                ciphertext.len()
            ))
        })?;

        let proof = self
            .operator
            .generate(
                ChunkSecret {
                    key: &secret.key,
                    iv: &secret.iv,
                    start_counter: chunk.counter,
                },
                ChunkInput {
                    ciphertext: ciphertext_chunk,
                    redacted_plaintext: &chunk.data,
                },
            )
            .await
            .map_err(ZkError::operator)?;

        debug!(start_idx, end_idx, "generated proof for chunk");

        Ok(ProofArtifact {
            proof: proof.proof,
            decrypted_redacted_ciphertext: proof.plaintext,
            redacted_plaintext: chunk.data.clone(),
            start_idx,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        mock::{block, IdealZkOperator},
        operator::{ChunkProof, OperatorError},
        redact::REDACTION_CHAR,
    };

    const SECRET: &[u8] = b"hunter2";

    #[fixture]
    fn operator() -> Arc<IdealZkOperator> {
        Arc::new(IdealZkOperator::default())
    }

    fn prover(operator: Arc<IdealZkOperator>, max_chunks: usize) -> ZkProver {
        ZkProver::new(
            ZkConfig::builder().max_chunks(max_chunks).build().unwrap(),
            operator,
        )
    }

    fn request() -> Vec<u8> {
        let mut request = b"POST /login HTTP/1.1\r\nHost: example.com\r\n\r\npassword=".to_vec();
        request.extend_from_slice(SECRET);
        request.extend_from_slice(&[b'.'; 150]);
        request
    }

    fn hide_secret(plaintext: &[u8]) -> Vec<Range<usize>> {
        plaintext
            .windows(SECRET.len())
            .position(|w| w == SECRET)
            .map(|start| vec![start..start + SECRET.len()])
            .unwrap_or_default()
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_reveal_all(operator: Arc<IdealZkOperator>) {
        let prover = prover(operator.clone(), 200);
        let mut blocks = vec![block(b"hello"), block(b"world")];

        let prepared = prover.prepare(&mut blocks, |_| vec![]).await.unwrap();

        assert_eq!(prepared, Prepared::All);
        assert_eq!(operator.generated(), 0);
        assert!(blocks
            .iter()
            .all(|b| b.direct_reveal().is_some() && b.zk_reveal().is_none()));
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_proves_redacted_blocks(operator: Arc<IdealZkOperator>) {
        let prover = prover(operator.clone(), 200);
        let mut blocks = vec![block(b"no secrets here"), block(&request())];

        let prepared = prover.prepare(&mut blocks, hide_secret).await.unwrap();

        let chunks = request().len().div_ceil(64);
        assert_eq!(
            prepared,
            Prepared::Proved {
                blocks: vec![1],
                total_chunks: chunks,
            }
        );
        assert_eq!(operator.generated(), chunks);

        // The untouched block keeps its key.
        assert!(blocks[0].direct_reveal().is_some());
        assert!(blocks[0].zk_reveal().is_none());

        // The proven block loses its key.
        assert!(blocks[1].direct_reveal().is_none());
        let proofs = &blocks[1].zk_reveal().unwrap().proofs;
        assert_eq!(proofs.len(), chunks);
        for (i, proof) in proofs.iter().enumerate() {
            assert_eq!(proof.start_idx, i * 64);
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_does_not_leak_hidden_bytes(operator: Arc<IdealZkOperator>) {
        let prover = prover(operator, 200);
        let mut blocks = vec![block(&request())];

        prover.prepare(&mut blocks, hide_secret).await.unwrap();

        let reveal = blocks[0].to_reveal();
        assert!(reveal.direct_reveal.is_none());
        for proof in &reveal.zk_reveal.unwrap().proofs {
            for data in [&proof.redacted_plaintext, &proof.decrypted_redacted_ciphertext] {
                assert!(!data.windows(SECRET.len()).any(|w| w == SECRET));
            }
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_skips_fully_redacted_chunks(operator: Arc<IdealZkOperator>) {
        let prover = prover(operator.clone(), 200);
        let mut blocks = vec![block(&[b'a'; 200])];

        let prepared = prover.prepare(&mut blocks, |_| vec![64..128]).await.unwrap();

        assert_eq!(
            prepared,
            Prepared::Proved {
                blocks: vec![0],
                total_chunks: 3,
            }
        );
        let proofs = &blocks[0].zk_reveal().unwrap().proofs;
        assert_eq!(
            proofs.iter().map(|p| p.start_idx).collect::<Vec<_>>(),
            vec![0, 128, 192]
        );
        assert_eq!(proofs[2].redacted_plaintext.len(), 8);
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_fully_redacted_block(operator: Arc<IdealZkOperator>) {
        let prover = prover(operator.clone(), 200);
        let mut blocks = vec![block(&[b'a'; 100])];

        let prepared = prover.prepare(&mut blocks, |p| vec![0..p.len()]).await.unwrap();

        assert_eq!(
            prepared,
            Prepared::Proved {
                blocks: vec![0],
                total_chunks: 0,
            }
        );
        assert_eq!(operator.generated(), 0);
        assert!(blocks[0].direct_reveal().is_none());
        assert!(blocks[0].zk_reveal().unwrap().proofs.is_empty());
    }

    #[rstest]
    #[case::at_ceiling(4, true)]
    #[case::over_ceiling(5, false)]
    #[tokio::test]
    async fn test_prepare_chunk_ceiling(
        operator: Arc<IdealZkOperator>,
        #[case] chunks: usize,
        #[case] ok: bool,
    ) {
        let prover = prover(operator.clone(), 4);
        let mut blocks = vec![block(&vec![b'a'; chunks * 64])];

        let res = prover.prepare(&mut blocks, |_| vec![0..1]).await;

        if ok {
            assert!(res.is_ok());
        } else {
            assert!(res.unwrap_err().is_resource_limit());
            assert_eq!(operator.generated(), 0);
            assert!(blocks[0].direct_reveal().is_some());
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_ceiling_spans_blocks(operator: Arc<IdealZkOperator>) {
        let prover = prover(operator, 4);
        let mut blocks = vec![block(&[b'a'; 128]), block(&[b'b'; 192])];

        let err = prover.prepare(&mut blocks, |_| vec![0..1]).await.unwrap_err();

        assert!(err.is_resource_limit());
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_requires_key_material(operator: Arc<IdealZkOperator>) {
        let prover = prover(operator, 200);
        let mut blocks = vec![Block::new(vec![0; 10], vec![b'a'; 10], None)];

        assert!(prover.prepare(&mut blocks, |_| vec![0..2]).await.is_err());
    }

    struct FailingOperator {
        inner: IdealZkOperator,
        fail_counter: u32,
    }

    #[async_trait]
    impl ZkOperator for FailingOperator {
        async fn generate(
            &self,
            secret: ChunkSecret<'_>,
            input: ChunkInput<'_>,
        ) -> Result<ChunkProof, OperatorError> {
            if secret.start_counter == self.fail_counter {
                return Err(OperatorError::new("prover crashed"));
            }
            self.inner.generate(secret, input).await
        }

        async fn verify(
            &self,
            proof: &[u8],
            plaintext: &[u8],
            ciphertext: &[u8],
        ) -> Result<(), OperatorError> {
            self.inner.verify(proof, plaintext, ciphertext).await
        }
    }

    #[tokio::test]
    async fn test_prepare_fails_fast() {
        let prover = ZkProver::new(
            ZkConfig::default(),
            Arc::new(FailingOperator {
                inner: IdealZkOperator::default(),
                fail_counter: 2,
            }),
        );
        let mut blocks = vec![block(&[b'a'; 64]), block(&[b'b'; 256])];

        let err = prover.prepare(&mut blocks, |_| vec![0..1]).await.unwrap_err();

        assert!(!err.is_resource_limit());
        assert!(err.to_string().contains("prover crashed"));
        // No partial results are attached.
        for block in &blocks {
            assert!(block.direct_reveal().is_some());
            assert!(block.zk_reveal().is_none());
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_sentinel_in_plaintext(operator: Arc<IdealZkOperator>) {
        let prover = prover(operator, 200);
        let mut blocks = vec![block(b"a*b secret")];

        prover.prepare(&mut blocks, |_| vec![4..10]).await.unwrap();

        let proof = &blocks[0].zk_reveal().unwrap().proofs[0];
        assert_eq!(proof.redacted_plaintext, b"a*b ******");
        assert_eq!(proof.decrypted_redacted_ciphertext[1], REDACTION_CHAR);
    }
}
