use derive_builder::Builder;

use crate::CHACHA_BLOCK_SIZE;

/// Default upper bound on the number of chunks proven for a single session.
pub(crate) const DEFAULT_MAX_CHUNKS: usize = 200;

/// Configuration for [`ZkProver`](crate::ZkProver) and
/// [`ZkVerifier`](crate::ZkVerifier).
#[derive(Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct ZkConfig {
    /// Maximum number of chunks which may be proven across all blocks of a
    /// session.
    #[builder(default = "DEFAULT_MAX_CHUNKS")]
    max_chunks: usize,
    /// Size of a chunk, which must match the keystream block size of the
    /// cipher.
    #[builder(default = "CHACHA_BLOCK_SIZE")]
    block_size: usize,
}

impl ZkConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_chunks == Some(0) {
            return Err("max_chunks must be greater than zero".to_string());
        }

        if self.block_size == Some(0) {
            return Err("block_size must be greater than zero".to_string());
        }

        Ok(())
    }
}

impl Default for ZkConfig {
    fn default() -> Self {
        Self {
            max_chunks: DEFAULT_MAX_CHUNKS,
            block_size: CHACHA_BLOCK_SIZE,
        }
    }
}

impl ZkConfig {
    /// Creates a new builder for `ZkConfig`.
    pub fn builder() -> ZkConfigBuilder {
        ZkConfigBuilder::default()
    }

    /// Returns the maximum number of chunks which may be proven.
    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    /// Returns the chunk size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}
