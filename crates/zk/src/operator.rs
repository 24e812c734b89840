use async_trait::async_trait;
use std::error::Error;

/// Key material used to prove a single chunk.
#[derive(Clone)]
pub struct ChunkSecret<'a> {
    /// Cipher key.
    pub key: &'a [u8],
    /// Cipher IV (nonce).
    pub iv: &'a [u8],
    /// Keystream block counter of the chunk, starting at 1.
    pub start_counter: u32,
}

impl std::fmt::Debug for ChunkSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSecret")
            .field("key", &"{{ ... }}")
            .field("iv", &"{{ ... }}")
            .field("start_counter", &self.start_counter)
            .finish()
    }
}

/// Public input for proving a single chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkInput<'a> {
    /// Ciphertext of the chunk as observed on the wire.
    pub ciphertext: &'a [u8],
    /// Plaintext of the chunk with hidden bytes replaced by
    /// [`REDACTION_CHAR`](crate::redact::REDACTION_CHAR).
    ///
    /// Determines which positions of the proven plaintext are masked.
    pub redacted_plaintext: &'a [u8],
}

/// Output of proving a single chunk.
#[derive(Debug, Clone)]
pub struct ChunkProof {
    /// Opaque proof data.
    pub proof: Vec<u8>,
    /// Decryption of the chunk ciphertext, masked at the redacted positions.
    pub plaintext: Vec<u8>,
}

/// A proving capability for stream cipher chunks.
///
/// Implementations may prove locally or delegate to a remote service. The
/// caller selects an implementation once and hands it to
/// [`ZkProver`](crate::ZkProver) and [`ZkVerifier`](crate::ZkVerifier).
#[async_trait]
pub trait ZkOperator: Send + Sync {
    /// Proves that the returned plaintext is the decryption of
    /// `input.ciphertext` under the given key material, at every position not
    /// redacted in `input.redacted_plaintext`.
    async fn generate(
        &self,
        secret: ChunkSecret<'_>,
        input: ChunkInput<'_>,
    ) -> Result<ChunkProof, OperatorError>;

    /// Verifies a proof produced by [`ZkOperator::generate`].
    async fn verify(
        &self,
        proof: &[u8],
        plaintext: &[u8],
        ciphertext: &[u8],
    ) -> Result<(), OperatorError>;
}

/// Error returned by a [`ZkOperator`].
#[derive(Debug, thiserror::Error)]
#[error("zk operator error: {0}")]
pub struct OperatorError(Box<dyn Error + Send + Sync + 'static>);

impl OperatorError {
    /// Creates a new operator error.
    pub fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self(source.into())
    }
}
