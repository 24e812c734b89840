//! Selective disclosure of stream cipher transcripts.
//!
//! A prover holding the plaintext and key material of a transcript can reveal
//! it to a verifier while hiding chosen byte ranges. Every keystream block
//! (chunk) that contains at least one revealed byte is proven with a
//! zero-knowledge proof attesting that the revealed bytes are the decryption of
//! the ciphertext observed on the wire. Chunks that are entirely hidden are
//! never proven, and transcripts without any hidden bytes skip proving
//! altogether.
//!
//! The proof system itself is abstracted behind [`ZkOperator`].

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

mod block;
pub mod chunk;
mod config;
mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod operator;
mod prover;
pub mod redact;
mod verifier;

pub use block::{Block, BlockReveal, DirectReveal, ProofArtifact, ZkReveal};
pub use config::{ZkConfig, ZkConfigBuilder, ZkConfigBuilderError};
pub use error::ZkError;
pub use operator::{ChunkInput, ChunkProof, ChunkSecret, OperatorError, ZkOperator};
pub use prover::{Prepared, ZkProver};
pub use verifier::{Revealed, ZkVerifier};

/// Keystream block size of ChaCha20, in bytes.
pub const CHACHA_BLOCK_SIZE: usize = 64;
