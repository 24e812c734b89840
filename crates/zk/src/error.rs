use core::fmt;
use std::error::Error;

use crate::operator::OperatorError;

/// Error for [`ZkProver`](crate::ZkProver) and [`ZkVerifier`](crate::ZkVerifier).
#[derive(Debug, thiserror::Error)]
pub struct ZkError {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ZkError {
    fn new<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    pub(crate) fn resource_limit(total: usize, max: usize) -> Self {
        Self::new(
            ErrorKind::ResourceLimit,
            format!("too many chunks to prove: {total} > {max}"),
        )
    }

    pub(crate) fn congruence(index: usize) -> Self {
        Self::new(
            ErrorKind::Congruence { index },
            format!("redacted ciphertext ({index}) not congruent"),
        )
    }

    pub(crate) fn cryptographic<E>(index: usize, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Cryptographic { index },
            source: Some(source.into()),
        }
    }

    pub(crate) fn missing_reveal() -> Self {
        Self {
            kind: ErrorKind::MissingReveal,
            source: None,
        }
    }

    pub(crate) fn missing_secret(block: usize) -> Self {
        Self::new(
            ErrorKind::MissingSecret,
            format!("block {block} has no key material to prove with"),
        )
    }

    pub(crate) fn bounds(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Bounds, msg.into())
    }

    pub(crate) fn operator(source: OperatorError) -> Self {
        Self::new(ErrorKind::Operator, source)
    }

    /// Returns `true` if the transcript exceeded the configured chunk ceiling.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self.kind, ErrorKind::ResourceLimit)
    }

    /// Returns `true` if a proof's claimed plaintext disagreed with the
    /// revealed plaintext.
    pub fn is_congruence(&self) -> bool {
        matches!(self.kind, ErrorKind::Congruence { .. })
    }

    /// Returns `true` if a proof was rejected by the proof system.
    pub fn is_cryptographic(&self) -> bool {
        matches!(self.kind, ErrorKind::Cryptographic { .. })
    }

    /// Returns `true` if verification was attempted without reveal data.
    pub fn is_missing_reveal(&self) -> bool {
        matches!(self.kind, ErrorKind::MissingReveal)
    }

    /// Returns `true` if a proof referenced bytes outside of the ciphertext or
    /// overlapped another proof.
    pub fn is_bounds(&self) -> bool {
        matches!(self.kind, ErrorKind::Bounds)
    }

    /// Returns the index of the offending proof, if the error relates to one.
    pub fn chunk_index(&self) -> Option<usize> {
        match self.kind {
            ErrorKind::Congruence { index } | ErrorKind::Cryptographic { index } => Some(index),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum ErrorKind {
    ResourceLimit,
    Congruence { index: usize },
    Cryptographic { index: usize },
    MissingReveal,
    MissingSecret,
    Bounds,
    Operator,
}

impl fmt::Display for ZkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::ResourceLimit => write!(f, "resource limit error")?,
            ErrorKind::Congruence { .. } => write!(f, "congruence error")?,
            ErrorKind::Cryptographic { index } => {
                write!(f, "proof ({index}) failed verification")?
            }
            ErrorKind::MissingReveal => write!(f, "no zk reveal provided")?,
            ErrorKind::MissingSecret => write!(f, "missing secret error")?,
            ErrorKind::Bounds => write!(f, "bounds error")?,
            ErrorKind::Operator => write!(f, "operator error")?,
        }

        if let Some(ref source) = self.source {
            write!(f, " caused by: {}", source)?;
        }

        Ok(())
    }
}
