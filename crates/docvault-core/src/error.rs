//! Error taxonomy shared by the core pipeline and its collaborators.
//!
//! Every variant carries a stable machine-readable code (see
//! [`Error::code`]) that the HTTP layer maps onto status codes. Lower-level
//! components never catch and suppress these — they surface them for the
//! orchestrator to decide audit and response behavior.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed identifiers, out-of-range parameters, invalid labels.
    /// Rejected before any side effect.
    #[error("{0}")]
    Validation(String),

    /// No membership in the workspace, or wrong role. Rejected before any
    /// data access.
    #[error("{0}")]
    Forbidden(String),

    /// Entity absent, or present only in a different workspace. The two
    /// cases must present identically.
    #[error("{0}")]
    NotFound(String),

    /// The workspace has no indexed content. Distinct from a query that
    /// returns zero policy-passing results (which is a normal success).
    #[error("No data ingested yet.")]
    NoDataIngested,

    /// An explicitly enabled collaborator (answer synthesizer) is
    /// misconfigured or unreachable.
    #[error("{0}")]
    DependencyUnavailable(String),

    /// Referential breakage, e.g. a membership pointing at a user row
    /// that no longer exists. Fatal.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The embedding provider failed; surfaced as a retrieval failure.
    #[error("embedding provider failed: {0}")]
    Embedding(String),

    /// The chunk store failed.
    #[error("store operation failed: {0}")]
    Store(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::NoDataIngested => "no_data_ingested",
            Error::DependencyUnavailable(_) => "dependency_unavailable",
            Error::Integrity(_) => "integrity_error",
            Error::Embedding(_) => "embedding_error",
            Error::Store(_) => "store_error",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}
