//! Engine-wide error taxonomy.
//!
//! Every public operation returns [`Result`]. The engine never downgrades one
//! kind into another; callers are expected to match on the variant:
//!
//! | Variant                    | Caller reaction                         |
//! |----------------------------|-----------------------------------------|
//! | `Validation`               | surface to the submitter                |
//! | `InvalidTransition`        | client bug, do not retry                |
//! | `CertificationNotApproved` | client bug, do not retry                |
//! | `NotFound`                 | unknown project id                      |
//! | `ExternalCommit`           | retry `commit` with backoff             |
//! | `Storage`                  | repository unavailable                  |

use thiserror::Error;

use crate::types::CertificationStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CertificationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: cannot {event} a project in status {from}")]
    InvalidTransition {
        from: CertificationStatus,
        event: &'static str,
    },

    #[error("Certification not approved: project is {status}")]
    CertificationNotApproved { status: CertificationStatus },

    #[error("Project not found: {0}")]
    NotFound(u64),

    #[error("External commit error: {0}")]
    ExternalCommit(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CertificationError {
    /// Only a failed ledger call is worth retrying; everything else is
    /// deterministic for the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalCommit(_))
    }

    /// Short machine-readable identifier, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::CertificationNotApproved { .. } => "certification_not_approved",
            Self::NotFound(_) => "not_found",
            Self::ExternalCommit(_) => "external_commit",
            Self::Storage(_) => "storage",
        }
    }
}

/// Failure reported by a [`LedgerClient`](crate::ledger::LedgerClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger rejected submission ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("ledger returned malformed response: {0}")]
    Malformed(String),
}

impl From<LedgerError> for CertificationError {
    fn from(e: LedgerError) -> Self {
        CertificationError::ExternalCommit(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CertificationError>;
