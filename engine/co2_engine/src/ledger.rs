//! External ledger capability used by the recorder.
//!
//! The engine only needs one operation: submit a payload, get back a commit
//! identifier. [`HashLedger`] derives that identifier from the payload itself
//! (SHA-256 over its canonical JSON), which is enough for deployments without
//! a remote ledger and for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::LedgerError;
use crate::types::{Project, ProjectType};

/// What gets written to the ledger for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    pub methodology: String,
    pub project_id: u64,
    pub owner_id: String,
    pub project_type: ProjectType,
    pub duration_years: u32,
    pub net_available_co2: f64,
    pub guarantee_fund_co2: f64,
    pub total_project_value: f64,
    pub used_default_factor: bool,
    pub approved_at: Option<DateTime<Utc>>,
}

pub const METHODOLOGY_ID: &str = "EUFD2025-001";

impl CommitPayload {
    pub fn for_project(project: &Project) -> Self {
        CommitPayload {
            methodology: METHODOLOGY_ID.to_string(),
            project_id: project.id,
            owner_id: project.owner_id.clone(),
            project_type: project.project_type,
            duration_years: project.declaration.duration_years,
            net_available_co2: project.co2.net_available_co2,
            guarantee_fund_co2: project.co2.guarantee_fund_co2,
            total_project_value: project.co2.total_project_value,
            used_default_factor: project.co2.used_default_factor,
            approved_at: project.approved_at,
        }
    }

    /// Stable byte encoding: field order is fixed by the struct definition.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(self).map_err(|e| LedgerError::Malformed(e.to_string()))
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Write `payload` and return the ledger's commit identifier.
    async fn submit(&self, payload: &CommitPayload) -> Result<String, LedgerError>;
}

/// Content-addressed ledger: the commit id is `sha256:<hex digest>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashLedger;

impl HashLedger {
    pub fn commit_id(payload: &CommitPayload) -> Result<String, LedgerError> {
        let mut hasher = Sha256::new();
        hasher.update(payload.canonical_bytes()?);
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}

#[async_trait]
impl LedgerClient for HashLedger {
    async fn submit(&self, payload: &CommitPayload) -> Result<String, LedgerError> {
        Self::commit_id(payload)
    }
}
