//! One-time, idempotent ledger commit for approved projects.
//!
//! `commit` must be called with the project's lock held (the engine does
//! this). Under that lock the "already recorded?" check, the ledger call and
//! the write-back form a single step, so two callers can never both commit.
//!
//! A failed or timed-out ledger call leaves `recording` unset and appends
//! nothing; retrying is the caller's business. The `recorded` activity is
//! saved with the recording as an unlogged entry, so a failed append is
//! repaired by the next commit instead of being lost.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::audit::AuditTrail;
use crate::clock::Clock;
use crate::errors::{CertificationError, Result};
use crate::ledger::{CommitPayload, LedgerClient};
use crate::storage::ProjectRepository;
use crate::types::{ActivityKind, Project, Recording};

/// Actor recorded on `recorded` activities.
pub const RECORDER_ACTOR: &str = "recorder";

#[derive(Clone)]
pub struct Recorder {
    ledger: Arc<dyn LedgerClient>,
    repository: Arc<dyn ProjectRepository>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl Recorder {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        repository: Arc<dyn ProjectRepository>,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Recorder {
            ledger,
            repository,
            audit,
            clock,
            timeout,
        }
    }

    /// Commit `project` to the ledger, or return its existing recording.
    ///
    /// On success `project` is updated in place and persisted.
    pub async fn commit(&self, project: &mut Project) -> Result<Recording> {
        if !project.certification_status.allows_recording() {
            return Err(CertificationError::CertificationNotApproved {
                status: project.certification_status,
            });
        }
        if let Some(existing) = project.recording.clone() {
            self.audit
                .flush(self.repository.as_ref(), project)
                .await?;
            info!(
                project_id = project.id,
                commit_id = %existing.commit_id,
                "project already recorded, returning existing commit"
            );
            return Ok(existing);
        }

        let payload = CommitPayload::for_project(project);
        let commit_id = match tokio::time::timeout(self.timeout, self.ledger.submit(&payload)).await
        {
            Ok(Ok(commit_id)) => commit_id,
            Ok(Err(e)) => {
                warn!(project_id = project.id, "ledger submission failed: {e}");
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    project_id = project.id,
                    "ledger submission timed out after {:?}", self.timeout
                );
                return Err(CertificationError::ExternalCommit(format!(
                    "ledger call timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let recording = Recording {
            project_id: project.id,
            commit_id,
            committed_at: self.clock.now(),
        };

        let mut updated = project.clone();
        updated.recording = Some(recording.clone());
        updated.unlogged_activities.push(AuditTrail::entry(
            project.id,
            ActivityKind::Recorded,
            RECORDER_ACTOR,
            format!("commit {}", recording.commit_id),
            recording.committed_at,
        ));
        self.repository.save(&updated).await?;
        *project = updated;

        self.audit
            .flush(self.repository.as_ref(), project)
            .await?;

        info!(
            project_id = project.id,
            commit_id = %recording.commit_id,
            "project recorded on ledger"
        );
        Ok(recording)
    }
}
