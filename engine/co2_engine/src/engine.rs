//! # Workflow engine
//!
//! Public facade over the calculator, the state machine, the recorder and
//! the audit trail. Consumers (the REST layer, the retry worker) only talk to
//! [`WorkflowEngine`].
//!
//! | Operation              | Lock | Activity appended                 |
//! |------------------------|------|-----------------------------------|
//! | `create_project`       | —    | `created`                         |
//! | `update_declaration`   | yes  | `declaration_updated`             |
//! | `recalculate`          | yes  | — (saves only while `pending`)    |
//! | `approve`              | yes  | `approved`, then `recorded`       |
//! | `reject`               | yes  | `rejected`                        |
//! | `certify`              | yes  | `certified`                       |
//! | `commit`               | yes  | `recorded` (first success only)   |
//!
//! ## Concurrency
//!
//! Every mutating operation on an existing project first takes that
//! project's async mutex, then reloads the project from the repository and
//! flushes any trail entries a previous call failed to append. Locks exist
//! only for ids that resolved to a project. Reads (`get_project`,
//! `activities`) never lock. There is no lock spanning several projects.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audit::AuditTrail;
use crate::calculator;
use crate::clock::Clock;
use crate::documents;
use crate::errors::{CertificationError, Result};
use crate::ledger::LedgerClient;
use crate::recorder::Recorder;
use crate::state_machine::{self, Event};
use crate::storage::{ActivityStore, ProjectRepository};
use crate::types::{
    Activity, ActivityKind, CertificationStatus, Co2Result, Declaration, NewProject, Project,
    Recording,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single ledger submission.
    pub commit_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            commit_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WorkflowEngine {
    repository: Arc<dyn ProjectRepository>,
    audit: AuditTrail,
    recorder: Recorder,
    clock: Arc<dyn Clock>,
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl WorkflowEngine {
    pub fn new(
        repository: Arc<dyn ProjectRepository>,
        activities: Arc<dyn ActivityStore>,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let audit = AuditTrail::new(activities);
        let recorder = Recorder::new(
            ledger,
            repository.clone(),
            audit.clone(),
            clock.clone(),
            config.commit_timeout,
        );
        WorkflowEngine {
            repository,
            audit,
            recorder,
            clock,
            locks: DashMap::new(),
        }
    }

    // ─────────────────────────────────────────────────────────
    // Declarations
    // ─────────────────────────────────────────────────────────

    /// Validate, quantify and store a new `pending` project.
    pub async fn create_project(&self, new: NewProject) -> Result<Project> {
        let owner_id = new.owner_id.trim();
        if owner_id.is_empty() {
            return Err(CertificationError::Validation(
                "owner id is required".to_string(),
            ));
        }
        documents::validate_all(&new.documents)?;
        let co2 = calculator::quantify(new.project_type, &new.declaration)?;

        let id = self.repository.next_project_id().await?;
        let now = self.clock.now();
        let mut project = Project {
            id,
            owner_id: owner_id.to_string(),
            project_type: new.project_type,
            created_at: now,
            declaration: new.declaration,
            co2,
            certification_status: CertificationStatus::Pending,
            approved_at: None,
            certificate: None,
            recording: None,
            documents: new.documents,
            unlogged_activities: Vec::new(),
        };
        let created = AuditTrail::entry(
            id,
            ActivityKind::Created,
            &project.owner_id,
            describe_declaration(&project),
            now,
        );
        project.unlogged_activities.push(created);
        self.save_and_flush(&mut project).await?;

        info!(
            project_id = id,
            project_type = %project.project_type,
            net_available_co2 = project.co2.net_available_co2,
            used_default_factor = project.co2.used_default_factor,
            "project created"
        );
        Ok(project)
    }

    /// Replace the declaration of a `pending` project and recompute its CO₂.
    pub async fn update_declaration(
        &self,
        id: u64,
        actor: &str,
        declaration: Declaration,
    ) -> Result<Project> {
        let lock = self.lock_existing(id).await?;
        let _guard = lock.lock().await;

        let mut project = self.load_for_update(id).await?;
        if project.certification_status != CertificationStatus::Pending {
            return Err(CertificationError::InvalidTransition {
                from: project.certification_status,
                event: "update_declaration",
            });
        }
        project.co2 = calculator::quantify(project.project_type, &declaration)?;
        project.declaration = declaration;

        let updated = AuditTrail::entry(
            id,
            ActivityKind::DeclarationUpdated,
            actor,
            describe_declaration(&project),
            self.clock.now(),
        );
        project.unlogged_activities.push(updated);
        self.save_and_flush(&mut project).await?;
        info!(project_id = id, "declaration updated");
        Ok(project)
    }

    /// Recompute the derived CO₂ fields from the stored declaration.
    ///
    /// Only a `pending` project is updated. Once reviewed, the stored
    /// quantity is the one that was approved and recorded; the fresh result
    /// is returned without being saved.
    pub async fn recalculate(&self, id: u64) -> Result<Co2Result> {
        let lock = self.lock_existing(id).await?;
        let _guard = lock.lock().await;

        let mut project = self.load_for_update(id).await?;
        let co2 = calculator::quantify_project(&project)?;
        if co2 != project.co2 {
            if project.certification_status == CertificationStatus::Pending {
                project.co2 = co2.clone();
                self.repository.save(&project).await?;
            } else {
                warn!(
                    project_id = id,
                    status = %project.certification_status,
                    "recalculated quantity differs from the reviewed one; not saved"
                );
            }
        }
        Ok(co2)
    }

    // ─────────────────────────────────────────────────────────
    // Certification transitions
    // ─────────────────────────────────────────────────────────

    /// `pending → approved`, then commit to the ledger.
    ///
    /// The approval is persisted before the ledger call. If the commit
    /// fails, the project stays `approved` without a recording and this
    /// returns `ExternalCommit`; finish with [`WorkflowEngine::commit`].
    pub async fn approve(&self, id: u64, actor: &str, notes: &str) -> Result<Project> {
        self.transition(
            id,
            actor,
            Event::Approve {
                notes: notes.to_string(),
            },
        )
        .await
    }

    /// `pending → rejected`.
    pub async fn reject(&self, id: u64, actor: &str, notes: &str) -> Result<Project> {
        self.transition(
            id,
            actor,
            Event::Reject {
                notes: notes.to_string(),
            },
        )
        .await
    }

    /// `approved → certified`, stamping the certificate.
    pub async fn certify(&self, id: u64, actor: &str, certificate_number: &str) -> Result<Project> {
        self.transition(
            id,
            actor,
            Event::Certify {
                certificate_number: certificate_number.to_string(),
            },
        )
        .await
    }

    /// Commit an approved or certified project to the ledger. Idempotent.
    pub async fn commit(&self, id: u64) -> Result<Recording> {
        let lock = self.lock_existing(id).await?;
        let _guard = lock.lock().await;

        let mut project = self.load_for_update(id).await?;
        self.recorder.commit(&mut project).await
    }

    /// Append trail entries left behind by failed activity-store writes.
    ///
    /// Returns how many activities were appended across all projects.
    pub async fn flush_unlogged_activities(&self) -> Result<usize> {
        let mut appended = 0;
        for project in self.repository.list(None).await? {
            if project.unlogged_activities.is_empty() {
                continue;
            }
            let lock = self.lock_existing(project.id).await?;
            let _guard = lock.lock().await;
            let mut project = self.load(project.id).await?;
            appended += self
                .audit
                .flush(self.repository.as_ref(), &mut project)
                .await?;
        }
        Ok(appended)
    }

    // ─────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────

    pub async fn get_project(&self, id: u64) -> Result<Project> {
        self.load(id).await
    }

    pub async fn list_projects(&self, owner_id: Option<&str>) -> Result<Vec<Project>> {
        self.repository.list(owner_id).await
    }

    /// Approved or certified projects that still lack a recording.
    pub async fn projects_awaiting_recording(&self) -> Result<Vec<Project>> {
        Ok(self
            .repository
            .list(None)
            .await?
            .into_iter()
            .filter(Project::awaiting_recording)
            .collect())
    }

    /// Audit trail, oldest first.
    pub async fn activities(&self, id: u64) -> Result<Vec<Activity>> {
        self.load(id).await?;
        self.audit.list(id).await
    }

    /// Audit trail, newest first.
    pub async fn recent_activities(&self, id: u64) -> Result<Vec<Activity>> {
        self.load(id).await?;
        self.audit.list_recent(id).await
    }

    // ─────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────

    /// Lock for an existing project. Unknown ids fail with `NotFound` and
    /// leave no entry behind; projects are never deleted, so an id checked
    /// here stays valid.
    async fn lock_existing(&self, id: u64) -> Result<Arc<Mutex<()>>> {
        if let Some(lock) = self.locks.get(&id) {
            return Ok(Arc::clone(lock.value()));
        }
        self.load(id).await?;
        Ok(self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    async fn load(&self, id: u64) -> Result<Project> {
        self.repository
            .get(id)
            .await?
            .ok_or(CertificationError::NotFound(id))
    }

    /// Load under the project lock, appending any entries a previous call
    /// could not.
    async fn load_for_update(&self, id: u64) -> Result<Project> {
        let mut project = self.load(id).await?;
        let repaired = self
            .audit
            .flush(self.repository.as_ref(), &mut project)
            .await?;
        if repaired > 0 {
            info!(project_id = id, repaired, "appended unlogged activities");
        }
        Ok(project)
    }

    async fn save_and_flush(&self, project: &mut Project) -> Result<()> {
        self.repository.save(project).await?;
        self.audit
            .flush(self.repository.as_ref(), project)
            .await?;
        Ok(())
    }

    async fn transition(&self, id: u64, actor: &str, event: Event) -> Result<Project> {
        let lock = self.lock_existing(id).await?;
        let _guard = lock.lock().await;

        let mut project = self.load_for_update(id).await?;
        let now = self.clock.now();
        let event_name = event.name();
        let transition = state_machine::apply(&mut project, event, now).map_err(|e| {
            warn!(project_id = id, event = event_name, "transition refused: {e}");
            e
        })?;

        project.unlogged_activities.push(AuditTrail::entry(
            id,
            transition.activity,
            actor,
            transition.description,
            now,
        ));
        self.save_and_flush(&mut project).await?;
        info!(
            project_id = id,
            from = %transition.from,
            to = %transition.to,
            actor,
            "certification status changed"
        );

        if transition.triggers_recording {
            self.recorder.commit(&mut project).await?;
        }
        Ok(project)
    }
}

fn describe_declaration(project: &Project) -> String {
    let d = &project.declaration;
    format!(
        "{} {} {}, {} for {} year(s): {:.4} t CO2/yr net",
        project.project_type,
        d.magnitude,
        project.project_type.magnitude_unit(),
        d.sub_method.as_deref().unwrap_or("default method"),
        d.duration_years,
        project.co2.net_available_co2,
    )
}
