//! Append-only audit trail keyed by project id.
//!
//! There is no update or delete path: the number of activities recorded for
//! a project never decreases.
//!
//! The project and its trail live in separate stores. A state change is saved
//! together with its pending entry in `Project::unlogged_activities`, then
//! [`AuditTrail::flush`] appends and clears it. A failed append leaves the
//! entry on the project for the next flush, which skips anything already in
//! the trail, so each state change ends up with exactly one activity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::Result;
use crate::storage::{ActivityStore, ProjectRepository};
use crate::types::{Activity, ActivityKind, NewActivity, Project};

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn ActivityStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        AuditTrail { store }
    }

    pub async fn append(&self, entry: NewActivity) -> Result<Activity> {
        let activity = self.store.append(entry).await?;
        debug!(
            project_id = activity.project_id,
            activity_id = activity.id,
            kind = %activity.kind,
            "activity appended"
        );
        Ok(activity)
    }

    /// Entry with the default title for `kind`.
    pub fn entry(
        project_id: u64,
        kind: ActivityKind,
        actor: &str,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> NewActivity {
        NewActivity {
            project_id,
            kind,
            title: default_title(kind).to_string(),
            description: description.into(),
            actor: actor.to_string(),
            timestamp,
        }
    }

    /// Build and append an activity in one call.
    pub async fn record(
        &self,
        project_id: u64,
        kind: ActivityKind,
        actor: &str,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Activity> {
        self.append(Self::entry(project_id, kind, actor, description, timestamp))
            .await
    }

    /// Append the project's unlogged entries, then save it with none left.
    ///
    /// Entries whose kind and timestamp (to the microsecond) already appear in
    /// the trail are dropped instead of appended again. On error the project
    /// keeps every entry and nothing is saved. Returns how many were appended.
    pub async fn flush(
        &self,
        repository: &dyn ProjectRepository,
        project: &mut Project,
    ) -> Result<usize> {
        if project.unlogged_activities.is_empty() {
            return Ok(0);
        }
        let logged = self.store.list(project.id).await?;
        let mut appended = 0;
        for entry in &project.unlogged_activities {
            let already_logged = logged.iter().any(|a| {
                a.kind == entry.kind
                    && a.timestamp.timestamp_micros() == entry.timestamp.timestamp_micros()
            });
            if !already_logged {
                self.append(entry.clone()).await?;
                appended += 1;
            }
        }

        let mut flushed = project.clone();
        flushed.unlogged_activities.clear();
        repository.save(&flushed).await?;
        *project = flushed;
        Ok(appended)
    }

    /// Oldest first, for audit replay.
    pub async fn list(&self, project_id: u64) -> Result<Vec<Activity>> {
        let mut activities = self.store.list(project_id).await?;
        activities.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(activities)
    }

    /// Newest first, for display.
    pub async fn list_recent(&self, project_id: u64) -> Result<Vec<Activity>> {
        let mut activities = self.list(project_id).await?;
        activities.reverse();
        Ok(activities)
    }
}

fn default_title(kind: ActivityKind) -> &'static str {
    match kind {
        ActivityKind::Created => "Project submitted",
        ActivityKind::DeclarationUpdated => "Declaration updated",
        ActivityKind::Approved => "Certification approved",
        ActivityKind::Rejected => "Certification rejected",
        ActivityKind::Certified => "Certificate issued",
        ActivityKind::Recorded => "Recorded on ledger",
    }
}
