//! # Storage
//!
//! Collaborator traits the engine persists through, plus in-memory
//! implementations used by tests and embedded deployments.
//!
//! | Trait               | Holds                 | Mutation                     |
//! |---------------------|-----------------------|------------------------------|
//! | [`ProjectRepository`] | `Project` by id     | id allocation, upsert        |
//! | [`ActivityStore`]     | `Activity` by project | append only                |
//!
//! Repositories are plain CRUD. Business rules (status transitions, recording
//! idempotency, per-project serialization) live in the engine, which owns the
//! only reference it is given at construction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::types::{Activity, NewActivity, Project};

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Atomically reserve the id for a new project.
    async fn next_project_id(&self) -> Result<u64>;

    async fn get(&self, id: u64) -> Result<Option<Project>>;

    /// Insert or replace the project with `project.id`.
    async fn save(&self, project: &Project) -> Result<()>;

    /// All projects, optionally filtered by owner, ordered by id.
    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Project>>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Persist `entry`, assigning it a store-wide unique id.
    async fn append(&self, entry: NewActivity) -> Result<Activity>;

    /// Activities for `project_id` in insertion order.
    async fn list(&self, project_id: u64) -> Result<Vec<Activity>>;
}

// ── In-memory project repository ─────────────────────────────────────

#[derive(Debug)]
pub struct InMemoryProjectRepository {
    next_id: AtomicU64,
    projects: RwLock<BTreeMap<u64, Project>>,
}

impl Default for InMemoryProjectRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProjectRepository {
    pub fn new() -> Self {
        InMemoryProjectRepository {
            next_id: AtomicU64::new(1),
            projects: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn next_project_id(&self) -> Result<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn get(&self, id: u64) -> Result<Option<Project>> {
        Ok(self.projects.read().await.get(&id).cloned())
    }

    async fn save(&self, project: &Project) -> Result<()> {
        self.projects
            .write()
            .await
            .insert(project.id, project.clone());
        Ok(())
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Project>> {
        let projects = self.projects.read().await;
        Ok(projects
            .values()
            .filter(|p| owner_id.map_or(true, |owner| p.owner_id == owner))
            .cloned()
            .collect())
    }
}

// ── In-memory activity store ─────────────────────────────────────────

#[derive(Debug, Default)]
struct ActivityLog {
    next_id: u64,
    by_project: HashMap<u64, Vec<Activity>>,
}

/// Readers take the shared lock and clone a complete `Vec`, so they see the
/// list either before or after a concurrent append, never a partial entry.
#[derive(Debug, Default)]
pub struct InMemoryActivityStore {
    log: RwLock<ActivityLog>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn append(&self, entry: NewActivity) -> Result<Activity> {
        let mut log = self.log.write().await;
        log.next_id += 1;
        let activity = Activity::from_new(log.next_id, entry);
        log.by_project
            .entry(activity.project_id)
            .or_default()
            .push(activity.clone());
        Ok(activity)
    }

    async fn list(&self, project_id: u64) -> Result<Vec<Activity>> {
        let log = self.log.read().await;
        Ok(log.by_project.get(&project_id).cloned().unwrap_or_default())
    }
}
