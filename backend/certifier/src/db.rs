//! Database layer — migrations, project repository and append-only activity
//! store over SQLite.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use co2_engine::types::NewActivity;
use co2_engine::{
    Activity, ActivityKind, ActivityStore, CertificationError, Project, ProjectRepository,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{Result, ServiceError};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
    if url.contains(":memory:") {
        // An in-memory database lives and dies with its connection.
        pool_options = pool_options
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>);
    }
    let pool = pool_options.connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    data: String,
}

impl ProjectRow {
    fn decode(self) -> Result<Project> {
        let project: Project = serde_json::from_str(&self.data)?;
        if project.id as i64 != self.id {
            return Err(ServiceError::Corrupt(format!(
                "project row {} holds record for id {}",
                self.id, project.id
            )));
        }
        Ok(project)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRecord {
    id: i64,
    project_id: i64,
    kind: String,
    title: String,
    description: String,
    actor: String,
    timestamp: String,
}

impl ActivityRecord {
    fn decode(self) -> Result<Activity> {
        let kind = ActivityKind::parse(&self.kind).ok_or_else(|| {
            ServiceError::Corrupt(format!("activity {} has unknown kind {}", self.id, self.kind))
        })?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| {
                ServiceError::Corrupt(format!("activity {} timestamp: {e}", self.id))
            })?
            .with_timezone(&Utc);
        Ok(Activity {
            id: self.id as u64,
            project_id: self.project_id as u64,
            kind,
            title: self.title,
            description: self.description,
            actor: self.actor,
            timestamp,
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ─────────────────────────────────────────────────────────
// Project repository
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteProjectRepository {
    pool: SqlitePool,
}

impl SqliteProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteProjectRepository { pool }
    }

    async fn next_id(&self) -> Result<u64> {
        let (id,): (i64,) = sqlx::query_as(
            "UPDATE project_counter SET next_id = next_id + 1 WHERE id = 1 RETURNING next_id - 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(id as u64)
    }

    async fn fetch(&self, id: u64) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT id, data FROM projects WHERE id = ?1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ProjectRow::decode).transpose()
    }

    async fn upsert(&self, project: &Project) -> Result<()> {
        let data = serde_json::to_string(project)?;
        sqlx::query(
            r#"
            INSERT INTO projects (id, owner_id, project_type, certification_status, data, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))
            ON CONFLICT (id) DO UPDATE SET
                certification_status = excluded.certification_status,
                data                 = excluded.data,
                updated_at           = excluded.updated_at
            "#,
        )
        .bind(project.id as i64)
        .bind(&project.owner_id)
        .bind(project.project_type.as_str())
        .bind(project.certification_status.as_str())
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_all(&self, owner_id: Option<&str>) -> Result<Vec<Project>> {
        let rows = match owner_id {
            Some(owner) => {
                sqlx::query_as::<_, ProjectRow>(
                    "SELECT id, data FROM projects WHERE owner_id = ?1 ORDER BY id ASC",
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ProjectRow>("SELECT id, data FROM projects ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(ProjectRow::decode).collect()
    }
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn next_project_id(&self) -> co2_engine::Result<u64> {
        Ok(self.next_id().await?)
    }

    async fn get(&self, id: u64) -> co2_engine::Result<Option<Project>> {
        Ok(self.fetch(id).await?)
    }

    async fn save(&self, project: &Project) -> co2_engine::Result<()> {
        self.upsert(project).await.map_err(CertificationError::from)
    }

    async fn list(&self, owner_id: Option<&str>) -> co2_engine::Result<Vec<Project>> {
        Ok(self.fetch_all(owner_id).await?)
    }
}

// ─────────────────────────────────────────────────────────
// Activity store
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteActivityStore {
    pool: SqlitePool,
}

impl SqliteActivityStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteActivityStore { pool }
    }

    async fn insert(&self, entry: NewActivity) -> Result<Activity> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO activities (project_id, kind, title, description, actor, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
        )
        .bind(entry.project_id as i64)
        .bind(entry.kind.as_str())
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(&entry.actor)
        .bind(format_timestamp(&entry.timestamp))
        .fetch_one(&self.pool)
        .await?;
        Ok(Activity::from_new(id as u64, entry))
    }

    async fn fetch_for_project(&self, project_id: u64) -> Result<Vec<Activity>> {
        let rows = sqlx::query_as::<_, ActivityRecord>(
            r#"
            SELECT id, project_id, kind, title, description, actor, timestamp
            FROM   activities
            WHERE  project_id = ?1
            ORDER  BY id ASC
            "#,
        )
        .bind(project_id as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ActivityRecord::decode).collect()
    }
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn append(&self, entry: NewActivity) -> co2_engine::Result<Activity> {
        Ok(self.insert(entry).await?)
    }

    async fn list(&self, project_id: u64) -> co2_engine::Result<Vec<Activity>> {
        Ok(self.fetch_for_project(project_id).await?)
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
