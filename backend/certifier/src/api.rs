//! Axum REST API handlers.
//!
//! | Route                               | Engine operation        |
//! |-------------------------------------|-------------------------|
//! | `GET  /health`                      | —                       |
//! | `GET  /projects?owner_id=`          | `list_projects`         |
//! | `POST /projects`                    | `create_project`        |
//! | `GET  /projects/:id`                | `get_project`           |
//! | `PUT  /projects/:id/declaration`    | `update_declaration`    |
//! | `POST /projects/:id/recalculate`    | `recalculate`           |
//! | `POST /projects/:id/approve`        | `approve`               |
//! | `POST /projects/:id/reject`         | `reject`                |
//! | `POST /projects/:id/certify`        | `certify`               |
//! | `POST /projects/:id/commit`         | `commit`                |
//! | `GET  /projects/:id/activities`     | `activities` / `recent_activities` |

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use co2_engine::{
    Activity, CertificationError, Co2Result, Declaration, LifecycleStatus, NewProject, Project,
    Recording, WorkflowEngine,
};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<WorkflowEngine>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/declaration", put(update_declaration))
        .route("/projects/:id/recalculate", post(recalculate))
        .route("/projects/:id/approve", post(approve))
        .route("/projects/:id/reject", post(reject))
        .route("/projects/:id/certify", post(certify))
        .route("/projects/:id/commit", post(commit))
        .route("/projects/:id/activities", get(activities))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListQuery {
    pub owner_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ActivitiesQuery {
    pub order: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateDeclarationRequest {
    pub actor: String,
    pub declaration: Declaration,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub actor: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Deserialize)]
pub struct CertifyRequest {
    pub actor: String,
    pub certificate_number: String,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub lifecycle_status: LifecycleStatus,
}

impl From<Project> for ProjectView {
    fn from(project: Project) -> Self {
        let lifecycle_status = project.lifecycle_status();
        ProjectView {
            project,
            lifecycle_status,
        }
    }
}

#[derive(Serialize)]
pub struct ProjectsResponse {
    pub count: usize,
    pub projects: Vec<ProjectView>,
}

#[derive(Serialize)]
pub struct ActivitiesResponse {
    pub project_id: u64,
    pub count: usize,
    pub activities: Vec<Activity>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

/// Engine error rendered as a JSON body with a matching status code.
pub struct ApiError(CertificationError);

impl From<CertificationError> for ApiError {
    fn from(e: CertificationError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            CertificationError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CertificationError::InvalidTransition { .. }
            | CertificationError::CertificationNotApproved { .. } => StatusCode::CONFLICT,
            CertificationError::NotFound(_) => StatusCode::NOT_FOUND,
            CertificationError::ExternalCommit(_) => StatusCode::BAD_GATEWAY,
            CertificationError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ─────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────
//
// Thin wrappers over axum's extractors so malformed ids, query strings and
// bodies answer with the same `{error, kind}` shape as engine errors.

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(CertificationError::Validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(CertificationError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(CertificationError::Validation(rejection.body_text()))
    }
}

pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /projects?owner_id=`
pub async fn list_projects(
    State(state): State<Arc<ApiState>>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<ProjectsResponse> {
    let projects: Vec<ProjectView> = state
        .engine
        .list_projects(query.owner_id.as_deref())
        .await?
        .into_iter()
        .map(ProjectView::from)
        .collect();
    Ok(Json(ProjectsResponse {
        count: projects.len(),
        projects,
    }))
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    ApiJson(new): ApiJson<NewProject>,
) -> Result<(StatusCode, Json<ProjectView>), ApiError> {
    let project = state.engine.create_project(new).await?;
    Ok((StatusCode::CREATED, Json(project.into())))
}

/// `GET /projects/:id`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<u64>,
) -> ApiResult<ProjectView> {
    Ok(Json(state.engine.get_project(id).await?.into()))
}

/// `PUT /projects/:id/declaration`
///
/// Only `pending` projects accept a new declaration.
pub async fn update_declaration(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(req): ApiJson<UpdateDeclarationRequest>,
) -> ApiResult<ProjectView> {
    let project = state
        .engine
        .update_declaration(id, &req.actor, req.declaration)
        .await?;
    Ok(Json(project.into()))
}

/// `POST /projects/:id/recalculate`
pub async fn recalculate(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<u64>,
) -> ApiResult<Co2Result> {
    Ok(Json(state.engine.recalculate(id).await?))
}

/// `POST /projects/:id/approve`
///
/// A `502` here means the approval stuck but the ledger commit did not; the
/// retry worker or `POST /projects/:id/commit` completes it.
pub async fn approve(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(req): ApiJson<ReviewRequest>,
) -> ApiResult<ProjectView> {
    let project = state.engine.approve(id, &req.actor, &req.notes).await?;
    Ok(Json(project.into()))
}

/// `POST /projects/:id/reject`
pub async fn reject(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(req): ApiJson<ReviewRequest>,
) -> ApiResult<ProjectView> {
    let project = state.engine.reject(id, &req.actor, &req.notes).await?;
    Ok(Json(project.into()))
}

/// `POST /projects/:id/certify`
pub async fn certify(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(req): ApiJson<CertifyRequest>,
) -> ApiResult<ProjectView> {
    let project = state
        .engine
        .certify(id, &req.actor, &req.certificate_number)
        .await?;
    Ok(Json(project.into()))
}

/// `POST /projects/:id/commit`
pub async fn commit(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<u64>,
) -> ApiResult<Recording> {
    Ok(Json(state.engine.commit(id).await?))
}

/// `GET /projects/:id/activities?order=asc|desc`
///
/// Oldest first unless `order=desc`.
pub async fn activities(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<u64>,
    ApiQuery(query): ApiQuery<ActivitiesQuery>,
) -> ApiResult<ActivitiesResponse> {
    let activities = match query.order.as_deref() {
        None | Some("asc") => state.engine.activities(id).await?,
        Some("desc") => state.engine.recent_activities(id).await?,
        Some(other) => {
            return Err(CertificationError::Validation(format!(
                "order must be asc or desc, got {other:?}"
            ))
            .into())
        }
    };
    Ok(Json(ActivitiesResponse {
        project_id: id,
        count: activities.len(),
        activities,
    }))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
