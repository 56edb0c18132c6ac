//! HTTP API server.
//!
//! Exposes the full service surface — auth, workspaces, membership,
//! ingestion, document inventory, classification updates, query, and
//! audit listing — as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/auth/register` | Create an account + personal workspace |
//! | `POST`   | `/auth/login` | Exchange credentials for a bearer token |
//! | `POST`   | `/workspaces` | Create a workspace |
//! | `GET`    | `/workspaces` | List the caller's workspaces |
//! | `GET`    | `/workspaces/{id}/members` | List members |
//! | `POST`   | `/workspaces/{id}/members` | Add a member by email (admin) |
//! | `PATCH`  | `/workspaces/{id}/members/{user_id}` | Change a role (admin) |
//! | `DELETE` | `/workspaces/{id}/members/{user_id}` | Remove a member (admin) |
//! | `POST`   | `/workspaces/{id}/ingest/demo` | Ingest the demo corpus (admin) |
//! | `GET`    | `/workspaces/{id}/documents` | Document inventory |
//! | `PATCH`  | `/workspaces/{id}/documents/{doc_id}/classification` | Relabel (admin) |
//! | `POST`   | `/workspaces/{id}/query` | Query the workspace corpus |
//! | `GET`    | `/workspaces/{id}/chunks` | Inspect stored chunks |
//! | `GET`    | `/workspaces/{id}/audit` | List audit events (admin) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "forbidden", "message": "Workspace access denied." } }
//! ```
//!
//! Codes: `validation_error` (400), `unauthorized` (401), `forbidden`
//! (403), `not_found` (404), `no_data_ingested` (400),
//! `dependency_unavailable` (400), `integrity_error` (500),
//! `embedding_error` (500), `store_error` (500), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use docvault_core::audit::{actions, AuditSink};
use docvault_core::embedding::EmbeddingProvider;
use docvault_core::models::{ClassificationLabel, DocumentMetadata, WorkspaceRole};
use docvault_core::pipeline::{QueryPipeline, QueryResult, DEFAULT_TOP_K};
use docvault_core::store::ChunkStore;
use docvault_core::Error as CoreError;

use crate::audit::{self, SqlAuditSink};
use crate::auth::{self, CurrentUser, SqlRoleResolver};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::ingest::{run_ingest, IngestSummary};
use crate::sqlite_store::SqliteChunkStore;
use crate::synth::create_synthesizer;
use crate::workspace::{self, MemberOut, WorkspaceOut};
use crate::{db, migrate};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub store: Arc<dyn ChunkStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub pipeline: Arc<QueryPipeline>,
    pub audit: Arc<dyn AuditSink>,
}

/// Start the HTTP server. Runs migrations first (idempotent), builds the
/// provider stack from configuration, and serves until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let config = Arc::new(config.clone());
    let store: Arc<dyn ChunkStore> = Arc::new(SqliteChunkStore::new(pool.clone()));
    let embedder = create_provider(&config.embedding).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let audit: Arc<dyn AuditSink> = Arc::new(SqlAuditSink::new(pool.clone()));
    let roles = Arc::new(SqlRoleResolver::new(pool.clone(), config.auth.disabled));

    let mut pipeline = QueryPipeline::new(
        store.clone(),
        embedder.clone(),
        roles,
        audit.clone(),
    )
    .with_filtering_mode(config.retrieval.mode()?)
    .with_candidate_floor(config.retrieval.candidate_floor);

    if let Some(synthesizer) =
        create_synthesizer(&config.synthesis).map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        pipeline = pipeline.with_synthesizer(synthesizer);
    }

    let state = AppState {
        config: config.clone(),
        pool,
        store,
        embedder,
        pipeline: Arc::new(pipeline),
        audit,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    let bind_addr = &config.server.bind;
    tracing::info!(bind = %bind_addr, "docvault API listening");
    println!("docvault API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/auth/register", post(handle_register))
        .route("/auth/login", post(handle_login))
        .route("/workspaces", post(handle_workspace_create).get(handle_workspace_list))
        .route(
            "/workspaces/{workspace_id}/members",
            get(handle_members_list).post(handle_member_add),
        )
        .route(
            "/workspaces/{workspace_id}/members/{user_id}",
            patch(handle_member_role_update).delete(handle_member_remove),
        )
        .route("/workspaces/{workspace_id}/ingest/demo", post(handle_ingest_demo))
        .route("/workspaces/{workspace_id}/documents", get(handle_documents_list))
        .route(
            "/workspaces/{workspace_id}/documents/{document_id}/classification",
            patch(handle_classification_update),
        )
        .route("/workspaces/{workspace_id}/query", post(handle_query))
        .route("/workspaces/{workspace_id}/chunks", get(handle_chunks_list))
        .route("/workspaces/{workspace_id}/audit", get(handle_audit_list))
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g. `"forbidden"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Error type that converts into an HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation_error".to_string(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::NoDataIngested => StatusCode::BAD_REQUEST,
            // Only surfaced when synthesis was explicitly enabled, so a
            // client-visible bad-request class error is correct.
            CoreError::DependencyUnavailable(_) => StatusCode::BAD_REQUEST,
            CoreError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Embedding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Auth ============

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct UserOut {
    id: String,
    email: String,
}

#[derive(Serialize)]
struct AuthResponse {
    access_token: String,
    token_type: String,
    user: UserOut,
    default_workspace: Option<WorkspaceOut>,
}

fn validate_credentials(email: &str, password: &str) -> Result<(), AppError> {
    if email.len() < 3 || !email.contains('@') {
        return Err(AppError::bad_request("Invalid email address."));
    }
    if password.len() < 8 {
        return Err(AppError::bad_request(
            "Password must be at least 8 characters.",
        ));
    }
    Ok(())
}

async fn handle_register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    validate_credentials(&request.email, &request.password)?;

    let password_hash = auth::hash_password(&request.password)?;
    let user_id = workspace::create_user(&state.pool, &request.email, &password_hash).await?;

    // Every account starts with a personal workspace it administers.
    let default_workspace = workspace::create_workspace(&state.pool, "Personal", &user_id).await?;
    state
        .audit
        .record(
            &default_workspace.id,
            Some(&user_id),
            actions::WORKSPACE_CREATE,
            json!({"name": default_workspace.name.clone(), "outcome": "success"}),
        )
        .await;

    let access_token = auth::create_access_token(&user_id, &request.email, &state.config.auth)?;
    Ok(Json(AuthResponse {
        access_token,
        token_type: "bearer".to_string(),
        user: UserOut {
            id: user_id,
            email: request.email,
        },
        default_workspace: Some(default_workspace),
    }))
}

async fn handle_login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = workspace::find_user_by_email(&state.pool, &request.email).await?;
    let Some((user_id, password_hash)) = user else {
        return Err(AppError::unauthorized("Invalid credentials."));
    };
    if !auth::verify_password(&request.password, &password_hash) {
        return Err(AppError::unauthorized("Invalid credentials."));
    }

    let default_workspace = workspace::list_workspaces(&state.pool, &user_id)
        .await?
        .into_iter()
        .next();

    let access_token = auth::create_access_token(&user_id, &request.email, &state.config.auth)?;
    Ok(Json(AuthResponse {
        access_token,
        token_type: "bearer".to_string(),
        user: UserOut {
            id: user_id,
            email: request.email,
        },
        default_workspace,
    }))
}

// ============ Workspaces ============

#[derive(Deserialize)]
struct WorkspaceCreateRequest {
    name: String,
}

async fn handle_workspace_create(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Json(request): Json<WorkspaceCreateRequest>,
) -> Result<Json<WorkspaceOut>, AppError> {
    let workspace = workspace::create_workspace(&state.pool, &request.name, &caller.user_id).await?;
    state
        .audit
        .record(
            &workspace.id,
            Some(&caller.user_id),
            actions::WORKSPACE_CREATE,
            json!({"name": workspace.name.clone(), "outcome": "success"}),
        )
        .await;
    Ok(Json(workspace))
}

async fn handle_workspace_list(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<Vec<WorkspaceOut>>, AppError> {
    Ok(Json(
        workspace::list_workspaces(&state.pool, &caller.user_id).await?,
    ))
}

// ============ Members ============

#[derive(Deserialize)]
struct MemberAddRequest {
    email: String,
    #[serde(default = "default_member_role")]
    role: String,
}

fn default_member_role() -> String {
    WorkspaceRole::Member.as_str().to_string()
}

#[derive(Deserialize)]
struct MemberRoleUpdateRequest {
    role: String,
}

async fn handle_members_list(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<MemberOut>>, AppError> {
    auth::require_workspace_role(
        &state.pool,
        state.config.auth.disabled,
        &workspace_id,
        &caller.user_id,
        None,
    )
    .await?;
    Ok(Json(workspace::list_members(&state.pool, &workspace_id).await?))
}

async fn handle_member_add(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(workspace_id): Path<String>,
    Json(request): Json<MemberAddRequest>,
) -> Result<Json<MemberOut>, AppError> {
    auth::require_workspace_role(
        &state.pool,
        state.config.auth.disabled,
        &workspace_id,
        &caller.user_id,
        Some(WorkspaceRole::Admin),
    )
    .await?;

    let role = WorkspaceRole::from_str(&request.role)?;
    let member = workspace::add_member(&state.pool, &workspace_id, &request.email, role).await?;
    state
        .audit
        .record(
            &workspace_id,
            Some(&caller.user_id),
            actions::WORKSPACE_MEMBER_ADD,
            json!({"member_user_id": member.user_id.clone(), "role": member.role.clone(), "outcome": "success"}),
        )
        .await;
    Ok(Json(member))
}

async fn handle_member_role_update(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path((workspace_id, user_id)): Path<(String, String)>,
    Json(request): Json<MemberRoleUpdateRequest>,
) -> Result<Json<Vec<MemberOut>>, AppError> {
    auth::require_workspace_role(
        &state.pool,
        state.config.auth.disabled,
        &workspace_id,
        &caller.user_id,
        Some(WorkspaceRole::Admin),
    )
    .await?;

    let role = WorkspaceRole::from_str(&request.role)?;
    workspace::update_member_role(&state.pool, &workspace_id, &user_id, role).await?;
    state
        .audit
        .record(
            &workspace_id,
            Some(&caller.user_id),
            actions::WORKSPACE_MEMBER_ROLE_UPDATE,
            json!({"member_user_id": user_id, "role": role.as_str(), "outcome": "success"}),
        )
        .await;
    Ok(Json(workspace::list_members(&state.pool, &workspace_id).await?))
}

async fn handle_member_remove(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path((workspace_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    auth::require_workspace_role(
        &state.pool,
        state.config.auth.disabled,
        &workspace_id,
        &caller.user_id,
        Some(WorkspaceRole::Admin),
    )
    .await?;

    workspace::remove_member(&state.pool, &workspace_id, &user_id).await?;
    state
        .audit
        .record(
            &workspace_id,
            Some(&caller.user_id),
            actions::WORKSPACE_MEMBER_REMOVE,
            json!({"member_user_id": user_id, "outcome": "success"}),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Ingestion ============

async fn handle_ingest_demo(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<IngestSummary>, AppError> {
    auth::require_workspace_role(
        &state.pool,
        state.config.auth.disabled,
        &workspace_id,
        &caller.user_id,
        Some(WorkspaceRole::Admin),
    )
    .await?;

    let summary = run_ingest(
        state.store.as_ref(),
        state.embedder.as_ref(),
        &state.config,
        &workspace_id,
    )
    .await?;

    state
        .audit
        .record(
            &workspace_id,
            Some(&caller.user_id),
            actions::INGEST_DEMO,
            json!({
                "documents": summary.documents,
                "chunks": summary.chunks,
                "outcome": "success",
            }),
        )
        .await;

    Ok(Json(summary))
}

// ============ Documents ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_list_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_list_limit() -> usize {
    audit::DEFAULT_AUDIT_LIMIT
}

async fn handle_documents_list(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(workspace_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<DocumentMetadata>>, AppError> {
    auth::require_workspace_role(
        &state.pool,
        state.config.auth.disabled,
        &workspace_id,
        &caller.user_id,
        None,
    )
    .await?;

    let limit = params.limit.clamp(1, 200);
    Ok(Json(
        state
            .store
            .list_documents(&workspace_id, limit, params.offset)
            .await?,
    ))
}

#[derive(Deserialize)]
struct ClassificationUpdateRequest {
    classification_label: String,
}

async fn handle_classification_update(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path((workspace_id, document_id)): Path<(String, String)>,
    Json(request): Json<ClassificationUpdateRequest>,
) -> Result<Json<DocumentMetadata>, AppError> {
    let label = ClassificationLabel::from_str(&request.classification_label)?;
    let metadata = state
        .pipeline
        .update_classification(&workspace_id, &document_id, label, &caller)
        .await?;
    Ok(Json(metadata))
}

// ============ Query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    top_k: Option<usize>,
}

async fn handle_query(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(workspace_id): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResult>, AppError> {
    let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
    let result = state
        .pipeline
        .execute_query(&workspace_id, &request.question, top_k, &caller)
        .await?;
    Ok(Json(result))
}

// ============ Chunks ============

#[derive(Deserialize)]
struct ChunkListParams {
    #[serde(default = "default_chunk_limit")]
    limit: usize,
}

fn default_chunk_limit() -> usize {
    5
}

#[derive(Serialize)]
struct ChunkOut {
    chunk_id: String,
    document_id: String,
    chunk_index: i64,
    content: String,
    source_title: String,
    source_url: Option<String>,
}

async fn handle_chunks_list(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(workspace_id): Path<String>,
    Query(params): Query<ChunkListParams>,
) -> Result<Json<Vec<ChunkOut>>, AppError> {
    auth::require_workspace_role(
        &state.pool,
        state.config.auth.disabled,
        &workspace_id,
        &caller.user_id,
        None,
    )
    .await?;

    let chunks = state
        .store
        .list_chunks(&workspace_id, params.limit.clamp(1, 200))
        .await?;
    Ok(Json(
        chunks
            .into_iter()
            .map(|chunk| ChunkOut {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                chunk_index: chunk.chunk_index,
                content: chunk.content,
                source_title: chunk.source_title,
                source_url: chunk.source_url,
            })
            .collect(),
    ))
}

// ============ Audit ============

async fn handle_audit_list(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(workspace_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<audit::AuditEventOut>>, AppError> {
    auth::require_workspace_role(
        &state.pool,
        state.config.auth.disabled,
        &workspace_id,
        &caller.user_id,
        Some(WorkspaceRole::Admin),
    )
    .await?;

    Ok(Json(
        audit::list_events(&state.pool, &workspace_id, params.limit).await?,
    ))
}
