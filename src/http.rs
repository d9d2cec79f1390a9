//! Request-style HTTP API.
//!
//! Exposes version history, comments and the activity journal to an
//! external HTTP layer. The caller's identity arrives as a `user` query
//! parameter (authentication proper is an external collaborator); role
//! checks against the project's collaborator table happen here, before the
//! core is invoked.

use crate::journal::{CommentSelection, CommentStatus};
use crate::roles::Permission;
use crate::session::{Broker, SessionCtx};
use crate::state::document::DocumentContent;
use crate::versions::MergeStrategy;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Synthetic connection id for broker calls that originate over HTTP.
/// No sender is registered under it, so private replies are no-ops while
/// room broadcasts still reach live participants.
const HTTP_CONN: &str = "http";

type AppState = Arc<Broker>;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Forbidden,
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Forbidden => (StatusCode::FORBIDDEN, "permission denied".to_string()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct Identity {
    user: String,
    #[serde(default)]
    name: Option<String>,
}

impl Identity {
    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.user.clone())
    }

    fn session_ctx(&self, project_id: &str) -> SessionCtx {
        SessionCtx {
            conn_id: HTTP_CONN.to_string(),
            project_id: project_id.to_string(),
            user_id: self.user.clone(),
            name: self.display_name(),
        }
    }
}

/// Check the caller's role against the permission table.
fn require(
    broker: &Broker,
    project_id: &str,
    user_id: &str,
    permission: Permission,
) -> Result<(), ApiError> {
    if broker.hub.registry.get(project_id).is_none() {
        return Err(ApiError::NotFound(format!("no such project: {project_id}")));
    }
    match broker.hub.registry.role_of(project_id, user_id) {
        Some(role) if role.allows(permission) => Ok(()),
        _ => Err(ApiError::Forbidden),
    }
}

/// Build the API router.
pub fn router(broker: AppState) -> Router {
    Router::new()
        .route(
            "/projects/:id/versions",
            get(list_versions).post(create_version),
        )
        .route("/projects/:id/versions/:vid/restore", post(restore_version))
        .route("/projects/:id/versions/:vid/branch", post(branch_version))
        .route(
            "/projects/:id/versions/:vid",
            axum::routing::delete(delete_version),
        )
        .route("/projects/:id/merge", post(merge_branches))
        .route(
            "/projects/:id/comments",
            get(list_comments).post(create_comment),
        )
        .route("/projects/:id/comments/:cid", axum::routing::patch(update_comment))
        .route("/projects/:id/activity", get(list_activity))
        .route("/projects/:id/content", put(update_content))
        .with_state(broker)
}

/// Run the HTTP API server.
pub async fn run_http_server(addr: SocketAddr, broker: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, router(broker)).await?;
    Ok(())
}

async fn list_versions(
    State(broker): State<AppState>,
    Path(project_id): Path<String>,
    Query(identity): Query<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::View)?;
    Ok(Json(broker.versions.list(&project_id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotBody {
    label: Option<String>,
    branch: Option<String>,
    /// Optional explicit content; defaults to the project's live content.
    content: Option<DocumentContent>,
}

async fn create_version(
    State(broker): State<AppState>,
    Path(project_id): Path<String>,
    Query(identity): Query<Identity>,
    Json(body): Json<SnapshotBody>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::Edit)?;
    let project = broker
        .hub
        .registry
        .get(&project_id)
        .ok_or_else(|| ApiError::NotFound(format!("no such project: {project_id}")))?;

    let content = body.content.unwrap_or(project.content);
    let branch = body.branch.or(Some(project.current_branch));
    let version = broker
        .versions
        .snapshot(&project_id, &content, body.label, branch, None);
    Ok(Json(version))
}

async fn restore_version(
    State(broker): State<AppState>,
    Path((project_id, version_id)): Path<(String, String)>,
    Query(identity): Query<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::Edit)?;
    let project = broker
        .hub
        .registry
        .get(&project_id)
        .ok_or_else(|| ApiError::NotFound(format!("no such project: {project_id}")))?;

    let outcome = broker
        .versions
        .restore(
            &project_id,
            &version_id,
            &project.content,
            &project.current_branch,
        )
        .ok_or_else(|| ApiError::NotFound(format!("no such version: {version_id}")))?;

    // The restored content becomes the live content. No auto-snapshot here:
    // the restore itself already recorded both sides.
    broker
        .hub
        .registry
        .update_content(&project_id, outcome.content.clone());

    Ok(Json(json!({
        "content": outcome.content,
        "backup": outcome.backup,
        "restored": outcome.restored,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchBody {
    branch_name: String,
    label: Option<String>,
}

async fn branch_version(
    State(broker): State<AppState>,
    Path((project_id, version_id)): Path<(String, String)>,
    Query(identity): Query<Identity>,
    Json(body): Json<BranchBody>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::Edit)?;
    if body.branch_name.trim().is_empty() {
        return Err(ApiError::BadRequest("branch name must not be empty".into()));
    }
    let version = broker
        .versions
        .branch(&project_id, &version_id, body.branch_name.trim(), body.label)
        .ok_or_else(|| ApiError::NotFound(format!("no such version: {version_id}")))?;
    Ok(Json(version))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeBody {
    source_branch: String,
    target_branch: String,
    strategy: MergeStrategy,
}

async fn merge_branches(
    State(broker): State<AppState>,
    Path(project_id): Path<String>,
    Query(identity): Query<Identity>,
    Json(body): Json<MergeBody>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::Edit)?;
    let project = broker
        .hub
        .registry
        .get(&project_id)
        .ok_or_else(|| ApiError::NotFound(format!("no such project: {project_id}")))?;

    let outcome = broker
        .versions
        .merge(
            &project_id,
            &body.source_branch,
            &body.target_branch,
            body.strategy,
            &project.content,
        )
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "no unmerged version on branch: {}",
                body.source_branch
            ))
        })?;

    broker
        .hub
        .registry
        .update_content(&project_id, outcome.content.clone());

    Ok(Json(json!({
        "version": outcome.version,
        "content": outcome.content,
    })))
}

async fn delete_version(
    State(broker): State<AppState>,
    Path((project_id, version_id)): Path<(String, String)>,
    Query(identity): Query<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::Manage)?;
    if !broker.versions.remove(&project_id, &version_id) {
        return Err(ApiError::NotFound(format!("no such version: {version_id}")));
    }
    Ok(Json(json!({ "deleted": true })))
}

async fn list_comments(
    State(broker): State<AppState>,
    Path(project_id): Path<String>,
    Query(identity): Query<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::View)?;
    Ok(Json(broker.journal.list_comments(&project_id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentBody {
    text: String,
    selection: Option<CommentSelection>,
    thread_id: Option<String>,
    parent_id: Option<String>,
    task_id: Option<String>,
}

async fn create_comment(
    State(broker): State<AppState>,
    Path(project_id): Path<String>,
    Query(identity): Query<Identity>,
    Json(body): Json<CommentBody>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::Comment)?;
    let ctx = identity.session_ctx(&project_id);
    let comment = broker
        .comment_add(
            &ctx,
            body.text,
            body.selection,
            body.thread_id,
            body.parent_id,
            body.task_id,
        )
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(comment))
}

#[derive(Debug, Deserialize)]
struct CommentPatch {
    status: CommentStatus,
}

async fn update_comment(
    State(broker): State<AppState>,
    Path((project_id, comment_id)): Path<(String, String)>,
    Query(identity): Query<Identity>,
    Json(body): Json<CommentPatch>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::Comment)?;
    let ctx = identity.session_ctx(&project_id);
    let comment = broker
        .comment_update(&ctx, &comment_id, body.status)
        .await
        .map_err(|e| ApiError::NotFound(e.to_string()))?;
    Ok(Json(comment))
}

async fn list_activity(
    State(broker): State<AppState>,
    Path(project_id): Path<String>,
    Query(identity): Query<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    require(&broker, &project_id, &identity.user, Permission::View)?;
    Ok(Json(broker.journal.list_activity(&project_id)))
}

async fn update_content(
    State(broker): State<AppState>,
    Path(project_id): Path<String>,
    Query(identity): Query<Identity>,
    Json(content): Json<DocumentContent>,
) -> Result<impl IntoResponse, ApiError> {
    // Stand-in for the external project-update path: first caller owns.
    broker.hub.registry.ensure(&project_id, &identity.user);
    require(&broker, &project_id, &identity.user, Permission::Edit)?;

    let changed = broker
        .hub
        .registry
        .update_content(&project_id, content.clone())
        .is_some();
    // Auto-snapshot policy lives here, not in the version store: snapshot
    // only when the content actually changed.
    if changed {
        let branch = broker
            .hub
            .registry
            .get(&project_id)
            .map(|p| p.current_branch);
        broker
            .versions
            .snapshot(&project_id, &content, None, branch, None);
    }
    Ok(Json(json!({ "changed": changed })))
}
