use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use taskdeck_common::{Capability, policy};
use tokio::sync::broadcast;

use super::auth::{Authorizer, Caller};
use super::db::{BoardDb, DbHandle};
use super::models::{NewTask, ProjectPatch, Task, TaskPatch, UserSummary};
use super::validation::{AddMember, CreateProject, MoveTask, ValidJson};
use super::ws::{BoardEvent, WsMessage, broadcast_message};
use crate::errors::{BoardError, FieldError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<BoardEvent>,
}

impl AppState {
    pub fn new(db: BoardDb) -> Self {
        let (ws_tx, _rx) = broadcast::channel::<BoardEvent>(256);
        Self {
            db: DbHandle::new(db),
            ws_tx,
        }
    }

    pub fn authorizer(&self) -> Authorizer {
        Authorizer::new(self.db.clone())
    }
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Validation(Vec<FieldError>),
    Unauthorized,
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({"error": msg})),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg}))
            }
            ApiError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({"error": errors}))
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({"error": "Unauthorized"}),
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, serde_json::json!({"error": msg})),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, serde_json::json!({"error": msg})),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({"error": "Internal server error"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::ProjectNotFound | BoardError::TaskNotFound | BoardError::UserNotFound => {
                ApiError::NotFound(err.to_string())
            }
            BoardError::PermissionDenied => ApiError::Forbidden(err.to_string()),
            BoardError::Unauthenticated => ApiError::Unauthorized,
            BoardError::Validation(errors) => ApiError::Validation(errors),
            BoardError::Conflict(msg) => ApiError::Conflict(msg),
            BoardError::BadRequest(msg) => ApiError::BadRequest(msg),
            BoardError::LockPoisoned => ApiError::Internal(err.to_string()),
            BoardError::Other(e) => ApiError::from(e),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BoardError>() {
            Ok(board) => board.into(),
            Err(other) => ApiError::Internal(format!("{:#}", other)),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/me", get(me))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/board", get(get_board))
        .route("/api/projects/{id}/members", post(add_member))
        .route(
            "/api/projects/{id}/members/{user_id}",
            delete(remove_member),
        )
        .route("/api/projects/{id}/tasks", post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", patch(move_task))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

async fn ensure_project_exists(state: &SharedState, id: &str) -> Result<(), ApiError> {
    let id = id.to_string();
    let exists = state
        .db
        .call(move |db| Ok(db.get_project(&id)?.is_some()))
        .await?;
    if exists {
        Ok(())
    } else {
        Err(BoardError::ProjectNotFound.into())
    }
}

async fn load_task(state: &SharedState, id: i64) -> Result<Task, ApiError> {
    let task = state.db.call(move |db| db.get_task(id)).await?;
    task.ok_or_else(|| BoardError::TaskNotFound.into())
}

/// Users who may view `project_id` right now.
async fn event_audience(state: &SharedState, project_id: &str) -> Arc<[String]> {
    let pid = project_id.to_string();
    match state.db.call(move |db| db.list_members(&pid)).await {
        Ok(members) => members
            .into_iter()
            .filter(|m| policy::is_allowed(Some(m.role), Capability::View))
            .map(|m| m.user.id)
            .collect(),
        Err(e) => {
            tracing::warn!(project_id, error = %e, "failed to resolve event audience");
            Arc::from(Vec::new())
        }
    }
}

/// Broadcast `msg` to the project's current viewers.
async fn publish(state: &SharedState, project_id: &str, msg: WsMessage) {
    let audience = event_audience(state, project_id).await;
    broadcast_message(&state.ws_tx, project_id, audience, &msg);
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn me(caller: Caller) -> Json<UserSummary> {
    Json(caller.user)
}

async fn list_projects(
    State(state): State<SharedState>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id().to_string();
    let projects = state
        .db
        .call(move |db| db.list_projects_for_user(&user_id))
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    caller: Caller,
    ValidJson(req): ValidJson<CreateProject>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = caller.id().to_string();
    let project = state
        .db
        .call(move |db| db.create_project(&owner_id, &req.title, req.description.as_deref()))
        .await?;
    tracing::info!(project_id = %project.id, user_id = %caller.id(), "project created");
    publish(
        &state,
        &project.id,
        WsMessage::ProjectCreated {
            project: project.clone(),
        },
    )
    .await;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /api/projects/{id}`: 404 for unknown ids, then the view check.
async fn get_project(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_project_exists(&state, &id).await?;
    state
        .authorizer()
        .require(&caller, &id, Capability::View)
        .await?;
    let detail = state
        .db
        .call(move |db| db.get_project_detail(&id, true))
        .await?
        .ok_or(BoardError::ProjectNotFound)?;
    Ok(Json(detail))
}

/// `PATCH /api/projects/{id}`: payload validation precedes the edit check.
async fn update_project(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<String>,
    ValidJson(patch): ValidJson<ProjectPatch>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .authorizer()
        .require(&caller, &id, Capability::Edit)
        .await?;
    let detail = state
        .db
        .call(move |db| {
            if db.update_project(&id, &patch)?.is_none() {
                return Ok(None);
            }
            db.get_project_detail(&id, false)
        })
        .await?
        .ok_or(BoardError::ProjectNotFound)?;
    tracing::info!(project_id = %detail.project.id, user_id = %caller.id(), "project updated");
    publish(
        &state,
        &detail.project.id,
        WsMessage::ProjectUpdated {
            project: detail.project.clone(),
        },
    )
    .await;
    Ok(Json(detail))
}

async fn delete_project(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .authorizer()
        .require(&caller, &id, Capability::Delete)
        .await?;
    // Resolved before the membership rows go away with the project.
    let audience = event_audience(&state, &id).await;
    let project_id = id.clone();
    let deleted = state
        .db
        .call(move |db| db.delete_project(&project_id))
        .await?;
    if !deleted {
        return Err(BoardError::ProjectNotFound.into());
    }
    tracing::info!(project_id = %id, user_id = %caller.id(), "project deleted");
    broadcast_message(
        &state.ws_tx,
        &id,
        audience,
        &WsMessage::ProjectDeleted {
            project_id: id.clone(),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn get_board(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_project_exists(&state, &id).await?;
    state
        .authorizer()
        .require(&caller, &id, Capability::View)
        .await?;
    let board = state
        .db
        .call(move |db| db.get_board(&id))
        .await?
        .ok_or(BoardError::ProjectNotFound)?;
    Ok(Json(board))
}

async fn add_member(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<AddMember>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .authorizer()
        .require(&caller, &id, Capability::ManageMembers)
        .await?;
    let project_id = id.clone();
    let member = state
        .db
        .call(move |db| db.add_member_by_email(&project_id, &req.email, req.role))
        .await?;
    tracing::info!(
        project_id = %id,
        member_id = %member.user.id,
        role = %member.role,
        "member added"
    );
    publish(
        &state,
        &id,
        WsMessage::MemberAdded {
            project_id: id.clone(),
            member: member.clone(),
        },
    )
    .await;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn remove_member(
    State(state): State<SharedState>,
    caller: Caller,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .authorizer()
        .require(&caller, &id, Capability::ManageMembers)
        .await?;
    // The removed user still hears about it.
    let audience = event_audience(&state, &id).await;
    let (project_id, member_id) = (id.clone(), user_id.clone());
    let removed = state
        .db
        .call(move |db| db.remove_member(&project_id, &member_id))
        .await?;
    if !removed {
        return Err(ApiError::NotFound("Member not found".into()));
    }
    tracing::info!(project_id = %id, member_id = %user_id, "member removed");
    broadcast_message(
        &state.ws_tx,
        &id,
        audience,
        &WsMessage::MemberRemoved {
            project_id: id.clone(),
            user_id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn create_task(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<String>,
    ValidJson(new): ValidJson<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .authorizer()
        .require(&caller, &id, Capability::Edit)
        .await?;
    let task = state
        .db
        .call(move |db| db.create_task(&id, &new))
        .await?;
    tracing::debug!(task_id = task.id, project_id = %task.project_id, "task created");
    publish(
        &state,
        &task.project_id,
        WsMessage::TaskCreated { task: task.clone() },
    )
    .await;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = load_task(&state, id).await?;
    state
        .authorizer()
        .require(&caller, &task.project_id, Capability::View)
        .await?;
    let detail = state
        .db
        .call(move |db| db.get_task_with_assignee(id))
        .await?
        .ok_or(BoardError::TaskNotFound)?;
    Ok(Json(detail))
}

async fn update_task(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<i64>,
    ValidJson(patch): ValidJson<TaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let task = load_task(&state, id).await?;
    state
        .authorizer()
        .require(&caller, &task.project_id, Capability::Edit)
        .await?;
    let task = state
        .db
        .call(move |db| db.update_task(id, &patch))
        .await?
        .ok_or(BoardError::TaskNotFound)?;
    publish(
        &state,
        &task.project_id,
        WsMessage::TaskUpdated { task: task.clone() },
    )
    .await;
    Ok(Json(task))
}

/// `PATCH /api/tasks/{id}/move`: drop a dragged card at `(status, order)`.
async fn move_task(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<i64>,
    ValidJson(req): ValidJson<MoveTask>,
) -> Result<impl IntoResponse, ApiError> {
    let before = load_task(&state, id).await?;
    state
        .authorizer()
        .require(&caller, &before.project_id, Capability::Edit)
        .await?;
    let moved = state
        .db
        .call(move |db| db.move_task(id, req.status, req.order))
        .await?
        .ok_or(BoardError::TaskNotFound)?;
    tracing::debug!(
        task_id = id,
        from = %before.status,
        to = %moved.status,
        order = moved.order,
        "task moved"
    );
    publish(
        &state,
        &before.project_id,
        WsMessage::TaskMoved {
            task_id: id,
            from_status: before.status,
            to_status: moved.status,
            order: moved.order,
        },
    )
    .await;
    Ok(Json(moved))
}

async fn delete_task(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = load_task(&state, id).await?;
    state
        .authorizer()
        .require(&caller, &task.project_id, Capability::Edit)
        .await?;
    let deleted = state.db.call(move |db| db.delete_task(id)).await?;
    if !deleted {
        return Err(BoardError::TaskNotFound.into());
    }
    tracing::info!(
        task_id = id,
        project_id = %task.project_id,
        user_id = %caller.id(),
        "task deleted"
    );
    publish(
        &state,
        &task.project_id,
        WsMessage::TaskDeleted {
            project_id: task.project_id.clone(),
            task_id: id,
        },
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────
