use crate::api::{ApiError, CommandRequest, RestoreResponse};
use crate::core::Dispatcher;
use crate::sandbox::CommandReply;
use crate::storage::{ExerciseId, SessionId, SessionStore};
use axum::async_trait;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::Json;
use std::sync::Arc;

/// Session token read from the `x-session-id` header. Issuing tokens is the
/// surrounding system's job; this layer only requires one to be present.
pub struct SessionToken(pub SessionId);

#[async_trait]
impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-session-id")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|value| SessionToken(SessionId::from(value)))
            .ok_or_else(|| ApiError::BadRequest("missing x-session-id header".to_string()))
    }
}

/// POST /api/v1/exercises/:id/command: run one command or editor input
pub async fn run_command<S: SessionStore + 'static>(
    State(dispatcher): State<Arc<Dispatcher<S>>>,
    Path(exercise): Path<i64>,
    SessionToken(session): SessionToken,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandReply>, ApiError> {
    let reply = dispatcher
        .submit(session, ExerciseId(exercise), request.mode, request.message)
        .await?;

    Ok(Json(reply))
}

/// DELETE /api/v1/exercises/:id/command: drop the binding's history and
/// sandbox
pub async fn delete_history<S: SessionStore + 'static>(
    State(dispatcher): State<Arc<Dispatcher<S>>>,
    Path(exercise): Path<i64>,
    SessionToken(session): SessionToken,
) -> Result<(), ApiError> {
    dispatcher
        .delete_binding(session, ExerciseId(exercise))
        .await?;

    Ok(())
}

/// POST /api/v1/exercises/:id/restore: replay the binding's log onto a
/// freshly provisioned sandbox
pub async fn restore_sandbox<S: SessionStore + 'static>(
    State(dispatcher): State<Arc<Dispatcher<S>>>,
    Path(exercise): Path<i64>,
    SessionToken(session): SessionToken,
) -> Result<Json<RestoreResponse>, ApiError> {
    let sandbox_id = dispatcher.restore(session, ExerciseId(exercise)).await?;

    Ok(Json(RestoreResponse { sandbox_id }))
}

/// DELETE /api/v1/session: drop every binding of the session
pub async fn delete_session<S: SessionStore + 'static>(
    State(dispatcher): State<Arc<Dispatcher<S>>>,
    SessionToken(session): SessionToken,
) -> Result<(), ApiError> {
    dispatcher.delete_session(session).await?;

    Ok(())
}
