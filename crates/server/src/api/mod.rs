use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use review_engine::{
    add_comment, cast_vote, create_or_update_talk, current_phase, delete_talk, get_talk,
    list_all_talks, list_my_talks, list_talks_by_speaker, set_talk_status, set_vote_phase,
    update_tags,
};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Actor, CommentId, ReviewerId, TalkId, TalkStatus},
    error::{ApiError, ErrorCode},
    protocol::{
        CommentRequest, StatusRequest, TalkForm, TalkPayload, UpdateTagsRequest, VotePhasePayload,
        VoteSummary,
    },
};
use tracing::error;

use crate::app_state::AppState;

/// Engine error carried to the HTTP edge.
#[derive(Debug)]
pub(crate) struct HttpError(pub(crate) ApiError);

impl From<ApiError> for HttpError {
    fn from(value: ApiError) -> Self {
        Self(value)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let err = self.0;
        match err.code {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            ErrorCode::NotFound => StatusCode::NOT_FOUND.into_response(),
            ErrorCode::Validation => (StatusCode::BAD_REQUEST, Json(err)).into_response(),
            ErrorCode::PhaseViolation => (StatusCode::CONFLICT, Json(err)).into_response(),
            ErrorCode::Internal => {
                error!(message = %err.message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
            }
        }
    }
}

type HttpResult<T> = Result<T, HttpError>;

#[derive(Debug, Deserialize)]
pub(crate) struct ActorQuery {
    pub(crate) user_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SpeakerTalksQuery {
    pub(crate) user_id: i64,
    pub(crate) status: Option<String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub(crate) struct CommentCreated {
    pub(crate) comment_id: CommentId,
}

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/talks", get(http_list_my_talks).post(http_save_talk))
        .route("/talks/all", get(http_list_all_talks))
        .route(
            "/talks/:talk_id",
            get(http_get_talk).delete(http_delete_talk),
        )
        .route("/talks/:talk_id/tags", put(http_update_tags))
        .route("/talks/:talk_id/comments", post(http_add_comment))
        .route("/talks/:talk_id/status", put(http_set_status))
        .route("/talks/:talk_id/votes/:score", post(http_cast_vote))
        .route("/speakers/:speaker_id/talks", get(http_list_speaker_talks))
        .route("/vote-phase", get(http_get_phase).put(http_set_phase))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    match state.api.storage.health_check().await {
        Ok(()) => "ok".into_response(),
        Err(error) => {
            error!(%error, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Maps the caller's `user_id` to a reviewer record; unknown ids are refused.
async fn resolve_actor(state: &AppState, user_id: i64) -> HttpResult<Actor> {
    state
        .api
        .storage
        .reviewer(ReviewerId(user_id))
        .await
        .map_err(|e| ApiError::new(ErrorCode::Internal, e.to_string()))?
        .ok_or_else(|| HttpError(ApiError::unauthorized()))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> HttpResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| HttpError(ApiError::new(ErrorCode::Validation, rejection.body_text())))
}

async fn http_list_my_talks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
) -> HttpResult<Json<Vec<TalkPayload>>> {
    let actor = resolve_actor(&state, q.user_id).await?;
    Ok(Json(list_my_talks(&state.api, &actor).await?))
}

async fn http_list_all_talks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
) -> HttpResult<Json<Vec<TalkPayload>>> {
    let actor = resolve_actor(&state, q.user_id).await?;
    Ok(Json(list_all_talks(&state.api, &actor).await?))
}

async fn http_list_speaker_talks(
    State(state): State<Arc<AppState>>,
    Path(speaker_id): Path<i64>,
    Query(q): Query<SpeakerTalksQuery>,
) -> HttpResult<Json<Vec<TalkPayload>>> {
    resolve_actor(&state, q.user_id).await?;
    let status = q
        .status
        .as_deref()
        .map(str::parse::<TalkStatus>)
        .transpose()
        .map_err(ApiError::from)?;
    Ok(Json(
        list_talks_by_speaker(&state.api, ReviewerId(speaker_id), status).await?,
    ))
}

async fn http_get_talk(
    State(state): State<Arc<AppState>>,
    Path(talk_id): Path<i64>,
    Query(q): Query<ActorQuery>,
) -> HttpResult<Json<TalkPayload>> {
    let actor = resolve_actor(&state, q.user_id).await?;
    Ok(Json(get_talk(&state.api, &actor, TalkId(talk_id)).await?))
}

async fn http_save_talk(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
    payload: Result<Json<TalkForm>, JsonRejection>,
) -> HttpResult<Json<TalkPayload>> {
    let actor = resolve_actor(&state, q.user_id).await?;
    let form = json_body(payload)?;
    Ok(Json(create_or_update_talk(&state.api, &actor, form).await?))
}

async fn http_delete_talk(
    State(state): State<Arc<AppState>>,
    Path(talk_id): Path<i64>,
    Query(q): Query<ActorQuery>,
) -> HttpResult<StatusCode> {
    let actor = resolve_actor(&state, q.user_id).await?;
    delete_talk(&state.api, &actor, TalkId(talk_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_update_tags(
    State(state): State<Arc<AppState>>,
    Path(talk_id): Path<i64>,
    Query(q): Query<ActorQuery>,
    payload: Result<Json<UpdateTagsRequest>, JsonRejection>,
) -> HttpResult<StatusCode> {
    let actor = resolve_actor(&state, q.user_id).await?;
    let req = json_body(payload)?;
    update_tags(&state.api, &actor, TalkId(talk_id), req.tags.as_deref()).await?;
    Ok(StatusCode::OK)
}

async fn http_add_comment(
    State(state): State<Arc<AppState>>,
    Path(talk_id): Path<i64>,
    Query(q): Query<ActorQuery>,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<CommentCreated>)> {
    let actor = resolve_actor(&state, q.user_id).await?;
    let req = json_body(payload)?;
    let comment_id = add_comment(&state.api, &actor, TalkId(talk_id), req.comment.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(CommentCreated { comment_id })))
}

async fn http_set_status(
    State(state): State<Arc<AppState>>,
    Path(talk_id): Path<i64>,
    Query(q): Query<ActorQuery>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> HttpResult<StatusCode> {
    let actor = resolve_actor(&state, q.user_id).await?;
    let req = json_body(payload)?;
    set_talk_status(&state.api, &actor, TalkId(talk_id), req.status).await?;
    Ok(StatusCode::OK)
}

async fn http_cast_vote(
    State(state): State<Arc<AppState>>,
    Path((talk_id, score)): Path<(i64, i64)>,
    Query(q): Query<ActorQuery>,
) -> HttpResult<Json<VoteSummary>> {
    let actor = resolve_actor(&state, q.user_id).await?;
    Ok(Json(cast_vote(&state.api, &actor, TalkId(talk_id), score).await?))
}

async fn http_get_phase(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
) -> HttpResult<Json<VotePhasePayload>> {
    resolve_actor(&state, q.user_id).await?;
    Ok(Json(VotePhasePayload {
        phase: current_phase(&state.api).await?,
    }))
}

async fn http_set_phase(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
    payload: Result<Json<VotePhasePayload>, JsonRejection>,
) -> HttpResult<Json<VotePhasePayload>> {
    let actor = resolve_actor(&state, q.user_id).await?;
    let req = json_body(payload)?;
    let phase = set_vote_phase(&state.api, &actor, req.phase).await?;
    Ok(Json(VotePhasePayload { phase }))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
