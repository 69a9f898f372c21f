use std::collections::BTreeSet;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use rapport_common::{
    FriendRequest, RequestCreated, RequestId, ResolveRequestBody, SearchQuery, SendRequestBody, Username,
};

use crate::error::{FriendError, Result};
use crate::AppState;

pub fn router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/friends/requests", post(send_request))
        .route("/friends/requests/:id/accept", post(accept_request))
        .route("/friends/requests/:id/decline", post(decline_request))
        .route("/friends/:user", get(list_friends))
        .route("/friends/:user/pending", get(list_pending_incoming))
        .route("/friends/:user/sent", get(list_pending_outgoing))
        .route("/users/search", get(search_users))
        .route("/users/:user", get(get_user).put(register_user))
}

async fn root() -> &'static str {
    "ok"
}

async fn send_request(Extension(state): Extension<AppState>, Json(body): Json<SendRequestBody>) -> Result<impl IntoResponse> {
    let request_id = state.workflow.send_request(body.sender, body.receiver).await?;
    Ok((StatusCode::CREATED, Json(RequestCreated { request_id })))
}

async fn accept_request(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveRequestBody>,
) -> Result<Json<FriendRequest>> {
    let id = parse_id(&id)?;
    Ok(Json(state.workflow.accept_request(id, body.acting_user).await?))
}

async fn decline_request(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveRequestBody>,
) -> Result<Json<FriendRequest>> {
    let id = parse_id(&id)?;
    Ok(Json(state.workflow.decline_request(id, body.acting_user).await?))
}

async fn list_friends(Extension(state): Extension<AppState>, Path(user): Path<String>) -> Result<Json<BTreeSet<Username>>> {
    Ok(Json(state.queries.list_friends(Username(user)).await?))
}

async fn list_pending_incoming(Extension(state): Extension<AppState>, Path(user): Path<String>) -> Result<Json<Vec<FriendRequest>>> {
    Ok(Json(state.queries.list_pending_incoming(Username(user)).await?))
}

async fn list_pending_outgoing(Extension(state): Extension<AppState>, Path(user): Path<String>) -> Result<Json<Vec<FriendRequest>>> {
    Ok(Json(state.queries.list_pending_outgoing(Username(user)).await?))
}

async fn search_users(Extension(state): Extension<AppState>, Query(query): Query<SearchQuery>) -> Result<Json<Vec<Username>>> {
    Ok(Json(state.queries.suggest(query.q, query.excluding).await?))
}

async fn get_user(Extension(state): Extension<AppState>, Path(user): Path<String>) -> Result<StatusCode> {
    let user = Username(user);
    if state.queries.user_exists(user.clone()).await? {
        Ok(StatusCode::OK)
    } else {
        Err(FriendError::UserNotFound(user).into())
    }
}

/// Directory sync point for the identity service.
async fn register_user(Extension(state): Extension<AppState>, Path(user): Path<String>) -> Result<StatusCode> {
    let user = Username(user);
    if state.directory.register(&user)? {
        tracing::info!(%user, "user registered");
        Ok(StatusCode::CREATED)
    } else {
        Ok(StatusCode::OK)
    }
}

// Malformed ids are indistinguishable from unknown ones.
fn parse_id(id: &str) -> std::result::Result<RequestId, FriendError> {
    RequestId::parse(id).ok_or(FriendError::RequestNotFound)
}
