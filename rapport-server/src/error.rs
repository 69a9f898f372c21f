use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rapport_common::{ErrorBody, ErrorKind, Username};

use crate::store::{Conflict, StoreError};

/// Caller-facing failures of the friend workflow and queries.
#[derive(Debug, thiserror::Error)]
pub enum FriendError {
    #[error("cannot send a friend request to yourself")]
    SelfRequest,
    #[error("user {0} not found")]
    UserNotFound(Username),
    #[error("{0} is reserved and cannot be registered")]
    InvalidUsername(Username),
    #[error("already friends")]
    AlreadyFriends,
    #[error("a friend request between these users is already pending")]
    RequestAlreadyPending,
    #[error("friend request not found")]
    RequestNotFound,
    #[error("only the receiver may resolve this request")]
    NotAuthorized,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store did not respond in time")]
    Timeout,
}

impl FriendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FriendError::SelfRequest => ErrorKind::SelfRequest,
            FriendError::UserNotFound(_) => ErrorKind::UserNotFound,
            FriendError::InvalidUsername(_) => ErrorKind::InvalidUsername,
            FriendError::AlreadyFriends => ErrorKind::AlreadyFriends,
            FriendError::RequestAlreadyPending => ErrorKind::RequestAlreadyPending,
            FriendError::RequestNotFound => ErrorKind::RequestNotFound,
            FriendError::NotAuthorized => ErrorKind::NotAuthorized,
            FriendError::Unavailable(_) => ErrorKind::Unavailable,
            FriendError::Timeout => ErrorKind::Timeout,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn status(&self) -> StatusCode {
        match self {
            FriendError::SelfRequest | FriendError::InvalidUsername(_) => StatusCode::BAD_REQUEST,
            FriendError::UserNotFound(_) | FriendError::RequestNotFound => StatusCode::NOT_FOUND,
            FriendError::AlreadyFriends | FriendError::RequestAlreadyPending => StatusCode::CONFLICT,
            FriendError::NotAuthorized => StatusCode::FORBIDDEN,
            FriendError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FriendError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<Conflict> for FriendError {
    fn from(conflict: Conflict) -> Self {
        match conflict {
            Conflict::SelfPair => FriendError::SelfRequest,
            Conflict::UnknownUser(user) => FriendError::UserNotFound(user),
            Conflict::AlreadyFriends => FriendError::AlreadyFriends,
            Conflict::PendingExists => FriendError::RequestAlreadyPending,
            Conflict::NotPending => FriendError::RequestNotFound,
            Conflict::NotReceiver => FriendError::NotAuthorized,
        }
    }
}

impl From<StoreError> for FriendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(conflict) => conflict.into(),
            StoreError::Storage(err) => FriendError::Unavailable(err.to_string()),
            StoreError::Codec(err) => FriendError::Unavailable(err.to_string()),
        }
    }
}

impl From<sled::Error> for FriendError {
    fn from(err: sled::Error) -> Self {
        FriendError::Unavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

pub struct AppError(anyhow::Error);

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.0.downcast_ref::<FriendError>() {
            Some(err) => (err.status(), err.kind()),
            None => {
                tracing::error!(error = %self.0, "unhandled error");
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal)
            }
        };
        let body = ErrorBody {
            kind,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// This enables using `?` on anything convertible to `anyhow::Error`, `FriendError` included.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
