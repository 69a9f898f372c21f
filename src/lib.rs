use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Debug, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Username(pub String);
impl AsRef<Username> for Username {
    fn as_ref(&self) -> &Username {
        self
    }
}
impl Username {
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl From<&str> for Username {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Eq, PartialEq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);
impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}
impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}
impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Eq, PartialEq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}
impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// A friend request as stored by the server and returned to clients.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: RequestId,
    pub sender: Username,
    pub receiver: Username,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
/// Emitted after every successful state transition. A delivery layer relays these to clients.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "event", content = "request", rename_all = "camelCase")]
pub enum FriendEvent {
    RequestSent(FriendRequest),
    RequestAccepted(FriendRequest),
    RequestDeclined(FriendRequest),
}
impl FriendEvent {
    pub fn request(&self) -> &FriendRequest {
        match self {
            FriendEvent::RequestSent(request)
            | FriendEvent::RequestAccepted(request)
            | FriendEvent::RequestDeclined(request) => request,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct SendRequestBody {
    pub sender: Username,
    pub receiver: Username,
}
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequestBody {
    pub acting_user: Username,
}
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestCreated {
    pub request_id: RequestId,
}
#[derive(Clone, Debug, Serialize, Deserialize, Default, Eq, PartialEq)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub excluding: Option<Username>,
}

#[derive(Eq, PartialEq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum ErrorKind {
    SelfRequest,
    UserNotFound,
    InvalidUsername,
    AlreadyFriends,
    RequestAlreadyPending,
    RequestNotFound,
    NotAuthorized,
    Unavailable,
    Timeout,
    Internal,
}
impl ErrorKind {
    /// Only store availability failures are worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Unavailable | ErrorKind::Timeout)
    }
}

/// JSON body of every non-2xx response.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}
