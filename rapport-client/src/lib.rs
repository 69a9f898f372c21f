//! Typed HTTP client for the rapport friend service.
//!
//! Every method returns `anyhow::Result`. When the server answers with an error
//! the `anyhow::Error` wraps an [`ErrorBody`]; [`error_kind`] recovers its kind,
//! e.g. to treat `AlreadyFriends` as "already connected".

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use rapport_common::{
    ErrorBody, ErrorKind, FriendRequest, RequestCreated, RequestId, ResolveRequestBody, SendRequestBody, Username,
};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base)
    }

    pub fn with_http(http: reqwest::Client, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { http, base }
    }

    fn url(&self, path: &str) -> String {
        self.base.clone() + path
    }

    pub async fn register_user(&self, user: impl AsRef<Username>) -> Result<()> {
        send(self.http.put(self.url(&format!("/users/{}", user.as_ref())))).await?;
        Ok(())
    }

    pub async fn user_exists(&self, user: impl AsRef<Username>) -> Result<bool> {
        match send(self.http.get(self.url(&format!("/users/{}", user.as_ref())))).await {
            Ok(_) => Ok(true),
            Err(err) if error_kind(&err) == Some(ErrorKind::UserNotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn send_request(&self, sender: impl AsRef<Username>, receiver: impl AsRef<Username>) -> Result<RequestId> {
        let body = SendRequestBody {
            sender: sender.as_ref().clone(),
            receiver: receiver.as_ref().clone(),
        };
        let created: RequestCreated = json(self.http.post(self.url("/friends/requests")).json(&body)).await?;
        Ok(created.request_id)
    }

    pub async fn accept_request(&self, id: RequestId, acting_user: impl AsRef<Username>) -> Result<FriendRequest> {
        self.resolve(id, "accept", acting_user.as_ref()).await
    }

    pub async fn decline_request(&self, id: RequestId, acting_user: impl AsRef<Username>) -> Result<FriendRequest> {
        self.resolve(id, "decline", acting_user.as_ref()).await
    }

    async fn resolve(&self, id: RequestId, action: &str, acting_user: &Username) -> Result<FriendRequest> {
        let body = ResolveRequestBody {
            acting_user: acting_user.clone(),
        };
        json(
            self.http
                .post(self.url(&format!("/friends/requests/{id}/{action}")))
                .json(&body),
        )
        .await
    }

    pub async fn list_friends(&self, user: impl AsRef<Username>) -> Result<BTreeSet<Username>> {
        json(self.http.get(self.url(&format!("/friends/{}", user.as_ref())))).await
    }

    pub async fn list_pending_incoming(&self, user: impl AsRef<Username>) -> Result<Vec<FriendRequest>> {
        json(self.http.get(self.url(&format!("/friends/{}/pending", user.as_ref())))).await
    }

    pub async fn list_pending_outgoing(&self, user: impl AsRef<Username>) -> Result<Vec<FriendRequest>> {
        json(self.http.get(self.url(&format!("/friends/{}/sent", user.as_ref())))).await
    }

    pub async fn search_users(&self, q: &str, excluding: Option<&Username>) -> Result<Vec<Username>> {
        let mut query = vec![("q", q)];
        if let Some(excluding) = excluding {
            query.push(("excluding", excluding.as_str()));
        }
        json(self.http.get(self.url("/users/search")).query(&query)).await
    }
}

/// The server-reported kind behind a client error, if the server sent one.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<ErrorBody>().map(|body| body.kind)
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.context("Error sending request")?;
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let bytes = response.bytes().await.context("Error reading error body")?;
    let body = serde_json::from_slice::<ErrorBody>(&bytes).unwrap_or_else(|_| ErrorBody {
        kind: ErrorKind::Internal,
        message: format!("{status}: {}", String::from_utf8_lossy(&bytes)),
    });
    Err(body.into())
}

async fn json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    Ok(send(request).await?.json::<T>().await.context("Error decoding response")?)
}
