use std::time::Duration;

use rapport_common::{FriendEvent, FriendRequest, RequestId, Username};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::FriendError;
use crate::events::EventHub;
use crate::store::{Outcome, RelationshipStore, StoreError};

/// The request state machine. Every transition goes through one store
/// primitive, so no check-then-write spans two store calls.
#[derive(Clone)]
pub struct Workflow {
    store: RelationshipStore,
    events: EventHub,
    timeout: Duration,
}

impl Workflow {
    pub fn new(store: RelationshipStore, events: EventHub, timeout: Duration) -> Self {
        Self { store, events, timeout }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FriendEvent> {
        self.events.subscribe()
    }

    /// Events are published from the store task itself, right after the commit,
    /// so a caller that timed out still leaves an announced transition behind.
    pub async fn send_request(&self, sender: Username, receiver: Username) -> Result<RequestId, FriendError> {
        let (store, events) = (self.store.clone(), self.events.clone());
        let (from, to) = (sender.clone(), receiver.clone());
        let request = bounded(self.timeout, move || {
            let request = store.try_create_request(&from, &to)?;
            info!(request = %request.id, sender = %from, receiver = %to, "friend request sent");
            events.publish(FriendEvent::RequestSent(request.clone()));
            Ok(request)
        })
        .await
        .map_err(|err| {
            debug!(%sender, %receiver, %err, "friend request refused");
            err
        })?;
        Ok(request.id)
    }

    pub async fn accept_request(&self, id: RequestId, acting_user: Username) -> Result<FriendRequest, FriendError> {
        self.resolve(id, Outcome::Accepted, acting_user).await
    }

    pub async fn decline_request(&self, id: RequestId, acting_user: Username) -> Result<FriendRequest, FriendError> {
        self.resolve(id, Outcome::Declined, acting_user).await
    }

    async fn resolve(&self, id: RequestId, outcome: Outcome, acting_user: Username) -> Result<FriendRequest, FriendError> {
        let (store, events) = (self.store.clone(), self.events.clone());
        let actor = acting_user.clone();
        bounded(self.timeout, move || {
            let request = store.try_resolve(id, outcome, &actor)?;
            info!(request = %id, sender = %request.sender, receiver = %request.receiver, ?outcome, "friend request resolved");
            events.publish(match outcome {
                Outcome::Accepted => FriendEvent::RequestAccepted(request.clone()),
                Outcome::Declined => FriendEvent::RequestDeclined(request.clone()),
            });
            Ok(request)
        })
        .await
        .map_err(|err| {
            debug!(request = %id, ?outcome, %acting_user, %err, "resolution refused");
            err
        })
    }
}

/// Runs a blocking store call on the blocking pool, giving up after `timeout`.
/// The call is not cancelled; whatever it commits after the deadline stays committed.
pub(crate) async fn bounded<T, F>(timeout: Duration, op: F) -> Result<T, FriendError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(op)).await {
        Ok(Ok(result)) => result.map_err(|err| {
            if let StoreError::Storage(err) = &err {
                warn!(%err, "store operation failed");
            }
            FriendError::from(err)
        }),
        Ok(Err(join)) => {
            warn!(%join, "store task failed");
            Err(FriendError::Unavailable(join.to_string()))
        }
        Err(_) => {
            warn!(?timeout, "store operation timed out");
            Err(FriendError::Timeout)
        }
    }
}
