use std::collections::BTreeSet;
use std::time::Duration;

use rapport_common::{FriendRequest, Username};

use crate::error::FriendError;
use crate::store::{Conflict, RelationshipStore};
use crate::workflow::bounded;

/// Read-only views over the relationship store. Nothing here is cached.
#[derive(Clone)]
pub struct QueryService {
    store: RelationshipStore,
    timeout: Duration,
}

impl QueryService {
    pub fn new(store: RelationshipStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn list_friends(&self, user: Username) -> Result<BTreeSet<Username>, FriendError> {
        let store = self.store.clone();
        bounded(self.timeout, move || {
            known(&store, &user)?;
            store.friends_of(&user)
        })
        .await
    }

    pub async fn list_pending_incoming(&self, user: Username) -> Result<Vec<FriendRequest>, FriendError> {
        let store = self.store.clone();
        bounded(self.timeout, move || {
            known(&store, &user)?;
            store.pending_incoming(&user)
        })
        .await
    }

    pub async fn list_pending_outgoing(&self, user: Username) -> Result<Vec<FriendRequest>, FriendError> {
        let store = self.store.clone();
        bounded(self.timeout, move || {
            known(&store, &user)?;
            store.pending_outgoing(&user)
        })
        .await
    }

    pub async fn user_exists(&self, user: Username) -> Result<bool, FriendError> {
        let store = self.store.clone();
        bounded(self.timeout, move || Ok(store.directory().exists(&user)?)).await
    }

    pub async fn suggest(&self, needle: String, excluding: Option<Username>) -> Result<Vec<Username>, FriendError> {
        let store = self.store.clone();
        bounded(self.timeout, move || Ok(store.directory().suggest(&needle, excluding.as_ref())?)).await
    }
}

fn known(store: &RelationshipStore, user: &Username) -> crate::store::Result<()> {
    if store.directory().exists(user)? {
        Ok(())
    } else {
        Err(Conflict::UnknownUser(user.clone()).into())
    }
}
