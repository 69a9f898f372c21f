use chrono::{DateTime, Utc};
use rapport_common::Username;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::error::FriendError;

/// Names that collide with static route segments (`/friends/requests`, `/users/search`).
pub const RESERVED_NAMES: [&str; 2] = ["requests", "search"];

#[derive(Clone, Debug, Serialize, Deserialize)]
struct UserRecord {
    registered_at: DateTime<Utc>,
}

/// The set of known usernames. Entries are written by the external identity
/// service (or seeded from config) and are never removed here.
#[derive(Clone)]
pub struct Directory {
    tree: Tree,
}

impl Directory {
    pub fn open(db: &Db) -> sled::Result<Self> {
        Ok(Self {
            tree: db.open_tree("users")?,
        })
    }

    /// Returns `true` if the username was not known before.
    pub fn register(&self, user: &Username) -> anyhow::Result<bool> {
        if user.as_str().is_empty() || RESERVED_NAMES.contains(&user.as_str()) {
            return Err(FriendError::InvalidUsername(user.clone()).into());
        }
        let record = serde_json::to_vec(&UserRecord { registered_at: Utc::now() })?;
        let swapped = self
            .tree
            .compare_and_swap(user.as_str(), None as Option<&[u8]>, Some(record))?;
        Ok(swapped.is_ok())
    }

    pub fn exists(&self, user: &Username) -> sled::Result<bool> {
        self.tree.contains_key(user.as_str())
    }

    /// Case-insensitive substring match over every known username, minus `excluding`.
    /// Keys come back from sled in byte order, so the result is sorted.
    pub fn suggest(&self, needle: &str, excluding: Option<&Username>) -> sled::Result<Vec<Username>> {
        let needle = needle.to_lowercase();
        let mut matches = Vec::new();
        for entry in self.tree.iter().keys() {
            let key = entry?;
            let Ok(name) = std::str::from_utf8(&key) else {
                continue;
            };
            if excluding.is_some_and(|excluded| excluded.as_str() == name) {
                continue;
            }
            if name.to_lowercase().contains(&needle) {
                matches.push(Username::from(name));
            }
        }
        Ok(matches)
    }
}
