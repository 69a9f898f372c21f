//! The relationship store: the only owner of friend edges and friend requests.
//!
//! Everything lives in one sled tree, `graph`, under single-byte prefixes:
//!
//! - `p` pair cell, one per unordered pair of users (pending or friends)
//! - `r` request record by id, kept after resolution as history
//! - `f` friend edge `user, friend`, written in both directions
//! - `i`/`o` pending index `user, created_at, id` for received and sent requests
//!
//! A mutation takes the lock for its pair, reads and checks the pair cell, and
//! commits every key it touches with one `apply_batch`. Readers never see half
//! a transition. Operations on different pairs hold different locks and no two
//! pairs write the same key. The only thing they share is sled's short commit
//! section inside `apply_batch`, which runs no decoding or checks.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rapport_common::{FriendRequest, RequestId, RequestStatus, Username};
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};

use crate::directory::Directory;
use crate::pair_lock::PairLocks;

/// Why a store primitive refused to act.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    #[error("a user cannot befriend themselves")]
    SelfPair,
    #[error("unknown user {0}")]
    UnknownUser(Username),
    #[error("the pair are already friends")]
    AlreadyFriends,
    #[error("a request between the pair is already pending")]
    PendingExists,
    #[error("the request is not pending")]
    NotPending,
    #[error("only the receiver may resolve a request")]
    NotReceiver,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Conflict(#[from] Conflict),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("corrupt record: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Declined,
}

impl From<Outcome> for RequestStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Accepted => RequestStatus::Accepted,
            Outcome::Declined => RequestStatus::Declined,
        }
    }
}

/// State of one unordered pair. No entry means the pair are strangers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
enum PairState {
    Pending { request: RequestId },
    Friends { since: DateTime<Utc> },
}

#[derive(Clone)]
pub struct RelationshipStore {
    directory: Directory,
    graph: Tree,
    locks: Arc<PairLocks>,
}

impl RelationshipStore {
    pub fn open(db: &Db, directory: Directory) -> sled::Result<Self> {
        Ok(Self {
            directory,
            graph: db.open_tree("graph")?,
            locks: Arc::default(),
        })
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn try_create_request(&self, sender: &Username, receiver: &Username) -> Result<FriendRequest> {
        if sender == receiver {
            return Err(Conflict::SelfPair.into());
        }
        for user in [sender, receiver] {
            if !self.directory.exists(user)? {
                return Err(Conflict::UnknownUser(user.clone()).into());
            }
        }

        let pair = pair_key(sender, receiver);
        let _guard = self.locks.lock(&pair);
        if let Some(raw) = self.graph.get(&pair)? {
            return Err(match serde_json::from_slice::<PairState>(&raw)? {
                PairState::Pending { .. } => Conflict::PendingExists,
                PairState::Friends { .. } => Conflict::AlreadyFriends,
            }
            .into());
        }

        // Stamped under the pair lock so the index order matches commit order per pair.
        let request = FriendRequest {
            id: RequestId::new(),
            sender: sender.clone(),
            receiver: receiver.clone(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };
        let mut batch = Batch::default();
        batch.insert(pair, serde_json::to_vec(&PairState::Pending { request: request.id })?);
        batch.insert(request_key(&request.id), serde_json::to_vec(&request)?);
        let id = serde_json::to_vec(&request.id)?;
        batch.insert(index_key(INCOMING, receiver, &request), id.clone());
        batch.insert(index_key(OUTGOING, sender, &request), id);
        self.graph.apply_batch(batch)?;
        Ok(request)
    }

    /// Moves a pending request to a terminal state. Accepting writes both friend
    /// edges in the same batch that flips the status.
    pub fn try_resolve(&self, id: RequestId, outcome: Outcome, acting_user: &Username) -> Result<FriendRequest> {
        // Sender and receiver never change, so the first read is enough to find the pair.
        let Some(request) = self.request(id)? else {
            return Err(Conflict::NotPending.into());
        };
        let pair = pair_key(&request.sender, &request.receiver);
        let _guard = self.locks.lock(&pair);

        let Some(mut request) = self.request(id)? else {
            return Err(Conflict::NotPending.into());
        };
        if request.status.is_terminal() {
            return Err(Conflict::NotPending.into());
        }
        if &request.receiver != acting_user {
            return Err(Conflict::NotReceiver.into());
        }

        let now = Utc::now();
        let mut batch = Batch::default();
        batch.remove(index_key(INCOMING, &request.receiver, &request));
        batch.remove(index_key(OUTGOING, &request.sender, &request));
        match outcome {
            Outcome::Accepted => {
                batch.insert(pair, serde_json::to_vec(&PairState::Friends { since: now })?);
                batch.insert(edge_key(&request.sender, &request.receiver), Vec::<u8>::new());
                batch.insert(edge_key(&request.receiver, &request.sender), Vec::<u8>::new());
            }
            Outcome::Declined => batch.remove(pair),
        }
        request.status = outcome.into();
        request.resolved_at = Some(now);
        batch.insert(request_key(&id), serde_json::to_vec(&request)?);
        self.graph.apply_batch(batch)?;
        Ok(request)
    }

    pub fn friends_of(&self, user: &Username) -> Result<BTreeSet<Username>> {
        let prefix = user_prefix(FRIEND, user);
        let mut friends = BTreeSet::new();
        for key in self.graph.scan_prefix(&prefix).keys() {
            let key = key?;
            friends.insert(Username::new(String::from_utf8_lossy(&key[prefix.len()..])));
        }
        Ok(friends)
    }

    /// Pending requests addressed to `user`, oldest first.
    pub fn pending_incoming(&self, user: &Username) -> Result<Vec<FriendRequest>> {
        self.pending(INCOMING, user)
    }

    /// Pending requests sent by `user`, oldest first.
    pub fn pending_outgoing(&self, user: &Username) -> Result<Vec<FriendRequest>> {
        self.pending(OUTGOING, user)
    }

    /// Any request ever created, including resolved ones.
    pub fn request(&self, id: RequestId) -> Result<Option<FriendRequest>> {
        match self.graph.get(request_key(&id))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Holds the lock of the pair as if an operation on it were in flight.
    #[cfg(test)]
    pub(crate) fn lock_pair(&self, a: &Username, b: &Username) -> crate::pair_lock::PairGuard<'_> {
        self.locks.lock(&pair_key(a, b))
    }

    fn pending(&self, tag: u8, user: &Username) -> Result<Vec<FriendRequest>> {
        let mut pending = Vec::new();
        for value in self.graph.scan_prefix(user_prefix(tag, user)).values() {
            let id: RequestId = serde_json::from_slice(&value?)?;
            // A resolution may land between the index scan and this read.
            if let Some(request) = self.request(id)? {
                if request.status == RequestStatus::Pending {
                    pending.push(request);
                }
            }
        }
        Ok(pending)
    }
}

const PAIR: u8 = b'p';
const REQUEST: u8 = b'r';
const FRIEND: u8 = b'f';
const INCOMING: u8 = b'i';
const OUTGOING: u8 = b'o';

// Usernames are UTF-8 and never contain 0xff, so it is a safe separator.
const SEPARATOR: u8 = 0xff;

fn pair_key(a: &Username, b: &Username) -> Vec<u8> {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut key = user_prefix(PAIR, low);
    key.extend_from_slice(high.as_str().as_bytes());
    key
}

fn request_key(id: &RequestId) -> Vec<u8> {
    let mut key = vec![REQUEST];
    key.extend_from_slice(id.0.as_bytes());
    key
}

fn edge_key(user: &Username, friend: &Username) -> Vec<u8> {
    let mut key = user_prefix(FRIEND, user);
    key.extend_from_slice(friend.as_str().as_bytes());
    key
}

/// Big-endian creation time first, so a prefix scan yields oldest first.
fn index_key(tag: u8, user: &Username, request: &FriendRequest) -> Vec<u8> {
    let nanos = request.created_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
    let mut key = user_prefix(tag, user);
    key.extend_from_slice(&(nanos as u64).to_be_bytes());
    key.extend_from_slice(request.id.0.as_bytes());
    key
}

fn user_prefix(tag: u8, user: &Username) -> Vec<u8> {
    let mut key = Vec::with_capacity(user.as_str().len() + 2);
    key.push(tag);
    key.extend_from_slice(user.as_str().as_bytes());
    key.push(SEPARATOR);
    key
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use super::*;

    fn store(users: &[&str]) -> RelationshipStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let directory = Directory::open(&db).unwrap();
        for user in users {
            directory.register(&Username::from(*user)).unwrap();
        }
        RelationshipStore::open(&db, directory).unwrap()
    }

    fn conflict<T: std::fmt::Debug>(result: Result<T>) -> Conflict {
        match result {
            Err(StoreError::Conflict(conflict)) => conflict,
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn pair_key_is_unordered() {
        let (a, b) = (Username::from("a"), Username::from("b"));
        assert_eq!(pair_key(&a, &b), pair_key(&b, &a));
        assert_ne!(pair_key(&a, &b), pair_key(&Username::from("ab"), &Username::from("")));
    }

    #[test]
    fn create_rejects_self_unknown_and_duplicates() {
        let store = store(&["alice", "bob"]);
        let (alice, bob) = (Username::from("alice"), Username::from("bob"));

        assert_eq!(conflict(store.try_create_request(&alice, &alice)), Conflict::SelfPair);
        assert_eq!(
            conflict(store.try_create_request(&alice, &Username::from("ghost"))),
            Conflict::UnknownUser(Username::from("ghost"))
        );

        let request = store.try_create_request(&alice, &bob).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(conflict(store.try_create_request(&alice, &bob)), Conflict::PendingExists);
        assert_eq!(conflict(store.try_create_request(&bob, &alice)), Conflict::PendingExists);

        assert_eq!(store.pending_incoming(&bob).unwrap(), vec![request.clone()]);
        assert_eq!(store.pending_outgoing(&alice).unwrap(), vec![request]);
        assert!(store.pending_incoming(&alice).unwrap().is_empty());
    }

    #[test]
    fn accept_creates_symmetric_edge() {
        let store = store(&["alice", "bob"]);
        let (alice, bob) = (Username::from("alice"), Username::from("bob"));
        let request = store.try_create_request(&alice, &bob).unwrap();

        assert_eq!(conflict(store.try_resolve(request.id, Outcome::Accepted, &alice)), Conflict::NotReceiver);

        let accepted = store.try_resolve(request.id, Outcome::Accepted, &bob).unwrap();
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert!(accepted.resolved_at.is_some());
        assert_eq!(store.friends_of(&alice).unwrap(), BTreeSet::from([bob.clone()]));
        assert_eq!(store.friends_of(&bob).unwrap(), BTreeSet::from([alice.clone()]));
        assert!(store.pending_incoming(&bob).unwrap().is_empty());
        assert!(store.pending_outgoing(&alice).unwrap().is_empty());

        assert_eq!(conflict(store.try_resolve(request.id, Outcome::Accepted, &bob)), Conflict::NotPending);
        assert_eq!(conflict(store.try_resolve(request.id, Outcome::Declined, &bob)), Conflict::NotPending);
        assert_eq!(conflict(store.try_create_request(&bob, &alice)), Conflict::AlreadyFriends);

        // resolved requests stay as history
        assert_eq!(store.request(request.id).unwrap(), Some(accepted));
    }

    #[test]
    fn friend_edges_do_not_leak_across_prefixes() {
        let store = store(&["al", "alice", "bob"]);
        let (al, alice, bob) = (Username::from("al"), Username::from("alice"), Username::from("bob"));
        let request = store.try_create_request(&alice, &bob).unwrap();
        store.try_resolve(request.id, Outcome::Accepted, &bob).unwrap();
        assert!(store.friends_of(&al).unwrap().is_empty());
        assert_eq!(store.friends_of(&alice).unwrap(), BTreeSet::from([bob]));
    }

    #[test]
    fn decline_frees_the_pair() {
        let store = store(&["alice", "bob"]);
        let (alice, bob) = (Username::from("alice"), Username::from("bob"));
        let first = store.try_create_request(&alice, &bob).unwrap();
        let declined = store.try_resolve(first.id, Outcome::Declined, &bob).unwrap();
        assert_eq!(declined.status, RequestStatus::Declined);
        assert!(store.friends_of(&alice).unwrap().is_empty());

        let second = store.try_create_request(&bob, &alice).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.pending_incoming(&alice).unwrap(), vec![second]);
    }

    #[test]
    fn unknown_request_is_not_pending() {
        let store = store(&["alice"]);
        assert_eq!(
            conflict(store.try_resolve(RequestId::new(), Outcome::Accepted, &Username::from("alice"))),
            Conflict::NotPending
        );
    }

    #[test]
    fn pending_incoming_is_oldest_first() {
        let store = store(&["alice", "bob", "carol", "dave"]);
        let dave = Username::from("dave");
        let ids: Vec<RequestId> = ["carol", "alice", "bob"]
            .iter()
            .map(|sender| store.try_create_request(&Username::from(*sender), &dave).unwrap().id)
            .collect();
        let listed: Vec<RequestId> = store.pending_incoming(&dave).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(listed, ids);

        store.try_resolve(ids[1], Outcome::Declined, &dave).unwrap();
        let listed: Vec<RequestId> = store.pending_incoming(&dave).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(listed, vec![ids[0], ids[2]]);
    }

    #[test]
    fn pending_follows_created_at_under_concurrent_senders() {
        let senders: Vec<String> = (0..12).map(|i| format!("sender{i}")).collect();
        let mut users: Vec<&str> = senders.iter().map(String::as_str).collect();
        users.push("zoe");
        let store = store(&users);
        let handles: Vec<_> = senders
            .iter()
            .map(|sender| {
                let (store, sender) = (store.clone(), Username::from(sender.as_str()));
                std::thread::spawn(move || store.try_create_request(&sender, &Username::from("zoe")).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let listed = store.pending_incoming(&Username::from("zoe")).unwrap();
        assert_eq!(listed.len(), senders.len());
        assert!(listed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn concurrent_creates_on_one_pair_admit_one() {
        let store = store(&["alice", "bob"]);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let (a, b) = (Username::from("alice"), Username::from("bob"));
                    if i % 2 == 0 {
                        store.try_create_request(&a, &b)
                    } else {
                        store.try_create_request(&b, &a)
                    }
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in results.into_iter().filter(|r| r.is_err()) {
            assert_eq!(conflict(result), Conflict::PendingExists);
        }
    }

    #[test]
    fn busy_pair_does_not_delay_a_disjoint_pair() {
        let store = store(&["alice", "bob", "carol", "dave"]);
        let (locked_tx, locked_rx) = mpsc::channel();
        let holder = {
            let store = store.clone();
            std::thread::spawn(move || {
                let _guard = store.lock_pair(&Username::from("alice"), &Username::from("bob"));
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(800));
            })
        };
        locked_rx.recv().unwrap();

        let started = Instant::now();
        let request = store.try_create_request(&Username::from("carol"), &Username::from("dave")).unwrap();
        store.try_resolve(request.id, Outcome::Accepted, &Username::from("dave")).unwrap();
        assert!(store.pending_incoming(&Username::from("dave")).unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_millis(300), "waited {:?}", started.elapsed());

        // the busy pair itself still waits its turn
        store.try_create_request(&Username::from("bob"), &Username::from("alice")).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        holder.join().unwrap();
    }
}
