//! Pending request registry
//!
//! Correlates outbound requests with the responses that come back for them.
//! One registry is shared by every connection created in the process
//! ([`PendingRequests::global`]) unless a connection is given its own.
//!
//! Each entry is consumed exactly once: [`PendingRequests::take`] removes the
//! entry under the same lock that finds it, so a second response with the
//! same id finds nothing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use uuid::Uuid;

use rand::RngCore;

use crate::value_objects::Message;

/// Callback invoked with the response to a correlated request
pub type ResponseCallback = Box<dyn FnOnce(Message) + Send>;

/// Length of a correlation id in hex characters
pub const REQUEST_ID_LEN: usize = 64;

/// Identity of one connection client, used to abandon its requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct PendingRequest {
    owner: ConnectionId,
    callback: ResponseCallback,
}

/// Thread-safe map of correlation id to response callback
#[derive(Clone, Default)]
pub struct PendingRequests {
    entries: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl PendingRequests {
    /// Create a registry private to the connections it is given to
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every connection in the process
    pub fn global() -> Self {
        static GLOBAL: OnceLock<PendingRequests> = OnceLock::new();
        GLOBAL.get_or_init(Self::new).clone()
    }

    /// Reserve a fresh correlation id and store the callback under it
    ///
    /// The id never collides with an outstanding one. Without a callback the
    /// id is only reserved for the message being sent and nothing is stored.
    pub fn allocate(&self, owner: ConnectionId, callback: Option<ResponseCallback>) -> String {
        self.allocate_with(owner, callback, random_request_id)
    }

    fn allocate_with<G>(&self, owner: ConnectionId, callback: Option<ResponseCallback>, mut generate: G) -> String
    where
        G: FnMut() -> String,
    {
        let mut entries = self.lock();
        let id = loop {
            let candidate = generate();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        if let Some(callback) = callback {
            entries.insert(id.clone(), PendingRequest { owner, callback });
        }
        id
    }

    /// Remove and return the callback for `id`
    pub fn take(&self, id: &str) -> Option<ResponseCallback> {
        self.lock().remove(id).map(|entry| entry.callback)
    }

    /// Drop the entry for `id` without invoking it
    pub fn remove(&self, id: &str) -> bool {
        // dropped outside the lock
        let removed = self.lock().remove(id);
        removed.is_some()
    }

    /// Drop every entry owned by a connection, returning how many there were
    pub fn abandon(&self, owner: ConnectionId) -> usize {
        let abandoned: Vec<PendingRequest> = {
            let mut entries = self.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.owner == owner)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        abandoned.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of outstanding entries owned by a connection
    pub fn pending_for(&self, owner: ConnectionId) -> usize {
        self.lock().values().filter(|entry| entry.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("outstanding", &self.len())
            .finish()
    }
}

/// Random 64-character lowercase hex correlation id
pub fn random_request_id() -> String {
    let mut bytes = [0u8; REQUEST_ID_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
