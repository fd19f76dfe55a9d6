//! Correlation between local order references and gateway order ids.

use std::collections::HashMap;
use std::sync::Mutex;

use spbridge_core::{OrderRef, RemoteOrderId};

/// Two-way mapping maintained as orders are acknowledged and resolved.
///
/// The listener inserts on acceptance and the cancel worker reads on
/// cancellation, so the pair of maps sits behind a single mutex. Invariant:
/// `remote_of(r) == Some(o)` iff `ref_of(&o) == Some(r)`.
#[derive(Default)]
pub struct OrderRegistry {
    inner: Mutex<Maps>,
}

#[derive(Default)]
struct Maps {
    by_ref: HashMap<OrderRef, RemoteOrderId>,
    by_remote: HashMap<RemoteOrderId, OrderRef>,
}

impl OrderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the gateway id for an acknowledged order. Re-inserting for the
    /// same reference replaces the previous pairing in both directions.
    pub fn insert(&self, reference: OrderRef, remote_id: RemoteOrderId) {
        let mut maps = self.inner.lock().unwrap();
        if let Some(old) = maps.by_ref.insert(reference, remote_id.clone()) {
            maps.by_remote.remove(&old);
        }
        if let Some(old_ref) = maps.by_remote.insert(remote_id, reference) {
            if old_ref != reference {
                maps.by_ref.remove(&old_ref);
            }
        }
    }

    /// The gateway id for a local reference, when the order is known.
    #[must_use]
    pub fn remote_of(&self, reference: OrderRef) -> Option<RemoteOrderId> {
        self.inner.lock().unwrap().by_ref.get(&reference).cloned()
    }

    /// The local reference for a gateway id.
    #[must_use]
    pub fn ref_of(&self, remote_id: &str) -> Option<OrderRef> {
        self.inner.lock().unwrap().by_remote.get(remote_id).copied()
    }

    /// Drop both directions of a pairing. No-op for unknown references.
    pub fn remove(&self, reference: OrderRef) {
        let mut maps = self.inner.lock().unwrap();
        if let Some(remote_id) = maps.by_ref.remove(&reference) {
            maps.by_remote.remove(&remote_id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_ref.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
