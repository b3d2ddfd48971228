//! Subscription handles.

use std::fmt;
use std::sync::Weak;

use super::arena::SubTarget;
use super::{Store, StoreInner};

/// Handle to one active subscription (query, event, or domain).
///
/// Releasing is immediate and synchronous, and happens either explicitly
/// through [`Subscription::unsubscribe`] or implicitly on drop. Releasing
/// the last reference to a storage schedules it for collection, together
/// with its now-unobserved upstream subgraph.
pub struct Subscription {
    pub(crate) store: Weak<StoreInner>,
    pub(crate) target: SubTarget,
    pub(crate) id: u64,
    pub(crate) released: bool,
}

impl Subscription {
    pub(crate) fn new(store: Weak<StoreInner>, target: SubTarget, id: u64) -> Self {
        Self {
            store,
            target,
            id,
            released: false,
        }
    }

    /// Release the subscription now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        Store::from_inner(inner).release_subscription(&self.target, self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Subscription({:?}, id={}, released={})",
            self.target, self.id, self.released
        )
    }
}
