//! Thread-safe holder of a connection's delegates
//!
//! The registry is shared between the adapter, which replaces delegates on
//! behalf of the protocol engine, and the closures handed to the raw connection,
//! which read them on the connection's own delivery thread. The lock is held only
//! while a slot is read or written and never while a delegate runs, so a delegate
//! may replace itself (or its sibling) without deadlocking.

use super::{BrokenDelegate, DataReceivedDelegate};
use std::sync::{Mutex, PoisonError};

/// Delegate Registry for one connection
#[derive(Default)]
pub struct ConnectionDelegates {
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    data_received: Option<DataReceivedDelegate>,
    broken: Option<BrokenDelegate>,
}

impl std::fmt::Debug for ConnectionDelegates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ConnectionDelegates")
            .field("data_received", &slots.data_received.is_some())
            .field("broken", &slots.broken.is_some())
            .finish()
    }
}

impl ConnectionDelegates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_data_received(&self, delegate: Option<DataReceivedDelegate>) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data_received = delegate;
    }

    pub fn set_broken(&self, delegate: Option<BrokenDelegate>) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .broken = delegate;
    }

    pub fn snapshot_data_received(&self) -> Option<DataReceivedDelegate> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data_received
            .clone()
    }

    pub fn snapshot_broken(&self) -> Option<BrokenDelegate> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .broken
            .clone()
    }

    /// Deliver received data to the current delegate, if any
    ///
    /// Returns whether a delegate was invoked.
    pub fn notify_data_received(&self, data: Vec<u8>) -> bool {
        match self.snapshot_data_received() {
            Some(delegate) => {
                delegate(data);
                true
            }
            None => false,
        }
    }

    /// Deliver a broken notification to the current delegate, if any
    pub fn notify_broken(&self, graceful: bool) -> bool {
        match self.snapshot_broken() {
            Some(delegate) => {
                delegate(graceful);
                true
            }
            None => false,
        }
    }
}
