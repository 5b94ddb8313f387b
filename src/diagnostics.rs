//! Diagnostic message publishing with level-filtered subscriptions
//!
//! A [`DiagnosticsSender`] is the diagnostics sink owned by the transport and by
//! every raw network connection. Subscribers register a delegate together with the
//! minimum level they want to see, and get back a function that ends the
//! subscription. Every message is also emitted as a `tracing` event so the normal
//! log pipeline sees it even when nobody has subscribed.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, error, info, warn};

/// Diagnostic levels, in increasing order of severity
pub mod levels {
    /// Most verbose tier, never relayed from raw connections
    pub const DEBUG: usize = 0;
    /// Informational messages
    pub const INFO: usize = 1;
    /// Something unexpected that did not stop the operation
    pub const WARNING: usize = 5;
    /// An operation failed
    pub const ERROR: usize = 10;
}

/// Delegate receiving `(sender_name, level, message)`
pub type DiagnosticMessageDelegate = Arc<dyn Fn(&str, usize, &str) + Send + Sync>;

/// Function returned by [`DiagnosticsSender::subscribe`] that ends the subscription
///
/// Dropping it without calling it leaves the subscription in place.
pub type UnsubscribeDelegate = Box<dyn FnOnce() + Send>;

struct Subscriber {
    id: u64,
    delegate: DiagnosticMessageDelegate,
    min_level: usize,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<Subscriber>,
}

/// Named publisher of diagnostic messages
pub struct DiagnosticsSender {
    name: String,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl std::fmt::Debug for DiagnosticsSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsSender")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl DiagnosticsSender {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    /// Name reported to subscribers as the sender of every message
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to messages at or above `min_level`
    pub fn subscribe(
        &self,
        delegate: DiagnosticMessageDelegate,
        min_level: usize,
    ) -> UnsubscribeDelegate {
        let id = {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.entries.push(Subscriber {
                id,
                delegate,
                min_level,
            });
            id
        };

        let weak: Weak<Mutex<Subscribers>> = Arc::downgrade(&self.subscribers);
        Box::new(move || {
            if let Some(subscribers) = weak.upgrade() {
                subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entries
                    .retain(|subscriber| subscriber.id != id);
            }
        })
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.entries.len())
            .unwrap_or(0)
    }

    /// Publish a message to every subscriber whose minimum level is at most `level`
    pub fn send<S: AsRef<str>>(&self, level: usize, message: S) {
        let message = message.as_ref();
        Self::trace(&self.name, level, message);

        // Delegates run outside the lock so they may subscribe or unsubscribe
        let delegates: Vec<DiagnosticMessageDelegate> = {
            let subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers
                .entries
                .iter()
                .filter(|subscriber| level >= subscriber.min_level)
                .map(|subscriber| subscriber.delegate.clone())
                .collect()
        };

        for delegate in delegates {
            delegate(&self.name, level, message);
        }
    }

    fn trace(sender: &str, level: usize, message: &str) {
        if level >= levels::ERROR {
            error!(sender, level, "{}", message);
        } else if level >= levels::WARNING {
            warn!(sender, level, "{}", message);
        } else if level >= levels::INFO {
            info!(sender, level, "{}", message);
        } else {
            debug!(sender, level, "{}", message);
        }
    }
}
