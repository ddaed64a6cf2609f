//! Change-notification events and the subscription handle.
//!
//! The backing store pushes one event per relevant mutation; payloads
//! intentionally carry only identifiers and a timestamp. Handlers re-read
//! the snapshot from the source instead of trusting an event body, so
//! duplicated or reordered delivery degrades to harmless recomputation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The relationship record changed (stage, status, metrics, withdrawal
/// fields -- the payload does not say which).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipChanged {
    pub relationship_id: String,
    pub at: DateTime<Utc>,
}

impl RelationshipChanged {
    pub fn now(relationship_id: impl Into<String>) -> Self {
        Self {
            relationship_id: relationship_id.into(),
            at: Utc::now(),
        }
    }
}

/// The requirement/activity list of a relationship changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitiesChanged {
    pub relationship_id: String,
    pub at: DateTime<Utc>,
}

impl ActivitiesChanged {
    pub fn now(relationship_id: impl Into<String>) -> Self {
        Self {
            relationship_id: relationship_id.into(),
            at: Utc::now(),
        }
    }
}

/// One message pulled off a change feed.
#[derive(Debug, Clone)]
pub enum FeedMessage<T> {
    /// A change notification.
    Event(T),
    /// The feed dropped `n` messages behind us. Consumers must treat this
    /// as "something changed" and re-derive, since the missed events are
    /// unrecoverable.
    Lagged(u64),
    /// The sender side is gone; no further events will arrive.
    Closed,
}

/// A cancellable handle on one change feed.
///
/// Dropping the handle unsubscribes; [`Subscription::cancel`] makes that an
/// explicit, first-class operation at call sites.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    pub fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Wait for the next feed message.
    pub async fn next(&mut self) -> FeedMessage<T> {
        match self.rx.recv().await {
            Ok(event) => FeedMessage::Event(event),
            Err(broadcast::error::RecvError::Lagged(n)) => FeedMessage::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => FeedMessage::Closed,
        }
    }

    /// Drain every message already queued without waiting. Returns how many
    /// were discarded; used to coalesce a burst of notifications into one
    /// evaluation pass.
    pub fn drain(&mut self) -> u64 {
        let mut drained = 0u64;
        loop {
            match self.rx.try_recv() {
                Ok(_) => drained += 1,
                Err(broadcast::error::TryRecvError::Lagged(n)) => drained += n,
                Err(_) => break,
            }
        }
        drained
    }

    /// Explicitly tear the subscription down.
    pub fn cancel(self) {}
}
