//! Wire shapes between an event source and the adapter.

use std::fmt;

use runlens_core::{EventIdentity, SessionRecord, StepRecord};

use crate::error::FeedError;

/// Identifies one subscription. Deliveries carrying any other ticket are
/// stale and get discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTicket {
    pub session_id: String,
    pub generation: u64,
}

impl DeliveryTicket {
    pub fn new(session_id: impl Into<String>, generation: u64) -> Self {
        Self {
            session_id: session_id.into(),
            generation,
        }
    }
}

impl fmt::Display for DeliveryTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session_id, self.generation)
    }
}

/// Incremental change set keyed by record id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDiff {
    pub added: Vec<StepRecord>,
    pub modified: Vec<StepRecord>,
    pub removed: Vec<EventIdentity>,
}

impl FeedDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub enum FeedNotification {
    /// Cold: the full currently-known record set.
    Snapshot(Vec<StepRecord>),
    /// Warm: changes since the previous notification.
    Diff(FeedDiff),
    /// The session document changed.
    Session(SessionRecord),
    /// The source failed; the subscription may or may not recover.
    Error(FeedError),
}

impl FeedNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Diff(_) => "diff",
            Self::Session(_) => "session",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug)]
pub struct Delivery {
    pub ticket: DeliveryTicket,
    pub notification: FeedNotification,
}

impl Delivery {
    pub fn new(ticket: DeliveryTicket, notification: FeedNotification) -> Self {
        Self {
            ticket,
            notification,
        }
    }
}
