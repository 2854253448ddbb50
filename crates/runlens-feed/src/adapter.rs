//! One subscription driving one session projector.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use runlens_core::ProjectionConfig;
use runlens_projection::{ApplyReport, SessionProjector, SessionSnapshot};

use crate::notification::{Delivery, DeliveryTicket, FeedNotification};
use crate::source::{EventSource, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    /// Subscribed, cold batch not received yet.
    AwaitingSnapshot,
    Live,
    /// Subscribe or source failure. The snapshot is the last good one (or empty).
    Degraded { reason: String },
    /// Unsubscribed. Nothing is applied any more.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The adapter was torn down.
    Closed,
    /// Delivery belongs to another (older) subscription.
    StaleTicket,
    /// Warm diff before the cold batch.
    BeforeSnapshot,
    /// No subscription is active at all.
    NoSubscription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Applied(ApplyReport),
    /// Session document applied; `changed` tells whether the snapshot moved.
    SessionUpdated { changed: bool },
    /// Source error recorded; status is now degraded.
    Degraded,
    Discarded(DiscardReason),
}

impl DeliveryOutcome {
    /// True when the visible snapshot or status may have changed.
    pub fn is_visible_change(&self) -> bool {
        match self {
            Self::Applied(report) => report.changed,
            Self::SessionUpdated { changed } => *changed,
            Self::Degraded => true,
            Self::Discarded(_) => false,
        }
    }
}

/// What a consumer reads: status plus an immutable snapshot.
#[derive(Debug, Clone)]
pub struct FeedView {
    pub status: FeedStatus,
    pub snapshot: Arc<SessionSnapshot>,
}

pub struct ChangeFeedAdapter {
    ticket: DeliveryTicket,
    subscription: Option<Box<dyn Subscription>>,
    projector: SessionProjector,
    status: FeedStatus,
    /// A cold batch has been applied; warm diffs are only valid after it.
    cold_seen: bool,
}

impl std::fmt::Debug for ChangeFeedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeedAdapter")
            .field("ticket", &self.ticket)
            .field("subscribed", &self.subscription.is_some())
            .field("status", &self.status)
            .field("cold_seen", &self.cold_seen)
            .finish_non_exhaustive()
    }
}

impl ChangeFeedAdapter {
    /// Subscribe through `source` and create a fresh projector.
    ///
    /// A failed subscribe does not error out: the adapter starts degraded
    /// with an empty snapshot.
    pub fn open<S>(source: &mut S, ticket: DeliveryTicket, config: ProjectionConfig) -> Self
    where
        S: EventSource + ?Sized,
    {
        let projector = SessionProjector::new(ticket.session_id.clone(), config);
        let (subscription, status) = match source.subscribe(ticket.clone()) {
            Ok(subscription) => {
                info!(ticket = %ticket, "subscribed");
                (Some(subscription), FeedStatus::AwaitingSnapshot)
            }
            Err(err) => {
                warn!(ticket = %ticket, error = %err, "subscribe failed");
                (
                    None,
                    FeedStatus::Degraded {
                        reason: err.to_string(),
                    },
                )
            }
        };
        Self {
            ticket,
            subscription,
            projector,
            status,
            cold_seen: false,
        }
    }

    pub fn ticket(&self) -> &DeliveryTicket {
        &self.ticket
    }

    pub fn status(&self) -> &FeedStatus {
        &self.status
    }

    pub fn is_closed(&self) -> bool {
        self.status == FeedStatus::Closed
    }

    pub fn view(&self) -> FeedView {
        FeedView {
            status: self.status.clone(),
            snapshot: self.projector.snapshot(),
        }
    }

    /// Route one delivery into the projector.
    pub fn deliver(&mut self, delivery: Delivery) -> DeliveryOutcome {
        if self.is_closed() {
            debug!(ticket = %self.ticket, kind = delivery.notification.kind(), "discarding delivery after teardown");
            return DeliveryOutcome::Discarded(DiscardReason::Closed);
        }
        if delivery.ticket != self.ticket {
            debug!(
                ticket = %self.ticket,
                stale = %delivery.ticket,
                "discarding delivery for another subscription"
            );
            return DeliveryOutcome::Discarded(DiscardReason::StaleTicket);
        }

        match delivery.notification {
            FeedNotification::Snapshot(records) => {
                let report = self.projector.apply_batch(records);
                self.cold_seen = true;
                self.status = FeedStatus::Live;
                DeliveryOutcome::Applied(report)
            }
            FeedNotification::Diff(diff) => {
                if !self.cold_seen {
                    warn!(ticket = %self.ticket, "warm diff before cold snapshot, discarding");
                    return DeliveryOutcome::Discarded(DiscardReason::BeforeSnapshot);
                }
                let report = self
                    .projector
                    .apply_delta(diff.added, diff.modified, diff.removed);
                DeliveryOutcome::Applied(report)
            }
            FeedNotification::Session(record) => {
                let changed = self.projector.apply_session(record);
                DeliveryOutcome::SessionUpdated { changed }
            }
            FeedNotification::Error(err) => {
                warn!(ticket = %self.ticket, error = %err, "feed error, serving last good snapshot");
                self.status = FeedStatus::Degraded {
                    reason: err.to_string(),
                };
                DeliveryOutcome::Degraded
            }
        }
    }

    /// Stop future delivery. Synchronous and idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
            info!(ticket = %self.ticket, "unsubscribed");
        }
        self.status = FeedStatus::Closed;
    }
}

impl Drop for ChangeFeedAdapter {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::notification::FeedDiff;
    use runlens_core::{SessionRecord, StepRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        cancels: Arc<AtomicUsize>,
    }

    struct CountingSub(Arc<AtomicUsize>);

    impl Subscription for CountingSub {
        fn cancel(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl EventSource for Counting {
        fn subscribe(
            &mut self,
            _ticket: DeliveryTicket,
        ) -> Result<Box<dyn Subscription>, FeedError> {
            Ok(Box::new(CountingSub(Arc::clone(&self.cancels))))
        }
    }

    struct Refusing;

    impl EventSource for Refusing {
        fn subscribe(&mut self, ticket: DeliveryTicket) -> Result<Box<dyn Subscription>, FeedError> {
            Err(FeedError::Subscribe {
                session_id: ticket.session_id,
                reason: "store offline".into(),
            })
        }
    }

    fn ticket() -> DeliveryTicket {
        DeliveryTicket::new("s", 1)
    }

    fn record(id: &str, second: u32) -> StepRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "session_id": "s",
            "step_number": second,
            "timestamp": format!("2026-03-01T10:00:{second:02}Z"),
            "status": "running",
            "thinking": format!("thought {id}"),
        }))
        .expect("record")
    }

    #[test]
    fn lifecycle_awaiting_live_closed() {
        let mut source = Counting::default();
        let mut adapter = ChangeFeedAdapter::open(&mut source, ticket(), ProjectionConfig::default());
        assert_eq!(adapter.status(), &FeedStatus::AwaitingSnapshot);

        let outcome = adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Snapshot(vec![record("a", 0)]),
        ));
        assert!(outcome.is_visible_change());
        assert_eq!(adapter.status(), &FeedStatus::Live);

        adapter.unsubscribe();
        adapter.unsubscribe();
        assert_eq!(source.cancels.load(Ordering::SeqCst), 1);
        assert!(adapter.is_closed());
    }

    #[test]
    fn diff_before_snapshot_is_discarded() {
        let mut source = Counting::default();
        let mut adapter = ChangeFeedAdapter::open(&mut source, ticket(), ProjectionConfig::default());
        let outcome = adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Diff(FeedDiff {
                added: vec![record("a", 0)],
                ..FeedDiff::default()
            }),
        ));
        assert_eq!(
            outcome,
            DeliveryOutcome::Discarded(DiscardReason::BeforeSnapshot)
        );
        assert_eq!(adapter.view().snapshot.event_count, 0);
    }

    #[test]
    fn diff_after_error_before_snapshot_is_discarded() {
        let mut source = Counting::default();
        let mut adapter = ChangeFeedAdapter::open(&mut source, ticket(), ProjectionConfig::default());
        adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Error(FeedError::SourceRead("partial line".into())),
        ));
        let outcome = adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Diff(FeedDiff {
                added: vec![record("a", 0)],
                ..FeedDiff::default()
            }),
        ));
        assert_eq!(
            outcome,
            DeliveryOutcome::Discarded(DiscardReason::BeforeSnapshot)
        );
        assert_eq!(adapter.view().snapshot.event_count, 0);
        assert!(matches!(adapter.status(), FeedStatus::Degraded { .. }));

        adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Snapshot(vec![record("a", 0)]),
        ));
        assert_eq!(adapter.status(), &FeedStatus::Live);
        assert_eq!(adapter.view().snapshot.event_count, 1);
    }

    #[test]
    fn stale_ticket_is_discarded() {
        let mut source = Counting::default();
        let mut adapter = ChangeFeedAdapter::open(&mut source, ticket(), ProjectionConfig::default());
        let outcome = adapter.deliver(Delivery::new(
            DeliveryTicket::new("s", 0),
            FeedNotification::Snapshot(vec![record("a", 0)]),
        ));
        assert_eq!(outcome, DeliveryOutcome::Discarded(DiscardReason::StaleTicket));
        assert_eq!(adapter.status(), &FeedStatus::AwaitingSnapshot);
    }

    #[test]
    fn error_keeps_last_good_snapshot() {
        let mut source = Counting::default();
        let mut adapter = ChangeFeedAdapter::open(&mut source, ticket(), ProjectionConfig::default());
        adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Snapshot(vec![record("a", 0), record("b", 1)]),
        ));
        let outcome = adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Error(FeedError::SourceRead("disk gone".into())),
        ));
        assert_eq!(outcome, DeliveryOutcome::Degraded);

        let view = adapter.view();
        assert!(matches!(view.status, FeedStatus::Degraded { .. }));
        assert_eq!(view.snapshot.event_count, 2);

        // A fresh cold batch recovers.
        adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Snapshot(vec![record("a", 0)]),
        ));
        assert_eq!(adapter.status(), &FeedStatus::Live);
    }

    #[test]
    fn failed_subscribe_starts_degraded_and_empty() {
        let mut source = Refusing;
        let adapter = ChangeFeedAdapter::open(&mut source, ticket(), ProjectionConfig::default());
        assert!(matches!(adapter.status(), FeedStatus::Degraded { reason } if reason.contains("store offline")));
        assert_eq!(adapter.view().snapshot.event_count, 0);
    }

    #[test]
    fn session_document_applies_in_any_open_state() {
        let mut source = Counting::default();
        let mut adapter = ChangeFeedAdapter::open(&mut source, ticket(), ProjectionConfig::default());
        let outcome = adapter.deliver(Delivery::new(
            ticket(),
            FeedNotification::Session(SessionRecord {
                session_id: "s".into(),
                status: "failed".into(),
                remote_view_url: None,
            }),
        ));
        assert_eq!(outcome, DeliveryOutcome::SessionUpdated { changed: true });
        assert!(!adapter.view().snapshot.session_active);
    }

    #[test]
    fn drop_cancels_subscription() {
        let mut source = Counting::default();
        let cancels = Arc::clone(&source.cancels);
        {
            let _adapter = ChangeFeedAdapter::open(&mut source, ticket(), ProjectionConfig::default());
        }
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }
}
