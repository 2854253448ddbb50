//! Owner of the currently observed session.
//!
//! Switching sessions tears the previous adapter down (cancelling its
//! subscription) before the next one is opened, and every subscription gets
//! a fresh generation so late deliveries from the old one never match.

use tracing::info;

use runlens_core::ProjectionConfig;

use crate::adapter::{ChangeFeedAdapter, DeliveryOutcome, DiscardReason, FeedView};
use crate::notification::{Delivery, DeliveryTicket};
use crate::source::EventSource;

#[derive(Debug)]
pub struct SessionObserver<S> {
    source: S,
    config: ProjectionConfig,
    generation: u64,
    adapter: Option<ChangeFeedAdapter>,
}

impl<S: EventSource> SessionObserver<S> {
    pub fn new(source: S, config: ProjectionConfig) -> Self {
        Self {
            source,
            config,
            generation: 0,
            adapter: None,
        }
    }

    /// Make `session_id` the observed session and return its ticket.
    ///
    /// Re-observing the current session still resubscribes (cold reload).
    pub fn observe(&mut self, session_id: &str) -> DeliveryTicket {
        if let Some(previous) = self.active_session()
            && previous != session_id
        {
            info!(from = previous, to = session_id, "switching observed session");
        }
        self.stop();

        self.generation += 1;
        let ticket = DeliveryTicket::new(session_id, self.generation);
        self.adapter = Some(ChangeFeedAdapter::open(
            &mut self.source,
            ticket.clone(),
            self.config.clone(),
        ));
        ticket
    }

    /// Tear down the current subscription, if any. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            adapter.unsubscribe();
        }
    }

    pub fn deliver(&mut self, delivery: Delivery) -> DeliveryOutcome {
        match self.adapter.as_mut() {
            Some(adapter) => adapter.deliver(delivery),
            None => DeliveryOutcome::Discarded(DiscardReason::NoSubscription),
        }
    }

    pub fn view(&self) -> Option<FeedView> {
        self.adapter.as_ref().map(ChangeFeedAdapter::view)
    }

    pub fn active_session(&self) -> Option<&str> {
        self.adapter
            .as_ref()
            .map(|adapter| adapter.ticket().session_id.as_str())
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S> Drop for SessionObserver<S> {
    fn drop(&mut self) {
        // Adapter before source: the subscription may reference it.
        if let Some(mut adapter) = self.adapter.take() {
            adapter.unsubscribe();
        }
    }
}
