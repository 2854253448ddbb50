//! Seams to the external event store.

use crate::error::FeedError;
use crate::notification::DeliveryTicket;

/// A live subscription handle.
///
/// `cancel` must stop future delivery before it returns and must be safe to
/// call more than once.
pub trait Subscription: Send {
    fn cancel(&mut self);
}

/// Something that can stream step records for one session.
///
/// The source must deliver exactly one `Snapshot` before any `Diff` for a
/// given ticket, and must tag every delivery with that ticket.
pub trait EventSource {
    fn subscribe(&mut self, ticket: DeliveryTicket) -> Result<Box<dyn Subscription>, FeedError>;
}
