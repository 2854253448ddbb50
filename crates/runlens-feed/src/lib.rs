//! runlens-feed: change-feed subscription lifecycle.
//!
//! An [`EventSource`] pushes [`Delivery`] values (cold snapshot, warm diff,
//! session document, or error) tagged with the [`DeliveryTicket`] of the
//! subscription that produced them. A [`ChangeFeedAdapter`] owns one
//! subscription and the projector it drives; a [`SessionObserver`] owns at
//! most one adapter and switches sessions with teardown-before-create.
//!
//! Nothing here blocks or spawns: the runtime pumps deliveries in.

pub mod adapter;
pub mod error;
pub mod notification;
pub mod observer;
pub mod source;

pub use adapter::{ChangeFeedAdapter, DeliveryOutcome, DiscardReason, FeedStatus, FeedView};
pub use error::FeedError;
pub use notification::{Delivery, DeliveryTicket, FeedDiff, FeedNotification};
pub use observer::SessionObserver;
pub use source::{EventSource, Subscription};
