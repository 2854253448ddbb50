//! runlens-core: boundary records, status vocabularies, and the event
//! normalizer that turns loosely-typed step records into [`event::StepEvent`].
//!
//! Pure library. Nothing here performs IO except [`config::ProjectionConfig::load`].

pub mod config;
pub mod error;
pub mod event;
pub mod normalize;
pub mod types;

pub use config::ProjectionConfig;
pub use error::{ConfigError, DecodeError, NormalizeError};
pub use event::{PlanCommand, StepBody, StepEvent, ToolInvocation};
pub use normalize::EventNormalizer;
pub use types::{EventIdentity, SessionRecord, StepRecord, ToolCallDetail, ToolResult};
