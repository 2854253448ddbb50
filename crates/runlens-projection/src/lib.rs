//! runlens-projection: per-session read models built from the step stream.
//!
//! Five sub-projections (plan, tool timeline, setup, prerequisites,
//! interventions) plus the termination resolver, owned and driven by a
//! single [`projector::SessionProjector`]. Everything here is synchronous
//! and deterministic: no IO, no clocks, no locks.

pub mod intervention;
pub mod plan;
pub mod prerequisite;
pub mod projector;
pub mod setup;
pub mod snapshot;
pub mod termination;
pub mod tool_timeline;

pub use projector::{ApplyReport, SessionProjector};
pub use snapshot::SessionSnapshot;
