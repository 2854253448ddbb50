//! Immutable, serializable view of one session's projections.

use serde::Serialize;

use crate::intervention::InterventionRecord;
use crate::plan::Plan;
use crate::prerequisite::PrerequisiteExecution;
use crate::setup::{SetupState, SetupView};
use crate::termination::{Resolution, SessionStatus, TerminationState};
use crate::tool_timeline::ToolTimelineEntry;

/// Monotonic snapshot version. Bumped only when content changes.
pub type SnapshotVersion = u64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupTimeline {
    #[serde(flatten)]
    pub state: SetupState,
    pub remote_view_seen: bool,
    pub complete: bool,
    pub view: SetupView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrerequisiteTimeline {
    pub executions: Vec<PrerequisiteExecution>,
    pub all_resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interventions {
    pub records: Vec<InterventionRecord>,
    pub has_active: bool,
}

/// UI affordances gated by the resolved status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Affordances {
    pub can_cancel: bool,
    pub can_rerun: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub version: SnapshotVersion,
    /// Whether the session document reports a live run (true until one is seen).
    pub session_active: bool,
    pub event_count: usize,
    pub plan: Option<Plan>,
    pub tool_timeline: Vec<ToolTimelineEntry>,
    pub setup_timeline: SetupTimeline,
    pub prerequisite_timeline: PrerequisiteTimeline,
    pub interventions: Interventions,
    pub termination: Resolution,
    pub affordances: Affordances,
}

impl SessionSnapshot {
    /// Snapshot of a session with no events and no session document.
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            version: 0,
            session_active: true,
            event_count: 0,
            plan: None,
            tool_timeline: Vec::new(),
            setup_timeline: SetupTimeline {
                state: SetupState::default(),
                remote_view_seen: false,
                complete: false,
                view: SetupView::Hidden,
            },
            prerequisite_timeline: PrerequisiteTimeline {
                executions: Vec::new(),
                all_resolved: false,
            },
            interventions: Interventions {
                records: Vec::new(),
                has_active: false,
            },
            termination: Resolution {
                status: SessionStatus::NotStarted,
                state: TerminationState::default(),
            },
            affordances: Affordances {
                can_cancel: true,
                can_rerun: false,
            },
        }
    }

    /// Equality over projected content, ignoring `version`.
    pub fn content_eq(&self, other: &Self) -> bool {
        let Self {
            session_id,
            version: _,
            session_active,
            event_count,
            plan,
            tool_timeline,
            setup_timeline,
            prerequisite_timeline,
            interventions,
            termination,
            affordances,
        } = self;

        *session_id == other.session_id
            && *session_active == other.session_active
            && *event_count == other.event_count
            && *plan == other.plan
            && *tool_timeline == other.tool_timeline
            && *setup_timeline == other.setup_timeline
            && *prerequisite_timeline == other.prerequisite_timeline
            && *interventions == other.interventions
            && *termination == other.termination
            && *affordances == other.affordances
    }

    pub fn status(&self) -> SessionStatus {
        self.termination.status
    }
}
