//! Normalized step events.
//!
//! A [`StepEvent`] is the typed form of a [`crate::types::StepRecord`]: one
//! variant per event kind and per special-cased tool, so every projection
//! matches exhaustively instead of comparing strings.

use chrono::{DateTime, Utc};

use crate::types::{Outcome, PlanStepStatus, StepStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    pub id: String,
    pub session_id: String,
    pub step_number: i64,
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub status: StepStatus,
    /// Free-text narration (`thinking` on the wire), trimmed; `None` when blank.
    pub narration: Option<String>,
    pub test_case_id: Option<String>,
    pub body: StepBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepBody {
    SandboxInitializing { sandbox_id: Option<String> },
    SandboxReady { sandbox_id: Option<String> },
    PrerequisiteStart,
    PrerequisiteEnd,
    /// Explicit cancellation marker emitted into the step stream.
    Cancelled,
    /// Regular agent step: narration plus zero or more tool invocations.
    Agent { calls: Vec<ToolInvocation> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    Plan(PlanCommand),
    Terminate {
        outcome: Outcome,
        output: String,
    },
    Intervention {
        message: Option<String>,
    },
    Generic {
        tool_name: String,
        /// Display label from the action table (raw code when unknown).
        action: String,
        /// Whitespace-collapsed, truncated detail string.
        detail: String,
        output: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanCommand {
    Create {
        plan_id: String,
        title: String,
        steps: Vec<String>,
    },
    Update {
        plan_id: String,
        title: Option<String>,
        steps: Option<Vec<String>>,
    },
    MarkStep {
        plan_id: String,
        step_index: Option<usize>,
        step_status: Option<PlanStepStatus>,
        /// The tool's textual result: the producer's full plan rendering.
        output: Option<String>,
    },
    /// Read-only or unknown plan commands (`get`, `list`, ...).
    Ignored { command: String },
}

impl StepEvent {
    /// Tool invocations carried by this event (empty for non-agent bodies).
    pub fn calls(&self) -> &[ToolInvocation] {
        match &self.body {
            StepBody::Agent { calls } => calls,
            StepBody::SandboxInitializing { .. }
            | StepBody::SandboxReady { .. }
            | StepBody::PrerequisiteStart
            | StepBody::PrerequisiteEnd
            | StepBody::Cancelled => &[],
        }
    }
}
