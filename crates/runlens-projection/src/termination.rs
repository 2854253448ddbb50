//! Authoritative session status.
//!
//! Combines explicit signals (cancellation marker, `terminate` tool call)
//! with derived ones (plan step statuses, setup readiness). Priority, highest
//! first:
//!
//! 1. cancellation marker (step stream or session document)
//! 2. `terminate` call outcome
//! 3. any plan step blocked
//! 4. plan underway, or fully completed while setup is not ready yet
//! 5. setup ready and every plan step completed
//! 6. not started
//!
//! The status is recomputed from the signals on every snapshot and never
//! cached, so a flip in any input is reflected immediately.

use chrono::{DateTime, Utc};
use serde::Serialize;

use runlens_core::event::{StepBody, StepEvent, ToolInvocation};
use runlens_core::types::Outcome;

use crate::plan::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Blocked,
    Completed,
    Succeeded,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// An explicit end signal was observed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Offer "cancel" only while the run is live.
    pub fn can_cancel(self, session_active: bool) -> bool {
        session_active && !self.is_terminal()
    }

    /// Offer "rerun" once the run has ended one way or another.
    pub fn can_rerun(self) -> bool {
        self.is_terminal() || self == Self::Completed
    }
}

/// Latest `terminate` call observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminateSignal {
    pub outcome: Outcome,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TerminationState {
    pub terminated: bool,
    pub outcome: Option<Outcome>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub status: SessionStatus,
    #[serde(flatten)]
    pub state: TerminationState,
}

// ─── Resolver ────────────────────────────────────────────────────

/// Collects explicit end signals from the step stream.
#[derive(Debug, Clone, Default)]
pub struct TerminationResolver {
    terminate: Option<TerminateSignal>,
    cancelled_in_stream: bool,
}

impl TerminationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StepEvent) -> bool {
        let calls = match &event.body {
            StepBody::Cancelled => {
                let changed = !self.cancelled_in_stream;
                self.cancelled_in_stream = true;
                return changed;
            }
            StepBody::Agent { calls } => calls,
            StepBody::SandboxInitializing { .. }
            | StepBody::SandboxReady { .. }
            | StepBody::PrerequisiteStart
            | StepBody::PrerequisiteEnd => return false,
        };

        let mut changed = false;
        for call in calls {
            match call {
                ToolInvocation::Terminate { outcome, output } => {
                    let signal = TerminateSignal {
                        outcome: *outcome,
                        output: output.clone(),
                        timestamp: event.timestamp,
                    };
                    changed |= self.terminate.as_ref() != Some(&signal);
                    self.terminate = Some(signal);
                }
                ToolInvocation::Plan(_)
                | ToolInvocation::Intervention { .. }
                | ToolInvocation::Generic { .. } => {}
            }
        }
        changed
    }

    /// `session_cancelled` comes from the session document, which lives
    /// outside the step stream.
    pub fn resolve(
        &self,
        plan: Option<&Plan>,
        setup_ready: bool,
        session_cancelled: bool,
    ) -> Resolution {
        resolve(
            plan,
            setup_ready,
            self.terminate.as_ref(),
            self.cancelled_in_stream || session_cancelled,
        )
    }
}

/// Pure priority resolution over the current inputs.
pub fn resolve(
    plan: Option<&Plan>,
    setup_ready: bool,
    terminate: Option<&TerminateSignal>,
    cancelled: bool,
) -> Resolution {
    let output = terminate.map(|t| t.output.clone()).unwrap_or_default();

    if cancelled {
        return Resolution {
            status: SessionStatus::Cancelled,
            state: TerminationState {
                terminated: true,
                outcome: Some(Outcome::Cancelled),
                output,
            },
        };
    }

    if let Some(signal) = terminate {
        let status = match signal.outcome {
            Outcome::Success => SessionStatus::Succeeded,
            Outcome::Failure => SessionStatus::Failed,
            Outcome::Cancelled => SessionStatus::Cancelled,
        };
        return Resolution {
            status,
            state: TerminationState {
                terminated: true,
                outcome: Some(signal.outcome),
                output,
            },
        };
    }

    let status = match plan {
        Some(p) if p.any_blocked() => SessionStatus::Blocked,
        Some(p) if p.is_underway() => SessionStatus::InProgress,
        Some(p) if p.all_completed() && !setup_ready => SessionStatus::InProgress,
        Some(p) if p.all_completed() => SessionStatus::Completed,
        Some(_) | None => SessionStatus::NotStarted,
    };
    Resolution {
        status,
        state: TerminationState::default(),
    }
}
