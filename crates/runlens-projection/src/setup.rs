//! Sandbox provisioning lifecycle.
//!
//! Two singleton slots (`initializing`, `ready`) that are updated in place,
//! plus a sticky "remote view was available" flag. The flag exists because
//! the producer clears the session's remote-view URL on completion or
//! cancellation; once seen it stays set so the view never regresses from
//! compact back to expanded.

use chrono::{DateTime, Utc};
use serde::Serialize;

use runlens_core::event::{StepBody, StepEvent};
use runlens_core::types::StepStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SetupStatus {
    fn from_step(status: &StepStatus) -> Self {
        match status {
            StepStatus::Pending => Self::Pending,
            StepStatus::Success => Self::Completed,
            StepStatus::Error => Self::Failed,
            StepStatus::Running
            | StepStatus::Intervention
            | StepStatus::Cancelled
            | StepStatus::Other(_) => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupSlot {
    pub status: SetupStatus,
    pub sandbox_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SetupState {
    pub initializing: Option<SetupSlot>,
    pub ready: Option<SetupSlot>,
}

/// How the setup panel should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupView {
    /// Nothing observed yet.
    Hidden,
    /// Provisioning underway: show the full setup timeline.
    Expanded,
    /// Sandbox ready (or a remote view was ever available).
    Compact,
}

#[derive(Debug, Clone, Default)]
pub struct SetupTimelineProjection {
    state: SetupState,
    remote_view_seen: bool,
}

impl SetupTimelineProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StepEvent) -> bool {
        match &event.body {
            StepBody::SandboxInitializing { sandbox_id } => {
                self.apply_initializing(event, sandbox_id.as_deref())
            }
            StepBody::SandboxReady { sandbox_id } => self.apply_ready(event, sandbox_id.as_deref()),
            StepBody::PrerequisiteStart
            | StepBody::PrerequisiteEnd
            | StepBody::Cancelled
            | StepBody::Agent { .. } => false,
        }
    }

    /// Record whether the session currently exposes a remote view.
    /// Only the rising edge matters; `false` never clears the flag.
    pub fn observe_remote_view(&mut self, available: bool) -> bool {
        if available && !self.remote_view_seen {
            self.remote_view_seen = true;
            return true;
        }
        false
    }

    pub fn state(&self) -> &SetupState {
        &self.state
    }

    pub fn remote_view_seen(&self) -> bool {
        self.remote_view_seen
    }

    pub fn is_ready(&self) -> bool {
        self.state.ready.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.is_ready() || self.remote_view_seen
    }

    pub fn view(&self) -> SetupView {
        if self.is_complete() {
            SetupView::Compact
        } else if self.state.initializing.is_some() {
            SetupView::Expanded
        } else {
            SetupView::Hidden
        }
    }

    fn apply_initializing(&mut self, event: &StepEvent, sandbox_id: Option<&str>) -> bool {
        // `ready` implies initializing completed; late initializing updates
        // cannot walk that back.
        let status = if self.state.ready.is_some() {
            SetupStatus::Completed
        } else {
            SetupStatus::from_step(&event.status)
        };

        match &mut self.state.initializing {
            Some(slot) => {
                let before = slot.clone();
                slot.status = status;
                if let Some(id) = sandbox_id {
                    slot.sandbox_id = Some(id.to_owned());
                }
                *slot != before
            }
            None => {
                self.state.initializing = Some(SetupSlot {
                    status,
                    sandbox_id: sandbox_id.map(str::to_owned),
                    timestamp: event.timestamp,
                });
                true
            }
        }
    }

    fn apply_ready(&mut self, event: &StepEvent, sandbox_id: Option<&str>) -> bool {
        let before = self.state.clone();

        let init = self.state.initializing.get_or_insert_with(|| SetupSlot {
            status: SetupStatus::Completed,
            sandbox_id: sandbox_id.map(str::to_owned),
            timestamp: event.timestamp,
        });
        init.status = SetupStatus::Completed;

        match &mut self.state.ready {
            Some(slot) => {
                if let Some(id) = sandbox_id {
                    slot.sandbox_id = Some(id.to_owned());
                }
            }
            None => {
                let inherited = sandbox_id
                    .map(str::to_owned)
                    .or_else(|| init.sandbox_id.clone());
                self.state.ready = Some(SetupSlot {
                    status: SetupStatus::Completed,
                    sandbox_id: inherited,
                    timestamp: event.timestamp,
                });
            }
        }

        self.state != before
    }
}
