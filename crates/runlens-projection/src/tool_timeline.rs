//! Deduplicated, time-ordered timeline of tool invocations.
//!
//! Generic calls are keyed by `(tool_name, action label, detail)`: a producer
//! re-emitting progress for the same action updates one row instead of
//! appending another. Planning, termination, intervention, and narration get
//! their own entry shapes and identity rules.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use runlens_core::ProjectionConfig;
use runlens_core::event::{StepBody, StepEvent, ToolInvocation};
use runlens_core::types::{Outcome, StepStatus};

use crate::intervention::intervention_request;
use crate::plan::Plan;

const PLANNING_KEY: &str = "planning";
const TERMINATE_KEY: &str = "terminate";

// ─── Entry Model ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    /// Producer status → entry status. Only success and error are terminal.
    pub fn from_step(status: &StepStatus) -> Self {
        match status {
            StepStatus::Success => Self::Completed,
            StepStatus::Error => Self::Error,
            StepStatus::Pending
            | StepStatus::Running
            | StepStatus::Intervention
            | StepStatus::Cancelled
            | StepStatus::Other(_) => Self::Running,
        }
    }
}

/// Kind-specific payload of a timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Tool { output: Option<String> },
    Planning { completed: usize, total: usize },
    Terminate { outcome: Outcome, output: String },
    Intervention { message: String },
    Thinking { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolTimelineEntry {
    pub identity_key: String,
    pub tool_name: String,
    pub action: String,
    pub details: String,
    pub status: ToolStatus,
    pub agent_name: String,
    /// First time this identity was seen.
    pub timestamp: DateTime<Utc>,
    pub step_number: i64,
    #[serde(flatten)]
    pub kind: EntryKind,
}

// ─── Projection ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ToolTimelineProjection {
    config: Arc<ProjectionConfig>,
    entries: Vec<ToolTimelineEntry>,
    by_key: HashMap<String, usize>,
    /// Position of the most recent narration entry.
    last_narration: Option<usize>,
}

impl ToolTimelineProjection {
    pub fn new(config: Arc<ProjectionConfig>) -> Self {
        Self {
            config,
            entries: Vec::new(),
            by_key: HashMap::new(),
            last_narration: None,
        }
    }

    /// Entries in first-seen order, which is timestamp order as long as
    /// events are applied in order.
    pub fn entries(&self) -> &[ToolTimelineEntry] {
        &self.entries
    }

    /// Apply one event. `plan` is the plan state after the same event has
    /// been applied to the plan projection. Returns true if any entry changed.
    pub fn apply(&mut self, event: &StepEvent, plan: Option<&Plan>) -> bool {
        let request = intervention_request(event, &self.config);
        let mut changed = match &request {
            Some(message) => self.upsert_intervention(event, message.clone()),
            None => self.resolve_intervention(event),
        };

        let calls = match &event.body {
            StepBody::Agent { calls } => calls.as_slice(),
            StepBody::SandboxInitializing { .. }
            | StepBody::SandboxReady { .. }
            | StepBody::PrerequisiteStart
            | StepBody::PrerequisiteEnd
            | StepBody::Cancelled => return changed,
        };

        // Narration of an intervention step is the request message itself.
        if event.status != StepStatus::Intervention
            && let Some(text) = &event.narration
        {
            changed |= self.push_narration(event, text);
        }

        let mut planning_seen = false;
        for call in calls {
            changed |= match call {
                ToolInvocation::Plan(_) => {
                    if planning_seen {
                        false
                    } else {
                        planning_seen = true;
                        plan.is_some_and(|p| self.upsert_planning(event, p))
                    }
                }
                ToolInvocation::Terminate { outcome, output } => {
                    self.upsert_terminate(event, *outcome, output)
                }
                // Already folded into the request row above.
                ToolInvocation::Intervention { .. } => false,
                ToolInvocation::Generic {
                    tool_name,
                    action,
                    detail,
                    output,
                } => self.upsert_generic(event, tool_name, action, detail, output.as_deref()),
            };
        }

        changed
    }

    // ── Entry kinds ──────────────────────────────────────────────────

    fn upsert_generic(
        &mut self,
        event: &StepEvent,
        tool_name: &str,
        action: &str,
        detail: &str,
        output: Option<&str>,
    ) -> bool {
        let key = generic_identity(tool_name, action, detail);
        let status = ToolStatus::from_step(&event.status);
        if let Some(entry) = self.entry_mut(&key) {
            let mut changed = false;
            if entry.status != status {
                entry.status = status;
                changed = true;
            }
            if let (EntryKind::Tool { output: current }, Some(new)) = (&mut entry.kind, output)
                && current.as_deref() != Some(new)
            {
                *current = Some(new.to_owned());
                changed = true;
            }
            return changed;
        }

        self.push(ToolTimelineEntry {
            identity_key: key,
            tool_name: tool_name.to_owned(),
            action: action.to_owned(),
            details: detail.to_owned(),
            status,
            agent_name: event.agent_name.clone(),
            timestamp: event.timestamp,
            step_number: event.step_number,
            kind: EntryKind::Tool {
                output: output.map(str::to_owned),
            },
        });
        true
    }

    fn upsert_planning(&mut self, event: &StepEvent, plan: &Plan) -> bool {
        let status = if plan.all_completed() {
            ToolStatus::Completed
        } else if plan.any_blocked() {
            ToolStatus::Error
        } else {
            ToolStatus::Running
        };
        let details = format!("{}/{} steps", plan.progress.completed, plan.progress.total);
        let kind = EntryKind::Planning {
            completed: plan.progress.completed,
            total: plan.progress.total,
        };

        if let Some(entry) = self.entry_mut(PLANNING_KEY) {
            let before = (entry.status, entry.action.clone(), entry.details.clone());
            entry.status = status;
            entry.action.clone_from(&plan.title);
            entry.details = details;
            entry.kind = kind;
            return before != (entry.status, entry.action.clone(), entry.details.clone());
        }

        self.push(ToolTimelineEntry {
            identity_key: PLANNING_KEY.to_owned(),
            tool_name: "planning".to_owned(),
            action: plan.title.clone(),
            details,
            status,
            agent_name: event.agent_name.clone(),
            timestamp: event.timestamp,
            step_number: event.step_number,
            kind,
        });
        true
    }

    fn upsert_terminate(&mut self, event: &StepEvent, outcome: Outcome, output: &str) -> bool {
        let status = match outcome {
            Outcome::Success | Outcome::Cancelled => ToolStatus::Completed,
            Outcome::Failure => ToolStatus::Error,
        };
        let entry = ToolTimelineEntry {
            identity_key: TERMINATE_KEY.to_owned(),
            tool_name: "terminate".to_owned(),
            action: outcome.as_str().to_owned(),
            details: output.to_owned(),
            status,
            agent_name: event.agent_name.clone(),
            timestamp: event.timestamp,
            step_number: event.step_number,
            kind: EntryKind::Terminate {
                outcome,
                output: output.to_owned(),
            },
        };

        if let Some(existing) = self.entry_mut(TERMINATE_KEY) {
            // Latest terminate wins, but the row keeps its original position.
            let timestamp = existing.timestamp;
            let changed = existing.kind != entry.kind;
            *existing = ToolTimelineEntry { timestamp, ..entry };
            return changed;
        }
        self.push(entry);
        true
    }

    fn upsert_intervention(&mut self, event: &StepEvent, message: String) -> bool {
        let key = intervention_identity(event.step_number);

        if let Some(entry) = self.entry_mut(&key) {
            let changed = entry.status != ToolStatus::Pending || entry.details != message;
            entry.status = ToolStatus::Pending;
            entry.details.clone_from(&message);
            entry.kind = EntryKind::Intervention { message };
            return changed;
        }

        self.push(ToolTimelineEntry {
            identity_key: key,
            tool_name: "intervention".to_owned(),
            action: "Human intervention".to_owned(),
            details: message.clone(),
            status: ToolStatus::Pending,
            agent_name: event.agent_name.clone(),
            timestamp: event.timestamp,
            step_number: event.step_number,
            kind: EntryKind::Intervention { message },
        });
        true
    }

    /// A later event for the same step that no longer asks for a human
    /// resolves the request.
    fn resolve_intervention(&mut self, event: &StepEvent) -> bool {
        let key = intervention_identity(event.step_number);
        match self.entry_mut(&key) {
            Some(entry) if entry.status == ToolStatus::Pending => {
                entry.status = ToolStatus::Completed;
                true
            }
            _ => false,
        }
    }

    fn push_narration(&mut self, event: &StepEvent, text: &str) -> bool {
        if is_repeat_narration(self.last_narration.map(|i| &self.entries[i]), text) {
            return false;
        }
        self.last_narration = Some(self.entries.len());
        self.push(ToolTimelineEntry {
            identity_key: format!("thinking:{}", event.id),
            tool_name: "thinking".to_owned(),
            action: "Thinking".to_owned(),
            details: text.to_owned(),
            status: ToolStatus::Completed,
            agent_name: event.agent_name.clone(),
            timestamp: event.timestamp,
            step_number: event.step_number,
            kind: EntryKind::Thinking {
                text: text.to_owned(),
            },
        });
        true
    }

    // ── Storage ──────────────────────────────────────────────────────

    fn entry_mut(&mut self, key: &str) -> Option<&mut ToolTimelineEntry> {
        let idx = *self.by_key.get(key)?;
        self.entries.get_mut(idx)
    }

    fn push(&mut self, entry: ToolTimelineEntry) {
        self.by_key
            .insert(entry.identity_key.clone(), self.entries.len());
        self.entries.push(entry);
    }
}

// ─── Identity ────────────────────────────────────────────────────

/// Identity of a generic tool call. Fields are already normalized.
pub fn generic_identity(tool_name: &str, action: &str, detail: &str) -> String {
    format!("tool:{tool_name}|{action}|{detail}")
}

pub fn intervention_identity(step_number: i64) -> String {
    format!("intervention:{step_number}")
}

/// Identical consecutive narration collapses into the earlier entry.
fn is_repeat_narration(previous: Option<&ToolTimelineEntry>, text: &str) -> bool {
    matches!(previous, Some(ToolTimelineEntry { kind: EntryKind::Thinking { text: prev }, .. }) if prev == text)
}

// ─── Tests ───────────────────────────────────────────────────────
