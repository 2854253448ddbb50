//! Prerequisite ("run-before") test case executions.
//!
//! The producer's `test_case_id` repeats across sequential prerequisite runs,
//! so identity is recovered from narration text ("test case 2/3 ...") with a
//! fallback chain: `(test_case_id, step_number)`, then the record id. Every
//! execution renders exactly once even when nothing can be extracted.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use runlens_core::event::{StepBody, StepEvent};
use runlens_core::types::StepStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteStatus {
    Running,
    Completed,
    Failed,
}

impl PrerequisiteStatus {
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrerequisiteExecution {
    pub identity: String,
    pub display_name: String,
    pub status: PrerequisiteStatus,
    pub timestamp: DateTime<Utc>,
    /// Whether `display_name` is a placeholder that a later event may replace.
    #[serde(skip)]
    pub(crate) placeholder_name: bool,
}

/// Identity derived for one prerequisite event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedIdentity {
    pub key: String,
    pub display_name: String,
    /// True when `display_name` is a placeholder rather than extracted text.
    pub placeholder_name: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PrerequisiteTimelineProjection {
    executions: Vec<PrerequisiteExecution>,
    by_identity: HashMap<String, usize>,
}

impl PrerequisiteTimelineProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executions(&self) -> &[PrerequisiteExecution] {
        &self.executions
    }

    /// True only when there is at least one execution and none is running.
    pub fn all_resolved(&self) -> bool {
        !self.executions.is_empty() && self.executions.iter().all(|e| e.status.is_resolved())
    }

    pub fn apply(&mut self, event: &StepEvent) -> bool {
        let is_end = match &event.body {
            StepBody::PrerequisiteStart => false,
            StepBody::PrerequisiteEnd => true,
            StepBody::SandboxInitializing { .. }
            | StepBody::SandboxReady { .. }
            | StepBody::Cancelled
            | StepBody::Agent { .. } => return false,
        };

        let identity = derive_identity(event);
        let narration = event.narration.as_deref().unwrap_or_default();
        let text_success = narration_signals_success(narration);

        if let Some(&idx) = self.by_identity.get(&identity.key) {
            let exec = &mut self.executions[idx];
            let before = exec.clone();
            let structural = if is_end {
                end_status(&event.status).unwrap_or(exec.status)
            } else {
                PrerequisiteStatus::Running
            };
            exec.status = if text_success {
                PrerequisiteStatus::Completed
            } else {
                structural
            };
            if exec.placeholder_name && !identity.placeholder_name {
                exec.display_name = identity.display_name;
                exec.placeholder_name = false;
            }
            return *exec != before;
        }

        let structural = if is_end {
            end_status(&event.status).unwrap_or(PrerequisiteStatus::Running)
        } else {
            PrerequisiteStatus::Running
        };
        let status = if text_success {
            PrerequisiteStatus::Completed
        } else {
            structural
        };

        self.by_identity
            .insert(identity.key.clone(), self.executions.len());
        self.executions.push(PrerequisiteExecution {
            identity: identity.key,
            display_name: identity.display_name,
            status,
            timestamp: event.timestamp,
            placeholder_name: identity.placeholder_name,
        });
        true
    }
}

fn end_status(status: &StepStatus) -> Option<PrerequisiteStatus> {
    match status {
        StepStatus::Success => Some(PrerequisiteStatus::Completed),
        // A cancelled prerequisite did not pass.
        StepStatus::Error | StepStatus::Cancelled => Some(PrerequisiteStatus::Failed),
        StepStatus::Pending
        | StepStatus::Running
        | StepStatus::Intervention
        | StepStatus::Other(_) => None,
    }
}

// ─── Text Heuristics ─────────────────────────────────────────────

static CASE_RE: OnceLock<Regex> = OnceLock::new();

fn case_re() -> &'static Regex {
    CASE_RE.get_or_init(|| {
        Regex::new(r"(?i)test\s*case\s*(\d+)\s*(?:/|of)\s*(\d+)")
            .expect("test case regex is valid")
    })
}

/// Extract `("k/n", trailing name)` from narration such as
/// `"Running test case 2/3: Log in as admin"`.
pub fn extract_case_position(narration: &str) -> Option<(String, Option<String>)> {
    let caps = case_re().captures(narration)?;
    let whole = caps.get(0)?;
    let position = format!("{}/{}", &caps[1], &caps[2]);

    let rest = narration[whole.end()..]
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches(|c: char| c == ':' || c == '-' || c == '–' || c.is_whitespace())
        .trim_end_matches(|c: char| is_success_glyph(c) || c.is_whitespace());
    let name = (!rest.is_empty()).then(|| rest.to_owned());
    Some((position, name))
}

/// A success glyph, or "completed" together with "passed", marks the
/// execution completed regardless of the structural status.
pub fn narration_signals_success(narration: &str) -> bool {
    if narration.chars().any(is_success_glyph) {
        return true;
    }
    let lowered = narration.to_lowercase();
    lowered.contains("completed") && lowered.contains("passed")
}

fn is_success_glyph(c: char) -> bool {
    matches!(c, '✓' | '✔' | '✅')
}

/// Identity fallback chain: narration position, `(test_case_id, step)`, record id.
pub fn derive_identity(event: &StepEvent) -> DerivedIdentity {
    if let Some((position, name)) = event.narration.as_deref().and_then(extract_case_position) {
        let placeholder_name = name.is_none();
        return DerivedIdentity {
            key: format!("case:{position}"),
            display_name: name.unwrap_or_else(|| format!("Prerequisite {position}")),
            placeholder_name,
        };
    }
    if let Some(test_case_id) = event.test_case_id.as_deref().filter(|s| !s.is_empty()) {
        return DerivedIdentity {
            key: format!("test_case:{test_case_id}#{}", event.step_number),
            display_name: test_case_id.to_owned(),
            placeholder_name: false,
        };
    }
    DerivedIdentity {
        key: format!("event:{}", event.id),
        display_name: "Prerequisite".to_owned(),
        placeholder_name: true,
    }
}
