//! Human-intervention requests.
//!
//! A request is keyed by step number. It stays active until a later event
//! for the same step stops requesting intervention. The producer never emits
//! an explicit "resolved" signal, so resolution is inferred from that
//! follow-up; a request whose step never reports again stays active until
//! the session itself stops being active.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use runlens_core::ProjectionConfig;
use runlens_core::event::{StepEvent, ToolInvocation};
use runlens_core::types::StepStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterventionRecord {
    pub id: String,
    pub step_number: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Still awaiting a human as far as the step stream tells.
    pub active: bool,
}

/// The display message if `event` asks for a human, `None` otherwise.
///
/// An event asks when its status is `intervention`, or when it carries an
/// intervention tool call and has not already succeeded. The message is the
/// tool's own message, else the narration, with known prefixes stripped.
pub fn intervention_request(event: &StepEvent, config: &ProjectionConfig) -> Option<String> {
    let tool_message = event.calls().iter().find_map(|call| match call {
        ToolInvocation::Intervention { message } => Some(message.as_deref()),
        ToolInvocation::Plan(_)
        | ToolInvocation::Terminate { .. }
        | ToolInvocation::Generic { .. } => None,
    });

    let requested = event.status == StepStatus::Intervention
        || (tool_message.is_some() && event.status != StepStatus::Success);
    if !requested {
        return None;
    }

    let raw = tool_message
        .flatten()
        .filter(|m| !m.trim().is_empty())
        .or(event.narration.as_deref());
    let message = raw
        .map(|m| config.strip_intervention_prefix(m))
        .filter(|m| !m.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| config.default_intervention_message.clone());
    Some(message)
}

#[derive(Debug, Clone)]
pub struct InterventionProjection {
    config: Arc<ProjectionConfig>,
    records: Vec<InterventionRecord>,
    by_step: HashMap<i64, usize>,
}

impl InterventionProjection {
    pub fn new(config: Arc<ProjectionConfig>) -> Self {
        Self {
            config,
            records: Vec::new(),
            by_step: HashMap::new(),
        }
    }

    pub fn records(&self) -> &[InterventionRecord] {
        &self.records
    }

    /// Most recent request still awaiting a human.
    pub fn active_record(&self) -> Option<&InterventionRecord> {
        self.records.iter().rev().find(|r| r.active)
    }

    pub fn has_active(&self, session_active: bool) -> bool {
        session_active && self.records.iter().any(|r| r.active)
    }

    pub fn apply(&mut self, event: &StepEvent) -> bool {
        match intervention_request(event, &self.config) {
            Some(message) => self.open(event, message),
            None => self.resolve(event.step_number),
        }
    }

    fn open(&mut self, event: &StepEvent, message: String) -> bool {
        if let Some(&idx) = self.by_step.get(&event.step_number) {
            let record = &mut self.records[idx];
            let changed = !record.active || record.message != message;
            record.active = true;
            record.message = message;
            return changed;
        }

        self.by_step.insert(event.step_number, self.records.len());
        self.records.push(InterventionRecord {
            id: format!("intervention:{}", event.step_number),
            step_number: event.step_number,
            message,
            timestamp: event.timestamp,
            active: true,
        });
        true
    }

    fn resolve(&mut self, step_number: i64) -> bool {
        let Some(&idx) = self.by_step.get(&step_number) else {
            return false;
        };
        let record = &mut self.records[idx];
        if !record.active {
            return false;
        }
        record.active = false;
        true
    }
}
