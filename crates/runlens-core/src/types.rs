use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DecodeError;

/// Identity of a step record in the event store (the record `id`).
pub type EventIdentity = String;

// ─── Boundary Records ─────────────────────────────────────────────

/// Raw step record as written by the agent runtime.
///
/// Only `id` and `session_id` are required. Everything else defaults so that
/// partially-written records still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub step_number: i64,
    /// ISO-8601 timestamp. Parsed by the normalizer, never here.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDetail>>,
    #[serde(default)]
    pub tool_results: Option<Vec<ToolResult>>,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default)]
    pub test_case_id: Option<String>,
}

/// A single tool call inside a step record.
///
/// `arguments` is kept as a raw JSON value: producers sometimes send an
/// object and sometimes a JSON-encoded string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDetail {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Result paired positionally with a [`ToolCallDetail`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub output: String,
}

/// The session document the step records belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub remote_view_url: Option<String>,
}

impl SessionRecord {
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::parse(&self.status)
    }

    /// True when the record carries a non-empty remote view URL.
    pub fn has_remote_view(&self) -> bool {
        self.remote_view_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}

/// Decode step records from either a JSON array or JSON lines.
///
/// Blank lines are skipped. The first malformed line aborts decoding with its
/// 1-based line number.
pub fn decode_records(text: &str) -> Result<Vec<StepRecord>, DecodeError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|source| DecodeError::Json { line: 1, source });
    }

    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| DecodeError::Json {
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

// ─── Step Status ──────────────────────────────────────────────────

/// Producer-reported status of a step record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
    Intervention,
    Cancelled,
    Other(String),
}

impl StepStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Self::Pending,
            "running" | "in_progress" | "started" | "" => Self::Running,
            "success" | "completed" | "done" | "passed" => Self::Success,
            "error" | "failed" | "failure" => Self::Error,
            "intervention" | "waiting_for_human" => Self::Intervention,
            "cancelled" | "canceled" => Self::Cancelled,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Intervention => "intervention",
            Self::Cancelled => "cancelled",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Plan Step Status ─────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl PlanStepStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "not_started" | "pending" | "todo" => Some(Self::NotStarted),
            "in_progress" | "running" | "active" => Some(Self::InProgress),
            "completed" | "done" | "success" => Some(Self::Completed),
            "blocked" | "failed" => Some(Self::Blocked),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for PlanStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Termination Outcome ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Cancelled,
}

impl Outcome {
    /// Parse the `status` argument of a `terminate` call.
    ///
    /// Anything unrecognised is a failure: a terminate call always ends the run.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "passed" | "completed" => Self::Success,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Failure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Session Phase ────────────────────────────────────────────────

/// Lifecycle phase of the session document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl SessionPhase {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "initializing" => Self::Pending,
            "running" | "in_progress" | "active" | "intervention" | "waiting_for_human" => {
                Self::Running
            }
            "completed" | "success" | "passed" => Self::Completed,
            "failed" | "error" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Whether the session is still executing. Unknown phases count as inactive.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
