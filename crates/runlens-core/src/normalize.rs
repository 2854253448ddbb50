//! Raw step record → [`StepEvent`] normalization.
//!
//! Tolerant by construction: missing optional fields degrade to defaults.
//! Only records without an `id` or `session_id` are rejected.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::config::ProjectionConfig;
use crate::error::NormalizeError;
use crate::event::{PlanCommand, StepBody, StepEvent, ToolInvocation};
use crate::types::{Outcome, PlanStepStatus, StepRecord, StepStatus};

/// Argument keys consulted, in order, for a generic tool call's detail.
const DETAIL_KEYS: &[&str] = &[
    "text",
    "url",
    "selector",
    "element",
    "coordinate",
    "key",
    "query",
    "command",
    "path",
    "value",
    "direction",
    "seconds",
];

const PLAN_TOOLS: &[&str] = &["planning", "plan", "update_plan"];
const INTERVENTION_TOOLS: &[&str] = &[
    "intervention",
    "human_intervention",
    "request_human_intervention",
];

const DEFAULT_PLAN_TITLE: &str = "Untitled plan";

#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    config: ProjectionConfig,
}

impl EventNormalizer {
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Normalize a raw record.
    ///
    /// An unparseable timestamp becomes the Unix epoch so the record still
    /// sorts deterministically (first).
    pub fn normalize(&self, record: &StepRecord) -> Result<StepEvent, NormalizeError> {
        if record.id.trim().is_empty() {
            return Err(NormalizeError::MissingId);
        }
        if record.session_id.trim().is_empty() {
            return Err(NormalizeError::MissingSession {
                id: record.id.clone(),
            });
        }

        let status = StepStatus::parse(&record.status);
        let body = self.body(record, &status);

        Ok(StepEvent {
            id: record.id.clone(),
            session_id: record.session_id.clone(),
            step_number: record.step_number,
            timestamp: parse_timestamp(&record.timestamp).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            agent_name: record.agent_name.clone(),
            status,
            narration: non_blank(record.thinking.as_deref()),
            test_case_id: non_blank(record.test_case_id.as_deref()),
            body,
        })
    }

    fn body(&self, record: &StepRecord, status: &StepStatus) -> StepBody {
        let sandbox_id = non_blank(record.sandbox_id.as_deref());
        match record.event_type.trim().to_ascii_lowercase().as_str() {
            "sandbox_initializing" => StepBody::SandboxInitializing { sandbox_id },
            "sandbox_ready" => StepBody::SandboxReady { sandbox_id },
            "before_test_case_start" => StepBody::PrerequisiteStart,
            "before_test_case_end" => StepBody::PrerequisiteEnd,
            "cancelled" | "canceled" | "session_cancelled" => StepBody::Cancelled,
            _ => StepBody::Agent {
                calls: self.calls(record, status),
            },
        }
    }

    fn calls(&self, record: &StepRecord, status: &StepStatus) -> Vec<ToolInvocation> {
        let Some(calls) = record.tool_calls.as_deref() else {
            return Vec::new();
        };
        let results = record.tool_results.as_deref().unwrap_or_default();

        calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                let output = results
                    .get(i)
                    .and_then(|r| non_blank(Some(r.output.as_str())));
                let args = arguments_map(&call.arguments);
                self.classify(&call.tool_name, &args, output, status)
            })
            .collect()
    }

    fn classify(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        output: Option<String>,
        status: &StepStatus,
    ) -> ToolInvocation {
        let name = tool_name.trim().to_ascii_lowercase();

        if PLAN_TOOLS.contains(&name.as_str()) {
            return ToolInvocation::Plan(plan_command(args, output));
        }

        if name == "terminate" {
            let outcome = match str_arg(args, &["status", "outcome"]) {
                Some(raw) => Outcome::parse(&raw),
                None => match status {
                    StepStatus::Error => Outcome::Failure,
                    StepStatus::Cancelled => Outcome::Cancelled,
                    _ => Outcome::Success,
                },
            };
            let output = str_arg(args, &["output", "message", "reason"])
                .or(output)
                .unwrap_or_default();
            return ToolInvocation::Terminate { outcome, output };
        }

        if INTERVENTION_TOOLS.contains(&name.as_str()) {
            return ToolInvocation::Intervention {
                message: str_arg(args, &["message", "reason", "instruction"]),
            };
        }

        let raw_action = str_arg(args, &["action"]).unwrap_or_else(|| tool_name.trim().to_owned());
        let detail = DETAIL_KEYS
            .iter()
            .find_map(|k| args.get(*k).and_then(value_text))
            .map(|d| normalize_detail(&d, self.config.detail_max_chars))
            .unwrap_or_default();

        ToolInvocation::Generic {
            tool_name: tool_name.trim().to_owned(),
            action: self.config.action_label(&raw_action),
            detail,
            output,
        }
    }
}

// ─── Plan Commands ───────────────────────────────────────────────

fn plan_command(args: &Map<String, Value>, output: Option<String>) -> PlanCommand {
    let plan_id = str_arg(args, &["plan_id", "id"]).unwrap_or_default();
    let command = str_arg(args, &["command"])
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or_else(|| infer_plan_command(args).to_owned());

    match command.as_str() {
        "create" => PlanCommand::Create {
            plan_id,
            title: str_arg(args, &["title"]).unwrap_or_else(|| DEFAULT_PLAN_TITLE.to_owned()),
            steps: step_titles(args).unwrap_or_default(),
        },
        "update" => PlanCommand::Update {
            plan_id,
            title: str_arg(args, &["title"]),
            steps: step_titles(args),
        },
        "mark_step" => PlanCommand::MarkStep {
            plan_id,
            step_index: args.get("step_index").and_then(index_value),
            step_status: str_arg(args, &["step_status", "status"])
                .and_then(|s| PlanStepStatus::parse(&s)),
            output,
        },
        _ => PlanCommand::Ignored { command },
    }
}

/// Producers occasionally omit `command`; infer it from the argument shape.
fn infer_plan_command(args: &Map<String, Value>) -> &'static str {
    if args.contains_key("step_index") {
        "mark_step"
    } else if args.contains_key("steps") {
        "create"
    } else {
        "unknown"
    }
}

fn step_titles(args: &Map<String, Value>) -> Option<Vec<String>> {
    let steps = args.get("steps")?.as_array()?;
    Some(
        steps
            .iter()
            .filter_map(|step| match step {
                Value::String(s) => non_blank(Some(s.as_str())),
                Value::Object(obj) => obj
                    .get("title")
                    .or_else(|| obj.get("description"))
                    .and_then(Value::as_str)
                    .and_then(|s| non_blank(Some(s))),
                _ => None,
            })
            .collect(),
    )
}

fn index_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// Parse an ISO-8601 timestamp. Naive timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Collapse internal whitespace and truncate to `max_chars` characters.
pub fn normalize_detail(raw: &str, max_chars: usize) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

fn arguments_map(arguments: &Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map.clone(),
        Value::String(s) => serde_json::from_str(s).unwrap_or_default(),
        _ => Map::new(),
    }
}

fn str_arg(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(value_text))
        .and_then(|s| non_blank(Some(s.as_str())))
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCallDetail, ToolResult};
    use chrono::TimeZone;
    use serde_json::json;

    fn record(event_type: &str, status: &str) -> StepRecord {
        StepRecord {
            id: "evt-1".into(),
            session_id: "sess-1".into(),
            step_number: 3,
            timestamp: "2026-03-01T10:00:00Z".into(),
            agent_name: "browser".into(),
            event_type: event_type.into(),
            status: status.into(),
            thinking: None,
            tool_calls: None,
            tool_results: None,
            sandbox_id: None,
            test_case_id: None,
        }
    }

    fn with_call(mut rec: StepRecord, tool: &str, args: Value, output: Option<&str>) -> StepRecord {
        rec.tool_calls = Some(vec![ToolCallDetail {
            tool_name: tool.into(),
            arguments: args,
        }]);
        rec.tool_results = output.map(|o| vec![ToolResult { output: o.into() }]);
        rec
    }

    fn normalize(rec: &StepRecord) -> StepEvent {
        EventNormalizer::default().normalize(rec).expect("normalize")
    }

    // ── 1. Required fields ──────────────────────────────────────────

    #[test]
    fn rejects_missing_id_and_session() {
        let normalizer = EventNormalizer::default();
        let mut rec = record("step", "running");
        rec.id = " ".into();
        assert!(matches!(
            normalizer.normalize(&rec),
            Err(NormalizeError::MissingId)
        ));

        let mut rec = record("step", "running");
        rec.session_id.clear();
        assert!(matches!(
            normalizer.normalize(&rec),
            Err(NormalizeError::MissingSession { .. })
        ));
    }

    // ── 2. Timestamps ───────────────────────────────────────────────

    #[test]
    fn timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("ts");
        assert_eq!(parse_timestamp("2026-03-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01 10:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn bad_timestamp_degrades_to_epoch() {
        let mut rec = record("step", "running");
        rec.timestamp = "not a time".into();
        assert_eq!(normalize(&rec).timestamp, DateTime::<Utc>::UNIX_EPOCH);
    }

    // ── 3. Event type dispatch ──────────────────────────────────────

    #[test]
    fn event_type_dispatch() {
        let mut rec = record("sandbox_initializing", "running");
        rec.sandbox_id = Some("sbx-9".into());
        assert_eq!(
            normalize(&rec).body,
            StepBody::SandboxInitializing {
                sandbox_id: Some("sbx-9".into())
            }
        );
        assert_eq!(
            normalize(&record("SANDBOX_READY", "success")).body,
            StepBody::SandboxReady { sandbox_id: None }
        );
        assert_eq!(
            normalize(&record("before_test_case_start", "running")).body,
            StepBody::PrerequisiteStart
        );
        assert_eq!(
            normalize(&record("before_test_case_end", "success")).body,
            StepBody::PrerequisiteEnd
        );
        assert_eq!(
            normalize(&record("session_cancelled", "cancelled")).body,
            StepBody::Cancelled
        );
        assert_eq!(
            normalize(&record("agent_step", "running")).body,
            StepBody::Agent { calls: vec![] }
        );
    }

    #[test]
    fn blank_narration_is_none() {
        let mut rec = record("agent_step", "running");
        rec.thinking = Some("   ".into());
        assert!(normalize(&rec).narration.is_none());
        rec.thinking = Some("  Looking at the page ".into());
        assert_eq!(
            normalize(&rec).narration.as_deref(),
            Some("Looking at the page")
        );
    }

    // ── 4. Generic tool calls ───────────────────────────────────────

    #[test]
    fn generic_call_label_and_detail() {
        let rec = with_call(
            record("agent_step", "running"),
            "computer",
            json!({"action": "left_click", "selector": "  #submit \n button "}),
            None,
        );
        let event = normalize(&rec);
        assert_eq!(
            event.calls(),
            &[ToolInvocation::Generic {
                tool_name: "computer".into(),
                action: "Click".into(),
                detail: "#submit button".into(),
                output: None,
            }]
        );
    }

    #[test]
    fn generic_call_stringified_arguments() {
        let rec = with_call(
            record("agent_step", "success"),
            "browser",
            Value::String(r#"{"action":"goto","url":"https://shop.example"}"#.into()),
            Some("navigated"),
        );
        match &normalize(&rec).calls()[0] {
            ToolInvocation::Generic {
                action,
                detail,
                output,
                ..
            } => {
                assert_eq!(action, "Navigate");
                assert_eq!(detail, "https://shop.example");
                assert_eq!(output.as_deref(), Some("navigated"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn generic_call_without_action_uses_tool_name() {
        let rec = with_call(record("agent_step", "running"), "screenshot", json!({}), None);
        match &normalize(&rec).calls()[0] {
            ToolInvocation::Generic { action, detail, .. } => {
                assert_eq!(action, "Take screenshot");
                assert_eq!(detail, "");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_tool_results_degrade_to_none() {
        let mut rec = record("agent_step", "running");
        rec.tool_calls = Some(vec![
            ToolCallDetail {
                tool_name: "browser".into(),
                arguments: json!({"action": "scroll"}),
            },
            ToolCallDetail {
                tool_name: "browser".into(),
                arguments: Value::Null,
            },
        ]);
        rec.tool_results = Some(vec![ToolResult {
            output: "scrolled".into(),
        }]);
        let event = normalize(&rec);
        assert_eq!(event.calls().len(), 2);
        assert!(matches!(
            &event.calls()[1],
            ToolInvocation::Generic { output: None, .. }
        ));
    }

    #[test]
    fn detail_truncation_is_char_aware() {
        assert_eq!(normalize_detail("ééééé", 3), "ééé…");
        assert_eq!(normalize_detail("a  b\tc", 10), "a b c");
    }

    // ── 5. Special tools ────────────────────────────────────────────

    #[test]
    fn terminate_call() {
        let rec = with_call(
            record("agent_step", "success"),
            "terminate",
            json!({"status": "failure", "output": "cart total mismatch"}),
            None,
        );
        assert_eq!(
            normalize(&rec).calls(),
            &[ToolInvocation::Terminate {
                outcome: Outcome::Failure,
                output: "cart total mismatch".into(),
            }]
        );
    }

    #[test]
    fn terminate_without_status_follows_step_status() {
        let rec = with_call(record("agent_step", "success"), "terminate", json!({}), Some("done"));
        assert_eq!(
            normalize(&rec).calls(),
            &[ToolInvocation::Terminate {
                outcome: Outcome::Success,
                output: "done".into(),
            }]
        );
    }

    #[test]
    fn intervention_call() {
        let rec = with_call(
            record("agent_step", "intervention"),
            "human_intervention",
            json!({"reason": "captcha"}),
            None,
        );
        assert_eq!(
            normalize(&rec).calls(),
            &[ToolInvocation::Intervention {
                message: Some("captcha".into())
            }]
        );
    }

    // ── 6. Plan commands ────────────────────────────────────────────

    #[test]
    fn plan_create() {
        let rec = with_call(
            record("agent_step", "success"),
            "planning",
            json!({
                "command": "create",
                "plan_id": "plan-1",
                "title": "Checkout",
                "steps": ["Open shop", {"title": "Add item"}, "", 7]
            }),
            None,
        );
        assert_eq!(
            normalize(&rec).calls(),
            &[ToolInvocation::Plan(PlanCommand::Create {
                plan_id: "plan-1".into(),
                title: "Checkout".into(),
                steps: vec!["Open shop".into(), "Add item".into()],
            })]
        );
    }

    #[test]
    fn plan_mark_step_with_string_index() {
        let rec = with_call(
            record("agent_step", "success"),
            "planning",
            json!({"command": "mark_step", "plan_id": 42, "step_index": "2", "step_status": "in_progress"}),
            Some("0. [✓] a"),
        );
        assert_eq!(
            normalize(&rec).calls(),
            &[ToolInvocation::Plan(PlanCommand::MarkStep {
                plan_id: "42".into(),
                step_index: Some(2),
                step_status: Some(PlanStepStatus::InProgress),
                output: Some("0. [✓] a".into()),
            })]
        );
    }

    #[test]
    fn plan_command_inferred_from_shape() {
        let rec = with_call(
            record("agent_step", "success"),
            "plan",
            json!({"step_index": 0, "step_status": "completed"}),
            None,
        );
        assert!(matches!(
            &normalize(&rec).calls()[0],
            ToolInvocation::Plan(PlanCommand::MarkStep {
                step_index: Some(0),
                ..
            })
        ));

        let rec = with_call(record("agent_step", "success"), "plan", json!({"command": "get"}), None);
        assert_eq!(
            normalize(&rec).calls(),
            &[ToolInvocation::Plan(PlanCommand::Ignored {
                command: "get".into()
            })]
        );
    }
}
