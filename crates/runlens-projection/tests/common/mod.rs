#![allow(dead_code)]

use runlens_core::types::decode_records;
use runlens_core::{StepRecord, ToolCallDetail, ToolResult};
use serde_json::Value;

pub const SESSION: &str = "sess-checkout";

pub fn checkout_records() -> Vec<StepRecord> {
    decode_records(include_str!("../fixtures/checkout_session.jsonl")).expect("fixture decodes")
}

/// Minimal agent step with no tool calls.
pub fn step(id: &str, step_number: i64, second: u32, status: &str) -> StepRecord {
    StepRecord {
        id: id.into(),
        session_id: SESSION.into(),
        step_number,
        timestamp: format!("2026-03-01T11:00:{second:02}Z"),
        agent_name: "browser".into(),
        event_type: "step".into(),
        status: status.into(),
        thinking: None,
        tool_calls: None,
        tool_results: None,
        sandbox_id: None,
        test_case_id: None,
    }
}

pub fn with_call(mut record: StepRecord, tool_name: &str, arguments: Value) -> StepRecord {
    record
        .tool_calls
        .get_or_insert_with(Vec::new)
        .push(ToolCallDetail {
            tool_name: tool_name.into(),
            arguments,
        });
    record
}

pub fn with_result(mut record: StepRecord, output: &str) -> StepRecord {
    record
        .tool_results
        .get_or_insert_with(Vec::new)
        .push(ToolResult {
            output: output.into(),
        });
    record
}

pub fn with_thinking(mut record: StepRecord, text: &str) -> StepRecord {
    record.thinking = Some(text.into());
    record
}

pub fn with_event_type(mut record: StepRecord, event_type: &str) -> StepRecord {
    record.event_type = event_type.into();
    record
}
