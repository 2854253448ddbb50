//! Execution plan projection.
//!
//! Builds the single plan for a session from `planning` tool calls. Step
//! status comes from two signals merged structured-first: the
//! `(step_index, step_status)` pair of a `mark_step`, then the producer's
//! rendered plan in the tool output, which overwrites every index it names.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use runlens_core::event::{PlanCommand, StepEvent, ToolInvocation};
use runlens_core::types::PlanStepStatus;

// ─── Plan Model ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub index: usize,
    pub title: String,
    pub status: PlanStepStatus,
}

/// Progress derived from the step list. Never set directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanProgress {
    pub completed: usize,
    pub total: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub not_started: usize,
    /// Completion percentage rounded to one decimal.
    pub percent: f64,
}

impl PlanProgress {
    fn from_steps(steps: &[PlanStep]) -> Self {
        let mut progress = Self {
            total: steps.len(),
            ..Self::default()
        };
        for step in steps {
            match step.status {
                PlanStepStatus::Completed => progress.completed += 1,
                PlanStepStatus::InProgress => progress.in_progress += 1,
                PlanStepStatus::Blocked => progress.blocked += 1,
                PlanStepStatus::NotStarted => progress.not_started += 1,
            }
        }
        if progress.total > 0 {
            let ratio = progress.completed as f64 / progress.total as f64;
            progress.percent = (ratio * 1000.0).round() / 10.0;
        }
        progress
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub plan_id: String,
    pub title: String,
    pub steps: Vec<PlanStep>,
    pub progress: PlanProgress,
}

impl Plan {
    fn new(plan_id: &str, title: &str, step_titles: &[String]) -> Self {
        let steps = step_titles
            .iter()
            .enumerate()
            .map(|(index, title)| PlanStep {
                index,
                title: title.clone(),
                status: PlanStepStatus::NotStarted,
            })
            .collect();
        let mut plan = Self {
            plan_id: plan_id.to_owned(),
            title: title.to_owned(),
            steps,
            progress: PlanProgress::default(),
        };
        plan.recompute();
        plan
    }

    fn recompute(&mut self) {
        self.progress = PlanProgress::from_steps(&self.steps);
    }

    fn set_status(&mut self, index: usize, status: PlanStepStatus) -> bool {
        match self.steps.get_mut(index) {
            Some(step) if step.status != status => {
                step.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn all_completed(&self) -> bool {
        !self.steps.is_empty() && self.progress.completed == self.progress.total
    }

    pub fn any_blocked(&self) -> bool {
        self.progress.blocked > 0
    }

    /// Some work has started but the plan is not finished.
    pub fn is_underway(&self) -> bool {
        self.progress.in_progress > 0
            || (self.progress.completed > 0 && self.progress.completed < self.progress.total)
    }
}

// ─── Projection ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PlanProjection {
    plan: Option<Plan>,
}

impl PlanProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Apply every plan command carried by `event`. Returns true if the plan changed.
    pub fn apply(&mut self, event: &StepEvent) -> bool {
        let mut changed = false;
        for call in event.calls() {
            match call {
                ToolInvocation::Plan(command) => changed |= self.apply_command(command),
                ToolInvocation::Terminate { .. }
                | ToolInvocation::Intervention { .. }
                | ToolInvocation::Generic { .. } => {}
            }
        }
        changed
    }

    fn apply_command(&mut self, command: &PlanCommand) -> bool {
        match command {
            PlanCommand::Create {
                plan_id,
                title,
                steps,
            } => {
                // Same title means the producer re-sent the plan under a new id.
                if self.plan.as_ref().is_some_and(|p| p.title == *title) {
                    return false;
                }
                self.plan = Some(Plan::new(plan_id, title, steps));
                true
            }
            PlanCommand::Update { title, steps, .. } => {
                let Some(plan) = self.plan.as_mut() else {
                    return false;
                };
                let mut changed = false;
                if let Some(title) = title
                    && plan.title != *title
                {
                    plan.title = title.clone();
                    changed = true;
                }
                if let Some(steps) = steps {
                    changed |= replace_steps(plan, steps);
                }
                plan.recompute();
                changed
            }
            PlanCommand::MarkStep {
                step_index,
                step_status,
                output,
                ..
            } => {
                let Some(plan) = self.plan.as_mut() else {
                    return false;
                };
                let mut changed = false;
                if let (Some(index), Some(status)) = (step_index, step_status) {
                    changed |= plan.set_status(*index, *status);
                }
                if let Some(output) = output {
                    for (index, status) in parse_step_lines(output) {
                        changed |= plan.set_status(index, status);
                    }
                }
                plan.recompute();
                changed
            }
            PlanCommand::Ignored { .. } => false,
        }
    }
}

/// Replace the step list, carrying status over for steps whose title survives.
fn replace_steps(plan: &mut Plan, titles: &[String]) -> bool {
    let mut previous: Vec<Option<PlanStep>> = plan.steps.drain(..).map(Some).collect();
    let mut changed = previous.len() != titles.len();

    for (index, title) in titles.iter().enumerate() {
        let carried = previous
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|s| s.title == *title))
            .and_then(Option::take);
        let status = match carried {
            Some(step) => {
                changed |= step.index != index;
                step.status
            }
            None => {
                changed = true;
                PlanStepStatus::NotStarted
            }
        };
        plan.steps.push(PlanStep {
            index,
            title: title.clone(),
            status,
        });
    }
    changed
}

// ─── Output Parsing ──────────────────────────────────────────────

static STEP_LINE_RE: OnceLock<Regex> = OnceLock::new();

/// Parse a rendered plan into `(index, status)` pairs.
///
/// Recognised line shape: `2. [✓] Title` (also `Step 2: [→] Title`). Lines
/// with an unknown symbol are skipped.
pub fn parse_step_lines(output: &str) -> Vec<(usize, PlanStepStatus)> {
    let re = STEP_LINE_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:step\s+)?(\d+)\s*[.):]?\s*\[([^\]]*)\]")
            .expect("step line regex is valid")
    });

    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let index = caps[1].parse().ok()?;
            let status = symbol_status(&caps[2])?;
            Some((index, status))
        })
        .collect()
}

/// Map a checklist symbol to a step status.
pub fn symbol_status(symbol: &str) -> Option<PlanStepStatus> {
    match symbol.trim().trim_end_matches('\u{fe0f}') {
        "" => Some(PlanStepStatus::NotStarted),
        "✓" | "✔" | "✅" | "☑" => Some(PlanStepStatus::Completed),
        "→" | "->" | "▶" | "⏳" => Some(PlanStepStatus::InProgress),
        "x" | "X" | "✗" | "✘" | "❌" | "!" | "⚠" => Some(PlanStepStatus::Blocked),
        _ => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use runlens_core::event::StepBody;
    use runlens_core::types::StepStatus;

    fn plan_event(commands: Vec<PlanCommand>) -> StepEvent {
        StepEvent {
            id: "e".into(),
            session_id: "s".into(),
            step_number: 1,
            timestamp: Utc
                .with_ymd_and_hms(2026, 3, 1, 10, 0, 0)
                .single()
                .expect("valid datetime"),
            agent_name: "planner".into(),
            status: StepStatus::Success,
            narration: None,
            test_case_id: None,
            body: StepBody::Agent {
                calls: commands.into_iter().map(ToolInvocation::Plan).collect(),
            },
        }
    }

    fn create(title: &str, steps: &[&str]) -> PlanCommand {
        PlanCommand::Create {
            plan_id: format!("id-{title}"),
            title: title.into(),
            steps: steps.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    fn mark(index: usize, status: PlanStepStatus, output: Option<&str>) -> PlanCommand {
        PlanCommand::MarkStep {
            plan_id: "whatever".into(),
            step_index: Some(index),
            step_status: Some(status),
            output: output.map(str::to_owned),
        }
    }

    fn statuses(proj: &PlanProjection) -> Vec<PlanStepStatus> {
        proj.current()
            .expect("plan")
            .steps
            .iter()
            .map(|s| s.status)
            .collect()
    }

    // ── 1. Create ───────────────────────────────────────────────────

    #[test]
    fn create_defaults_to_not_started() {
        let mut proj = PlanProjection::new();
        assert!(proj.apply(&plan_event(vec![create("Checkout", &["a", "b", "c"])])));

        let plan = proj.current().expect("plan");
        assert_eq!(plan.title, "Checkout");
        assert_eq!(plan.progress.completed, 0);
        assert_eq!(plan.progress.total, 3);
        assert_eq!(plan.progress.not_started, 3);
        assert_eq!(plan.progress.percent, 0.0);
    }

    #[test]
    fn duplicate_create_with_same_title_is_noop() {
        let mut proj = PlanProjection::new();
        proj.apply(&plan_event(vec![create("Checkout", &["a", "b"])]));
        proj.apply(&plan_event(vec![mark(0, PlanStepStatus::Completed, None)]));

        let resent = PlanCommand::Create {
            plan_id: "other-id".into(),
            title: "Checkout".into(),
            steps: vec!["a".into(), "b".into()],
        };
        assert!(!proj.apply(&plan_event(vec![resent])));

        let plan = proj.current().expect("plan");
        assert_eq!(plan.plan_id, "id-Checkout");
        assert_eq!(plan.steps[0].status, PlanStepStatus::Completed);
    }

    #[test]
    fn create_with_new_title_replaces() {
        let mut proj = PlanProjection::new();
        proj.apply(&plan_event(vec![create("First", &["a"])]));
        proj.apply(&plan_event(vec![create("Second", &["x", "y"])]));
        let plan = proj.current().expect("plan");
        assert_eq!(plan.title, "Second");
        assert_eq!(plan.steps.len(), 2);
    }

    // ── 2. mark_step merge ──────────────────────────────────────────

    #[test]
    fn structured_mark_applies_without_output() {
        let mut proj = PlanProjection::new();
        proj.apply(&plan_event(vec![create("P", &["a", "b", "c"])]));
        proj.apply(&plan_event(vec![mark(1, PlanStepStatus::InProgress, None)]));
        assert_eq!(
            statuses(&proj),
            vec![
                PlanStepStatus::NotStarted,
                PlanStepStatus::InProgress,
                PlanStepStatus::NotStarted
            ]
        );
    }

    #[test]
    fn textual_output_overrides_structured_pair() {
        let mut proj = PlanProjection::new();
        proj.apply(&plan_event(vec![create("P", &["a", "b", "c"])]));

        let output = "Plan: P\nSteps:\n0. [✓] a\n1. [✓] b\n2. [✓] c\n";
        proj.apply(&plan_event(vec![mark(2, PlanStepStatus::InProgress, Some(output))]));

        assert_eq!(statuses(&proj), vec![PlanStepStatus::Completed; 3]);
        let plan = proj.current().expect("plan");
        assert_eq!(plan.progress.completed, 3);
        assert_eq!(plan.progress.percent, 100.0);
    }

    #[test]
    fn textual_output_only_touches_listed_indices() {
        let mut proj = PlanProjection::new();
        proj.apply(&plan_event(vec![create("P", &["a", "b", "c"])]));
        proj.apply(&plan_event(vec![mark(
            2,
            PlanStepStatus::InProgress,
            Some("0. [✓] a\n9. [✓] out of range"),
        )]));
        assert_eq!(
            statuses(&proj),
            vec![
                PlanStepStatus::Completed,
                PlanStepStatus::NotStarted,
                PlanStepStatus::InProgress
            ]
        );
    }

    #[test]
    fn blocked_does_not_count_as_completed() {
        let mut proj = PlanProjection::new();
        proj.apply(&plan_event(vec![create("P", &["a", "b", "c"])]));
        proj.apply(&plan_event(vec![mark(
            0,
            PlanStepStatus::Completed,
            Some("0. [✓] a\n1. [!] b"),
        )]));
        let plan = proj.current().expect("plan");
        assert_eq!(plan.progress.completed, 1);
        assert_eq!(plan.progress.blocked, 1);
        assert_eq!(plan.progress.percent, 33.3);
        assert!(plan.any_blocked());
    }

    #[test]
    fn mark_before_create_is_ignored() {
        let mut proj = PlanProjection::new();
        assert!(!proj.apply(&plan_event(vec![mark(0, PlanStepStatus::Completed, None)])));
        assert!(proj.current().is_none());
    }

    // ── 3. update ───────────────────────────────────────────────────

    #[test]
    fn update_keeps_status_of_surviving_titles() {
        let mut proj = PlanProjection::new();
        proj.apply(&plan_event(vec![create("P", &["a", "b"])]));
        proj.apply(&plan_event(vec![mark(1, PlanStepStatus::Completed, None)]));

        let update = PlanCommand::Update {
            plan_id: String::new(),
            title: Some("P2".into()),
            steps: Some(vec!["b".into(), "new".into()]),
        };
        assert!(proj.apply(&plan_event(vec![update])));

        let plan = proj.current().expect("plan");
        assert_eq!(plan.title, "P2");
        assert_eq!(plan.steps[0].title, "b");
        assert_eq!(plan.steps[0].index, 0);
        assert_eq!(plan.steps[0].status, PlanStepStatus::Completed);
        assert_eq!(plan.steps[1].status, PlanStepStatus::NotStarted);
        assert_eq!(plan.progress.completed, 1);
    }

    // ── 4. Line parser ──────────────────────────────────────────────

    #[test]
    fn parse_symbols() {
        let output = "Progress: 1/4\n\
                      0. [✓] open\n\
                      1. [→] add\n\
                      2. [ ] pay\n\
                      3. [X] confirm\n\
                      4. [?] weird\n\
                      Step 5: [✅] extra\n\
                      not a step line";
        assert_eq!(
            parse_step_lines(output),
            vec![
                (0, PlanStepStatus::Completed),
                (1, PlanStepStatus::InProgress),
                (2, PlanStepStatus::NotStarted),
                (3, PlanStepStatus::Blocked),
                (5, PlanStepStatus::Completed),
            ]
        );
    }

    #[test]
    fn symbol_variation_selector() {
        assert_eq!(symbol_status("⚠\u{fe0f}"), Some(PlanStepStatus::Blocked));
        assert_eq!(symbol_status(" ✔ "), Some(PlanStepStatus::Completed));
        assert_eq!(symbol_status("~"), None);
    }
}
