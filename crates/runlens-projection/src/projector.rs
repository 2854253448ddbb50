//! Per-session projector: the single writer for every sub-projection.
//!
//! Every accepted event is retained by id. The sub-projections are a pure
//! left fold over the retained set sorted by `(timestamp, step_number,
//! arrival)`, which makes cold batches and warm diffs converge:
//!
//! - a cold batch resets the retained set and replays it;
//! - a warm diff that only appends events sorting after everything already
//!   folded is applied incrementally;
//! - any other diff (modification, removal, out-of-order insert) replays the
//!   retained set from scratch.
//!
//! Session-level facts that do not come from the step stream (the session
//! document's phase, the sticky remote-view flag) survive replays.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use runlens_core::{
    EventIdentity, EventNormalizer, NormalizeError, ProjectionConfig, SessionRecord, StepEvent,
    StepRecord,
};
use runlens_core::types::SessionPhase;

use crate::intervention::InterventionProjection;
use crate::plan::PlanProjection;
use crate::prerequisite::PrerequisiteTimelineProjection;
use crate::setup::SetupTimelineProjection;
use crate::snapshot::{
    Affordances, Interventions, PrerequisiteTimeline, SessionSnapshot, SetupTimeline,
    SnapshotVersion,
};
use crate::termination::TerminationResolver;
use crate::tool_timeline::ToolTimelineProjection;

/// Fold order of retained events.
type OrderKey = (DateTime<Utc>, i64, u64);

/// Result of one `apply_*` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub accepted: usize,
    pub rejected: usize,
    pub removed: usize,
    /// True when the retained set was replayed from scratch.
    pub rebuilt: bool,
    /// True when the snapshot version moved.
    pub changed: bool,
}

#[derive(Debug, Clone)]
struct Retained {
    event: StepEvent,
    arrival: u64,
}

impl Retained {
    fn key(&self) -> OrderKey {
        (self.event.timestamp, self.event.step_number, self.arrival)
    }
}

// ─── Sub-projections ─────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Projections {
    plan: PlanProjection,
    tools: ToolTimelineProjection,
    setup: SetupTimelineProjection,
    prerequisites: PrerequisiteTimelineProjection,
    interventions: InterventionProjection,
    termination: TerminationResolver,
}

impl Projections {
    fn new(config: &Arc<ProjectionConfig>, remote_view_seen: bool) -> Self {
        let mut setup = SetupTimelineProjection::new();
        setup.observe_remote_view(remote_view_seen);
        Self {
            plan: PlanProjection::new(),
            tools: ToolTimelineProjection::new(Arc::clone(config)),
            setup,
            prerequisites: PrerequisiteTimelineProjection::new(),
            interventions: InterventionProjection::new(Arc::clone(config)),
            termination: TerminationResolver::new(),
        }
    }

    fn apply(&mut self, event: &StepEvent) {
        // Plan first: the timeline's planning entry mirrors the updated plan.
        self.plan.apply(event);
        self.tools.apply(event, self.plan.current());
        self.setup.apply(event);
        self.prerequisites.apply(event);
        self.interventions.apply(event);
        self.termination.apply(event);
    }
}

// ─── Projector ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct SessionProjector {
    session_id: String,
    config: Arc<ProjectionConfig>,
    normalizer: EventNormalizer,
    events: HashMap<EventIdentity, Retained>,
    next_arrival: u64,
    /// Largest order key folded so far.
    watermark: Option<OrderKey>,
    projections: Projections,
    session: Option<SessionRecord>,
    remote_view_seen: bool,
    version: SnapshotVersion,
    snapshot: Arc<SessionSnapshot>,
}

impl SessionProjector {
    pub fn new(session_id: impl Into<String>, config: ProjectionConfig) -> Self {
        let session_id = session_id.into();
        let config = Arc::new(config);
        Self {
            snapshot: Arc::new(SessionSnapshot::empty(&session_id)),
            session_id,
            normalizer: EventNormalizer::new((*config).clone()),
            projections: Projections::new(&config, false),
            config,
            events: HashMap::new(),
            next_arrival: 0,
            watermark: None,
            session: None,
            remote_view_seen: false,
            version: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Current snapshot. Cheap to clone and safe to share across threads.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Cold path: replace the whole retained set with `records`.
    ///
    /// Applying the same batch twice yields the same snapshot (and the
    /// second call does not bump the version).
    pub fn apply_batch(&mut self, records: Vec<StepRecord>) -> ApplyReport {
        let mut report = ApplyReport {
            rebuilt: true,
            ..ApplyReport::default()
        };

        self.events.clear();
        self.next_arrival = 0;
        for record in &records {
            match self.normalize(record) {
                Ok(event) => {
                    self.retain(event);
                    report.accepted += 1;
                }
                Err(err) => {
                    warn!(session = %self.session_id, error = %err, "dropping step record");
                    report.rejected += 1;
                }
            }
        }

        self.rebuild();
        report.changed = self.refresh_snapshot();
        debug!(
            session = %self.session_id,
            accepted = report.accepted,
            rejected = report.rejected,
            version = self.version,
            "applied cold batch"
        );
        report
    }

    /// Warm path: apply an incremental change set.
    ///
    /// `added` and `modified` are treated alike by id: an unknown id is an
    /// insert, a known id replaces the retained event. `removed` retracts
    /// exactly the events with those ids.
    pub fn apply_delta(
        &mut self,
        added: Vec<StepRecord>,
        modified: Vec<StepRecord>,
        removed: Vec<EventIdentity>,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut needs_rebuild = false;
        let mut appended: Vec<EventIdentity> = Vec::new();

        for id in &removed {
            if self.events.remove(id).is_some() {
                report.removed += 1;
                needs_rebuild = true;
            }
        }

        for record in added.iter().chain(modified.iter()) {
            let event = match self.normalize(record) {
                Ok(event) => event,
                Err(err) => {
                    warn!(session = %self.session_id, error = %err, "dropping step record");
                    report.rejected += 1;
                    continue;
                }
            };
            report.accepted += 1;

            if let Some(existing) = self.events.get_mut(&event.id) {
                if existing.event != event {
                    existing.event = event;
                    needs_rebuild = true;
                }
                continue;
            }

            let id = event.id.clone();
            let key = self.retain(event);
            if self.watermark.is_some_and(|mark| key <= mark) {
                needs_rebuild = true;
            } else {
                appended.push(id);
            }
        }

        if needs_rebuild {
            self.rebuild();
            report.rebuilt = true;
        } else {
            self.fold_appended(&appended);
        }

        report.changed = self.refresh_snapshot();
        debug!(
            session = %self.session_id,
            accepted = report.accepted,
            removed = report.removed,
            rebuilt = report.rebuilt,
            version = self.version,
            "applied warm diff"
        );
        report
    }

    /// Apply the session document. Records for another session are ignored.
    pub fn apply_session(&mut self, record: SessionRecord) -> bool {
        if record.session_id != self.session_id {
            warn!(
                session = %self.session_id,
                other = %record.session_id,
                "ignoring session record for another session"
            );
            return false;
        }
        if record.has_remote_view() && !self.remote_view_seen {
            self.remote_view_seen = true;
            self.projections.setup.observe_remote_view(true);
        }
        self.session = Some(record);
        self.refresh_snapshot()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn normalize(&self, record: &StepRecord) -> Result<StepEvent, NormalizeError> {
        let event = self.normalizer.normalize(record)?;
        if event.session_id != self.session_id {
            return Err(NormalizeError::ForeignSession {
                id: event.id,
                expected: self.session_id.clone(),
                actual: event.session_id,
            });
        }
        if event.timestamp == DateTime::<Utc>::UNIX_EPOCH {
            warn!(
                session = %self.session_id,
                id = %event.id,
                timestamp = %record.timestamp,
                "unparseable step timestamp, ordering first"
            );
        }
        Ok(event)
    }

    /// Insert or replace by id, keeping the first arrival position.
    fn retain(&mut self, event: StepEvent) -> OrderKey {
        if let Some(existing) = self.events.get_mut(&event.id) {
            existing.event = event;
            return existing.key();
        }
        let retained = Retained {
            event,
            arrival: self.next_arrival,
        };
        self.next_arrival += 1;
        let key = retained.key();
        self.events.insert(retained.event.id.clone(), retained);
        key
    }

    fn rebuild(&mut self) {
        let mut ordered: Vec<&Retained> = self.events.values().collect();
        ordered.sort_by_key(|r| r.key());

        let mut projections = Projections::new(&self.config, self.remote_view_seen);
        for retained in &ordered {
            projections.apply(&retained.event);
        }
        self.watermark = ordered.last().map(|r| r.key());
        self.projections = projections;
    }

    fn fold_appended(&mut self, ids: &[EventIdentity]) {
        let mut ordered: Vec<&Retained> = ids.iter().filter_map(|id| self.events.get(id)).collect();
        ordered.sort_by_key(|r| r.key());
        for retained in &ordered {
            self.projections.apply(&retained.event);
        }
        if let Some(last) = ordered.last() {
            self.watermark = Some(last.key());
        }
    }

    fn session_active(&self) -> bool {
        self.session
            .as_ref()
            .is_none_or(|s| s.phase().is_active())
    }

    fn session_cancelled(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.phase() == SessionPhase::Cancelled)
    }

    fn build_snapshot(&self, version: SnapshotVersion) -> SessionSnapshot {
        let p = &self.projections;
        let session_active = self.session_active();
        let plan = p.plan.current();
        let termination = p
            .termination
            .resolve(plan, p.setup.is_complete(), self.session_cancelled());
        let session_ended = self.session.is_some() && !session_active;
        let affordances = Affordances {
            can_cancel: termination.status.can_cancel(session_active),
            can_rerun: termination.status.can_rerun() || session_ended,
        };

        SessionSnapshot {
            session_id: self.session_id.clone(),
            version,
            session_active,
            event_count: self.events.len(),
            plan: plan.cloned(),
            tool_timeline: p.tools.entries().to_vec(),
            setup_timeline: SetupTimeline {
                state: p.setup.state().clone(),
                remote_view_seen: p.setup.remote_view_seen(),
                complete: p.setup.is_complete(),
                view: p.setup.view(),
            },
            prerequisite_timeline: PrerequisiteTimeline {
                executions: p.prerequisites.executions().to_vec(),
                all_resolved: p.prerequisites.all_resolved(),
            },
            interventions: Interventions {
                records: p.interventions.records().to_vec(),
                has_active: p.interventions.has_active(session_active),
            },
            termination,
            affordances,
        }
    }

    /// Rebuild the snapshot; bump the version only if content changed.
    fn refresh_snapshot(&mut self) -> bool {
        let candidate = self.build_snapshot(self.version);
        if candidate.content_eq(&self.snapshot) {
            return false;
        }
        self.version += 1;
        self.snapshot = Arc::new(SessionSnapshot {
            version: self.version,
            ..candidate
        });
        true
    }
}

// ─── Tests ───────────────────────────────────────────────────────
