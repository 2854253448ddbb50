//! File-backed event source.
//!
//! Polls a JSON / JSON-lines file of step records. The first successful read
//! is delivered as a cold snapshot, later reads as warm diffs computed by
//! record id. An optional session document file is polled alongside and
//! delivered whenever it changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use runlens_core::types::decode_records;
use runlens_core::{SessionRecord, StepRecord};
use runlens_feed::{
    Delivery, DeliveryTicket, EventSource, FeedDiff, FeedError, FeedNotification, Subscription,
};

pub struct FileEventSource {
    path: PathBuf,
    session_path: Option<PathBuf>,
    period: Duration,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl FileEventSource {
    pub fn new(
        path: PathBuf,
        session_path: Option<PathBuf>,
        period: Duration,
        tx: mpsc::UnboundedSender<Delivery>,
    ) -> Self {
        Self {
            path,
            session_path,
            period,
            tx,
        }
    }
}

impl EventSource for FileEventSource {
    /// Must be called from within a tokio runtime.
    fn subscribe(&mut self, ticket: DeliveryTicket) -> Result<Box<dyn Subscription>, FeedError> {
        if self.tx.is_closed() {
            return Err(FeedError::SourceClosed);
        }
        let task = tokio::spawn(poll_files(
            self.path.clone(),
            self.session_path.clone(),
            self.period,
            ticket,
            self.tx.clone(),
        ));
        Ok(Box::new(FileSubscription { task: Some(task) }))
    }
}

struct FileSubscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription for FileSubscription {
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ─── Poll Loop ───────────────────────────────────────────────────

async fn poll_files(
    path: PathBuf,
    session_path: Option<PathBuf>,
    period: Duration,
    ticket: DeliveryTicket,
    tx: mpsc::UnboundedSender<Delivery>,
) {
    let mut known: Option<HashMap<String, StepRecord>> = None;
    let mut last_session: Option<SessionRecord> = None;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let notification = match read_records(&path, &ticket.session_id).await {
            Ok(records) => {
                let next = match &known {
                    None => Some(FeedNotification::Snapshot(records.clone())),
                    Some(previous) => {
                        let diff = diff_records(previous, &records);
                        (!diff.is_empty()).then_some(FeedNotification::Diff(diff))
                    }
                };
                known = Some(records.into_iter().map(|r| (r.id.clone(), r)).collect());
                next
            }
            Err(err) => {
                // Next good read reloads cold so the adapter can leave Degraded.
                known = None;
                Some(FeedNotification::Error(err))
            }
        };
        if let Some(notification) = notification
            && tx.send(Delivery::new(ticket.clone(), notification)).is_err()
        {
            return;
        }

        if let Some(session_path) = &session_path {
            match read_session(session_path).await {
                Ok(record) if last_session.as_ref() != Some(&record) => {
                    last_session = Some(record.clone());
                    let delivery = Delivery::new(ticket.clone(), FeedNotification::Session(record));
                    if tx.send(delivery).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(path = %session_path.display(), error = %err, "session file unreadable"),
            }
        }
    }
}

async fn read_records(path: &Path, session_id: &str) -> Result<Vec<StepRecord>, FeedError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FeedError::SourceRead(format!("{}: {e}", path.display())))?;
    Ok(select_session(decode_records(&text)?, session_id))
}

async fn read_session(path: &Path) -> Result<SessionRecord, FeedError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FeedError::SourceRead(format!("{}: {e}", path.display())))?;
    parse_session_record(&text)
}

// ─── Pure Helpers ────────────────────────────────────────────────

/// Keep only the records of `session_id`.
pub fn select_session(records: Vec<StepRecord>, session_id: &str) -> Vec<StepRecord> {
    records
        .into_iter()
        .filter(|r| r.session_id == session_id)
        .collect()
}

/// Session of the first record that names one.
pub fn infer_session(records: &[StepRecord]) -> Option<String> {
    records
        .iter()
        .map(|r| r.session_id.trim())
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

pub fn parse_session_record(text: &str) -> Result<SessionRecord, FeedError> {
    serde_json::from_str(text).map_err(|e| FeedError::SourceRead(format!("session document: {e}")))
}

/// Diff two reads of the same file by record id.
pub fn diff_records(previous: &HashMap<String, StepRecord>, next: &[StepRecord]) -> FeedDiff {
    let mut diff = FeedDiff::default();
    for record in next {
        match previous.get(&record.id) {
            None => diff.added.push(record.clone()),
            Some(old) if old != record => diff.modified.push(record.clone()),
            Some(_) => {}
        }
    }

    let mut removed: Vec<String> = previous
        .keys()
        .filter(|id| !next.iter().any(|r| &r.id == *id))
        .cloned()
        .collect();
    removed.sort();
    diff.removed = removed;
    diff
}
