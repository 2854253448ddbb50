//! `runlens follow`: poll a step stream and print each changed snapshot.
//!
//! One JSON object per line: `{"feed": <status>, "snapshot": <snapshot>}`.

use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::mpsc;

use runlens_core::ProjectionConfig;
use runlens_core::types::decode_records;
use runlens_feed::{FeedStatus, FeedView, SessionObserver};
use runlens_projection::SessionSnapshot;

use crate::cli::FollowOpts;
use crate::file_source::{FileEventSource, infer_session};

#[derive(Serialize)]
struct FollowLine<'a> {
    feed: &'a FeedStatus,
    snapshot: &'a SessionSnapshot,
}

fn render(view: &FeedView) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&FollowLine {
        feed: &view.status,
        snapshot: &view.snapshot,
    })?)
}

/// Entry point for `runlens follow`.
pub async fn cmd_follow(opts: &FollowOpts, config: ProjectionConfig) -> anyhow::Result<()> {
    let session_id = match &opts.session {
        Some(id) => id.clone(),
        None => {
            let text = tokio::fs::read_to_string(&opts.file)
                .await
                .with_context(|| format!("reading step records {}", opts.file.display()))?;
            infer_session(&decode_records(&text)?).with_context(|| {
                format!("{} names no session; pass --session", opts.file.display())
            })?
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = FileEventSource::new(
        opts.file.clone(),
        opts.session_file.clone(),
        Duration::from_millis(opts.interval_ms.max(1)),
        tx,
    );
    let mut observer = SessionObserver::new(source, config);
    let ticket = observer.observe(&session_id);
    tracing::info!(ticket = %ticket, file = %opts.file.display(), "following step stream");

    loop {
        tokio::select! {
            delivery = rx.recv() => {
                let Some(delivery) = delivery else { break };
                let outcome = observer.deliver(delivery);
                if outcome.is_visible_change()
                    && let Some(view) = observer.view()
                {
                    println!("{}", render(&view)?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, stopping");
                break;
            }
        }
    }

    observer.stop();
    Ok(())
}
