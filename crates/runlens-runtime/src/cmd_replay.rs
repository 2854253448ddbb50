//! `runlens replay`: cold-project a recorded stream and print the snapshot.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use runlens_core::ProjectionConfig;
use runlens_core::types::decode_records;
use runlens_projection::{SessionProjector, SessionSnapshot};

use crate::cli::ReplayOpts;
use crate::file_source::{infer_session, parse_session_record, select_session};

/// Entry point for `runlens replay`.
pub fn cmd_replay(opts: &ReplayOpts, config: ProjectionConfig) -> anyhow::Result<()> {
    let snapshot = replay(
        &opts.file,
        opts.session.as_deref(),
        opts.session_file.as_deref(),
        config,
    )?;
    let output = if opts.pretty {
        serde_json::to_string_pretty(&*snapshot)?
    } else {
        serde_json::to_string(&*snapshot)?
    };
    println!("{output}");
    Ok(())
}

pub fn replay(
    file: &Path,
    session: Option<&str>,
    session_file: Option<&Path>,
    config: ProjectionConfig,
) -> anyhow::Result<Arc<SessionSnapshot>> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading step records {}", file.display()))?;
    let records = decode_records(&text).with_context(|| format!("decoding {}", file.display()))?;

    let session_id = match session {
        Some(id) => id.to_owned(),
        None => infer_session(&records)
            .with_context(|| format!("{} names no session; pass --session", file.display()))?,
    };

    let mut projector = SessionProjector::new(session_id.clone(), config);
    let report = projector.apply_batch(select_session(records, &session_id));
    tracing::info!(
        session = %session_id,
        accepted = report.accepted,
        rejected = report.rejected,
        "replayed step stream"
    );

    if let Some(path) = session_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading session document {}", path.display()))?;
        projector.apply_session(parse_session_record(&text)?);
    }

    Ok(projector.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlens_projection::termination::SessionStatus;

    const STREAM: &str = concat!(
        r#"{"id":"r","session_id":"s1","step_number":0,"timestamp":"2026-03-01T10:00:00Z","status":"success","event_type":"sandbox_ready"}"#,
        "\n",
        r#"{"id":"t","session_id":"s1","step_number":1,"timestamp":"2026-03-01T10:00:01Z","status":"success","tool_calls":[{"tool_name":"terminate","arguments":{"status":"success"}}]}"#,
        "\n",
        r#"{"id":"o","session_id":"s2","step_number":0,"timestamp":"2026-03-01T10:00:02Z","status":"running","thinking":"other session"}"#,
        "\n",
    );

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).expect("write");
        path
    }

    #[test]
    fn infers_first_session_and_filters_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write(&dir, "steps.jsonl", STREAM);

        let snap = replay(&file, None, None, ProjectionConfig::default()).expect("replay");
        assert_eq!(snap.session_id, "s1");
        assert_eq!(snap.event_count, 2);
        assert_eq!(snap.status(), SessionStatus::Succeeded);
    }

    #[test]
    fn explicit_session_and_session_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write(&dir, "steps.jsonl", STREAM);
        let doc = write(
            &dir,
            "session.json",
            r#"{"session_id":"s2","status":"cancelled"}"#,
        );

        let snap = replay(&file, Some("s2"), Some(&doc), ProjectionConfig::default())
            .expect("replay");
        assert_eq!(snap.event_count, 1);
        assert!(!snap.session_active);
        assert_eq!(snap.status(), SessionStatus::Cancelled);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = replay(
            Path::new("/nonexistent/runlens.jsonl"),
            None,
            None,
            ProjectionConfig::default(),
        )
        .expect_err("missing file");
        assert!(err.to_string().contains("reading step records"));
    }

    #[test]
    fn empty_stream_needs_explicit_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write(&dir, "empty.jsonl", "");
        assert!(replay(&file, None, None, ProjectionConfig::default()).is_err());

        let snap = replay(&file, Some("s9"), None, ProjectionConfig::default()).expect("replay");
        assert_eq!(snap.event_count, 0);
        assert_eq!(snap.status(), SessionStatus::NotStarted);
    }
}
