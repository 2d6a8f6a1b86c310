//! `tasks.json` load/save with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::{find_dependency_cycle, validate_invariants};
use crate::core::types::Backlog;
use crate::error::PipelineError;
use crate::io::atomic::{StagedWrite, stage, to_pretty_json};

const BACKLOG_SCHEMA: &str = include_str!("../../schemas/backlog.schema.json");

/// Load and validate a backlog from disk (schema + invariants).
pub fn load_backlog(path: &Path) -> Result<Backlog> {
    debug!(path = %path.display(), "loading backlog");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read backlog {}", path.display()))?;
    parse_backlog(&contents).with_context(|| format!("load backlog {}", path.display()))
}

/// Parse and validate backlog JSON from any source.
pub fn parse_backlog(contents: &str) -> Result<Backlog> {
    let value: Value = serde_json::from_str(contents).context("parse backlog json")?;
    validate_schema(&value)?;
    let backlog: Backlog = serde_json::from_value(value).context("deserialize backlog")?;
    validate_backlog(&backlog)?;
    Ok(backlog)
}

/// Semantic checks: id shape and uniqueness, dependency targets, cycles.
pub fn validate_backlog(backlog: &Backlog) -> Result<()> {
    let errors = validate_invariants(backlog);
    if !errors.is_empty() {
        return Err(PipelineError::InvalidBacklog(errors).into());
    }
    if let Some(cycle) = find_dependency_cycle(backlog) {
        return Err(PipelineError::CircularDependency(cycle).into());
    }
    Ok(())
}

/// Serialize `backlog` to a staged temp file next to `path`.
///
/// The caller decides when to commit, which lets session code order the
/// backlog and run-state replacements.
pub fn stage_backlog(path: &Path, backlog: &Backlog) -> Result<StagedWrite> {
    let buf = to_pretty_json(backlog)?;
    stage(path, buf.as_bytes())
}

pub fn write_backlog(path: &Path, backlog: &Backlog) -> Result<()> {
    debug!(path = %path.display(), "writing backlog");
    stage_backlog(path, backlog)?.commit()
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(BACKLOG_SCHEMA).context("parse backlog schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(PipelineError::SchemaViolation(messages).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_support::{milestone, phase, sample_backlog, subtask, task};

    fn code_of(err: &anyhow::Error) -> Option<ErrorCode> {
        err.downcast_ref::<PipelineError>().map(PipelineError::code)
    }

    /// Verifies write then load round-trip passes the embedded schema.
    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        let backlog = sample_backlog();
        write_backlog(&path, &backlog).expect("write");
        assert_eq!(load_backlog(&path).expect("load"), backlog);
    }

    #[test]
    fn missing_type_tag_fails_schema() {
        let raw = r#"{"backlog":[{"id":"P1","title":"t","status":"Planned","milestones":[]}]}"#;
        let err = parse_backlog(raw).expect_err("schema");
        assert_eq!(code_of(&err), Some(ErrorCode::ValidationSchemaFailed));
    }

    #[test]
    fn unknown_status_fails_schema() {
        let raw = r#"{"backlog":[{"type":"Phase","id":"P1","title":"t","status":"Done","milestones":[]}]}"#;
        let err = parse_backlog(raw).expect_err("schema");
        assert_eq!(code_of(&err), Some(ErrorCode::ValidationSchemaFailed));
    }

    #[test]
    fn cycle_is_reported_with_its_own_code() {
        let backlog = Backlog::new(vec![phase(
            "P1",
            vec![milestone(
                "P1.M1",
                vec![task(
                    "P1.M1.T1",
                    vec![
                        subtask("P1.M1.T1.S1", &["P1.M1.T1.S2"]),
                        subtask("P1.M1.T1.S2", &["P1.M1.T1.S1"]),
                    ],
                )],
            )],
        )]);
        let raw = to_pretty_json(&backlog).expect("json");
        let err = parse_backlog(&raw).expect_err("cycle");
        assert_eq!(code_of(&err), Some(ErrorCode::ValidationCircularDependency));
    }

    #[test]
    fn duplicate_ids_fail_invariants() {
        let backlog = Backlog::new(vec![
            phase("P1", Vec::new()),
            phase("P1", Vec::new()),
        ]);
        let err = validate_backlog(&backlog).expect_err("dupe");
        assert_eq!(code_of(&err), Some(ErrorCode::ValidationInvalidInput));
        assert!(err.to_string().contains("duplicate id 'P1'"));
    }
}
