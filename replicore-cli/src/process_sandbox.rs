//! Script sandbox backed by child processes
//!
//! A script id names an executable. The request is written to its stdin as
//! JSON with base64 payloads; stdout carries the outcome:
//! `{"resolve":"document","body":"<base64>"}`, `{"resolve":"tombstone"}`,
//! `{"resolve":"no_result"}`, or nothing / `null` for no result.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use replicore_core::core_replication::{SandboxError, ScriptOutcome, ScriptRequest, ScriptSandbox};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    document_id: &'a str,
    collection: &'a str,
    documents: Vec<String>,
    has_tombstone: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resolve", content = "body", rename_all = "snake_case")]
enum WireOutcome {
    Document(String),
    Tombstone,
    NoResult,
}

/// Runs one child process per resolution
#[derive(Debug, Clone, Default)]
pub struct ProcessSandbox {
    scripts_dir: Option<PathBuf>,
}

impl ProcessSandbox {
    pub fn new(scripts_dir: Option<PathBuf>) -> Self {
        Self { scripts_dir }
    }

    fn program(&self, script_id: &str) -> Result<PathBuf, SandboxError> {
        let expanded = shellexpand::full(script_id).map_err(|e| SandboxError::Failed {
            script_id: script_id.to_string(),
            reason: e.to_string(),
        })?;
        let path = PathBuf::from(expanded.as_ref());
        Ok(match &self.scripts_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        })
    }
}

fn failed(script_id: &str, reason: impl ToString) -> SandboxError {
    SandboxError::Failed { script_id: script_id.to_string(), reason: reason.to_string() }
}

/// Interpret a script's stdout
fn parse_outcome(script_id: &str, stdout: &[u8]) -> Result<ScriptOutcome, SandboxError> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(ScriptOutcome::NoResult);
    }
    let outcome: Option<WireOutcome> = serde_json::from_str(text).map_err(|e| failed(script_id, e))?;
    Ok(match outcome {
        None | Some(WireOutcome::NoResult) => ScriptOutcome::NoResult,
        Some(WireOutcome::Tombstone) => ScriptOutcome::Tombstone,
        Some(WireOutcome::Document(body)) => {
            ScriptOutcome::Document(STANDARD.decode(body.as_bytes()).map_err(|e| failed(script_id, e))?)
        }
    })
}

#[async_trait]
impl ScriptSandbox for ProcessSandbox {
    async fn execute(&self, request: ScriptRequest, _timeout: Duration) -> Result<ScriptOutcome, SandboxError> {
        let program = self.program(&request.script_id)?;
        let input = serde_json::to_vec(&WireRequest {
            document_id: &request.document_id,
            collection: &request.collection,
            documents: request.documents.iter().map(|d| STANDARD.encode(d)).collect(),
            has_tombstone: request.has_tombstone,
        })
        .map_err(|e| failed(&request.script_id, e))?;

        debug!(script = %program.display(), doc_id = %request.document_id, "Running resolution script");

        // The engine drops this future on timeout; kill_on_drop reaps the child
        let mut child = Command::new(&program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(&request.script_id, format!("cannot start {}: {}", program.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await.map_err(|e| failed(&request.script_id, e))?;
        }

        let output = child.wait_with_output().await.map_err(|e| failed(&request.script_id, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(&request.script_id, format!("{}: {}", output.status, stderr.trim())));
        }
        parse_outcome(&request.script_id, &output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outcomes() {
        assert_eq!(parse_outcome("s", b"").unwrap(), ScriptOutcome::NoResult);
        assert_eq!(parse_outcome("s", b"null\n").unwrap(), ScriptOutcome::NoResult);
        assert_eq!(parse_outcome("s", br#"{"resolve":"tombstone"}"#).unwrap(), ScriptOutcome::Tombstone);
        assert_eq!(
            parse_outcome("s", br#"{"resolve":"document","body":"eyJhIjoxfQ=="}"#).unwrap(),
            ScriptOutcome::Document(br#"{"a":1}"#.to_vec())
        );
    }

    #[test]
    fn test_garbage_output_is_a_failure() {
        assert!(matches!(parse_outcome("s", b"not json"), Err(SandboxError::Failed { .. })));
    }

    #[test]
    fn test_relative_scripts_resolve_against_dir() {
        let sandbox = ProcessSandbox::new(Some(PathBuf::from("/opt/scripts")));
        assert_eq!(sandbox.program("merge-users").unwrap(), PathBuf::from("/opt/scripts/merge-users"));
        assert_eq!(sandbox.program("/bin/true").unwrap(), PathBuf::from("/bin/true"));
    }

    #[tokio::test]
    async fn test_missing_executable_fails() {
        let sandbox = ProcessSandbox::new(None);
        let request = ScriptRequest {
            script_id: "/nonexistent/replicore-script".into(),
            document_id: "d".into(),
            collection: "Users".into(),
            documents: vec![b"x".to_vec()],
            has_tombstone: false,
        };
        let err = sandbox.execute(request, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SandboxError::Failed { .. }));
    }
}
