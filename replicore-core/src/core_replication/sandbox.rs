/*
    sandbox.rs - Capability interface to the user-script runtime

    The core hands the sandbox owned copies of the conflicting payloads and
    gets back an outcome. What runs the script (a child process, an embedded
    interpreter) is up to the implementation.
*/

use super::errors::SandboxError;
use super::item::DocumentId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Input to one script invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub script_id: String,
    pub document_id: DocumentId,
    pub collection: String,
    /// Payloads of the live conflicting documents, in canonical member order
    pub documents: Vec<Vec<u8>>,
    /// At least one conflicting member is a tombstone
    pub has_tombstone: bool,
}

/// What the script decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolve", content = "body", rename_all = "snake_case")]
pub enum ScriptOutcome {
    /// New document body
    Document(Vec<u8>),
    /// Delete the document
    Tombstone,
    /// Leave the conflict in place
    NoResult,
}

/// Executes user resolution scripts.
///
/// Implementations must return within `timeout` or be cancellable: the
/// engine drops the future once the timeout elapses.
#[async_trait]
pub trait ScriptSandbox: Send + Sync {
    async fn execute(&self, request: ScriptRequest, timeout: Duration) -> Result<ScriptOutcome, SandboxError>;
}

/// Sandbox for deployments without script support
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSandbox;

#[async_trait]
impl ScriptSandbox for NullSandbox {
    async fn execute(&self, request: ScriptRequest, _timeout: Duration) -> Result<ScriptOutcome, SandboxError> {
        Err(SandboxError::Unavailable(format!(
            "no script runtime configured for {}",
            request.script_id
        )))
    }
}
