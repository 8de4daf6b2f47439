//! Scripted sandboxes for resolution tests

use crate::core_replication::{SandboxError, ScriptOutcome, ScriptRequest, ScriptSandbox};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Always answers with the same outcome
#[derive(Debug)]
pub struct StaticSandbox {
    outcome: ScriptOutcome,
    calls: AtomicUsize,
}

impl StaticSandbox {
    pub fn new(outcome: ScriptOutcome) -> Self {
        Self { outcome, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptSandbox for StaticSandbox {
    async fn execute(&self, _request: ScriptRequest, _timeout: Duration) -> Result<ScriptOutcome, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Sleeps before answering; pair with a paused tokio clock
#[derive(Debug)]
pub struct SlowSandbox {
    delay: Duration,
    outcome: ScriptOutcome,
}

impl SlowSandbox {
    pub fn new(delay: Duration, outcome: ScriptOutcome) -> Self {
        Self { delay, outcome }
    }
}

#[async_trait]
impl ScriptSandbox for SlowSandbox {
    async fn execute(&self, _request: ScriptRequest, _timeout: Duration) -> Result<ScriptOutcome, SandboxError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.outcome.clone())
    }
}

/// Every call fails with the given reason
#[derive(Debug)]
pub struct FailingSandbox {
    reason: String,
}

impl FailingSandbox {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ScriptSandbox for FailingSandbox {
    async fn execute(&self, request: ScriptRequest, _timeout: Duration) -> Result<ScriptOutcome, SandboxError> {
        Err(SandboxError::Failed { script_id: request.script_id, reason: self.reason.clone() })
    }
}

/// Records every request it receives
#[derive(Debug)]
pub struct RecordingSandbox {
    outcome: ScriptOutcome,
    requests: Mutex<Vec<ScriptRequest>>,
}

impl RecordingSandbox {
    pub fn new(outcome: ScriptOutcome) -> Self {
        Self { outcome, requests: Mutex::new(Vec::new()) }
    }

    pub fn requests(&self) -> Vec<ScriptRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ScriptSandbox for RecordingSandbox {
    async fn execute(&self, request: ScriptRequest, _timeout: Duration) -> Result<ScriptOutcome, SandboxError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        Ok(self.outcome.clone())
    }
}

/// Blocks until released, so tests can change state mid-script.
/// Entries and releases are counted, so neither side can miss the other.
#[derive(Debug)]
pub struct GatedSandbox {
    outcome: ScriptOutcome,
    entered: Semaphore,
    release: Semaphore,
}

impl GatedSandbox {
    pub fn new(outcome: ScriptOutcome) -> Self {
        Self { outcome, entered: Semaphore::new(0), release: Semaphore::new(0) }
    }

    /// Wait until one more script call is in progress
    pub async fn wait_entered(&self) {
        if let Ok(permit) = self.entered.acquire().await {
            permit.forget();
        }
    }

    /// Let one pending script call return
    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

#[async_trait]
impl ScriptSandbox for GatedSandbox {
    async fn execute(&self, _request: ScriptRequest, _timeout: Duration) -> Result<ScriptOutcome, SandboxError> {
        self.entered.add_permits(1);
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
        Ok(self.outcome.clone())
    }
}
