//! Single-assignment result slot for one in-flight request.

use crate::error::McpError;
use crate::jsonrpc::RequestId;
use crate::lock;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type Outcome = Result<serde_json::Value, McpError>;

/// Correlates one request with its eventual response.
///
/// Resolution is first-wins: once a value, an error, or the deadline has
/// settled the waiter, further `resolve_*` calls return `false` and change
/// nothing. Resolution is synchronous and may happen from any task; exactly
/// one task awaits the outcome through [`wait`](Self::wait).
#[derive(Debug)]
pub struct ResponseWaiter {
    request_id: RequestId,
    method: String,
    timeout: Duration,
    started_at: Instant,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
    receiver: Mutex<Option<oneshot::Receiver<Outcome>>>,
}

impl ResponseWaiter {
    pub fn new(request_id: RequestId, method: impl Into<String>, timeout: Duration) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            request_id,
            method: method.into(),
            timeout,
            started_at: Instant::now(),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }

    /// Suspend until the waiter is resolved or its deadline passes.
    ///
    /// May only be called once; a second call fails with a protocol error.
    pub async fn wait(&self) -> Result<serde_json::Value, McpError> {
        let rx = lock(&self.receiver).take().ok_or_else(|| {
            McpError::Protocol(format!(
                "request {} is already being awaited",
                self.request_id
            ))
        })?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                // Settle the slot so a late response is ignored.
                lock(&self.sender).take();
                Err(McpError::Timeout {
                    method: self.method.clone(),
                    request_id: self.request_id.clone(),
                    timeout_ms: saturating_millis(self.timeout),
                })
            }
        }
    }

    /// Resolve with a result value. Returns `false` if already resolved.
    pub fn resolve_success(&self, value: serde_json::Value) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve with an error. Returns `false` if already resolved.
    pub fn resolve_failure(&self, error: McpError) -> bool {
        self.resolve(Err(error))
    }

    fn resolve(&self, outcome: Outcome) -> bool {
        match lock(&self.sender).take() {
            Some(tx) => {
                // The receiver may already be gone if the caller gave up.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Time since the waiter was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
