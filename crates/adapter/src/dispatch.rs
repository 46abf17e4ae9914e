//! Dispatch and concurrency governor.
//!
//! One call runs the state machine `Received → ToolResolved →
//! CredentialResolved → Executing → {Succeeded, Failed}`. This module owns
//! the cross-cutting policy around both executors: admission (global and
//! per-upstream-host limits with an optional bounded queue), one deadline
//! per call, retry with exponential backoff for retryable failures, and
//! mandatory redaction of whatever escapes as an error. Caller disconnects
//! cancel by dropping the call future, which drops the in-flight upstream
//! request.

use crate::credentials::CredentialResolver;
use crate::error::{ToolError, ToolErrorKind};
use crate::proxy::McpProxyExecutor;
use crate::registry::{ToolBackend, ToolDefinition, ToolRegistry};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use unified_http_tools::auth::ResolvedCredential;
use unified_http_tools::redact;
use unified_openapi_tools::{RestExecutor, SpecCache};

/// What happens when a call arrives while the engine is at its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Reject immediately with `overloaded`.
    Reject,
    /// Let up to `depth` calls wait for a permit; beyond that, reject.
    Queue { depth: usize },
}

#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub call_timeout: Duration,
    /// Attempts per call, including the first (1 = no retries).
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

/// Caller identity, used for attribution and logging only; authorization
/// happened at the transport.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub subject: Option<String>,
    pub org_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CallEnvelope {
    pub tool_name: String,
    pub arguments: Value,
    pub caller: CallerContext,
}

#[derive(Debug)]
pub enum CallResult {
    Succeeded(Value),
    Failed(ToolError),
}

impl CallResult {
    #[must_use]
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(e) => Some(e.kind),
        }
    }
}

/// Admission control: one global limit, one limit per upstream host.
///
/// Admission decisions serialize on the semaphores only; the map of per-host
/// semaphores is the single contended structure and is held only long enough
/// to clone an `Arc`.
pub struct Admission {
    global: Arc<Semaphore>,
    per_host: RwLock<HashMap<String, Arc<Semaphore>>>,
    per_host_limit: usize,
    queue_slots: Option<Arc<Semaphore>>,
}

pub struct AdmissionPermit {
    _global: OwnedSemaphorePermit,
    _host: Option<OwnedSemaphorePermit>,
}

impl Admission {
    #[must_use]
    pub fn new(global_limit: usize, per_host_limit: usize, queue: QueuePolicy) -> Self {
        let queue_slots = match queue {
            QueuePolicy::Reject => None,
            QueuePolicy::Queue { depth } => Some(Arc::new(Semaphore::new(depth))),
        };
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            per_host: RwLock::new(HashMap::new()),
            per_host_limit: per_host_limit.max(1),
            queue_slots,
        }
    }

    /// Acquire permits for one call against `host`.
    ///
    /// # Errors
    ///
    /// `Overloaded` when limits are hit and the queue (if any) is full.
    pub async fn admit(&self, host: Option<&str>) -> Result<AdmissionPermit, ToolError> {
        let host_sem = host.map(|h| self.host_semaphore(h));

        let global = match Arc::clone(&self.global).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => self.wait_for(Arc::clone(&self.global)).await?,
        };

        let host_permit = match host_sem {
            None => None,
            Some(sem) => match Arc::clone(&sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => Some(self.wait_for(sem).await?),
            },
        };

        Ok(AdmissionPermit {
            _global: global,
            _host: host_permit,
        })
    }

    /// Wait for a permit while holding a bounded queue slot; with no queue
    /// configured this rejects outright.
    async fn wait_for(&self, sem: Arc<Semaphore>) -> Result<OwnedSemaphorePermit, ToolError> {
        let Some(queue) = &self.queue_slots else {
            return Err(ToolError::overloaded());
        };
        let _slot = Arc::clone(queue)
            .try_acquire_owned()
            .map_err(|_| ToolError::overloaded())?;
        sem.acquire_owned().await.map_err(|_| ToolError::overloaded())
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        if let Some(sem) = self.per_host.read().get(host) {
            return Arc::clone(sem);
        }
        let mut map = self.per_host.write();
        Arc::clone(
            map.entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit))),
        )
    }
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    specs: SpecCache,
    credentials: CredentialResolver,
    rest: RestExecutor,
    proxy: McpProxyExecutor,
    admission: Admission,
    policy: CallPolicy,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        specs: SpecCache,
        credentials: CredentialResolver,
        rest: RestExecutor,
        proxy: McpProxyExecutor,
        admission: Admission,
        policy: CallPolicy,
    ) -> Self {
        Self {
            registry,
            specs,
            credentials,
            rest,
            proxy,
            admission,
            policy,
        }
    }

    /// Execute one call to a terminal state.
    pub async fn dispatch(&self, envelope: CallEnvelope) -> CallResult {
        match self.run(envelope).await {
            Ok(value) => CallResult::Succeeded(value),
            Err(e) => {
                // Secrets were scrubbed per attempt; this bounds the size.
                let e = e.redacted(&[]);
                tracing::warn!(kind = e.kind.as_str(), error = %e.message, "tool call failed");
                CallResult::Failed(e)
            }
        }
    }

    async fn run(&self, envelope: CallEnvelope) -> Result<Value, ToolError> {
        // Received → ToolResolved. Resolution failures are terminal.
        let tool = self.registry.lookup(&envelope.tool_name)?;
        let (arguments, credential_override) = split_credential_override(envelope.arguments);

        tracing::info!(
            tool = %tool.name,
            caller = envelope.caller.subject.as_deref().unwrap_or("anonymous"),
            arguments = %redact::redact_json(&arguments),
            "executing tool call"
        );

        let _permit = self.admission.admit(tool.target_host().as_deref()).await?;

        let deadline = Instant::now() + self.policy.call_timeout;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            let outcome = self
                .attempt(&tool, &arguments, credential_override.as_ref(), deadline)
                .await;

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.retryable || attempt >= max_attempts => return Err(e),
                Err(e) => e,
            };

            let delay = retry_delay(self.policy.retry_base, self.policy.retry_max, attempt);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if delay >= remaining {
                return Err(ToolError::timeout(self.policy.call_timeout));
            }
            tracing::warn!(
                tool = %tool.name,
                attempt,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "attempt failed; backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One attempt: resolve a fresh single-use credential, execute under the
    /// remaining deadline, and scrub the credential out of any error before
    /// the credential is dropped.
    async fn attempt(
        &self,
        tool: &ToolDefinition,
        arguments: &Value,
        credential_override: Option<&Value>,
        deadline: Instant,
    ) -> Result<Value, ToolError> {
        if deadline.saturating_duration_since(Instant::now()).is_zero() {
            return Err(ToolError::timeout(self.policy.call_timeout));
        }

        // ToolResolved → CredentialResolved.
        let credential = self.credentials.resolve(tool, credential_override).await?;

        // CredentialResolved → Executing, bounded by the per-call deadline.
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ToolError::timeout(self.policy.call_timeout));
        }

        // The executor gets a slightly padded request timeout so the call
        // deadline below is always the one that fires.
        let execution =
            self.execute_backend(tool, &credential, arguments, remaining + Duration::from_millis(100));
        let result = match tokio::time::timeout(remaining, execution).await {
            Ok(result) => result,
            // The executor future is dropped here, abandoning the in-flight
            // upstream request (best-effort cancellation).
            Err(_) => Err(ToolError::timeout(self.policy.call_timeout)),
        };

        let secrets: Vec<&str> = credential.secret().into_iter().collect();
        result.map_err(|e| e.redacted(&secrets))
    }

    async fn execute_backend(
        &self,
        tool: &ToolDefinition,
        credential: &ResolvedCredential,
        arguments: &Value,
        remaining: Duration,
    ) -> Result<Value, ToolError> {
        match &tool.backend {
            ToolBackend::Rest {
                openapi_url,
                base_url,
                operation_id,
                allowed_operations,
                ..
            } => {
                let descriptor = self
                    .specs
                    .resolve_operation(openapi_url, allowed_operations, operation_id)
                    .await
                    .map_err(ToolError::from)?;
                self.rest
                    .execute(base_url, &descriptor, credential, arguments, remaining)
                    .await
                    .map_err(ToolError::from)
            }
            ToolBackend::McpProxy {
                server_url,
                upstream_tool,
            } => {
                self.proxy
                    .execute(server_url, upstream_tool, arguments, credential, remaining)
                    .await
            }
        }
    }
}

/// Pull the call-scoped credential override out of the arguments so it is
/// never forwarded upstream as an ordinary argument.
fn split_credential_override(arguments: Value) -> (Value, Option<Value>) {
    match arguments {
        Value::Object(mut map) => {
            let override_value = map.remove("credentials");
            (Value::Object(map), override_value)
        }
        other => (other, None),
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
#[must_use]
pub fn retry_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp).min(max)
}
