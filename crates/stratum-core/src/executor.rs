//! Retry executor: bounded retries with backoff against one node
//!
//! Attempts are strictly sequential. Every attempt is bounded by the policy's
//! connect plus request timeout, and every transport error is retried until
//! the attempt budget runs out.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CallError, TransportError};
use crate::event::{CallEvent, CallEventKind};
use crate::observer::ObserverBus;
use crate::policy::RetryPolicy;
use crate::topology::LoadBalancedResource;
use crate::transport::{AttemptContext, CallRequest, RawResponse, Transport};

/// Runs one request against one node under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: RetryPolicy,
    observers: Arc<ObserverBus>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, observers: Arc<ObserverBus>) -> Self {
        Self { policy, observers }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `request` against `resource.node()`.
    ///
    /// Returns the first response received, whatever its status. Fails with
    /// `RetriesExhausted` carrying the last transport error once every attempt
    /// has failed, or with `Token` when the datacenter credential cannot be
    /// obtained.
    pub async fn execute<T>(
        &self,
        transport: &T,
        resource: &LoadBalancedResource,
        request: &CallRequest,
        call_id: &str,
    ) -> Result<RawResponse, CallError>
    where
        T: Transport + ?Sized,
    {
        let node = resource.node();
        let datacenter = resource.datacenter();
        let operation = format!("{} {}", request.method, request.target);
        let event = |kind: CallEventKind| {
            CallEvent::new(kind, call_id, operation.as_str(), datacenter.name()).with_node(node.id())
        };

        let attempts = self.policy.attempts();
        let timeout = self.policy.attempt_timeout();
        let started = Instant::now();
        let mut last_error = TransportError::Io("no attempt made".to_string());

        for attempt in 1..=attempts {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                debug!(node = %node.id(), attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }

            // The credential is looked up again for every attempt
            let token = match datacenter.token_provider().token().await {
                Ok(token) => token,
                Err(e) => {
                    self.observers.publish(
                        event(CallEventKind::ExecutionFailed)
                            .with_attempt(attempt)
                            .with_elapsed(started.elapsed())
                            .with_error("token", e.to_string()),
                    );
                    return Err(CallError::Token(e));
                }
            };

            let context = AttemptContext::new(attempt, token);
            self.observers
                .publish(event(CallEventKind::AttemptStarted).with_attempt(attempt));

            let attempt_started = Instant::now();
            let result = match tokio::time::timeout(timeout, transport.send(node, request, &context)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };

            match result {
                Ok(response) => {
                    debug!(
                        node = %node.id(),
                        attempt,
                        status = response.status,
                        request_id = %context.request_id,
                        "Attempt completed"
                    );
                    self.observers.publish(
                        event(CallEventKind::AttemptSucceeded)
                            .with_attempt(attempt)
                            .with_status(response.status)
                            .with_elapsed(attempt_started.elapsed()),
                    );
                    self.observers.publish(
                        event(CallEventKind::ExecutionSucceeded)
                            .with_attempt(attempt)
                            .with_status(response.status)
                            .with_elapsed(started.elapsed()),
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(
                        node = %node.id(),
                        datacenter = %datacenter.name(),
                        attempt,
                        max_tries = attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    self.observers.publish(
                        event(CallEventKind::AttemptFailed)
                            .with_attempt(attempt)
                            .with_elapsed(attempt_started.elapsed())
                            .with_error(e.class(), e.to_string()),
                    );
                    last_error = e;
                }
            }
        }

        self.observers.publish(
            event(CallEventKind::ExecutionFailed)
                .with_attempt(attempts)
                .with_elapsed(started.elapsed())
                .with_error("retries_exhausted", last_error.to_string()),
        );

        Err(CallError::RetriesExhausted {
            node: node.id().to_string(),
            attempts,
            source: last_error,
        })
    }
}
