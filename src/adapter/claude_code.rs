//! Claude Code runtime adapter: bridges inbound envelopes into isolated
//! agent-session turns and publishes results back on `envelope.replyTo`
//! (`spec.md` §4.6.3).
//!
//! The binding to the actual agent-session SDK is abstracted behind
//! [`AgentSessionRuntime`] so this module stays a thin bounded-concurrency
//! gate and result-routing shim — the same dependency-injection seam the
//! teacher draws around its OS-layer executors
//! (`airssys_osl::executors::process`), swapped here from process
//! execution to an agent-turn execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::error::AdapterError;
use super::status::AdapterStatus;
use super::traits::{Adapter, AdapterKind};
use crate::core::{PublishOptions, RelayPublisher};
use crate::envelope::Envelope;
use crate::store::{IndexStore, RunOutcome, RunRow};

/// Options passed into [`AgentSessionRuntime::run_turn`], mirroring the
/// runtime-options surface described in `spec.md` §4.6.3 step 3.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub resume_session_id: Option<String>,
}

/// Outcome of a completed agent turn.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub session_id: String,
    pub final_text: String,
    pub cost_usd: Option<f64>,
}

/// Abstraction over the agent-session SDK so this adapter can be tested
/// without a live binding. A production implementation drives the actual
/// `query`-style async stream described in `spec.md` §4.6.3 step 3-4.
#[async_trait]
pub trait AgentSessionRuntime: Send + Sync {
    async fn run_turn(&self, prompt: String, options: RunOptions) -> Result<RunResult, String>;

    /// Cooperative cancellation for in-flight turns during `stop()`. A
    /// runtime quirk: once aborted, `session_id` must never be reused for
    /// a resume attempt (`spec.md` §4.6.3 "On stop()").
    async fn cancel(&self, session_id: &str);
}

#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    pub id: String,
    pub subject_prefix: String,
    pub display_name: String,
    pub max_concurrent: usize,
    pub default_cwd: Option<String>,
    pub default_model: Option<String>,
    pub conversational: bool,
    pub stop_grace: Duration,
    /// Upper bound on a single agent turn (`spec.md` §5 "Runtime-adapter
    /// per-run deadline"). A turn that exceeds this is cancelled and
    /// recorded as a failed run rather than left to run unbounded.
    pub run_deadline: Duration,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            id: "claude-code".to_string(),
            subject_prefix: "relay.agent.claude".to_string(),
            display_name: "Claude Code".to_string(),
            max_concurrent: 3,
            default_cwd: None,
            default_model: None,
            conversational: false,
            stop_grace: Duration::from_secs(30),
            run_deadline: Duration::from_secs(600),
        }
    }
}

/// The JSON payload convention this adapter reads from/writes to
/// `envelope.payload` (`spec.md` §3 "PayloadConvention").
#[derive(Debug, Serialize, Deserialize)]
struct AgentPayload {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<String>,
}

struct RunHandle {
    session_id: String,
}

pub struct ClaudeCodeAdapter {
    config: ClaudeCodeConfig,
    runtime: Arc<dyn AgentSessionRuntime>,
    index: IndexStore,
    relay: tokio::sync::OnceCell<RelayPublisher>,
    permits: Arc<Semaphore>,
    draining: Arc<std::sync::atomic::AtomicBool>,
    in_flight: Arc<Mutex<HashMap<Uuid, RunHandle>>>,
    conversations: Mutex<HashMap<Uuid, String>>,
    status: Mutex<AdapterStatus>,
}

impl ClaudeCodeAdapter {
    pub fn new(config: ClaudeCodeConfig, runtime: Arc<dyn AgentSessionRuntime>, index: IndexStore) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            runtime,
            index,
            relay: tokio::sync::OnceCell::new(),
            permits,
            draining: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            conversations: Mutex::new(HashMap::new()),
            status: Mutex::new(AdapterStatus::stopped()),
        }
    }

    async fn reply(&self, reply_to: &str, payload: AgentPayload, correlation_id: Option<Uuid>) {
        let Some(relay) = self.relay.get() else {
            return;
        };
        let Ok(bytes) = serde_json::to_vec(&payload) else {
            return;
        };
        let opts = PublishOptions {
            correlation_id,
            ..Default::default()
        };
        if let Err(e) = relay.publish(reply_to, Bytes::from(bytes), opts).await {
            tracing::warn!(error = ?e, "failed to publish agent reply");
        }
    }

    /// Build the structured natural-language preamble described in
    /// `spec.md` §4.6.3 step 2, embedding sender/subject/reply-to context
    /// so the agent understands where the message came from.
    fn compose_prompt(&self, envelope: &Envelope, content: &str) -> String {
        let reply_to = envelope
            .reply_to
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("(none)");
        format!(
            "You are receiving a message over the DorkOS relay bus.\n\
             Subject: {}\n\
             Reply-to: {}\n\
             ---\n\
             {content}",
            envelope.subject.as_str(),
            reply_to,
        )
    }
}

#[async_trait]
impl Adapter for ClaudeCodeAdapter {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn subject_prefix(&self) -> &str {
        &self.config.subject_prefix
    }

    fn display_name(&self) -> &str {
        &self.config.display_name
    }

    fn adapter_kind(&self) -> AdapterKind {
        AdapterKind::Runtime
    }

    async fn start(&self, relay: RelayPublisher) -> Result<(), AdapterError> {
        self.relay.set(relay).map_err(|_| AdapterError::StartFailed {
            adapter_id: self.config.id.clone(),
            reason: "adapter already started".to_string(),
        })?;
        *self.status.lock() = AdapterStatus::running().with_in_flight(0);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.draining.store(true, std::sync::atomic::Ordering::Release);

        let handles: Vec<(Uuid, String)> = self
            .in_flight
            .lock()
            .iter()
            .map(|(run_id, handle)| (*run_id, handle.session_id.clone()))
            .collect();
        for (_, session_id) in &handles {
            self.runtime.cancel(session_id).await;
        }

        let deadline = Instant::now() + self.config.stop_grace;
        while Instant::now() < deadline && !self.in_flight.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        *self.status.lock() = AdapterStatus::stopped();
        Ok(())
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<(), AdapterError> {
        if self.draining.load(std::sync::atomic::Ordering::Acquire) {
            return Err(AdapterError::AdapterStopping(self.config.id.clone()));
        }

        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            return Err(AdapterError::Backpressure {
                adapter_id: self.config.id.clone(),
                resource: "agent session permits".to_string(),
            });
        };

        let payload: AgentPayload = serde_json::from_slice(&envelope.payload).unwrap_or(AgentPayload {
            content: String::from_utf8_lossy(&envelope.payload).to_string(),
            from: None,
            error_kind: None,
        });

        let prompt = self.compose_prompt(envelope, &payload.content);
        let resume_session_id = if self.config.conversational {
            envelope
                .correlation_id
                .and_then(|cid| self.conversations.lock().get(&cid).cloned())
        } else {
            None
        };

        let options = RunOptions {
            cwd: self.config.default_cwd.clone(),
            model: self.config.default_model.clone(),
            permission_mode: None,
            resume_session_id: resume_session_id.clone(),
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let session_id = resume_session_id.unwrap_or_else(|| run_id.to_string());
        self.in_flight.lock().insert(
            run_id,
            RunHandle {
                session_id: session_id.clone(),
            },
        );
        self.status.lock().in_flight = self.in_flight.lock().len();

        let result = match tokio::time::timeout(self.config.run_deadline, self.runtime.run_turn(prompt, options)).await
        {
            Ok(result) => result,
            Err(_) => {
                self.runtime.cancel(&session_id).await;
                Err(format!(
                    "agent turn exceeded its {:?} run deadline",
                    self.config.run_deadline
                ))
            }
        };

        match result {
            Ok(run_result) => {
                self.in_flight.lock().remove(&run_id);
                if self.config.conversational {
                    if let Some(cid) = envelope.correlation_id {
                        self.conversations.lock().insert(cid, run_result.session_id.clone());
                    }
                }

                self.index
                    .insert_run(RunRow {
                        run_id,
                        adapter_id: self.config.id.clone(),
                        envelope_id: envelope.id,
                        started_at,
                        ended_at: Some(Utc::now()),
                        outcome: RunOutcome::Success,
                        error_kind: None,
                        cost_reported: run_result.cost_usd,
                    })
                    .await
                    .ok();

                if let Some(reply_to) = &envelope.reply_to {
                    let reply_payload = AgentPayload {
                        content: run_result.final_text,
                        from: Some(self.config.id.clone()),
                        error_kind: None,
                    };
                    self.reply(reply_to.as_str(), reply_payload, envelope.correlation_id).await;
                }
            }
            Err(error) => {
                self.in_flight.lock().remove(&run_id);
                self.index
                    .insert_run(RunRow {
                        run_id,
                        adapter_id: self.config.id.clone(),
                        envelope_id: envelope.id,
                        started_at,
                        ended_at: Some(Utc::now()),
                        outcome: RunOutcome::Failure,
                        error_kind: Some(error.clone()),
                        cost_reported: None,
                    })
                    .await
                    .ok();

                if let Some(reply_to) = &envelope.reply_to {
                    let reply_payload = AgentPayload {
                        content: String::new(),
                        from: Some(self.config.id.clone()),
                        error_kind: Some(error),
                    };
                    self.reply(reply_to.as_str(), reply_payload, envelope.correlation_id).await;
                }
            }
        }

        drop(permit);
        self.status.lock().in_flight = self.in_flight.lock().len();
        Ok(())
    }

    fn get_status(&self) -> AdapterStatus {
        self.status.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubRuntime {
        response: String,
    }

    #[async_trait]
    impl AgentSessionRuntime for StubRuntime {
        async fn run_turn(&self, _prompt: String, _options: RunOptions) -> Result<RunResult, String> {
            Ok(RunResult {
                session_id: "session-1".to_string(),
                final_text: self.response.clone(),
                cost_usd: Some(0.01),
            })
        }

        async fn cancel(&self, _session_id: &str) {}
    }

    fn envelope(content: &str) -> Envelope {
        let payload = AgentPayload {
            content: content.to_string(),
            from: None,
            error_kind: None,
        };
        Envelope::new(
            crate::subject::Subject::parse("relay.agent.claude").unwrap(),
            Bytes::from(serde_json::to_vec(&payload).unwrap()),
        )
    }

    #[tokio::test]
    async fn deliver_records_success_run() {
        let index = IndexStore::open_in_memory().await.unwrap();
        let runtime = Arc::new(StubRuntime {
            response: "pong".to_string(),
        });
        let adapter = ClaudeCodeAdapter::new(ClaudeCodeConfig::default(), runtime, index);
        adapter.deliver(&envelope("ping")).await.unwrap();
        assert_eq!(adapter.get_status().in_flight, 0);
    }

    struct StallingRuntime;

    #[async_trait]
    impl AgentSessionRuntime for StallingRuntime {
        async fn run_turn(&self, _prompt: String, _options: RunOptions) -> Result<RunResult, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("deadline should fire long before this resolves");
        }

        async fn cancel(&self, _session_id: &str) {}
    }

    #[tokio::test]
    async fn deliver_times_out_at_run_deadline() {
        let index = IndexStore::open_in_memory().await.unwrap();
        let mut config = ClaudeCodeConfig::default();
        config.run_deadline = Duration::from_millis(50);
        let adapter = ClaudeCodeAdapter::new(config, Arc::new(StallingRuntime), index);

        adapter.deliver(&envelope("ping")).await.unwrap();
        assert_eq!(adapter.get_status().in_flight, 0);
    }

    #[tokio::test]
    async fn deliver_rejects_when_permits_exhausted() {
        let index = IndexStore::open_in_memory().await.unwrap();
        let runtime = Arc::new(StubRuntime {
            response: "pong".to_string(),
        });
        let mut config = ClaudeCodeConfig::default();
        config.max_concurrent = 1;
        let adapter = ClaudeCodeAdapter::new(config, runtime, index);

        let _permit = adapter.permits.clone().try_acquire_owned().unwrap();
        let result = adapter.deliver(&envelope("ping")).await;
        assert!(matches!(result, Err(AdapterError::Backpressure { .. })));
    }
}
