//! Telegram adapter: long-polling inbound, rate-limited outbound
//! (`spec.md` §4.6.1). Built on `teloxide`, the same bot-framework crate
//! the wider example corpus reaches for when bridging a message bus to
//! Telegram.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::Semaphore;

use super::error::AdapterError;
use super::status::AdapterStatus;
use super::traits::{Adapter, AdapterKind};
use crate::core::{PublishOptions, RelayPublisher};
use crate::envelope::Envelope;

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub id: String,
    pub subject_prefix: String,
    pub display_name: String,
    pub bot_token: String,
}

/// Per-chat token bucket limiting outbound sends to one message per
/// second, per `spec.md` §4.6.1 "Per-chat rate limiting".
struct RateLimiter {
    last_sent: Mutex<HashMap<i64, tokio::time::Instant>>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    async fn wait_turn(&self, chat_id: i64) {
        let wait = {
            let mut last_sent = self.last_sent.lock();
            let now = tokio::time::Instant::now();
            let wait = last_sent
                .get(&chat_id)
                .map(|prev| Duration::from_secs(1).saturating_sub(now.saturating_duration_since(*prev)))
                .unwrap_or_default();
            last_sent.insert(chat_id, now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

pub struct TelegramAdapter {
    config: TelegramConfig,
    bot: Bot,
    status: Mutex<AdapterStatus>,
    draining: Arc<AtomicBool>,
    poll_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    rate_limiter: Arc<RateLimiter>,
    inflight: Arc<Semaphore>,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Self {
        let bot = Bot::new(config.bot_token.clone());
        Self {
            config,
            bot,
            status: Mutex::new(AdapterStatus::stopped()),
            draining: Arc::new(AtomicBool::new(false)),
            poll_handle: Mutex::new(None),
            rate_limiter: Arc::new(RateLimiter::new()),
            inflight: Arc::new(Semaphore::new(64)),
        }
    }

    fn chat_subject(&self, chat_id: i64) -> String {
        format!("{}.{chat_id}", self.config.subject_prefix)
    }
}

#[async_trait]
impl Adapter for TelegramAdapter {
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
        AdapterKind::External
    }

    async fn start(&self, relay: RelayPublisher) -> Result<(), AdapterError> {
        let bot = self.bot.clone();
        let subject_prefix = self.config.subject_prefix.clone();
        let draining = self.draining.clone();
        let adapter_id = self.config.id.clone();

        let handle = tokio::spawn(async move {
            let mut offset: i32 = 0;
            loop {
                if draining.load(Ordering::Acquire) {
                    return;
                }
                let updates = match bot
                    .get_updates()
                    .offset(offset)
                    .timeout(30)
                    .send()
                    .await
                {
                    Ok(updates) => updates,
                    Err(e) => {
                        tracing::warn!(adapter_id = %adapter_id, error = %e, "telegram getUpdates failed, retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        continue;
                    }
                };

                for update in updates {
                    offset = offset.max(update.id.0 as i32 + 1);
                    let teloxide::types::UpdateKind::Message(message) = &update.kind else {
                        continue;
                    };
                    let Some(text) = message.text() else {
                        continue;
                    };
                    let chat_id = message.chat.id.0;
                    let subject = format!("{subject_prefix}.{chat_id}");
                    let reply_to = format!("{subject_prefix}.{chat_id}.reply");
                    let payload = serde_json::json!({
                        "content": text,
                        "from": message.from().map(|u| u.id.0.to_string()),
                        "channelMeta": {"chatId": chat_id},
                    });
                    let Ok(bytes) = serde_json::to_vec(&payload) else {
                        continue;
                    };
                    if let Err(e) = relay
                        .publish(
                            &subject,
                            Bytes::from(bytes),
                            PublishOptions {
                                reply_to: crate::subject::Subject::parse(&reply_to).ok(),
                                ..Default::default()
                            },
                        )
                        .await
                    {
                        tracing::warn!(error = ?e, "failed to publish inbound telegram update");
                    }
                }
            }
        });
        *self.poll_handle.lock() = Some(handle);
        *self.status.lock() = AdapterStatus::running();
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.draining.store(true, Ordering::Release);
        if let Some(handle) = self.poll_handle.lock().take() {
            // The poll loop checks `draining` between getUpdates calls, so
            // this resolves once the in-flight long-poll returns rather
            // than aborting mid-flush — avoids double-delivering the
            // final update on next restart.
            let _ = handle.await;
        }
        *self.status.lock() = AdapterStatus::stopped();
        Ok(())
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<(), AdapterError> {
        if self.draining.load(Ordering::Acquire) {
            return Err(AdapterError::AdapterStopping(self.config.id.clone()));
        }
        let Ok(_permit) = self.inflight.try_acquire() else {
            return Err(AdapterError::Backpressure {
                adapter_id: self.config.id.clone(),
                resource: "outbound inflight".to_string(),
            });
        };

        let value: serde_json::Value = serde_json::from_slice(&envelope.payload).unwrap_or_default();
        let Some(to) = value.get("to").and_then(|v| v.as_i64()).or_else(|| {
            envelope
                .subject
                .tokens()
                .last()
                .and_then(|t| t.parse::<i64>().ok())
        }) else {
            return Err(AdapterError::DeliveryFailed {
                adapter_id: self.config.id.clone(),
                reason: "cannot resolve telegram chat id".to_string(),
            });
        };
        let content = value
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        self.rate_limiter.wait_turn(to).await;

        self.bot
            .send_message(ChatId(to), content)
            .await
            .map_err(|e| AdapterError::DeliveryFailed {
                adapter_id: self.config.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn get_status(&self) -> AdapterStatus {
        self.status.lock().clone()
    }
}
