//! Outbound messaging: gateway abstraction, retry wrapper and message templates.

pub mod template;
pub mod whatsapp;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::GatewayError;

/// External messaging gateway (a WhatsApp HTTP API in production).
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Whether the destination channel exists and is reachable.
    async fn channel_exists(&self, channel: &str) -> Result<bool, GatewayError>;

    async fn send_text(&self, channel: &str, body: &str) -> Result<(), GatewayError>;

    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Bounded retry with a fixed backoff and a per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff", with = "millis")]
    pub backoff: Duration,
    #[serde(default = "default_attempt_timeout", with = "millis")]
    pub attempt_timeout: Duration,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff() -> Duration {
    Duration::from_secs(2)
}
fn default_attempt_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; for tests and tools.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// How a retried send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub attempts: u32,
    pub result: Result<(), GatewayError>,
}

impl SendReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Send `body`, retrying any failure until `policy.max_attempts` is reached.
/// The backoff sleep always completes before the next attempt.
pub async fn send_with_retry(
    gateway: &dyn MessageGateway,
    channel: &str,
    body: &str,
    policy: &RetryPolicy,
) -> SendReport {
    let max = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let res = match tokio::time::timeout(policy.attempt_timeout, gateway.send_text(channel, body))
            .await
        {
            Ok(r) => r,
            Err(_) => Err(GatewayError::Timeout(policy.attempt_timeout.as_millis() as u64)),
        };

        match res {
            Ok(()) => {
                return SendReport {
                    attempts: attempt,
                    result: Ok(()),
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "gateway",
                    gateway = gateway.name(),
                    channel,
                    attempt,
                    max_attempts = max,
                    error = %e,
                    "send attempt failed"
                );
                if attempt < max {
                    tokio::time::sleep(policy.backoff).await;
                    continue;
                }
                return SendReport {
                    attempts: attempt,
                    result: Err(e),
                };
            }
        }
    }
}

/// Gateway that only logs; used when no messaging API is configured.
#[derive(Debug, Clone, Default)]
pub struct LogGateway;

#[async_trait]
impl MessageGateway for LogGateway {
    async fn channel_exists(&self, _channel: &str) -> Result<bool, GatewayError> {
        Ok(true)
    }

    async fn send_text(&self, channel: &str, body: &str) -> Result<(), GatewayError> {
        tracing::info!(target: "gateway", channel, chars = body.chars().count(), "log gateway: message not sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
