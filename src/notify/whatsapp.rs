use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::MessageGateway;
use crate::error::GatewayError;

/// Connection settings for a WAHA-style WhatsApp HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    pub base_url: String,
    #[serde(default = "default_session")]
    pub session: String,
    /// "ENV" means: read from WHATSAPP_API_TOKEN.
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_session() -> String {
    "default".to_string()
}

#[derive(Clone)]
pub struct WhatsAppGateway {
    base_url: String,
    session: String,
    api_token: Option<String>,
    client: Client,
    timeout: Duration,
}

impl WhatsAppGateway {
    pub fn new(cfg: WhatsAppConfig) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            session: cfg.session,
            api_token: cfg.api_token.filter(|t| !t.trim().is_empty()),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let rb = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(self.timeout);
        match &self.api_token {
            Some(t) => rb.header("X-Api-Key", t),
            None => rb,
        }
    }
}

#[derive(Serialize)]
struct SendTextPayload<'a> {
    session: &'a str,
    #[serde(rename = "chatId")]
    chat_id: &'a str,
    text: &'a str,
}

fn transport(e: reqwest::Error, timeout: Duration) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(timeout.as_millis() as u64)
    } else {
        GatewayError::Transport(e.to_string())
    }
}

#[async_trait]
impl MessageGateway for WhatsAppGateway {
    async fn channel_exists(&self, channel: &str) -> Result<bool, GatewayError> {
        let path = format!("/api/{}/groups/{}", self.session, channel);
        let rsp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| transport(e, self.timeout))?;

        match rsp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(GatewayError::Rejected {
                status: s.as_u16(),
                body: rsp.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn send_text(&self, channel: &str, body: &str) -> Result<(), GatewayError> {
        let payload = SendTextPayload {
            session: &self.session,
            chat_id: channel,
            text: body,
        };
        let rsp = self
            .request(reqwest::Method::POST, "/api/sendText")
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport(e, self.timeout))?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: rsp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "whatsapp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_chat_id_key() {
        let p = SendTextPayload {
            session: "default",
            chat_id: "123@g.us",
            text: "hi",
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["chatId"], "123@g.us");
        assert_eq!(v["session"], "default");
    }

    #[test]
    fn base_url_is_trimmed_and_blank_token_dropped() {
        let gw = WhatsAppGateway::new(WhatsAppConfig {
            base_url: "http://localhost:3000/".into(),
            session: "s".into(),
            api_token: Some("  ".into()),
        });
        assert_eq!(gw.base_url, "http://localhost:3000");
        assert!(gw.api_token.is_none());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let gw = WhatsAppGateway::new(WhatsAppConfig {
            base_url: "http://127.0.0.1:9".into(),
            session: "s".into(),
            api_token: None,
        })
        .with_timeout(Duration::from_secs(2));
        let err = gw.send_text("c", "hi").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Transport(_) | GatewayError::Timeout(_)
        ));
    }
}
