// tests/common/mod.rs
// Shared fixtures: a recording gateway and seeded stores.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alert_dispatcher::alert::{
    Actor, Alert, DispatchMode, FieldStyle, MessageFormat, ProjectConfig, ProjectId,
    ProjectTemplate, StoredAlert, TemplateField,
};
use alert_dispatcher::error::GatewayError;
use alert_dispatcher::notify::MessageGateway;
use alert_dispatcher::store::{AlertStore, InMemoryStore};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Records every successful body; fails every send whose body contains `fail_marker`.
#[derive(Default)]
pub struct FakeGateway {
    pub missing_channel: bool,
    pub fail_marker: Option<String>,
    pub sent: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    /// Latency added to every send.
    pub delay: Option<Duration>,
}

impl FakeGateway {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn missing_channel() -> Arc<Self> {
        Arc::new(Self {
            missing_channel: true,
            ..Self::default()
        })
    }

    pub fn failing_on(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageGateway for FakeGateway {
    async fn channel_exists(&self, _channel: &str) -> Result<bool, GatewayError> {
        Ok(!self.missing_channel)
    }

    async fn send_text(&self, _channel: &str, body: &str) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if let Some(m) = &self.fail_marker {
            if body.contains(m.as_str()) {
                return Err(GatewayError::Rejected {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
        }
        self.sent.lock().unwrap().push(body.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Template rendering title then url, one per line.
pub fn project(id: &str, mode: DispatchMode, format: MessageFormat) -> ProjectConfig {
    let mut template = ProjectTemplate::default();
    template.fields.insert(
        "title".into(),
        TemplateField {
            order: 1,
            style: FieldStyle::Bold,
            label: None,
            show_label: false,
        },
    );
    template.fields.insert(
        "url".into(),
        TemplateField {
            order: 2,
            style: FieldStyle::Plain,
            label: None,
            show_label: false,
        },
    );
    ProjectConfig {
        id: ProjectId::new(id),
        dispatch_mode: mode,
        message_format: format,
        destination_channel: "group@g.us".into(),
        template,
        acceptance_keywords: Default::default(),
    }
}

pub async fn store_with(projects: Vec<ProjectConfig>) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for p in projects {
        store.put_project_config(p).await.unwrap();
    }
    store
}

/// `n` webhook rows `https://news.com/a{i}` with increasing timestamps.
pub fn webhook_rows(n: usize) -> Vec<Value> {
    (1..=n)
        .map(|i| {
            json!({
                "url": format!("https://news.com/a{i}"),
                "title": format!("Alert {i}"),
                "published_at": format!("2024-01-01 {:02}:{:02}", i / 60, i % 60),
            })
        })
        .collect()
}

/// Insert `n` alerts (same shape as `webhook_rows`) straight into the store.
pub async fn insert_alerts(store: &dyn AlertStore, project: &str, n: usize) -> Vec<StoredAlert> {
    let alerts = (1..=n)
        .map(|i| Alert {
            url: format!("http://news.com/a{i}"),
            title: Some(format!("Alert {i}")),
            published_at: Some(format!("2024-01-01 {:02}:{:02}", i / 60, i % 60)),
            ..Alert::default()
        })
        .collect();
    store
        .bulk_insert_alerts(&Actor::new("test"), &ProjectId::new(project), alerts)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.expect("fresh url"))
        .collect()
}
