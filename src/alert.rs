//! Canonical alert shape, delivery ledger entries and per-project settings.
//!
//! Everything here is plain data: no I/O, serde-friendly, shared by the ingest
//! pipeline, the store and the dispatch engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project identifier as it arrives from upstream (`proyecto_id`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic alert id: first 16 hex chars of sha256(project_id + "\n" + normalized url).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub String);

impl AlertId {
    pub fn derive(project: &ProjectId, url: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(project.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(16);
        for b in digest.iter().take(8) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who performed a mutating call. Recorded on delivery records as `updated_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Actor for background jobs (scheduler, startup tasks).
    pub fn system(job: &str) -> Self {
        Self {
            name: format!("system:{job}"),
        }
    }
}

/// One canonical mention (article or social post).
///
/// Date fields are kept as the provider sent them; `order::effective_timestamp`
/// resolves them when ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Date or date-time text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// Separate time-of-day text, when the provider splits date and time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_time: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reach: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<i64>,
    /// Social network label; absent for media articles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Headline (media only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// An alert accepted into a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAlert {
    pub id: AlertId,
    pub project_id: ProjectId,
    pub alert: Alert,
    pub ingested_at: DateTime<Utc>,
}

/// Per-alert delivery ledger entry. Never deleted, only updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub alert_id: AlertId,
    pub project_id: ProjectId,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub sent: bool,
    pub reviewed: bool,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl DeliveryRecord {
    /// Fresh record for a newly accepted alert.
    pub fn pending(alert_id: AlertId, project_id: ProjectId, actor: &Actor) -> Self {
        Self {
            alert_id,
            project_id,
            started_at: None,
            finished_at: None,
            message: None,
            sent: false,
            reviewed: false,
            updated_by: Some(actor.name.clone()),
        }
    }

    /// Attempted at least once but never confirmed.
    pub fn is_failed(&self) -> bool {
        !self.sent && self.started_at.is_some()
    }

    /// Never attempted (or reset): the only state a dispatch run may send.
    pub fn is_eligible(&self) -> bool {
        !self.sent && self.started_at.is_none()
    }
}

/// Partial update applied by `AlertStore::upsert_delivery_record`.
///
/// Outer `Option` = "leave untouched", inner `Option` = the new (nullable) value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryUpdate {
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub finished_at: Option<Option<DateTime<Utc>>>,
    pub message: Option<Option<String>>,
    pub sent: Option<bool>,
    pub reviewed: Option<bool>,
}

impl DeliveryUpdate {
    /// Pending → Sending.
    pub fn started(at: DateTime<Utc>, message: &str) -> Self {
        Self {
            started_at: Some(Some(at)),
            finished_at: Some(None),
            message: Some(Some(message.to_string())),
            ..Self::default()
        }
    }

    /// Sending → Sent.
    pub fn delivered(at: DateTime<Utc>) -> Self {
        Self {
            finished_at: Some(Some(at)),
            sent: Some(true),
            ..Self::default()
        }
    }

    /// Back to "never attempted" so the alert is picked up again.
    pub fn reset() -> Self {
        Self {
            started_at: Some(None),
            finished_at: Some(None),
            sent: Some(false),
            ..Self::default()
        }
    }

    pub fn apply(self, rec: &mut DeliveryRecord) {
        if let Some(v) = self.started_at {
            rec.started_at = v;
        }
        if let Some(v) = self.finished_at {
            rec.finished_at = v;
        }
        if let Some(v) = self.message {
            rec.message = v;
        }
        if let Some(v) = self.sent {
            rec.sent = v;
        }
        if let Some(v) = self.reviewed {
            rec.reviewed = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Automatic,
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    OnePerOne,
    ManyInOne,
}

/// WhatsApp inline markup applied to a rendered field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStyle {
    #[default]
    Plain,
    Bold,
    Italic,
    Strike,
    Mono,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateField {
    pub order: u32,
    #[serde(default)]
    pub style: FieldStyle,
    /// Overrides the field name when `show_label` is on.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub show_label: bool,
}

/// Label overrides for numeric metrics on one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricLabels {
    #[serde(default)]
    pub reach: Option<String>,
    #[serde(default)]
    pub engagement: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTemplate {
    /// field name → placement/style. Names: title, content, url, author,
    /// network, reach, engagement, date.
    #[serde(default)]
    pub fields: BTreeMap<String, TemplateField>,
    /// Lower-cased network label → metric labels.
    #[serde(default)]
    pub metric_labels: HashMap<String, MetricLabels>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: ProjectId,
    pub dispatch_mode: DispatchMode,
    pub message_format: MessageFormat,
    pub destination_channel: String,
    #[serde(default)]
    pub template: ProjectTemplate,
    #[serde(default)]
    pub acceptance_keywords: BTreeSet<String>,
}
