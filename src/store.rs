//! # Alert Store
//!
//! Durable home of alerts, delivery records and project settings. The relational
//! backend is an external collaborator; this module defines the interface the
//! pipeline needs plus an in-memory implementation that can snapshot itself to a
//! JSON file after every mutation.
//!
//! Insertion is an atomic check-and-insert per call: two concurrent ingestions of
//! the same URL into one project cannot both win.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::alert::{
    Actor, Alert, AlertId, DeliveryRecord, DeliveryUpdate, DispatchMode, ProjectConfig, ProjectId,
    StoredAlert,
};

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn project_config(&self, project: &ProjectId) -> Result<Option<ProjectConfig>>;

    async fn put_project_config(&self, cfg: ProjectConfig) -> Result<()>;

    async fn projects_in_mode(&self, mode: DispatchMode) -> Result<Vec<ProjectId>>;

    /// Subset of `urls` already stored for `project`.
    async fn find_existing_urls(
        &self,
        project: &ProjectId,
        urls: &[String],
    ) -> Result<HashSet<String>>;

    /// Insert alerts whose URL is new for the project and create a pending
    /// delivery record for each. One entry per input, in order; `None` means
    /// the URL was already present (or appeared earlier in `alerts`).
    async fn bulk_insert_alerts(
        &self,
        actor: &Actor,
        project: &ProjectId,
        alerts: Vec<Alert>,
    ) -> Result<Vec<Option<StoredAlert>>>;

    /// Apply `update` to the alert's record, creating a pending one if absent.
    async fn upsert_delivery_record(
        &self,
        actor: &Actor,
        alert_id: &AlertId,
        project: &ProjectId,
        update: DeliveryUpdate,
    ) -> Result<DeliveryRecord>;

    async fn delivery_record(&self, alert_id: &AlertId) -> Result<Option<DeliveryRecord>>;

    /// Never-attempted alerts of a project, in insertion order. Failed records
    /// (`started_at` set, not sent) stay out until `DeliveryUpdate::reset`.
    async fn pending_alerts(&self, project: &ProjectId) -> Result<Vec<StoredAlert>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    projects: Vec<ProjectConfig>,
    #[serde(default)]
    alerts: Vec<StoredAlert>,
    #[serde(default)]
    deliveries: Vec<DeliveryRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    projects: HashMap<ProjectId, ProjectConfig>,
    /// project → alert ids in insertion order
    order: HashMap<ProjectId, Vec<AlertId>>,
    /// project → normalized url → id
    urls: HashMap<ProjectId, HashMap<String, AlertId>>,
    alerts: HashMap<AlertId, StoredAlert>,
    deliveries: HashMap<AlertId, DeliveryRecord>,
}

impl Inner {
    fn from_snapshot(s: Snapshot) -> Self {
        let mut inner = Inner::default();
        for p in s.projects {
            inner.projects.insert(p.id.clone(), p);
        }
        for a in s.alerts {
            inner.index_alert(a);
        }
        for d in s.deliveries {
            inner.deliveries.insert(d.alert_id.clone(), d);
        }
        inner
    }

    fn index_alert(&mut self, a: StoredAlert) {
        self.order
            .entry(a.project_id.clone())
            .or_default()
            .push(a.id.clone());
        self.urls
            .entry(a.project_id.clone())
            .or_default()
            .insert(a.alert.url.clone(), a.id.clone());
        self.alerts.insert(a.id.clone(), a);
    }

    fn snapshot(&self) -> Snapshot {
        let mut projects: Vec<ProjectConfig> = self.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));

        let mut project_ids: Vec<&ProjectId> = self.order.keys().collect();
        project_ids.sort();
        let mut alerts = Vec::with_capacity(self.alerts.len());
        for p in project_ids {
            for id in &self.order[p] {
                if let Some(a) = self.alerts.get(id) {
                    alerts.push(a.clone());
                }
            }
        }

        let mut deliveries: Vec<DeliveryRecord> = self.deliveries.values().cloned().collect();
        deliveries.sort_by(|a, b| a.alert_id.cmp(&b.alert_id));

        Snapshot {
            projects,
            alerts,
            deliveries,
        }
    }
}

/// Thread-safe in-memory store, optionally backed by a JSON snapshot file.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) a file-backed store. Every mutation rewrites the file
    /// before returning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading store snapshot {}", path.display()))?;
            let snap: Snapshot = serde_json::from_str(&raw)
                .with_context(|| format!("parsing store snapshot {}", path.display()))?;
            Inner::from_snapshot(snap)
        } else {
            Inner::default()
        };
        tracing::info!(
            target: "store",
            path = %path.display(),
            alerts = inner.alerts.len(),
            projects = inner.projects.len(),
            "store opened"
        );
        Ok(Self {
            inner: Mutex::new(inner),
            path: Some(path),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("store mutex poisoned"))
    }

    /// Write-then-rename so a crash never leaves a torn snapshot.
    fn persist(&self, inner: &Inner) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("store dir {}", dir.display()))?;
        }
        let body = serde_json::to_vec_pretty(&inner.snapshot()).context("serialize store")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn project_config(&self, project: &ProjectId) -> Result<Option<ProjectConfig>> {
        Ok(self.lock()?.projects.get(project).cloned())
    }

    async fn put_project_config(&self, cfg: ProjectConfig) -> Result<()> {
        let mut inner = self.lock()?;
        inner.projects.insert(cfg.id.clone(), cfg);
        self.persist(&inner)
    }

    async fn projects_in_mode(&self, mode: DispatchMode) -> Result<Vec<ProjectId>> {
        let inner = self.lock()?;
        let mut ids: Vec<ProjectId> = inner
            .projects
            .values()
            .filter(|p| p.dispatch_mode == mode)
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn find_existing_urls(
        &self,
        project: &ProjectId,
        urls: &[String],
    ) -> Result<HashSet<String>> {
        let inner = self.lock()?;
        let Some(known) = inner.urls.get(project) else {
            return Ok(HashSet::new());
        };
        Ok(urls
            .iter()
            .filter(|u| known.contains_key(u.as_str()))
            .cloned()
            .collect())
    }

    async fn bulk_insert_alerts(
        &self,
        actor: &Actor,
        project: &ProjectId,
        alerts: Vec<Alert>,
    ) -> Result<Vec<Option<StoredAlert>>> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let mut out = Vec::with_capacity(alerts.len());
        let mut inserted = 0usize;

        for alert in alerts {
            let known = inner
                .urls
                .get(project)
                .is_some_and(|m| m.contains_key(&alert.url));
            if known || alert.url.trim().is_empty() {
                out.push(None);
                continue;
            }
            let id = AlertId::derive(project, &alert.url);
            let stored = StoredAlert {
                id: id.clone(),
                project_id: project.clone(),
                alert,
                ingested_at: now,
            };
            inner.index_alert(stored.clone());
            inner
                .deliveries
                .entry(id.clone())
                .or_insert_with(|| DeliveryRecord::pending(id, project.clone(), actor));
            inserted += 1;
            out.push(Some(stored));
        }

        if inserted > 0 {
            self.persist(&inner)?;
        }
        tracing::debug!(target: "store", project = %project, inserted, "alerts inserted");
        Ok(out)
    }

    async fn upsert_delivery_record(
        &self,
        actor: &Actor,
        alert_id: &AlertId,
        project: &ProjectId,
        update: DeliveryUpdate,
    ) -> Result<DeliveryRecord> {
        let mut inner = self.lock()?;
        let rec = inner
            .deliveries
            .entry(alert_id.clone())
            .or_insert_with(|| DeliveryRecord::pending(alert_id.clone(), project.clone(), actor));
        update.apply(rec);
        rec.updated_by = Some(actor.name.clone());
        let out = rec.clone();
        self.persist(&inner)?;
        Ok(out)
    }

    async fn delivery_record(&self, alert_id: &AlertId) -> Result<Option<DeliveryRecord>> {
        Ok(self.lock()?.deliveries.get(alert_id).cloned())
    }

    async fn pending_alerts(&self, project: &ProjectId) -> Result<Vec<StoredAlert>> {
        let inner = self.lock()?;
        let Some(ids) = inner.order.get(project) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter(|id| inner.deliveries.get(*id).map_or(true, DeliveryRecord::is_eligible))
            .filter_map(|id| inner.alerts.get(id).cloned())
            .collect())
    }
}
