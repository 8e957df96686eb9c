//! # Dispatch Engine
//! Turns a project's accepted alerts into gateway messages.
//!
//! Per alert: `Pending → Sending → Sent | Failed`. `started_at` is written before
//! the first attempt and `finished_at` + `sent` after a confirmed send, so a
//! record with `started_at` and `sent = false` means "attempted and failed".
//!
//! Policy:
//! - acceptance keywords filter first (filtered alerts are not failures)
//! - ordering via `order::order_stored`
//! - channel existence check before any send or state change
//! - fail-fast: the first alert/group that exhausts its retries halts the run,
//!   leaving later alerts pending for the next run
//! - failed alerts are only picked up again after `reset_delivery`
//!
//! Runs for one project are serialized, batch selection included; different
//! projects run concurrently.

pub mod scheduler;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::alert::{
    Actor, AlertId, DeliveryRecord, DeliveryUpdate, DispatchMode, MessageFormat, ProjectConfig,
    ProjectId, StoredAlert,
};
use crate::error::DispatchError;
use crate::notify::template::{format_alert, join_digest};
use crate::notify::{send_with_retry, MessageGateway, RetryPolicy};
use crate::order::order_stored;
use crate::store::AlertStore;

/// Alerts per `many_in_one` message.
pub const DEFAULT_BATCH_SIZE: usize = 6;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("dispatch_runs_total", "Dispatch runs started.");
        describe_counter!("dispatch_sent_total", "Alerts confirmed as sent.");
        describe_counter!(
            "dispatch_failed_total",
            "Alerts whose send exhausted all retries."
        );
        describe_counter!(
            "dispatch_filtered_total",
            "Alerts excluded by acceptance keywords."
        );
        describe_counter!("dispatch_messages_total", "Gateway messages attempted.");
        describe_counter!(
            "dispatch_channel_missing_total",
            "Runs aborted because the destination channel was not found."
        );
        describe_counter!(
            "dispatch_scheduler_ticks_total",
            "Passes over scheduled projects."
        );
        describe_gauge!(
            "dispatch_scheduler_last_run_ts",
            "Unix time of the last scheduler pass."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Not attempted in this run.
    Pending,
    Sent,
    Failed,
    /// Excluded by acceptance keywords.
    Filtered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertOutcome {
    pub alert_id: AlertId,
    pub url: String,
    pub status: AlertStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AlertOutcome {
    fn new(alert: &StoredAlert, status: AlertStatus) -> Self {
        Self {
            alert_id: alert.id.clone(),
            url: alert.alert.url.clone(),
            status,
            attempts: 0,
            error: None,
        }
    }
}

/// Result of one run. Partial success is always reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub project_id: ProjectId,
    pub sent_count: usize,
    pub duplicated_count: usize,
    pub filtered_count: usize,
    pub send_error: bool,
    pub per_alert_status: Vec<AlertOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DispatchSummary {
    pub fn empty(project_id: ProjectId, duplicated_count: usize) -> Self {
        Self {
            project_id,
            duplicated_count,
            ..Self::default()
        }
    }
}

pub struct DispatchEngine {
    store: Arc<dyn AlertStore>,
    gateway: Arc<dyn MessageGateway>,
    retry: RetryPolicy,
    batch_size: usize,
    running: Mutex<HashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn AlertStore>, gateway: Arc<dyn MessageGateway>) -> Self {
        Self {
            store,
            gateway,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `0` is treated as 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Dispatch a freshly ingested batch. Only projects in automatic mode send;
    /// others get `NotInAutomaticMode` and nothing changes.
    pub async fn dispatch_automatic(
        &self,
        actor: &Actor,
        project: &ProjectId,
        batch: Option<Vec<StoredAlert>>,
        duplicated_count: usize,
    ) -> Result<DispatchSummary, DispatchError> {
        if project.is_blank() {
            return Err(DispatchError::MissingProjectOrBatch("missing project id".into()));
        }
        let Some(batch) = batch else {
            return Err(DispatchError::MissingProjectOrBatch("missing alert batch".into()));
        };
        let cfg = self.project(project).await?;
        if cfg.dispatch_mode != DispatchMode::Automatic {
            return Err(DispatchError::NotInAutomaticMode(project.to_string()));
        }
        let lock = self.project_lock(&cfg.id);
        let _guard = lock.lock().await;
        let batch = self.still_eligible(batch).await?;
        self.run(actor, &cfg, batch, duplicated_count).await
    }

    /// Send every never-attempted alert of a project, whatever its dispatch mode.
    pub async fn dispatch_pending(
        &self,
        actor: &Actor,
        project: &ProjectId,
    ) -> Result<DispatchSummary, DispatchError> {
        if project.is_blank() {
            return Err(DispatchError::MissingProjectOrBatch("missing project id".into()));
        }
        let cfg = self.project(project).await?;
        // batch selection happens under the lock too
        let lock = self.project_lock(&cfg.id);
        let _guard = lock.lock().await;
        let batch = self.store.pending_alerts(project).await?;
        let batch = self.still_eligible(batch).await?;
        self.run(actor, &cfg, batch, 0).await
    }

    /// Make a failed/unsent alert eligible for a manual re-send.
    pub async fn reset_delivery(
        &self,
        actor: &Actor,
        alert_id: &AlertId,
    ) -> Result<DeliveryRecord, DispatchError> {
        let rec = self
            .store
            .delivery_record(alert_id)
            .await?
            .ok_or_else(|| DispatchError::AlertNotFound(alert_id.to_string()))?;
        if rec.sent {
            return Err(DispatchError::AlreadySent(alert_id.to_string()));
        }
        let rec = self
            .store
            .upsert_delivery_record(actor, alert_id, &rec.project_id, DeliveryUpdate::reset())
            .await?;
        tracing::info!(target: "dispatch", alert = %alert_id, actor = %actor.name, "delivery reset");
        Ok(rec)
    }

    async fn project(&self, project: &ProjectId) -> Result<ProjectConfig, DispatchError> {
        self.store
            .project_config(project)
            .await?
            .ok_or_else(|| DispatchError::MissingProjectOrBatch(format!("unknown project '{project}'")))
    }

    fn project_lock(&self, project: &ProjectId) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.running.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(project.clone()).or_default().clone()
    }

    /// Drop alerts already attempted or sent since the batch was built.
    /// Alerts without a record yet count as eligible.
    async fn still_eligible(&self, batch: Vec<StoredAlert>) -> Result<Vec<StoredAlert>, DispatchError> {
        let mut out = Vec::with_capacity(batch.len());
        for alert in batch {
            match self.store.delivery_record(&alert.id).await? {
                Some(rec) if !rec.is_eligible() => {
                    tracing::debug!(
                        target: "dispatch",
                        alert = %alert.id,
                        sent = rec.sent,
                        "skipping alert already attempted"
                    );
                }
                _ => out.push(alert),
            }
        }
        Ok(out)
    }

    /// Caller holds the project lock.
    async fn run(
        &self,
        actor: &Actor,
        cfg: &ProjectConfig,
        batch: Vec<StoredAlert>,
        duplicated_count: usize,
    ) -> Result<DispatchSummary, DispatchError> {
        ensure_metrics_described();

        let mut summary = DispatchSummary::empty(cfg.id.clone(), duplicated_count);
        if batch.is_empty() {
            return Ok(summary);
        }
        counter!("dispatch_runs_total").increment(1);

        // 1) acceptance keywords
        let (accepted, filtered) = filter_by_keywords(batch, cfg);
        summary.filtered_count = filtered.len();
        counter!("dispatch_filtered_total").increment(filtered.len() as u64);

        // 2) deterministic order
        let accepted = order_stored(accepted);

        if !accepted.is_empty() {
            // 3) channel must exist before any side effect
            self.ensure_channel(&cfg.destination_channel).await?;

            tracing::info!(
                target: "dispatch",
                project = %cfg.id,
                actor = %actor.name,
                alerts = accepted.len(),
                format = ?cfg.message_format,
                "dispatch started"
            );

            let outcomes = match cfg.message_format {
                MessageFormat::OnePerOne => self.send_one_per_one(actor, cfg, &accepted).await?,
                MessageFormat::ManyInOne => self.send_many_in_one(actor, cfg, &accepted).await?,
            };
            summary.per_alert_status = outcomes;
        }

        summary
            .per_alert_status
            .extend(filtered.iter().map(|a| AlertOutcome::new(a, AlertStatus::Filtered)));
        summary.sent_count = count(&summary, AlertStatus::Sent);
        summary.send_error = count(&summary, AlertStatus::Failed) > 0;

        counter!("dispatch_sent_total").increment(summary.sent_count as u64);
        counter!("dispatch_failed_total").increment(count(&summary, AlertStatus::Failed) as u64);

        tracing::info!(
            target: "dispatch",
            project = %cfg.id,
            sent = summary.sent_count,
            filtered = summary.filtered_count,
            duplicated = summary.duplicated_count,
            send_error = summary.send_error,
            "dispatch finished"
        );
        Ok(summary)
    }

    async fn ensure_channel(&self, channel: &str) -> Result<(), DispatchError> {
        let check = tokio::time::timeout(
            self.retry.attempt_timeout,
            self.gateway.channel_exists(channel),
        )
        .await;
        match check {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => {
                counter!("dispatch_channel_missing_total").increment(1);
                Err(DispatchError::ChannelNotFound(channel.to_string()))
            }
            Ok(Err(e)) => {
                tracing::warn!(target: "dispatch", channel, error = %e, "channel check failed");
                counter!("dispatch_channel_missing_total").increment(1);
                Err(DispatchError::ChannelNotFound(channel.to_string()))
            }
            Err(_) => {
                tracing::warn!(target: "dispatch", channel, "channel check timed out");
                counter!("dispatch_channel_missing_total").increment(1);
                Err(DispatchError::ChannelNotFound(channel.to_string()))
            }
        }
    }

    async fn send_one_per_one(
        &self,
        actor: &Actor,
        cfg: &ProjectConfig,
        alerts: &[StoredAlert],
    ) -> Result<Vec<AlertOutcome>, DispatchError> {
        let mut outcomes: Vec<AlertOutcome> = alerts
            .iter()
            .map(|a| AlertOutcome::new(a, AlertStatus::Pending))
            .collect();

        for (i, alert) in alerts.iter().enumerate() {
            let body = format_alert(&alert.alert, &cfg.template);
            self.mark_started(actor, alert, &body).await?;

            counter!("dispatch_messages_total").increment(1);
            let report =
                send_with_retry(self.gateway.as_ref(), &cfg.destination_channel, &body, &self.retry)
                    .await;
            outcomes[i].attempts = report.attempts;

            match report.result {
                Ok(()) => {
                    self.mark_delivered(actor, alert).await?;
                    outcomes[i].status = AlertStatus::Sent;
                }
                Err(e) => {
                    outcomes[i].status = AlertStatus::Failed;
                    outcomes[i].error = Some(e.to_string());
                    tracing::warn!(
                        target: "dispatch",
                        project = %cfg.id,
                        alert = %alert.id,
                        remaining = alerts.len() - i - 1,
                        error = %e,
                        "send failed; halting run"
                    );
                    break;
                }
            }
        }
        Ok(outcomes)
    }

    async fn send_many_in_one(
        &self,
        actor: &Actor,
        cfg: &ProjectConfig,
        alerts: &[StoredAlert],
    ) -> Result<Vec<AlertOutcome>, DispatchError> {
        let mut outcomes: Vec<AlertOutcome> = alerts
            .iter()
            .map(|a| AlertOutcome::new(a, AlertStatus::Pending))
            .collect();

        for (g, group) in alerts.chunks(self.batch_size).enumerate() {
            let offset = g * self.batch_size;
            let blocks: Vec<String> = group
                .iter()
                .map(|a| format_alert(&a.alert, &cfg.template))
                .collect();
            for (alert, block) in group.iter().zip(&blocks) {
                self.mark_started(actor, alert, block).await?;
            }

            let body = join_digest(&blocks);
            counter!("dispatch_messages_total").increment(1);
            let report =
                send_with_retry(self.gateway.as_ref(), &cfg.destination_channel, &body, &self.retry)
                    .await;

            match report.result {
                Ok(()) => {
                    for (k, alert) in group.iter().enumerate() {
                        self.mark_delivered(actor, alert).await?;
                        outcomes[offset + k].status = AlertStatus::Sent;
                        outcomes[offset + k].attempts = report.attempts;
                    }
                }
                Err(e) => {
                    for k in 0..group.len() {
                        outcomes[offset + k].status = AlertStatus::Failed;
                        outcomes[offset + k].attempts = report.attempts;
                        outcomes[offset + k].error = Some(e.to_string());
                    }
                    tracing::warn!(
                        target: "dispatch",
                        project = %cfg.id,
                        group = g,
                        remaining = alerts.len() - offset - group.len(),
                        error = %e,
                        "group send failed; halting run"
                    );
                    break;
                }
            }
        }
        Ok(outcomes)
    }

    async fn mark_started(
        &self,
        actor: &Actor,
        alert: &StoredAlert,
        message: &str,
    ) -> Result<(), DispatchError> {
        self.store
            .upsert_delivery_record(
                actor,
                &alert.id,
                &alert.project_id,
                DeliveryUpdate::started(Utc::now(), message),
            )
            .await?;
        Ok(())
    }

    async fn mark_delivered(&self, actor: &Actor, alert: &StoredAlert) -> Result<(), DispatchError> {
        self.store
            .upsert_delivery_record(
                actor,
                &alert.id,
                &alert.project_id,
                DeliveryUpdate::delivered(Utc::now()),
            )
            .await?;
        Ok(())
    }
}

fn count(summary: &DispatchSummary, status: AlertStatus) -> usize {
    summary
        .per_alert_status
        .iter()
        .filter(|o| o.status == status)
        .count()
}

/// Split into (accepted, filtered). No keywords configured → everything passes.
fn filter_by_keywords(
    batch: Vec<StoredAlert>,
    cfg: &ProjectConfig,
) -> (Vec<StoredAlert>, Vec<StoredAlert>) {
    let keywords: Vec<String> = cfg
        .acceptance_keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return (batch, Vec::new());
    }
    batch.into_iter().partition(|a| {
        let hay = format!(
            "{} {}",
            a.alert.title.as_deref().unwrap_or_default(),
            a.alert.content.as_deref().unwrap_or_default()
        )
        .to_lowercase();
        keywords.iter().any(|k| hay.contains(k.as_str()))
    })
}
