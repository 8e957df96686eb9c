// src/dispatch/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use super::DispatchEngine;
use crate::alert::{Actor, DispatchMode};

#[derive(Clone, Copy, Debug)]
pub struct DispatchSchedulerCfg {
    pub interval_secs: u64,
}

/// One pass over every project in `scheduled` mode. Returns how many projects
/// were dispatched without a run-level error.
pub async fn run_scheduled_once(engine: &DispatchEngine) -> usize {
    super::ensure_metrics_described();
    counter!("dispatch_scheduler_ticks_total").increment(1);
    gauge!("dispatch_scheduler_last_run_ts").set(chrono::Utc::now().timestamp().max(0) as f64);

    let actor = Actor::system("scheduler");
    let projects = match engine.store().projects_in_mode(DispatchMode::Scheduled).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(target: "dispatch", error = %e, "scheduler: listing projects failed");
            return 0;
        }
    };

    let mut ok = 0usize;
    for project in projects {
        match engine.dispatch_pending(&actor, &project).await {
            Ok(summary) => {
                ok += 1;
                if summary.sent_count > 0 || summary.send_error {
                    tracing::info!(
                        target: "dispatch",
                        project = %project,
                        sent = summary.sent_count,
                        send_error = summary.send_error,
                        "scheduled dispatch"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(target: "dispatch", project = %project, error = %e, "scheduled dispatch failed");
            }
        }
    }
    ok
}

/// Spawn the periodic dispatcher for scheduled projects. `interval_secs == 0`
/// disables it (returns `None`).
pub fn spawn_dispatch_scheduler(
    engine: Arc<DispatchEngine>,
    cfg: DispatchSchedulerCfg,
) -> Option<JoinHandle<()>> {
    if cfg.interval_secs == 0 {
        tracing::info!(target: "dispatch", "scheduler disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));
        loop {
            ticker.tick().await;
            let ok = run_scheduled_once(&engine).await;
            tracing::debug!(target: "dispatch", projects = ok, "scheduler tick");
        }
    }))
}
