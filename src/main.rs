//! Alert Dispatcher: binary entrypoint.
//! Boots the Axum HTTP server: config, store, gateway, dispatch engine,
//! scheduled dispatch loop and metrics.

use std::sync::Arc;

use alert_dispatcher::api::{self, AppState};
use alert_dispatcher::config::AppConfig;
use alert_dispatcher::dispatch::scheduler::{spawn_dispatch_scheduler, DispatchSchedulerCfg};
use alert_dispatcher::dispatch::DispatchEngine;
use alert_dispatcher::ingest::config::load_providers_default;
use alert_dispatcher::ingest::mapper::FieldMapper;
use alert_dispatcher::metrics::Metrics;
use alert_dispatcher::notify::whatsapp::WhatsAppGateway;
use alert_dispatcher::notify::{LogGateway, MessageGateway};
use alert_dispatcher::store::{AlertStore, InMemoryStore};
use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "alert_dispatcher=info,ingest=info,dispatch=info,gateway=info,store=info,warn";

/// Structured logs; `LOG_FORMAT=json` switches to JSON lines.
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    // The runtime may already have installed a subscriber.
    let _ = res;
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading dispatcher config")?;

    let store: Arc<dyn AlertStore> = match &cfg.store_path {
        Some(p) => Arc::new(InMemoryStore::open(p)?),
        None => Arc::new(InMemoryStore::new()),
    };
    for project in cfg.projects.iter().cloned() {
        tracing::info!(target: "store", project = %project.id, mode = ?project.dispatch_mode, "project seeded");
        store.put_project_config(project).await?;
    }

    let gateway: Arc<dyn MessageGateway> = match cfg.whatsapp.clone() {
        Some(wa) => Arc::new(WhatsAppGateway::new(wa).with_timeout(cfg.retry.attempt_timeout)),
        None => {
            tracing::warn!(target: "gateway", "no [whatsapp] config; messages will only be logged");
            Arc::new(LogGateway)
        }
    };

    let engine = Arc::new(
        DispatchEngine::new(store.clone(), gateway)
            .with_retry(cfg.retry)
            .with_batch_size(cfg.batch_size),
    );
    let mapper = FieldMapper::new(load_providers_default().context("loading provider schemas")?);

    spawn_dispatch_scheduler(
        engine.clone(),
        DispatchSchedulerCfg {
            interval_secs: cfg.scheduler_interval_secs,
        },
    );

    let mut router = api::router(AppState::new(store, engine, mapper));
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) if cfg!(feature = "strict-metrics") => return Err(e.into()),
        Err(e) => tracing::warn!(error = %e, "metrics disabled"),
    }

    Ok(router.into())
}
