//! Demo that ingests a small webhook batch into an in-memory store and
//! dispatches it through the log-only gateway.

use std::sync::Arc;

use alert_dispatcher::alert::{
    Actor, DispatchMode, FieldStyle, MessageFormat, ProjectConfig, ProjectId, ProjectTemplate,
    TemplateField,
};
use alert_dispatcher::dispatch::DispatchEngine;
use alert_dispatcher::ingest::mapper::{FieldMapper, ProviderTable};
use alert_dispatcher::ingest::{ingest, IngestRequest};
use alert_dispatcher::notify::{LogGateway, RetryPolicy};
use alert_dispatcher::store::{AlertStore, InMemoryStore};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(true).init();

    let store: Arc<dyn AlertStore> = Arc::new(InMemoryStore::new());
    let mut template = ProjectTemplate::default();
    for (name, order, style) in [
        ("title", 1, FieldStyle::Bold),
        ("date", 2, FieldStyle::Italic),
        ("url", 3, FieldStyle::Plain),
    ] {
        template.fields.insert(
            name.to_string(),
            TemplateField {
                order,
                style,
                label: None,
                show_label: false,
            },
        );
    }
    store
        .put_project_config(ProjectConfig {
            id: ProjectId::new("demo"),
            dispatch_mode: DispatchMode::Automatic,
            message_format: MessageFormat::ManyInOne,
            destination_channel: "demo@g.us".into(),
            template,
            acceptance_keywords: Default::default(),
        })
        .await?;

    let actor = Actor::new("demo");
    let req: IngestRequest = serde_json::from_value(json!({
        "proyecto_id": "demo",
        "proveedor": "webhook",
        "alertas": [
            {"url": "https://www.news.com/b/", "title": "Second", "published_at": "2024-01-03 18:45"},
            {"url": "https://news.com/a", "title": "First", "published_at": "2024-01-02"},
            {"url": "http://news.com/b", "title": "Dup of second"}
        ]
    }))?;

    let mapper = FieldMapper::new(ProviderTable::default_seed());
    let outcome = ingest(store.as_ref(), &mapper, &actor, req).await?;

    let engine = DispatchEngine::new(store.clone(), Arc::new(LogGateway))
        .with_retry(RetryPolicy::immediate(3));
    let summary = engine
        .dispatch_automatic(
            &actor,
            &outcome.project_id,
            Some(outcome.accepted),
            outcome.duplicates.len(),
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
