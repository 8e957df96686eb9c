// tests/ingest_dedup.rs
//
// Ingestion through the full map → normalize → dedup → insert path.

mod common;

use alert_dispatcher::alert::{Actor, DispatchMode, MessageFormat, ProjectId};
use alert_dispatcher::error::{IngestError, MappingError};
use alert_dispatcher::ingest::dedup::DuplicateSource;
use alert_dispatcher::ingest::mapper::{FieldMapper, ProviderTable};
use alert_dispatcher::ingest::{ingest, IngestRequest, TabularUpload};
use alert_dispatcher::store::AlertStore;
use common::{project, store_with, webhook_rows};
use serde_json::json;

fn mapper() -> FieldMapper {
    FieldMapper::new(ProviderTable::default_seed())
}

fn request(project: &str, rows: Vec<serde_json::Value>) -> IngestRequest {
    IngestRequest {
        proyecto_id: project.into(),
        alertas: Some(rows),
        ..IngestRequest::default()
    }
}

#[tokio::test]
async fn reingesting_the_same_batch_adds_nothing() {
    let store = store_with(vec![project("p", DispatchMode::Manual, MessageFormat::OnePerOne)]).await;
    let actor = Actor::new("t");

    let first = ingest(store.as_ref(), &mapper(), &actor, request("p", webhook_rows(4)))
        .await
        .unwrap();
    assert_eq!(first.accepted.len(), 4);
    assert_eq!(first.provider, "webhook");

    let again = ingest(store.as_ref(), &mapper(), &actor, request("p", webhook_rows(4)))
        .await
        .unwrap();
    assert!(again.accepted.is_empty());
    assert_eq!(again.duplicates.len(), 4);
    assert!(again
        .duplicates
        .iter()
        .all(|d| d.source == DuplicateSource::Stored));
    assert_eq!(store.pending_alerts(&ProjectId::new("p")).await.unwrap().len(), 4);
}

#[tokio::test]
async fn url_variants_collapse_within_a_batch() {
    let store = store_with(vec![project("p", DispatchMode::Manual, MessageFormat::OnePerOne)]).await;
    let rows = vec![
        json!({"url": "https://www.Example.com/x/"}),
        json!({"url": "http://example.com/x"}),
        json!({"url": "  "}),
        json!({"url": "https://instagram.com/reel/abc?igsh=1"}),
        json!({"link": "http://instagram.com/p/abc"}),
    ];

    let out = ingest(store.as_ref(), &mapper(), &Actor::new("t"), request("p", rows))
        .await
        .unwrap();

    let urls: Vec<&str> = out.accepted.iter().map(|a| a.alert.url.as_str()).collect();
    assert_eq!(urls, vec!["http://example.com/x", "http://instagram.com/p/abc"]);

    let dups: Vec<(usize, DuplicateSource)> = out
        .duplicates
        .iter()
        .map(|d| (d.index, d.source.clone()))
        .collect();
    assert_eq!(
        dups,
        vec![
            (1, DuplicateSource::InBatch { first_index: 0 }),
            (4, DuplicateSource::InBatch { first_index: 3 }),
        ]
    );
    assert_eq!(out.rejected.len(), 1);
    assert_eq!(out.rejected[0].index, 2);
    assert_eq!(out.rejected[0].error, MappingError::MissingUrl);
}

#[tokio::test]
async fn same_url_is_independent_per_project() {
    let store = store_with(vec![
        project("a", DispatchMode::Manual, MessageFormat::OnePerOne),
        project("b", DispatchMode::Manual, MessageFormat::OnePerOne),
    ])
    .await;
    let actor = Actor::new("t");
    for p in ["a", "b"] {
        let out = ingest(store.as_ref(), &mapper(), &actor, request(p, webhook_rows(1)))
            .await
            .unwrap();
        assert_eq!(out.accepted.len(), 1, "project {p}");
    }
}

#[tokio::test]
async fn tabular_upload_detects_provider_and_keeps_zero_reach() {
    let store = store_with(vec![project("p", DispatchMode::Manual, MessageFormat::OnePerOne)]).await;
    let upload = TabularUpload {
        proyecto_id: "p".into(),
        proveedor: None,
        headers: vec!["Red_Social".into(), "Autor".into(), "Contenido".into(), "URL".into(), "Reach".into(), "Alcance".into()],
        rows: vec![
            vec!["Twitter".into(), "@ana".into(), "Great  news QT old tweet".into(), "https://x.com/ana/status/1".into(), "0".into(), "900".into()],
            vec!["Facebook".into(), "Ana".into(), "Hola".into(), "https://facebook.com/p/2".into(), "".into(), "1,200".into()],
        ],
    };

    let out = ingest(store.as_ref(), &mapper(), &Actor::new("t"), upload.into_request())
        .await
        .unwrap();

    assert_eq!(out.provider, "social_listening");
    assert_eq!(out.accepted.len(), 2);
    let tweet = &out.accepted[0].alert;
    assert_eq!(tweet.reach, Some(0));
    assert_eq!(tweet.content.as_deref(), Some("Great news QT"));
    assert_eq!(tweet.url, "http://x.com/ana/status/1");
    assert_eq!(out.accepted[1].alert.reach, Some(1_200));
}

#[tokio::test]
async fn request_level_rejections_have_no_side_effects() {
    let store = store_with(vec![project("p", DispatchMode::Manual, MessageFormat::OnePerOne)]).await;
    let actor = Actor::new("t");

    let err = ingest(store.as_ref(), &mapper(), &actor, request(" ", webhook_rows(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));

    let mut missing = request("p", vec![]);
    missing.alertas = None;
    let err = ingest(store.as_ref(), &mapper(), &actor, missing).await.unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));

    let err = ingest(store.as_ref(), &mapper(), &actor, request("nope", webhook_rows(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));

    let err = ingest(
        store.as_ref(),
        &mapper(),
        &actor,
        request("p", vec![json!({"foo": 1, "bar": 2})]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, IngestError::UnrecognizedSchema { .. }));

    assert!(store.pending_alerts(&ProjectId::new("p")).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_batch_returns_empty_outcome() {
    let store = store_with(vec![project("p", DispatchMode::Manual, MessageFormat::OnePerOne)]).await;
    let mut req = request("p", vec![]);
    req.proveedor = Some("webhook".into());
    let out = ingest(store.as_ref(), &mapper(), &Actor::new("t"), req).await.unwrap();
    assert!(out.accepted.is_empty() && out.duplicates.is_empty() && out.rejected.is_empty());
}
