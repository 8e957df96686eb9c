// src/ingest/mod.rs
pub mod config;
pub mod dedup;
pub mod mapper;
pub mod trim;
pub mod url;

use std::collections::BTreeSet;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::alert::{Actor, Alert, ProjectId, StoredAlert};
use crate::error::{IngestError, MappingError};
use crate::store::AlertStore;

use dedup::{DuplicateReport, DuplicateSource, RejectedAlert};
use mapper::{map_row, FieldMapper};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_rows_total", "Raw rows received for ingestion.");
        describe_counter!("ingest_accepted_total", "Alerts stored as new.");
        describe_counter!(
            "ingest_duplicates_total",
            "Alerts dropped as duplicates (stored or in-batch)."
        );
        describe_counter!(
            "ingest_rejected_total",
            "Rows rejected by mapping (e.g. missing url)."
        );
        describe_histogram!("ingest_batch_ms", "Ingestion time per batch in milliseconds.");
    });
}

/// Strip tags, decode entities, collapse whitespace, trim.
pub fn clean_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Collapse whitespace (incl. nbsp)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Canonicalize URL and content of a freshly mapped alert.
pub fn prepare(mut alert: Alert) -> Result<Alert, MappingError> {
    alert.url = url::normalize_url(&alert.url).ok_or(MappingError::MissingUrl)?;
    alert.content = alert
        .content
        .take()
        .map(|c| trim::trim_content(&c, alert.network.as_deref()))
        .filter(|c| !c.is_empty());
    Ok(alert)
}

/// JSON ingestion payload: `{proyecto_id, alertas: [...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default, alias = "project_id")]
    pub proyecto_id: String,
    /// Provider kind; detected from row keys when absent.
    #[serde(default, alias = "provider")]
    pub proveedor: Option<String>,
    #[serde(default, alias = "alerts")]
    pub alertas: Option<Vec<Value>>,
    /// Header row of a tabular upload, used for provider detection.
    #[serde(skip)]
    pub headers: Option<Vec<String>>,
}

/// Tabular upload already split into cells by the upload layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TabularUpload {
    #[serde(default, alias = "project_id")]
    pub proyecto_id: String,
    #[serde(default, alias = "provider")]
    pub proveedor: Option<String>,
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl TabularUpload {
    /// Rows become JSON objects keyed by header; blank cells become `null`.
    pub fn into_request(self) -> IngestRequest {
        let rows = self
            .rows
            .into_iter()
            .map(|cells| {
                let mut obj = Map::new();
                for (h, cell) in self.headers.iter().zip(cells) {
                    let v = if cell.trim().is_empty() {
                        Value::Null
                    } else {
                        Value::String(cell)
                    };
                    obj.insert(h.trim().to_string(), v);
                }
                Value::Object(obj)
            })
            .collect();
        IngestRequest {
            proyecto_id: self.proyecto_id,
            proveedor: self.proveedor,
            alertas: Some(rows),
            headers: Some(self.headers),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub project_id: ProjectId,
    pub provider: String,
    pub accepted: Vec<StoredAlert>,
    pub duplicates: Vec<DuplicateReport>,
    pub rejected: Vec<RejectedAlert>,
}

/// Map → normalize → dedup → insert. Rejects the whole request (no side
/// effects) on a missing project, an unknown project or an unknown schema.
pub async fn ingest(
    store: &dyn AlertStore,
    mapper: &FieldMapper,
    actor: &Actor,
    req: IngestRequest,
) -> Result<IngestOutcome, IngestError> {
    ensure_metrics_described();
    let t0 = std::time::Instant::now();

    let project = ProjectId::new(req.proyecto_id.trim());
    if project.is_blank() {
        return Err(IngestError::Validation("missing proyecto_id".into()));
    }
    let Some(rows) = req.alertas else {
        return Err(IngestError::Validation("missing alertas".into()));
    };
    if store.project_config(&project).await?.is_none() {
        return Err(IngestError::Validation(format!("unknown project '{project}'")));
    }

    let schema = match req.proveedor.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(kind) => mapper
            .schema(kind)
            .ok_or_else(|| IngestError::from(MappingError::UnknownProvider(kind.to_string())))?,
        None => {
            let headers = req.headers.unwrap_or_else(|| observed_keys(&rows));
            mapper.detect(&headers)?
        }
    };
    counter!("ingest_rows_total").increment(rows.len() as u64);

    let mut rejected = Vec::new();
    let mut candidates = Vec::with_capacity(rows.len());
    let mut positions = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        match map_row(schema, row).and_then(prepare) {
            Ok(alert) => {
                candidates.push(alert);
                positions.push(index);
            }
            Err(error) => rejected.push(RejectedAlert { index, error }),
        }
    }

    let part = dedup::partition(store, &project, candidates).await?;
    let mut duplicates: Vec<DuplicateReport> = part
        .duplicates
        .into_iter()
        .map(|mut d| {
            d.index = positions[d.index];
            if let DuplicateSource::InBatch { first_index } = &mut d.source {
                *first_index = positions[*first_index];
            }
            d
        })
        .collect();
    rejected.extend(part.rejected.into_iter().map(|mut r| {
        r.index = positions[r.index];
        r
    }));
    rejected.sort_by_key(|r| r.index);

    let (fresh_idx, fresh): (Vec<usize>, Vec<Alert>) = part
        .fresh
        .into_iter()
        .map(|(i, a)| (positions[i], a))
        .unzip();
    let inserted = store.bulk_insert_alerts(actor, &project, fresh.clone()).await?;

    let mut accepted = Vec::with_capacity(inserted.len());
    for ((index, alert), stored) in fresh_idx.into_iter().zip(fresh).zip(inserted) {
        match stored {
            Some(s) => accepted.push(s),
            // Lost a race with a concurrent ingestion of the same URL.
            None => duplicates.push(DuplicateReport {
                index,
                url: alert.url,
                source: DuplicateSource::Stored,
            }),
        }
    }
    duplicates.sort_by_key(|d| d.index);

    counter!("ingest_accepted_total").increment(accepted.len() as u64);
    counter!("ingest_duplicates_total").increment(duplicates.len() as u64);
    counter!("ingest_rejected_total").increment(rejected.len() as u64);
    histogram!("ingest_batch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

    tracing::info!(
        target: "ingest",
        project = %project,
        provider = %schema.kind,
        actor = %actor.name,
        accepted = accepted.len(),
        duplicates = duplicates.len(),
        rejected = rejected.len(),
        "batch ingested"
    );

    Ok(IngestOutcome {
        project_id: project,
        provider: schema.kind.clone(),
        accepted,
        duplicates,
        rejected,
    })
}

/// Union of keys over all object rows, sorted.
fn observed_keys(rows: &[Value]) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for row in rows {
        if let Some(obj) = row.as_object() {
            keys.extend(obj.keys().cloned());
        }
    }
    keys.into_iter().collect()
}
