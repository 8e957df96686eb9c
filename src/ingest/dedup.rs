// src/ingest/dedup.rs
//! Per-project duplicate detection by normalized URL.

use std::collections::HashMap;

use serde::Serialize;

use crate::alert::{Alert, ProjectId};
use crate::error::MappingError;
use crate::store::AlertStore;

/// Where the earlier copy of a duplicate lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DuplicateSource {
    Stored,
    InBatch { first_index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    /// Position in the incoming batch.
    pub index: usize,
    pub url: String,
    #[serde(flatten)]
    pub source: DuplicateSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedAlert {
    pub index: usize,
    pub error: MappingError,
}

/// Result of `partition`. `fresh` keeps each alert's batch index.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub fresh: Vec<(usize, Alert)>,
    pub duplicates: Vec<DuplicateReport>,
    pub rejected: Vec<RejectedAlert>,
}

/// Split candidates into fresh alerts, duplicates (stored or earlier in the
/// batch) and URL-less rejections. Candidate URLs must already be normalized.
pub async fn partition(
    store: &dyn AlertStore,
    project: &ProjectId,
    candidates: Vec<Alert>,
) -> anyhow::Result<Partition> {
    let mut out = Partition::default();

    let urls: Vec<String> = candidates
        .iter()
        .map(|a| a.url.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    let existing = if urls.is_empty() {
        Default::default()
    } else {
        store.find_existing_urls(project, &urls).await?
    };

    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for (index, alert) in candidates.into_iter().enumerate() {
        let url = alert.url.trim().to_string();
        if url.is_empty() {
            out.rejected.push(RejectedAlert {
                index,
                error: MappingError::MissingUrl,
            });
            continue;
        }
        if existing.contains(&url) {
            out.duplicates.push(DuplicateReport {
                index,
                url,
                source: DuplicateSource::Stored,
            });
            continue;
        }
        if let Some(&first_index) = first_seen.get(&url) {
            out.duplicates.push(DuplicateReport {
                index,
                url,
                source: DuplicateSource::InBatch { first_index },
            });
            continue;
        }
        first_seen.insert(url, index);
        out.fresh.push((index, alert));
    }

    Ok(out)
}
