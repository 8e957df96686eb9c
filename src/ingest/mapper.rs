// src/ingest/mapper.rs
//! Provider rows → canonical `Alert`.
//!
//! Provider knowledge is data: each `ProviderSchema` lists the headers that
//! identify it and, per canonical field, an ordered alias list. Lookups are
//! case-insensitive on header names.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::clean_text;
use crate::alert::Alert;
use crate::error::{IngestError, MappingError};

/// Canonical alert fields a schema can map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalField {
    Content,
    PublishedAt,
    PublishedTime,
    Url,
    Author,
    Reach,
    Engagement,
    Network,
    Title,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::Content,
        CanonicalField::PublishedAt,
        CanonicalField::PublishedTime,
        CanonicalField::Url,
        CanonicalField::Author,
        CanonicalField::Reach,
        CanonicalField::Engagement,
        CanonicalField::Network,
        CanonicalField::Title,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalField::Content => "content",
            CanonicalField::PublishedAt => "published_at",
            CanonicalField::PublishedTime => "published_time",
            CanonicalField::Url => "url",
            CanonicalField::Author => "author",
            CanonicalField::Reach => "reach",
            CanonicalField::Engagement => "engagement",
            CanonicalField::Network => "network",
            CanonicalField::Title => "title",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(s))
    }
}

/// One upstream provider format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSchema {
    pub kind: String,
    /// Headers that must all be present for detection.
    pub required: Vec<String>,
    /// canonical field name → ordered alias list.
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
    /// canonical field name → constant value used when no alias yields one.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl ProviderSchema {
    fn aliases(&self, field: CanonicalField) -> &[String] {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field.name()))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    fn default_for(&self, field: CanonicalField) -> Option<&str> {
        self.defaults
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field.name()))
            .map(|(_, v)| v.as_str())
    }

    fn matches(&self, observed: &[String]) -> bool {
        self.required
            .iter()
            .all(|r| observed.iter().any(|o| o == &header_key(r)))
    }
}

/// The declarative provider table consulted by `FieldMapper`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTable {
    #[serde(rename = "providers")]
    pub schemas: Vec<ProviderSchema>,
}

impl ProviderTable {
    /// Reject tables that reference unknown canonical fields or have no url alias.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schemas.is_empty() {
            anyhow::bail!("provider table is empty");
        }
        for s in &self.schemas {
            for k in s.fields.keys().chain(s.defaults.keys()) {
                if CanonicalField::from_name(k).is_none() {
                    anyhow::bail!("provider '{}': unknown canonical field '{}'", s.kind, k);
                }
            }
            if s.aliases(CanonicalField::Url).is_empty() {
                anyhow::bail!("provider '{}': no aliases for 'url'", s.kind);
            }
        }
        Ok(())
    }

    /// Built-in providers, used when no config file is found.
    pub fn default_seed() -> Self {
        fn schema(
            kind: &str,
            required: &[&str],
            fields: &[(&str, &[&str])],
            defaults: &[(&str, &str)],
        ) -> ProviderSchema {
            ProviderSchema {
                kind: kind.to_string(),
                required: required.iter().map(|s| s.to_string()).collect(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                    .collect(),
                defaults: defaults
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }

        Self {
            schemas: vec![
                // Generic JSON webhook payloads.
                schema(
                    "webhook",
                    &["url"],
                    &[
                        ("content", &["content", "contenido", "text", "texto"]),
                        ("published_at", &["published_at", "publishedAt", "date", "fecha"]),
                        ("published_time", &["time", "hora"]),
                        ("url", &["url", "link"]),
                        ("author", &["author", "autor"]),
                        ("reach", &["reach", "alcance"]),
                        ("engagement", &["engagement", "engammet", "engagement_rate"]),
                        ("network", &["network", "red_social", "red"]),
                        ("title", &["title", "titulo"]),
                    ],
                    &[],
                ),
                // Press clipping exports.
                schema(
                    "media_monitor",
                    &["titulo", "medio", "link"],
                    &[
                        ("title", &["titulo"]),
                        ("content", &["resumen", "contenido"]),
                        ("published_at", &["fecha"]),
                        ("published_time", &["hora"]),
                        ("url", &["link", "url"]),
                        ("author", &["medio", "autor"]),
                        ("reach", &["audiencia", "alcance", "reach"]),
                        ("engagement", &["engagement", "engammet"]),
                    ],
                    &[],
                ),
                // Social listening spreadsheets.
                schema(
                    "social_listening",
                    &["red_social", "autor", "contenido", "url"],
                    &[
                        ("network", &["red_social"]),
                        ("author", &["autor", "usuario"]),
                        ("content", &["contenido", "mensaje"]),
                        ("published_at", &["fecha"]),
                        ("published_time", &["hora"]),
                        ("url", &["url", "enlace"]),
                        ("reach", &["reach", "alcance"]),
                        ("engagement", &["engagement", "engammet", "engagement_rate"]),
                    ],
                    &[],
                ),
                // Tweet scraping API dumps.
                schema(
                    "twitter_scraper",
                    &["tweet_url", "full_text", "created_at"],
                    &[
                        ("url", &["tweet_url", "url"]),
                        ("content", &["full_text", "text"]),
                        ("published_at", &["created_at"]),
                        ("author", &["user_screen_name", "screen_name"]),
                        ("reach", &["user_followers_count", "followers"]),
                        ("engagement", &["favorite_count", "engagement"]),
                    ],
                    &[("network", "twitter")],
                ),
            ],
        }
    }
}

/// Maps raw provider rows into canonical alerts.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    table: ProviderTable,
}

impl FieldMapper {
    pub fn new(table: ProviderTable) -> Self {
        Self { table }
    }

    pub fn schema(&self, kind: &str) -> Option<&ProviderSchema> {
        self.table
            .schemas
            .iter()
            .find(|s| s.kind.eq_ignore_ascii_case(kind.trim()))
    }

    /// Pick the provider whose required headers are all observed; the largest
    /// required set wins, ties go to table order.
    pub fn detect<S: AsRef<str>>(&self, headers: &[S]) -> Result<&ProviderSchema, IngestError> {
        let observed: Vec<String> = headers.iter().map(|h| header_key(h.as_ref())).collect();
        let mut best: Option<&ProviderSchema> = None;
        for s in &self.table.schemas {
            if !s.matches(&observed) {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => s.required.len() > b.required.len(),
            };
            if better {
                best = Some(s);
            }
        }
        best.ok_or_else(|| IngestError::UnrecognizedSchema {
            headers: headers.iter().map(|h| h.as_ref().to_string()).collect(),
        })
    }

    /// `map(providerKind, rawRow)`.
    pub fn map(&self, kind: &str, row: &Value) -> Result<Alert, MappingError> {
        let schema = self
            .schema(kind)
            .ok_or_else(|| MappingError::UnknownProvider(kind.to_string()))?;
        map_row(schema, row)
    }
}

/// Map one JSON object row with a known schema.
pub fn map_row(schema: &ProviderSchema, row: &Value) -> Result<Alert, MappingError> {
    let obj = row.as_object().ok_or(MappingError::NotAnObject)?;
    let index: HashMap<String, &Value> = obj.iter().map(|(k, v)| (header_key(k), v)).collect();

    let text = |f: CanonicalField| lookup_text(schema, &index, f);
    let int = |f: CanonicalField| lookup_int(schema, &index, f);

    let url = text(CanonicalField::Url).ok_or(MappingError::MissingUrl)?;

    Ok(Alert {
        content: text(CanonicalField::Content),
        published_at: text(CanonicalField::PublishedAt),
        published_time: text(CanonicalField::PublishedTime),
        url,
        author: text(CanonicalField::Author),
        reach: int(CanonicalField::Reach),
        engagement: int(CanonicalField::Engagement),
        network: text(CanonicalField::Network),
        title: text(CanonicalField::Title),
    })
}

fn header_key(h: &str) -> String {
    h.trim().to_lowercase()
}

/// Absent, `null` and blank strings mean "missing": try the next alias.
fn is_missing(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn lookup_text(
    schema: &ProviderSchema,
    index: &HashMap<String, &Value>,
    field: CanonicalField,
) -> Option<String> {
    for alias in schema.aliases(field) {
        let Some(v) = index.get(&header_key(alias)) else {
            continue;
        };
        if is_missing(v) {
            continue;
        }
        let raw = match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let cleaned = clean_text(&raw);
        if !cleaned.is_empty() {
            return Some(cleaned);
        }
    }
    schema.default_for(field).map(str::to_string)
}

fn lookup_int(
    schema: &ProviderSchema,
    index: &HashMap<String, &Value>,
    field: CanonicalField,
) -> Option<i64> {
    for alias in schema.aliases(field) {
        let Some(v) = index.get(&header_key(alias)) else {
            continue;
        };
        if is_missing(v) {
            continue;
        }
        // Present: a literal 0 stays 0, garbage stays unknown. No further fallback.
        return match v {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64)),
            Value::String(s) => parse_count(s),
            _ => None,
        };
    }
    schema.default_for(field).and_then(parse_count)
}

/// Parse counts as exported by spreadsheets: `1,234`, `1 234`, `1.234.567`,
/// `12.5`, `3.4K`, `1,2M`.
pub fn parse_count(raw: &str) -> Option<i64> {
    let s: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '_')
        .collect();
    if s.is_empty() {
        return None;
    }

    let (body, mult) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1_000f64),
        Some('m' | 'M') => (&s[..s.len() - 1], 1_000_000f64),
        _ => (s.as_str(), 1f64),
    };

    // Dots in groups of three are thousands separators (`1.234.567`).
    let dotted_thousands = body.contains('.')
        && !body.contains(',')
        && body.split('.').skip(1).all(|g| g.len() == 3)
        && mult == 1f64;
    let normalized = if dotted_thousands {
        body.replace('.', "")
    } else if mult > 1f64 {
        body.replace(',', ".")
    } else {
        body.replace(',', "")
    };

    if mult == 1f64 {
        if let Ok(n) = normalized.parse::<i64>() {
            return Some(n);
        }
    }
    normalized
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| (f * mult).round() as i64)
}
