// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::mapper::ProviderTable;

pub const ENV_PROVIDER_SCHEMAS_PATH: &str = "PROVIDER_SCHEMAS_PATH";

/// Load the provider table from an explicit path. Supports TOML or JSON formats.
pub fn load_providers_from(path: &Path) -> Result<ProviderTable> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading provider schemas from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let table = parse_providers(&content, ext.as_str())?;
    table
        .validate()
        .with_context(|| format!("validating provider schemas in {}", path.display()))?;
    Ok(table)
}

/// Load the provider table using env var + fallbacks:
/// 1) $PROVIDER_SCHEMAS_PATH
/// 2) config/providers.toml
/// 3) config/providers.json
/// 4) built-in seed
pub fn load_providers_default() -> Result<ProviderTable> {
    if let Ok(p) = std::env::var(ENV_PROVIDER_SCHEMAS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_providers_from(&pb);
        } else {
            return Err(anyhow!("PROVIDER_SCHEMAS_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/providers.toml");
    if toml_p.exists() {
        return load_providers_from(&toml_p);
    }
    let json_p = PathBuf::from("config/providers.json");
    if json_p.exists() {
        return load_providers_from(&json_p);
    }
    Ok(ProviderTable::default_seed())
}

fn parse_providers(s: &str, hint_ext: &str) -> Result<ProviderTable> {
    let try_toml = hint_ext == "toml" || s.contains("[[providers]]");
    if try_toml {
        if let Ok(v) = toml::from_str::<ProviderTable>(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = serde_json::from_str::<ProviderTable>(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = toml::from_str::<ProviderTable>(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported provider schema format"))
}
