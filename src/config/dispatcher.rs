// src/config/dispatcher.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf};

use crate::alert::ProjectConfig;
use crate::dispatch::DEFAULT_BATCH_SIZE;
use crate::notify::template::TEMPLATE_FIELDS;
use crate::notify::whatsapp::WhatsAppConfig;
use crate::notify::RetryPolicy;

pub const ENV_DISPATCHER_CONFIG_PATH: &str = "DISPATCHER_CONFIG_PATH";
pub const DEFAULT_DISPATCHER_CONFIG_PATH: &str = "config/dispatcher.toml";
pub const ENV_WHATSAPP_API_TOKEN: &str = "WHATSAPP_API_TOKEN";

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_scheduler_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Absent → messages are only logged.
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Alerts per digest in `many_in_one` mode.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// JSON snapshot file for the store; absent → memory only.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// 0 disables the scheduled dispatch loop.
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
    /// Seeded into the store at startup.
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            whatsapp: None,
            retry: RetryPolicy::default(),
            batch_size: default_batch_size(),
            store_path: None,
            scheduler_interval_secs: default_scheduler_interval_secs(),
            projects: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML or JSON file (chosen by extension, TOML otherwise).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading dispatcher config {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let mut cfg: AppConfig = if is_json {
            serde_json::from_str(&data)
                .with_context(|| format!("parsing JSON config {}", path.display()))?
        } else {
            toml::from_str(&data)
                .with_context(|| format!("parsing TOML config {}", path.display()))?
        };
        cfg.resolve()?;
        Ok(cfg)
    }

    /// $DISPATCHER_CONFIG_PATH, then config/dispatcher.toml, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_DISPATCHER_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("DISPATCHER_CONFIG_PATH points to non-existent path"));
            }
            return Self::load_from_file(pb);
        }
        let default_p = PathBuf::from(DEFAULT_DISPATCHER_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from_file(default_p);
        }
        let mut cfg = Self::default();
        cfg.resolve()?;
        Ok(cfg)
    }

    fn resolve(&mut self) -> Result<()> {
        if self.batch_size == 0 {
            self.batch_size = default_batch_size();
        }
        if self.retry.max_attempts == 0 {
            self.retry.max_attempts = RetryPolicy::default().max_attempts;
        }

        // Resolve api token if "ENV"; a set env var always wins over the file.
        if let Some(wa) = self.whatsapp.as_mut() {
            let from_env = env::var(ENV_WHATSAPP_API_TOKEN)
                .ok()
                .filter(|v| !v.trim().is_empty());
            let wants_env = wa
                .api_token
                .as_deref()
                .is_some_and(|t| t.trim().eq_ignore_ascii_case("env"));
            match (from_env, wants_env) {
                (Some(t), _) => wa.api_token = Some(t),
                (None, true) => {
                    return Err(anyhow!("Missing {ENV_WHATSAPP_API_TOKEN} env var"));
                }
                (None, false) => {}
            }
        }

        for p in &self.projects {
            if p.id.is_blank() {
                return Err(anyhow!("project with empty id in dispatcher config"));
            }
            if p.destination_channel.trim().is_empty() {
                return Err(anyhow!("project '{}' has no destination_channel", p.id));
            }
            for name in p.template.fields.keys() {
                let key = name.trim().to_ascii_lowercase();
                if !TEMPLATE_FIELDS.contains(&key.as_str()) {
                    return Err(anyhow!(
                        "project '{}' template references unknown field '{name}' (expected one of {})",
                        p.id,
                        TEMPLATE_FIELDS.join(", ")
                    ));
                }
            }
        }
        Ok(())
    }
}
