// src/config/mod.rs
pub mod dispatcher;

pub use dispatcher::{AppConfig, DEFAULT_DISPATCHER_CONFIG_PATH, ENV_DISPATCHER_CONFIG_PATH};
