use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::ConfigError;
use crate::fleet::FleetConfig;
use crate::gateway::GatewayConfig;
use crate::token::Credential;

pub const DEFAULT_CONFIG_PATH: &str = "tokens.json";

pub struct Config {
    pub credentials: Vec<Credential>,
    pub webhook_url: Option<String>,
    pub fleet: FleetConfig,
}

impl Config {
    /// Loads credentials and the webhook URL from the JSON config file, and
    /// runtime tunables from the environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;

        let credentials = extract_credentials(&value);
        if credentials.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        tracing::info!(count = credentials.len(), "loaded credentials from {}", path.display());

        let webhook_url = value
            .get("debug_webhook_url")
            .and_then(|v| v.as_str())
            .filter(|url| url.starts_with("https://"))
            .map(str::to_string);

        Ok(Self {
            credentials,
            webhook_url,
            fleet: fleet_config_from_env(),
        })
    }

    /// Writes a template config for the user to fill in.
    pub fn create_example(path: &Path) -> Result<(), ConfigError> {
        let example = json!({
            "debug_webhook_url": "",
            "tokens": [
                "YOUR_TOKEN_1_HERE",
                "YOUR_TOKEN_2_HERE",
                "YOUR_TOKEN_3_HERE"
            ]
        });
        std::fs::write(path, serde_json::to_string_pretty(&example)?)?;
        tracing::info!("created example config at {}", path.display());
        Ok(())
    }
}

/// Accepts the three historical config shapes: a top-level array (of strings
/// or `{"token": ...}` objects), an object with a `tokens` array, or an
/// object with `token1..tokenN` keys.
fn extract_credentials(value: &Value) -> Vec<Credential> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => non_empty(s),
                Value::Object(map) => map.get("token").and_then(|t| t.as_str()).and_then(non_empty),
                _ => None,
            })
            .collect(),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("tokens") {
                items
                    .iter()
                    .filter_map(|t| t.as_str().and_then(non_empty))
                    .collect()
            } else {
                let mut keyed: Vec<(&String, &str)> = map
                    .iter()
                    .filter(|(k, _)| k.starts_with("token"))
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s)))
                    .collect();
                // token10 must sort after token2
                keyed.sort_by_key(|(k, _)| {
                    (
                        k["token".len()..].parse::<u32>().unwrap_or(u32::MAX),
                        (*k).clone(),
                    )
                });
                keyed.into_iter().filter_map(|(_, s)| non_empty(s)).collect()
            }
        }
        _ => Vec::new(),
    }
}

fn non_empty(s: &str) -> Option<Credential> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(Credential::new(trimmed))
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Gateway and supervisor tunables, with env overrides on top of the
/// defaults.
fn fleet_config_from_env() -> FleetConfig {
    let mut gateway = GatewayConfig::default();
    if let Ok(url) = std::env::var("FLEET_GATEWAY_URL") {
        gateway.url = url;
    }
    if let Some(intents) = env_u64("FLEET_INTENTS") {
        gateway.intents = intents;
    }
    if let Some(max) = env_u64("FLEET_MAX_ATTEMPTS") {
        gateway.max_reconnect_attempts = max as u32;
    }
    if let Some(secs) = env_u64("FLEET_BACKOFF_BASE_SECS") {
        gateway.backoff_base = Duration::from_secs(secs);
    }
    if let Some(secs) = env_u64("FLEET_BACKOFF_CAP_SECS") {
        gateway.backoff_cap = Duration::from_secs(secs);
    }

    let mut fleet = FleetConfig {
        gateway,
        ..FleetConfig::default()
    };
    if let Some(secs) = env_u64("FLEET_POLL_INTERVAL_SECS") {
        fleet.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = env_u64("FLEET_STAGGER_SECS") {
        fleet.stagger = Duration::from_secs(secs);
    }
    fleet
}
