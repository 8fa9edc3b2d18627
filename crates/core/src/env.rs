//! Process environment bootstrap and API key lookup.

use crate::config::SecretsConfig;
use crate::error::ProviderError;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub fn is_production() -> bool {
    std::env::var("ENV")
        .map(|value| value.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

/// Loads `.env` outside production and expands the JSON secret bundle held in
/// `api_keys_env` into any variables that are not already set.
pub fn bootstrap_env(required: &[&str], api_keys_env: &str) {
    if !is_production() {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "loaded .env file for local environment");
        }
    }

    if let Ok(raw) = std::env::var(api_keys_env) {
        match parse_key_bundle(&raw) {
            Ok(bundle) => {
                let count = bundle.len();
                for (key, value) in bundle {
                    if std::env::var_os(&key).is_none() && !value.is_empty() {
                        std::env::set_var(&key, value);
                    }
                }
                info!(env_var = api_keys_env, count, "expanded API key bundle");
            }
            Err(error) => warn!(env_var = api_keys_env, %error, "failed parsing API key bundle"),
        }
    }

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| std::env::var(key).map(|v| v.is_empty()).unwrap_or(true))
        .collect();
    if !missing.is_empty() {
        warn!(?missing, "missing expected environment variables");
    } else if !required.is_empty() {
        info!(keys = ?required, "all required environment variables present");
    }
}

/// Parses a JSON object of secrets; scalar values are stringified, others ignored.
pub fn parse_key_bundle(raw: &str) -> Result<BTreeMap<String, String>, ProviderError> {
    let parsed: Value = serde_json::from_str(raw)?;
    let object = parsed.as_object().ok_or_else(|| ProviderError::BadResponse {
        provider: "env".into(),
        details: "API keys bundle is not a JSON object".into(),
    })?;

    Ok(object
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            Some((key.clone(), value))
        })
        .collect())
}

#[derive(Debug, Clone, Default)]
pub struct ApiKeyManager {
    store: BTreeMap<String, String>,
}

impl ApiKeyManager {
    /// JSON bundle first, then individual env vars for the configured known keys.
    pub fn from_env(secrets: &SecretsConfig) -> Self {
        let bundle = std::env::var(&secrets.api_keys_env).ok();
        let mut manager = Self::from_parts(bundle.as_deref(), &[]);

        for key in &secrets.known_keys {
            if manager.store.contains_key(key) {
                continue;
            }
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    manager.store.insert(key.clone(), value);
                }
            }
        }

        let masked = manager.masked();
        if !masked.is_empty() {
            info!(keys = ?masked, "API keys loaded");
        }
        manager
    }

    pub fn from_parts(bundle: Option<&str>, pairs: &[(&str, &str)]) -> Self {
        let mut store = BTreeMap::new();
        if let Some(raw) = bundle {
            match parse_key_bundle(raw) {
                Ok(parsed) => store.extend(parsed),
                Err(error) => warn!(%error, "failed to parse API keys JSON"),
            }
        }
        for (key, value) in pairs {
            store.insert((*key).to_string(), (*value).to_string());
        }
        Self { store }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.is_empty())
    }

    /// Only the bundle or known-key store, without the process environment fallback.
    pub fn stored(&self, key: &str) -> Option<String> {
        self.store.get(key).filter(|value| !value.is_empty()).cloned()
    }

    pub fn require(&self, keys: &[&str]) -> Result<(), ProviderError> {
        let missing: Vec<String> = keys
            .iter()
            .filter(|key| self.get(key).is_none())
            .map(|key| (*key).to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            warn!(missing_keys = ?missing, "missing required keys");
            Err(ProviderError::MissingKeys(missing))
        }
    }

    pub fn masked(&self) -> BTreeMap<String, String> {
        self.store
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| {
                let prefix: String = value.chars().take(6).collect();
                (key.clone(), format!("{prefix}..."))
            })
            .collect()
    }
}
