//! Runtime configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use warrant_contract::{
    HostConfig, DEFAULT_FUEL_LIMIT, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_MAX_SUB_MSGS,
};
use warrant_core::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Chain identifier stamped on block headers
    pub chain_id: String,

    /// Fuel shared by every contract call one message triggers; `None` or
    /// zero disables metering
    pub fuel_limit: Option<u64>,

    /// Upper bound on guest linear memory (bytes)
    pub max_memory_bytes: usize,

    /// Maximum nesting of contract executions through sub-messages
    pub max_call_depth: u32,

    /// Maximum sub-messages a single contract execution may return
    pub max_sub_msgs: usize,

    /// Account receiving transaction fees
    pub fee_collector: Address,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chain_id: "warrant-local".to_string(),
            fuel_limit: Some(DEFAULT_FUEL_LIMIT),
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_sub_msgs: DEFAULT_MAX_SUB_MSGS,
            fee_collector: Address::new(b"fee_collector".to_vec()),
            log_filter: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid runtime configuration")
    }

    /// Load a TOML file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden by `WARRANT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(chain_id) = lookup("WARRANT_CHAIN_ID") {
            config.chain_id = chain_id;
        }
        if let Some(raw) = lookup("WARRANT_FUEL_LIMIT") {
            config.fuel_limit = if raw.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(raw.parse().context("Invalid WARRANT_FUEL_LIMIT")?)
            };
        }
        if let Some(value) = parse_var(&lookup, "WARRANT_MAX_MEMORY_BYTES")? {
            config.max_memory_bytes = value;
        }
        if let Some(value) = parse_var(&lookup, "WARRANT_MAX_CALL_DEPTH")? {
            config.max_call_depth = value;
        }
        if let Some(value) = parse_var(&lookup, "WARRANT_MAX_SUB_MSGS")? {
            config.max_sub_msgs = value;
        }
        if let Some(value) = parse_var(&lookup, "WARRANT_FEE_COLLECTOR")? {
            config.fee_collector = value;
        }
        if let Some(filter) = lookup("WARRANT_LOG") {
            config.log_filter = filter;
        }

        Ok(config)
    }

    /// Sandbox settings for the contract host
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            fuel_limit: self.fuel_limit.filter(|fuel| *fuel > 0),
            max_memory_bytes: self.max_memory_bytes,
        }
    }

    /// Fuel budget of one delivered message, `None` when unmetered
    pub fn fuel_budget(&self) -> Option<u64> {
        self.host_config().fuel_limit
    }

    /// Install the global subscriber with `log_filter` as the fallback
    /// filter. Returns false when one was already installed.
    pub fn init_tracing(&self) -> bool {
        crate::telemetry::init_tracing(&self.log_filter)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| raw.parse::<T>().with_context(|| format!("Invalid {name}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.fuel_limit, Some(DEFAULT_FUEL_LIMIT));
        assert_eq!(config.max_memory_bytes, 16 * 1024 * 1024);
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.max_sub_msgs, DEFAULT_MAX_SUB_MSGS);
        assert_eq!(config.host_config().fuel_limit, Some(DEFAULT_FUEL_LIMIT));
        assert_eq!(config.fuel_budget(), Some(DEFAULT_FUEL_LIMIT));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            chain_id = "warrant-test"
            max_call_depth = 3
            fee_collector = "6665657321"
            "#,
        )
        .unwrap();

        assert_eq!(config.chain_id, "warrant-test");
        assert_eq!(config.max_call_depth, 3);
        assert_eq!(config.fee_collector, Address::new(b"fees!".to_vec()));
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.fuel_limit, Some(DEFAULT_FUEL_LIMIT));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(RuntimeConfig::from_toml_str("max_call_depth = \"deep\"").is_err());
        assert!(RuntimeConfig::from_toml_str("fee_collector = \"not hex\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fuel_limit = 0\nmax_memory_bytes = 131072").unwrap();

        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.max_memory_bytes, 131_072);
        assert_eq!(config.host_config().fuel_limit, None);
        assert_eq!(config.fuel_budget(), None);

        assert!(RuntimeConfig::load(file.path().with_extension("missing")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("WARRANT_CHAIN_ID", "warrant-env"),
            ("WARRANT_FUEL_LIMIT", "none"),
            ("WARRANT_MAX_CALL_DEPTH", "2"),
            ("WARRANT_MAX_SUB_MSGS", "4"),
            ("WARRANT_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.chain_id, "warrant-env");
        assert_eq!(config.fuel_limit, None);
        assert_eq!(config.max_call_depth, 2);
        assert_eq!(config.max_sub_msgs, 4);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.max_memory_bytes, DEFAULT_MAX_MEMORY_BYTES);
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let err = RuntimeConfig::from_lookup(lookup(&[("WARRANT_MAX_CALL_DEPTH", "lots")])).unwrap_err();
        assert!(err.to_string().contains("WARRANT_MAX_CALL_DEPTH"));
        assert!(RuntimeConfig::from_lookup(lookup(&[("WARRANT_FUEL_LIMIT", "-1")])).is_err());
    }

    #[test]
    fn test_init_tracing_uses_log_filter() {
        let config = RuntimeConfig {
            log_filter: "warrant_runtime=debug".to_string(),
            ..RuntimeConfig::default()
        };
        config.init_tracing();
        assert!(!config.init_tracing());
    }
}
