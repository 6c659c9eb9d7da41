use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::settlement::ListenerConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub ledger_rpc_url: String,
    pub settlement_contract_address: Option<String>,
    pub amount_decimals: u32,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub db_max_connections: u32,

    // Listener
    pub poll_interval_ms: u64,
    pub fetch_timeout_ms: u64,
    pub event_timeout_ms: u64,
    pub not_found_retry_delay_ms: u64,
    pub not_found_retries: u32,
    pub max_consecutive_failures: u32,
    pub recent_events_capacity: usize,
    pub start_sequence: u64,
}

impl Config {
    /// Defaults overridden by process environment (load `.env` first)
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::builder(config::Environment::default().try_parsing(true))
    }

    fn builder(env: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/mt202")?
            .set_default("bind_address", "0.0.0.0:5001")?
            .set_default("ledger_rpc_url", "http://localhost:8545")?
            .set_default("amount_decimals", 18)?
            .set_default("model_path", "ml/anomaly_forest.json")?
            .set_default("scaler_path", "ml/scaler.json")?
            .set_default("db_max_connections", 10)?
            .set_default("poll_interval_ms", 2000)?
            .set_default("fetch_timeout_ms", 10_000)?
            .set_default("event_timeout_ms", 10_000)?
            .set_default("not_found_retry_delay_ms", 1000)?
            .set_default("not_found_retries", 1)?
            .set_default("max_consecutive_failures", 5)?
            .set_default("recent_events_capacity", 50)?
            .set_default("start_sequence", 0)?
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            event_timeout: Duration::from_millis(self.event_timeout_ms),
            not_found_retry_delay: Duration::from_millis(self.not_found_retry_delay_ms),
            not_found_retries: self.not_found_retries,
            max_consecutive_failures: self.max_consecutive_failures,
            start_sequence: self.start_sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default()
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = Config::builder(env(&[])).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:5001");
        assert_eq!(config.amount_decimals, 18);
        assert_eq!(config.recent_events_capacity, 50);
        assert!(config.settlement_contract_address.is_none());

        let listener = config.listener_config();
        let default = ListenerConfig::default();
        assert_eq!(listener.poll_interval, default.poll_interval);
        assert_eq!(listener.fetch_timeout, default.fetch_timeout);
        assert_eq!(listener.not_found_retry_delay, default.not_found_retry_delay);
        assert_eq!(listener.not_found_retries, default.not_found_retries);
        assert_eq!(listener.max_consecutive_failures, default.max_consecutive_failures);
        assert_eq!(listener.start_sequence, 0);
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::builder(env(&[
            ("LEDGER_RPC_URL", "http://ledger:9000"),
            ("SETTLEMENT_CONTRACT_ADDRESS", "0xabc"),
            ("MAX_CONSECUTIVE_FAILURES", "2"),
            ("POLL_INTERVAL_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.ledger_rpc_url, "http://ledger:9000");
        assert_eq!(config.settlement_contract_address.as_deref(), Some("0xabc"));
        assert_eq!(config.listener_config().max_consecutive_failures, 2);
        assert_eq!(config.listener_config().poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        assert!(Config::builder(env(&[("AMOUNT_DECIMALS", "many")])).is_err());
    }
}
