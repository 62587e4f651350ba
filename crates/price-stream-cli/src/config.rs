/*
[INPUT]:  YAML configuration file + CLI overrides
[OUTPUT]: Parsed watchlist configuration
[POS]:    Configuration layer - composition root setup
[UPDATE]: When adding new configuration options
*/

use anyhow::Context;
use price_stream_client::StreamConfig;
use price_stream_client::ws::normalize_symbols;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the price stream runner
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Connection settings for the push endpoint
    pub stream: StreamConfig,
    /// Symbols to watch on startup
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl WatchConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply `--url` and `--symbol` overrides, then validate.
    pub fn with_overrides(mut self, url: Option<String>, extra_symbols: &[String]) -> anyhow::Result<Self> {
        if let Some(url) = url {
            self.stream.url = url;
        }
        self.symbols.extend(extra_symbols.iter().cloned());
        self.symbols = normalize_symbols(&self.symbols);
        self.stream.validate().context("invalid stream configuration")?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const SAMPLE: &str = r#"
stream:
  url: ws://localhost:8000/ws/prices
  reconnect:
    base_delay_ms: 500
symbols: [aapl, MSFT]
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let config = WatchConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.stream.url, "ws://localhost:8000/ws/prices");
        assert_eq!(config.stream.reconnect.base_delay_ms, 500);
        assert_eq!(config.stream.reconnect.max_attempts, 5);
        assert_eq!(config.symbols, vec!["aapl", "MSFT"]);
    }

    #[test]
    fn overrides_replace_url_and_merge_symbols() {
        let config = WatchConfig::from_yaml(SAMPLE)
            .unwrap()
            .with_overrides(
                Some("wss://prices.example.com/ws".to_string()),
                &["tsla".to_string(), "AAPL".to_string()],
            )
            .unwrap();

        assert_eq!(config.stream.url, "wss://prices.example.com/ws");
        assert_eq!(config.symbols, vec!["AAPL", "MSFT", "TSLA"]);
    }

    #[test]
    fn symbols_are_optional() {
        let config = WatchConfig::from_yaml("stream:\n  url: ws://localhost/ws\n").unwrap();
        assert!(config.symbols.is_empty());
    }

    #[test]
    fn missing_stream_section_is_an_error() {
        assert_err!(WatchConfig::from_yaml("symbols: [AAPL]\n"));
    }

    #[test]
    fn blank_url_override_fails_validation() {
        let config = assert_ok!(WatchConfig::from_yaml(SAMPLE));
        assert_err!(config.with_overrides(Some("   ".to_string()), &[]));
    }
}
