use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::position::SymbolMetadata;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_symbols_path")]
    pub symbols_path: PathBuf,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub accounts: Vec<PaperAccountConfig>,
}

fn default_symbols_path() -> PathBuf {
    PathBuf::from("config/symbols.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cycle_interval_secs: u64,
    /// Ceiling for any single external call made by the orchestrator.
    pub request_timeout_ms: u64,
    /// Delay between consecutive chunks of a split order.
    pub order_pacing_ms: u64,
    pub metadata_ttl_secs: u64,
    /// Signals older than this are ignored; zero disables the check.
    pub max_signal_age_secs: u64,
    /// Balance instrument used as account value.
    pub settlement_asset: String,
    /// Symbol fan-out per account when the adapter does not say otherwise.
    pub default_symbol_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 10,
            request_timeout_ms: 8_000,
            order_pacing_ms: 250,
            metadata_ttl_secs: 3_600,
            max_signal_age_secs: 300,
            settlement_asset: "USDT".to_string(),
            default_symbol_concurrency: 4,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub const fn order_pacing(&self) -> Duration {
        Duration::from_millis(self.order_pacing_ms)
    }

    #[must_use]
    pub const fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    /// `None` when the freshness check is disabled.
    #[must_use]
    pub fn max_signal_age(&self) -> Option<chrono::Duration> {
        if self.max_signal_age_secs == 0 {
            None
        } else {
            i64::try_from(self.max_signal_age_secs)
                .ok()
                .map(chrono::Duration::seconds)
        }
    }

    /// Timeout for outbound HTTP made inside an orchestrated call.
    ///
    /// Must stay strictly below [`Self::request_timeout`]: an inner request
    /// that outlives the outer timeout keeps running after the orchestrator
    /// has given up on it.
    #[must_use]
    pub fn http_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ceiling = self.request_timeout_ms.saturating_sub(1).max(1);
        let wanted = requested_ms.unwrap_or(self.request_timeout_ms / 2).max(1);
        Duration::from_millis(wanted.min(ceiling))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/depth_cache.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// File path or URL.
    pub location: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// HTTP sources only: requests per second.
    #[serde(default)]
    pub rate_limit_per_sec: Option<u32>,
}

const fn default_true() -> bool {
    true
}

/// Simulated account, used by paper mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperAccountConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub balance: Decimal,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_true")]
    pub supports_native_close: bool,
    /// Keyed by exchange symbol.
    #[serde(default)]
    pub symbol_metadata: HashMap<String, SymbolMetadata>,
    /// Last prices keyed by exchange symbol.
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,
    /// Signal symbol -> exchange symbol overrides.
    #[serde(default)]
    pub symbol_map: HashMap<String, String>,
    /// Simulated delay added to every adapter call.
    #[serde(default)]
    pub latency_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
            symbols_path: default_symbols_path(),
            sources: Vec::new(),
            accounts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_timeout_stays_below_request_timeout() {
        let engine = EngineConfig {
            request_timeout_ms: 5_000,
            ..EngineConfig::default()
        };
        assert_eq!(engine.http_timeout(None), Duration::from_millis(2_500));
        assert_eq!(engine.http_timeout(Some(1_000)), Duration::from_millis(1_000));
        assert!(engine.http_timeout(Some(60_000)) < engine.request_timeout());
    }

    #[test]
    fn zero_signal_age_disables_check() {
        let engine = EngineConfig {
            max_signal_age_secs: 0,
            ..EngineConfig::default()
        };
        assert!(engine.max_signal_age().is_none());
        assert_eq!(
            EngineConfig::default().max_signal_age(),
            Some(chrono::Duration::seconds(300))
        );
    }
}
