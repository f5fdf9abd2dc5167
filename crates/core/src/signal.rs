//! Signal and symbol-configuration types.
//!
//! A signal source publishes one [`RawSignal`] per symbol: a signed depth in
//! [-1, 1] (fraction of allocatable account value, sign = direction), a
//! reference price and a freshness timestamp. [`SymbolConfig`] says how much
//! each source contributes to a symbol.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::position::MarginMode;

/// Slack allowed when checking that weights sum to at most 1.0.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// One source's view of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub symbol: String,
    /// Signed fraction of allocatable value, clamped to [-1, 1] on use.
    pub depth: f64,
    #[serde(default)]
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl RawSignal {
    #[must_use]
    pub fn new(symbol: impl Into<String>, depth: f64, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            depth,
            price,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Depth clamped to [-1, 1], or `None` for NaN/infinite values.
    #[must_use]
    pub fn clamped_depth(&self) -> Option<f64> {
        if self.depth.is_finite() {
            Some(self.depth.clamp(-1.0, 1.0))
        } else {
            None
        }
    }

    /// True if the signal is older than `max_age` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.timestamp) > max_age
    }
}

/// Everything a source returned in one fetch, keyed by symbol.
pub type SignalBatch = HashMap<String, RawSignal>;

/// Contribution of one named source to a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceWeight {
    pub source: String,
    pub weight: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl SourceWeight {
    #[must_use]
    pub fn new(source: impl Into<String>, weight: f64) -> Self {
        Self {
            source: source.into(),
            weight,
            enabled: true,
        }
    }

    /// Sources that actually contribute: enabled with a positive weight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.weight > 0.0
    }
}

/// Per-symbol trading configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub leverage: Decimal,
    #[serde(default)]
    pub margin_mode: MarginMode,
    #[serde(default)]
    pub sources: Vec<SourceWeight>,
}

impl SymbolConfig {
    #[must_use]
    pub fn new(symbol: impl Into<String>, leverage: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            leverage,
            margin_mode: MarginMode::Cross,
            sources: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>, weight: f64) -> Self {
        self.sources.push(SourceWeight::new(source, weight));
        self
    }

    /// Sum of the weights of contributing sources.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.sources
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.weight)
            .sum()
    }

    /// Sources that contribute to this symbol.
    pub fn active_sources(&self) -> impl Iterator<Item = &SourceWeight> {
        self.sources.iter().filter(|s| s.is_active())
    }

    /// Checks weights and leverage.
    ///
    /// # Errors
    /// Returns error if a weight is negative or non-finite, weights sum above
    /// 1.0, or leverage is not positive.
    pub fn validate(&self) -> Result<()> {
        if self.leverage <= Decimal::ZERO {
            anyhow::bail!("{}: leverage must be > 0, got {}", self.symbol, self.leverage);
        }
        for s in &self.sources {
            if !s.weight.is_finite() || s.weight < 0.0 {
                anyhow::bail!(
                    "{}: weight for source {} must be finite and >= 0, got {}",
                    self.symbol,
                    s.source,
                    s.weight
                );
            }
        }
        let total = self.total_weight();
        if total > 1.0 + WEIGHT_EPSILON {
            anyhow::bail!("{}: weights sum to {total}, must be <= 1.0", self.symbol);
        }
        Ok(())
    }
}
