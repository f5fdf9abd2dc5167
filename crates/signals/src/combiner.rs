//! Weighted combination of per-source depths.
//!
//! A symbol's combined depth is `sum(depth_i * weight_i)` over its active
//! sources. Weights are allocation fractions of account value, so the sum is
//! not renormalised: a symbol whose weights add up to 0.5 can never ask for more
//! than half the account.

use depthsync_core::{SignalBatch, SymbolConfig};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// What the sources said about one symbol this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Combination {
    /// Every active source answered.
    Derived {
        depth: f64,
        /// Reference price from the heaviest source that published one.
        price: Option<Decimal>,
    },
    /// At least one active source failed or left the symbol out, so the
    /// symbol is not re-derived this cycle.
    Frozen { missing: Vec<String> },
}

impl Combination {
    #[must_use]
    pub fn depth(&self) -> Option<f64> {
        match self {
            Self::Derived { depth, .. } => Some(*depth),
            Self::Frozen { .. } => None,
        }
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        matches!(self, Self::Frozen { .. })
    }
}

/// Combines the fetched batches for one symbol.
///
/// `fetched` maps source name to its batch for this cycle; `None` means the
/// fetch failed. A source absent from `fetched` is treated the same way.
#[must_use]
pub fn combine(config: &SymbolConfig, fetched: &HashMap<String, Option<SignalBatch>>) -> Combination {
    let mut depth = 0.0;
    let mut missing = Vec::new();
    let mut price: Option<(f64, Decimal)> = None;

    for weight in config.active_sources() {
        let signal = fetched
            .get(&weight.source)
            .and_then(Option::as_ref)
            .and_then(|batch| batch.get(&config.symbol));

        let Some(signal) = signal else {
            missing.push(weight.source.clone());
            continue;
        };
        let Some(source_depth) = signal.clamped_depth() else {
            missing.push(weight.source.clone());
            continue;
        };

        depth += source_depth * weight.weight;

        if signal.price > Decimal::ZERO && price.map_or(true, |(w, _)| weight.weight > w) {
            price = Some((weight.weight, signal.price));
        }
    }

    if !missing.is_empty() {
        return Combination::Frozen { missing };
    }

    Combination::Derived {
        depth,
        price: price.map(|(_, p)| p),
    }
}
