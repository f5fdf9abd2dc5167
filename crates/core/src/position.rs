use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Margin mode an exchange position is held under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Cross,
    Isolated,
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cross => write!(f, "cross"),
            Self::Isolated => write!(f, "isolated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionDirection {
    Long,
    Short,
    Flat,
}

impl PositionDirection {
    /// Direction implied by a signed size.
    #[must_use]
    pub fn from_size(size: Decimal) -> Self {
        if size > Decimal::ZERO {
            Self::Long
        } else if size < Decimal::ZERO {
            Self::Short
        } else {
            Self::Flat
        }
    }
}

/// A live position as reported by an exchange, normalised across venues.
///
/// Never persisted: every reconciliation step refetches it because positions
/// can change out-of-band (manual trades, liquidations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedPosition {
    pub symbol: String,
    /// Signed size in exchange units: positive long, negative short.
    pub size: Decimal,
    pub average_entry_price: Decimal,
    pub leverage: Decimal,
    pub direction: PositionDirection,
    pub unrealized_pnl: Decimal,
    pub margin_mode: MarginMode,
    pub exchange: String,
}

impl UnifiedPosition {
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        size: Decimal,
        leverage: Decimal,
        margin_mode: MarginMode,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            size,
            average_entry_price: Decimal::ZERO,
            leverage,
            direction: PositionDirection::from_size(size),
            unrealized_pnl: Decimal::ZERO,
            margin_mode,
            exchange: exchange.into(),
        }
    }

    #[must_use]
    pub fn with_entry_price(mut self, price: Decimal) -> Self {
        self.average_entry_price = price;
        self
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }
}

/// Exchange quantisation constants for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    /// Quantity increment.
    pub lot_size: Decimal,
    /// Smallest tradable quantity.
    pub min_size: Decimal,
    /// Price increment.
    pub tick_size: Decimal,
    /// Underlying units per contract (1 for linear coin-sized instruments).
    #[serde(default = "one")]
    pub contract_value: Decimal,
    /// Largest quantity a single order may carry; zero means unlimited.
    #[serde(default)]
    pub max_size: Decimal,
}

fn one() -> Decimal {
    Decimal::ONE
}

impl SymbolMetadata {
    #[must_use]
    pub fn new(lot_size: Decimal, min_size: Decimal, tick_size: Decimal) -> Self {
        Self {
            lot_size,
            min_size,
            tick_size,
            contract_value: Decimal::ONE,
            max_size: Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: Decimal) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn with_contract_value(mut self, contract_value: Decimal) -> Self {
        self.contract_value = contract_value;
        self
    }

    /// True when orders above `max_size` must be split.
    #[must_use]
    pub fn has_max_size(&self) -> bool {
        self.max_size > Decimal::ZERO
    }
}

/// Desired end state of one symbol on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationTarget {
    /// Exchange-side symbol.
    pub symbol: String,
    /// Signed, already quantised size in exchange units.
    pub size: Decimal,
    pub leverage: Decimal,
    pub margin_mode: MarginMode,
}
