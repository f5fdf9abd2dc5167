use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side that moves a position in the direction of `delta`.
    #[must_use]
    pub fn for_delta(delta: Decimal) -> Self {
        if delta.is_sign_negative() {
            Self::Sell
        } else {
            Self::Buy
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub volume: Decimal,
}

impl Ticker {
    /// Best usable reference price: last trade, else the bid/ask mid.
    #[must_use]
    pub fn reference_price(&self) -> Option<Decimal> {
        if self.last > Decimal::ZERO {
            return Some(self.last);
        }
        if self.bid > Decimal::ZERO && self.ask > Decimal::ZERO {
            return Some((self.bid + self.ask) / Decimal::TWO);
        }
        None
    }
}

/// Acknowledgement of a placed market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub reduce_only: bool,
    pub avg_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of an exchange-native "close position" call.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed(OrderResult),
    /// Nothing was open; the account is already flat.
    NoPosition,
    /// The venue has no native close; callers fall back to a market order.
    NotSupported,
}
