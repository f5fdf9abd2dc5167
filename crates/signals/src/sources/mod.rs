//! Concrete [`SignalSource`](depthsync_core::SignalSource) implementations.
//!
//! Both read the same JSON snapshot shape, either a map keyed by symbol:
//!
//! ```json
//! {"BTCUSDT": {"depth": 0.25, "price": 50000, "timestamp": "2024-05-01T12:00:00Z"}}
//! ```
//!
//! or a list of `{symbol, depth, price, timestamp}` objects. A missing
//! timestamp means "now".

pub mod file;
pub mod http;

use chrono::{DateTime, Utc};
use depthsync_core::{RawSignal, SignalBatch};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

pub use file::FileSignalSource;
pub use http::HttpSignalSource;

/// Errors from reading a signal snapshot.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct SignalEntry {
    depth: f64,
    #[serde(default)]
    price: Decimal,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Snapshot {
    BySymbol(HashMap<String, SignalEntry>),
    List(Vec<ListEntry>),
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    symbol: String,
    #[serde(flatten)]
    entry: SignalEntry,
}

/// Parses a snapshot body into a batch.
///
/// # Errors
/// Returns [`SourceError::Parse`] if the body matches neither shape.
pub fn parse_snapshot(body: &[u8]) -> Result<SignalBatch, SourceError> {
    let now = Utc::now();
    let into_signal = |symbol: String, e: SignalEntry| {
        let signal = RawSignal::new(symbol.clone(), e.depth, e.price.max(Decimal::ZERO))
            .with_timestamp(e.timestamp.unwrap_or(now));
        (symbol, signal)
    };

    let batch = match serde_json::from_slice::<Snapshot>(body)? {
        Snapshot::BySymbol(map) => map.into_iter().map(|(s, e)| into_signal(s, e)).collect(),
        Snapshot::List(list) => list
            .into_iter()
            .map(|l| into_signal(l.symbol, l.entry))
            .collect(),
    };
    Ok(batch)
}
