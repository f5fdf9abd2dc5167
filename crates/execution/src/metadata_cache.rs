//! In-memory symbol metadata with a time-to-live.
//!
//! Lot, tick and max sizes change rarely, so they are fetched once per
//! `(account, exchange_symbol)` and reused until the entry expires.

use depthsync_core::SymbolMetadata;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct MetadataCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), (SymbolMetadata, Instant)>>,
}

impl MetadataCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached metadata, if present and younger than the TTL.
    #[must_use]
    pub fn get(&self, account: &str, symbol: &str) -> Option<SymbolMetadata> {
        let entries = self.entries.read();
        let (meta, fetched_at) = entries.get(&(account.to_string(), symbol.to_string()))?;
        if fetched_at.elapsed() < self.ttl {
            Some(meta.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, account: &str, symbol: &str, meta: SymbolMetadata) {
        self.entries
            .write()
            .insert((account.to_string(), symbol.to_string()), (meta, Instant::now()));
    }

    pub fn invalidate(&self, account: &str, symbol: &str) {
        self.entries
            .write()
            .remove(&(account.to_string(), symbol.to_string()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
