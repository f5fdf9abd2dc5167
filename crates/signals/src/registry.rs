//! Registry of named signal sources.
//!
//! Holds every configured [`SignalSource`] and fetches the ones a cycle needs
//! concurrently. A failed, timed-out or disabled source shows up as `None` in
//! the result so the combiner can tell "absent" apart from "zero".

use chrono::Utc;
use depthsync_core::{SignalBatch, SignalSource};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn SignalSource>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Registers a source under its own name, replacing any previous one.
    pub fn register(&mut self, source: Arc<dyn SignalSource>) {
        let name = source.name().to_string();
        self.sources.insert(name, source);
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.register(source);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn SignalSource>> {
        self.sources.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetches `names` concurrently.
    ///
    /// Each fetch is bounded by `timeout`. Signals older than `max_age` and
    /// signals with a non-finite depth are dropped from the batch. Unknown or
    /// disabled sources and fetch failures map to `None`.
    pub async fn fetch_all(
        &self,
        names: &[String],
        timeout: Duration,
        max_age: Option<chrono::Duration>,
    ) -> HashMap<String, Option<SignalBatch>> {
        let fetches = names.iter().map(|name| async move {
            let Some(source) = self.sources.get(name) else {
                tracing::warn!(source = %name, "Symbol references unknown signal source");
                return (name.clone(), None);
            };
            if !source.enabled() {
                tracing::debug!(source = %name, "Signal source disabled");
                return (name.clone(), None);
            }

            let batch = match tokio::time::timeout(timeout, source.fetch_signals()).await {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    tracing::warn!(source = %name, error = %e, "Signal source fetch failed, skipping");
                    return (name.clone(), None);
                }
                Err(_) => {
                    tracing::warn!(
                        source = %name,
                        timeout_ms = timeout.as_millis(),
                        "Signal source fetch timed out, skipping"
                    );
                    return (name.clone(), None);
                }
            };

            (name.clone(), Some(filter_batch(name, batch, max_age)))
        });

        join_all(fetches).await.into_iter().collect()
    }
}

fn filter_batch(source: &str, batch: SignalBatch, max_age: Option<chrono::Duration>) -> SignalBatch {
    let now = Utc::now();
    batch
        .into_iter()
        .filter(|(symbol, signal)| {
            if signal.clamped_depth().is_none() {
                tracing::warn!(source, symbol = %symbol, "Dropping non-finite depth");
                return false;
            }
            if let Some(max_age) = max_age {
                if signal.is_stale(now, max_age) {
                    tracing::warn!(
                        source,
                        symbol = %symbol,
                        timestamp = %signal.timestamp,
                        "Dropping stale signal"
                    );
                    return false;
                }
            }
            true
        })
        .collect()
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}
