//! Builds the control loop from an [`AppConfig`].

use anyhow::{Context, Result};
use depthsync_core::{AccountAdapter, AppConfig, SourceKind, SymbolConfigStore};
use depthsync_execution::TradeExecutor;
use depthsync_paper::PaperAccount;
use depthsync_signals::{
    DepthCache, FileSignalSource, HttpSignalSource, SignalManager, SourceRegistry,
};
use std::sync::Arc;
use tracing::info;

/// Registers every configured signal source.
///
/// # Errors
/// Returns error if an HTTP client cannot be built.
pub fn build_registry(config: &AppConfig) -> Result<SourceRegistry> {
    let mut registry = SourceRegistry::new();
    for source in &config.sources {
        match source.kind {
            SourceKind::File => {
                registry.register(Arc::new(
                    FileSignalSource::new(&source.name, &source.location)
                        .with_enabled(source.enabled),
                ));
            }
            SourceKind::Http => {
                let timeout = config.engine.http_timeout(source.timeout_ms);
                let mut http = HttpSignalSource::new(&source.name, &source.location, timeout)
                    .with_context(|| format!("building HTTP source {}", source.name))?
                    .with_enabled(source.enabled);
                if let Some(per_second) = source.rate_limit_per_sec {
                    http = http.with_rate_limit(per_second);
                }
                registry.register(Arc::new(http));
            }
        }
        info!(
            source = %source.name,
            kind = ?source.kind,
            enabled = source.enabled,
            "Registered signal source"
        );
    }
    Ok(registry)
}

#[must_use]
pub fn build_accounts(config: &AppConfig) -> Vec<Arc<dyn AccountAdapter>> {
    config
        .accounts
        .iter()
        .map(|cfg| Arc::new(PaperAccount::from_config(cfg)) as Arc<dyn AccountAdapter>)
        .collect()
}

/// Wires sources, cache, signal manager and accounts into a [`TradeExecutor`].
///
/// # Errors
/// Returns error if a signal source cannot be built.
pub fn build_executor(config: &AppConfig) -> Result<TradeExecutor> {
    let registry = build_registry(config)?;
    let cache = Arc::new(DepthCache::open(&config.cache.path));
    let manager = SignalManager::new(
        SymbolConfigStore::new(&config.symbols_path),
        registry,
        cache,
    )
    .with_fetch_timeout(config.engine.request_timeout())
    .with_max_signal_age(config.engine.max_signal_age());

    let accounts = build_accounts(config);
    if accounts.is_empty() {
        tracing::warn!("No accounts configured; cycles will only stage depths");
    }

    Ok(TradeExecutor::new(
        Arc::new(manager),
        accounts,
        config.engine.clone(),
    ))
}
