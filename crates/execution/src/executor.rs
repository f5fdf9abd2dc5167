//! Trade Executor: the periodic control loop.
//!
//! Each cycle asks the [`SignalManager`] for updates and, when anything
//! changed, reconciles every configured symbol on every live account. Accounts
//! run concurrently and never block each other. Symbols within one account run
//! under a semaphore sized to what that account tolerates. Each account's
//! outcome goes back to [`SignalManager::confirm_execution`], which is the only
//! path to the durable cache.

use anyhow::Result;
use chrono::{DateTime, Utc};
use depthsync_core::{AccountAdapter, EngineConfig, ReconciliationTarget, SymbolMetadata};
use depthsync_signals::{AccountPlan, SignalManager, SymbolTarget};
use futures_util::future::join_all;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::bounded::bounded;
use crate::metadata_cache::MetadataCache;
use crate::quantize::quantize_size;
use crate::reconciler::{PositionReconciler, ReconcileReport};

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub exchange_symbol: String,
    pub depth: f64,
    pub price: Option<Decimal>,
    /// Size before quantisation.
    pub raw_size: Option<Decimal>,
    pub target_size: Option<Decimal>,
    pub outcome: Option<ReconcileReport>,
    pub error: Option<String>,
}

impl SymbolReport {
    fn new(target: &SymbolTarget, exchange_symbol: String) -> Self {
        Self {
            symbol: target.symbol.clone(),
            exchange_symbol,
            depth: target.depth,
            price: None,
            raw_size: None,
            target_size: None,
            outcome: None,
            error: None,
        }
    }

    fn failed(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub enabled: bool,
    pub account_value: Option<Decimal>,
    pub symbols: Vec<SymbolReport>,
    /// Reported to the signal manager as confirmed.
    pub success: bool,
    /// The cache write for this account went through.
    pub committed: bool,
    pub error: Option<String>,
}

impl AccountReport {
    fn new(account: &str, enabled: bool) -> Self {
        Self {
            account: account.to_string(),
            enabled,
            account_value: None,
            symbols: Vec::new(),
            success: false,
            committed: false,
            error: None,
        }
    }

    #[must_use]
    pub fn symbols_ok(&self) -> usize {
        self.symbols.iter().filter(|s| s.is_ok()).count()
    }

    #[must_use]
    pub fn symbols_failed(&self) -> usize {
        self.symbols.len() - self.symbols_ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub changed: bool,
    pub by_source: HashMap<String, bool>,
    pub accounts: Vec<AccountReport>,
}

impl CycleReport {
    #[must_use]
    pub fn all_committed(&self) -> bool {
        self.accounts.iter().all(|a| a.committed)
    }
}

// =============================================================================
// Trade Executor
// =============================================================================

pub struct TradeExecutor {
    manager: Arc<SignalManager>,
    accounts: Vec<Arc<dyn AccountAdapter>>,
    reconciler: PositionReconciler,
    metadata: MetadataCache,
    engine: EngineConfig,
}

impl TradeExecutor {
    #[must_use]
    pub fn new(
        manager: Arc<SignalManager>,
        accounts: Vec<Arc<dyn AccountAdapter>>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            manager,
            accounts,
            reconciler: PositionReconciler::new(engine.request_timeout(), engine.order_pacing()),
            metadata: MetadataCache::new(engine.metadata_ttl()),
            engine,
        }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<SignalManager> {
        &self.manager
    }

    #[must_use]
    pub fn accounts(&self) -> &[Arc<dyn AccountAdapter>] {
        &self.accounts
    }

    /// Runs cycles until `shutdown` resolves. Cycle errors are logged and the
    /// loop carries on.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            accounts = self.accounts.len(),
            interval_secs = self.engine.cycle_interval_secs,
            "Starting reconciliation loop"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) if report.changed => {
                    let committed = report.accounts.iter().filter(|a| a.committed).count();
                    info!(
                        accounts = report.accounts.len(),
                        committed,
                        "Cycle complete"
                    );
                }
                Ok(_) => debug!("No changes this cycle"),
                Err(e) => error!(error = %e, "Cycle failed"),
            }

            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping loop");
                    break;
                }
                () = tokio::time::sleep(self.engine.cycle_interval()) => {}
            }
        }
    }

    /// One pass: check for updates, reconcile every live account, confirm.
    ///
    /// # Errors
    /// Returns error only if the update check itself fails (e.g. the symbol
    /// configuration cannot be read). Account and symbol failures are recorded
    /// in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started_at = Utc::now();
        let summary = self.manager.check_for_updates(&self.accounts).await?;

        let mut report = CycleReport {
            started_at,
            changed: summary.has_changes(),
            by_source: summary.by_source,
            accounts: Vec::new(),
        };
        if !report.changed {
            return Ok(report);
        }

        let tasks = self.accounts.iter().map(|adapter| self.execute_account(adapter));
        report.accounts = join_all(tasks).await;
        Ok(report)
    }

    async fn execute_account(&self, adapter: &Arc<dyn AccountAdapter>) -> AccountReport {
        let name = adapter.exchange_name();
        let mut report = AccountReport::new(name, adapter.enabled());

        let Some(plan) = self.manager.account_plan(name) else {
            report.error = Some("no staged plan".to_string());
            warn!(account = name, "No staged plan for account");
            return report;
        };

        report.success = if plan.enabled {
            self.execute_enabled(adapter, &plan, &mut report).await
        } else {
            info!(account = name, symbols = plan.targets.len(), "Account disabled, flattening");
            report.symbols = self.execute_symbols(adapter, &plan, None).await;
            for failed in report.symbols.iter().filter(|s| !s.is_ok()) {
                warn!(
                    account = name,
                    symbol = %failed.symbol,
                    error = ?failed.error,
                    "Flatten failed on disabled account"
                );
            }
            true
        };

        match self.manager.confirm_execution(name, report.success).await {
            Ok(committed) => report.committed = committed,
            Err(e) => {
                error!(account = name, error = %e, "Cache commit failed");
                report.error.get_or_insert_with(|| format!("cache commit failed: {e}"));
            }
        }

        info!(
            account = name,
            success = report.success,
            committed = report.committed,
            symbols_ok = report.symbols_ok(),
            symbols_failed = report.symbols_failed(),
            "Account reconciled"
        );
        report
    }

    /// Returns whether the account may be confirmed.
    async fn execute_enabled(
        &self,
        adapter: &Arc<dyn AccountAdapter>,
        plan: &AccountPlan,
        report: &mut AccountReport,
    ) -> bool {
        let name = adapter.exchange_name();
        let balance = bounded(
            "fetch_balance",
            self.engine.request_timeout(),
            adapter.fetch_balance(&self.engine.settlement_asset),
        )
        .await;

        match balance {
            Ok(value) => {
                report.account_value = Some(value);
                debug!(account = name, value = %value, "Account value");
                report.symbols = self.execute_symbols(adapter, plan, Some(value)).await;
                report.symbols.iter().all(SymbolReport::is_ok)
            }
            Err(e) if !plan.has_changes() => {
                warn!(account = name, error = %e, "Account value unavailable, nothing to do");
                true
            }
            Err(e) if plan.targets.values().all(|t| t.depth == 0.0) => {
                warn!(account = name, error = %e, "Account value unavailable, flattening only");
                report.symbols = self.execute_symbols(adapter, plan, None).await;
                report.symbols.iter().all(SymbolReport::is_ok)
            }
            Err(e) => {
                error!(account = name, error = %e, "Account value unavailable, skipping account");
                report.error = Some(format!("account value: {e}"));
                false
            }
        }
    }

    /// Runs every symbol of `plan` under the account's admission limit. With
    /// no account value every target is flat.
    async fn execute_symbols(
        &self,
        adapter: &Arc<dyn AccountAdapter>,
        plan: &AccountPlan,
        account_value: Option<Decimal>,
    ) -> Vec<SymbolReport> {
        let limit = match adapter.max_concurrency() {
            0 => self.engine.default_symbol_concurrency.max(1),
            n => n,
        };
        let gate = Semaphore::new(limit);

        let tasks = plan.targets.values().map(|target| {
            let gate = &gate;
            async move {
                let exchange_symbol = adapter.map_signal_symbol_to_exchange(&target.symbol);
                let report = SymbolReport::new(target, exchange_symbol);
                let Ok(_permit) = gate.acquire().await else {
                    return report.failed("admission limiter closed");
                };
                self.execute_symbol(adapter.as_ref(), target, account_value, report)
                    .await
            }
        });
        join_all(tasks).await
    }

    async fn execute_symbol(
        &self,
        adapter: &dyn AccountAdapter,
        target: &SymbolTarget,
        account_value: Option<Decimal>,
        mut report: SymbolReport,
    ) -> SymbolReport {
        let account = adapter.exchange_name();
        let symbol = report.exchange_symbol.clone();

        let meta = match self.symbol_metadata(adapter, &symbol).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(account, symbol = %symbol, error = %e, "Metadata unavailable, skipping symbol");
                return report.failed(format!("metadata: {e}"));
            }
        };

        let raw_size = match account_value {
            Some(value) if target.depth != 0.0 => {
                let price = match self.resolve_price(adapter, &symbol, target).await {
                    Some(price) => price,
                    None => {
                        warn!(account, symbol = %symbol, "No usable price, skipping symbol");
                        return report.failed("no usable price");
                    }
                };
                report.price = Some(price);
                let Some(size) = target_size(value, target.depth, target.leverage, price, &meta)
                else {
                    return report.failed(format!("cannot size depth {}", target.depth));
                };
                size
            }
            _ => Decimal::ZERO,
        };
        let quantized = quantize_size(raw_size, &meta);
        report.raw_size = Some(raw_size);
        report.target_size = Some(quantized);

        info!(
            account,
            symbol = %symbol,
            depth = target.depth,
            price = ?report.price,
            raw_size = %raw_size,
            target_size = %quantized,
            "Target computed"
        );

        let reconcile_target = ReconciliationTarget {
            symbol: symbol.clone(),
            size: quantized,
            leverage: target.leverage,
            margin_mode: target.margin_mode,
        };
        match self.reconciler.reconcile(adapter, &reconcile_target, &meta).await {
            Ok(outcome) => {
                report.outcome = Some(outcome);
                report
            }
            Err(e) => {
                error!(
                    account,
                    symbol = %symbol,
                    transient = e.is_transient(),
                    error = %e,
                    "Reconciliation failed"
                );
                if !e.is_transient() {
                    self.metadata.invalidate(account, &symbol);
                }
                report.failed(e)
            }
        }
    }

    async fn symbol_metadata(
        &self,
        adapter: &dyn AccountAdapter,
        symbol: &str,
    ) -> Result<SymbolMetadata, depthsync_core::AdapterError> {
        let account = adapter.exchange_name();
        if let Some(meta) = self.metadata.get(account, symbol) {
            return Ok(meta);
        }
        let meta = bounded(
            "get_symbol_metadata",
            self.engine.request_timeout(),
            adapter.get_symbol_metadata(symbol),
        )
        .await?;
        self.metadata.insert(account, symbol, meta.clone());
        Ok(meta)
    }

    /// Ticker price first, then the price the sources published.
    async fn resolve_price(
        &self,
        adapter: &dyn AccountAdapter,
        symbol: &str,
        target: &SymbolTarget,
    ) -> Option<Decimal> {
        let ticker = bounded(
            "fetch_ticker",
            self.engine.request_timeout(),
            adapter.fetch_ticker(symbol),
        )
        .await;
        match ticker {
            Ok(t) => {
                if let Some(price) = t.reference_price() {
                    return Some(price);
                }
            }
            Err(e) => debug!(
                account = adapter.exchange_name(),
                symbol,
                error = %e,
                "Ticker unavailable, using signal price"
            ),
        }
        target.reference_price.filter(|p| *p > Decimal::ZERO)
    }
}

/// `account_value * depth * leverage / price / contract_value`, in exchange
/// units. `None` if the depth is not representable, the price is not
/// positive, or the result overflows.
#[must_use]
pub fn target_size(
    account_value: Decimal,
    depth: f64,
    leverage: Decimal,
    price: Decimal,
    meta: &SymbolMetadata,
) -> Option<Decimal> {
    if price <= Decimal::ZERO {
        return None;
    }
    let depth = Decimal::from_f64(depth)?;
    let contract_value = if meta.contract_value > Decimal::ZERO {
        meta.contract_value
    } else {
        Decimal::ONE
    };
    account_value
        .checked_mul(depth)?
        .checked_mul(leverage)?
        .checked_div(price)?
        .checked_div(contract_value)
}
