//! Signal Manager: turns fresh signals into per-account targets and gates
//! durable cache writes on confirmed execution.
//!
//! One cycle looks like:
//!
//! 1. [`SignalManager::check_for_updates`] reloads the symbol config, fetches
//!    the sources, combines depths and diffs every known account against the
//!    [`DepthCache`]. The result is a staged snapshot held in memory.
//! 2. The executor asks [`SignalManager::account_plan`] /
//!    [`SignalManager::get_changed_symbols`] what to do for each account.
//! 3. [`SignalManager::confirm_execution`] merges one account's staged
//!    targets into the cache, and only when the account reported success.

use crate::cache::{canonical_account, AccountDepths, CacheError, DepthCache};
use crate::combiner::{combine, Combination};
use crate::registry::SourceRegistry;
use anyhow::Result;
use depthsync_core::{AccountAdapter, MarginMode, SymbolConfigStore};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Absolute floor of the change tolerance.
pub const ABS_DEPTH_TOLERANCE: f64 = 0.0001;
/// Relative part of the change tolerance.
pub const REL_DEPTH_TOLERANCE: f64 = 0.001;

/// True when `target` differs from `cached` by more than float noise.
#[must_use]
pub fn is_material_change(target: f64, cached: f64) -> bool {
    let tolerance = ABS_DEPTH_TOLERANCE.max(REL_DEPTH_TOLERANCE * target.abs().max(cached.abs()));
    (target - cached).abs() > tolerance
}

/// One symbol of an account plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolTarget {
    pub symbol: String,
    pub depth: f64,
    pub leverage: Decimal,
    pub margin_mode: MarginMode,
    /// Reference price published by the sources, if any.
    pub reference_price: Option<Decimal>,
    /// Differs materially from the cached depth.
    pub changed: bool,
}

/// Staged targets for one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountPlan {
    pub display_name: String,
    /// Adapter-reported flag; cache-only accounts count as enabled.
    pub enabled: bool,
    /// Backed by a live adapter this cycle.
    pub active: bool,
    pub targets: BTreeMap<String, SymbolTarget>,
}

impl AccountPlan {
    #[must_use]
    pub fn changed_symbols(&self) -> Vec<String> {
        self.targets
            .values()
            .filter(|t| t.changed)
            .map(|t| t.symbol.clone())
            .collect()
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.targets.values().any(|t| t.changed)
    }

    fn depths(&self) -> AccountDepths {
        self.targets
            .values()
            .map(|t| (t.symbol.clone(), t.depth))
            .collect()
    }
}

/// Outcome of [`SignalManager::check_for_updates`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateSummary {
    /// For each source: did any symbol it feeds change for an active account.
    pub by_source: HashMap<String, bool>,
    /// Canonical names of accounts with at least one changed symbol.
    pub changed_accounts: BTreeSet<String>,
    /// Combined depth per symbol; frozen symbols are absent.
    pub combined: BTreeMap<String, f64>,
    pub frozen: BTreeSet<String>,
}

impl UpdateSummary {
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changed_accounts.is_empty()
    }
}

#[derive(Debug, Default)]
struct Staged {
    accounts: BTreeMap<String, AccountPlan>,
}

pub struct SignalManager {
    store: SymbolConfigStore,
    registry: SourceRegistry,
    cache: Arc<DepthCache>,
    fetch_timeout: Duration,
    max_signal_age: Option<chrono::Duration>,
    staged: RwLock<Staged>,
}

impl SignalManager {
    #[must_use]
    pub fn new(store: SymbolConfigStore, registry: SourceRegistry, cache: Arc<DepthCache>) -> Self {
        Self {
            store,
            registry,
            cache,
            fetch_timeout: Duration::from_secs(8),
            max_signal_age: None,
            staged: RwLock::new(Staged::default()),
        }
    }

    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_signal_age(mut self, max_age: Option<chrono::Duration>) -> Self {
        self.max_signal_age = max_age;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<DepthCache> {
        &self.cache
    }

    /// Rebuilds the staged snapshot and reports what changed.
    ///
    /// The depth cache is re-read from disk first so external edits count as
    /// changes. Known accounts are the live adapters plus any account only present in
    /// the cache. Disabled accounts target zero everywhere. A symbol whose
    /// sources did not all answer keeps each account's cached depth.
    ///
    /// # Errors
    /// Returns error if the symbol configuration cannot be loaded. The
    /// previous staged snapshot is kept in that case.
    pub async fn check_for_updates(
        &self,
        accounts: &[Arc<dyn AccountAdapter>],
    ) -> Result<UpdateSummary> {
        let symbols = self.store.load()?;
        self.cache.reload().await;

        let mut needed: BTreeSet<String> = BTreeSet::new();
        for cfg in &symbols {
            for weight in cfg.active_sources() {
                needed.insert(weight.source.clone());
            }
        }
        let needed: Vec<String> = needed.into_iter().collect();
        let fetched = self
            .registry
            .fetch_all(&needed, self.fetch_timeout, self.max_signal_age)
            .await;

        let mut summary = UpdateSummary {
            by_source: needed.iter().map(|n| (n.clone(), false)).collect(),
            ..UpdateSummary::default()
        };

        let mut combinations: BTreeMap<String, Combination> = BTreeMap::new();
        for cfg in &symbols {
            let combination = combine(cfg, &fetched);
            match &combination {
                Combination::Derived { depth, price } => {
                    info!(
                        symbol = %cfg.symbol,
                        depth = *depth,
                        price = ?price,
                        total_weight = cfg.total_weight(),
                        "Combined depth"
                    );
                    summary.combined.insert(cfg.symbol.clone(), *depth);
                }
                Combination::Frozen { missing } => {
                    warn!(
                        symbol = %cfg.symbol,
                        missing = ?missing,
                        "Sources missing, keeping cached depth"
                    );
                    summary.frozen.insert(cfg.symbol.clone());
                }
            }
            combinations.insert(cfg.symbol.clone(), combination);
        }

        let cached = self.cache.snapshot();
        let mut known: BTreeMap<String, (String, bool, bool)> = BTreeMap::new();
        for name in cached.keys() {
            known.insert(name.clone(), (name.clone(), true, false));
        }
        for adapter in accounts {
            let name = adapter.exchange_name().to_string();
            let key = canonical_account(&name);
            if let Some((_, _, true)) = known.get(&key) {
                warn!(account = %name, "Duplicate account name after canonicalisation");
            }
            known.insert(key, (name, adapter.enabled(), true));
        }

        let mut plans = BTreeMap::new();
        for (key, (display_name, enabled, active)) in known {
            let cached_account = cached.get(&key);
            let mut targets = BTreeMap::new();

            for cfg in &symbols {
                let cached_depth = cached_account.and_then(|a| a.get(&cfg.symbol).copied());
                let combination = &combinations[&cfg.symbol];

                let (depth, price) = match (enabled, combination) {
                    (false, c) => (0.0, derived_price(c)),
                    (true, Combination::Derived { depth, price }) => (*depth, *price),
                    (true, Combination::Frozen { .. }) => match cached_depth {
                        Some(d) => (d, None),
                        None => continue,
                    },
                };

                let changed = is_material_change(depth, cached_depth.unwrap_or(0.0));
                if changed {
                    info!(
                        account = %display_name,
                        symbol = %cfg.symbol,
                        target = depth,
                        cached = ?cached_depth,
                        enabled,
                        "Material depth change"
                    );
                    if active {
                        summary.changed_accounts.insert(key.clone());
                        for weight in cfg.active_sources() {
                            summary.by_source.insert(weight.source.clone(), true);
                        }
                    }
                }

                targets.insert(
                    cfg.symbol.clone(),
                    SymbolTarget {
                        symbol: cfg.symbol.clone(),
                        depth,
                        leverage: cfg.leverage,
                        margin_mode: cfg.margin_mode,
                        reference_price: price,
                        changed,
                    },
                );
            }

            plans.insert(
                key,
                AccountPlan {
                    display_name,
                    enabled,
                    active,
                    targets,
                },
            );
        }

        debug!(
            accounts = plans.len(),
            symbols = symbols.len(),
            changed = summary.changed_accounts.len(),
            "Staged snapshot rebuilt"
        );

        self.staged.write().accounts = plans;
        Ok(summary)
    }

    /// Symbols whose staged target differs materially from cache.
    #[must_use]
    pub fn get_changed_symbols(&self, account: &str) -> Vec<String> {
        self.staged
            .read()
            .accounts
            .get(&canonical_account(account))
            .map(AccountPlan::changed_symbols)
            .unwrap_or_default()
    }

    /// Full staged plan for one account.
    #[must_use]
    pub fn account_plan(&self, account: &str) -> Option<AccountPlan> {
        self.staged
            .read()
            .accounts
            .get(&canonical_account(account))
            .cloned()
    }

    /// Commits the staged targets for `account` when `success` is true.
    ///
    /// Returns `Ok(true)` when the cache was written. A failed account, or one
    /// with nothing staged, leaves the cache untouched.
    ///
    /// # Errors
    /// Returns error if the cache file cannot be written; the next cycle will
    /// stage the same targets again.
    pub async fn confirm_execution(&self, account: &str, success: bool) -> Result<bool, CacheError> {
        if !success {
            info!(account, "Execution not confirmed, cache left unchanged");
            return Ok(false);
        }

        let Some(plan) = self.account_plan(account) else {
            warn!(account, "No staged snapshot for account, nothing to commit");
            return Ok(false);
        };

        let depths = plan.depths();
        if let Err(e) = self.cache.commit(&plan.display_name, &depths).await {
            warn!(account = %plan.display_name, error = %e, "Depth cache write failed");
            return Err(e);
        }

        info!(
            account = %plan.display_name,
            symbols = depths.len(),
            "Committed staged depths"
        );
        Ok(true)
    }
}

fn derived_price(combination: &Combination) -> Option<Decimal> {
    match combination {
        Combination::Derived { price, .. } => *price,
        Combination::Frozen { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use depthsync_core::{
        AdapterError, AdapterResult, CloseOutcome, OrderResult, RawSignal, Side, SignalBatch,
        SignalSource, SymbolMetadata, Ticker, UnifiedPosition,
    };
    use rust_decimal_macros::dec;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct StaticSource {
        name: String,
        depths: parking_lot::Mutex<Vec<(String, f64)>>,
        fail: parking_lot::Mutex<bool>,
    }

    impl StaticSource {
        fn new(name: &str, depths: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                depths: parking_lot::Mutex::new(
                    depths.iter().map(|(s, d)| ((*s).to_string(), *d)).collect(),
                ),
                fail: parking_lot::Mutex::new(false),
            })
        }

        fn set(&self, depths: &[(&str, f64)]) {
            *self.depths.lock() = depths.iter().map(|(s, d)| ((*s).to_string(), *d)).collect();
        }
    }

    #[async_trait]
    impl SignalSource for StaticSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_signals(&self) -> anyhow::Result<SignalBatch> {
            if *self.fail.lock() {
                anyhow::bail!("source down");
            }
            Ok(self
                .depths
                .lock()
                .iter()
                .map(|(s, d)| (s.clone(), RawSignal::new(s.clone(), *d, dec!(50000))))
                .collect())
        }
    }

    struct NamedAccount {
        name: String,
        enabled: bool,
    }

    fn account(name: &str, enabled: bool) -> Arc<dyn AccountAdapter> {
        Arc::new(NamedAccount {
            name: name.to_string(),
            enabled,
        })
    }

    #[async_trait]
    impl AccountAdapter for NamedAccount {
        fn exchange_name(&self) -> &str {
            &self.name
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn fetch_balance(&self, _instrument: &str) -> AdapterResult<Decimal> {
            Ok(dec!(10000))
        }

        async fn fetch_positions(&self, _symbol: &str) -> AdapterResult<Vec<UnifiedPosition>> {
            Ok(Vec::new())
        }

        async fn fetch_ticker(&self, _symbol: &str) -> AdapterResult<Ticker> {
            Err(AdapterError::NotSupported("ticker".into()))
        }

        async fn get_symbol_metadata(&self, symbol: &str) -> AdapterResult<SymbolMetadata> {
            Err(AdapterError::missing_metadata(symbol))
        }

        async fn set_leverage(
            &self,
            _symbol: &str,
            _leverage: Decimal,
            _margin_mode: MarginMode,
        ) -> AdapterResult<()> {
            Ok(())
        }

        async fn place_market_order(
            &self,
            _symbol: &str,
            _side: Side,
            _quantity: Decimal,
            _reduce_only: bool,
        ) -> AdapterResult<OrderResult> {
            Err(AdapterError::NotSupported("orders".into()))
        }

        async fn close_position(&self, _symbol: &str) -> AdapterResult<CloseOutcome> {
            Ok(CloseOutcome::NotSupported)
        }
    }

    struct Fixture {
        _dir: TempDir,
        cache_path: PathBuf,
        manager: SignalManager,
    }

    fn fixture(symbols_toml: &str, sources: Vec<Arc<StaticSource>>, cache_json: Option<&str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let symbols_path = dir.path().join("symbols.toml");
        std::fs::File::create(&symbols_path)
            .unwrap()
            .write_all(symbols_toml.as_bytes())
            .unwrap();
        let cache_path = dir.path().join("depth_cache.json");
        if let Some(json) = cache_json {
            std::fs::write(&cache_path, json).unwrap();
        }

        let mut registry = SourceRegistry::new();
        for s in sources {
            registry.register(s);
        }
        let manager = SignalManager::new(
            SymbolConfigStore::new(symbols_path),
            registry,
            Arc::new(DepthCache::open(&cache_path)),
        );
        Fixture {
            _dir: dir,
            cache_path,
            manager,
        }
    }

    const BTC_TWO_SOURCES: &str = r#"
[[symbols]]
symbol = "BTCUSDT"
leverage = 5
sources = [{ source = "miners", weight = 0.5 }, { source = "trend", weight = 0.5 }]
"#;

    #[test]
    fn material_change_tolerance() {
        assert!(is_material_change(0.1004, 0.10));
        assert!(!is_material_change(0.10005, 0.10));
        assert!(!is_material_change(0.00005, 0.0));
        // relative part dominates for large depths
        assert!(!is_material_change(0.9995, 1.0));
        assert!(is_material_change(0.998, 1.0));
    }

    #[tokio::test]
    async fn detects_change_against_cache() {
        let miners = StaticSource::new("miners", &[("BTCUSDT", 0.1004)]);
        let trend = StaticSource::new("trend", &[("BTCUSDT", 0.1004)]);
        let f = fixture(
            BTC_TWO_SOURCES,
            vec![miners, trend],
            Some(r#"{"paper-a":{"BTCUSDT":0.10}}"#),
        );

        let summary = f
            .manager
            .check_for_updates(&[account("Paper-A", true)])
            .await
            .unwrap();

        assert!(summary.has_changes());
        assert!(summary.by_source["miners"]);
        assert_eq!(f.manager.get_changed_symbols("PAPER-A"), vec!["BTCUSDT".to_string()]);
        let plan = f.manager.account_plan("paper-a").unwrap();
        assert_eq!(plan.display_name, "Paper-A");
        assert!((plan.targets["BTCUSDT"].depth - 0.1004).abs() < 1e-12);
    }

    #[tokio::test]
    async fn noise_below_tolerance_is_not_a_change() {
        let miners = StaticSource::new("miners", &[("BTCUSDT", 0.20005)]);
        let trend = StaticSource::new("trend", &[("BTCUSDT", 0.2)]);
        let f = fixture(
            BTC_TWO_SOURCES,
            vec![miners, trend],
            Some(r#"{"paper-a":{"BTCUSDT":0.2}}"#),
        );

        let summary = f
            .manager
            .check_for_updates(&[account("Paper-A", true)])
            .await
            .unwrap();
        assert!(!summary.has_changes());
        assert!(f.manager.get_changed_symbols("Paper-A").is_empty());
        assert!(!summary.by_source["trend"]);
    }

    #[tokio::test]
    async fn cache_file_edited_between_cycles_is_a_change() {
        let miners = StaticSource::new("miners", &[("BTCUSDT", 0.5)]);
        let trend = StaticSource::new("trend", &[("BTCUSDT", 0.5)]);
        let f = fixture(
            BTC_TWO_SOURCES,
            vec![miners, trend],
            Some(r#"{"paper-a":{"BTCUSDT":0.5}}"#),
        );
        let accounts = [account("Paper-A", true)];

        let summary = f.manager.check_for_updates(&accounts).await.unwrap();
        assert!(!summary.has_changes());

        std::fs::write(&f.cache_path, r#"{"paper-a":{"BTCUSDT":0.0}}"#).unwrap();
        let summary = f.manager.check_for_updates(&accounts).await.unwrap();

        assert!(summary.has_changes());
        assert_eq!(f.manager.get_changed_symbols("Paper-A"), vec!["BTCUSDT".to_string()]);
    }

    #[tokio::test]
    async fn disabled_account_targets_zero() {
        let miners = StaticSource::new("miners", &[("BTCUSDT", 0.6)]);
        let trend = StaticSource::new("trend", &[("BTCUSDT", 0.6)]);
        let f = fixture(
            BTC_TWO_SOURCES,
            vec![miners, trend],
            Some(r#"{"paper-b":{"BTCUSDT":0.4}}"#),
        );

        f.manager
            .check_for_updates(&[account("Paper-B", false)])
            .await
            .unwrap();
        let plan = f.manager.account_plan("paper-b").unwrap();
        assert!(!plan.enabled);
        assert_eq!(plan.targets["BTCUSDT"].depth, 0.0);
        assert!(plan.targets["BTCUSDT"].changed);
    }

    #[tokio::test]
    async fn failed_source_keeps_cached_depth() {
        let miners = StaticSource::new("miners", &[("BTCUSDT", 0.9)]);
        let trend = StaticSource::new("trend", &[("BTCUSDT", 0.9)]);
        *trend.fail.lock() = true;
        let f = fixture(
            BTC_TWO_SOURCES,
            vec![miners, trend],
            Some(r#"{"paper-a":{"BTCUSDT":0.3}}"#),
        );

        let summary = f
            .manager
            .check_for_updates(&[account("Paper-A", true)])
            .await
            .unwrap();

        assert!(!summary.has_changes());
        assert!(summary.frozen.contains("BTCUSDT"));
        let plan = f.manager.account_plan("paper-a").unwrap();
        assert!((plan.targets["BTCUSDT"].depth - 0.3).abs() < 1e-12);
    }

    #[tokio::test]
    async fn cache_only_account_is_staged_but_not_counted() {
        let miners = StaticSource::new("miners", &[("BTCUSDT", 0.5)]);
        let trend = StaticSource::new("trend", &[("BTCUSDT", 0.5)]);
        let f = fixture(
            BTC_TWO_SOURCES,
            vec![miners, trend],
            Some(r#"{"retired":{"BTCUSDT":0.1}}"#),
        );

        let summary = f.manager.check_for_updates(&[]).await.unwrap();
        assert!(!summary.has_changes());
        let plan = f.manager.account_plan("retired").unwrap();
        assert!(!plan.active);
        assert!(plan.targets["BTCUSDT"].changed);
    }

    #[tokio::test]
    async fn confirm_false_leaves_cache_bytes_unchanged() {
        let miners = StaticSource::new("miners", &[("BTCUSDT", 0.8)]);
        let trend = StaticSource::new("trend", &[("BTCUSDT", 0.8)]);
        let original = r#"{"Paper-A":{"BTCUSDT":0.1},"PAPER-A":{"ETHUSDT":0.2}}"#;
        let f = fixture(BTC_TWO_SOURCES, vec![miners, trend], Some(original));

        f.manager
            .check_for_updates(&[account("Paper-A", true)])
            .await
            .unwrap();
        let committed = f.manager.confirm_execution("Paper-A", false).await.unwrap();

        assert!(!committed);
        assert_eq!(std::fs::read_to_string(&f.cache_path).unwrap(), original);
    }

    #[tokio::test]
    async fn confirm_true_commits_staged_and_purges_aliases() {
        let miners = StaticSource::new("miners", &[("BTCUSDT", 0.8)]);
        let trend = StaticSource::new("trend", &[("BTCUSDT", 0.8)]);
        let f = fixture(
            BTC_TWO_SOURCES,
            vec![miners.clone(), trend.clone()],
            Some(r#"{"Paper-A":{"BTCUSDT":0.1},"PAPER-A":{"ETHUSDT":0.2}}"#),
        );

        f.manager
            .check_for_updates(&[account("Paper-A", true)])
            .await
            .unwrap();
        assert!(f.manager.confirm_execution("paper-a", true).await.unwrap());

        let raw: BTreeMap<String, BTreeMap<String, f64>> =
            serde_json::from_str(&std::fs::read_to_string(&f.cache_path).unwrap()).unwrap();
        assert_eq!(raw.len(), 1);
        let entry = &raw["paper-a"];
        assert!((entry["BTCUSDT"] - 0.8).abs() < 1e-12);
        // not in the staged snapshot, carried over untouched
        assert!((entry["ETHUSDT"] - 0.2).abs() < 1e-12);

        // next cycle with the same signals is quiet
        miners.set(&[("BTCUSDT", 0.8)]);
        trend.set(&[("BTCUSDT", 0.8)]);
        let summary = f
            .manager
            .check_for_updates(&[account("Paper-A", true)])
            .await
            .unwrap();
        assert!(!summary.has_changes());
    }

    #[tokio::test]
    async fn missing_symbol_config_is_an_error() {
        let f = fixture(BTC_TWO_SOURCES, Vec::new(), None);
        std::fs::remove_file(f.manager.store.path()).unwrap();
        assert!(f.manager.check_for_updates(&[]).await.is_err());
    }
}
