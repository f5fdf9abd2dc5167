//! Durable per-account depth cache.
//!
//! The cache is the only memory of "what we last told each exchange to hold".
//! It maps a canonical account name to `{symbol -> last confirmed depth}` and
//! is stored as one JSON file.
//!
//! - Account names match case-insensitively. Keys that collide after
//!   canonicalisation are merged by keeping the larger-magnitude depth.
//! - Every commit re-reads the file, merges, and writes it back under a single
//!   writer lock. Writes go to a temp file that is synced and renamed into
//!   place, so readers never see a half-written file.
//! - [`DepthCache::reload`] picks up edits made to the file by other processes.
//!   File IO runs on the blocking pool.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors from cache persistence.
#[derive(Error, Debug)]
pub enum CacheError {
    /// IO error reading/writing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Blocking file task panicked or was cancelled.
    #[error("Cache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// `symbol -> depth` for one account.
pub type AccountDepths = BTreeMap<String, f64>;

/// `account -> symbol -> depth`.
pub type DepthSnapshot = BTreeMap<String, AccountDepths>;

/// Normalised account key used for all cache lookups.
#[must_use]
pub fn canonical_account(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Folds alias keys together, keeping the larger-magnitude depth per symbol.
#[must_use]
pub fn merge_aliases(raw: &DepthSnapshot) -> DepthSnapshot {
    let mut merged = DepthSnapshot::new();
    for (name, depths) in raw {
        let entry = merged.entry(canonical_account(name)).or_default();
        merge_depths_into(entry, depths);
    }
    merged
}

fn merge_depths_into(into: &mut AccountDepths, from: &AccountDepths) {
    for (symbol, depth) in from {
        match into.get(symbol) {
            Some(existing) if existing.abs() >= depth.abs() => {}
            _ => {
                into.insert(symbol.clone(), *depth);
            }
        }
    }
}

pub struct DepthCache {
    path: PathBuf,
    state: RwLock<DepthSnapshot>,
    write_lock: Mutex<()>,
}

impl DepthCache {
    /// Opens the cache at `path`. A missing or unreadable file yields an empty
    /// cache; the next successful commit recreates it.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match read_raw(&path) {
            Ok(Some(raw)) => {
                let merged = merge_aliases(&raw);
                info!(
                    path = %path.display(),
                    accounts = merged.len(),
                    "Loaded depth cache"
                );
                merged
            }
            Ok(None) => {
                info!(path = %path.display(), "No depth cache found, starting empty");
                DepthSnapshot::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load depth cache, starting empty");
                DepthSnapshot::new()
            }
        };

        Self {
            path,
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the in-memory view, keyed by canonical account name.
    #[must_use]
    pub fn snapshot(&self) -> DepthSnapshot {
        self.state.read().clone()
    }

    #[must_use]
    pub fn account(&self, account: &str) -> Option<AccountDepths> {
        self.state.read().get(&canonical_account(account)).cloned()
    }

    #[must_use]
    pub fn get(&self, account: &str, symbol: &str) -> Option<f64> {
        self.state
            .read()
            .get(&canonical_account(account))
            .and_then(|d| d.get(symbol).copied())
    }

    /// Replaces the in-memory view with the current file contents.
    ///
    /// A missing file keeps the in-memory view, since the next commit
    /// recreates it. A read or parse failure is logged and the in-memory view
    /// is kept as well.
    pub async fn reload(&self) {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let read = tokio::task::spawn_blocking(move || read_raw(&path))
            .await
            .map_err(CacheError::from)
            .and_then(|r| r);
        match read {
            Ok(Some(raw)) => {
                let merged = merge_aliases(&raw);
                debug!(
                    path = %self.path.display(),
                    accounts = merged.len(),
                    "Reloaded depth cache"
                );
                *self.state.write() = merged;
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No depth cache file, keeping memory");
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to reload depth cache, keeping memory"
                );
            }
        }
    }

    /// Merges `depths` into the persisted entry for `account`.
    ///
    /// Other-case aliases of the account are folded into one canonical key and
    /// removed. Only the symbols in `depths` change; other accounts keep their
    /// stored keys untouched. The in-memory view is updated only after the
    /// file has been renamed into place.
    ///
    /// # Errors
    /// Returns error if the existing file cannot be read or the new one cannot
    /// be written. The in-memory view is left unchanged in that case.
    pub async fn commit(&self, account: &str, depths: &AccountDepths) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let canonical = canonical_account(account);

        let path = self.path.clone();
        let raw_read = tokio::task::spawn_blocking(move || read_raw(&path)).await?;
        let mut raw = match raw_read {
            Ok(Some(raw)) => raw,
            Ok(None) => self.snapshot(),
            Err(CacheError::Json(e)) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Depth cache file is corrupt, rebuilding from memory"
                );
                self.snapshot()
            }
            Err(e) => return Err(e),
        };

        let aliases: Vec<String> = raw
            .keys()
            .filter(|k| canonical_account(k) == canonical)
            .cloned()
            .collect();
        let mut entry = AccountDepths::new();
        for alias in &aliases {
            if let Some(existing) = raw.remove(alias) {
                merge_depths_into(&mut entry, &existing);
            }
        }
        for (symbol, depth) in depths {
            entry.insert(symbol.clone(), *depth);
        }
        raw.insert(canonical.clone(), entry);

        let path = self.path.clone();
        let raw = tokio::task::spawn_blocking(move || write_atomic(&path, &raw).map(|()| raw))
            .await??;

        let purged = aliases.iter().filter(|a| **a != canonical).count();
        debug!(
            account = %canonical,
            symbols = depths.len(),
            purged_aliases = purged,
            "Committed depth cache"
        );

        *self.state.write() = merge_aliases(&raw);
        Ok(())
    }
}

fn read_raw(path: &Path) -> Result<Option<DepthSnapshot>, CacheError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(snapshot))
}

fn write_atomic(path: &Path, snapshot: &DepthSnapshot) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(snapshot)?;
    let temp_path = path.with_extension("json.tmp");
    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(&json)?;
    temp_file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
