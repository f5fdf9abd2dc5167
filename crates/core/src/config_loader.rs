use crate::config::AppConfig;
use crate::signal::SymbolConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging a TOML file and `DEPTHSYNC_`
    /// environment variables (`__` separates nested keys).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DEPTHSYNC_").split("__"))
            .extract()
            .with_context(|| format!("loading config from {}", path.as_ref().display()))?;

        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct SymbolsFile {
    #[serde(default)]
    symbols: Vec<SymbolConfig>,
}

/// Reads the per-symbol configuration. Operators edit this file live, so it is
/// re-read on every cycle rather than cached.
#[derive(Debug, Clone)]
pub struct SymbolConfigStore {
    path: PathBuf,
}

impl SymbolConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every valid symbol. Invalid entries are logged and skipped so one
    /// bad edit does not stop the other symbols.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load(&self) -> Result<Vec<SymbolConfig>> {
        if !self.path.exists() {
            anyhow::bail!("symbol config {} not found", self.path.display());
        }

        let figment = match self.path.extension().and_then(|e| e.to_str()) {
            Some("json") => Figment::new().merge(Json::file(&self.path)),
            _ => Figment::new().merge(Toml::file(&self.path)),
        };
        let file: SymbolsFile = figment
            .extract()
            .with_context(|| format!("parsing symbol config {}", self.path.display()))?;

        let mut symbols = Vec::with_capacity(file.symbols.len());
        for cfg in file.symbols {
            match cfg.validate() {
                Ok(()) => symbols.push(cfg),
                Err(e) => tracing::error!(symbol = %cfg.symbol, error = %e, "Skipping invalid symbol config"),
            }
        }
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_toml_symbols_and_skips_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "symbols.toml",
            r#"
[[symbols]]
symbol = "BTCUSDT"
leverage = 5
sources = [{ source = "miners", weight = 0.6 }, { source = "trend", weight = 0.4 }]

[[symbols]]
symbol = "ETHUSDT"
leverage = 3
margin_mode = "isolated"
sources = [{ source = "miners", weight = 0.9 }, { source = "trend", weight = 0.9 }]
"#,
        );

        let symbols = SymbolConfigStore::new(path).load().unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].symbol, "BTCUSDT");
        assert_eq!(symbols[0].leverage, dec!(5));
    }

    #[test]
    fn loads_json_symbols() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "symbols.json",
            r#"{"symbols":[{"symbol":"SOLUSDT","leverage":2,"sources":[{"source":"miners","weight":1.0}]}]}"#,
        );
        let symbols = SymbolConfigStore::new(path).load().unwrap();
        assert_eq!(symbols[0].symbol, "SOLUSDT");
    }

    #[test]
    fn missing_symbol_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = SymbolConfigStore::new(dir.path().join("nope.toml"));
        assert!(store.load().is_err());
    }

    #[test]
    fn app_config_defaults_fill_gaps() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "Config.toml",
            r#"
symbols_path = "symbols.toml"

[engine]
cycle_interval_secs = 30

[[sources]]
name = "miners"
kind = "file"
location = "signals/miners.json"

[[accounts]]
name = "Paper-A"
balance = 10000
"#,
        );
        let cfg = ConfigLoader::load(&path).unwrap();
        assert_eq!(cfg.engine.cycle_interval_secs, 30);
        assert_eq!(cfg.engine.request_timeout_ms, 8_000);
        assert_eq!(cfg.sources.len(), 1);
        assert!(cfg.accounts[0].enabled);
        assert_eq!(cfg.accounts[0].balance, dec!(10000));
    }
}
