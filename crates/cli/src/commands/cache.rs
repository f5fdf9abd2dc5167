//! `cache`: print the persisted depth cache.

use anyhow::Result;
use clap::Args;
use depthsync_core::ConfigLoader;
use depthsync_signals::DepthCache;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml", env = "DEPTHSYNC_CONFIG")]
    pub config: PathBuf,

    /// Only show this account
    #[arg(short, long)]
    pub account: Option<String>,
}

pub fn run(args: CacheArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    let cache = DepthCache::open(&config.cache.path);

    let json = match &args.account {
        Some(account) => match cache.account(account) {
            Some(depths) => serde_json::to_string_pretty(&depths)?,
            None => anyhow::bail!("no cached depths for account {account}"),
        },
        None => serde_json::to_string_pretty(&cache.snapshot())?,
    };
    println!("{json}");
    Ok(())
}
