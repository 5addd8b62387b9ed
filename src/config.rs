use anyhow::{anyhow, Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair},
};
use std::{env, str::FromStr, time::Duration};
use url::Url;

use crate::constants::LAMPORTS_PER_SOL;
use crate::submit::{BundleVariant, Channel};
use crate::tracker::{TrackingPolicy, TrackingStatus};

const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
const DEFAULT_TRADE_DB: &str = "trades.db";
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 60;
const DEFAULT_CHUNK_SPLITTER: u64 = 50;
const DEFAULT_WITHDRAW_SETTLE_MS: u64 = 500;
const DEFAULT_RPC_RATE_LIMIT: u32 = 9;
const DEFAULT_RELAY_POOL_SIZE: usize = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub payer_private_key: Option<String>,
    pub keypair_path: Option<String>,
    pub rpc_url: String,
    pub redis_url: Option<String>,
    pub trade_db: String,
    pub lookup_table: Option<Pubkey>,
    pub block_engine_url: Option<String>,
    pub bundle_variant: BundleVariant,
    pub relay_ws_url: Option<String>,
    pub relay_token: Option<String>,
    pub relay_pool_size: usize,
    pub relay_staked_rpcs: bool,
    pub workers: usize,
    pub dedup_window: Duration,
    pub chunk_splitter: u64,
    pub liquidity_floor: u64,
    pub withdraw_settle: Duration,
    pub withdraw_mode: TrackingStatus,
    pub rpc_rate_limit: u32,
    pub tip_lamports: u64,
    pub buy_method: Vec<Channel>,
    pub sell_method: Vec<Channel>,
}

impl Config {
    pub fn tracking_policy(&self) -> TrackingPolicy {
        TrackingPolicy {
            chunk_splitter: self.chunk_splitter,
            liquidity_floor: self.liquidity_floor,
            withdraw_mode: self.withdraw_mode,
            withdraw_settle: self.withdraw_settle,
        }
    }

    /// Every channel either side of a trade may use.
    pub fn channels(&self) -> Vec<Channel> {
        let mut all = self.buy_method.clone();
        for c in &self.sell_method {
            if !all.contains(c) {
                all.push(*c);
            }
        }
        all
    }
}

pub fn default_config() -> Config {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    Config {
        payer_private_key: None,
        keypair_path: None,
        rpc_url: DEFAULT_RPC_URL.to_string(),
        redis_url: None,
        trade_db: DEFAULT_TRADE_DB.to_string(),
        lookup_table: None,
        block_engine_url: None,
        bundle_variant: BundleVariant::Transaction,
        relay_ws_url: None,
        relay_token: None,
        relay_pool_size: DEFAULT_RELAY_POOL_SIZE,
        relay_staked_rpcs: false,
        workers: cpus * 2,
        dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
        chunk_splitter: DEFAULT_CHUNK_SPLITTER,
        liquidity_floor: LAMPORTS_PER_SOL,
        withdraw_settle: Duration::from_millis(DEFAULT_WITHDRAW_SETTLE_MS),
        withdraw_mode: TrackingStatus::TrackedTriggerOnly,
        rpc_rate_limit: DEFAULT_RPC_RATE_LIMIT,
        tip_lamports: 0,
        buy_method: vec![Channel::Direct],
        sell_method: vec![Channel::Direct],
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("bad {key}={raw}: {e}")),
        _ => Ok(None),
    }
}

fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Overlays variables from `lookup` onto `cfg`. Unset or empty variables keep the default.
pub fn apply_env(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    cfg.payer_private_key = text(&lookup, "PAYER_PRIVATE_KEY");
    cfg.keypair_path = text(&lookup, "SOLANA_PAYER_KEYPAIR");
    if let Some(url) = text(&lookup, "RPC_HTTP_URL") {
        cfg.rpc_url = url;
    }
    cfg.redis_url = text(&lookup, "REDIS_URL");
    if let Some(db) = text(&lookup, "TRADE_DB") {
        cfg.trade_db = db;
    }
    cfg.lookup_table = parsed(&lookup, "RAYDIUM_ALT")?;
    cfg.block_engine_url = text(&lookup, "BLOCKENGINE_URL");
    if let Some(variant) = text(&lookup, "BLOCKENGINE_VARIANT") {
        cfg.bundle_variant = match variant.to_ascii_lowercase().as_str() {
            "transaction" => BundleVariant::Transaction,
            "bundle" => BundleVariant::Bundle,
            other => return Err(anyhow!("bad BLOCKENGINE_VARIANT={other}")),
        };
    }
    cfg.relay_ws_url = text(&lookup, "BLOXROUTE_WS_URL");
    cfg.relay_token = text(&lookup, "BLOXROUTE_TOKEN");
    if let Some(n) = parsed(&lookup, "BLOXROUTE_POOL_SIZE")? {
        cfg.relay_pool_size = n;
    }
    if let Some(staked) = parsed(&lookup, "BLOXROUTE_STAKED_RPCS")? {
        cfg.relay_staked_rpcs = staked;
    }
    if let Some(n) = parsed(&lookup, "WORKERS")? {
        cfg.workers = n;
    }
    if let Some(secs) = parsed(&lookup, "DEDUP_WINDOW_SECS")? {
        cfg.dedup_window = Duration::from_secs(secs);
    }
    if let Some(n) = parsed(&lookup, "CHUNK_SPLITTER")? {
        cfg.chunk_splitter = n;
    }
    if let Some(n) = parsed(&lookup, "LIQUIDITY_FLOOR_LAMPORTS")? {
        cfg.liquidity_floor = n;
    }
    if let Some(ms) = parsed(&lookup, "WITHDRAW_SETTLE_MS")? {
        cfg.withdraw_settle = Duration::from_millis(ms);
    }
    if let Some(mode) = text(&lookup, "WITHDRAW_TRACK_MODE") {
        cfg.withdraw_mode = match mode.to_ascii_lowercase().as_str() {
            "trigger_only" => TrackingStatus::TrackedTriggerOnly,
            "both" => TrackingStatus::TrackedBoth,
            other => return Err(anyhow!("bad WITHDRAW_TRACK_MODE={other}")),
        };
    }
    if let Some(n) = parsed(&lookup, "RPC_RATE_LIMIT")? {
        cfg.rpc_rate_limit = n;
    }
    if let Some(n) = parsed(&lookup, "TIP_LAMPORTS")? {
        cfg.tip_lamports = n;
    }
    if let Some(raw) = text(&lookup, "BUY_METHOD") {
        cfg.buy_method = Channel::parse_list(&raw).context("BUY_METHOD")?;
    }
    if let Some(raw) = text(&lookup, "SELL_METHOD") {
        cfg.sell_method = Channel::parse_list(&raw).context("SELL_METHOD")?;
    }
    Ok(())
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.payer_private_key.is_none() && cfg.keypair_path.is_none() {
        return Err(anyhow!(
            "missing payer key. set PAYER_PRIVATE_KEY or SOLANA_PAYER_KEYPAIR"
        ));
    }
    Url::parse(&cfg.rpc_url).with_context(|| format!("bad RPC_HTTP_URL {}", cfg.rpc_url))?;
    if cfg.workers == 0 {
        return Err(anyhow!("WORKERS must be at least 1"));
    }
    if cfg.chunk_splitter == 0 {
        return Err(anyhow!("CHUNK_SPLITTER must be at least 1"));
    }
    if cfg.rpc_rate_limit == 0 {
        return Err(anyhow!("RPC_RATE_LIMIT must be at least 1"));
    }

    let channels = cfg.channels();
    if channels.contains(&Channel::BundleRelay) {
        let url = cfg
            .block_engine_url
            .as_deref()
            .ok_or_else(|| anyhow!("jito channel selected but BLOCKENGINE_URL is unset"))?;
        Url::parse(url).with_context(|| format!("bad BLOCKENGINE_URL {url}"))?;
    }
    if channels.contains(&Channel::PaidRelay) {
        let url = cfg
            .relay_ws_url
            .as_deref()
            .ok_or_else(|| anyhow!("bloxroute channel selected but BLOXROUTE_WS_URL is unset"))?;
        Url::parse(url).with_context(|| format!("bad BLOXROUTE_WS_URL {url}"))?;
        if cfg.relay_token.is_none() {
            return Err(anyhow!("bloxroute channel selected but BLOXROUTE_TOKEN is unset"));
        }
        if cfg.relay_pool_size == 0 {
            return Err(anyhow!("BLOXROUTE_POOL_SIZE must be at least 1"));
        }
    }
    Ok(())
}

/// Reads `.env` when present, then the process environment.
pub fn config_from_env() -> Result<Config> {
    dotenvy::dotenv().ok();
    let mut cfg = default_config();
    apply_env(&mut cfg, |key| env::var(key).ok())?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Base58 secret key takes precedence over a keypair file.
pub fn load_payer(cfg: &Config) -> Result<Keypair> {
    if let Some(secret) = &cfg.payer_private_key {
        let bytes = bs58::decode(secret)
            .into_vec()
            .context("PAYER_PRIVATE_KEY is not base58")?;
        return Keypair::from_bytes(&bytes).map_err(|e| anyhow!("bad PAYER_PRIVATE_KEY: {e}"));
    }
    let path = cfg
        .keypair_path
        .as_deref()
        .ok_or_else(|| anyhow!("missing payer key"))?;
    read_keypair_file(path).map_err(|e| anyhow!("read keypair {path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signer::Signer;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut cfg = default_config();
        apply_env(&mut cfg, |k| vars.get(k).cloned())?;
        validate_config(&cfg)?;
        Ok(cfg)
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = from(&[("SOLANA_PAYER_KEYPAIR", "/tmp/id.json")]).unwrap();
        assert_eq!(cfg.trade_db, "trades.db");
        assert_eq!(cfg.dedup_window, Duration::from_secs(60));
        assert_eq!(cfg.chunk_splitter, 50);
        assert_eq!(cfg.liquidity_floor, LAMPORTS_PER_SOL);
        assert_eq!(cfg.withdraw_settle, Duration::from_millis(500));
        assert_eq!(cfg.withdraw_mode, TrackingStatus::TrackedTriggerOnly);
        assert_eq!(cfg.buy_method, vec![Channel::Direct]);
        assert!(cfg.workers >= 2);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = from(&[
            ("SOLANA_PAYER_KEYPAIR", "/tmp/id.json"),
            ("WORKERS", "3"),
            ("WITHDRAW_TRACK_MODE", "both"),
            ("BUY_METHOD", "rpc,jito"),
            ("BLOCKENGINE_URL", "https://engine.example"),
            ("TIP_LAMPORTS", "1000"),
        ])
        .unwrap();
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.withdraw_mode, TrackingStatus::TrackedBoth);
        assert_eq!(cfg.buy_method, vec![Channel::Direct, Channel::BundleRelay]);
        assert_eq!(cfg.tip_lamports, 1000);
        assert_eq!(cfg.tracking_policy().withdraw_mode, TrackingStatus::TrackedBoth);
    }

    #[test]
    fn missing_payer_and_channel_settings_are_rejected() {
        assert!(from(&[]).is_err());
        assert!(from(&[
            ("SOLANA_PAYER_KEYPAIR", "/tmp/id.json"),
            ("SELL_METHOD", "bloxroute"),
        ])
        .is_err());
        assert!(from(&[
            ("SOLANA_PAYER_KEYPAIR", "/tmp/id.json"),
            ("WORKERS", "many"),
        ])
        .is_err());
        assert!(from(&[
            ("SOLANA_PAYER_KEYPAIR", "/tmp/id.json"),
            ("WITHDRAW_TRACK_MODE", "sometimes"),
        ])
        .is_err());
    }

    #[test]
    fn payer_from_base58_secret() {
        let kp = Keypair::new();
        let mut cfg = default_config();
        cfg.payer_private_key = Some(kp.to_base58_string());
        assert_eq!(load_payer(&cfg).unwrap().pubkey(), kp.pubkey());

        cfg.payer_private_key = Some("not-base58-0OIl".into());
        assert!(load_payer(&cfg).is_err());
    }
}
