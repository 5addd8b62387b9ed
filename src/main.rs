use anyhow::{Context as _, Result};
use solana_sdk::{address_lookup_table::AddressLookupTableAccount, signer::Signer};
use std::sync::Arc;
use tokio::{signal, sync::mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lp_tracker::{
    config::{config_from_env, load_payer, Config},
    context::Context,
    envelope::Envelope,
    pipeline::Pipeline,
    resolver::AddressResolver,
    rpc::{HttpRateLimiter, HttpRpc},
    storage::{KeyValueStore, MemoryStore, RedisStore, TradeStore},
    submit::{BundleSubmitter, Channel, DirectSubmitter, RelayClient, RelayPool, Router},
    tracker::{Shutdown, Tracking},
    trade::{Executor, NoopPolicy, TxOptions},
    transport,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config_from_env()?;
    let payer = Arc::new(load_payer(&cfg)?);
    info!("payer {}", payer.pubkey());

    let kv: Arc<dyn KeyValueStore> = match &cfg.redis_url {
        Some(url) => Arc::new(
            RedisStore::connect(url)
                .await
                .with_context(|| format!("connect redis {url}"))?,
        ),
        None => {
            warn!("REDIS_URL unset, cache and tracking state live in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let trades = TradeStore::open(&cfg.trade_db)?;
    let rpc = HttpRpc::new(cfg.rpc_url.clone(), HttpRateLimiter::new(cfg.rpc_rate_limit))?;
    let ctx = Context::new(kv, trades, Arc::new(rpc));

    let tracking = Arc::new(Tracking::new(&ctx, cfg.tracking_policy()));
    match tracking.all_trackers().await {
        Ok(trackers) => {
            let tracked = trackers.iter().filter(|t| t.status.is_tracked()).count();
            info!("{} venues on record, {tracked} tracked", trackers.len());
        }
        Err(e) => warn!("listing trackers: {e}"),
    }

    let lookup_table = match cfg.lookup_table {
        Some(table) => {
            let state = AddressResolver::new(&ctx)
                .get_lookup_table(&table)
                .await
                .with_context(|| format!("preload lookup table {table}"))?;
            info!("lookup table {table} loaded with {} addresses", state.addresses.len());
            Some(AddressLookupTableAccount {
                key: table,
                addresses: state.addresses,
            })
        }
        None => None,
    };

    let router = build_router(&cfg).await?;
    let executor = Executor::new(
        payer.clone(),
        TxOptions {
            tip_lamports: cfg.tip_lamports,
            lookup_table,
        },
        router,
    );

    let pipeline = Arc::new(
        Pipeline::new(&ctx, tracking, payer.pubkey())
            .with_dedup_window(cfg.dedup_window)
            .with_policy(Arc::new(NoopPolicy), executor),
    );

    let shutdown = Shutdown::new();
    let shutdown_ctrl = shutdown.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("ctrl-c, shutting down");
        shutdown_ctrl.trigger();
    });

    let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
    let workers = pipeline.spawn(rx, cfg.workers, shutdown.clone());
    info!("{} pipeline workers started", cfg.workers);

    let queued = transport::feed_stdin(tx, shutdown).await?;
    for worker in workers {
        let _ = worker.await;
    }
    info!("done, {queued} envelopes processed");
    Ok(())
}

async fn build_router(cfg: &Config) -> Result<Router> {
    let mut router = Router::new();
    for channel in cfg.channels() {
        router = match channel {
            Channel::Direct => router.with(Arc::new(DirectSubmitter::new(cfg.rpc_url.clone()))),
            Channel::BundleRelay => {
                let url = cfg.block_engine_url.as_deref().unwrap_or_default();
                router.with(Arc::new(BundleSubmitter::new(url, cfg.bundle_variant)?))
            }
            Channel::PaidRelay => {
                let url = cfg.relay_ws_url.as_deref().unwrap_or_default();
                let token = cfg.relay_token.as_deref().unwrap_or_default();
                let mut clients = Vec::with_capacity(cfg.relay_pool_size);
                for _ in 0..cfg.relay_pool_size {
                    let client = RelayClient::new(url, token, cfg.relay_staked_rpcs);
                    if let Err(e) = client.connect().await {
                        warn!("relay connect failed, will retry on first send: {e}");
                    }
                    clients.push(client);
                }
                router.with(Arc::new(RelayPool::spawn(clients)))
            }
        };
        info!("submission channel {channel} ready");
    }
    Ok(router)
}
