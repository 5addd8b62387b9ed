use anyhow::{anyhow, Result};
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use solana_sdk::{hash::Hash, pubkey::Pubkey};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc::UnboundedReceiver, Mutex, RwLock},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::coder::{
    decode_compute_budget, decode_instruction, decode_transfer, Instruction,
    SET_COMPUTE_UNIT_LIMIT, SET_COMPUTE_UNIT_PRICE, SYSTEM_TRANSFER,
};
use crate::constants::{
    BLOXROUTE_TIP, COMPUTE_BUDGET_PROGRAM, JITO_TIP_ACCOUNTS, OPENBOOK_ID, RAYDIUM_AMM_V4,
    SYSTEM_PROGRAM,
};
use crate::context::Context;
use crate::envelope::{CompiledIx, Envelope};
use crate::liquidity::PoolKeyResolver;
use crate::resolver::AddressResolver;
use crate::storage::{Trade, TradeAction, TradeStatus};
use crate::tracker::{Shutdown, Tracking};
use crate::trade::{Executor, NoopPolicy, TradePolicy, TriggerEvent};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

const INITIALIZE2_AMM_POSITION: usize = 4;
const WITHDRAW_AMM_POSITION: usize = 1;
const SWAP_AMM_POSITION: usize = 1;
const SWAP_MARKET_PROGRAM_POSITION: usize = 7;

/// Compute-budget and tip facts gathered while scanning one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFacts {
    pub compute_limit: u32,
    pub compute_price: u32,
    pub tip: Option<String>,
    pub tip_amount: i64,
}

/// What processing one envelope amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Duplicate,
    Done { trade_id: Option<i64> },
}

pub struct Pipeline {
    ctx: Context,
    resolver: AddressResolver,
    pools: PoolKeyResolver,
    tracking: Arc<Tracking>,
    policy: Arc<dyn TradePolicy>,
    executor: Option<Executor>,
    bot: Pubkey,
    seen: Arc<DashMap<String, ()>>,
    dedup_window: Duration,
    latest_blockhash: RwLock<Hash>,
}

impl Pipeline {
    pub fn new(ctx: &Context, tracking: Arc<Tracking>, bot: Pubkey) -> Self {
        Self {
            ctx: ctx.clone(),
            resolver: AddressResolver::new(ctx),
            pools: PoolKeyResolver::new(ctx),
            tracking,
            policy: Arc::new(NoopPolicy),
            executor: None,
            bot,
            seen: Arc::new(DashMap::new()),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            latest_blockhash: RwLock::new(Hash::default()),
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Installs the strategy hook and the executor its intents are sent through.
    pub fn with_policy(mut self, policy: Arc<dyn TradePolicy>, executor: Executor) -> Self {
        self.policy = policy;
        self.executor = Some(executor);
        self
    }

    pub fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    pub async fn latest_blockhash(&self) -> Hash {
        *self.latest_blockhash.read().await
    }

    /// Starts `workers` tasks draining the shared queue until it closes or shutdown fires.
    pub fn spawn(
        self: Arc<Self>,
        rx: UnboundedReceiver<Envelope>,
        workers: usize,
        shutdown: Shutdown,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(Mutex::new(rx));
        (0..workers.max(1))
            .map(|worker| {
                let pipeline = self.clone();
                let rx = rx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let next = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                env = rx.recv() => env,
                                _ = shutdown.notified() => None,
                            }
                        };
                        let Some(env) = next else {
                            debug!("worker {worker} stopping");
                            break;
                        };
                        pipeline.process(env).await;
                    }
                })
            })
            .collect()
    }

    /// First sighting of a signature within the window; later sightings are duplicates.
    fn first_sighting(&self, signature: &str) -> bool {
        match self.seen.entry(signature.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(());
                let seen = self.seen.clone();
                let key = signature.to_string();
                let window = self.dedup_window;
                tokio::spawn(async move {
                    sleep(window).await;
                    seen.remove(&key);
                });
                true
            }
        }
    }

    /// Handles one envelope. Failures are logged here and never escape to the worker.
    pub async fn process(&self, env: Envelope) -> Processed {
        if !self.first_sighting(&env.signature) {
            debug!("{} | duplicate, skipped", env.signature);
            return Processed::Duplicate;
        }
        if env.recent_blockhash != Hash::default() {
            let mut latest = self.latest_blockhash.write().await;
            *latest = env.recent_blockhash;
        }

        let mut facts = ScanFacts::default();
        let mut swap: Option<&CompiledIx> = None;

        for ix in &env.instructions {
            let Some(program) = env.program_id(ix) else {
                continue;
            };

            if program == RAYDIUM_AMM_V4 {
                match decode_instruction(&ix.data) {
                    Ok(Instruction::Initialize2 { .. }) => {
                        info!("Initialize2 | {} | {}", env.source, env.signature);
                        if let Err(e) = self.on_initialize(&env, ix).await {
                            warn!("{} | initialize2: {e}", env.signature);
                        }
                    }
                    Ok(Instruction::Withdraw { .. }) => {
                        info!("Withdraw | {} | {}", env.source, env.signature);
                        if let Err(e) = self.on_withdraw(&env, ix).await {
                            warn!("{} | withdraw: {e}", env.signature);
                        }
                    }
                    Ok(Instruction::SwapBaseIn { .. }) => swap = Some(ix),
                    Ok(_) => {}
                    Err(e) => debug!("{} | amm decode: {e}", env.signature),
                }
            } else if program == COMPUTE_BUDGET_PROGRAM {
                if let Instruction::ComputeBudget { op, value } = decode_compute_budget(&ix.data) {
                    match op {
                        SET_COMPUTE_UNIT_LIMIT => facts.compute_limit = value,
                        SET_COMPUTE_UNIT_PRICE => facts.compute_price = value,
                        _ => {}
                    }
                }
            } else if program == SYSTEM_PROGRAM {
                if let Some((label, amount)) = tip_attribution(&env, ix) {
                    facts.tip = Some(label.to_string());
                    facts.tip_amount = amount;
                }
            }
        }

        let trade_id = match swap {
            Some(ix) => match self.on_swap(&env, ix, &facts).await {
                Ok(id) => id,
                Err(e) => {
                    warn!("{} | swap: {e}", env.signature);
                    None
                }
            },
            None => None,
        };
        Processed::Done { trade_id }
    }

    async fn on_initialize(&self, env: &Envelope, ix: &CompiledIx) -> Result<()> {
        let venue = self
            .resolver
            .resolve(env, ix, INITIALIZE2_AMM_POSITION)
            .await?;
        if self.tracking.handle_initialize(&venue).await?.is_some() {
            info!("{venue} | Untracked because of initialize2");
        }
        Ok(())
    }

    async fn on_withdraw(&self, env: &Envelope, ix: &CompiledIx) -> Result<()> {
        let venue = self
            .resolver
            .resolve(env, ix, WITHDRAW_AMM_POSITION)
            .await?;
        let keys = self.pools.get_pool_keys(&venue).await?;

        sleep(self.tracking.policy().withdraw_settle).await;

        let reserve = self.pools.get_pool_native_balance(&keys).await?;
        if reserve > self.tracking.policy().liquidity_floor {
            info!("{venue} | Pool still have high balance");
            return Ok(());
        }

        if self.tracking.handle_withdraw(&venue, reserve).await?.is_some() {
            self.fire(TriggerEvent::Drained {
                keys,
                native_reserve: reserve,
                signature: env.signature.clone(),
            })
            .await;
        }
        Ok(())
    }

    async fn on_swap(
        &self,
        env: &Envelope,
        ix: &CompiledIx,
        facts: &ScanFacts,
    ) -> Result<Option<i64>> {
        let venue = self.resolver.resolve(env, ix, SWAP_AMM_POSITION).await?;
        let market_program = self
            .resolver
            .resolve(env, ix, SWAP_MARKET_PROGRAM_POSITION)
            .await?;

        let (source_at, destination_at, signer_at) = if market_program == OPENBOOK_ID {
            (15, 16, 17)
        } else {
            (14, 15, 16)
        };
        if signer_at >= ix.accounts.len() {
            return Err(anyhow!(
                "{venue} | Invalid data length ({})",
                ix.accounts.len()
            ));
        }
        let _source = self.resolver.resolve(env, ix, source_at).await?;
        let _destination = self.resolver.resolve(env, ix, destination_at).await?;
        let signer = self.resolver.resolve(env, ix, signer_at).await?;

        let keys = self.pools.get_pool_keys(&venue).await?;
        let (mint, _) = keys.get_mint()?;

        let status = self.tracking.status(&venue).await?;
        let own = signer == self.bot;
        if !status.is_tracked() && !own {
            return Ok(None);
        }

        let amount = env.pool_side_delta(&mint);
        let action = TradeAction::from_pool_delta(amount);
        let trade_status = if env.is_failed() {
            TradeStatus::Failed
        } else {
            TradeStatus::Success
        };

        let trade = Trade {
            amm_id: venue,
            mint,
            action,
            compute_limit: facts.compute_limit as u64,
            compute_price: facts.compute_price as u64,
            amount,
            signature: env.signature.clone(),
            tip: facts.tip.clone(),
            tip_amount: facts.tip_amount,
            status: trade_status,
            signer,
            timestamp: Utc::now().timestamp(),
        };
        let id = self.ctx.trades.insert(&trade).await?;
        info!(
            "{venue} | {} | {action} | {} | {} | {amount} | {}",
            env.signature,
            facts.compute_limit,
            facts.compute_price,
            facts.tip.as_deref().unwrap_or("-")
        );

        if own {
            let outcome = self
                .tracking
                .handle_self_swap(&venue, amount.unsigned_abs(), !env.is_failed())
                .await?;
            debug!("{venue} | {} | ledger {outcome:?}", env.signature);
        } else if status.is_tracked() {
            self.fire(TriggerEvent::ThirdPartySwap {
                keys,
                action,
                amount,
                signer,
                signature: env.signature.clone(),
            })
            .await;
        }
        Ok(Some(id))
    }

    async fn fire(&self, event: TriggerEvent) {
        let Some(intent) = self.policy.on_trigger(&event) else {
            return;
        };
        let Some(executor) = &self.executor else {
            error!("{} | policy produced an intent but no executor is set", event.venue());
            return;
        };
        let mut blockhash = self.latest_blockhash().await;
        if blockhash == Hash::default() {
            // nothing seen on the feed yet
            match self.ctx.rpc.get_latest_blockhash().await {
                Ok(hash) => blockhash = hash,
                Err(e) => {
                    error!("{} | no blockhash to sign with: {e}", event.venue());
                    return;
                }
            }
        }
        executor.execute(&intent, blockhash).await;
    }
}

/// `jito` or `bloxroute` with the amount when a system transfer pays a known tip account.
/// Only static keys are considered for the destination.
pub fn tip_attribution(env: &Envelope, ix: &CompiledIx) -> Option<(&'static str, i64)> {
    let Instruction::Transfer { op, amount } = decode_transfer(&ix.data) else {
        return None;
    };
    if op != SYSTEM_TRANSFER {
        return None;
    }
    let destination = ix
        .accounts
        .get(1)
        .and_then(|&i| env.account_keys.get(i as usize))?;

    if JITO_TIP_ACCOUNTS.contains(destination) {
        Some(("jito", amount))
    } else if *destination == BLOXROUTE_TIP {
        Some(("bloxroute", amount))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_env(destination: Pubkey, lamports: u64) -> (Envelope, CompiledIx) {
        let payer = Pubkey::new_unique();
        let mut data = SYSTEM_TRANSFER.to_le_bytes().to_vec();
        data.extend_from_slice(&lamports.to_le_bytes());
        let ix = CompiledIx {
            program_id_index: 2,
            accounts: vec![0, 1],
            data,
        };
        let env = Envelope {
            signature: "sig".into(),
            account_keys: vec![payer, destination, SYSTEM_PROGRAM],
            instructions: vec![ix.clone()],
            ..Default::default()
        };
        (env, ix)
    }

    #[test]
    fn tips_are_attributed_by_destination() {
        let (env, ix) = transfer_env(JITO_TIP_ACCOUNTS[3], 10_000);
        assert_eq!(tip_attribution(&env, &ix), Some(("jito", 10_000)));

        let (env, ix) = transfer_env(BLOXROUTE_TIP, 42);
        assert_eq!(tip_attribution(&env, &ix), Some(("bloxroute", 42)));

        let (env, ix) = transfer_env(Pubkey::new_unique(), 42);
        assert_eq!(tip_attribution(&env, &ix), None);
    }

    #[test]
    fn tip_destination_outside_static_keys_is_ignored() {
        let (env, mut ix) = transfer_env(BLOXROUTE_TIP, 42);
        ix.accounts = vec![0, 9];
        assert_eq!(tip_attribution(&env, &ix), None);
    }
}
