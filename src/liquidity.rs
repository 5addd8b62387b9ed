use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::debug;

use crate::coder::{decode_account, LiquidityState, MarketState};
use crate::constants::{AMM_AUTHORITY_SEED, RAYDIUM_AMM_V4, WRAPPED_SOL};
use crate::context::Context;
use crate::error::PoolError;
use crate::rpc::AccountReader;
use crate::storage::{self, KeyValueStore, KEY_POOL_KEYS};

pub const AMM_VERSION: u8 = 4;
pub const MARKET_VERSION: u8 = 3;

/// Every account a swap against one AMM v4 venue needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolKeys {
    pub id: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub version: u8,
    pub program_id: Pubkey,
    pub authority: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub withdraw_queue: Pubkey,
    pub lp_vault: Pubkey,
    pub market_version: u8,
    pub market_program_id: Pubkey,
    pub market_id: Pubkey,
    pub market_authority: Pubkey,
    pub market_base_vault: Pubkey,
    pub market_quote_vault: Pubkey,
    pub market_bids: Pubkey,
    pub market_asks: Pubkey,
    pub market_event_queue: Pubkey,
}

impl PoolKeys {
    /// Combines the pool record and its market record into a full key set.
    pub fn assemble(id: Pubkey, pool: &LiquidityState, market: &MarketState) -> Self {
        let authority = amm_authority();
        let market_authority =
            market_authority(&pool.market_program_id, &pool.market_id, market.vault_signer_nonce)
                .unwrap_or(authority);

        Self {
            id,
            base_mint: pool.base_mint,
            quote_mint: pool.quote_mint,
            lp_mint: pool.lp_mint,
            base_decimals: pool.base_decimal as u8,
            quote_decimals: pool.quote_decimal as u8,
            version: AMM_VERSION,
            program_id: RAYDIUM_AMM_V4,
            authority,
            open_orders: pool.open_orders,
            target_orders: pool.target_orders,
            base_vault: pool.base_vault,
            quote_vault: pool.quote_vault,
            withdraw_queue: pool.withdraw_queue,
            lp_vault: pool.lp_vault,
            market_version: MARKET_VERSION,
            market_program_id: pool.market_program_id,
            market_id: pool.market_id,
            market_authority,
            market_base_vault: market.base_vault,
            market_quote_vault: market.quote_vault,
            market_bids: market.bids,
            market_asks: market.asks,
            market_event_queue: market.event_queue,
        }
    }

    /// The non-native mint, and whether the native asset is the base side.
    pub fn get_mint(&self) -> Result<(Pubkey, bool), PoolError> {
        if self.base_mint == WRAPPED_SOL {
            Ok((self.quote_mint, true))
        } else if self.quote_mint == WRAPPED_SOL {
            Ok((self.base_mint, false))
        } else {
            Err(PoolError::NeitherMintIsNative)
        }
    }
}

pub fn amm_authority() -> Pubkey {
    Pubkey::find_program_address(&[AMM_AUTHORITY_SEED], &RAYDIUM_AMM_V4).0
}

/// Vault signer of an order-book market; `None` if the nonce does not produce a valid address.
pub fn market_authority(market_program: &Pubkey, market: &Pubkey, nonce: u64) -> Option<Pubkey> {
    Pubkey::create_program_address(&[market.as_ref(), &nonce.to_le_bytes()], market_program).ok()
}

#[derive(Clone)]
pub struct PoolKeyResolver {
    kv: Arc<dyn KeyValueStore>,
    rpc: Arc<dyn AccountReader>,
}

impl PoolKeyResolver {
    pub fn new(ctx: &Context) -> Self {
        Self {
            kv: ctx.kv.clone(),
            rpc: ctx.rpc.clone(),
        }
    }

    /// Cache-first. Both account reads must succeed before anything is written back.
    pub async fn get_pool_keys(&self, venue: &Pubkey) -> Result<PoolKeys, PoolError> {
        let key = venue.to_string();
        if let Some(cached) =
            storage::get_json::<PoolKeys>(self.kv.as_ref(), &key, KEY_POOL_KEYS).await?
        {
            return Ok(cached);
        }

        debug!("{venue} | pool keys cache miss");
        let pool_data = self.read_account(venue).await?;
        let pool = decode_account::<LiquidityState>(&pool_data)?;
        let market_data = self.read_account(&pool.market_id).await?;
        let market = decode_account::<MarketState>(&market_data)?;

        let keys = PoolKeys::assemble(*venue, &pool, &market);
        storage::set_json(self.kv.as_ref(), &key, KEY_POOL_KEYS, &keys).await?;
        Ok(keys)
    }

    /// Lamports held by the vault on the native side of the pool.
    pub async fn get_pool_native_balance(&self, keys: &PoolKeys) -> Result<u64, PoolError> {
        let (_, is_base_quote) = keys.get_mint()?;
        let vault = if is_base_quote {
            keys.base_vault
        } else {
            keys.quote_vault
        };
        self.rpc.get_balance(&vault).await.map_err(PoolError::Remote)
    }

    async fn read_account(&self, address: &Pubkey) -> Result<Vec<u8>, PoolError> {
        self.rpc
            .get_account_info(address)
            .await
            .map_err(PoolError::Remote)?
            .map(|info| info.data)
            .ok_or(PoolError::AccountNotFound(*address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::OPENBOOK_ID;
    use crate::testing::{context_with, FakeRpc};

    fn fixture(base_mint: Pubkey, quote_mint: Pubkey) -> (Pubkey, LiquidityState, MarketState) {
        let market_id = Pubkey::new_unique();
        let pool = LiquidityState {
            base_decimal: 6,
            quote_decimal: 9,
            base_mint,
            quote_mint,
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            open_orders: Pubkey::new_unique(),
            target_orders: Pubkey::new_unique(),
            market_id,
            market_program_id: OPENBOOK_ID,
            ..Default::default()
        };
        let market = MarketState {
            own_address: market_id,
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            bids: Pubkey::new_unique(),
            asks: Pubkey::new_unique(),
            event_queue: Pubkey::new_unique(),
            ..Default::default()
        };
        (Pubkey::new_unique(), pool, market)
    }

    #[test]
    fn mint_selection() {
        let token = Pubkey::new_unique();
        let (venue, pool, market) = fixture(token, WRAPPED_SOL);
        let keys = PoolKeys::assemble(venue, &pool, &market);
        assert_eq!(keys.get_mint().unwrap(), (token, false));

        let (venue, pool, market) = fixture(WRAPPED_SOL, token);
        let keys = PoolKeys::assemble(venue, &pool, &market);
        assert_eq!(keys.get_mint().unwrap(), (token, true));

        let (venue, pool, market) = fixture(token, Pubkey::new_unique());
        let keys = PoolKeys::assemble(venue, &pool, &market);
        assert!(matches!(keys.get_mint(), Err(PoolError::NeitherMintIsNative)));
    }

    #[test]
    fn market_authority_falls_back_to_amm_authority() {
        let (venue, pool, market) = fixture(Pubkey::new_unique(), WRAPPED_SOL);
        let keys = PoolKeys::assemble(venue, &pool, &market);
        let derived = market_authority(&pool.market_program_id, &pool.market_id, 0);
        assert_eq!(keys.market_authority, derived.unwrap_or_else(amm_authority));
        assert_eq!(keys.authority, amm_authority());
        assert_eq!(keys.version, 4);
    }

    #[tokio::test]
    async fn resolves_and_caches_pool_keys() {
        let token = Pubkey::new_unique();
        let (venue, pool, market) = fixture(token, WRAPPED_SOL);
        let rpc = FakeRpc::default();
        rpc.put_account(venue, borsh::to_vec(&pool).unwrap());
        rpc.put_account(pool.market_id, borsh::to_vec(&market).unwrap());
        rpc.put_balance(pool.quote_vault, 5_000_000_000);

        let ctx = context_with(rpc.clone()).unwrap();
        let resolver = PoolKeyResolver::new(&ctx);
        let keys = resolver.get_pool_keys(&venue).await.unwrap();
        assert_eq!(keys.market_bids, market.bids);
        assert_eq!(keys.market_base_vault, market.base_vault);
        assert_eq!(keys.base_decimals, 6);

        let again = resolver.get_pool_keys(&venue).await.unwrap();
        assert_eq!(again, keys);
        assert_eq!(rpc.account_reads(&venue), 1);

        assert_eq!(
            resolver.get_pool_native_balance(&keys).await.unwrap(),
            5_000_000_000
        );
    }

    #[tokio::test]
    async fn missing_market_caches_nothing() {
        let (venue, pool, _) = fixture(Pubkey::new_unique(), WRAPPED_SOL);
        let rpc = FakeRpc::default();
        rpc.put_account(venue, borsh::to_vec(&pool).unwrap());

        let ctx = context_with(rpc).unwrap();
        let resolver = PoolKeyResolver::new(&ctx);
        assert!(matches!(
            resolver.get_pool_keys(&venue).await,
            Err(PoolError::AccountNotFound(k)) if k == pool.market_id
        ));
        assert_eq!(
            ctx.kv.hget(&venue.to_string(), KEY_POOL_KEYS).await.unwrap(),
            None
        );
    }
}
