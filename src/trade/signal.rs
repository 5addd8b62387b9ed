use solana_sdk::pubkey::Pubkey;

use super::ComputeUnits;
use crate::liquidity::PoolKeys;
use crate::storage::TradeAction;
use crate::submit::Channel;

/// Something the pipeline observed that a strategy may want to act on.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    /// Liquidity was pulled and the native reserve dropped under the floor.
    Drained {
        keys: PoolKeys,
        native_reserve: u64,
        signature: String,
    },
    /// Someone other than this bot swapped on a tracked venue.
    ThirdPartySwap {
        keys: PoolKeys,
        action: TradeAction,
        amount: i128,
        signer: Pubkey,
        signature: String,
    },
}

impl TriggerEvent {
    pub fn venue(&self) -> Pubkey {
        match self {
            TriggerEvent::Drained { keys, .. } | TriggerEvent::ThirdPartySwap { keys, .. } => {
                keys.id
            }
        }
    }
}

/// A swap the bot should send.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub keys: PoolKeys,
    pub action: TradeAction,
    pub amount_in: u64,
    pub min_out: u64,
    pub compute: ComputeUnits,
    pub channels: Vec<Channel>,
}

pub trait TradePolicy: Send + Sync {
    fn on_trigger(&self, event: &TriggerEvent) -> Option<TradeIntent>;
}

/// Observes and never trades.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPolicy;

impl TradePolicy for NoopPolicy {
    fn on_trigger(&self, _event: &TriggerEvent) -> Option<TradeIntent> {
        None
    }
}
