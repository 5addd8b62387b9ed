use futures_util::future::join_all;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Keypair, signer::Signer};
use spl_associated_token_account::get_associated_token_address;
use std::sync::Arc;
use tracing::{info, warn};

use super::{make_swap_instructions, TradeIntent, TxOptions};
use crate::constants::WRAPPED_SOL;
use crate::error::SubmitError;
use crate::submit::{Channel, Router, SubmitOutcome};

/// Turns trade intents into signed transactions and sends them on every requested channel.
#[derive(Clone)]
pub struct Executor {
    payer: Arc<Keypair>,
    native_account: Pubkey,
    options: TxOptions,
    router: Router,
}

impl Executor {
    pub fn new(payer: Arc<Keypair>, options: TxOptions, router: Router) -> Self {
        let native_account = get_associated_token_address(&payer.pubkey(), &WRAPPED_SOL);
        Self {
            payer,
            native_account,
            options,
            router,
        }
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    /// Each channel gets its own transaction since the paid relay's carries a tip and memo.
    pub async fn execute(
        &self,
        intent: &TradeIntent,
        recent_blockhash: Hash,
    ) -> Vec<(Channel, Result<SubmitOutcome, SubmitError>)> {
        let venue = intent.keys.id;
        let sends = intent.channels.iter().map(|&channel| async move {
            let built = make_swap_instructions(
                &self.payer,
                &intent.keys,
                &self.native_account,
                intent.compute,
                &self.options,
                intent.amount_in,
                intent.min_out,
                intent.action,
                channel,
                recent_blockhash,
            );
            let res = match built {
                Ok((_, tx)) => self.router.submit(channel, &tx).await,
                Err(e) => Err(SubmitError::Build(e)),
            };
            match &res {
                Ok(out) => info!("{venue} | {channel} | {} sent {}", intent.action, out.signature),
                Err(e) => warn!("{venue} | {channel} | {} failed: {e}", intent.action),
            }
            (channel, res)
        });
        join_all(sends).await
    }
}
