pub mod executor;
pub mod signal;
pub mod swap;

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};

use crate::error::BuildError;
use crate::liquidity::PoolKeys;
use crate::storage::TradeAction;
use crate::submit::Channel;

pub use executor::Executor;
pub use signal::{NoopPolicy, TradeIntent, TradePolicy, TriggerEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeUnits {
    pub limit: u32,
    pub price: u64,
}

/// Per-process assembly settings.
#[derive(Debug, Clone, Default)]
pub struct TxOptions {
    /// Lamports paid to the paid relay; zero skips the tip transfer.
    pub tip_lamports: u64,
    pub lookup_table: Option<AddressLookupTableAccount>,
}

/// Instruction list for one swap, before compilation.
#[allow(clippy::too_many_arguments)]
pub fn swap_instructions(
    payer: &Pubkey,
    keys: &PoolKeys,
    native_account: &Pubkey,
    compute: ComputeUnits,
    options: &TxOptions,
    amount_in: u64,
    min_out: u64,
    action: TradeAction,
    channel: Channel,
) -> Result<Vec<Instruction>, BuildError> {
    let (mint, _) = keys.get_mint()?;
    let token_account = get_associated_token_address(payer, &mint);

    let mut ixs = Vec::with_capacity(7);
    if compute.limit > 0 {
        ixs.push(ComputeBudgetInstruction::set_compute_unit_limit(compute.limit));
    }
    if compute.price > 0 {
        ixs.push(ComputeBudgetInstruction::set_compute_unit_price(compute.price));
    }

    let (source, destination) = match action {
        TradeAction::Buy => {
            ixs.push(create_associated_token_account_idempotent(
                payer,
                payer,
                &mint,
                &spl_token::ID,
            ));
            (*native_account, token_account)
        }
        TradeAction::Sell => (token_account, *native_account),
    };
    ixs.push(swap::swap_base_in(
        keys,
        &source,
        &destination,
        payer,
        amount_in,
        min_out,
    ));

    if channel == Channel::PaidRelay {
        if options.tip_lamports > 0 {
            ixs.push(swap::relay_tip(payer, options.tip_lamports));
        }
        ixs.push(swap::relay_memo());
    }
    Ok(ixs)
}

/// Builds and signs a v0 swap transaction for one submission channel.
#[allow(clippy::too_many_arguments)]
pub fn make_swap_instructions(
    payer: &Keypair,
    keys: &PoolKeys,
    native_account: &Pubkey,
    compute: ComputeUnits,
    options: &TxOptions,
    amount_in: u64,
    min_out: u64,
    action: TradeAction,
    channel: Channel,
    recent_blockhash: Hash,
) -> Result<(Vec<Signature>, VersionedTransaction), BuildError> {
    let ixs = swap_instructions(
        &payer.pubkey(),
        keys,
        native_account,
        compute,
        options,
        amount_in,
        min_out,
        action,
        channel,
    )?;

    let tables: Vec<AddressLookupTableAccount> = options.lookup_table.iter().cloned().collect();
    let message = v0::Message::try_compile(&payer.pubkey(), &ixs, &tables, recent_blockhash)?;
    let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[payer])?;
    Ok((tx.signatures.clone(), tx))
}
