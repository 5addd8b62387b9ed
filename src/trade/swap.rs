use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use solana_system_interface::instruction as system_instruction;

use crate::coder::encode_swap_instruction;
use crate::constants::{BLOXROUTE_MEMO_PROGRAM, BLOXROUTE_MEMO_TEXT, BLOXROUTE_TIP};
use crate::liquidity::{PoolKeys, AMM_VERSION};

/// `SwapBaseIn` against an AMM v4 venue. Target orders are only passed for version 4 pools.
pub fn swap_base_in(
    keys: &PoolKeys,
    source: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
    amount_in: u64,
    minimum_amount_out: u64,
) -> Instruction {
    let mut accounts = Vec::with_capacity(18);
    accounts.push(AccountMeta::new_readonly(spl_token::ID, false));
    accounts.push(AccountMeta::new(keys.id, false));
    accounts.push(AccountMeta::new_readonly(keys.authority, false));
    accounts.push(AccountMeta::new(keys.open_orders, false));
    if keys.version == AMM_VERSION {
        accounts.push(AccountMeta::new(keys.target_orders, false));
    }
    accounts.extend([
        AccountMeta::new(keys.base_vault, false),
        AccountMeta::new(keys.quote_vault, false),
        AccountMeta::new_readonly(keys.market_program_id, false),
        AccountMeta::new(keys.market_id, false),
        AccountMeta::new(keys.market_bids, false),
        AccountMeta::new(keys.market_asks, false),
        AccountMeta::new(keys.market_event_queue, false),
        AccountMeta::new(keys.market_base_vault, false),
        AccountMeta::new(keys.market_quote_vault, false),
        AccountMeta::new_readonly(keys.market_authority, false),
        AccountMeta::new(*source, false),
        AccountMeta::new(*destination, false),
        AccountMeta::new_readonly(*owner, true),
    ]);

    Instruction {
        program_id: keys.program_id,
        accounts,
        data: encode_swap_instruction(amount_in, minimum_amount_out),
    }
}

pub fn relay_tip(payer: &Pubkey, lamports: u64) -> Instruction {
    system_instruction::transfer(payer, &BLOXROUTE_TIP, lamports)
}

pub fn relay_memo() -> Instruction {
    Instruction {
        program_id: BLOXROUTE_MEMO_PROGRAM,
        accounts: vec![],
        data: BLOXROUTE_MEMO_TEXT.as_bytes().to_vec(),
    }
}
