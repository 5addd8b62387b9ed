mod instruction;
mod liquidity;
mod lookup;
mod market;

use borsh::BorshDeserialize;

use crate::error::DecodeError;

pub use instruction::{
    decode_compute_budget, decode_for_program, decode_instruction, decode_transfer,
    encode_swap_instruction, Instruction, INITIALIZE2, SET_COMPUTE_UNIT_LIMIT,
    SET_COMPUTE_UNIT_PRICE, SWAP_BASE_IN, SWAP_BASE_OUT, SYSTEM_TRANSFER, WITHDRAW,
};
pub use liquidity::LiquidityState;
pub use lookup::{LookupTableState, LOOKUP_TABLE_META_SIZE};
pub use market::MarketState;

/// Fixed-width on-chain account record.
pub trait AccountLayout: BorshDeserialize {
    const LEN: usize;
}

/// Decodes the first `T::LEN` bytes of `data`. Any buffer at least that long decodes;
/// feeding the wrong account type yields garbage, not an error.
pub fn decode_account<T: AccountLayout>(data: &[u8]) -> Result<T, DecodeError> {
    if data.len() < T::LEN {
        return Err(DecodeError::MalformedAccount {
            need: T::LEN,
            got: data.len(),
        });
    }
    let mut slice = &data[..T::LEN];
    T::deserialize(&mut slice).map_err(|e| DecodeError::Borsh(e.to_string()))
}
