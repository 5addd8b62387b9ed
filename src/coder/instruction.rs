use crate::constants::{COMPUTE_BUDGET_PROGRAM, RAYDIUM_AMM_V4, SYSTEM_PROGRAM};
use crate::error::DecodeError;
use solana_sdk::pubkey::Pubkey;

pub const INITIALIZE2: u8 = 1;
pub const WITHDRAW: u8 = 4;
pub const SWAP_BASE_IN: u8 = 9;
pub const SWAP_BASE_OUT: u8 = 11;

pub const SET_COMPUTE_UNIT_LIMIT: u8 = 2;
pub const SET_COMPUTE_UNIT_PRICE: u8 = 3;
pub const SYSTEM_TRANSFER: u32 = 2;

/// Every instruction shape the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Initialize2 {
        nonce: u8,
        open_time: u64,
        init_pc_amount: u64,
        init_coin_amount: u64,
    },
    Withdraw {
        amount: u64,
    },
    SwapBaseIn {
        amount_in: u64,
        minimum_amount_out: u64,
    },
    SwapBaseOut {
        max_amount_in: u64,
        amount_out: u64,
    },
    ComputeBudget {
        op: u8,
        value: u32,
    },
    Transfer {
        op: u32,
        amount: i64,
    },
}

/// Little-endian reader that yields zeroes past the end of the buffer.
struct LeReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let start = self.pos.min(self.data.len());
        let end = (self.pos + N).min(self.data.len());
        out[..end - start].copy_from_slice(&self.data[start..end]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }
}

/// Decodes AMM v4 instruction data. The first byte selects the variant.
pub fn decode_instruction(data: &[u8]) -> Result<Instruction, DecodeError> {
    let mut r = LeReader::new(data);
    let tag = r.u8();
    if data.is_empty() {
        return Err(DecodeError::UnknownInstruction(tag));
    }

    match tag {
        INITIALIZE2 => Ok(Instruction::Initialize2 {
            nonce: r.u8(),
            open_time: r.u64(),
            init_pc_amount: r.u64(),
            init_coin_amount: r.u64(),
        }),
        WITHDRAW => Ok(Instruction::Withdraw { amount: r.u64() }),
        SWAP_BASE_IN => Ok(Instruction::SwapBaseIn {
            amount_in: r.u64(),
            minimum_amount_out: r.u64(),
        }),
        SWAP_BASE_OUT => Ok(Instruction::SwapBaseOut {
            max_amount_in: r.u64(),
            amount_out: r.u64(),
        }),
        other => Err(DecodeError::UnknownInstruction(other)),
    }
}

pub fn decode_compute_budget(data: &[u8]) -> Instruction {
    let mut r = LeReader::new(data);
    Instruction::ComputeBudget {
        op: r.u8(),
        value: r.u32(),
    }
}

pub fn decode_transfer(data: &[u8]) -> Instruction {
    let mut r = LeReader::new(data);
    Instruction::Transfer {
        op: r.u32(),
        amount: r.i64(),
    }
}

/// Routes instruction data to the decoder for its owning program.
pub fn decode_for_program(program_id: &Pubkey, data: &[u8]) -> Result<Instruction, DecodeError> {
    if *program_id == RAYDIUM_AMM_V4 {
        decode_instruction(data)
    } else if *program_id == COMPUTE_BUDGET_PROGRAM {
        Ok(decode_compute_budget(data))
    } else if *program_id == SYSTEM_PROGRAM {
        Ok(decode_transfer(data))
    } else {
        Err(DecodeError::UnsupportedProgram(*program_id))
    }
}

/// `[9] ++ le64(amount_in) ++ le64(min_out)`
pub fn encode_swap_instruction(amount_in: u64, minimum_amount_out: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(17);
    data.push(SWAP_BASE_IN);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&minimum_amount_out.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn swap_base_in_round_trips(amount_in in any::<u64>(), min_out in any::<u64>()) {
            let data = encode_swap_instruction(amount_in, min_out);
            prop_assert_eq!(data.len(), 17);
            prop_assert_eq!(
                decode_instruction(&data).unwrap(),
                Instruction::SwapBaseIn { amount_in, minimum_amount_out: min_out }
            );
        }
    }

    #[test]
    fn swap_base_in_is_byte_exact() {
        let data = encode_swap_instruction(1_000_000, 5);
        assert_eq!(data.len(), 17);
        assert_eq!(data[0], 9);
        assert_eq!(&data[1..9], &[0x40, 0x42, 0x0f, 0, 0, 0, 0, 0]);
        assert_eq!(&data[9..17], &[5, 0, 0, 0, 0, 0, 0, 0]);

        assert_eq!(
            decode_instruction(&data).unwrap(),
            Instruction::SwapBaseIn {
                amount_in: 1_000_000,
                minimum_amount_out: 5
            }
        );
    }

    #[test]
    fn unknown_discriminator_is_rejected() {
        assert_eq!(
            decode_instruction(&[7, 1, 2, 3]),
            Err(DecodeError::UnknownInstruction(7))
        );
        assert_eq!(decode_instruction(&[]), Err(DecodeError::UnknownInstruction(0)));
    }

    #[test]
    fn short_buffers_read_zero() {
        assert_eq!(
            decode_instruction(&[4, 0x10]).unwrap(),
            Instruction::Withdraw { amount: 0x10 }
        );
        assert_eq!(
            decode_instruction(&[9]).unwrap(),
            Instruction::SwapBaseIn {
                amount_in: 0,
                minimum_amount_out: 0
            }
        );
    }

    #[test]
    fn initialize2_fields() {
        let mut data = vec![1u8, 254];
        data.extend_from_slice(&1_700_000_000u64.to_le_bytes());
        data.extend_from_slice(&500u64.to_le_bytes());
        data.extend_from_slice(&42u64.to_le_bytes());
        assert_eq!(
            decode_instruction(&data).unwrap(),
            Instruction::Initialize2 {
                nonce: 254,
                open_time: 1_700_000_000,
                init_pc_amount: 500,
                init_coin_amount: 42
            }
        );
    }

    #[test]
    fn swap_base_out_fields() {
        let mut data = vec![11u8];
        data.extend_from_slice(&99u64.to_le_bytes());
        data.extend_from_slice(&7u64.to_le_bytes());
        assert_eq!(
            decode_instruction(&data).unwrap(),
            Instruction::SwapBaseOut {
                max_amount_in: 99,
                amount_out: 7
            }
        );
    }

    #[test]
    fn compute_budget_and_transfer() {
        let mut cu = vec![SET_COMPUTE_UNIT_LIMIT];
        cu.extend_from_slice(&200_000u32.to_le_bytes());
        assert_eq!(
            decode_for_program(&COMPUTE_BUDGET_PROGRAM, &cu).unwrap(),
            Instruction::ComputeBudget {
                op: 2,
                value: 200_000
            }
        );

        let mut transfer = SYSTEM_TRANSFER.to_le_bytes().to_vec();
        transfer.extend_from_slice(&10_000i64.to_le_bytes());
        assert_eq!(
            decode_for_program(&SYSTEM_PROGRAM, &transfer).unwrap(),
            Instruction::Transfer {
                op: 2,
                amount: 10_000
            }
        );

        let other = Pubkey::new_unique();
        assert_eq!(
            decode_for_program(&other, &[1]),
            Err(DecodeError::UnsupportedProgram(other))
        );
    }
}
