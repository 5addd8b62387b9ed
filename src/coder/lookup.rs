use serde::{Deserialize, Serialize};
use solana_sdk::{address_lookup_table::state::AddressLookupTable, pubkey::Pubkey};

use crate::error::DecodeError;

pub use solana_sdk::address_lookup_table::state::LOOKUP_TABLE_META_SIZE;

/// Cached form of an address lookup table account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupTableState {
    pub deactivation_slot: u64,
    pub last_extended_slot: u64,
    pub last_extended_slot_start_index: u8,
    pub authority: Option<Pubkey>,
    pub addresses: Vec<Pubkey>,
}

impl LookupTableState {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let table = AddressLookupTable::deserialize(data).map_err(DecodeError::LookupTable)?;
        Ok(Self {
            deactivation_slot: table.meta.deactivation_slot,
            last_extended_slot: table.meta.last_extended_slot,
            last_extended_slot_start_index: table.meta.last_extended_slot_start_index,
            authority: table.meta.authority,
            addresses: table.addresses.to_vec(),
        })
    }

    /// On-chain account bytes for this table, used to seed fake account readers.
    #[cfg(any(test, feature = "testing"))]
    pub fn to_bytes(&self) -> Vec<u8> {
        const LOOKUP_TABLE_TYPE_INDEX: u32 = 1;
        let mut out = Vec::with_capacity(LOOKUP_TABLE_META_SIZE + self.addresses.len() * 32);
        out.extend_from_slice(&LOOKUP_TABLE_TYPE_INDEX.to_le_bytes());
        out.extend_from_slice(&self.deactivation_slot.to_le_bytes());
        out.extend_from_slice(&self.last_extended_slot.to_le_bytes());
        out.push(self.last_extended_slot_start_index);
        match &self.authority {
            Some(authority) => {
                out.push(1);
                out.extend_from_slice(authority.as_ref());
            }
            None => out.push(0),
        }
        out.resize(LOOKUP_TABLE_META_SIZE, 0);
        for address in &self.addresses {
            out.extend_from_slice(address.as_ref());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::InstructionError;

    #[test]
    fn decodes_meta_and_addresses() {
        let table = LookupTableState {
            deactivation_slot: u64::MAX,
            last_extended_slot: 250_000_000,
            last_extended_slot_start_index: 4,
            authority: Some(Pubkey::new_unique()),
            addresses: (0..8).map(|_| Pubkey::new_unique()).collect(),
        };
        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), LOOKUP_TABLE_META_SIZE + 8 * 32);
        assert_eq!(LookupTableState::decode(&bytes).unwrap(), table);
    }

    #[test]
    fn frozen_table_has_no_authority() {
        let table = LookupTableState {
            addresses: vec![Pubkey::new_unique()],
            ..Default::default()
        };
        let decoded = LookupTableState::decode(&table.to_bytes()).unwrap();
        assert_eq!(decoded.authority, None);
        assert_eq!(decoded.addresses, table.addresses);
    }

    #[test]
    fn rejects_short_and_uninitialized() {
        assert!(matches!(
            LookupTableState::decode(&[1, 0, 0]),
            Err(DecodeError::LookupTable(_))
        ));
        let mut bytes = LookupTableState::default().to_bytes();
        bytes[0] = 0;
        assert_eq!(
            LookupTableState::decode(&bytes),
            Err(DecodeError::LookupTable(InstructionError::UninitializedAccount))
        );
    }
}
