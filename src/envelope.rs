use serde::{Deserialize, Serialize};
use solana_sdk::{hash::Hash, pubkey::Pubkey};

use crate::constants::RAYDIUM_AUTHORITY;

/// One decoded transaction as delivered by the event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub source: String,
    pub signature: String,
    #[serde(with = "b58::pubkeys")]
    pub account_keys: Vec<Pubkey>,
    #[serde(with = "b58::hash")]
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledIx>,
    #[serde(default)]
    pub inner_instructions: Vec<InnerInstructions>,
    #[serde(default)]
    pub address_table_lookups: Vec<TableLookup>,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub compute_units_consumed: u64,
    #[serde(default)]
    pub slot: u64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledIx {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    #[serde(with = "b58::bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerInstructions {
    pub index: u8,
    pub instructions: Vec<CompiledIx>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLookup {
    #[serde(with = "b58::pubkey")]
    pub account_key: Pubkey,
    pub writable_indexes: Vec<u8>,
    pub readonly_indexes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub account_index: u8,
    #[serde(with = "b58::pubkey")]
    pub mint: Pubkey,
    #[serde(default, with = "b58::opt_pubkey")]
    pub owner: Option<Pubkey>,
    /// Raw integer amount as a decimal string.
    pub amount: String,
}

impl Envelope {
    pub fn is_failed(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Program ids are always static keys in a compiled message.
    pub fn program_id(&self, ix: &CompiledIx) -> Option<Pubkey> {
        self.account_keys.get(ix.program_id_index as usize).copied()
    }

    /// Pre minus post of `mint` held by the AMM authority. Positive means the pool paid out.
    /// Zero unless both sides carry a parsable entry.
    pub fn pool_side_delta(&self, mint: &Pubkey) -> i128 {
        let amount = |balances: &[TokenBalance]| -> Option<i128> {
            balances
                .iter()
                .find(|b| b.mint == *mint && b.owner == Some(RAYDIUM_AUTHORITY))
                .and_then(|b| b.amount.parse::<i128>().ok())
        };
        match (amount(&self.pre_token_balances), amount(&self.post_token_balances)) {
            (Some(pre), Some(post)) => pre - post,
            _ => 0,
        }
    }
}

/// Base58 text forms for keys and instruction data in the JSON feed.
pub(crate) mod b58 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use solana_sdk::{hash::Hash, pubkey::Pubkey};
    use std::str::FromStr;

    pub mod pubkey {
        use super::*;

        pub fn serialize<S: Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&key.to_string())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Pubkey, D::Error> {
            let raw = String::deserialize(d)?;
            Pubkey::from_str(&raw).map_err(D::Error::custom)
        }
    }

    pub mod opt_pubkey {
        use super::*;

        pub fn serialize<S: Serializer>(key: &Option<Pubkey>, s: S) -> Result<S::Ok, S::Error> {
            match key {
                Some(k) => s.serialize_str(&k.to_string()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Pubkey>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) if !raw.is_empty() => {
                    Pubkey::from_str(&raw).map(Some).map_err(D::Error::custom)
                }
                _ => Ok(None),
            }
        }
    }

    pub mod pubkeys {
        use super::*;
        use serde::ser::SerializeSeq;

        pub fn serialize<S: Serializer>(keys: &[Pubkey], s: S) -> Result<S::Ok, S::Error> {
            let mut seq = s.serialize_seq(Some(keys.len()))?;
            for key in keys {
                seq.serialize_element(&key.to_string())?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Pubkey>, D::Error> {
            Vec::<String>::deserialize(d)?
                .iter()
                .map(|raw| Pubkey::from_str(raw).map_err(D::Error::custom))
                .collect()
        }
    }

    pub mod hash {
        use super::*;

        pub fn serialize<S: Serializer>(hash: &Hash, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&hash.to_string())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash, D::Error> {
            let raw = String::deserialize(d)?;
            Hash::from_str(&raw).map_err(D::Error::custom)
        }
    }

    pub mod bytes {
        use super::*;

        pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&bs58::encode(data).into_string())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
            let raw = String::deserialize(d)?;
            bs58::decode(&raw).into_vec().map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_feed_json() {
        let payer = Pubkey::new_unique();
        let amm = Pubkey::new_unique();
        let table = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let raw = json!({
            "source": "geyser",
            "signature": "5sig",
            "account_keys": [payer.to_string(), amm.to_string()],
            "recent_blockhash": Hash::new_unique().to_string(),
            "instructions": [
                { "program_id_index": 1, "accounts": [0, 2], "data": bs58::encode([4u8, 1]).into_string() }
            ],
            "address_table_lookups": [
                { "account_key": table.to_string(), "writable_indexes": [5], "readonly_indexes": [] }
            ],
            "pre_token_balances": [
                { "account_index": 2, "mint": mint.to_string(), "owner": RAYDIUM_AUTHORITY.to_string(), "amount": "1000" }
            ],
            "post_token_balances": [
                { "account_index": 2, "mint": mint.to_string(), "owner": RAYDIUM_AUTHORITY.to_string(), "amount": "400" }
            ],
            "slot": 42,
            "error": null
        });

        let env: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.account_keys[0], payer);
        assert_eq!(env.program_id(&env.instructions[0]), Some(amm));
        assert_eq!(env.instructions[0].data, vec![4, 1]);
        assert_eq!(env.address_table_lookups[0].account_key, table);
        assert!(!env.is_failed());
        assert_eq!(env.pool_side_delta(&mint), 600);
    }

    fn authority_balance(mint: Pubkey, amount: &str) -> TokenBalance {
        TokenBalance {
            account_index: 4,
            mint,
            owner: Some(RAYDIUM_AUTHORITY),
            amount: amount.into(),
        }
    }

    #[test]
    fn delta_ignores_other_owners() {
        let mint = Pubkey::new_unique();
        let env = Envelope {
            pre_token_balances: vec![
                TokenBalance {
                    account_index: 3,
                    mint,
                    owner: Some(Pubkey::new_unique()),
                    amount: "50".into(),
                },
                authority_balance(mint, "100"),
            ],
            post_token_balances: vec![authority_balance(mint, "170")],
            error: Some("InstructionError".into()),
            ..Default::default()
        };
        assert_eq!(env.pool_side_delta(&mint), -70);
        assert!(env.is_failed());
    }

    #[test]
    fn delta_is_zero_when_a_side_is_missing_or_unparsable() {
        let mint = Pubkey::new_unique();
        let no_pre = Envelope {
            post_token_balances: vec![authority_balance(mint, "987654321")],
            ..Default::default()
        };
        assert_eq!(no_pre.pool_side_delta(&mint), 0);

        let no_post = Envelope {
            pre_token_balances: vec![authority_balance(mint, "987654321")],
            ..Default::default()
        };
        assert_eq!(no_post.pool_side_delta(&mint), 0);

        let garbled = Envelope {
            pre_token_balances: vec![authority_balance(mint, "12x")],
            post_token_balances: vec![authority_balance(mint, "500")],
            ..Default::default()
        };
        assert_eq!(garbled.pool_side_delta(&mint), 0);
    }
}
