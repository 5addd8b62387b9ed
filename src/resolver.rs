use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::debug;

use crate::coder::LookupTableState;
use crate::context::Context;
use crate::envelope::{CompiledIx, Envelope, TableLookup};
use crate::error::ResolveError;
use crate::rpc::AccountReader;
use crate::storage::{self, KeyValueStore, KEY_LOOKUP};

/// One slot of the flattened lookup reference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupRef {
    pub table: Pubkey,
    pub index: u8,
}

/// Per table, writable indexes first and then readonly, tables in message order.
pub fn flatten_lookups(lookups: &[TableLookup]) -> Vec<LookupRef> {
    lookups
        .iter()
        .flat_map(|l| {
            l.writable_indexes
                .iter()
                .chain(l.readonly_indexes.iter())
                .map(move |&index| LookupRef {
                    table: l.account_key,
                    index,
                })
        })
        .collect()
}

/// Turns message account indexes into addresses, loading lookup tables through the cache.
#[derive(Clone)]
pub struct AddressResolver {
    kv: Arc<dyn KeyValueStore>,
    rpc: Arc<dyn AccountReader>,
}

impl AddressResolver {
    pub fn new(ctx: &Context) -> Self {
        Self {
            kv: ctx.kv.clone(),
            rpc: ctx.rpc.clone(),
        }
    }

    /// Address of the account at `position` in the instruction's account list.
    pub async fn resolve(
        &self,
        envelope: &Envelope,
        ix: &CompiledIx,
        position: usize,
    ) -> Result<Pubkey, ResolveError> {
        if ix.accounts.is_empty() {
            return Err(ResolveError::NoAccountIndexes);
        }
        let account_index = *ix
            .accounts
            .get(position)
            .ok_or(ResolveError::IndexOutOfRange {
                index: position,
                len: ix.accounts.len(),
            })?;
        self.resolve_index(
            &envelope.account_keys,
            &envelope.address_table_lookups,
            account_index as usize,
        )
        .await
    }

    pub async fn resolve_index(
        &self,
        static_keys: &[Pubkey],
        lookups: &[TableLookup],
        account_index: usize,
    ) -> Result<Pubkey, ResolveError> {
        if let Some(key) = static_keys.get(account_index) {
            return Ok(*key);
        }

        let flattened = flatten_lookups(lookups);
        let offset = account_index - static_keys.len();
        let entry = flattened
            .get(offset)
            .ok_or(ResolveError::IndexOutOfRange {
                index: account_index,
                len: static_keys.len() + flattened.len(),
            })?;

        let table = self.get_lookup_table(&entry.table).await?;
        table
            .addresses
            .get(entry.index as usize)
            .copied()
            .ok_or(ResolveError::IndexOutOfRange {
                index: entry.index as usize,
                len: table.addresses.len(),
            })
    }

    /// Cache-first lookup table load; tables are cached with no expiry.
    pub async fn get_lookup_table(&self, table: &Pubkey) -> Result<LookupTableState, ResolveError> {
        let key = table.to_string();
        if let Some(cached) =
            storage::get_json::<LookupTableState>(self.kv.as_ref(), &key, KEY_LOOKUP).await?
        {
            return Ok(cached);
        }

        debug!("{table} | lookup table cache miss");
        let account = self
            .rpc
            .get_account_info(table)
            .await
            .map_err(ResolveError::Remote)?
            .ok_or(ResolveError::TableNotFound(*table))?;
        let state = LookupTableState::decode(&account.data)?;

        storage::set_json(self.kv.as_ref(), &key, KEY_LOOKUP, &state).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, FakeRpc};

    fn lookup(table: Pubkey, writable: Vec<u8>, readonly: Vec<u8>) -> TableLookup {
        TableLookup {
            account_key: table,
            writable_indexes: writable,
            readonly_indexes: readonly,
        }
    }

    #[test]
    fn flattening_order() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let flat = flatten_lookups(&[lookup(a, vec![1, 2], vec![9]), lookup(b, vec![], vec![0])]);
        let got: Vec<(Pubkey, u8)> = flat.iter().map(|r| (r.table, r.index)).collect();
        assert_eq!(got, vec![(a, 1), (a, 2), (a, 9), (b, 0)]);
    }

    #[tokio::test]
    async fn resolves_static_then_table_entries() {
        let statics: Vec<Pubkey> = (0..3).map(|_| Pubkey::new_unique()).collect();
        let table_key = Pubkey::new_unique();
        let addresses: Vec<Pubkey> = (0..10).map(|_| Pubkey::new_unique()).collect();

        let rpc = FakeRpc::default();
        rpc.put_lookup_table(table_key, addresses.clone());
        let ctx = context_with(rpc).unwrap();
        let resolver = AddressResolver::new(&ctx);
        let lookups = vec![lookup(table_key, vec![5, 7], vec![2])];

        assert_eq!(resolver.resolve_index(&statics, &lookups, 1).await.unwrap(), statics[1]);
        assert_eq!(resolver.resolve_index(&statics, &lookups, 3).await.unwrap(), addresses[5]);
        assert_eq!(resolver.resolve_index(&statics, &lookups, 4).await.unwrap(), addresses[7]);
        assert_eq!(resolver.resolve_index(&statics, &lookups, 5).await.unwrap(), addresses[2]);
        assert!(matches!(
            resolver.resolve_index(&statics, &lookups, 6).await,
            Err(ResolveError::IndexOutOfRange { index: 6, len: 6 })
        ));
    }

    #[tokio::test]
    async fn table_is_cached_after_first_read() {
        let table_key = Pubkey::new_unique();
        let rpc = FakeRpc::default();
        rpc.put_lookup_table(table_key, vec![Pubkey::new_unique()]);
        let ctx = context_with(rpc.clone()).unwrap();
        let resolver = AddressResolver::new(&ctx);

        resolver.get_lookup_table(&table_key).await.unwrap();
        resolver.get_lookup_table(&table_key).await.unwrap();
        assert_eq!(rpc.account_reads(&table_key), 1);
    }

    #[tokio::test]
    async fn missing_table_and_empty_accounts() {
        let ctx = context_with(FakeRpc::default()).unwrap();
        let resolver = AddressResolver::new(&ctx);
        let missing = Pubkey::new_unique();
        assert!(matches!(
            resolver.get_lookup_table(&missing).await,
            Err(ResolveError::TableNotFound(k)) if k == missing
        ));

        let env = Envelope::default();
        let ix = CompiledIx::default();
        assert!(matches!(
            resolver.resolve(&env, &ix, 0).await,
            Err(ResolveError::NoAccountIndexes)
        ));
    }
}
