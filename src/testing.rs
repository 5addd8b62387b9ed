//! In-memory stand-ins for the remote ledger and submission channels, shared by the unit
//! and integration tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use solana_sdk::{hash::Hash, pubkey::Pubkey, transaction::VersionedTransaction};
use std::sync::{Arc, Mutex};

use crate::coder::LookupTableState;
use crate::context::Context;
use crate::error::SubmitError;
use crate::rpc::{AccountInfo, AccountReader};
use crate::storage::{MemoryStore, TradeStore};
use crate::submit::{Channel, SubmitOutcome, Submitter};

#[derive(Clone, Default)]
pub struct FakeRpc {
    accounts: Arc<DashMap<Pubkey, Vec<u8>>>,
    balances: Arc<DashMap<Pubkey, u64>>,
    reads: Arc<DashMap<Pubkey, usize>>,
    blockhash: Arc<Mutex<Hash>>,
}

impl FakeRpc {
    pub fn put_account(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.insert(address, data);
    }

    pub fn put_lookup_table(&self, address: Pubkey, addresses: Vec<Pubkey>) {
        let table = LookupTableState {
            deactivation_slot: u64::MAX,
            addresses,
            ..Default::default()
        };
        self.put_account(address, table.to_bytes());
    }

    pub fn put_balance(&self, address: Pubkey, lamports: u64) {
        self.balances.insert(address, lamports);
    }

    pub fn set_blockhash(&self, hash: Hash) {
        if let Ok(mut h) = self.blockhash.lock() {
            *h = hash;
        }
    }

    pub fn account_reads(&self, address: &Pubkey) -> usize {
        self.reads.get(address).map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl AccountReader for FakeRpc {
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<AccountInfo>> {
        *self.reads.entry(*address).or_insert(0) += 1;
        Ok(self.accounts.get(address).map(|data| AccountInfo {
            data: data.clone(),
            owner: Pubkey::default(),
            lamports: 0,
        }))
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        Ok(self.balances.get(address).map(|b| *b).unwrap_or(0))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.blockhash
            .lock()
            .map(|h| *h)
            .map_err(|_| anyhow!("blockhash lock poisoned"))
    }
}

pub fn context_with(rpc: FakeRpc) -> Result<Context> {
    Ok(Context::new(
        Arc::new(MemoryStore::new()),
        TradeStore::open_in_memory()?,
        Arc::new(rpc),
    ))
}

/// Records every transaction handed to it; optionally fails every call.
#[derive(Clone)]
pub struct RecordingSubmitter {
    channel: Channel,
    fail: bool,
    sent: Arc<Mutex<Vec<VersionedTransaction>>>,
}

impl RecordingSubmitter {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            fail: false,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(channel: Channel) -> Self {
        Self {
            fail: true,
            ..Self::new(channel)
        }
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn submit(&self, tx: &VersionedTransaction) -> Result<SubmitOutcome, SubmitError> {
        if self.fail {
            return Err(SubmitError::Rejected(format!("{} refused", self.channel)));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(tx.clone());
        }
        Ok(SubmitOutcome {
            channel: self.channel,
            signature: tx.signatures.first().map(|s| s.to_string()).unwrap_or_default(),
        })
    }
}
