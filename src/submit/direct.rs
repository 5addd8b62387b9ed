use async_trait::async_trait;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    transaction::VersionedTransaction,
};
use std::{sync::Arc, time::Duration};

use super::{Channel, SubmitOutcome, Submitter};
use crate::error::SubmitError;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: usize = 1;

/// Plain `sendTransaction` against an RPC node, preflight skipped.
pub struct DirectSubmitter {
    client: Arc<RpcClient>,
}

impl DirectSubmitter {
    pub fn new(rpc_url: String) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            rpc_url,
            SEND_TIMEOUT,
            CommitmentConfig::confirmed(),
        );
        Self {
            client: Arc::new(client),
        }
    }
}

#[async_trait]
impl Submitter for DirectSubmitter {
    fn channel(&self) -> Channel {
        Channel::Direct
    }

    async fn submit(&self, tx: &VersionedTransaction) -> Result<SubmitOutcome, SubmitError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            max_retries: Some(MAX_RETRIES),
            ..RpcSendTransactionConfig::default()
        };
        // base64 is the client's default wire encoding
        let signature = self.client.send_transaction_with_config(tx, config).await?;
        Ok(SubmitOutcome {
            channel: Channel::Direct,
            signature: signature.to_string(),
        })
    }
}
