mod bundle;
mod direct;
mod relay;

use async_trait::async_trait;
use futures_util::future::join_all;
use solana_sdk::transaction::VersionedTransaction;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use tracing::{info, warn};

use crate::error::SubmitError;

pub use bundle::{BundleSubmitter, BundleVariant};
pub use direct::DirectSubmitter;
pub use relay::{RelayClient, RelayPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Direct,
    BundleRelay,
    PaidRelay,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Direct => "rpc",
            Channel::BundleRelay => "jito",
            Channel::PaidRelay => "bloxroute",
        }
    }

    /// Comma-separated channel list, e.g. `rpc,jito`.
    pub fn parse_list(raw: &str) -> anyhow::Result<Vec<Channel>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Channel::from_str)
            .collect()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rpc" | "direct" => Ok(Channel::Direct),
            "jito" | "bundle" => Ok(Channel::BundleRelay),
            "bloxroute" | "relay" => Ok(Channel::PaidRelay),
            other => Err(anyhow::anyhow!("unknown submission channel {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub channel: Channel,
    /// Transaction signature, or the relay's bundle id for bundle submissions.
    pub signature: String,
}

#[async_trait]
pub trait Submitter: Send + Sync {
    fn channel(&self) -> Channel;
    async fn submit(&self, tx: &VersionedTransaction) -> Result<SubmitOutcome, SubmitError>;
}

/// Fans signed transactions out to the configured channels.
#[derive(Clone, Default)]
pub struct Router {
    submitters: HashMap<Channel, Arc<dyn Submitter>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, submitter: Arc<dyn Submitter>) -> Self {
        self.submitters.insert(submitter.channel(), submitter);
        self
    }

    pub fn has(&self, channel: Channel) -> bool {
        self.submitters.contains_key(&channel)
    }

    pub async fn submit(
        &self,
        channel: Channel,
        tx: &VersionedTransaction,
    ) -> Result<SubmitOutcome, SubmitError> {
        let submitter = self
            .submitters
            .get(&channel)
            .ok_or(SubmitError::NotConfigured(channel.as_str()))?;
        submitter.submit(tx).await
    }

    /// Sends on every listed channel at once; one channel failing does not affect the others.
    pub async fn race(
        &self,
        channels: &[Channel],
        tx: &VersionedTransaction,
    ) -> Vec<(Channel, Result<SubmitOutcome, SubmitError>)> {
        let sends = channels.iter().map(|&channel| async move {
            let res = self.submit(channel, tx).await;
            match &res {
                Ok(out) => info!("{channel} | submitted {}", out.signature),
                Err(e) => warn!("{channel} | submit failed: {e}"),
            }
            (channel, res)
        });
        join_all(sends).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSubmitter;
    use solana_sdk::{
        hash::Hash, message::Message, signature::Keypair, signer::Signer,
        transaction::Transaction,
    };

    fn signed_tx() -> VersionedTransaction {
        let payer = Keypair::new();
        let ix = solana_system_interface::instruction::transfer(&payer.pubkey(), &payer.pubkey(), 1);
        let msg = Message::new(&[ix], Some(&payer.pubkey()));
        Transaction::new(&[&payer], msg, Hash::new_unique()).into()
    }

    #[test]
    fn channel_names() {
        assert_eq!(
            Channel::parse_list("rpc, jito,bloxroute").unwrap(),
            vec![Channel::Direct, Channel::BundleRelay, Channel::PaidRelay]
        );
        assert!(Channel::parse_list("rpc,carrier-pigeon").is_err());
        assert!(Channel::parse_list("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn race_isolates_channel_failures() {
        let direct = RecordingSubmitter::new(Channel::Direct);
        let bundle = RecordingSubmitter::failing(Channel::BundleRelay);
        let router = Router::new()
            .with(Arc::new(direct.clone()))
            .with(Arc::new(bundle));

        let tx = signed_tx();
        let results = router
            .race(&[Channel::Direct, Channel::BundleRelay, Channel::PaidRelay], &tx)
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(SubmitError::Rejected(_))));
        assert!(matches!(results[2].1, Err(SubmitError::NotConfigured("bloxroute"))));
        assert_eq!(direct.sent().len(), 1);
        assert_eq!(
            results[0].1.as_ref().unwrap().signature,
            tx.signatures[0].to_string()
        );
    }
}
