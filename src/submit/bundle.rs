use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use reqwest::{
    header::{CONTENT_ENCODING, CONTENT_TYPE},
    Client as HttpClient,
};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::transaction::VersionedTransaction;
use std::{io::Write, time::Duration};
use tracing::debug;

use super::{Channel, SubmitOutcome, Submitter};
use crate::error::SubmitError;

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleVariant {
    /// `sendTransaction` to `/api/v1/transactions`, gzip body.
    Transaction,
    /// `sendBundle` to `/api/v1/bundles`, plain body.
    Bundle,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Block-engine HTTP relay.
pub struct BundleSubmitter {
    http: HttpClient,
    base_url: String,
    variant: BundleVariant,
}

impl BundleSubmitter {
    pub fn new(base_url: &str, variant: BundleVariant) -> Result<Self, SubmitError> {
        let http = HttpClient::builder().timeout(RELAY_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            variant,
        })
    }

    fn request_body(&self, encoded: String) -> Value {
        match self.variant {
            BundleVariant::Transaction => json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "sendTransaction",
                "params": [encoded]
            }),
            BundleVariant::Bundle => json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "sendBundle",
                "params": [[encoded]]
            }),
        }
    }
}

pub(crate) fn encode_base58(tx: &VersionedTransaction) -> Result<String, SubmitError> {
    Ok(bs58::encode(bincode::serialize(tx)?).into_string())
}

pub(crate) fn gzip(body: &[u8]) -> Result<Vec<u8>, SubmitError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

fn parse_response(body: &[u8]) -> Result<String, SubmitError> {
    let resp: RelayResponse = serde_json::from_slice(body)?;
    if let Some(err) = resp.error {
        return Err(SubmitError::Rejected(err.to_string()));
    }
    match resp.result {
        Some(Value::String(id)) => Ok(id),
        Some(other) => Ok(other.to_string()),
        None => Err(SubmitError::MissingResult),
    }
}

#[async_trait]
impl Submitter for BundleSubmitter {
    fn channel(&self) -> Channel {
        Channel::BundleRelay
    }

    async fn submit(&self, tx: &VersionedTransaction) -> Result<SubmitOutcome, SubmitError> {
        let body = serde_json::to_vec(&self.request_body(encode_base58(tx)?))?;

        let request = match self.variant {
            BundleVariant::Transaction => self
                .http
                .post(format!("{}/api/v1/transactions", self.base_url))
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_ENCODING, "gzip")
                .body(gzip(&body)?),
            BundleVariant::Bundle => self
                .http
                .post(format!("{}/api/v1/bundles", self.base_url))
                .header(CONTENT_TYPE, "application/json")
                .body(body),
        };

        let resp = request.send().await?;
        let bytes = resp.bytes().await?;
        let id = parse_response(&bytes)?;
        debug!("block engine accepted {:?}: {id}", self.variant);

        Ok(SubmitOutcome {
            channel: Channel::BundleRelay,
            signature: id,
        })
    }
}
