use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use solana_sdk::{hash::Hash, pubkey::Pubkey};
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{sync::Mutex, time::sleep};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub data: Vec<u8>,
    pub owner: Pubkey,
    pub lamports: u64,
}

/// Remote ledger reads the pipeline depends on.
#[async_trait]
pub trait AccountReader: Send + Sync {
    /// `None` when the account does not exist.
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<AccountInfo>>;
    async fn get_balance(&self, address: &Pubkey) -> Result<u64>;
    async fn get_latest_blockhash(&self) -> Result<Hash>;
}

#[derive(Clone)]
pub struct HttpRateLimiter {
    min_interval: Duration,
    last: Arc<Mutex<Instant>>,
}

impl HttpRateLimiter {
    pub fn new(max_per_sec: u32) -> Self {
        let min_interval = Duration::from_millis((1000u64 / max_per_sec.max(1) as u64).max(1));
        let now = Instant::now();
        Self {
            min_interval,
            last: Arc::new(Mutex::new(now.checked_sub(min_interval).unwrap_or(now))),
        }
    }

    async fn throttle(&self) {
        let mut last = self.last.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

/// JSON-RPC over HTTP, throttled to a fixed request rate.
#[derive(Clone)]
pub struct HttpRpc {
    url: String,
    client: HttpClient,
    limiter: HttpRateLimiter,
    id: Arc<AtomicU64>,
}

impl HttpRpc {
    pub fn new(url: String, limiter: HttpRateLimiter) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            url,
            client,
            limiter,
            id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.limiter.throttle().await;

        let id = self.id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("HTTP RPC request {method}"))?;

        let status = resp.status();
        let v: Value = resp.json().await.context("HTTP RPC parse json")?;

        if !status.is_success() {
            return Err(anyhow!("HTTP RPC {method} status={status} body={v}"));
        }

        if let Some(err) = v.get("error") {
            return Err(anyhow!("RPC error on {method}: {err}"));
        }

        v.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("RPC {method} missing result: {v}"))
    }
}

#[async_trait]
impl AccountReader for HttpRpc {
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<AccountInfo>> {
        let res = self
            .call(
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": "confirmed" }
                ]),
            )
            .await?;
        parse_account_info(&res)
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        let res = self
            .call(
                "getBalance",
                json!([address.to_string(), { "commitment": "confirmed" }]),
            )
            .await?;
        res.get("value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("getBalance unexpected: {res}"))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        let res = self
            .call("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
            .await?;
        let raw = res
            .get("value")
            .and_then(|v| v.get("blockhash"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("getLatestBlockhash unexpected: {res}"))?;
        Hash::from_str(raw).map_err(|e| anyhow!("bad blockhash {raw}: {e}"))
    }
}

fn parse_account_info(res: &Value) -> Result<Option<AccountInfo>> {
    let value = match res.get("value") {
        Some(v) if !v.is_null() => v,
        _ => return Ok(None),
    };

    let data = value
        .get("data")
        .ok_or_else(|| anyhow!("account missing data: {value}"))?;
    let owner = value
        .get("owner")
        .and_then(|o| o.as_str())
        .ok_or_else(|| anyhow!("account missing owner: {value}"))?;

    Ok(Some(AccountInfo {
        data: decode_base64_data_field(data)?,
        owner: Pubkey::from_str(owner).context("bad owner pubkey")?,
        lamports: value.get("lamports").and_then(|l| l.as_u64()).unwrap_or(0),
    }))
}

fn decode_base64_data_field(v: &Value) -> Result<Vec<u8>> {
    // ["<base64>", "base64"] or a bare string
    if let Some(arr) = v.as_array() {
        let b64 = arr
            .first()
            .and_then(|x| x.as_str())
            .ok_or_else(|| anyhow!("base64 data[0] missing: {v}"))?;
        return base64::engine::general_purpose::STANDARD
            .decode(b64)
            .context("base64 decode");
    }

    if let Some(s) = v.as_str() {
        return base64::engine::general_purpose::STANDARD
            .decode(s)
            .context("base64 decode");
    }

    Err(anyhow!("unexpected base64 field: {v}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_account_is_none() {
        let res = json!({ "context": { "slot": 1 }, "value": null });
        assert_eq!(parse_account_info(&res).unwrap(), None);
    }

    #[test]
    fn account_info_decodes_base64() {
        let owner = Pubkey::new_unique();
        let res = json!({
            "context": { "slot": 1 },
            "value": {
                "data": ["AQID", "base64"],
                "owner": owner.to_string(),
                "lamports": 2039280,
                "executable": false
            }
        });
        let info = parse_account_info(&res).unwrap().unwrap();
        assert_eq!(info.data, vec![1, 2, 3]);
        assert_eq!(info.owner, owner);
        assert_eq!(info.lamports, 2_039_280);
    }

    #[test]
    fn bad_data_field_is_an_error() {
        assert!(decode_base64_data_field(&json!(42)).is_err());
        assert!(decode_base64_data_field(&json!(["!!!"])).is_err());
    }
}
