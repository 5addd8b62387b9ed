use async_trait::async_trait;
use base64::Engine;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::{json, Value};
use solana_sdk::transaction::VersionedTransaction;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    time::timeout,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, info, warn};

use super::{Channel, SubmitOutcome, Submitter};
use crate::error::SubmitError;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

/// Persistent authenticated websocket to the paid relay, speaking JSON-RPC `PostSubmit`.
#[derive(Clone)]
pub struct RelayClient {
    url: String,
    auth_header: String,
    use_staked_rpcs: bool,
    write: Arc<Mutex<Option<WsWrite>>>,
    pending: Pending,
    id: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
}

impl RelayClient {
    pub fn new(url: &str, auth_header: &str, use_staked_rpcs: bool) -> Self {
        Self {
            url: url.to_string(),
            auth_header: auth_header.to_string(),
            use_staked_rpcs,
            write: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            id: Arc::new(AtomicU64::new(1)),
            connected: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn connect(&self) -> Result<(), SubmitError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SubmitError::Ws(format!("bad relay url: {e}")))?;
        let auth = HeaderValue::from_str(&self.auth_header)
            .map_err(|e| SubmitError::Ws(format!("bad auth header: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| SubmitError::Ws(format!("connect: {e}")))?;
        let (write, read) = ws.split();
        let epoch = {
            let mut w = self.write.lock().await;
            *w = Some(write);
            self.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.connected.store(true, Ordering::Relaxed);
        info!("relay connected: {}", self.url);

        let reader = self.clone();
        tokio::spawn(async move {
            if let Err(e) = reader.read_loop(read).await {
                warn!("relay read loop: {e}");
            }
            // a newer connection owns the writer by now
            if reader.epoch.load(Ordering::SeqCst) == epoch {
                reader.handle_disconnect().await;
            }
        });
        Ok(())
    }

    async fn ensure_connected(&self) -> Result<(), SubmitError> {
        if self.connected.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.connect().await
    }

    async fn handle_disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        {
            let mut w = self.write.lock().await;
            *w = None;
        }
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err("relay disconnected".to_string()));
        }
    }

    async fn read_loop(&self, mut read: WsRead) -> Result<(), SubmitError> {
        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| SubmitError::Ws(format!("read: {e}")))?;
            match msg {
                Message::Text(t) => self.route_response(&t).await,
                Message::Binary(b) => self.route_response(&String::from_utf8_lossy(&b)).await,
                Message::Ping(data) => {
                    let mut w = self.write.lock().await;
                    if let Some(writer) = w.as_mut() {
                        let _ = writer.send(Message::Pong(data)).await;
                    }
                }
                Message::Close(_) => return Err(SubmitError::Ws("closed by relay".into())),
                _ => {}
            }
        }
        Err(SubmitError::Ws("stream ended".into()))
    }

    async fn route_response(&self, txt: &str) {
        let Ok(v) = serde_json::from_str::<Value>(txt) else {
            return;
        };
        let Some(id) = v.get("id").and_then(|x| x.as_u64()) else {
            return;
        };
        let result = match v.get("error") {
            Some(err) if !err.is_null() => Err(err.to_string()),
            _ => Ok(v.get("result").cloned().unwrap_or(Value::Null)),
        };
        let mut pending = self.pending.lock().await;
        if let Some(tx) = pending.remove(&id) {
            let _ = tx.send(result);
        }
    }

    async fn send_text(&self, text: String) -> Result<(), SubmitError> {
        let mut w = self.write.lock().await;
        let writer = w
            .as_mut()
            .ok_or_else(|| SubmitError::Ws("writer missing (disconnected)".into()))?;
        writer
            .send(Message::Text(text))
            .await
            .map_err(|e| SubmitError::Ws(format!("send: {e}")))
    }

    fn post_submit_request(&self, id: u64, content: String) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "PostSubmit",
            "params": {
                "transaction": { "content": content },
                "skipPreFlight": true,
                "frontRunningProtection": false,
                "fastBestEffort": false,
                "useStakedRPCs": self.use_staked_rpcs
            }
        })
    }

    /// Sends one transaction; a failed send reconnects and resends exactly once.
    pub async fn post_submit(&self, tx: &VersionedTransaction) -> Result<String, SubmitError> {
        let content = base64::engine::general_purpose::STANDARD.encode(bincode::serialize(tx)?);
        self.ensure_connected().await?;

        let id = self.id.fetch_add(1, Ordering::Relaxed);
        let (resp_tx, resp_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, resp_tx);
        }

        let text = self.post_submit_request(id, content).to_string();
        if let Err(e) = self.send_text(text.clone()).await {
            warn!("relay send failed, reconnecting: {e}");
            self.handle_disconnect().await;
            let (retry_tx, retry_rx) = oneshot::channel();
            {
                let mut pending = self.pending.lock().await;
                pending.insert(id, retry_tx);
            }
            if let Err(e) = self.reconnect_and_send(text).await {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
            return self.await_response(id, retry_rx).await;
        }

        self.await_response(id, resp_rx).await
    }

    async fn reconnect_and_send(&self, text: String) -> Result<(), SubmitError> {
        self.connect().await?;
        self.send_text(text).await
    }

    async fn await_response(
        &self,
        id: u64,
        rx: oneshot::Receiver<Result<Value, String>>,
    ) -> Result<String, SubmitError> {
        let resp = match timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(SubmitError::Ws("response dropped".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(SubmitError::Timeout(RESPONSE_TIMEOUT));
            }
        };
        let result = resp.map_err(SubmitError::Rejected)?;
        Ok(result
            .get("signature")
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| result.to_string()))
    }
}

struct RelayTask {
    tx: VersionedTransaction,
    reply: oneshot::Sender<Result<SubmitOutcome, SubmitError>>,
}

/// N relay connections fed from one task queue; each worker owns one connection.
pub struct RelayPool {
    tasks: mpsc::UnboundedSender<RelayTask>,
}

impl RelayPool {
    pub fn spawn(clients: Vec<RelayClient>) -> Self {
        let (tasks, rx) = mpsc::unbounded_channel::<RelayTask>();
        let rx = Arc::new(Mutex::new(rx));

        for (worker, client) in clients.into_iter().enumerate() {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else {
                        debug!("relay worker {worker} stopping");
                        break;
                    };
                    let res = client.post_submit(&task.tx).await.map(|signature| SubmitOutcome {
                        channel: Channel::PaidRelay,
                        signature,
                    });
                    let _ = task.reply.send(res);
                }
            });
        }

        Self { tasks }
    }
}

#[async_trait]
impl Submitter for RelayPool {
    fn channel(&self) -> Channel {
        Channel::PaidRelay
    }

    async fn submit(&self, tx: &VersionedTransaction) -> Result<SubmitOutcome, SubmitError> {
        let (reply, rx) = oneshot::channel();
        self.tasks
            .send(RelayTask {
                tx: tx.clone(),
                reply,
            })
            .map_err(|_| SubmitError::Ws("relay pool closed".into()))?;
        rx.await
            .map_err(|_| SubmitError::Ws("relay worker dropped task".into()))?
    }
}
