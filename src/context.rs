use std::sync::Arc;

use crate::rpc::AccountReader;
use crate::storage::{KeyValueStore, TradeStore};

/// Shared handles every component is built from.
#[derive(Clone)]
pub struct Context {
    pub kv: Arc<dyn KeyValueStore>,
    pub trades: TradeStore,
    pub rpc: Arc<dyn AccountReader>,
}

impl Context {
    pub fn new(kv: Arc<dyn KeyValueStore>, trades: TradeStore, rpc: Arc<dyn AccountReader>) -> Self {
        Self { kv, trades, rpc }
    }
}
