use anyhow::{anyhow, Context, Result};
use rusqlite::{params, params_from_iter, Connection, Row};
use solana_sdk::pubkey::Pubkey;
use std::{fmt, str::FromStr, sync::Arc};
use tokio::sync::Mutex;

use crate::error::StoreError;

const SEARCHABLE_COLUMNS: &[&str] = &[
    "id",
    "amm_id",
    "mint",
    "action",
    "compute_limit",
    "compute_price",
    "amount",
    "signature",
    "tip",
    "tip_amount",
    "status",
    "signer",
    "timestamp",
];
const OPERATORS: &[&str] = &["=", "!=", "<", "<=", ">", ">=", "LIKE"];
const DEFAULT_SEARCH_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    /// Pool-side token delta: the pool lost tokens, so someone bought.
    pub fn from_pool_delta(delta: i128) -> Self {
        if delta > 0 {
            TradeAction::Buy
        } else {
            TradeAction::Sell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            other => Err(anyhow!("unknown trade action {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Success,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Success => "success",
            TradeStatus::Failed => "failed",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(TradeStatus::Success),
            "failed" => Ok(TradeStatus::Failed),
            other => Err(anyhow!("unknown trade status {other}")),
        }
    }
}

/// One observed swap against a venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub amm_id: Pubkey,
    pub mint: Pubkey,
    pub action: TradeAction,
    pub compute_limit: u64,
    pub compute_price: u64,
    /// Pool-side token delta; kept as text because it does not fit sqlite integers.
    pub amount: i128,
    pub signature: String,
    /// Tip channel label (`jito` or `bloxroute`) when the transaction paid one.
    pub tip: Option<String>,
    pub tip_amount: i64,
    pub status: TradeStatus,
    pub signer: Pubkey,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct TradeQuery {
    pub column: String,
    pub operator: String,
    pub value: String,
}

impl TradeQuery {
    pub fn new(column: &str, operator: &str, value: impl ToString) -> Self {
        Self {
            column: column.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub queries: Vec<TradeQuery>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TradeFilter {
    fn to_sql(&self) -> Result<(String, Vec<String>), StoreError> {
        let mut sql = String::from(
            "SELECT amm_id, mint, action, compute_limit, compute_price, amount, signature, \
             tip, tip_amount, status, signer, timestamp FROM trades",
        );
        let mut values = Vec::with_capacity(self.queries.len());

        for (i, q) in self.queries.iter().enumerate() {
            if !SEARCHABLE_COLUMNS.contains(&q.column.as_str()) {
                return Err(StoreError::InvalidFilter(format!("column {}", q.column)));
            }
            let op = q.operator.to_uppercase();
            if !OPERATORS.contains(&op.as_str()) {
                return Err(StoreError::InvalidFilter(format!("operator {}", q.operator)));
            }
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("{} {} ?{}", q.column, op, i + 1));
            values.push(q.value.clone());
        }

        sql.push_str(&format!(
            " ORDER BY id DESC LIMIT {} OFFSET {}",
            self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            self.offset.unwrap_or(0)
        ));
        Ok((sql, values))
    }
}

/// Append-only trade history in sqlite.
#[derive(Clone)]
pub struct TradeStore {
    conn: Arc<Mutex<Connection>>,
}

impl TradeStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open sqlite db {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                amm_id          TEXT NOT NULL,
                mint            TEXT NOT NULL,
                action          TEXT NOT NULL,
                compute_limit   INTEGER NOT NULL,
                compute_price   INTEGER NOT NULL,
                amount          TEXT NOT NULL,
                signature       TEXT NOT NULL,
                tip             TEXT,
                tip_amount      INTEGER NOT NULL,
                status          TEXT NOT NULL,
                signer          TEXT NOT NULL,
                timestamp       INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_trades_amm ON trades(amm_id);
            CREATE INDEX IF NOT EXISTS idx_trades_signature ON trades(signature);
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
        "#,
        )
        .context("create trades schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn insert(&self, trade: &Trade) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO trades
            (amm_id, mint, action, compute_limit, compute_price, amount, signature, tip, tip_amount, status, signer, timestamp)
            VALUES
            (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                trade.amm_id.to_string(),
                trade.mint.to_string(),
                trade.action.as_str(),
                trade.compute_limit,
                trade.compute_price,
                trade.amount.to_string(),
                trade.signature,
                trade.tip,
                trade.tip_amount,
                trade.status.as_str(),
                trade.signer.to_string(),
                trade.timestamp,
            ],
        )
        .with_context(|| format!("insert trade {}", trade.signature))?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn search(&self, filter: &TradeFilter) -> Result<Vec<Trade>> {
        let (sql, values) = filter.to_sql()?;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql).context("prepare trade search")?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_columns)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(trade_from_columns(row?)?);
        }
        Ok(out)
    }

    pub async fn delete_all(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n = conn
            .execute("DELETE FROM trades", [])
            .context("truncate trades")?;
        Ok(n)
    }
}

type TradeColumns = (
    String,
    String,
    String,
    u64,
    u64,
    String,
    String,
    Option<String>,
    i64,
    String,
    String,
    i64,
);

fn row_columns(row: &Row<'_>) -> rusqlite::Result<TradeColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn trade_from_columns(cols: TradeColumns) -> Result<Trade> {
    let (
        amm_id,
        mint,
        action,
        compute_limit,
        compute_price,
        amount,
        signature,
        tip,
        tip_amount,
        status,
        signer,
        timestamp,
    ) = cols;

    Ok(Trade {
        amm_id: Pubkey::from_str(&amm_id).context("bad amm_id pubkey")?,
        mint: Pubkey::from_str(&mint).context("bad mint pubkey")?,
        action: action.parse()?,
        compute_limit,
        compute_price,
        amount: amount.parse().context("bad amount")?,
        signature,
        tip,
        tip_amount,
        status: status.parse()?,
        signer: Pubkey::from_str(&signer).context("bad signer pubkey")?,
        timestamp,
    })
}
