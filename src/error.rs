use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown instruction discriminator {0}")]
    UnknownInstruction(u8),

    #[error("program {0} has no instruction decoder")]
    UnsupportedProgram(Pubkey),

    #[error("account data too short: need {need} bytes, got {got}")]
    MalformedAccount { need: usize, got: usize },

    #[error("lookup table account: {0}")]
    LookupTable(solana_sdk::instruction::InstructionError),

    #[error("borsh: {0}")]
    Borsh(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid trade filter: {0}")]
    InvalidFilter(String),
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("instruction carries no account indexes")]
    NoAccountIndexes,

    #[error("account index {index} out of range (resolvable {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("lookup table {0} not found")]
    TableNotFound(Pubkey),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("remote read: {0}")]
    Remote(#[source] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("neither pool mint is the native asset")]
    NeitherMintIsNative,

    #[error("account {0} not found")]
    AccountNotFound(Pubkey),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("remote read: {0}")]
    Remote(#[source] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("invalid tracking status {0:?}")]
    InvalidTrackingStatus(String),

    #[error("stored venue id {0:?} is not a valid key")]
    InvalidVenueId(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("message compile: {0}")]
    Compile(#[from] solana_sdk::message::CompileError),

    #[error("signing: {0}")]
    Signing(#[from] solana_sdk::signer::SignerError),
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc: {0}")]
    Rpc(#[from] solana_client::client_error::ClientError),

    #[error("encode transaction: {0}")]
    Encode(#[from] bincode::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("assemble: {0}")]
    Build(#[from] BuildError),

    #[error("relay rejected: {0}")]
    Rejected(String),

    #[error("relay response missing result")]
    MissingResult,

    #[error("websocket: {0}")]
    Ws(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("channel {0} is not configured")]
    NotConfigured(&'static str),
}
