pub mod coder;
pub mod config;
pub mod constants;
pub mod context;
pub mod envelope;
pub mod error;
pub mod liquidity;
pub mod pipeline;
pub mod resolver;
pub mod rpc;
pub mod storage;
pub mod submit;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracker;
pub mod trade;
pub mod transport;
