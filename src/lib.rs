pub mod config;
pub mod context;
pub mod diagnostics;
pub mod logging;
pub mod matching;
pub mod message;
pub mod normalize;
mod query;
pub mod reconstruct;
pub mod rewrite;
pub mod session;
pub mod token;
pub mod token_hash;
