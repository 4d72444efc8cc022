// ibsync/src/lib.rs
// Main entry point for the synchronous bridge library

//! # ibsync: a synchronous bridge over the IBKR TWS callback API
//!
//! The TWS client library is callback-driven: requests go out
//! asynchronously and typed events come back on a private reader thread.
//! This crate turns that into blocking calls with bounded completion:
//!
//! - One session per call, torn down on every exit path
//! - Correlation-id bookkeeping behind a per-session mutex
//! - Condvar waits with a connectivity escape and explicit timeouts
//! - Fatal-by-default broker error policy with a configurable allow-list
//! - An append-only CSV order history
//!
//! The wire protocol itself stays behind the [`transport::Transport`]
//! boundary; a scripted [`transport_mock::MockTransport`] drives the tests.

mod assemble;
mod base;
mod sink;
pub mod config;
pub mod contract;
pub mod history;
pub mod order;
pub mod ops;
pub mod session;
pub mod transport;
pub mod transport_mock;

pub use base::BridgeError;
pub use config::BridgeConfig;
pub use ops::SyncBroker;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
