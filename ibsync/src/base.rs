// ibsync/src/base.rs
// Error definitions for the synchronous bridge

use thiserror::Error;

/// Errors that can occur while driving a bridge operation.
///
/// "Not found" (a contract lookup that completed with no descriptor) and a
/// partial result (connection dropped mid-wait) are normal return values,
/// not variants of this enum.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Not connected to the broker")]
  NotConnected,

  #[error("Already connected to the broker")]
  AlreadyConnected,

  #[error("Request timeout: {0}")]
  Timeout(String),

  #[error("Duplicate request ID: {0}")]
  DuplicateRequestId(i32),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Invalid contract: {0}")]
  InvalidContract(String),

  #[error("Invalid order: {0}")]
  InvalidOrder(String),

  #[error("Order history store error: {0}")]
  HistoryStore(String),

  #[error("Internal error: {0}")]
  InternalError(String),

  #[error("Broker error: code={0}, msg={1}")]
  Protocol(i32, String),
}

/// Request id the transport uses for errors not tied to any request.
pub const UNTIED_REQUEST_ID: i32 = -1;

/// Sentinel completion code recorded when a pending request is terminated
/// by a broker-reported error rather than its normal end event.
pub const ERROR_SENTINEL_CODE: i32 = -999;
