// ibsync/src/config.rs
// Bridge configuration: endpoint, client id, timing, error policy.

use crate::base::BridgeError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Configuration for the synchronous bridge.
///
/// Defaults target a paper-trading TWS on localhost with a fixed client id.
/// Both are plain data here so a deployment can override them (a fixed
/// client id collides when two bridges target one gateway).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
  /// TWS / IB Gateway host.
  pub host: String,
  /// TWS / IB Gateway port (7497 = TWS paper trading).
  pub port: u16,
  /// Client id presented at connect.
  pub client_id: i32,

  /// Bound on the connect handshake plus the connected-predicate wait.
  #[serde(with = "duration_secs")]
  pub connect_timeout: Duration,
  /// Bound on waiting for the session's ready event (next valid id).
  #[serde(with = "duration_secs")]
  pub ready_timeout: Duration,
  /// Bound on waiting for a request's completion marker.
  #[serde(with = "duration_secs")]
  pub completion_timeout: Duration,
  /// Wait slice used by all polling waits.
  #[serde(with = "duration_millis")]
  pub poll_interval: Duration,

  /// Broker error codes treated as advisory: logged, never fatal.
  /// Any code outside this set aborts the session.
  pub benign_error_codes: HashSet<i32>,

  /// Path of the append-only order history file.
  pub order_history_path: String,
}

impl Default for BridgeConfig {
  fn default() -> Self {
    BridgeConfig {
      host: "127.0.0.1".to_string(),
      port: 7497,
      client_id: 10645,
      connect_timeout: Duration::from_secs(10),
      ready_timeout: Duration::from_secs(10),
      completion_timeout: Duration::from_secs(60),
      poll_interval: Duration::from_millis(100),
      benign_error_codes: [399, 504, 2104, 2168, 2169].into_iter().collect(),
      order_history_path: "order_history.csv".to_string(),
    }
  }
}

impl BridgeConfig {
  /// Load a configuration from a JSON file; absent keys keep their defaults.
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
    let text = std::fs::read_to_string(path.as_ref())
      .map_err(|e| BridgeError::ConfigurationError(format!("Reading config {}: {}", path.as_ref().display(), e)))?;
    serde_json::from_str(&text)
      .map_err(|e| BridgeError::ConfigurationError(format!("Parsing config {}: {}", path.as_ref().display(), e)))
  }

  /// True if the broker error code is in the advisory allow-list.
  pub fn is_benign_error(&self, code: i32) -> bool {
    self.benign_error_codes.contains(&code)
  }
}

mod duration_secs {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_secs(u64::deserialize(d)?))
  }
}

mod duration_millis {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_endpoint_and_allow_list() {
    let cfg = BridgeConfig::default();
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.port, 7497);
    assert_eq!(cfg.client_id, 10645);
    for code in [399, 504, 2104, 2168, 2169] {
      assert!(cfg.is_benign_error(code), "code {} should be benign", code);
    }
    assert!(!cfg.is_benign_error(200));
    assert!(!cfg.is_benign_error(1100));
  }

  #[test]
  fn test_json_overrides_keep_defaults_for_absent_keys() {
    let cfg: BridgeConfig =
      serde_json::from_str(r#"{"port": 4002, "client_id": 7, "benign_error_codes": [504]}"#).unwrap();
    assert_eq!(cfg.port, 4002);
    assert_eq!(cfg.client_id, 7);
    assert_eq!(cfg.host, "127.0.0.1");
    assert!(cfg.is_benign_error(504));
    assert!(!cfg.is_benign_error(399));
    assert_eq!(cfg.completion_timeout, Duration::from_secs(60));
  }

  #[test]
  fn test_duration_fields_parse_from_numbers() {
    let cfg: BridgeConfig =
      serde_json::from_str(r#"{"completion_timeout": 5, "poll_interval": 20}"#).unwrap();
    assert_eq!(cfg.completion_timeout, Duration::from_secs(5));
    assert_eq!(cfg.poll_interval, Duration::from_millis(20));
  }
}
