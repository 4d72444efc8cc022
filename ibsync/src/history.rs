// ibsync/src/history.rs
// Append-only order history, kept in a flat CSV file.

use crate::base::BridgeError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One persisted order submission. `lmt_price` is textual so market orders
/// can record "N/A".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
  pub timestamp: DateTime<Utc>,
  pub order_id: i32,
  pub client_id: i32,
  pub perm_id: i32,
  pub con_id: i32,
  pub symbol: String,
  pub action: String,
  pub size: f64,
  pub order_type: String,
  pub lmt_price: String,
}

/// The external order-history store: a headered CSV file, loaded and
/// rewritten with one appended row per submission. Single-writer; not safe
/// for concurrent writers.
#[derive(Debug, Clone)]
pub struct OrderHistoryStore {
  path: PathBuf,
}

impl OrderHistoryStore {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    OrderHistoryStore { path: path.as_ref().to_path_buf() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Load every record in file order. A missing file is an empty history.
  pub fn load(&self) -> Result<Vec<OrderRecord>, BridgeError> {
    if !self.path.exists() {
      return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(&self.path)
      .map_err(|e| BridgeError::HistoryStore(format!("Opening {}: {}", self.path.display(), e)))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
      let record: OrderRecord =
        row.map_err(|e| BridgeError::HistoryStore(format!("Reading {}: {}", self.path.display(), e)))?;
      records.push(record);
    }
    debug!("Loaded {} order history records from {}", records.len(), self.path.display());
    Ok(records)
  }

  /// Append one record: load, add, rewrite.
  pub fn append(&self, record: OrderRecord) -> Result<(), BridgeError> {
    let mut records = self.load()?;
    records.push(record);

    let mut writer = csv::Writer::from_path(&self.path)
      .map_err(|e| BridgeError::HistoryStore(format!("Writing {}: {}", self.path.display(), e)))?;
    for record in &records {
      writer
        .serialize(record)
        .map_err(|e| BridgeError::HistoryStore(format!("Serializing record: {}", e)))?;
    }
    writer
      .flush()
      .map_err(|e| BridgeError::HistoryStore(format!("Flushing {}: {}", self.path.display(), e)))?;
    info!("Order history now holds {} records ({})", records.len(), self.path.display());
    Ok(())
  }
}
