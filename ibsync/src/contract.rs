// ibsync/src/contract.rs
// Instrument descriptors and historical bar types.

use crate::base::BridgeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Security type, serialized to the broker's wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecType {
  Stock,   // STK
  Forex,   // CASH
  Future,  // FUT
  Option,  // OPT
  Index,   // IND
  Crypto,  // CRYPTO
}

impl fmt::Display for SecType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SecType::Stock => "STK",
      SecType::Forex => "CASH",
      SecType::Future => "FUT",
      SecType::Option => "OPT",
      SecType::Index => "IND",
      SecType::Crypto => "CRYPTO",
    };
    write!(f, "{}", s)
  }
}

impl std::str::FromStr for SecType {
  type Err = BridgeError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_uppercase().as_str() {
      "STK" => Ok(SecType::Stock),
      "CASH" => Ok(SecType::Forex),
      "FUT" => Ok(SecType::Future),
      "OPT" => Ok(SecType::Option),
      "IND" => Ok(SecType::Index),
      "CRYPTO" => Ok(SecType::Crypto),
      _ => Err(BridgeError::InvalidParameter(format!("Unknown security type: {}", s))),
    }
  }
}

/// An instrument, as the request payload understands it.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
  pub con_id: i32,
  pub symbol: String,
  pub sec_type: SecType,
  pub exchange: String,
  pub primary_exchange: Option<String>,
  pub currency: String,
  pub local_symbol: Option<String>,
  pub trading_class: Option<String>,
}

impl Contract {
  /// US stock routed through SMART.
  pub fn stock(symbol: &str) -> Self {
    Contract {
      con_id: 0,
      symbol: symbol.to_string(),
      sec_type: SecType::Stock,
      exchange: "SMART".to_string(),
      primary_exchange: None,
      currency: "USD".to_string(),
      local_symbol: None,
      trading_class: None,
    }
  }

  /// Currency pair in `BASE.QUOTE` form (e.g. "AUD.CAD"), routed to the
  /// IDEALPRO FX venue.
  pub fn forex_pair(pair: &str) -> Result<Self, BridgeError> {
    let (base, quote) = pair
      .split_once('.')
      .ok_or_else(|| BridgeError::InvalidContract(format!("Currency pair must be BASE.QUOTE, got '{}'", pair)))?;
    if base.is_empty() || quote.is_empty() {
      return Err(BridgeError::InvalidContract(format!("Currency pair must be BASE.QUOTE, got '{}'", pair)));
    }
    Ok(Contract {
      con_id: 0,
      symbol: base.to_string(),
      sec_type: SecType::Forex,
      exchange: "IDEALPRO".to_string(),
      primary_exchange: None,
      currency: quote.to_string(),
      local_symbol: None,
      trading_class: None,
    })
  }

  pub(crate) fn validate(&self) -> Result<(), BridgeError> {
    if self.symbol.is_empty() {
      return Err(BridgeError::InvalidContract("Contract symbol is empty".to_string()));
    }
    if self.exchange.is_empty() {
      return Err(BridgeError::InvalidContract("Contract exchange is empty".to_string()));
    }
    Ok(())
  }
}

impl fmt::Display for Contract {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {} {}/{}", self.symbol, self.sec_type, self.exchange, self.currency)
  }
}

/// Broker-resolved details for a contract, as delivered by the lookup reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContractDetails {
  pub contract: ResolvedContract,
  pub market_name: String,
  pub min_tick: f64,
  pub order_types: String,
  pub valid_exchanges: String,
  pub long_name: String,
  pub time_zone_id: String,
  pub trading_hours: String,
  pub liquid_hours: String,
}

/// The broker's echo of the requested contract, with its con id filled in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedContract {
  pub con_id: i32,
  pub symbol: String,
  pub sec_type: String,
  pub exchange: String,
  pub currency: String,
  pub local_symbol: String,
}

/// One historical price bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
  pub date: DateTime<Utc>,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
}

/// Parameters of a historical data request.
///
/// Duration and bar size use the broker's string grammar ("30 D", "1 hour").
#[derive(Debug, Clone)]
pub struct HistoricalDataQuery {
  pub end_date_time: Option<DateTime<Utc>>,
  pub duration: String,
  pub bar_size: String,
  pub what_to_show: String,
  pub use_rth: bool,
}

impl Default for HistoricalDataQuery {
  fn default() -> Self {
    HistoricalDataQuery {
      end_date_time: None,
      duration: "30 D".to_string(),
      bar_size: "1 hour".to_string(),
      what_to_show: "MIDPOINT".to_string(),
      use_rth: true,
    }
  }
}

impl HistoricalDataQuery {
  pub(crate) fn validate(&self) -> Result<(), BridgeError> {
    if self.duration.is_empty() {
      return Err(BridgeError::InvalidParameter("Historical query duration is empty".to_string()));
    }
    if self.bar_size.is_empty() {
      return Err(BridgeError::InvalidParameter("Historical query bar size is empty".to_string()));
    }
    Ok(())
  }
}
