// ibsync/src/order.rs
// Order request payloads and broker acknowledgement types.

use crate::base::BridgeError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
  Buy,
  Sell,
}

impl fmt::Display for OrderSide {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OrderSide::Buy => write!(f, "BUY"),
      OrderSide::Sell => write!(f, "SELL"),
    }
  }
}

impl std::str::FromStr for OrderSide {
  type Err = BridgeError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_uppercase().as_str() {
      "BUY" => Ok(OrderSide::Buy),
      "SELL" => Ok(OrderSide::Sell),
      _ => Err(BridgeError::InvalidParameter(format!("Unknown order side: {}", s))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
  Market,
  Limit,
}

impl fmt::Display for OrderType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OrderType::Market => write!(f, "MKT"),
      OrderType::Limit => write!(f, "LMT"),
    }
  }
}

/// An order as submitted to the broker. Construction happens through the
/// `market`/`limit` shortcuts; routing beyond this payload is not the
/// bridge's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
  pub side: OrderSide,
  pub quantity: f64,
  pub order_type: OrderType,
  pub limit_price: Option<f64>,
}

impl OrderRequest {
  pub fn market(side: OrderSide, quantity: f64) -> Self {
    OrderRequest { side, quantity, order_type: OrderType::Market, limit_price: None }
  }

  pub fn limit(side: OrderSide, quantity: f64, limit_price: f64) -> Self {
    OrderRequest { side, quantity, order_type: OrderType::Limit, limit_price: Some(limit_price) }
  }

  pub(crate) fn validate(&self) -> Result<(), BridgeError> {
    if !(self.quantity > 0.0) {
      return Err(BridgeError::InvalidOrder(format!("Order quantity must be positive, got {}", self.quantity)));
    }
    match self.order_type {
      OrderType::Limit => {
        match self.limit_price {
          Some(p) if p > 0.0 => Ok(()),
          _ => Err(BridgeError::InvalidOrder("Limit order requires a positive limit price".to_string())),
        }
      }
      OrderType::Market => Ok(()),
    }
  }
}

/// One order-status acknowledgement as delivered by the broker, keyed by
/// order id. `PartialEq` drives the sink's de-duplication of repeated
/// identical deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusRow {
  pub order_id: i32,
  pub status: String,
  pub filled: f64,
  pub remaining: f64,
  pub avg_fill_price: f64,
  pub perm_id: i32,
  pub parent_id: i32,
  pub last_fill_price: f64,
  pub client_id: i32,
  pub why_held: String,
}

/// Outcome of a synchronous order submission. The ids are taken from the
/// broker's status acknowledgement, never from the request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderConfirmation {
  pub accepted: bool,
  pub order_id: i32,
  pub client_id: i32,
  pub perm_id: i32,
  pub status: String,
  pub message: String,
}
