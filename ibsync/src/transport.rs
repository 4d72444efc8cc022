// ibsync/src/transport.rs
// The boundary to the broker's client library.
//
// The wire protocol itself is out of scope: an implementation wraps the
// vendor API (or, for tests, a scripted replay) and delivers the typed
// events below from its own background context. The bridge composes a
// Transport with an independent event handler instead of inheriting both
// roles in one object.

use crate::base::BridgeError;
use crate::contract::{Contract, ContractDetails, Bar, HistoricalDataQuery};
use crate::order::{OrderRequest, OrderStatusRow};
use std::sync::Arc;

/// Capability interface of one broker connection.
///
/// Methods take `&self`; implementations use interior mutability so the
/// event sink can force a disconnect from the drain context while an
/// operation thread holds the same handle.
pub trait Transport: Send + Sync {
  /// Whether the connection is currently usable.
  fn is_connected(&self) -> bool;

  /// Tear the connection down. Idempotent; stops the drain context.
  fn disconnect(&self) -> Result<(), BridgeError>;

  /// Install the event handler and start the background drain context.
  /// Called exactly once per connection, before any request is issued.
  fn set_event_handler(&self, handler: Arc<dyn TransportEvents>) -> Result<(), BridgeError>;

  /// Issue a historical bar query correlated by `req_id`.
  fn request_historical_data(
    &self,
    req_id: i32,
    contract: &Contract,
    query: &HistoricalDataQuery,
  ) -> Result<(), BridgeError>;

  /// Issue a contract details lookup correlated by `req_id`.
  fn request_contract_details(&self, req_id: i32, contract: &Contract) -> Result<(), BridgeError>;

  /// Place an order under `order_id` (the session's correlation id).
  fn place_order(&self, order_id: i32, contract: &Contract, order: &OrderRequest) -> Result<(), BridgeError>;
}

/// Asynchronous events delivered by the transport's drain context.
///
/// Events for a given correlation id arrive in emission order; the drain
/// context is single-threaded, so an end marker is never seen before the
/// data it terminates.
pub trait TransportEvents: Send + Sync {
  /// First usable correlation id for this session. Sent automatically once
  /// the broker accepts the connection; readiness gate for every request.
  fn next_valid_id(&self, request_id: i32);

  /// Broker-reported error. `req_id` is -1 for errors not tied to a request.
  fn error(&self, req_id: i32, code: i32, message: &str);

  /// One historical bar for `req_id`.
  fn historical_bar(&self, req_id: i32, bar: Bar);

  /// End of the historical stream for `req_id`.
  fn historical_data_end(&self, req_id: i32);

  /// Resolved descriptor for a contract lookup.
  fn contract_details(&self, req_id: i32, details: ContractDetails);

  /// End of a contract lookup.
  fn contract_details_end(&self, req_id: i32);

  /// Status acknowledgement for a placed order.
  fn order_status(&self, row: OrderStatusRow);

  /// Comma-separated managed account list, sent at connect.
  fn managed_accounts(&self, accounts_csv: &str);

  /// The transport noticed the connection is gone.
  fn connection_closed(&self);
}

/// Connects transports. The factory owns endpoint-independent setup; the
/// bridge calls it once per synchronous operation.
pub trait TransportFactory: Send + Sync {
  fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<Arc<dyn Transport>, BridgeError>;
}
