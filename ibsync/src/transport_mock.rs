// ibsync/src/transport_mock.rs
// Scripted in-memory transport. Stands in for the broker's client library
// in tests and the self-check harness: each request pops a scripted reply,
// and a background pump delivers the reply's events to the handler the way
// the real library delivers callbacks from its reader thread.

use crate::base::BridgeError;
use crate::contract::{Bar, Contract, ContractDetails, HistoricalDataQuery};
use crate::order::{OrderRequest, OrderStatusRow};
use crate::transport::{Transport, TransportEvents, TransportFactory};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

/// Scripted reply to one historical data request.
#[derive(Debug, Clone, Default)]
pub struct HistoricalReply {
  pub bars: Vec<Bar>,
  /// Broker error delivered after the bars (before any end marker).
  pub error: Option<(i32, String)>,
  /// Whether the end marker is delivered.
  pub send_end: bool,
  /// Drop the connection after the bars without telling the handler.
  pub silent_drop: bool,
}

/// Scripted reply to one contract details lookup.
#[derive(Debug, Clone, Default)]
pub struct ContractReply {
  pub details: Option<ContractDetails>,
  pub error: Option<(i32, String)>,
  pub send_end: bool,
}

/// Scripted reply to one order placement. Status rows are delivered with
/// their `order_id` rewritten to the actual correlation id.
#[derive(Debug, Clone, Default)]
pub struct OrderReply {
  pub statuses: Vec<OrderStatusRow>,
  pub error: Option<(i32, String)>,
  /// Drop the connection instead of acknowledging.
  pub silent_drop: bool,
}

/// What one mock connection will do.
#[derive(Debug, Clone)]
pub struct MockScript {
  /// Id delivered by the ready event.
  pub next_valid_id: i32,
  /// Deliver the ready event at all. Off simulates a session whose ready
  /// notification is lost.
  pub send_ready: bool,
  /// Raw managed-accounts string delivered at connect, if any.
  pub managed_accounts: Option<String>,
  /// Errors delivered right after the ready event: (req_id, code, message).
  pub connect_errors: Vec<(i32, i32, String)>,
  /// Never report connected; the open-side handshake wait must give up.
  pub connect_stall: bool,
  pub historical: VecDeque<HistoricalReply>,
  pub contract_details: VecDeque<ContractReply>,
  pub orders: VecDeque<OrderReply>,
}

impl Default for MockScript {
  fn default() -> Self {
    MockScript {
      next_valid_id: 1,
      send_ready: true,
      managed_accounts: None,
      connect_errors: Vec::new(),
      connect_stall: false,
      historical: VecDeque::new(),
      contract_details: VecDeque::new(),
      orders: VecDeque::new(),
    }
  }
}

enum PumpEvent {
  Ready(i32),
  ManagedAccounts(String),
  Error { req_id: i32, code: i32, message: String },
  HistoricalBar { req_id: i32, bar: Bar },
  HistoricalEnd(i32),
  ContractDetails { req_id: i32, details: ContractDetails },
  ContractEnd(i32),
  OrderStatus(OrderStatusRow),
  /// Drop connected without notifying the handler, then stop the pump.
  SilentDrop,
  /// Notify the handler the connection closed, then stop the pump.
  Closed,
}

struct MockState {
  script: MockScript,
  handler: Option<Arc<dyn TransportEvents>>,
}

/// Scripted stand-in for one broker connection.
#[derive(Clone)]
pub struct MockTransport {
  state: Arc<Mutex<MockState>>,
  connected: Arc<AtomicBool>,
  disconnects: Arc<AtomicUsize>,
  tx: Sender<PumpEvent>,
  rx: Receiver<PumpEvent>,
}

impl MockTransport {
  pub fn new(script: MockScript) -> Self {
    let (tx, rx) = unbounded();
    let connected = !script.connect_stall;
    MockTransport {
      state: Arc::new(Mutex::new(MockState { script, handler: None })),
      connected: Arc::new(AtomicBool::new(connected)),
      disconnects: Arc::new(AtomicUsize::new(0)),
      tx,
      rx,
    }
  }

  /// How many times the connection transitioned to disconnected.
  pub fn disconnect_count(&self) -> usize {
    self.disconnects.load(Ordering::SeqCst)
  }

  fn enqueue(&self, event: PumpEvent) {
    // The pump owns the receiver for the transport's whole life, so a send
    // only fails after total teardown.
    if self.tx.send(event).is_err() {
      warn!("Mock pump gone; dropping event");
    }
  }

  /// Returns true only for the transition that actually dropped the link.
  fn drop_connection(connected: &AtomicBool, disconnects: &AtomicUsize) -> bool {
    if connected.swap(false, Ordering::SeqCst) {
      disconnects.fetch_add(1, Ordering::SeqCst);
      true
    } else {
      false
    }
  }
}

impl Transport for MockTransport {
  fn is_connected(&self) -> bool {
    self.connected.load(Ordering::SeqCst)
  }

  fn disconnect(&self) -> Result<(), BridgeError> {
    if Self::drop_connection(&self.connected, &self.disconnects) {
      debug!("Mock: disconnect requested");
      self.enqueue(PumpEvent::Closed);
    }
    Ok(())
  }

  fn set_event_handler(&self, handler: Arc<dyn TransportEvents>) -> Result<(), BridgeError> {
    {
      let mut state = self.state.lock();
      if state.handler.is_some() {
        return Err(BridgeError::InternalError("Mock event handler already set".to_string()));
      }
      state.handler = Some(handler.clone());

      // Connect-time events, in the order the real library emits them:
      // the account list precedes the ready event.
      if let Some(accounts) = state.script.managed_accounts.clone() {
        self.enqueue(PumpEvent::ManagedAccounts(accounts));
      }
      if state.script.send_ready {
        self.enqueue(PumpEvent::Ready(state.script.next_valid_id));
      }
      for (req_id, code, message) in state.script.connect_errors.clone() {
        self.enqueue(PumpEvent::Error { req_id, code, message });
      }
    }

    let rx = self.rx.clone();
    let connected = self.connected.clone();
    let disconnects = self.disconnects.clone();
    thread::spawn(move || {
      debug!("Mock pump started");
      while let Ok(event) = rx.recv() {
        // Once the connection is down the reader side is gone: queued data
        // events are lost, only the close notification still fires.
        if !connected.load(Ordering::SeqCst) {
          match event {
            PumpEvent::Closed => {
              handler.connection_closed();
              break;
            }
            PumpEvent::SilentDrop => break,
            _ => {
              trace!("Mock pump: dropping event after disconnect");
              continue;
            }
          }
        }
        match event {
          PumpEvent::Ready(id) => handler.next_valid_id(id),
          PumpEvent::ManagedAccounts(csv) => handler.managed_accounts(&csv),
          PumpEvent::Error { req_id, code, message } => handler.error(req_id, code, &message),
          PumpEvent::HistoricalBar { req_id, bar } => handler.historical_bar(req_id, bar),
          PumpEvent::HistoricalEnd(req_id) => handler.historical_data_end(req_id),
          PumpEvent::ContractDetails { req_id, details } => handler.contract_details(req_id, details),
          PumpEvent::ContractEnd(req_id) => handler.contract_details_end(req_id),
          PumpEvent::OrderStatus(row) => handler.order_status(row),
          PumpEvent::SilentDrop => {
            trace!("Mock pump: silent drop");
            let _ = MockTransport::drop_connection(&connected, &disconnects);
            break;
          }
          PumpEvent::Closed => {
            handler.connection_closed();
            break;
          }
        }
      }
      debug!("Mock pump ended");
    });
    Ok(())
  }

  fn request_historical_data(
    &self,
    req_id: i32,
    contract: &Contract,
    query: &HistoricalDataQuery,
  ) -> Result<(), BridgeError> {
    if !self.is_connected() {
      return Err(BridgeError::NotConnected);
    }
    debug!("Mock: historical request {} for {} ({})", req_id, contract, query.duration);
    let reply = self.state.lock().script.historical.pop_front();
    match reply {
      Some(reply) => {
        for bar in reply.bars {
          self.enqueue(PumpEvent::HistoricalBar { req_id, bar });
        }
        if let Some((code, message)) = reply.error {
          self.enqueue(PumpEvent::Error { req_id, code, message });
        }
        if reply.silent_drop {
          self.enqueue(PumpEvent::SilentDrop);
        } else if reply.send_end {
          self.enqueue(PumpEvent::HistoricalEnd(req_id));
        }
      }
      None => warn!("Mock: no scripted historical reply for request {}", req_id),
    }
    Ok(())
  }

  fn request_contract_details(&self, req_id: i32, contract: &Contract) -> Result<(), BridgeError> {
    if !self.is_connected() {
      return Err(BridgeError::NotConnected);
    }
    debug!("Mock: contract lookup {} for {}", req_id, contract);
    let reply = self.state.lock().script.contract_details.pop_front();
    match reply {
      Some(reply) => {
        if let Some(details) = reply.details {
          self.enqueue(PumpEvent::ContractDetails { req_id, details });
        }
        if let Some((code, message)) = reply.error {
          self.enqueue(PumpEvent::Error { req_id, code, message });
        }
        if reply.send_end {
          self.enqueue(PumpEvent::ContractEnd(req_id));
        }
      }
      None => warn!("Mock: no scripted contract reply for request {}", req_id),
    }
    Ok(())
  }

  fn place_order(&self, order_id: i32, contract: &Contract, order: &OrderRequest) -> Result<(), BridgeError> {
    if !self.is_connected() {
      return Err(BridgeError::NotConnected);
    }
    debug!("Mock: place order {} ({} {} x {})", order_id, order.side, contract, order.quantity);
    let reply = self.state.lock().script.orders.pop_front();
    match reply {
      Some(reply) => {
        for mut row in reply.statuses {
          row.order_id = order_id;
          self.enqueue(PumpEvent::OrderStatus(row));
        }
        if let Some((code, message)) = reply.error {
          self.enqueue(PumpEvent::Error { req_id: order_id, code, message });
        }
        if reply.silent_drop {
          self.enqueue(PumpEvent::SilentDrop);
        }
      }
      None => warn!("Mock: no scripted order reply for order {}", order_id),
    }
    Ok(())
  }
}

/// Factory handing out one scripted connection per `connect` call; keeps
/// every transport it created so tests can inspect them afterwards.
pub struct MockTransportFactory {
  scripts: Mutex<VecDeque<MockScript>>,
  refuse_connections: bool,
  created: Mutex<Vec<MockTransport>>,
}

impl MockTransportFactory {
  pub fn new(scripts: Vec<MockScript>) -> Self {
    MockTransportFactory {
      scripts: Mutex::new(scripts.into()),
      refuse_connections: false,
      created: Mutex::new(Vec::new()),
    }
  }

  /// A factory whose `connect` always fails, for connection-error paths.
  pub fn refusing() -> Self {
    MockTransportFactory {
      scripts: Mutex::new(VecDeque::new()),
      refuse_connections: true,
      created: Mutex::new(Vec::new()),
    }
  }

  /// Transports created so far, in connect order.
  pub fn created(&self) -> Vec<MockTransport> {
    self.created.lock().clone()
  }
}

impl TransportFactory for MockTransportFactory {
  fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<Arc<dyn Transport>, BridgeError> {
    if self.refuse_connections {
      return Err(BridgeError::ConnectionFailed(format!("{}:{} refused (client id {})", host, port, client_id)));
    }
    let script = self.scripts.lock().pop_front().unwrap_or_default();
    let transport = MockTransport::new(script);
    self.created.lock().push(transport.clone());
    Ok(Arc::new(transport))
  }
}
