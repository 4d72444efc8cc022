// ibsync/src/session.rs
// One transport connection plus the request state shared with the sink.

use crate::base::BridgeError;
use crate::config::BridgeConfig;
use crate::contract::{Bar, ContractDetails};
use crate::order::OrderStatusRow;
use crate::sink::EventSink;
use crate::transport::{Transport, TransportFactory};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
  HistoricalData,
  ContractDetails,
  Order,
}

/// Terminal marker of a pending request. Never overwritten once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
  Success,
  Error(i32),
}

/// State accumulated for one outstanding request, keyed by correlation id.
/// Mutated only by the event sink; consumed by the owning operation.
#[derive(Debug)]
pub(crate) struct PendingRequest {
  pub kind: RequestKind,
  pub completion: Option<Completion>,
  pub bars: Vec<Bar>,
  pub contract_details: Option<ContractDetails>,
  pub order_statuses: Vec<OrderStatusRow>,
}

impl PendingRequest {
  fn new(kind: RequestKind) -> Self {
    PendingRequest {
      kind,
      completion: None,
      bars: Vec::new(),
      contract_details: None,
      order_statuses: Vec::new(),
    }
  }
}

/// One diagnostic entry from the broker. The log is append-only for the
/// session's life.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
  pub req_id: i32,
  pub code: i32,
  pub message: String,
}

#[derive(Default)]
struct SessionData {
  next_valid_id: Option<i32>,
  pending: HashMap<i32, PendingRequest>,
  managed_accounts: Option<Vec<String>>,
  error_log: Vec<ErrorRecord>,
}

/// Shared request-scoped state: written by the sink's drain context, read by
/// the blocked operation thread. One instance per session, never
/// process-wide.
pub(crate) struct SessionState {
  data: Mutex<SessionData>,
  cond: Condvar,
}

impl SessionState {
  pub fn new() -> Self {
    SessionState { data: Mutex::new(SessionData::default()), cond: Condvar::new() }
  }

  pub fn record_ready(&self, request_id: i32) {
    let mut data = self.data.lock();
    data.next_valid_id = Some(request_id);
    self.cond.notify_all();
  }

  pub fn insert_pending(&self, req_id: i32, kind: RequestKind) -> Result<(), BridgeError> {
    let mut data = self.data.lock();
    if data.pending.contains_key(&req_id) {
      return Err(BridgeError::DuplicateRequestId(req_id));
    }
    data.pending.insert(req_id, PendingRequest::new(kind));
    Ok(())
  }

  /// Remove and return a pending request, in whatever state it is in.
  pub fn take_pending(&self, req_id: i32) -> Option<PendingRequest> {
    self.data.lock().pending.remove(&req_id)
  }

  /// Apply `f` to the pending request for `req_id`, then wake waiters.
  /// No-op when the id is unknown (late events after consumption).
  pub fn with_pending<F: FnOnce(&mut PendingRequest)>(&self, req_id: i32, f: F) {
    let mut data = self.data.lock();
    if let Some(pending) = data.pending.get_mut(&req_id) {
      f(pending);
      self.cond.notify_all();
    } else {
      debug!("Dropping event for unknown or consumed request id {}", req_id);
    }
  }

  /// Mark a terminal completion, refusing to overwrite one already set.
  pub fn complete(&self, req_id: i32, completion: Completion) {
    self.with_pending(req_id, |pending| {
      if let Some(existing) = pending.completion {
        warn!("Ignoring completion {:?} for request {}; already terminal as {:?}", completion, req_id, existing);
      } else {
        pending.completion = Some(completion);
      }
    });
  }

  pub fn push_error(&self, record: ErrorRecord) {
    let mut data = self.data.lock();
    data.error_log.push(record);
    self.cond.notify_all();
  }

  pub fn error_log(&self) -> Vec<ErrorRecord> {
    self.data.lock().error_log.clone()
  }

  pub fn set_accounts(&self, accounts: Vec<String>) {
    let mut data = self.data.lock();
    data.managed_accounts = Some(accounts);
    self.cond.notify_all();
  }

  pub fn accounts(&self) -> Option<Vec<String>> {
    self.data.lock().managed_accounts.clone()
  }

  /// Wake every waiter; used when the connection goes away so no wait
  /// outlives the transport.
  pub fn notify_all(&self) {
    self.cond.notify_all();
  }
}

/// How a completion wait ended. A dropped connection yields the partial
/// state accumulated so far rather than an error.
pub(crate) enum WaitOutcome {
  Completed(PendingRequest),
  Disconnected(PendingRequest),
}

/// One transport session. Owned by the synchronous operation that created
/// it and torn down before the operation returns, on every exit path.
pub struct Session {
  transport: Arc<dyn Transport>,
  state: Arc<SessionState>,
  client_id: i32,
  poll_interval: Duration,
  closed: AtomicBool,
}

impl Session {
  /// Connect, wait (bounded) for the connected predicate, and attach the
  /// event sink, which starts the background drain context.
  pub(crate) fn open(config: &BridgeConfig, factory: &dyn TransportFactory) -> Result<Session, BridgeError> {
    info!("Opening session to {}:{} (client id {})", config.host, config.port, config.client_id);
    let transport = factory.connect(&config.host, config.port, config.client_id)?;

    let start = Instant::now();
    while !transport.is_connected() {
      if start.elapsed() >= config.connect_timeout {
        let _ = transport.disconnect();
        return Err(BridgeError::ConnectionFailed(format!(
          "Handshake did not complete within {:?}", config.connect_timeout
        )));
      }
      std::thread::sleep(config.poll_interval);
    }

    let state = Arc::new(SessionState::new());
    let sink = Arc::new(EventSink::new(
      state.clone(),
      transport.clone(),
      config.benign_error_codes.clone(),
    ));
    transport.set_event_handler(sink)?;
    debug!("Session open, drain context attached");

    Ok(Session {
      transport,
      state,
      client_id: config.client_id,
      poll_interval: config.poll_interval,
      closed: AtomicBool::new(false),
    })
  }

  pub fn is_connected(&self) -> bool {
    self.transport.is_connected()
  }

  pub fn client_id(&self) -> i32 {
    self.client_id
  }

  /// Disconnect the transport. Idempotent; the single teardown point for
  /// every operation exit path.
  pub fn close(&self) {
    if !self.closed.swap(true, Ordering::SeqCst) {
      info!("Closing session (client id {})", self.client_id);
      if let Err(e) = self.transport.disconnect() {
        warn!("Error during session close: {}", e);
      }
    }
    self.state.notify_all();
  }

  pub(crate) fn state(&self) -> &Arc<SessionState> {
    &self.state
  }

  pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  /// Diagnostics accumulated by the sink for this session.
  pub fn error_log(&self) -> Vec<ErrorRecord> {
    self.state.error_log()
  }

  /// Correlation id for the next request: the ready event's id, surfaced
  /// once the transport has delivered it. Blocks up to `timeout`.
  pub(crate) fn next_request_id(&self, timeout: Duration) -> Result<i32, BridgeError> {
    let start = Instant::now();
    let mut data = self.state.data.lock();
    loop {
      if let Some(id) = data.next_valid_id {
        return Ok(id);
      }
      if !self.transport.is_connected() {
        return Err(BridgeError::NotConnected);
      }
      if start.elapsed() >= timeout {
        return Err(BridgeError::Timeout(format!(
          "Ready event not received within {:?}", timeout
        )));
      }
      // Short wait slices so a silent connection drop is noticed promptly.
      self.state.cond.wait_for(&mut data, self.poll_interval);
    }
  }

  /// Block until the request's completion marker is set, the connection
  /// drops (partial state returned), or `timeout` elapses.
  pub(crate) fn wait_for_completion(&self, req_id: i32, timeout: Duration) -> Result<WaitOutcome, BridgeError> {
    let start = Instant::now();
    let mut data = self.state.data.lock();
    loop {
      match data.pending.get(&req_id) {
        Some(pending) if pending.completion.is_some() => {
          let pending = data.pending.remove(&req_id).unwrap();
          return Ok(WaitOutcome::Completed(pending));
        }
        Some(_) => {}
        None => {
          return Err(BridgeError::InternalError(format!(
            "Pending state for request {} missing during wait", req_id
          )));
        }
      }

      if !self.transport.is_connected() {
        debug!("Connection dropped while awaiting request {}; returning partial state", req_id);
        let pending = data.pending.remove(&req_id).unwrap();
        return Ok(WaitOutcome::Disconnected(pending));
      }

      if start.elapsed() >= timeout {
        data.pending.remove(&req_id);
        return Err(BridgeError::Timeout(format!(
          "Request {} did not complete within {:?}", req_id, timeout
        )));
      }

      self.state.cond.wait_for(&mut data, self.poll_interval);
    }
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    self.close();
  }
}
