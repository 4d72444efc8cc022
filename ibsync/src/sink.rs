// ibsync/src/sink.rs
// Single point where transport events become session state mutations.

use crate::base::{ERROR_SENTINEL_CODE, UNTIED_REQUEST_ID};
use crate::assemble;
use crate::contract::{Bar, ContractDetails};
use crate::order::OrderStatusRow;
use crate::session::{Completion, ErrorRecord, RequestKind, SessionState};
use crate::transport::{Transport, TransportEvents};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Receives the transport's callbacks on its drain context and records them
/// into the session's shared state. Nothing else computes business logic
/// from raw events.
pub(crate) struct EventSink {
  state: Arc<SessionState>,
  transport: Arc<dyn Transport>,
  benign_codes: HashSet<i32>,
}

impl EventSink {
  pub fn new(state: Arc<SessionState>, transport: Arc<dyn Transport>, benign_codes: HashSet<i32>) -> Self {
    EventSink { state, transport, benign_codes }
  }
}

impl TransportEvents for EventSink {
  fn next_valid_id(&self, request_id: i32) {
    debug!("Ready: next valid id {}", request_id);
    self.state.record_ready(request_id);
  }

  fn error(&self, req_id: i32, code: i32, message: &str) {
    self.state.push_error(ErrorRecord { req_id, code, message: message.to_string() });

    // A broker error addressed to an in-flight lookup or order terminates
    // that request with the sentinel code. Historical streams have no error
    // terminal; a fatal code tears the session down instead.
    self.state.with_pending(req_id, |pending| {
      if pending.completion.is_none()
        && matches!(pending.kind, RequestKind::ContractDetails | RequestKind::Order)
      {
        pending.completion = Some(Completion::Error(ERROR_SENTINEL_CODE));
      }
    });

    if req_id != UNTIED_REQUEST_ID && !self.benign_codes.contains(&code) {
      error!("Fatal broker error (req {}, code {}): {} -- closing session", req_id, code, message);
      if self.transport.is_connected() {
        if let Err(e) = self.transport.disconnect() {
          warn!("Error while force-closing session: {}", e);
        }
      }
      self.state.notify_all();
    } else {
      info!("Broker advisory (req {}, code {}): {}", req_id, code, message);
    }
  }

  fn historical_bar(&self, req_id: i32, bar: Bar) {
    self.state.with_pending(req_id, |pending| {
      pending.bars.push(bar);
    });
  }

  fn historical_data_end(&self, req_id: i32) {
    debug!("Historical data end for request {}", req_id);
    self.state.complete(req_id, Completion::Success);
  }

  fn contract_details(&self, req_id: i32, details: ContractDetails) {
    self.state.with_pending(req_id, |pending| {
      pending.contract_details = Some(details);
    });
  }

  fn contract_details_end(&self, req_id: i32) {
    debug!("Contract details end for request {}", req_id);
    self.state.complete(req_id, Completion::Success);
  }

  fn order_status(&self, row: OrderStatusRow) {
    info!("Order {} status: {}", row.order_id, row.status);
    let order_id = row.order_id;
    self.state.with_pending(order_id, |pending| {
      // Upsert keyed by order id: identical re-deliveries collapse,
      // a changed row is appended alongside the earlier ones.
      if !pending.order_statuses.iter().any(|existing| *existing == row) {
        pending.order_statuses.push(row);
      }
      if pending.completion.is_none() {
        // The first status acknowledgement ends the wait, whatever the
        // status string says.
        pending.completion = Some(Completion::Success);
      }
    });
  }

  fn managed_accounts(&self, accounts_csv: &str) {
    let accounts = assemble::parse_account_list(accounts_csv);
    debug!("Managed accounts: {:?}", accounts);
    self.state.set_accounts(accounts);
  }

  fn connection_closed(&self) {
    info!("Transport reported connection closed");
    self.state.notify_all();
  }
}
