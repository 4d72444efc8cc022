// ibsync/src/ops.rs
// The four synchronous operations. Each one runs the same lifecycle:
// validate, open a session, await readiness, issue one request, block until
// the sink records completion (or the connection drops, or the wait times
// out), tear the session down, assemble the result.

use crate::assemble;
use crate::base::BridgeError;
use crate::config::BridgeConfig;
use crate::contract::{Bar, Contract, ContractDetails, HistoricalDataQuery};
use crate::history::{OrderHistoryStore, OrderRecord};
use crate::order::{OrderConfirmation, OrderRequest, OrderType};
use crate::session::{Completion, RequestKind, Session, WaitOutcome};
use crate::transport::TransportFactory;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;

/// Synchronous facade over the broker: blocking request/response calls for
/// callers that do not want to see callbacks or connection state.
///
/// Every call owns a fresh session for its whole duration; nothing is shared
/// between calls, so concurrent operations from different threads cannot
/// cross-contaminate.
pub struct SyncBroker {
  config: BridgeConfig,
  factory: Arc<dyn TransportFactory>,
  history: OrderHistoryStore,
}

impl SyncBroker {
  pub fn new(config: BridgeConfig, factory: Arc<dyn TransportFactory>) -> Self {
    let history = OrderHistoryStore::new(&config.order_history_path);
    SyncBroker { config, factory, history }
  }

  pub fn config(&self) -> &BridgeConfig {
    &self.config
  }

  pub fn history(&self) -> &OrderHistoryStore {
    &self.history
  }

  /// List the accounts the session manages. Readiness alone completes this
  /// operation; no request is issued.
  pub fn fetch_managed_accounts(&self) -> Result<Vec<String>, BridgeError> {
    info!("Fetching managed accounts");
    let session = Session::open(&self.config, self.factory.as_ref())?;
    let result = (|| {
      session.next_request_id(self.config.ready_timeout)?;
      debug!("Session ready; collecting account list");
      Ok(session.state().accounts().unwrap_or_default())
    })();
    session.close();
    result
  }

  /// Fetch historical price bars for one contract.
  ///
  /// Rows come back in emission order. If the session disconnects mid-wait
  /// the rows accumulated so far are returned as-is; an empty reply is an
  /// empty vector, not an error. Exceeding the completion timeout is an
  /// error.
  pub fn fetch_historical_data(
    &self,
    contract: &Contract,
    query: &HistoricalDataQuery,
  ) -> Result<Vec<Bar>, BridgeError> {
    contract.validate()?;
    query.validate()?;
    info!("Fetching historical data: {} {} / {}", contract, query.duration, query.bar_size);

    let session = Session::open(&self.config, self.factory.as_ref())?;
    let result = self.historical_inner(&session, contract, query);
    session.close();
    result
  }

  fn historical_inner(
    &self,
    session: &Session,
    contract: &Contract,
    query: &HistoricalDataQuery,
  ) -> Result<Vec<Bar>, BridgeError> {
    let req_id = session.next_request_id(self.config.ready_timeout)?;
    session.state().insert_pending(req_id, RequestKind::HistoricalData)?;
    session.transport().request_historical_data(req_id, contract, query)?;
    debug!("Historical request {} sent; awaiting completion", req_id);

    match session.wait_for_completion(req_id, self.config.completion_timeout)? {
      WaitOutcome::Completed(pending) => {
        let rows = assemble::bars(pending);
        info!("Historical request {} complete: {} bars", req_id, rows.len());
        Ok(rows)
      }
      WaitOutcome::Disconnected(pending) => {
        let rows = assemble::bars(pending);
        warn!("Historical request {} interrupted by disconnect; returning {} partial bars", req_id, rows.len());
        Ok(rows)
      }
    }
  }

  /// Resolve a contract. `Ok(None)` means the broker found no matching
  /// instrument; callers must branch on this before acting on the result.
  pub fn fetch_contract_details(&self, contract: &Contract) -> Result<Option<ContractDetails>, BridgeError> {
    contract.validate()?;
    info!("Looking up contract details for {}", contract);

    let session = Session::open(&self.config, self.factory.as_ref())?;
    let result = self.contract_inner(&session, contract);
    session.close();
    result
  }

  fn contract_inner(
    &self,
    session: &Session,
    contract: &Contract,
  ) -> Result<Option<ContractDetails>, BridgeError> {
    let req_id = session.next_request_id(self.config.ready_timeout)?;
    session.state().insert_pending(req_id, RequestKind::ContractDetails)?;
    session.transport().request_contract_details(req_id, contract)?;
    debug!("Contract lookup {} sent; awaiting completion", req_id);

    let pending = match session.wait_for_completion(req_id, self.config.completion_timeout)? {
      WaitOutcome::Completed(pending) => pending,
      WaitOutcome::Disconnected(pending) => {
        warn!("Contract lookup {} interrupted by disconnect", req_id);
        pending
      }
    };
    let details = assemble::contract(pending);
    match &details {
      Some(d) => info!("Contract lookup {} resolved: con_id {}", req_id, d.contract.con_id),
      None => info!("Contract lookup {}: no matching instrument", req_id),
    }
    Ok(details)
  }

  /// Submit one order and wait for the broker's first acknowledgement.
  ///
  /// Any acknowledged terminal outcome (accepted or rejected) appends
  /// exactly one record to the order history; a session that dies before
  /// any acknowledgement appends nothing and reports failure.
  pub fn submit_order(
    &self,
    contract: &Contract,
    order: &OrderRequest,
  ) -> Result<OrderConfirmation, BridgeError> {
    contract.validate()?;
    order.validate()?;
    info!("Submitting order: {} {} {} x {}", order.side, contract, order.order_type, order.quantity);

    let session = Session::open(&self.config, self.factory.as_ref())?;
    let result = self.order_inner(&session, contract, order);
    session.close();
    result
  }

  fn order_inner(
    &self,
    session: &Session,
    contract: &Contract,
    order: &OrderRequest,
  ) -> Result<OrderConfirmation, BridgeError> {
    let order_id = session.next_request_id(self.config.ready_timeout)?;
    session.state().insert_pending(order_id, RequestKind::Order)?;
    session.transport().place_order(order_id, contract, order)?;
    debug!("Order {} placed; awaiting acknowledgement", order_id);

    let outcome = session.wait_for_completion(order_id, self.config.completion_timeout)?;
    let pending = match outcome {
      WaitOutcome::Completed(pending) => pending,
      WaitOutcome::Disconnected(pending) => pending,
    };

    match pending.completion {
      Some(Completion::Success) => {
        let row = pending.order_statuses.first().cloned().ok_or_else(|| {
          BridgeError::InternalError(format!("Order {} completed without a status row", order_id))
        })?;
        let confirmation = assemble::order_accepted(&row);
        self.record_submission(contract, order, row.order_id, row.client_id, row.perm_id)?;
        info!("{}", confirmation.message);
        Ok(confirmation)
      }
      Some(Completion::Error(code)) => {
        let reason = session
          .error_log()
          .iter()
          .rev()
          .find(|record| record.req_id == order_id)
          .map(|record| format!("code {}: {}", record.code, record.message))
          .unwrap_or_else(|| format!("rejected with sentinel {}", code));
        let confirmation = assemble::order_failed(order_id, session.client_id(), &reason);
        // A rejected submission is still an attempt; record it rather than
        // omitting it.
        self.record_submission(contract, order, order_id, session.client_id(), 0)?;
        warn!("{}", confirmation.message);
        Ok(confirmation)
      }
      None => {
        let confirmation =
          assemble::order_failed(order_id, session.client_id(), "connection lost before acknowledgement");
        warn!("{}", confirmation.message);
        Ok(confirmation)
      }
    }
  }

  fn record_submission(
    &self,
    contract: &Contract,
    order: &OrderRequest,
    order_id: i32,
    client_id: i32,
    perm_id: i32,
  ) -> Result<(), BridgeError> {
    let lmt_price = match order.order_type {
      OrderType::Limit => order
        .limit_price
        .map(|p| p.to_string())
        .unwrap_or_else(|| "N/A".to_string()),
      OrderType::Market => "N/A".to_string(),
    };
    self.history.append(OrderRecord {
      timestamp: Utc::now(),
      order_id,
      client_id,
      perm_id,
      con_id: contract.con_id,
      symbol: contract.symbol.clone(),
      action: order.side.to_string(),
      size: order.quantity,
      order_type: order.order_type.to_string(),
      lmt_price,
    })
  }
}
