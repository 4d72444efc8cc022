// ibsync/src/assemble.rs
// Accumulated raw event state -> final return values.

use crate::contract::{Bar, ContractDetails};
use crate::order::{OrderConfirmation, OrderStatusRow};
use crate::session::PendingRequest;

/// Historical rows, in emission order. Duplicate bars from the transport
/// pass through as-is.
pub(crate) fn bars(pending: PendingRequest) -> Vec<Bar> {
  pending.bars
}

/// The resolved descriptor, or `None` when the lookup completed without one
/// ("no matching instrument").
pub(crate) fn contract(pending: PendingRequest) -> Option<ContractDetails> {
  pending.contract_details
}

/// Split a comma-separated account list, dropping empty entries, order
/// preserved.
pub(crate) fn parse_account_list(csv: &str) -> Vec<String> {
  csv.split(',').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

/// Confirmation for an acknowledged submission. Ids come from the status
/// row the broker sent, not from the request.
pub(crate) fn order_accepted(row: &OrderStatusRow) -> OrderConfirmation {
  OrderConfirmation {
    accepted: true,
    order_id: row.order_id,
    client_id: row.client_id,
    perm_id: row.perm_id,
    status: row.status.clone(),
    message: format!("Order {} successfully submitted", row.order_id),
  }
}

/// Failure report for a submission the broker rejected or that never got an
/// acknowledgement. Falls back to the request-side ids.
pub(crate) fn order_failed(order_id: i32, client_id: i32, reason: &str) -> OrderConfirmation {
  OrderConfirmation {
    accepted: false,
    order_id,
    client_id,
    perm_id: 0,
    status: "Failed".to_string(),
    message: format!("Order {} failed: {}", order_id, reason),
  }
}
