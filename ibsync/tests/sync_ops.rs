// ibsync/tests/sync_ops.rs
// End-to-end behavior of the four synchronous operations, driven through
// scripted mock transports.

use chrono::{TimeZone, Utc};
use ibsync::config::BridgeConfig;
use ibsync::contract::{Bar, Contract, ContractDetails, HistoricalDataQuery, ResolvedContract};
use ibsync::order::{OrderRequest, OrderSide, OrderStatusRow};
use ibsync::transport_mock::{
  ContractReply, HistoricalReply, MockScript, MockTransportFactory, OrderReply,
};
use ibsync::{BridgeError, SyncBroker};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn init_logging() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config(dir: &TempDir) -> BridgeConfig {
  BridgeConfig {
    connect_timeout: Duration::from_secs(2),
    ready_timeout: Duration::from_secs(2),
    completion_timeout: Duration::from_secs(5),
    poll_interval: Duration::from_millis(20),
    order_history_path: dir.path().join("order_history.csv").to_string_lossy().into_owned(),
    ..BridgeConfig::default()
  }
}

fn broker_with(dir: &TempDir, scripts: Vec<MockScript>) -> (SyncBroker, Arc<MockTransportFactory>) {
  let factory = Arc::new(MockTransportFactory::new(scripts));
  (SyncBroker::new(test_config(dir), factory.clone()), factory)
}

fn bar(day: u32, hour: u32, close: f64) -> Bar {
  Bar {
    date: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
    open: close - 0.0010,
    high: close + 0.0005,
    low: close - 0.0015,
    close,
  }
}

fn submitted_status(perm_id: i32) -> OrderStatusRow {
  OrderStatusRow {
    order_id: 0, // rewritten by the mock to the actual correlation id
    status: "Submitted".to_string(),
    filled: 0.0,
    remaining: 20000.0,
    avg_fill_price: 0.0,
    perm_id,
    parent_id: 0,
    last_fill_price: 0.0,
    client_id: 10645,
    why_held: String::new(),
  }
}

fn aud_cad_details() -> ContractDetails {
  ContractDetails {
    contract: ResolvedContract {
      con_id: 14433401,
      symbol: "AUD".to_string(),
      sec_type: "CASH".to_string(),
      exchange: "IDEALPRO".to_string(),
      currency: "CAD".to_string(),
      local_symbol: "AUD.CAD".to_string(),
    },
    market_name: "AUD.CAD".to_string(),
    min_tick: 0.00005,
    order_types: "ACTIVETIM,AD,ADJUST".to_string(),
    valid_exchanges: "IDEALPRO".to_string(),
    long_name: "Australian dollar".to_string(),
    time_zone_id: "UTC".to_string(),
    trading_hours: "20240301:1700-20240302:1700".to_string(),
    liquid_hours: "20240301:1700-20240302:1700".to_string(),
  }
}

// --- Managed accounts ---

#[test]
fn test_fetch_managed_accounts_returns_parsed_list() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    managed_accounts: Some("DU111,,DU222,".to_string()),
    ..MockScript::default()
  };
  let (broker, factory) = broker_with(&dir, vec![script]);

  let accounts = broker.fetch_managed_accounts().unwrap();
  assert_eq!(accounts, vec!["DU111".to_string(), "DU222".to_string()]);
  // The session was torn down when the call returned.
  assert_eq!(factory.created()[0].disconnect_count(), 1);
}

#[test]
fn test_fetch_managed_accounts_without_list_is_empty() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let (broker, _factory) = broker_with(&dir, vec![MockScript::default()]);
  assert!(broker.fetch_managed_accounts().unwrap().is_empty());
}

// --- Historical data ---

#[test]
fn test_historical_fetch_preserves_order_and_count() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let rows = vec![bar(1, 0, 0.8990), bar(1, 1, 0.8995), bar(1, 2, 0.8995), bar(2, 0, 0.9001)];
  let script = MockScript {
    historical: vec![HistoricalReply { bars: rows.clone(), send_end: true, ..Default::default() }].into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let query = HistoricalDataQuery::default(); // 30 D of 1 hour bars
  let fetched = broker.fetch_historical_data(&contract, &query).unwrap();

  assert_eq!(fetched, rows);
  assert!(fetched.windows(2).all(|w| w[0].date <= w[1].date), "dates must be non-decreasing");
}

#[test]
fn test_historical_empty_response_is_empty_sequence_not_error() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    historical: vec![HistoricalReply { send_end: true, ..Default::default() }].into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let fetched = broker.fetch_historical_data(&contract, &HistoricalDataQuery::default()).unwrap();
  assert!(fetched.is_empty());
}

#[test]
fn test_historical_benign_error_does_not_abort_stream() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let rows = vec![bar(1, 0, 0.8990), bar(1, 1, 0.8995)];
  let script = MockScript {
    historical: vec![HistoricalReply {
      bars: rows.clone(),
      error: Some((2104, "Market data farm connection is OK".to_string())),
      send_end: true,
      ..Default::default()
    }]
    .into(),
    ..MockScript::default()
  };
  let (broker, factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let fetched = broker.fetch_historical_data(&contract, &HistoricalDataQuery::default()).unwrap();
  assert_eq!(fetched, rows);
  // Only the operation's own teardown closed the connection.
  assert_eq!(factory.created()[0].disconnect_count(), 1);
}

#[test]
fn test_historical_fatal_error_returns_partial_rows() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    historical: vec![HistoricalReply {
      bars: vec![bar(1, 0, 0.8990)],
      error: Some((162, "Historical Market Data Service error".to_string())),
      send_end: false,
      ..Default::default()
    }]
    .into(),
    ..MockScript::default()
  };
  let (broker, factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let fetched = broker.fetch_historical_data(&contract, &HistoricalDataQuery::default()).unwrap();
  assert_eq!(fetched, vec![bar(1, 0, 0.8990)]);
  // The sink closed the session once; the teardown close was a no-op.
  assert_eq!(factory.created()[0].disconnect_count(), 1);
}

#[test]
fn test_disconnect_mid_wait_returns_within_poll_interval() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    historical: vec![HistoricalReply {
      bars: vec![bar(1, 0, 0.8990)],
      silent_drop: true,
      ..Default::default()
    }]
    .into(),
    ..MockScript::default()
  };
  let mut config = test_config(&dir);
  config.completion_timeout = Duration::from_secs(30); // must not be what unblocks us
  let factory = Arc::new(MockTransportFactory::new(vec![script]));
  let broker = SyncBroker::new(config, factory);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let start = Instant::now();
  let fetched = broker.fetch_historical_data(&contract, &HistoricalDataQuery::default()).unwrap();
  assert_eq!(fetched.len(), 1);
  assert!(start.elapsed() < Duration::from_secs(2), "partial return took {:?}", start.elapsed());
}

#[test]
fn test_completion_timeout_when_no_reply_arrives() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  // Script has no historical reply at all: the request vanishes.
  let mut config = test_config(&dir);
  config.completion_timeout = Duration::from_millis(200);
  let factory = Arc::new(MockTransportFactory::new(vec![MockScript::default()]));
  let broker = SyncBroker::new(config, factory);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let err = broker.fetch_historical_data(&contract, &HistoricalDataQuery::default()).unwrap_err();
  assert!(matches!(err, BridgeError::Timeout(_)), "got {:?}", err);
}

#[test]
fn test_ready_timeout_when_ready_event_is_lost() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript { send_ready: false, ..MockScript::default() };
  let mut config = test_config(&dir);
  config.ready_timeout = Duration::from_millis(200);
  let factory = Arc::new(MockTransportFactory::new(vec![script]));
  let broker = SyncBroker::new(config, factory);

  let err = broker.fetch_managed_accounts().unwrap_err();
  assert!(matches!(err, BridgeError::Timeout(_)), "got {:?}", err);
}

#[test]
fn test_refused_connection_is_a_connection_error() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let broker = SyncBroker::new(test_config(&dir), Arc::new(MockTransportFactory::refusing()));
  let err = broker.fetch_managed_accounts().unwrap_err();
  assert!(matches!(err, BridgeError::ConnectionFailed(_)), "got {:?}", err);
}

#[test]
fn test_stalled_handshake_is_a_connection_error() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript { connect_stall: true, ..MockScript::default() };
  let mut config = test_config(&dir);
  config.connect_timeout = Duration::from_millis(200);
  let factory = Arc::new(MockTransportFactory::new(vec![script]));
  let broker = SyncBroker::new(config, factory);

  let err = broker.fetch_managed_accounts().unwrap_err();
  assert!(matches!(err, BridgeError::ConnectionFailed(_)), "got {:?}", err);
}

#[test]
fn test_concurrent_fetches_do_not_cross_contaminate() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let rows_a = vec![bar(1, 0, 0.8990), bar(1, 1, 0.8995), bar(1, 2, 0.9000)];
  let rows_b = vec![bar(2, 0, 2.0010), bar(2, 1, 2.0020)];
  let scripts = vec![
    MockScript {
      historical: vec![HistoricalReply { bars: rows_a.clone(), send_end: true, ..Default::default() }].into(),
      ..MockScript::default()
    },
    MockScript {
      historical: vec![HistoricalReply { bars: rows_b.clone(), send_end: true, ..Default::default() }].into(),
      ..MockScript::default()
    },
  ];
  let (broker, _factory) = broker_with(&dir, scripts);
  let broker = Arc::new(broker);

  let mut handles = Vec::new();
  for _ in 0..2 {
    let broker = broker.clone();
    handles.push(std::thread::spawn(move || {
      let contract = Contract::forex_pair("AUD.CAD").unwrap();
      broker.fetch_historical_data(&contract, &HistoricalDataQuery::default()).unwrap()
    }));
  }
  let mut results: Vec<Vec<Bar>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
  results.sort_by_key(|rows| rows.len());

  // Each caller got exactly one script's rows, intact and unmixed.
  assert_eq!(results, vec![rows_b, rows_a]);
}

// --- Contract details ---

#[test]
fn test_contract_lookup_resolves_descriptor() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    contract_details: vec![ContractReply {
      details: Some(aud_cad_details()),
      send_end: true,
      ..Default::default()
    }]
    .into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let details = broker.fetch_contract_details(&contract).unwrap();
  assert_eq!(details.unwrap().contract.con_id, 14433401);
}

#[test]
fn test_invalid_symbol_lookup_is_not_found_and_nothing_is_submitted() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    contract_details: vec![ContractReply {
      details: None,
      error: Some((200, "No security definition has been found for the request".to_string())),
      ..Default::default()
    }]
    .into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("ZZZ.QQQ").unwrap();
  let details = broker.fetch_contract_details(&contract).unwrap();
  assert!(details.is_none());

  // The caller must branch on NotFound; nothing reached the order path.
  assert!(broker.history().load().unwrap().is_empty());
}

#[test]
fn test_lookup_completing_without_descriptor_is_not_found() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    contract_details: vec![ContractReply { details: None, send_end: true, ..Default::default() }].into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  assert!(broker.fetch_contract_details(&contract).unwrap().is_none());
}

// --- Order submission ---

#[test]
fn test_market_buy_appends_exactly_one_history_row() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    next_valid_id: 90,
    orders: vec![OrderReply { statuses: vec![submitted_status(987_654)], ..Default::default() }].into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let order = OrderRequest::market(OrderSide::Buy, 20000.0);
  let confirmation = broker.submit_order(&contract, &order).unwrap();

  assert!(confirmation.accepted);
  // Ids come from the status acknowledgement, not the request payload.
  assert_eq!(confirmation.order_id, 90);
  assert_eq!(confirmation.perm_id, 987_654);
  assert_eq!(confirmation.client_id, 10645);
  assert_eq!(confirmation.message, "Order 90 successfully submitted");

  let records = broker.history().load().unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].action, "BUY");
  assert_eq!(records[0].size, 20000.0);
  assert_eq!(records[0].order_type, "MKT");
  assert_eq!(records[0].lmt_price, "N/A");
  assert_eq!(records[0].perm_id, 987_654);
}

#[test]
fn test_duplicate_status_events_still_one_history_row() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    orders: vec![OrderReply {
      statuses: vec![submitted_status(111), submitted_status(111)],
      ..Default::default()
    }]
    .into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let order = OrderRequest::market(OrderSide::Buy, 20000.0);
  assert!(broker.submit_order(&contract, &order).unwrap().accepted);
  assert_eq!(broker.history().load().unwrap().len(), 1);
}

#[test]
fn test_rejected_order_is_recorded_as_failed_submission() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    orders: vec![OrderReply {
      error: Some((201, "Order rejected - reason: insufficient margin".to_string())),
      ..Default::default()
    }]
    .into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let order = OrderRequest::limit(OrderSide::Sell, 100.0, 0.9100);
  let confirmation = broker.submit_order(&contract, &order).unwrap();

  assert!(!confirmation.accepted);
  assert!(confirmation.message.contains("code 201"), "message: {}", confirmation.message);
  assert_eq!(confirmation.perm_id, 0);

  // The attempt is recorded, flagged by its missing perm id.
  let records = broker.history().load().unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].perm_id, 0);
  assert_eq!(records[0].order_type, "LMT");
  assert_eq!(records[0].lmt_price, "0.91");
}

#[test]
fn test_unacknowledged_order_appends_nothing() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let script = MockScript {
    orders: vec![OrderReply { silent_drop: true, ..Default::default() }].into(),
    ..MockScript::default()
  };
  let (broker, _factory) = broker_with(&dir, vec![script]);

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let order = OrderRequest::market(OrderSide::Buy, 20000.0);
  let confirmation = broker.submit_order(&contract, &order).unwrap();

  assert!(!confirmation.accepted);
  assert!(broker.history().load().unwrap().is_empty());
}

#[test]
fn test_order_validation_happens_before_any_connection() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  // A refusing factory would fail any connect; validation must fire first.
  let broker = SyncBroker::new(test_config(&dir), Arc::new(MockTransportFactory::refusing()));

  let contract = Contract::forex_pair("AUD.CAD").unwrap();
  let err = broker.submit_order(&contract, &OrderRequest::market(OrderSide::Buy, -1.0)).unwrap_err();
  assert!(matches!(err, BridgeError::InvalidOrder(_)), "got {:?}", err);
}
