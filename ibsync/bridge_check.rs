// bridge_check.rs
// Scenario runner for the synchronous bridge. Each scenario drives one of
// the blocking operations against a scripted transport and checks the
// outcome, so the whole bridge can be exercised without a live gateway.
// Use it like this:
//   bridge_check run all
//   bridge_check run order-market
// Look for "Scenario registration" below for available scenarios.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use inventory; // For scenario registration
use log::{error, info};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ibsync::config::BridgeConfig;
use ibsync::contract::{Bar, Contract, ContractDetails, HistoricalDataQuery, ResolvedContract};
use ibsync::order::{OrderRequest, OrderSide, OrderStatusRow};
use ibsync::transport_mock::{
  ContractReply, HistoricalReply, MockScript, MockTransportFactory, OrderReply,
};
use ibsync::SyncBroker;

// --- Scenario Definition Infrastructure ---

type ScenarioFn = fn(history_path: &PathBuf) -> Result<()>;

#[derive(Debug, Clone)]
pub struct ScenarioDefinition {
  pub name: &'static str,
  pub func: ScenarioFn,
}

inventory::collect!(ScenarioDefinition);

static SCENARIO_REGISTRY: Lazy<HashMap<&'static str, &'static ScenarioDefinition>> = Lazy::new(|| {
  inventory::iter::<ScenarioDefinition>
    .into_iter()
    .map(|def| (def.name, def))
    .collect()
});

// --- CLI Argument Parsing ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  #[clap(subcommand)]
  command: Command,
}

#[derive(Parser, Debug)]
enum Command {
  /// Run one scenario (or "all") against scripted transports.
  Run(RunArgs),
  /// List the registered scenarios.
  List,
}

#[derive(Parser, Debug)]
struct RunArgs {
  /// Scenario name (e.g. accounts, history, order-market) or "all".
  #[arg()]
  scenario_or_all: String,

  /// Where scenario order history files are written.
  #[arg(long, default_value = "bridge_check_history")]
  history_dir: PathBuf,
}

// --- Shared helpers ---

fn scenario_config(history_path: &PathBuf) -> BridgeConfig {
  BridgeConfig {
    completion_timeout: Duration::from_secs(5),
    poll_interval: Duration::from_millis(20),
    order_history_path: history_path.to_string_lossy().into_owned(),
    ..BridgeConfig::default()
  }
}

fn broker_with(history_path: &PathBuf, script: MockScript) -> SyncBroker {
  SyncBroker::new(
    scenario_config(history_path),
    Arc::new(MockTransportFactory::new(vec![script])),
  )
}

fn sample_bar(day: u32, hour: u32, close: f64) -> Bar {
  Bar {
    date: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
    open: close - 0.0010,
    high: close + 0.0005,
    low: close - 0.0015,
    close,
  }
}

// --- Scenario Implementations ---

mod scenarios {
  use super::*;

  pub(super) fn accounts_impl(history_path: &PathBuf) -> Result<()> {
    info!("--- Scenario: managed accounts ---");
    let script = MockScript {
      managed_accounts: Some("DU111,DU222,".to_string()),
      ..MockScript::default()
    };
    let broker = broker_with(history_path, script);
    let accounts = broker.fetch_managed_accounts().context("Fetching managed accounts")?;
    info!("Accounts: {:?}", accounts);
    if accounts != vec!["DU111".to_string(), "DU222".to_string()] {
      return Err(anyhow!("Unexpected account list: {:?}", accounts));
    }
    Ok(())
  }

  pub(super) fn history_impl(history_path: &PathBuf) -> Result<()> {
    info!("--- Scenario: historical data AUD.CAD 30 D / 1 hour ---");
    let rows = vec![
      sample_bar(1, 0, 0.8990),
      sample_bar(1, 1, 0.8995),
      sample_bar(2, 0, 0.9001),
    ];
    let script = MockScript {
      historical: vec![HistoricalReply { bars: rows.clone(), send_end: true, ..Default::default() }].into(),
      ..MockScript::default()
    };
    let broker = broker_with(history_path, script);
    let contract = Contract::forex_pair("AUD.CAD")?;
    let fetched = broker
      .fetch_historical_data(&contract, &HistoricalDataQuery::default())
      .context("Fetching historical data")?;
    info!("Fetched {} bars", fetched.len());
    for bar in &fetched {
      info!("  {}  O={:.4} H={:.4} L={:.4} C={:.4}", bar.date, bar.open, bar.high, bar.low, bar.close);
    }
    if fetched != rows {
      return Err(anyhow!("Bars came back reordered or incomplete"));
    }
    Ok(())
  }

  pub(super) fn contract_impl(history_path: &PathBuf) -> Result<()> {
    info!("--- Scenario: contract lookup ---");
    let details = ContractDetails {
      contract: ResolvedContract {
        con_id: 14433401,
        symbol: "AUD".to_string(),
        sec_type: "CASH".to_string(),
        exchange: "IDEALPRO".to_string(),
        currency: "CAD".to_string(),
        local_symbol: "AUD.CAD".to_string(),
      },
      long_name: "Australian dollar".to_string(),
      ..Default::default()
    };
    let script = MockScript {
      contract_details: vec![ContractReply { details: Some(details), send_end: true, ..Default::default() }]
        .into(),
      ..MockScript::default()
    };
    let broker = broker_with(history_path, script);
    let contract = Contract::forex_pair("AUD.CAD")?;
    match broker.fetch_contract_details(&contract).context("Looking up contract")? {
      Some(details) => {
        info!("Resolved: {} (con_id {})", details.long_name, details.contract.con_id);
        Ok(())
      }
      None => Err(anyhow!("Expected AUD.CAD to resolve")),
    }
  }

  pub(super) fn contract_not_found_impl(history_path: &PathBuf) -> Result<()> {
    info!("--- Scenario: contract lookup, invalid symbol ---");
    let script = MockScript {
      contract_details: vec![ContractReply {
        details: None,
        error: Some((200, "No security definition has been found for the request".to_string())),
        ..Default::default()
      }]
      .into(),
      ..MockScript::default()
    };
    let broker = broker_with(history_path, script);
    let contract = Contract::forex_pair("ZZZ.QQQ")?;
    match broker.fetch_contract_details(&contract).context("Looking up contract")? {
      None => {
        info!("Lookup correctly reported no matching instrument");
        Ok(())
      }
      Some(details) => Err(anyhow!("Bogus pair resolved to {:?}", details)),
    }
  }

  pub(super) fn order_market_impl(history_path: &PathBuf) -> Result<()> {
    info!("--- Scenario: market BUY 20000 AUD.CAD ---");
    let status = OrderStatusRow {
      order_id: 0,
      status: "Submitted".to_string(),
      filled: 0.0,
      remaining: 20000.0,
      avg_fill_price: 0.0,
      perm_id: 987_654,
      parent_id: 0,
      last_fill_price: 0.0,
      client_id: 10645,
      why_held: String::new(),
    };
    let script = MockScript {
      next_valid_id: 90,
      orders: vec![OrderReply { statuses: vec![status], ..Default::default() }].into(),
      ..MockScript::default()
    };
    let broker = broker_with(history_path, script);
    let before = broker.history().load()?.len();

    let contract = Contract::forex_pair("AUD.CAD")?;
    let order = OrderRequest::market(OrderSide::Buy, 20000.0);
    let confirmation = broker.submit_order(&contract, &order).context("Submitting order")?;
    info!("{} (perm_id {})", confirmation.message, confirmation.perm_id);

    let records = broker.history().load()?;
    if records.len() != before + 1 {
      return Err(anyhow!("Expected one new history row, found {}", records.len() - before));
    }
    let last = records.last().unwrap();
    if last.action != "BUY" || last.order_type != "MKT" || last.lmt_price != "N/A" {
      return Err(anyhow!("History row does not match the submitted order: {:?}", last));
    }
    Ok(())
  }

  pub(super) fn order_rejected_impl(history_path: &PathBuf) -> Result<()> {
    info!("--- Scenario: rejected order is recorded as failed ---");
    let script = MockScript {
      orders: vec![OrderReply {
        error: Some((201, "Order rejected - reason: insufficient margin".to_string())),
        ..Default::default()
      }]
      .into(),
      ..MockScript::default()
    };
    let broker = broker_with(history_path, script);
    let before = broker.history().load()?.len();

    let contract = Contract::forex_pair("AUD.CAD")?;
    let order = OrderRequest::market(OrderSide::Buy, 20000.0);
    let confirmation = broker.submit_order(&contract, &order).context("Submitting order")?;
    if confirmation.accepted {
      return Err(anyhow!("Rejected order reported as accepted"));
    }
    info!("{}", confirmation.message);

    let records = broker.history().load()?;
    if records.len() != before + 1 {
      return Err(anyhow!("Failed submission was not recorded"));
    }
    Ok(())
  }
}

// --- Scenario registration ---
inventory::submit! { ScenarioDefinition { name: "accounts", func: scenarios::accounts_impl } }
inventory::submit! { ScenarioDefinition { name: "history", func: scenarios::history_impl } }
inventory::submit! { ScenarioDefinition { name: "contract", func: scenarios::contract_impl } }
inventory::submit! { ScenarioDefinition { name: "contract-not-found", func: scenarios::contract_not_found_impl } }
inventory::submit! { ScenarioDefinition { name: "order-market", func: scenarios::order_market_impl } }
inventory::submit! { ScenarioDefinition { name: "order-rejected", func: scenarios::order_rejected_impl } }

fn run_scenario(def: &ScenarioDefinition, history_dir: &PathBuf) -> Result<()> {
  let history_path = history_dir.join(format!("{}_history.csv", def.name));
  if history_path.exists() {
    std::fs::remove_file(&history_path)
      .with_context(|| format!("Removing stale {}", history_path.display()))?;
  }
  (def.func)(&history_path)
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();

  match args.command {
    Command::List => {
      for name in SCENARIO_REGISTRY.keys() {
        println!("{}", name);
      }
      Ok(())
    }
    Command::Run(run_args) => {
      std::fs::create_dir_all(&run_args.history_dir)
        .with_context(|| format!("Creating {}", run_args.history_dir.display()))?;

      let selected: Vec<&'static ScenarioDefinition> = if run_args.scenario_or_all == "all" {
        let mut defs: Vec<_> = SCENARIO_REGISTRY.values().copied().collect();
        defs.sort_by_key(|def| def.name);
        defs
      } else {
        vec![*SCENARIO_REGISTRY
          .get(run_args.scenario_or_all.as_str())
          .ok_or_else(|| anyhow!("Unknown scenario '{}'; try 'list'", run_args.scenario_or_all))?]
      };

      let mut failures = 0usize;
      for def in &selected {
        match run_scenario(def, &run_args.history_dir) {
          Ok(()) => info!("PASS {}", def.name),
          Err(e) => {
            error!("FAIL {}: {:#}", def.name, e);
            failures += 1;
          }
        }
      }
      if failures > 0 {
        Err(anyhow!("{}/{} scenarios failed", failures, selected.len()))
      } else {
        info!("All {} scenarios passed", selected.len());
        Ok(())
      }
    }
  }
}
