//! List command implementation
//!
//! Read-only view of the shared order store. Attaching never modifies the
//! segment, so this can run next to a serving session.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use order_book::{
    Config, IndexKey, OrderCommand, OrderRecord, OrderStatus, SharedOrderStore, SharedSegment,
};

/// One printed row
#[derive(Debug, Serialize)]
struct Row {
    order_id: i64,
    account: String,
    ticker: String,
    status: String,
    command: OrderCommand,
}

impl Row {
    fn from_record(record: &OrderRecord) -> Result<Self> {
        let command = record
            .command()
            .with_context(|| format!("Failed to decode order {}", record.order_id))?;
        Ok(Row {
            order_id: record.order_id,
            account: record.account.clone(),
            ticker: record.ticker.clone(),
            status: record.status.to_string(),
            command,
        })
    }
}

/// Picks the index that answers the filter combination.
fn lookup_key(
    account: Option<String>,
    ticker: Option<String>,
    status: Option<OrderStatus>,
) -> Option<IndexKey> {
    match (account, ticker, status) {
        (Some(account), Some(ticker), _) => Some(IndexKey::account_ticker(account, ticker)),
        (Some(account), None, Some(status)) => Some(IndexKey::status_account(status, account)),
        (Some(account), None, None) => Some(IndexKey::Account(account)),
        (None, _, Some(status)) => Some(IndexKey::Status(status)),
        (None, _, None) => None,
    }
}

pub fn run(
    config: Config,
    account: Option<String>,
    ticker: Option<String>,
    status: Option<String>,
    json: bool,
) -> Result<()> {
    config.validate()?;
    let status = status
        .map(|s| s.parse::<OrderStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let segment = SharedSegment::attach_in(config.segment_dir(), &config.store.name)?;
    let store = SharedOrderStore::with_backing(&config.store.name, segment);

    let ticker = ticker.map(|t| t.to_uppercase());
    let records = match lookup_key(account, ticker, status) {
        Some(key) => store.retrieve_by(&key)?,
        None => store.retrieve_all()?,
    };
    // (account, ticker) lookups ignore the status filter; apply it here.
    let records: Vec<OrderRecord> = records
        .into_iter()
        .filter(|r| status.map_or(true, |s| r.status == s))
        .collect();

    let rows = records
        .iter()
        .map(Row::from_record)
        .collect::<Result<Vec<_>>>()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "{:>10}  {:<12} {:<8} {:<13} {:<6} {:>8} {:>12}  {}",
        "ORDER", "ACCOUNT", "TICKER", "STATUS", "SIDE", "QTY", "LIMIT", "LAST RESPONSE"
    );
    for row in &rows {
        let order = &row.command.order;
        println!(
            "{:>10}  {:<12} {:<8} {:<13} {:<6} {:>8} {:>12.4}  {}",
            row.order_id,
            row.account,
            row.ticker,
            row.status,
            order.action,
            order.total_quantity,
            order.lmt_price,
            row.command.response.status
        );
    }
    println!("{} order(s)", rows.len());
    Ok(())
}
