//! Order store properties over both backings

mod common;

use std::collections::BTreeSet;

use common::{place, response, Inbound, ScriptedClient};
use order_book::{
    Backing, BrokerSession, CommandQueue, Dispatch, HeapSegment, IndexKey, OrderCommand,
    OrderId, OrderRecord, OrderStatus, OrderStore, OrderType, SharedOrderStore, SharedSegment,
};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

const ACCOUNTS: [&str; 3] = ["ACC1", "ACC2", "ACC3"];
const TICKERS: [&str; 4] = ["IBM", "MSFT", "AAPL", "GE"];

fn record(order_id: OrderId, account: &str, ticker: &str) -> OrderRecord {
    let mut command = place(account, ticker, 100, OrderType::Market, 0.0);
    command.assign_id(order_id);
    OrderRecord::from_command(&command).unwrap()
}

/// Every secondary lookup must agree with a scan over all records.
fn assert_indices_consistent<B: Backing>(store: &OrderStore<B>) {
    let all = store.retrieve_all().unwrap();
    let ids = |records: Vec<OrderRecord>| -> BTreeSet<OrderId> {
        records.into_iter().map(|r| r.order_id).collect()
    };

    for account in ACCOUNTS {
        let expected: BTreeSet<_> = all
            .iter()
            .filter(|r| r.account == account)
            .map(|r| r.order_id)
            .collect();
        let found = ids(store.retrieve_by(&IndexKey::Account(account.into())).unwrap());
        assert_eq!(found, expected, "account {}", account);

        for ticker in TICKERS {
            let expected: BTreeSet<_> = all
                .iter()
                .filter(|r| r.account == account && r.ticker == ticker)
                .map(|r| r.order_id)
                .collect();
            let found = ids(store
                .retrieve_by(&IndexKey::account_ticker(account, ticker))
                .unwrap());
            assert_eq!(found, expected, "({}, {})", account, ticker);
        }

        for status in OrderStatus::ALL {
            let expected: BTreeSet<_> = all
                .iter()
                .filter(|r| r.status == status && r.account == account)
                .map(|r| r.order_id)
                .collect();
            let found = ids(store
                .retrieve_by(&IndexKey::status_account(status, account))
                .unwrap());
            assert_eq!(found, expected, "({}, {})", status, account);
        }
    }

    for record in &all {
        let command = record.command().unwrap();
        assert_eq!(record.account, command.order.account);
        assert_eq!(record.ticker, command.contract.symbol);
    }
}

/// Inserts, re-keys and advances statuses in a fixed pattern.
fn churn<B: Backing>(store: &OrderStore<B>) {
    for id in 1..=24 {
        let account = ACCOUNTS[id as usize % ACCOUNTS.len()];
        let ticker = TICKERS[id as usize % TICKERS.len()];
        assert!(store.insert(record(id, account, ticker)).unwrap());
    }
    assert_indices_consistent(store);

    // Move every third order to another account and ticker.
    for id in (3..=24).step_by(3) {
        let mut current = store.retrieve_by_id(id).unwrap().remove(0);
        let mut command = current.command().unwrap();
        command.order.account = "ACC3".to_string();
        command.contract.symbol = "GE".to_string();
        current.store(&command).unwrap();
        assert!(store.update(&current, id).unwrap());
    }
    assert_indices_consistent(store);

    let statuses = ["Submitted", "Filled", "PendingSubmit", "Inactive", "Cancelled"];
    for id in 1..=24 {
        let status = statuses[id as usize % statuses.len()];
        let filled = if status == "Filled" { 100 } else { 0 };
        let remaining = 100 - filled;
        let updated = store
            .modify_command(id, |command| {
                command.record_response(response(status, filled, remaining))
            })
            .unwrap();
        assert!(updated.is_some());
    }
    assert_indices_consistent(store);

    assert_eq!(store.len().unwrap(), 24);
    assert_eq!(store.retrieve_by_id(0).unwrap(), vec![]);
    assert_eq!(store.modify_command(999, |_| ()).unwrap(), None);
}

// =============================================================================
// Index consistency
// =============================================================================

#[test]
fn test_heap_indices_follow_updates() {
    HeapSegment::remove("props-heap-churn");
    let store = OrderStore::<HeapSegment>::open("props-heap-churn").unwrap();
    churn(&store);
}

#[test]
fn test_shared_indices_follow_updates() {
    let dir = TempDir::new().unwrap();
    let segment = SharedSegment::attach_in(dir.path(), "props").unwrap();
    let store = SharedOrderStore::with_backing("props", segment);
    churn(&store);

    // A fresh attach rebuilds the same indices from the segment rows.
    let reattached =
        SharedOrderStore::with_backing("props", SharedSegment::attach_in(dir.path(), "props").unwrap());
    assert_eq!(reattached.retrieve_all().unwrap(), store.retrieve_all().unwrap());
    assert_indices_consistent(&reattached);
}

#[test]
fn test_update_cannot_change_order_id() {
    HeapSegment::remove("props-update-id");
    let store = OrderStore::<HeapSegment>::open("props-update-id").unwrap();
    store.insert(record(5, "ACC1", "IBM")).unwrap();

    // Payload claims id 6; the slot for 5 keeps its key.
    let moved = record(6, "ACC2", "MSFT");
    assert!(store.update(&moved, 5).unwrap());
    assert!(store.retrieve_by_id(6).unwrap().is_empty());
    let kept = &store.retrieve_by_id(5).unwrap()[0];
    assert_eq!(kept.order_id, 5);
    assert_eq!(kept.account, "ACC2");
    assert_eq!(kept.ticker, "MSFT");

    assert!(!store.update(&moved, 6).unwrap());
}

// =============================================================================
// Cross-handle visibility
// =============================================================================

#[test]
fn test_reader_handle_sees_writer_changes() {
    let dir = TempDir::new().unwrap();
    let writer =
        SharedOrderStore::with_backing("book", SharedSegment::attach_in(dir.path(), "book").unwrap());
    let reader =
        SharedOrderStore::with_backing("book", SharedSegment::attach_in(dir.path(), "book").unwrap());
    assert!(reader.is_empty().unwrap());

    writer.insert(record(42, "ACC1", "IBM")).unwrap();
    assert_eq!(reader.retrieve_by_id(42).unwrap().len(), 1);

    writer
        .modify_command(42, |command| command.record_response(response("Filled", 100, 0)))
        .unwrap();
    let seen = reader
        .retrieve_by(&IndexKey::status_account(OrderStatus::Filled, "ACC1"))
        .unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].command().unwrap().response.filled, 100);

    // Writes through the reader are just as visible the other way.
    assert!(!reader.insert(record(42, "ACC9", "XYZ")).unwrap());
    reader.insert(record(43, "ACC2", "MSFT")).unwrap();
    assert_eq!(writer.len().unwrap(), 2);
}

#[test]
fn test_heap_segments_share_by_name() {
    HeapSegment::remove("props-heap-shared");
    let first = OrderStore::<HeapSegment>::open("props-heap-shared").unwrap();
    let second = OrderStore::<HeapSegment>::open("props-heap-shared").unwrap();
    first.insert(record(1, "ACC1", "IBM")).unwrap();
    assert_eq!(second.retrieve_all().unwrap(), first.retrieve_all().unwrap());

    let other = OrderStore::<HeapSegment>::open("props-heap-other").unwrap();
    assert!(other.retrieve_by_id(1).unwrap().is_empty());
}

// =============================================================================
// Queue-fed session over a shared segment
// =============================================================================

#[tokio::test]
async fn test_queue_fed_session_records_into_shared_segment() {
    let dir = TempDir::new().unwrap();
    let producer = CommandQueue::create_in(dir.path(), "orders").unwrap();
    producer
        .push(&place("ACC1", "IBM", 1000, OrderType::Limit, 0.01))
        .unwrap();
    producer.push(&OrderCommand::default()).unwrap();
    producer.push(&OrderCommand::cancel(7)).unwrap();

    let consumer = CommandQueue::open_in(dir.path(), "orders").unwrap();
    let store =
        SharedOrderStore::with_backing("book", SharedSegment::attach_in(dir.path(), "book").unwrap());
    let client = ScriptedClient::connected();
    let mut session = BrokerSession::new(client.clone(), consumer, store);

    client.push(Inbound::NextValidId(7));
    client.push(Inbound::NextValidId(8));
    assert!(matches!(session.tick().await, Dispatch::NoIds));
    assert!(matches!(session.tick().await, Dispatch::Placed(7)));
    assert!(matches!(session.tick().await, Dispatch::Skipped(_)));
    assert!(matches!(session.tick().await, Dispatch::Cancelled(7)));
    assert!(matches!(session.tick().await, Dispatch::QueueEmpty));
    assert!(producer.is_empty().unwrap());

    let viewer =
        SharedOrderStore::with_backing("book", SharedSegment::attach_in(dir.path(), "book").unwrap());
    let records = viewer.retrieve_by(&IndexKey::Account("ACC1".into())).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].order_id, 7);
    assert_eq!(records[0].status, OrderStatus::Created);
    assert_eq!(client.log().lock().cancelled, vec![7]);
}
