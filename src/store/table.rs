//! Backend-agnostic indexed order table
//!
//! Records are owned by a `BTreeMap` keyed on `order_id` (the unique
//! index). The two composite indices are ordered sets of
//! `(leading, trailing, order_id)` tuples, so a full-key lookup and a
//! leading-component lookup are both a single range scan.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::command::OrderId;
use crate::record::{OrderRecord, OrderStatus};

/// Secondary lookup keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    /// Full `(account, ticker)` key.
    AccountTicker { account: String, ticker: String },
    /// Leading component of `(account, ticker)`.
    Account(String),
    /// Full `(status, account)` key.
    StatusAccount { status: OrderStatus, account: String },
    /// Leading component of `(status, account)`.
    Status(OrderStatus),
}

impl IndexKey {
    pub fn account_ticker(account: impl Into<String>, ticker: impl Into<String>) -> Self {
        IndexKey::AccountTicker {
            account: account.into(),
            ticker: ticker.into(),
        }
    }

    pub fn status_account(status: OrderStatus, account: impl Into<String>) -> Self {
        IndexKey::StatusAccount {
            status,
            account: account.into(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct OrderTable {
    records: BTreeMap<OrderId, OrderRecord>,
    by_account_ticker: BTreeSet<(String, String, OrderId)>,
    by_status_account: BTreeSet<(OrderStatus, String, OrderId)>,
    dirty: BTreeSet<OrderId>,
}

impl OrderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from records read back from a segment. Later
    /// duplicates of an id are dropped.
    pub fn from_records(records: impl IntoIterator<Item = OrderRecord>) -> Self {
        let mut table = Self::new();
        for record in records {
            table.insert(record);
        }
        table.dirty.clear();
        table
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts by primary key. Returns `false` and leaves the table
    /// untouched when the id is already present.
    pub fn insert(&mut self, record: OrderRecord) -> bool {
        if self.records.contains_key(&record.order_id) {
            return false;
        }
        self.index(&record);
        self.dirty.insert(record.order_id);
        self.records.insert(record.order_id, record);
        true
    }

    pub fn get(&self, order_id: OrderId) -> Option<&OrderRecord> {
        self.records.get(&order_id)
    }

    /// Runs `update` against the stored slot and re-indexes it. Returns
    /// `false` when the id is absent. The slot's `order_id` is restored if
    /// `update` touched it.
    pub fn modify(&mut self, order_id: OrderId, update: impl FnOnce(&mut OrderRecord)) -> bool {
        let Some(slot) = self.records.get_mut(&order_id) else {
            return false;
        };

        self.by_account_ticker
            .remove(&(slot.account.clone(), slot.ticker.clone(), order_id));
        self.by_status_account
            .remove(&(slot.status, slot.account.clone(), order_id));

        update(slot);
        slot.order_id = order_id;

        self.by_account_ticker
            .insert((slot.account.clone(), slot.ticker.clone(), order_id));
        self.by_status_account
            .insert((slot.status, slot.account.clone(), order_id));
        self.dirty.insert(order_id);
        true
    }

    /// All records in primary-key order.
    pub fn all(&self) -> impl Iterator<Item = &OrderRecord> {
        self.records.values()
    }

    /// Records matching a secondary key, in index order.
    pub fn lookup(&self, key: &IndexKey) -> Vec<&OrderRecord> {
        let ids: Vec<OrderId> = match key {
            IndexKey::AccountTicker { account, ticker } => {
                let lo = (account.clone(), ticker.clone(), OrderId::MIN);
                let hi = (account.clone(), ticker.clone(), OrderId::MAX);
                self.by_account_ticker
                    .range(lo..=hi)
                    .map(|(_, _, id)| *id)
                    .collect()
            }
            IndexKey::Account(account) => {
                let lo = (account.clone(), String::new(), OrderId::MIN);
                self.by_account_ticker
                    .range((Bound::Included(lo), Bound::Unbounded))
                    .take_while(|(a, _, _)| a == account)
                    .map(|(_, _, id)| *id)
                    .collect()
            }
            IndexKey::StatusAccount { status, account } => {
                let lo = (*status, account.clone(), OrderId::MIN);
                let hi = (*status, account.clone(), OrderId::MAX);
                self.by_status_account
                    .range(lo..=hi)
                    .map(|(_, _, id)| *id)
                    .collect()
            }
            IndexKey::Status(status) => {
                let lo = (*status, String::new(), OrderId::MIN);
                self.by_status_account
                    .range((Bound::Included(lo), Bound::Unbounded))
                    .take_while(|(s, _, _)| s == status)
                    .map(|(_, _, id)| *id)
                    .collect()
            }
        };

        ids.iter().filter_map(|id| self.records.get(id)).collect()
    }

    /// Ids written since the last call. Backings that persist rows use
    /// this to know what to flush.
    pub fn take_dirty(&mut self) -> Vec<OrderId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    fn index(&mut self, record: &OrderRecord) {
        self.by_account_ticker.insert((
            record.account.clone(),
            record.ticker.clone(),
            record.order_id,
        ));
        self.by_status_account
            .insert((record.status, record.account.clone(), record.order_id));
    }
}
