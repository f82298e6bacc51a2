//! Named, indexed order store
//!
//! `OrderStore<B>` holds [`OrderRecord`]s behind a unique `order_id` index
//! and two non-unique composite indices, `(account, ticker)` and
//! `(status, account)`. Where the records live is decided by the backing:
//!
//! - [`HeapSegment`]: process-local, shared by name inside one process
//! - [`SharedSegment`]: a named segment any process can attach to
//!
//! Each store call is atomic on its own. There are no multi-call
//! transactions, so a reader may observe an order mid-lifecycle.

pub mod heap;
pub mod shared;
pub mod table;

pub use heap::HeapSegment;
pub use shared::{default_segment_dir, SharedSegment, SEGMENT_DIR_ENV};
pub use table::{IndexKey, OrderTable};

use tracing::debug;

use crate::command::{OrderCommand, OrderId};
use crate::error::{CodecError, StoreError};
use crate::record::{OrderRecord, OrderStatus};

/// Backing-memory strategy for an [`OrderStore`].
///
/// `read` and `write` each run their closure against a consistent view of
/// the whole table; a `write` is published atomically when it returns.
pub trait Backing: Send + Sync + Sized {
    /// Attaches to (or creates) the segment called `name`.
    fn attach(name: &str) -> Result<Self, StoreError>;

    fn read<R>(&self, f: impl FnOnce(&OrderTable) -> R) -> Result<R, StoreError>;

    fn write<R>(&self, f: impl FnOnce(&mut OrderTable) -> R) -> Result<R, StoreError>;
}

#[derive(Debug)]
pub struct OrderStore<B: Backing> {
    name: String,
    backing: B,
}

/// Store shared with other processes.
pub type SharedOrderStore = OrderStore<SharedSegment>;

/// Store private to this process.
pub type LocalOrderStore = OrderStore<HeapSegment>;

impl<B: Backing> OrderStore<B> {
    /// Attaches to the segment called `name`, creating it if needed.
    pub fn open(name: &str) -> Result<Self, StoreError> {
        Ok(Self::with_backing(name, B::attach(name)?))
    }

    /// Wraps an already attached backing.
    pub fn with_backing(name: &str, backing: B) -> Self {
        Self {
            name: name.to_string(),
            backing,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts by primary key. `Ok(false)` when `order_id` already exists;
    /// the stored record is left as it was.
    pub fn insert(&self, record: OrderRecord) -> Result<bool, StoreError> {
        let order_id = record.order_id;
        let inserted = self.backing.write(|table| table.insert(record))?;
        debug!(
            "[{}] insert order {}: {}",
            self.name,
            order_id,
            if inserted { "ok" } else { "duplicate" }
        );
        Ok(inserted)
    }

    /// Every record, in `order_id` order.
    pub fn retrieve_all(&self) -> Result<Vec<OrderRecord>, StoreError> {
        self.backing.read(|table| table.all().cloned().collect())
    }

    /// Records matching a composite key or its leading component.
    pub fn retrieve_by(&self, key: &IndexKey) -> Result<Vec<OrderRecord>, StoreError> {
        self.backing
            .read(|table| table.lookup(key).into_iter().cloned().collect())
    }

    /// Zero or one record.
    pub fn retrieve_by_id(&self, order_id: OrderId) -> Result<Vec<OrderRecord>, StoreError> {
        self.backing
            .read(|table| table.get(order_id).cloned().into_iter().collect())
    }

    /// Copies `record` into the slot keyed by `order_id`.
    ///
    /// The record's `account` and `ticker` are re-derived from its payload
    /// first, so the indices always agree with the payload. The slot keeps
    /// its `order_id`. Returns `Ok(false)` without writing when the id is
    /// absent.
    pub fn update(&self, record: &OrderRecord, order_id: OrderId) -> Result<bool, StoreError> {
        let mut next = record.clone();
        next.sync_keys()?;
        let updated = self
            .backing
            .write(|table| table.modify(order_id, |slot| next.apply_to(slot)))?;
        if !updated {
            debug!("[{}] update skipped, order {} not found", self.name, order_id);
        }
        Ok(updated)
    }

    /// Decodes the stored command, lets `f` change it, then re-encodes it
    /// and re-derives keys and status, all inside one write. `Ok(None)`
    /// when the id is absent.
    pub fn modify_command<T>(
        &self,
        order_id: OrderId,
        f: impl FnOnce(&mut OrderCommand) -> T,
    ) -> Result<Option<T>, StoreError> {
        let outcome = self.backing.write(|table| -> Result<Option<T>, CodecError> {
            let Some(current) = table.get(order_id) else {
                return Ok(None);
            };

            let mut command = current.command()?;
            let out = f(&mut command);

            let mut next = current.clone();
            next.store(&command)?;
            if let Some(status) = OrderStatus::from_response(&command.response) {
                next.status = status;
            }
            table.modify(order_id, |slot| next.apply_to(slot));
            Ok(Some(out))
        })?;
        Ok(outcome?)
    }

    /// Decoded commands for every record.
    pub fn commands(&self) -> Result<Vec<OrderCommand>, StoreError> {
        self.retrieve_all()?
            .iter()
            .map(|record| record.command().map_err(StoreError::from))
            .collect()
    }

    /// Decoded commands for a secondary key.
    pub fn commands_by(&self, key: &IndexKey) -> Result<Vec<OrderCommand>, StoreError> {
        self.retrieve_by(key)?
            .iter()
            .map(|record| record.command().map_err(StoreError::from))
            .collect()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.backing.read(|table| table.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}
