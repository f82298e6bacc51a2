// Command intake
// Named cross-process FIFO of encoded order commands
//
// Producers (`order-book submit`, `order-book cancel`) push, the session
// pulls one command per tick. A pull never blocks: an empty queue is
// `Ok(None)`.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::codec;
use crate::command::OrderCommand;
use crate::error::QueueError;
use crate::store::default_segment_dir;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Non-blocking source of commands for the dispatch loop.
pub trait CommandSource: Send {
    /// Removes and returns the oldest pending command, or `None` when
    /// nothing is pending.
    fn pull(&mut self) -> Result<Option<OrderCommand>, QueueError>;
}

impl CommandSource for VecDeque<OrderCommand> {
    fn pull(&mut self) -> Result<Option<OrderCommand>, QueueError> {
        Ok(self.pop_front())
    }
}

/// File backing queue `name` inside `dir`.
pub fn queue_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.queue", name))
}

pub struct CommandQueue {
    name: String,
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CommandQueue {
    /// Creates queue `name` in the default segment directory, discarding
    /// anything left over from a previous session.
    pub fn create(name: &str) -> Result<Self, QueueError> {
        Self::create_in(default_segment_dir(), name)
    }

    /// Attaches to queue `name` in the default segment directory, creating
    /// it when missing. Pending commands are kept.
    pub fn open(name: &str) -> Result<Self, QueueError> {
        Self::open_in(default_segment_dir(), name)
    }

    pub fn create_in(dir: impl AsRef<Path>, name: &str) -> Result<Self, QueueError> {
        let queue = Self::open_in(dir, name)?;
        let purged = queue.conn.lock().execute("DELETE FROM commands", [])?;
        if purged > 0 {
            info!("Command queue '{}' purged {} stale commands", name, purged);
        }
        Ok(queue)
    }

    pub fn open_in(dir: impl AsRef<Path>, name: &str) -> Result<Self, QueueError> {
        let dir = dir.as_ref();
        let path = queue_path(dir, name);
        let unavailable = |reason: String| QueueError::Unavailable {
            name: name.to_string(),
            path: path.clone(),
            reason,
        };

        std::fs::create_dir_all(dir).map_err(|e| unavailable(e.to_string()))?;
        let conn = Connection::open(&path).map_err(|e| unavailable(e.to_string()))?;
        Self::prepare(&conn).map_err(|e| unavailable(e.to_string()))?;

        debug!("Command queue '{}' attached at {}", name, path.display());
        Ok(Self {
            name: name.to_string(),
            path,
            conn: Mutex::new(conn),
        })
    }

    fn prepare(conn: &Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS commands (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                payload BLOB NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `command`. Returns its sequence number.
    pub fn push(&self, command: &OrderCommand) -> Result<i64, QueueError> {
        let payload = codec::encode(command)?;
        let conn = self.conn.lock();
        conn.execute("INSERT INTO commands (payload) VALUES (?1)", params![payload])?;
        let seq = conn.last_insert_rowid();
        debug!("Queued command {} as #{}", command, seq);
        Ok(seq)
    }

    /// Number of pending commands.
    pub fn len(&self) -> Result<usize, QueueError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM commands", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    /// Removes the oldest slot. An undecodable slot is still removed and
    /// reported as `QueueError::Codec`.
    fn take_front(&self) -> Result<Option<OrderCommand>, QueueError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let front: Option<(i64, Vec<u8>)> = tx
            .query_row(
                "SELECT seq, payload FROM commands ORDER BY seq LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((seq, payload)) = front else {
            return Ok(None);
        };
        tx.execute("DELETE FROM commands WHERE seq = ?1", params![seq])?;
        tx.commit()?;

        codec::decode(&payload)
            .map(Some)
            .map_err(|source| QueueError::Codec { seq, source })
    }
}

impl CommandSource for CommandQueue {
    fn pull(&mut self) -> Result<Option<OrderCommand>, QueueError> {
        self.take_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Contract, Instruction, Order};

    fn place(ticker: &str) -> OrderCommand {
        OrderCommand::place(
            Order {
                account: "ACC1".to_string(),
                total_quantity: 100,
                ..Default::default()
            },
            Contract::stock(ticker, "SMART"),
        )
    }

    #[test]
    fn test_vecdeque_source_is_fifo() {
        let mut source: VecDeque<OrderCommand> = VecDeque::new();
        source.push_back(place("IBM"));
        source.push_back(OrderCommand::cancel(7));

        assert_eq!(source.pull().unwrap().unwrap().ticker(), "IBM");
        assert_eq!(source.pull().unwrap().unwrap().instruction, Instruction::Cancel);
        assert!(source.pull().unwrap().is_none());
    }

    #[test]
    fn test_queue_fifo_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let producer = CommandQueue::create_in(dir.path(), "orders").unwrap();
        let mut consumer = CommandQueue::open_in(dir.path(), "orders").unwrap();

        producer.push(&place("IBM")).unwrap();
        producer.push(&place("MSFT")).unwrap();
        producer.push(&OrderCommand::cancel(42)).unwrap();
        assert_eq!(consumer.len().unwrap(), 3);

        assert_eq!(consumer.pull().unwrap().unwrap().ticker(), "IBM");
        assert_eq!(consumer.pull().unwrap().unwrap().ticker(), "MSFT");
        let cancel = consumer.pull().unwrap().unwrap();
        assert_eq!(cancel.instruction, Instruction::Cancel);
        assert_eq!(cancel.order_id, 42);
        assert!(consumer.pull().unwrap().is_none());
        assert!(producer.is_empty().unwrap());
    }

    #[test]
    fn test_create_purges_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let old = CommandQueue::create_in(dir.path(), "orders").unwrap();
        old.push(&place("IBM")).unwrap();

        let fresh = CommandQueue::create_in(dir.path(), "orders").unwrap();
        assert!(fresh.is_empty().unwrap());
    }

    #[test]
    fn test_open_keeps_pending_commands() {
        let dir = tempfile::tempdir().unwrap();
        CommandQueue::create_in(dir.path(), "orders")
            .unwrap()
            .push(&place("IBM"))
            .unwrap();
        let reopened = CommandQueue::open_in(dir.path(), "orders").unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
    }

    #[test]
    fn test_undecodable_slot_is_removed_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = CommandQueue::create_in(dir.path(), "orders").unwrap();
        queue
            .conn
            .lock()
            .execute(
                "INSERT INTO commands (payload) VALUES (?1)",
                params![vec![0u8, 1, 2]],
            )
            .unwrap();
        queue.push(&place("IBM")).unwrap();

        assert!(matches!(queue.pull(), Err(QueueError::Codec { seq: 1, .. })));
        assert_eq!(queue.pull().unwrap().unwrap().ticker(), "IBM");
    }
}
