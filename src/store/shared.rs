// Cross-process backing
// SQLite database named after the segment, kept in a volatile directory
//
// Every process attaching the same name opens the same database file. The
// decoded table is cached per connection and reloaded only when another
// connection has committed since the last look (PRAGMA data_version).
// Writes run inside an IMMEDIATE transaction, which serializes writers
// across processes and makes each store call atomic.

use parking_lot::Mutex;
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::table::OrderTable;
use super::Backing;
use crate::command::OrderId;
use crate::error::StoreError;
use crate::record::{OrderRecord, OrderStatus};

/// Overrides the directory segments and queues are created in.
pub const SEGMENT_DIR_ENV: &str = "ORDER_BOOK_SEGMENT_DIR";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory for named segments: `$ORDER_BOOK_SEGMENT_DIR`, else `/dev/shm`
/// when it exists, else the system temp dir.
pub fn default_segment_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(SEGMENT_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// File backing a named segment inside `dir`.
pub fn segment_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.segment", name))
}

struct SegmentState {
    conn: Connection,
    table: OrderTable,
    data_version: Option<i64>,
}

pub struct SharedSegment {
    path: PathBuf,
    state: Mutex<SegmentState>,
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SharedSegment {
    /// Attaches to (or creates) segment `name` inside `dir`.
    pub fn attach_in(dir: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let path = segment_path(dir, name);
        let unavailable = |reason: String| StoreError::Unavailable {
            name: name.to_string(),
            path: path.clone(),
            reason,
        };

        std::fs::create_dir_all(dir).map_err(|e| unavailable(e.to_string()))?;
        let conn = Connection::open(&path).map_err(|e| unavailable(e.to_string()))?;
        Self::prepare(&conn).map_err(|e| unavailable(e.to_string()))?;

        info!("Order segment '{}' attached at {}", name, path.display());
        Ok(Self {
            path,
            state: Mutex::new(SegmentState {
                conn,
                table: OrderTable::new(),
                data_version: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn prepare(conn: &Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS orders (
                order_id INTEGER PRIMARY KEY,
                account TEXT NOT NULL,
                ticker TEXT NOT NULL,
                status INTEGER NOT NULL,
                payload BLOB NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Reloads the cached table when someone else committed since the last
    /// refresh. Must run inside the caller's transaction.
    fn refresh(
        conn: &Connection,
        table: &mut OrderTable,
        seen: &mut Option<i64>,
    ) -> Result<(), StoreError> {
        let version: i64 = conn.pragma_query_value(None, "data_version", |row| row.get(0))?;
        if *seen == Some(version) {
            return Ok(());
        }

        let mut stmt =
            conn.prepare("SELECT order_id, account, ticker, status, payload FROM orders")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, OrderId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (order_id, account, ticker, code, payload) in rows {
            let status = OrderStatus::from_code(code).ok_or_else(|| StoreError::CorruptRow {
                order_id,
                detail: format!("unknown status code {}", code),
            })?;
            records.push(OrderRecord {
                order_id,
                account,
                ticker,
                status,
                payload,
            });
        }

        *table = OrderTable::from_records(records);
        *seen = Some(version);
        debug!("Order segment reloaded: {} records", table.len());
        Ok(())
    }

    fn flush(conn: &Connection, table: &OrderTable, ids: &[OrderId]) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO orders (order_id, account, ticker, status, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(order_id) DO UPDATE SET
                account = excluded.account,
                ticker = excluded.ticker,
                status = excluded.status,
                payload = excluded.payload",
        )?;
        for record in ids.iter().filter_map(|id| table.get(*id)) {
            stmt.execute(params![
                record.order_id,
                record.account,
                record.ticker,
                record.status.code(),
                record.payload,
            ])?;
        }
        Ok(())
    }
}

impl Backing for SharedSegment {
    fn attach(name: &str) -> Result<Self, StoreError> {
        Self::attach_in(default_segment_dir(), name)
    }

    fn read<R>(&self, f: impl FnOnce(&OrderTable) -> R) -> Result<R, StoreError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let tx = state.conn.transaction()?;
        Self::refresh(&tx, &mut state.table, &mut state.data_version)?;
        tx.commit()?;

        Ok(f(&state.table))
    }

    fn write<R>(&self, f: impl FnOnce(&mut OrderTable) -> R) -> Result<R, StoreError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let tx = state
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::refresh(&tx, &mut state.table, &mut state.data_version)?;

        let out = f(&mut state.table);
        let dirty = state.table.take_dirty();

        let flushed = Self::flush(&tx, &state.table, &dirty).and_then(|()| tx.commit());
        if let Err(e) = flushed {
            // The cache now holds writes the database rejected; force a reload.
            state.data_version = None;
            return Err(e.into());
        }
        Ok(out)
    }
}
