//! Process-local backing
//!
//! Segments live in a process-wide registry, so every `attach` of the same
//! name inside one process shares one table. Nothing outlives the process.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::table::OrderTable;
use super::Backing;
use crate::error::StoreError;

type Registry = Mutex<HashMap<String, Arc<RwLock<OrderTable>>>>;

fn registry() -> &'static Registry {
    static SEGMENTS: OnceLock<Registry> = OnceLock::new();
    SEGMENTS.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Debug, Clone)]
pub struct HeapSegment {
    table: Arc<RwLock<OrderTable>>,
}

impl HeapSegment {
    /// Drops the named segment from the registry. Handles that are already
    /// attached keep their table.
    pub fn remove(name: &str) -> bool {
        registry().lock().remove(name).is_some()
    }
}

impl Backing for HeapSegment {
    fn attach(name: &str) -> Result<Self, StoreError> {
        let table = registry()
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(Self { table })
    }

    fn read<R>(&self, f: impl FnOnce(&OrderTable) -> R) -> Result<R, StoreError> {
        let table = self.table.read();
        Ok(f(&*table))
    }

    fn write<R>(&self, f: impl FnOnce(&mut OrderTable) -> R) -> Result<R, StoreError> {
        let mut table = self.table.write();
        let out = f(&mut *table);
        table.take_dirty();
        Ok(out)
    }
}
