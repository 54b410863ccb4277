//! # Module table - name-keyed set of live executors.
//!
//! ```text
//! Bootstrapper::start(module) ─► reserve(name, exec)  ─► exec.refresh()
//!                                   └─ duplicate ─► ModuleExists
//! Bootstrapper::stop(name)    ─► take(name) ─► exec.close()
//! Bootstrapper::shutdown()    ─► drain()    ─► close in reverse start order
//! ```
//!
//! ## Rules
//! - The table owns the executor handles; closing happens outside its lock.
//! - Entries keep their start sequence so shutdown can reverse it.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::bootstrap::{BootstrapExecutor, BootstrapState};
use crate::error::RuntimeError;

struct Entry {
    seq: u64,
    executor: BootstrapExecutor,
}

#[derive(Default)]
struct Table {
    next_seq: u64,
    modules: HashMap<String, Entry>,
}

/// Live executors by module name.
#[derive(Default)]
pub(crate) struct ModuleTable {
    inner: RwLock<Table>,
}

impl ModuleTable {
    /// Adds `executor` under `name`, rejecting duplicates.
    pub(crate) async fn reserve(
        &self,
        name: &str,
        executor: BootstrapExecutor,
    ) -> Result<(), RuntimeError> {
        let mut table = self.inner.write().await;
        if table.modules.contains_key(name) {
            return Err(RuntimeError::ModuleExists {
                name: name.to_string(),
            });
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table
            .modules
            .insert(name.to_string(), Entry { seq, executor });
        Ok(())
    }

    /// Removes and returns the executor for `name`.
    pub(crate) async fn take(&self, name: &str) -> Result<BootstrapExecutor, RuntimeError> {
        self.inner
            .write()
            .await
            .modules
            .remove(name)
            .map(|e| e.executor)
            .ok_or_else(|| RuntimeError::ModuleNotFound {
                name: name.to_string(),
            })
    }

    /// Executor for `name`, if managed.
    pub(crate) async fn get(&self, name: &str) -> Option<BootstrapExecutor> {
        self.inner
            .read()
            .await
            .modules
            .get(name)
            .map(|e| e.executor.clone())
    }

    /// Sorted names with their current states.
    pub(crate) async fn list(&self) -> Vec<(String, BootstrapState)> {
        let table = self.inner.read().await;
        let mut out: Vec<(String, BootstrapState)> = table
            .modules
            .iter()
            .map(|(name, e)| (name.clone(), e.executor.state()))
            .collect();
        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Empties the table, newest first.
    pub(crate) async fn drain(&self) -> Vec<BootstrapExecutor> {
        let mut entries: Vec<Entry> = {
            let mut table = self.inner.write().await;
            table.modules.drain().map(|(_, e)| e).collect()
        };
        entries.sort_unstable_by(|a, b| b.seq.cmp(&a.seq));
        entries.into_iter().map(|e| e.executor).collect()
    }
}
