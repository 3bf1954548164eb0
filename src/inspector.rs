//! The introspection engine facade.
//!
//! [`Inspector`] owns one backend and one per-command query cache; the
//! operations themselves (address-space mapping, section and symbol queries,
//! value classification, chain walking, flag decoding, branch evaluation,
//! argument inference) are implemented next to their data in the component
//! modules. Process snapshots live here since they cut across registers and
//! the whole writable address space.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::cache::QueryCache;
use crate::error::Result;
use crate::maps::RangeSelector;

/// Introspection engine over one attached debugging session.
pub struct Inspector<B: Backend> {
    backend: B,
    cache: QueryCache,
}

impl<B: Backend> Inspector<B> {
    pub fn new(backend: B) -> Self {
        Inspector {
            backend,
            cache: QueryCache::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Start a new user command: the debuggee may have run since the last
    /// one, so every cached answer is dropped wholesale.
    pub fn begin_command(&self) {
        self.cache.begin_command();
    }

    /// Capture registers and all writable memory of the stopped debuggee.
    pub fn take_snapshot(&self) -> Result<Snapshot> {
        let registers = self.backend.registers()?;
        let mut writable_memory = BTreeMap::new();
        for range in self.vmmap(&RangeSelector::All) {
            if !range.perms.write {
                continue;
            }
            let len = (range.end - range.start) as usize;
            match self.backend.read_mem(range.start, len) {
                Ok(data) => {
                    writable_memory.insert(range.start, data);
                }
                // guard pages and device maps refuse reads; skip them
                Err(e) => debug!(start = format_args!("{:#x}", range.start), error = %e,
                    "skipping unreadable writable range"),
            }
        }
        Ok(Snapshot {
            registers,
            writable_memory,
        })
    }

    /// Write a snapshot back into the debuggee: memory first, then registers.
    pub fn restore_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        for (start, data) in &snapshot.writable_memory {
            if let Err(e) = self.backend.write_mem(*start, data) {
                warn!(start = format_args!("{:#x}", start), error = %e,
                    "snapshot range no longer writable");
            }
        }
        for (name, value) in &snapshot.registers {
            self.backend
                .execute(&format!("set ${} = {:#x}", name, value))?;
        }
        Ok(())
    }
}

/// Saved execution state: register file plus every writable mapping.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub registers: BTreeMap<String, u64>,
    pub writable_memory: BTreeMap<u64, Vec<u8>>,
}
