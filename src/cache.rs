//! Process-state-scoped query memoization.
//!
//! Results of address-space, ELF and classification queries are only valid
//! for as long as the debuggee has not run. The cache is therefore keyed by
//! `(operation id, normalized arguments)` and carries a generation counter:
//! the surrounding command layer calls [`QueryCache::begin_command`] at the
//! start of every top-level invocation, which bumps the generation and drops
//! every entry. A stale entry is a correctness bug, not a performance issue.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use crate::elf::SectionHeader;
use crate::maps::MemoryRange;
use crate::types::ClassifiedValue;

/// Memoized result of one engine operation.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    Ranges(Vec<MemoryRange>),
    Sections(BTreeMap<String, SectionHeader>),
    Symbols(BTreeMap<String, u64>),
    Value(ClassifiedValue),
    Chain(Vec<ClassifiedValue>),
}

/// Single-writer memoization table for one debugging session.
///
/// Interior mutability only; the engine is single-threaded (one active
/// command at a time) per the concurrency model.
#[derive(Debug, Default)]
pub struct QueryCache {
    generation: Cell<u64>,
    entries: RefCell<HashMap<(&'static str, String), CacheEntry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        QueryCache::default()
    }

    /// Invalidate everything; called once per top-level command.
    pub fn begin_command(&self) {
        self.generation.set(self.generation.get() + 1);
        self.entries.borrow_mut().clear();
    }

    /// Number of invalidations so far.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn get(&self, op: &'static str, args: &str) -> Option<CacheEntry> {
        self.entries.borrow().get(&(op, args.to_string())).cloned()
    }

    pub fn insert(&self, op: &'static str, args: String, entry: CacheEntry) {
        self.entries.borrow_mut().insert((op, args), entry);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss() {
        let cache = QueryCache::new();
        assert!(cache.get("vmmap", "all").is_none());

        cache.insert("vmmap", "all".into(), CacheEntry::Ranges(Vec::new()));
        assert!(matches!(
            cache.get("vmmap", "all"),
            Some(CacheEntry::Ranges(_))
        ));
        // Same operation, different arguments.
        assert!(cache.get("vmmap", "heap").is_none());
        // Different operation, same arguments.
        assert!(cache.get("sections", "all").is_none());
    }

    #[test]
    fn begin_command_invalidates_wholesale() {
        let cache = QueryCache::new();
        cache.insert("vmmap", "all".into(), CacheEntry::Ranges(Vec::new()));
        cache.insert("symbols", "".into(), CacheEntry::Symbols(BTreeMap::new()));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.generation(), 0);

        cache.begin_command();
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.len(), 0);
        assert!(cache.get("vmmap", "all").is_none());
    }
}
