//! Reference-chain walking: repeated pointer classification.
//!
//! Follows a value through memory as long as each payload itself renders as
//! an address, producing a bounded chain. An explicit loop over an owned
//! sequence handles self-references, cycles over longer pointer loops, and
//! the depth bound; there is no recursion to overflow.

use crate::backend::Backend;
use crate::cache::CacheEntry;
use crate::inspector::Inspector;
use crate::types::ClassifiedValue;

/// Rendering of the final entry when the depth bound truncates a chain.
pub const TRUNCATED: &str = "--> ...";

impl<B: Backend> Inspector<B> {
    /// Follow `value` as a pointer chain, at most `depth` dereferences deep.
    ///
    /// `depth = 0` means unbounded (a very large internal bound still
    /// guarantees termination). The chain stops when a payload is not
    /// address-shaped, points at itself, revisits an earlier link, or the
    /// bound is hit, in which case the last entry is replaced with the
    /// [`TRUNCATED`] sentinel.
    pub fn examine_chain(&self, value: u64, depth: usize) -> Vec<ClassifiedValue> {
        let key = format!("{:#x}/{}", value, depth);
        if let Some(CacheEntry::Chain(c)) = self.cache().get("chain", &key) {
            return c;
        }

        let bound = if depth == 0 { usize::MAX >> 1 } else { depth };
        let mut chain: Vec<ClassifiedValue> = Vec::new();
        let mut current = self.classify(value);
        loop {
            if chain.len() > bound {
                if let Some(last) = chain.last_mut() {
                    last.rendered = TRUNCATED.to_string();
                }
                break;
            }
            chain.push(current.clone());

            let Some(next) = current.pointee() else {
                break;
            };
            if next == current.raw {
                break; // self-reference
            }
            if chain.iter().any(|link| link.raw == next) {
                break; // pointer cycle
            }
            current = self.classify(next);
        }

        self.cache()
            .insert("chain", key, CacheEntry::Chain(chain.clone()));
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::types::ValueKind;

    // A remote mock exposes its address space through the section listing,
    // which maps the whole image range as rwxp: pointer payloads stored in
    // mock memory then classify as data and keep the chain walking.
    fn inspector_with_data(
        blocks: &[(u64, Vec<u8>)],
    ) -> Inspector<MockBackend> {
        let mut backend = MockBackend::new(crate::types::Architecture::X86_64);
        backend.remote = true;
        backend.commands.insert(
            "info files".to_string(),
            "\t`/bin/target', file type elf64-x86-64.\n\
             \t0x0000000000600000 - 0x0000000000610000 is .data\n"
                .to_string(),
        );
        backend.set_reg("sp", 0x7ffd000);
        for (addr, data) in blocks {
            backend.map_block(*addr, data.clone());
        }
        Inspector::new(backend)
    }

    fn ptr(value: u64) -> Vec<u8> {
        value.to_le_bytes().to_vec()
    }

    #[test]
    fn plain_value_gives_single_immediate_entry() {
        let inspector = inspector_with_data(&[]);
        let chain = inspector.examine_chain(0x41414141_41414141, 5);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].kind, ValueKind::Immediate);
    }

    #[test]
    fn chain_terminates_at_non_pointer_payload() {
        // 0x600000 -> 0x600100 -> "end" (string payload, not an address)
        let inspector = inspector_with_data(&[
            (0x600000, ptr(0x600100)),
            (0x600100, b"end\0\0\0\0\0".to_vec()),
        ]);
        let chain = inspector.examine_chain(0x600000, 5);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].rendered, "0x600100");
        assert_eq!(chain[1].rendered, "\"end\"");
    }

    #[test]
    fn self_pointer_stops_after_one_link() {
        let inspector = inspector_with_data(&[(0x600000, ptr(0x600000))]);
        let chain = inspector.examine_chain(0x600000, 5);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].rendered, "0x600000");
    }

    #[test]
    fn two_cycle_stops_without_revisiting() {
        let inspector = inspector_with_data(&[
            (0x600000, ptr(0x600800)),
            (0x600800, ptr(0x600000)),
        ]);
        let chain = inspector.examine_chain(0x600000, 5);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].raw, 0x600000);
        assert_eq!(chain[1].raw, 0x600800);
    }

    #[test]
    fn depth_bound_truncates_with_sentinel() {
        // 0x600000 -> 0x600010 -> 0x600020 -> ... (10 hops)
        let blocks: Vec<(u64, Vec<u8>)> = (0..10)
            .map(|i| (0x600000 + i * 0x10, ptr(0x600010 + i * 0x10)))
            .collect();
        let inspector = inspector_with_data(&blocks);
        let chain = inspector.examine_chain(0x600000, 3);
        assert_eq!(chain.len(), 4); // depth + 1, last one a sentinel
        assert_eq!(chain[3].rendered, TRUNCATED);
        assert_eq!(chain[0].rendered, "0x600010");
    }

    #[test]
    fn depth_zero_is_unbounded_but_terminates() {
        let inspector = inspector_with_data(&[
            (0x600000, ptr(0x600800)),
            (0x600800, ptr(0x600900)),
            (0x600900, ptr(0x600000)),
        ]);
        let chain = inspector.examine_chain(0x600000, 0);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn chain_results_are_cached_per_command() {
        let inspector = inspector_with_data(&[(0x600000, ptr(0x600000))]);
        let first = inspector.examine_chain(0x600000, 5);
        let second = inspector.examine_chain(0x600000, 5);
        assert_eq!(first, second);

        inspector.begin_command();
        let third = inspector.examine_chain(0x600000, 5);
        assert_eq!(first, third);
    }
}
