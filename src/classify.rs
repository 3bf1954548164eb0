//! Value classification: plain immediate vs. code/data/stack/heap reference.
//!
//! Given an arbitrary integer, decides which mapped range (if any) it points
//! into and renders the payload found there: a disassembled instruction for
//! code, a quoted string or hex word for data. Writable memory is checked
//! before executable memory, so `rwx` pages read as data (the mutable
//! payload, not stale code bytes, is what gets rendered).

use std::collections::BTreeMap;

use crate::backend::{read_word, Backend};
use crate::cache::CacheEntry;
use crate::elf::{section_containing, SectionHeader, SectionKind};
use crate::inspector::Inspector;
use crate::maps::{MemoryRange, RangeSelector};
use crate::types::{ClassifiedValue, ValueKind};

/// Sentinel rendered when a mapped address cannot actually be read.
pub const MEM_ERROR: &str = "MemError";

/// Longest string payload rendered before truncation.
const MAX_STRING: usize = 64;

fn printable_byte(b: u8) -> bool {
    (0x20..=0x7e).contains(&b) || matches!(b, b'\t' | b'\n' | b'\r')
}

/// Whether a machine word looks like the start of a printable string:
/// all printable bytes, allowing NUL padding after at least one of them.
pub(crate) fn printable_word(bytes: &[u8]) -> bool {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    end > 0 && bytes[..end].iter().all(|b| printable_byte(*b))
}

/// Read the NUL-terminated string at `addr`, bounded by [`MAX_STRING`].
fn read_c_string<B: Backend + ?Sized>(backend: &B, addr: u64) -> String {
    let mut out = Vec::new();
    while out.len() < MAX_STRING {
        let Ok(chunk) = backend.read_mem(addr + out.len() as u64, 8) else {
            break;
        };
        match chunk.iter().position(|b| *b == 0) {
            Some(pos) => {
                out.extend_from_slice(&chunk[..pos]);
                break;
            }
            None => out.extend_from_slice(&chunk),
        }
    }
    out.truncate(MAX_STRING);
    String::from_utf8_lossy(&out).into_owned()
}

/// Render the payload at a data address: the string there if the word looks
/// printable, the raw word as a hex literal otherwise. `None` on read failure.
pub(crate) fn render_data<B: Backend + ?Sized>(backend: &B, addr: u64) -> Option<String> {
    let size = backend.arch().pointer_size();
    let word = read_word(backend, addr).ok()?;
    let bytes = &word.to_le_bytes()[..size];
    if printable_word(bytes) {
        Some(format!("{:?}", read_c_string(backend, addr)))
    } else {
        Some(format!("{:#x}", word))
    }
}

/// Classify `value` against a prepared address-space snapshot.
///
/// `owner_sections` holds the section table of the image mapping `value`
/// when the containing range is executable; an empty map means the owner has
/// no usable section table (vdso, JIT pages) and the bytes themselves decide.
pub(crate) fn classify_value<B: Backend + ?Sized>(
    backend: &B,
    value: u64,
    ranges: &[MemoryRange],
    heap: Option<&MemoryRange>,
    owner_sections: &BTreeMap<String, SectionHeader>,
) -> ClassifiedValue {
    let Some(range) = ranges.iter().find(|r| r.contains(value)) else {
        return ClassifiedValue::immediate(value);
    };

    if range.perms.write {
        let kind = match heap {
            Some(h) if h.contains(value) => ValueKind::Heap,
            _ => ValueKind::Data,
        };
        return ClassifiedValue {
            raw: value,
            kind,
            rendered: render_data(backend, value).unwrap_or_else(|| MEM_ERROR.to_string()),
        };
    }

    if range.perms.execute {
        if owner_sections.is_empty() {
            // No section table for this mapping; trust the decoder.
            return match backend.disassemble(value, 1) {
                Ok(insts) if insts.first().is_some_and(|i| !i.text.contains("(bad)")) => {
                    ClassifiedValue {
                        raw: value,
                        kind: ValueKind::Code,
                        rendered: insts[0].text.clone(),
                    }
                }
                _ => rodata(backend, value),
            };
        }
        return match section_containing(owner_sections, value) {
            Some(sect) if sect.kind == SectionKind::Code => {
                match backend.disassemble(value, 1) {
                    Ok(insts) if !insts.is_empty() => ClassifiedValue {
                        raw: value,
                        kind: ValueKind::Code,
                        rendered: insts[0].text.clone(),
                    },
                    _ => rodata(backend, value),
                }
            }
            // RoData section, or executable range not covered by any section.
            _ => rodata(backend, value),
        };
    }

    rodata(backend, value)
}

fn rodata<B: Backend + ?Sized>(backend: &B, value: u64) -> ClassifiedValue {
    ClassifiedValue {
        raw: value,
        kind: ValueKind::RoData,
        rendered: render_data(backend, value).unwrap_or_else(|| MEM_ERROR.to_string()),
    }
}

impl<B: Backend> Inspector<B> {
    /// Classify an integer as immediate or code/rodata/data/heap reference
    /// and render its payload.
    pub fn classify(&self, value: u64) -> ClassifiedValue {
        let key = format!("{:#x}", value);
        if let Some(CacheEntry::Value(v)) = self.cache().get("classify", &key) {
            return v;
        }

        let ranges = self.vmmap(&RangeSelector::All);
        let heap_ranges = self.vmmap(&RangeSelector::Heap);
        let owner_sections = self.owner_sections(value, &ranges);
        let result = classify_value(
            self.backend(),
            value,
            &ranges,
            heap_ranges.first(),
            &owner_sections,
        );
        self.cache()
            .insert("classify", key, CacheEntry::Value(result.clone()));
        result
    }

    /// Section table of whichever image maps an executable `value`:
    /// the main image's when the binary owns it, the shared object's
    /// otherwise. Empty for non-executable or unowned addresses.
    fn owner_sections(
        &self,
        value: u64,
        ranges: &[MemoryRange],
    ) -> BTreeMap<String, SectionHeader> {
        let Some(range) = ranges.iter().find(|r| r.contains(value)) else {
            return BTreeMap::new();
        };
        if !range.perms.execute || range.perms.write {
            return BTreeMap::new();
        }
        let in_binary = self
            .vmmap(&RangeSelector::Binary)
            .iter()
            .any(|r| r.contains(value));
        if in_binary {
            self.sections()
        } else {
            self.sections_of(&range.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::maps::Permissions;
    use crate::types::Architecture;

    fn range(start: u64, end: u64, perms: &str, name: &str) -> MemoryRange {
        MemoryRange {
            start,
            end,
            perms: Permissions::parse(perms).unwrap(),
            name: name.to_string(),
        }
    }

    fn no_sections() -> BTreeMap<String, SectionHeader> {
        BTreeMap::new()
    }

    #[test]
    fn unmapped_value_is_immediate() {
        let backend = MockBackend::new(Architecture::X86_64);
        let ranges = vec![range(0x400000, 0x401000, "r-xp", "/bin/target")];
        let v = classify_value(&backend, 0xdeadbeef, &ranges, None, &no_sections());
        assert_eq!(v.kind, ValueKind::Immediate);
        assert_eq!(v.rendered, "");
        assert_eq!(v.raw, 0xdeadbeef);
    }

    #[test]
    fn writable_word_renders_as_hex() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.map_block(0x601000, 0x00401234u64.to_le_bytes().to_vec());
        let ranges = vec![range(0x601000, 0x602000, "rw-p", "/bin/target")];
        let v = classify_value(&backend, 0x601000, &ranges, None, &no_sections());
        assert_eq!(v.kind, ValueKind::Data);
        assert_eq!(v.rendered, "0x401234");
    }

    #[test]
    fn writable_string_renders_quoted() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        let mut data = b"/bin/sh\0".to_vec();
        data.resize(16, 0);
        backend.map_block(0x601000, data);
        let ranges = vec![range(0x601000, 0x602000, "rw-p", "/bin/target")];
        let v = classify_value(&backend, 0x601000, &ranges, None, &no_sections());
        assert_eq!(v.kind, ValueKind::Data);
        assert_eq!(v.rendered, "\"/bin/sh\"");
    }

    #[test]
    fn heap_range_yields_heap_kind() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.map_block(0xa00010, vec![0u8; 8]);
        let heap = range(0xa00000, 0xa21000, "rw-p", "[heap]");
        let ranges = vec![heap.clone()];
        let v = classify_value(&backend, 0xa00010, &ranges, Some(&heap), &no_sections());
        assert_eq!(v.kind, ValueKind::Heap);
    }

    #[test]
    fn rwx_page_is_treated_as_data() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.map_block(0x700000, 0x1122u64.to_le_bytes().to_vec());
        let ranges = vec![range(0x700000, 0x701000, "rwxp", "mapped")];
        let v = classify_value(&backend, 0x700000, &ranges, None, &no_sections());
        assert_eq!(v.kind, ValueKind::Data);
        assert_eq!(v.rendered, "0x1122");
    }

    #[test]
    fn code_section_renders_instruction() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.add_inst(0x401050, "call   0x401030");
        let ranges = vec![range(0x401000, 0x402000, "r-xp", "/bin/target")];
        let sections = BTreeMap::from([(
            ".text".to_string(),
            SectionHeader {
                name: ".text".to_string(),
                start: 0x401000,
                end: 0x402000,
                kind: SectionKind::Code,
            },
        )]);
        let v = classify_value(&backend, 0x401050, &ranges, None, &sections);
        assert_eq!(v.kind, ValueKind::Code);
        assert_eq!(v.rendered, "call   0x401030");
    }

    #[test]
    fn executable_rodata_section_falls_through_to_data_rendering() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.map_block(0x405000, b"constant\0\0\0\0\0\0\0\0".to_vec());
        let ranges = vec![range(0x400000, 0x406000, "r-xp", "/bin/target")];
        let sections = BTreeMap::from([(
            ".rodata".to_string(),
            SectionHeader {
                name: ".rodata".to_string(),
                start: 0x405000,
                end: 0x406000,
                kind: SectionKind::RoData,
            },
        )]);
        let v = classify_value(&backend, 0x405000, &ranges, None, &sections);
        assert_eq!(v.kind, ValueKind::RoData);
        assert_eq!(v.rendered, "\"constant\"");
    }

    #[test]
    fn sectionless_executable_uses_decoder_verdict() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.add_inst(0x7ffff000, "mov    rax, 0xe7");
        let ranges = vec![range(0x7ffff000, 0x7ffff800, "r-xp", "[vdso]")];
        let v = classify_value(&backend, 0x7ffff000, &ranges, None, &no_sections());
        assert_eq!(v.kind, ValueKind::Code);

        // Bad decode falls back to rodata rendering; no bytes mapped → MemError.
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.add_inst(0x7ffff000, "(bad)");
        let v = classify_value(&backend, 0x7ffff000, &ranges, None, &no_sections());
        assert_eq!(v.kind, ValueKind::RoData);
        assert_eq!(v.rendered, MEM_ERROR);
    }

    #[test]
    fn readonly_read_failure_renders_sentinel() {
        let backend = MockBackend::new(Architecture::X86_64);
        let ranges = vec![range(0x500000, 0x501000, "r--p", "/bin/target")];
        let v = classify_value(&backend, 0x500800, &ranges, None, &no_sections());
        assert_eq!(v.kind, ValueKind::RoData);
        assert_eq!(v.rendered, MEM_ERROR);
    }

    // Remote mock whose address space comes from a scripted section
    // listing, so the writable block classifies through the full facade.
    fn remote_inspector_with_block(addr: u64, len: usize) -> Inspector<MockBackend> {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.remote = true;
        backend.commands.insert(
            "info files".to_string(),
            "\t`/bin/target', file type elf64-x86-64.\n\
             \t0x0000000000600000 - 0x0000000000610000 is .data\n"
                .to_string(),
        );
        backend.set_reg("sp", 0x7ffd0000);
        backend.map_block(addr, vec![0u8; len]);
        Inspector::new(backend)
    }

    #[test]
    fn written_payload_renders_back_unchanged() {
        let inspector = remote_inspector_with_block(0x600000, 32);

        // non-printable payload comes back as the same word
        let word = 0x1122334455667788u64;
        inspector
            .backend()
            .write_mem(0x600000, &word.to_le_bytes())
            .unwrap();
        inspector.begin_command();
        let v = inspector.classify(0x600000);
        assert_eq!(v.kind, ValueKind::Data);
        assert_eq!(v.rendered, format!("{:#x}", word));

        // printable payload comes back as the same string
        inspector.backend().write_mem(0x600010, b"/bin/sh\0").unwrap();
        inspector.begin_command();
        let v = inspector.classify(0x600010);
        assert_eq!(v.kind, ValueKind::Data);
        assert_eq!(v.rendered, "\"/bin/sh\"");
    }

    #[test]
    fn printable_word_rules() {
        assert!(printable_word(b"AAAAAAAA"));
        assert!(printable_word(b"hi\0\0\0\0\0\0"));
        assert!(!printable_word(&[0u8; 8]));
        assert!(!printable_word(&[0x41, 0x00, 0x41, 0, 0, 0, 0, 0]));
        assert!(!printable_word(&[0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0]));
    }

    #[test]
    fn four_byte_words_on_32_bit_targets() {
        let mut backend = MockBackend::new(Architecture::Arm);
        backend.map_block(0x20000, vec![0x78, 0x56, 0x34, 0x12]);
        let ranges = vec![range(0x20000, 0x21000, "rw-p", "mapped")];
        let v = classify_value(&backend, 0x20000, &ranges, None, &no_sections());
        assert_eq!(v.rendered, "0x12345678");
    }
}
