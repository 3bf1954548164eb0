//! ELF section layout and dynamic-symbol resolution.
//!
//! Parses the section table of the debugged image (and of loaded shared
//! objects) into classified [`SectionHeader`]s, rebasing by the runtime load
//! bias for position-independent images, and resolves dynamic symbols to
//! their PLT/GOT/relocation addresses by decoding the PLT stub.

use std::collections::BTreeMap;
use std::path::Path;

use memmap2::Mmap;
use object::{Object, ObjectSection, SectionFlags};
use regex::Regex;
use tracing::warn;

use crate::backend::{Backend, DecodedInst};
use crate::cache::CacheEntry;
use crate::error::{Error, Result};
use crate::inspector::Inspector;
use crate::maps::{MemoryRange, RangeSelector};

/// Coarse classification of an ELF section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Executable (`.text`, `.plt`, `.init`, ...).
    Code,
    /// Allocated, read-only, non-executable (`.rodata`, `.interp`, ...).
    RoData,
    /// Writable (`.data`, `.bss`, `.got`, ...).
    Data,
}

/// One allocated section of an image, with runtime (rebased) addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: String,
    pub start: u64,
    /// Exclusive.
    pub end: u64,
    pub kind: SectionKind,
}

/// PLT/GOT/relocation addresses of one dynamic symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    pub plt: Option<u64>,
    pub got: Option<u64>,
    pub reloc: Option<u64>,
}

/// Parse the allocated sections of an ELF image.
pub fn parse_sections(data: &[u8]) -> Result<BTreeMap<String, SectionHeader>> {
    let obj = object::File::parse(data).map_err(|e| Error::Elf(format!("parse: {}", e)))?;
    let mut sections = BTreeMap::new();
    for sect in obj.sections() {
        let SectionFlags::Elf { sh_flags } = sect.flags() else {
            continue;
        };
        if sh_flags & u64::from(object::elf::SHF_ALLOC) == 0 {
            continue;
        }
        let Ok(name) = sect.name() else { continue };
        if name.is_empty() {
            continue;
        }
        let kind = if sh_flags & u64::from(object::elf::SHF_EXECINSTR) != 0 {
            SectionKind::Code
        } else if sh_flags & u64::from(object::elf::SHF_WRITE) != 0 {
            SectionKind::Data
        } else {
            SectionKind::RoData
        };
        sections.insert(
            name.to_string(),
            SectionHeader {
                name: name.to_string(),
                start: sect.address(),
                end: sect.address() + sect.size(),
                kind,
            },
        );
    }
    Ok(sections)
}

/// Parse the allocated sections of an on-disk image.
pub fn sections_from_file(path: &Path) -> Result<BTreeMap<String, SectionHeader>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Elf(format!("open '{}': {}", path.display(), e)))?;
    let mmap =
        unsafe { Mmap::map(&file) }.map_err(|e| Error::Elf(format!("mmap: {}", e)))?;
    parse_sections(&mmap)
}

/// Rebase link-time section addresses by the image's runtime base.
///
/// Only upward fixups: an address already at or above the base is left
/// untouched, so non-PIE images come through unchanged.
pub fn rebase_sections(sections: &mut BTreeMap<String, SectionHeader>, base: u64) {
    for sect in sections.values_mut() {
        if sect.start < base {
            sect.start += base;
        }
        if sect.end < base {
            sect.end += base;
        }
    }
}

/// Select sections by exact name, falling back to substring match.
pub fn select_sections(
    sections: &BTreeMap<String, SectionHeader>,
    name: &str,
) -> BTreeMap<String, SectionHeader> {
    if let Some(sect) = sections.get(name) {
        return BTreeMap::from([(name.to_string(), sect.clone())]);
    }
    sections
        .iter()
        .filter(|(k, _)| k.contains(name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// The section containing `addr`, preferring the lowest end address
/// (overlapping rebased sections resolve to the tightest one).
pub fn section_containing<'a>(
    sections: &'a BTreeMap<String, SectionHeader>,
    addr: u64,
) -> Option<&'a SectionHeader> {
    let mut ordered: Vec<&SectionHeader> = sections.values().collect();
    ordered.sort_by_key(|s| s.end);
    ordered
        .into_iter()
        .find(|s| addr >= s.start && addr < s.end)
}

/// Recover GOT and relocation addresses from a disassembled PLT stub.
///
/// A classic stub is `jmp QWORD PTR [rip+disp] ; push imm ; jmp plt0`: the
/// resolved `jmp` target comment carries the GOT slot and the `push`
/// immediate the relocation index.
pub(crate) fn parse_plt_stub(insts: &[DecodedInst]) -> (Option<u64>, Option<u64>) {
    let mut got = None;
    let mut reloc = None;
    for inst in insts {
        if inst.text.contains("jmp") && got.is_none() {
            got = last_hex_literal(&inst.text);
        } else if inst.text.contains("push") && reloc.is_none() {
            reloc = last_hex_literal(&inst.text);
        }
    }
    (got, reloc)
}

/// Resolve candidate dynamic-symbol names to `name@plt` addresses.
///
/// `pattern` filters names as a regex, falling back to substring match when
/// it does not compile. Resolved addresses below `base` are rebased upward;
/// when `binmap` is non-empty, addresses outside the binary's mapped ranges
/// are dropped (they resolved into a shared object, not this image's PLT).
fn resolve_symbol_names(
    names: &[String],
    pattern: Option<&str>,
    base: u64,
    binmap: &[MemoryRange],
    lookup: impl Fn(&str) -> Option<u64>,
) -> BTreeMap<String, u64> {
    let matcher = pattern.map(|p| (Regex::new(p).ok(), p));
    let mut symbols = BTreeMap::new();
    for name in names {
        if let Some((ref re, raw)) = matcher {
            let matched = match re {
                Some(re) => re.is_match(name),
                None => name.contains(raw),
            };
            if !matched {
                continue;
            }
        }
        let plt_name = format!("{}@plt", name);
        let Some(mut addr) = lookup(&plt_name) else {
            continue;
        };
        if addr < base {
            addr += base;
        }
        if !binmap.is_empty() && !binmap.iter().any(|r| r.contains(addr)) {
            continue;
        }
        symbols.entry(plt_name).or_insert(addr);
    }
    symbols
}

/// Parse the last `0x...` literal in a line of disassembly text.
fn last_hex_literal(text: &str) -> Option<u64> {
    let pos = text.rfind("0x")?;
    let digits: String = text[pos + 2..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u64::from_str_radix(&digits, 16).ok()
}

impl<B: Backend> Inspector<B> {
    /// Classified, rebased sections of the main executable image.
    ///
    /// Missing image or unreadable section table yields an empty map,
    /// reported as a warning.
    pub fn sections(&self) -> BTreeMap<String, SectionHeader> {
        let Some(image) = self.backend().image_path() else {
            warn!("no image path; section table unavailable");
            return BTreeMap::new();
        };
        self.image_sections(&image.to_string_lossy(), &RangeSelector::Binary)
    }

    /// Sections of a loaded shared object, rebased to its mapped base.
    pub fn sections_of(&self, image: &str) -> BTreeMap<String, SectionHeader> {
        self.image_sections(image, &RangeSelector::Name(image.to_string()))
    }

    fn image_sections(
        &self,
        image: &str,
        selector: &RangeSelector,
    ) -> BTreeMap<String, SectionHeader> {
        if let Some(CacheEntry::Sections(s)) = self.cache().get("sections", image) {
            return s;
        }
        let mut sections = match sections_from_file(Path::new(image)) {
            Ok(s) => s,
            Err(e) => {
                warn!(image, error = %e, "cannot read section table");
                return BTreeMap::new();
            }
        };
        // Only a running debuggee has a runtime base to rebase against.
        if self.backend().pid().is_some() {
            if let Some(base) = self.vmmap(selector).iter().map(|r| r.start).min() {
                rebase_sections(&mut sections, base);
            }
        }
        self.cache().insert(
            "sections",
            image.to_string(),
            CacheEntry::Sections(sections.clone()),
        );
        sections
    }

    /// Dynamic symbols of the image resolved to their PLT stub addresses.
    ///
    /// Statically linked images (no `.plt`) yield an empty map. `pattern`
    /// filters candidate names (regex, falling back to substring match when
    /// the pattern does not compile).
    pub fn symbols(&self, pattern: Option<&str>) -> BTreeMap<String, u64> {
        let key = pattern.unwrap_or("").to_string();
        if let Some(CacheEntry::Symbols(s)) = self.cache().get("symbols", &key) {
            return s;
        }

        let symbols = self.resolve_plt_symbols(pattern);
        self.cache()
            .insert("symbols", key, CacheEntry::Symbols(symbols.clone()));
        symbols
    }

    fn resolve_plt_symbols(&self, pattern: Option<&str>) -> BTreeMap<String, u64> {
        let sections = self.sections();
        if !sections.contains_key(".plt") {
            // Static binary: no PLT indirection to resolve.
            return BTreeMap::new();
        }
        let Some(names) = self.dynamic_strings(&sections) else {
            return BTreeMap::new();
        };

        let binmap = self.vmmap(&RangeSelector::Binary);
        let base = binmap.iter().map(|r| r.start).min().unwrap_or(0);
        resolve_symbol_names(&names, pattern, base, &binmap, |name| {
            self.backend().lookup_symbol(name)
        })
    }

    /// Non-empty entries of the dynamic string table, read from debuggee
    /// memory with an on-disk fallback.
    fn dynamic_strings(
        &self,
        sections: &BTreeMap<String, SectionHeader>,
    ) -> Option<Vec<String>> {
        let dynstr = sections.get(".dynstr")?;
        let len = (dynstr.end - dynstr.start) as usize;
        let bytes = match self.backend().read_mem(dynstr.start, len) {
            Ok(bytes) => bytes,
            Err(_) => self.dynstr_from_file()?,
        };
        Some(
            bytes
                .split(|b| *b == 0)
                .filter(|s| !s.is_empty())
                .filter_map(|s| std::str::from_utf8(s).ok())
                .map(str::to_string)
                .collect(),
        )
    }

    fn dynstr_from_file(&self) -> Option<Vec<u8>> {
        let image = self.backend().image_path()?;
        let file = std::fs::File::open(&image).ok()?;
        let mmap = unsafe { Mmap::map(&file) }.ok()?;
        let obj = object::File::parse(&*mmap).ok()?;
        let sect = obj.section_by_name(".dynstr")?;
        sect.data().ok().map(|d| d.to_vec())
    }

    /// PLT, GOT and relocation addresses for one exact dynamic symbol.
    pub fn symbol_detail(&self, name: &str) -> Option<SymbolEntry> {
        let base = name.strip_suffix("@plt").unwrap_or(name);
        let symbols = self.symbols(Some(&regex::escape(base)));
        let plt = *symbols.get(&format!("{}@plt", base))?;

        let (got, reloc) = match self.backend().disassemble(plt, 2) {
            Ok(insts) => parse_plt_stub(&insts),
            Err(e) => {
                warn!(symbol = base, error = %e, "cannot decode PLT stub");
                (None, None)
            }
        };
        Some(SymbolEntry {
            name: base.to_string(),
            plt: Some(plt),
            got,
            reloc,
        })
    }

    /// Resolved symbols whose names contain any keyword of a named family:
    /// `data` (data-transfer libc calls) or `exec` (process/memory helpers).
    /// Any other group name is used as a literal substring.
    pub fn symbol_group(&self, group: &str) -> BTreeMap<String, u64> {
        let keywords: Vec<&str> = match group {
            "data" => vec!["printf", "puts", "gets", "cpy"],
            "exec" => vec!["system", "exec", "mprotect", "mmap", "syscall"],
            other => vec![other],
        };
        self.symbols(None)
            .into_iter()
            .filter(|(name, _)| keywords.iter().any(|k| name.contains(k)))
            .collect()
    }

    /// Entry point of the image, rebased when position-independent.
    pub fn entry_point(&self) -> Option<u64> {
        let image = self.backend().image_path()?;
        let file = std::fs::File::open(&image).ok()?;
        let mmap = unsafe { Mmap::map(&file) }.ok()?;
        let obj = object::File::parse(&*mmap).ok()?;
        let mut entry = obj.entry();
        if self.backend().pid().is_some() {
            if let Some(base) = self
                .vmmap(&RangeSelector::Binary)
                .iter()
                .map(|r| r.start)
                .min()
            {
                if entry < base {
                    entry += base;
                }
            }
        }
        Some(entry)
    }
}
