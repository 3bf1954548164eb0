//! Address-space modeling for the debuggee.
//!
//! Reconstructs the virtual memory layout from whichever source is
//! available: the live `/proc/<pid>/maps` listing for a local process, a
//! files/sections listing for a remote (QEMU-user style) target, or the
//! static section extents of the image when nothing is running yet. Each
//! source has its own parser; a parse failure yields an empty list, never an
//! error, and callers treat "no ranges" as "unknown".

use std::collections::BTreeMap;

use tracing::warn;

use crate::backend::Backend;
use crate::cache::CacheEntry;
use crate::elf::{SectionHeader, SectionKind};
use crate::inspector::Inspector;

/// Memory range permissions (`rwxp`/`rwxs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub private: bool,
}

impl Permissions {
    /// Parse a permission string such as `r-xp`. Short strings fail.
    pub fn parse(s: &str) -> Option<Permissions> {
        let b = s.as_bytes();
        if b.len() < 4 {
            return None;
        }
        Some(Permissions {
            read: b[0] == b'r',
            write: b[1] == b'w',
            execute: b[2] == b'x',
            private: b[3] == b'p',
        })
    }
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' },
            if self.private { 'p' } else { 's' },
        )
    }
}

/// One virtual memory range of the debuggee. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
    pub perms: Permissions,
    /// Backing file path or pseudo-name (`[stack]`, `[heap]`, `mapped`).
    pub name: String,
}

impl MemoryRange {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Which ranges a [`Inspector::vmmap`] query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSelector {
    /// Every known range.
    All,
    /// Ranges whose name contains the given substring.
    Name(String),
    /// Ranges backed by the main executable image.
    Binary,
    /// The `[heap]` range.
    Heap,
    /// The single range containing the given address.
    Address(u64),
}

impl RangeSelector {
    fn cache_key(&self) -> String {
        match self {
            RangeSelector::All => "all".into(),
            RangeSelector::Name(n) => format!("name:{}", n),
            RangeSelector::Binary => "binary".into(),
            RangeSelector::Heap => "heap".into(),
            RangeSelector::Address(a) => format!("addr:{:#x}", a),
        }
    }
}

/// Parse the contents of a Linux `/proc/<pid>/maps` listing.
///
/// Malformed lines are skipped; a best-effort partial result is returned.
pub fn parse_proc_maps(content: &str) -> Vec<MemoryRange> {
    content.lines().filter_map(parse_maps_line).collect()
}

fn parse_maps_line(line: &str) -> Option<MemoryRange> {
    // 00400000-0040b000 r-xp 00000000 08:02 538840  /path/to/file
    let mut parts = line.splitn(6, char::is_whitespace);
    let addr_range = parts.next()?;
    let perms = Permissions::parse(parts.next()?)?;
    let _offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let name = parts.next().unwrap_or("").trim();

    let (start, end) = addr_range.split_once('-')?;
    Some(MemoryRange {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        perms,
        name: if name.is_empty() {
            "mapped".to_string()
        } else {
            name.to_string()
        },
    })
}

/// Parse a gdb `info files`-style section listing into per-image ranges.
///
/// Remote stubs without `/proc` access (QEMU user-mode emulation) expose only
/// the loaded section list. Consecutive sections of one object file are
/// collapsed into a single approximate range from the first section start to
/// the last section end, rounded up to a page, with `rwxp` permissions (the
/// listing carries none).
pub fn parse_file_listing(content: &str) -> Vec<MemoryRange> {
    let rwxp = Permissions {
        read: true,
        write: true,
        execute: true,
        private: true,
    };
    let mut ranges = Vec::new();
    let mut main_exe = String::new();
    // (objfile, first start, last end)
    let mut current: Option<(String, u64, u64)> = None;

    for line in content.lines() {
        let line = line.trim();
        // `/bin/target', file type elf64-x86-64.
        if line.starts_with('`') {
            if let Some(first) = line.split_whitespace().next() {
                main_exe = first.trim_matches(&['`', '\'', ','][..]).to_string();
            }
            continue;
        }
        if !line.starts_with("0x") {
            continue;
        }
        // 0x0000000000401000 - 0x0000000000402000 is .text [in /lib/libc.so.6]
        let fields: Vec<&str> = line.split_whitespace().collect();
        let objfile = match fields.len() {
            5 => main_exe.clone(),
            n if n >= 7 => fields[6].to_string(),
            _ => {
                warn!(line, "skipping malformed section line");
                continue;
            }
        };
        let (Some(start), Some(end)) = (parse_hex(fields[0]), parse_hex(fields[2])) else {
            warn!(line, "skipping unparsable section addresses");
            continue;
        };

        match current {
            Some((ref file, first, _)) if *file == objfile => {
                current = Some((objfile, first, end));
            }
            Some((file, first, last)) => {
                ranges.push(MemoryRange {
                    start: first,
                    end: page_align_up(last),
                    perms: rwxp,
                    name: file,
                });
                current = Some((objfile, start, end));
            }
            None => current = Some((objfile, start, end)),
        }
    }
    if let Some((file, first, last)) = current {
        ranges.push(MemoryRange {
            start: first,
            end: page_align_up(last),
            perms: rwxp,
            name: file,
        });
    }
    ranges
}

/// Heuristic stack range for targets whose map source does not report one.
/// The length is not accurate.
pub fn heuristic_stack(sp: u64) -> MemoryRange {
    let start = sp & !0xfff;
    MemoryRange {
        start,
        end: start + 0x8000,
        perms: Permissions {
            read: true,
            write: true,
            execute: true,
            private: true,
        },
        name: "[stack]".to_string(),
    }
}

/// Approximate ranges for a not-yet-running debuggee, derived from the
/// extents of the image's code, rodata and data section groups.
pub fn static_ranges(
    image: &str,
    sections: &BTreeMap<String, SectionHeader>,
) -> Vec<MemoryRange> {
    let mut ranges = Vec::new();
    for (kind, perms) in [
        (SectionKind::Code, "rx-p"),
        (SectionKind::RoData, "r--p"),
        (SectionKind::Data, "rw-p"),
    ] {
        let group: Vec<&SectionHeader> =
            sections.values().filter(|s| s.kind == kind).collect();
        let (Some(start), Some(end)) = (
            group.iter().map(|s| s.start).min(),
            group.iter().map(|s| s.end).max(),
        ) else {
            continue;
        };
        ranges.push(MemoryRange {
            start,
            end,
            perms: Permissions::parse(perms).unwrap_or(Permissions {
                read: true,
                write: false,
                execute: false,
                private: true,
            }),
            name: image.to_string(),
        });
    }
    ranges
}

/// Apply a selector to a full address-space snapshot.
pub fn select<'a>(
    ranges: &'a [MemoryRange],
    selector: &RangeSelector,
    image: Option<&str>,
) -> Vec<&'a MemoryRange> {
    match selector {
        RangeSelector::All => ranges.iter().collect(),
        RangeSelector::Name(n) => ranges.iter().filter(|r| r.name.contains(n)).collect(),
        RangeSelector::Binary => match image {
            Some(image) => ranges.iter().filter(|r| r.name.contains(image)).collect(),
            None => Vec::new(),
        },
        RangeSelector::Heap => ranges.iter().filter(|r| r.name.contains("[heap]")).collect(),
        RangeSelector::Address(addr) => {
            ranges.iter().filter(|r| r.contains(*addr)).collect()
        }
    }
}

pub(crate) fn page_align_up(addr: u64) -> u64 {
    (addr + 0xfff) & !0xfff
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x")?, 16).ok()
}

impl<B: Backend> Inspector<B> {
    /// Memory ranges of the debuggee matching `selector`.
    ///
    /// Source order: live `/proc/<pid>/maps` for a local process, the
    /// files/sections approximation (plus a heuristic stack) for a remote
    /// one, static section extents when not running. Returns an empty list
    /// when no source is available.
    pub fn vmmap(&self, selector: &RangeSelector) -> Vec<MemoryRange> {
        let key = selector.cache_key();
        if let Some(CacheEntry::Ranges(r)) = self.cache().get("vmmap", &key) {
            return r;
        }

        let snapshot = self.vmmap_snapshot();
        let image = self.backend().image_path();
        let image = image.as_deref().and_then(|p| p.to_str());
        let selected: Vec<MemoryRange> = select(&snapshot, selector, image)
            .into_iter()
            .cloned()
            .collect();
        self.cache()
            .insert("vmmap", key, CacheEntry::Ranges(selected.clone()));
        selected
    }

    fn vmmap_snapshot(&self) -> Vec<MemoryRange> {
        if let Some(CacheEntry::Ranges(r)) = self.cache().get("vmmap_snapshot", "") {
            return r;
        }
        let snapshot = self.acquire_ranges();
        self.cache().insert(
            "vmmap_snapshot",
            String::new(),
            CacheEntry::Ranges(snapshot.clone()),
        );
        snapshot
    }

    fn acquire_ranges(&self) -> Vec<MemoryRange> {
        let Some(pid) = self.backend().pid() else {
            // Not running: approximate from the static image layout.
            let Some(image) = self.backend().image_path() else {
                return Vec::new();
            };
            let name = image.to_string_lossy().into_owned();
            return static_ranges(&name, &self.sections());
        };

        if self.backend().is_remote() {
            let mut ranges = match self.backend().execute("info files") {
                Ok(out) => parse_file_listing(&out),
                Err(e) => {
                    warn!(error = %e, "remote section listing unavailable");
                    Vec::new()
                }
            };
            // The listing has no stack; synthesize one around sp.
            if let Ok(sp) = self.backend().reg("sp") {
                ranges.push(heuristic_stack(sp));
            }
            return ranges;
        }

        match std::fs::read_to_string(format!("/proc/{}/maps", pid)) {
            Ok(content) => parse_proc_maps(&content),
            Err(e) => {
                warn!(%pid, error = %e, "could not read process maps");
                Vec::new()
            }
        }
    }

    /// The range containing `addr`, if any.
    pub fn range_containing(&self, addr: u64) -> Option<MemoryRange> {
        self.vmmap(&RangeSelector::Address(addr)).into_iter().next()
    }

    /// Whether `value` falls inside any known range.
    pub fn is_address(&self, value: u64) -> bool {
        self.range_containing(value).is_some()
    }

    /// Whether `addr` falls inside a writable range.
    pub fn is_writable(&self, addr: u64) -> bool {
        self.range_containing(addr)
            .map(|r| r.perms.write)
            .unwrap_or(false)
    }

    /// Whether `addr` falls inside an executable range.
    pub fn is_executable(&self, addr: u64) -> bool {
        self.range_containing(addr)
            .map(|r| r.perms.execute)
            .unwrap_or(false)
    }
}
