//! Binary hardening analysis (RELRO, NX, PIE, canary, FORTIFY).
//!
//! Derived purely from structural markers in the image's program headers,
//! dynamic entries and dynamic symbol names. Marker extraction is separated
//! from scoring so the downgrade rules are testable without ELF fixtures.

use std::fmt;
use std::path::Path;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::inspector::Inspector;

/// Structural markers read from the image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksecMarkers {
    /// `PT_GNU_RELRO` program header present.
    pub gnu_relro: bool,
    /// `DT_BIND_NOW` / `DF_BIND_NOW` / `DF_1_NOW` present.
    pub bind_now: bool,
    /// `PT_GNU_STACK` present with `PF_X` set.
    pub executable_stack: bool,
    /// `ET_DYN` image (PIE executable or shared object).
    pub dynamic_type: bool,
    /// `DT_DEBUG` present (distinguishes a PIE executable from a plain DSO).
    pub dt_debug: bool,
    /// `__stack_chk_fail` / `__stack_chk_guard` among dynamic symbols.
    pub stack_protector: bool,
    /// Fortified (`*_chk`) libc symbols among dynamic symbols.
    pub fortified_symbols: bool,
}

/// Hardening verdict, using the classic numeric scheme: RELRO 0 (none),
/// 2 (partial) or 3 (full); PIE 0 (no), 1 (PIE executable) or 4 (DSO).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksec {
    pub relro: u8,
    pub canary: bool,
    pub nx: bool,
    pub pie: u8,
    pub fortify: bool,
}

impl fmt::Display for Checksec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relro = match self.relro {
            3 => "Full",
            2 => "Partial",
            _ => "No",
        };
        let pie = match self.pie {
            1 => "PIE enabled",
            4 => "DSO",
            _ => "No PIE",
        };
        write!(
            f,
            "RELRO: {} | CANARY: {} | NX: {} | PIE: {} | FORTIFY: {}",
            relro, self.canary, self.nx, pie, self.fortify
        )
    }
}

/// Score the markers.
///
/// RELRO is a bit field: `GNU_RELRO` contributes 2, `BIND_NOW` contributes 1;
/// `BIND_NOW` without `GNU_RELRO` (score 1) is no real protection and
/// downgrades to 0.
pub fn evaluate(m: &ChecksecMarkers) -> Checksec {
    let mut relro = 0u8;
    if m.gnu_relro {
        relro |= 2;
    }
    if m.bind_now {
        relro |= 1;
    }
    if relro == 1 {
        relro = 0;
    }

    let pie = if m.dynamic_type {
        if m.dt_debug {
            1
        } else {
            4
        }
    } else {
        0
    };

    Checksec {
        relro,
        canary: m.stack_protector,
        nx: !m.executable_stack,
        pie,
        fortify: m.fortified_symbols,
    }
}

/// Extract the hardening markers from raw ELF bytes.
pub fn extract_markers(data: &[u8]) -> Result<ChecksecMarkers> {
    use goblin::elf::dynamic::{DF_1_NOW, DF_BIND_NOW, DT_BIND_NOW, DT_DEBUG, DT_FLAGS, DT_FLAGS_1};
    use goblin::elf::header::ET_DYN;
    use goblin::elf::program_header::{PF_X, PT_GNU_RELRO, PT_GNU_STACK};

    let elf =
        goblin::elf::Elf::parse(data).map_err(|e| Error::Elf(format!("parse: {}", e)))?;

    let mut markers = ChecksecMarkers {
        gnu_relro: elf
            .program_headers
            .iter()
            .any(|ph| ph.p_type == PT_GNU_RELRO),
        executable_stack: elf
            .program_headers
            .iter()
            .any(|ph| ph.p_type == PT_GNU_STACK && ph.p_flags & PF_X != 0),
        dynamic_type: elf.header.e_type == ET_DYN,
        ..ChecksecMarkers::default()
    };

    if let Some(dynamic) = elf.dynamic.as_ref() {
        for entry in &dynamic.dyns {
            markers.bind_now |= entry.d_tag == DT_BIND_NOW
                || (entry.d_tag == DT_FLAGS && entry.d_val & DF_BIND_NOW != 0)
                || (entry.d_tag == DT_FLAGS_1 && entry.d_val & DF_1_NOW != 0);
            markers.dt_debug |= entry.d_tag == DT_DEBUG;
        }
    }

    for sym in elf.dynsyms.iter() {
        let Some(name) = elf.dynstrtab.get_at(sym.st_name) else {
            continue;
        };
        markers.stack_protector |=
            name == "__stack_chk_fail" || name == "__stack_chk_guard";
        markers.fortified_symbols |= name.ends_with("_chk") && name.starts_with("__");
    }

    Ok(markers)
}

/// Analyze an on-disk image for hardening features.
pub fn checksec(path: &Path) -> Result<Checksec> {
    let data = std::fs::read(path)
        .map_err(|e| Error::Elf(format!("read '{}': {}", path.display(), e)))?;
    Ok(evaluate(&extract_markers(&data)?))
}

impl<B: Backend> Inspector<B> {
    /// Hardening verdict for the main executable image.
    pub fn checksec(&self) -> Result<Checksec> {
        let image = self
            .backend()
            .image_path()
            .ok_or_else(|| Error::Elf("no image path".into()))?;
        checksec(&image)
    }
}
