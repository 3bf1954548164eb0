//! Condition-flag decoding from status registers.
//!
//! Table-driven: each architecture with a flags register gets one bit layout,
//! and [`FlagState`] is the decoded name → bool mapping consumed by the
//! branch predicates. PowerPC and MIPS carry no supported layout here.

use tracing::warn;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::inspector::Inspector;
use crate::types::Architecture;

/// x86 EFLAGS bit layout.
const EFLAGS_LAYOUT: &[(&str, u64)] = &[
    ("CF", 1 << 0),
    ("PF", 1 << 2),
    ("AF", 1 << 4),
    ("ZF", 1 << 6),
    ("SF", 1 << 7),
    ("TF", 1 << 8),
    ("IF", 1 << 9),
    ("DF", 1 << 10),
    ("OF", 1 << 11),
];

/// ARM CPSR bit layout (GE is a 3-bit field, reported as "any bit set").
const CPSR_LAYOUT: &[(&str, u64)] = &[
    ("N", 1 << 31),
    ("Z", 1 << 30),
    ("C", 1 << 29),
    ("V", 1 << 28),
    ("Q", 1 << 27),
    ("J", 1 << 24),
    ("GE", 7 << 16),
    ("E", 1 << 9),
    ("A", 1 << 8),
    ("I", 1 << 7),
    ("F", 1 << 6),
    ("T", 1 << 5),
];

/// AArch64 CPSR/NZCV bit layout.
const AARCH64_CPSR_LAYOUT: &[(&str, u64)] = &[
    ("N", 1 << 31),
    ("Z", 1 << 30),
    ("C", 1 << 29),
    ("V", 1 << 28),
    ("D", 1 << 9),
    ("A", 1 << 8),
    ("I", 1 << 7),
    ("F", 1 << 6),
];

fn layout(arch: Architecture) -> Option<&'static [(&'static str, u64)]> {
    match arch {
        Architecture::X86 | Architecture::X86_64 => Some(EFLAGS_LAYOUT),
        Architecture::Arm => Some(CPSR_LAYOUT),
        Architecture::AArch64 => Some(AARCH64_CPSR_LAYOUT),
        Architecture::PowerPC | Architecture::Mips => None,
    }
}

/// Name of the status register holding the condition flags.
pub fn flag_register(arch: Architecture) -> Option<&'static str> {
    match arch {
        Architecture::X86 | Architecture::X86_64 => Some("eflags"),
        Architecture::Arm | Architecture::AArch64 => Some("cpsr"),
        Architecture::PowerPC | Architecture::Mips => None,
    }
}

/// Decoded condition flags of one status-register value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagState {
    flags: Vec<(&'static str, bool)>,
}

impl FlagState {
    /// Decode a raw status-register value. `None` when the architecture has
    /// no supported flag layout.
    pub fn decode(arch: Architecture, value: u64) -> Option<FlagState> {
        let layout = layout(arch)?;
        Some(FlagState {
            flags: layout
                .iter()
                .map(|(name, mask)| (*name, value & mask != 0))
                .collect(),
        })
    }

    /// Whether a named flag is set. Unknown names read as unset.
    pub fn is_set(&self, name: &str) -> bool {
        self.flags
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .unwrap_or(false)
    }

    /// All flags in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        self.flags.iter().copied()
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(&'static str, bool)]) -> FlagState {
        FlagState {
            flags: pairs.to_vec(),
        }
    }
}

/// Long flag names accepted by [`Inspector::set_flag`], x86 only.
const EFLAG_NAMES: &[(&str, &str, u64)] = &[
    ("carry", "CF", 1 << 0),
    ("parity", "PF", 1 << 2),
    ("adjust", "AF", 1 << 4),
    ("zero", "ZF", 1 << 6),
    ("sign", "SF", 1 << 7),
    ("trap", "TF", 1 << 8),
    ("interrupt", "IF", 1 << 9),
    ("direction", "DF", 1 << 10),
    ("overflow", "OF", 1 << 11),
];

impl<B: Backend> Inspector<B> {
    /// Current condition flags of the debuggee, or `None` when the status
    /// register cannot be read or the architecture carries no layout.
    pub fn flags(&self) -> Option<FlagState> {
        let arch = self.backend().arch();
        let reg = flag_register(arch)?;
        match self.backend().reg(reg) {
            Ok(value) => FlagState::decode(arch, value),
            Err(e) => {
                warn!(register = reg, error = %e, "cannot read status register");
                None
            }
        }
    }

    /// Set, clear or toggle (`value = None`) a named x86 flag, e.g. `zero`.
    ///
    /// Rewrites EFLAGS through the backend. Returns whether a write happened.
    pub fn set_flag(&self, name: &str, value: Option<bool>) -> Result<bool> {
        let arch = self.backend().arch();
        if !matches!(arch, Architecture::X86 | Architecture::X86_64) {
            return Err(Error::Register(format!(
                "flag writing unsupported on {}",
                arch
            )));
        }
        let name = name.to_ascii_lowercase();
        let Some((_, short, mask)) = EFLAG_NAMES.iter().find(|(long, ..)| *long == name)
        else {
            return Err(Error::Register(format!("unknown flag: {}", name)));
        };

        let eflags = self.backend().reg("eflags")?;
        let current = eflags & mask != 0;
        if value == Some(current) {
            return Ok(false);
        }
        self.backend()
            .execute(&format!("set ${} = {:#x}", "eflags", eflags ^ mask))?;
        tracing::debug!(flag = *short, "toggled");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eflags_decode() {
        // ZF | CF | OF
        let value = (1 << 6) | (1 << 0) | (1 << 11);
        let flags = FlagState::decode(Architecture::X86_64, value).unwrap();
        assert!(flags.is_set("ZF"));
        assert!(flags.is_set("CF"));
        assert!(flags.is_set("OF"));
        assert!(!flags.is_set("SF"));
        assert!(!flags.is_set("PF"));
    }

    #[test]
    fn cpsr_decode() {
        // N | C set, Z clear
        let value = (1u64 << 31) | (1 << 29);
        let flags = FlagState::decode(Architecture::Arm, value).unwrap();
        assert!(flags.is_set("N"));
        assert!(flags.is_set("C"));
        assert!(!flags.is_set("Z"));
        assert!(!flags.is_set("V"));
    }

    #[test]
    fn cpsr_ge_is_a_field() {
        let flags = FlagState::decode(Architecture::Arm, 1 << 17).unwrap();
        assert!(flags.is_set("GE"));
    }

    #[test]
    fn aarch64_decode() {
        let value = (1u64 << 30) | (1 << 28);
        let flags = FlagState::decode(Architecture::AArch64, value).unwrap();
        assert!(flags.is_set("Z"));
        assert!(flags.is_set("V"));
        assert!(!flags.is_set("N"));
        assert!(!flags.is_set("C"));
    }

    #[test]
    fn no_layout_for_powerpc_or_mips() {
        assert!(FlagState::decode(Architecture::PowerPC, 0xffff_ffff).is_none());
        assert!(FlagState::decode(Architecture::Mips, 0xffff_ffff).is_none());
        assert!(flag_register(Architecture::PowerPC).is_none());
    }

    #[test]
    fn unknown_flag_reads_unset() {
        let flags = FlagState::decode(Architecture::X86, 0xfff).unwrap();
        assert!(!flags.is_set("N"));
    }
}
