use std::fmt;
use std::str::FromStr;

/// Instruction-set architecture of the debuggee.
///
/// Every architecture-dependent table (flag layouts, branch predicates,
/// argument-register order) is indexed by this tag. Adding an architecture
/// means adding one arm to each table, not another string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86,
    X86_64,
    Arm,
    AArch64,
    PowerPC,
    /// Partial support: address-space and value classification only.
    Mips,
}

impl Architecture {
    /// Machine word / pointer size in bytes.
    pub fn pointer_size(self) -> usize {
        match self {
            Architecture::X86 | Architecture::Arm | Architecture::Mips => 4,
            Architecture::X86_64 | Architecture::AArch64 | Architecture::PowerPC => 8,
        }
    }

    /// Argument-register names in left-to-right calling-convention order.
    ///
    /// Empty for stack-passing (x86) and unsupported (MIPS) architectures.
    pub fn arg_registers(self) -> &'static [&'static str] {
        match self {
            Architecture::X86_64 => &["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
            Architecture::Arm => &["r0", "r1", "r2", "r3", "r4", "r5"],
            Architecture::AArch64 => &["x0", "x1", "x2", "x3", "x4", "x5"],
            Architecture::PowerPC => &["r3", "r4", "r5", "r6", "r7", "r8"],
            Architecture::X86 | Architecture::Mips => &[],
        }
    }

    /// Mnemonic that transfers control to a subroutine.
    pub fn call_mnemonic(self) -> &'static str {
        match self {
            Architecture::X86 | Architecture::X86_64 => "call",
            Architecture::Arm | Architecture::AArch64 | Architecture::PowerPC => "bl",
            Architecture::Mips => "jal",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Architecture::X86 => "i386",
            Architecture::X86_64 => "x86-64",
            Architecture::Arm => "arm",
            Architecture::AArch64 => "aarch64",
            Architecture::PowerPC => "powerpc",
            Architecture::Mips => "mips",
        };
        f.write_str(name)
    }
}

impl FromStr for Architecture {
    type Err = ();

    /// Maps backend architecture strings (e.g. `i386:x86-64`) to a tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        if s.contains("aarch64") {
            Ok(Architecture::AArch64)
        } else if s.contains("arm") {
            Ok(Architecture::Arm)
        } else if s.contains("powerpc") || s.contains("ppc") {
            Ok(Architecture::PowerPC)
        } else if s.contains("mips") {
            Ok(Architecture::Mips)
        } else if s.contains("64") {
            // checked after the named families so e.g. powerpc64 is not
            // swallowed by the generic 64-bit test
            Ok(Architecture::X86_64)
        } else if s.contains("386") || s.contains("x86") {
            Ok(Architecture::X86)
        } else {
            Err(())
        }
    }
}

/// Classification of a raw integer examined in the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Not contained in any mapped range.
    Immediate,
    /// Executable address inside a code section.
    Code,
    /// Read-only data address.
    RoData,
    /// Writable data address outside the heap.
    Data,
    /// Writable address inside the `[heap]` region.
    Heap,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Immediate => "value",
            ValueKind::Code => "code",
            ValueKind::RoData => "rodata",
            ValueKind::Data => "data",
            ValueKind::Heap => "heap",
        };
        f.write_str(name)
    }
}

/// A classified value together with its rendered payload.
///
/// `rendered` holds the disassembled instruction for `Code`, a quoted string
/// or hex literal for data kinds, and is empty for `Immediate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedValue {
    pub raw: u64,
    pub kind: ValueKind,
    pub rendered: String,
}

impl ClassifiedValue {
    pub fn immediate(raw: u64) -> Self {
        ClassifiedValue {
            raw,
            kind: ValueKind::Immediate,
            rendered: String::new(),
        }
    }

    /// The payload reinterpreted as an address, if it renders as one.
    pub fn pointee(&self) -> Option<u64> {
        let s = self.rendered.strip_prefix("0x")?;
        u64::from_str_radix(s, 16).ok()
    }
}
