//! Debugging-backend collaborator interface.
//!
//! The engine never controls execution itself; everything it knows about the
//! debuggee flows through this trait: raw memory, registers, disassembly
//! text, symbol lookup, and backend command output. Any embedding host
//! (a gdb bridge, a ptrace supervisor, a remote stub) implements it once.

use std::collections::BTreeMap;
use std::path::PathBuf;

use nix::unistd::Pid;

use crate::error::{Error, Result};
use crate::types::Architecture;

/// One disassembled instruction as reported by the backend.
///
/// `text` is `mnemonic operands` with no address prefix. Instruction length
/// is not carried here; it is recovered from the address delta of a
/// two-instruction disassembly when needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInst {
    pub addr: u64,
    pub text: String,
}

impl DecodedInst {
    pub fn new(addr: u64, text: impl Into<String>) -> Self {
        DecodedInst {
            addr,
            text: text.into(),
        }
    }

    /// The mnemonic (first whitespace-separated token).
    pub fn opcode(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or("")
    }

    /// Everything after the mnemonic.
    pub fn operands(&self) -> &str {
        match self.text.split_once(char::is_whitespace) {
            Some((_, rest)) => rest.trim(),
            None => "",
        }
    }
}

/// Blocking interface to the attached debugging session.
///
/// All calls observe the debuggee at its current stop; none of them resumes
/// or steps it. Implementations report failure through `Result` and must not
/// terminate the surrounding session.
pub trait Backend {
    /// Architecture of the debugged target.
    fn arch(&self) -> Architecture;

    /// PID of the debuggee, or `None` when it is not running yet.
    fn pid(&self) -> Option<Pid>;

    /// Whether the debuggee is attached over a remote transport.
    fn is_remote(&self) -> bool;

    /// Path of the main executable image, if known.
    fn image_path(&self) -> Option<PathBuf>;

    /// Execute a backend command and capture its textual output.
    fn execute(&self, cmd: &str) -> Result<String>;

    /// Evaluate a symbolic/register expression to an integer.
    fn eval(&self, expr: &str) -> Result<u64>;

    /// Read raw bytes at a virtual address.
    fn read_mem(&self, addr: u64, len: usize) -> Result<Vec<u8>>;

    /// Write raw bytes at a virtual address, returning the count written.
    fn write_mem(&self, addr: u64, data: &[u8]) -> Result<usize>;

    /// All registers and their current values, keyed by name.
    fn registers(&self) -> Result<BTreeMap<String, u64>>;

    /// One register by name. `pc` and `sp` must resolve on every architecture.
    fn reg(&self, name: &str) -> Result<u64>;

    /// Disassemble `count` instructions starting at `addr`.
    fn disassemble(&self, addr: u64, count: usize) -> Result<Vec<DecodedInst>>;

    /// The `count` instructions immediately preceding `addr`, in address order.
    fn prev_instructions(&self, addr: u64, count: usize) -> Result<Vec<DecodedInst>>;

    /// Resolve a symbol name (e.g. `printf@plt`) to an address.
    fn lookup_symbol(&self, name: &str) -> Option<u64>;
}

/// Read one little-endian integer of `size` bytes (1, 2, 4 or 8) at `addr`.
pub fn read_int<B: Backend + ?Sized>(backend: &B, addr: u64, size: usize) -> Result<u64> {
    debug_assert!(matches!(size, 1 | 2 | 4 | 8));
    let bytes = backend.read_mem(addr, size)?;
    if bytes.len() < size {
        return Err(Error::Memory {
            addr,
            msg: format!("short read: {} of {} bytes", bytes.len(), size),
        });
    }
    let mut value = 0u64;
    for (i, b) in bytes.iter().take(size).enumerate() {
        value |= (*b as u64) << (8 * i);
    }
    Ok(value)
}

/// Read one pointer-size word at `addr`.
pub fn read_word<B: Backend + ?Sized>(backend: &B, addr: u64) -> Result<u64> {
    read_int(backend, addr, backend.arch().pointer_size())
}


#[cfg(test)]
mod tests {
    use super::mock::MockBackend;
    use super::*;

    #[test]
    fn decoded_inst_accessors() {
        let inst = DecodedInst::new(0x1000, "mov    rdi, rax");
        assert_eq!(inst.opcode(), "mov");
        assert_eq!(inst.operands(), "rdi, rax");

        let bare = DecodedInst::new(0x1001, "ret");
        assert_eq!(bare.opcode(), "ret");
        assert_eq!(bare.operands(), "");
    }

    #[test]
    fn read_int_little_endian() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.map_block(0x1000, vec![0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0]);
        assert_eq!(read_int(&backend, 0x1000, 4).unwrap(), 0x12345678);
        assert_eq!(read_int(&backend, 0x1000, 2).unwrap(), 0x5678);
        assert_eq!(read_word(&backend, 0x1000).unwrap(), 0x12345678);
    }

    #[test]
    fn read_int_unmapped_fails() {
        let backend = MockBackend::new(Architecture::X86_64);
        assert!(read_int(&backend, 0xdead0000, 8).is_err());
    }

    #[test]
    fn mock_eval_sums_registers_and_literals() {
        let mut backend = MockBackend::new(Architecture::X86_64);
        backend.set_reg("rip", 0x400000);
        assert_eq!(backend.eval("rip+0x20+7").unwrap(), 0x400027);
        assert_eq!(backend.eval("0x1000").unwrap(), 0x1000);
        assert!(backend.eval("xyzzy").is_err());
    }
}
