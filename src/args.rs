//! Call-argument inference at a call site.
//!
//! Stopped on a `call`-class instruction, guess how many arguments the callee
//! receives by scanning the setup instructions just before the program
//! counter, then read the argument slots (registers or stack words per the
//! architecture's convention). This is a heuristic: the scan only sees
//! register names in destination operands, so computed or spilled arguments
//! escape it. The known quirks of the counting rules are kept deliberately
//! and recorded in DESIGN.md.

use std::sync::OnceLock;

use regex::Regex;

use crate::backend::{read_int, Backend, DecodedInst};
use crate::error::Result;
use crate::inspector::Inspector;
use crate::types::Architecture;

/// Setup instructions inspected before the call site.
const WINDOW: usize = 12;

/// At most this many arguments are ever guessed.
const MAX_ARGS: usize = 6;

/// Cut the window after the last earlier call: setup code for a previous
/// call must not leak into this count.
fn call_window<'a>(insts: &'a [DecodedInst], mnemonic: &str) -> &'a [DecodedInst] {
    match insts.iter().rposition(|i| i.opcode() == mnemonic) {
        Some(idx) => &insts[idx + 1..],
        None => insts,
    }
}

/// Destination operand of an instruction (text up to the first comma).
fn first_operand(inst: &DecodedInst) -> &str {
    inst.operands().split(',').next().unwrap_or("").trim()
}

/// Turn a presence bitmap over argument slots into a count.
///
/// Slots only count while every earlier slot already counted, so a stray
/// high register does not inflate the guess. `dirty_fix` pre-seeds one slot
/// when slot 1 was written without slot 0 (common for the second argument of
/// string functions whose first argument survives from earlier code).
fn monotonic_argc(present: &[bool; MAX_ARGS], dirty_fix: bool) -> usize {
    let mut argc = 0;
    if dirty_fix {
        argc += 1;
    }
    if present[0] {
        argc += 1;
    }
    for i in 1..MAX_ARGS {
        if argc > i - 1 && present[i] {
            argc += 1;
        }
    }
    argc.min(MAX_ARGS)
}

fn x86_64_argc(window: &[DecodedInst]) -> usize {
    const TAGS: [&str; MAX_ARGS] = ["di", "si", "dx", "cx", "r8", "r9"];
    let mut present = [false; MAX_ARGS];
    for inst in window {
        let dest = first_operand(inst);
        for (i, tag) in TAGS.iter().enumerate() {
            if dest.contains(tag) {
                present[i] = true;
            }
        }
    }
    monotonic_argc(&present, present[1] && !present[0])
}

fn arm_argc(window: &[DecodedInst]) -> usize {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"r([0-5])").expect("static regex"));
    let mut present = [false; MAX_ARGS];
    for inst in window {
        if let Some(caps) = re.captures(first_operand(inst)) {
            let idx: usize = caps[1].parse().expect("single digit");
            present[idx] = true;
        }
    }
    monotonic_argc(&present, present[1] && !present[0])
}

fn aarch64_argc(window: &[DecodedInst]) -> usize {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"([xw])([0-5])").expect("static regex"));
    let mut present = [false; MAX_ARGS];
    let mut present_x = [false; MAX_ARGS];
    for inst in window {
        if let Some(caps) = re.captures(first_operand(inst)) {
            let idx: usize = caps[2].parse().expect("single digit");
            present[idx] = true;
            if &caps[1] == "x" {
                present_x[idx] = true;
            }
        }
    }
    // The pre-seed check deliberately looks at x registers only.
    monotonic_argc(&present, present_x[1] && !present_x[0])
}

fn powerpc_argc(window: &[DecodedInst]) -> usize {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"r([3-8])").expect("static regex"));
    let mut present = [false; MAX_ARGS];
    for inst in window {
        if let Some(caps) = re.captures(first_operand(inst)) {
            let n: usize = caps[1].parse().expect("single digit");
            present[n - 3] = true;
        }
    }
    monotonic_argc(&present, present[1] && !present[0])
}

fn parse_esp_offset(s: &str) -> Option<u64> {
    let s = s.strip_prefix('+')?;
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// 32-bit x86 passes arguments on the stack; count `mov ... [esp+off]`
/// stores, falling back to counting pushes when the compiler used the push
/// convention instead.
fn stack_argc(window: &[DecodedInst]) -> usize {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\[esp([^\]]*)\],").expect("static regex"));

    let stores: Vec<&str> = window
        .iter()
        .filter(|i| i.opcode().starts_with("mov"))
        .filter_map(|i| re.captures(&i.text))
        .map(|c| c.get(1).map(|m| m.as_str()).unwrap_or(""))
        .collect();

    if stores.is_empty() {
        return window
            .iter()
            .filter(|i| i.opcode().starts_with("push"))
            .count()
            .min(MAX_ARGS);
    }

    // every qualifying store counts as one argument; a store whose slot
    // index exceeds the store count is a local, not an argument
    let total = stores.len() as u64;
    let mut argc = 0usize;
    for offset in stores {
        if let Some(off) = parse_esp_offset(offset) {
            if off / 4 > total {
                continue;
            }
        }
        argc += 1;
    }
    argc.min(MAX_ARGS)
}

impl<B: Backend> Inspector<B> {
    /// Guess the arguments of the call the program counter is stopped on.
    ///
    /// `forced_argc` skips the heuristic count and reads exactly that many
    /// slots (still capped). MIPS has no supported convention here and always
    /// yields an empty guess.
    pub fn infer_args(&self, forced_argc: Option<usize>) -> Result<Vec<u64>> {
        let backend = self.backend();
        let arch = backend.arch();
        if arch == Architecture::Mips {
            return Ok(Vec::new());
        }

        let pc = backend.reg("pc")?;
        let before = backend.prev_instructions(pc, WINDOW).unwrap_or_default();
        let window = call_window(&before, arch.call_mnemonic());

        if arch == Architecture::X86 {
            let argc = forced_argc.unwrap_or_else(|| stack_argc(window)).min(MAX_ARGS);
            let sp = backend.reg("sp")?;
            return (0..argc as u64)
                .map(|i| read_int(backend, sp + 4 * i, 4))
                .collect();
        }

        let argc = forced_argc
            .unwrap_or_else(|| match arch {
                Architecture::X86_64 => x86_64_argc(window),
                Architecture::Arm => arm_argc(window),
                Architecture::AArch64 => aarch64_argc(window),
                Architecture::PowerPC => powerpc_argc(window),
                Architecture::X86 | Architecture::Mips => unreachable!(),
            })
            .min(MAX_ARGS);

        arch.arg_registers()
            .iter()
            .take(argc)
            .map(|r| backend.reg(r))
            .collect()
    }
}
