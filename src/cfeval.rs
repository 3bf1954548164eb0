//! Branch evaluation without single-stepping.
//!
//! Given one decoded instruction and the current condition flags, decides
//! whether the branch is taken and where it goes. The per-architecture
//! predicate tables mirror long-standing debugger heuristics and are kept as
//! such rather than re-derived from the architecture manuals; known
//! transcription bugs in the lineage are repaired (see DESIGN.md).

use std::sync::OnceLock;

use regex::Regex;

use crate::backend::{read_int, read_word, Backend, DecodedInst};
use crate::flags::FlagState;
use crate::inspector::Inspector;
use crate::types::Architecture;

/// Outcome of evaluating a control-transfer instruction.
///
/// `target` is only reported for a taken transfer; an unresolvable target
/// leaves it `None` while `taken` stays well-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchDecision {
    pub taken: bool,
    pub target: Option<u64>,
}

impl BranchDecision {
    pub const NOT_TAKEN: BranchDecision = BranchDecision {
        taken: false,
        target: None,
    };
}

/// x86/x86-64 condition predicates. `None` for opcodes outside the table.
fn x86_predicate(opcode: &str, f: &FlagState) -> Option<bool> {
    let (zf, sf, of, cf) = (
        f.is_set("ZF"),
        f.is_set("SF"),
        f.is_set("OF"),
        f.is_set("CF"),
    );
    let taken = match opcode {
        "ret" | "jmp" => true,
        "je" | "jz" => zf,
        "jne" | "jnz" => !zf,
        "jg" => !zf && sf == of,
        "jge" => sf == of,
        "ja" => !cf && !zf,
        "jae" => !cf,
        "jl" => sf != of,
        "jle" => zf || sf != of,
        "jb" => cf,
        "jbe" => cf || zf,
        "jo" => of,
        "jno" => !of,
        _ => return None,
    };
    Some(taken)
}

/// AArch64 condition predicates (`cbz`/`cbnz` are handled separately since
/// they test a register, not the flags).
fn aarch64_predicate(opcode: &str, f: &FlagState) -> Option<bool> {
    let (n, z, c, v) = (
        f.is_set("N"),
        f.is_set("Z"),
        f.is_set("C"),
        f.is_set("V"),
    );
    if opcode.contains("ret") {
        return Some(true);
    }
    let taken = match opcode {
        "b" | "br" => true,
        "b.eq" => z,
        "b.ne" => !z,
        "b.cs" => c,
        "b.cc" => !c,
        "b.mi" => n,
        "b.pl" => !n,
        "b.vs" => v,
        "b.vc" => !v,
        "b.hi" => !z && c,
        "b.ls" => !c && z,
        "b.ge" => n == v,
        "b.lt" => n != v,
        "b.gt" => !z && n == v,
        "b.le" => z && n != v,
        _ => return None,
    };
    Some(taken)
}

/// ARM condition predicates; matched by prefix since the condition code can
/// carry suffixes (`beq.n`, `beq.w`).
fn arm_predicate(opcode: &str, f: &FlagState) -> Option<bool> {
    let (n, z, c, v) = (
        f.is_set("N"),
        f.is_set("Z"),
        f.is_set("C"),
        f.is_set("V"),
    );
    if opcode == "b" || opcode == "bx" {
        return Some(true);
    }
    const TABLE: &[&str] = &[
        "beq", "bne", "bcs", "bcc", "bmi", "bpl", "bvs", "bvc", "bhi", "bls", "bge", "blt",
        "bgt", "ble",
    ];
    let cond = TABLE.iter().find(|p| opcode.starts_with(*p))?;
    let taken = match *cond {
        "beq" => z,
        "bne" => !z,
        "bcs" => c,
        "bcc" => !c,
        "bmi" => n,
        "bpl" => !n,
        "bvs" => v,
        "bvc" => !v,
        "bhi" => !z && c,
        "bls" => !c && z,
        "bge" => n == v,
        "blt" => n != v,
        "bgt" => !z && n == v,
        "ble" => z && n != v,
        _ => unreachable!(),
    };
    Some(taken)
}

fn mem_operand_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // QWORD PTR [rip+0x2fe2] / DWORD PTR [ebx+0xc] / QWORD PTR ds:0xdeadbeef
    RE.get_or_init(|| {
        Regex::new(r"(\w+) PTR (?:\[([^\]]+)\]|\w+:(0x\S+))").expect("static regex")
    })
}

fn plain_operand_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // je 0x7ffff7e39570 <puts+336>  /  jmp rax
    RE.get_or_init(|| Regex::new(r"^[\w.]+\s+\*?(0x\S+|\w+)").expect("static regex"))
}

impl<B: Backend> Inspector<B> {
    /// Resolve the destination of a control-transfer instruction.
    ///
    /// `ret`-class opcodes use the return-address convention (link register
    /// on AArch64, stack top elsewhere); memory operands are dereferenced
    /// after evaluating their effective-address expression, adding the
    /// instruction length for `rip`-relative references.
    pub fn eval_target(&self, inst: &DecodedInst) -> Option<u64> {
        let backend = self.backend();
        if inst.opcode().contains("ret") {
            return match backend.arch() {
                Architecture::AArch64 => backend.reg("x30").ok(),
                _ => {
                    let sp = backend.reg("sp").ok()?;
                    read_word(backend, sp).ok()
                }
            };
        }

        if matches!(inst.opcode(), "cbz" | "cbnz") {
            // the branch target is the last operand, after the tested register
            let target = inst.operands().rsplit(',').next()?.trim();
            return backend.eval(target).ok();
        }

        if let Some(caps) = mem_operand_re().captures(&inst.text) {
            let size = match &caps[1] {
                "QWORD" => 8,
                "DWORD" => 4,
                "WORD" => 2,
                _ => backend.arch().pointer_size(),
            };
            let mut dest = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())?;
            if dest.contains("rip") {
                // rip-relative displacements count from the next instruction.
                let len = self.instruction_len(inst.addr)?;
                dest = format!("{}+{}", dest, len);
            }
            let addr = backend.eval(&dest).ok()?;
            return read_int(backend, addr, size).ok();
        }

        let caps = plain_operand_re().captures(&inst.text)?;
        backend.eval(&caps[1]).ok()
    }

    /// Encoded length of the instruction at `addr`, from the address delta
    /// of a two-entry disassembly.
    fn instruction_len(&self, addr: u64) -> Option<u64> {
        let insts = self.backend().disassemble(addr, 2).ok()?;
        let next = insts.get(1)?;
        next.addr.checked_sub(addr)
    }

    /// Decide whether a control-transfer instruction will be taken and where
    /// it leads. Opcodes with no table entry (and all of PowerPC/MIPS) yield
    /// "no determination": not taken, no target.
    pub fn branch(&self, inst: &DecodedInst) -> BranchDecision {
        let arch = self.backend().arch();
        let opcode = inst.opcode();

        let Some(flags) = self.flags() else {
            return BranchDecision::NOT_TAKEN;
        };

        let taken = match arch {
            Architecture::X86 | Architecture::X86_64 => x86_predicate(opcode, &flags),
            Architecture::AArch64 | Architecture::Arm => {
                if opcode == "cbz" || opcode == "cbnz" {
                    self.compare_branch_taken(opcode, inst)
                } else if arch == Architecture::AArch64 {
                    aarch64_predicate(opcode, &flags)
                } else {
                    arm_predicate(opcode, &flags)
                }
            }
            Architecture::PowerPC | Architecture::Mips => None,
        };

        match taken {
            Some(true) => BranchDecision {
                taken: true,
                target: self.eval_target(inst),
            },
            Some(false) | None => BranchDecision::NOT_TAKEN,
        }
    }

    /// `cbz` is taken when the tested register is zero, `cbnz` when nonzero.
    fn compare_branch_taken(&self, opcode: &str, inst: &DecodedInst) -> Option<bool> {
        let reg = inst.operands().split(',').next()?.trim();
        let value = self.backend().eval(reg).ok()?;
        Some((value == 0) == (opcode == "cbz"))
    }
}
