//! One inline-`asm()` operand: its declared constraint string, name (for `%[name]`
//! template references), and the C-side [`SValue`] it binds to. Grounded on
//! `tccasm.c`'s `ASMOperand` and `parse_asm_operands`' constraint-string scan.

use x64codegen::{CType, SValue};
use x64enc::Gpr;

use crate::error::{AsmBridgeError, Result};

/// What a constraint string resolves to, before a concrete register has been
/// picked. The letters are the subset of GCC's extended-asm constraint
/// characters TinyCC recognizes for x86-64: the four byte-addressable
/// accumulator/counter/data/base registers by name, `%rsi`/`%rdi`, a generic
/// GPR or XMM class, a memory-only operand, or a constant that never occupies
/// a register at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    SpecificGpr(Gpr),
    AnyGpr,
    AnyXmm,
    Memory,
    Immediate,
}

fn constraint_letter(c: char) -> Option<ConstraintKind> {
    use ConstraintKind::*;
    Some(match c {
        'a' => SpecificGpr(Gpr::Rax),
        'b' => SpecificGpr(Gpr::Rbx),
        'c' => SpecificGpr(Gpr::Rcx),
        'd' => SpecificGpr(Gpr::Rdx),
        'S' => SpecificGpr(Gpr::Rsi),
        'D' => SpecificGpr(Gpr::Rdi),
        'r' | 'q' | 'Q' | 'g' => AnyGpr,
        'x' => AnyXmm,
        'm' => Memory,
        'i' | 'n' => Immediate,
        _ => return None,
    })
}

/// A parsed `"constraint"` string: output/read-write flags stripped off the front,
/// the remaining letter resolved to a [`ConstraintKind`].
#[derive(Debug, Clone, Copy)]
pub struct Constraint {
    pub is_output: bool,
    pub read_write: bool,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn parse(raw: &str, is_output_position: bool) -> Result<Self> {
        let mut chars = raw.chars().peekable();
        let mut saw_equals = false;
        let mut read_write = false;
        loop {
            match chars.peek() {
                Some('=') => {
                    saw_equals = true;
                    chars.next();
                }
                Some('+') => {
                    saw_equals = true;
                    read_write = true;
                    chars.next();
                }
                Some('&') => {
                    // Early-clobber: this crate never reuses an input's register for
                    // a different output, so the marker is accepted and ignored.
                    chars.next();
                }
                _ => break,
            }
        }
        let rest: String = chars.collect();
        if is_output_position && !saw_equals {
            return Err(AsmBridgeError::OutputMissingEquals);
        }
        let letter = rest.chars().next().ok_or_else(|| AsmBridgeError::UnknownConstraint(raw.to_string()))?;
        let kind = constraint_letter(letter).ok_or_else(|| AsmBridgeError::UnknownConstraint(raw.to_string()))?;
        Ok(Constraint { is_output: is_output_position, read_write, kind })
    }

    pub fn accepts_memory(&self) -> bool {
        matches!(self.kind, ConstraintKind::Memory)
    }
}

/// One `[name] "constraint" (value)` operand as handed to this crate by the
/// (out of scope) C front end: `name` is the optional `%[name]` the template may
/// reference, `constraint` the raw constraint text, and `value` the already-
/// evaluated operand — an lvalue for outputs, an lvalue-or-rvalue for inputs.
pub struct OperandDecl {
    pub name: Option<String>,
    pub constraint: String,
    pub value: SValue,
}

impl OperandDecl {
    pub fn new(constraint: impl Into<String>, value: SValue) -> Self {
        OperandDecl { name: None, constraint: constraint.into(), value }
    }

    pub fn named(name: impl Into<String>, constraint: impl Into<String>, value: SValue) -> Self {
        OperandDecl { name: Some(name.into()), constraint: constraint.into(), value }
    }
}

/// `ASMOperand {id, constraint, vt}`: `vt` is the index into
/// [`x64codegen::CodeGen::vstack`] this operand's value was pushed to, rather than a
/// raw pointer into the original's stack — this crate stages every operand onto the
/// same value stack the rest of code generation uses, so `gv`/`force_into`/`save_reg`
/// all work unmodified.
pub struct AsmOperand {
    pub id: usize,
    pub name: Option<String>,
    pub constraint: Constraint,
    pub vstack_idx: usize,
    pub ty: CType,
}
