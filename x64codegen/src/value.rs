//! The value-stack entry, §4.7's `SValue`. A tagged enum replacing the original's
//! `r`/`r2`/`c`-bitfield encoding, per spec.md's Design Notes §9: each variant here is
//! exactly one of `x86_64-gen.c`'s `VT_CONST`/`VT_LOCAL`/`VT_CMP`/`VT_JMP`/`VT_JMPI`/
//! register-resident states, never a combination that has to be decoded at use time.

use x64enc::{Condition, Gpr, Xmm};

use crate::ctype::CType;

/// Which physical register (if any) currently backs a `Reg` stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegSlot {
    Int(Gpr),
    Sse(Xmm),
    /// The top of the x87 stack (`%st(0)`), used for `long double` arithmetic only.
    X87Top,
}

/// A constant's bit pattern, reinterpreted according to the entry's [`CType`].
/// Integers sign-extend into the full 64 bits; floats/doubles carry their IEEE-754
/// bit pattern the same width-stretched way (`f.to_bits() as i64` for `f64`, the low
/// 32 bits for `f32`). Mirrors `SValue.c.i`/`c.d`/`c.f`'s shared union in the original.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstBits(pub i64);

impl ConstBits {
    pub fn from_i64(v: i64) -> Self {
        ConstBits(v)
    }

    pub fn from_f64(v: f64) -> Self {
        ConstBits(v.to_bits() as i64)
    }

    pub fn from_f32(v: f32) -> Self {
        ConstBits(v.to_bits() as i64)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0 as u64)
    }

    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SValue {
    /// Resident in a register, ready for use (`VT_CONST` cleared, no `VT_LVAL`).
    Reg { slot: RegSlot, ty: CType },
    /// An `lvalue`: `slot` holds the *address*, not the value — `gv` must still
    /// `load` through it. Used for register-indirect locations a pointer value
    /// produced (`*p` before it's read).
    RegIndirect { slot: RegSlot, ty: CType },
    /// The result of a compare, not yet materialized into a 0/1 register or branch.
    /// `unordered` is `gen_opf`'s float-compare "NaN makes this true/false" bit.
    Cmp { cc: Condition, unordered: bool },
    /// An unresolved jump chain (`VT_JMP`/`VT_JMPI`): `head` threads through the
    /// emitted `e9`/`0f8x` displacement fields the way [`crate::gen::CodeGen::gjmp`]
    /// describes; `invert` flips "taken" to "not taken" at `gtst` time without
    /// re-emitting the branch.
    JmpChain { head: Option<u64>, invert: bool },
    /// A compile-time constant not yet materialized into a register.
    Const { bits: ConstBits, ty: CType },
    /// `%rbp`-relative local variable or spill slot holding the *value* directly
    /// (aggregates) or addressable for `load`/`store` (scalars).
    Local { offset: i32, ty: CType },
    /// `%rbp`-relative slot holding a *pointer* to the value (large aggregates
    /// passed/returned in memory, or after `gv()` degrades an indirect local).
    IndirectLocal { offset: i32, ty: CType },
}

impl SValue {
    /// The C type a consumer should treat this entry as. `Cmp`/`JmpChain` entries
    /// carry no type of their own (they collapse to a 0/1 `int` once materialized),
    /// so this returns a fresh `int` for them rather than borrowing one that doesn't
    /// exist anywhere in the enum.
    pub fn ty(&self) -> CType {
        match self {
            SValue::Reg { ty, .. }
            | SValue::RegIndirect { ty, .. }
            | SValue::Const { ty, .. }
            | SValue::Local { ty, .. }
            | SValue::IndirectLocal { ty, .. } => ty.clone(),
            SValue::Cmp { .. } | SValue::JmpChain { .. } => CType::Int {
                width: crate::ctype::IntWidth::Int,
                signed: true,
            },
        }
    }
}
