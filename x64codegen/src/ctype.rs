//! A minimal stand-in for the C type checker's output (out of this crate's scope —
//! §4.8 only needs enough of a type to classify it for argument/return lowering and
//! to size/align local slots). Grounded in `x86_64-gen.c`'s `CType`/`classify_x86_64_*`,
//! collapsed from that file's bitfield `t` encoding into a tagged enum per spec.md's
//! own Design Notes §9 recommendation.

use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    Byte,
    Short,
    Int,
    Long,
}

impl IntWidth {
    pub fn bytes(self) -> u64 {
        match self {
            IntWidth::Byte => 1,
            IntWidth::Short => 2,
            IntWidth::Int => 4,
            IntWidth::Long => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CType {
    Void,
    Bool,
    Int { width: IntWidth, signed: bool },
    Float,
    Double,
    LongDouble,
    Pointer,
    Struct(Rc<StructLayout>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub offset: u64,
    pub ty: CType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub size: u64,
    pub align: u64,
    pub fields: Vec<StructField>,
    /// Non-POD-for-ABI-purposes: the struct has a field whose type is not
    /// trivially copyable by value (forces memory class unconditionally, matching
    /// the ABI's "if the type has a non-trivial constructor/destructor/copy" rule
    /// at the boundary a pure C compiler reaches: unions of floats and non-floats).
    pub is_union_mixed: bool,
}

impl CType {
    pub fn size(&self) -> u64 {
        match self {
            CType::Void => 0,
            CType::Bool | CType::Int { width: IntWidth::Byte, .. } => 1,
            CType::Int { width: IntWidth::Short, .. } => 2,
            CType::Int { width: IntWidth::Int, .. } | CType::Float => 4,
            CType::Int { width: IntWidth::Long, .. } | CType::Double | CType::Pointer => 8,
            CType::LongDouble => 16,
            CType::Struct(layout) => layout.size,
        }
    }

    pub fn align(&self) -> u64 {
        match self {
            CType::Struct(layout) => layout.align,
            CType::LongDouble => 16,
            other => other.size().max(1),
        }
    }

    pub fn is_float_family(&self) -> bool {
        matches!(self, CType::Float | CType::Double | CType::LongDouble)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, CType::Struct(_))
    }
}

/// `classify_x86_64_inner`'s whole-type mode: one mode per (possibly aggregate)
/// type, not per eightbyte — TinyCC folds the psABI's 8-byte-granularity merge
/// down to a single verdict per field and merges those, which is what
/// [`classify_mode`] reproduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    None,
    Memory,
    Integer,
    Sse,
    X87,
}

impl Mode {
    /// `classify_x86_64_merge`: identical modes are idempotent, `None` is absorbed,
    /// `Memory` dominates, a mismatched `Integer`/other pair resolves to `Integer`,
    /// and mixing `X87` with anything but itself forces `Memory` (an aggregate with
    /// a `long double` field alongside other fields can't be split into eightbytes).
    fn merge(self, other: Mode) -> Mode {
        use Mode::*;
        match (self, other) {
            (a, b) if a == b => a,
            (None, x) | (x, None) => x,
            (Memory, _) | (_, Memory) => Memory,
            (Integer, _) | (_, Integer) => Integer,
            (X87, _) | (_, X87) => Memory,
            _ => Sse,
        }
    }
}

fn classify_inner(ty: &CType) -> Mode {
    match ty {
        CType::Void => Mode::None,
        CType::Float | CType::Double => Mode::Sse,
        CType::LongDouble => Mode::X87,
        CType::Struct(layout) => {
            if layout.is_union_mixed {
                return Mode::Memory;
            }
            layout
                .fields
                .iter()
                .fold(Mode::None, |mode, f| mode.merge(classify_inner(&f.ty)))
        }
        _ => Mode::Integer,
    }
}

/// A type's full classification: `mode`, its ABI-rounded `size`/`align` (both
/// rounded up to 8), and how many argument-class registers (1 or 2) it consumes.
/// Grounded on `classify_x86_64_arg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgClass {
    pub mode: Mode,
    pub size: u64,
    pub align: u64,
    pub reg_count: u32,
}

pub fn classify_arg(ty: &CType) -> ArgClass {
    let raw_size = ty.size();
    let size = (raw_size + 7) & !7;
    let align = (ty.align() + 7) & !7;
    if raw_size > 16 {
        return ArgClass { mode: Mode::Memory, size, align, reg_count: 0 };
    }
    let mode = classify_inner(ty);
    let reg_count = match mode {
        Mode::Integer | Mode::Sse if raw_size > 8 => 2,
        Mode::Integer | Mode::Sse | Mode::X87 => 1,
        Mode::Memory | Mode::None => 0,
    };
    ArgClass { mode, size, align, reg_count }
}
