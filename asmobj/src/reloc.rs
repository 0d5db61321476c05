use crate::consts::{
    RX86_64, R_X86_64_32, R_X86_64_32S, R_X86_64_64, R_X86_64_GOTPCREL, R_X86_64_PC32,
    R_X86_64_PLT32,
};
use crate::section::SectionId;
use crate::symbol::SymbolId;

/// The handful of relocation kinds an x86-64 assembler/codegen pair actually emits.
/// See `x86_64-gen.c`'s `greloc`/`gen_gotpcrel`/`gen_addr32`/`gen_addr64` call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// `call`/`jmp` to a PLT-eligible external function.
    Plt32,
    /// `lea sym(%rip), %reg` and other same-binary PC-relative references.
    Pc32,
    /// 32-bit absolute, zero-extended.
    Abs32,
    /// 32-bit absolute, sign-extended (used for `movl $imm32, reg` style loads of addresses
    /// that must stay negative-safe, per `x86_64-gen.c`'s non-PIC constant path).
    Abs32Signed,
    /// 64-bit absolute (`movabs $sym, %reg`).
    Abs64,
    /// PC-relative offset into the GOT (`mov sym@GOTPCREL(%rip), %reg`).
    GotPcRel,
}

impl RelocKind {
    pub fn elf_type(self) -> RX86_64 {
        RX86_64(match self {
            RelocKind::Plt32 => R_X86_64_PLT32,
            RelocKind::Pc32 => R_X86_64_PC32,
            RelocKind::Abs32 => R_X86_64_32,
            RelocKind::Abs32Signed => R_X86_64_32S,
            RelocKind::Abs64 => R_X86_64_64,
            RelocKind::GotPcRel => R_X86_64_GOTPCREL,
        })
    }

    pub fn addend_width(self) -> u8 {
        match self {
            RelocKind::Abs64 => 8,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    pub section: SectionId,
    /// Byte offset within `section` of the field to patch.
    pub offset: u64,
    pub symbol: SymbolId,
    pub kind: RelocKind,
    pub addend: i64,
}
