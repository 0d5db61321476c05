//! Register model. Encodings and register-class bits follow `x86_64-gen.c`'s
//! `TREG_*` constants and `REX_BASE`/`REG_VALUE` macros; named clearly instead of
//! through that file's terse macro pair.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// The 3-bit field that goes in ModR/M/SIB/opcode-plus-register; the REX.R/X/B bit
    /// carries the 4th bit separately.
    pub fn field(self) -> u8 {
        (self as u8) & 7
    }

    pub fn needs_rex_extension(self) -> bool {
        (self as u8) >= 8
    }

    /// True for RBP/R13: ModR/M `mod=00 rm=101` means RIP-relative, not "[rbp]", so a
    /// base of RBP/R13 with a zero displacement must be forced into the 8-bit-disp form.
    pub fn aliases_rip_relative_encoding(self) -> bool {
        self.field() == Gpr::Rbp.field()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl Xmm {
    pub fn field(self) -> u8 {
        (self as u8) & 7
    }

    pub fn needs_rex_extension(self) -> bool {
        (self as u8) >= 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    Dword,
    Qword,
}

impl Width {
    pub fn is_64(self) -> bool {
        self == Width::Qword
    }
}

bitflags::bitflags! {
    /// Candidate-register sets for allocation. Mirrors `RC_INT`/`RC_FLOAT`/`RC_RAX`/
    /// `RC_RCX`/`RC_RDX`/`RC_R11` from `x86_64-gen.c`; the System V/Windows ABI lowering
    /// narrows a value's class mask to these before calling `gv`.
    pub struct RegClass: u32 {
        const INT = 1 << 0;
        const FLOAT = 1 << 1;
        const RAX = 1 << 2;
        const RCX = 1 << 3;
        const RDX = 1 << 4;
        const R11 = 1 << 5;
        const XMM0 = 1 << 6;
        const XMM1 = 1 << 7;
    }
}

impl RegClass {
    /// `RC_IRET`: single-word integer return register.
    pub const IRET: RegClass = RegClass::RAX;
    /// `RC_LRET`: second integer return register (high half of a 128-bit return).
    pub const LRET: RegClass = RegClass::RDX;
    /// `RC_FRET`: float/double return register.
    pub const FRET: RegClass = RegClass::XMM0;
    /// `RC_QRET`: second float return register (for complex/ldouble pairs).
    pub const QRET: RegClass = RegClass::XMM1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_and_rex_bit_split_high_registers() {
        assert_eq!(Gpr::R8.field(), 0);
        assert!(Gpr::R8.needs_rex_extension());
        assert_eq!(Gpr::Rax.field(), 0);
        assert!(!Gpr::Rax.needs_rex_extension());
    }

    #[test]
    fn rbp_and_r13_alias_rip_relative_encoding() {
        assert!(Gpr::Rbp.aliases_rip_relative_encoding());
        assert!(Gpr::R13.aliases_rip_relative_encoding());
        assert!(!Gpr::Rsp.aliases_rip_relative_encoding());
    }
}
