//! Clobber-list lookups. `tccasm.c`'s `asm_clobber` sets a bit in a fixed
//! `clobber_regs[NB_ASM_REGS]` bitmap per named register; this crate reaches the
//! same effect by spilling the named register through [`x64codegen::CodeGen::save_reg`]
//! before constraint resolution hands out any registers of its own, so a clobbered
//! register can never collide with a live C-side value.

use x64enc::Gpr;

pub fn gpr_from_clobber_name(name: &str) -> Option<Gpr> {
    use Gpr::*;
    Some(match name {
        "rax" | "eax" | "ax" | "al" | "ah" => Rax,
        "rbx" | "ebx" | "bx" | "bl" | "bh" => Rbx,
        "rcx" | "ecx" | "cx" | "cl" | "ch" => Rcx,
        "rdx" | "edx" | "dx" | "dl" | "dh" => Rdx,
        "rsi" | "esi" | "si" | "sil" => Rsi,
        "rdi" | "edi" | "di" | "dil" => Rdi,
        "rbp" | "ebp" => Rbp,
        "rsp" | "esp" => Rsp,
        "r8" => R8,
        "r9" => R9,
        "r10" => R10,
        "r11" => R11,
        "r12" => R12,
        "r13" => R13,
        "r14" => R14,
        "r15" => R15,
        _ => return None,
    })
}

/// `memory` forces a compiler barrier (already satisfied: every live value not
/// bound to an asm operand is spilled to its home before the template is
/// assembled) and `cc` names the flags register, which this crate never keeps a
/// value stack entry resident in. Neither names an allocatable GPR.
pub fn is_pseudo_clobber(name: &str) -> bool {
    matches!(name, "memory" | "cc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_aliased_register_names() {
        assert_eq!(gpr_from_clobber_name("eax"), Some(Gpr::Rax));
        assert_eq!(gpr_from_clobber_name("r10"), Some(Gpr::R10));
        assert_eq!(gpr_from_clobber_name("nope"), None);
    }

    #[test]
    fn memory_and_cc_are_pseudo_clobbers() {
        assert!(is_pseudo_clobber("memory"));
        assert!(is_pseudo_clobber("cc"));
        assert!(!is_pseudo_clobber("rax"));
    }
}
