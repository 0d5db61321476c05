//! Register occupancy tracking for the value stack: which vstack slot (if any)
//! currently has its live value sitting in a given GPR/XMM register, so `gv`/`gv2`
//! know what needs `save_reg`-ing before they can hand that register to a new owner.
//! Grounded in `x86_64-gen.c`'s `vstack[i].r`/`get_reg`/`get_reg_of_class` scan.

use x64enc::{Gpr, RegClass, Xmm};

/// Candidate GPRs for a generic `RC_INT` request, in the order `get_reg` tries them:
/// the four call-clobbered "scratch" registers first, then the callee-saved ones,
/// leaving `RAX`/`RCX`/`RDX`/`R11` for last since those back the more specific masks.
const GENERIC_INT_ORDER: [Gpr; 11] = [
    Gpr::Rbx,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R12,
    Gpr::R13,
    Gpr::R14,
    Gpr::R15,
    Gpr::Rax,
];

const GENERIC_XMM_ORDER: [Xmm; 8] = [
    Xmm::Xmm2,
    Xmm::Xmm3,
    Xmm::Xmm4,
    Xmm::Xmm5,
    Xmm::Xmm6,
    Xmm::Xmm7,
    Xmm::Xmm0,
    Xmm::Xmm1,
];

#[derive(Default)]
pub struct RegFile {
    int_owner: [Option<usize>; 16],
    xmm_owner: [Option<usize>; 16],
}

impl RegFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int_owner(&self, r: Gpr) -> Option<usize> {
        self.int_owner[r as usize]
    }

    pub fn xmm_owner(&self, r: Xmm) -> Option<usize> {
        self.xmm_owner[r as usize]
    }

    pub fn claim_int(&mut self, r: Gpr, owner: usize) {
        self.int_owner[r as usize] = Some(owner);
    }

    pub fn claim_xmm(&mut self, r: Xmm, owner: usize) {
        self.xmm_owner[r as usize] = Some(owner);
    }

    pub fn release_int(&mut self, r: Gpr) {
        self.int_owner[r as usize] = None;
    }

    pub fn release_xmm(&mut self, r: Xmm) {
        self.xmm_owner[r as usize] = None;
    }

    /// Every GPR whose owner slot index is `>= keep_bottom`, i.e. not one of the
    /// oldest `keep_bottom` entries on the stack — the set `save_regs` must spill.
    pub fn int_regs_above(&self, keep_bottom: usize) -> Vec<(Gpr, usize)> {
        self.int_owner
            .iter()
            .enumerate()
            .filter_map(|(i, owner)| owner.filter(|&o| o >= keep_bottom).map(|o| (gpr_from_index(i), o)))
            .collect()
    }

    pub fn xmm_regs_above(&self, keep_bottom: usize) -> Vec<(Xmm, usize)> {
        self.xmm_owner
            .iter()
            .enumerate()
            .filter_map(|(i, owner)| owner.filter(|&o| o >= keep_bottom).map(|o| (xmm_from_index(i), o)))
            .collect()
    }

    /// Candidate registers for `class`, most to least preferred, restricted to the
    /// handful of specific-register masks (`RAX`/`RCX`/`RDX`/`R11`) when the caller
    /// didn't also ask for the generic `INT` pool.
    pub fn int_candidates(class: RegClass) -> Vec<Gpr> {
        let mut out = Vec::new();
        if class.contains(RegClass::RAX) {
            out.push(Gpr::Rax);
        }
        if class.contains(RegClass::RCX) {
            out.push(Gpr::Rcx);
        }
        if class.contains(RegClass::RDX) {
            out.push(Gpr::Rdx);
        }
        if class.contains(RegClass::R11) {
            out.push(Gpr::R11);
        }
        if class.contains(RegClass::INT) {
            out.extend(GENERIC_INT_ORDER);
        }
        out
    }

    pub fn xmm_candidates(class: RegClass) -> Vec<Xmm> {
        let mut out = Vec::new();
        if class.contains(RegClass::XMM0) {
            out.push(Xmm::Xmm0);
        }
        if class.contains(RegClass::XMM1) {
            out.push(Xmm::Xmm1);
        }
        if class.contains(RegClass::FLOAT) {
            out.extend(GENERIC_XMM_ORDER);
        }
        out
    }
}

fn gpr_from_index(i: usize) -> Gpr {
    const TABLE: [Gpr; 16] = [
        Gpr::Rax,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rbx,
        Gpr::Rsp,
        Gpr::Rbp,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];
    TABLE[i]
}

fn xmm_from_index(i: usize) -> Xmm {
    const TABLE: [Xmm; 16] = [
        Xmm::Xmm0,
        Xmm::Xmm1,
        Xmm::Xmm2,
        Xmm::Xmm3,
        Xmm::Xmm4,
        Xmm::Xmm5,
        Xmm::Xmm6,
        Xmm::Xmm7,
        Xmm::Xmm8,
        Xmm::Xmm9,
        Xmm::Xmm10,
        Xmm::Xmm11,
        Xmm::Xmm12,
        Xmm::Xmm13,
        Xmm::Xmm14,
        Xmm::Xmm15,
    ];
    TABLE[i]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_int_class_prefers_scratch_registers_first() {
        let candidates = RegFile::int_candidates(RegClass::INT);
        assert_eq!(candidates[0], Gpr::Rbx);
    }

    #[test]
    fn specific_register_classes_do_not_pull_in_the_generic_pool() {
        let candidates = RegFile::int_candidates(RegClass::RAX);
        assert_eq!(candidates, vec![Gpr::Rax]);
    }

    #[test]
    fn claim_and_release_round_trip() {
        let mut regs = RegFile::new();
        regs.claim_int(Gpr::Rbx, 3);
        assert_eq!(regs.int_owner(Gpr::Rbx), Some(3));
        regs.release_int(Gpr::Rbx);
        assert_eq!(regs.int_owner(Gpr::Rbx), None);
    }
}
