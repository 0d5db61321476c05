//! ABI lowering (§4.8): argument/return classification is already [`crate::ctype::classify_arg`];
//! this module builds on it for the two calling conventions in scope — function
//! prologue/epilogue frame setup, variadic register-save-area construction, and
//! call-site argument marshaling. Grounded in `x86_64-gen.c`'s `gfunc_prolog`,
//! `gfunc_epilog`, and `gfunc_call`.

pub mod sysv;
pub mod windows;

use x64enc::{Gpr, Operand, Width};

use crate::ctype::CType;
use crate::gen::CodeGen;
use crate::value::SValue;

/// One parameter's materialized home after the prologue has stored every incoming
/// argument to a local slot. Stands in for what the (out-of-scope) C parser would
/// otherwise carry as a declared variable's storage.
#[derive(Debug, Clone)]
pub struct ParamSlot {
    pub ty: CType,
    pub value: SValue,
}

/// `__va_list_tag`'s four fields, gathered once by a variadic prologue so a (not in
/// scope) `va_arg` lowering has somewhere to read gp/fp/stack state from.
#[derive(Debug, Clone, Copy)]
pub struct VaListInfo {
    pub gp_offset: i32,
    pub fp_offset: i32,
    pub overflow_arg_area: i32,
    pub reg_save_area: i32,
}

/// A function's emitted prologue: every parameter's home, the patch site for the
/// frame-size immediate the epilogue fills in, and (for a variadic function) the
/// register-save-area layout.
#[derive(Debug, Clone)]
pub struct Prologue {
    pub params: Vec<ParamSlot>,
    pub frame_size_patch: u64,
    pub va_list: Option<VaListInfo>,
}

pub(crate) fn align16(n: i32) -> i32 {
    (n + 15) & !15
}

/// `push %rbp; mov %rsp, %rbp; sub $0, %rsp` — the `sub` immediate is a placeholder,
/// patched by [`patch_frame_size`] once the epilogue knows the final frame size
/// (`x86_64-gen.c`'s `func_sub_sp_offset`). The 32-bit-immediate form is forced
/// unconditionally since the real value is unknown at this point and might not fit
/// in a byte; an assembler choosing the narrower encoding here would leave no room
/// to patch a frame larger than 127 bytes.
pub(crate) fn emit_frame_open(gen: &mut CodeGen) -> u64 {
    let mut enc = gen.encoder();
    enc.push(Gpr::Rbp);
    enc.mov_reg_reg(Gpr::Rbp, Gpr::Rsp, Width::Qword);
    enc.rex(true, None, Some(Gpr::Rsp), 0x81);
    enc.gen_modrm(5, Operand::Reg(Gpr::Rsp));
    let patch_at = enc.sections.current().position();
    enc.emit_le32(0);
    patch_at
}

/// Backpatches the frame-size immediate `emit_frame_open` reserved, rounding up to
/// the ABI's mandatory 16-byte stack alignment, and returns the size written.
pub(crate) fn patch_frame_size(gen: &mut CodeGen, patch_site: u64) -> i32 {
    let frame_size = align16(gen.frame_size());
    let sec = gen.sections.current_id();
    gen.sections.patch_le32(sec, patch_site, frame_size as u32);
    frame_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align16_rounds_up() {
        assert_eq!(align16(0), 0);
        assert_eq!(align16(1), 16);
        assert_eq!(align16(16), 16);
        assert_eq!(align16(17), 32);
    }
}
