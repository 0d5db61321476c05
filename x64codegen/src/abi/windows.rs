//! The Windows x64 calling convention: four argument-position registers shared
//! between integer and SSE classes (position 0 is always `%rcx`/`%xmm0`, never
//! both), a mandatory 32-byte shadow space the caller reserves even when fewer
//! than four arguments are passed, and "by value" for anything that fits in 8
//! bytes or "by hidden pointer" for anything that doesn't — a much coarser split
//! than System V's eightbyte classification, so this module classifies directly
//! off [`CType::size`]/[`CType::is_float_family`] rather than reusing
//! [`classify_arg`].
//!
//! Grounded in `x86_64-gen.c`'s `gfunc_prolog`/`gfunc_epilog`/`gfunc_call` under
//! `#ifdef TCC_TARGET_PE`.

use asmobj::SymbolId;
use x64enc::{ArithOp, Gpr, Operand, Width, Xmm};

use crate::abi::{align16, emit_frame_open, patch_frame_size, ParamSlot, Prologue};
use crate::ctype::CType;
use crate::error::Result;
use crate::gen::CodeGen;
use crate::value::{RegSlot, SValue};

pub const WIN_INT_ARG_REGS: [Gpr; 4] = [Gpr::Rcx, Gpr::Rdx, Gpr::R8, Gpr::R9];
pub const WIN_SSE_ARG_REGS: [Xmm; 4] = [Xmm::Xmm0, Xmm::Xmm1, Xmm::Xmm2, Xmm::Xmm3];

/// Shadow space: 32 bytes the caller always reserves below its own frame for the
/// callee's use, regardless of how many of the four register slots are actually
/// occupied by arguments.
const SHADOW_SPACE: i32 = 32;

/// Stack arguments beyond the fourth sit above the return address, the pushed
/// `%rbp`, and the 32-byte shadow space the caller already carved out.
const WIN_INCOMING_STACK_BASE: i32 = 16 + SHADOW_SPACE;

/// Windows' by-value/by-reference split: anything that fits in a single 8-byte
/// register slot is passed directly (integer or single/double precision float);
/// anything larger (structs >8 bytes, `long double`) is passed by a pointer to a
/// caller-allocated copy, unlike System V's eightbyte-pair-in-two-registers case.
fn classify_win(ty: &CType) -> WinClass {
    if ty.is_struct() || matches!(ty, CType::LongDouble) {
        if ty.size() <= 8 {
            WinClass::ByValue { float: false }
        } else {
            WinClass::ByRef
        }
    } else if matches!(ty, CType::Void) {
        WinClass::Void
    } else {
        WinClass::ByValue { float: ty.is_float_family() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WinClass {
    ByValue { float: bool },
    ByRef,
    Void,
}

impl<'a> CodeGen<'a> {
    /// `gfunc_prolog` under `TCC_TARGET_PE`: homes each of the first four arguments
    /// from its position-matched register (`%rcx`/`%xmm0`, `%rdx`/`%xmm1`, ...) and
    /// every later argument from the shadow-space-adjusted stack.
    ///
    /// A frame whose locals push the total size past one page is supposed to grow
    /// via a `call __chkstk` probe spliced into the prologue ahead of the `sub
    /// %rsp` (`x86_64-gen.c`'s `gen_increase_frame`); this generator's single-pass
    /// encoder can only backpatch a fixed-width immediate, not splice in a longer
    /// instruction sequence once the frame size is known, so large Windows frames
    /// are emitted without a stack probe. Disclosed here rather than silently
    /// dropped.
    pub fn windows_prolog(&mut self, params: &[CType], variadic: bool) -> Result<Prologue> {
        let frame_size_patch = emit_frame_open(self);

        let mut stack_off = WIN_INCOMING_STACK_BASE;
        let mut params_out = Vec::with_capacity(params.len());

        for (pos, ty) in params.iter().enumerate() {
            let value = if pos < WIN_INT_ARG_REGS.len() {
                match classify_win(ty) {
                    WinClass::ByValue { float: true } => {
                        let offset = self.alloc_local(8, 8)?;
                        self.encoder().movsd_store(
                            WIN_SSE_ARG_REGS[pos],
                            Operand::Local { disp: offset },
                            x64enc::FloatWidth::Double,
                        );
                        SValue::Local { offset, ty: ty.clone() }
                    }
                    WinClass::ByValue { float: false } => {
                        let offset = self.alloc_local(8, 8)?;
                        self.encoder()
                            .store(WIN_INT_ARG_REGS[pos], Operand::Local { disp: offset }, Width::Qword);
                        SValue::Local { offset, ty: ty.clone() }
                    }
                    WinClass::ByRef => {
                        // The caller passed a pointer to a caller-owned copy in the
                        // position register; home the pointer itself, then every
                        // access to this parameter dereferences it.
                        let offset = self.alloc_local(8, 8)?;
                        self.encoder()
                            .store(WIN_INT_ARG_REGS[pos], Operand::Local { disp: offset }, Width::Qword);
                        SValue::IndirectLocal { offset, ty: ty.clone() }
                    }
                    WinClass::Void => SValue::Local { offset: 0, ty: ty.clone() },
                }
            } else {
                let v = SValue::Local { offset: stack_off, ty: ty.clone() };
                stack_off += 8;
                v
            };
            params_out.push(ParamSlot { ty: ty.clone(), value });
        }

        // Windows variadics carry no register-save area; a callee reaches
        // additional arguments straight off the shadow-space stack slots via its
        // own `va_list` walk, so there is nothing extra for the prologue to build.
        let _ = variadic;

        Ok(Prologue { params: params_out, frame_size_patch, va_list: None })
    }

    /// `gfunc_epilog` under `TCC_TARGET_PE`: identical register convention to
    /// System V's for the return value itself (`%rax`/`%xmm0`), since Windows and
    /// System V agree on those; the differences are all on the argument side.
    pub fn windows_epilog(&mut self, prologue: &Prologue, ret_ty: &CType, ret_value: Option<SValue>) -> Result<()> {
        if let Some(value) = ret_value {
            self.push(value);
            let idx = self.vstack.len() - 1;
            match classify_win(ret_ty) {
                WinClass::ByValue { float: true } => self.force_into(idx, RegSlot::Sse(Xmm::Xmm0))?,
                WinClass::ByValue { float: false } => self.force_into(idx, RegSlot::Int(Gpr::Rax))?,
                // Hidden-pointer return: the destination address the caller
                // supplied is handed back in %rax, matching sysv_epilog's
                // convention for its own Mode::Memory case.
                WinClass::ByRef => self.force_into(idx, RegSlot::Int(Gpr::Rax))?,
                WinClass::Void => {}
            }
            self.vstack.pop();
        }

        patch_frame_size(self, prologue.frame_size_patch);
        self.encoder().leave();
        self.encoder().ret();
        Ok(())
    }

    /// `gfunc_call` under `TCC_TARGET_PE`: marshals up to four arguments into their
    /// position-matched registers, spills the rest above a 32-byte shadow space,
    /// and emits `call`. Reuses [`CodeGen::home_args`]/[`CodeGen::load_into_gpr`]/
    /// [`CodeGen::load_into_xmm`] from the System V lowering — the spill-then-load
    /// marshaling scheme and its stated simplification apply identically here.
    pub fn windows_call(&mut self, callee: SymbolId, args: Vec<SValue>, ret_ty: &CType) -> Result<()> {
        let homes = self.home_args(args)?;

        self.save_regs(0)?;

        let mut stack_args = Vec::new();
        for (pos, home) in homes.iter().enumerate() {
            if pos < WIN_INT_ARG_REGS.len() {
                match classify_win(&home.ty()) {
                    WinClass::ByValue { float: true } => self.load_into_xmm(home, WIN_SSE_ARG_REGS[pos])?,
                    WinClass::ByValue { float: false } | WinClass::ByRef => {
                        self.load_into_gpr(home, WIN_INT_ARG_REGS[pos])?
                    }
                    WinClass::Void => {}
                }
            } else {
                stack_args.push(home.clone());
            }
        }

        let stack_bytes = (stack_args.len() as i32) * 8;
        let padded_stack = align16(SHADOW_SPACE + stack_bytes) - SHADOW_SPACE;
        let reserved = SHADOW_SPACE + padded_stack.max(0);
        self.encoder()
            .arith_ri(ArithOp::Sub, Operand::Reg(Gpr::Rsp), reserved as i64, Width::Qword)?;

        let mut off = SHADOW_SPACE;
        for home in &stack_args {
            self.stage_stack_arg(home, 8, off)?;
            off += 8;
        }

        self.encoder().call_rel32(callee);
        self.encoder()
            .arith_ri(ArithOp::Add, Operand::Reg(Gpr::Rsp), reserved as i64, Width::Qword)?;

        self.push_return_windows(ret_ty);
        Ok(())
    }

    /// Mirrors `sysv.rs`'s `push_return` for Windows' by-value/by-ref split.
    fn push_return_windows(&mut self, ret_ty: &CType) {
        let pushed = match classify_win(ret_ty) {
            WinClass::ByValue { float: true } => {
                Some(SValue::Reg { slot: RegSlot::Sse(Xmm::Xmm0), ty: ret_ty.clone() })
            }
            WinClass::ByValue { float: false } => {
                Some(SValue::Reg { slot: RegSlot::Int(Gpr::Rax), ty: ret_ty.clone() })
            }
            WinClass::ByRef => Some(SValue::RegIndirect { slot: RegSlot::Int(Gpr::Rax), ty: ret_ty.clone() }),
            WinClass::Void => None,
        };
        if let Some(sv) = pushed {
            let slot = match sv {
                SValue::Reg { slot, .. } | SValue::RegIndirect { slot, .. } => slot,
                _ => unreachable!("push_return_windows only ever builds Reg/RegIndirect entries"),
            };
            self.push(sv);
            let idx = self.vstack.len() - 1;
            self.claim(slot, idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::IntWidth;
    use asmobj::{SectionStore, SymbolTable};

    fn int_ty() -> CType {
        CType::Int { width: IntWidth::Long, signed: true }
    }

    #[test]
    fn prolog_homes_first_four_params_from_registers_and_rest_from_stack() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let params = vec![int_ty(), int_ty(), int_ty(), int_ty(), int_ty()];
        let prologue = gen.windows_prolog(&params, false).unwrap();
        assert_eq!(prologue.params.len(), 5);
        match prologue.params[4].value {
            SValue::Local { offset, .. } => assert_eq!(offset, WIN_INCOMING_STACK_BASE),
            _ => panic!("expected the fifth parameter to come off the stack"),
        }
        let reg_offsets: Vec<i32> = prologue.params[..4]
            .iter()
            .map(|p| match p.value {
                SValue::Local { offset, .. } => offset,
                _ => panic!("expected a Local home"),
            })
            .collect();
        assert_eq!(reg_offsets.len(), 4);
        assert!(reg_offsets.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn epilog_patches_a_nonzero_frame_size_for_a_function_with_locals() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let prologue = gen.windows_prolog(&[], false).unwrap();
        gen.alloc_local(40, 8).unwrap();
        gen.windows_epilog(&prologue, &CType::Void, None).unwrap();
        let patch_at = prologue.frame_size_patch as usize;
        let bytes = &gen.current_data()[patch_at..patch_at + 4];
        let frame_size = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(frame_size, 48);
    }
}
