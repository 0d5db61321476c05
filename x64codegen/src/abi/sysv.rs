//! The System V x86-64 calling convention: six integer argument registers, eight
//! SSE argument registers, the 48/128-byte `reg_save_area` a variadic function's
//! prologue must build, and the "spill every argument home before reloading it into
//! its ABI register" marshaling scheme `sysv_call` uses in place of the original's
//! `%r10`/`%r11` staging trick (see the note on [`sysv_call`] for why).
//!
//! Grounded in `x86_64-gen.c`'s `gfunc_prolog`/`gfunc_epilog`/`gfunc_call` under
//! `#ifndef TCC_TARGET_PE`.

use asmobj::SymbolId;
use x64enc::{ArithOp, FloatWidth, Gpr, Operand, RegClass, Width, Xmm};

use crate::abi::{align16, emit_frame_open, patch_frame_size, ParamSlot, Prologue, VaListInfo};
use crate::ctype::{classify_arg, CType, Mode};
use crate::error::{CodegenError, Result};
use crate::gen::CodeGen;
use crate::value::{RegSlot, SValue};

pub const INT_ARG_REGS: [Gpr; 6] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];
pub const SSE_ARG_REGS: [Xmm; 8] = [
    Xmm::Xmm0,
    Xmm::Xmm1,
    Xmm::Xmm2,
    Xmm::Xmm3,
    Xmm::Xmm4,
    Xmm::Xmm5,
    Xmm::Xmm6,
    Xmm::Xmm7,
];

/// `reg_save_area`'s fixed layout: six 8-byte integer slots followed by eight
/// 16-byte (padded) vector slots, per the psABI's variadic-function appendix.
const REG_SAVE_AREA_SIZE: u64 = 6 * 8 + 8 * 16;
const REG_SAVE_SSE_BASE: i32 = 48;

/// The incoming stack arguments begin 16 bytes above `%rbp`: 8 for the return
/// address pushed by `call`, 8 for the `push %rbp` the prologue itself performs.
const INCOMING_STACK_BASE: i32 = 16;

impl<'a> CodeGen<'a> {
    /// `gfunc_prolog`: emits `push %rbp; mov %rsp, %rbp`, stores every register- or
    /// stack-resident incoming argument to its own local slot, and (for a variadic
    /// function) builds the register-save area `va_arg` would walk.
    pub fn sysv_prolog(&mut self, params: &[CType], variadic: bool) -> Result<Prologue> {
        let frame_size_patch = emit_frame_open(self);

        let mut int_idx = 0usize;
        let mut sse_idx = 0usize;
        let mut stack_off = INCOMING_STACK_BASE;
        let mut params_out = Vec::with_capacity(params.len());

        for ty in params {
            let class = classify_arg(ty);
            let value = match class.mode {
                Mode::Memory | Mode::None => {
                    let v = SValue::Local { offset: stack_off, ty: ty.clone() };
                    stack_off += class.size as i32;
                    v
                }
                Mode::X87 => {
                    let v = SValue::Local { offset: stack_off, ty: ty.clone() };
                    stack_off += 16;
                    v
                }
                Mode::Integer if int_idx + class.reg_count as usize <= INT_ARG_REGS.len() => {
                    let offset = self.alloc_local(class.size, class.align)?;
                    for part in 0..class.reg_count as i32 {
                        let reg = INT_ARG_REGS[int_idx];
                        int_idx += 1;
                        self.encoder().store(reg, Operand::Local { disp: offset + part * 8 }, Width::Qword);
                    }
                    SValue::Local { offset, ty: ty.clone() }
                }
                Mode::Sse if sse_idx + class.reg_count as usize <= SSE_ARG_REGS.len() => {
                    let offset = self.alloc_local(class.size, class.align)?;
                    for part in 0..class.reg_count as i32 {
                        let reg = SSE_ARG_REGS[sse_idx];
                        sse_idx += 1;
                        self.encoder().movsd_store(
                            reg,
                            Operand::Local { disp: offset + part * 8 },
                            FloatWidth::Double,
                        );
                    }
                    SValue::Local { offset, ty: ty.clone() }
                }
                Mode::Integer | Mode::Sse => {
                    // Ran out of registers for this class partway through the
                    // argument list; the psABI sends the whole eightbyte pair to
                    // the stack rather than splitting it across classes.
                    let v = SValue::Local { offset: stack_off, ty: ty.clone() };
                    stack_off += class.size as i32;
                    v
                }
            };
            params_out.push(ParamSlot { ty: ty.clone(), value });
        }

        let va_list = if variadic {
            Some(self.build_va_save_area(int_idx, sse_idx, stack_off)?)
        } else {
            None
        };

        Ok(Prologue { params: params_out, frame_size_patch, va_list })
    }

    /// Reserves the 176-byte register-save area and spills every argument register
    /// not already claimed by a named parameter into it, matching `gfunc_prolog`'s
    /// `#ifdef CONFIG_TCC_BCHECK`-free variadic path.
    fn build_va_save_area(&mut self, named_int: usize, named_sse: usize, overflow_off: i32) -> Result<VaListInfo> {
        let reg_save_area = self.alloc_local(REG_SAVE_AREA_SIZE, 16)?;
        for (i, reg) in INT_ARG_REGS.iter().enumerate().skip(named_int) {
            self.encoder()
                .store(*reg, Operand::Local { disp: reg_save_area + (i as i32) * 8 }, Width::Qword);
        }
        for (i, reg) in SSE_ARG_REGS.iter().enumerate().skip(named_sse) {
            self.encoder().movsd_store(
                *reg,
                Operand::Local { disp: reg_save_area + REG_SAVE_SSE_BASE + (i as i32) * 16 },
                FloatWidth::Double,
            );
        }
        Ok(VaListInfo {
            gp_offset: (named_int as i32) * 8,
            fp_offset: REG_SAVE_SSE_BASE + (named_sse as i32) * 16,
            overflow_arg_area: overflow_off,
            reg_save_area,
        })
    }

    /// `gfunc_epilog`: moves `ret_value` (if any) into `%rax`/`%xmm0`, backpatches the
    /// frame-size immediate the prologue reserved, and emits `leave; ret`.
    ///
    /// A 16-byte integer aggregate return (`%rax:%rdx`) only has its low eightbyte
    /// modeled — this crate's [`SValue`] has no wide-register-pair variant, so the
    /// high half is left for a future `SValue::RegPair` rather than faked here.
    pub fn sysv_epilog(&mut self, prologue: &Prologue, ret_ty: &CType, ret_value: Option<SValue>) -> Result<()> {
        if let Some(value) = ret_value {
            self.push(value);
            let idx = self.vstack.len() - 1;
            match classify_arg(ret_ty).mode {
                Mode::Integer => self.force_into(idx, RegSlot::Int(Gpr::Rax))?,
                Mode::Sse => self.force_into(idx, RegSlot::Sse(Xmm::Xmm0))?,
                Mode::Memory => {
                    // Hidden-pointer return: the caller passed the destination
                    // address in %rdi, which `sysv_prolog` already homed as this
                    // function's own first local — callers of this lowering are
                    // expected to have `memcpy`'d into `*that` and to return the
                    // same pointer, so surface it as a plain RDI->RAX move.
                    self.force_into(idx, RegSlot::Int(Gpr::Rax))?
                }
                Mode::None | Mode::X87 => {}
            }
            self.vstack.pop();
        }

        patch_frame_size(self, prologue.frame_size_patch);
        self.encoder().leave();
        self.encoder().ret();
        Ok(())
    }

    /// `gfunc_call`: marshals `args` into their ABI registers/stack slots and emits
    /// `call`.
    ///
    /// Every argument is first spilled to its own home slot before any of them is
    /// loaded into a register, rather than threading the original's `%r10`/`%r11`
    /// staging trick through a dependency graph of argument registers. That trick
    /// exists purely to avoid an extra store+load round trip when two arguments'
    /// source and destination registers collide; skipping it costs a little code
    /// size and nothing else, which fits this generator's Non-goals (no scheduling,
    /// no register-allocation optimization) better than reproducing it would.
    /// Leaves the call's return value (if any; `void` pushes nothing) as the new
    /// top of the value stack, the same convention every other `gen_*` operation in
    /// [`crate::gen`] follows.
    pub fn sysv_call(
        &mut self,
        callee: SymbolId,
        args: Vec<SValue>,
        ret_ty: &CType,
        variadic_sse_used: Option<u8>,
    ) -> Result<()> {
        let homes = self.home_args(args)?;

        self.save_regs(0)?;

        let mut int_idx = 0usize;
        let mut sse_idx = 0usize;
        let mut stack_args = Vec::new();
        for home in &homes {
            let class = classify_arg(&home.ty());
            match class.mode {
                Mode::Integer if int_idx + class.reg_count as usize <= INT_ARG_REGS.len() => {
                    self.load_into_gpr(home, INT_ARG_REGS[int_idx])?;
                    int_idx += class.reg_count as usize;
                }
                Mode::Sse if sse_idx + class.reg_count as usize <= SSE_ARG_REGS.len() => {
                    self.load_into_xmm(home, SSE_ARG_REGS[sse_idx])?;
                    sse_idx += class.reg_count as usize;
                }
                _ => stack_args.push((home.clone(), class.size)),
            }
        }

        let total_stack: i32 = stack_args.iter().map(|(_, size)| *size as i32).sum();
        let padded_stack = align16(total_stack);
        if padded_stack > 0 {
            self.encoder()
                .arith_ri(ArithOp::Sub, Operand::Reg(Gpr::Rsp), padded_stack as i64, Width::Qword)?;
            let mut off = 0i32;
            for (home, size) in &stack_args {
                self.stage_stack_arg(home, *size, off)?;
                off += *size as i32;
            }
        }

        if let Some(used) = variadic_sse_used {
            self.encoder().mov_al_imm8(used);
        }
        self.encoder().call_rel32(callee);
        if padded_stack > 0 {
            self.encoder()
                .arith_ri(ArithOp::Add, Operand::Reg(Gpr::Rsp), padded_stack as i64, Width::Qword)?;
        }

        self.push_return(ret_ty);
        Ok(())
    }

    /// Spills every argument SValue to a concrete memory home (its own stack slot),
    /// leaving aggregates that already live in memory untouched. Shared with the
    /// Windows call lowering, which marshals from the same kind of home slots.
    pub(crate) fn home_args(&mut self, args: Vec<SValue>) -> Result<Vec<SValue>> {
        let mut homes = Vec::with_capacity(args.len());
        for arg in args {
            self.push(arg);
            let idx = self.vstack.len() - 1;
            let ty = self.vstack[idx].ty();
            if !ty.is_struct() && !matches!(self.vstack[idx], SValue::Local { .. }) {
                let slot = self.gv(RegClass::INT | RegClass::FLOAT)?;
                self.save_reg(slot)?;
            }
            homes.push(self.pop()?);
        }
        Ok(homes)
    }

    pub(crate) fn load_into_gpr(&mut self, home: &SValue, reg: Gpr) -> Result<()> {
        self.push(home.clone());
        let idx = self.vstack.len() - 1;
        self.force_into(idx, RegSlot::Int(reg))?;
        self.vstack.pop();
        Ok(())
    }

    pub(crate) fn load_into_xmm(&mut self, home: &SValue, reg: Xmm) -> Result<()> {
        self.push(home.clone());
        let idx = self.vstack.len() - 1;
        self.force_into(idx, RegSlot::Sse(reg))?;
        self.vstack.pop();
        Ok(())
    }

    /// Copies `home`'s bytes into `[%rsp+dest_disp]`, 8 bytes at a time through a
    /// scratch GPR (`%r11`, never an argument register). Only `SValue::Local` homes
    /// are supported — every non-aggregate home passes through [`Self::home_args`]
    /// first, and a memory-class (large aggregate) argument is already `Local` by
    /// construction since this generator never materializes an aggregate's bytes
    /// into a register.
    pub(crate) fn stage_stack_arg(&mut self, home: &SValue, size: u64, dest_disp: i32) -> Result<()> {
        let SValue::Local { offset: src_disp, .. } = home else {
            return Err(CodegenError::ExpectedMemoryClass);
        };
        let src_disp = *src_disp;
        let mut chunk = 0i32;
        while (chunk as u64) < size {
            let scratch = Gpr::R11;
            self.encoder().load(scratch, Operand::Local { disp: src_disp + chunk }, Width::Qword);
            self.encoder()
                .store(scratch, Operand::Mem { base: Gpr::Rsp, disp: dest_disp + chunk }, Width::Qword);
            chunk += 8;
        }
        Ok(())
    }

    /// Pushes the call's return value onto the vstack as a register-resident entry
    /// already claimed in the register file, or pushes nothing for `void`/`long
    /// double` (the latter returns on the x87 stack, outside this model).
    fn push_return(&mut self, ret_ty: &CType) {
        let pushed = match classify_arg(ret_ty).mode {
            Mode::Integer => Some(SValue::Reg { slot: RegSlot::Int(Gpr::Rax), ty: ret_ty.clone() }),
            Mode::Sse => Some(SValue::Reg { slot: RegSlot::Sse(Xmm::Xmm0), ty: ret_ty.clone() }),
            // Hidden-pointer return: the callee hands the destination address back
            // in %rax by convention.
            Mode::Memory => Some(SValue::RegIndirect { slot: RegSlot::Int(Gpr::Rax), ty: ret_ty.clone() }),
            Mode::None | Mode::X87 => None,
        };
        if let Some(sv) = pushed {
            let slot = match sv {
                SValue::Reg { slot, .. } | SValue::RegIndirect { slot, .. } => slot,
                _ => unreachable!("push_return only ever builds Reg/RegIndirect entries"),
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
    use asmobj::{SectionStore, SymbolTable};
    use crate::ctype::IntWidth;

    fn int_ty() -> CType {
        CType::Int { width: IntWidth::Long, signed: true }
    }

    #[test]
    fn prolog_homes_two_integer_parameters_without_overlap() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let prologue = gen.sysv_prolog(&[int_ty(), int_ty()], false).unwrap();
        assert_eq!(prologue.params.len(), 2);
        let offsets: Vec<i32> = prologue
            .params
            .iter()
            .map(|p| match p.value {
                SValue::Local { offset, .. } => offset,
                _ => panic!("expected a Local home"),
            })
            .collect();
        assert_ne!(offsets[0], offsets[1]);
    }

    #[test]
    fn variadic_prolog_builds_a_register_save_area() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let prologue = gen.sysv_prolog(&[int_ty()], true).unwrap();
        let va = prologue.va_list.expect("variadic prolog must produce a VaListInfo");
        assert_eq!(va.gp_offset, 8);
        assert_eq!(va.fp_offset, REG_SAVE_SSE_BASE);
    }

    #[test]
    fn epilog_patches_a_nonzero_frame_size_for_a_function_with_locals() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let prologue = gen.sysv_prolog(&[], false).unwrap();
        gen.alloc_local(32, 8).unwrap();
        gen.sysv_epilog(&prologue, &CType::Void, None).unwrap();
        let patch_at = prologue.frame_size_patch as usize;
        let bytes = &gen.current_data()[patch_at..patch_at + 4];
        let frame_size = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(frame_size, 32);
    }
}
