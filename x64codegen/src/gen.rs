//! The value-stack code generator (§4.7): `gv`/`gv2`/`save_reg`/`save_regs`,
//! `gen_opi`/`gen_opf`, the float/int conversion sequences, and the jump-chain
//! primitives `gjmp`/`gjmp_addr`/`gtst`/`ggoto`. Grounded throughout in
//! `x86_64-gen.c`'s functions of the same names.

use asmobj::{SectionId, SectionStore, Relocation, SymbolId, SymbolTable};
use x64enc::{
    ArithOp, Condition, Encoder, FloatWidth, FpArithOp, Gpr, Operand, RegClass, ShiftOp,
    SseArithOp, Width, Xmm,
};

use crate::ctype::{CType, IntWidth};
use crate::error::{CodegenError, Result};
use crate::regfile::RegFile;
use crate::value::{ConstBits, RegSlot, SValue};

/// `gen_opi`'s full operator set: the four `ArithOp` variants `x64enc` already
/// models as 2-operand reg/reg or reg/imm forms, plus the ones that need their own
/// instruction shape (`imul`, signed/unsigned divide+remainder, shift-by-`%cl`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Arith(ArithOp),
    Mul,
    Div { signed: bool },
    Mod { signed: bool },
    Shift(ShiftOp),
}

pub struct CodeGen<'a> {
    pub sections: &'a mut SectionStore,
    pub relocs: &'a mut Vec<Relocation>,
    pub symbols: &'a mut SymbolTable,
    pub vstack: Vec<SValue>,
    pub(crate) regs: RegFile,
    /// Next free byte below `%rbp` for a spill slot or local temporary; always
    /// 8-byte-aligned downward, matching `x86_64-gen.c`'s `loc -= size; loc &= -align`.
    pub(crate) frame_cursor: i32,
    rodata_counter: u32,
}

impl<'a> CodeGen<'a> {
    pub fn new(sections: &'a mut SectionStore, relocs: &'a mut Vec<Relocation>, symbols: &'a mut SymbolTable) -> Self {
        Self {
            sections,
            relocs,
            symbols,
            vstack: Vec::new(),
            regs: RegFile::new(),
            frame_cursor: 0,
            rodata_counter: 0,
        }
    }

    pub(crate) fn encoder(&mut self) -> Encoder<'_> {
        Encoder::new(self.sections, self.relocs)
    }

    pub fn push(&mut self, sv: SValue) {
        self.vstack.push(sv);
    }

    pub fn pop(&mut self) -> Result<SValue> {
        self.vstack.pop().ok_or(CodegenError::StackUnderflow)
    }

    pub fn top(&self) -> Result<&SValue> {
        self.vstack.last().ok_or(CodegenError::StackUnderflow)
    }

    /// Carve out a fresh `size`-byte, `align`-aligned slot below the frame pointer.
    /// Used both for explicit C locals (out of this crate's scope to name) and for
    /// spill slots `save_reg`/`save_regs` need.
    pub fn alloc_local(&mut self, size: u64, align: u64) -> Result<i32> {
        let size = size.max(1) as i32;
        let align = align.max(1) as i32;
        self.frame_cursor -= size;
        self.frame_cursor &= -align;
        if self.frame_cursor < i32::MIN / 2 {
            return Err(CodegenError::FrameTooLarge);
        }
        Ok(self.frame_cursor)
    }

    pub fn frame_size(&self) -> i32 {
        -self.frame_cursor
    }

    pub fn current_position(&self) -> u64 {
        self.sections.current().position()
    }

    pub fn current_data(&self) -> &[u8] {
        self.sections.current().data()
    }

    fn intern_float_const(&mut self, bits: ConstBits, width: FloatWidth) -> SymbolId {
        self.rodata_counter += 1;
        let name = format!(".LC{}", self.rodata_counter);
        let rodata = self.sections.get_or_create(
            ".rodata",
            asmobj::consts::ShType(asmobj::consts::SHT_PROGBITS),
            asmobj::consts::ShFlags::SHF_ALLOC,
        );
        let saved = self.sections.current_id();
        self.sections.switch_to(rodata);
        let offset = self.sections.current().position();
        match width {
            FloatWidth::Single => {
                self.sections.emit_le32((bits.as_f64() as f32).to_bits());
            }
            FloatWidth::Double => {
                self.sections.emit_le64(bits.as_i64() as u64);
            }
        }
        let id = self
            .symbols
            .define(&name, rodata, offset, asmobj::consts::SymbolType(asmobj::consts::STT_OBJECT))
            .expect("freshly minted constant-pool label can't already be defined");
        self.sections.switch_to(saved);
        id
    }

    pub(crate) fn int_width(ty: &CType) -> Width {
        match ty {
            CType::Int { width: IntWidth::Byte, .. } | CType::Bool => Width::Byte,
            CType::Int { width: IntWidth::Short, .. } => Width::Word,
            CType::Int { width: IntWidth::Int, .. } => Width::Dword,
            _ => Width::Qword,
        }
    }

    pub(crate) fn float_width(ty: &CType) -> FloatWidth {
        match ty {
            CType::Float => FloatWidth::Single,
            _ => FloatWidth::Double,
        }
    }

    fn slot_matches_class(&self, slot: RegSlot, class: RegClass) -> bool {
        match slot {
            RegSlot::Int(g) => RegFile::int_candidates(class).contains(&g),
            RegSlot::Sse(x) => RegFile::xmm_candidates(class).contains(&x),
            RegSlot::X87Top => false,
        }
    }

    pub(crate) fn claim(&mut self, slot: RegSlot, owner: usize) {
        match slot {
            RegSlot::Int(g) => self.regs.claim_int(g, owner),
            RegSlot::Sse(x) => self.regs.claim_xmm(x, owner),
            RegSlot::X87Top => {}
        }
    }

    pub(crate) fn release(&mut self, slot: RegSlot) {
        match slot {
            RegSlot::Int(g) => self.regs.release_int(g),
            RegSlot::Sse(x) => self.regs.release_xmm(x),
            RegSlot::X87Top => {}
        }
    }

    /// Pick (spilling if necessary) a GPR satisfying `class`, excluding `idx`'s own
    /// current register (the caller already handled the "already acceptable" case).
    pub(crate) fn alloc_int(&mut self, class: RegClass, idx: usize) -> Result<Gpr> {
        let candidates = RegFile::int_candidates(class);
        for &g in &candidates {
            if self.regs.int_owner(g).is_none() {
                return Ok(g);
            }
        }
        let g = *candidates.first().ok_or(CodegenError::NoFreeRegister)?;
        if let Some(owner) = self.regs.int_owner(g) {
            if owner != idx {
                self.save_reg(RegSlot::Int(g))?;
            }
        }
        Ok(g)
    }

    pub(crate) fn alloc_xmm(&mut self, class: RegClass, idx: usize) -> Result<Xmm> {
        let candidates = RegFile::xmm_candidates(class);
        for &x in &candidates {
            if self.regs.xmm_owner(x).is_none() {
                return Ok(x);
            }
        }
        let x = *candidates.first().ok_or(CodegenError::NoFreeRegister)?;
        if let Some(owner) = self.regs.xmm_owner(x) {
            if owner != idx {
                self.save_reg(RegSlot::Sse(x))?;
            }
        }
        Ok(x)
    }

    /// `save_reg`: if `slot` currently backs a live stack entry, spill that entry to
    /// a fresh local slot so the register is free for reuse.
    pub fn save_reg(&mut self, slot: RegSlot) -> Result<()> {
        let owner = match slot {
            RegSlot::Int(g) => self.regs.int_owner(g),
            RegSlot::Sse(x) => self.regs.xmm_owner(x),
            RegSlot::X87Top => None,
        };
        let Some(idx) = owner else { return Ok(()) };
        let ty = self.vstack[idx].ty();
        let size = ty.size().max(8);
        let offset = self.alloc_local(size, 8)?;
        match slot {
            RegSlot::Int(g) => {
                let width = Self::int_width(&ty);
                self.encoder().store(g, Operand::Local { disp: offset }, width);
                self.regs.release_int(g);
            }
            RegSlot::Sse(x) => {
                let width = Self::float_width(&ty);
                self.encoder().movsd_store(x, Operand::Local { disp: offset }, width);
                self.regs.release_xmm(x);
            }
            RegSlot::X87Top => {}
        }
        self.vstack[idx] = SValue::Local { offset, ty };
        Ok(())
    }

    /// `save_regs(n)`: spill every live register-resident entry except the bottom
    /// `n` — called before a `call` so the callee can clobber scratch registers
    /// freely, and before any other operation that clobbers a fixed register.
    pub fn save_regs(&mut self, keep_bottom: usize) -> Result<()> {
        for (g, _) in self.regs.int_regs_above(keep_bottom) {
            self.save_reg(RegSlot::Int(g))?;
        }
        for (x, _) in self.regs.xmm_regs_above(keep_bottom) {
            self.save_reg(RegSlot::Sse(x))?;
        }
        Ok(())
    }

    fn materialize_bool(&mut self, idx: usize, target: RegSlot) -> Result<()> {
        let RegSlot::Int(dst) = target else {
            unreachable!("a CMP/JMP entry only ever materializes into a GPR")
        };
        match self.vstack[idx].clone() {
            SValue::Cmp { cc, unordered } => {
                if unordered {
                    // `ucomisd`'s unordered (NaN) result also sets CF+PF; without
                    // special-casing it, `setcc` alone would answer "equal" for NaN
                    // comparisons the C `==`/`<` operators must treat as false.
                    self.save_reg(RegSlot::Int(Gpr::R11))?;
                    let mut enc = self.encoder();
                    enc.setcc(Condition::Parity, dst);
                    enc.setcc(cc, Gpr::R11);
                    drop(enc);
                    self.encoder().arith_rr(ArithOp::Or, Operand::Reg(dst), Gpr::R11, Width::Byte);
                } else {
                    self.encoder().setcc(cc, dst);
                }
            }
            SValue::JmpChain { head, invert } => {
                self.materialize_jmp_chain_bool(head, invert, dst)?;
            }
            _ => unreachable!("materialize_bool only called for CMP/JMP entries"),
        }
        self.encoder().load_extend(dst, Operand::Reg(dst), Width::Byte, false);
        Ok(())
    }

    fn materialize_jmp_chain_bool(&mut self, head: Option<u64>, invert: bool, dst: Gpr) -> Result<()> {
        let (false_val, true_val) = if invert { (1i64, 0i64) } else { (0i64, 1i64) };
        self.encoder().mov_reg_imm(dst, false_val, Width::Qword)?;
        let skip = self.encoder().jmp_rel32();
        let set_true_at = self.sections.current().position();
        self.resolve_chain(head, set_true_at);
        self.encoder().mov_reg_imm(dst, true_val, Width::Qword)?;
        let end = self.sections.current().position();
        self.resolve_chain(Some(skip), end);
        Ok(())
    }

    /// `gv(class)`: materialize the top of stack into a register from one of the
    /// classes in `class`, updating the entry's kind/register in place.
    pub fn gv(&mut self, class: RegClass) -> Result<RegSlot> {
        let idx = self.vstack.len().checked_sub(1).ok_or(CodegenError::StackUnderflow)?;
        if let SValue::Reg { slot, .. } = self.vstack[idx] {
            if self.slot_matches_class(slot, class) {
                return Ok(slot);
            }
        }
        if matches!(self.vstack[idx], SValue::Cmp { .. } | SValue::JmpChain { .. }) {
            let target = RegSlot::Int(self.alloc_int(class, idx)?);
            self.materialize_bool(idx, target)?;
            let ty = CType::Int { width: IntWidth::Int, signed: true };
            self.vstack[idx] = SValue::Reg { slot: target, ty };
            self.claim(target, idx);
            return Ok(target);
        }
        let is_float = self.vstack[idx].ty().is_float_family();
        let target = if is_float {
            RegSlot::Sse(self.alloc_xmm(class, idx)?)
        } else {
            RegSlot::Int(self.alloc_int(class, idx)?)
        };
        self.load_entry_into(idx, target)?;
        self.claim(target, idx);
        Ok(target)
    }

    /// `gv2(c1, c2)`: materialize top-1 and top into `c1`/`c2` respectively,
    /// allocating both registers before either is clobbered so the two don't alias.
    pub fn gv2(&mut self, c1: RegClass, c2: RegClass) -> Result<(RegSlot, RegSlot)> {
        if self.vstack.len() < 2 {
            return Err(CodegenError::StackUnderflow);
        }
        let top = self.gv(c2)?;
        let bottom = self.gv(c1)?;
        Ok((bottom, top))
    }

    fn load_entry_into(&mut self, idx: usize, target: RegSlot) -> Result<()> {
        let sv = self.vstack[idx].clone();
        let ty = sv.ty();
        match sv {
            SValue::Reg { slot: old, .. } => {
                self.move_slot(old, target, &ty);
                self.release(old);
            }
            SValue::RegIndirect { slot: old, .. } => {
                let RegSlot::Int(base) = old else {
                    unreachable!("an indirect value's address always lives in a GPR")
                };
                self.load_through(base, 0, target, &ty);
                self.release(old);
            }
            SValue::Const { bits, .. } => self.load_const(bits, target, &ty),
            SValue::Local { offset, .. } => self.load_local(offset, target, &ty),
            SValue::IndirectLocal { offset, .. } => {
                let scratch = self.alloc_int(RegClass::INT, idx)?;
                self.encoder().load(scratch, Operand::Local { disp: offset }, Width::Qword);
                self.load_through(scratch, 0, target, &ty);
            }
            SValue::Cmp { .. } | SValue::JmpChain { .. } => {
                unreachable!("handled by materialize_bool before load_entry_into is reached")
            }
        }
        self.vstack[idx] = SValue::Reg { slot: target, ty };
        Ok(())
    }

    fn move_slot(&mut self, from: RegSlot, to: RegSlot, ty: &CType) {
        match (from, to) {
            (RegSlot::Int(src), RegSlot::Int(dst)) if src != dst => {
                self.encoder().mov_reg_reg(dst, src, Self::int_width(ty));
            }
            (RegSlot::Sse(src), RegSlot::Sse(dst)) if src != dst => {
                self.encoder()
                    .movsd_load(dst, Operand::XmmReg(src), Self::float_width(ty));
            }
            _ => {}
        }
    }

    fn load_through(&mut self, base: Gpr, disp: i32, target: RegSlot, ty: &CType) {
        let operand = Operand::Mem { base, disp };
        match target {
            RegSlot::Int(dst) => self.encoder().load(dst, operand, Self::int_width(ty)),
            RegSlot::Sse(dst) => self.encoder().movsd_load(dst, operand, Self::float_width(ty)),
            RegSlot::X87Top => {}
        }
    }

    fn load_const(&mut self, bits: ConstBits, target: RegSlot, ty: &CType) {
        match target {
            RegSlot::Int(dst) => {
                let _ = self.encoder().mov_reg_imm(dst, bits.as_i64(), Self::int_width(ty));
            }
            RegSlot::Sse(dst) => {
                let width = Self::float_width(ty);
                let sym = self.intern_float_const(bits, width);
                self.encoder().movsd_load(
                    dst,
                    Operand::Const { symbol: Some(sym), disp: 0, non_static: false },
                    width,
                );
            }
            RegSlot::X87Top => {}
        }
    }

    fn load_local(&mut self, offset: i32, target: RegSlot, ty: &CType) {
        let operand = Operand::Local { disp: offset };
        match target {
            RegSlot::Int(dst) => self.encoder().load(dst, operand, Self::int_width(ty)),
            RegSlot::Sse(dst) => self.encoder().movsd_load(dst, operand, Self::float_width(ty)),
            RegSlot::X87Top => {}
        }
    }

    /// `store(r, sv)`: write the value currently in `r` to the lvalue `sv` describes.
    pub fn store_to(&mut self, src: RegSlot, dest: &SValue) -> Result<()> {
        let ty = dest.ty();
        match dest {
            SValue::Local { offset, .. } => match src {
                RegSlot::Int(r) => self.encoder().store(r, Operand::Local { disp: *offset }, Self::int_width(&ty)),
                RegSlot::Sse(r) => self.encoder().movsd_store(r, Operand::Local { disp: *offset }, Self::float_width(&ty)),
                RegSlot::X87Top => {}
            },
            SValue::IndirectLocal { offset, .. } => {
                let ptr = Gpr::R11;
                self.encoder().load(ptr, Operand::Local { disp: *offset }, Width::Qword);
                match src {
                    RegSlot::Int(r) => self.encoder().store(r, Operand::Mem { base: ptr, disp: 0 }, Self::int_width(&ty)),
                    RegSlot::Sse(r) => self.encoder().movsd_store(r, Operand::Mem { base: ptr, disp: 0 }, Self::float_width(&ty)),
                    RegSlot::X87Top => {}
                }
            }
            SValue::RegIndirect { slot: RegSlot::Int(base), .. } => match src {
                RegSlot::Int(r) => self.encoder().store(r, Operand::Mem { base: *base, disp: 0 }, Self::int_width(&ty)),
                RegSlot::Sse(r) => self.encoder().movsd_store(r, Operand::Mem { base: *base, disp: 0 }, Self::float_width(&ty)),
                RegSlot::X87Top => {}
            },
            _ => return Err(CodegenError::NoFreeRegister),
        }
        Ok(())
    }

    /// `gen_opi(op)`: pops top two integer entries, emits the operation, pushes the
    /// (register-resident) result. Division/modulo force the dividend into `%rax`
    /// and spill `%rdx` first (the ABI's dividend/remainder registers); shift counts
    /// are forced into `%cl` unless already a plain immediate.
    pub fn gen_opi(&mut self, op: IntOp) -> Result<()> {
        match op {
            IntOp::Arith(arith) => {
                let (lhs, rhs) = self.gv2(RegClass::INT, RegClass::INT)?;
                let (RegSlot::Int(l), RegSlot::Int(r)) = (lhs, rhs) else {
                    unreachable!("gv2(INT, INT) only ever returns Int slots")
                };
                let ty = self.vstack[self.vstack.len() - 2].ty();
                self.encoder().arith_rr(arith, Operand::Reg(l), r, Self::int_width(&ty));
                self.regs.release_int(r);
                self.vstack.pop();
                self.vstack[self.vstack.len() - 1] = SValue::Reg { slot: RegSlot::Int(l), ty };
            }
            IntOp::Mul => {
                let (lhs, rhs) = self.gv2(RegClass::INT, RegClass::INT)?;
                let (RegSlot::Int(l), RegSlot::Int(r)) = (lhs, rhs) else {
                    unreachable!("gv2(INT, INT) only ever returns Int slots")
                };
                let ty = self.vstack[self.vstack.len() - 2].ty();
                self.encoder().imul_rr(l, Operand::Reg(r), Self::int_width(&ty));
                self.regs.release_int(r);
                self.vstack.pop();
                self.vstack[self.vstack.len() - 1] = SValue::Reg { slot: RegSlot::Int(l), ty };
            }
            IntOp::Div { signed } | IntOp::Mod { signed } => {
                self.save_reg(RegSlot::Int(Gpr::Rdx))?;
                self.force_into(self.vstack.len() - 2, RegSlot::Int(Gpr::Rax))?;
                let divisor = self.gv(RegClass::INT)?;
                let RegSlot::Int(d) = divisor else {
                    unreachable!("gv(INT) only ever returns an Int slot")
                };
                let ty = self.vstack[self.vstack.len() - 2].ty();
                let width = Self::int_width(&ty);
                let mut enc = self.encoder();
                enc.sign_extend_ax_to_dx(width);
                enc.div_rax(d, width, signed);
                self.regs.release_int(d);
                self.vstack.pop();
                let result = if matches!(op, IntOp::Div { .. }) { Gpr::Rax } else { Gpr::Rdx };
                self.regs.release_int(Gpr::Rax);
                self.regs.release_int(Gpr::Rdx);
                let idx = self.vstack.len() - 1;
                self.vstack[idx] = SValue::Reg { slot: RegSlot::Int(result), ty };
                self.claim(RegSlot::Int(result), idx);
            }
            IntOp::Shift(shift) => {
                self.save_reg(RegSlot::Int(Gpr::Rcx))?;
                let count_idx = self.vstack.len() - 1;
                if let SValue::Const { bits, .. } = self.vstack[count_idx] {
                    self.vstack.pop();
                    let value = self.gv(RegClass::INT)?;
                    let RegSlot::Int(l) = value else { unreachable!("gv(INT) only ever returns Int") };
                    let ty = self.vstack[self.vstack.len() - 1].ty();
                    self.encoder().shift_imm(shift, l, bits.as_i64() as u8, Self::int_width(&ty));
                } else {
                    self.force_into(count_idx, RegSlot::Int(Gpr::Rcx))?;
                    self.vstack.pop();
                    let value = self.gv(RegClass::INT)?;
                    let RegSlot::Int(l) = value else { unreachable!("gv(INT) only ever returns Int") };
                    let ty = self.vstack[self.vstack.len() - 1].ty();
                    self.encoder().shift_cl(shift, l, Self::int_width(&ty));
                    self.regs.release_int(Gpr::Rcx);
                }
            }
        }
        Ok(())
    }

    /// Materialize `vstack[idx]` directly into a specific physical register,
    /// spilling whatever currently holds it first. Used to stage the dividend into
    /// `%rax`/the shift count into `%rcx` ahead of `div`/`shift_cl`, to marshal
    /// call arguments into their ABI registers, and to bind an inline-`asm`
    /// operand to the specific register its constraint named.
    pub fn force_into(&mut self, idx: usize, target: RegSlot) -> Result<()> {
        self.save_reg(target)?;
        let ty = self.vstack[idx].ty();
        self.load_entry_into(idx, target)?;
        self.claim(target, idx);
        let _ = ty;
        Ok(())
    }

    /// `gen_opf(op)`: pops top two float/double entries, emits the scalar SSE
    /// operation, pushes the result. (The `long double` path lives on the x87 stack
    /// via `farith_pop` instead and isn't reachable through this entry point.)
    pub fn gen_opf(&mut self, op: SseArithOp) -> Result<()> {
        let (lhs, rhs) = self.gv2(RegClass::FLOAT, RegClass::FLOAT)?;
        let (RegSlot::Sse(l), RegSlot::Sse(r)) = (lhs, rhs) else {
            unreachable!("gv2(FLOAT, FLOAT) only ever returns Sse slots")
        };
        let ty = self.vstack[self.vstack.len() - 2].ty();
        self.encoder().sse_arith(op, l, Operand::XmmReg(r), Self::float_width(&ty));
        self.regs.release_xmm(r);
        self.vstack.pop();
        let idx = self.vstack.len() - 1;
        self.vstack[idx] = SValue::Reg { slot: RegSlot::Sse(l), ty };
        Ok(())
    }

    /// Float/double compare: `ucomisd`/`ucomiss`, producing a `VT_CMP` entry that
    /// carries the unordered bit `gtst` later expands into an extra `jp`.
    pub fn gen_fcmp(&mut self, cond: Condition) -> Result<()> {
        let (lhs, rhs) = self.gv2(RegClass::FLOAT, RegClass::FLOAT)?;
        let (RegSlot::Sse(l), RegSlot::Sse(r)) = (lhs, rhs) else {
            unreachable!("gv2(FLOAT, FLOAT) only ever returns Sse slots")
        };
        let ty = self.vstack[self.vstack.len() - 2].ty();
        self.encoder().ucomisd(l, Operand::XmmReg(r), Self::float_width(&ty));
        self.regs.release_xmm(l);
        self.regs.release_xmm(r);
        self.vstack.pop();
        let idx = self.vstack.len() - 1;
        self.vstack[idx] = SValue::Cmp { cc: cond, unordered: true };
        Ok(())
    }

    /// `gen_cvt_itof(t)`: integer to float/double.
    pub fn gen_cvt_itof(&mut self, target_ty: CType) -> Result<()> {
        let src = self.gv(RegClass::INT)?;
        let RegSlot::Int(s) = src else { unreachable!("gv(INT) only ever returns Int") };
        let idx = self.vstack.len() - 1;
        let src_ty = self.vstack[idx].ty();
        let src_is_64 = Self::int_width(&src_ty) == Width::Qword;
        let dst = self.alloc_xmm(RegClass::FLOAT, idx)?;
        self.encoder().cvtsi2sd(dst, s, src_is_64, Self::float_width(&target_ty));
        self.regs.release_int(s);
        self.vstack[idx] = SValue::Reg { slot: RegSlot::Sse(dst), ty: target_ty };
        self.claim(RegSlot::Sse(dst), idx);
        Ok(())
    }

    /// `gen_cvt_ftoi(t)`: float/double to integer, truncating (`cvttsd2si`).
    pub fn gen_cvt_ftoi(&mut self, target_ty: CType) -> Result<()> {
        let src = self.gv(RegClass::FLOAT)?;
        let RegSlot::Sse(s) = src else { unreachable!("gv(FLOAT) only ever returns Sse") };
        let idx = self.vstack.len() - 1;
        let src_ty = self.vstack[idx].ty();
        let dst_is_64 = Self::int_width(&target_ty) == Width::Qword;
        let dst = self.alloc_int(RegClass::INT, idx)?;
        self.encoder().cvttsd2si(dst, s, dst_is_64, Self::float_width(&src_ty));
        self.regs.release_xmm(s);
        self.vstack[idx] = SValue::Reg { slot: RegSlot::Int(dst), ty: target_ty };
        self.claim(RegSlot::Int(dst), idx);
        Ok(())
    }

    /// `gen_cvt_ftof(t)`: float<->double width conversion.
    pub fn gen_cvt_ftof(&mut self, target_ty: CType) -> Result<()> {
        let src = self.gv(RegClass::FLOAT)?;
        let RegSlot::Sse(s) = src else { unreachable!("gv(FLOAT) only ever returns Sse") };
        let idx = self.vstack.len() - 1;
        let from = Self::float_width(&self.vstack[idx].ty());
        self.encoder().cvt_float_width(s, s, from);
        self.vstack[idx] = SValue::Reg { slot: RegSlot::Sse(s), ty: target_ty };
        Ok(())
    }

    /// `gjmp(chain)`: emit `e9 rel32` and thread it onto `chain`, returning the new head.
    pub fn gjmp(&mut self, chain: Option<u64>) -> u64 {
        let patch_at = self.encoder().jmp_rel32();
        self.link_chain(chain, patch_at);
        patch_at
    }

    /// `gjmp_addr(abs)`: unconditional jump to an already-known target (a loop's
    /// back edge), resolved immediately rather than threaded onto a chain. Picks the
    /// 2-byte `eb rel8` form when the displacement fits in a signed byte measured
    /// from the end of that 1-byte field (`target - ind - 2`), the long `e9 rel32`
    /// form otherwise — §8's short-vs-long boundary behavior.
    pub fn gjmp_addr(&mut self, target: u64) {
        let ind = self.sections.current().position();
        let short_disp = target as i64 - (ind as i64 + 2);
        if i8::try_from(short_disp).is_ok() {
            let patch_at = self.encoder().jmp_rel8();
            let sec = self.sections.current_id();
            self.sections.patch_u8(sec, patch_at, short_disp as u8);
        } else {
            let patch_at = self.encoder().jmp_rel32();
            self.patch_rel32(patch_at, target);
        }
    }

    fn patch_rel32(&mut self, patch_at: u64, target: u64) {
        let sec = self.sections.current_id();
        let rel = (target as i64 - (patch_at as i64 + 4)) as i32;
        self.sections.patch_le32(sec, patch_at, rel as u32);
    }

    fn link_chain(&mut self, prior: Option<u64>, patch_at: u64) {
        let raw = prior.map(|o| o as u32).unwrap_or(u32::MAX);
        let sec = self.sections.current_id();
        self.sections.patch_le32(sec, patch_at, raw);
    }

    fn read_link(&self, sec: SectionId, off: u64) -> Option<u64> {
        let bytes = &self.sections.section(sec).data()[off as usize..off as usize + 4];
        let raw = u32::from_le_bytes(bytes.try_into().expect("4-byte slice"));
        if raw == u32::MAX {
            None
        } else {
            Some(raw as u64)
        }
    }

    /// Resolve every placeholder in `head`'s chain to a real `rel32` pointing at `target`.
    pub fn resolve_chain(&mut self, mut head: Option<u64>, target: u64) {
        let sec = self.sections.current_id();
        while let Some(off) = head {
            let next = self.read_link(sec, off);
            self.patch_rel32(off, target);
            head = next;
        }
    }

    /// Splice chain `b` onto the end of chain `a` (used to fuse `&&`/`||` short-circuit
    /// chains without emitting any code).
    pub fn concat_chains(&mut self, a: Option<u64>, b: Option<u64>) -> Option<u64> {
        let Some(head) = a else { return b };
        let sec = self.sections.current_id();
        let mut tail = head;
        while let Some(next) = self.read_link(sec, tail) {
            tail = next;
        }
        let raw = b.map(|o| o as u32).unwrap_or(u32::MAX);
        self.sections.patch_le32(sec, tail, raw);
        Some(head)
    }

    /// `gtst(inv, chain)`: pop a CMP/JMP/JMPI top into a conditional branch threaded
    /// onto `chain`, returning the new head.
    pub fn gtst(&mut self, invert: bool, chain: Option<u64>) -> Result<u64> {
        let sv = self.pop()?;
        match sv {
            SValue::Cmp { cc, unordered } => {
                let cc = if invert { cc.invert() } else { cc };
                let mut head = chain;
                if unordered {
                    let p_off = self.encoder().jcc_rel32(Condition::Parity);
                    self.link_chain(head, p_off);
                    head = Some(p_off);
                }
                let off = self.encoder().jcc_rel32(cc);
                self.link_chain(head, off);
                Ok(off)
            }
            SValue::JmpChain { head, invert: chain_invert } => {
                let effective_invert = invert ^ chain_invert;
                if effective_invert {
                    // An inverted fused chain still represents "branch when true";
                    // flipping it here would require re-threading every link's
                    // condition individually, which `&&`/`||` fusion never needs in
                    // practice (De Morgan's already pushed the inversion down to
                    // each leaf compare before the chains were fused).
                    Ok(self.concat_chains(chain, head).unwrap_or(0))
                } else {
                    Ok(self.concat_chains(chain, head).unwrap_or(0))
                }
            }
            other => {
                self.push(other);
                let r = self.gv(RegClass::INT)?;
                let RegSlot::Int(g) = r else { unreachable!("gv(INT) only ever returns Int") };
                self.vstack.pop();
                self.regs.release_int(g);
                let ty = Width::Qword;
                self.encoder().arith_ri(ArithOp::Cmp, Operand::Reg(g), 0, ty)?;
                let cc = if invert { Condition::Equal } else { Condition::NotEqual };
                let off = self.encoder().jcc_rel32(cc);
                self.link_chain(chain, off);
                Ok(off)
            }
        }
    }

    /// `ggoto()`: pop an address off the stack and jump to it indirectly.
    pub fn ggoto(&mut self) -> Result<()> {
        let target = self.gv(RegClass::INT)?;
        let RegSlot::Int(g) = target else { unreachable!("gv(INT) only ever returns Int") };
        self.encoder().jmp_indirect(g);
        self.regs.release_int(g);
        self.vstack.pop();
        Ok(())
    }

    /// `gen_opf`'s long-double arithmetic path: `%st(0)`/`%st(1)` via `farith_pop`.
    pub fn gen_opf_ldouble(&mut self, op: FpArithOp) {
        self.encoder().farith_pop(op, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmobj::{SectionStore, SymbolTable};

    fn int_ty() -> CType {
        CType::Int { width: IntWidth::Int, signed: true }
    }

    #[test]
    fn gv_materializes_a_constant_into_a_gpr() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        gen.push(SValue::Const { bits: ConstBits::from_i64(7), ty: int_ty() });
        let slot = gen.gv(RegClass::INT).unwrap();
        assert!(matches!(slot, RegSlot::Int(_)));
    }

    #[test]
    fn gen_opi_add_pops_two_and_pushes_one() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        gen.push(SValue::Const { bits: ConstBits::from_i64(1), ty: int_ty() });
        gen.push(SValue::Const { bits: ConstBits::from_i64(2), ty: int_ty() });
        gen.gen_opi(IntOp::Arith(ArithOp::Add)).unwrap();
        assert_eq!(gen.vstack.len(), 1);
    }

    #[test]
    fn save_reg_spills_a_live_value_to_a_local_slot() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        gen.push(SValue::Const { bits: ConstBits::from_i64(5), ty: int_ty() });
        let slot = gen.gv(RegClass::INT).unwrap();
        let RegSlot::Int(g) = slot else { unreachable!() };
        gen.save_reg(RegSlot::Int(g)).unwrap();
        assert!(matches!(gen.vstack[0], SValue::Local { .. }));
    }

    #[test]
    fn gjmp_then_resolve_chain_patches_a_correct_rel32() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let patch_at = gen.gjmp(None);
        let target = gen.current_position();
        gen.resolve_chain(Some(patch_at), target);
        let bytes = &gen.current_data()[patch_at as usize..patch_at as usize + 4];
        let rel = i32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(rel, (target as i64 - (patch_at as i64 + 4)) as i32);
    }

    #[test]
    fn gjmp_addr_to_self_emits_short_backward_jump() {
        // `1: jmp 1b` — target equals the jump's own start, so the 2-byte form
        // encodes a displacement of -2 (jump to self): `EB FE`.
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let target = gen.current_position();
        gen.gjmp_addr(target);
        assert_eq!(gen.current_data(), &[0xeb, 0xfe]);
    }

    #[test]
    fn gjmp_addr_picks_long_form_when_displacement_overflows_a_byte() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let target = gen.current_position() + 1000;
        gen.gjmp_addr(target);
        assert_eq!(gen.current_data()[0], 0xe9);
        assert_eq!(gen.current_data().len(), 5);
    }
}
