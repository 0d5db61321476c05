//! Instruction builders for move/load/store/arithmetic/shift/compare/call/jmp, per
//! `x86_64-gen.c`'s `load`/`store`/`gen_opi`/`gjmp`/`gjmp_addr`/`gtst`.

use asmobj::{RelocKind, Relocation, SymbolId};

use crate::error::{EncodeError, Result};
use crate::modrm::{Encoder, Operand};
use crate::regs::{Gpr, Width, Xmm};

/// `gen_opf`'s scalar float/double binary operation selector (`addsd`/`subsd`/`mulsd`/`divsd`
/// and the single-precision `ss` forms share the same opcode byte, only the mandatory
/// prefix differs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl SseArithOp {
    fn opcode(self) -> u8 {
        match self {
            SseArithOp::Add => 0x58,
            SseArithOp::Sub => 0x5c,
            SseArithOp::Mul => 0x59,
            SseArithOp::Div => 0x5e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl ArithOp {
    /// The `/digit` opcode-extension field used both by the reg,reg form's ModR/M
    /// `reg` slot and the imm-group's `/digit`.
    fn digit(self) -> u8 {
        match self {
            ArithOp::Add => 0,
            ArithOp::Or => 1,
            ArithOp::Adc => 2,
            ArithOp::Sbb => 3,
            ArithOp::And => 4,
            ArithOp::Sub => 5,
            ArithOp::Xor => 6,
            ArithOp::Cmp => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Shl,
    Shr,
    Sar,
}

impl ShiftOp {
    fn digit(self) -> u8 {
        match self {
            ShiftOp::Shl => 4,
            ShiftOp::Shr => 5,
            ShiftOp::Sar => 7,
        }
    }
}

/// `Jcc`/`SETcc` condition codes, indexed the way the one-byte-opcode-plus-nibble
/// family (`0x70+cc`/`0x0f80+cc`/`0x0f90+cc`) expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Condition {
    Overflow = 0x0,
    NotOverflow = 0x1,
    Below = 0x2,
    AboveOrEqual = 0x3,
    Equal = 0x4,
    NotEqual = 0x5,
    BelowOrEqual = 0x6,
    Above = 0x7,
    Sign = 0x8,
    NotSign = 0x9,
    Parity = 0xa,
    NotParity = 0xb,
    Less = 0xc,
    GreaterOrEqual = 0xd,
    LessOrEqual = 0xe,
    Greater = 0xf,
}

impl Condition {
    pub fn invert(self) -> Condition {
        // Every condition's complement is one XOR away (`0x100` trick in `gtst`'s
        // caller, here just flipping the low bit of the nibble).
        match self {
            Condition::Overflow => Condition::NotOverflow,
            Condition::NotOverflow => Condition::Overflow,
            Condition::Below => Condition::AboveOrEqual,
            Condition::AboveOrEqual => Condition::Below,
            Condition::Equal => Condition::NotEqual,
            Condition::NotEqual => Condition::Equal,
            Condition::BelowOrEqual => Condition::Above,
            Condition::Above => Condition::BelowOrEqual,
            Condition::Sign => Condition::NotSign,
            Condition::NotSign => Condition::Sign,
            Condition::Parity => Condition::NotParity,
            Condition::NotParity => Condition::Parity,
            Condition::Less => Condition::GreaterOrEqual,
            Condition::GreaterOrEqual => Condition::Less,
            Condition::LessOrEqual => Condition::Greater,
            Condition::Greater => Condition::LessOrEqual,
        }
    }
}

fn width_opcode(byte_op: u8, wide_op: u8, width: Width) -> u8 {
    if width == Width::Byte {
        byte_op
    } else {
        wide_op
    }
}

impl<'a> Encoder<'a> {
    /// `mov %src, %dst` (register to register).
    pub fn mov_reg_reg(&mut self, dst: Gpr, src: Gpr, width: Width) {
        let op = width_opcode(0x88, 0x89, width);
        self.rex(width.is_64(), Some(src), Some(dst), op);
        self.gen_modrm(src.field(), Operand::Reg(dst));
    }

    /// `mov $imm, %dst`. 64-bit immediates always use the full 10-byte `b8+r` form
    /// (`movabs`); narrower widths use the 32-bit-immediate `c7 /0` form so the sign
    /// extension behaviour matches what an assembler emits for `movl $imm, %reg`.
    pub fn mov_reg_imm(&mut self, dst: Gpr, imm: i64, width: Width) -> Result<()> {
        if width.is_64() {
            self.rex(true, None, Some(dst), 0xb8 + dst.field());
            self.emit_le64(imm);
        } else {
            if imm < i32::MIN as i64 || imm > u32::MAX as i64 {
                return Err(EncodeError::ImmediateTooLarge(imm, width));
            }
            self.rex(false, None, Some(dst), 0xb8 + dst.field());
            self.emit_le32(imm as i32);
        }
        Ok(())
    }

    /// `lea operand, %dst` (always the 64-bit RIP-relative/local-address form the
    /// value-stack generator needs for `VT_LOCAL` and non-GOT `VT_CONST` loads).
    pub fn lea(&mut self, dst: Gpr, operand: Operand) {
        self.rex(true, Some(dst), None, 0x8d);
        self.gen_modrm(dst.field(), operand);
    }

    /// `mov operand, %dst`: load the value stored *at* `operand`, sized to `width`.
    /// `gen_modrm`'s own `Const` handling already picks GOT-indirect vs direct
    /// RIP-relative addressing, so a plain sized `mov` is correct here regardless of
    /// whether `operand` is a symbol (`x86_64-gen.c`'s `fr & VT_LVAL` branch of `load`).
    pub fn load(&mut self, dst: Gpr, operand: Operand, width: Width) {
        let op = width_opcode(0x8a, 0x8b, width);
        self.gen_modrm64(op, dst, operand, width.is_64());
    }

    /// Load the *address* of `operand` into `dst` (always 64-bit): a direct `lea` for
    /// a static symbol or local, or a GOT-indirect `mov` for a non-static symbol whose
    /// final address lives in a GOT slot. `x86_64-gen.c`'s `load()` takes this path
    /// when `VT_LVAL` is clear — the value being materialized is the pointer itself,
    /// not something it points to.
    pub fn load_address(&mut self, dst: Gpr, operand: Operand) {
        let opcode = match operand {
            Operand::Const { non_static: true, .. } => 0x8b,
            _ => 0x8d,
        };
        self.rex(true, Some(dst), None, opcode);
        self.gen_modrm(dst.field(), operand);
    }

    /// `movzx`/`movsx` widening loads (`x86_64-gen.c`'s `movzbl`/`movsbl`/`movzwl`/`movswl`
    /// family), always materializing into a full register.
    pub fn load_extend(&mut self, dst: Gpr, operand: Operand, from: Width, signed: bool) {
        let opcode: u16 = match (from, signed) {
            (Width::Byte, false) => 0x0fb6,
            (Width::Byte, true) => 0x0fbe,
            (Width::Word, false) => 0x0fb7,
            (Width::Word, true) => 0x0fbf,
            _ => unreachable!("load_extend only narrows byte/word operands"),
        };
        self.rex(true, Some(dst), None, (opcode >> 8) as u8);
        self.emit((opcode & 0xff) as u8);
        self.gen_modrm(dst.field(), operand);
    }

    /// `mov %src, operand`: the store path.
    pub fn store(&mut self, src: Gpr, operand: Operand, width: Width) {
        let op = width_opcode(0x88, 0x89, width);
        self.gen_modrm64(op, src, operand, width.is_64());
    }

    /// Register/register or register/memory form of add/sub/and/or/xor/cmp.
    pub fn arith_rr(&mut self, op: ArithOp, dst: Operand, src: Gpr, width: Width) {
        let base = op.digit() << 3;
        let opcode = base | width_opcode(0x00, 0x01, width);
        let rm = match dst {
            Operand::Reg(r) => Some(r),
            Operand::Mem { base, .. } => Some(base),
            _ => None,
        };
        self.rex(width.is_64(), Some(src), rm, opcode);
        self.gen_modrm(src.field(), dst);
    }

    /// Immediate form (`81 /digit id` / `83 /digit ib`), choosing the 8-bit-immediate
    /// encoding whenever the value fits, same as an assembler's peephole for small
    /// immediates.
    pub fn arith_ri(&mut self, op: ArithOp, dst: Operand, imm: i64, width: Width) -> Result<()> {
        let rm = match dst {
            Operand::Reg(r) => Some(r),
            Operand::Mem { base, .. } => Some(base),
            _ => None,
        };
        if let (Ok(imm8), false) = (i8::try_from(imm), width == Width::Byte) {
            self.rex(width.is_64(), None, rm, 0x83);
            self.gen_modrm(op.digit(), dst);
            self.emit(imm8 as u8);
        } else if width == Width::Byte {
            let imm8 = i8::try_from(imm).map_err(|_| EncodeError::ImmediateTooLarge(imm, width))?;
            self.rex(false, None, rm, 0x80);
            self.gen_modrm(op.digit(), dst);
            self.emit(imm8 as u8);
        } else {
            if imm < i32::MIN as i64 || imm > u32::MAX as i64 {
                return Err(EncodeError::ImmediateTooLarge(imm, width));
            }
            self.rex(width.is_64(), None, rm, 0x81);
            self.gen_modrm(op.digit(), dst);
            self.emit_le32(imm as i32);
        }
        Ok(())
    }

    /// Shift/rotate by an immediate count (`c1 /digit ib`), or by `%cl` (`d3 /digit`)
    /// when `count` is `None` — the caller is expected to have already materialized
    /// the count into `%cl`, mirroring `gen_opi`'s "integer shift forces the count
    /// into RCX" rule.
    pub fn shift_imm(&mut self, op: ShiftOp, dst: Gpr, count: u8, width: Width) {
        self.rex(width.is_64(), None, Some(dst), 0xc1);
        self.gen_modrm(op.digit(), Operand::Reg(dst));
        self.emit(count);
    }

    pub fn shift_cl(&mut self, op: ShiftOp, dst: Gpr, width: Width) {
        self.rex(width.is_64(), None, Some(dst), 0xd3);
        self.gen_modrm(op.digit(), Operand::Reg(dst));
    }

    /// `imul %src, %dst` (two-operand form, `0f af /r`). `gen_opi`'s `'*'` case.
    pub fn imul_rr(&mut self, dst: Gpr, src: Operand, width: Width) {
        let rm = match src {
            Operand::Reg(r) => Some(r),
            Operand::Mem { base, .. } => Some(base),
            _ => None,
        };
        self.rex(width.is_64(), Some(dst), rm, 0x0f);
        self.emit(0xaf);
        self.gen_modrm(dst.field(), src);
    }

    /// `cltd`/`cqto`: sign-extend `%eax`/`%rax` into `%edx`/`%rdx`, ahead of `idiv`.
    /// `gen_opi`'s mandatory setup for `'/'`/`'%'` on a signed operand.
    pub fn sign_extend_ax_to_dx(&mut self, width: Width) {
        if width.is_64() {
            self.rex(true, None, None, 0x99);
        } else {
            self.emit(0x99);
        }
    }

    /// `idiv %divisor` / `div %divisor` (`f7 /7` signed, `f7 /6` unsigned): divides
    /// `%rdx:%rax` by `divisor`, leaving the quotient in `%rax` and remainder in `%rdx`.
    pub fn div_rax(&mut self, divisor: Gpr, width: Width, signed: bool) {
        let digit = if signed { 7 } else { 6 };
        self.rex(width.is_64(), None, Some(divisor), 0xf7);
        self.gen_modrm(digit, Operand::Reg(divisor));
    }

    /// `neg %dst` (`f7 /3`).
    pub fn neg(&mut self, dst: Gpr, width: Width) {
        self.rex(width.is_64(), None, Some(dst), 0xf7);
        self.gen_modrm(3, Operand::Reg(dst));
    }

    /// `not %dst` (`f7 /2`).
    pub fn not(&mut self, dst: Gpr, width: Width) {
        self.rex(width.is_64(), None, Some(dst), 0xf7);
        self.gen_modrm(2, Operand::Reg(dst));
    }

    /// `jmp rel32`. Returns the file offset of the 4-byte displacement field so the
    /// caller can thread it onto a jump chain (`gjmp`'s return value) or patch it once
    /// the target is known.
    pub fn jmp_rel32(&mut self) -> u64 {
        self.emit(0xe9);
        let off = self.sections.current().position();
        self.emit_le32(0);
        off
    }

    /// `jmp rel8` (`eb ib`), the two-byte short form. Returns the file offset of the
    /// 1-byte displacement field. Callers must already know the byte fits in a signed
    /// byte once biased by this field's own width (§8's `a - ind - 2` boundary check);
    /// this primitive just emits whatever is given it.
    pub fn jmp_rel8(&mut self) -> u64 {
        self.emit(0xeb);
        let off = self.sections.current().position();
        self.sections.emit_u8(0);
        off
    }

    /// `call rel32` to `symbol`, recorded as a PLT-eligible relocation.
    pub fn call_rel32(&mut self, symbol: SymbolId) {
        self.emit(0xe8);
        self.record_reloc_here(symbol, RelocKind::Plt32, -4);
        self.emit_le32(0);
    }

    /// `jmp *%reg` (`ff /4`). `ggoto`'s indirect-jump lowering.
    pub fn jmp_indirect(&mut self, reg: Gpr) {
        self.rex(false, None, Some(reg), 0xff);
        self.gen_modrm(4, Operand::Reg(reg));
    }

    /// `call *%reg` (`ff /2`), for a call through a function pointer value.
    pub fn call_indirect(&mut self, reg: Gpr) {
        self.rex(false, None, Some(reg), 0xff);
        self.gen_modrm(2, Operand::Reg(reg));
    }

    fn record_reloc_here(&mut self, symbol: SymbolId, kind: RelocKind, addend: i64) {
        let section = self.sections.current_id();
        let offset = self.sections.current().position();
        self.relocs.push(Relocation {
            section,
            offset,
            symbol,
            kind,
            addend,
        });
    }

    /// `setcc %dst` (`0f 90+cc /0`, byte destination): writes 0/1 per the flags left
    /// by a prior compare. The caller still owes a `movzbl`/[`Encoder::load_extend`]
    /// to widen it to a full register, same as `gtst`'s materialize-to-boolean path.
    pub fn setcc(&mut self, cond: Condition, dst: Gpr) {
        self.rex(false, None, Some(dst), 0x0f);
        self.emit(0x90 | cond as u8);
        self.gen_modrm(0, Operand::Reg(dst));
    }

    /// `jcc rel32` (`0f 8x`). Returns the patch offset like `jmp_rel32`.
    pub fn jcc_rel32(&mut self, cond: Condition) -> u64 {
        self.emit(0x0f);
        self.emit(0x80 | cond as u8);
        let off = self.sections.current().position();
        self.emit_le32(0);
        off
    }

    pub fn push(&mut self, reg: Gpr) {
        self.rex(false, None, Some(reg), 0x50 + reg.field());
    }

    pub fn pop(&mut self, reg: Gpr) {
        self.rex(false, None, Some(reg), 0x58 + reg.field());
    }

    pub fn ret(&mut self) {
        self.emit(0xc3);
    }

    /// `ret imm16` (`c2 iw`): pop `n` extra bytes of arguments off the stack on
    /// return, `gfunc_epilog`'s non-zero `func_ret_sub` case.
    pub fn ret_imm16(&mut self, n: u16) {
        self.emit(0xc2);
        self.sections.emit_le16(n);
    }

    /// `mov $imm32, operand` (`c7 /0`): writes a 32-bit immediate straight to a
    /// memory location without staging it through a register first. Used by the
    /// variadic register-save-area prologue to set `gp_offset`/`fp_offset`/
    /// `overflow_arg_area` the same way `x86_64-gen.c`'s raw `o(0xf045c7)` does.
    pub fn mov_mem_imm32(&mut self, operand: Operand, imm: i32) {
        let rm = match operand {
            Operand::Mem { base, .. } => Some(base),
            _ => None,
        };
        self.rex(false, None, rm, 0xc7);
        self.gen_modrm(0, operand);
        self.emit_le32(imm);
    }

    pub fn leave(&mut self) {
        self.emit(0xc9);
    }

    /// `mov $imm8, %al` (`b0 ib`). The variadic System V call sequence sets `%al` to
    /// the count of vector registers used for the call's floating arguments ahead of
    /// every call to a function whose prototype is unknown to have `%al == 0`, per
    /// the psABI's "classification of the call" rule.
    pub fn mov_al_imm8(&mut self, imm: u8) {
        self.emit(0xb0);
        self.emit(imm);
    }

    pub fn syscall(&mut self) {
        self.emit(0x0f);
        self.emit(0x05);
    }

    pub fn nop(&mut self) {
        self.emit(0x90);
    }

    /// `movsd`/`movss operand, %xmm` — load a scalar float/double from memory or
    /// another XMM register. Mandatory prefix (`f2`/`f3`) selects the width.
    pub fn movsd_load(&mut self, dst: Xmm, operand: Operand, width: FloatWidth) {
        let prefix = if width == FloatWidth::Double { 0xf2 } else { 0xf3 };
        self.emit(prefix);
        self.rex_xmm(false, dst, operand, &[0x0f, 0x10]);
        self.gen_modrm(dst.field(), operand);
    }

    /// `movsd`/`movss %xmm, operand` — the store direction (opcode `0x11`).
    pub fn movsd_store(&mut self, src: Xmm, operand: Operand, width: FloatWidth) {
        let prefix = if width == FloatWidth::Double { 0xf2 } else { 0xf3 };
        self.emit(prefix);
        self.rex_xmm(false, src, operand, &[0x0f, 0x11]);
        self.gen_modrm(src.field(), operand);
    }

    /// `movq %xmm, %gpr` / `movq %gpr, %xmm` (`66 0f 7e` / `66 0f 6e`), the
    /// bit-reinterpreting move used to spill/reload an XMM value through a GPR slot.
    pub fn movq_xmm_to_gpr(&mut self, dst: Gpr, src: Xmm) {
        self.emit(0x66);
        self.rex_xmm_gpr(true, src, dst, &[0x0f, 0x7e]);
        self.gen_modrm(src.field(), Operand::Reg(dst));
    }

    pub fn movq_gpr_to_xmm(&mut self, dst: Xmm, src: Gpr) {
        self.emit(0x66);
        self.rex_xmm_gpr(true, dst, src, &[0x0f, 0x6e]);
        self.gen_modrm(dst.field(), Operand::Reg(src));
    }

    /// `addsd`/`subsd`/`mulsd`/`divsd %xmm(op), %xmm(dst)` and the single-precision forms.
    pub fn sse_arith(&mut self, op: SseArithOp, dst: Xmm, operand: Operand, width: FloatWidth) {
        let prefix = if width == FloatWidth::Double { 0xf2 } else { 0xf3 };
        self.emit(prefix);
        self.rex_xmm(false, dst, operand, &[0x0f, op.opcode()]);
        self.gen_modrm(dst.field(), operand);
    }

    /// `ucomisd`/`ucomiss %xmm(op), %xmm(dst)` — sets flags for unordered-aware compares;
    /// the caller follows up with a `jp`/`jcc` pair per `gtst`'s "unordered" handling.
    pub fn ucomisd(&mut self, dst: Xmm, operand: Operand, width: FloatWidth) {
        if width == FloatWidth::Double {
            self.emit(0x66);
        }
        self.rex_xmm(false, dst, operand, &[0x0f, 0x2e]);
        self.gen_modrm(dst.field(), operand);
    }

    /// `cvtsi2sd`/`cvtsi2ss %gpr, %xmm` (integer to float/double).
    pub fn cvtsi2sd(&mut self, dst: Xmm, src: Gpr, src_is_64: bool, width: FloatWidth) {
        let prefix = if width == FloatWidth::Double { 0xf2 } else { 0xf3 };
        self.emit(prefix);
        let rex_r = dst.needs_rex_extension();
        let rex_b = src.needs_rex_extension();
        if src_is_64 || rex_r || rex_b {
            self.sections.emit_u8(
                0x40 | ((src_is_64 as u8) << 3) | ((rex_r as u8) << 2) | (rex_b as u8),
            );
        }
        self.emit(0x0f);
        self.emit(0x2a);
        self.gen_modrm(dst.field(), Operand::Reg(src));
    }

    /// `cvttsd2si`/`cvttss2si %xmm, %gpr` (float/double to integer, truncating).
    pub fn cvttsd2si(&mut self, dst: Gpr, src: Xmm, dst_is_64: bool, width: FloatWidth) {
        let prefix = if width == FloatWidth::Double { 0xf2 } else { 0xf3 };
        self.emit(prefix);
        let rex_r = dst.needs_rex_extension();
        let rex_b = src.needs_rex_extension();
        if dst_is_64 || rex_r || rex_b {
            self.sections.emit_u8(
                0x40 | ((dst_is_64 as u8) << 3) | ((rex_r as u8) << 2) | (rex_b as u8),
            );
        }
        self.emit(0x0f);
        self.emit(0x2c);
        self.gen_modrm(dst.field(), Operand::XmmReg(src));
    }

    /// `cvtsd2ss`/`cvtss2sd %xmm(src), %xmm(dst)` — cross float-width conversion.
    pub fn cvt_float_width(&mut self, dst: Xmm, src: Xmm, from: FloatWidth) {
        let prefix = if from == FloatWidth::Double { 0xf2 } else { 0xf3 };
        self.emit(prefix);
        self.rex_xmm(false, dst, Operand::XmmReg(src), &[0x0f, 0x5a]);
        self.gen_modrm(dst.field(), Operand::XmmReg(src));
    }

    /// `fildl`/`fildll operand` — x87 integer load (32-bit vs 64-bit source).
    pub fn fild(&mut self, operand: Operand, src_is_64: bool) {
        self.emit(if src_is_64 { 0xdf } else { 0xdb });
        self.gen_modrm(if src_is_64 { 5 } else { 0 }, operand);
    }

    /// `fstpl`/`fstps`/`fldt`-style store of `%st(0)`, popping it.
    pub fn fstp(&mut self, operand: Operand, width: FloatWidth) {
        self.emit(if width == FloatWidth::Double { 0xdd } else { 0xd9 });
        self.gen_modrm(3, operand);
    }

    /// `fldl`/`flds` — push a float/double memory operand onto the x87 stack.
    pub fn fld(&mut self, operand: Operand, width: FloatWidth) {
        self.emit(if width == FloatWidth::Double { 0xdd } else { 0xd9 });
        self.gen_modrm(0, operand);
    }

    pub fn fxch(&mut self) {
        self.emit(0xd9);
        self.emit(0xc9);
    }

    /// `fucompp`/`fcompp` — compare `%st(0)`/`%st(1)`, popping both.
    pub fn fcompp(&mut self, unordered: bool) {
        self.emit(0xda);
        self.emit(if unordered { 0xe9 } else { 0x00 });
        if !unordered {
            self.emit(0xd9);
            self.emit(0xde);
        }
    }

    pub fn fnstsw_ax(&mut self) {
        self.emit(0xdf);
        self.emit(0xe0);
    }

    /// `faddp`/`fsubp`/`fmulp`/`fdivp %st, %st(1)` (long-double arithmetic, always
    /// operating on the x87 stack top two entries).
    pub fn farith_pop(&mut self, op: FpArithOp, reversed: bool) {
        let digit = match op {
            FpArithOp::Add => 0,
            FpArithOp::Sub => {
                if reversed {
                    5
                } else {
                    4
                }
            }
            FpArithOp::Mul => 1,
            FpArithOp::Div => {
                if reversed {
                    7
                } else {
                    6
                }
            }
        };
        self.emit(0xde);
        self.emit(0xc1 | (digit << 3));
    }
}

/// `gen_opf`'s long-double path: `fxxxp %st, %st(1)` arithmetic, distinct from
/// [`SseArithOp`] since the x87 reversed-subtract/divide forms need their own digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmobj::SectionStore;

    #[test]
    fn movq_immediate_is_ten_bytes() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.mov_reg_imm(Gpr::Rax, 0x1122_3344_5566_7788, Width::Qword).unwrap();
        assert_eq!(
            sections.current().data(),
            &[0x48, 0xb8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn add_rbx_rcx_is_three_bytes() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.arith_rr(ArithOp::Add, Operand::Reg(Gpr::Rcx), Gpr::Rbx, Width::Qword);
        assert_eq!(sections.current().data(), &[0x48, 0x01, 0xd9]);
    }

    #[test]
    fn jmp_rel32_emits_placeholder_and_returns_patch_offset() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        let patch_at = enc.jmp_rel32();
        assert_eq!(patch_at, 1);
        assert_eq!(sections.current().data(), &[0xe9, 0, 0, 0, 0]);
    }

    #[test]
    fn jmp_rel8_emits_two_byte_placeholder() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        let patch_at = enc.jmp_rel8();
        assert_eq!(patch_at, 1);
        assert_eq!(sections.current().data(), &[0xeb, 0]);
    }

    #[test]
    fn arith_ri_picks_8_bit_immediate_when_it_fits() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.arith_ri(ArithOp::Cmp, Operand::Reg(Gpr::Rax), 3, Width::Qword)
            .unwrap();
        assert_eq!(sections.current().data(), &[0x48, 0x83, 0xf8, 0x03]);
    }

    #[test]
    fn mov_reg_imm_rejects_oversized_32_bit_immediate() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        let err = enc
            .mov_reg_imm(Gpr::Rax, i64::from(u32::MAX) + 1, Width::Dword)
            .unwrap_err();
        assert!(matches!(err, EncodeError::ImmediateTooLarge(_, _)));
    }

    #[test]
    fn ret_is_single_byte() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.ret();
        assert_eq!(sections.current().data(), &[0xc3]);
    }

    #[test]
    fn addsd_xmm0_xmm1() {
        use crate::regs::Xmm;
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.sse_arith(SseArithOp::Add, Xmm::Xmm0, Operand::XmmReg(Xmm::Xmm1), crate::insn::FloatWidth::Double);
        assert_eq!(sections.current().data(), &[0xf2, 0x0f, 0x58, 0xc1]);
    }

    #[test]
    fn cvtsi2sd_rax_to_xmm0() {
        use crate::regs::Xmm;
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.cvtsi2sd(Xmm::Xmm0, Gpr::Rax, true, crate::insn::FloatWidth::Double);
        assert_eq!(sections.current().data(), &[0xf2, 0x48, 0x0f, 0x2a, 0xc0]);
    }
}
