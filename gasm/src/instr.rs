//! Mnemonic table and AT&T operand parsing, dispatching into `x64enc::Encoder`.
//!
//! Addressing modes are limited to what `x64enc::Operand` models (register-direct,
//! `disp(%base)`, RIP-relative symbol, no SIB index/scale) — the same restriction the
//! encoder crate documents. `jmp` to an already-defined same-section target picks the
//! short `rel8` form when it fits (§8); `jcc`/`call` always take the 32-bit-displacement
//! form, matching `x64enc`'s `jcc_rel32`/`call_rel32`, which only know how to emit that.

use asmobj::{RelocKind, Relocation};
use x64enc::{ArithOp, Condition, Encoder, Gpr, Operand, ShiftOp, Width};

use crate::assembler::Assembler;
use crate::error::{AsmError, Result};
use crate::lexer::Tok;

/// A parsed AT&T-syntax operand, not yet lowered to an `x64enc::Operand` (lowering
/// needs to know the instruction's operand width, which isn't known until both
/// operands are parsed).
enum RawOperand {
    Reg(Gpr, Width),
    Imm(i64),
    /// `disp(%base)`, or bare `disp` (a GOT/RIP-relative-free absolute, rare in
    /// practice but syntactically valid).
    Mem { base: Option<Gpr>, disp: i32 },
    /// A bare symbol, used as a call/jmp target or a RIP-relative data reference.
    Symbol(String, i32),
}

fn gpr_from_name(name: &str) -> Option<(Gpr, Width)> {
    use Gpr::*;
    use Width::*;
    Some(match name {
        "rax" => (Rax, Qword),
        "rcx" => (Rcx, Qword),
        "rdx" => (Rdx, Qword),
        "rbx" => (Rbx, Qword),
        "rsp" => (Rsp, Qword),
        "rbp" => (Rbp, Qword),
        "rsi" => (Rsi, Qword),
        "rdi" => (Rdi, Qword),
        "r8" => (R8, Qword),
        "r9" => (R9, Qword),
        "r10" => (R10, Qword),
        "r11" => (R11, Qword),
        "r12" => (R12, Qword),
        "r13" => (R13, Qword),
        "r14" => (R14, Qword),
        "r15" => (R15, Qword),
        "eax" => (Rax, Dword),
        "ecx" => (Rcx, Dword),
        "edx" => (Rdx, Dword),
        "ebx" => (Rbx, Dword),
        "esp" => (Rsp, Dword),
        "ebp" => (Rbp, Dword),
        "esi" => (Rsi, Dword),
        "edi" => (Rdi, Dword),
        "r8d" => (R8, Dword),
        "r9d" => (R9, Dword),
        "r10d" => (R10, Dword),
        "r11d" => (R11, Dword),
        "r12d" => (R12, Dword),
        "r13d" => (R13, Dword),
        "r14d" => (R14, Dword),
        "r15d" => (R15, Dword),
        "ax" => (Rax, Word),
        "cx" => (Rcx, Word),
        "dx" => (Rdx, Word),
        "bx" => (Rbx, Word),
        "sp" => (Rsp, Word),
        "bp" => (Rbp, Word),
        "si" => (Rsi, Word),
        "di" => (Rdi, Word),
        "al" => (Rax, Byte),
        "cl" => (Rcx, Byte),
        "dl" => (Rdx, Byte),
        "bl" => (Rbx, Byte),
        _ => return None,
    })
}

impl Assembler {
    pub(crate) fn instruction(&mut self, mnemonic: &str) -> Result<()> {
        if let Some(cond) = condition_suffix(mnemonic, "j") {
            return self.instr_jcc(cond);
        }
        match mnemonic {
            "nop" => self.emit(|e| e.nop()),
            "ret" => self.emit(|e| e.ret()),
            "leave" => self.emit(|e| e.leave()),
            "syscall" => self.emit(|e| e.syscall()),
            "push" => self.instr_push_pop(true),
            "pop" => self.instr_push_pop(false),
            "jmp" => self.instr_jmp(),
            "call" => self.instr_call(),
            "mov" | "movq" | "movl" | "movw" | "movb" => self.instr_mov(),
            "lea" | "leaq" => self.instr_lea(),
            "movzbl" | "movzbw" | "movzwl" => self.instr_load_extend(false),
            "movsbl" | "movsbw" | "movswl" => self.instr_load_extend(true),
            "add" | "addq" | "addl" => self.instr_arith(ArithOp::Add),
            "sub" | "subq" | "subl" => self.instr_arith(ArithOp::Sub),
            "and" | "andq" | "andl" => self.instr_arith(ArithOp::And),
            "or" | "orq" | "orl" => self.instr_arith(ArithOp::Or),
            "xor" | "xorq" | "xorl" => self.instr_arith(ArithOp::Xor),
            "cmp" | "cmpq" | "cmpl" => self.instr_arith(ArithOp::Cmp),
            "adc" | "adcq" | "adcl" => self.instr_arith(ArithOp::Adc),
            "sbb" | "sbbq" | "sbbl" => self.instr_arith(ArithOp::Sbb),
            "shl" | "shlq" | "shll" | "sal" | "salq" | "sall" => self.instr_shift(ShiftOp::Shl),
            "shr" | "shrq" | "shrl" => self.instr_shift(ShiftOp::Shr),
            "sar" | "sarq" | "sarl" => self.instr_shift(ShiftOp::Sar),
            other => Err(AsmError::UnknownMnemonic(other.to_owned())),
        }
    }

    fn emit(&mut self, f: impl FnOnce(&mut Encoder<'_>)) -> Result<()> {
        let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
        f(&mut enc);
        self.end_of_statement_instr()
    }

    fn end_of_statement_instr(&mut self) -> Result<()> {
        match self.peek() {
            Tok::Newline | Tok::Eof => Ok(()),
            other => Err(AsmError::Syntax(format!("unexpected trailing {other:?}"))),
        }
    }

    fn parse_raw_operand(&mut self) -> Result<RawOperand> {
        match self.peek().clone() {
            Tok::Dollar => {
                self.advance();
                let v = self.parse_expr()?;
                if v.sym.is_some() {
                    return Err(AsmError::Syntax("immediate operand cannot reference a symbol".into()));
                }
                Ok(RawOperand::Imm(v.v))
            }
            Tok::Register(name) => {
                self.advance();
                let (reg, width) = gpr_from_name(&name).ok_or_else(|| AsmError::UnknownRegister(name.clone()))?;
                Ok(RawOperand::Reg(reg, width))
            }
            Tok::LParen => {
                self.advance();
                let base = self.parse_base_register()?;
                self.expect_rparen()?;
                Ok(RawOperand::Mem { base: Some(base), disp: 0 })
            }
            Tok::Minus | Tok::Number { .. } => {
                let v = self.parse_expr()?;
                let disp = v.v as i32;
                if matches!(self.peek(), Tok::LParen) {
                    self.advance();
                    let base = self.parse_base_register()?;
                    self.expect_rparen()?;
                    Ok(RawOperand::Mem { base: Some(base), disp })
                } else if v.sym.is_some() {
                    Ok(RawOperand::Symbol(self.symbols.get(v.sym.unwrap()).asm_label.clone(), disp))
                } else {
                    Ok(RawOperand::Mem { base: None, disp })
                }
            }
            Tok::Ident(name) => {
                self.advance();
                if matches!(self.peek(), Tok::LParen) {
                    self.advance();
                    let base = self.parse_base_register()?;
                    self.expect_rparen()?;
                    Ok(RawOperand::Mem { base: Some(base), disp: 0 })
                } else {
                    Ok(RawOperand::Symbol(name, 0))
                }
            }
            other => Err(AsmError::Syntax(format!("expected an operand, found {other:?}"))),
        }
    }

    fn parse_base_register(&mut self) -> Result<Gpr> {
        match self.advance() {
            Tok::Register(name) => gpr_from_name(&name)
                .map(|(r, _)| r)
                .ok_or(AsmError::UnknownRegister(name)),
            other => Err(AsmError::Syntax(format!("expected a base register, found {other:?}"))),
        }
    }

    fn lower_operand(&mut self, raw: RawOperand) -> Operand {
        match raw {
            RawOperand::Reg(r, _) => Operand::Reg(r),
            RawOperand::Imm(_) => unreachable!("immediate operands are handled before lowering"),
            RawOperand::Mem { base: Some(Gpr::Rbp), disp } => Operand::Local { disp },
            RawOperand::Mem { base: Some(base), disp } => Operand::Mem { base, disp },
            RawOperand::Mem { base: None, disp } => Operand::Const {
                symbol: None,
                disp,
                non_static: false,
            },
            RawOperand::Symbol(name, disp) => {
                let id = self.symbols.get_or_declare(&name);
                Operand::Const {
                    symbol: Some(id),
                    disp,
                    non_static: false,
                }
            }
        }
    }

    fn instr_mov(&mut self) -> Result<()> {
        let src = self.parse_raw_operand()?;
        self.expect_comma()?;
        let dst = self.parse_raw_operand()?;
        match (src, dst) {
            (RawOperand::Imm(v), RawOperand::Reg(dst, width)) => {
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.mov_reg_imm(dst, v, width)?;
            }
            (RawOperand::Reg(src, width), RawOperand::Reg(dst, _)) => {
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.mov_reg_reg(dst, src, width);
            }
            (RawOperand::Reg(src, width), dst_raw) => {
                let dst = self.lower_operand(dst_raw);
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.store(src, dst, width);
            }
            (src_raw, RawOperand::Reg(dst, width)) => {
                let src = self.lower_operand(src_raw);
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.load(dst, src, width);
            }
            _ => return Err(AsmError::Syntax("mov requires a register source or destination".into())),
        }
        self.end_of_statement_instr()
    }

    fn instr_lea(&mut self) -> Result<()> {
        let src = self.parse_raw_operand()?;
        self.expect_comma()?;
        let (dst, _) = self.expect_reg_operand()?;
        let operand = self.lower_operand(src);
        let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
        enc.lea(dst, operand);
        self.end_of_statement_instr()
    }

    fn instr_load_extend(&mut self, signed: bool) -> Result<()> {
        let src = self.parse_raw_operand()?;
        self.expect_comma()?;
        let (dst, _) = self.expect_reg_operand()?;
        let from_width = match &src {
            RawOperand::Reg(_, w) => *w,
            _ => Width::Byte,
        };
        let operand = self.lower_operand(src);
        let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
        enc.load_extend(dst, operand, from_width, signed);
        self.end_of_statement_instr()
    }

    fn expect_reg_operand(&mut self) -> Result<(Gpr, Width)> {
        match self.parse_raw_operand()? {
            RawOperand::Reg(r, w) => Ok((r, w)),
            _ => Err(AsmError::Syntax("expected a register operand".into())),
        }
    }

    fn instr_arith(&mut self, op: ArithOp) -> Result<()> {
        let src = self.parse_raw_operand()?;
        self.expect_comma()?;
        let dst_raw = self.parse_raw_operand()?;
        match (src, dst_raw) {
            (RawOperand::Imm(imm), dst_raw) => {
                let width = operand_width(&dst_raw);
                let dst = self.lower_operand(dst_raw);
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.arith_ri(op, dst, imm, width)?;
            }
            (RawOperand::Reg(src_reg, width), dst_raw) => {
                let dst = self.lower_operand(dst_raw);
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.arith_rr(op, dst, src_reg, width);
            }
            _ => return Err(AsmError::Syntax("arithmetic op requires a register or immediate source".into())),
        }
        self.end_of_statement_instr()
    }

    fn instr_shift(&mut self, op: ShiftOp) -> Result<()> {
        let first = self.parse_raw_operand()?;
        match first {
            RawOperand::Reg(Gpr::Rcx, Width::Byte) if matches!(self.peek(), Tok::Comma) => {
                self.expect_comma()?;
                let (dst, width) = self.expect_reg_operand()?;
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.shift_cl(op, dst, width);
            }
            RawOperand::Imm(count) => {
                self.expect_comma()?;
                let (dst, width) = self.expect_reg_operand()?;
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.shift_imm(op, dst, count as u8, width);
            }
            RawOperand::Reg(dst, width) => {
                // One-operand form (`shl %eax`) is GAS sugar for a shift count of 1.
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                enc.shift_imm(op, dst, 1, width);
            }
            _ => return Err(AsmError::Syntax("expected a shift count or register".into())),
        }
        self.end_of_statement_instr()
    }

    fn instr_push_pop(&mut self, is_push: bool) -> Result<()> {
        let (reg, _) = self.expect_reg_operand()?;
        let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
        if is_push {
            enc.push(reg);
        } else {
            enc.pop(reg);
        }
        self.end_of_statement_instr()
    }

    /// Resolve a branch/call target to a symbol, declaring it if this is the first
    /// mention (an as-yet-undefined forward reference is perfectly normal: it becomes
    /// an `UNDEF` symbol the linker resolves against another object or a shared library).
    fn branch_target_symbol(&mut self) -> Result<asmobj::SymbolId> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(self.symbols.get_or_declare(&name))
            }
            Tok::Number { value, suffix: Some('b') } => {
                self.advance();
                self.locals.backward(value).ok_or(AsmError::LocalLabelNotFoundBackward(value))
            }
            Tok::Number { value, suffix: Some('f') } => {
                self.advance();
                Ok(self.locals.forward(value, &mut self.symbols))
            }
            other => Err(AsmError::Syntax(format!("expected a branch target, found {other:?}"))),
        }
    }

    /// `jmp target`. When `target` is already defined in the current section (the
    /// `1: ... jmp 1b` backward-local-label idiom, or any already-seen same-section
    /// label), the displacement is known at assembly time: no relocation is needed,
    /// and the 2-byte `rel8` form is used whenever it fits (§8's short-vs-long
    /// boundary: `target - ind - 2` fits a signed byte). Anything else — a forward
    /// reference, or a symbol that may be defined in another section/object —
    /// always takes the relocatable `e9 rel32` form, since the displacement isn't
    /// known yet.
    fn instr_jmp(&mut self) -> Result<()> {
        let sym = self.branch_target_symbol()?;
        let known_target = {
            let s = self.symbols.get(sym);
            (s.defined && s.section == Some(self.sections.current_id())).then_some(s.value)
        };
        match known_target {
            Some(target) => {
                let ind = self.sections.current().position();
                let short_disp = target as i64 - (ind as i64 + 2);
                if let Ok(d) = i8::try_from(short_disp) {
                    let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                    let patch_at = enc.jmp_rel8();
                    let sec = self.sections.current_id();
                    self.sections.patch_u8(sec, patch_at, d as u8);
                } else {
                    let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                    let patch_at = enc.jmp_rel32();
                    let rel = (target as i64 - (patch_at as i64 + 4)) as i32;
                    let sec = self.sections.current_id();
                    self.sections.patch_le32(sec, patch_at, rel as u32);
                }
            }
            None => {
                let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
                let patch_at = enc.jmp_rel32();
                self.record_pcrel_branch(sym, patch_at);
            }
        }
        self.end_of_statement_instr()
    }

    fn instr_call(&mut self) -> Result<()> {
        let sym = self.branch_target_symbol()?;
        let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
        enc.call_rel32(sym);
        self.end_of_statement_instr()
    }

    fn instr_jcc(&mut self, cond: Condition) -> Result<()> {
        let sym = self.branch_target_symbol()?;
        let mut enc = Encoder::new(&mut self.sections, &mut self.relocs);
        let patch_at = enc.jcc_rel32(cond);
        self.record_pcrel_branch(sym, patch_at);
        self.end_of_statement_instr()
    }

    fn record_pcrel_branch(&mut self, symbol: asmobj::SymbolId, patch_at: u64) {
        let section = self.sections.current_id();
        self.relocs.push(Relocation {
            section,
            offset: patch_at,
            symbol,
            kind: RelocKind::Pc32,
            addend: -4,
        });
    }
}

fn operand_width(raw: &RawOperand) -> Width {
    match raw {
        RawOperand::Reg(_, w) => *w,
        _ => Width::Qword,
    }
}

/// `jXX`: split a mnemonic like `je`/`jne`/`jnz` into `Condition`. Returns `None` for
/// anything not matching a recognized suffix so the caller falls through to the plain
/// mnemonic table (`jmp` itself is handled separately, not through this path).
fn condition_suffix(mnemonic: &str, prefix: &str) -> Option<Condition> {
    let suffix = mnemonic.strip_prefix(prefix)?;
    Some(match suffix {
        "e" | "z" => Condition::Equal,
        "ne" | "nz" => Condition::NotEqual,
        "l" | "nge" => Condition::Less,
        "ge" | "nl" => Condition::GreaterOrEqual,
        "le" | "ng" => Condition::LessOrEqual,
        "g" | "nle" => Condition::Greater,
        "b" | "c" | "nae" => Condition::Below,
        "ae" | "nb" | "nc" => Condition::AboveOrEqual,
        "be" | "na" => Condition::BelowOrEqual,
        "a" | "nbe" => Condition::Above,
        "s" => Condition::Sign,
        "ns" => Condition::NotSign,
        "o" => Condition::Overflow,
        "no" => Condition::NotOverflow,
        "p" | "pe" => Condition::Parity,
        "np" | "po" => Condition::NotParity,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;

    fn run(src: &str) -> Assembler {
        let mut asm = Assembler::new(TargetConfig::default());
        asm.load_source(src.as_bytes()).unwrap();
        asm.run().unwrap();
        asm
    }

    #[test]
    fn movq_immediate_to_rax() {
        let asm = run("mov $0x10, %rax\n");
        assert_eq!(
            asm.sections.current().data(),
            &[0x48, 0xb8, 0x10, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn add_rbx_rcx() {
        let asm = run("add %rbx, %rcx\n");
        assert_eq!(asm.sections.current().data(), &[0x48, 0x01, 0xd9]);
    }

    #[test]
    fn backward_local_label_jump_is_a_short_self_jump() {
        // spec.md §8 scenario 3: `1: jmp 1b` assembles to the two-byte short form
        // jumping to itself, no relocation (the displacement is known immediately).
        let asm = run("1:\njmp 1b\n");
        assert_eq!(asm.sections.current().data(), &[0xeb, 0xfe]);
        assert!(asm.relocs.is_empty());
    }

    #[test]
    fn forward_local_label_jump_is_relocatable_long_form() {
        // spec.md §8 scenario 4: `jmp 1f` ahead of the label it targets can't know
        // the displacement yet, so it takes the relocatable `e9 rel32` form.
        let asm = run("jmp 1f\n1:\n");
        assert_eq!(asm.sections.current().data(), &[0xe9, 0, 0, 0, 0]);
        assert_eq!(asm.relocs.len(), 1);
        assert_eq!(asm.relocs[0].addend, -4);
    }

    #[test]
    fn ret_and_nop() {
        let asm = run("nop\nret\n");
        assert_eq!(asm.sections.current().data(), &[0x90, 0xc3]);
    }
}
