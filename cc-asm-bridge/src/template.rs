//! Template substitution (§4.5 step 4): `%%` → `%`, `%N`/`%[name]` render the
//! referenced operand as GAS-syntax text, reshaped by an optional one-letter size
//! modifier. Grounded on `tccasm.c`'s `subst_asm_operand`.

use x64codegen::{CodeGen, RegSlot, SValue};
use x64enc::{Gpr, Width};

use crate::error::{AsmBridgeError, Result};
use crate::operand::AsmOperand;

fn gpr_name(reg: Gpr, width: Width) -> &'static str {
    use Gpr::*;
    use Width::*;
    match (reg, width) {
        (Rax, Qword) => "rax",
        (Rax, Dword) => "eax",
        (Rax, Word) => "ax",
        (Rax, Byte) => "al",
        (Rbx, Qword) => "rbx",
        (Rbx, Dword) => "ebx",
        (Rbx, Word) => "bx",
        (Rbx, Byte) => "bl",
        (Rcx, Qword) => "rcx",
        (Rcx, Dword) => "ecx",
        (Rcx, Word) => "cx",
        (Rcx, Byte) => "cl",
        (Rdx, Qword) => "rdx",
        (Rdx, Dword) => "edx",
        (Rdx, Word) => "dx",
        (Rdx, Byte) => "dl",
        (Rsi, Qword) => "rsi",
        (Rsi, Dword) => "esi",
        (Rsi, Word) => "si",
        (Rsi, Byte) => "sil",
        (Rdi, Qword) => "rdi",
        (Rdi, Dword) => "edi",
        (Rdi, Word) => "di",
        (Rdi, Byte) => "dil",
        (Rbp, Qword) => "rbp",
        (Rbp, Dword) => "ebp",
        (Rbp, Word) => "bp",
        (Rbp, Byte) => "bpl",
        (Rsp, Qword) => "rsp",
        (Rsp, Dword) => "esp",
        (Rsp, Word) => "sp",
        (Rsp, Byte) => "spl",
        (R8, Qword) => "r8",
        (R8, Dword) => "r8d",
        (R8, Word) => "r8w",
        (R8, Byte) => "r8b",
        (R9, Qword) => "r9",
        (R9, Dword) => "r9d",
        (R9, Word) => "r9w",
        (R9, Byte) => "r9b",
        (R10, Qword) => "r10",
        (R10, Dword) => "r10d",
        (R10, Word) => "r10w",
        (R10, Byte) => "r10b",
        (R11, Qword) => "r11",
        (R11, Dword) => "r11d",
        (R11, Word) => "r11w",
        (R11, Byte) => "r11b",
        (R12, Qword) => "r12",
        (R12, Dword) => "r12d",
        (R12, Word) => "r12w",
        (R12, Byte) => "r12b",
        (R13, Qword) => "r13",
        (R13, Dword) => "r13d",
        (R13, Word) => "r13w",
        (R13, Byte) => "r13b",
        (R14, Qword) => "r14",
        (R14, Dword) => "r14d",
        (R14, Word) => "r14w",
        (R14, Byte) => "r14b",
        (R15, Qword) => "r15",
        (R15, Dword) => "r15d",
        (R15, Word) => "r15w",
        (R15, Byte) => "r15b",
    }
}

fn gpr_high_byte_name(reg: Gpr) -> Option<&'static str> {
    use Gpr::*;
    Some(match reg {
        Rax => "ah",
        Rbx => "bh",
        Rcx => "ch",
        Rdx => "dh",
        _ => return None,
    })
}

fn render_operand(gen: &CodeGen, op: &AsmOperand, modifier: Option<char>) -> Result<String> {
    match &gen.vstack[op.vstack_idx] {
        SValue::Reg { slot: RegSlot::Int(g), .. } => {
            let name = match modifier {
                None | Some('q') | Some('P') => gpr_name(*g, Width::Qword),
                Some('b') => gpr_name(*g, Width::Byte),
                Some('w') => gpr_name(*g, Width::Word),
                Some('k') => gpr_name(*g, Width::Dword),
                Some('h') => gpr_high_byte_name(*g).ok_or(AsmBridgeError::UnknownSizeModifier('h'))?,
                Some(other) => return Err(AsmBridgeError::UnknownSizeModifier(other)),
            };
            Ok(format!("%{name}"))
        }
        SValue::Reg { slot: RegSlot::Sse(x), .. } => Ok(format!("%xmm{}", *x as u8)),
        SValue::Reg { slot: RegSlot::X87Top, .. } => Ok("%st(0)".to_string()),
        SValue::RegIndirect { slot: RegSlot::Int(base), .. } => Ok(format!("(%{})", gpr_name(*base, Width::Qword))),
        SValue::Local { offset, .. } | SValue::IndirectLocal { offset, .. } => Ok(format!("{offset}(%rbp)")),
        SValue::Const { bits, .. } => match modifier {
            Some('c') | Some('n') => Ok(bits.as_i64().to_string()),
            _ => Ok(format!("${}", bits.as_i64())),
        },
        SValue::Cmp { .. } | SValue::JmpChain { .. } | SValue::RegIndirect { slot: RegSlot::Sse(_) | RegSlot::X87Top, .. } => {
            Err(AsmBridgeError::ExpectedMemoryOperand)
        }
    }
}

pub fn substitute(template: &str, operands: &[AsmOperand], gen: &CodeGen) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('[') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(AsmBridgeError::UnterminatedNamedRef),
                    }
                }
                let op = operands
                    .iter()
                    .find(|o| o.name.as_deref() == Some(name.as_str()))
                    .ok_or_else(|| AsmBridgeError::UnknownNamedOperand(name.clone()))?;
                out.push_str(&render_operand(gen, op, None)?);
            }
            Some(modifier) if "bwhkqPnc".contains(modifier) => {
                chars.next();
                let idx = take_decimal(&mut chars)?;
                let op = operands.get(idx).ok_or(AsmBridgeError::OperandIndexOutOfRange(idx))?;
                out.push_str(&render_operand(gen, op, Some(modifier))?);
            }
            Some(d) if d.is_ascii_digit() => {
                let idx = take_decimal(&mut chars)?;
                let op = operands.get(idx).ok_or(AsmBridgeError::OperandIndexOutOfRange(idx))?;
                out.push_str(&render_operand(gen, op, None)?);
            }
            other => return Err(AsmBridgeError::UnknownSizeModifier(other.unwrap_or('\0'))),
        }
    }
    Ok(out)
}

fn take_decimal(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<usize> {
    let mut s = String::new();
    while let Some(c) = chars.peek() {
        if c.is_ascii_digit() {
            s.push(*c);
            chars.next();
        } else {
            break;
        }
    }
    s.parse::<usize>().map_err(|_| AsmBridgeError::OperandIndexOutOfRange(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Constraint;
    use asmobj::{SectionStore, SymbolTable};
    use x64codegen::CType;

    #[test]
    fn doubled_percent_becomes_a_literal_percent() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let rendered = substitute("%%eax", &[], &gen).unwrap();
        assert_eq!(rendered, "%eax");
    }

    #[test]
    fn numeric_reference_renders_a_bound_register_operand() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        gen.push(SValue::Reg { slot: RegSlot::Int(Gpr::Rdi), ty: CType::Pointer });
        let op = AsmOperand {
            id: 0,
            name: None,
            constraint: Constraint::parse("r", false).unwrap(),
            vstack_idx: 0,
            ty: CType::Pointer,
        };
        let rendered = substitute("mov %0, %%rax", &[op], &gen).unwrap();
        assert_eq!(rendered, "mov %rdi, %rax");
    }

    #[test]
    fn byte_size_modifier_renders_the_low_byte_register_name() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = SymbolTable::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        gen.push(SValue::Reg {
            slot: RegSlot::Int(Gpr::Rax),
            ty: CType::Int { width: x64codegen::IntWidth::Int, signed: true },
        });
        let op = AsmOperand {
            id: 0,
            name: None,
            constraint: Constraint::parse("a", false).unwrap(),
            vstack_idx: 0,
            ty: CType::Int { width: x64codegen::IntWidth::Int, signed: true },
        };
        let rendered = substitute("movb %b0, %%cl", &[op], &gen).unwrap();
        assert_eq!(rendered, "movb %al, %cl");
    }
}
