//! Expression evaluator: `.byte`/`.quad`/`.set`/memory-operand displacement operands
//! all bottom out here. Grounded in `tccasm.c`'s `asm_expr_unary`/`asm_expr_prod`/
//! `asm_expr_logic`/`asm_expr_sum`/`asm_expr_cmp` precedence chain (lines 118-384):
//! comparison is the loosest, then bitwise or/and/xor, then additive, then
//! multiplicative/shift, then unary, then the atom.
//!
//! A value carries at most one symbol: `v + sym` and `sym - v` both propagate the
//! symbol through, but combining two symbols is only legal when it collapses to a
//! plain integer (same symbol, or both defined in the same section) or to a
//! PC-relative constant (subtracting a same-section-as-`.` symbol).

use asmobj::{SectionId, SymbolId};

use crate::assembler::Assembler;
use crate::error::{AsmError, Result};
use crate::lexer::Tok;

/// The value of an assembler-time expression: an integer, optionally offset from a
/// symbol, optionally already collapsed to a PC-relative displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprValue {
    pub v: i64,
    pub sym: Option<SymbolId>,
    pub pcrel: bool,
}

impl ExprValue {
    pub fn constant(v: i64) -> Self {
        Self {
            v,
            sym: None,
            pcrel: false,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.sym.is_none()
    }
}

impl Assembler {
    pub fn parse_expr(&mut self) -> Result<ExprValue> {
        self.expr_cmp()
    }

    fn expr_cmp(&mut self) -> Result<ExprValue> {
        let mut lhs = self.expr_sum()?;
        loop {
            let op = match self.peek() {
                Tok::Eq => Some(CmpOp::Eq),
                Tok::Ne => Some(CmpOp::Ne),
                Tok::Lt => Some(CmpOp::Lt),
                Tok::Le => Some(CmpOp::Le),
                Tok::Gt => Some(CmpOp::Gt),
                Tok::Ge => Some(CmpOp::Ge),
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            let rhs = self.expr_sum()?;
            let (l, r) = (require_int(lhs)?, require_int(rhs)?);
            let result = match op {
                CmpOp::Eq => l == r,
                CmpOp::Ne => l != r,
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r,
            };
            // GAS represents boolean results as 0 / -1, not 0 / 1.
            lhs = ExprValue::constant(if result { -1 } else { 0 });
        }
        Ok(lhs)
    }

    fn expr_sum(&mut self) -> Result<ExprValue> {
        let mut lhs = self.expr_logic()?;
        loop {
            match self.peek() {
                Tok::Plus => {
                    self.advance();
                    let rhs = self.expr_logic()?;
                    lhs = add(lhs, rhs)?;
                }
                Tok::Minus => {
                    self.advance();
                    let rhs = self.expr_logic()?;
                    lhs = self.sub(lhs, rhs)?;
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn expr_logic(&mut self) -> Result<ExprValue> {
        let mut lhs = self.expr_prod()?;
        loop {
            let op = match self.peek() {
                Tok::Amp => Some(Tok::Amp),
                Tok::Pipe => Some(Tok::Pipe),
                Tok::Caret => Some(Tok::Caret),
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            let rhs = self.expr_prod()?;
            let (l, r) = (require_int(lhs)?, require_int(rhs)?);
            let v = match op {
                Tok::Amp => l & r,
                Tok::Pipe => l | r,
                Tok::Caret => l ^ r,
                _ => unreachable!(),
            };
            lhs = ExprValue::constant(v);
        }
        Ok(lhs)
    }

    fn expr_prod(&mut self) -> Result<ExprValue> {
        let mut lhs = self.expr_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => Some(Tok::Star),
                Tok::Slash => Some(Tok::Slash),
                Tok::Percent => Some(Tok::Percent),
                Tok::Shl => Some(Tok::Shl),
                Tok::Shr => Some(Tok::Shr),
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            let rhs = self.expr_unary()?;
            let (l, r) = (require_int(lhs)?, require_int(rhs)?);
            let v = match op {
                Tok::Star => l.wrapping_mul(r),
                Tok::Slash => {
                    if r == 0 {
                        return Err(AsmError::DivisionByZero);
                    }
                    l.wrapping_div(r)
                }
                Tok::Percent => {
                    if r == 0 {
                        return Err(AsmError::DivisionByZero);
                    }
                    l.wrapping_rem(r)
                }
                Tok::Shl => l.wrapping_shl(r as u32),
                Tok::Shr => ((l as u64) >> (r as u32)) as i64,
                _ => unreachable!(),
            };
            lhs = ExprValue::constant(v);
        }
        Ok(lhs)
    }

    fn expr_unary(&mut self) -> Result<ExprValue> {
        match self.peek().clone() {
            Tok::Minus => {
                self.advance();
                let v = self.expr_unary()?;
                if v.sym.is_some() {
                    return Err(AsmError::InvalidOperationWithLabel);
                }
                Ok(ExprValue::constant(-v.v))
            }
            Tok::Tilde => {
                self.advance();
                let v = self.expr_unary()?;
                if v.sym.is_some() {
                    return Err(AsmError::InvalidOperationWithLabel);
                }
                Ok(ExprValue::constant(!v.v))
            }
            Tok::Plus => {
                self.advance();
                self.expr_unary()
            }
            _ => self.expr_atom(),
        }
    }

    fn expr_atom(&mut self) -> Result<ExprValue> {
        match self.peek().clone() {
            Tok::Number { value, suffix: None } => {
                self.advance();
                Ok(ExprValue::constant(value as i64))
            }
            Tok::Number {
                value,
                suffix: Some('b'),
            } => {
                self.advance();
                let id = self
                    .locals
                    .backward(value)
                    .ok_or(AsmError::LocalLabelNotFoundBackward(value))?;
                Ok(symbol_value(id))
            }
            Tok::Number {
                value,
                suffix: Some('f'),
            } => {
                self.advance();
                let id = self.locals.forward(value, &mut self.symbols);
                Ok(symbol_value(id))
            }
            Tok::Number { suffix: Some(_), .. } => unreachable!("only b/f suffixes are lexed"),
            Tok::Dot => {
                self.advance();
                let section = self.sections.current_id();
                let sym = self.section_symbol(section);
                Ok(ExprValue {
                    v: self.sections.current().position() as i64,
                    sym: Some(sym),
                    pcrel: false,
                })
            }
            Tok::Ident(name) => {
                self.advance();
                let id = self.symbols.get_or_declare(&name);
                Ok(symbol_value(id))
            }
            Tok::LParen => {
                self.advance();
                let v = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(v)
            }
            Tok::Char(c) => {
                self.advance();
                Ok(ExprValue::constant(c))
            }
            other => Err(AsmError::Syntax(format!(
                "expected an expression, found {other:?}"
            ))),
        }
    }

    /// `A - B`, the one binary op with real per-case symbol logic (tccasm.c's
    /// `asm_expr_sum` `'-'` arm): same symbol cancels to zero; a symbol minus a plain
    /// integer just shifts the offset; two symbols defined in the same section
    /// collapse to the difference of their values; a symbol minus something that
    /// resolves to the current position in the current section collapses to a
    /// PC-relative displacement; anything else (symbols from different, unrelated
    /// sections) is rejected rather than silently guessed at.
    fn sub(&mut self, lhs: ExprValue, rhs: ExprValue) -> Result<ExprValue> {
        match (lhs.sym, rhs.sym) {
            (None, None) => Ok(ExprValue::constant(lhs.v - rhs.v)),
            (Some(_), None) => Ok(ExprValue {
                v: lhs.v - rhs.v,
                sym: lhs.sym,
                pcrel: lhs.pcrel,
            }),
            // A plain constant minus a symbol (e.g. `5 - foo`; `.` always carries the
            // current section's symbol now, so this no longer covers `. - name`):
            // resolvable immediately if `name` is already defined in the current
            // section, otherwise an error rather than emitting a relocation for what
            // would be a negated symbol.
            (None, Some(b)) => {
                let sb = self.symbols.get(b);
                if sb.defined && sb.section == Some(self.sections.current_id()) {
                    Ok(ExprValue::constant(lhs.v - (sb.value as i64 + rhs.v)))
                } else {
                    Err(AsmError::InvalidOperationWithLabel)
                }
            }
            (Some(a), Some(b)) if a == b => Ok(ExprValue::constant(lhs.v - rhs.v)),
            (Some(a), Some(b)) => {
                let sa = self.symbols.get(a);
                let sb = self.symbols.get(b);
                match (sa.section, sb.section) {
                    (Some(sec_a), Some(sec_b)) if sec_a == sec_b => {
                        Ok(ExprValue::constant((sa.value as i64 + lhs.v) - (sb.value as i64 + rhs.v)))
                    }
                    (Some(sec_b_is_here), _) if sec_b_is_here == self.sections.current_id() => {
                        self.pcrel_collapse(lhs, rhs, sec_b_is_here)
                    }
                    _ => Err(AsmError::Syntax(
                        "subtraction of symbols from unrelated sections".into(),
                    )),
                }
            }
        }
    }

    fn pcrel_collapse(&self, lhs: ExprValue, rhs: ExprValue, _rhs_section: SectionId) -> Result<ExprValue> {
        let sb = self.symbols.get(rhs.sym.unwrap());
        let ind = self.sections.current().position() as i64;
        // tccasm.c: `v -= esym2.value - ind - 4; pcrel = 1;` — the `-4` bias assumes the
        // relocation's addend is taken relative to the end of a 4-byte PC32 field, which
        // is exactly what the caller (an instruction operand or `.long`) is emitting here.
        let v = (lhs.v - rhs.v) - (sb.value as i64 - ind - 4);
        Ok(ExprValue {
            v,
            sym: lhs.sym,
            pcrel: true,
        })
    }
}

#[derive(Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn symbol_value(id: SymbolId) -> ExprValue {
    ExprValue {
        v: 0,
        sym: Some(id),
        pcrel: false,
    }
}

fn add(lhs: ExprValue, rhs: ExprValue) -> Result<ExprValue> {
    match (lhs.sym, rhs.sym) {
        (Some(_), Some(_)) => Err(AsmError::InvalidOperationWithLabel),
        (Some(s), None) => Ok(ExprValue {
            v: lhs.v + rhs.v,
            sym: Some(s),
            pcrel: lhs.pcrel,
        }),
        (None, Some(s)) => Ok(ExprValue {
            v: lhs.v + rhs.v,
            sym: Some(s),
            pcrel: rhs.pcrel,
        }),
        (None, None) => Ok(ExprValue::constant(lhs.v + rhs.v)),
    }
}

fn require_int(v: ExprValue) -> Result<i64> {
    if v.sym.is_some() {
        Err(AsmError::InvalidOperationWithLabel)
    } else {
        Ok(v.v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;

    fn eval(src: &str) -> ExprValue {
        let mut asm = Assembler::new(TargetConfig::default());
        asm.load_source(src.as_bytes()).unwrap();
        asm.parse_expr().unwrap()
    }

    #[test]
    fn plain_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").v, 7);
        assert_eq!(eval("(1 + 2) * 3").v, 9);
        assert_eq!(eval("10 % 3").v, 1);
    }

    #[test]
    fn unary_minus_and_complement() {
        assert_eq!(eval("-5").v, -5);
        assert_eq!(eval("~0").v, -1);
    }

    #[test]
    fn comparisons_are_gas_style_boolean() {
        assert_eq!(eval("1 == 1").v, -1);
        assert_eq!(eval("1 == 2").v, 0);
    }

    #[test]
    fn same_symbol_subtraction_cancels() {
        let mut asm = Assembler::new(TargetConfig::default());
        asm.load_source(b"foo - foo").unwrap();
        let v = asm.parse_expr().unwrap();
        assert_eq!(v.v, 0);
        assert!(v.sym.is_none());
    }

    #[test]
    fn unary_minus_on_symbol_errors() {
        let mut asm = Assembler::new(TargetConfig::default());
        asm.load_source(b"-foo").unwrap();
        assert!(matches!(
            asm.parse_expr().unwrap_err(),
            AsmError::InvalidOperationWithLabel
        ));
    }

    #[test]
    fn division_by_zero_errors() {
        let mut asm = Assembler::new(TargetConfig::default());
        asm.load_source(b"1 / 0").unwrap();
        assert!(matches!(asm.parse_expr().unwrap_err(), AsmError::DivisionByZero));
    }

    #[test]
    fn symbol_minus_dot_collapses_to_constant_in_same_section() {
        // spec.md §8 scenario 6: `foo - .` where `foo` is defined at offset 0x20 in
        // the current text section and `.` sits at ind=0x10 emits a plain `+0x10`
        // constant, no relocation — `.` must carry the current section's symbol so
        // this reaches the same-section collapse rather than being treated as a
        // symbol-relative (`Abs64`) reference.
        let mut asm = Assembler::new(TargetConfig::default());
        let text = asm.sections.current_id();
        asm.symbols
            .define("foo", text, 0x20, asmobj::consts::SymbolType(asmobj::consts::STT_NOTYPE))
            .unwrap();
        asm.sections.reserve(0x10, 0);
        asm.load_source(b"foo - .").unwrap();
        let v = asm.parse_expr().unwrap();
        assert_eq!(v.v, 0x10);
        assert!(v.sym.is_none());
    }
}
