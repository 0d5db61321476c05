//! Directive engine: everything spelled `.something`. Grounded in `tccasm.c`'s
//! `asm_parse_directive` (lines 483-921): data emission, alignment/padding,
//! `.fill`/`.rept`, symbol attribute directives, and section switching.

use asmobj::consts::{
    ShFlags, ShType, SymbolType, SHT_NOBITS, SHT_PROGBITS, STT_FUNC, STT_NOTYPE, STT_OBJECT,
};
use asmobj::{RelocKind, Relocation};

use crate::assembler::Assembler;
use crate::error::{AsmError, Result};
use crate::expr::ExprValue;
use crate::lexer::Tok;

impl Assembler {
    pub(crate) fn directive(&mut self, name: &str) -> Result<()> {
        tracing::trace!(directive = name, "dispatch");
        match name {
            ".byte" => self.data_directive(1),
            ".word" | ".short" | ".value" => self.data_directive(2),
            ".long" | ".int" => self.data_directive(4),
            ".quad" => self.data_directive(8),
            ".ascii" => self.ascii_directive(false),
            ".asciz" | ".string" => self.ascii_directive(true),
            ".align" => self.align_directive(AlignUnit::Bytes),
            ".balign" => self.align_directive(AlignUnit::Bytes),
            ".p2align" => self.align_directive(AlignUnit::Power),
            ".skip" | ".space" | ".zero" => self.skip_directive(),
            ".fill" => self.fill_directive(),
            ".org" => self.org_directive(),
            ".rept" => self.rept_directive(),
            ".endr" => Err(AsmError::Syntax(".endr with no matching .rept".into())),
            ".set" | ".equ" => self.set_directive(),
            ".globl" | ".global" => self.symbol_attr_directive(|t, n| {
                t.set_global(n);
            }),
            ".weak" => self.symbol_attr_directive(|t, n| {
                t.set_weak(n);
            }),
            ".local" => self.symbol_attr_directive(|t, n| {
                t.set_local(n);
            }),
            ".hidden" => self.symbol_attr_directive(|t, n| {
                t.set_hidden(n);
            }),
            ".type" => self.type_directive(),
            ".size" => self.size_directive(),
            ".section" => self.section_directive(),
            ".pushsection" => self.pushsection_directive(),
            ".popsection" => {
                self.sections.pop()?;
                self.end_of_statement()
            }
            ".previous" => {
                self.sections.swap_previous()?;
                self.end_of_statement()
            }
            ".text" => self.switch_named_section(".text", SHT_PROGBITS, ShFlags::SHF_ALLOC | ShFlags::SHF_EXECINSTR),
            ".data" => self.switch_named_section(".data", SHT_PROGBITS, ShFlags::SHF_ALLOC | ShFlags::SHF_WRITE),
            ".bss" => self.switch_named_section(".bss", SHT_NOBITS, ShFlags::SHF_ALLOC | ShFlags::SHF_WRITE),
            // Accepted and ignored: no file/identification metadata is modeled.
            ".ident" | ".file" | ".ifndef" | ".cfi_startproc" | ".cfi_endproc" | ".p2align_max_skip" => {
                self.skip_to_newline();
                Ok(())
            }
            ".code64" => self.end_of_statement(),
            ".code16" | ".code32" => Err(AsmError::Syntax(format!(
                "{name}: only the x86-64 (code64) target is supported"
            ))),
            other => Err(AsmError::UnknownDirective(other.to_owned())),
        }
    }

    fn skip_to_newline(&mut self) {
        while !matches!(self.peek(), Tok::Newline | Tok::Eof) {
            self.advance();
        }
    }

    fn end_of_statement(&mut self) -> Result<()> {
        match self.peek() {
            Tok::Newline | Tok::Eof => Ok(()),
            other => Err(AsmError::Syntax(format!("unexpected trailing {other:?}"))),
        }
    }

    fn comma_separated<T>(&mut self, mut one: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let mut out = vec![one(self)?];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            out.push(one(self)?);
        }
        Ok(out)
    }

    /// `.byte`/`.word`/`.long`/`.quad expr, expr, ...`
    fn data_directive(&mut self, width: u8) -> Result<()> {
        let values = self.comma_separated(Self::parse_expr)?;
        for v in values {
            self.emit_value(width, v)?;
        }
        self.end_of_statement()
    }

    fn emit_value(&mut self, width: u8, v: ExprValue) -> Result<()> {
        match v.sym {
            None => {
                let bytes = (v.v as u64).to_le_bytes();
                self.sections.emit_bytes(&bytes[..width as usize]);
            }
            Some(sym) => {
                if width < 4 {
                    return Err(AsmError::Syntax(
                        "cannot relocate a value smaller than 4 bytes".into(),
                    ));
                }
                let kind = if v.pcrel {
                    RelocKind::Pc32
                } else if width == 8 {
                    RelocKind::Abs64
                } else {
                    RelocKind::Abs32
                };
                let section = self.sections.current_id();
                let offset = self.sections.current().position();
                self.relocs.push(Relocation {
                    section,
                    offset,
                    symbol: sym,
                    kind,
                    addend: v.v,
                });
                self.sections.reserve(width as u64, 0);
            }
        }
        Ok(())
    }

    fn ascii_directive(&mut self, nul_terminate: bool) -> Result<()> {
        let strings = self.comma_separated(|this| match this.advance() {
            Tok::Str(bytes) => Ok(bytes),
            other => Err(AsmError::Syntax(format!("expected a string, found {other:?}"))),
        })?;
        for mut s in strings {
            if nul_terminate {
                s.push(0);
            }
            self.sections.emit_bytes(&s);
        }
        self.end_of_statement()
    }

    /// `.align`/`.balign n[, fill]`: `n` is a byte count (not a power of two).
    /// `.p2align n[, fill]`: `n` is itself the power of two, 0..=30.
    fn align_directive(&mut self, unit: AlignUnit) -> Result<()> {
        let n = self.parse_expr()?;
        let n = require_plain(n)?;
        let align = match unit {
            AlignUnit::Bytes => {
                if n <= 0 || (n & (n - 1)) != 0 {
                    return Err(AsmError::BadAlignment);
                }
                n as u64
            }
            AlignUnit::Power => {
                if !(0..=30).contains(&n) {
                    return Err(AsmError::BadP2Align);
                }
                1u64 << n
            }
        };
        let fill = if matches!(self.peek(), Tok::Comma) {
            self.advance();
            require_plain(self.parse_expr()?)? as u8
        } else {
            0
        };
        self.sections.align_to(align, fill);
        self.end_of_statement()
    }

    fn skip_directive(&mut self) -> Result<()> {
        let n = require_plain(self.parse_expr()?)?;
        let fill = if matches!(self.peek(), Tok::Comma) {
            self.advance();
            require_plain(self.parse_expr()?)? as u8
        } else {
            0
        };
        self.sections.reserve(n.max(0) as u64, fill);
        self.end_of_statement()
    }

    /// `.fill repeat[, size[, value]]`. A non-positive `repeat` is a no-op (GAS itself
    /// diagnoses and then continues as if zero repetitions were requested).
    fn fill_directive(&mut self) -> Result<()> {
        let repeat = require_plain(self.parse_expr()?)?;
        let size = if matches!(self.peek(), Tok::Comma) {
            self.advance();
            require_plain(self.parse_expr()?)?
        } else {
            1
        }
        .clamp(0, 8) as u64;
        let value = if matches!(self.peek(), Tok::Comma) {
            self.advance();
            require_plain(self.parse_expr()?)?
        } else {
            0
        };
        if repeat > 0 {
            let bytes = (value as u64).to_le_bytes();
            for _ in 0..repeat {
                self.sections.emit_bytes(&bytes[..size as usize]);
            }
        }
        self.end_of_statement()
    }

    /// `.org expr[, fill]`: pad the current section forward to an absolute offset.
    /// Only a constant or a symbol already defined in the current section is a valid
    /// target; anything else (an undefined symbol, or one in a different section)
    /// can't be resolved to a position now.
    fn org_directive(&mut self) -> Result<()> {
        let target = self.parse_expr()?;
        let target_off = match target.sym {
            None => target.v,
            Some(sym) => {
                let s = self.symbols.get(sym);
                if s.defined && s.section == Some(self.sections.current_id()) {
                    s.value as i64 + target.v
                } else {
                    return Err(AsmError::OrgNotSameSection);
                }
            }
        };
        let fill = if matches!(self.peek(), Tok::Comma) {
            self.advance();
            require_plain(self.parse_expr()?)? as u8
        } else {
            0
        };
        let here = self.sections.current().position() as i64;
        if target_off < here {
            return Err(AsmError::OrgBackwards);
        }
        self.sections.reserve((target_off - here) as u64, fill);
        self.end_of_statement()
    }

    /// Captures the token range between `.rept` and its matching `.endr` and replays
    /// it `count` times by re-running the statement loop over the same token slice.
    fn rept_directive(&mut self) -> Result<()> {
        let count = require_plain(self.parse_expr()?)?.max(0);
        self.end_of_statement()?;
        self.skip_newlines();
        let body_start = self.pos;
        let body_end = self.find_matching_endr(body_start)?;
        for _ in 0..count {
            self.pos = body_start;
            loop {
                self.skip_newlines();
                if self.pos >= body_end {
                    break;
                }
                self.statement()?;
            }
        }
        self.pos = body_end;
        self.advance(); // consume `.endr` itself
        Ok(())
    }

    fn find_matching_endr(&self, start: usize) -> Result<usize> {
        let mut depth = 0u32;
        let mut i = start;
        loop {
            match self.tokens.get(i) {
                None | Some(Tok::Eof) => return Err(AsmError::UnterminatedRept),
                Some(Tok::Ident(w)) if w == ".rept" => {
                    depth += 1;
                    i += 1;
                }
                Some(Tok::Ident(w)) if w == ".endr" => {
                    if depth == 0 {
                        return Ok(i);
                    }
                    depth -= 1;
                    i += 1;
                }
                _ => i += 1,
            }
        }
    }

    /// `.set name, expr`.
    fn set_directive(&mut self) -> Result<()> {
        let name = self.expect_ident()?;
        self.expect_comma()?;
        let expr = self.parse_expr()?;
        match expr.sym {
            None => {
                self.symbols.set_alias(&name, None, expr.v as u64);
            }
            Some(sym) => {
                let s = self.symbols.get(sym);
                let section = s.section;
                let value = (s.value as i64 + expr.v) as u64;
                self.symbols.set_alias(&name, section, value);
            }
        }
        self.end_of_statement()
    }

    fn symbol_attr_directive(&mut self, mut apply: impl FnMut(&mut asmobj::SymbolTable, &str)) -> Result<()> {
        let names = self.comma_separated(Self::expect_ident)?;
        for n in &names {
            apply(&mut self.symbols, n);
        }
        self.end_of_statement()
    }

    /// `.type name, @function` / `@object`.
    fn type_directive(&mut self) -> Result<()> {
        let name = self.expect_ident()?;
        self.expect_comma()?;
        let kind = self.expect_ident()?;
        let ty = match kind.as_str() {
            "@function" | "%function" => SymbolType(STT_FUNC),
            "@object" | "%object" => SymbolType(STT_OBJECT),
            _ => SymbolType(STT_NOTYPE),
        };
        self.symbols.set_type(&name, ty);
        self.end_of_statement()
    }

    /// `.size name, expr`.
    fn size_directive(&mut self) -> Result<()> {
        let name = self.expect_ident()?;
        self.expect_comma()?;
        let size = require_plain(self.parse_expr()?)?;
        self.symbols.set_size(&name, size.max(0) as u64);
        self.end_of_statement()
    }

    fn switch_named_section(&mut self, name: &str, kind: u32, flags: ShFlags) -> Result<()> {
        let id = self.sections.get_or_create(name, ShType(kind), flags);
        self.sections.switch_to(id);
        self.end_of_statement()
    }

    /// `.section name[, flags]`: anything not recognized as `.text`/`.data`/`.bss`
    /// falls back to a generic `SHT_PROGBITS`, `SHF_ALLOC` section (tccasm.c's
    /// `use_section` fallback for an unrecognized name).
    fn section_directive(&mut self) -> Result<()> {
        let name = self.section_name()?;
        let (kind, flags) = section_defaults(&name);
        let id = self.sections.get_or_create(&name, ShType(kind), flags);
        self.sections.switch_to(id);
        self.skip_to_newline();
        Ok(())
    }

    fn pushsection_directive(&mut self) -> Result<()> {
        let name = self.section_name()?;
        let (kind, flags) = section_defaults(&name);
        let id = self.sections.get_or_create(&name, ShType(kind), flags);
        self.sections.push_and_switch(id);
        self.skip_to_newline();
        Ok(())
    }

    fn section_name(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Ident(s) => Ok(s),
            Tok::Str(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            other => Err(AsmError::Syntax(format!("expected a section name, found {other:?}"))),
        }
    }
}

enum AlignUnit {
    Bytes,
    Power,
}

fn require_plain(v: ExprValue) -> Result<i64> {
    if v.sym.is_some() {
        Err(AsmError::InvalidOperationWithLabel)
    } else {
        Ok(v.v)
    }
}

fn section_defaults(name: &str) -> (u32, ShFlags) {
    match name {
        ".text" => (SHT_PROGBITS, ShFlags::SHF_ALLOC | ShFlags::SHF_EXECINSTR),
        ".bss" => (SHT_NOBITS, ShFlags::SHF_ALLOC | ShFlags::SHF_WRITE),
        ".rodata" => (SHT_PROGBITS, ShFlags::SHF_ALLOC),
        _ => (SHT_PROGBITS, ShFlags::SHF_ALLOC | ShFlags::SHF_WRITE),
    }
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
    fn byte_word_long_quad_emit_little_endian() {
        let asm = run(".byte 0x12\n.word 0x3456\n.long 0x789abcde\n");
        assert_eq!(
            asm.sections.current().data(),
            &[0x12, 0x56, 0x34, 0xde, 0xbc, 0x9a, 0x78]
        );
    }

    #[test]
    fn align_pads_to_boundary() {
        let asm = run(".byte 1\n.align 4\n");
        assert_eq!(asm.sections.current().data(), &[1, 0, 0, 0]);
    }

    #[test]
    fn p2align_uses_power_of_two() {
        let asm = run(".byte 1\n.p2align 2\n");
        assert_eq!(asm.sections.current().data(), &[1, 0, 0, 0]);
    }

    #[test]
    fn fill_with_nonpositive_repeat_is_noop() {
        let asm = run(".fill -1, 1, 0xff\n.byte 5\n");
        assert_eq!(asm.sections.current().data(), &[5]);
    }

    #[test]
    fn fill_emits_repeated_value() {
        let asm = run(".fill 3, 2, 0xabcd\n");
        assert_eq!(
            asm.sections.current().data(),
            &[0xcd, 0xab, 0xcd, 0xab, 0xcd, 0xab]
        );
    }

    #[test]
    fn rept_replays_body() {
        let asm = run(".rept 3\n.byte 7\n.endr\n");
        assert_eq!(asm.sections.current().data(), &[7, 7, 7]);
    }

    #[test]
    fn ascii_vs_asciz_nul_termination() {
        let asm = run(".ascii \"ab\"\n.asciz \"c\"\n");
        assert_eq!(asm.sections.current().data(), b"abc\0");
    }

    #[test]
    fn globl_sets_global_binding() {
        let asm = run("foo:\n.globl foo\n");
        let id = asm.symbols.find("foo").unwrap();
        assert_eq!(asm.symbols.get(id).binding, asmobj::consts::STB_GLOBAL);
    }
}
