//! The top-level assembler state: token cursor plus the object-model pieces every
//! other module in this crate (`expr`, `directive`, `instr`) operates on. Grounded in
//! `tccasm.c`'s `tcc_assemble_internal`, which drives the same loop (read a directive
//! keyword or a mnemonic, dispatch, repeat until `TOK_EOF`) over a single shared
//! `TCCState`.

use std::collections::HashMap;

use asmobj::{Relocation, SectionId, SectionStore, Symbol, SymbolId, SymbolTable};

use crate::config::TargetConfig;
use crate::error::{AsmError, Result};
use crate::lexer::{Lexer, Tok};

/// Tracks each numeric local label's definition history (for `Nb`) and any
/// not-yet-defined forward reference (for `Nf`). See §4.3's "Local numeric labels".
#[derive(Default)]
pub struct LocalLabels {
    defined: HashMap<u64, Vec<SymbolId>>,
    pending_forward: HashMap<u64, String>,
    counter: u32,
}

impl LocalLabels {
    fn fresh_name(&mut self, n: u64) -> String {
        self.counter += 1;
        format!(".L{n}~{}", self.counter)
    }

    /// `Nb`: the most recent prior definition, or an error if there is none.
    pub fn backward(&self, n: u64) -> Option<SymbolId> {
        self.defined.get(&n).and_then(|v| v.last().copied())
    }

    /// `Nf`: reuse a pending forward declaration for `n` if one is outstanding,
    /// otherwise allocate a fresh synthetic name that a later `n:` will define.
    pub fn forward(&mut self, n: u64, symbols: &mut SymbolTable) -> SymbolId {
        if let Some(name) = self.pending_forward.get(&n) {
            return symbols.get_or_declare(name);
        }
        let name = self.fresh_name(n);
        let id = symbols.get_or_declare(&name);
        self.pending_forward.insert(n, name);
        id
    }

    /// `n:` — resolve any pending forward reference to this definition, or mint a
    /// fresh synthetic name if none was pending.
    pub fn definition_name(&mut self, n: u64) -> String {
        if let Some(name) = self.pending_forward.remove(&n) {
            return name;
        }
        self.fresh_name(n)
    }

    pub fn record_defined(&mut self, n: u64, id: SymbolId) {
        self.defined.entry(n).or_default().push(id);
    }
}

pub struct Assembler {
    pub tokens: Vec<Tok>,
    pub pos: usize,
    pub sections: SectionStore,
    pub symbols: SymbolTable,
    pub relocs: Vec<Relocation>,
    pub locals: LocalLabels,
    pub config: TargetConfig,
}

impl Assembler {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            tokens: Vec::new(),
            pos: 0,
            sections: SectionStore::new(),
            symbols: SymbolTable::new(config.leading_underscore),
            relocs: Vec::new(),
            locals: LocalLabels::default(),
            config,
        }
    }

    /// Runs over object-model state a caller already owns instead of a fresh one —
    /// `cc-asm-bridge` uses this to assemble a substituted inline-`asm()` template
    /// into the same sections/symbol table the surrounding compilation is using, so
    /// labels and symbol references inside the template resolve in the shared
    /// namespace rather than a throwaway one.
    pub fn with_state(sections: SectionStore, symbols: SymbolTable, relocs: Vec<Relocation>, config: TargetConfig) -> Self {
        Self {
            tokens: Vec::new(),
            pos: 0,
            sections,
            symbols,
            relocs,
            locals: LocalLabels::default(),
            config,
        }
    }

    /// Lex the whole input up front into an owned token buffer. `.rept`/`.endr`
    /// replay a captured slice of this same buffer (§4.4) rather than re-lexing text.
    pub fn load_source(&mut self, src: &[u8]) -> Result<()> {
        let mut lexer = Lexer::new(src);
        loop {
            let tok = lexer.next_token()?;
            let done = tok == Tok::Eof;
            self.tokens.push(tok);
            if done {
                break;
            }
        }
        Ok(())
    }

    pub fn peek(&self) -> &Tok {
        &self.tokens[self.pos]
    }

    pub fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens.get(self.pos + offset).unwrap_or(&Tok::Eof)
    }

    pub fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    pub fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.advance();
        }
    }

    pub fn expect_comma(&mut self) -> Result<()> {
        if matches!(self.peek(), Tok::Comma) {
            self.advance();
            Ok(())
        } else {
            Err(AsmError::Expected("`,`"))
        }
    }

    pub fn expect_rparen(&mut self) -> Result<()> {
        if matches!(self.peek(), Tok::RParen) {
            self.advance();
            Ok(())
        } else {
            Err(AsmError::Expected("`)`"))
        }
    }

    /// The ident or register word for `.set name, ...`/`.globl name`/mnemonic operand
    /// position, whichever token kind is expected in context.
    pub fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Ident(s) => Ok(s),
            _ => Err(AsmError::Expected("identifier")),
        }
    }

    /// Drive the whole token buffer: each statement is either a label definition
    /// (`ident:`), a directive (`.xxx`), or an instruction mnemonic, separated by
    /// newlines. Mirrors `tcc_assemble_internal`'s per-statement dispatch loop.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.skip_newlines();
            if matches!(self.peek(), Tok::Eof) {
                break;
            }
            self.statement()?;
        }
        Ok(())
    }

    pub(crate) fn statement(&mut self) -> Result<()> {
        match self.peek().clone() {
            Tok::Ident(word) if word.starts_with('.') => {
                self.advance();
                self.directive(&word)
            }
            Tok::Ident(word) => {
                // `ident:` is a label definition; otherwise it's a mnemonic.
                if matches!(self.peek_at(1), Tok::Colon) {
                    self.advance();
                    self.advance();
                    self.define_label(&word)
                } else {
                    self.advance();
                    self.instruction(&word)
                }
            }
            Tok::Number {
                value,
                suffix: None,
            } if matches!(self.peek_at(1), Tok::Colon) => {
                self.advance();
                self.advance();
                self.define_local_label(value)
            }
            other => Err(AsmError::Syntax(format!("unexpected token {other:?}"))),
        }
    }

    fn define_label(&mut self, name: &str) -> Result<()> {
        let section = self.sections.current_id();
        let value = self.sections.current().position();
        tracing::trace!(name, value, "defining label");
        self.symbols
            .define(name, section, value, asmobj::consts::SymbolType(asmobj::consts::STT_NOTYPE))?;
        Ok(())
    }

    fn define_local_label(&mut self, n: u64) -> Result<()> {
        let name = self.locals.definition_name(n);
        let section = self.sections.current_id();
        let value = self.sections.current().position();
        let id = self
            .symbols
            .define(&name, section, value, asmobj::consts::SymbolType(asmobj::consts::STT_NOTYPE))?;
        self.locals.record_defined(n, id);
        Ok(())
    }

    pub fn symbol_ref(&self, id: SymbolId) -> &Symbol {
        self.symbols.get(id)
    }

    /// The symbol `.` evaluates against (`tccasm.c`'s `asm_section_sym`): an
    /// `STT_SECTION` symbol bound to offset 0 of `section`, created once per section
    /// and cached by a name derived from the section's own name so repeated `.`
    /// references in the same section share one symbol.
    pub(crate) fn section_symbol(&mut self, section: SectionId) -> SymbolId {
        let name = format!(".secsym.{}", self.sections.section(section).name);
        let id = self.symbols.get_or_declare(&name);
        if !self.symbols.get(id).defined {
            self.symbols
                .define(&name, section, 0, asmobj::consts::SymbolType(asmobj::consts::STT_SECTION))
                .expect("freshly minted section-symbol label can't already be defined");
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_label_defines_at_current_position() {
        let mut asm = Assembler::new(TargetConfig::default());
        asm.load_source(b"foo:\n").unwrap();
        asm.run().unwrap();
        let id = asm.symbols.find("foo").unwrap();
        assert_eq!(asm.symbols.get(id).value, 0);
    }
}
