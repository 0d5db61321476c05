//! Tokenizer for GAS-flavor source text. Plays the role the external C
//! preprocessor/tokenizer plays for the rest of the system (§1's "produces a token
//! stream consumed by the core") but scoped to the handful of token kinds an
//! assembler actually needs: numbers (with the `b`/`f` local-label suffix), strings,
//! characters, identifiers/directives/mnemonics, registers, and punctuation.
//!
//! GAS source is not guaranteed UTF-8 (string/`.ascii` payloads are raw bytes), so the
//! lexer works over `&BStr` throughout.

use bstr::{BStr, ByteSlice};

use crate::error::{AsmError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// A preprocessor-number literal, already parsed, with an optional `b`/`f` local
    /// label suffix (§4.3's "`Nb`/`Nf` local-label backward/forward suffix").
    Number { value: u64, suffix: Option<char> },
    /// A bare identifier: a label, a mnemonic, or (starting with `.`) a directive.
    Ident(String),
    /// `%reg` — register name, without the leading `%`.
    Register(String),
    Str(Vec<u8>),
    Char(i64),
    Dollar,
    Colon,
    Comma,
    LParen,
    RParen,
    Dot,
    Plus,
    Minus,
    Tilde,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Amp,
    Pipe,
    Caret,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Newline,
    Eof,
}

pub struct Lexer<'a> {
    src: &'a BStr,
    pos: usize,
    pub line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self {
            src: src.as_bstr(),
            pos: 0,
            line: 1,
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    /// Skip spaces/tabs and `#`/`//`/`/* */` comments, but stop at a newline: the
    /// caller needs `Newline` tokens to delimit statements.
    fn skip_intraline_trivia(&mut self) {
        loop {
            match self.peek_byte() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.pos += 1;
                }
                Some(b'#') => {
                    while !matches!(self.peek_byte(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek_byte(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.pos += 2;
                    while !(self.peek_byte().is_none()
                        || (self.peek_byte() == Some(b'*') && self.peek_at(1) == Some(b'/')))
                    {
                        self.bump();
                    }
                    self.pos += 2;
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Tok> {
        self.skip_intraline_trivia();
        let Some(b) = self.peek_byte() else {
            return Ok(Tok::Eof);
        };
        match b {
            b'\n' => {
                self.bump();
                Ok(Tok::Newline)
            }
            b';' => {
                self.bump();
                Ok(Tok::Newline)
            }
            b'0'..=b'9' => self.lex_number(),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_alphabetic()) => {
                self.pos += 1;
                let ident = self.lex_ident_chars();
                Ok(Tok::Ident(format!(".{ident}")))
            }
            b'.' => {
                self.pos += 1;
                Ok(Tok::Dot)
            }
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => Ok(Tok::Ident(self.lex_ident_chars())),
            b'%' if self.peek_at(1).is_some_and(|c| c.is_ascii_alphabetic()) => {
                self.pos += 1;
                Ok(Tok::Register(self.lex_ident_chars()))
            }
            b'%' => {
                self.bump();
                Ok(Tok::Percent)
            }
            b'$' => {
                self.bump();
                Ok(Tok::Dollar)
            }
            b':' => {
                self.bump();
                Ok(Tok::Colon)
            }
            b',' => {
                self.bump();
                Ok(Tok::Comma)
            }
            b'(' => {
                self.bump();
                Ok(Tok::LParen)
            }
            b')' => {
                self.bump();
                Ok(Tok::RParen)
            }
            b'+' => {
                self.bump();
                Ok(Tok::Plus)
            }
            b'~' => {
                self.bump();
                Ok(Tok::Tilde)
            }
            b'*' => {
                self.bump();
                Ok(Tok::Star)
            }
            b'/' => {
                self.bump();
                Ok(Tok::Slash)
            }
            b'&' => {
                self.bump();
                Ok(Tok::Amp)
            }
            b'|' => {
                self.bump();
                Ok(Tok::Pipe)
            }
            b'^' => {
                self.bump();
                Ok(Tok::Caret)
            }
            b'-' => {
                self.bump();
                Ok(Tok::Minus)
            }
            b'<' => {
                self.bump();
                if self.peek_byte() == Some(b'<') {
                    self.bump();
                    Ok(Tok::Shl)
                } else if self.peek_byte() == Some(b'=') {
                    self.bump();
                    Ok(Tok::Le)
                } else {
                    Ok(Tok::Lt)
                }
            }
            b'>' => {
                self.bump();
                if self.peek_byte() == Some(b'>') {
                    self.bump();
                    Ok(Tok::Shr)
                } else if self.peek_byte() == Some(b'=') {
                    self.bump();
                    Ok(Tok::Ge)
                } else {
                    Ok(Tok::Gt)
                }
            }
            b'=' => {
                self.bump();
                if self.peek_byte() == Some(b'=') {
                    self.bump();
                }
                Ok(Tok::Eq)
            }
            b'!' => {
                self.bump();
                if self.peek_byte() == Some(b'=') {
                    self.bump();
                }
                Ok(Tok::Ne)
            }
            b'"' => self.lex_string(),
            b'\'' => self.lex_char(),
            // `.type foo, @function` / `@object`: GNU-as's symbol-type sigil.
            b'@' => {
                self.pos += 1;
                let ident = self.lex_ident_chars();
                Ok(Tok::Ident(format!("@{ident}")))
            }
            other => Err(AsmError::Lexical(format!(
                "unexpected byte 0x{other:02x} at line {}",
                self.line
            ))),
        }
    }

    fn lex_ident_chars(&mut self) -> String {
        let start = self.pos;
        while self
            .peek_byte()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || c == b'$')
        {
            self.pos += 1;
        }
        self.src[start..self.pos].to_str_lossy().into_owned()
    }

    fn lex_number(&mut self) -> Result<Tok> {
        let start = self.pos;
        if self.peek_byte() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X'))
        {
            self.pos += 2;
            while self.peek_byte().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let text = self.src[start + 2..self.pos].to_str_lossy();
            let value = u64::from_str_radix(&text, 16)
                .map_err(|_| AsmError::Lexical("bad hex literal".into()))?;
            return Ok(Tok::Number {
                value,
                suffix: self.maybe_local_label_suffix(),
            });
        }
        while self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = self.src[start..self.pos].to_str_lossy();
        let radix = if text.len() > 1 && text.starts_with('0') {
            8
        } else {
            10
        };
        let value = u64::from_str_radix(&text, radix)
            .map_err(|_| AsmError::Lexical(format!("bad number literal `{text}`")))?;
        Ok(Tok::Number {
            value,
            suffix: self.maybe_local_label_suffix(),
        })
    }

    fn maybe_local_label_suffix(&mut self) -> Option<char> {
        match self.peek_byte() {
            Some(b'b') | Some(b'f') if !self.peek_at(1).is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') => {
                let c = self.bump().unwrap() as char;
                Some(c)
            }
            _ => None,
        }
    }

    fn lex_string(&mut self) -> Result<Tok> {
        self.bump();
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                None => return Err(AsmError::Lexical("unterminated string".into())),
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => bytes.push(b'\n'),
                    Some(b't') => bytes.push(b'\t'),
                    Some(b'0') => bytes.push(0),
                    Some(b'\\') => bytes.push(b'\\'),
                    Some(b'"') => bytes.push(b'"'),
                    Some(other) => bytes.push(other),
                    None => return Err(AsmError::Lexical("unterminated string".into())),
                },
                Some(b) => bytes.push(b),
            }
        }
        Ok(Tok::Str(bytes))
    }

    fn lex_char(&mut self) -> Result<Tok> {
        self.bump();
        let value = match self.bump() {
            Some(b'\\') => match self.bump() {
                Some(b'n') => b'\n' as i64,
                Some(b't') => b'\t' as i64,
                Some(b'0') => 0,
                Some(other) => other as i64,
                None => return Err(AsmError::Lexical("unterminated char literal".into())),
            },
            Some(b) => b as i64,
            None => return Err(AsmError::Lexical("unterminated char literal".into())),
        };
        if self.bump() != Some(b'\'') {
            return Err(AsmError::Lexical("unterminated char literal".into()));
        }
        Ok(Tok::Char(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<Tok> {
        let mut lexer = Lexer::new(src.as_bytes());
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            let done = tok == Tok::Eof;
            out.push(tok);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_local_label_suffixes() {
        let toks = lex_all("1b\n2f");
        assert_eq!(
            toks[0],
            Tok::Number {
                value: 1,
                suffix: Some('b')
            }
        );
        assert_eq!(
            toks[2],
            Tok::Number {
                value: 2,
                suffix: Some('f')
            }
        );
    }

    #[test]
    fn lexes_register_and_immediate() {
        let toks = lex_all("movq $0x10, %rax");
        assert_eq!(toks[0], Tok::Ident("movq".into()));
        assert_eq!(toks[1], Tok::Dollar);
        assert_eq!(
            toks[2],
            Tok::Number {
                value: 0x10,
                suffix: None
            }
        );
        assert_eq!(toks[4], Tok::Register("rax".into()));
    }

    #[test]
    fn lexes_directive_with_leading_dot() {
        let toks = lex_all(".globl main");
        assert_eq!(toks[0], Tok::Ident(".globl".into()));
    }

    #[test]
    fn skips_comments() {
        let toks = lex_all("nop # comment\nret");
        assert_eq!(toks[0], Tok::Ident("nop".into()));
        assert_eq!(toks[1], Tok::Newline);
        assert_eq!(toks[2], Tok::Ident("ret".into()));
    }

    #[test]
    fn hash_vs_immediate_disambiguated_by_dollar_not_hash() {
        let toks = lex_all("$-1");
        assert_eq!(toks[0], Tok::Dollar);
        assert_eq!(toks[1], Tok::Minus);
        assert_eq!(
            toks[2],
            Tok::Number {
                value: 1,
                suffix: None
            }
        );
    }
}
