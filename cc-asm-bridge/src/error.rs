//! Errors raised while orchestrating one inline `asm()` statement. Grounded on
//! `tccasm.c`'s `tcc_error` call sites in `asm_parse_operands`/`parse_asm_str`/
//! `subst_asm_operand`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsmBridgeError {
    #[error("asm: too many operands (max {0})")]
    TooManyOperands(usize),
    #[error("asm: unknown output/input constraint `{0}`")]
    UnknownConstraint(String),
    #[error("asm: '=' constraint modifier missing on output operand")]
    OutputMissingEquals,
    #[error("asm: operand constraint `{0}` asks for a register already forced elsewhere")]
    ConstraintConflict(String),
    #[error("asm: unknown clobber register `{0}`")]
    UnknownClobber(String),
    #[error("asm: unterminated %[name] reference in template")]
    UnterminatedNamedRef,
    #[error("asm: unknown named operand `%[{0}]`")]
    UnknownNamedOperand(String),
    #[error("asm: operand index %{0} out of range")]
    OperandIndexOutOfRange(usize),
    #[error("asm: unknown size modifier `%{0}`")]
    UnknownSizeModifier(char),
    #[error("asm: memory-only operand did not resolve to a local slot")]
    ExpectedMemoryOperand,
    #[error(transparent)]
    Codegen(#[from] x64codegen::CodegenError),
    #[error(transparent)]
    Assemble(#[from] gasm::AsmError),
}

pub type Result<T> = std::result::Result<T, AsmBridgeError>;
