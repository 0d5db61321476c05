#[derive(Debug, thiserror::Error)]
pub enum AsmError {
    #[error("{0}")]
    Lexical(String),
    #[error("{0}")]
    Syntax(String),
    #[error("invalid operation with label")]
    InvalidOperationWithLabel,
    #[error("division by zero")]
    DivisionByZero,
    #[error("local label '{0}' not found backward")]
    LocalLabelNotFoundBackward(u64),
    #[error("alignment must be a positive power of two")]
    BadAlignment,
    #[error("invalid p2align, must be between 0 and 30")]
    BadP2Align,
    #[error("attempt to .org backwards")]
    OrgBackwards,
    #[error(".org target must be a constant or a same-section symbol")]
    OrgNotSameSection,
    #[error("`.popsection` with no matching `.pushsection`")]
    EmptySectionStack,
    #[error("we hit end of file, .endr not found")]
    UnterminatedRept,
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("unknown directive `{0}`")]
    UnknownDirective(String),
    #[error("unknown register `{0}`")]
    UnknownRegister(String),
    #[error("expected {0}")]
    Expected(&'static str),
    #[error(transparent)]
    Object(#[from] asmobj::ObjError),
    #[error(transparent)]
    Encode(#[from] x64enc::EncodeError),
}

pub type Result<T> = std::result::Result<T, AsmError>;
