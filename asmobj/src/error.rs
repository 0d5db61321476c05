use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ObjError {
    #[error("symbol `{0}` is already defined and cannot be redefined")]
    DuplicateDefinition(String),
    #[error("symbol `{0}` is not defined")]
    UndefinedSymbol(String),
    #[error("section `{0}` was never created")]
    UnknownSection(String),
    #[error("`.previous` with no prior `.pushsection`/`.section`")]
    EmptySectionStack,
    #[error("too many {0} for a 16/32-bit ELF field")]
    TooMany(&'static str),
    #[error("writer IO error")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ObjError>;
