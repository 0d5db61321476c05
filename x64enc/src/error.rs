#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("immediate {0} does not fit a {1:?} operand")]
    ImmediateTooLarge(i64, crate::regs::Width),
}

pub type Result<T> = std::result::Result<T, EncodeError>;
