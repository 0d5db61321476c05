#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("no free register available in the requested class")]
    NoFreeRegister,
    #[error(transparent)]
    Encode(#[from] x64enc::EncodeError),
    #[error(transparent)]
    Object(#[from] asmobj::ObjError),
    #[error("value stack underflow")]
    StackUnderflow,
    #[error("stack frame exceeds 2^31 bytes")]
    FrameTooLarge,
    #[error("aggregate argument/return wider than 16 bytes must classify as memory")]
    ExpectedMemoryClass,
}

pub type Result<T> = std::result::Result<T, CodegenError>;
