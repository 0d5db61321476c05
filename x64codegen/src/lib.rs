//! The value-stack code generator and ABI lowering (§4.7/§4.8): `CodeGen`, its
//! register/stack-frame bookkeeping, and the System V/Windows x64 calling-convention
//! front ends built on top of it. Grounded throughout in `x86_64-gen.c`.

pub mod abi;
pub mod ctype;
pub mod error;
pub mod gen;
pub mod regfile;
pub mod value;

pub use ctype::{classify_arg, ArgClass, CType, IntWidth, Mode, StructField, StructLayout};
pub use error::{CodegenError, Result};
pub use gen::{CodeGen, IntOp};
pub use regfile::RegFile;
pub use value::{ConstBits, RegSlot, SValue};
