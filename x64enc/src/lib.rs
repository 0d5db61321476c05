#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod insn;
pub mod modrm;
pub mod regs;

pub use crate::error::{EncodeError, Result};
pub use crate::insn::{ArithOp, Condition, FloatWidth, FpArithOp, ShiftOp, SseArithOp};
pub use crate::modrm::{Encoder, Operand};
pub use crate::regs::{Gpr, RegClass, Width, Xmm};
