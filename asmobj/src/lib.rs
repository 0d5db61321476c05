#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod addr;
pub mod consts;
pub mod error;
pub mod reloc;
pub mod section;
pub mod symbol;
pub mod writer;

pub use crate::addr::{Addr, Offset};
pub use crate::error::{ObjError, Result};
pub use crate::reloc::{RelocKind, Relocation};
pub use crate::section::{Contents, Section, SectionId, SectionStore};
pub use crate::symbol::{Symbol, SymbolId, SymbolTable};
pub use crate::writer::ObjectWriter;
