//! GAS-flavor x86-64 assembler: lexer, expression evaluator, directive engine, and
//! instruction encoder wired around a single-pass [`Assembler`] over
//! [`asmobj::SectionStore`]/[`asmobj::SymbolTable`]. No linker pass: every symbol
//! reference that isn't resolvable within the current object becomes a relocation
//! the caller (`tinyas`, or `cc-asm-bridge` assembling an inline `asm()` block) hands
//! off to [`asmobj::ObjectWriter`].

#![allow(clippy::must_use_candidate)]

pub mod assembler;
pub mod config;
pub mod directive;
pub mod error;
pub mod expr;
pub mod instr;
pub mod lexer;

pub use crate::assembler::{Assembler, LocalLabels};
pub use crate::config::{Abi, TargetConfig};
pub use crate::error::{AsmError, Result};
pub use crate::expr::ExprValue;

/// Assemble a complete `.s` source buffer into the object-model pieces an
/// [`asmobj::ObjectWriter`] can turn into an ELF64 relocatable object.
pub fn assemble(src: &[u8], config: TargetConfig) -> Result<AssembledObject> {
    let mut asm = Assembler::new(config);
    asm.load_source(src)?;
    asm.run()?;
    Ok(AssembledObject {
        sections: asm.sections,
        symbols: asm.symbols,
        relocs: asm.relocs,
    })
}

/// The output of a finished assembly pass: ready to hand to
/// [`asmobj::ObjectWriter::new`].
pub struct AssembledObject {
    pub sections: asmobj::SectionStore,
    pub symbols: asmobj::SymbolTable,
    pub relocs: Vec<asmobj::Relocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_tiny_function() {
        let src = b".globl add_one\nadd_one:\nmov %rdi, %rax\nadd $1, %rax\nret\n";
        let out = assemble(src, TargetConfig::default()).unwrap();
        let id = out.symbols.find("add_one").unwrap();
        assert_eq!(out.symbols.get(id).value, 0);
        assert!(!out.sections.current().data().is_empty());
    }
}
