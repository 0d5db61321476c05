//! Inline `asm()` orchestration (§4.5): the seam where the standalone assembler
//! (`gasm`) and the value-stack code generator (`x64codegen`) meet. A C front end
//! (out of this crate's scope — see `x64codegen::ctype`'s own note on the same
//! boundary) hands this crate an already-evaluated [`AsmStatement`]; from there
//! this crate owns constraint resolution, template substitution, assembling the
//! substituted text, and storing outputs back to their lvalues.
//!
//! Grounded throughout in `tccasm.c`'s `asm_instr`/`parse_asm_operands`/
//! `subst_asm_operands`/`asm_compute_constraints`.

pub mod constraints;
pub mod error;
pub mod operand;
pub mod template;

pub use error::{AsmBridgeError, Result};
pub use operand::{AsmOperand, Constraint, ConstraintKind, OperandDecl};

use asmobj::SymbolTable;
use gasm::{Assembler, TargetConfig};
use x64codegen::{CodeGen, RegClass, RegSlot, SValue};

use crate::constraints::{gpr_from_clobber_name, is_pseudo_clobber};
use crate::template::substitute;

/// A generous bound on one `asm()` statement's total operand count, matching the
/// original's fixed-size `ASMOperand` array.
pub const MAX_ASM_OPERANDS: usize = 30;

/// One inline `asm [volatile] ( template : outputs : inputs : clobbers )`
/// statement, already parsed down to its operand list. `volatile` is accepted for
/// parity with the grammar but has no effect on this crate's own pipeline — it is
/// the (out-of-scope) optimizer's signal to not reorder or elide the statement,
/// and this generator never reorders code it has already emitted.
pub struct AsmStatement {
    pub volatile: bool,
    pub template: String,
    pub outputs: Vec<OperandDecl>,
    pub inputs: Vec<OperandDecl>,
    pub clobbers: Vec<String>,
}

/// Runs the full pipeline for one `asm()` statement against `gen`'s shared
/// object-model state, assembling the substituted template with `config`.
pub fn run_inline_asm(gen: &mut CodeGen, config: TargetConfig, stmt: AsmStatement) -> Result<()> {
    let total = stmt.outputs.len() + stmt.inputs.len();
    if total > MAX_ASM_OPERANDS {
        return Err(AsmBridgeError::TooManyOperands(MAX_ASM_OPERANDS));
    }

    // Step 2: flush every live register-resident value before this statement
    // claims any registers of its own.
    gen.save_regs(0)?;

    // Step 3 (reservation half): a specific-register constraint or a clobber name
    // claims its register ahead of the generic allocator, by spilling whatever
    // (nothing, at this point, but future operands could collide) currently
    // occupies it.
    let mut reserved = Vec::new();
    for decl in stmt.outputs.iter().chain(stmt.inputs.iter()) {
        if let Ok(c) = Constraint::parse(&decl.constraint, false) {
            if let ConstraintKind::SpecificGpr(g) = c.kind {
                reserved.push(g);
            }
        }
    }
    for name in &stmt.clobbers {
        if is_pseudo_clobber(name) {
            continue;
        }
        let g = gpr_from_clobber_name(name).ok_or_else(|| AsmBridgeError::UnknownClobber(name.clone()))?;
        reserved.push(g);
    }
    for g in &reserved {
        gen.save_reg(RegSlot::Int(*g))?;
    }

    let mut operands = Vec::with_capacity(total);
    let mut writebacks = Vec::new();

    // Outputs are numbered before inputs, matching the original's ASMOperand
    // array layout, so %0.. refers to outputs first.
    for (id, decl) in stmt.outputs.into_iter().enumerate() {
        let constraint = Constraint::parse(&decl.constraint, true)?;
        let original = decl.value.clone();
        let bound = bind_operand(gen, id, decl, constraint)?;
        writebacks.push((bound.vstack_idx, original));
        operands.push(bound);
    }
    let input_base = operands.len();
    for (i, decl) in stmt.inputs.into_iter().enumerate() {
        let constraint = Constraint::parse(&decl.constraint, false)?;
        let bound = bind_operand(gen, input_base + i, decl, constraint)?;
        operands.push(bound);
    }

    // Step 4: render the template against the now-bound operands.
    let rendered = substitute(&stmt.template, &operands, gen)?;

    // Step 5: inject the rendered text into the assembler over the same
    // section/symbol/relocation state `gen` already owns, so labels and symbol
    // references inside the template resolve in the surrounding compilation's
    // namespace rather than a throwaway one. `gen` only ever borrows these three
    // collections, so they are swapped out for the run and swapped back in,
    // win or lose.
    let before_section = gen.sections.current_id();
    let sections = std::mem::take(gen.sections);
    let relocs = std::mem::take(gen.relocs);
    let symbols = std::mem::replace(gen.symbols, SymbolTable::new(config.leading_underscore));
    let mut asm = Assembler::with_state(sections, symbols, relocs, config);
    asm.load_source(rendered.as_bytes())?;
    let run_result = asm.run();
    *gen.sections = asm.sections;
    *gen.relocs = asm.relocs;
    *gen.symbols = asm.symbols;
    run_result?;

    // Step 6 (section rollback): an asm block that left a different section
    // selected is restored, with a warning, rather than leaking the switch into
    // whatever code follows.
    if gen.sections.current_id() != before_section {
        tracing::warn!("inline asm changed the current section; restoring it");
        gen.sections.switch_to(before_section);
    }

    // Step 6 (store-back): every output's final register content is written to
    // its original lvalue before any operand is popped, so the popped entry's
    // index stays valid for the read.
    for (idx, original) in writebacks.iter().rev() {
        let slot = match &gen.vstack[*idx] {
            SValue::Reg { slot, .. } | SValue::RegIndirect { slot, .. } => Some(*slot),
            _ => None,
        };
        if let Some(slot) = slot {
            gen.store_to(slot, original)?;
        }
    }

    // Every operand is released top-down (LIFO, matching push order): spill
    // whatever register it still claims to a throwaway local before popping, so
    // the register file never carries a claim against a vstack index that no
    // longer exists.
    for op in operands.into_iter().rev() {
        release_operand(gen, op.vstack_idx)?;
    }

    Ok(())
}

fn bind_operand(gen: &mut CodeGen, id: usize, decl: OperandDecl, constraint: Constraint) -> Result<AsmOperand> {
    let ty = decl.value.ty();
    gen.push(decl.value);
    let idx = gen.vstack.len() - 1;
    match constraint.kind {
        ConstraintKind::Memory => {
            // Step 1's "materialize into a register unless the constraint has
            // 'm'" rule, read the other way: an 'm' constraint leaves the
            // operand exactly as the front end supplied it. It must already be
            // addressable; this crate does not spill a register-resident value
            // to memory just to satisfy a memory constraint it was never given.
            if !matches!(gen.vstack[idx], SValue::Local { .. } | SValue::IndirectLocal { .. }) {
                return Err(AsmBridgeError::ExpectedMemoryOperand);
            }
        }
        ConstraintKind::Immediate => {}
        ConstraintKind::SpecificGpr(g) => {
            gen.force_into(idx, RegSlot::Int(g))?;
        }
        ConstraintKind::AnyGpr => {
            gen.gv(RegClass::INT)?;
        }
        ConstraintKind::AnyXmm => {
            gen.gv(RegClass::FLOAT)?;
        }
    }
    Ok(AsmOperand { id, name: decl.name, constraint, vstack_idx: idx, ty })
}

/// Spills whatever register `idx` still occupies to a fresh local before popping
/// it, since [`x64codegen::CodeGen::release`] is crate-private to `x64codegen` and
/// this crate has no other way to clear the register file's claim without leaving
/// it pointing at an index that is about to stop existing. The spill itself is
/// throwaway — its only purpose is the claim release `save_reg` performs as a
/// side effect — which costs a little dead code but nothing else.
fn release_operand(gen: &mut CodeGen, idx: usize) -> Result<()> {
    let slot = match &gen.vstack[idx] {
        SValue::Reg { slot, .. } | SValue::RegIndirect { slot, .. } => Some(*slot),
        _ => None,
    };
    if let Some(slot) = slot {
        gen.save_reg(slot)?;
    }
    gen.pop()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmobj::{SectionStore, SymbolTable as Symbols};
    use x64codegen::CType;

    #[test]
    fn too_many_operands_is_rejected_before_any_binding_happens() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = Symbols::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let outputs = (0..MAX_ASM_OPERANDS + 1)
            .map(|_| OperandDecl::new("=r", SValue::Const { bits: x64codegen::ConstBits::from_i64(0), ty: CType::Pointer }))
            .collect();
        let stmt = AsmStatement {
            volatile: false,
            template: String::new(),
            outputs,
            inputs: Vec::new(),
            clobbers: Vec::new(),
        };
        let err = run_inline_asm(&mut gen, TargetConfig::default(), stmt).unwrap_err();
        assert!(matches!(err, AsmBridgeError::TooManyOperands(_)));
    }

    #[test]
    fn a_single_input_bound_to_rdi_assembles_and_releases_its_register() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut symbols = Symbols::new(false);
        let mut gen = CodeGen::new(&mut sections, &mut relocs, &mut symbols);
        let depth_before = gen.vstack.len();
        let stmt = AsmStatement {
            volatile: false,
            template: "nop".to_string(),
            outputs: Vec::new(),
            inputs: vec![OperandDecl::new(
                "D",
                SValue::Const { bits: x64codegen::ConstBits::from_i64(7), ty: CType::Pointer },
            )],
            clobbers: vec!["memory".to_string()],
        };
        run_inline_asm(&mut gen, TargetConfig::default(), stmt).unwrap();
        assert_eq!(gen.vstack.len(), depth_before);
    }
}
