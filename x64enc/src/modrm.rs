//! ModR/M emission and the shared `Encoder` both the assembler front end and the
//! value-stack code generator emit instructions through.
//!
//! Grounded in `x86_64-gen.c`'s `gen_modrm_impl`/`gen_modrm`/`gen_modrm64`: the same
//! four base forms (constant/RIP-relative, local/rbp-relative, register-indirect,
//! register-direct) drive every instruction this crate knows how to emit.

use asmobj::{RelocKind, Relocation, SectionId, SectionStore, SymbolId};

use crate::regs::{Gpr, Xmm};

/// Where an operand's value comes from, for the purposes of ModR/M encoding.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    /// Register-direct (`mod=11`).
    Reg(Gpr),
    /// Register-direct, XMM (`mod=11`, SSE reg-reg forms).
    XmmReg(Xmm),
    /// `[rbp+disp]`, the code generator's spill-slot/local-variable form.
    Local { disp: i32 },
    /// `[base]` or `[base+disp32]`, register-indirect.
    Mem { base: Gpr, disp: i32 },
    /// A symbol (plus optional displacement), addressed RIP-relative. `non_static`
    /// selects GOT-indirection on ELF (`x86_64-gen.c`'s `is_got` test).
    Const {
        symbol: Option<SymbolId>,
        disp: i32,
        non_static: bool,
    },
}

/// Shared output sink: both `gasm` and `x64codegen` hold one `SectionStore` and one
/// relocation list and emit every instruction through an `Encoder` borrowing them.
pub struct Encoder<'a> {
    pub sections: &'a mut SectionStore,
    pub relocs: &'a mut Vec<Relocation>,
}

impl<'a> Encoder<'a> {
    pub fn new(sections: &'a mut SectionStore, relocs: &'a mut Vec<Relocation>) -> Self {
        Self { sections, relocs }
    }

    fn here(&self) -> (SectionId, u64) {
        let id = self.sections.current_id();
        (id, self.sections.current().position())
    }

    fn record_reloc(&mut self, symbol: SymbolId, kind: RelocKind, addend: i64) {
        let (section, offset) = self.here();
        self.relocs.push(Relocation {
            section,
            offset,
            symbol,
            kind,
            addend,
        });
    }

    /// REX prefix (`orex`): emitted whenever `w` is set or either field needs the
    /// extension bit, followed unconditionally by `opcode`.
    pub fn rex(&mut self, w: bool, reg: Option<Gpr>, rm: Option<Gpr>, opcode: u8) {
        let rex_r = reg.is_some_and(Gpr::needs_rex_extension);
        let rex_b = rm.is_some_and(Gpr::needs_rex_extension);
        if w || rex_r || rex_b {
            self.sections
                .emit_u8(0x40 | ((w as u8) << 3) | ((rex_r as u8) << 2) | (rex_b as u8));
        }
        self.sections.emit_u8(opcode);
    }

    pub fn emit(&mut self, byte: u8) {
        self.sections.emit_u8(byte);
    }

    pub fn emit_le32(&mut self, v: i32) {
        self.sections.emit_le32(v as u32);
    }

    pub fn emit_le64(&mut self, v: i64) {
        self.sections.emit_le64(v as u64);
    }

    /// `gen_modrm`: `reg_field` carries the opcode-extension/register bits that go in
    /// ModR/M's `reg` field; `operand` is one of the four base forms above.
    pub fn gen_modrm(&mut self, reg_field: u8, operand: Operand) {
        let op_reg = (reg_field & 7) << 3;
        match operand {
            Operand::Const {
                symbol,
                disp,
                non_static,
            } => {
                self.emit(0x05 | op_reg);
                if let Some(sym) = symbol {
                    let kind = if non_static {
                        RelocKind::GotPcRel
                    } else {
                        RelocKind::Pc32
                    };
                    self.record_reloc(sym, kind, disp as i64 - 4);
                    self.emit_le32(0);
                    if non_static && disp != 0 {
                        // `add $disp, %reg` after the GOT load, same as `gen_gotpcrel`'s
                        // trailing `orex(1, r, 0, 0x81); o(0xc0+...); gen_le32(c)`.
                        self.rex(true, None, None, 0x81);
                        self.emit(0xc0 | (reg_field & 7));
                        self.emit_le32(disp);
                    }
                } else {
                    self.emit_le32(disp - 4);
                }
            }
            Operand::Local { disp } => {
                if let Ok(d8) = i8::try_from(disp) {
                    self.emit(0x45 | op_reg);
                    self.emit(d8 as u8);
                } else {
                    self.emit(0x85 | op_reg);
                    self.emit_le32(disp);
                }
            }
            Operand::Mem { base, disp } => {
                let needs_disp8_zero = disp == 0 && base.aliases_rip_relative_encoding();
                if disp != 0 || needs_disp8_zero {
                    let d8 = if needs_disp8_zero { 0 } else { disp };
                    if let Ok(byte) = i8::try_from(d8) {
                        self.emit(0x40 | op_reg | base.field());
                        self.emit(byte as u8);
                    } else {
                        self.emit(0x80 | op_reg | base.field());
                        self.emit_le32(d8);
                    }
                } else {
                    self.emit(op_reg | base.field());
                }
            }
            Operand::Reg(r) => {
                self.emit(0xc0 | op_reg | r.field());
            }
            Operand::XmmReg(x) => {
                self.emit(0xc0 | op_reg | x.field());
            }
        }
    }

    /// `gen_modrm64`: like `gen_modrm`, but also emits the REX prefix first and folds in
    /// the GOT-vs-RIP decision for a constant base (`is_got` in the original).
    pub fn gen_modrm64(&mut self, opcode: u8, reg_field: Gpr, operand: Operand, is_64: bool) {
        let rm = match operand {
            Operand::Mem { base, .. } => Some(base),
            _ => None,
        };
        self.rex(is_64, Some(reg_field), rm, opcode);
        self.gen_modrm(reg_field.field(), operand);
    }

    /// REX emission for an SSE instruction whose `reg` field is an XMM register and
    /// whose `rm` side is either another XMM register or a GPR-based memory operand.
    pub fn rex_xmm(&mut self, w: bool, reg: Xmm, operand: Operand, opcode_bytes: &[u8]) {
        let rex_r = reg.needs_rex_extension();
        let rex_b = match operand {
            Operand::XmmReg(x) => x.needs_rex_extension(),
            Operand::Mem { base, .. } => base.needs_rex_extension(),
            _ => false,
        };
        if w || rex_r || rex_b {
            self.sections
                .emit_u8(0x40 | ((w as u8) << 3) | ((rex_r as u8) << 2) | (rex_b as u8));
        }
        for &b in opcode_bytes {
            self.sections.emit_u8(b);
        }
    }

    /// REX emission for an SSE instruction moving a value between an XMM register and
    /// a GPR (`movq`/`movd` reg-reg forms, `cvtsi2sd`'s integer source).
    pub fn rex_xmm_gpr(&mut self, w: bool, xmm: Xmm, gpr: Gpr, opcode_bytes: &[u8]) {
        let rex_r = xmm.needs_rex_extension();
        let rex_b = gpr.needs_rex_extension();
        if w || rex_r || rex_b {
            self.sections
                .emit_u8(0x40 | ((w as u8) << 3) | ((rex_r as u8) << 2) | (rex_b as u8));
        }
        for &b in opcode_bytes {
            self.sections.emit_u8(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmobj::SectionStore;

    #[test]
    fn register_direct_needs_no_relocation() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.gen_modrm(0, Operand::Reg(Gpr::Rcx));
        assert!(relocs.is_empty());
        assert_eq!(sections.current().data(), &[0xc1]);
    }

    #[test]
    fn local_with_small_disp_uses_8_bit_form() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.gen_modrm(0, Operand::Local { disp: -8 });
        assert_eq!(sections.current().data(), &[0x45, 0xf8]);
    }

    #[test]
    fn local_with_large_disp_uses_32_bit_form() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.gen_modrm(0, Operand::Local { disp: 1000 });
        assert_eq!(sections.current().data()[0], 0x85);
        assert_eq!(sections.current().data().len(), 5);
    }

    #[test]
    fn mem_base_rbp_zero_disp_forces_disp8() {
        let mut sections = SectionStore::new();
        let mut relocs = Vec::new();
        let mut enc = Encoder::new(&mut sections, &mut relocs);
        enc.gen_modrm(0, Operand::Mem { base: Gpr::Rbp, disp: 0 });
        assert_eq!(sections.current().data(), &[0x45, 0x00]);
    }
}
