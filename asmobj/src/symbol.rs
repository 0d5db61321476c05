//! The symbol table shared by the assembler front end and the code generator.
//!
//! Grounded in TinyCC's `asm_label_find`/`asm_label_push`/`get_asm_sym`/`asm_new_label1`
//! (`tccasm.c`): a symbol can be referenced (as undefined/extern) before it is defined,
//! but a symbol already carrying a real definition can only be redefined if it was
//! produced by `.set` (tagged `overridable` below, TinyCC's `ST_ASM_SET`/`VT_EXTERN` dance).

use indexmap::IndexMap;

use crate::consts::{
    SymbolBinding, SymbolType, SymbolVisibility, STB_GLOBAL, STB_LOCAL, STB_WEAK, STT_NOTYPE,
    STV_DEFAULT, STV_HIDDEN,
};
use crate::error::{ObjError, Result};
use crate::section::SectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct Symbol {
    /// The name as written in source, before `asm2cname`.
    pub asm_label: String,
    /// The name that ends up in `.strtab`/`.symtab`.
    pub linker_name: String,
    pub binding: SymbolBinding,
    pub visibility: SymbolVisibility,
    pub sym_type: SymbolType,
    /// `None` until defined: an undefined reference (`SHN_UNDEF`).
    pub section: Option<SectionId>,
    pub value: u64,
    pub size: u64,
    pub defined: bool,
    /// Set by `.set`: stays redefinable (TinyCC's `ST_ASM_SET`).
    pub overridable: bool,
}

impl Symbol {
    fn new(asm_label: &str, linker_name: String) -> Self {
        Self {
            asm_label: asm_label.to_owned(),
            linker_name,
            binding: SymbolBinding(STB_LOCAL),
            visibility: SymbolVisibility(STV_DEFAULT),
            sym_type: SymbolType(STT_NOTYPE),
            section: None,
            value: 0,
            size: 0,
            defined: false,
            overridable: false,
        }
    }
}

/// GAS-compatible local-symbol-name mangling. On targets with a leading-underscore
/// convention every externally visible name gets `_`-prefixed; names that are already
/// assembler-internal (start with `.`, e.g. `.L0`) are left alone since they never
/// reach the linker's view of the world.
pub fn asm2cname(name: &str, leading_underscore: bool) -> String {
    if leading_underscore && !name.starts_with('.') {
        format!("_{name}")
    } else {
        name.to_owned()
    }
}

pub struct SymbolTable {
    symbols: IndexMap<String, Symbol>,
    leading_underscore: bool,
}

impl SymbolTable {
    pub fn new(leading_underscore: bool) -> Self {
        Self {
            symbols: IndexMap::new(),
            leading_underscore,
        }
    }

    fn mangle(&self, asm_label: &str) -> String {
        asm2cname(asm_label, self.leading_underscore)
    }

    /// Look a symbol up, creating an undefined entry for it if this is the first mention.
    pub fn get_or_declare(&mut self, asm_label: &str) -> SymbolId {
        let linker_name = self.mangle(asm_label);
        if let Some(idx) = self.symbols.get_index_of(&linker_name) {
            return SymbolId(idx);
        }
        let idx = self.symbols.len();
        self.symbols
            .insert(linker_name.clone(), Symbol::new(asm_label, linker_name));
        SymbolId(idx)
    }

    pub fn find(&self, asm_label: &str) -> Option<SymbolId> {
        self.symbols
            .get_index_of(&self.mangle(asm_label))
            .map(SymbolId)
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.values().enumerate().map(|(i, s)| (SymbolId(i), s))
    }

    /// A real label definition: `foo:` at the current position, or a `.global`/`.type`
    /// directive filling in attributes of an already-declared symbol.
    pub fn define(
        &mut self,
        asm_label: &str,
        section: SectionId,
        value: u64,
        sym_type: SymbolType,
    ) -> Result<SymbolId> {
        let id = self.get_or_declare(asm_label);
        let sym = self.get_mut(id);
        if sym.defined && !sym.overridable {
            return Err(ObjError::DuplicateDefinition(sym.linker_name.clone()));
        }
        sym.section = Some(section);
        sym.value = value;
        sym.sym_type = sym_type;
        sym.defined = true;
        sym.overridable = false;
        Ok(id)
    }

    /// `.set name, expr`: always redefinable, absolute or section-relative per `expr`.
    pub fn set_alias(
        &mut self,
        asm_label: &str,
        section: Option<SectionId>,
        value: u64,
    ) -> SymbolId {
        let id = self.get_or_declare(asm_label);
        let sym = self.get_mut(id);
        sym.section = section;
        sym.value = value;
        sym.defined = true;
        sym.overridable = true;
        id
    }

    pub fn set_global(&mut self, asm_label: &str) -> SymbolId {
        let id = self.get_or_declare(asm_label);
        self.get_mut(id).binding = SymbolBinding(STB_GLOBAL);
        id
    }

    pub fn set_local(&mut self, asm_label: &str) -> SymbolId {
        let id = self.get_or_declare(asm_label);
        self.get_mut(id).binding = SymbolBinding(STB_LOCAL);
        id
    }

    /// `.weak`.
    pub fn set_weak(&mut self, asm_label: &str) -> SymbolId {
        let id = self.get_or_declare(asm_label);
        self.get_mut(id).binding = SymbolBinding(STB_WEAK);
        id
    }

    /// `.hidden`. Per the decision recorded in DESIGN.md this only narrows
    /// visibility; it deliberately does not also force `STB_LOCAL` the way some
    /// assemblers conflate "hidden" with "static".
    pub fn set_hidden(&mut self, asm_label: &str) -> SymbolId {
        let id = self.get_or_declare(asm_label);
        self.get_mut(id).visibility = SymbolVisibility(STV_HIDDEN);
        id
    }

    pub fn set_size(&mut self, asm_label: &str, size: u64) {
        let id = self.get_or_declare(asm_label);
        self.get_mut(id).size = size;
    }

    pub fn set_type(&mut self, asm_label: &str, ty: SymbolType) {
        let id = self.get_or_declare(asm_label);
        self.get_mut(id).sym_type = ty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::STT_FUNC;
    use crate::section::SectionId;

    #[test]
    fn redefinition_of_plain_symbol_errors() {
        let mut table = SymbolTable::new(false);
        table
            .define("foo", SectionId(0), 0, SymbolType(STT_NOTYPE))
            .unwrap();
        let err = table
            .define("foo", SectionId(0), 4, SymbolType(STT_NOTYPE))
            .unwrap_err();
        assert!(matches!(err, ObjError::DuplicateDefinition(_)));
    }

    #[test]
    fn set_alias_is_always_redefinable() {
        let mut table = SymbolTable::new(false);
        table.set_alias("bar", Some(SectionId(0)), 8);
        table.set_alias("bar", Some(SectionId(0)), 16);
        let id = table.find("bar").unwrap();
        assert_eq!(table.get(id).value, 16);
    }

    #[test]
    fn leading_underscore_skips_local_labels() {
        let mut table = SymbolTable::new(true);
        table.get_or_declare("main");
        table.get_or_declare(".L0");
        assert_eq!(table.find("main").map(|id| table.get(id).linker_name.clone()), Some("_main".to_owned()));
        assert_eq!(table.find(".L0").map(|id| table.get(id).linker_name.clone()), Some(".L0".to_owned()));
    }

    #[test]
    fn define_sets_function_type() {
        let mut table = SymbolTable::new(false);
        table.set_type("f", SymbolType(STT_FUNC));
        let id = table.find("f").unwrap();
        assert_eq!(table.get(id).sym_type, STT_FUNC);
    }
}
