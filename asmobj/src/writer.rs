//! Emits a relocatable (`ET_REL`) ELF64 object: the one output shape this crate
//! produces (final executable/shared-object layout is out of scope).
//!
//! The on-disk layout algorithm (a `Layout` struct computing section offsets with
//! `align_up`, written out through `write_pod`/`write_pod_slice`) is lifted straight
//! from the original ELF writer this crate is descended from.

use std::io::Write;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::addr::{Addr, Offset};
use crate::consts::{
    self as c, Class, Data, Machine, OsAbi, SectionIdx, ShType, SymbolBinding, SymbolType,
    Type, SHN_ABS, SHN_UNDEF, SHT_RELA, SHT_STRTAB, SHT_SYMTAB,
};
use crate::error::{ObjError, Result};
use crate::reloc::Relocation;
use crate::section::{Contents, SectionId, SectionStore};
use crate::symbol::SymbolTable;

#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(C)]
struct ElfIdent {
    magic: [u8; c::SELFMAG],
    class: Class,
    data: Data,
    version: u8,
    osabi: OsAbi,
    abiversion: u8,
    _pad: [u8; 7],
}

const _: [u8; c::EI_NIDENT] = [0; size_of::<ElfIdent>()];

#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(C)]
struct ElfHeader {
    ident: ElfIdent,
    r#type: Type,
    machine: Machine,
    version: u32,
    entry: Addr,
    phoff: Offset,
    shoff: Offset,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: SectionIdx,
}

#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(C)]
struct Shdr {
    name: u32,
    r#type: ShType,
    flags: u64,
    addr: u64,
    offset: Offset,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
}

#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(transparent)]
struct SymInfo(u8);

impl SymInfo {
    fn new(binding: SymbolBinding, ty: SymbolType) -> Self {
        SymInfo((binding.0 << 4) | (ty.0 & 0xf))
    }
}

#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(C)]
struct Sym {
    name: u32,
    info: SymInfo,
    other: u8,
    shndx: SectionIdx,
    value: Addr,
    size: u64,
}

#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(C)]
struct Rela {
    offset: Addr,
    info: u64,
    addend: i64,
}

fn rela_info(sym_idx: u32, r#type: u32) -> u64 {
    (u64::from(sym_idx) << 32) | u64::from(r#type)
}

struct OutSection {
    name_off: u32,
    r#type: ShType,
    flags: u64,
    link: u32,
    info: u32,
    entsize: u64,
    align: u64,
    /// Bytes actually written into the file. Empty for `SHT_NOBITS` sections.
    contents: Vec<u8>,
    /// `sh_size`: the file-content length for normal sections, or the virtual
    /// reservation size for `SHT_NOBITS` sections (which contribute no file bytes).
    logical_size: u64,
}

pub struct ObjectWriter<'a> {
    sections: &'a SectionStore,
    symbols: &'a SymbolTable,
    relocations: &'a [Relocation],
}

impl<'a> ObjectWriter<'a> {
    pub fn new(
        sections: &'a SectionStore,
        symbols: &'a SymbolTable,
        relocations: &'a [Relocation],
    ) -> Self {
        Self {
            sections,
            symbols,
            relocations,
        }
    }

    pub fn write(&self) -> Result<Vec<u8>> {
        let mut shstrtab = vec![0u8];
        let mut push_shstr = |s: &mut Vec<u8>, name: &str| -> u32 {
            let off = s.len() as u32;
            s.extend_from_slice(name.as_bytes());
            s.push(0);
            off
        };

        // Map our SectionId onto the final on-disk section index. 0 is the null
        // section, so user sections start at 1.
        let mut disk_index: Vec<u32> = Vec::new();
        let mut out_sections: Vec<OutSection> = Vec::new();

        for (id, sec) in self.sections.iter() {
            debug_assert_eq!(id.0, disk_index.len());
            let name_off = push_shstr(&mut shstrtab, &sec.name);
            disk_index.push((out_sections.len() + 1) as u32);
            let (contents, logical_size) = match &sec.contents {
                Contents::Data(d) => (d.clone(), d.len() as u64),
                Contents::Bss(n) => (Vec::new(), *n),
            };
            out_sections.push(OutSection {
                name_off,
                r#type: sec.kind,
                flags: sec.flags.bits(),
                link: 0,
                info: 0,
                entsize: 0,
                align: sec.align,
                contents,
                logical_size,
            });
        }

        // Symbols: ELF requires all STB_LOCAL entries before the first non-local one,
        // and `.symtab`'s sh_info must hold the index of that first non-local entry.
        let mut strtab = vec![0u8];
        let mut locals = Vec::new();
        let mut globals = Vec::new();
        for (_id, sym) in self.symbols.iter() {
            let name_off = if sym.linker_name.is_empty() {
                0
            } else {
                let off = strtab.len() as u32;
                strtab.extend_from_slice(sym.linker_name.as_bytes());
                strtab.push(0);
                off
            };
            let shndx = match sym.section {
                Some(id) => SectionIdx(disk_index[id.0] as u16),
                None if sym.defined => SectionIdx(SHN_ABS),
                None => SectionIdx(SHN_UNDEF),
            };
            let entry = Sym {
                name: name_off,
                info: SymInfo::new(sym.binding, sym.sym_type),
                other: sym.visibility.0,
                shndx,
                value: Addr(sym.value),
                size: sym.size,
            };
            if sym.binding == c::STB_LOCAL {
                locals.push((entry, sym.linker_name.clone()));
            } else {
                globals.push((entry, sym.linker_name.clone()));
            }
        }
        let first_global = 1 + locals.len() as u32;
        let mut symtab_syms = vec![Sym::zeroed()];
        let mut name_to_symidx = std::collections::HashMap::new();
        for (i, (sym, name)) in locals.into_iter().chain(globals).enumerate() {
            name_to_symidx.insert(name, (i + 1) as u32);
            symtab_syms.push(sym);
        }

        let symtab_name = push_shstr(&mut shstrtab, ".symtab");
        let strtab_name = push_shstr(&mut shstrtab, ".strtab");
        let symtab_section_idx = out_sections.len() as u32 + 1;
        let strtab_section_idx = symtab_section_idx + 1;

        let symtab_bytes: Vec<u8> = bytemuck::cast_slice(&symtab_syms).to_vec();
        let symtab_len = symtab_bytes.len() as u64;
        out_sections.push(OutSection {
            name_off: symtab_name,
            r#type: ShType(SHT_SYMTAB),
            flags: 0,
            link: strtab_section_idx,
            info: first_global,
            entsize: size_of::<Sym>() as u64,
            align: 8,
            contents: symtab_bytes,
            logical_size: symtab_len,
        });
        let strtab_len = strtab.len() as u64;
        out_sections.push(OutSection {
            name_off: strtab_name,
            r#type: ShType(SHT_STRTAB),
            flags: 0,
            link: 0,
            info: 0,
            entsize: 0,
            align: 1,
            contents: strtab,
            logical_size: strtab_len,
        });

        // One `.rela.<name>` per source section carrying relocations, grouped and
        // emitted in the relocation list's own order-of-first-appearance.
        let mut rela_groups: Vec<(SectionId, Vec<&Relocation>)> = Vec::new();
        for reloc in self.relocations {
            match rela_groups.iter_mut().find(|(id, _)| *id == reloc.section) {
                Some((_, v)) => v.push(reloc),
                None => rela_groups.push((reloc.section, vec![reloc])),
            }
        }

        for (target, relocs) in rela_groups {
            let target_name = &self.sections.section(target).name;
            let name = format!(".rela{target_name}");
            let name_off = push_shstr(&mut shstrtab, &name);

            let mut entries = Vec::with_capacity(relocs.len());
            for r in relocs {
                let sym = self.symbols.get(r.symbol);
                let sym_idx = *name_to_symidx.get(&sym.linker_name).ok_or_else(|| {
                    ObjError::UndefinedSymbol(sym.linker_name.clone())
                })?;
                entries.push(Rela {
                    offset: Addr(r.offset),
                    info: rela_info(sym_idx, r.kind.elf_type().0),
                    addend: r.addend,
                });
            }

            let rela_bytes: Vec<u8> = bytemuck::cast_slice(&entries).to_vec();
            let rela_len = rela_bytes.len() as u64;
            out_sections.push(OutSection {
                name_off,
                r#type: ShType(SHT_RELA),
                flags: 0,
                link: symtab_section_idx,
                info: disk_index[target.0],
                entsize: size_of::<Rela>() as u64,
                align: 8,
                contents: rela_bytes,
                logical_size: rela_len,
            });
        }

        let shstrtab_name_slot = push_shstr(&mut shstrtab, ".shstrtab");
        let shstrtab_section_idx = out_sections.len() as u32 + 1;
        let shstrtab_len = shstrtab.len() as u64;
        out_sections.push(OutSection {
            name_off: shstrtab_name_slot,
            r#type: ShType(SHT_STRTAB),
            flags: 0,
            link: 0,
            info: 0,
            entsize: 0,
            align: 1,
            contents: shstrtab,
            logical_size: shstrtab_len,
        });

        self.layout_and_emit(out_sections, shstrtab_section_idx)
    }

    fn layout_and_emit(&self, sections: Vec<OutSection>, shstrndx: u32) -> Result<Vec<u8>> {
        let shnum = sections.len() + 1;
        if shnum > u16::MAX as usize {
            return Err(ObjError::TooMany("sections"));
        }

        let mut header = ElfHeader {
            ident: ElfIdent {
                magic: *c::ELFMAG,
                class: Class(c::ELFCLASS64),
                data: Data(c::ELFDATA2LSB),
                version: 1,
                osabi: OsAbi(c::ELFOSABI_SYSV),
                abiversion: 0,
                _pad: [0; 7],
            },
            r#type: Type(c::ET_REL),
            machine: Machine(c::EM_X86_64),
            version: 1,
            entry: Addr(0),
            phoff: Offset(0),
            shoff: Offset(0),
            flags: 0,
            ehsize: size_of::<ElfHeader>() as u16,
            phentsize: 0,
            phnum: 0,
            shentsize: size_of::<Shdr>() as u16,
            shnum: shnum as u16,
            shstrndx: SectionIdx(shstrndx as u16),
        };

        let sh_offset = size_of::<ElfHeader>() as u64;
        let shs_byte_size = shnum as u64 * size_of::<Shdr>() as u64;
        let content_start = sh_offset + shs_byte_size;

        let mut content_offsets = Vec::with_capacity(sections.len());
        let mut cursor = content_start;
        for sec in &sections {
            if sec.contents.is_empty() {
                content_offsets.push(0u64);
                continue;
            }
            cursor = align_up(cursor, sec.align.max(1));
            content_offsets.push(cursor);
            cursor += sec.contents.len() as u64;
        }
        let end_offset = cursor;

        header.shoff = Offset(sh_offset);

        let mut output = Vec::new();
        write_pod(&header, &mut output);
        assert_eq!(output.len() as u64, sh_offset);

        write_pod(&Shdr::zeroed(), &mut output);
        for (sec, &offset) in sections.iter().zip(&content_offsets) {
            let shdr = Shdr {
                name: sec.name_off,
                r#type: sec.r#type,
                flags: sec.flags,
                addr: 0,
                offset: Offset(offset),
                size: sec.logical_size,
                link: sec.link,
                info: sec.info,
                addralign: sec.align,
                entsize: sec.entsize,
            };
            write_pod(&shdr, &mut output);
        }
        assert_eq!(output.len() as u64, content_start);

        for (sec, &offset) in sections.iter().zip(&content_offsets) {
            if sec.contents.is_empty() {
                continue;
            }
            let pad = offset as usize - output.len();
            output.write_all(&vec![0u8; pad])?;
            output.write_all(&sec.contents)?;
        }
        assert_eq!(output.len() as u64, end_offset);

        Ok(output)
    }
}

fn write_pod<T: Pod>(data: &T, output: &mut Vec<u8>) {
    output.extend(bytemuck::bytes_of(data));
}

/// Align `n` up to `align`, which must be a power of two.
fn align_up(n: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    let required_mask = align - 1;
    let masked = n & required_mask;
    if masked == 0 {
        return n;
    }
    (n - masked) + align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_correct() {
        assert_eq!(align_up(0b0101, 0b0010), 0b0110);
        assert_eq!(align_up(16, 8), 16);
        assert_eq!(align_up(15, 8), 16);
        assert_eq!(align_up(9, 8), 16);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(0, 1), 0);
    }

    #[test]
    fn empty_object_has_elf_magic() {
        let sections = SectionStore::new();
        let symbols = SymbolTable::new(false);
        let relocs = Vec::new();
        let writer = ObjectWriter::new(&sections, &symbols, &relocs);
        let bytes = writer.write().unwrap();
        assert_eq!(&bytes[..4], c::ELFMAG.as_slice());
        assert_eq!(bytes[c::EI_NIDENT], 1); // ET_REL low byte, little endian
    }

    #[test]
    fn defined_symbol_points_at_its_section() {
        let mut sections = SectionStore::new();
        let mut symbols = SymbolTable::new(false);
        sections.emit_bytes(&[0x90, 0x90]);
        let text = sections.current_id();
        symbols
            .define("start", text, 0, SymbolType(c::STT_FUNC))
            .unwrap();
        symbols.set_global("start");

        let relocs = Vec::new();
        let writer = ObjectWriter::new(&sections, &symbols, &relocs);
        let bytes = writer.write().unwrap();
        assert!(!bytes.is_empty());
    }
}
