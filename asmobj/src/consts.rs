//! ELF64 constants: the subset needed to emit a relocatable (`ET_REL`) object.
//!
//! See <https://man7.org/linux/man-pages/man5/elf.5.html>

#![allow(non_upper_case_globals)]

macro_rules! const_group_with_fmt {
    (
        pub struct $struct_name:ident($ty:ty): $group_name:literal

        $(
            pub const $name:ident = $value:expr;
        )*
    ) => {
        $(
            pub const $name: $ty = $value;
        )*

        #[derive(Clone, Copy, PartialEq, Eq, bytemuck::Zeroable, bytemuck::Pod)]
        #[repr(transparent)]
        pub struct $struct_name(pub $ty);

        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self.0 {
                    $(
                        $value => f.write_str(stringify!($name)),
                    )*
                    a => write!(f, "{}({a})", $group_name)
                }
            }
        }

        impl std::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }

        impl PartialEq<$ty> for $struct_name {
            fn eq(&self, other: &$ty) -> bool {
                self.0 == *other
            }
        }
    };
}

pub const ELFMAG: &[u8; SELFMAG] = b"\x7fELF";
pub const SELFMAG: usize = 4;
pub const EI_NIDENT: usize = 16;

const_group_with_fmt! {
    pub struct Class(u8): "class"

    pub const ELFCLASSNONE = 0;
    pub const ELFCLASS32 = 1;
    pub const ELFCLASS64 = 2;
}

const_group_with_fmt! {
    pub struct Data(u8): "data"

    pub const ELFDATANONE = 0;
    pub const ELFDATA2LSB = 1;
    pub const ELFDATA2MSB = 2;
}

const_group_with_fmt! {
    pub struct OsAbi(u8): "OS ABI"

    pub const ELFOSABI_SYSV = 0;
    pub const ELFOSABI_GNU = 3;
    pub const ELFOSABI_LINUX = 3;
}

const_group_with_fmt! {
    pub struct Type(u16): "e_type"

    pub const ET_NONE = 0;
    pub const ET_REL = 1;
    pub const ET_EXEC = 2;
    pub const ET_DYN = 3;
    pub const ET_CORE = 4;
}

const_group_with_fmt! {
    pub struct Machine(u16): "e_machine"

    pub const EM_NONE = 0;
    pub const EM_X86_64 = 62;
}

const_group_with_fmt! {
    pub struct SectionIdx(u16): "SHN"

    pub const SHN_UNDEF = 0;
    pub const SHN_ABS = 0xfff1;
    pub const SHN_COMMON = 0xfff2;
    pub const SHN_XINDEX = 0xffff;
}
pub const SHN_LORESERVE: u16 = 0xff00;

const_group_with_fmt! {
    pub struct ShType(u32): "SHT"

    pub const SHT_NULL = 0;
    pub const SHT_PROGBITS = 1;
    pub const SHT_SYMTAB = 2;
    pub const SHT_STRTAB = 3;
    pub const SHT_RELA = 4;
    pub const SHT_NOBITS = 8;
    pub const SHT_REL = 9;
}

bitflags::bitflags! {
    /// `sh_flags`. A `bitflags` group rather than a `const_group_with_fmt!` group since
    /// several bits are set at once in practice (`SHF_ALLOC | SHF_EXECINSTR`).
    pub struct ShFlags: u64 {
        const SHF_WRITE = 1 << 0;
        const SHF_ALLOC = 1 << 1;
        const SHF_EXECINSTR = 1 << 2;
        const SHF_MERGE = 1 << 4;
        const SHF_STRINGS = 1 << 5;
        const SHF_INFO_LINK = 1 << 6;
        const SHF_GROUP = 1 << 9;
        const SHF_TLS = 1 << 10;
    }
}

const_group_with_fmt! {
    pub struct SymbolType(u8): "STT"

    pub const STT_NOTYPE = 0;
    pub const STT_OBJECT = 1;
    pub const STT_FUNC = 2;
    pub const STT_SECTION = 3;
    pub const STT_FILE = 4;
    pub const STT_COMMON = 5;
    pub const STT_TLS = 6;
}

const_group_with_fmt! {
    pub struct SymbolBinding(u8): "STB"

    pub const STB_LOCAL = 0;
    pub const STB_GLOBAL = 1;
    pub const STB_WEAK = 2;
}

const_group_with_fmt! {
    pub struct SymbolVisibility(u8): "STV"

    pub const STV_DEFAULT = 0;
    pub const STV_INTERNAL = 1;
    pub const STV_HIDDEN = 2;
    pub const STV_PROTECTED = 3;
}

const_group_with_fmt! {
    pub struct RX86_64(u32): "R_X86_64"

    pub const R_X86_64_NONE = 0;
    pub const R_X86_64_64 = 1;
    pub const R_X86_64_PC32 = 2;
    pub const R_X86_64_GOT32 = 3;
    pub const R_X86_64_PLT32 = 4;
    pub const R_X86_64_GOTPCREL = 9;
    pub const R_X86_64_32 = 10;
    pub const R_X86_64_32S = 11;
}

impl SectionIdx {
    pub fn usize(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_flags_combine() {
        let f = ShFlags::SHF_ALLOC | ShFlags::SHF_EXECINSTR;
        assert!(f.contains(ShFlags::SHF_ALLOC));
        assert!(f.contains(ShFlags::SHF_EXECINSTR));
        assert!(!f.contains(ShFlags::SHF_WRITE));
    }

    #[test]
    fn debug_names_known_values() {
        assert_eq!(format!("{:?}", ShType(SHT_PROGBITS)), "SHT_PROGBITS");
        assert_eq!(format!("{:?}", ShType(0xbeef)), "SHT(48879)");
    }
}
