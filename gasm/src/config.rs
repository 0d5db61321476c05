/// Assembler-level configuration threaded through [`crate::assembler::Assembler`]
/// rather than left as global state (spec.md Design Notes §9.1: "this becomes an
/// explicit context value owned by the top-level entry point").
#[derive(Debug, Clone, Copy)]
pub struct TargetConfig {
    /// Whether externally-visible symbols get a leading `_` (macOS/PE convention).
    /// ELF/Linux x86-64, the only concrete target in scope, defaults this to `false`.
    pub leading_underscore: bool,
    pub abi: Abi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    SysV,
    Windows,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            leading_underscore: false,
            abi: Abi::SysV,
        }
    }
}
