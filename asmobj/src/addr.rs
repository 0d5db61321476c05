use std::{
    fmt::{Debug, Display},
    ops::Add,
};

use bytemuck::{Pod, Zeroable};

/// A position inside an object file's address space, once it is loaded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Zeroable, Pod)]
#[repr(transparent)]
pub struct Addr {
    value: u64,
}

#[allow(non_snake_case)]
pub const fn Addr(value: u64) -> Addr {
    Addr { value }
}

impl Addr {
    pub fn value(self) -> u64 {
        self.value
    }
}

impl Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.value)
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.value)
    }
}

impl Add<Self> for Addr {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        self + rhs.value
    }
}

impl Add<u64> for Addr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Addr(self.value + rhs)
    }
}

/// A byte offset into an object file, either absolute or relative to a section's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Zeroable, Pod, Default)]
#[repr(transparent)]
pub struct Offset(pub u64);

impl Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl Add<u64> for Offset {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Offset(self.0 + rhs)
    }
}
