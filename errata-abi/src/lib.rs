//! Errata ABI - loader hand-off layouts
//!
//! The OS loader hands the kernel a parameter block whose first fields are a
//! handful of version words followed by intrusive doubly linked lists. The
//! patcher only reads the load-order list and, for every entry, the image
//! base, image size, flags and base name. Everything here is `#[repr(C)]` and
//! checked at compile time against the offsets the loader uses on 64-bit ARM.

#![no_std]

pub mod flags;
pub mod loader;

pub use flags::ModuleFlags;
pub use loader::{KldrDataTableEntry, ListEntry, LoaderParameterBlock, UnicodeString};

/// Length of one A64 instruction in bytes
pub const INSTRUCTION_LENGTH: usize = 4;

/// Byte length of `count` consecutive A64 instructions
pub const fn instructions(count: usize) -> usize {
    INSTRUCTION_LENGTH * count
}
