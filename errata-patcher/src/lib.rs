//! Kernel errata patcher
//!
//! Runs once, on the boot core, between the OS loader and the kernel entry
//! point. Every image on the loader's load-order list is scanned for the
//! instruction signature of a known erratum; each hit is rewritten in place
//! to branch into a corrected instruction sequence placed in dead code a
//! fixed distance further on. Control then passes to the kernel with the
//! loader's arguments untouched.
//!
//! The flow is split the same way the boot path uses it:
//!
//! - [`module_list`] walks the loader's list (or a safe arena for tests and tools)
//! - [`scanner`] finds word-aligned signature hits
//! - [`plan`] turns a hit into a bounds-checked set of writes and applies it
//! - [`cache`] makes the new instructions visible to instruction fetch
//! - [`handoff`] owns the one indirect call into the kernel
//! - [`engine`] ties these together and keeps the report

#![cfg_attr(not(test), no_std)]

pub mod a64;
pub mod cache;
pub mod config;
pub mod engine;
pub mod erratum;
pub mod error;
pub mod handoff;
pub mod module_list;
pub mod plan;
pub mod scanner;

pub use config::{MemoryWindow, PatcherConfig};
pub use engine::{patch_and_transfer, Engine, EngineReport, PatchRecord};
pub use erratum::{Erratum, CATALOGUE, GICV3_SGI_IRM};
pub use error::{PatchError, Result};
pub use handoff::{transfer_control, Continuation, Handoff, KernelReturned};
pub use module_list::{LoadOrderModules, LoadedModule, ModuleArena, ModuleDescriptor};
pub use plan::PatchPlan;
pub use scanner::Scanner;
