//! Kernel hand-off
//!
//! The loader would have called the kernel entry point as
//! `entry(loader_block, entry)`. The patcher does the same once it is done,
//! and that indirect call is the only place a raw address becomes code.

use core::ffi::c_void;

use crate::a64::INSTRUCTION_LENGTH;
use crate::error::{PatchError, Result};

/// Calling convention the entry point expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// `extern "C"` on AArch64: x0 = loader block, x1 = entry address
    Aapcs64,
}

/// Where execution continues, and with what
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    loader_block: usize,
    entry: usize,
    convention: CallingConvention,
}

impl Continuation {
    /// Capture the loader's arguments as received
    pub fn new(loader_block: usize, entry: usize) -> Result<Self> {
        if entry == 0 || entry % INSTRUCTION_LENGTH != 0 {
            return Err(PatchError::InvalidContinuation);
        }
        Ok(Self {
            loader_block,
            entry,
            convention: CallingConvention::Aapcs64,
        })
    }

    pub fn loader_block(&self) -> usize {
        self.loader_block
    }

    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }
}

/// Proof that an entry point came back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelReturned;

/// Transfers control to a continuation
#[cfg_attr(test, mockall::automock)]
pub trait Handoff {
    /// Enter the continuation; returning at all is a failure
    fn enter(&mut self, continuation: Continuation) -> KernelReturned;
}

/// Calls the entry point directly on the current stack
#[derive(Debug)]
pub struct DirectCall {
    _private: (),
}

impl DirectCall {
    /// # Safety
    /// Every continuation entered through this value must name executable
    /// code following its calling convention, and the loader block must be
    /// what that code expects.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

type KernelEntry = unsafe extern "C" fn(*mut c_void, *mut c_void);

impl Handoff for DirectCall {
    fn enter(&mut self, continuation: Continuation) -> KernelReturned {
        match continuation.convention() {
            CallingConvention::Aapcs64 => {
                let loader_block = continuation.loader_block() as *mut c_void;
                let entry_address = continuation.entry() as *mut c_void;
                // SAFETY: guaranteed by the contract of `DirectCall::new`
                unsafe {
                    let entry: KernelEntry = core::mem::transmute(continuation.entry());
                    entry(loader_block, entry_address);
                }
            }
        }
        KernelReturned
    }
}

/// Hand control to the kernel; only returns if the kernel did
pub fn transfer_control<H: Handoff + ?Sized>(
    handoff: &mut H,
    continuation: Continuation,
) -> PatchError {
    log::info!(
        "Transferring to kernel entry {:#x} (loader block {:#x})",
        continuation.entry(),
        continuation.loader_block()
    );
    let KernelReturned = handoff.enter(continuation);
    log::error!("Kernel entry {:#x} returned", continuation.entry());
    PatchError::EntryReturned
}
