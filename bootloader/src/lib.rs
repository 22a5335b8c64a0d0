//! Errata bootloader hook
//!
//! Linked into the firmware in place of the loader's own
//! `OslArm64TransferToKernel`. The loader calls it with its parameter block
//! and the kernel entry point; the hook patches every loaded image and then
//! enters the kernel exactly as the loader would have.

#![cfg_attr(not(test), no_std)]

pub mod context;
pub mod fatal;
pub mod hook;
pub mod serial;

pub use context::BootContext;
pub use fatal::{fatal, halt};
pub use hook::{run, OslArm64TransferToKernel};
pub use serial::{Pl011, SerialLogger};

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("PANIC: {}", info);
    halt()
}
