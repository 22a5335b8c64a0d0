//! Fatal error path
//!
//! Nothing is left to return to once the loader has called the hook, so every
//! unrecoverable condition ends here.

use errata_patcher::PatchError;

/// Report `error` and stop this core
pub fn fatal(error: PatchError) -> ! {
    log::error!(
        "Fatal boot error {:#06x}: {}",
        error.as_error_code(),
        error
    );
    log::logger().flush();
    halt()
}

/// Park the core for good
pub fn halt() -> ! {
    loop {
        #[cfg(target_arch = "aarch64")]
        aarch64_cpu::asm::wfe();
        #[cfg(not(target_arch = "aarch64"))]
        core::hint::spin_loop();
    }
}
