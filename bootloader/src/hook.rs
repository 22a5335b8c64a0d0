//! Loader-to-kernel hand-off hook

use core::ffi::c_void;

use errata_abi::LoaderParameterBlock;
use errata_patcher::cache::{CodeSync, PlatformCodeSync};
use errata_patcher::handoff::DirectCall;
use errata_patcher::{patch_and_transfer, Continuation, Handoff, LoadOrderModules, PatchError};

use crate::context::BootContext;
use crate::fatal::fatal;

/// Replacement for the loader's final call into the kernel
///
/// Called by the OS loader exactly once, on the boot core, with the MMU still
/// set up the way the loader left it.
///
/// # Safety
/// `os_loader_block` must be the loader parameter block the kernel expects,
/// with a load-order list whose images are mapped writable, and
/// `kernel_address` must be the kernel entry point.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn OslArm64TransferToKernel(
    os_loader_block: *mut c_void,
    kernel_address: *mut c_void,
) -> ! {
    let context = BootContext::builtin();
    #[cfg(feature = "serial-log")]
    {
        if crate::serial::init(&context).is_err() {
            log::warn!("Logger already installed, keeping it");
        }
    }

    let continuation = match Continuation::new(os_loader_block as usize, kernel_address as usize) {
        Ok(continuation) => continuation,
        Err(err) => fatal(err),
    };
    // SAFETY: the loader hands over a real entry point and parameter block
    let mut kernel = unsafe { DirectCall::new() };
    let block = os_loader_block.cast_const().cast::<LoaderParameterBlock>();

    // SAFETY: forwarded from this function's contract
    let err = unsafe { run(&context, block, continuation, PlatformCodeSync::default(), &mut kernel) };
    fatal(err)
}

/// Patch everything on the load-order list of `block`, then enter the kernel
///
/// Returns only on failure, with the reason.
///
/// # Safety
/// The requirements of [`LoadOrderModules::new`] hold for `block`.
pub unsafe fn run<S, H>(
    context: &BootContext,
    block: *const LoaderParameterBlock,
    continuation: Continuation,
    sync: S,
    kernel: &mut H,
) -> PatchError
where
    S: CodeSync,
    H: Handoff + ?Sized,
{
    let config = context.patcher_config();
    log::info!(
        "Errata patcher: {} errata, loader block {:#x}, kernel entry {:#x}",
        config.errata.len(),
        continuation.loader_block(),
        continuation.entry()
    );
    // SAFETY: forwarded from this function's contract
    let modules = unsafe { LoadOrderModules::new(block, config.max_modules) };
    patch_and_transfer(config, sync, modules, kernel, continuation)
}
