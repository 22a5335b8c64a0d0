//! Instruction/data cache synchronisation for rewritten code
//!
//! New instructions are written through the data side. Before they can be
//! fetched, the lines have to be cleaned to the point of unification and the
//! matching instruction cache lines invalidated.

/// Makes freshly written code visible to instruction fetch
#[cfg_attr(test, mockall::automock)]
pub trait CodeSync {
    /// Synchronise `len` bytes of code starting at address `start`
    fn sync_code(&mut self, start: usize, len: usize);
}

/// For images that are never executed in place (host tooling, tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCodeSync;

impl CodeSync for NoCodeSync {
    fn sync_code(&mut self, _start: usize, _len: usize) {}
}

#[cfg(target_arch = "aarch64")]
pub use self::aarch64::Aarch64CodeSync;

/// Code sync used by the boot path on this architecture
#[cfg(target_arch = "aarch64")]
pub type PlatformCodeSync = Aarch64CodeSync;

#[cfg(not(target_arch = "aarch64"))]
pub type PlatformCodeSync = NoCodeSync;

#[cfg(target_arch = "aarch64")]
mod aarch64 {
    use core::arch::asm;

    use aarch64_cpu::asm::barrier;

    use super::CodeSync;

    /// `dc cvau` / `ic ivau` by virtual address, line sizes from CTR_EL0
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Aarch64CodeSync;

    impl Aarch64CodeSync {
        fn line_sizes() -> (usize, usize) {
            let ctr: u64;
            unsafe {
                asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
            }
            let dline = 4usize << ((ctr >> 16) & 0xF);
            let iline = 4usize << (ctr & 0xF);
            (dline, iline)
        }
    }

    impl CodeSync for Aarch64CodeSync {
        fn sync_code(&mut self, start: usize, len: usize) {
            if len == 0 {
                return;
            }
            let end = start.saturating_add(len);
            let (dline, iline) = Self::line_sizes();

            let mut addr = start & !(dline - 1);
            while addr < end {
                unsafe {
                    asm!("dc cvau, {}", in(reg) addr, options(nostack, preserves_flags));
                }
                addr += dline;
            }
            barrier::dsb(barrier::ISH);

            let mut addr = start & !(iline - 1);
            while addr < end {
                unsafe {
                    asm!("ic ivau, {}", in(reg) addr, options(nostack, preserves_flags));
                }
                addr += iline;
            }
            barrier::dsb(barrier::ISH);
            barrier::isb(barrier::SY);

            log::trace!("synced code {:#x}..{:#x}", start, end);
        }
    }
}
