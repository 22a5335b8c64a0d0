//! Boot context
//!
//! Everything the hook needs to know about the platform, built once at entry
//! and passed down explicitly.

use errata_patcher::{MemoryWindow, PatcherConfig};
use log::LevelFilter;

/// DRAM of the reference `virt` board
pub const SYSTEM_MEMORY_BASE: u64 = 0x4000_0000;
pub const SYSTEM_MEMORY_SIZE: u64 = 0x2_0000_0000;

/// PL011 debug UART the log sink drives
///
/// `ERRATA_DEBUG_UART` set at build time replaces the board default; `0`
/// builds a hook without a sink.
pub const DEBUG_UART_BASE: Option<usize> = match option_env!("ERRATA_DEBUG_UART") {
    Some(value) => parse_address(value),
    None => Some(0x0900_0000),
};

/// Decimal or `0x` hex, `_` separators allowed; zero and garbage give `None`
const fn parse_address(value: &str) -> Option<usize> {
    let bytes = value.as_bytes();
    let (mut i, radix) = if bytes.len() > 2 && bytes[0] == b'0' && (bytes[1] | 0x20) == b'x' {
        (2, 16)
    } else {
        (0, 10)
    };
    let mut address: usize = 0;
    while i < bytes.len() {
        let digit = match bytes[i] {
            b'_' => {
                i += 1;
                continue;
            }
            b @ b'0'..=b'9' => (b - b'0') as usize,
            b @ b'a'..=b'f' if radix == 16 => (b - b'a' + 10) as usize,
            b @ b'A'..=b'F' if radix == 16 => (b - b'A' + 10) as usize,
            _ => return None,
        };
        address = match address.checked_mul(radix) {
            Some(shifted) => match shifted.checked_add(digit) {
                Some(next) => next,
                None => return None,
            },
            None => return None,
        };
        i += 1;
    }
    if address == 0 { None } else { Some(address) }
}

#[derive(Debug, Clone, Copy)]
pub struct BootContext {
    /// Physical DRAM window
    pub system_memory: MemoryWindow,
    /// PL011 register block used for the log sink, if any
    pub uart_base: Option<usize>,
    pub log_level: LevelFilter,
    /// Reject images outside `system_memory`
    ///
    /// Only meaningful when images are identity-mapped at hand-off; the
    /// loader normally hands over kernel virtual addresses.
    pub confine_images: bool,
    pub patcher: PatcherConfig,
}

impl BootContext {
    /// Context for the platform this firmware was built for
    pub const fn builtin() -> Self {
        let patcher = PatcherConfig::new();
        #[cfg(feature = "dry-run")]
        let patcher = patcher.with_dry_run(true);
        Self {
            system_memory: MemoryWindow::new(SYSTEM_MEMORY_BASE, SYSTEM_MEMORY_SIZE),
            uart_base: DEBUG_UART_BASE,
            log_level: LevelFilter::Info,
            confine_images: false,
            patcher,
        }
    }

    pub const fn with_uart(mut self, base: usize) -> Self {
        self.uart_base = Some(base);
        self
    }

    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub const fn with_confined_images(mut self, confine: bool) -> Self {
        self.confine_images = confine;
        self
    }

    pub const fn with_patcher(mut self, patcher: PatcherConfig) -> Self {
        self.patcher = patcher;
        self
    }

    /// Last byte of system memory
    pub const fn system_memory_end(&self) -> u64 {
        self.system_memory.end()
    }

    /// Engine configuration with the platform limits applied
    pub fn patcher_config(&self) -> PatcherConfig {
        if self.confine_images {
            self.patcher.with_memory_window(self.system_memory)
        } else {
            self.patcher
        }
    }
}

impl Default for BootContext {
    fn default() -> Self {
        Self::builtin()
    }
}
