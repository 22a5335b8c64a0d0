//! Early serial log sink over a PL011 UART
//!
//! The UART is assumed to be set up by earlier firmware; only the data and
//! flag registers are touched.

use core::fmt;
use core::ptr::{read_volatile, write_volatile};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::context::BootContext;

// Register offsets (32-bit aligned)
const DR: usize = 0x00; // Data Register
const FR: usize = 0x18; // Flag Register

const FR_TXFF: u32 = 1 << 5; // Transmit FIFO full

/// Transmit side of a PL011
#[derive(Debug)]
pub struct Pl011 {
    base: usize,
}

impl Pl011 {
    /// # Safety
    /// `base` must be the 4-byte aligned address of a PL011 register block
    /// that nothing else drives while this value is alive.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    #[inline]
    fn reg(&self, offset: usize) -> *mut u32 {
        (self.base + offset) as *mut u32
    }

    #[inline]
    fn tx_ready(&self) -> bool {
        // SAFETY: guaranteed by the contract of `new`
        unsafe { read_volatile(self.reg(FR)) & FR_TXFF == 0 }
    }

    pub fn write_byte(&mut self, byte: u8) {
        while !self.tx_ready() {
            core::hint::spin_loop();
        }
        // SAFETY: guaranteed by the contract of `new`
        unsafe { write_volatile(self.reg(DR), u32::from(byte)) }
    }
}

impl fmt::Write for Pl011 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if b == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(b);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SinkState {
    uart: Option<Pl011>,
    level: LevelFilter,
}

/// `log` sink writing one line per record
#[derive(Debug)]
pub struct SerialLogger {
    state: Mutex<SinkState>,
}

impl SerialLogger {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SinkState {
                uart: None,
                level: LevelFilter::Off,
            }),
        }
    }

    /// Route output to `uart` at up to `level`
    pub fn attach(&self, uart: Pl011, level: LevelFilter) {
        let mut state = self.state.lock();
        state.uart = Some(uart);
        state.level = level;
    }

    /// Stop writing and hand the UART back
    pub fn detach(&self) -> Option<Pl011> {
        let mut state = self.state.lock();
        state.level = LevelFilter::Off;
        state.uart.take()
    }
}

impl Default for SerialLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        let state = self.state.lock();
        state.uart.is_some() && metadata.level() <= state.level
    }

    fn log(&self, record: &Record<'_>) {
        use core::fmt::Write;

        let mut state = self.state.lock();
        if record.level() > state.level {
            return;
        }
        if let Some(uart) = state.uart.as_mut() {
            let _ = writeln!(uart, "[{:<5}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger::new();

/// Install the serial sink described by `context`
///
/// Without a UART in the context the facade stays silent. Installing twice
/// keeps the first sink.
pub fn init(context: &BootContext) -> Result<(), log::SetLoggerError> {
    let Some(base) = context.uart_base else {
        return Ok(());
    };
    // SAFETY: the boot context names the platform debug UART, which nothing
    // else drives during the hand-off
    LOGGER.attach(unsafe { Pl011::new(base) }, context.log_level);
    log::set_logger(&LOGGER)?;
    log::set_max_level(context.log_level);
    Ok(())
}
