//! Patcher configuration

use crate::erratum::{Erratum, CATALOGUE};

/// Upper bound on load-order entries walked before the list is declared broken
pub const DEFAULT_MAX_MODULES: usize = 4096;

/// Physical range images are expected to live in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWindow {
    pub base: u64,
    pub size: u64,
}

impl MemoryWindow {
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// Last byte inside the window
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size).saturating_sub(1)
    }

    /// Whether `[base, base + len)` lies inside the window
    pub fn contains(&self, base: u64, len: u64) -> bool {
        if len == 0 {
            return base >= self.base && base <= self.end();
        }
        match base.checked_add(len - 1) {
            Some(last) => base >= self.base && last <= self.end(),
            None => false,
        }
    }
}

/// What the engine patches and how
#[derive(Debug, Clone, Copy)]
pub struct PatcherConfig {
    /// Errata to look for, scanned in order
    pub errata: &'static [Erratum],
    /// Entries walked before the load-order list is treated as malformed
    pub max_modules: usize,
    /// Clean/invalidate caches over every patched range
    pub sync_icache: bool,
    /// Plan and report patches without writing them
    pub dry_run: bool,
    /// Reject images outside this range, if set
    pub memory_window: Option<MemoryWindow>,
}

impl PatcherConfig {
    pub const fn new() -> Self {
        Self {
            errata: CATALOGUE,
            max_modules: DEFAULT_MAX_MODULES,
            sync_icache: true,
            dry_run: false,
            memory_window: None,
        }
    }

    pub const fn with_errata(mut self, errata: &'static [Erratum]) -> Self {
        self.errata = errata;
        self
    }

    pub const fn with_max_modules(mut self, max_modules: usize) -> Self {
        self.max_modules = max_modules;
        self
    }

    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub const fn with_memory_window(mut self, window: MemoryWindow) -> Self {
        self.memory_window = Some(window);
        self
    }
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}
