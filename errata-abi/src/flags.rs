//! Loader entry flag bits

use bitflags::bitflags;

bitflags! {
    /// `Flags` word of a loader data table entry
    ///
    /// Only the bits the loader sets for boot-time images are named; unknown
    /// bits are retained so the raw value survives a round trip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModuleFlags: u32 {
        const STATIC_LINK = 0x0000_0002;
        const IMAGE_DLL = 0x0000_0004;
        const LOAD_IN_PROGRESS = 0x0000_1000;
        const UNLOAD_IN_PROGRESS = 0x0000_2000;
        const ENTRY_PROCESSED = 0x0000_4000;
        const DONT_CALL_FOR_THREADS = 0x0004_0000;
        const PROCESS_ATTACH_CALLED = 0x0008_0000;
    }
}

impl ModuleFlags {
    /// Interpret a raw `Flags` word, keeping unnamed bits
    pub const fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    /// Image was still being mapped when the list was handed over
    pub const fn is_partially_loaded(&self) -> bool {
        self.contains(Self::LOAD_IN_PROGRESS) || self.contains(Self::UNLOAD_IN_PROGRESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bits_retained() {
        let flags = ModuleFlags::from_raw(0x8000_4004);
        assert!(flags.contains(ModuleFlags::IMAGE_DLL));
        assert!(flags.contains(ModuleFlags::ENTRY_PROCESSED));
        assert_eq!(flags.bits(), 0x8000_4004);
    }

    #[test]
    fn test_partially_loaded() {
        assert!(!ModuleFlags::IMAGE_DLL.is_partially_loaded());
        assert!(ModuleFlags::LOAD_IN_PROGRESS.is_partially_loaded());
        assert!(ModuleFlags::from_raw(0x2004).is_partially_loaded());
    }
}
