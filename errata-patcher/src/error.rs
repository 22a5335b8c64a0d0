//! Patcher error handling
//!
//! Nothing at this boot stage can be retried: an error is either benign
//! (the occurrence or module is skipped and boot continues) or fatal (the
//! boot core halts). [`PatchError::is_fatal`] draws that line.

use core::fmt;

/// Patcher error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchError {
    /// No image contained any erratum signature
    NoSignatureFound,

    /// The patch footprint around a match does not fit inside its image
    OutOfBoundsPatch { offset: usize, image_len: usize },

    /// A match lies inside the footprint of a patch already applied
    OverlappingPatch { offset: usize },

    /// Image descriptor with a null base, zero size or a range outside memory
    InvalidModule { base: u64, size: usize },

    /// The load-order list did not return to its head
    MalformedModuleList { visited: usize },

    /// Branch distance is not a whole number of instructions
    MisalignedBranch,

    /// Branch distance does not fit in the 26-bit immediate
    BranchOutOfRange,

    /// Kernel entry point is null or misaligned
    InvalidContinuation,

    /// The kernel entry point returned
    EntryReturned,
}

impl PatchError {
    /// Code reported on the serial log and by host tooling
    pub fn as_error_code(&self) -> u32 {
        match self {
            PatchError::NoSignatureFound => 0x1000,
            PatchError::OutOfBoundsPatch { .. } => 0x2000,
            PatchError::OverlappingPatch { .. } => 0x2001,
            PatchError::InvalidModule { .. } => 0x3000,
            PatchError::MalformedModuleList { .. } => 0x3001,
            PatchError::MisalignedBranch => 0x4000,
            PatchError::BranchOutOfRange => 0x4001,
            PatchError::InvalidContinuation => 0x5000,
            PatchError::EntryReturned => 0x5001,
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            PatchError::NoSignatureFound => "No erratum signature found",
            PatchError::OutOfBoundsPatch { .. } => "Patch does not fit inside the image",
            PatchError::OverlappingPatch { .. } => "Match overlaps an applied patch",
            PatchError::InvalidModule { .. } => "Invalid module descriptor",
            PatchError::MalformedModuleList { .. } => "Load-order list is not circular",
            PatchError::MisalignedBranch => "Branch distance not instruction aligned",
            PatchError::BranchOutOfRange => "Branch distance out of range",
            PatchError::InvalidContinuation => "Invalid kernel entry point",
            PatchError::EntryReturned => "Kernel entry point returned",
        }
    }

    /// Fatal errors stop the boot core; everything else skips and continues
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PatchError::MalformedModuleList { .. }
                | PatchError::InvalidContinuation
                | PatchError::EntryReturned
        )
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::OutOfBoundsPatch { offset, image_len } => write!(
                f,
                "{} (match at {:#x}, image is {:#x} bytes)",
                self.description(),
                offset,
                image_len
            ),
            PatchError::OverlappingPatch { offset } => {
                write!(f, "{} (match at {:#x})", self.description(), offset)
            }
            PatchError::InvalidModule { base, size } => {
                write!(f, "{} (base {:#x}, size {:#x})", self.description(), base, size)
            }
            PatchError::MalformedModuleList { visited } => {
                write!(f, "{} after {} entries", self.description(), visited)
            }
            _ => f.write_str(self.description()),
        }
    }
}

/// Result type for patcher operations
pub type Result<T> = core::result::Result<T, PatchError>;
