//! Patch plans
//!
//! A plan is computed from a match without touching the image: a short list
//! of `(offset, bytes)` writes whose union is the erratum footprint. Applying
//! it is the only place that mutates image bytes, and every write is checked
//! against the image before the first byte changes.

use core::ops::Range;

use arrayvec::ArrayVec;

use crate::a64;
use crate::erratum::{Erratum, PAD, TRAMPOLINE_WORDS};
use crate::error::{PatchError, Result};

/// Branch word, trampoline double words and the pad double word
pub const MAX_WRITES: usize = 1 + TRAMPOLINE_WORDS / 2 + 1;

/// One store of up to eight bytes at an image offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchWrite {
    offset: usize,
    bytes: [u8; 8],
    len: u8,
}

impl PatchWrite {
    fn word(offset: usize, word: u32) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&word.to_le_bytes());
        Self { offset, bytes, len: 4 }
    }

    /// Two instructions stored as one 64-bit little-endian value
    fn pair(offset: usize, low: u32, high: u32) -> Self {
        let value = u64::from(low) | (u64::from(high) << 32);
        Self {
            offset,
            bytes: value.to_le_bytes(),
            len: 8,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + usize::from(self.len)
    }
}

/// Where a patch lands, relative to the start of its image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    pub match_offset: usize,
    pub branch_offset: usize,
    pub trampoline_offset: usize,
    pub pad_offset: usize,
}

/// Writes for one match of one erratum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPlan {
    site: PatchSite,
    footprint: Range<usize>,
    writes: ArrayVec<PatchWrite, MAX_WRITES>,
}

impl PatchPlan {
    /// Plan the patch for a match at `match_offset` in an image of `image_len` bytes
    pub fn for_match(erratum: &Erratum, match_offset: usize, image_len: usize) -> Result<Self> {
        let out_of_bounds = PatchError::OutOfBoundsPatch {
            offset: match_offset,
            image_len,
        };
        let footprint = erratum.footprint(match_offset).ok_or(out_of_bounds)?;
        if footprint.end > image_len {
            return Err(out_of_bounds);
        }

        let site = PatchSite {
            match_offset,
            branch_offset: footprint.start,
            trampoline_offset: erratum.trampoline_offset(match_offset).ok_or(out_of_bounds)?,
            pad_offset: erratum.pad_offset(match_offset).ok_or(out_of_bounds)?,
        };

        let mut writes = ArrayVec::new();
        writes.push(PatchWrite::word(
            site.branch_offset,
            a64::branch(site.branch_offset, site.trampoline_offset)?,
        ));
        for (index, pair) in erratum.trampoline.chunks_exact(2).enumerate() {
            let offset = site.trampoline_offset + index * 2 * a64::INSTRUCTION_LENGTH;
            writes.push(PatchWrite::pair(offset, pair[0], pair[1]));
        }
        writes.push(PatchWrite::pair(site.pad_offset, PAD[0], PAD[1]));

        Ok(Self {
            site,
            footprint,
            writes,
        })
    }

    pub fn site(&self) -> &PatchSite {
        &self.site
    }

    /// Byte range covered by the writes
    pub fn footprint(&self) -> Range<usize> {
        self.footprint.clone()
    }

    pub fn writes(&self) -> &[PatchWrite] {
        &self.writes
    }

    /// Write the plan into `image`
    ///
    /// Nothing is written unless every store fits.
    pub fn apply(&self, image: &mut [u8]) -> Result<()> {
        if self.writes.iter().any(|write| write.range().end > image.len()) {
            return Err(PatchError::OutOfBoundsPatch {
                offset: self.site.match_offset,
                image_len: image.len(),
            });
        }
        for write in &self.writes {
            image[write.range()].copy_from_slice(write.bytes());
        }
        Ok(())
    }
}
