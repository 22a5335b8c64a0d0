//! Word-aligned signature scanner

use crate::a64::INSTRUCTION_LENGTH;

/// Scans image bytes for one instruction word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scanner {
    signature: [u8; INSTRUCTION_LENGTH],
}

impl Scanner {
    pub const fn new(signature: u32) -> Self {
        Self {
            signature: signature.to_le_bytes(),
        }
    }

    /// First match at or after `from`, rounded up to the next word
    ///
    /// A trailing partial word is never compared.
    pub fn find_from(&self, image: &[u8], from: usize) -> Option<usize> {
        let start = from.checked_next_multiple_of(INSTRUCTION_LENGTH)?;
        let tail = image.get(start..)?;
        tail.chunks_exact(INSTRUCTION_LENGTH)
            .position(|word| word == self.signature)
            .map(|index| start + index * INSTRUCTION_LENGTH)
    }

    /// Every match in `image`, in ascending order
    pub fn matches<'a>(&self, image: &'a [u8]) -> Matches<'a> {
        Matches {
            scanner: *self,
            image,
            cursor: 0,
        }
    }
}

/// Iterator over the match offsets of a read-only image
#[derive(Debug, Clone)]
pub struct Matches<'a> {
    scanner: Scanner,
    image: &'a [u8],
    cursor: usize,
}

impl Iterator for Matches<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let offset = self.scanner.find_from(self.image, self.cursor)?;
        self.cursor = offset + INSTRUCTION_LENGTH;
        Some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNATURE: u32 = 0xD518_CBAA;

    fn image_with(words: &[(usize, u32)], len: usize) -> Vec<u8> {
        let mut image = vec![0u8; len];
        for &(offset, word) in words {
            image[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
        }
        image
    }

    #[test]
    fn test_no_match() {
        let image = image_with(&[], 256);
        assert_eq!(Scanner::new(SIGNATURE).find_from(&image, 0), None);
        assert_eq!(Scanner::new(SIGNATURE).matches(&image).count(), 0);
    }

    #[test]
    fn test_finds_every_match_in_order() {
        let image = image_with(&[(0, SIGNATURE), (0x40, SIGNATURE), (0xFC, SIGNATURE)], 256);
        let found: Vec<usize> = Scanner::new(SIGNATURE).matches(&image).collect();
        assert_eq!(found, vec![0, 0x40, 0xFC]);
    }

    #[test]
    fn test_ignores_unaligned_occurrence() {
        let mut image = vec![0u8; 64];
        image[6..10].copy_from_slice(&SIGNATURE.to_le_bytes());
        assert_eq!(Scanner::new(SIGNATURE).find_from(&image, 0), None);
    }

    #[test]
    fn test_ignores_trailing_partial_word() {
        let mut image = image_with(&[], 16);
        image.extend_from_slice(&SIGNATURE.to_le_bytes()[..3]);
        assert_eq!(Scanner::new(SIGNATURE).find_from(&image, 0), None);
    }

    #[test]
    fn test_find_from_rounds_up() {
        let image = image_with(&[(8, SIGNATURE), (16, SIGNATURE)], 32);
        let scanner = Scanner::new(SIGNATURE);
        assert_eq!(scanner.find_from(&image, 8), Some(8));
        assert_eq!(scanner.find_from(&image, 9), Some(16));
        assert_eq!(scanner.find_from(&image, 64), None);
    }
}
