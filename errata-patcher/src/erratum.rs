//! Known kernel errata
//!
//! An erratum is matched by one 4-byte instruction word. Around each match
//! the patch has the same shape: the instruction `branch_back` slots before
//! the match becomes a branch to a trampoline written `trampoline_ahead`
//! slots after the match, and two no-ops pad the end of the trampoline.
//!
//! ```text
//!   m - 8    b   trampoline          (overwrites the original instruction)
//!   m        msr icc_sgi1r_el1, x10  (left in place, now unreachable)
//!   ...
//!   m + 96   trampoline, 12 words
//!   m + 144  nop; nop
//! ```

use core::ops::Range;

use errata_abi::instructions;

use crate::a64::{
    add_imm, b_cond, cmp_imm, cmp_reg, dsb_sy, lsl_imm, movz, mrs, msr, nop, orr_reg, Cond,
    ICC_SGI1R_EL1, MPIDR_EL1, X10, X11, X8, X9,
};

/// Number of instruction words in a trampoline
pub const TRAMPOLINE_WORDS: usize = 12;

/// Number of no-op words written after a trampoline
pub const PAD_WORDS: usize = 2;

/// Description of one patchable erratum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Erratum {
    /// Short identifier used in logs and reports
    pub name: &'static str,
    /// Instruction word identifying the defective sequence
    pub signature: u32,
    /// Instructions before the match that get replaced by the branch
    pub branch_back: usize,
    /// Instructions after the match where the trampoline starts
    pub trampoline_ahead: usize,
    /// Replacement logic, position independent
    pub trampoline: [u32; TRAMPOLINE_WORDS],
}

impl Erratum {
    /// Signature as the bytes it occupies in memory
    pub const fn signature_bytes(&self) -> [u8; 4] {
        self.signature.to_le_bytes()
    }

    /// Offset of the branch for a match at `match_offset`
    pub fn branch_offset(&self, match_offset: usize) -> Option<usize> {
        match_offset.checked_sub(instructions(self.branch_back))
    }

    /// Offset of the first trampoline word for a match at `match_offset`
    pub fn trampoline_offset(&self, match_offset: usize) -> Option<usize> {
        match_offset.checked_add(instructions(self.trampoline_ahead))
    }

    /// Offset of the no-op pad for a match at `match_offset`
    pub fn pad_offset(&self, match_offset: usize) -> Option<usize> {
        self.trampoline_offset(match_offset)?
            .checked_add(instructions(TRAMPOLINE_WORDS))
    }

    /// Every byte the patch writes for a match at `match_offset`
    pub fn footprint(&self, match_offset: usize) -> Option<Range<usize>> {
        let start = self.branch_offset(match_offset)?;
        let end = self.pad_offset(match_offset)?.checked_add(instructions(PAD_WORDS))?;
        Some(start..end)
    }
}

/// Broadcast SGI through ICC_SGI1R_EL1 with IRM set
///
/// The kernel builds the SGI value with the Interrupt Routing Mode bit set
/// and writes it once, expecting delivery to every other core. On the
/// affected interrupt controllers IRM is not honoured, so the trampoline
/// walks Aff1 slots 0..7 and sends a targeted SGI to each one that is not
/// the current core.
pub const GICV3_SGI_IRM: Erratum = Erratum {
    name: "gicv3-sgi-irm",
    signature: msr(ICC_SGI1R_EL1, X10),
    branch_back: 2,
    trampoline_ahead: 24,
    trampoline: sgi_broadcast_trampoline(),
};

/// Errata the patcher applies by default
pub static CATALOGUE: &[Erratum] = &[GICV3_SGI_IRM];

/// Entry: x8 holds the SGI INTID (already masked to 4 bits)
const fn sgi_broadcast_trampoline() -> [u32; TRAMPOLINE_WORDS] {
    [
        lsl_imm(X10, X8, 24),
        mrs(X8, MPIDR_EL1),
        movz(X11, 0),
        // .loop
        cmp_reg(X11, X8),
        b_cond(Cond::Eq, 5),
        lsl_imm(X9, X11, 8),
        orr_reg(X9, X9, X10),
        msr(ICC_SGI1R_EL1, X9),
        dsb_sy(),
        // .skip
        add_imm(X11, X11, 0x100),
        cmp_imm(X11, 0x800),
        b_cond(Cond::Ne, -8),
    ]
}

/// Words written after every trampoline
pub const PAD: [u32; PAD_WORDS] = [nop(), nop()];
