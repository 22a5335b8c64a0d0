//! Minimal A64 instruction encoder
//!
//! Only the handful of instructions the errata trampolines use. All
//! constructors are `const fn` so trampolines are assembled at compile time.

use crate::error::{PatchError, Result};

pub use errata_abi::INSTRUCTION_LENGTH;

/// 64-bit general purpose register X0..X30
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XReg(u8);

impl XReg {
    pub const fn new(index: u8) -> Self {
        assert!(index < 31, "X31 is not a general purpose register here");
        Self(index)
    }

    const fn bits(self) -> u32 {
        self.0 as u32
    }
}

pub const X8: XReg = XReg::new(8);
pub const X9: XReg = XReg::new(9);
pub const X10: XReg = XReg::new(10);
pub const X11: XReg = XReg::new(11);

/// Register number 31 read as the zero register
const XZR: u32 = 31;

/// System register operand of MRS/MSR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysReg {
    op0: u8,
    op1: u8,
    crn: u8,
    crm: u8,
    op2: u8,
}

impl SysReg {
    pub const fn new(op0: u8, op1: u8, crn: u8, crm: u8, op2: u8) -> Self {
        assert!(op0 == 2 || op0 == 3);
        assert!(op1 < 8 && crn < 16 && crm < 16 && op2 < 8);
        Self { op0, op1, crn, crm, op2 }
    }

    const fn bits(self) -> u32 {
        ((self.op0 as u32 & 1) << 19)
            | ((self.op1 as u32) << 16)
            | ((self.crn as u32) << 12)
            | ((self.crm as u32) << 8)
            | ((self.op2 as u32) << 5)
    }
}

pub const MPIDR_EL1: SysReg = SysReg::new(3, 0, 0, 0, 5);
pub const ICC_SGI1R_EL1: SysReg = SysReg::new(3, 0, 12, 11, 5);

/// Condition codes for B.cond
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Cond {
    Eq = 0b0000,
    Ne = 0b0001,
}

const B_OPCODE: u32 = 0x1400_0000;
const B_OPCODE_MASK: u32 = 0xFC00_0000;
const B_IMM26_MASK: u32 = 0x03FF_FFFF;

/// `b` with a signed distance counted in instructions
pub const fn b(insns: i32) -> u32 {
    B_OPCODE | (insns as u32 & B_IMM26_MASK)
}

/// `b` from byte offset `from` to byte offset `to` in the same image
pub fn branch(from: usize, to: usize) -> Result<u32> {
    let delta = to as i128 - from as i128;
    if delta % INSTRUCTION_LENGTH as i128 != 0 {
        return Err(PatchError::MisalignedBranch);
    }
    let insns = delta / INSTRUCTION_LENGTH as i128;
    if insns < -(1 << 25) || insns >= (1 << 25) {
        return Err(PatchError::BranchOutOfRange);
    }
    Ok(b(insns as i32))
}

/// Signed instruction distance of a `b`, or `None` for any other word
pub const fn decode_b(word: u32) -> Option<i32> {
    if word & B_OPCODE_MASK != B_OPCODE {
        return None;
    }
    // sign-extend imm26
    Some(((word & B_IMM26_MASK) << 6) as i32 >> 6)
}

/// `b.<cond>` with a signed distance counted in instructions
pub const fn b_cond(cond: Cond, insns: i32) -> u32 {
    0x5400_0000 | ((insns as u32 & 0x7_FFFF) << 5) | cond as u32
}

/// `lsl xd, xn, #shift` (alias of UBFM)
pub const fn lsl_imm(xd: XReg, xn: XReg, shift: u32) -> u32 {
    assert!(shift < 64);
    let immr = (64 - shift) % 64;
    let imms = 63 - shift;
    0xD340_0000 | (immr << 16) | (imms << 10) | (xn.bits() << 5) | xd.bits()
}

pub const fn mrs(xt: XReg, reg: SysReg) -> u32 {
    0xD530_0000 | reg.bits() | xt.bits()
}

pub const fn msr(reg: SysReg, xt: XReg) -> u32 {
    0xD510_0000 | reg.bits() | xt.bits()
}

/// `movz xd, #imm16`
pub const fn movz(xd: XReg, imm16: u16) -> u32 {
    0xD280_0000 | ((imm16 as u32) << 5) | xd.bits()
}

/// `cmp xn, xm` (alias of SUBS XZR, shifted register)
pub const fn cmp_reg(xn: XReg, xm: XReg) -> u32 {
    0xEB00_0000 | (xm.bits() << 16) | (xn.bits() << 5) | XZR
}

/// `cmp xn, #imm12` (alias of SUBS XZR, immediate)
pub const fn cmp_imm(xn: XReg, imm12: u32) -> u32 {
    assert!(imm12 < 4096);
    0xF100_0000 | (imm12 << 10) | (xn.bits() << 5) | XZR
}

/// `add xd, xn, #imm12`
pub const fn add_imm(xd: XReg, xn: XReg, imm12: u32) -> u32 {
    assert!(imm12 < 4096);
    0x9100_0000 | (imm12 << 10) | (xn.bits() << 5) | xd.bits()
}

/// `orr xd, xn, xm`
pub const fn orr_reg(xd: XReg, xn: XReg, xm: XReg) -> u32 {
    0xAA00_0000 | (xm.bits() << 16) | (xn.bits() << 5) | xd.bits()
}

pub const fn dsb_sy() -> u32 {
    0xD503_3F9F
}

pub const fn nop() -> u32 {
    0xD503_201F
}
