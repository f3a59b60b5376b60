//! UTCB: the per-EC kernel-mapped message page.
//!
//! A UTCB is 512 words. IPC moves data between two UTCBs (user-to-user
//! transfer) or between a register frame and a UTCB (kernel-produced
//! messages and reply translation), always group-by-group in the fixed MTD
//! order, touching exactly the groups the descriptor selects.

use crate::regs::Frame;
use kernel_abi::mtd::{group_offset, TRANSFER_ORDER};
use kernel_abi::{Mtd, UTCB_WORDS};
use spin::Mutex;

/// Per-EC message buffer.
#[derive(Debug)]
pub struct Utcb {
    words: Mutex<[u64; UTCB_WORDS]>,
}

impl Utcb {
    pub fn new() -> Utcb {
        Utcb {
            words: Mutex::new([0; UTCB_WORDS]),
        }
    }

    /// Reads one word; used by harnesses standing in for user code.
    pub fn read(&self, index: usize) -> u64 {
        self.words.lock()[index]
    }

    /// Writes one word; used by harnesses standing in for user code.
    pub fn write(&self, index: usize, value: u64) {
        self.words.lock()[index] = value;
    }

    /// Snapshot of the whole page.
    pub fn snapshot(&self) -> [u64; UTCB_WORDS] {
        *self.words.lock()
    }

    /// Copies the MTD-selected groups of `self` into `dst`.
    ///
    /// The two UTCBs belong to distinct ECs (a portal never targets the
    /// calling EC), so the two locks never alias.
    pub fn copy_to(&self, mtd: Mtd, dst: &Utcb) {
        let src = self.words.lock();
        let mut dst = dst.words.lock();
        let mut offset = 0;
        for entry in TRANSFER_ORDER {
            if mtd.contains(entry.group) {
                dst[offset..offset + entry.words].copy_from_slice(&src[offset..offset + entry.words]);
            }
            offset += entry.words;
        }
    }

    /// Loads the MTD-selected groups of a register frame into `self`.
    pub fn load_frame(&self, mtd: Mtd, frame: &Frame) {
        let mut words = self.words.lock();
        for entry in TRANSFER_ORDER {
            if !mtd.contains(entry.group) {
                continue;
            }
            let offset = group_offset(entry.group);
            let dst = &mut words[offset..offset + entry.words];
            let group = entry.group;
            if group == Mtd::GPR {
                dst.copy_from_slice(&frame.gpr);
            } else if group == Mtd::IP {
                dst[0] = frame.ip;
            } else if group == Mtd::SP {
                dst[0] = frame.sp;
            } else if group == Mtd::FLAGS {
                dst[0] = frame.flags;
            } else if group == Mtd::QUAL {
                dst[0] = frame.vec;
                dst[1] = frame.err;
            } else if group == Mtd::SEG {
                dst.copy_from_slice(&frame.seg);
            } else if group == Mtd::CTRL {
                dst.copy_from_slice(&frame.ctrl);
            } else if group == Mtd::DBG {
                dst.copy_from_slice(&frame.dbg);
            } else if group == Mtd::FPU {
                dst.copy_from_slice(&frame.fpu);
            }
        }
    }

    /// Stores the MTD-selected groups of `self` into a register frame.
    pub fn save_frame(&self, mtd: Mtd, frame: &mut Frame) {
        let words = self.words.lock();
        for entry in TRANSFER_ORDER {
            if !mtd.contains(entry.group) {
                continue;
            }
            let offset = group_offset(entry.group);
            let src = &words[offset..offset + entry.words];
            let group = entry.group;
            if group == Mtd::GPR {
                frame.gpr.copy_from_slice(src);
            } else if group == Mtd::IP {
                frame.ip = src[0];
            } else if group == Mtd::SP {
                frame.sp = src[0];
            } else if group == Mtd::FLAGS {
                frame.flags = src[0];
            } else if group == Mtd::QUAL {
                frame.vec = src[0];
                frame.err = src[1];
            } else if group == Mtd::SEG {
                frame.seg.copy_from_slice(src);
            } else if group == Mtd::CTRL {
                frame.ctrl.copy_from_slice(src);
            } else if group == Mtd::DBG {
                frame.dbg.copy_from_slice(src);
            } else if group == Mtd::FPU {
                frame.fpu.copy_from_slice(src);
            }
        }
    }
}

impl Default for Utcb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_selected_groups_only() {
        let src = Utcb::new();
        let dst = Utcb::new();
        for i in 0..UTCB_WORDS {
            src.write(i, i as u64 + 1);
        }

        src.copy_to(Mtd::GPR | Mtd::FLAGS, &dst);

        // GPR words (0..16) and FLAGS word (18) moved; IP/SP (16, 17) did not.
        for i in 0..16 {
            assert_eq!(dst.read(i), i as u64 + 1);
        }
        assert_eq!(dst.read(16), 0);
        assert_eq!(dst.read(17), 0);
        assert_eq!(dst.read(18), 19);
        assert_eq!(dst.read(19), 0);
    }

    #[test]
    fn test_frame_round_trip_is_bit_identical() {
        let utcb = Utcb::new();
        let mut frame = Frame::new();
        frame.gpr = core::array::from_fn(|i| 0x1000 + i as u64);
        frame.ip = 0xdead;
        frame.sp = 0xbeef;
        frame.flags = 0x202;
        frame.vec = 14;
        frame.err = 2;
        frame.seg = [1, 2, 3, 4, 5, 6];
        frame.fpu = [9; 8];

        let mtd = Mtd::GPR | Mtd::IP | Mtd::SP | Mtd::FLAGS | Mtd::QUAL | Mtd::SEG | Mtd::FPU;
        utcb.load_frame(mtd, &frame);

        let mut out = Frame::new();
        utcb.save_frame(mtd, &mut out);
        out.ctrl = frame.ctrl;
        out.dbg = frame.dbg;
        assert_eq!(out, frame);
    }

    #[test]
    fn test_save_frame_leaves_unselected_groups() {
        let utcb = Utcb::new();
        utcb.write(group_offset(Mtd::IP), 0x9999);

        let mut frame = Frame::new();
        frame.ip = 0x1111;
        frame.sp = 0x2222;

        utcb.save_frame(Mtd::SP, &mut frame);
        assert_eq!(frame.ip, 0x1111);
        assert_eq!(frame.sp, 0);
    }
}
