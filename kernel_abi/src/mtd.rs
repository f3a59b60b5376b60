//! Message-transfer descriptor.
//!
//! The MTD is a fixed-width bitmask selecting which register groups move
//! between the two sides of an IPC. The groups always transfer in the order
//! of [`TRANSFER_ORDER`], and each group occupies a fixed word range in the
//! UTCB (the running sum of the widths of all preceding groups), regardless
//! of which other groups the descriptor selects. That keeps UTCB offsets
//! stable across descriptors.

use bitflags::bitflags;

bitflags! {
    /// Register groups selectable for transfer.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Mtd: u64 {
        /// General-purpose registers (16 words)
        const GPR   = 1 << 0;
        /// Instruction pointer (1 word)
        const IP    = 1 << 1;
        /// Stack pointer (1 word)
        const SP    = 1 << 2;
        /// Flags register (1 word)
        const FLAGS = 1 << 3;
        /// Event qualification: vector and error code (2 words)
        const QUAL  = 1 << 4;
        /// Segment registers (6 words)
        const SEG   = 1 << 5;
        /// Control registers (4 words)
        const CTRL  = 1 << 6;
        /// Debug registers (4 words)
        const DBG   = 1 << 7;
        /// FPU transfer block (8 words)
        const FPU   = 1 << 8;
    }
}

/// One entry of the fixed transfer order.
#[derive(Debug, Clone, Copy)]
pub struct MtdGroup {
    pub group: Mtd,
    pub words: usize,
}

/// Transfer order and group widths. The UTCB offset of a group is the sum
/// of the widths of all entries before it.
pub const TRANSFER_ORDER: [MtdGroup; 9] = [
    MtdGroup { group: Mtd::GPR, words: 16 },
    MtdGroup { group: Mtd::IP, words: 1 },
    MtdGroup { group: Mtd::SP, words: 1 },
    MtdGroup { group: Mtd::FLAGS, words: 1 },
    MtdGroup { group: Mtd::QUAL, words: 2 },
    MtdGroup { group: Mtd::SEG, words: 6 },
    MtdGroup { group: Mtd::CTRL, words: 4 },
    MtdGroup { group: Mtd::DBG, words: 4 },
    MtdGroup { group: Mtd::FPU, words: 8 },
];

/// UTCB size in words (one 4 KiB page of `u64`s).
pub const UTCB_WORDS: usize = 512;

/// Returns the fixed UTCB word offset of a single group.
pub fn group_offset(group: Mtd) -> usize {
    let mut offset = 0;
    for entry in TRANSFER_ORDER {
        if entry.group == group {
            return offset;
        }
        offset += entry.words;
    }
    panic!("not a single transfer group: {group:?}");
}
