//! User register frame and hazards.

use bitflags::bitflags;
use kernel_abi::{Status, SysArgs};

/// Number of general-purpose registers in the frame.
pub const NUM_GPR: usize = 16;

bitflags! {
    /// Deferred actions consulted on every user-mode return.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hazard: u32 {
        /// Divert the next user return into the recall event portal.
        const RECALL     = 1 << 0;
        /// Reload the FPU before returning.
        const FPU        = 1 << 1;
        /// Re-apply the vCPU time offset before VM entry.
        const TSC_OFFSET = 1 << 2;
        /// CPU-level: a sleep transition has been staged.
        const SLEEP      = 1 << 3;
    }
}

/// Saved user state of an EC.
///
/// The first six GPRs double as the hypercall argument words `p0..p5`; a
/// status written by `sys_finish` therefore lands in `gpr[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub gpr: [u64; NUM_GPR],
    pub ip: u64,
    pub sp: u64,
    pub flags: u64,
    /// Event vector (exception number or VM-exit reason)
    pub vec: u64,
    /// Event error code / exit qualification
    pub err: u64,
    pub seg: [u64; 6],
    pub ctrl: [u64; 4],
    pub dbg: [u64; 4],
    pub fpu: [u64; 8],
}

impl Frame {
    pub fn new() -> Frame {
        Frame {
            gpr: [0; NUM_GPR],
            ip: 0,
            sp: 0,
            flags: 0,
            vec: 0,
            err: 0,
            seg: [0; 6],
            ctrl: [0; 4],
            dbg: [0; 4],
            fpu: [0; 8],
        }
    }

    /// The hypercall argument view of the frame.
    pub fn sys_args(&self) -> SysArgs {
        let mut p = [0; 6];
        p.copy_from_slice(&self.gpr[..6]);
        SysArgs { p }
    }

    pub fn set_sys_args(&mut self, args: SysArgs) {
        self.gpr[..6].copy_from_slice(&args.p);
    }

    /// Writes a hypercall result into `p0`.
    pub fn set_status(&mut self, status: Status) {
        self.gpr[0] = status.as_raw();
    }

    /// Reads the hypercall result from `p0`.
    pub fn status(&self) -> Option<Status> {
        Status::from_raw(self.gpr[0])
    }

    /// Writes a hypercall data result into `p1`.
    pub fn set_p1(&mut self, value: u64) {
        self.gpr[1] = value;
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sys_args_alias_low_gprs() {
        let mut frame = Frame::new();
        frame.set_sys_args(SysArgs { p: [1, 2, 3, 4, 5, 6] });
        assert_eq!(frame.gpr[0], 1);
        assert_eq!(frame.gpr[5], 6);
        assert_eq!(frame.sys_args().p, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_status_lands_in_p0() {
        let mut frame = Frame::new();
        frame.set_status(Status::BadCap);
        assert_eq!(frame.sys_args().p[0], Status::BadCap.as_raw());
        assert_eq!(frame.status(), Some(Status::BadCap));
    }
}
