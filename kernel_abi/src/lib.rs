//! # Kernel ABI
//!
//! This crate defines the wire-exact interface between user-space code and
//! the microhypervisor kernel.
//!
//! ## Philosophy
//!
//! The ABI is **register-shaped, not message-shaped**: every hypercall is six
//! `u64` words (`p0..p5`), the low four bits of `p0` select the operation,
//! and the result travels back in `p0` as a [`Status`]. Typed views own the
//! bit packing so that neither the kernel nor a user runtime ever picks at
//! raw words.
//!
//! ## Design Goals
//!
//! 1. **Wire-exact**: encodings here are the contract; tests pin them
//! 2. **No kernel state**: this crate is plain data, usable from either side
//! 3. **Type safety**: selectors, descriptors, and flags are distinct types

pub mod event;
pub mod mtd;
pub mod status;
pub mod syscall;

pub use event::{Qpd, EV_RECALL, EV_STARTUP};
pub use mtd::{Mtd, UTCB_WORDS};
pub use status::Status;
pub use syscall::{
    ec_flags, sm_flags, AbiError, CreatePdOp, Hypercall, MemAttr, Sel, SysArgs, SysAssignDev,
    SysAssignInt, SysCreateEc, SysCreatePd, SysCreatePt, SysCreateSc, SysCreateSm, SysCtrlEc,
    SysCtrlHw, SysCtrlPd, SysCtrlPt, SysCtrlSc, SysCtrlSm, SysIpcCall, SysIpcReply,
    CREATE_PD_DELEGATE_OP,
};

/// Page size used for UTCB placement checks.
pub const PAGE_BITS: u32 = 12;

/// Exclusive upper bound of the user address space.
pub const USER_ADDR_LIMIT: u64 = 1 << 47;
