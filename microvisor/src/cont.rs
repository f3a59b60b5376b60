//! Continuations.
//!
//! An EC never suspends on a kernel stack. Instead it stores the next kernel
//! action to run when it is re-entered, as a tagged value in a single atomic
//! word. Two of the tags are sentinels: `None` means "waiting for an IPC
//! partner" and `Blocking` means "parked, no scheduler will run this EC".
//! An EC is *blocked* exactly when its continuation is one of the two.
//!
//! The word is atomic because `unblock` may run on a different CPU than the
//! EC's home CPU; the required orderings are documented on [`AtomicContinuation`].

use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_abi::Status;

/// How an EC re-enters user mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMode {
    /// Fast syscall return
    Sysexit,
    /// Exception frame return
    Exception,
    /// VM entry, VMX flavor
    VmxResume,
    /// VM entry, SVM flavor
    SvmRun,
}

impl UserMode {
    fn to_bits(self) -> usize {
        match self {
            UserMode::Sysexit => 0,
            UserMode::Exception => 1,
            UserMode::VmxResume => 2,
            UserMode::SvmRun => 3,
        }
    }

    fn from_bits(bits: usize) -> UserMode {
        match bits & 0x3 {
            0 => UserMode::Sysexit,
            1 => UserMode::Exception,
            2 => UserMode::VmxResume,
            _ => UserMode::SvmRun,
        }
    }
}

/// The next kernel action of an EC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Not yet entered, or waiting for an IPC partner (blocked sentinel)
    None,
    /// Parked (blocked sentinel)
    Blocking,
    /// Next entry kills the EC
    Dead,
    /// The per-CPU idle loop
    Idle,
    /// Fetch an IPC message produced by the kernel
    RecvKern,
    /// Copy the caller's UTCB
    RecvUser,
    /// Return to user mode
    RetUser(UserMode),
    /// Retry a user `call` after helping
    SysCall,
    /// Retry a kernel message send after helping; the mode is the resume
    /// continuation installed once the send succeeds
    SendMsg(UserMode),
    /// Write a status into `p0` and return to user mode; the flag requests
    /// clearing the hypercall timeout first
    Finish(Status, bool),
}

const TAG_NONE: usize = 0;
const TAG_BLOCKING: usize = 1;
const TAG_DEAD: usize = 2;
const TAG_IDLE: usize = 3;
const TAG_RECV_KERN: usize = 4;
const TAG_RECV_USER: usize = 5;
const TAG_RET_USER: usize = 6;
const TAG_SYS_CALL: usize = 7;
const TAG_SEND_MSG: usize = 8;
const TAG_FINISH: usize = 9;

impl Continuation {
    /// Packs the continuation into one word: tag in bits 3..0, payload above.
    pub fn to_bits(self) -> usize {
        match self {
            Continuation::None => TAG_NONE,
            Continuation::Blocking => TAG_BLOCKING,
            Continuation::Dead => TAG_DEAD,
            Continuation::Idle => TAG_IDLE,
            Continuation::RecvKern => TAG_RECV_KERN,
            Continuation::RecvUser => TAG_RECV_USER,
            Continuation::RetUser(mode) => TAG_RET_USER | (mode.to_bits() << 4),
            Continuation::SysCall => TAG_SYS_CALL,
            Continuation::SendMsg(mode) => TAG_SEND_MSG | (mode.to_bits() << 4),
            Continuation::Finish(status, clear) => {
                TAG_FINISH | ((status.as_raw() as usize) << 4) | ((clear as usize) << 9)
            }
        }
    }

    pub fn from_bits(bits: usize) -> Continuation {
        match bits & 0xf {
            TAG_NONE => Continuation::None,
            TAG_BLOCKING => Continuation::Blocking,
            TAG_DEAD => Continuation::Dead,
            TAG_IDLE => Continuation::Idle,
            TAG_RECV_KERN => Continuation::RecvKern,
            TAG_RECV_USER => Continuation::RecvUser,
            TAG_RET_USER => Continuation::RetUser(UserMode::from_bits(bits >> 4)),
            TAG_SYS_CALL => Continuation::SysCall,
            TAG_SEND_MSG => Continuation::SendMsg(UserMode::from_bits(bits >> 4)),
            TAG_FINISH => {
                let status = Status::from_raw(((bits >> 4) & 0xf) as u64)
                    .expect("finish continuation carries a valid status");
                Continuation::Finish(status, bits & (1 << 9) != 0)
            }
            _ => unreachable!("unknown continuation tag"),
        }
    }

    /// The two sentinels that mean "no scheduler may run this EC".
    pub fn is_blocked(self) -> bool {
        matches!(self, Continuation::None | Continuation::Blocking)
    }
}

/// Atomic cell holding a [`Continuation`].
///
/// Ordering contract (the semaphore protocol depends on it):
/// - `block` stores RELAXED (same CPU as the subsequent `blocked` check)
/// - `unblock` stores RELEASE when crossing CPUs, RELAXED otherwise
/// - `blocked` loads ACQUIRE
#[derive(Debug)]
pub struct AtomicContinuation(AtomicUsize);

impl AtomicContinuation {
    pub fn new(cont: Continuation) -> Self {
        Self(AtomicUsize::new(cont.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> Continuation {
        Continuation::from_bits(self.0.load(order))
    }

    pub fn store(&self, cont: Continuation, order: Ordering) {
        self.0.store(cont.to_bits(), order);
    }

    pub fn compare_exchange(
        &self,
        current: Continuation,
        new: Continuation,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Continuation, Continuation> {
        self.0
            .compare_exchange(current.to_bits(), new.to_bits(), success, failure)
            .map(Continuation::from_bits)
            .map_err(Continuation::from_bits)
    }
}
