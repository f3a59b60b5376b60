//! Kernel-originated event vectors and the QPD descriptor.

use crate::syscall::AbiError;
use serde::{Deserialize, Serialize};

/// Event-portal vector for the first activation of a GLOBAL EC.
pub const EV_STARTUP: u64 = 30;

/// Event-portal vector for a recall exit.
pub const EV_RECALL: u64 = 31;

/// Quantum/priority descriptor of a scheduling context.
///
/// Wire format: bits 7..0 priority (nonzero), bits 31..8 quantum in ticks
/// (nonzero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qpd(u64);

impl Qpd {
    /// Highest usable priority.
    pub const MAX_PRIO: u8 = 127;

    /// Builds a descriptor, rejecting zero priority or quantum.
    pub fn new(prio: u8, quantum: u32) -> Result<Qpd, AbiError> {
        let raw = (prio as u64) | ((quantum as u64) << 8);
        let qpd = Qpd(raw);
        if !qpd.is_valid() {
            return Err(AbiError::InvalidQpd(raw));
        }
        Ok(qpd)
    }

    pub fn from_raw(raw: u64) -> Qpd {
        Qpd(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn prio(self) -> u8 {
        self.0 as u8
    }

    pub fn quantum(self) -> u32 {
        ((self.0 >> 8) & 0xff_ffff) as u32
    }

    /// A descriptor is valid when both fields are nonzero and the priority
    /// is within range.
    pub fn is_valid(self) -> bool {
        self.prio() != 0 && self.prio() <= Self::MAX_PRIO && self.quantum() != 0
    }
}
