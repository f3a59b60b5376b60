//! Hypercall status codes.
//!
//! Every hypercall terminates by writing one of these values into `p0`.
//! The numeric values are part of the wire contract and must not change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a hypercall, returned to user mode in `p0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum Status {
    /// Operation completed
    Success = 0,
    /// Operation would block or a deadline fired
    Timeout = 1,
    /// Operation was torn down mid-flight
    Aborted = 2,
    /// Invalid hypercall index
    BadHyp = 3,
    /// Capability missing, of the wrong type, or lacking a permission
    BadCap = 4,
    /// Malformed parameter
    BadPar = 5,
    /// Required hardware feature not available
    BadFtr = 6,
    /// CPU out of range or not local to the target object
    BadCpu = 7,
    /// Device not found
    BadDev = 8,
    /// Kernel object allocation failed
    MemObj = 9,
    /// Capability slot allocation failed
    MemCap = 10,
}

impl Status {
    /// Returns the wire encoding of this status.
    pub fn as_raw(self) -> u64 {
        self as u64
    }

    /// Decodes a wire value back into a status.
    pub fn from_raw(raw: u64) -> Option<Status> {
        Some(match raw {
            0 => Status::Success,
            1 => Status::Timeout,
            2 => Status::Aborted,
            3 => Status::BadHyp,
            4 => Status::BadCap,
            5 => Status::BadPar,
            6 => Status::BadFtr,
            7 => Status::BadCpu,
            8 => Status::BadDev,
            9 => Status::MemObj,
            10 => Status::MemCap,
            _ => return None,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::Timeout => "TIMEOUT",
            Status::Aborted => "ABORTED",
            Status::BadHyp => "BAD_HYP",
            Status::BadCap => "BAD_CAP",
            Status::BadPar => "BAD_PAR",
            Status::BadFtr => "BAD_FTR",
            Status::BadCpu => "BAD_CPU",
            Status::BadDev => "BAD_DEV",
            Status::MemObj => "MEM_OBJ",
            Status::MemCap => "MEM_CAP",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_values_are_pinned() {
        assert_eq!(Status::Success.as_raw(), 0);
        assert_eq!(Status::Timeout.as_raw(), 1);
        assert_eq!(Status::Aborted.as_raw(), 2);
        assert_eq!(Status::BadHyp.as_raw(), 3);
        assert_eq!(Status::BadCap.as_raw(), 4);
        assert_eq!(Status::BadPar.as_raw(), 5);
        assert_eq!(Status::BadFtr.as_raw(), 6);
        assert_eq!(Status::BadCpu.as_raw(), 7);
        assert_eq!(Status::BadDev.as_raw(), 8);
        assert_eq!(Status::MemObj.as_raw(), 9);
        assert_eq!(Status::MemCap.as_raw(), 10);
    }

    #[test]
    fn test_status_round_trip() {
        for raw in 0..=10 {
            let status = Status::from_raw(raw).expect("valid status");
            assert_eq!(status.as_raw(), raw);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert_eq!(Status::from_raw(11), None);
        assert_eq!(Status::from_raw(u64::MAX), None);
    }
}
