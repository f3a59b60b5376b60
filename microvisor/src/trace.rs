//! Structured kernel trace log.
//!
//! The kernel never prints; it records. Every syscall entry, rejection,
//! lifecycle step, IPI and kill lands here as a typed event that harnesses
//! can snapshot and assert on.

use crate::object::{ObjectType, Subtype};
use crate::platform::IpiKind;
use kernel_abi::Status;
use serde::{Deserialize, Serialize};
use spin::Mutex;

/// One recorded kernel decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A hypercall entered the dispatcher
    Syscall { ec: u64, hypercall: String },
    /// A hypercall failed validation
    SyscallRejected {
        ec: u64,
        hypercall: String,
        status: Status,
    },
    /// A kernel object came to life
    ObjectCreated {
        id: u64,
        otype: ObjectType,
        subtype: Subtype,
    },
    /// A kernel object released its resources
    ObjectDestroyed { id: u64 },
    /// An EC was killed on a kernel IPC path
    EcKilled { ec: u64, reason: String },
    /// An inter-processor interrupt was sent
    IpiSent { kind: IpiKind, cpu: usize },
    /// The scheduler selected an SC
    ScSelected { sc: u64, cpu: usize },
    /// A hypercall timeout fired
    TimeoutFired { ec: u64, now: u64 },
    /// An ACPI sleep transition was staged
    SleepStaged { state: u16 },
}

/// Append-only event log.
#[derive(Debug, Default)]
pub struct TraceLog {
    events: Mutex<Vec<TraceEvent>>,
}

impl TraceLog {
    pub fn new() -> TraceLog {
        TraceLog {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, event: TraceEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&TraceEvent) -> bool,
    {
        self.events.lock().iter().any(|e| predicate(e))
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&TraceEvent) -> bool,
    {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let log = TraceLog::new();
        log.record(TraceEvent::Syscall {
            ec: 1,
            hypercall: "call".to_string(),
        });
        log.record(TraceEvent::SyscallRejected {
            ec: 1,
            hypercall: "call".to_string(),
            status: Status::BadCap,
        });

        assert_eq!(log.events().len(), 2);
        assert!(log.has_event(|e| matches!(e, TraceEvent::SyscallRejected { .. })));
        assert_eq!(
            log.count_events(|e| matches!(e, TraceEvent::Syscall { .. })),
            1
        );

        log.clear();
        assert!(log.events().is_empty());
    }
}
