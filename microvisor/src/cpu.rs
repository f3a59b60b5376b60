//! Per-CPU state.
//!
//! Each virtual CPU owns a `current` EC slot (never empty after boot), the
//! donation counter driving priority inheritance, the partner-chain hop
//! counter, the lazy-FPU owner and a CPU-level hazard word.

use crate::ec::Ec;
use crate::regs::Hazard;
use core::sync::atomic::{AtomicU32, Ordering};
use serde::{Deserialize, Serialize};
use spin::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;

/// Identifier of a virtual CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuId(pub usize);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu:{}", self.0)
    }
}

/// Mutable per-CPU kernel state.
#[derive(Debug)]
pub struct Cpu {
    pub id: CpuId,
    /// The EC this CPU is executing. Published through a reader-writer slot
    /// so a remote CPU's read pairs with the local publish.
    current: RwLock<Option<Arc<Ec>>>,
    /// Count of open SC donations on this CPU.
    pub donations: AtomicU32,
    /// Hops taken through the partner chain during the last activation.
    pub ctr_link: AtomicU32,
    /// Helping rounds since the last schedule, to bound livelock.
    pub ctr_loop: AtomicU32,
    /// CPU-level hazards (SLEEP).
    pub hazard: AtomicU32,
    /// Last EC whose FPU state is loaded.
    pub(crate) fpowner: Mutex<Option<Arc<Ec>>>,
}

impl Cpu {
    pub fn new(id: CpuId) -> Cpu {
        Cpu {
            id,
            current: RwLock::new(None),
            donations: AtomicU32::new(0),
            ctr_link: AtomicU32::new(0),
            ctr_loop: AtomicU32::new(0),
            hazard: AtomicU32::new(0),
            fpowner: Mutex::new(None),
        }
    }

    /// The EC currently selected on this CPU.
    ///
    /// The slot is populated with the idle EC during boot and never emptied
    /// afterwards; an empty read is an impossible state.
    pub fn current(&self) -> Arc<Ec> {
        self.current
            .read()
            .clone()
            .expect("cpu has no current ec before boot finished")
    }

    pub(crate) fn set_current(&self, ec: Arc<Ec>) {
        *self.current.write() = Some(ec);
    }

    /// Whether `ec` is the EC this CPU is executing right now.
    pub fn is_current(&self, ec: &Arc<Ec>) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|cur| Arc::ptr_eq(cur, ec))
    }

    pub fn set_hazard(&self, hazard: Hazard) {
        self.hazard.fetch_or(hazard.bits(), Ordering::AcqRel);
    }

    pub fn clr_hazard(&self, hazard: Hazard) {
        self.hazard.fetch_and(!hazard.bits(), Ordering::AcqRel);
    }

    pub fn hazards(&self) -> Hazard {
        Hazard::from_bits_truncate(self.hazard.load(Ordering::Acquire))
    }
}
