//! Kernel-object base.
//!
//! Every kernel object carries a small header (type, subtype, trace
//! identity) and draws its storage credit from a slab budget. Destruction is
//! two-phase: `destroy` returns the slab credit and fires the lifecycle
//! trace event exactly once; the memory itself is reclaimed when the last
//! strong reference drops, which cannot happen before the object has been
//! deselected on every CPU.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use serde::{Deserialize, Serialize};

/// Coarse object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Pd,
    Ec,
    Sc,
    Pt,
    Sm,
    Space,
}

/// Fine object kind; space subtypes double as bit indices in a PD's
/// attached-spaces set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subtype {
    Pd,
    Obj,
    Hst,
    Gst,
    Dma,
    Pio,
    Msr,
    EcGlobal,
    EcLocal,
    EcVcpuReal,
    EcVcpuOffs,
    Sc,
    Pt,
    Sm,
}

impl Subtype {
    /// Bit index used by the PD attach set; only space subtypes have one.
    pub fn space_bit(self) -> Option<u32> {
        Some(match self {
            Subtype::Obj => 0,
            Subtype::Hst => 1,
            Subtype::Gst => 2,
            Subtype::Dma => 3,
            Subtype::Pio => 4,
            Subtype::Msr => 5,
            _ => return None,
        })
    }

    pub fn is_vcpu(self) -> bool {
        matches!(self, Subtype::EcVcpuReal | Subtype::EcVcpuOffs)
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Common object header.
#[derive(Debug)]
pub struct KObject {
    pub otype: ObjectType,
    pub subtype: Subtype,
    /// Monotonic identity used in trace events.
    pub id: u64,
    destroyed: AtomicBool,
}

impl KObject {
    pub fn new(otype: ObjectType, subtype: Subtype) -> KObject {
        KObject {
            otype,
            subtype,
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            destroyed: AtomicBool::new(false),
        }
    }

    /// First call wins; later calls are no-ops.
    pub fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }
}

/// A per-PD, per-object-type allocation budget.
///
/// One PD exhausting its budget cannot starve another PD: each PD owns its
/// own slabs and objects return their credit on destroy.
#[derive(Debug)]
pub struct Slab {
    name: &'static str,
    used: AtomicUsize,
    capacity: usize,
}

impl Slab {
    pub fn new(name: &'static str, capacity: usize) -> Slab {
        Slab {
            name,
            used: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Takes one credit; `false` means the budget is exhausted.
    pub fn take(&self) -> bool {
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            if used >= self.capacity {
                return false;
            }
            match self.used.compare_exchange_weak(
                used,
                used + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => used = actual,
            }
        }
    }

    /// Returns one credit.
    pub fn put(&self) {
        let prev = self.used.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "slab {} underflow", self.name);
    }

    pub fn in_use(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ids_are_unique() {
        let a = KObject::new(ObjectType::Ec, Subtype::EcGlobal);
        let b = KObject::new(ObjectType::Ec, Subtype::EcLocal);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_destroy_is_one_shot() {
        let header = KObject::new(ObjectType::Sm, Subtype::Sm);
        assert!(header.mark_destroyed());
        assert!(!header.mark_destroyed());
    }

    #[test]
    fn test_slab_budget() {
        let slab = Slab::new("ec", 2);
        assert!(slab.take());
        assert!(slab.take());
        assert!(!slab.take());
        slab.put();
        assert!(slab.take());
        assert_eq!(slab.in_use(), 2);
    }

    #[test]
    fn test_space_bits() {
        assert_eq!(Subtype::Obj.space_bit(), Some(0));
        assert_eq!(Subtype::Msr.space_bit(), Some(5));
        assert_eq!(Subtype::EcGlobal.space_bit(), None);
    }
}
