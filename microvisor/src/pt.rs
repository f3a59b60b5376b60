//! Portals.
//!
//! A portal is an immutable call target: the server EC and entry IP are
//! fixed at creation, as is the MTD used for kernel-produced messages. Only
//! the badge id may change afterwards.

use crate::ec::Ec;
use crate::object::{KObject, ObjectType, Slab, Subtype};
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_abi::Mtd;
use std::sync::Arc;

#[derive(Debug)]
pub struct Pt {
    header: KObject,
    /// Server EC; always LOCAL.
    pub(crate) ec: Arc<Ec>,
    /// Entry instruction pointer seeded into the server frame.
    pub(crate) ip: u64,
    /// MTD applied to kernel-produced messages through this portal.
    pub(crate) mtd: Mtd,
    /// Badge delivered in `p0` of the server; mutable via `ctrl_pt`.
    id: AtomicU64,
    slab: Arc<Slab>,
}

impl Pt {
    pub(crate) fn new(ec: Arc<Ec>, ip: u64, mtd: Mtd, id: u64, slab: Arc<Slab>) -> Arc<Pt> {
        Arc::new(Pt {
            header: KObject::new(ObjectType::Pt, Subtype::Pt),
            ec,
            ip,
            mtd,
            id: AtomicU64::new(id),
            slab,
        })
    }

    pub fn header(&self) -> &KObject {
        &self.header
    }

    pub fn server(&self) -> &Arc<Ec> {
        &self.ec
    }

    pub fn ip(&self) -> u64 {
        self.ip
    }

    pub fn mtd(&self) -> Mtd {
        self.mtd
    }

    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    pub fn set_id(&self, id: u64) {
        self.id.store(id, Ordering::Release);
    }

    pub(crate) fn destroy(&self) {
        if self.header.mark_destroyed() {
            self.slab.put();
        }
    }
}
