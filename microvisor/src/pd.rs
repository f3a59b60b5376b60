//! Protection domains.
//!
//! A PD bundles one object space, one host space and one PIO space, records
//! which space subtypes have been attached (each at most once), and owns the
//! per-type slab budgets that all dependent objects draw from.

use crate::cap::{Capability, ObjSpace, ObjectRef, PermPd, PermSp};
use crate::cont::Continuation;
use crate::cpu::CpuId;
use crate::ec::Ec;
use crate::object::{KObject, ObjectType, Slab, Subtype};
use crate::pt::Pt;
use crate::sc::Sc;
use crate::sm::Sm;
use crate::space::{DmaSpace, GstSpace, HstSpace, MsrSpace, PioSpace};
use crate::trace::{TraceEvent, TraceLog};
use crate::utcb::Utcb;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_abi::{Mtd, Sel, Status};
use spin::Mutex;
use std::sync::Arc;

/// Per-PD slab budgets, one per dependent object type.
#[derive(Debug)]
pub struct SlabSet {
    pub ec: Arc<Slab>,
    pub sc: Arc<Slab>,
    pub pt: Arc<Slab>,
    pub sm: Arc<Slab>,
    pub space: Arc<Slab>,
}

impl SlabSet {
    fn new(capacity: usize) -> SlabSet {
        SlabSet {
            ec: Arc::new(Slab::new("ec", capacity)),
            sc: Arc::new(Slab::new("sc", capacity)),
            pt: Arc::new(Slab::new("pt", capacity)),
            sm: Arc::new(Slab::new("sm", capacity)),
            space: Arc::new(Slab::new("space", capacity)),
        }
    }
}

#[derive(Debug)]
pub struct Pd {
    header: KObject,
    /// Bitset of attached space subtypes, indexed by `Subtype::space_bit`.
    spaces: AtomicU32,
    space_obj: Mutex<Option<Arc<ObjSpace>>>,
    space_hst: Mutex<Option<Arc<HstSpace>>>,
    space_pio: Mutex<Option<Arc<PioSpace>>>,
    pub slabs: SlabSet,
    slab: Arc<Slab>,
}

impl Pd {
    pub(crate) fn new(slab_capacity: usize, slab: Arc<Slab>) -> Arc<Pd> {
        Arc::new(Pd {
            header: KObject::new(ObjectType::Pd, Subtype::Pd),
            spaces: AtomicU32::new(0),
            space_obj: Mutex::new(None),
            space_hst: Mutex::new(None),
            space_pio: Mutex::new(None),
            slabs: SlabSet::new(slab_capacity),
            slab,
        })
    }

    pub fn header(&self) -> &KObject {
        &self.header
    }

    pub fn get_obj(&self) -> Option<Arc<ObjSpace>> {
        self.space_obj.lock().clone()
    }

    pub fn get_hst(&self) -> Option<Arc<HstSpace>> {
        self.space_hst.lock().clone()
    }

    pub fn get_pio(&self) -> Option<Arc<PioSpace>> {
        self.space_pio.lock().clone()
    }

    /// Claims a space subtype; each may be attached once per PD.
    fn attach(&self, subtype: Subtype) -> bool {
        let bit = subtype
            .space_bit()
            .expect("attach called with a non-space subtype");
        self.spaces.fetch_or(1 << bit, Ordering::AcqRel) & (1 << bit) == 0
    }

    fn detach(&self, subtype: Subtype) {
        let bit = subtype
            .space_bit()
            .expect("detach called with a non-space subtype");
        self.spaces.fetch_and(!(1 << bit), Ordering::AcqRel);
    }

    /// Boot-time space attachment for the kernel and root PDs, before any
    /// object space exists to hold the capabilities.
    pub(crate) fn attach_boot(
        &self,
        obj: Arc<ObjSpace>,
        hst: Arc<HstSpace>,
        pio: Arc<PioSpace>,
    ) {
        assert!(self.attach(Subtype::Obj), "boot pd: obj attached twice");
        assert!(self.attach(Subtype::Hst), "boot pd: hst attached twice");
        assert!(self.attach(Subtype::Pio), "boot pd: pio attached twice");
        *self.space_obj.lock() = Some(obj);
        *self.space_hst.lock() = Some(hst);
        *self.space_pio.lock() = Some(pio);
    }

    /// Creates a sub-PD and inserts its capability into `parent` at `sel`,
    /// masked by `perm_mask`.
    pub fn create_child(
        parent: &ObjSpace,
        sel: Sel,
        perm_mask: u8,
        slab_capacity: usize,
        pd_slab: &Arc<Slab>,
        trace: &TraceLog,
    ) -> Status {
        if !pd_slab.take() {
            return Status::MemObj;
        }
        let pd = Pd::new(slab_capacity, pd_slab.clone());
        trace.record(TraceEvent::ObjectCreated {
            id: pd.header.id,
            otype: ObjectType::Pd,
            subtype: Subtype::Pd,
        });

        let cap = Capability::new(ObjectRef::Pd(pd.clone()), PermPd::all().bits() & perm_mask);
        let status = parent.insert(sel, cap);
        if status != Status::Success {
            pd.destroy(trace);
            return Status::BadCap;
        }
        Status::Success
    }

    /// Attaches a space subtype, inserting its capability into `parent`.
    pub fn create_space(
        self: &Arc<Pd>,
        subtype: Subtype,
        parent: &ObjSpace,
        sel: Sel,
        trace: &TraceLog,
    ) -> Status {
        if !self.slabs.space.take() {
            return Status::MemObj;
        }
        if !self.attach(subtype) {
            self.slabs.space.put();
            return Status::BadCap;
        }

        let obj = match subtype {
            Subtype::Obj => {
                let space = Arc::new(ObjSpace::new());
                *self.space_obj.lock() = Some(space.clone());
                ObjectRef::Obj(space)
            }
            Subtype::Hst => {
                let space = Arc::new(HstSpace::new(false));
                *self.space_hst.lock() = Some(space.clone());
                ObjectRef::Hst(space)
            }
            Subtype::Pio => {
                let space = Arc::new(PioSpace::new());
                *self.space_pio.lock() = Some(space.clone());
                ObjectRef::Pio(space)
            }
            Subtype::Gst => ObjectRef::Gst(Arc::new(GstSpace::new())),
            Subtype::Dma => ObjectRef::Dma(Arc::new(DmaSpace::new())),
            Subtype::Msr => ObjectRef::Msr(Arc::new(MsrSpace::new())),
            _ => {
                self.detach(subtype);
                self.slabs.space.put();
                return Status::BadPar;
            }
        };
        trace.record(TraceEvent::ObjectCreated {
            id: obj.object_id(),
            otype: ObjectType::Space,
            subtype,
        });

        let status = parent.insert(sel, Capability::new(obj, PermSp::all().bits()));
        if status != Status::Success {
            self.rollback_space(subtype);
            return Status::BadCap;
        }
        Status::Success
    }

    fn rollback_space(&self, subtype: Subtype) {
        match subtype {
            Subtype::Obj => *self.space_obj.lock() = None,
            Subtype::Hst => *self.space_hst.lock() = None,
            Subtype::Pio => *self.space_pio.lock() = None,
            _ => {}
        }
        self.detach(subtype);
        self.slabs.space.put();
    }

    /// Allocates an EC bound to this PD's spaces.
    #[allow(clippy::too_many_arguments)]
    pub fn create_ec(
        &self,
        subtype: Subtype,
        cpu: CpuId,
        evt: u64,
        with_utcb: bool,
        fpu: bool,
        cont: Continuation,
        trace: &TraceLog,
    ) -> Result<Arc<Ec>, Status> {
        let (Some(obj), Some(hst), Some(pio)) = (self.get_obj(), self.get_hst(), self.get_pio())
        else {
            return Err(Status::BadCap);
        };
        if !self.slabs.ec.take() {
            return Err(Status::MemObj);
        }
        let utcb = with_utcb.then(|| Arc::new(Utcb::new()));
        let ec = Ec::new(subtype, cpu, evt, obj, hst, pio, utcb, fpu, cont, self.slabs.ec.clone());
        trace.record(TraceEvent::ObjectCreated {
            id: ec.header().id,
            otype: ObjectType::Ec,
            subtype,
        });
        Ok(ec)
    }

    /// Allocates an SC bound to `ec` on that EC's home CPU.
    pub fn create_sc(
        &self,
        ec: &Arc<Ec>,
        prio: u8,
        quantum: u32,
        trace: &TraceLog,
    ) -> Result<Arc<Sc>, Status> {
        if !self.slabs.sc.take() {
            return Err(Status::MemObj);
        }
        let sc = Sc::new(ec.clone(), ec.cpu(), prio, quantum, self.slabs.sc.clone());
        trace.record(TraceEvent::ObjectCreated {
            id: sc.header().id,
            otype: ObjectType::Sc,
            subtype: Subtype::Sc,
        });
        Ok(sc)
    }

    /// Allocates a portal targeting `ec`.
    pub fn create_pt(
        &self,
        ec: &Arc<Ec>,
        mtd: Mtd,
        ip: u64,
        id: u64,
        trace: &TraceLog,
    ) -> Result<Arc<Pt>, Status> {
        if !self.slabs.pt.take() {
            return Err(Status::MemObj);
        }
        let pt = Pt::new(ec.clone(), ip, mtd, id, self.slabs.pt.clone());
        trace.record(TraceEvent::ObjectCreated {
            id: pt.header().id,
            otype: ObjectType::Pt,
            subtype: Subtype::Pt,
        });
        Ok(pt)
    }

    /// Allocates a semaphore.
    pub fn create_sm(
        &self,
        count: u64,
        gsi: Option<u32>,
        trace: &TraceLog,
    ) -> Result<Arc<Sm>, Status> {
        if !self.slabs.sm.take() {
            return Err(Status::MemObj);
        }
        let sm = Sm::new(count, gsi, self.slabs.sm.clone());
        trace.record(TraceEvent::ObjectCreated {
            id: sm.header().id,
            otype: ObjectType::Sm,
            subtype: Subtype::Sm,
        });
        Ok(sm)
    }

    pub(crate) fn destroy(&self, trace: &TraceLog) {
        if self.header.mark_destroyed() {
            self.slab.put();
            trace.record(TraceEvent::ObjectDestroyed {
                id: self.header.id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_pd() -> (Arc<Pd>, Arc<ObjSpace>, TraceLog) {
        let pd_slab = Arc::new(Slab::new("pd", 8));
        assert!(pd_slab.take());
        let pd = Pd::new(16, pd_slab);
        let parent = Arc::new(ObjSpace::new());
        (pd, parent, TraceLog::new())
    }

    #[test]
    fn test_space_subtype_attaches_once() {
        let (pd, parent, trace) = fresh_pd();
        assert_eq!(
            pd.create_space(Subtype::Obj, &parent, Sel(1), &trace),
            Status::Success
        );
        assert_eq!(
            pd.create_space(Subtype::Obj, &parent, Sel(2), &trace),
            Status::BadCap
        );
        assert!(pd.get_obj().is_some());
    }

    #[test]
    fn test_occupied_selector_rolls_back_attach() {
        let (pd, parent, trace) = fresh_pd();
        assert_eq!(
            pd.create_space(Subtype::Obj, &parent, Sel(1), &trace),
            Status::Success
        );
        // Selector 1 is taken; the HST attach must roll back fully.
        assert_eq!(
            pd.create_space(Subtype::Hst, &parent, Sel(1), &trace),
            Status::BadCap
        );
        assert!(pd.get_hst().is_none());
        // The subtype is attachable again after the rollback.
        assert_eq!(
            pd.create_space(Subtype::Hst, &parent, Sel(2), &trace),
            Status::Success
        );
    }

    #[test]
    fn test_ec_requires_attached_spaces() {
        let (pd, parent, trace) = fresh_pd();
        let err = pd
            .create_ec(
                Subtype::EcLocal,
                CpuId(0),
                0,
                true,
                false,
                Continuation::None,
                &trace,
            )
            .err();
        assert_eq!(err, Some(Status::BadCap));

        for (subtype, sel) in [(Subtype::Obj, 1), (Subtype::Hst, 2), (Subtype::Pio, 3)] {
            assert_eq!(
                pd.create_space(subtype, &parent, Sel(sel), &trace),
                Status::Success
            );
        }
        assert!(pd
            .create_ec(
                Subtype::EcLocal,
                CpuId(0),
                0,
                true,
                false,
                Continuation::None,
                &trace,
            )
            .is_ok());
    }

    #[test]
    fn test_slab_budget_yields_mem_obj() {
        let pd_slab = Arc::new(Slab::new("pd", 8));
        assert!(pd_slab.take());
        let pd = Pd::new(1, pd_slab);
        let parent = Arc::new(ObjSpace::new());
        let trace = TraceLog::new();

        assert!(pd.create_sm(0, None, &trace).is_ok());
        assert_eq!(pd.create_sm(0, None, &trace).err(), Some(Status::MemObj));
    }

    #[test]
    fn test_child_pd_permissions_masked() {
        let (_, parent, trace) = fresh_pd();
        let pd_slab = Arc::new(Slab::new("pd", 8));
        let mask = (PermPd::PD | PermPd::SM).bits();
        assert_eq!(
            Pd::create_child(&parent, Sel(7), mask, 16, &pd_slab, &trace),
            Status::Success
        );

        let cap = parent.lookup(Sel(7));
        assert!(cap.pd(PermPd::SM).is_some());
        assert!(cap.pd(PermPd::EC).is_none());
    }
}
