//! Capabilities and the object space.
//!
//! A capability is `(object, permission bits)`; an object space maps
//! selectors to capabilities. Slots are insert-once: an occupied slot never
//! changes, so a concurrent lookup sees either the old empty slot or the
//! complete new capability, never a half-written one. Permission bits are
//! meaningful only against the subtype of the object they accompany, which
//! is why validation and downcast are one operation here.

use crate::ec::Ec;
use crate::object::{KObject, ObjectType, Subtype};
use crate::pd::Pd;
use crate::pt::Pt;
use crate::sc::Sc;
use crate::sm::Sm;
use crate::space::{DmaSpace, GstSpace, HstSpace, MsrSpace, PioSpace};
use bitflags::bitflags;
use kernel_abi::{Sel, Status};
use spin::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

bitflags! {
    /// Permissions on a PD capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PermPd: u8 {
        const PD = 1 << 0;
        const EC = 1 << 1;
        const SC = 1 << 2;
        const PT = 1 << 3;
        const SM = 1 << 4;
    }
}

bitflags! {
    /// Permissions on an EC capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PermEc: u8 {
        const CTRL    = 1 << 0;
        const BIND_PT = 1 << 1;
        const BIND_SC = 1 << 2;
    }
}

bitflags! {
    /// Permissions on an SC capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PermSc: u8 {
        const CTRL = 1 << 0;
    }
}

bitflags! {
    /// Permissions on a portal capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PermPt: u8 {
        const CTRL  = 1 << 0;
        const CALL  = 1 << 1;
        const EVENT = 1 << 2;
    }
}

bitflags! {
    /// Permissions on a semaphore capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PermSm: u8 {
        const CTRL_UP = 1 << 0;
        const CTRL_DN = 1 << 1;
        const ASSIGN  = 1 << 2;
    }
}

bitflags! {
    /// Permissions on a space capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PermSp: u8 {
        const TAKE   = 1 << 0;
        const GRANT  = 1 << 1;
        const ASSIGN = 1 << 2;
    }
}

/// Strong reference to any kernel object.
#[derive(Debug, Clone)]
pub enum ObjectRef {
    Pd(Arc<Pd>),
    Ec(Arc<Ec>),
    Sc(Arc<Sc>),
    Pt(Arc<Pt>),
    Sm(Arc<Sm>),
    Obj(Arc<ObjSpace>),
    Hst(Arc<HstSpace>),
    Pio(Arc<PioSpace>),
    Gst(Arc<GstSpace>),
    Dma(Arc<DmaSpace>),
    Msr(Arc<MsrSpace>),
}

impl ObjectRef {
    pub fn subtype(&self) -> Subtype {
        match self {
            ObjectRef::Pd(_) => Subtype::Pd,
            ObjectRef::Ec(ec) => ec.header().subtype,
            ObjectRef::Sc(_) => Subtype::Sc,
            ObjectRef::Pt(_) => Subtype::Pt,
            ObjectRef::Sm(_) => Subtype::Sm,
            ObjectRef::Obj(_) => Subtype::Obj,
            ObjectRef::Hst(_) => Subtype::Hst,
            ObjectRef::Pio(_) => Subtype::Pio,
            ObjectRef::Gst(_) => Subtype::Gst,
            ObjectRef::Dma(_) => Subtype::Dma,
            ObjectRef::Msr(_) => Subtype::Msr,
        }
    }

    /// Trace identity of the referenced object.
    pub fn object_id(&self) -> u64 {
        match self {
            ObjectRef::Pd(o) => o.header().id,
            ObjectRef::Ec(o) => o.header().id,
            ObjectRef::Sc(o) => o.header().id,
            ObjectRef::Pt(o) => o.header().id,
            ObjectRef::Sm(o) => o.header().id,
            ObjectRef::Obj(o) => o.header().id,
            ObjectRef::Hst(o) => o.header().id,
            ObjectRef::Pio(o) => o.header().id,
            ObjectRef::Gst(o) => o.header().id,
            ObjectRef::Dma(o) => o.header().id,
            ObjectRef::Msr(o) => o.header().id,
        }
    }

    fn is_space(&self) -> bool {
        matches!(
            self,
            ObjectRef::Obj(_)
                | ObjectRef::Hst(_)
                | ObjectRef::Pio(_)
                | ObjectRef::Gst(_)
                | ObjectRef::Dma(_)
                | ObjectRef::Msr(_)
        )
    }
}

/// One object-space slot: an object reference plus permission bits, or the
/// empty capability.
#[derive(Debug, Clone, Default)]
pub struct Capability {
    obj: Option<ObjectRef>,
    perm: u8,
}

impl Capability {
    pub const EMPTY: Capability = Capability { obj: None, perm: 0 };

    pub fn new(obj: ObjectRef, perm: u8) -> Capability {
        Capability {
            obj: Some(obj),
            perm,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.obj.is_none()
    }

    pub fn obj(&self) -> Option<&ObjectRef> {
        self.obj.as_ref()
    }

    pub fn perm(&self) -> u8 {
        self.perm
    }

    /// A copy with the permission set intersected with `mask`.
    pub fn masked(&self, mask: u8) -> Capability {
        Capability {
            obj: self.obj.clone(),
            perm: self.perm & mask,
        }
    }

    /// Validates a PD capability carrying `req` and downcasts.
    pub fn pd(&self, req: PermPd) -> Option<Arc<Pd>> {
        match &self.obj {
            Some(ObjectRef::Pd(pd)) if self.has(req.bits()) => Some(pd.clone()),
            _ => None,
        }
    }

    /// Validates an EC capability carrying `req` and downcasts.
    pub fn ec(&self, req: PermEc) -> Option<Arc<Ec>> {
        match &self.obj {
            Some(ObjectRef::Ec(ec)) if self.has(req.bits()) => Some(ec.clone()),
            _ => None,
        }
    }

    /// Validates an SC capability carrying `req` and downcasts.
    pub fn sc(&self, req: PermSc) -> Option<Arc<Sc>> {
        match &self.obj {
            Some(ObjectRef::Sc(sc)) if self.has(req.bits()) => Some(sc.clone()),
            _ => None,
        }
    }

    /// Validates a portal capability carrying `req` and downcasts.
    pub fn pt(&self, req: PermPt) -> Option<Arc<Pt>> {
        match &self.obj {
            Some(ObjectRef::Pt(pt)) if self.has(req.bits()) => Some(pt.clone()),
            _ => None,
        }
    }

    /// Validates a semaphore capability carrying `req` and downcasts.
    pub fn sm(&self, req: PermSm) -> Option<Arc<Sm>> {
        match &self.obj {
            Some(ObjectRef::Sm(sm)) if self.has(req.bits()) => Some(sm.clone()),
            _ => None,
        }
    }

    /// Validates a space capability carrying `req`; yields subtype and ref.
    pub fn space(&self, req: PermSp) -> Option<(Subtype, ObjectRef)> {
        match &self.obj {
            Some(obj) if obj.is_space() && self.has(req.bits()) => {
                Some((obj.subtype(), obj.clone()))
            }
            _ => None,
        }
    }

    fn has(&self, req: u8) -> bool {
        self.perm & req == req
    }
}

/// Validates the two ends of a delegation: the source capability must carry
/// TAKE, the destination GRANT, and both must be spaces.
pub fn validate_take_grant(
    src: &Capability,
    dst: &Capability,
) -> Option<(Subtype, ObjectRef, Subtype, ObjectRef)> {
    let (st, sobj) = src.space(PermSp::TAKE)?;
    let (dt, dobj) = dst.space(PermSp::GRANT)?;
    Some((st, sobj, dt, dobj))
}

/// Selector-indexed capability table.
#[derive(Debug)]
pub struct ObjSpace {
    header: KObject,
    slots: RwLock<HashMap<u64, Capability>>,
}

impl ObjSpace {
    /// Delegation ranges larger than this are malformed.
    pub const MAX_ORDER: u8 = 12;

    pub fn new() -> ObjSpace {
        ObjSpace {
            header: KObject::new(ObjectType::Space, Subtype::Obj),
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn header(&self) -> &KObject {
        &self.header
    }

    /// Total lookup: unmapped slots read as the empty capability.
    pub fn lookup(&self, sel: Sel) -> Capability {
        self.slots.read().get(&sel.0).cloned().unwrap_or_default()
    }

    /// Inserts into an empty slot; an occupied slot fails without mutation.
    pub fn insert(&self, sel: Sel, cap: Capability) -> Status {
        let mut slots = self.slots.write();
        match slots.get(&sel.0) {
            Some(existing) if !existing.is_empty() => Status::BadCap,
            _ => {
                slots.insert(sel.0, cap);
                Status::Success
            }
        }
    }

    /// Copies `2^ord` selectors from `src` starting at `ssb` into `self`
    /// starting at `dsb`, masking permissions with `pmm`. All-or-nothing:
    /// on failure the destination is untouched.
    pub fn delegate(&self, src: &ObjSpace, ssb: u64, dsb: u64, ord: u8, pmm: u8) -> Status {
        if ord > Self::MAX_ORDER {
            return Status::BadPar;
        }
        let count = 1u64 << ord;

        // Gather phase: every source slot must hold a capability.
        let mut staged = Vec::with_capacity(count as usize);
        {
            let slots = src.slots.read();
            for i in 0..count {
                match slots.get(&(ssb + i)) {
                    Some(cap) if !cap.is_empty() => staged.push(cap.masked(pmm)),
                    _ => return Status::BadCap,
                }
            }
        }

        // Commit phase: every destination slot must be empty, then all
        // inserts happen under one write lock.
        let mut slots = self.slots.write();
        for i in 0..count {
            if slots.get(&(dsb + i)).is_some_and(|cap| !cap.is_empty()) {
                return Status::BadCap;
            }
        }
        for (i, cap) in staged.into_iter().enumerate() {
            slots.insert(dsb + i as u64, cap);
        }
        Status::Success
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.read().values().filter(|c| !c.is_empty()).count()
    }

    /// Snapshot of occupied selectors, for whole-space comparisons in tests.
    pub fn selectors(&self) -> Vec<u64> {
        let mut sels: Vec<u64> = self
            .slots
            .read()
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(s, _)| *s)
            .collect();
        sels.sort_unstable();
        sels
    }
}

impl Default for ObjSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sm::Sm;

    fn sm_cap(perm: PermSm) -> Capability {
        Capability::new(ObjectRef::Sm(Sm::for_tests(0)), perm.bits())
    }

    #[test]
    fn test_lookup_is_total() {
        let space = ObjSpace::new();
        assert!(space.lookup(Sel(99)).is_empty());
    }

    #[test]
    fn test_insert_only_into_empty_slot() {
        let space = ObjSpace::new();
        assert_eq!(space.insert(Sel(1), sm_cap(PermSm::CTRL_UP)), Status::Success);
        assert_eq!(space.insert(Sel(1), sm_cap(PermSm::CTRL_DN)), Status::BadCap);

        // The original capability survives the failed insert.
        let cap = space.lookup(Sel(1));
        assert!(cap.sm(PermSm::CTRL_UP).is_some());
        assert!(cap.sm(PermSm::CTRL_DN).is_none());
    }

    #[test]
    fn test_permission_validation_is_per_subtype() {
        let cap = sm_cap(PermSm::CTRL_UP);
        // An EC permission bit means nothing on a semaphore capability.
        assert!(cap.ec(PermEc::CTRL).is_none());
        assert!(cap.sm(PermSm::CTRL_UP).is_some());
    }

    #[test]
    fn test_delegate_masks_permissions() {
        let src = ObjSpace::new();
        let dst = ObjSpace::new();
        src.insert(Sel(0x10), sm_cap(PermSm::CTRL_UP | PermSm::CTRL_DN));

        let status = dst.delegate(&src, 0x10, 0x20, 0, PermSm::CTRL_DN.bits());
        assert_eq!(status, Status::Success);

        let cap = dst.lookup(Sel(0x20));
        assert!(cap.sm(PermSm::CTRL_DN).is_some());
        assert!(cap.sm(PermSm::CTRL_UP).is_none());
    }

    #[test]
    fn test_delegate_is_all_or_nothing() {
        let src = ObjSpace::new();
        let dst = ObjSpace::new();
        // Only 3 of 4 source slots populated.
        for i in [0u64, 1, 3] {
            src.insert(Sel(0x10 + i), sm_cap(PermSm::CTRL_UP));
        }
        dst.insert(Sel(0x40), sm_cap(PermSm::CTRL_UP));
        let before = dst.selectors();

        assert_eq!(dst.delegate(&src, 0x10, 0x20, 2, 0xff), Status::BadCap);
        assert_eq!(dst.selectors(), before);

        // A fully-populated source range delegates; an occupied destination
        // slot still refuses without partial effect.
        src.insert(Sel(0x12), sm_cap(PermSm::CTRL_UP));
        assert_eq!(dst.delegate(&src, 0x10, 0x30, 2, 0xff), Status::Success);
        assert_eq!(dst.delegate(&src, 0x10, 0x40, 0, 0xff), Status::BadCap);
        assert_eq!(dst.lookup(Sel(0x30)).is_empty(), false);
    }

    #[test]
    fn test_delegate_rejects_oversized_order() {
        let src = ObjSpace::new();
        let dst = ObjSpace::new();
        assert_eq!(dst.delegate(&src, 0, 0, 63, 0xff), Status::BadPar);
    }
}
