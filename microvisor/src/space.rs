//! Resource spaces: host memory, port I/O, guest, DMA and MSR.
//!
//! Each space maps an index (page frame, port, MSR number) to a permission
//! set, with range delegation mirroring the object space: validate
//! everything, then commit, never partially. Host-space delegation also
//! propagates a memory-attribute hint; delegating out of the kernel-owned
//! host space requires the caller to name a concrete attribute.

use crate::object::{KObject, ObjectType, Subtype};
use kernel_abi::{MemAttr, Status};
use spin::RwLock;
use std::collections::HashMap;

/// One delegated resource slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCap {
    pub perm: u8,
    pub attr: MemAttr,
}

/// Shared index → permission map.
#[derive(Debug, Default)]
pub struct ResourceMap {
    slots: RwLock<HashMap<u64, ResourceCap>>,
}

impl ResourceMap {
    /// Delegation ranges larger than this are malformed.
    pub const MAX_ORDER: u8 = 22;

    fn new() -> ResourceMap {
        ResourceMap::default()
    }

    pub fn lookup(&self, index: u64) -> Option<ResourceCap> {
        self.slots.read().get(&index).copied()
    }

    /// Seeds a slot directly; boot-time only.
    pub fn populate(&self, index: u64, perm: u8, attr: MemAttr) {
        self.slots.write().insert(index, ResourceCap { perm, attr });
    }

    /// Range delegation. Unlike object-space slots, resource slots may be
    /// re-delegated: a commit overwrites the destination range. `attr`
    /// overrides the source attribute when present.
    fn delegate(
        &self,
        src: &ResourceMap,
        ssb: u64,
        dsb: u64,
        ord: u8,
        pmm: u8,
        attr: Option<MemAttr>,
    ) -> Status {
        if ord > Self::MAX_ORDER {
            return Status::BadPar;
        }
        let count = 1u64 << ord;

        let mut staged = Vec::with_capacity(count as usize);
        {
            let slots = src.slots.read();
            for i in 0..count {
                match slots.get(&(ssb + i)) {
                    Some(cap) => staged.push(ResourceCap {
                        perm: cap.perm & pmm,
                        attr: attr.unwrap_or(cap.attr),
                    }),
                    None => return Status::BadCap,
                }
            }
        }

        let mut slots = self.slots.write();
        for (i, cap) in staged.into_iter().enumerate() {
            slots.insert(dsb + i as u64, cap);
        }
        Status::Success
    }

    pub fn occupied(&self) -> usize {
        self.slots.read().len()
    }

    /// Sorted snapshot for whole-space comparisons in tests.
    pub fn entries(&self) -> Vec<(u64, ResourceCap)> {
        let mut entries: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        entries.sort_unstable_by_key(|(k, _)| *k);
        entries
    }
}

/// Host address space.
#[derive(Debug)]
pub struct HstSpace {
    header: KObject,
    map: ResourceMap,
    /// The kernel's own host space; the source of all initial memory grants.
    kernel_owned: bool,
}

impl HstSpace {
    pub fn new(kernel_owned: bool) -> HstSpace {
        HstSpace {
            header: KObject::new(ObjectType::Space, Subtype::Hst),
            map: ResourceMap::new(),
            kernel_owned,
        }
    }

    pub fn header(&self) -> &KObject {
        &self.header
    }

    pub fn is_kernel_owned(&self) -> bool {
        self.kernel_owned
    }

    pub fn map(&self) -> &ResourceMap {
        &self.map
    }

    /// Host-to-host (and host-to-guest/DMA via the wrappers) delegation with
    /// attribute propagation.
    pub fn delegate_into(
        &self,
        dst: &ResourceMap,
        ssb: u64,
        dsb: u64,
        ord: u8,
        pmm: u8,
        attr: MemAttr,
    ) -> Status {
        let attr = if attr.is_valid() { Some(attr) } else { None };
        dst.delegate(&self.map, ssb, dsb, ord, pmm, attr)
    }
}

macro_rules! plain_space {
    ($(#[$doc:meta])* $name:ident, $subtype:expr) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            header: KObject,
            map: ResourceMap,
        }

        impl $name {
            pub fn new() -> $name {
                $name {
                    header: KObject::new(ObjectType::Space, $subtype),
                    map: ResourceMap::new(),
                }
            }

            pub fn header(&self) -> &KObject {
                &self.header
            }

            pub fn map(&self) -> &ResourceMap {
                &self.map
            }

            /// Same-subtype range delegation.
            pub fn delegate(&self, src: &$name, ssb: u64, dsb: u64, ord: u8, pmm: u8) -> Status {
                self.map.delegate(&src.map, ssb, dsb, ord, pmm, None)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

plain_space!(
    /// Port-I/O space.
    PioSpace,
    Subtype::Pio
);
plain_space!(
    /// Guest address space.
    GstSpace,
    Subtype::Gst
);
plain_space!(
    /// DMA (device) address space.
    DmaSpace,
    Subtype::Dma
);
plain_space!(
    /// Model-specific-register space.
    MsrSpace,
    Subtype::Msr
);
