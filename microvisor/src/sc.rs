//! Scheduling contexts.
//!
//! An SC binds a GLOBAL EC to a CPU run queue with a priority and a quantum
//! and accumulates the ticks it has consumed, including ticks spent helping
//! on behalf of its donor chain.

use crate::cpu::CpuId;
use crate::ec::Ec;
use crate::object::{KObject, ObjectType, Slab, Subtype};
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct Sc {
    header: KObject,
    pub(crate) ec: Arc<Ec>,
    /// Home CPU; always the bound EC's home CPU.
    pub(crate) cpu: CpuId,
    pub(crate) prio: u8,
    pub(crate) quantum: u32,
    /// Ticks left in the current quantum.
    left: AtomicU64,
    /// Accumulated runtime in ticks.
    time: AtomicU64,
    slab: Arc<Slab>,
}

impl Sc {
    pub(crate) fn new(ec: Arc<Ec>, cpu: CpuId, prio: u8, quantum: u32, slab: Arc<Slab>) -> Arc<Sc> {
        Arc::new(Sc {
            header: KObject::new(ObjectType::Sc, Subtype::Sc),
            ec,
            cpu,
            prio,
            quantum,
            left: AtomicU64::new(quantum as u64),
            time: AtomicU64::new(0),
            slab,
        })
    }

    pub fn header(&self) -> &KObject {
        &self.header
    }

    pub fn ec(&self) -> &Arc<Ec> {
        &self.ec
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn prio(&self) -> u8 {
        self.prio
    }

    /// Accumulated runtime in ticks.
    pub fn time(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }

    /// Charges consumed ticks; returns true when the quantum is exhausted.
    pub(crate) fn charge(&self, ticks: u64) -> bool {
        self.time.fetch_add(ticks, Ordering::AcqRel);
        let left = self.left.load(Ordering::Acquire).saturating_sub(ticks);
        self.left.store(left, Ordering::Release);
        left == 0
    }

    /// Refills the quantum; called when the scheduler selects this SC.
    pub(crate) fn refill(&self) {
        self.left.store(self.quantum as u64, Ordering::Release);
    }

    pub(crate) fn destroy(&self) {
        if self.header.mark_destroyed() {
            self.slab.put();
        }
    }
}
