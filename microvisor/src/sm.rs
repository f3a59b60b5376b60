//! Counting semaphores.
//!
//! `up` wakes the longest-waiting EC or, with nobody queued, banks the
//! count. `dn` consumes a banked count or parks the calling EC. The
//! interlock with a concurrent waker follows the four-step protocol on
//! [`crate::ec::Ec::block_sc`]; the A step (marking the EC blocked) happens
//! inside the semaphore lock, before the EC becomes visible in the queue,
//! which is what makes A-before-C a program-order fact.
//!
//! Semaphores created by the kernel at boot double as interrupt semaphores:
//! they carry the GSI they signal.

use crate::cont::Continuation;
use crate::cpu::CpuId;
use crate::ec::Ec;
use crate::object::{KObject, ObjectType, Slab, Subtype};
use crate::platform::InterruptController;
use crate::scheduler::Scheduler;
use crate::trace::TraceLog;
use kernel_abi::Status;
use spin::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Result of a `dn` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnOutcome {
    /// A banked count was consumed; the caller proceeds immediately.
    Taken,
    /// Zero-consume was requested and no count was banked.
    WouldBlock,
    /// The caller is parked in the wait queue.
    Enqueued,
}

#[derive(Debug)]
struct SmInner {
    count: u64,
    waiters: VecDeque<Arc<Ec>>,
}

#[derive(Debug)]
pub struct Sm {
    header: KObject,
    inner: Mutex<SmInner>,
    /// GSI this semaphore signals, for kernel interrupt semaphores.
    gsi: Option<u32>,
    slab: Arc<Slab>,
}

impl Sm {
    pub(crate) fn new(count: u64, gsi: Option<u32>, slab: Arc<Slab>) -> Arc<Sm> {
        Arc::new(Sm {
            header: KObject::new(ObjectType::Sm, Subtype::Sm),
            inner: Mutex::new(SmInner {
                count,
                waiters: VecDeque::new(),
            }),
            gsi,
            slab,
        })
    }

    pub fn header(&self) -> &KObject {
        &self.header
    }

    pub fn gsi(&self) -> Option<u32> {
        self.gsi
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    pub fn waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Increments the count or wakes the queue head, FIFO.
    pub fn up(
        &self,
        acting: CpuId,
        scheduler: &Scheduler,
        intr: &dyn InterruptController,
        trace: &TraceLog,
    ) {
        let woken = {
            let mut inner = self.inner.lock();
            match inner.waiters.pop_front() {
                Some(ec) => ec,
                None => {
                    inner.count += 1;
                    return;
                }
            }
        };

        // C then D of the wakeup protocol.
        let same_cpu = woken.cpu() == acting;
        woken.unblock(Continuation::Finish(Status::Success, true), same_cpu);
        woken.unblock_sc(scheduler, acting, intr, trace);
    }

    /// Consumes a count or parks `ec`. On [`DnOutcome::Enqueued`] the caller
    /// still owes the B step (`block_sc`) and, with a deadline, arming the
    /// hypercall timeout.
    pub fn dn(&self, ec: &Arc<Ec>, zero_consume: bool) -> DnOutcome {
        let mut inner = self.inner.lock();
        if inner.count > 0 {
            inner.count -= 1;
            return DnOutcome::Taken;
        }
        if zero_consume {
            return DnOutcome::WouldBlock;
        }

        // A before the EC is visible to a concurrent up().
        ec.block();
        inner.waiters.push_back(ec.clone());
        DnOutcome::Enqueued
    }

    /// Removes a specific EC from the wait queue; used by the timeout path.
    /// Returns whether the EC was still queued.
    pub fn remove(&self, ec: &Arc<Ec>) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.waiters.len();
        inner.waiters.retain(|queued| !Arc::ptr_eq(queued, ec));
        inner.waiters.len() != before
    }

    pub(crate) fn destroy(&self) {
        if self.header.mark_destroyed() {
            self.slab.put();
        }
    }

    /// Bare semaphore for unit tests.
    #[cfg(test)]
    pub(crate) fn for_tests(count: u64) -> Arc<Sm> {
        let slab = Arc::new(Slab::new("sm", 16));
        assert!(slab.take());
        Sm::new(count, None, slab)
    }
}
