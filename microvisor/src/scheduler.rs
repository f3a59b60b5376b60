//! Priority scheduler.
//!
//! Per-CPU run queues over 128 priority levels with a selection bitmap,
//! plus the per-CPU "current SC" slot the IPC path reads for donation and
//! blocking. Cross-CPU enqueue sends a remote-kernel-entry IPI when the
//! target CPU sits idle.

use crate::cpu::CpuId;
use crate::platform::{InterruptController, IpiKind};
use crate::sc::Sc;
use crate::trace::{TraceEvent, TraceLog};
use spin::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Number of priority levels.
pub const NUM_PRIORITIES: usize = 128;

#[derive(Debug)]
struct RunQueue {
    ready: Vec<VecDeque<Arc<Sc>>>,
    bitmap: u128,
}

impl RunQueue {
    fn new() -> RunQueue {
        RunQueue {
            ready: (0..NUM_PRIORITIES).map(|_| VecDeque::new()).collect(),
            bitmap: 0,
        }
    }

    fn insert_tail(&mut self, sc: Arc<Sc>) {
        let prio = sc.prio() as usize & (NUM_PRIORITIES - 1);
        self.ready[prio].push_back(sc);
        self.bitmap |= 1 << prio;
    }

    fn pick(&mut self) -> Option<Arc<Sc>> {
        if self.bitmap == 0 {
            return None;
        }
        let prio = 127 - self.bitmap.leading_zeros() as usize;
        let sc = self.ready[prio].pop_front();
        if self.ready[prio].is_empty() {
            self.bitmap &= !(1 << prio);
        }
        sc
    }

    fn is_empty(&self) -> bool {
        self.bitmap == 0
    }
}

/// Per-CPU run queues and current-SC slots.
#[derive(Debug)]
pub struct Scheduler {
    queues: Vec<Mutex<RunQueue>>,
    current: Vec<Mutex<Option<Arc<Sc>>>>,
}

impl Scheduler {
    pub fn new(cpu_count: usize) -> Scheduler {
        Scheduler {
            queues: (0..cpu_count).map(|_| Mutex::new(RunQueue::new())).collect(),
            current: (0..cpu_count).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// The SC bound to the EC running on `cpu`, if any SC is selected.
    pub fn get_current(&self, cpu: CpuId) -> Option<Arc<Sc>> {
        self.current[cpu.0].lock().clone()
    }

    pub(crate) fn set_current(&self, cpu: CpuId, sc: Arc<Sc>) {
        *self.current[cpu.0].lock() = Some(sc);
    }

    /// Enqueues a runnable SC at its priority on its home CPU; sends an IPI
    /// when that CPU is idle and someone else is enqueueing.
    pub fn unblock(
        &self,
        acting: CpuId,
        sc: Arc<Sc>,
        intr: &dyn InterruptController,
        trace: &TraceLog,
    ) {
        let target = sc.cpu();
        self.queues[target.0].lock().insert_tail(sc);

        if target != acting && self.current[target.0].lock().is_none() {
            intr.send_cpu(IpiKind::RemoteKernelEntry, target);
            trace.record(TraceEvent::IpiSent {
                kind: IpiKind::RemoteKernelEntry,
                cpu: target.0,
            });
        }
    }

    /// Selects the highest-priority SC on `cpu`, refilling its quantum and
    /// publishing it as current. `None` leaves the CPU idle.
    pub fn pick(&self, cpu: CpuId, trace: &TraceLog) -> Option<Arc<Sc>> {
        let picked = self.queues[cpu.0].lock().pick();
        match picked {
            Some(sc) => {
                sc.refill();
                *self.current[cpu.0].lock() = Some(sc.clone());
                trace.record(TraceEvent::ScSelected {
                    sc: sc.header().id,
                    cpu: cpu.0,
                });
                Some(sc)
            }
            None => {
                *self.current[cpu.0].lock() = None;
                None
            }
        }
    }

    /// Drops the current SC without requeueing it; used when its EC dies or
    /// parks the SC elsewhere.
    pub(crate) fn clear_current(&self, cpu: CpuId) {
        *self.current[cpu.0].lock() = None;
    }

    /// Voluntarily gives up the remaining quantum: the current SC moves to
    /// the tail of its priority and the CPU becomes selectable.
    pub fn yield_current(&self, cpu: CpuId) {
        if let Some(sc) = self.current[cpu.0].lock().take() {
            self.queues[cpu.0].lock().insert_tail(sc);
        }
    }

    /// Charges `ticks` to the current SC; true when its quantum expired.
    pub fn charge_current(&self, cpu: CpuId, ticks: u64) -> bool {
        match self.current[cpu.0].lock().as_ref() {
            Some(sc) => sc.charge(ticks),
            None => false,
        }
    }

    /// Whether `cpu` has runnable SCs queued.
    pub fn has_ready(&self, cpu: CpuId) -> bool {
        !self.queues[cpu.0].lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::Ec;
    use crate::object::Slab;
    use crate::platform::SimInterruptController;

    fn sc_with_prio(cpu: CpuId, prio: u8) -> Arc<Sc> {
        let slab = Arc::new(Slab::new("sc", 16));
        assert!(slab.take());
        Sc::new(Ec::for_tests(cpu), cpu, prio, 10, slab)
    }

    #[test]
    fn test_pick_prefers_higher_priority() {
        let scheduler = Scheduler::new(1);
        let intr = SimInterruptController::new();
        let trace = TraceLog::new();
        let low = sc_with_prio(CpuId(0), 3);
        let high = sc_with_prio(CpuId(0), 70);

        scheduler.unblock(CpuId(0), low.clone(), &intr, &trace);
        scheduler.unblock(CpuId(0), high.clone(), &intr, &trace);

        let first = scheduler.pick(CpuId(0), &trace).unwrap();
        assert!(Arc::ptr_eq(&first, &high));
        let second = scheduler.pick(CpuId(0), &trace).unwrap();
        assert!(Arc::ptr_eq(&second, &low));
        assert!(scheduler.pick(CpuId(0), &trace).is_none());
    }

    #[test]
    fn test_same_priority_is_fifo() {
        let scheduler = Scheduler::new(1);
        let intr = SimInterruptController::new();
        let trace = TraceLog::new();
        let a = sc_with_prio(CpuId(0), 5);
        let b = sc_with_prio(CpuId(0), 5);

        scheduler.unblock(CpuId(0), a.clone(), &intr, &trace);
        scheduler.unblock(CpuId(0), b.clone(), &intr, &trace);

        assert!(Arc::ptr_eq(&scheduler.pick(CpuId(0), &trace).unwrap(), &a));
        assert!(Arc::ptr_eq(&scheduler.pick(CpuId(0), &trace).unwrap(), &b));
    }

    #[test]
    fn test_remote_enqueue_ipis_idle_cpu() {
        let scheduler = Scheduler::new(2);
        let intr = SimInterruptController::new();
        let trace = TraceLog::new();
        let sc = sc_with_prio(CpuId(1), 5);

        scheduler.unblock(CpuId(0), sc, &intr, &trace);
        assert_eq!(intr.sent(), vec![(IpiKind::RemoteKernelEntry, 1)]);
        assert!(trace.has_event(|e| matches!(e, TraceEvent::IpiSent { cpu: 1, .. })));

        // A busy CPU is not interrupted.
        let busy = sc_with_prio(CpuId(1), 5);
        scheduler.set_current(CpuId(1), busy.clone());
        let another = sc_with_prio(CpuId(1), 5);
        scheduler.unblock(CpuId(0), another, &intr, &trace);
        assert_eq!(intr.sent().len(), 1);
    }

    #[test]
    fn test_yield_requeues_at_tail() {
        let scheduler = Scheduler::new(1);
        let intr = SimInterruptController::new();
        let trace = TraceLog::new();
        let a = sc_with_prio(CpuId(0), 5);
        let b = sc_with_prio(CpuId(0), 5);

        scheduler.unblock(CpuId(0), a.clone(), &intr, &trace);
        let picked = scheduler.pick(CpuId(0), &trace).unwrap();
        assert!(Arc::ptr_eq(&picked, &a));
        scheduler.unblock(CpuId(0), b.clone(), &intr, &trace);

        scheduler.yield_current(CpuId(0));
        assert!(Arc::ptr_eq(&scheduler.pick(CpuId(0), &trace).unwrap(), &b));
    }
}
