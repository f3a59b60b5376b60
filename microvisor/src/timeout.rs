//! Hypercall timeouts.
//!
//! One deadline may be armed per EC. When it fires, the EC leaves whatever
//! semaphore queue it sits in, its `p0` becomes `TIMEOUT`, and it is
//! unblocked through the normal C/D steps. The fast path of a hypercall
//! that completed in time disarms the deadline instead.

use crate::cont::Continuation;
use crate::cpu::CpuId;
use crate::ec::Ec;
use crate::platform::InterruptController;
use crate::scheduler::Scheduler;
use crate::sm::Sm;
use crate::trace::{TraceEvent, TraceLog};
use kernel_abi::Status;
use spin::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct TimeoutEntry {
    ec: Weak<Ec>,
    sm: Weak<Sm>,
}

#[derive(Debug, Default)]
struct TimeoutInner {
    /// Keyed by (deadline, sequence) so equal deadlines fire in arm order.
    entries: BTreeMap<(u64, u64), TimeoutEntry>,
    seq: u64,
}

/// Deadline queue for hypercall timeouts.
#[derive(Debug, Default)]
pub struct TimeoutQueue {
    inner: Mutex<TimeoutInner>,
}

impl TimeoutQueue {
    pub fn new() -> TimeoutQueue {
        TimeoutQueue::default()
    }

    /// Arms the per-EC timeout. Replaces any previously armed deadline.
    pub fn arm(&self, deadline: u64, ec: &Arc<Ec>, sm: &Arc<Sm>) {
        let mut inner = self.inner.lock();
        let mut key_slot = ec.timeout_key.lock();
        if let Some(old) = key_slot.take() {
            inner.entries.remove(&old);
        }
        let key = (deadline, inner.seq);
        inner.seq += 1;
        inner
            .entries
            .insert(key, TimeoutEntry {
                ec: Arc::downgrade(ec),
                sm: Arc::downgrade(sm),
            });
        *key_slot = Some(key);
    }

    /// Disarms the per-EC timeout, if armed.
    pub fn disarm(&self, ec: &Ec) {
        let mut inner = self.inner.lock();
        if let Some(key) = ec.timeout_key.lock().take() {
            inner.entries.remove(&key);
        }
    }

    /// Fires every deadline at or before `now`.
    pub fn fire_due(
        &self,
        now: u64,
        acting: CpuId,
        scheduler: &Scheduler,
        intr: &dyn InterruptController,
        trace: &TraceLog,
    ) {
        loop {
            let entry = {
                let mut inner = self.inner.lock();
                match inner.entries.first_key_value() {
                    Some((key, _)) if key.0 <= now => {
                        let key = *key;
                        inner.entries.remove(&key)
                    }
                    _ => return,
                }
            };
            let Some(entry) = entry else { return };

            let (Some(ec), Some(sm)) = (entry.ec.upgrade(), entry.sm.upgrade()) else {
                continue;
            };
            *ec.timeout_key.lock() = None;

            // Only a still-queued EC times out; losing the race against a
            // concurrent up() means the wakeup already happened.
            if !sm.remove(&ec) {
                continue;
            }

            trace.record(TraceEvent::TimeoutFired {
                ec: ec.header().id,
                now,
            });
            let same_cpu = ec.cpu() == acting;
            ec.unblock(Continuation::Finish(Status::Timeout, false), same_cpu);
            ec.unblock_sc(scheduler, acting, intr, trace);
        }
    }

    /// Number of armed deadlines.
    pub fn armed(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cont::Continuation;
    use crate::platform::SimInterruptController;
    use crate::sm::DnOutcome;

    #[test]
    fn test_fire_unblocks_with_timeout_status() {
        let queue = TimeoutQueue::new();
        let scheduler = Scheduler::new(1);
        let intr = SimInterruptController::new();
        let trace = TraceLog::new();

        let sm = Sm::for_tests(0);
        let ec = Ec::for_tests(CpuId(0));
        assert_eq!(sm.dn(&ec, false), DnOutcome::Enqueued);
        queue.arm(100, &ec, &sm);

        queue.fire_due(99, CpuId(0), &scheduler, &intr, &trace);
        assert!(ec.blocked());
        assert_eq!(queue.armed(), 1);

        queue.fire_due(100, CpuId(0), &scheduler, &intr, &trace);
        assert_eq!(queue.armed(), 0);
        assert_eq!(sm.waiters(), 0);
        assert_eq!(
            ec.continuation(),
            Continuation::Finish(Status::Timeout, false)
        );
        assert!(trace.has_event(|e| matches!(e, TraceEvent::TimeoutFired { .. })));
    }

    #[test]
    fn test_disarm_prevents_firing() {
        let queue = TimeoutQueue::new();
        let scheduler = Scheduler::new(1);
        let intr = SimInterruptController::new();
        let trace = TraceLog::new();

        let sm = Sm::for_tests(0);
        let ec = Ec::for_tests(CpuId(0));
        assert_eq!(sm.dn(&ec, false), DnOutcome::Enqueued);
        queue.arm(50, &ec, &sm);
        queue.disarm(&ec);

        queue.fire_due(1000, CpuId(0), &scheduler, &intr, &trace);
        assert!(ec.blocked());
        assert_eq!(sm.waiters(), 1);
    }

    #[test]
    fn test_raced_wakeup_wins_over_timeout() {
        let queue = TimeoutQueue::new();
        let scheduler = Scheduler::new(1);
        let intr = SimInterruptController::new();
        let trace = TraceLog::new();

        let sm = Sm::for_tests(0);
        let ec = Ec::for_tests(CpuId(0));
        assert_eq!(sm.dn(&ec, false), DnOutcome::Enqueued);
        queue.arm(10, &ec, &sm);

        // The up() empties the queue before the deadline fires.
        sm.up(CpuId(0), &scheduler, &intr, &trace);
        queue.fire_due(10, CpuId(0), &scheduler, &intr, &trace);

        assert_eq!(
            ec.continuation(),
            Continuation::Finish(Status::Success, true)
        );
        assert!(!trace.has_event(|e| matches!(e, TraceEvent::TimeoutFired { .. })));
    }
}
