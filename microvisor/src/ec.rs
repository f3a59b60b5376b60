//! Execution contexts and the blocking protocol.
//!
//! The EC is the unit of execution: a saved user frame, an optional UTCB,
//! the continuation word, and the IPC partner links. The cross-CPU blocking
//! protocol lives here; it is the most ordering-sensitive code in the
//! kernel, so the four steps and their pairing are spelled out on
//! [`Ec::block_sc`].

use crate::cap::ObjSpace;
use crate::cont::{AtomicContinuation, Continuation};
use crate::cpu::{Cpu, CpuId};
use crate::object::{KObject, ObjectType, Slab, Subtype};
use crate::regs::{Frame, Hazard};
use crate::sc::Sc;
use crate::scheduler::Scheduler;
use crate::space::{HstSpace, PioSpace};
use crate::trace::TraceLog;
use crate::utcb::Utcb;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_abi::Status;
use spin::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// FPU save area, allocated on request.
pub type FpuState = [u64; 64];

#[derive(Debug)]
pub struct Ec {
    header: KObject,
    /// Home CPU; immutable after construction.
    pub(crate) cpu: CpuId,
    /// Event-selector base for kernel-produced messages.
    pub(crate) evt: u64,
    pub(crate) obj: Arc<ObjSpace>,
    pub(crate) hst: Arc<HstSpace>,
    pub(crate) pio: Arc<PioSpace>,
    pub(crate) utcb: Option<Arc<Utcb>>,
    pub(crate) fpu: Option<Mutex<FpuState>>,
    pub(crate) frame: Mutex<Frame>,
    hazard: AtomicU32,
    pub(crate) cont: AtomicContinuation,
    /// The EC this one is engaged to (forward link).
    callee: Mutex<Option<Arc<Ec>>>,
    /// Back-reference from the engaged callee; weak to break the cycle.
    caller: Mutex<Option<Weak<Ec>>>,
    /// SCs parked on this EC, drained by `unblock_sc`. The mutex doubles as
    /// the per-EC lock of the blocking protocol.
    sc_queue: Mutex<VecDeque<Arc<Sc>>>,
    /// Key of the armed hypercall timeout, if any.
    pub(crate) timeout_key: Mutex<Option<(u64, u64)>>,
    slab: Arc<Slab>,
}

impl Ec {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        subtype: Subtype,
        cpu: CpuId,
        evt: u64,
        obj: Arc<ObjSpace>,
        hst: Arc<HstSpace>,
        pio: Arc<PioSpace>,
        utcb: Option<Arc<Utcb>>,
        fpu: bool,
        cont: Continuation,
        slab: Arc<Slab>,
    ) -> Arc<Ec> {
        Arc::new(Ec {
            header: KObject::new(ObjectType::Ec, subtype),
            cpu,
            evt,
            obj,
            hst,
            pio,
            utcb,
            fpu: fpu.then(|| Mutex::new([0; 64])),
            frame: Mutex::new(Frame::new()),
            hazard: AtomicU32::new(0),
            cont: AtomicContinuation::new(cont),
            callee: Mutex::new(None),
            caller: Mutex::new(None),
            sc_queue: Mutex::new(VecDeque::new()),
            timeout_key: Mutex::new(None),
            slab,
        })
    }

    pub fn header(&self) -> &KObject {
        &self.header
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn evt(&self) -> u64 {
        self.evt
    }

    pub fn utcb(&self) -> Option<&Arc<Utcb>> {
        self.utcb.as_ref()
    }

    /// Object space this EC's syscalls resolve selectors in.
    pub fn obj_space(&self) -> &Arc<ObjSpace> {
        &self.obj
    }

    /// Host space backing this EC's address space.
    pub fn hst_space(&self) -> &Arc<HstSpace> {
        &self.hst
    }

    /// Port-I/O space this EC executes against.
    pub fn pio_space(&self) -> &Arc<PioSpace> {
        &self.pio
    }

    /// FPU save area, when the EC was created with one.
    pub fn fpu_state(&self) -> Option<&Mutex<FpuState>> {
        self.fpu.as_ref()
    }

    pub fn is_global(&self) -> bool {
        self.header.subtype == Subtype::EcGlobal
    }

    pub fn is_local(&self) -> bool {
        self.header.subtype == Subtype::EcLocal
    }

    pub fn is_vcpu(&self) -> bool {
        self.header.subtype.is_vcpu()
    }

    /// Snapshot of the saved user frame.
    pub fn frame_snapshot(&self) -> Frame {
        self.frame.lock().clone()
    }

    /// Mutates the saved user frame; harness stand-in for user register state.
    pub fn patch_frame<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> R {
        f(&mut self.frame.lock())
    }

    /// The status last written to `p0`, if it parses as one.
    pub fn status(&self) -> Option<Status> {
        self.frame.lock().status()
    }

    /// Current continuation; exposed for state assertions.
    pub fn continuation(&self) -> Continuation {
        self.cont.load(Ordering::Acquire)
    }

    // --- hazards ---

    pub fn set_hazard(&self, hazard: Hazard) -> Hazard {
        Hazard::from_bits_truncate(self.hazard.fetch_or(hazard.bits(), Ordering::AcqRel))
    }

    pub fn clr_hazard(&self, hazard: Hazard) {
        self.hazard.fetch_and(!hazard.bits(), Ordering::AcqRel);
    }

    pub fn hazards(&self) -> Hazard {
        Hazard::from_bits_truncate(self.hazard.load(Ordering::Acquire))
    }

    // --- blocking protocol ---

    /// Marks the EC as parked.
    ///
    /// Ordering: RELAXED, the store runs on the same CPU as the later
    /// `blocked` check it pairs with.
    pub fn block(&self) {
        self.cont.store(Continuation::Blocking, Ordering::Relaxed);
    }

    /// Installs a non-sentinel continuation, waking the EC.
    ///
    /// Ordering: RELEASE when crossing CPUs so a concurrent `blocked` on the
    /// home CPU observes the store; RELAXED on the same CPU.
    pub fn unblock(&self, cont: Continuation, same_cpu: bool) {
        let order = if same_cpu {
            Ordering::Relaxed
        } else {
            Ordering::Release
        };
        self.cont.store(cont, order);
    }

    /// Whether no scheduler may run this EC.
    ///
    /// Ordering: ACQUIRE, pairing with a concurrent `unblock`.
    pub fn blocked(&self) -> bool {
        self.cont.load(Ordering::Acquire).is_blocked()
    }

    /// Second half of the blocking handshake.
    ///
    /// ```text
    /// Core X (e.g. Sm::dn)        Core Y (e.g. Sm::up)
    /// A: ec.block()               C: ec.unblock(..)
    /// B: ec.block_sc()            D: ec.unblock_sc()
    /// ```
    ///
    /// A precedes B and C precedes D by program order; A precedes C through
    /// the semaphore's internal state; B and D exclude each other through
    /// the per-EC lock. Returns `true` when B won (the SC is parked and D
    /// will release it) and `false` when C already happened (the SC must
    /// keep running).
    #[must_use]
    pub fn block_sc(&self, scheduler: &Scheduler, cpu: CpuId) -> bool {
        let mut queue = self.sc_queue.lock();

        if !self.blocked() {
            return false;
        }

        if let Some(sc) = scheduler.get_current(cpu) {
            queue.push_back(sc);
        }
        true
    }

    /// Drains every parked SC back to the scheduler.
    pub fn unblock_sc(
        &self,
        scheduler: &Scheduler,
        acting: CpuId,
        intr: &dyn crate::platform::InterruptController,
        trace: &TraceLog,
    ) {
        let mut queue = self.sc_queue.lock();
        while let Some(sc) = queue.pop_front() {
            scheduler.unblock(acting, sc, intr, trace);
        }
    }

    /// SCs currently parked on this EC; state inspection for tests.
    pub fn parked_scs(&self) -> usize {
        self.sc_queue.lock().len()
    }

    // --- partnering ---

    /// Engages `callee` on behalf of this EC and opens a donation.
    pub fn set_partner(self: &Arc<Ec>, callee: &Arc<Ec>, cpu: &Cpu) {
        *callee.caller.lock() = Some(Arc::downgrade(self));
        *self.callee.lock() = Some(callee.clone());
        cpu.donations.fetch_add(1, Ordering::Relaxed);
    }

    /// Severs the forward link and closes one donation; returns whether a
    /// donation was still open.
    pub fn clr_partner(&self, cpu: &Cpu) -> bool {
        if let Some(callee) = self.callee.lock().take() {
            *callee.caller.lock() = None;
        }
        cpu.donations.fetch_sub(1, Ordering::Relaxed) != 0
    }

    /// The engaged caller, if it is still alive.
    pub fn caller(&self) -> Option<Arc<Ec>> {
        self.caller.lock().as_ref().and_then(Weak::upgrade)
    }

    /// The engaged callee.
    pub fn callee(&self) -> Option<Arc<Ec>> {
        self.callee.lock().clone()
    }

    /// Drops a dangling caller backlink; used when the caller dies.
    pub(crate) fn take_caller(&self) -> Option<Arc<Ec>> {
        self.caller.lock().take().and_then(|w| w.upgrade())
    }

    pub(crate) fn destroy(&self) {
        if self.header.mark_destroyed() {
            self.slab.put();
        }
    }

    /// Bare EC for protocol-level unit tests.
    #[cfg(test)]
    pub(crate) fn for_tests(cpu: CpuId) -> Arc<Ec> {
        let slab = Arc::new(Slab::new("ec", 16));
        assert!(slab.take());
        Ec::new(
            Subtype::EcGlobal,
            cpu,
            0,
            Arc::new(ObjSpace::new()),
            Arc::new(HstSpace::new(false)),
            Arc::new(PioSpace::new()),
            Some(Arc::new(Utcb::new())),
            false,
            Continuation::None,
            slab,
        )
    }
}
