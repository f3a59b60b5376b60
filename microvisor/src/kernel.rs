//! Kernel façade: boot, the continuation run loop, and the harness surface.
//!
//! A [`Kernel`] owns the virtual CPUs, the scheduler, the timeout queue,
//! the platform collaborators and the boot objects (idle ECs, the kernel PD
//! and the root PD). Harnesses drive it the way hardware would: `syscall`
//! for a user-mode hypercall, `resume` for a forced kernel re-entry (IPI),
//! `inject_event` for an exception or VM exit, `elapse` for timer ticks and
//! `schedule` for a scheduling pass.
//!
//! In-kernel control flow never returns upward: every path produces a
//! [`Flow`] value that the run loop consumes until an EC re-enters user
//! mode. That loop is the continuation engine.

use crate::cap::{Capability, ObjSpace, ObjectRef, PermEc, PermPd, PermSm, PermSp, PermSc};
use crate::cont::{Continuation, UserMode};
use crate::cpu::{Cpu, CpuId};
use crate::ec::Ec;
use crate::ipc;
use crate::object::{Slab, Subtype};
use crate::pd::Pd;
use crate::platform::{
    AcpiController, InterruptController, Iommu, SimAcpi, SimInterruptController, SimIommu,
};
use crate::regs::Hazard;
use crate::sc::Sc;
use crate::scheduler::Scheduler;
use crate::space::{HstSpace, PioSpace};
use crate::syscall;
use crate::timeout::TimeoutQueue;
use crate::trace::{TraceEvent, TraceLog};
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_abi::{Hypercall, MemAttr, Status, SysArgs, EV_RECALL};
use std::sync::Arc;

bitflags! {
    /// Virtualization features the platform reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureSet: u32 {
        const VMX = 1 << 0;
        const SVM = 1 << 1;
    }
}

impl FeatureSet {
    pub fn has_virtualization(self) -> bool {
        self.intersects(FeatureSet::VMX | FeatureSet::SVM)
    }

    /// VM-entry flavor vCPUs on this platform resume through.
    pub(crate) fn vm_entry_mode(self) -> UserMode {
        if self.contains(FeatureSet::VMX) {
            UserMode::VmxResume
        } else {
            UserMode::SvmRun
        }
    }
}

/// Boot-time configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub cpu_count: usize,
    pub features: FeatureSet,
    /// Per-PD, per-object-type slab capacity.
    pub slab_capacity: usize,
    /// Kernel-wide PD budget.
    pub max_pds: usize,
    /// Interrupt semaphores created at boot.
    pub gsi_count: u32,
    /// Partner-chain and helping bound before a livelock kill.
    pub helping_limit: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            cpu_count: 2,
            features: FeatureSet::empty(),
            slab_capacity: 64,
            max_pds: 64,
            gsi_count: 4,
            helping_limit: 64,
        }
    }
}

/// Fixed selectors the root object space is seeded with at boot.
pub mod root_sels {
    use kernel_abi::Sel;

    pub const PD: Sel = Sel(0);
    pub const EC: Sel = Sel(1);
    pub const SC: Sel = Sel(2);
    pub const OBJ: Sel = Sel(3);
    pub const HST: Sel = Sel(4);
    pub const PIO: Sel = Sel(5);
    /// The kernel-owned host space, source of initial memory grants.
    pub const KERNEL_HST: Sel = Sel(6);
    /// First interrupt semaphore; GSI `n` sits at `GSI_BASE + n`.
    pub const GSI_BASE: Sel = Sel(16);
}

/// Priority and quantum of the root SC.
const ROOT_PRIO: u8 = 64;
const ROOT_QUANTUM: u32 = 1000;

/// Frames the root host space is seeded with.
const ROOT_HST_FRAMES: u64 = 0x100;

/// What the run loop hands back to the harness: the EC now executing in
/// user mode (possibly the idle EC) and the mode it returned through.
#[derive(Debug, Clone)]
pub struct UserReturn {
    pub ec: Arc<Ec>,
    pub mode: UserMode,
}

impl UserReturn {
    /// The status in the returned EC's `p0`.
    pub fn status(&self) -> Option<Status> {
        self.ec.status()
    }
}

/// In-kernel tail transfers, consumed by the run loop.
#[derive(Debug)]
pub(crate) enum Flow {
    /// Return to user mode on this EC.
    User(Arc<Ec>, UserMode),
    /// This EC is current; execute its continuation.
    Run(Arc<Ec>),
    /// Enter the scheduler.
    Schedule,
}

pub struct Kernel {
    config: KernelConfig,
    cpus: Vec<Cpu>,
    pub scheduler: Scheduler,
    pub timeouts: TimeoutQueue,
    pub trace: TraceLog,
    intr: Arc<dyn InterruptController>,
    acpi: Arc<dyn AcpiController>,
    iommu: Arc<dyn Iommu>,
    clock: AtomicU64,
    pd_slab: Arc<Slab>,
    kern_pd: Arc<Pd>,
    root_pd: Arc<Pd>,
    root_ec: Arc<Ec>,
    idle: Vec<Arc<Ec>>,
}

impl Kernel {
    /// Boots a kernel with recording platform simulations.
    pub fn new(config: KernelConfig) -> Kernel {
        Kernel::with_platform(
            config,
            Arc::new(SimInterruptController::new()),
            Arc::new(SimAcpi::new()),
            Arc::new(SimIommu::new([])),
        )
    }

    /// Boots a kernel against caller-supplied platform collaborators.
    pub fn with_platform(
        config: KernelConfig,
        intr: Arc<dyn InterruptController>,
        acpi: Arc<dyn AcpiController>,
        iommu: Arc<dyn Iommu>,
    ) -> Kernel {
        assert!(config.cpu_count > 0, "a kernel needs at least one cpu");

        let trace = TraceLog::new();
        let scheduler = Scheduler::new(config.cpu_count);
        let cpus: Vec<Cpu> = (0..config.cpu_count).map(|i| Cpu::new(CpuId(i))).collect();
        let pd_slab = Arc::new(Slab::new("pd", config.max_pds));

        // The kernel PD backs the idle ECs and the interrupt semaphores.
        assert!(pd_slab.take());
        let kern_pd = Pd::new(config.slab_capacity, pd_slab.clone());
        kern_pd.attach_boot(
            Arc::new(ObjSpace::new()),
            Arc::new(HstSpace::new(true)),
            Arc::new(PioSpace::new()),
        );

        // The root PD with its three spaces and an initial memory grant.
        assert!(pd_slab.take());
        let root_pd = Pd::new(config.slab_capacity, pd_slab.clone());
        let root_hst = Arc::new(HstSpace::new(false));
        for frame in 0..ROOT_HST_FRAMES {
            root_hst.map().populate(frame, 0b111, MemAttr(1));
        }
        root_pd.attach_boot(
            Arc::new(ObjSpace::new()),
            root_hst,
            Arc::new(PioSpace::new()),
        );

        let idle: Vec<Arc<Ec>> = cpus
            .iter()
            .map(|cpu| {
                let ec = kern_pd
                    .create_ec(
                        Subtype::EcGlobal,
                        cpu.id,
                        0,
                        false,
                        false,
                        Continuation::Idle,
                        &trace,
                    )
                    .expect("boot: idle ec allocation");
                cpu.set_current(ec.clone());
                ec
            })
            .collect();

        let root_ec = root_pd
            .create_ec(
                Subtype::EcGlobal,
                CpuId(0),
                0,
                true,
                false,
                Continuation::RetUser(UserMode::Sysexit),
                &trace,
            )
            .expect("boot: root ec allocation");
        let root_sc = root_pd
            .create_sc(&root_ec, ROOT_PRIO, ROOT_QUANTUM, &trace)
            .expect("boot: root sc allocation");
        scheduler.set_current(CpuId(0), root_sc.clone());
        cpus[0].set_current(root_ec.clone());

        let kernel = Kernel {
            config,
            cpus,
            scheduler,
            timeouts: TimeoutQueue::new(),
            trace,
            intr,
            acpi,
            iommu,
            clock: AtomicU64::new(0),
            pd_slab,
            kern_pd,
            root_pd,
            root_ec,
            idle,
        };
        kernel.seed_root_caps(root_sc);
        kernel
    }

    fn seed_root_caps(&self, root_sc: Arc<Sc>) {
        let obj = self
            .root_pd
            .get_obj()
            .expect("boot: root pd has an object space");

        let seeds = [
            (
                root_sels::PD,
                Capability::new(ObjectRef::Pd(self.root_pd.clone()), PermPd::all().bits()),
            ),
            (
                root_sels::EC,
                Capability::new(ObjectRef::Ec(self.root_ec.clone()), PermEc::all().bits()),
            ),
            (
                root_sels::SC,
                Capability::new(ObjectRef::Sc(root_sc), PermSc::all().bits()),
            ),
            (
                root_sels::OBJ,
                Capability::new(ObjectRef::Obj(obj.clone()), PermSp::all().bits()),
            ),
            (
                root_sels::HST,
                Capability::new(
                    ObjectRef::Hst(self.root_pd.get_hst().expect("boot: root hst")),
                    PermSp::all().bits(),
                ),
            ),
            (
                root_sels::PIO,
                Capability::new(
                    ObjectRef::Pio(self.root_pd.get_pio().expect("boot: root pio")),
                    PermSp::all().bits(),
                ),
            ),
            (
                root_sels::KERNEL_HST,
                Capability::new(
                    ObjectRef::Hst(self.kern_pd.get_hst().expect("boot: kernel hst")),
                    PermSp::TAKE.bits(),
                ),
            ),
        ];
        for (sel, cap) in seeds {
            assert_eq!(obj.insert(sel, cap), Status::Success);
        }

        for gsi in 0..self.config.gsi_count {
            let sm = self
                .kern_pd
                .create_sm(0, Some(gsi), &self.trace)
                .expect("boot: interrupt semaphore allocation");
            assert_eq!(
                obj.insert(
                    root_sels::GSI_BASE.offset(gsi as u64),
                    Capability::new(ObjectRef::Sm(sm), PermSm::all().bits()),
                ),
                Status::Success
            );
        }
    }

    // --- accessors ---

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn cpu(&self, cpu: CpuId) -> &Cpu {
        &self.cpus[cpu.0]
    }

    /// The EC executing on `cpu`. A remote CPU's value is a published read.
    pub fn current(&self, cpu: CpuId) -> Arc<Ec> {
        self.cpus[cpu.0].current()
    }

    pub fn root_ec(&self) -> &Arc<Ec> {
        &self.root_ec
    }

    pub fn root_pd(&self) -> &Arc<Pd> {
        &self.root_pd
    }

    pub fn idle_ec(&self, cpu: CpuId) -> &Arc<Ec> {
        &self.idle[cpu.0]
    }

    pub fn is_idle(&self, cpu: CpuId) -> bool {
        Arc::ptr_eq(&self.current(cpu), &self.idle[cpu.0])
    }

    pub(crate) fn is_root_obj(&self, obj: &Arc<ObjSpace>) -> bool {
        self.root_pd
            .get_obj()
            .is_some_and(|root| Arc::ptr_eq(&root, obj))
    }

    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    pub(crate) fn intr(&self) -> &dyn InterruptController {
        self.intr.as_ref()
    }

    pub(crate) fn acpi(&self) -> &dyn AcpiController {
        self.acpi.as_ref()
    }

    pub(crate) fn iommu(&self) -> &dyn Iommu {
        self.iommu.as_ref()
    }

    pub(crate) fn pd_slab(&self) -> &Arc<Slab> {
        &self.pd_slab
    }

    // --- harness entry points ---

    /// Hypercall entry: the current EC of `cpu` issued `args`.
    pub fn syscall(&self, cpu: CpuId, args: SysArgs) -> UserReturn {
        let ec = self.current(cpu);
        ec.patch_frame(|f| f.set_sys_args(args));
        let flow = syscall::dispatch(self, cpu, ec);
        self.run(cpu, flow)
    }

    /// Forced kernel re-entry on the current EC, e.g. after a remote-entry
    /// IPI; hazards are consulted before the EC reaches user mode again.
    pub fn resume(&self, cpu: CpuId) -> UserReturn {
        let ec = self.current(cpu);
        self.run(cpu, Flow::Run(ec))
    }

    /// Scheduling pass: the current SC yields and the best runnable SC (or
    /// the idle EC) takes over.
    pub fn schedule(&self, cpu: CpuId) -> UserReturn {
        self.scheduler.yield_current(cpu);
        self.run(cpu, Flow::Schedule)
    }

    /// Kernel-originated event injection (exception or VM exit) against the
    /// current EC of `cpu`.
    pub fn inject_event(&self, cpu: CpuId, vector: u64, mode: UserMode) -> UserReturn {
        let ec = self.current(cpu);
        let flow = ipc::send_msg(self, cpu, ec, mode, vector);
        self.run(cpu, flow)
    }

    /// Advances the clock, charging the current SC and firing due
    /// hypercall timeouts. Returns whether the quantum expired.
    pub fn elapse(&self, cpu: CpuId, ticks: u64) -> bool {
        let now = self.clock.fetch_add(ticks, Ordering::AcqRel) + ticks;
        let expired = self.scheduler.charge_current(cpu, ticks);
        self.timeouts
            .fire_due(now, cpu, &self.scheduler, self.intr.as_ref(), &self.trace);
        expired
    }

    // --- the continuation engine ---

    fn run(&self, cpu: CpuId, mut flow: Flow) -> UserReturn {
        loop {
            flow = match flow {
                Flow::User(ec, mode) => {
                    let hazards = ec.hazards();
                    if hazards.contains(Hazard::RECALL) {
                        ec.clr_hazard(Hazard::RECALL);
                        ipc::send_msg(self, cpu, ec, mode, EV_RECALL)
                    } else {
                        if hazards.contains(Hazard::FPU) {
                            ec.clr_hazard(Hazard::FPU);
                            self.switch_fpu(cpu, &ec);
                        }
                        if self.cpu(cpu).hazards().contains(Hazard::SLEEP) {
                            // The transition is staged with the platform;
                            // this CPU now parks until wakeup.
                            self.cpu(cpu).clr_hazard(Hazard::SLEEP);
                        }
                        if !Arc::ptr_eq(&ec, &self.idle[cpu.0]) {
                            ec.cont
                                .store(Continuation::RetUser(mode), Ordering::Relaxed);
                        }
                        return UserReturn { ec, mode };
                    }
                }
                Flow::Run(ec) => self.execute(cpu, ec),
                Flow::Schedule => self.schedule_next(cpu),
            };
        }
    }

    fn execute(&self, cpu: CpuId, ec: Arc<Ec>) -> Flow {
        match ec.continuation() {
            Continuation::RetUser(mode) => Flow::User(ec, mode),
            Continuation::Finish(status, clear) => {
                if clear {
                    self.timeouts.disarm(&ec);
                }
                ec.patch_frame(|f| f.set_status(status));
                Flow::User(ec, UserMode::Sysexit)
            }
            Continuation::RecvUser => ipc::recv_user(self, cpu, ec),
            Continuation::RecvKern => ipc::recv_kern(self, cpu, ec),
            Continuation::SysCall => ipc::sys_call(self, cpu, ec),
            Continuation::SendMsg(mode) => {
                let vector = ec.frame_snapshot().vec;
                ipc::send_msg(self, cpu, ec, mode, vector)
            }
            Continuation::Idle => Flow::User(ec, UserMode::Sysexit),
            Continuation::Dead => ipc::kill(self, cpu, ec, "IPC Abort"),
            Continuation::Blocking => ipc::kill(self, cpu, ec, "Blocking"),
            Continuation::None => ipc::kill(self, cpu, ec, "IPC Abort"),
        }
    }

    fn schedule_next(&self, cpu: CpuId) -> Flow {
        self.cpu(cpu).ctr_loop.store(0, Ordering::Relaxed);
        match self.scheduler.pick(cpu, &self.trace) {
            Some(sc) => self.activate(cpu, sc.ec().clone()),
            None => {
                let idle = self.idle[cpu.0].clone();
                self.cpu(cpu).set_current(idle.clone());
                Flow::User(idle, UserMode::Sysexit)
            }
        }
    }

    /// Walks the partner chain from `start` to its deepest callee, counting
    /// hops; parks the SC if the end of the chain is blocked, otherwise
    /// makes it current.
    pub(crate) fn activate(&self, cpu: CpuId, start: Arc<Ec>) -> Flow {
        let state = self.cpu(cpu);
        state.ctr_link.store(0, Ordering::Relaxed);

        let mut ec = start;
        while let Some(next) = ec.callee() {
            let hops = state.ctr_link.fetch_add(1, Ordering::Relaxed) + 1;
            if hops > self.config.helping_limit {
                return ipc::kill(self, cpu, ec, "Livelock");
            }
            ec = next;
        }

        if ec.blocked() && ec.block_sc(&self.scheduler, cpu) {
            self.scheduler.clear_current(cpu);
            return Flow::Schedule;
        }
        self.make_current(cpu, ec)
    }

    pub(crate) fn make_current(&self, cpu: CpuId, ec: Arc<Ec>) -> Flow {
        self.cpu(cpu).set_current(ec.clone());
        Flow::Run(ec)
    }

    fn switch_fpu(&self, cpu: CpuId, ec: &Arc<Ec>) {
        let mut owner = self.cpu(cpu).fpowner.lock();
        if let Some(prev) = owner.as_ref() {
            if Arc::ptr_eq(prev, ec) {
                return;
            }
        }
        // Save areas live inside each EC, so switching ownership is the
        // whole of the save/restore in this kernel.
        *owner = Some(ec.clone());
    }

    // --- status plumbing shared by the handlers ---

    /// Writes `status` into the EC's `p0` and returns it to user mode,
    /// optionally disarming the hypercall timeout on the way.
    pub(crate) fn finish(&self, ec: &Arc<Ec>, status: Status, clear_timeout: bool) -> Flow {
        if clear_timeout {
            self.timeouts.disarm(ec);
        }
        ec.patch_frame(|f| f.set_status(status));
        Flow::User(ec.clone(), UserMode::Sysexit)
    }

    /// `finish` plus a rejection trace event.
    pub(crate) fn reject(&self, ec: &Arc<Ec>, hypercall: Hypercall, status: Status) -> Flow {
        self.trace.record(TraceEvent::SyscallRejected {
            ec: ec.header().id,
            hypercall: hypercall.name().to_string(),
            status,
        });
        self.finish(ec, status, false)
    }

    pub(crate) fn complete(&self, ec: &Arc<Ec>, hypercall: Hypercall, status: Status) -> Flow {
        if status == Status::Success {
            self.finish(ec, status, false)
        } else {
            self.reject(ec, hypercall, status)
        }
    }
}
