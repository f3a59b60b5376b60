//! Test environment and user-level helpers.
//!
//! `TestEnv` boots a kernel against recording platform simulations and
//! keeps handles to the recorders so tests can assert on IPIs, GSI
//! programming and ACPI staging. The helpers issue real syscalls from
//! whatever EC is current, standing in for a user runtime.

use kernel_abi::{
    ec_flags, Mtd, Qpd, Sel, Status, SysArgs, SysCreateEc, SysCreatePt, SysCreateSc,
    SysIpcReply, EV_RECALL, EV_STARTUP,
};
use microvisor::cap::ObjSpace;
use microvisor::{
    CpuId, Ec, Kernel, KernelConfig, PermEc, SimAcpi, SimInterruptController, SimIommu,
    UserReturn,
};
use std::sync::Arc;

/// IOMMU instance id the test environment reports.
pub const TEST_SMMU: u64 = 7;

pub struct TestEnv {
    pub kernel: Kernel,
    pub intr: Arc<SimInterruptController>,
    pub acpi: Arc<SimAcpi>,
    pub iommu: Arc<SimIommu>,
}

impl TestEnv {
    /// Boots with `cpu_count` CPUs and the default configuration.
    pub fn new(cpu_count: usize) -> TestEnv {
        TestEnv::with_config(KernelConfig {
            cpu_count,
            ..KernelConfig::default()
        })
    }

    pub fn with_config(config: KernelConfig) -> TestEnv {
        let intr = Arc::new(SimInterruptController::new());
        let acpi = Arc::new(SimAcpi::new());
        let iommu = Arc::new(SimIommu::new([TEST_SMMU]));
        let kernel = Kernel::with_platform(config, intr.clone(), acpi.clone(), iommu.clone());
        TestEnv {
            kernel,
            intr,
            acpi,
            iommu,
        }
    }

    /// Boots with a specific ACPI controller.
    pub fn with_acpi(acpi: SimAcpi) -> TestEnv {
        let intr = Arc::new(SimInterruptController::new());
        let acpi = Arc::new(acpi);
        let iommu = Arc::new(SimIommu::new([TEST_SMMU]));
        let kernel = Kernel::with_platform(
            KernelConfig::default(),
            intr.clone(),
            acpi.clone(),
            iommu.clone(),
        );
        TestEnv {
            kernel,
            intr,
            acpi,
            iommu,
        }
    }

    /// Issues a syscall from the EC currently selected on `cpu`.
    pub fn syscall(&self, cpu: usize, args: SysArgs) -> UserReturn {
        self.kernel.syscall(CpuId(cpu), args)
    }

    pub fn root_obj(&self) -> Arc<ObjSpace> {
        self.kernel
            .root_pd()
            .get_obj()
            .expect("root pd always has an object space")
    }

    /// Resolves an EC capability created by these helpers.
    pub fn lookup_ec(&self, sel: Sel) -> Arc<Ec> {
        self.root_obj()
            .lookup(sel)
            .ec(PermEc::CTRL)
            .expect("selector holds an ec capability")
    }

    /// Creates a LOCAL EC (portal server) on `cpu`, returning its handle.
    pub fn create_local_server(&self, cpu: usize, sel: Sel, utcb: u64) -> Arc<Ec> {
        let ret = self.syscall(
            0,
            SysCreateEc::encode(sel, Sel(0), 0, utcb, 0xf000, cpu as u16, 0),
        );
        assert_eq!(ret.status(), Some(Status::Success), "create local ec");
        self.lookup_ec(sel)
    }

    /// Creates a portal binding `server` with the given entry point.
    pub fn create_portal(&self, sel: Sel, server: Sel, ip: u64, mtd: Mtd) {
        let ret = self.syscall(0, SysCreatePt::encode(sel, Sel(0), server, mtd, ip));
        assert_eq!(ret.status(), Some(Status::Success), "create portal");
    }

    /// Creates a GLOBAL EC with an SC and drives it through its startup
    /// event: a handler EC receives the startup message through the event
    /// portal and replies, leaving the worker current in user mode on its
    /// CPU. Returns `(worker, handler)`.
    ///
    /// Selector layout: the handler at `sels`, the worker at `sels + 1`,
    /// the SC at `sels + 2`; event portals at `evt + vector`.
    pub fn spawn_worker(&self, cpu: usize, evt: u64, sels: u64, utcbs: u64, prio: u8) -> (Arc<Ec>, Arc<Ec>) {
        let handler_sel = Sel(sels);
        let worker_sel = Sel(sels + 1);
        let sc_sel = Sel(sels + 2);

        let handler = self.create_local_server(cpu, handler_sel, utcbs);
        self.create_portal(Sel(evt + EV_STARTUP), handler_sel, 0x1100, Mtd::GPR);
        self.create_portal(
            Sel(evt + EV_RECALL),
            handler_sel,
            0x1200,
            Mtd::GPR | Mtd::QUAL,
        );

        let ret = self.syscall(
            0,
            SysCreateEc::encode(
                worker_sel,
                Sel(0),
                ec_flags::GLOBAL,
                utcbs + 0x1000,
                0xe000,
                cpu as u16,
                evt,
            ),
        );
        assert_eq!(ret.status(), Some(Status::Success), "create worker ec");
        let worker = self.lookup_ec(worker_sel);

        let qpd = Qpd::new(prio, 100).expect("valid qpd");
        let ret = self.syscall(0, SysCreateSc::encode(sc_sel, Sel(0), worker_sel, qpd));
        assert_eq!(ret.status(), Some(Status::Success), "create worker sc");

        // First activation sends the startup message to the handler.
        let ret = self.kernel.schedule(CpuId(cpu));
        assert!(
            Arc::ptr_eq(&ret.ec, &handler),
            "startup lands in the event handler"
        );

        // The handler's reply puts the worker into user mode.
        let ret = self.syscall(cpu, SysIpcReply::encode(Mtd::empty()));
        assert!(
            Arc::ptr_eq(&ret.ec, &worker),
            "startup reply resumes the worker"
        );

        (worker, handler)
    }
}
