//! Object creation and control operations.

#[cfg(test)]
mod tests {
    use crate::harness::{TestEnv, TEST_SMMU};
    use kernel_abi::{
        ec_flags, CreatePdOp, Mtd, Qpd, Sel, Status, SysArgs, SysAssignDev, SysAssignInt,
        SysCreateEc, SysCreatePd, SysCreatePt, SysCreateSc, SysCreateSm, SysCtrlHw, SysCtrlSc,
    };
    use microvisor::{
        root_sels, Continuation, CpuId, FeatureSet, IpiKind, KernelConfig, SimAcpi, TraceEvent,
        UserMode,
    };

    /// Reserved dispatcher slots fail with BAD_HYP.
    #[test]
    fn test_reserved_slots() {
        let env = TestEnv::new(1);
        for index in [7u64, 15] {
            let ret = env.syscall(0, SysArgs { p: [index, 0, 0, 0, 0, 0] });
            assert_eq!(ret.status(), Some(Status::BadHyp));
        }
    }

    /// S6: creating a vCPU (zero UTCB) requires a virtualization feature.
    #[test]
    fn test_vcpu_creation_gated_on_features() {
        let env = TestEnv::new(1);
        let ret = env.syscall(
            0,
            SysCreateEc::encode(Sel(0x20), Sel(0), ec_flags::GLOBAL, 0, 0xe000, 0, 0x100),
        );
        assert_eq!(ret.status(), Some(Status::BadFtr));

        let env = TestEnv::with_config(KernelConfig {
            cpu_count: 1,
            features: FeatureSet::VMX,
            ..KernelConfig::default()
        });
        let ret = env.syscall(
            0,
            SysCreateEc::encode(Sel(0x20), Sel(0), ec_flags::GLOBAL, 0, 0xe000, 0, 0x100),
        );
        assert_eq!(ret.status(), Some(Status::Success));

        let vcpu = env.lookup_ec(Sel(0x20));
        assert!(vcpu.is_vcpu());
        assert!(vcpu.utcb().is_none());
        assert_eq!(
            vcpu.continuation(),
            Continuation::SendMsg(UserMode::VmxResume),
            "first activation announces through the vm-exit flavor"
        );
    }

    /// EC creation validates CPU range and UTCB placement before touching
    /// anything.
    #[test]
    fn test_create_ec_validation() {
        let env = TestEnv::new(2);

        let ret = env.syscall(
            0,
            SysCreateEc::encode(Sel(0x20), Sel(0), 0, 0x10000, 0, 9, 0),
        );
        assert_eq!(ret.status(), Some(Status::BadCpu));

        // Misaligned UTCB.
        let ret = env.syscall(
            0,
            SysCreateEc::encode(Sel(0x20), Sel(0), 0, 0x10001, 0, 0, 0),
        );
        assert_eq!(ret.status(), Some(Status::BadPar));

        // No EC appeared.
        assert!(env.root_obj().lookup(Sel(0x20)).is_empty());
    }

    /// An occupied destination selector fails creation and destroys the
    /// already-allocated object.
    #[test]
    fn test_occupied_selector_rolls_back() {
        let env = TestEnv::new(1);

        // Selector 16 holds a boot interrupt semaphore.
        let ret = env.syscall(0, SysCreateSm::encode(root_sels::GSI_BASE, Sel(0), 0));
        assert_eq!(ret.status(), Some(Status::BadCap));
        assert!(env
            .kernel
            .trace
            .has_event(|e| matches!(e, TraceEvent::ObjectDestroyed { .. })));
    }

    /// SC creation: only schedulable ECs can bind one, and the QPD must
    /// carry a nonzero priority and quantum.
    #[test]
    fn test_create_sc_validation() {
        let env = TestEnv::new(1);
        env.create_local_server(0, Sel(0x20), 0x10000);

        let qpd = Qpd::new(10, 100).unwrap();
        let ret = env.syscall(0, SysCreateSc::encode(Sel(0x21), Sel(0), Sel(0x20), qpd));
        assert_eq!(ret.status(), Some(Status::BadCap), "local ec cannot bind an sc");

        let ret = env.syscall(
            0,
            SysCreateEc::encode(Sel(0x22), Sel(0), ec_flags::GLOBAL, 0x11000, 0, 0, 0x100),
        );
        assert_eq!(ret.status(), Some(Status::Success));

        let ret = env.syscall(
            0,
            SysCreateSc::encode(Sel(0x23), Sel(0), Sel(0x22), Qpd::from_raw(0)),
        );
        assert_eq!(ret.status(), Some(Status::BadPar), "zero qpd rejected");
    }

    /// Portal creation requires a LOCAL server EC.
    #[test]
    fn test_create_pt_requires_local_server() {
        let env = TestEnv::new(1);
        let ret = env.syscall(
            0,
            SysCreateEc::encode(Sel(0x20), Sel(0), ec_flags::GLOBAL, 0x10000, 0, 0, 0x100),
        );
        assert_eq!(ret.status(), Some(Status::Success));

        let ret = env.syscall(
            0,
            SysCreatePt::encode(Sel(0x21), Sel(0), Sel(0x20), Mtd::GPR, 0x5000),
        );
        assert_eq!(ret.status(), Some(Status::BadCap));
    }

    /// Space subtypes attach once per PD; a second attach fails.
    #[test]
    fn test_space_attach_is_once_per_pd() {
        let env = TestEnv::new(1);
        let ret = env.syscall(0, SysCreatePd::encode(Sel(0x40), Sel(0), CreatePdOp::Pd));
        assert_eq!(ret.status(), Some(Status::Success));

        let ret = env.syscall(0, SysCreatePd::encode(Sel(0x41), Sel(0x40), CreatePdOp::Obj));
        assert_eq!(ret.status(), Some(Status::Success));
        let ret = env.syscall(0, SysCreatePd::encode(Sel(0x42), Sel(0x40), CreatePdOp::Obj));
        assert_eq!(ret.status(), Some(Status::BadCap));
    }

    /// Per-PD slab budgets: exhausting one type in one PD yields MEM_OBJ
    /// and leaves other PDs untouched.
    #[test]
    fn test_slab_exhaustion() {
        let env = TestEnv::with_config(KernelConfig {
            cpu_count: 1,
            slab_capacity: 3,
            gsi_count: 0,
            ..KernelConfig::default()
        });

        for i in 0..3u64 {
            let ret = env.syscall(0, SysCreateSm::encode(Sel(0x30 + i), Sel(0), 0));
            assert_eq!(ret.status(), Some(Status::Success));
        }
        let ret = env.syscall(0, SysCreateSm::encode(Sel(0x33), Sel(0), 0));
        assert_eq!(ret.status(), Some(Status::MemObj));
    }

    /// `ctrl_sc` reports the accumulated runtime of the scheduling context.
    #[test]
    fn test_ctrl_sc_reports_runtime() {
        let env = TestEnv::new(1);
        env.kernel.elapse(CpuId(0), 25);

        let ret = env.syscall(0, SysCtrlSc::encode(root_sels::SC));
        assert_eq!(ret.status(), Some(Status::Success));
        assert_eq!(ret.ec.frame_snapshot().gpr[1], 25);
    }

    /// `ctrl_hw` stages a supported sleep transition, broadcasts a kernel
    /// entry, and rejects unsupported or refused transitions.
    #[test]
    fn test_ctrl_hw_sleep_transition() {
        let env = TestEnv::new(1);

        let ret = env.syscall(0, SysCtrlHw::encode(1, 0));
        assert_eq!(ret.status(), Some(Status::BadPar), "unknown operation");

        let ret = env.syscall(0, SysCtrlHw::encode(0, 3));
        assert_eq!(ret.status(), Some(Status::BadFtr), "unsupported state");

        let ret = env.syscall(0, SysCtrlHw::encode(0, 5));
        assert_eq!(ret.status(), Some(Status::Success));
        assert_eq!(env.acpi.staged(), vec![5]);
        assert_eq!(env.intr.broadcast(), vec![(IpiKind::RemoteKernelEntry, 0)]);
        assert!(env
            .kernel
            .trace
            .has_event(|e| matches!(e, TraceEvent::SleepStaged { state: 5 })));

        let env = TestEnv::with_acpi(SimAcpi::rejecting([5]));
        let ret = env.syscall(0, SysCtrlHw::encode(0, 5));
        assert_eq!(ret.status(), Some(Status::Aborted));
    }

    /// `assign_int` routes a boot interrupt semaphore's GSI and reports
    /// the MSI route; the device frame must be mapped for the caller.
    #[test]
    fn test_assign_int() {
        let env = TestEnv::new(2);

        let ret = env.syscall(0, SysAssignInt::encode(root_sels::GSI_BASE.offset(1), 0x20, 1));
        assert_eq!(ret.status(), Some(Status::Success));
        assert_eq!(env.intr.routed(), vec![(1, 1, 1)]);
        let msi = ret.ec.frame_snapshot().gpr[1];
        assert_eq!(msi, (0x30 + 1) | (1 << 32));

        // Unmapped device frame.
        let ret = env.syscall(0, SysAssignInt::encode(root_sels::GSI_BASE.offset(1), 0x900, 1));
        assert_eq!(ret.status(), Some(Status::BadDev));

        // An ordinary semaphore has no GSI binding.
        let ret = env.syscall(0, SysCreateSm::encode(Sel(0x30), Sel(0), 0));
        assert_eq!(ret.status(), Some(Status::Success));
        let ret = env.syscall(0, SysAssignInt::encode(Sel(0x30), 0x20, 0));
        assert_eq!(ret.status(), Some(Status::BadCap));

        let ret = env.syscall(0, SysAssignInt::encode(root_sels::GSI_BASE, 0x20, 9));
        assert_eq!(ret.status(), Some(Status::BadCpu));
    }

    /// `assign_dev` binds a DMA space to a device through the IOMMU.
    #[test]
    fn test_assign_dev() {
        let env = TestEnv::new(1);

        let ret = env.syscall(0, SysCreatePd::encode(Sel(0x40), Sel(0), CreatePdOp::Pd));
        assert_eq!(ret.status(), Some(Status::Success));
        let ret = env.syscall(0, SysCreatePd::encode(Sel(0x41), Sel(0x40), CreatePdOp::Dma));
        assert_eq!(ret.status(), Some(Status::Success));

        let ret = env.syscall(0, SysAssignDev::encode(Sel(0x41), TEST_SMMU, 0xab));
        assert_eq!(ret.status(), Some(Status::Success));
        assert_eq!(env.iommu.configured().len(), 1);
        assert_eq!(env.iommu.configured()[0].1, 0xab);

        // Unknown IOMMU instance.
        let ret = env.syscall(0, SysAssignDev::encode(Sel(0x41), 99, 0xab));
        assert_eq!(ret.status(), Some(Status::BadDev));

        // A rejected device descriptor.
        let ret = env.syscall(0, SysAssignDev::encode(Sel(0x41), TEST_SMMU, 0));
        assert_eq!(ret.status(), Some(Status::BadPar));

        // Not a DMA space.
        let ret = env.syscall(0, SysAssignDev::encode(root_sels::OBJ, TEST_SMMU, 0xab));
        assert_eq!(ret.status(), Some(Status::BadCap));
    }
}
