//! Capability and resource-range delegation, and its failure atomicity.

#[cfg(test)]
mod tests {
    use crate::harness::TestEnv;
    use kernel_abi::{CreatePdOp, MemAttr, Sel, Status, SysCreatePd, SysCtrlPd};
    use microvisor::{root_sels, PermPd, PermSp};

    /// Builds a child PD with an attached host space; returns the child's
    /// selectors `(pd, hst)`.
    fn child_with_hst(env: &TestEnv) -> (Sel, Sel) {
        let pd_sel = Sel(0x40);
        let hst_sel = Sel(0x41);
        let ret = env.syscall(0, SysCreatePd::encode(pd_sel, Sel(0), CreatePdOp::Pd));
        assert_eq!(ret.status(), Some(Status::Success));
        let ret = env.syscall(0, SysCreatePd::encode(hst_sel, pd_sel, CreatePdOp::Hst));
        assert_eq!(ret.status(), Some(Status::Success));
        (pd_sel, hst_sel)
    }

    fn child_hst_entries(env: &TestEnv, pd_sel: Sel) -> Vec<(u64, microvisor::space::ResourceCap)> {
        env.root_obj()
            .lookup(pd_sel)
            .pd(PermPd::all())
            .expect("child pd capability")
            .get_hst()
            .expect("child hst attached")
            .map()
            .entries()
    }

    /// An aligned host-range delegation moves the whole range with masked
    /// permissions and propagated attributes.
    #[test]
    fn test_aligned_host_delegation_succeeds() {
        let env = TestEnv::new(1);
        let (pd_sel, hst_sel) = child_with_hst(&env);

        let ret = env.syscall(
            0,
            SysCtrlPd::encode(root_sels::HST, hst_sel, 0x10, 0x10, 4, 0b101, MemAttr(0)),
        );
        assert_eq!(ret.status(), Some(Status::Success));

        let entries = child_hst_entries(&env, pd_sel);
        assert_eq!(entries.len(), 16);
        for (index, cap) in &entries {
            assert!((0x10..0x20).contains(index));
            assert_eq!(cap.perm, 0b101, "permissions masked");
            assert_eq!(cap.attr, MemAttr(1), "boot attribute propagated");
        }
    }

    /// A misaligned base fails with BAD_PAR before anything moves.
    #[test]
    fn test_misaligned_delegation_rejected_without_effect() {
        let env = TestEnv::new(1);
        let (pd_sel, hst_sel) = child_with_hst(&env);

        let ret = env.syscall(
            0,
            SysCtrlPd::encode(root_sels::HST, hst_sel, 0x18, 0x18, 4, 0b111, MemAttr(0)),
        );
        assert_eq!(ret.status(), Some(Status::BadPar));
        assert!(child_hst_entries(&env, pd_sel).is_empty(), "destination untouched");
    }

    /// A range crossing unmapped source frames fails whole, leaving the
    /// destination bit-for-bit unchanged.
    #[test]
    fn test_partial_source_fails_whole() {
        let env = TestEnv::new(1);
        let (pd_sel, hst_sel) = child_with_hst(&env);

        // Seed one destination entry to observe it surviving.
        let ret = env.syscall(
            0,
            SysCtrlPd::encode(root_sels::HST, hst_sel, 0x20, 0x300, 0, 0b111, MemAttr(0)),
        );
        assert_eq!(ret.status(), Some(Status::Success));
        let before = child_hst_entries(&env, pd_sel);

        // An aligned 16-frame window over a half-populated region.
        let root_hst = env.kernel.root_pd().get_hst().expect("root hst");
        for frame in 0x200..0x208 {
            root_hst.map().populate(frame, 0b111, MemAttr(1));
        }
        let ret = env.syscall(
            0,
            SysCtrlPd::encode(root_sels::HST, hst_sel, 0x200, 0x400, 4, 0b111, MemAttr(0)),
        );
        assert_eq!(ret.status(), Some(Status::BadCap));
        assert_eq!(child_hst_entries(&env, pd_sel), before);
    }

    /// Object-space delegation copies capabilities with a permission mask
    /// and refuses occupied destination slots.
    #[test]
    fn test_object_capability_delegation() {
        let env = TestEnv::new(1);

        // Copy the root PD capability into a free slot, keeping only the
        // sub-PD permission.
        let ret = env.syscall(
            0,
            SysCtrlPd::encode(
                root_sels::OBJ,
                root_sels::OBJ,
                0,
                0x50,
                0,
                PermPd::PD.bits(),
                MemAttr(0),
            ),
        );
        assert_eq!(ret.status(), Some(Status::Success));

        let cap = env.root_obj().lookup(Sel(0x50));
        assert!(cap.pd(PermPd::PD).is_some());
        assert!(cap.pd(PermPd::EC).is_none(), "mask removed ec creation");

        // The destination slot is now occupied: a second transfer fails
        // and the capability is unchanged.
        let ret = env.syscall(
            0,
            SysCtrlPd::encode(
                root_sels::OBJ,
                root_sels::OBJ,
                1,
                0x50,
                0,
                0xff,
                MemAttr(0),
            ),
        );
        assert_eq!(ret.status(), Some(Status::BadCap));
        assert!(env.root_obj().lookup(Sel(0x50)).pd(PermPd::PD).is_some());
    }

    /// Delegating out of the kernel-owned host space requires a concrete
    /// memory attribute.
    #[test]
    fn test_kernel_space_requires_attribute() {
        let env = TestEnv::new(1);
        let (pd_sel, hst_sel) = child_with_hst(&env);

        // The kernel host space starts empty; seed a frame for the grant.
        let (_, kern) = env
            .root_obj()
            .lookup(root_sels::KERNEL_HST)
            .space(PermSp::TAKE)
            .expect("kernel hst capability");
        let microvisor::ObjectRef::Hst(kern) = kern else {
            panic!("kernel hst capability has the wrong subtype");
        };
        kern.map().populate(0x8000, 0b111, MemAttr(1));

        let ret = env.syscall(
            0,
            SysCtrlPd::encode(root_sels::KERNEL_HST, hst_sel, 0x8000, 0x8000, 0, 0b111, MemAttr(0)),
        );
        assert_eq!(ret.status(), Some(Status::BadPar), "attribute required");

        let ret = env.syscall(
            0,
            SysCtrlPd::encode(root_sels::KERNEL_HST, hst_sel, 0x8000, 0x8000, 0, 0b111, MemAttr(4)),
        );
        assert_eq!(ret.status(), Some(Status::Success));
        let entries = child_hst_entries(&env, pd_sel);
        assert_eq!(entries, vec![(0x8000, microvisor::space::ResourceCap { perm: 0b111, attr: MemAttr(4) })]);
    }

    /// Mismatched space subtypes cannot delegate into each other.
    #[test]
    fn test_subtype_mismatch_rejected() {
        let env = TestEnv::new(1);

        // PIO into OBJ is meaningless.
        let ret = env.syscall(
            0,
            SysCtrlPd::encode(root_sels::PIO, root_sels::OBJ, 0, 0x50, 0, 0xff, MemAttr(0)),
        );
        assert_eq!(ret.status(), Some(Status::BadCap));
        assert!(env.root_obj().lookup(Sel(0x50)).is_empty());
    }
}
