//! Hypercall argument words and their typed views.
//!
//! A hypercall passes six words `p0..p5`. `p0` is split: bits 3..0 carry the
//! hypercall index, bits 7..4 carry a per-call flag nibble, and bits 63..8
//! carry the first argument (almost always a capability selector). The
//! remaining arguments use whole words. Results come back in `p0` (status)
//! and, for the few calls that produce data, `p1`.
//!
//! Each hypercall has a view struct (`SysIpcCall`, `SysCreateEc`, ...) that
//! owns the packing for that call. The `encode` constructors are what a user
//! runtime would use; the accessors are what the kernel dispatcher uses.

use crate::event::Qpd;
use crate::mtd::Mtd;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of bits of `p0` reserved for index and flags.
const SEL_SHIFT: u64 = 8;
/// Flag nibble position within `p0`.
const FLAG_SHIFT: u64 = 4;

/// Capability selector: an index into an object space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sel(pub u64);

impl Sel {
    /// Offsets a selector by `delta` slots.
    pub fn offset(self, delta: u64) -> Sel {
        Sel(self.0 + delta)
    }
}

impl fmt::Display for Sel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sel:{:#x}", self.0)
    }
}

/// Errors produced while decoding argument words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbiError {
    /// The hypercall index maps to no operation.
    #[error("invalid hypercall index {0}")]
    InvalidHypercall(u64),
    /// The `create_pd` operation nibble is out of range.
    #[error("invalid create_pd operation {0}")]
    InvalidOp(u64),
    /// Priority or quantum of a QPD is zero.
    #[error("invalid qpd {0:#x}")]
    InvalidQpd(u64),
}

/// The raw six-word hypercall argument block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysArgs {
    pub p: [u64; 6],
}

impl SysArgs {
    /// Hypercall index from the low four bits of `p0`.
    pub fn hypercall(&self) -> Result<Hypercall, AbiError> {
        Hypercall::from_index(self.p[0] & 0xf)
    }

    /// Per-call flag nibble.
    pub fn flags(&self) -> u64 {
        (self.p[0] >> FLAG_SHIFT) & 0xf
    }

    /// First argument (selector field) of `p0`.
    pub fn sel(&self) -> Sel {
        Sel(self.p[0] >> SEL_SHIFT)
    }

    fn pack(hypercall: Hypercall, flags: u64, sel: Sel) -> u64 {
        debug_assert!(flags <= 0xf);
        hypercall.index() | (flags << FLAG_SHIFT) | (sel.0 << SEL_SHIFT)
    }
}

/// The sixteen dispatcher slots. Indices 7 and 15 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hypercall {
    Call,
    Reply,
    CreatePd,
    CreateEc,
    CreateSc,
    CreatePt,
    CreateSm,
    CtrlEc,
    CtrlSc,
    CtrlPt,
    CtrlSm,
    CtrlHw,
    AssignInt,
    AssignDev,
}

impl Hypercall {
    /// Decodes a dispatcher slot; reserved slots decode to an error.
    pub fn from_index(index: u64) -> Result<Hypercall, AbiError> {
        Ok(match index {
            0 => Hypercall::Call,
            1 => Hypercall::Reply,
            2 => Hypercall::CreatePd,
            3 => Hypercall::CreateEc,
            4 => Hypercall::CreateSc,
            5 => Hypercall::CreatePt,
            6 => Hypercall::CreateSm,
            8 => Hypercall::CtrlEc,
            9 => Hypercall::CtrlSc,
            10 => Hypercall::CtrlPt,
            11 => Hypercall::CtrlSm,
            12 => Hypercall::CtrlHw,
            13 => Hypercall::AssignInt,
            14 => Hypercall::AssignDev,
            other => return Err(AbiError::InvalidHypercall(other)),
        })
    }

    /// Wire index of this operation.
    pub fn index(self) -> u64 {
        match self {
            Hypercall::Call => 0,
            Hypercall::Reply => 1,
            Hypercall::CreatePd => 2,
            Hypercall::CreateEc => 3,
            Hypercall::CreateSc => 4,
            Hypercall::CreatePt => 5,
            Hypercall::CreateSm => 6,
            Hypercall::CtrlEc => 8,
            Hypercall::CtrlSc => 9,
            Hypercall::CtrlPt => 10,
            Hypercall::CtrlSm => 11,
            Hypercall::CtrlHw => 12,
            Hypercall::AssignInt => 13,
            Hypercall::AssignDev => 14,
        }
    }

    /// Stable name used in trace events.
    pub fn name(self) -> &'static str {
        match self {
            Hypercall::Call => "call",
            Hypercall::Reply => "reply",
            Hypercall::CreatePd => "create_pd",
            Hypercall::CreateEc => "create_ec",
            Hypercall::CreateSc => "create_sc",
            Hypercall::CreatePt => "create_pt",
            Hypercall::CreateSm => "create_sm",
            Hypercall::CtrlEc => "ctrl_ec",
            Hypercall::CtrlSc => "ctrl_sc",
            Hypercall::CtrlPt => "ctrl_pt",
            Hypercall::CtrlSm => "ctrl_sm",
            Hypercall::CtrlHw => "ctrl_hw",
            Hypercall::AssignInt => "assign_int",
            Hypercall::AssignDev => "assign_dev",
        }
    }
}

/// Memory-attribute hint carried by host-space delegation.
///
/// Zero means "no hint"; delegation out of the kernel-owned host space
/// requires a concrete hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemAttr(pub u32);

impl MemAttr {
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// `call(pt_sel, mtd, nonblocking)`
#[derive(Debug, Clone, Copy)]
pub struct SysIpcCall(SysArgs);

impl SysIpcCall {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(pt: Sel, mtd: Mtd, nonblocking: bool) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::Call, nonblocking as u64, pt),
                mtd.bits(),
                0,
                0,
                0,
                0,
            ],
        }
    }

    pub fn pt(&self) -> Sel {
        self.0.sel()
    }

    pub fn mtd(&self) -> Mtd {
        Mtd::from_bits_truncate(self.0.p[1])
    }

    /// When set, a busy server yields an immediate `TIMEOUT`.
    pub fn nonblocking(&self) -> bool {
        self.0.flags() & 1 != 0
    }
}

/// `reply(mtd)`
#[derive(Debug, Clone, Copy)]
pub struct SysIpcReply(SysArgs);

impl SysIpcReply {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(mtd: Mtd) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::Reply, 0, Sel(0)),
                mtd.bits(),
                0,
                0,
                0,
                0,
            ],
        }
    }

    pub fn mtd(&self) -> Mtd {
        Mtd::from_bits_truncate(self.0.p[1])
    }
}

/// Space subtype selector for `create_pd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatePdOp {
    Pd,
    Obj,
    Hst,
    Gst,
    Dma,
    Pio,
    Msr,
}

impl CreatePdOp {
    fn from_raw(raw: u64) -> Result<CreatePdOp, AbiError> {
        Ok(match raw {
            0 => CreatePdOp::Pd,
            1 => CreatePdOp::Obj,
            2 => CreatePdOp::Hst,
            3 => CreatePdOp::Gst,
            4 => CreatePdOp::Dma,
            5 => CreatePdOp::Pio,
            6 => CreatePdOp::Msr,
            other => return Err(AbiError::InvalidOp(other)),
        })
    }

    fn as_raw(self) -> u64 {
        match self {
            CreatePdOp::Pd => 0,
            CreatePdOp::Obj => 1,
            CreatePdOp::Hst => 2,
            CreatePdOp::Gst => 3,
            CreatePdOp::Dma => 4,
            CreatePdOp::Pio => 5,
            CreatePdOp::Msr => 6,
        }
    }
}

/// `create_pd(sel, pd, op)` - create a sub-PD or attach a space.
#[derive(Debug, Clone, Copy)]
pub struct SysCreatePd(SysArgs);

impl SysCreatePd {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(sel: Sel, pd: Sel, op: CreatePdOp) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::CreatePd, op.as_raw(), sel),
                pd.0,
                0,
                0,
                0,
                0,
            ],
        }
    }

    pub fn sel(&self) -> Sel {
        self.0.sel()
    }

    pub fn pd(&self) -> Sel {
        Sel(self.0.p[1])
    }

    pub fn op(&self) -> Result<CreatePdOp, AbiError> {
        CreatePdOp::from_raw(self.0.flags())
    }
}

/// `create_ec(sel, pd, utcb, sp, cpu, evt)` - a zero UTCB address creates a vCPU.
#[derive(Debug, Clone, Copy)]
pub struct SysCreateEc(SysArgs);

/// Flag nibble bits for `create_ec`.
pub mod ec_flags {
    /// EC is bound to scheduling contexts (GLOBAL); clear means portal server (LOCAL).
    pub const GLOBAL: u64 = 1 << 0;
    /// vCPU uses offset-based time accounting.
    pub const VCPU_OFFS: u64 = 1 << 1;
    /// Allocate an FPU save area.
    pub const FPU: u64 = 1 << 2;
}

impl SysCreateEc {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(sel: Sel, pd: Sel, flags: u64, utcb: u64, sp: u64, cpu: u16, evt: u64) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::CreateEc, flags, sel),
                pd.0,
                utcb,
                sp,
                cpu as u64,
                evt,
            ],
        }
    }

    pub fn sel(&self) -> Sel {
        self.0.sel()
    }

    pub fn pd(&self) -> Sel {
        Sel(self.0.p[1])
    }

    pub fn utcb(&self) -> u64 {
        self.0.p[2]
    }

    pub fn sp(&self) -> u64 {
        self.0.p[3]
    }

    pub fn cpu(&self) -> u16 {
        self.0.p[4] as u16
    }

    pub fn evt(&self) -> u64 {
        self.0.p[5]
    }

    pub fn global(&self) -> bool {
        self.0.flags() & ec_flags::GLOBAL != 0
    }

    pub fn vcpu_offs(&self) -> bool {
        self.0.flags() & ec_flags::VCPU_OFFS != 0
    }

    pub fn fpu(&self) -> bool {
        self.0.flags() & ec_flags::FPU != 0
    }
}

/// `create_sc(sel, pd, ec, qpd)`
#[derive(Debug, Clone, Copy)]
pub struct SysCreateSc(SysArgs);

impl SysCreateSc {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(sel: Sel, pd: Sel, ec: Sel, qpd: Qpd) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::CreateSc, 0, sel),
                pd.0,
                ec.0,
                qpd.as_raw(),
                0,
                0,
            ],
        }
    }

    pub fn sel(&self) -> Sel {
        self.0.sel()
    }

    pub fn pd(&self) -> Sel {
        Sel(self.0.p[1])
    }

    pub fn ec(&self) -> Sel {
        Sel(self.0.p[2])
    }

    pub fn qpd(&self) -> Qpd {
        Qpd::from_raw(self.0.p[3])
    }
}

/// `create_pt(sel, pd, ec, mtd, ip)`
#[derive(Debug, Clone, Copy)]
pub struct SysCreatePt(SysArgs);

impl SysCreatePt {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(sel: Sel, pd: Sel, ec: Sel, mtd: Mtd, ip: u64) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::CreatePt, 0, sel),
                pd.0,
                ec.0,
                mtd.bits(),
                ip,
                0,
            ],
        }
    }

    pub fn sel(&self) -> Sel {
        self.0.sel()
    }

    pub fn pd(&self) -> Sel {
        Sel(self.0.p[1])
    }

    pub fn ec(&self) -> Sel {
        Sel(self.0.p[2])
    }

    pub fn mtd(&self) -> Mtd {
        Mtd::from_bits_truncate(self.0.p[3])
    }

    pub fn ip(&self) -> u64 {
        self.0.p[4]
    }
}

/// `create_sm(sel, pd, cnt)`
#[derive(Debug, Clone, Copy)]
pub struct SysCreateSm(SysArgs);

impl SysCreateSm {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(sel: Sel, pd: Sel, cnt: u64) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::CreateSm, 0, sel),
                pd.0,
                cnt,
                0,
                0,
                0,
            ],
        }
    }

    pub fn sel(&self) -> Sel {
        self.0.sel()
    }

    pub fn pd(&self) -> Sel {
        Sel(self.0.p[1])
    }

    pub fn cnt(&self) -> u64 {
        self.0.p[2]
    }
}

/// Flag nibble value that routes dispatcher slot 2 to `ctrl_pd` instead of
/// `create_pd`. Slots 7 and 15 of the table stay reserved.
pub const CREATE_PD_DELEGATE_OP: u64 = 7;

/// `ctrl_pd(src, dst, ssb, dsb, ord, pmm, attr)` - range delegation.
#[derive(Debug, Clone, Copy)]
pub struct SysCtrlPd(SysArgs);

impl SysCtrlPd {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(src: Sel, dst: Sel, ssb: u64, dsb: u64, ord: u8, pmm: u8, attr: MemAttr) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::CreatePd, CREATE_PD_DELEGATE_OP, src),
                dst.0,
                ssb,
                dsb,
                ord as u64,
                pmm as u64 | ((attr.0 as u64) << 32),
            ],
        }
    }

    pub fn src(&self) -> Sel {
        self.0.sel()
    }

    pub fn dst(&self) -> Sel {
        Sel(self.0.p[1])
    }

    pub fn ssb(&self) -> u64 {
        self.0.p[2]
    }

    pub fn dsb(&self) -> u64 {
        self.0.p[3]
    }

    pub fn ord(&self) -> u8 {
        self.0.p[4] as u8
    }

    pub fn pmm(&self) -> u8 {
        self.0.p[5] as u8
    }

    pub fn attr(&self) -> MemAttr {
        MemAttr((self.0.p[5] >> 32) as u32)
    }
}

/// `ctrl_ec(ec)` - set the recall hazard.
#[derive(Debug, Clone, Copy)]
pub struct SysCtrlEc(SysArgs);

impl SysCtrlEc {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(ec: Sel) -> SysArgs {
        SysArgs {
            p: [SysArgs::pack(Hypercall::CtrlEc, 0, ec), 0, 0, 0, 0, 0],
        }
    }

    pub fn ec(&self) -> Sel {
        self.0.sel()
    }
}

/// `ctrl_sc(sc)` - accumulated runtime comes back in `p1`.
#[derive(Debug, Clone, Copy)]
pub struct SysCtrlSc(SysArgs);

impl SysCtrlSc {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(sc: Sel) -> SysArgs {
        SysArgs {
            p: [SysArgs::pack(Hypercall::CtrlSc, 0, sc), 0, 0, 0, 0, 0],
        }
    }

    pub fn sc(&self) -> Sel {
        self.0.sel()
    }
}

/// `ctrl_pt(pt, id)` - re-badge a portal.
#[derive(Debug, Clone, Copy)]
pub struct SysCtrlPt(SysArgs);

impl SysCtrlPt {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(pt: Sel, id: u64) -> SysArgs {
        SysArgs {
            p: [SysArgs::pack(Hypercall::CtrlPt, 0, pt), id, 0, 0, 0, 0],
        }
    }

    pub fn pt(&self) -> Sel {
        self.0.sel()
    }

    pub fn id(&self) -> u64 {
        self.0.p[1]
    }
}

/// `ctrl_sm(sm, op, zc, time)`
#[derive(Debug, Clone, Copy)]
pub struct SysCtrlSm(SysArgs);

/// Flag nibble bits for `ctrl_sm`.
pub mod sm_flags {
    /// Set: `dn`; clear: `up`.
    pub const DN: u64 = 1 << 0;
    /// Zero-consume: never block, fail with `TIMEOUT` instead.
    pub const ZC: u64 = 1 << 1;
}

impl SysCtrlSm {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode_up(sm: Sel) -> SysArgs {
        SysArgs {
            p: [SysArgs::pack(Hypercall::CtrlSm, 0, sm), 0, 0, 0, 0, 0],
        }
    }

    pub fn encode_dn(sm: Sel, zero_consume: bool, deadline: u64) -> SysArgs {
        let flags = sm_flags::DN | if zero_consume { sm_flags::ZC } else { 0 };
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::CtrlSm, flags, sm),
                deadline,
                0,
                0,
                0,
                0,
            ],
        }
    }

    pub fn sm(&self) -> Sel {
        self.0.sel()
    }

    pub fn dn(&self) -> bool {
        self.0.flags() & sm_flags::DN != 0
    }

    pub fn zero_consume(&self) -> bool {
        self.0.flags() & sm_flags::ZC != 0
    }

    /// Absolute tick deadline; zero means no deadline.
    pub fn deadline(&self) -> u64 {
        self.0.p[1]
    }
}

/// `ctrl_hw(op, desc)` - root-only hardware control.
#[derive(Debug, Clone, Copy)]
pub struct SysCtrlHw(SysArgs);

impl SysCtrlHw {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(op: u64, desc: u64) -> SysArgs {
        SysArgs {
            p: [SysArgs::pack(Hypercall::CtrlHw, op, Sel(0)), desc, 0, 0, 0, 0],
        }
    }

    pub fn op(&self) -> u64 {
        self.0.flags()
    }

    pub fn desc(&self) -> u64 {
        self.0.p[1]
    }
}

/// `assign_int(sm, dev, cpu)` - the programmed MSI route comes back in `p1`.
#[derive(Debug, Clone, Copy)]
pub struct SysAssignInt(SysArgs);

impl SysAssignInt {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(sm: Sel, dev: u64, cpu: u16) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::AssignInt, 0, sm),
                dev,
                cpu as u64,
                0,
                0,
                0,
            ],
        }
    }

    pub fn sm(&self) -> Sel {
        self.0.sel()
    }

    pub fn dev(&self) -> u64 {
        self.0.p[1]
    }

    pub fn cpu(&self) -> u16 {
        self.0.p[2] as u16
    }
}

/// `assign_dev(dma, smmu, dad)` - root-only IOMMU programming.
#[derive(Debug, Clone, Copy)]
pub struct SysAssignDev(SysArgs);

impl SysAssignDev {
    pub fn new(args: SysArgs) -> Self {
        Self(args)
    }

    pub fn encode(dma: Sel, smmu: u64, dad: u64) -> SysArgs {
        SysArgs {
            p: [
                SysArgs::pack(Hypercall::AssignDev, 0, dma),
                smmu,
                dad,
                0,
                0,
                0,
            ],
        }
    }

    pub fn dma(&self) -> Sel {
        self.0.sel()
    }

    pub fn smmu(&self) -> u64 {
        self.0.p[1]
    }

    pub fn dad(&self) -> u64 {
        self.0.p[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hypercall_reserved_slots() {
        assert_eq!(Hypercall::from_index(7), Err(AbiError::InvalidHypercall(7)));
        assert_eq!(
            Hypercall::from_index(15),
            Err(AbiError::InvalidHypercall(15))
        );
    }

    #[test]
    fn test_hypercall_index_round_trip() {
        for index in (0..7).chain(8..15) {
            let hypercall = Hypercall::from_index(index).expect("valid slot");
            assert_eq!(hypercall.index(), index);
        }
    }

    #[test]
    fn test_ipc_call_encoding() {
        let args = SysIpcCall::encode(Sel(0x42), Mtd::GPR | Mtd::IP, true);
        assert_eq!(args.hypercall(), Ok(Hypercall::Call));

        let view = SysIpcCall::new(args);
        assert_eq!(view.pt(), Sel(0x42));
        assert_eq!(view.mtd(), Mtd::GPR | Mtd::IP);
        assert!(view.nonblocking());

        let blocking = SysIpcCall::new(SysIpcCall::encode(Sel(1), Mtd::GPR, false));
        assert!(!blocking.nonblocking());
    }

    #[test]
    fn test_create_ec_encoding() {
        let args = SysCreateEc::encode(
            Sel(9),
            Sel(0),
            ec_flags::GLOBAL | ec_flags::FPU,
            0x7000,
            0x8000,
            3,
            0x100,
        );
        let view = SysCreateEc::new(args);
        assert_eq!(view.sel(), Sel(9));
        assert_eq!(view.pd(), Sel(0));
        assert_eq!(view.utcb(), 0x7000);
        assert_eq!(view.sp(), 0x8000);
        assert_eq!(view.cpu(), 3);
        assert_eq!(view.evt(), 0x100);
        assert!(view.global());
        assert!(view.fpu());
        assert!(!view.vcpu_offs());
    }

    #[test]
    fn test_ctrl_pd_encoding() {
        let args = SysCtrlPd::encode(Sel(3), Sel(4), 0x10, 0x20, 4, 0b101, MemAttr(7));
        assert_eq!(args.hypercall(), Ok(Hypercall::CreatePd));

        let view = SysCtrlPd::new(args);
        assert_eq!(view.src(), Sel(3));
        assert_eq!(view.dst(), Sel(4));
        assert_eq!(view.ssb(), 0x10);
        assert_eq!(view.dsb(), 0x20);
        assert_eq!(view.ord(), 4);
        assert_eq!(view.pmm(), 0b101);
        assert_eq!(view.attr(), MemAttr(7));
    }

    #[test]
    fn test_ctrl_sm_encoding() {
        let up = SysCtrlSm::new(SysCtrlSm::encode_up(Sel(5)));
        assert!(!up.dn());

        let dn = SysCtrlSm::new(SysCtrlSm::encode_dn(Sel(5), true, 1000));
        assert!(dn.dn());
        assert!(dn.zero_consume());
        assert_eq!(dn.deadline(), 1000);
    }

    #[test]
    fn test_create_pd_op_range() {
        let args = SysCreatePd::encode(Sel(1), Sel(0), CreatePdOp::Hst);
        assert_eq!(SysCreatePd::new(args).op(), Ok(CreatePdOp::Hst));

        let mut raw = args;
        raw.p[0] = (raw.p[0] & !0xf0) | (0xa << 4);
        assert_eq!(SysCreatePd::new(raw).op(), Err(AbiError::InvalidOp(0xa)));
    }
}
