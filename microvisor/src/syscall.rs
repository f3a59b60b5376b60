//! The syscall dispatcher and object-lifecycle operations.
//!
//! Entry from user mode indexes a sixteen-slot table by the low four bits
//! of `p0`; slots 7 and 15 are reserved and fail with `BAD_HYP`. Every
//! handler validates all of its arguments before mutating any state; a
//! failed validation returns a status through `p0` and never leaves a
//! partial effect behind.

use crate::cap::{
    validate_take_grant, Capability, ObjectRef, PermEc, PermPd, PermPt, PermSc, PermSm, PermSp,
};
use crate::cont::{Continuation, UserMode};
use crate::cpu::CpuId;
use crate::ec::Ec;
use crate::ipc;
use crate::kernel::{Flow, Kernel};
use crate::object::Subtype;
use crate::pd::Pd;
use crate::platform::{IpiKind, SleepTransition};
use crate::regs::Hazard;
use crate::sm::DnOutcome;
use crate::trace::TraceEvent;
use kernel_abi::{
    CreatePdOp, Hypercall, Status, SysAssignDev, SysAssignInt, SysCreateEc, SysCreatePd,
    SysCreatePt, SysCreateSc, SysCreateSm, SysCtrlEc, SysCtrlHw, SysCtrlPd, SysCtrlPt, SysCtrlSc,
    SysCtrlSm, CREATE_PD_DELEGATE_OP, EV_STARTUP, PAGE_BITS, USER_ADDR_LIMIT,
};
use std::sync::Arc;

/// Decodes the dispatcher slot and routes into the handler.
pub(crate) fn dispatch(kernel: &Kernel, cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let args = ec.frame_snapshot().sys_args();
    let Ok(hypercall) = args.hypercall() else {
        return kernel.finish(&ec, Status::BadHyp, false);
    };
    kernel.trace.record(TraceEvent::Syscall {
        ec: ec.header().id,
        hypercall: hypercall.name().to_string(),
    });

    match hypercall {
        Hypercall::Call => ipc::sys_call(kernel, cpu, ec),
        Hypercall::Reply => ipc::sys_reply(kernel, cpu, ec),
        Hypercall::CreatePd if args.flags() == CREATE_PD_DELEGATE_OP => {
            sys_ctrl_pd(kernel, cpu, ec)
        }
        Hypercall::CreatePd => sys_create_pd(kernel, cpu, ec),
        Hypercall::CreateEc => sys_create_ec(kernel, cpu, ec),
        Hypercall::CreateSc => sys_create_sc(kernel, cpu, ec),
        Hypercall::CreatePt => sys_create_pt(kernel, cpu, ec),
        Hypercall::CreateSm => sys_create_sm(kernel, cpu, ec),
        Hypercall::CtrlEc => sys_ctrl_ec(kernel, cpu, ec),
        Hypercall::CtrlSc => sys_ctrl_sc(kernel, cpu, ec),
        Hypercall::CtrlPt => sys_ctrl_pt(kernel, cpu, ec),
        Hypercall::CtrlSm => sys_ctrl_sm(kernel, cpu, ec),
        Hypercall::CtrlHw => sys_ctrl_hw(kernel, cpu, ec),
        Hypercall::AssignInt => sys_assign_int(kernel, cpu, ec),
        Hypercall::AssignDev => sys_assign_dev(kernel, cpu, ec),
    }
}

fn sys_create_pd(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCreatePd::new(ec.frame_snapshot().sys_args());

    let cap = ec.obj.lookup(r.pd());
    let Some(pd) = cap.pd(PermPd::PD) else {
        return kernel.reject(&ec, Hypercall::CreatePd, Status::BadCap);
    };
    let Ok(op) = r.op() else {
        return kernel.reject(&ec, Hypercall::CreatePd, Status::BadPar);
    };

    let status = match op {
        CreatePdOp::Pd => Pd::create_child(
            &ec.obj,
            r.sel(),
            cap.perm(),
            kernel.config().slab_capacity,
            kernel.pd_slab(),
            &kernel.trace,
        ),
        CreatePdOp::Obj => pd.create_space(Subtype::Obj, &ec.obj, r.sel(), &kernel.trace),
        CreatePdOp::Hst => pd.create_space(Subtype::Hst, &ec.obj, r.sel(), &kernel.trace),
        CreatePdOp::Gst => pd.create_space(Subtype::Gst, &ec.obj, r.sel(), &kernel.trace),
        CreatePdOp::Dma => pd.create_space(Subtype::Dma, &ec.obj, r.sel(), &kernel.trace),
        CreatePdOp::Pio => pd.create_space(Subtype::Pio, &ec.obj, r.sel(), &kernel.trace),
        CreatePdOp::Msr => pd.create_space(Subtype::Msr, &ec.obj, r.sel(), &kernel.trace),
    };
    kernel.complete(&ec, Hypercall::CreatePd, status)
}

fn sys_create_ec(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCreateEc::new(ec.frame_snapshot().sys_args());

    if r.cpu() as usize >= kernel.config().cpu_count {
        return kernel.reject(&ec, Hypercall::CreateEc, Status::BadCpu);
    }
    let utcb = r.utcb();
    if utcb != 0 && (utcb & ((1u64 << PAGE_BITS) - 1) != 0 || utcb >= USER_ADDR_LIMIT) {
        return kernel.reject(&ec, Hypercall::CreateEc, Status::BadPar);
    }
    let vcpu = utcb == 0;
    if vcpu && !kernel.config().features.has_virtualization() {
        return kernel.reject(&ec, Hypercall::CreateEc, Status::BadFtr);
    }

    let Some(pd) = ec.obj.lookup(r.pd()).pd(PermPd::EC) else {
        return kernel.reject(&ec, Hypercall::CreateEc, Status::BadCap);
    };

    let subtype = match (vcpu, r.vcpu_offs(), r.global()) {
        (true, true, _) => Subtype::EcVcpuOffs,
        (true, false, _) => Subtype::EcVcpuReal,
        (false, _, true) => Subtype::EcGlobal,
        (false, _, false) => Subtype::EcLocal,
    };
    // A schedulable EC announces itself through its startup event portal on
    // first activation; a portal server waits for callers instead.
    let cont = match subtype {
        Subtype::EcGlobal => Continuation::SendMsg(UserMode::Exception),
        Subtype::EcVcpuReal | Subtype::EcVcpuOffs => {
            Continuation::SendMsg(kernel.config().features.vm_entry_mode())
        }
        _ => Continuation::None,
    };

    let new_ec = match pd.create_ec(
        subtype,
        CpuId(r.cpu() as usize),
        r.evt(),
        !vcpu,
        r.fpu(),
        cont,
        &kernel.trace,
    ) {
        Ok(new_ec) => new_ec,
        Err(status) => return kernel.reject(&ec, Hypercall::CreateEc, status),
    };
    new_ec.patch_frame(|f| {
        f.sp = r.sp();
        f.vec = EV_STARTUP;
    });

    let cap = Capability::new(ObjectRef::Ec(new_ec.clone()), PermEc::all().bits());
    if ec.obj.insert(r.sel(), cap) != Status::Success {
        new_ec.destroy();
        kernel.trace.record(TraceEvent::ObjectDestroyed {
            id: new_ec.header().id,
        });
        return kernel.reject(&ec, Hypercall::CreateEc, Status::BadCap);
    }
    kernel.finish(&ec, Status::Success, false)
}

fn sys_create_sc(kernel: &Kernel, cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCreateSc::new(ec.frame_snapshot().sys_args());

    let Some(pd) = ec.obj.lookup(r.pd()).pd(PermPd::SC) else {
        return kernel.reject(&ec, Hypercall::CreateSc, Status::BadCap);
    };
    let Some(target) = ec.obj.lookup(r.ec()).ec(PermEc::BIND_SC) else {
        return kernel.reject(&ec, Hypercall::CreateSc, Status::BadCap);
    };
    if !target.is_global() && !target.is_vcpu() {
        return kernel.reject(&ec, Hypercall::CreateSc, Status::BadCap);
    }
    let qpd = r.qpd();
    if !qpd.is_valid() {
        return kernel.reject(&ec, Hypercall::CreateSc, Status::BadPar);
    }

    let sc = match pd.create_sc(&target, qpd.prio(), qpd.quantum(), &kernel.trace) {
        Ok(sc) => sc,
        Err(status) => return kernel.reject(&ec, Hypercall::CreateSc, status),
    };
    let cap = Capability::new(ObjectRef::Sc(sc.clone()), PermSc::all().bits());
    if ec.obj.insert(r.sel(), cap) != Status::Success {
        sc.destroy();
        kernel.trace.record(TraceEvent::ObjectDestroyed {
            id: sc.header().id,
        });
        return kernel.reject(&ec, Hypercall::CreateSc, Status::BadCap);
    }

    kernel
        .scheduler
        .unblock(cpu, sc, kernel.intr(), &kernel.trace);
    kernel.finish(&ec, Status::Success, false)
}

fn sys_create_pt(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCreatePt::new(ec.frame_snapshot().sys_args());

    let Some(pd) = ec.obj.lookup(r.pd()).pd(PermPd::PT) else {
        return kernel.reject(&ec, Hypercall::CreatePt, Status::BadCap);
    };
    let Some(target) = ec.obj.lookup(r.ec()).ec(PermEc::BIND_PT) else {
        return kernel.reject(&ec, Hypercall::CreatePt, Status::BadCap);
    };
    // Only a portal server can receive calls.
    if !target.is_local() {
        return kernel.reject(&ec, Hypercall::CreatePt, Status::BadCap);
    }

    let pt = match pd.create_pt(&target, r.mtd(), r.ip(), r.sel().0, &kernel.trace) {
        Ok(pt) => pt,
        Err(status) => return kernel.reject(&ec, Hypercall::CreatePt, status),
    };
    let cap = Capability::new(ObjectRef::Pt(pt.clone()), PermPt::all().bits());
    if ec.obj.insert(r.sel(), cap) != Status::Success {
        pt.destroy();
        kernel.trace.record(TraceEvent::ObjectDestroyed {
            id: pt.header().id,
        });
        return kernel.reject(&ec, Hypercall::CreatePt, Status::BadCap);
    }
    kernel.finish(&ec, Status::Success, false)
}

fn sys_create_sm(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCreateSm::new(ec.frame_snapshot().sys_args());

    let Some(pd) = ec.obj.lookup(r.pd()).pd(PermPd::SM) else {
        return kernel.reject(&ec, Hypercall::CreateSm, Status::BadCap);
    };
    let sm = match pd.create_sm(r.cnt(), None, &kernel.trace) {
        Ok(sm) => sm,
        Err(status) => return kernel.reject(&ec, Hypercall::CreateSm, status),
    };
    let cap = Capability::new(ObjectRef::Sm(sm.clone()), PermSm::all().bits());
    if ec.obj.insert(r.sel(), cap) != Status::Success {
        sm.destroy();
        kernel.trace.record(TraceEvent::ObjectDestroyed {
            id: sm.header().id,
        });
        return kernel.reject(&ec, Hypercall::CreateSm, Status::BadCap);
    }
    kernel.finish(&ec, Status::Success, false)
}

fn sys_ctrl_pd(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCtrlPd::new(ec.frame_snapshot().sys_args());

    // Alignment before any lookup or mutation.
    if r.ord() >= 64 {
        return kernel.reject(&ec, Hypercall::CreatePd, Status::BadPar);
    }
    if (r.ssb() | r.dsb()) & ((1u64 << r.ord()) - 1) != 0 {
        return kernel.reject(&ec, Hypercall::CreatePd, Status::BadPar);
    }

    let cst = ec.obj.lookup(r.src());
    let cdt = ec.obj.lookup(r.dst());
    let Some((_, src, _, dst)) = validate_take_grant(&cst, &cdt) else {
        return kernel.reject(&ec, Hypercall::CreatePd, Status::BadCap);
    };

    let status = match (src, dst) {
        (ObjectRef::Hst(src), dst) => {
            if src.is_kernel_owned() && !r.attr().is_valid() {
                Status::BadPar
            } else {
                match dst {
                    ObjectRef::Hst(dst) => src.delegate_into(
                        dst.map(),
                        r.ssb(),
                        r.dsb(),
                        r.ord(),
                        r.pmm(),
                        r.attr(),
                    ),
                    ObjectRef::Gst(dst) => src.delegate_into(
                        dst.map(),
                        r.ssb(),
                        r.dsb(),
                        r.ord(),
                        r.pmm(),
                        r.attr(),
                    ),
                    ObjectRef::Dma(dst) => src.delegate_into(
                        dst.map(),
                        r.ssb(),
                        r.dsb(),
                        r.ord(),
                        r.pmm(),
                        r.attr(),
                    ),
                    _ => Status::BadCap,
                }
            }
        }
        (ObjectRef::Obj(src), ObjectRef::Obj(dst)) => {
            dst.delegate(&src, r.ssb(), r.dsb(), r.ord(), r.pmm())
        }
        (ObjectRef::Pio(src), ObjectRef::Pio(dst)) => {
            dst.delegate(&src, r.ssb(), r.dsb(), r.ord(), r.pmm())
        }
        (ObjectRef::Msr(src), ObjectRef::Msr(dst)) => {
            dst.delegate(&src, r.ssb(), r.dsb(), r.ord(), r.pmm())
        }
        _ => Status::BadCap,
    };
    kernel.complete(&ec, Hypercall::CreatePd, status)
}

fn sys_ctrl_ec(kernel: &Kernel, cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCtrlEc::new(ec.frame_snapshot().sys_args());

    let Some(target) = ec.obj.lookup(r.ec()).ec(PermEc::CTRL) else {
        return kernel.reject(&ec, Hypercall::CtrlEc, Status::BadCap);
    };

    let prev = target.set_hazard(Hazard::RECALL);
    if !prev.contains(Hazard::RECALL)
        && target.cpu() != cpu
        && kernel.cpu(target.cpu()).is_current(&target)
    {
        kernel
            .intr()
            .send_cpu(IpiKind::RemoteKernelEntry, target.cpu());
        kernel.trace.record(TraceEvent::IpiSent {
            kind: IpiKind::RemoteKernelEntry,
            cpu: target.cpu().0,
        });
    }
    kernel.finish(&ec, Status::Success, false)
}

fn sys_ctrl_sc(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCtrlSc::new(ec.frame_snapshot().sys_args());

    let Some(sc) = ec.obj.lookup(r.sc()).sc(PermSc::CTRL) else {
        return kernel.reject(&ec, Hypercall::CtrlSc, Status::BadCap);
    };
    ec.patch_frame(|f| f.set_p1(sc.time()));
    kernel.finish(&ec, Status::Success, false)
}

fn sys_ctrl_pt(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCtrlPt::new(ec.frame_snapshot().sys_args());

    let Some(pt) = ec.obj.lookup(r.pt()).pt(PermPt::CTRL) else {
        return kernel.reject(&ec, Hypercall::CtrlPt, Status::BadCap);
    };
    pt.set_id(r.id());
    kernel.finish(&ec, Status::Success, false)
}

fn sys_ctrl_sm(kernel: &Kernel, cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCtrlSm::new(ec.frame_snapshot().sys_args());

    let required = if r.dn() {
        PermSm::CTRL_DN
    } else {
        PermSm::CTRL_UP
    };
    let Some(sm) = ec.obj.lookup(r.sm()).sm(required) else {
        return kernel.reject(&ec, Hypercall::CtrlSm, Status::BadCap);
    };

    if !r.dn() {
        sm.up(cpu, &kernel.scheduler, kernel.intr(), &kernel.trace);
        return kernel.finish(&ec, Status::Success, false);
    }

    // An interrupt semaphore re-arms its line before the consumer parks; a
    // signal racing the unmask resolves through the normal B/C interlock.
    if let Some(gsi) = sm.gsi() {
        kernel.intr().unmask_gsi(gsi);
    }

    match sm.dn(&ec, r.zero_consume()) {
        DnOutcome::Taken => kernel.finish(&ec, Status::Success, true),
        DnOutcome::WouldBlock => kernel.finish(&ec, Status::Timeout, false),
        DnOutcome::Enqueued => {
            if r.deadline() != 0 {
                kernel.timeouts.arm(r.deadline(), &ec, &sm);
            }
            if ec.block_sc(&kernel.scheduler, cpu) {
                kernel.scheduler.clear_current(cpu);
                Flow::Schedule
            } else {
                Flow::Run(ec)
            }
        }
    }
}

fn sys_ctrl_hw(kernel: &Kernel, cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysCtrlHw::new(ec.frame_snapshot().sys_args());

    if !kernel.is_root_obj(&ec.obj) {
        return kernel.reject(&ec, Hypercall::CtrlHw, Status::BadHyp);
    }
    if r.op() != 0 {
        return kernel.reject(&ec, Hypercall::CtrlHw, Status::BadPar);
    }

    let transition = SleepTransition(r.desc() as u16);
    if !kernel.acpi().supported(transition) {
        return kernel.reject(&ec, Hypercall::CtrlHw, Status::BadFtr);
    }
    if !kernel.acpi().set_transition(transition) {
        return kernel.reject(&ec, Hypercall::CtrlHw, Status::Aborted);
    }

    kernel.intr().send_exc(IpiKind::RemoteKernelEntry, cpu);
    kernel.trace.record(TraceEvent::SleepStaged {
        state: transition.0,
    });
    kernel.cpu(cpu).set_hazard(Hazard::SLEEP);
    kernel.finish(&ec, Status::Success, false)
}

fn sys_assign_int(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysAssignInt::new(ec.frame_snapshot().sys_args());

    if r.cpu() as usize >= kernel.config().cpu_count {
        return kernel.reject(&ec, Hypercall::AssignInt, Status::BadCpu);
    }
    let Some(sm) = ec.obj.lookup(r.sm()).sm(PermSm::ASSIGN) else {
        return kernel.reject(&ec, Hypercall::AssignInt, Status::BadCap);
    };
    // Only kernel interrupt semaphores carry a GSI binding.
    let Some(gsi) = sm.gsi() else {
        return kernel.reject(&ec, Hypercall::AssignInt, Status::BadCap);
    };
    // The device frame must be mapped in the caller's host space.
    let Some(dev) = ec.hst.map().lookup(r.dev()) else {
        return kernel.reject(&ec, Hypercall::AssignInt, Status::BadDev);
    };
    let rid = dev.attr.0;

    let msi = kernel
        .intr()
        .assign_gsi(gsi, CpuId(r.cpu() as usize), rid);
    ec.patch_frame(|f| f.set_p1(msi));
    kernel.finish(&ec, Status::Success, false)
}

fn sys_assign_dev(kernel: &Kernel, _cpu: CpuId, ec: Arc<Ec>) -> Flow {
    let r = SysAssignDev::new(ec.frame_snapshot().sys_args());

    if !kernel.is_root_obj(&ec.obj) {
        return kernel.reject(&ec, Hypercall::AssignDev, Status::BadHyp);
    }
    let dma = match ec.obj.lookup(r.dma()).space(PermSp::ASSIGN) {
        Some((Subtype::Dma, ObjectRef::Dma(dma))) => dma,
        _ => return kernel.reject(&ec, Hypercall::AssignDev, Status::BadCap),
    };
    if !kernel.iommu().lookup(r.smmu()) {
        return kernel.reject(&ec, Hypercall::AssignDev, Status::BadDev);
    }
    if !kernel.iommu().configure(dma.header().id, r.dad()) {
        return kernel.reject(&ec, Hypercall::AssignDev, Status::BadPar);
    }
    kernel.finish(&ec, Status::Success, false)
}
