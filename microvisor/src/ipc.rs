//! The synchronous IPC path.
//!
//! `sys_call` hands the caller's scheduling context to a portal's server EC
//! and parks the caller until `sys_reply` hands it back. `send_msg` is the
//! kernel-originated flavor used to deliver exceptions, VM exits and events
//! (startup, recall) as messages. A busy server triggers *helping*: the
//! caller stores a retry continuation and re-activates the server's partner
//! chain so the donated scheduling context keeps the blocker moving.
//!
//! Every function returns a [`Flow`]: a tail transfer expressed as a value,
//! consumed by the kernel run loop.

use crate::cap::PermPt;
use crate::cont::{Continuation, UserMode};
use crate::cpu::CpuId;
use crate::ec::Ec;
use crate::kernel::{Flow, Kernel};
use crate::trace::TraceEvent;
use core::sync::atomic::Ordering;
use kernel_abi::{Hypercall, Mtd, Sel, Status, SysIpcCall, SysIpcReply};
use std::sync::Arc;

/// Claims a waiting server by swinging its continuation from the waiting
/// sentinel to the receive continuation. Losing the exchange means the
/// server is busy.
fn claim(server: &Arc<Ec>, recv: Continuation) -> bool {
    server
        .cont
        .compare_exchange(
            Continuation::None,
            recv,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
}

/// `call`: synchronous RPC through a portal.
pub(crate) fn sys_call(kernel: &Kernel, cpu: CpuId, caller: Arc<Ec>) -> Flow {
    let r = SysIpcCall::new(caller.frame_snapshot().sys_args());

    let cap = caller.obj.lookup(r.pt());
    let Some(pt) = cap.pt(PermPt::CALL) else {
        return kernel.reject(&caller, Hypercall::Call, Status::BadCap);
    };
    let server = pt.server().clone();

    // Portals are CPU-local.
    if server.cpu() != cpu {
        return kernel.reject(&caller, Hypercall::Call, Status::BadCpu);
    }

    if claim(&server, Continuation::RecvUser) {
        caller
            .cont
            .store(Continuation::RetUser(UserMode::Sysexit), Ordering::Relaxed);
        caller.set_partner(&server, kernel.cpu(cpu));
        server.patch_frame(|f| {
            f.ip = pt.ip();
            f.gpr[0] = pt.id();
            f.gpr[1] = r.mtd().bits();
        });
        return kernel.make_current(cpu, server);
    }

    if r.nonblocking() {
        return kernel.finish(&caller, Status::Timeout, false);
    }

    help(kernel, cpu, caller, server, Continuation::SysCall)
}

/// `reply`: hand the scheduling context back to the caller, transferring
/// the reply message on the way.
pub(crate) fn sys_reply(kernel: &Kernel, cpu: CpuId, server: Arc<Ec>) -> Flow {
    let r = SysIpcReply::new(server.frame_snapshot().sys_args());
    let caller = server.caller();

    if let Some(ec) = &caller {
        match ec.continuation() {
            // The caller came in through `call`: copy UTCB words and echo
            // the reply descriptor in its p1.
            Continuation::RetUser(UserMode::Sysexit) => {
                ec.patch_frame(|f| f.set_p1(r.mtd().bits()));
                if let (Some(src), Some(dst)) = (server.utcb(), ec.utcb()) {
                    src.copy_to(r.mtd(), dst);
                }
            }
            // The caller came in through an exception or VM-exit message:
            // translate the reply into its register frame.
            Continuation::RetUser(_) => {
                if let Some(src) = server.utcb() {
                    ec.patch_frame(|f| src.save_frame(r.mtd(), f));
                }
            }
            _ => {}
        }
    }

    reply(kernel, cpu, server, Continuation::None, caller)
}

/// Common reply tail: park the server behind `resume` and transfer to the
/// caller, or activate the current SC's EC afresh when no donation remains.
pub(crate) fn reply(
    kernel: &Kernel,
    cpu: CpuId,
    server: Arc<Ec>,
    resume: Continuation,
    caller: Option<Arc<Ec>>,
) -> Flow {
    server.cont.store(resume, Ordering::Relaxed);

    // A global EC replying has nobody to return a borrowed SC to; it yields
    // its own quantum instead.
    if server.is_global() {
        kernel.scheduler.yield_current(cpu);
    }

    let Some(ec) = caller else {
        return activate_current(kernel, cpu);
    };
    if !ec.clr_partner(kernel.cpu(cpu)) {
        return activate_current(kernel, cpu);
    }
    kernel.make_current(cpu, ec)
}

fn activate_current(kernel: &Kernel, cpu: CpuId) -> Flow {
    match kernel.scheduler.get_current(cpu) {
        Some(sc) => kernel.activate(cpu, sc.ec().clone()),
        None => Flow::Schedule,
    }
}

/// Kernel-originated IPC: deliver the event `vector` of `ec` as a message
/// to the portal at `evt + vector`, resuming `ec` through `mode` once the
/// server replies. Failures on this path are fatal to the EC.
pub(crate) fn send_msg(
    kernel: &Kernel,
    cpu: CpuId,
    ec: Arc<Ec>,
    mode: UserMode,
    vector: u64,
) -> Flow {
    // Keep the vector in the frame so a helping retry re-reads it.
    ec.patch_frame(|f| f.vec = vector);

    let cap = ec.obj.lookup(Sel(ec.evt() + vector));
    let Some(pt) = cap.pt(PermPt::EVENT) else {
        return kill(kernel, cpu, ec, "PT not found");
    };
    let server = pt.server().clone();

    if server.cpu() != cpu {
        return kill(kernel, cpu, ec, "PT wrong CPU");
    }

    if claim(&server, Continuation::RecvKern) {
        ec.cont
            .store(Continuation::RetUser(mode), Ordering::Relaxed);
        ec.set_partner(&server, kernel.cpu(cpu));
        server.patch_frame(|f| {
            f.ip = pt.ip();
            f.gpr[0] = pt.id();
            f.gpr[1] = pt.mtd().bits();
        });
        return kernel.make_current(cpu, server);
    }

    help(kernel, cpu, ec, server, Continuation::SendMsg(mode))
}

/// Server-side entry for a user-produced message: copy the caller's UTCB,
/// then return to user at the portal entry point.
pub(crate) fn recv_user(kernel: &Kernel, cpu: CpuId, server: Arc<Ec>) -> Flow {
    let Some(caller) = server.caller() else {
        return kill(kernel, cpu, server, "IPC Abort");
    };
    let mtd = Mtd::from_bits_truncate(server.frame_snapshot().gpr[1]);
    if let (Some(src), Some(dst)) = (caller.utcb(), server.utcb()) {
        src.copy_to(mtd, dst);
    }
    Flow::User(server, UserMode::Sysexit)
}

/// Server-side entry for a kernel-produced message: load the caller's
/// register frame into the server's UTCB.
pub(crate) fn recv_kern(kernel: &Kernel, cpu: CpuId, server: Arc<Ec>) -> Flow {
    let Some(caller) = server.caller() else {
        return kill(kernel, cpu, server, "IPC Abort");
    };
    let mtd = Mtd::from_bits_truncate(server.frame_snapshot().gpr[1]);
    if let Some(utcb) = server.utcb() {
        let frame = caller.frame_snapshot();
        utcb.load_frame(mtd, &frame);
    }
    Flow::User(server, UserMode::Sysexit)
}

/// Donates the running SC to `server`'s partner chain. `retry` is stored as
/// the caller's continuation so the syscall re-runs when the donation comes
/// back. A dead server cannot be helped: user calls time out, kernel sends
/// are fatal.
pub(crate) fn help(
    kernel: &Kernel,
    cpu: CpuId,
    caller: Arc<Ec>,
    server: Arc<Ec>,
    retry: Continuation,
) -> Flow {
    if server.continuation() == Continuation::Dead {
        return match retry {
            Continuation::SysCall => kernel.finish(&caller, Status::Timeout, false),
            _ => kill(kernel, cpu, caller, "IPC Timeout"),
        };
    }

    let rounds = kernel.cpu(cpu).ctr_loop.fetch_add(1, Ordering::Relaxed) + 1;
    if rounds > kernel.config().helping_limit {
        return kill(kernel, cpu, caller, "Livelock");
    }

    caller.cont.store(retry, Ordering::Relaxed);
    kernel.activate(cpu, server)
}

/// EC-fatal exit: trace the reason, mark the EC dead, sever its partner
/// links, and resume an engaged caller with `ABORTED`.
pub(crate) fn kill(kernel: &Kernel, cpu: CpuId, ec: Arc<Ec>, reason: &str) -> Flow {
    kernel.trace.record(TraceEvent::EcKilled {
        ec: ec.header().id,
        reason: reason.to_string(),
    });
    ec.cont.store(Continuation::Dead, Ordering::Release);

    if ec.callee().is_some() {
        let _ = ec.clr_partner(kernel.cpu(cpu));
    }
    if let Some(caller) = ec.take_caller() {
        if caller.clr_partner(kernel.cpu(cpu)) {
            caller.patch_frame(|f| f.set_status(Status::Aborted));
            return kernel.make_current(cpu, caller);
        }
    }

    kernel.scheduler.clear_current(cpu);
    Flow::Schedule
}
