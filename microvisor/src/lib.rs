//! # Microvisor Core
//!
//! The syscall-driven IPC and scheduling core of a capability-based
//! microhypervisor, implemented as a deterministic in-process kernel.
//!
//! ## Purpose
//!
//! The kernel here is not a mock: execution contexts, scheduling contexts,
//! protection domains, portals and semaphores behave exactly as they would
//! on hardware (continuations instead of kernel stacks, capability-checked
//! syscalls, cross-CPU blocking with real atomics), but virtual CPUs are
//! driven explicitly by the harness and time advances only when told to.
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! Every kernel decision is observable: syscalls and rejections land in a
//! structured trace log, scheduling decisions are recorded, and platform
//! collaborators (interrupt controller, ACPI, IOMMU) are traits with
//! recording simulations.
//!
//! ## Structure
//!
//! - Object model: [`object`], [`cap`], [`space`], [`pd`], [`pt`], [`sm`]
//! - Execution: [`regs`], [`utcb`], [`cont`], [`ec`], [`sc`], [`scheduler`]
//! - Entry points: [`kernel`], with the IPC path in [`ipc`] and the
//!   dispatcher in [`syscall`]
//! - Ambient: [`trace`], [`platform`], [`timeout`], [`cpu`]

pub mod cap;
pub mod cont;
pub mod cpu;
pub mod ec;
pub mod ipc;
pub mod kernel;
pub mod object;
pub mod pd;
pub mod platform;
pub mod pt;
pub mod regs;
pub mod sc;
pub mod scheduler;
pub mod sm;
pub mod space;
pub mod syscall;
pub mod timeout;
pub mod trace;
pub mod utcb;

pub use cap::{Capability, ObjectRef, PermEc, PermPd, PermPt, PermSc, PermSm, PermSp};
pub use cont::{Continuation, UserMode};
pub use cpu::CpuId;
pub use ec::Ec;
pub use kernel::{root_sels, FeatureSet, Kernel, KernelConfig, UserReturn};
pub use pd::Pd;
pub use platform::{
    AcpiController, InterruptController, Iommu, IpiKind, SimAcpi, SimInterruptController,
    SimIommu, SleepTransition,
};
pub use pt::Pt;
pub use regs::{Frame, Hazard};
pub use sc::Sc;
pub use sm::Sm;
pub use trace::{TraceEvent, TraceLog};
pub use utcb::Utcb;
