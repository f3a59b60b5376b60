//! # Kernel Contract Tests
//!
//! Golden scenario tests for the microvisor's syscall surface, driven
//! through the public harness entry points exactly as user code would
//! drive them.
//!
//! ## Philosophy
//!
//! - **Contracts as code**: each core kernel scenario has one test that
//!   fails when the observable behavior drifts
//! - **Whole flows, not mocks**: tests boot a real kernel, create real
//!   objects through syscalls, and assert on register frames, UTCBs and
//!   the trace log
//!
//! ## Structure
//!
//! - [`harness`]: the `TestEnv` builder and user-level helpers
//! - `calls`: synchronous IPC (blocking call, busy server, helping, reply)
//! - `semaphores`: up/dn, zero-consume, deadlines, wakeup ordering
//! - `recall`: startup and recall event delivery across CPUs
//! - `delegation`: capability-range transfer and its failure atomicity
//! - `lifecycle`: object creation and control operations

pub mod harness;

mod calls;
mod delegation;
mod lifecycle;
mod recall;
mod semaphores;
