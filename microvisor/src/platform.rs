//! Platform collaborator contracts.
//!
//! The core touches hardware only through these traits. Different deployments
//! implement them against real interrupt controllers, ACPI tables and
//! IOMMUs; the recording simulations below are full implementations that
//! happen to run in-process, which is what the test suites use.

use crate::cpu::CpuId;
use serde::{Deserialize, Serialize};
use spin::Mutex;
use std::collections::BTreeSet;

/// Inter-processor interrupt kinds the core sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpiKind {
    /// Force the target CPU through a kernel entry (hazard check).
    RemoteKernelEntry,
}

/// Interrupt controller contract.
pub trait InterruptController: Send + Sync {
    /// Sends an IPI to one CPU.
    fn send_cpu(&self, kind: IpiKind, cpu: CpuId);

    /// Broadcasts an IPI to every CPU except the sender.
    fn send_exc(&self, kind: IpiKind, sender: CpuId);

    /// Unmasks a global system interrupt.
    fn unmask_gsi(&self, gsi: u32);

    /// Routes a GSI to a CPU for a requester id; returns the MSI route word.
    fn assign_gsi(&self, gsi: u32, cpu: CpuId, rid: u32) -> u64;
}

/// ACPI sleep-state descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SleepTransition(pub u16);

/// Fixed-function ACPI contract.
pub trait AcpiController: Send + Sync {
    /// Whether the platform supports this transition at all.
    fn supported(&self, transition: SleepTransition) -> bool;

    /// Stages the transition; `false` aborts the request.
    fn set_transition(&self, transition: SleepTransition) -> bool;
}

/// IOMMU contract.
pub trait Iommu: Send + Sync {
    /// Whether an IOMMU instance with this id exists.
    fn lookup(&self, id: u64) -> bool;

    /// Binds a DMA space (by object id) to a device address; `false` rejects
    /// the device descriptor.
    fn configure(&self, dma_space: u64, device: u64) -> bool;
}

/// Recording interrupt controller.
#[derive(Debug, Default)]
pub struct SimInterruptController {
    sent: Mutex<Vec<(IpiKind, usize)>>,
    broadcast: Mutex<Vec<(IpiKind, usize)>>,
    unmasked: Mutex<Vec<u32>>,
    routed: Mutex<Vec<(u32, usize, u32)>>,
}

impl SimInterruptController {
    pub fn new() -> SimInterruptController {
        SimInterruptController::default()
    }

    /// IPIs sent so far, as `(kind, target cpu)`.
    pub fn sent(&self) -> Vec<(IpiKind, usize)> {
        self.sent.lock().clone()
    }

    /// Broadcasts so far, as `(kind, sending cpu)`.
    pub fn broadcast(&self) -> Vec<(IpiKind, usize)> {
        self.broadcast.lock().clone()
    }

    pub fn unmasked(&self) -> Vec<u32> {
        self.unmasked.lock().clone()
    }

    pub fn routed(&self) -> Vec<(u32, usize, u32)> {
        self.routed.lock().clone()
    }
}

impl InterruptController for SimInterruptController {
    fn send_cpu(&self, kind: IpiKind, cpu: CpuId) {
        self.sent.lock().push((kind, cpu.0));
    }

    fn send_exc(&self, kind: IpiKind, sender: CpuId) {
        self.broadcast.lock().push((kind, sender.0));
    }

    fn unmask_gsi(&self, gsi: u32) {
        self.unmasked.lock().push(gsi);
    }

    fn assign_gsi(&self, gsi: u32, cpu: CpuId, rid: u32) -> u64 {
        self.routed.lock().push((gsi, cpu.0, rid));
        // MSI route word: vector base + GSI in the low half, CPU in the high.
        (0x30 + gsi as u64) | ((cpu.0 as u64) << 32)
    }
}

/// Recording ACPI with a configurable set of supported states.
#[derive(Debug)]
pub struct SimAcpi {
    supported: BTreeSet<u16>,
    accept: bool,
    staged: Mutex<Vec<u16>>,
}

impl SimAcpi {
    /// Supports S1 and S5 by default.
    pub fn new() -> SimAcpi {
        SimAcpi {
            supported: BTreeSet::from([1, 5]),
            accept: true,
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn with_supported(states: impl IntoIterator<Item = u16>) -> SimAcpi {
        SimAcpi {
            supported: states.into_iter().collect(),
            accept: true,
            staged: Mutex::new(Vec::new()),
        }
    }

    /// A controller that knows the state but refuses to stage it.
    pub fn rejecting(states: impl IntoIterator<Item = u16>) -> SimAcpi {
        SimAcpi {
            supported: states.into_iter().collect(),
            accept: false,
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn staged(&self) -> Vec<u16> {
        self.staged.lock().clone()
    }
}

impl Default for SimAcpi {
    fn default() -> Self {
        Self::new()
    }
}

impl AcpiController for SimAcpi {
    fn supported(&self, transition: SleepTransition) -> bool {
        self.supported.contains(&transition.0)
    }

    fn set_transition(&self, transition: SleepTransition) -> bool {
        if !self.accept {
            return false;
        }
        self.staged.lock().push(transition.0);
        true
    }
}

/// Recording IOMMU with a fixed instance set.
#[derive(Debug, Default)]
pub struct SimIommu {
    instances: BTreeSet<u64>,
    configured: Mutex<Vec<(u64, u64)>>,
}

impl SimIommu {
    pub fn new(instances: impl IntoIterator<Item = u64>) -> SimIommu {
        SimIommu {
            instances: instances.into_iter().collect(),
            configured: Mutex::new(Vec::new()),
        }
    }

    pub fn configured(&self) -> Vec<(u64, u64)> {
        self.configured.lock().clone()
    }
}

impl Iommu for SimIommu {
    fn lookup(&self, id: u64) -> bool {
        self.instances.contains(&id)
    }

    fn configure(&self, dma_space: u64, device: u64) -> bool {
        if device == 0 {
            return false;
        }
        self.configured.lock().push((dma_space, device));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_interrupts_record() {
        let intr = SimInterruptController::new();
        intr.send_cpu(IpiKind::RemoteKernelEntry, CpuId(1));
        intr.unmask_gsi(9);
        let msi = intr.assign_gsi(9, CpuId(2), 0x42);

        assert_eq!(intr.sent(), vec![(IpiKind::RemoteKernelEntry, 1)]);
        assert_eq!(intr.unmasked(), vec![9]);
        assert_eq!(intr.routed(), vec![(9, 2, 0x42)]);
        assert_eq!(msi, (0x30 + 9) | (2 << 32));
    }

    #[test]
    fn test_sim_acpi_stages_supported_states() {
        let acpi = SimAcpi::new();
        assert!(acpi.supported(SleepTransition(5)));
        assert!(!acpi.supported(SleepTransition(3)));
        assert!(acpi.set_transition(SleepTransition(5)));
        assert_eq!(acpi.staged(), vec![5]);

        let rejecting = SimAcpi::rejecting([5]);
        assert!(rejecting.supported(SleepTransition(5)));
        assert!(!rejecting.set_transition(SleepTransition(5)));
    }

    #[test]
    fn test_sim_iommu() {
        let iommu = SimIommu::new([7]);
        assert!(iommu.lookup(7));
        assert!(!iommu.lookup(8));
        assert!(iommu.configure(1, 0xab));
        assert!(!iommu.configure(1, 0));
        assert_eq!(iommu.configured(), vec![(1, 0xab)]);
    }
}
