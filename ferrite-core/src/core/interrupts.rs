use bitvec::{order::Lsb0, view::BitView};

use super::Interrupt;

const MACHINE_TIMER_INTERRUPT: usize = Interrupt::MachineTimer.code() as usize;

/// The S-mode fields of mip/mie (SSIx, STIx, SEIx). Guest writes to these are dropped, since
/// there is no S-mode for them to signal.
#[allow(clippy::identity_op)]
const SUPERVISOR_MASK: u32 = 0
    | (1 << 1) // SSIx
    | (1 << 5) // STIx
    | (1 << 9); // SEIx

/// The machine-level interrupt-pending (mip) and interrupt-enable (mie) registers.
///
/// Only the three M-mode interrupt lines are wired up on this platform. MTIP is driven as a level
/// signal by the core's timer check each cycle; MSIP and MEIP stay clear unless guest software
/// writes them through the mip CSR.
#[derive(Debug, Clone)]
pub struct Interrupts {
    mip: u32,
    mie: u32,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self { mip: 0, mie: 0 }
    }

    pub fn read_mip(&self) -> u32 {
        self.mip
    }

    /// Guest-visible mip write: the S-mode bits are cleared, everything else is stored.
    ///
    /// The caller is responsible for re-evaluating pending interrupts afterwards.
    pub fn write_mip(&mut self, value: u32) {
        self.mip = value & !SUPERVISOR_MASK;
    }

    pub fn read_mie(&self) -> u32 {
        self.mie
    }

    /// Guest-visible mie write: the S-mode bits are cleared, everything else is stored.
    ///
    /// The caller is responsible for re-evaluating pending interrupts afterwards.
    pub fn write_mie(&mut self, value: u32) {
        self.mie = value & !SUPERVISOR_MASK;
    }

    /// Drive the MTIP (M-mode timer interrupt pending) level.
    ///
    /// Controlled by the core based on the memory-mapped mtime and mtimecmp registers.
    pub fn set_machine_timer(&mut self, pending: bool) {
        self.mip
            .view_bits_mut::<Lsb0>()
            .set(MACHINE_TIMER_INTERRUPT, pending);
    }

    /// Returns the set of interrupts that are both pending and enabled.
    pub fn pending_and_enabled(&self) -> u32 {
        self.mip & self.mie
    }

    /// Returns `true` if `interrupt` is both pending and enabled.
    pub fn is_ready(&self, interrupt: Interrupt) -> bool {
        self.pending_and_enabled()
            .view_bits::<Lsb0>()[interrupt.code() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_bits_suppressed() {
        let mut interrupts = Interrupts::new();
        interrupts.write_mie(0xFFFF_FFFF);
        assert_eq!(0xFFFF_FDDD, interrupts.read_mie());
        interrupts.write_mip(0x0000_0AAA);
        assert_eq!(0x0000_0888, interrupts.read_mip());
    }

    #[test]
    fn test_timer_level() {
        let mut interrupts = Interrupts::new();
        interrupts.set_machine_timer(true);
        assert_eq!(1 << 7, interrupts.read_mip());
        assert!(!interrupts.is_ready(Interrupt::MachineTimer));
        interrupts.write_mie(1 << 7);
        assert!(interrupts.is_ready(Interrupt::MachineTimer));
        interrupts.set_machine_timer(false);
        assert_eq!(0, interrupts.read_mip());
        assert!(!interrupts.is_ready(Interrupt::MachineTimer));
    }
}
