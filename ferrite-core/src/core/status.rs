use bitvec::{field::BitField, order::Lsb0, view::BitView};
use log::debug;

use crate::RawPrivilegeLevel;

/// Bit indices of the mstatus fields this machine cares about.
mod idx {
    pub const MIE: usize = 3;
    pub const MPIE: usize = 7;
    pub const MPP: usize = 11; // 2 bits
}

/// Fields that guest writes may never set: SD, TW, TVM, MXR, SUM, MPRV, XS, FS, and VS.
///
/// On a machine without S/U modes, FPU, or address translation these fields have no function, and
/// the reference configuration this implementation tracks zeroes them on every write. Known to
/// diverge from the WPRI/WARL rules of the privileged spec for some of these fields; kept until a
/// kernel is found that cares.
const SUPPRESSED_MASK: u32 = 0x803F_E600;

/// MPP field value for M-mode (`0b11` at bits 12:11).
const MPP_MACHINE: u32 = 0x0000_1800;

/// Provides the mstatus register.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The mstatus register keeps
/// > track of and controls the hart’s current operating state.
///
/// The reset value has MIE and MPIE set and MPP holding M-mode, so the first trap taken out of
/// the boot path behaves as if the hart had always been running with interrupts enabled.
#[derive(Debug, Clone)]
pub struct Status {
    mstatus: u32,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Self {
            mstatus: 0x0000_1888,
        }
    }

    pub fn read_mstatus(&self) -> u32 {
        self.mstatus
    }

    /// Replaces mstatus with `value`, except for the fields this machine pins.
    ///
    /// MPP is forced to M-mode and the [`SUPPRESSED_MASK`] fields are cleared; every other bit
    /// takes the written value. The caller is responsible for re-evaluating pending interrupts
    /// afterwards, since this may flip MIE.
    pub fn write_mstatus(&mut self, value: u32) {
        let suppressed = value & SUPPRESSED_MASK;
        if suppressed != 0 {
            debug!("suppressing mstatus bits {suppressed:#010x} in write {value:#010x}");
        }
        self.mstatus = (value & !SUPPRESSED_MASK) | MPP_MACHINE;
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns the raw privilege level encoded by the MPP (M-mode Previous Privilege) field.
    pub fn mpp(&self) -> RawPrivilegeLevel {
        RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        )
    }

    /// Sets the MPP (M-mode Previous Privilege) field to `value`.
    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }

    /// Applies the mstatus effects of an mret instruction.
    ///
    /// MIE is restored from MPIE, MPIE is re-armed, and MPP is forced back to M-mode. The MIE
    /// restore is an assignment, not an OR: a handler that re-enabled interrupts while MPIE was
    /// clear returns with MIE clear again.
    pub fn return_from_machine_trap(&mut self) {
        self.set_mie(self.mpie());
        self.set_mpie(true);
        self.set_mpp(RawPrivilegeLevel::Machine);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_value() {
        let status = Status::new();
        assert_eq!(0x0000_1888, status.read_mstatus());
        assert!(status.mie());
        assert!(status.mpie());
        assert_eq!(RawPrivilegeLevel::Machine, status.mpp());
    }

    #[test]
    fn test_write_forces_mpp() {
        let mut status = Status::new();
        status.write_mstatus(0);
        assert_eq!(MPP_MACHINE, status.read_mstatus());
        assert_eq!(RawPrivilegeLevel::Machine, status.mpp());
    }

    #[test]
    fn test_write_suppresses_pinned_fields() {
        let mut status = Status::new();
        status.write_mstatus(0xFFFF_FFFF);
        let value = status.read_mstatus();
        assert_eq!(0, value & SUPPRESSED_MASK);
        // MIE, MPIE, MPP, and the remaining writable bits all took the written ones.
        assert!(status.mie());
        assert!(status.mpie());
        assert_eq!(0x7FC0_19FF, value);
    }

    #[test]
    fn test_mie_round_trip() {
        let mut status = Status::new();
        status.set_mie(false);
        assert!(!status.mie());
        assert_eq!(0x0000_1880, status.read_mstatus());
        status.set_mie(true);
        assert!(status.mie());
    }

    #[test]
    fn test_return_from_machine_trap() {
        // Trap entry state: MIE cleared, MPIE holding the pre-trap MIE.
        let mut status = Status::new();
        status.set_mpie(true);
        status.set_mie(false);
        status.return_from_machine_trap();
        assert!(status.mie());
        assert!(status.mpie());
        assert_eq!(RawPrivilegeLevel::Machine, status.mpp());

        let mut status = Status::new();
        status.set_mpie(false);
        status.set_mie(false);
        status.return_from_machine_trap();
        // A cleared MPIE leaves MIE cleared, and MPIE is re-armed.
        assert!(!status.mie());
        assert!(status.mpie());

        // A handler that enabled nested interrupts while MPIE was clear must come back with
        // interrupts off: MIE is assigned from MPIE, never OR-ed.
        let mut status = Status::new();
        status.set_mpie(false);
        status.set_mie(true);
        status.return_from_machine_trap();
        assert!(!status.mie());
        assert!(status.mpie());
    }
}
