//! Poweroff/reboot system controller.

use crate::bus::Bus;
use log::debug;

/// Magic value that requests a poweroff when written to the control register.
pub const POWEROFF_MAGIC: u32 = 0x5555;
/// Magic value that requests a reboot when written to the control register.
pub const REBOOT_MAGIC: u32 = 0x7777;

/// The machine's power state, latched by the [`Syscon`] and polled by the run loop.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PowerState {
    On,
    Poweroff,
    Reboot,
}

/// Syscon device with a single 32-bit control register.
///
/// The guest requests poweroff or reboot by storing the matching magic value; the driver loop
/// polls [`Syscon::power_state`] and tears the machine down when it leaves [`PowerState::On`].
/// Unrecognized values are ignored, and the register reads as zero.
#[derive(Debug)]
pub struct Syscon {
    state: PowerState,
}

impl Default for Syscon {
    fn default() -> Self {
        Self::new()
    }
}

impl Syscon {
    pub fn new() -> Self {
        Self {
            state: PowerState::On,
        }
    }

    pub fn power_state(&self) -> PowerState {
        self.state
    }

    /// Returns `true` once the guest has requested a poweroff or reboot.
    pub fn is_powered_down(&self) -> bool {
        self.state != PowerState::On
    }
}

impl Bus for Syscon {
    fn read(&mut self, buf: &mut [u8], _address: u32) {
        buf.fill(0);
    }

    fn write(&mut self, _address: u32, buf: &[u8]) {
        let mut word = [0u8; 4];
        let size = buf.len().min(4);
        word[..size].copy_from_slice(&buf[..size]);
        match u32::from_le_bytes(word) {
            POWEROFF_MAGIC => {
                debug!("syscon: poweroff requested");
                self.state = PowerState::Poweroff;
            }
            REBOOT_MAGIC => {
                debug!("syscon: reboot requested");
                self.state = PowerState::Reboot;
            }
            value => {
                debug!("syscon: ignoring write of {value:#010x}");
            }
        }
    }
}
