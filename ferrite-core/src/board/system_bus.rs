use crate::bus::Bus;
use crate::resources::clint::{self, Clint};
use crate::resources::ram::Ram;
use crate::resources::syscon::Syscon;
use crate::resources::uart::Uart;
use crate::system_bus::AccessType;

/// Base guest physical address of the UART console.
pub const UART_BASE: u32 = 0x1000_0000;
const UART_LAST: u32 = UART_BASE + 7;

/// Base guest physical address of the CLINT.
pub const CLINT_BASE: u32 = 0x1100_0000;
const CLINT_LAST: u32 = CLINT_BASE + 0xBFFF;

/// Base guest physical address of the poweroff/reboot syscon register.
pub const SYSCON_BASE: u32 = 0x1110_0000;
const SYSCON_LAST: u32 = SYSCON_BASE + 3;

/// The board's interconnect: dispatches physical addresses to RAM and the MMIO devices.
///
/// RAM claims everything from `ram_base` up; the low MMIO region is sparse, with the devices at
/// their fixed bases. Accesses that land nowhere are rejected by
/// [`accepts`](crate::system_bus::SystemBus::accepts), so the core raises an access fault before
/// the dispatch methods ever see them.
#[derive(Debug)]
pub struct Interconnect {
    pub(super) ram: Ram,
    pub(super) uart: Uart,
    pub(super) clint: Clint,
    pub(super) syscon: Syscon,
    pub(super) ram_base: u32,
}

impl Interconnect {
    fn accepts_clint(offset: u32, size: usize, access_type: AccessType) -> bool {
        match (offset, size) {
            // msip and both mtimecmp halves are 32-bit read/write.
            (clint::MSIP_ADDR, 4) => true,
            (clint::MTIMECMP_ADDR_LO | clint::MTIMECMP_ADDR_HI, 4) => true,
            // mtimecmp also supports a full 64-bit access.
            (clint::MTIMECMP_ADDR_LO, 8) => true,
            // mtime is read-only for the guest.
            (clint::MTIME_ADDR_LO | clint::MTIME_ADDR_HI, 4) => access_type == AccessType::Read,
            (clint::MTIME_ADDR_LO, 8) => access_type == AccessType::Read,
            _ => false,
        }
    }
}

impl Bus for Interconnect {
    fn read(&mut self, buf: &mut [u8], address: u32) {
        if address >= self.ram_base {
            return self.ram.read(buf, address - self.ram_base);
        }
        match address {
            UART_BASE..=UART_LAST => self.uart.read(buf, address - UART_BASE),
            CLINT_BASE..=CLINT_LAST => self.clint.read(buf, address - CLINT_BASE),
            SYSCON_BASE..=SYSCON_LAST => self.syscon.read(buf, address - SYSCON_BASE),
            // Vacant region: leave the buffer untouched.
            _ => {}
        }
    }

    fn write(&mut self, address: u32, buf: &[u8]) {
        if address >= self.ram_base {
            return self.ram.write(address - self.ram_base, buf);
        }
        match address {
            UART_BASE..=UART_LAST => self.uart.write(address - UART_BASE, buf),
            CLINT_BASE..=CLINT_LAST => self.clint.write(address - CLINT_BASE, buf),
            SYSCON_BASE..=SYSCON_LAST => self.syscon.write(address - SYSCON_BASE, buf),
            // Vacant region: drop the write.
            _ => {}
        }
    }
}

impl crate::system_bus::SystemBus for Interconnect {
    fn accepts(&self, address: u32, size: usize, access_type: AccessType) -> bool {
        if address >= self.ram_base {
            let offset = (address - self.ram_base) as u64;
            return offset + size as u64 <= self.ram.len() as u64;
        }
        match address {
            UART_BASE..=UART_LAST => size == 1,
            CLINT_BASE..=CLINT_LAST => {
                Self::accepts_clint(address - CLINT_BASE, size, access_type)
            }
            SYSCON_BASE..=SYSCON_LAST => {
                address == SYSCON_BASE && size == 4 && access_type == AccessType::Write
            }
            _ => false,
        }
    }
}
