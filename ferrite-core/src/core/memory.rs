//! Memory access unit: the core's view of the system bus.
//!
//! All accesses are little-endian. Misaligned loads and stores are legal and are carried out
//! byte-for-byte by the bus, the way a simple hardware port would. Whether an access is backed at
//! all is probed through [`SystemBus::accepts`] before the bus is touched, so faults are precise.

use thiserror::Error;

use super::Core;
use crate::system_bus::{AccessType, SystemBus};

/// Ways a guest memory access can go wrong. The execution core maps these onto the matching
/// load/store exception, or onto a fatal error for the address-zero tripwire.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemoryError {
    /// The access does not map to RAM or any device register.
    #[error("access fault")]
    AccessFault,
    /// A read from guest address zero. Nothing legitimate lives there, so this almost always
    /// means the guest dereferenced a null pointer.
    #[error("read from guest address zero")]
    NullPointerRead,
}

impl<B: SystemBus> Core<B> {
    pub fn read_byte(&mut self, address: u32) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.bus_read(&mut buf, address)?;
        Ok(buf[0])
    }

    pub fn read_halfword(&mut self, address: u32) -> Result<u16, MemoryError> {
        let mut buf = [0u8; 2];
        self.bus_read(&mut buf, address)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_word(&mut self, address: u32) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.bus_read(&mut buf, address)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        self.bus_write(address, &[value])
    }

    pub fn write_halfword(&mut self, address: u32, value: u16) -> Result<(), MemoryError> {
        self.bus_write(address, &value.to_le_bytes())
    }

    pub fn write_word(&mut self, address: u32, value: u32) -> Result<(), MemoryError> {
        self.bus_write(address, &value.to_le_bytes())
    }

    fn bus_read(&mut self, buf: &mut [u8], address: u32) -> Result<(), MemoryError> {
        if address == 0 {
            return Err(MemoryError::NullPointerRead);
        }
        if !self.system_bus.accepts(address, buf.len(), AccessType::Read) {
            return Err(MemoryError::AccessFault);
        }
        self.system_bus.read(buf, address);
        Ok(())
    }

    fn bus_write(&mut self, address: u32, buf: &[u8]) -> Result<(), MemoryError> {
        if !self.system_bus.accepts(address, buf.len(), AccessType::Write) {
            return Err(MemoryError::AccessFault);
        }
        self.system_bus.write(address, buf);
        Ok(())
    }
}
