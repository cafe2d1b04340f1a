//! Defines a generalization of a TileLink-like bus interface.

use std::fmt::Debug;

/// A generalization of a TileLink-like bus interface, without the hardware details.
///
/// Implementors of this trait should see it as the TileLink *slave* interface they are exposing,
/// while this interface serves as the TileLink *master* interface to callers of this trait.
///
/// Accesses can be made for any `(address, size)` pair: the addresses are 32 bits wide, and `size`
/// is taken from the buffer length. Slaves declare which `(address, size)` pairs they actually
/// support through [`crate::system_bus::SystemBus::accepts`]; an access that was not declared
/// supported must still be handled without panicking, but may leave the addressed device in an
/// undefined (simulated) state.
///
/// The system expects little-endian byte ordering of all slave devices, and provides little-endian
/// ordering to all master devices. This means all values that are read must be serialized to bytes
/// in little-endian order. All values that are written are also sent in little-endian byte order.
///
/// The access methods themselves can never fail; fault detection happens before the access, at the
/// [`accepts`](crate::system_bus::SystemBus::accepts) probe.
pub trait Bus: Debug {
    /// Invoke a read access for `address` with size `buf.len()`, writing the result to `buf`.
    ///
    /// Bytes corresponding to addresses the slave does not map are left untouched.
    fn read(&mut self, buf: &mut [u8], address: u32);

    /// Invoke a write access for `address` with size `buf.len()`, reading the data from `buf`.
    fn write(&mut self, address: u32, buf: &[u8]);
}
