use crate::bus::Bus;

/// Byte-based RAM implementation with support for misaligned memory access.
///
/// This can be categorized as *main memory* according to the types of memory resources defined by
/// the RISC-V spec. Addresses are offsets from the start of this RAM unit; mapping a guest
/// physical address onto that offset is the interconnect's job.
#[derive(Debug)]
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    /// Create a new zero-initialized RAM resource that can hold `size` bytes.
    ///
    /// `size` must be at least one, and at most `1 << 32` (since it must be addressable by
    /// `u32`). If `size` does not satisfy these conditions, `None` is returned and nothing is
    /// allocated.
    pub fn new(size: usize) -> Option<Self> {
        const_assert!(usize::BITS >= 32);
        if size == 0 || size > (1 << 32) {
            None
        } else {
            Some(Self {
                data: vec![0; size],
            })
        }
    }

    /// Returns the size expressed in bytes. Guaranteed to be at least one.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Reads a range of bytes from RAM into `buf`. Does not have side effects.
    ///
    /// For every address in the requested range that is backed, the corresponding byte is
    /// written to `buf` at the offset of the address within the requested range. Elements in
    /// `buf` corresponding to addresses past the end of RAM are left untouched.
    pub fn read(&self, buf: &mut [u8], address: u32) {
        let address = address as usize;
        if address >= self.data.len() || buf.is_empty() {
            return;
        }
        let size = buf.len().min(self.data.len() - address);
        buf[..size].copy_from_slice(&self.data[address..address + size]);
    }

    /// Writes a range of bytes from `buf` into RAM. Does not have side effects other than
    /// writing.
    ///
    /// Bytes in `buf` corresponding to addresses past the end of RAM are ignored.
    pub fn write(&mut self, address: u32, buf: &[u8]) {
        let address = address as usize;
        if address >= self.data.len() || buf.is_empty() {
            return;
        }
        let size = buf.len().min(self.data.len() - address);
        self.data[address..address + size].copy_from_slice(&buf[..size]);
    }
}

impl Bus for Ram {
    fn read(&mut self, buf: &mut [u8], address: u32) {
        Ram::read(self, buf, address);
    }

    fn write(&mut self, address: u32, buf: &[u8]) {
        Ram::write(self, address, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sizes() {
        assert!(Ram::new(0).is_none());
        assert!(Ram::new(64).is_some());
    }

    #[test]
    fn test_read_write_round_trip() {
        let mut ram = Ram::new(64).unwrap();
        ram.write(8, &[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        ram.read(&mut buf, 8);
        assert_eq!([1, 2, 3, 4], buf);
    }

    #[test]
    fn test_partial_access_at_end() {
        let mut ram = Ram::new(8).unwrap();
        ram.write(6, &[0xAA, 0xBB, 0xCC]);
        let mut buf = [0u8; 4];
        ram.read(&mut buf, 6);
        // The byte past the end was dropped on write and left untouched on read.
        assert_eq!([0xAA, 0xBB, 0, 0], buf);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut ram = Ram::new(8).unwrap();
        ram.write(8, &[1]);
        let mut buf = [0xFFu8];
        ram.read(&mut buf, 8);
        assert_eq!([0xFF], buf);
    }
}
