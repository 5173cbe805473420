/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    device_traits::memory.rs

    Defines the PhysicalMemory trait, a bounds-checked byte interface over a
    RAM array.
*/

/// Byte access to physical RAM. Out of range accesses are reported rather than panicking.
pub trait PhysicalMemory {
    /// Read the byte at the specified physical address, or None if it lies outside the array.
    fn read_u8(&self, address: usize) -> Option<u8>;
    /// Write the byte at the specified physical address. Returns false if it lies outside the array.
    fn write_u8(&mut self, address: usize, data: u8) -> bool;
}

impl PhysicalMemory for [u8] {
    #[inline]
    fn read_u8(&self, address: usize) -> Option<u8> {
        self.get(address).copied()
    }

    #[inline]
    fn write_u8(&mut self, address: usize, data: u8) -> bool {
        match self.get_mut(address) {
            Some(byte) => {
                *byte = data;
                true
            }
            None => false,
        }
    }
}

impl PhysicalMemory for Vec<u8> {
    #[inline]
    fn read_u8(&self, address: usize) -> Option<u8> {
        self.as_slice().read_u8(address)
    }

    #[inline]
    fn write_u8(&mut self, address: usize, data: u8) -> bool {
        self.as_mut_slice().write_u8(address, data)
    }
}

/// A block of RAM that starts at a physical address other than zero.
/// This is used for memory above 640K, which is not visible in the CPU's address space
/// except through the EMS page frame.
#[derive(Clone, Debug, Default)]
pub struct RamBlock {
    base: usize,
    data: Vec<u8>,
}

impl RamBlock {
    pub fn new(base: usize, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl PhysicalMemory for RamBlock {
    fn read_u8(&self, address: usize) -> Option<u8> {
        address
            .checked_sub(self.base)
            .and_then(|offset| self.data.get(offset).copied())
    }

    fn write_u8(&mut self, address: usize, data: u8) -> bool {
        match address.checked_sub(self.base).and_then(|offset| self.data.get_mut(offset)) {
            Some(byte) => {
                *byte = data;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_block_is_bounds_checked() {
        let mut ram = RamBlock::new(0xA0000, 0x4000);
        assert_eq!(ram.read_u8(0x9FFFF), None);
        assert_eq!(ram.read_u8(0xA4000), None);
        assert!(ram.write_u8(0xA0010, 0x5A));
        assert_eq!(ram.read_u8(0xA0010), Some(0x5A));
        assert!(!ram.write_u8(0xA4000, 0x5A));
    }
}
