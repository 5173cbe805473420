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

    bus::memory.rs

    Memory access for the system bus: conventional RAM, ROM images and the
    MMIO map through which the EMS page frame is reached.

*/

use crate::bus::{
    BusInterface,
    MemRangeDescriptor,
    MemoryMappedDevice,
    MmioDeviceType,
    CONVENTIONAL_SIZE,
    MEM_ROM_BIT,
    MMIO_MAP_LEN,
    MMIO_MAP_SHIFT,
    MMIO_MAP_SIZE,
};

#[derive(Debug, thiserror::Error)]
pub enum MemError {
    #[error("An attempt was made to read out of bounds at {0:#07X}")]
    ReadOutOfBounds(usize),
    #[error("An attempt was made to write out of bounds at {0:#07X}")]
    WriteOutOfBounds(usize),
    #[error("No device services the memory mapping at {0:#07X}")]
    MmioError(usize),
    #[error("A copy of {len} bytes to {location:#07X} would exceed the address space")]
    CopyOutOfRange { location: usize, len: usize },
}

impl BusInterface {
    /// Copy `src` into memory at `location`. Read-only copies are protected from later writes.
    pub fn copy_from(&mut self, src: &[u8], location: usize, read_only: bool) -> Result<(), MemError> {
        let src_size = src.len();
        if location + src_size > self.memory.len() {
            log::error!("copy out of range: {:05X} len: {}", location, src_size);
            return Err(MemError::CopyOutOfRange {
                location,
                len: src_size,
            });
        }

        self.memory[location..location + src_size].copy_from_slice(src);

        let access_bit = match read_only {
            true => MEM_ROM_BIT,
            false => 0x00,
        };
        for dst in self.memory_mask[location..location + src_size].iter_mut() {
            *dst |= access_bit;
        }

        self.desc_vec
            .push(MemRangeDescriptor::new(location, src_size, read_only));
        Ok(())
    }

    /// Register a memory-mapped device for the range given by `mem_descriptor`.
    ///
    /// Ranges must have a granularity no less than MMIO_MAP_SIZE (8K).
    pub fn register_map(&mut self, device: MmioDeviceType, mem_descriptor: MemRangeDescriptor) {
        if mem_descriptor.size % MMIO_MAP_SIZE != 0 || mem_descriptor.address % MMIO_MAP_SIZE != 0 {
            log::error!(
                "register_map: range {:05X}+{:X} for {:?} is not aligned to the map granularity",
                mem_descriptor.address,
                mem_descriptor.size,
                device
            );
            return;
        }
        let first_seg = mem_descriptor.address >> MMIO_MAP_SHIFT;
        let map_segs = mem_descriptor.size / MMIO_MAP_SIZE;
        if first_seg + map_segs > MMIO_MAP_LEN {
            log::error!("register_map: range {:05X} for {:?} is out of range", mem_descriptor.address, device);
            return;
        }

        log::debug!(
            "register_map: Registering memory map for device: {:?} at {:#X} size: {:#X}, ({} segments)",
            device,
            mem_descriptor.address,
            mem_descriptor.size,
            map_segs
        );
        self.mmio_map_fast[first_seg..first_seg + map_segs].fill(device);
        self.mmio_map.push((mem_descriptor, device));
    }

    /// Rebuild the EMS entries of the MMIO map from the chipset's enabled pages.
    pub(crate) fn update_ems_mapping(&mut self) {
        self.mmio_map.retain(|(_, device)| *device != MmioDeviceType::Ems);
        for entry in self.mmio_map_fast.iter_mut() {
            if *entry == MmioDeviceType::Ems {
                *entry = MmioDeviceType::None;
            }
        }

        let mapping = match &self.chipset {
            Some(chipset) => chipset.get_mapping(),
            None => return,
        };
        for desc in mapping {
            self.register_map(MmioDeviceType::Ems, desc);
        }
    }

    #[inline]
    fn mmio_device(&self, address: usize) -> MmioDeviceType {
        self.mmio_map_fast[address >> MMIO_MAP_SHIFT]
    }

    pub fn read_u8(&mut self, address: usize) -> Result<u8, MemError> {
        if address >= self.memory.len() {
            return Err(MemError::ReadOutOfBounds(address));
        }
        match self.mmio_device(address) {
            MmioDeviceType::None => Ok(self.memory[address]),
            MmioDeviceType::Ems => match &mut self.chipset {
                Some(chipset) => Ok(chipset.mmio_read_u8(address, &self.extended)),
                None => Err(MemError::MmioError(address)),
            },
        }
    }

    /// Read a byte without side effects.
    pub fn peek_u8(&self, address: usize) -> Result<u8, MemError> {
        if address >= self.memory.len() {
            return Err(MemError::ReadOutOfBounds(address));
        }
        match self.mmio_device(address) {
            MmioDeviceType::None => Ok(self.memory[address]),
            MmioDeviceType::Ems => match &self.chipset {
                Some(chipset) => Ok(chipset.mmio_peek_u8(address, &self.extended)),
                None => Err(MemError::MmioError(address)),
            },
        }
    }

    /// Read a word as two byte reads. The bytes may fall in different mappings.
    pub fn read_u16(&mut self, address: usize) -> Result<u16, MemError> {
        let lo = self.read_u8(address)?;
        let hi = self.read_u8(address + 1)?;
        Ok((hi as u16) << 8 | lo as u16)
    }

    /// Write a byte. Writes to ROM, and to addresses above conventional memory that nothing
    /// maps, are ignored.
    pub fn write_u8(&mut self, address: usize, data: u8) -> Result<(), MemError> {
        if address >= self.memory.len() {
            return Err(MemError::WriteOutOfBounds(address));
        }
        match self.mmio_device(address) {
            MmioDeviceType::None => {
                if self.memory_mask[address] & MEM_ROM_BIT != 0 {
                    log::trace!("Write to ROM at {:05X} ignored", address);
                }
                else if address >= CONVENTIONAL_SIZE {
                    log::trace!("Write to unmapped address {:05X} ignored", address);
                }
                else {
                    self.memory[address] = data;
                }
                Ok(())
            }
            MmioDeviceType::Ems => match &mut self.chipset {
                Some(chipset) => {
                    chipset.mmio_write_u8(address, data, &mut self.extended);
                    Ok(())
                }
                None => Err(MemError::MmioError(address)),
            },
        }
    }

    pub fn write_u16(&mut self, address: usize, data: u16) -> Result<(), MemError> {
        self.write_u8(address, data as u8)?;
        self.write_u8(address + 1, (data >> 8) as u8)
    }

    pub fn peek_range(&self, address: usize, len: usize) -> Result<&[u8], MemError> {
        match address.checked_add(len) {
            Some(end) if end <= self.memory.len() => Ok(&self.memory[address..end]),
            _ => Err(MemError::ReadOutOfBounds(address)),
        }
    }
}
