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

    devices::superxt.rs

    Implementation of the Chips & Technologies 82C100 "SuperXT" chipset
    configuration registers and its EMS page mapper.

    Memory above 640K is not visible directly; the chipset maps it into a
    64K page frame in the upper memory area, in four 16K pages. Each page
    has a mapping register in its own I/O port, 0x4000 apart.

*/

use crate::{
    bus::{BusInterface, DeviceRunTimeUnit, IoDevice, MemRangeDescriptor, MemoryMappedDevice, NO_IO_BYTE},
    device_traits::memory::PhysicalMemory,
};

pub const SUPERXT_INDEX_PORT: u16 = 0x22;
pub const SUPERXT_DATA_PORT: u16 = 0x23;

pub const EMS_PAGE_COUNT: usize = 4;
pub const EMS_PAGE_SIZE: usize = 0x4000;
pub const EMS_PAGE_SHIFT: usize = 14;
pub const EMS_PAGE_MASK: usize = EMS_PAGE_SIZE - 1;
pub const EMS_PORT_STRIDE: u16 = 0x4000;
/// Extended memory starts immediately above conventional memory.
pub const EMS_RAM_BASE: usize = 0xA0000;

const EMS_PORT_FIXED: u16 = 0x208;
const EMS_FRAME_BASE: usize = 0xC0000;

pub const REG_CLOCK_MODE: u8 = 0x40;
pub const REG_EMS_CONFIG: u8 = 0x4C;
const CLOCK_TURBO: u8 = 0x80;

const PAGE_ENABLE: u8 = 0x80;
const PAGE_NUMBER_MASK: u8 = 0x7F;

#[derive(Clone, Debug, Default)]
pub struct SuperXtDebugState {
    pub index: u8,
    pub turbo: bool,
    pub ems_port: u16,
    pub ems_base: usize,
    pub page_registers: [u8; EMS_PAGE_COUNT],
    pub page_addresses: [Option<usize>; EMS_PAGE_COUNT],
}

pub struct SuperXt {
    regs: [u8; 256],
    index: u8,
    ems_pages: usize,
    ems_port: u16,
    ems_base: usize,
    page_regs: [u8; EMS_PAGE_COUNT],
    page_exec: [Option<usize>; EMS_PAGE_COUNT],
    turbo: bool,
    turbo_event: Option<bool>,
    power_on_config: u8,
}

impl SuperXt {
    /// Create the chipset for a machine with `memory_kb` of RAM, applying `ems_config` as if
    /// written to the EMS configuration register.
    pub fn new(memory_kb: u32, ems_config: u8) -> Self {
        let ems_pages = (memory_kb.saturating_sub(640) / 16) as usize;
        let mut chipset = Self {
            regs: [0; 256],
            index: 0,
            ems_pages,
            ems_port: 0,
            ems_base: 0,
            page_regs: [0; EMS_PAGE_COUNT],
            page_exec: [None; EMS_PAGE_COUNT],
            turbo: false,
            turbo_event: None,
            power_on_config: ems_config,
        };
        chipset.regs[REG_EMS_CONFIG as usize] = ems_config;
        chipset.set_ems_config(ems_config);
        log::debug!("SuperXT: {} EMS pages available", ems_pages);
        chipset
    }

    /// Return the chipset to its power-on state. Turbo comes back off.
    pub fn reset(&mut self) {
        let turbo = self.turbo;
        *self = Self::new((640 + self.ems_pages * 16) as u32, self.power_on_config);
        if turbo {
            self.turbo_event = Some(false);
        }
    }

    pub fn ems_pages(&self) -> usize {
        self.ems_pages
    }

    pub fn ems_port(&self) -> u16 {
        self.ems_port
    }

    pub fn ems_base(&self) -> usize {
        self.ems_base
    }

    pub fn turbo(&self) -> bool {
        self.turbo
    }

    /// Return the turbo state if it was written since the last call.
    pub fn take_turbo_event(&mut self) -> Option<bool> {
        self.turbo_event.take()
    }

    /// The physical address a page register value selects, if it selects one.
    fn page_address(&self, reg: u8) -> Option<usize> {
        if reg & PAGE_ENABLE == 0 {
            return None;
        }
        let page = (reg & PAGE_NUMBER_MASK) as usize;
        if page < self.ems_pages {
            Some(EMS_RAM_BASE + EMS_PAGE_SIZE * page)
        }
        else {
            None
        }
    }

    /// Page registers are not in order in the 64K port window: register 1 sits at +0x8000 and
    /// register 2 at +0x4000. Swap bits 0 and 1 of the slot to get the register number.
    fn port_to_page(port: u16) -> usize {
        let slot = ((port >> EMS_PAGE_SHIFT) & 3) as usize;
        ((slot >> 1) | (slot << 1)) & 3
    }

    fn set_ems_config(&mut self, val: u8) {
        self.ems_port = EMS_PORT_FIXED | (val & 0xF0) as u16;
        self.ems_base = EMS_FRAME_BASE + EMS_PAGE_SIZE * (val & 0x0F) as usize;
        self.page_regs = [0; EMS_PAGE_COUNT];
        self.page_exec = [None; EMS_PAGE_COUNT];
        log::debug!(
            "SuperXT: EMS port -> {:04X}, page frame -> {:05X}",
            self.ems_port,
            self.ems_base
        );
    }

    fn page_register_write(&mut self, port: u16, val: u8) {
        let page = Self::port_to_page(port);
        self.page_regs[page] = val;
        self.page_exec[page] = self.page_address(val);
        log::trace!(
            "SuperXT: EMS page {} -> {:02X} ({:X?})",
            page,
            val,
            self.page_exec[page]
        );
    }

    /// Translate an address in the page frame to a physical address, if its page is mapped.
    fn translate(&self, address: usize) -> Option<usize> {
        let offset = address.checked_sub(self.ems_base)?;
        let page = offset >> EMS_PAGE_SHIFT;
        if page >= EMS_PAGE_COUNT {
            return None;
        }
        self.page_exec[page].map(|base| base + (address & EMS_PAGE_MASK))
    }

    pub fn get_debug_state(&self) -> SuperXtDebugState {
        SuperXtDebugState {
            index: self.index,
            turbo: self.turbo,
            ems_port: self.ems_port,
            ems_base: self.ems_base,
            page_registers: self.page_regs,
            page_addresses: self.page_exec,
        }
    }
}

impl IoDevice for SuperXt {
    fn read_u8(&mut self, port: u16, _delta: DeviceRunTimeUnit) -> u8 {
        match port {
            SUPERXT_INDEX_PORT => self.index,
            SUPERXT_DATA_PORT => self.regs[self.index as usize],
            _ if port & !0xC000 == self.ems_port => self.page_regs[Self::port_to_page(port)],
            _ => NO_IO_BYTE,
        }
    }

    fn write_u8(&mut self, port: u16, data: u8, _bus: Option<&mut BusInterface>, _delta: DeviceRunTimeUnit) {
        match port {
            SUPERXT_INDEX_PORT => self.index = data,
            SUPERXT_DATA_PORT => {
                self.regs[self.index as usize] = data;
                match self.index {
                    REG_EMS_CONFIG => self.set_ems_config(data),
                    REG_CLOCK_MODE => {
                        self.turbo = data & CLOCK_TURBO != 0;
                        self.turbo_event = Some(self.turbo);
                        log::debug!("SuperXT: turbo {}", if self.turbo { "on" } else { "off" });
                    }
                    _ => {}
                }
            }
            _ if port & !0xC000 == self.ems_port => self.page_register_write(port, data),
            _ => {}
        }
    }

    fn port_list(&self) -> Vec<(String, u16)> {
        let mut ports = vec![
            (String::from("SuperXT Index Register"), SUPERXT_INDEX_PORT),
            (String::from("SuperXT Data Register"), SUPERXT_DATA_PORT),
        ];
        for slot in 0..EMS_PAGE_COUNT as u16 {
            let port = self.ems_port + slot * EMS_PORT_STRIDE;
            ports.push((
                format!("SuperXT EMS Page Register {}", Self::port_to_page(port)),
                port,
            ));
        }
        ports
    }
}

impl MemoryMappedDevice for SuperXt {
    fn mmio_read_u8(&mut self, address: usize, ram: &dyn PhysicalMemory) -> u8 {
        self.mmio_peek_u8(address, ram)
    }

    fn mmio_peek_u8(&self, address: usize, ram: &dyn PhysicalMemory) -> u8 {
        match self.translate(address) {
            Some(phys) => ram.read_u8(phys).unwrap_or(NO_IO_BYTE),
            None => {
                log::warn!("SuperXT: read from unmapped EMS page at {:05X}", address);
                NO_IO_BYTE
            }
        }
    }

    fn mmio_write_u8(&mut self, address: usize, data: u8, ram: &mut dyn PhysicalMemory) {
        match self.translate(address) {
            Some(phys) => {
                if !ram.write_u8(phys, data) {
                    log::warn!("SuperXT: EMS write past end of RAM at {:06X}", phys);
                }
            }
            None => log::warn!("SuperXT: write to unmapped EMS page at {:05X}", address),
        }
    }

    /// Only enabled pages are mapped, so that ROMs under a disabled page stay visible.
    fn get_mapping(&self) -> Vec<MemRangeDescriptor> {
        self.page_exec
            .iter()
            .enumerate()
            .filter(|(_, exec)| exec.is_some())
            .map(|(page, _)| MemRangeDescriptor::new(self.ems_base + page * EMS_PAGE_SIZE, EMS_PAGE_SIZE, false))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bus::NULL_DELTA_US, device_traits::memory::RamBlock};

    fn out(chipset: &mut SuperXt, port: u16, data: u8) {
        chipset.write_u8(port, data, None, NULL_DELTA_US);
    }

    fn ram(memory_kb: usize) -> RamBlock {
        RamBlock::new(EMS_RAM_BASE, (memory_kb - 640) * 1024)
    }

    #[test]
    fn page_registers_map_extended_memory() {
        let mut chipset = SuperXt::new(1024, 0);
        let mut ram = ram(1024);
        assert_eq!(chipset.ems_pages(), 24);
        assert_eq!(chipset.ems_port(), 0x208);
        assert_eq!(chipset.ems_base(), 0xC0000);
        assert!(chipset.get_mapping().is_empty());

        // Register 1 lives at +0x8000.
        out(&mut chipset, 0x8208, 0x83);
        assert_eq!(chipset.get_debug_state().page_addresses[1], Some(0xAC000));
        assert_eq!(chipset.read_u8(0x8208, NULL_DELTA_US), 0x83);

        let mapping = chipset.get_mapping();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].address, 0xC4000);
        assert_eq!(mapping[0].size, EMS_PAGE_SIZE);

        chipset.mmio_write_u8(0xC4123, 0x5A, &mut ram);
        assert_eq!(ram.read_u8(0xAC123), Some(0x5A));
        assert_eq!(chipset.mmio_read_u8(0xC4123, &ram), 0x5A);
        assert_eq!(chipset.mmio_read_u16(0xC4122, &ram), 0x5A00);

        // Register 2 lives at +0x4000 and register 3 at +0xC000.
        out(&mut chipset, 0x4208, 0x80);
        out(&mut chipset, 0xC208, 0x97);
        let state = chipset.get_debug_state();
        assert_eq!(state.page_addresses[2], Some(0xA0000));
        assert_eq!(state.page_addresses[3], Some(0xFC000));
    }

    #[test]
    fn disabled_or_missing_pages_are_unmapped() {
        let mut chipset = SuperXt::new(1024, 0);
        let mut ram = ram(1024);

        // Enable bit clear
        out(&mut chipset, 0x208, 0x03);
        // Beyond installed memory
        out(&mut chipset, 0x8208, 0x80 | 24);
        assert_eq!(chipset.get_debug_state().page_addresses, [None; EMS_PAGE_COUNT]);
        assert!(chipset.get_mapping().is_empty());
        assert_eq!(chipset.mmio_read_u8(0xC0000, &ram), NO_IO_BYTE);
        chipset.mmio_write_u8(0xC0000, 0x11, &mut ram);
        assert_eq!(ram.read_u8(0xA0000), Some(0));

        // Without memory above 640K nothing can be mapped.
        let mut chipset = SuperXt::new(640, 0);
        out(&mut chipset, 0x208, 0x80);
        assert!(chipset.get_mapping().is_empty());
    }

    #[test]
    fn ems_config_moves_ports_and_frame() {
        let mut chipset = SuperXt::new(1024, 0);
        out(&mut chipset, 0x208, 0x80);
        assert_eq!(chipset.get_mapping().len(), 1);

        out(&mut chipset, SUPERXT_INDEX_PORT, REG_EMS_CONFIG);
        out(&mut chipset, SUPERXT_DATA_PORT, 0x14);
        assert_eq!(chipset.ems_port(), 0x218);
        assert_eq!(chipset.ems_base(), 0xD0000);
        // Reconfiguration disables every page.
        assert!(chipset.get_mapping().is_empty());
        assert_eq!(chipset.read_u8(SUPERXT_DATA_PORT, NULL_DELTA_US), 0x14);
        assert_eq!(chipset.read_u8(SUPERXT_INDEX_PORT, NULL_DELTA_US), REG_EMS_CONFIG);

        let ports: Vec<u16> = chipset.port_list().iter().map(|(_, port)| *port).collect();
        assert_eq!(ports, vec![0x22, 0x23, 0x218, 0x4218, 0x8218, 0xC218]);

        // The old page ports no longer respond.
        out(&mut chipset, 0x208, 0x80);
        assert!(chipset.get_mapping().is_empty());
        assert_eq!(chipset.read_u8(0x208, NULL_DELTA_US), NO_IO_BYTE);

        let chipset = SuperXt::new(1024, 0x23);
        assert_eq!(chipset.ems_port(), 0x228);
        assert_eq!(chipset.ems_base(), 0xCC000);
    }

    #[test]
    fn clock_register_sets_turbo() {
        let mut chipset = SuperXt::new(640, 0);
        assert_eq!(chipset.take_turbo_event(), None);
        out(&mut chipset, SUPERXT_INDEX_PORT, REG_CLOCK_MODE);
        out(&mut chipset, SUPERXT_DATA_PORT, 0x80);
        assert!(chipset.turbo());
        assert_eq!(chipset.take_turbo_event(), Some(true));
        assert_eq!(chipset.take_turbo_event(), None);
        out(&mut chipset, SUPERXT_DATA_PORT, 0x01);
        assert_eq!(chipset.take_turbo_event(), Some(false));

        // Other registers are plain storage.
        out(&mut chipset, SUPERXT_INDEX_PORT, 0x10);
        out(&mut chipset, SUPERXT_DATA_PORT, 0xA5);
        assert_eq!(chipset.read_u8(SUPERXT_DATA_PORT, NULL_DELTA_US), 0xA5);
        assert_eq!(chipset.take_turbo_event(), None);
    }
}
