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

    bus::mod.rs

    Implements the system bus that the chip models are attached to. The bus
    owns the 1MB address space, RAM above 640K that is only reachable
    through EMS, the IO port map and the queue of events devices raise for
    the host.

*/

//! Module for modelling an abstract system bus.
//!
//! Devices are owned by the bus and addressed through the IO port map and the MMIO map.
//! The host drives time forward through [BusInterface::run_devices], supplying the interrupt
//! controller and DMA channel that the devices signal.

mod io;
mod memory;

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use fxhash::FxHashMap;

pub use memory::MemError;

use crate::{
    device_traits::{
        dma::DmaChannel,
        memory::{PhysicalMemory, RamBlock},
        pic::InterruptController,
    },
    devices::{
        ct451::Ct451,
        f82c710::{Upc, UpcEvent},
        hdc::{xta::XtaController, ControllerError, DeviceFault},
        superxt::{SuperXt, EMS_RAM_BASE},
    },
    machine_config::{MachineConfiguration, DEFAULT_MEMORY_KB},
    machine_types::XTA_ROM_SIZE,
    raw_image::RawImage,
};

pub const NO_IO_BYTE: u8 = 0xFF; // This is the byte read from an unconnected IO address.
pub const OPEN_BUS_BYTE: u8 = 0xFF; // This is the byte read from an unmapped memory address.

pub const ADDRESS_SPACE: usize = 0x10_0000;
pub const CONVENTIONAL_SIZE: usize = 0xA_0000;

pub(crate) const MMIO_MAP_SIZE: usize = 0x2000;
pub(crate) const MMIO_MAP_SHIFT: usize = 13;
pub(crate) const MMIO_MAP_LEN: usize = ADDRESS_SPACE >> MMIO_MAP_SHIFT;

pub const MEM_ROM_BIT: u8 = 0b1000_0000; // Bit to signify that this address is ROM

pub const NULL_DELTA_US: DeviceRunTimeUnit = DeviceRunTimeUnit::Microseconds(0.0);

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DeviceRunTimeUnit {
    SystemTicks(u32),
    Microseconds(f64),
}

/// Something a device did that the host must act on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceEvent {
    TurboToggled(bool),
    Upc(UpcEvent),
}

pub trait IoDevice {
    /// Read a byte from the specified port, given a delta time that may be used to 'catch up'
    /// the device state, if timing is critical. The default implementation returns NO_IO_BYTE (0xFF).
    fn read_u8(&mut self, _port: u16, _delta: DeviceRunTimeUnit) -> u8 {
        NO_IO_BYTE
    }

    /// Write a byte to the specified port, given a delta time that may be used to 'catch up'
    /// the device state, if timing is critical. A mutable reference to the BusInterface is provided
    /// if the device needs to perform any bus operations on write.
    /// The default implementation does nothing.
    fn write_u8(&mut self, _port: u16, _data: u8, _bus: Option<&mut BusInterface>, _delta: DeviceRunTimeUnit) {}

    /// Return a list of ports the device should service, comprised of a vector of tuples of
    /// (port description, port number).
    fn port_list(&self) -> Vec<(String, u16)>;
}

/// A device that claims a range of the address space. The device is handed the memory it
/// translates into, so that it does not need to own it.
pub trait MemoryMappedDevice {
    fn mmio_read_u8(&mut self, address: usize, ram: &dyn PhysicalMemory) -> u8;
    fn mmio_peek_u8(&self, address: usize, ram: &dyn PhysicalMemory) -> u8;
    fn mmio_write_u8(&mut self, address: usize, data: u8, ram: &mut dyn PhysicalMemory);

    /// Word reads are performed as two byte reads, low byte first.
    fn mmio_read_u16(&mut self, address: usize, ram: &dyn PhysicalMemory) -> u16 {
        let lo = self.mmio_read_u8(address, ram);
        let hi = self.mmio_read_u8(address + 1, ram);
        (hi as u16) << 8 | lo as u16
    }

    fn mmio_write_u16(&mut self, address: usize, data: u16, ram: &mut dyn PhysicalMemory) {
        self.mmio_write_u8(address, data as u8, ram);
        self.mmio_write_u8(address + 1, (data >> 8) as u8, ram);
    }

    fn get_mapping(&self) -> Vec<MemRangeDescriptor>;
}

#[derive(Clone, Debug)]
pub struct MemRangeDescriptor {
    pub address: usize,
    pub size: usize,
    pub cycle_cost: u32,
    pub read_only: bool,
    pub priority: u32,
}

impl MemRangeDescriptor {
    pub fn new(address: usize, size: usize, read_only: bool) -> Self {
        Self {
            address,
            size,
            cycle_cost: 0,
            read_only,
            priority: 1,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IoDeviceType {
    HardDiskController,
    Chipset,
    Upc,
    Video,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MmioDeviceType {
    #[default]
    None,
    Ems,
}

pub struct BusInterface {
    memory: Vec<u8>,
    memory_mask: Vec<u8>,
    extended: RamBlock,
    desc_vec: Vec<MemRangeDescriptor>,
    mmio_map: Vec<(MemRangeDescriptor, MmioDeviceType)>,
    mmio_map_fast: Vec<MmioDeviceType>,
    io_map: FxHashMap<u16, IoDeviceType>,
    io_desc_map: FxHashMap<u16, String>,

    xta: Option<Box<XtaController>>,
    chipset: Option<SuperXt>,
    upc: Option<Upc>,
    video: Option<Ct451>,

    events: VecDeque<DeviceEvent>,
}

impl Default for BusInterface {
    fn default() -> Self {
        let mut bus = BusInterface {
            memory: vec![0; ADDRESS_SPACE],
            memory_mask: vec![0; ADDRESS_SPACE],
            extended: RamBlock::default(),
            desc_vec: Vec::new(),
            mmio_map: Vec::new(),
            mmio_map_fast: vec![MmioDeviceType::None; MMIO_MAP_LEN],
            io_map: FxHashMap::default(),
            io_desc_map: FxHashMap::default(),
            xta: None,
            chipset: None,
            upc: None,
            video: None,
            events: VecDeque::new(),
        };
        bus.clear();
        bus
    }
}

/// Resolve a ROM file name against the ROM directory. Absolute paths are used as given.
fn rom_file_path(rom_dir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    }
    else {
        rom_dir.join(path)
    }
}

impl BusInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill conventional memory with zeros and the rest of the address space with the open bus
    /// byte. ROM contents are lost.
    pub fn clear(&mut self) {
        self.memory[..CONVENTIONAL_SIZE].fill(0);
        self.memory[CONVENTIONAL_SIZE..].fill(OPEN_BUS_BYTE);
        self.memory_mask.fill(0);
        self.desc_vec.clear();
    }

    /// Create and attach the devices described by the machine configuration. ROM images named
    /// by relative paths are looked up in `rom_dir`.
    pub fn install_devices(&mut self, machine_config: &MachineConfiguration, rom_dir: &Path) -> Result<(), Error> {
        machine_config.validate()?;

        if let Some(chipset_config) = &machine_config.chipset {
            log::debug!(
                "Installing {:?} chipset with {}K of memory, EMS config {:02X}",
                chipset_config.chipset_type,
                chipset_config.memory_kb,
                chipset_config.ems_config
            );
            self.install_chipset(SuperXt::new(chipset_config.memory_kb, chipset_config.ems_config));
        }

        if let Some(upc_config) = &machine_config.upc {
            log::debug!("Installing F82C710 UPC");
            self.install_upc(Upc::new(upc_config));
        }

        if let Some(video_config) = &machine_config.video {
            let ct451 = Ct451::new(video_config.vram_kb);
            if let Some(rom) = &video_config.rom {
                self.load_rom(&rom_file_path(rom_dir, rom), ct451.rom_address(), ct451.rom_size())?;
            }
            log::debug!("Installing {:?} video with {}K of VRAM", video_config.video_type, video_config.vram_kb);
            self.install_video(ct451);
        }

        if let Some(xta_config) = &machine_config.xta {
            let res = xta_config.resolve()?;
            let desc = xta_config.xta_type.descriptor();
            let mut xta = XtaController::new(xta_config.xta_type, &res);

            for (slot, drive) in xta_config.drive.iter().enumerate() {
                let image = RawImage::open(&drive.image, drive.geometry()?, res.spt, drive.read_only)?;
                xta.attach_drive(slot, Box::new(image))
                    .with_context(|| format!("Failed to attach {} to drive {}", drive.image, slot))?;
            }

            if let Some(address) = res.rom_address {
                match (&xta_config.rom, desc.rom_file) {
                    (Some(rom), _) => self.load_rom(&rom_file_path(rom_dir, rom), address, XTA_ROM_SIZE)?,
                    (None, Some(default_rom)) => {
                        let path = rom_file_path(rom_dir, default_rom);
                        if path.exists() {
                            self.load_rom(&path, address, XTA_ROM_SIZE)?;
                        }
                        else {
                            log::warn!("{}: BIOS ROM {} not found; installing without it", desc.name, path.display());
                        }
                    }
                    (None, None) => {}
                }
            }
            self.install_xta(xta);
        }

        Ok(())
    }

    fn load_rom(&mut self, path: &Path, address: usize, max_size: usize) -> Result<(), Error> {
        let rom = std::fs::read(path).with_context(|| format!("Failed to read ROM file: {}", path.display()))?;
        if rom.len() > max_size {
            bail!(
                "ROM file {} is {} bytes, larger than the {} byte window at {:05X}",
                path.display(),
                rom.len(),
                max_size,
                address
            );
        }
        log::debug!("Loading ROM {} ({} bytes) at {:05X}", path.display(), rom.len(), address);
        self.copy_from(&rom, address, true)?;
        Ok(())
    }

    pub fn install_xta(&mut self, xta: XtaController) {
        self.sync_io_ports(IoDeviceType::HardDiskController, xta.port_list());
        self.xta = Some(Box::new(xta));
    }

    /// Detach the XTA controller, closing its drives and releasing its ports.
    pub fn remove_xta(&mut self) -> Result<(), ControllerError> {
        self.sync_io_ports(IoDeviceType::HardDiskController, Vec::new());
        match self.xta.take() {
            Some(mut xta) => xta.close(),
            None => Ok(()),
        }
    }

    /// Install the chipset. Memory above 640K becomes the EMS backing store.
    pub fn install_chipset(&mut self, chipset: SuperXt) {
        let memory_kb = DEFAULT_MEMORY_KB as usize + chipset.ems_pages() * 16;
        self.extended = RamBlock::new(EMS_RAM_BASE, (memory_kb - DEFAULT_MEMORY_KB as usize) * 1024);
        self.sync_io_ports(IoDeviceType::Chipset, chipset.port_list());
        self.chipset = Some(chipset);
        self.update_ems_mapping();
    }

    pub fn install_upc(&mut self, mut upc: Upc) {
        self.sync_io_ports(IoDeviceType::Upc, upc.port_list());
        self.events.extend(upc.drain_events().map(DeviceEvent::Upc));
        self.upc = Some(upc);
    }

    pub fn install_video(&mut self, video: Ct451) {
        self.sync_io_ports(IoDeviceType::Video, video.port_list());
        self.video = Some(video);
    }

    /// Replace the ports registered to `device` with `port_list`. Ports already claimed by another
    /// device are left with their owner.
    pub(crate) fn sync_io_ports(&mut self, device: IoDeviceType, port_list: Vec<(String, u16)>) {
        let stale: Vec<u16> = self
            .io_map
            .iter()
            .filter(|(_, owner)| **owner == device)
            .map(|(port, _)| *port)
            .collect();
        for port in stale {
            self.io_map.remove(&port);
            self.io_desc_map.remove(&port);
        }

        for (desc, port) in port_list {
            match self.io_map.get(&port) {
                Some(owner) if *owner != device => {
                    log::warn!("{:?}: port {:04X} ({}) is already claimed by {:?}", device, port, desc, owner);
                }
                _ => {
                    self.io_map.insert(port, device);
                    self.io_desc_map.insert(port, desc);
                }
            }
        }
    }

    /// Return the device servicing the specified port, if any.
    pub fn io_device_at(&self, port: u16) -> Option<IoDeviceType> {
        self.io_map.get(&port).copied()
    }

    /// Return the description of the specified port, if any device services it.
    pub fn io_port_desc(&self, port: u16) -> Option<&str> {
        self.io_desc_map.get(&port).map(|s| s.as_str())
    }

    /// Run devices for the specified number of microseconds.
    pub fn run_devices(
        &mut self,
        us: f64,
        pic: &mut dyn InterruptController,
        dma: &mut dyn DmaChannel,
    ) -> Result<(), DeviceFault> {
        if let Some(xta) = &mut self.xta {
            xta.run(us, pic, dma)?;
        }
        Ok(())
    }

    /// Reset all devices to their power-on state. Attached drives and ROMs stay in place.
    pub fn reset_devices(&mut self) {
        if let Some(xta) = &mut self.xta {
            xta.reset();
        }
        if let Some(mut chipset) = self.chipset.take() {
            chipset.reset();
            if let Some(turbo) = chipset.take_turbo_event() {
                self.events.push_back(DeviceEvent::TurboToggled(turbo));
            }
            self.sync_io_ports(IoDeviceType::Chipset, chipset.port_list());
            self.chipset = Some(chipset);
            self.update_ems_mapping();
        }
        if let Some(mut upc) = self.upc.take() {
            upc.reset();
            self.events.extend(upc.drain_events().map(DeviceEvent::Upc));
            self.sync_io_ports(IoDeviceType::Upc, upc.port_list());
            self.upc = Some(upc);
        }
        if let Some(video) = &mut self.video {
            video.reset();
        }
    }

    /// Pop the oldest pending device event.
    pub fn get_event(&mut self) -> Option<DeviceEvent> {
        self.events.pop_front()
    }

    pub fn xta(&self) -> Option<&XtaController> {
        self.xta.as_deref()
    }

    pub fn xta_mut(&mut self) -> &mut Option<Box<XtaController>> {
        &mut self.xta
    }

    pub fn chipset(&self) -> Option<&SuperXt> {
        self.chipset.as_ref()
    }

    pub fn upc_mut(&mut self) -> Option<&mut Upc> {
        self.upc.as_mut()
    }

    pub fn video(&self) -> Option<&Ct451> {
        self.video.as_ref()
    }

    /// Return the ranges that ROM images and other copies were loaded into.
    pub fn mem_descriptors(&self) -> &[MemRangeDescriptor] {
        &self.desc_vec
    }

    /// Return the RAM above 640K.
    pub fn extended_memory(&self) -> &RamBlock {
        &self.extended
    }
}
