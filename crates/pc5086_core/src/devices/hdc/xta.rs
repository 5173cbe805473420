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

    devices::hdc::xta.rs

    Implementation of the XTA (XT-Attached) fixed disk controller, as found
    on the WDXT-150, the EuroPC HD20, the Toshiba T1200 and the Amstrad
    PC5086 motherboard.

    The host sees the Xebec programming interface: a data register, a
    status register, a controller select strobe and a DMA/IRQ mask. A
    command is a six byte Device Control Block. Commands that take time
    suspend by arming a one-shot callback; the controller state and the
    transfer cursor carry everything needed to resume.

    Sector numbers are 0-based.

*/

use crate::{
    bus::{BusInterface, DeviceRunTimeUnit, IoDevice, NO_IO_BYTE},
    device_traits::{dma::DmaChannel, pic::InterruptController, storage::SectorStorage},
    device_types::geometry::DriveGeometry,
    devices::hdc::{xta_dcb::*, ControllerError, DeviceFault, SECTOR_SIZE},
    machine_config::XtaResources,
    machine_types::XtaControllerType,
};

pub const XTA_DRIVE_CT: usize = 2;

/// Base command delay, in microseconds.
pub const HDC_TIME_US: f64 = 50.0;
/// Delay after a completed transfer and for diagnostics.
pub const HDC_LONG_DELAY_US: f64 = 5.0 * HDC_TIME_US;

pub const DATA_REGISTER: u16 = 0x00;
pub const STATUS_REGISTER: u16 = 0x01;
pub const SELECT_REGISTER: u16 = 0x02;
pub const MASK_REGISTER: u16 = 0x03;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum State {
    #[default]
    Idle,
    Recv,
    RData,
    RDone,
    Send,
    SData,
    SDone,
    Compl,
}

/// Which buffer the transfer cursor points into.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
enum Buffer {
    #[default]
    Dcb,
    Data,
    Sector,
}

#[derive(Default)]
pub struct XtaDrive {
    storage: Option<Box<dyn SectorStorage>>,
    cur_cyl: u16,
    // Active parameters
    spt: u8,
    hpc: u8,
    tracks: u16,
    // Parameters learned from the image
    cfg_spt: u8,
    cfg_hpc: u8,
    cfg_tracks: u16,
}

impl XtaDrive {
    #[inline]
    pub fn present(&self) -> bool {
        self.storage.is_some()
    }

    pub fn geometry(&self) -> DriveGeometry {
        DriveGeometry::xt(self.tracks, self.hpc, self.spt)
    }

    fn clamp_cylinder(&mut self) {
        if self.cur_cyl >= self.tracks {
            self.cur_cyl = self.tracks.saturating_sub(1);
        }
    }
}

pub struct XtaController {
    ctype: XtaControllerType,
    name: &'static str,
    io_base: u16,
    irq: u8,
    dma: usize,
    spt: u8,
    rom_address: Option<usize>,

    state: State,
    sense: SenseCode,
    status: u8,
    intr: u8,
    callback_us: Option<f64>,
    interrupt_active: bool,
    clear_interrupt: bool,

    buf_idx: usize,
    buf_len: usize,
    buf: Buffer,

    dcb_bytes: [u8; DCB_LEN],
    track: u16,
    head: u8,
    sector: u8,
    comp: u8,
    count: usize,

    drives: [XtaDrive; XTA_DRIVE_CT],
    data: Box<[u8; SECTOR_SIZE]>,
    sector_buf: Box<[u8; SECTOR_SIZE]>,
}

impl XtaController {
    pub fn new(ctype: XtaControllerType, res: &XtaResources) -> Self {
        let name = ctype.descriptor().name;
        log::debug!(
            "{}: initializing (I/O={:04X}, IRQ={}, DMA={}{})",
            name,
            res.io_base,
            res.irq,
            res.dma,
            match res.rom_address {
                Some(addr) => format!(", BIOS={:06X}", addr),
                None => String::new(),
            }
        );
        Self {
            ctype,
            name,
            io_base: res.io_base,
            irq: res.irq,
            dma: res.dma,
            spt: res.spt,
            rom_address: res.rom_address,
            state: State::Idle,
            sense: SenseCode::NoError,
            status: 0,
            intr: 0,
            callback_us: None,
            interrupt_active: false,
            clear_interrupt: false,
            buf_idx: 0,
            buf_len: 0,
            buf: Buffer::Dcb,
            dcb_bytes: [0; DCB_LEN],
            track: 0,
            head: 0,
            sector: 0,
            comp: 0,
            count: 0,
            drives: Default::default(),
            data: Box::new([0; SECTOR_SIZE]),
            sector_buf: Box::new([0; SECTOR_SIZE]),
        }
    }

    /// Create a controller with the default resources of its variant.
    pub fn with_defaults(ctype: XtaControllerType) -> Self {
        let desc = ctype.descriptor();
        Self::new(
            ctype,
            &XtaResources {
                io_base: desc.io_bases[0],
                irq: desc.irqs[0],
                dma: desc.dma,
                spt: desc.spt,
                rom_address: desc.rom_addresses.first().copied(),
            },
        )
    }

    /// Return the controller to its power-on state. Attached drives are kept.
    pub fn reset(&mut self) {
        log::trace!("{}: reset", self.name);
        self.state = State::Idle;
        self.sense = SenseCode::NoError;
        self.status = 0;
        self.intr = 0;
        self.callback_us = None;
        self.clear_interrupt = self.interrupt_active;
        self.buf_idx = 0;
        self.buf_len = 0;
        self.buf = Buffer::Dcb;
        self.comp = 0;
        for drive in self.drives.iter_mut() {
            drive.cur_cyl = 0;
        }
    }

    pub fn attach_drive(&mut self, slot: usize, storage: Box<dyn SectorStorage>) -> Result<(), ControllerError> {
        if slot >= XTA_DRIVE_CT {
            return Err(ControllerError::InvalidDevice(slot));
        }
        let geometry = storage.geometry();
        if geometry.c() == 0 || geometry.h() == 0 || geometry.s() == 0 || geometry.s() > 63 {
            return Err(ControllerError::UnsupportedGeometry(geometry.to_string()));
        }

        let drive = &mut self.drives[slot];
        drive.storage = Some(storage);
        drive.cur_cyl = 0;
        drive.spt = geometry.s();
        drive.hpc = geometry.h();
        drive.tracks = geometry.c();
        drive.cfg_spt = drive.spt;
        drive.cfg_hpc = drive.hpc;
        drive.cfg_tracks = drive.tracks;

        log::debug!(
            "{}: drive{} (cyl={},hd={},spt={})",
            self.name,
            slot,
            drive.tracks,
            drive.hpc,
            drive.spt
        );
        Ok(())
    }

    /// Flush and release the drive in the specified slot, returning its storage.
    pub fn detach_drive(&mut self, slot: usize) -> Result<Option<Box<dyn SectorStorage>>, ControllerError> {
        if slot >= XTA_DRIVE_CT {
            return Err(ControllerError::InvalidDevice(slot));
        }
        let drive = &mut self.drives[slot];
        if let Some(storage) = drive.storage.as_mut() {
            storage.flush()?;
        }
        let storage = drive.storage.take();
        *drive = XtaDrive::default();
        Ok(storage)
    }

    /// Restore the geometry learned from the image, undoing any Set Drive Parameters command.
    pub fn reset_geometry(&mut self, slot: usize) -> Result<(), ControllerError> {
        let drive = self.drives.get_mut(slot).ok_or(ControllerError::InvalidDevice(slot))?;
        drive.spt = drive.cfg_spt;
        drive.hpc = drive.cfg_hpc;
        drive.tracks = drive.cfg_tracks;
        drive.clamp_cylinder();
        Ok(())
    }

    /// Flush and release both drives.
    pub fn close(&mut self) -> Result<(), ControllerError> {
        let mut result = Ok(());
        for slot in 0..XTA_DRIVE_CT {
            if let Err(e) = self.detach_drive(slot) {
                log::error!("{}: error closing drive{}: {}", self.name, slot, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    pub fn controller_type(&self) -> XtaControllerType {
        self.ctype
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn io_base(&self) -> u16 {
        self.io_base
    }
    pub fn irq(&self) -> u8 {
        self.irq
    }
    pub fn dma_channel(&self) -> usize {
        self.dma
    }
    pub fn rom_address(&self) -> Option<usize> {
        self.rom_address
    }
    pub fn state(&self) -> State {
        self.state
    }
    pub fn status(&self) -> u8 {
        self.status & !STAT_DCB
    }
    pub fn sense(&self) -> SenseCode {
        self.sense
    }
    pub fn callback_pending(&self) -> Option<f64> {
        self.callback_us
    }
    pub fn drive_present(&self, slot: usize) -> bool {
        self.drives.get(slot).is_some_and(|d| d.present())
    }
    pub fn drive_cylinder(&self, slot: usize) -> Option<u16> {
        self.drives.get(slot).filter(|d| d.present()).map(|d| d.cur_cyl)
    }
    pub fn drive_geometry(&self, slot: usize) -> Option<DriveGeometry> {
        self.drives.get(slot).filter(|d| d.present()).map(|d| d.geometry())
    }

    #[inline]
    fn set_callback(&mut self, us: f64) {
        self.callback_us = Some(us);
    }

    #[inline]
    fn dma_enabled(&self) -> bool {
        self.intr & DMA_ENA != 0
    }

    fn buffer(&self) -> &[u8] {
        match self.buf {
            Buffer::Dcb => &self.dcb_bytes,
            Buffer::Data => &self.data[..],
            Buffer::Sector => &self.sector_buf[..],
        }
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        match self.buf {
            Buffer::Dcb => &mut self.dcb_bytes,
            Buffer::Data => &mut self.data[..],
            Buffer::Sector => &mut self.sector_buf[..],
        }
    }

    fn data_register_read(&mut self) -> u8 {
        self.status &= !STAT_IRQ;
        if self.interrupt_active {
            self.clear_interrupt = true;
        }

        match self.state {
            State::SData => {
                if self.buf_idx >= self.buf_len {
                    log::warn!("{}: read with empty buffer!", self.name);
                    self.comp |= COMP_ERR;
                    self.sense = SenseCode::IllegalCommand;
                    return NO_IO_BYTE;
                }
                let byte = self.buffer()[self.buf_idx];
                self.buf_idx += 1;
                if self.buf_idx == self.buf_len {
                    // All data sent.
                    self.status &= !STAT_REQ;
                    self.state = State::SDone;
                    self.set_callback(HDC_LONG_DELAY_US);
                }
                byte
            }
            State::Compl => {
                self.status = 0;
                self.state = State::Idle;
                self.comp
            }
            _ => {
                log::warn!("{}: data read in state {:?}", self.name, self.state);
                self.comp |= COMP_ERR;
                self.sense = SenseCode::IllegalCommand;
                NO_IO_BYTE
            }
        }
    }

    fn data_register_write(&mut self, byte: u8) {
        if self.state != State::RData {
            log::warn!("{}: data write {:02X} in state {:?}", self.name, byte, self.state);
            self.comp |= COMP_ERR;
            self.sense = SenseCode::IllegalCommand;
            return;
        }
        if self.status & STAT_REQ == 0 {
            log::warn!("{}: not ready for command/data!", self.name);
            self.comp |= COMP_ERR;
            self.sense = SenseCode::IllegalCommand;
            return;
        }
        if self.buf_idx >= self.buf_len {
            log::warn!("{}: write with full buffer!", self.name);
            self.comp |= COMP_ERR;
            self.sense = SenseCode::IllegalCommand;
            return;
        }

        let idx = self.buf_idx;
        self.buffer_mut()[idx] = byte;
        self.buf_idx += 1;
        if self.buf_idx == self.buf_len {
            // We got all the data we need. Without the DCB flag this was the DCB itself.
            self.status &= !STAT_REQ;
            self.state = if self.status & STAT_DCB != 0 {
                State::RDone
            }
            else {
                State::Idle
            };
            self.status &= !STAT_CD;
            self.set_callback(HDC_LONG_DELAY_US);
        }
    }

    fn reset_register_write(&mut self) {
        log::debug!("{}: controller reset", self.name);
        self.sense = SenseCode::NoError;
        self.state = State::Idle;
        self.status = 0;
        self.callback_us = None;
        if self.interrupt_active {
            self.clear_interrupt = true;
        }
    }

    fn controller_select(&mut self) {
        self.buf_idx = 0;
        self.buf_len = DCB_LEN;
        self.buf = Buffer::Dcb;
        self.state = State::RData;
        self.status = STAT_BSY | STAT_CD | STAT_REQ;
    }

    /// Lower our IRQ line if the host has acknowledged the interrupt.
    fn service_interrupt(&mut self, pic: &mut dyn InterruptController) {
        if self.clear_interrupt {
            pic.clear_interrupt(self.irq);
            self.clear_interrupt = false;
            self.interrupt_active = false;
        }
    }

    /// Run the controller for the specified number of microseconds, firing the command callback
    /// each time its deadline expires.
    pub fn run(
        &mut self,
        us: f64,
        pic: &mut dyn InterruptController,
        dma: &mut dyn DmaChannel,
    ) -> Result<(), DeviceFault> {
        self.service_interrupt(pic);

        let mut remaining = us;
        while let Some(deadline) = self.callback_us {
            if deadline > remaining {
                self.callback_us = Some(deadline - remaining);
                break;
            }
            remaining -= deadline;
            self.callback_us = None;
            self.advance(pic, dma)?;
        }
        Ok(())
    }

    fn set_intr(&mut self, pic: &mut dyn InterruptController) {
        self.status = STAT_REQ | STAT_CD | STAT_IO | STAT_BSY;
        self.state = State::Compl;

        if self.intr & IRQ_ENA != 0 {
            self.status |= STAT_IRQ;
            // IRQ 0 means the controller is not wired to the PIC.
            if self.irq != 0 {
                pic.request_interrupt(self.irq);
                self.interrupt_active = true;
                self.clear_interrupt = false;
            }
        }
    }

    fn fail(&mut self, sense: SenseCode, pic: &mut dyn InterruptController) {
        self.comp |= COMP_ERR;
        self.sense = sense;
        self.set_intr(pic);
    }

    /// Return the logical block address of the current track, head and sector, or None
    /// (with the sense code set) if the address is invalid for the drive.
    fn get_sector(&mut self, drv: usize) -> Option<usize> {
        let drive = &self.drives[drv];
        if drive.cur_cyl != self.track {
            log::debug!(
                "{}: get_sector: wrong cylinder {}/{}",
                self.name,
                drive.cur_cyl,
                self.track
            );
            self.sense = SenseCode::IllegalAddress;
            return None;
        }
        if self.head >= drive.hpc {
            log::debug!("{}: get_sector: past end of heads", self.name);
            self.sense = SenseCode::IllegalAddress;
            return None;
        }
        if self.sector >= drive.spt {
            log::debug!("{}: get_sector: past end of sectors", self.name);
            self.sense = SenseCode::IllegalAddress;
            return None;
        }
        Some(
            ((self.track as usize * drive.hpc as usize) + self.head as usize) * drive.spt as usize
                + self.sector as usize,
        )
    }

    fn next_sector(&mut self, drv: usize) {
        let drive = &mut self.drives[drv];
        self.sector = self.sector.wrapping_add(1);
        if self.sector >= drive.spt {
            self.sector = 0;
            self.head = self.head.wrapping_add(1);
            if self.head >= drive.hpc {
                self.head = 0;
                self.track = self.track.wrapping_add(1);
                drive.cur_cyl = drive.cur_cyl.saturating_add(1);
                drive.clamp_cylinder();
            }
        }
    }

    fn do_seek(&mut self, drv: usize, cyl: u16) {
        let drive = &mut self.drives[drv];
        self.track = cyl;
        drive.cur_cyl = cyl;
        drive.clamp_cylinder();
    }

    fn read_block(&mut self, drv: usize, lba: usize) -> bool {
        let name = self.name;
        match self.drives[drv].storage.as_mut() {
            Some(storage) => match storage.read_sector(lba, &mut self.sector_buf[..]) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("{}: error reading sector {}: {}", name, lba, e);
                    false
                }
            },
            None => false,
        }
    }

    fn write_block(&mut self, drv: usize, lba: usize) -> bool {
        let name = self.name;
        match self.drives[drv].storage.as_mut() {
            Some(storage) => match storage.write_sector(lba, &self.sector_buf[..]) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("{}: error writing sector {}: {}", name, lba, e);
                    false
                }
            },
            None => false,
        }
    }

    /// Drain the transfer buffer into the DMA channel. On underrun the cursor is kept so the
    /// transfer resumes on the next callback.
    fn dma_to_host(&mut self, dma: &mut dyn DmaChannel, command: &'static str) -> Result<(), DeviceFault> {
        while self.buf_idx < self.buf_len {
            let byte = self.buffer()[self.buf_idx];
            if !dma.dma_write_u8(self.dma, byte) {
                return Err(self.dma_underrun(command));
            }
            self.buf_idx += 1;
        }
        Ok(())
    }

    /// Fill the transfer buffer from the DMA channel.
    fn dma_from_host(&mut self, dma: &mut dyn DmaChannel, command: &'static str) -> Result<(), DeviceFault> {
        while self.buf_idx < self.buf_len {
            match dma.dma_read_u8(self.dma) {
                Some(byte) => {
                    let idx = self.buf_idx;
                    self.buffer_mut()[idx] = byte;
                    self.buf_idx += 1;
                }
                None => return Err(self.dma_underrun(command)),
            }
        }
        Ok(())
    }

    fn dma_underrun(&mut self, command: &'static str) -> DeviceFault {
        log::error!(
            "{}: {} out of DMA data (idx={}, len={})!",
            self.name,
            command,
            self.buf_idx,
            self.buf_len
        );
        self.status |= STAT_CD | STAT_IO | STAT_REQ;
        self.set_callback(HDC_TIME_US);
        DeviceFault::DmaUnderrun {
            command,
            index: self.buf_idx,
            len: self.buf_len,
        }
    }

    /// Execute the next step of the command in the DCB. `run()` calls this whenever the command
    /// callback expires; a host scheduler may also call it directly.
    pub fn advance(
        &mut self,
        pic: &mut dyn InterruptController,
        dma: &mut dyn DmaChannel,
    ) -> Result<(), DeviceFault> {
        let dcb = Dcb::from_bytes(self.dcb_bytes);
        let drv = dcb.drive();

        self.comp = if dcb.drvsel() { COMP_DRIVE } else { 0 };
        self.status |= STAT_DCB;

        let command = Command::try_from(dcb.cmd());
        if self.state == State::Idle {
            log::debug!(
                "{}: command {:02X} ({:?}) drive{} chs={}/{}/{} count={}",
                self.name,
                dcb.cmd(),
                command,
                drv,
                dcb.cylinder(),
                dcb.head(),
                dcb.sector(),
                dcb.count()
            );
        }

        match command {
            Ok(Command::TestReady) => {
                if self.drives[drv].present() {
                    self.set_intr(pic);
                }
                else {
                    self.fail(SenseCode::NotReady, pic);
                }
            }
            Ok(Command::Recalibrate) => {
                if self.drives[drv].present() {
                    self.track = 0;
                    self.drives[drv].cur_cyl = 0;
                    self.set_intr(pic);
                }
                else {
                    self.fail(SenseCode::NotReady, pic);
                }
            }
            Ok(Command::ReadSense) => self.cmd_read_sense(drv, pic),
            Ok(Command::ReadVerify) => self.cmd_read(dcb, drv, true, pic, dma)?,
            Ok(Command::ReadSectors) => self.cmd_read(dcb, drv, false, pic, dma)?,
            Ok(Command::WriteSectors) => self.cmd_write(dcb, drv, pic, dma)?,
            Ok(Command::FormatDrive) => self.cmd_format(dcb, drv, true, pic),
            Ok(Command::FormatTrack) => self.cmd_format(dcb, drv, false, pic),
            Ok(Command::Seek) => {
                let cyl = dcb.cylinder();
                if self.drives[drv].present() {
                    self.do_seek(drv, cyl);
                    if cyl != self.drives[drv].cur_cyl {
                        log::debug!("{}: seek to cylinder {} failed", self.name, cyl);
                        self.comp |= COMP_ERR;
                        self.sense = SenseCode::Seek;
                    }
                }
                else {
                    self.comp |= COMP_ERR;
                    self.sense = SenseCode::NotReady;
                }
                self.set_intr(pic);
            }
            Ok(Command::SetDriveParams) => self.cmd_set_drive_params(drv, pic),
            Ok(Command::ReadSectorBuffer) => self.cmd_read_sector_buffer(pic, dma)?,
            Ok(Command::WriteSectorBuffer) => self.cmd_write_sector_buffer(pic, dma)?,
            Ok(Command::RamDiagnostics) | Ok(Command::ControllerDiagnostics) => self.cmd_diagnostics(None, pic),
            Ok(Command::DriveDiagnostics) => self.cmd_diagnostics(Some(drv), pic),
            Ok(cmd) => {
                log::warn!("{}: unsupported command {:?}", self.name, cmd);
                self.fail(SenseCode::IllegalCommand, pic);
            }
            Err(opcode) => {
                log::warn!("{}: unknown command {:02X}", self.name, opcode);
                self.fail(SenseCode::IllegalCommand, pic);
            }
        }
        Ok(())
    }

    fn cmd_read_sense(&mut self, drv: usize, pic: &mut dyn InterruptController) {
        match self.state {
            State::Idle => {
                let cur_cyl = self.drives[drv].cur_cyl;
                self.data[0] = self.sense as u8;
                self.data[1] = if drv != 0 { COMP_DRIVE } else { 0 };
                self.data[2] = ((cur_cyl >> 2) as u8 & 0xC0) | (self.sector & 0x3F);
                self.data[3] = cur_cyl as u8;
                self.buf_idx = 0;
                self.buf_len = 4;
                self.buf = Buffer::Data;
                self.sense = SenseCode::NoError;
                self.status |= STAT_IO | STAT_REQ;
                self.state = State::SData;
            }
            State::SDone => self.set_intr(pic),
            _ => {}
        }
    }

    fn cmd_read(
        &mut self,
        dcb: Dcb,
        drv: usize,
        no_data: bool,
        pic: &mut dyn InterruptController,
        dma: &mut dyn DmaChannel,
    ) -> Result<(), DeviceFault> {
        if !self.drives[drv].present() {
            self.fail(SenseCode::NotReady, pic);
            return Ok(());
        }

        match self.state {
            State::Idle => {
                self.do_seek(drv, dcb.cylinder());
                self.head = dcb.head();
                self.sector = dcb.sector();
                self.count = dcb.sector_count();
                self.buf_len = SECTOR_SIZE;
                self.state = State::Send;
                self.read_send(drv, no_data, pic);
            }
            State::Send => self.read_send(drv, no_data, pic),
            State::SData => {
                if !no_data {
                    self.dma_to_host(dma, "READ_SECTORS")?;
                }
                self.set_callback(HDC_TIME_US);
                self.state = State::SDone;
            }
            State::SDone => {
                self.buf_idx = 0;
                self.count = self.count.saturating_sub(1);
                if self.count == 0 {
                    log::debug!("{}: read done", self.name);
                    self.set_intr(pic);
                    return Ok(());
                }
                self.next_sector(drv);
                self.state = State::Send;
                self.read_send(drv, no_data, pic);
            }
            _ => {}
        }
        Ok(())
    }

    fn read_send(&mut self, drv: usize, no_data: bool, pic: &mut dyn InterruptController) {
        let Some(lba) = self.get_sector(drv)
        else {
            self.comp |= COMP_ERR;
            self.set_intr(pic);
            return;
        };
        if !self.read_block(drv, lba) {
            self.fail(SenseCode::Data, pic);
            return;
        }

        self.state = State::SData;
        self.buf_idx = 0;
        if no_data {
            self.set_callback(HDC_TIME_US);
        }
        else if self.dma_enabled() {
            self.buf = Buffer::Sector;
            self.set_callback(HDC_TIME_US);
        }
        else {
            *self.data = *self.sector_buf;
            self.buf = Buffer::Data;
            self.status |= STAT_IO | STAT_REQ;
        }
    }

    fn cmd_write(
        &mut self,
        dcb: Dcb,
        drv: usize,
        pic: &mut dyn InterruptController,
        dma: &mut dyn DmaChannel,
    ) -> Result<(), DeviceFault> {
        if !self.drives[drv].present() {
            self.fail(SenseCode::NotReady, pic);
            return Ok(());
        }

        match self.state {
            State::Idle => {
                self.do_seek(drv, dcb.cylinder());
                self.head = dcb.head();
                self.sector = dcb.sector();
                self.count = dcb.sector_count();
                self.buf_len = SECTOR_SIZE;
                self.write_recv();
            }
            State::Recv => self.write_recv(),
            State::RData => {
                self.status = STAT_BSY;
                self.dma_from_host(dma, "WRITE_SECTORS")?;
                self.set_callback(HDC_TIME_US);
                self.state = State::RDone;
            }
            State::RDone => {
                if !self.dma_enabled() {
                    *self.sector_buf = *self.data;
                }
                let Some(lba) = self.get_sector(drv)
                else {
                    self.comp |= COMP_ERR;
                    self.set_intr(pic);
                    return Ok(());
                };
                if !self.write_block(drv, lba) {
                    self.fail(SenseCode::WriteFault, pic);
                    return Ok(());
                }

                self.buf_idx = 0;
                self.count = self.count.saturating_sub(1);
                if self.count == 0 {
                    log::debug!("{}: write done", self.name);
                    self.set_intr(pic);
                    return Ok(());
                }
                self.next_sector(drv);
                self.write_recv();
            }
            _ => {}
        }
        Ok(())
    }

    fn write_recv(&mut self) {
        self.state = State::RData;
        self.buf_idx = 0;
        if self.dma_enabled() {
            self.buf = Buffer::Sector;
            self.set_callback(HDC_TIME_US);
        }
        else {
            self.buf = Buffer::Data;
            self.status |= STAT_REQ;
        }
    }

    fn cmd_format(&mut self, dcb: Dcb, drv: usize, whole_drive: bool, pic: &mut dyn InterruptController) {
        if self.drives[drv].present() {
            if self.state == State::Idle {
                self.do_format(dcb, drv, whole_drive);
            }
        }
        else {
            self.comp |= COMP_ERR;
            self.sense = SenseCode::NotReady;
        }
        self.set_intr(pic);
    }

    /// Write the sector buffer to every sector of the drive, or of the track in the DCB.
    /// Interleave and the DCB count are ignored.
    fn do_format(&mut self, dcb: Dcb, drv: usize, whole_drive: bool) {
        let drive = &self.drives[drv];
        let spt = drive.spt;
        let (cylinders, heads) = if whole_drive {
            (0..drive.tracks, 0..drive.hpc)
        }
        else {
            let cyl = dcb.cylinder();
            let head = dcb.head();
            (cyl..cyl + 1, head..head + 1)
        };

        for cyl in cylinders {
            self.do_seek(drv, cyl);
            for head in heads.clone() {
                for sector in 0..spt {
                    self.head = head;
                    self.sector = sector;
                    let Some(lba) = self.get_sector(drv)
                    else {
                        self.comp |= COMP_ERR;
                        return;
                    };
                    if !self.write_block(drv, lba) {
                        self.comp |= COMP_ERR;
                        self.sense = SenseCode::WriteFault;
                        return;
                    }
                }
            }
        }
    }

    fn cmd_set_drive_params(&mut self, drv: usize, pic: &mut dyn InterruptController) {
        match self.state {
            State::Idle => {
                self.state = State::RData;
                self.buf_idx = 0;
                self.buf_len = DRIVE_PARAMS_LEN;
                self.buf = Buffer::Data;
                self.status |= STAT_REQ;
            }
            State::RDone => {
                let mut block = [0u8; DRIVE_PARAMS_LEN];
                block.copy_from_slice(&self.data[..DRIVE_PARAMS_LEN]);
                let params = DriveParameters::from(&block);

                let drive = &mut self.drives[drv];
                drive.tracks = params.cylinders;
                drive.hpc = params.heads;
                drive.spt = self.spt;
                drive.clamp_cylinder();
                log::debug!(
                    "{}: drive{} params (cyl={},hd={},spt={})",
                    self.name,
                    drv,
                    drive.tracks,
                    drive.hpc,
                    drive.spt
                );

                self.status &= !STAT_REQ;
                self.set_intr(pic);
            }
            _ => {}
        }
    }

    fn cmd_read_sector_buffer(
        &mut self,
        pic: &mut dyn InterruptController,
        dma: &mut dyn DmaChannel,
    ) -> Result<(), DeviceFault> {
        match self.state {
            State::Idle => {
                self.buf_idx = 0;
                self.buf_len = SECTOR_SIZE;
                self.state = State::SData;
                if self.dma_enabled() {
                    self.buf = Buffer::Sector;
                    self.set_callback(HDC_TIME_US);
                }
                else {
                    *self.data = *self.sector_buf;
                    self.buf = Buffer::Data;
                    self.status |= STAT_IO | STAT_REQ;
                }
            }
            State::SData => {
                if self.dma_enabled() {
                    self.dma_to_host(dma, "READ_SECTOR_BUFFER")?;
                    self.state = State::SDone;
                    self.set_callback(HDC_TIME_US);
                }
            }
            State::SDone => self.set_intr(pic),
            _ => {}
        }
        Ok(())
    }

    fn cmd_write_sector_buffer(
        &mut self,
        pic: &mut dyn InterruptController,
        dma: &mut dyn DmaChannel,
    ) -> Result<(), DeviceFault> {
        match self.state {
            State::Idle => {
                self.buf_idx = 0;
                self.buf_len = SECTOR_SIZE;
                self.state = State::RData;
                if self.dma_enabled() {
                    self.buf = Buffer::Sector;
                    self.set_callback(HDC_TIME_US);
                }
                else {
                    self.buf = Buffer::Data;
                    self.status |= STAT_REQ;
                }
            }
            State::RData => {
                if self.dma_enabled() {
                    self.dma_from_host(dma, "WRITE_SECTOR_BUFFER")?;
                    self.state = State::RDone;
                    self.set_callback(HDC_TIME_US);
                }
            }
            State::RDone => {
                if !self.dma_enabled() {
                    *self.sector_buf = *self.data;
                }
                self.set_intr(pic);
            }
            _ => {}
        }
        Ok(())
    }

    fn cmd_diagnostics(&mut self, drive: Option<usize>, pic: &mut dyn InterruptController) {
        match self.state {
            State::Idle => {
                if let Some(drv) = drive {
                    if !self.drives[drv].present() {
                        self.fail(SenseCode::NotReady, pic);
                        return;
                    }
                }
                self.state = State::RDone;
                self.set_callback(HDC_LONG_DELAY_US);
            }
            State::RDone => self.set_intr(pic),
            _ => {}
        }
    }
}

impl IoDevice for XtaController {
    fn read_u8(&mut self, port: u16, _delta: DeviceRunTimeUnit) -> u8 {
        match port.wrapping_sub(self.io_base) {
            DATA_REGISTER => self.data_register_read(),
            STATUS_REGISTER => self.status & !STAT_DCB,
            // Jumpers. All open.
            SELECT_REGISTER => 0x00,
            _ => NO_IO_BYTE,
        }
    }

    fn write_u8(&mut self, port: u16, data: u8, _bus: Option<&mut BusInterface>, _delta: DeviceRunTimeUnit) {
        match port.wrapping_sub(self.io_base) {
            DATA_REGISTER => self.data_register_write(data),
            STATUS_REGISTER => self.reset_register_write(),
            SELECT_REGISTER => self.controller_select(),
            MASK_REGISTER => self.intr = data,
            _ => {}
        }
    }

    fn port_list(&self) -> Vec<(String, u16)> {
        vec![
            (format!("{} Data Register", self.name), self.io_base + DATA_REGISTER),
            (format!("{} Status/Reset Register", self.name), self.io_base + STATUS_REGISTER),
            (format!("{} Select/Jumper Register", self.name), self.io_base + SELECT_REGISTER),
            (format!("{} DMA/IRQ Mask Register", self.name), self.io_base + MASK_REGISTER),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        bus::NULL_DELTA_US,
        raw_image::MemoryImage,
        test_support::{FailingStorage, RecordingPic, SharedImage, VecDma},
    };

    const BASE: u16 = 0x320;
    const IRQ: u8 = 5;
    const FOREVER: f64 = 1.0e9;

    struct Host {
        hdc: XtaController,
        pic: RecordingPic,
        dma: VecDma,
    }

    impl Host {
        fn new(geometry: DriveGeometry) -> (Self, Rc<RefCell<MemoryImage>>) {
            let mut hdc = XtaController::with_defaults(XtaControllerType::Pc5086);
            let (storage, image) = SharedImage::new(geometry);
            hdc.attach_drive(0, storage).unwrap();
            (
                Self {
                    hdc,
                    pic: RecordingPic::default(),
                    dma: VecDma::default(),
                },
                image,
            )
        }

        fn out(&mut self, reg: u16, data: u8) {
            self.hdc.write_u8(BASE + reg, data, None, NULL_DELTA_US);
        }

        fn inp(&mut self, reg: u16) -> u8 {
            self.hdc.read_u8(BASE + reg, NULL_DELTA_US)
        }

        fn command(&mut self, dcb: [u8; DCB_LEN], mask: u8) {
            self.out(MASK_REGISTER, mask);
            self.out(SELECT_REGISTER, 0);
            for byte in dcb {
                assert_ne!(self.inp(STATUS_REGISTER) & STAT_REQ, 0);
                self.out(DATA_REGISTER, byte);
            }
        }

        fn run(&mut self, us: f64) -> Result<(), DeviceFault> {
            self.hdc.run(us, &mut self.pic, &mut self.dma)
        }

        fn completion(&mut self) -> u8 {
            assert_eq!(self.hdc.state(), State::Compl);
            self.inp(DATA_REGISTER)
        }

        /// Run a command with no data phase to completion.
        fn execute(&mut self, dcb: [u8; DCB_LEN], mask: u8) -> u8 {
            self.command(dcb, mask);
            self.run(FOREVER).unwrap();
            self.completion()
        }

        fn read_pio(&mut self, len: usize) -> Vec<u8> {
            assert_eq!(self.hdc.state(), State::SData);
            (0..len).map(|_| self.inp(DATA_REGISTER)).collect()
        }

        fn write_pio(&mut self, data: &[u8]) {
            assert_eq!(self.hdc.state(), State::RData);
            for &byte in data {
                self.out(DATA_REGISTER, byte);
            }
        }
    }

    fn dcb(cmd: u8, drive: u8, cyl: u16, head: u8, sector: u8, count: u8) -> [u8; DCB_LEN] {
        [
            cmd,
            (drive << 5) | head,
            (((cyl >> 8) as u8) << 6) | sector,
            cyl as u8,
            count,
            0,
        ]
    }

    fn pattern(seed: usize) -> Vec<u8> {
        (0..SECTOR_SIZE).map(|i| (i as u8).wrapping_mul(7) ^ seed as u8).collect()
    }

    fn sector(image: &Rc<RefCell<MemoryImage>>, lba: usize) -> Vec<u8> {
        image.borrow().data()[lba * SECTOR_SIZE..(lba + 1) * SECTOR_SIZE].to_vec()
    }

    fn geometry() -> DriveGeometry {
        DriveGeometry::xt(20, 2, 17)
    }

    #[test]
    fn test_ready_on_absent_drive_fails() {
        let (mut host, _) = Host::new(geometry());
        host.command(dcb(0x00, 1, 0, 0, 0, 0), IRQ_ENA);
        assert_eq!(host.hdc.state(), State::Idle);
        assert_eq!(host.hdc.callback_pending(), Some(HDC_LONG_DELAY_US));

        host.run(FOREVER).unwrap();
        assert_eq!(
            host.inp(STATUS_REGISTER),
            STAT_REQ | STAT_CD | STAT_IO | STAT_BSY | STAT_IRQ
        );
        assert_eq!(host.pic.requests, vec![IRQ]);
        assert_eq!(host.completion(), COMP_DRIVE | COMP_ERR);
        assert_eq!(host.inp(STATUS_REGISTER), 0);
        assert_eq!(host.hdc.state(), State::Idle);

        // Reading the completion byte acknowledges the interrupt.
        host.run(0.0).unwrap();
        assert!(!host.pic.asserted(IRQ));
        assert_eq!(host.pic.clears, vec![IRQ]);

        host.command(dcb(0x03, 1, 0, 0, 0, 0), 0);
        host.run(FOREVER).unwrap();
        let sense = host.read_pio(4);
        assert_eq!(sense[0], SenseCode::NotReady as u8);
        assert_eq!(sense[1], COMP_DRIVE);
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), COMP_DRIVE);
        assert_eq!(host.hdc.sense(), SenseCode::NoError);
    }

    #[test]
    fn callback_fires_when_deadline_is_reached() {
        let (mut host, _) = Host::new(geometry());
        host.command(dcb(0x00, 0, 0, 0, 0, 0), 0);
        host.run(100.0).unwrap();
        assert_eq!(host.hdc.callback_pending(), Some(HDC_LONG_DELAY_US - 100.0));
        assert_eq!(host.hdc.state(), State::Idle);
        host.run(HDC_LONG_DELAY_US - 100.0).unwrap();
        assert_eq!(host.hdc.callback_pending(), None);
        assert_eq!(host.completion(), 0);
        assert!(host.pic.requests.is_empty());
    }

    #[test]
    fn sector_addressing_walks_the_whole_drive() {
        let (mut host, _) = Host::new(geometry());
        let hdc = &mut host.hdc;

        hdc.do_seek(0, 5);
        hdc.head = 1;
        hdc.sector = 16;
        assert_eq!(hdc.get_sector(0), Some(203));
        hdc.next_sector(0);
        assert_eq!((hdc.track, hdc.head, hdc.sector), (6, 0, 0));
        assert_eq!(hdc.drive_cylinder(0), Some(6));
        assert_eq!(hdc.get_sector(0), Some(204));

        hdc.head = 2;
        assert_eq!(hdc.get_sector(0), None);
        assert_eq!(hdc.sense(), SenseCode::IllegalAddress);
        hdc.head = 0;
        hdc.sector = 17;
        assert_eq!(hdc.get_sector(0), None);
        hdc.sector = 0;
        hdc.track = 7;
        assert_eq!(hdc.get_sector(0), None);

        hdc.do_seek(0, 0);
        hdc.head = 0;
        hdc.sector = 0;
        for lba in 0..geometry().total_sectors() {
            assert_eq!(hdc.get_sector(0), Some(lba));
            hdc.next_sector(0);
        }
        // The head stops at the last cylinder.
        assert_eq!(hdc.track, 20);
        assert_eq!(hdc.drive_cylinder(0), Some(19));

        hdc.do_seek(0, 25);
        assert_eq!(hdc.drive_cylinder(0), Some(19));
        assert_eq!(hdc.get_sector(0), None);
    }

    #[test]
    fn pio_read_crosses_cylinder_boundary() {
        let (mut host, image) = Host::new(geometry());
        for lba in [203, 204] {
            image.borrow_mut().write_sector(lba, &pattern(lba)).unwrap();
        }

        host.command(dcb(0x08, 0, 5, 1, 16, 2), 0);
        host.run(FOREVER).unwrap();
        for lba in [203, 204] {
            assert_eq!(host.inp(STATUS_REGISTER) & (STAT_IO | STAT_REQ), STAT_IO | STAT_REQ);
            assert_eq!(host.read_pio(SECTOR_SIZE), pattern(lba));
            assert_eq!(host.hdc.state(), State::SDone);
            host.run(FOREVER).unwrap();
        }
        assert_eq!(host.completion(), 0);
        assert!(host.pic.requests.is_empty());
        assert_eq!(host.hdc.drive_cylinder(0), Some(6));
    }

    #[test]
    fn pio_write_then_read_returns_same_data() {
        let (mut host, image) = Host::new(geometry());

        host.command(dcb(0x0A, 0, 3, 0, 4, 1), 0);
        host.run(FOREVER).unwrap();
        assert_ne!(host.inp(STATUS_REGISTER) & STAT_REQ, 0);
        host.write_pio(&pattern(99));
        assert_eq!(host.hdc.state(), State::RDone);
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);
        assert_eq!(sector(&image, (3 * 2) * 17 + 4), pattern(99));

        host.command(dcb(0x08, 0, 3, 0, 4, 1), 0);
        host.run(FOREVER).unwrap();
        assert_eq!(host.read_pio(SECTOR_SIZE), pattern(99));
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);
    }

    #[test]
    fn dma_read_with_zero_count_transfers_256_sectors() {
        let (mut host, image) = Host::new(geometry());
        for lba in 0..256 {
            image.borrow_mut().write_sector(lba, &pattern(lba)).unwrap();
        }

        host.command(dcb(0x08, 0, 0, 0, 0, 0), IRQ_ENA | DMA_ENA);
        host.run(FOREVER).unwrap();
        assert_eq!(host.dma.from_device.len(), 256 * SECTOR_SIZE);
        for (lba, chunk) in host.dma.from_device.chunks(SECTOR_SIZE).enumerate() {
            assert_eq!(chunk, &pattern(lba)[..]);
        }
        assert!(host.dma.channels.iter().all(|&ch| ch == 3));
        assert_eq!(host.pic.requests, vec![IRQ]);
        assert_eq!(host.completion(), 0);
    }

    #[test]
    fn read_verify_transfers_nothing() {
        let (mut host, _) = Host::new(geometry());
        assert_eq!(host.execute(dcb(0x05, 0, 2, 1, 0, 18), DMA_ENA), 0);
        assert!(host.dma.from_device.is_empty());
        assert_eq!(host.hdc.drive_cylinder(0), Some(3));
    }

    #[test]
    fn dma_underrun_resumes_where_it_stopped() {
        let (mut host, image) = Host::new(geometry());
        image.borrow_mut().write_sector(0, &pattern(0)).unwrap();

        host.dma.limit = Some(100);
        host.command(dcb(0x08, 0, 0, 0, 0, 1), DMA_ENA);
        assert_eq!(
            host.run(FOREVER),
            Err(DeviceFault::DmaUnderrun {
                command: "READ_SECTORS",
                index: 100,
                len: SECTOR_SIZE,
            })
        );
        let mask = STAT_CD | STAT_IO | STAT_REQ;
        assert_eq!(host.inp(STATUS_REGISTER) & mask, mask);
        assert_eq!(host.hdc.callback_pending(), Some(HDC_TIME_US));

        host.dma.limit = None;
        host.run(FOREVER).unwrap();
        assert_eq!(host.dma.from_device, pattern(0));
        assert_eq!(host.completion(), 0);
    }

    #[test]
    fn dma_write_sectors() {
        let (mut host, image) = Host::new(geometry());
        let payload = [pattern(7), pattern(8)].concat();
        host.dma = VecDma::with_data(&payload[..300]);

        host.command(dcb(0x0A, 0, 0, 0, 7, 2), DMA_ENA);
        assert_eq!(
            host.run(FOREVER),
            Err(DeviceFault::DmaUnderrun {
                command: "WRITE_SECTORS",
                index: 300,
                len: SECTOR_SIZE,
            })
        );
        host.dma.to_device.extend(&payload[300..]);
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);
        assert!(host.dma.to_device.is_empty());
        assert_eq!(sector(&image, 7), pattern(7));
        assert_eq!(sector(&image, 8), pattern(8));
    }

    #[test]
    fn reset_aborts_transfer() {
        let (mut host, _) = Host::new(geometry());
        host.command(dcb(0x08, 0, 0, 0, 0, 4), 0);
        host.run(FOREVER).unwrap();
        host.read_pio(10);

        host.out(STATUS_REGISTER, 0);
        assert_eq!(host.hdc.state(), State::Idle);
        assert_eq!(host.inp(STATUS_REGISTER), 0);
        assert_eq!(host.hdc.callback_pending(), None);
        assert_eq!(host.inp(DATA_REGISTER), NO_IO_BYTE);

        // A DMA transfer waiting on its callback is cancelled as well.
        host.command(dcb(0x08, 0, 0, 0, 0, 1), DMA_ENA);
        host.run(HDC_LONG_DELAY_US).unwrap();
        assert!(host.hdc.callback_pending().is_some());
        host.out(STATUS_REGISTER, 0);
        host.run(FOREVER).unwrap();
        assert!(host.dma.from_device.is_empty());

        assert_eq!(host.execute(dcb(0x00, 0, 0, 0, 0, 0), 0), 0);
    }

    #[test]
    fn protocol_violations_are_reported() {
        let (mut host, _) = Host::new(geometry());

        // Data reads outside a send state are illegal and float.
        assert_eq!(host.inp(DATA_REGISTER), NO_IO_BYTE);
        assert_eq!(host.hdc.state(), State::Idle);
        assert_eq!(host.hdc.sense(), SenseCode::IllegalCommand);

        // Reading sense reports the code and clears it; an idle data write sets it again.
        host.command(dcb(0x03, 0, 0, 0, 0, 0), 0);
        host.run(FOREVER).unwrap();
        assert_eq!(host.read_pio(4)[0], SenseCode::IllegalCommand as u8);
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);
        assert_eq!(host.hdc.sense(), SenseCode::NoError);
        host.out(DATA_REGISTER, 0x55);
        assert_eq!(host.hdc.state(), State::Idle);
        assert_eq!(host.hdc.sense(), SenseCode::IllegalCommand);

        // A DMA write sector buffer does not request data from the host.
        host.command(dcb(0x0F, 0, 0, 0, 0, 0), DMA_ENA);
        host.run(HDC_LONG_DELAY_US).unwrap();
        assert_eq!(host.hdc.state(), State::RData);
        assert_eq!(host.inp(STATUS_REGISTER) & STAT_REQ, 0);
        host.out(DATA_REGISTER, 0xAA);
        assert_eq!(host.hdc.sense(), SenseCode::IllegalCommand);
    }

    #[test]
    fn irq_zero_is_never_raised() {
        let desc = XtaControllerType::Pc5086.descriptor();
        let mut hdc = XtaController::new(
            XtaControllerType::Pc5086,
            &XtaResources {
                io_base: BASE,
                irq: 0,
                dma: desc.dma,
                spt: desc.spt,
                rom_address: None,
            },
        );
        let (storage, _image) = SharedImage::new(geometry());
        hdc.attach_drive(0, storage).unwrap();
        let mut host = Host {
            hdc,
            pic: RecordingPic::default(),
            dma: VecDma::default(),
        };

        assert_eq!(host.execute(dcb(0x00, 0, 0, 0, 0, 0), IRQ_ENA), 0);
        host.run(0.0).unwrap();
        assert!(host.pic.requests.is_empty());
        assert!(host.pic.clears.is_empty());
    }

    #[test]
    fn storage_errors_map_to_sense_codes() {
        let mut hdc = XtaController::with_defaults(XtaControllerType::Pc5086);
        hdc.attach_drive(0, Box::new(FailingStorage(geometry()))).unwrap();
        let mut host = Host {
            hdc,
            pic: RecordingPic::default(),
            dma: VecDma::default(),
        };

        assert_eq!(host.execute(dcb(0x08, 0, 0, 0, 0, 1), 0), COMP_ERR);
        assert_eq!(host.hdc.sense(), SenseCode::Data);

        host.command(dcb(0x0A, 0, 0, 0, 0, 1), 0);
        host.run(FOREVER).unwrap();
        host.write_pio(&pattern(1));
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), COMP_ERR);
        assert_eq!(host.hdc.sense(), SenseCode::WriteFault);
    }

    #[test]
    fn set_drive_params_overrides_geometry() {
        let (mut host, _) = Host::new(geometry());
        host.command(dcb(0x0C, 0, 0, 0, 0, 0), 0);
        host.run(FOREVER).unwrap();
        assert_ne!(host.inp(STATUS_REGISTER) & STAT_REQ, 0);
        host.write_pio(&[0x00, 0x0A, 0x04, 0x00, 0x0A, 0x00, 0x05, 0x0B]);
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);
        assert_eq!(host.hdc.drive_geometry(0), Some(DriveGeometry::xt(10, 4, 17)));

        host.hdc.reset_geometry(0).unwrap();
        assert_eq!(host.hdc.drive_geometry(0), Some(geometry()));

        // Sectors per track always come from the controller.
        let mut hdc = XtaController::with_defaults(XtaControllerType::T1200);
        hdc.attach_drive(0, Box::new(MemoryImage::new(geometry()))).unwrap();
        let mut host = Host {
            hdc,
            pic: RecordingPic::default(),
            dma: VecDma::default(),
        };
        host.command(dcb(0x0C, 0, 0, 0, 0, 0), 0);
        host.run(FOREVER).unwrap();
        host.write_pio(&[0x01, 0x00, 0x02, 0, 0, 0, 0, 0]);
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);
        assert_eq!(host.hdc.drive_geometry(0), Some(DriveGeometry::xt(256, 2, 34)));
    }

    #[test]
    fn seek_and_sense_report_cylinder() {
        let (mut host, _) = Host::new(geometry());
        assert_eq!(host.execute(dcb(0x0B, 0, 25, 0, 0, 0), 0), COMP_ERR);
        assert_eq!(host.hdc.sense(), SenseCode::Seek);
        assert_eq!(host.hdc.drive_cylinder(0), Some(19));
        assert_eq!(host.execute(dcb(0x0B, 0, 12, 0, 0, 0), 0), 0);
        assert_eq!(host.hdc.drive_cylinder(0), Some(12));
        assert_eq!(host.execute(dcb(0x01, 0, 0, 0, 0, 0), 0), 0);
        assert_eq!(host.hdc.drive_cylinder(0), Some(0));

        let (mut host, _) = Host::new(DriveGeometry::xt(0x150, 1, 17));
        assert_eq!(host.execute(dcb(0x0B, 0, 0x14A, 0, 0, 0), 0), 0);
        host.command(dcb(0x03, 0, 0, 0, 0, 0), 0);
        host.run(FOREVER).unwrap();
        assert_eq!(host.read_pio(4), vec![0x00, 0x00, 0x40, 0x4A]);
    }

    #[test]
    fn format_writes_sector_buffer() {
        let (mut host, image) = Host::new(geometry());

        host.command(dcb(0x0F, 0, 0, 0, 0, 0), 0);
        host.run(FOREVER).unwrap();
        host.write_pio(&[0xE5; SECTOR_SIZE]);
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);

        assert_eq!(host.execute(dcb(0x06, 0, 3, 1, 0, 0), 0), 0);
        let track = (3 * 2 + 1) * 17;
        for lba in track..track + 17 {
            assert!(sector(&image, lba).iter().all(|&b| b == 0xE5));
        }
        assert!(sector(&image, track - 1).iter().all(|&b| b == 0));
        assert!(sector(&image, track + 17).iter().all(|&b| b == 0));

        assert_eq!(host.execute(dcb(0x06, 0, 3, 2, 0, 0), 0), COMP_ERR);
        assert_eq!(host.hdc.sense(), SenseCode::IllegalAddress);

        let (mut host, image) = Host::new(DriveGeometry::xt(4, 2, 17));
        host.command(dcb(0x0F, 0, 0, 0, 0, 0), 0);
        host.run(FOREVER).unwrap();
        host.write_pio(&[0x6C; SECTOR_SIZE]);
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);
        assert_eq!(host.execute(dcb(0x04, 0, 0, 0, 0, 0), 0), 0);
        assert!(image.borrow().data().iter().all(|&b| b == 0x6C));
        assert_eq!(host.hdc.drive_cylinder(0), Some(3));
    }

    #[test]
    fn sector_buffer_round_trips_over_dma() {
        let (mut host, _) = Host::new(geometry());
        host.dma = VecDma::with_data(&pattern(1));
        assert_eq!(host.execute(dcb(0x0F, 0, 0, 0, 0, 0), DMA_ENA), 0);
        assert_eq!(host.execute(dcb(0x0E, 0, 0, 0, 0, 0), DMA_ENA), 0);
        assert_eq!(host.dma.from_device, pattern(1));

        host.command(dcb(0x0E, 0, 0, 0, 0, 0), 0);
        host.run(FOREVER).unwrap();
        assert_eq!(host.read_pio(SECTOR_SIZE), pattern(1));
        host.run(FOREVER).unwrap();
        assert_eq!(host.completion(), 0);
    }

    #[test]
    fn unsupported_commands_are_illegal() {
        let (mut host, _) = Host::new(geometry());
        for opcode in [0x02, 0x07, 0x0D, 0xE5, 0xE6, 0xFF] {
            assert_eq!(host.execute(dcb(opcode, 0, 0, 0, 0, 0), 0), COMP_ERR);
            assert_eq!(host.hdc.sense(), SenseCode::IllegalCommand);
        }
    }

    #[test]
    fn diagnostics_take_long_delay() {
        let (mut host, _) = Host::new(geometry());
        host.command(dcb(0xE4, 0, 0, 0, 0, 0), IRQ_ENA);
        host.run(HDC_LONG_DELAY_US).unwrap();
        assert_eq!(host.hdc.state(), State::RDone);
        host.run(HDC_LONG_DELAY_US - 1.0).unwrap();
        assert_eq!(host.hdc.state(), State::RDone);
        assert!(host.pic.requests.is_empty());
        host.run(1.0).unwrap();
        assert_eq!(host.pic.requests, vec![IRQ]);
        assert_eq!(host.completion(), 0);

        assert_eq!(host.execute(dcb(0xE3, 1, 0, 0, 0, 0), 0), COMP_DRIVE | COMP_ERR);
        assert_eq!(host.hdc.sense(), SenseCode::NotReady);
        assert_eq!(host.execute(dcb(0xE0, 0, 0, 0, 0, 0), 0), 0);
    }

    #[test]
    fn drive_attachment() {
        let mut hdc = XtaController::with_defaults(XtaControllerType::Wdxt150);
        assert!(matches!(
            hdc.attach_drive(2, Box::new(MemoryImage::new(geometry()))),
            Err(ControllerError::InvalidDevice(2))
        ));
        assert!(matches!(
            hdc.attach_drive(0, Box::new(MemoryImage::new(DriveGeometry::xt(0, 2, 17)))),
            Err(ControllerError::UnsupportedGeometry(_))
        ));
        hdc.attach_drive(1, Box::new(MemoryImage::new(geometry()))).unwrap();
        assert!(hdc.drive_present(1));
        assert!(!hdc.drive_present(0));
        assert!(hdc.detach_drive(1).unwrap().is_some());
        assert!(!hdc.drive_present(1));
        assert!(hdc.close().is_ok());
        assert_eq!(hdc.rom_address(), Some(0xC8000));
    }
}
