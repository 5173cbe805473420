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

    selftest.rs

    A scripted disk controller self-test, driven through IO ports the way a
    BIOS would: check the drive is ready, read sense, then read sectors by programmed
    IO or DMA.

*/

use anyhow::{bail, Error};

use pc5086_core::{
    bus::BusInterface,
    device_traits::{dma::DmaChannel, pic::InterruptController},
    devices::hdc::{
        xta::{DATA_REGISTER, HDC_TIME_US, MASK_REGISTER, SELECT_REGISTER, STATUS_REGISTER},
        xta_dcb::{COMP_ERR, DCB_LEN, DMA_ENA, IRQ_ENA, STAT_CD, STAT_IO, STAT_REQ},
        SECTOR_SIZE,
    },
};

const CMD_TEST_READY: u8 = 0x00;
const CMD_READ_SENSE: u8 = 0x03;
const CMD_READ_SECTORS: u8 = 0x08;

pub const SENSE_LEN: usize = 4;
/// Where DMA transfers land in conventional memory.
pub const DMA_BUFFER_ADDRESS: usize = 0x0600;
// Polling gives up after this many controller ticks without progress.
const MAX_IDLE_TICKS: usize = 10_000;

/// An interrupt controller that only remembers which lines are raised.
#[derive(Default)]
pub struct HostPic {
    lines: u16,
    pub requests: usize,
}

impl HostPic {
    pub fn is_raised(&self, irq: u8) -> bool {
        self.lines & (1 << irq) != 0
    }
}

impl InterruptController for HostPic {
    fn request_interrupt(&mut self, irq: u8) {
        log::trace!("IRQ {} raised", irq);
        self.lines |= 1 << irq;
        self.requests += 1;
    }

    fn clear_interrupt(&mut self, irq: u8) {
        log::trace!("IRQ {} lowered", irq);
        self.lines &= !(1 << irq);
    }
}

/// A DMA channel that collects device-to-memory transfers into a buffer.
#[derive(Default)]
pub struct HostDma {
    pub buffer: Vec<u8>,
}

impl DmaChannel for HostDma {
    fn dma_write_u8(&mut self, _channel: usize, data: u8) -> bool {
        self.buffer.push(data);
        true
    }

    fn dma_read_u8(&mut self, _channel: usize) -> Option<u8> {
        None
    }
}

/// Where and how the self-test reads.
#[derive(Copy, Clone, Debug)]
pub struct SelfTestParams {
    pub drive: usize,
    pub cylinder: u16,
    pub head: u8,
    pub sector: u8,
    pub count: u8,
    pub dma: bool,
}

impl SelfTestParams {
    /// The number of sectors a read transfers. A count of 0 means 256.
    pub fn sectors(&self) -> usize {
        match self.count {
            0 => 256,
            n => n as usize,
        }
    }
}

#[derive(Debug, Default)]
pub struct SelfTestReport {
    pub ready: bool,
    pub ready_completion: u8,
    pub read_completion: u8,
    pub sense: [u8; SENSE_LEN],
    pub data: Vec<u8>,
    pub interrupts: usize,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.ready && self.read_completion & COMP_ERR == 0
    }
}

struct Host<'a> {
    bus: &'a mut BusInterface,
    base: u16,
    irq: u8,
    pic: HostPic,
    dma: HostDma,
}

impl Host<'_> {
    fn status(&mut self) -> u8 {
        self.bus.io_read_u8(self.base + STATUS_REGISTER)
    }

    fn tick(&mut self) -> Result<(), Error> {
        self.bus.run_devices(HDC_TIME_US, &mut self.pic, &mut self.dma)?;
        Ok(())
    }

    /// Select the controller and send a Device Control Block.
    fn send_dcb(&mut self, dcb: [u8; DCB_LEN], mask: u8) -> Result<(), Error> {
        self.bus.io_write_u8(self.base + MASK_REGISTER, mask);
        self.bus.io_write_u8(self.base + SELECT_REGISTER, 0);
        for byte in dcb {
            let mut idle = 0;
            while self.status() & (STAT_REQ | STAT_CD | STAT_IO) != (STAT_REQ | STAT_CD) {
                idle += 1;
                if idle > MAX_IDLE_TICKS {
                    bail!("Controller never asked for command byte (status {:02X})", self.status());
                }
                self.tick()?;
            }
            self.bus.io_write_u8(self.base + DATA_REGISTER, byte);
        }
        Ok(())
    }

    /// Run a command to completion, collecting any data the controller sends by programmed IO.
    /// Returns the data and the completion byte.
    fn transact(&mut self, dcb: [u8; DCB_LEN], mask: u8) -> Result<(Vec<u8>, u8), Error> {
        self.send_dcb(dcb, mask)?;

        let mut data = Vec::new();
        let mut idle = 0;
        loop {
            let status = self.status();
            match status & (STAT_REQ | STAT_CD | STAT_IO) {
                s if s == STAT_REQ | STAT_IO => {
                    data.push(self.bus.io_read_u8(self.base + DATA_REGISTER));
                    idle = 0;
                }
                s if s == STAT_REQ | STAT_CD | STAT_IO => {
                    let completion = self.bus.io_read_u8(self.base + DATA_REGISTER);
                    // Let the controller lower its interrupt line.
                    self.tick()?;
                    return Ok((data, completion));
                }
                _ => {
                    idle += 1;
                    if idle > MAX_IDLE_TICKS {
                        bail!("Command {:02X} timed out (status {:02X})", dcb[0], status);
                    }
                    self.tick()?;
                }
            }
        }
    }
}

fn dcb(cmd: u8, drive: usize, cylinder: u16, head: u8, sector: u8, count: u8) -> [u8; DCB_LEN] {
    [
        cmd,
        ((drive as u8 & 1) << 5) | (head & 0x1F),
        (((cylinder >> 8) as u8 & 0x03) << 6) | (sector & 0x3F),
        cylinder as u8,
        count,
        0,
    ]
}

/// Run the self-test against the XTA controller installed on the bus.
pub fn run_selftest(bus: &mut BusInterface, params: &SelfTestParams) -> Result<SelfTestReport, Error> {
    let Some(xta) = bus.xta()
    else {
        bail!("No XTA controller is installed");
    };
    let base = xta.io_base();
    let irq = xta.irq();
    log::info!("Self-test: {} at {:04X}, IRQ {}", xta.name(), base, irq);

    let mut host = Host {
        bus,
        base,
        irq,
        pic: HostPic::default(),
        dma: HostDma::default(),
    };
    let mut report = SelfTestReport::default();

    let (_, completion) = host.transact(dcb(CMD_TEST_READY, params.drive, 0, 0, 0, 0), IRQ_ENA)?;
    report.ready_completion = completion;
    report.ready = completion & COMP_ERR == 0;
    log::info!("Self-test: drive {} ready: {}", params.drive, report.ready);

    if report.ready {
        let mask = if params.dma { IRQ_ENA | DMA_ENA } else { IRQ_ENA };
        let (data, completion) = host.transact(
            dcb(
                CMD_READ_SECTORS,
                params.drive,
                params.cylinder,
                params.head,
                params.sector,
                params.count,
            ),
            mask,
        )?;
        report.read_completion = completion;
        report.data = if params.dma {
            let data = std::mem::take(&mut host.dma.buffer);
            host.bus.copy_from(&data, DMA_BUFFER_ADDRESS, false)?;
            data
        }
        else {
            data
        };
        log::info!(
            "Self-test: read {} of {} bytes by {}, completion {:02X}",
            report.data.len(),
            params.sectors() * SECTOR_SIZE,
            if params.dma { "DMA" } else { "PIO" },
            completion
        );
    }

    let (sense, _) = host.transact(dcb(CMD_READ_SENSE, params.drive, 0, 0, 0, 0), 0)?;
    for (dst, src) in report.sense.iter_mut().zip(sense) {
        *dst = src;
    }
    log::info!("Self-test: sense {:02X?}", report.sense);

    if host.pic.is_raised(host.irq) {
        log::warn!("Self-test: IRQ {} still raised", host.irq);
    }
    report.interrupts = host.pic.requests;
    Ok(report)
}
