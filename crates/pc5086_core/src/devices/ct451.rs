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

    devices::ct451.rs

    Implementation of the register interface of the Chips & Technologies
    82C451 VGA controller: the setup registers, the extension (XR)
    registers and the CRTC with its group 0 write protection.

    Rendering is not implemented. Standard VGA registers other than the
    CRTC and the miscellaneous output register read as open bus.

*/

use crate::{
    bus::{BusInterface, DeviceRunTimeUnit, IoDevice, NO_IO_BYTE},
    machine_types::{CT451_ROM_ADDRESS, CT451_ROM_SIZE},
};

pub const CT451_SLEEP_REGISTER: u16 = 0x102;
pub const CT451_XENA_REGISTER: u16 = 0x103;
pub const CT451_GLOBAL_ID_REGISTER: u16 = 0x104;
pub const CT451_SETUP_CONTROL_REGISTER: u16 = 0x46E8;

pub const CRTC_INDEX_REGISTER: u16 = 0x3D4;
pub const CRTC_DATA_REGISTER: u16 = 0x3D5;
pub const XR_INDEX_REGISTER: u16 = 0x3D6;
pub const XR_DATA_REGISTER: u16 = 0x3D7;
pub const MISC_OUTPUT_WRITE_REGISTER: u16 = 0x3C2;
pub const MISC_OUTPUT_READ_REGISTER: u16 = 0x3CC;

const SETUP_PORT_FIRST: u16 = 0x100;
const SETUP_PORT_LAST: u16 = 0x104;
const VGA_PORT_FIRST: u16 = 0x3B0;
const VGA_PORT_LAST: u16 = 0x3DF;

const GLOBAL_ID: u8 = 0xA5;
const CRTC_LAST_REGISTER: u8 = 0x18;
const CRTC_INDEX_MASK: u8 = 0x3F;
const XR_INDEX_MASK: u8 = 0x7F;
const XR_REG_COUNT: usize = 128;

const SETUP_VGA_ENABLE: u8 = 0x08;
const SETUP_MODE: u8 = 0x10;
const XENA_XR_ENABLE: u8 = 0x80;
const XENA_XR_MONO: u8 = 0x40;
const MISC_COLOR: u8 = 0x01;

const CR_VRETRACE_END: usize = 0x11;
const CR_OVERFLOW: usize = 0x07;
const CR_PROTECT: u8 = 0x80;
const XR_PROTECT: usize = 0x15;
const XR_PROTECT_GROUP0: u8 = 0x40;
// The only CR07 bit not covered by group 0 protection (line compare bit 8)
const CR07_UNPROTECTED: u8 = 0x10;

pub struct Ct451 {
    sleep: u8,
    xena: u8,
    setup: u8,
    xr_index: u8,
    xregs: [u8; XR_REG_COUNT],
    crtc_index: u8,
    crtc: [u8; 32],
    misc_out: u8,
    vram_kb: u32,
}

impl Ct451 {
    pub fn new(vram_kb: u32) -> Self {
        let mut xregs = [0; XR_REG_COUNT];
        xregs[0x00] = 0x04; // Chip version
        xregs[0x01] = 0x5A; // DIP switches
        xregs[0x28] = 0x02; // Video interface
        Self {
            sleep: 0,
            xena: 0,
            setup: 0,
            xr_index: 0,
            xregs,
            crtc_index: 0,
            crtc: [0; 32],
            misc_out: 0,
            vram_kb,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.vram_kb);
    }

    pub fn rom_address(&self) -> usize {
        CT451_ROM_ADDRESS
    }

    pub fn rom_size(&self) -> usize {
        CT451_ROM_SIZE
    }

    pub fn vram_kb(&self) -> u32 {
        self.vram_kb
    }

    pub fn vga_enabled(&self) -> bool {
        self.setup & SETUP_VGA_ENABLE != 0
    }

    pub fn crtc(&self, reg: u8) -> u8 {
        self.crtc[(reg & 0x1F) as usize]
    }

    pub fn xreg(&self, reg: u8) -> u8 {
        self.xregs[(reg & XR_INDEX_MASK) as usize]
    }

    pub fn misc_out(&self) -> u8 {
        self.misc_out
    }

    fn group0_protected(&self) -> bool {
        self.crtc[CR_VRETRACE_END] & CR_PROTECT != 0 || self.xregs[XR_PROTECT] & XR_PROTECT_GROUP0 != 0
    }

    /// Resolve a port to the register it addresses, or None if the VGA is disabled and the port
    /// belongs to it. The XR registers follow XENA bit 6 between 0x3D6 and 0x3B6; other color
    /// and mono ports follow the miscellaneous output register.
    fn decode(&self, port: u16) -> Option<u16> {
        if !self.vga_enabled() && (port & 0xFF00) == 0x300 {
            return None;
        }
        let base = port & 0xFFFE;
        if base == XR_INDEX_REGISTER || base == 0x3B6 {
            if self.xena & XENA_XR_MONO != 0 {
                return Some(port ^ 0x60);
            }
        }
        else if ((port & 0xFFF0) == 0x3D0 || (port & 0xFFF0) == 0x3B0) && self.misc_out & MISC_COLOR == 0 {
            return Some(port ^ 0x60);
        }
        Some(port)
    }

    fn crtc_write(&mut self, val: u8) {
        let reg = self.crtc_index;
        if reg > CRTC_LAST_REGISTER {
            log::trace!("CT451: write to undocumented CRTC register {:02X}", reg);
            return;
        }
        let reg = reg as usize;
        let protected = self.group0_protected();
        if reg < CR_OVERFLOW && protected {
            return;
        }
        let val = if reg == CR_OVERFLOW && protected {
            (self.crtc[CR_OVERFLOW] & !CR07_UNPROTECTED) | (val & CR07_UNPROTECTED)
        }
        else {
            val
        };

        let old = self.crtc[reg];
        self.crtc[reg] = val;
        if old != val && !(0x0E..=0x10).contains(&reg) {
            log::trace!("CT451: CRTC timing register {:02X} -> {:02X}", reg, val);
        }
    }
}

impl IoDevice for Ct451 {
    fn read_u8(&mut self, port: u16, _delta: DeviceRunTimeUnit) -> u8 {
        let Some(addr) = self.decode(port)
        else {
            return NO_IO_BYTE;
        };
        match addr {
            CT451_SLEEP_REGISTER => self.sleep,
            CT451_XENA_REGISTER if self.setup & SETUP_MODE != 0 => self.xena,
            CT451_GLOBAL_ID_REGISTER => GLOBAL_ID,
            CRTC_INDEX_REGISTER => self.crtc_index,
            CRTC_DATA_REGISTER => {
                if self.crtc_index > CRTC_LAST_REGISTER {
                    log::trace!("CT451: read from undocumented CRTC register {:02X}", self.crtc_index);
                    NO_IO_BYTE
                }
                else {
                    self.crtc(self.crtc_index)
                }
            }
            XR_INDEX_REGISTER if self.xena & XENA_XR_ENABLE != 0 => self.xr_index,
            XR_DATA_REGISTER if self.xena & XENA_XR_ENABLE != 0 => self.xregs[self.xr_index as usize],
            MISC_OUTPUT_READ_REGISTER => self.misc_out,
            _ => NO_IO_BYTE,
        }
    }

    fn write_u8(&mut self, port: u16, data: u8, _bus: Option<&mut BusInterface>, _delta: DeviceRunTimeUnit) {
        let Some(addr) = self.decode(port)
        else {
            return;
        };
        match addr {
            CT451_SLEEP_REGISTER => self.sleep = data,
            CT451_XENA_REGISTER => {
                if self.setup & SETUP_MODE != 0 {
                    self.xena = data;
                }
            }
            CRTC_INDEX_REGISTER => self.crtc_index = data & CRTC_INDEX_MASK,
            CRTC_DATA_REGISTER => self.crtc_write(data),
            XR_INDEX_REGISTER => {
                if self.xena & XENA_XR_ENABLE != 0 {
                    self.xr_index = data & XR_INDEX_MASK;
                }
            }
            XR_DATA_REGISTER => {
                if self.xena & XENA_XR_ENABLE != 0 {
                    self.xregs[self.xr_index as usize] = data;
                }
            }
            CT451_SETUP_CONTROL_REGISTER => {
                self.setup = data;
                log::debug!(
                    "CT451: setup {:02X} (VGA {})",
                    data,
                    if self.vga_enabled() { "enabled" } else { "disabled" }
                );
            }
            MISC_OUTPUT_WRITE_REGISTER => self.misc_out = data,
            _ => {}
        }
    }

    fn port_list(&self) -> Vec<(String, u16)> {
        let mut ports: Vec<(String, u16)> = (SETUP_PORT_FIRST..=SETUP_PORT_LAST)
            .map(|port| (String::from("CT451 Setup Register"), port))
            .collect();
        ports.extend((VGA_PORT_FIRST..=VGA_PORT_LAST).map(|port| (String::from("CT451 VGA Register"), port)));
        ports.push((String::from("CT451 Setup Control Register"), CT451_SETUP_CONTROL_REGISTER));
        ports
    }
}
