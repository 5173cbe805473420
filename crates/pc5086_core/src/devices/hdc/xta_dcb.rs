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

    devices::hdc::xta_dcb.rs

    Wire formats of the XTA controller: the Device Control Block, the drive
    parameter block, command opcodes, sense codes and register bits.

*/

use modular_bitfield::prelude::*;

pub const DCB_LEN: usize = 6;
pub const DRIVE_PARAMS_LEN: usize = 8;

// Status register bits
pub const STAT_REQ: u8 = 0x01; // Controller needs a data transfer
pub const STAT_IO: u8 = 0x02; // Transfer direction is to the host
pub const STAT_CD: u8 = 0x04; // Command (set) or data (clear) transfer
pub const STAT_BSY: u8 = 0x08;
pub const STAT_DRQ: u8 = 0x10;
pub const STAT_IRQ: u8 = 0x20;
pub const STAT_DCB: u8 = 0x80; // Internal, not visible to the host

// Completion byte bits
pub const COMP_DRIVE: u8 = 0x20;
pub const COMP_ERR: u8 = 0x02;

// DMA/IRQ enable register bits
pub const IRQ_ENA: u8 = 0x02;
pub const DMA_ENA: u8 = 0x01;

/// The six byte Device Control Block, received after a controller select.
#[bitfield]
#[derive(Copy, Clone, Debug, Default)]
pub struct Dcb {
    pub cmd: B8,
    pub head: B5,
    pub drvsel: bool,
    #[skip]
    mbz: B2,
    pub sector: B6,
    pub cyl_high: B2,
    pub cyl_low: B8,
    pub count: B8,
    pub ctrl: B8,
}

impl Dcb {
    #[inline]
    pub fn cylinder(&self) -> u16 {
        self.cyl_low() as u16 | ((self.cyl_high() as u16) << 8)
    }

    #[inline]
    pub fn drive(&self) -> usize {
        self.drvsel() as usize
    }

    /// The number of sectors to transfer. A count of 0 means 256.
    #[inline]
    pub fn sector_count(&self) -> usize {
        match self.count() {
            0 => 256,
            n => n as usize,
        }
    }
}

/// The eight byte block following a Set Drive Parameters command.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DriveParameters {
    pub cylinders: u16,
    pub heads: u8,
    pub reduced_write_cyl: u16,
    pub write_precomp_cyl: u16,
    pub max_ecc: u8,
}

impl From<&[u8; DRIVE_PARAMS_LEN]> for DriveParameters {
    fn from(b: &[u8; DRIVE_PARAMS_LEN]) -> Self {
        Self {
            cylinders: u16::from_be_bytes([b[0], b[1]]),
            heads: b[2],
            reduced_write_cyl: u16::from_be_bytes([b[3], b[4]]),
            write_precomp_cyl: u16::from_be_bytes([b[5], b[6]]),
            max_ecc: b[7],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    TestReady,
    Recalibrate,
    ReadSense,
    FormatDrive,
    ReadVerify,
    FormatTrack,
    FormatBadTrack,
    ReadSectors,
    WriteSectors,
    Seek,
    SetDriveParams,
    ReadEccBurst,
    ReadSectorBuffer,
    WriteSectorBuffer,
    RamDiagnostics,
    DriveDiagnostics,
    ControllerDiagnostics,
    ReadLong,
    WriteLong,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(opcode: u8) -> Result<Self, u8> {
        match opcode {
            0x00 => Ok(Command::TestReady),
            0x01 => Ok(Command::Recalibrate),
            0x03 => Ok(Command::ReadSense),
            0x04 => Ok(Command::FormatDrive),
            0x05 => Ok(Command::ReadVerify),
            0x06 => Ok(Command::FormatTrack),
            0x07 => Ok(Command::FormatBadTrack),
            0x08 => Ok(Command::ReadSectors),
            0x0A => Ok(Command::WriteSectors),
            0x0B => Ok(Command::Seek),
            0x0C => Ok(Command::SetDriveParams),
            0x0D => Ok(Command::ReadEccBurst),
            0x0E => Ok(Command::ReadSectorBuffer),
            0x0F => Ok(Command::WriteSectorBuffer),
            0xE0 => Ok(Command::RamDiagnostics),
            0xE3 => Ok(Command::DriveDiagnostics),
            0xE4 => Ok(Command::ControllerDiagnostics),
            0xE5 => Ok(Command::ReadLong),
            0xE6 => Ok(Command::WriteLong),
            _ => Err(opcode),
        }
    }
}

/// Sense error codes, as returned in the first byte of a Read Sense block.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, strum_macros::Display)]
pub enum SenseCode {
    #[default]
    NoError = 0x00,
    NoIndex = 0x01,
    NoSeek = 0x02,
    WriteFault = 0x03,
    NotReady = 0x04,
    NoTrack0 = 0x06,
    LongSeek = 0x08,
    IdRead = 0x10,
    Data = 0x11,
    NoMark = 0x12,
    NoSector = 0x14,
    Seek = 0x15,
    EccData = 0x18,
    BadTrack = 0x19,
    IllegalCommand = 0x20,
    IllegalAddress = 0x21,
    BadRam = 0x30,
    BadRom = 0x31,
    BadEcc = 0x32,
}
