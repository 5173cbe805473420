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

    machine_types.rs

    This module manages device-related type definitions: the XTA controller
    variants and their fixed resources, and the chipset and video types.

*/

use std::{fmt, fmt::Display, str::FromStr};

use serde_derive::Deserialize;
use strum_macros::EnumIter;

use crate::machine_config::ConfigError;

pub const XTA_ROM_SIZE: usize = 0x4000;
pub const CT451_ROM_ADDRESS: usize = 0xC0000;
pub const CT451_ROM_SIZE: usize = 0x8000;

#[derive(Copy, Clone, Debug, Default, Deserialize, EnumIter, Hash, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum XtaControllerType {
    /// Western Digital WDXT-150, with BIOS and jumpers for base, IRQ and BIOS address.
    Wdxt150,
    /// Schneider EuroPC HD20.
    Hd20,
    /// Toshiba T1200 internal controller.
    T1200,
    /// Amstrad PC5086 motherboard controller.
    #[default]
    Pc5086,
}

impl FromStr for XtaControllerType {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, ConfigError>
    where
        Self: Sized,
    {
        match s.to_lowercase().as_str() {
            "wdxt150" => Ok(XtaControllerType::Wdxt150),
            "hd20" => Ok(XtaControllerType::Hd20),
            "t1200" => Ok(XtaControllerType::T1200),
            "pc5086" => Ok(XtaControllerType::Pc5086),
            _ => Err(ConfigError::BadControllerType(s.to_string())),
        }
    }
}

impl Display for XtaControllerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.descriptor().name)
    }
}

/// The fixed resources of an XTA controller variant. Where a variant offers a choice (by jumper),
/// the first entry of each list is the default.
#[derive(Copy, Clone, Debug)]
pub struct XtaControllerDescriptor {
    pub name: &'static str,
    pub io_bases: &'static [u16],
    pub irqs: &'static [u8],
    pub dma: usize,
    pub spt: u8,
    pub rom_addresses: &'static [usize],
    pub rom_file: Option<&'static str>,
}

const WDXT150_DESC: XtaControllerDescriptor = XtaControllerDescriptor {
    name: "WDXT-150",
    io_bases: &[0x320, 0x340],
    irqs: &[5, 4],
    dma: 3,
    spt: 17,
    rom_addresses: &[0xC8000, 0xCA000],
    rom_file: Some("idexywd2.bin"),
};

const HD20_DESC: XtaControllerDescriptor = XtaControllerDescriptor {
    name: "HD20",
    io_bases: &[0x320],
    irqs: &[5],
    dma: 3,
    spt: 17,
    rom_addresses: &[],
    rom_file: None,
};

const T1200_DESC: XtaControllerDescriptor = XtaControllerDescriptor {
    name: "T1200-HD",
    io_bases: &[0x320],
    irqs: &[5],
    dma: 3,
    spt: 34,
    rom_addresses: &[],
    rom_file: None,
};

const PC5086_DESC: XtaControllerDescriptor = XtaControllerDescriptor {
    name: "PC5086-HD",
    io_bases: &[0x320],
    irqs: &[5],
    dma: 3,
    spt: 17,
    rom_addresses: &[0xC8000],
    rom_file: Some("pc5086/c800.bin"),
};

impl XtaControllerType {
    pub fn descriptor(&self) -> &'static XtaControllerDescriptor {
        match self {
            XtaControllerType::Wdxt150 => &WDXT150_DESC,
            XtaControllerType::Hd20 => &HD20_DESC,
            XtaControllerType::T1200 => &T1200_DESC,
            XtaControllerType::Pc5086 => &PC5086_DESC,
        }
    }

    /// Only the WDXT-150 has jumpers. Other variants ignore configured resources.
    pub fn has_jumpers(&self) -> bool {
        matches!(self, XtaControllerType::Wdxt150)
    }
}

#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChipsetType {
    #[default]
    SuperXt,
}

impl FromStr for ChipsetType {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, ConfigError>
    where
        Self: Sized,
    {
        match s.to_lowercase().as_str() {
            "superxt" => Ok(ChipsetType::SuperXt),
            _ => Err(ConfigError::BadChipsetType(s.to_string())),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    #[default]
    Ct451,
}

impl FromStr for VideoType {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, ConfigError>
    where
        Self: Sized,
    {
        match s.to_lowercase().as_str() {
            "ct451" => Ok(VideoType::Ct451),
            _ => Err(ConfigError::BadVideoType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn controller_types_parse_case_insensitive() {
        assert_eq!("WDXT150".parse::<XtaControllerType>().unwrap(), XtaControllerType::Wdxt150);
        assert_eq!("pc5086".parse::<XtaControllerType>().unwrap(), XtaControllerType::Pc5086);
        assert!(matches!(
            "xebec".parse::<XtaControllerType>(),
            Err(ConfigError::BadControllerType(_))
        ));
    }

    #[test]
    fn controller_descriptors_are_consistent() {
        for ct in XtaControllerType::iter() {
            let desc = ct.descriptor();
            assert!(!desc.io_bases.is_empty());
            assert!(!desc.irqs.is_empty());
            assert_eq!(desc.dma, 3);
            // A ROM file always comes with somewhere to put it.
            assert_eq!(desc.rom_file.is_some(), !desc.rom_addresses.is_empty());
        }
        assert_eq!(XtaControllerType::T1200.descriptor().spt, 34);
        assert_eq!(XtaControllerType::Pc5086.to_string(), "PC5086-HD");
    }
}
