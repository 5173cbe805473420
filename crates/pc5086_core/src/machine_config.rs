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

    machine_config.rs

    This module manages device configuration definitions, as read from the
    [xta], [chipset], [upc] and [video] sections of a configuration file.

*/

use anyhow::Context;
use serde_derive::Deserialize;

use crate::{
    device_types::geometry::DriveGeometry,
    machine_types::{ChipsetType, VideoType, XtaControllerType},
};

pub const XTA_MAX_DRIVES: usize = 2;
pub const DEFAULT_MEMORY_KB: u32 = 640;
pub const DEFAULT_VRAM_KB: u32 = 256;
pub const UPC_DEFAULT_SERIAL_IRQ: u8 = 4;
pub const UPC_DEFAULT_PARALLEL_IRQ: u8 = 7;
pub const UPC_DEFAULT_MOUSE_IRQ: u8 = 2;

const UPC_SERIAL_IRQS: [u8; 3] = [4, 3, 0];
const UPC_PARALLEL_IRQS: [u8; 3] = [7, 5, 0];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Bad value for XTA controller type: {0}")]
    BadControllerType(String),
    #[error("Bad value for chipset type: {0}")]
    BadChipsetType(String),
    #[error("Bad value for video type: {0}")]
    BadVideoType(String),
    #[error("The {controller} does not support IO base {base:#06X}")]
    BadIoBase { controller: &'static str, base: u16 },
    #[error("The {device} does not support IRQ {irq}")]
    BadIrq { device: &'static str, irq: u8 },
    #[error("The {controller} does not support BIOS address {address:#07X}")]
    BadRomAddress { controller: &'static str, address: usize },
    #[error("At most {XTA_MAX_DRIVES} drives may be attached, {0} were configured")]
    TooManyDrives(usize),
    #[error("Drive geometry must specify all of cylinders, heads and sectors")]
    IncompleteGeometry,
    #[error("EMS memory above 640K must be specified in whole 16K pages, not {0}K")]
    BadMemorySize(u32),
}

fn default_memory_kb() -> u32 {
    DEFAULT_MEMORY_KB
}
fn default_vram_kb() -> u32 {
    DEFAULT_VRAM_KB
}
fn default_serial_irq() -> u8 {
    UPC_DEFAULT_SERIAL_IRQ
}
fn default_parallel_irq() -> u8 {
    UPC_DEFAULT_PARALLEL_IRQ
}
fn default_mouse_irq() -> u8 {
    UPC_DEFAULT_MOUSE_IRQ
}

#[derive(Clone, Debug, Deserialize)]
pub struct XtaDriveConfig {
    pub image: String,
    pub cylinders: Option<u16>,
    pub heads: Option<u8>,
    pub sectors: Option<u8>,
    #[serde(default)]
    pub read_only: bool,
}

impl XtaDriveConfig {
    /// Return the explicit geometry for this drive, if one was given.
    pub fn geometry(&self) -> Result<Option<DriveGeometry>, ConfigError> {
        match (self.cylinders, self.heads, self.sectors) {
            (Some(c), Some(h), Some(s)) => Ok(Some(DriveGeometry::xt(c, h, s))),
            (None, None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteGeometry),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct XtaControllerConfig {
    #[serde(rename = "type")]
    pub xta_type: XtaControllerType,
    pub io_base: Option<u16>,
    pub irq: Option<u8>,
    pub bios_addr: Option<usize>,
    pub rom: Option<String>,
    #[serde(default)]
    pub drive: Vec<XtaDriveConfig>,
}

/// The resources an XTA controller ends up with after the configuration has been checked against
/// what its variant supports.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct XtaResources {
    pub io_base: u16,
    pub irq: u8,
    pub dma: usize,
    pub spt: u8,
    pub rom_address: Option<usize>,
}

impl XtaControllerConfig {
    pub fn new(xta_type: XtaControllerType) -> Self {
        Self {
            xta_type,
            io_base: None,
            irq: None,
            bios_addr: None,
            rom: None,
            drive: Vec::new(),
        }
    }

    pub fn resolve(&self) -> Result<XtaResources, ConfigError> {
        let desc = self.xta_type.descriptor();

        if self.drive.len() > XTA_MAX_DRIVES {
            return Err(ConfigError::TooManyDrives(self.drive.len()));
        }

        let mut res = XtaResources {
            io_base: desc.io_bases[0],
            irq: desc.irqs[0],
            dma: desc.dma,
            spt: desc.spt,
            rom_address: desc.rom_addresses.first().copied(),
        };

        if !self.xta_type.has_jumpers() {
            if self.io_base.is_some() || self.irq.is_some() || self.bios_addr.is_some() {
                log::warn!(
                    "{} has fixed resources; ignoring configured io_base/irq/bios_addr",
                    desc.name
                );
            }
            return Ok(res);
        }

        if let Some(base) = self.io_base {
            if !desc.io_bases.contains(&base) {
                return Err(ConfigError::BadIoBase {
                    controller: desc.name,
                    base,
                });
            }
            res.io_base = base;
        }
        if let Some(irq) = self.irq {
            if !desc.irqs.contains(&irq) {
                return Err(ConfigError::BadIrq { device: desc.name, irq });
            }
            res.irq = irq;
        }
        if let Some(address) = self.bios_addr {
            if !desc.rom_addresses.contains(&address) {
                return Err(ConfigError::BadRomAddress {
                    controller: desc.name,
                    address,
                });
            }
            res.rom_address = Some(address);
        }
        Ok(res)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChipsetConfig {
    #[serde(rename = "type", default)]
    pub chipset_type: ChipsetType,
    #[serde(default = "default_memory_kb")]
    pub memory_kb: u32,
    #[serde(default)]
    pub ems_config: u8,
}

impl Default for ChipsetConfig {
    fn default() -> Self {
        Self {
            chipset_type: ChipsetType::SuperXt,
            memory_kb: DEFAULT_MEMORY_KB,
            ems_config: 0,
        }
    }
}

impl ChipsetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_kb > DEFAULT_MEMORY_KB && (self.memory_kb - DEFAULT_MEMORY_KB) % 16 != 0 {
            return Err(ConfigError::BadMemorySize(self.memory_kb));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpcConfig {
    #[serde(default = "default_serial_irq")]
    pub serial_irq: u8,
    #[serde(default = "default_parallel_irq")]
    pub parallel_irq: u8,
    #[serde(default = "default_mouse_irq")]
    pub mouse_irq: u8,
}

impl Default for UpcConfig {
    fn default() -> Self {
        Self {
            serial_irq: UPC_DEFAULT_SERIAL_IRQ,
            parallel_irq: UPC_DEFAULT_PARALLEL_IRQ,
            mouse_irq: UPC_DEFAULT_MOUSE_IRQ,
        }
    }
}

impl UpcConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !UPC_SERIAL_IRQS.contains(&self.serial_irq) {
            return Err(ConfigError::BadIrq {
                device: "F82C710 serial port",
                irq:    self.serial_irq,
            });
        }
        if !UPC_PARALLEL_IRQS.contains(&self.parallel_irq) {
            return Err(ConfigError::BadIrq {
                device: "F82C710 parallel port",
                irq:    self.parallel_irq,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct VideoConfig {
    #[serde(rename = "type", default)]
    pub video_type: VideoType,
    pub rom: Option<String>,
    #[serde(default = "default_vram_kb")]
    pub vram_kb: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MachineConfiguration {
    pub xta: Option<XtaControllerConfig>,
    pub chipset: Option<ChipsetConfig>,
    pub upc: Option<UpcConfig>,
    pub video: Option<VideoConfig>,
}

impl MachineConfiguration {
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: MachineConfiguration = toml::from_str(toml_str).context("Failed to parse machine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section against the limits of the hardware it describes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(xta) = &self.xta {
            xta.resolve()?;
            for drive in xta.drive.iter() {
                drive.geometry()?;
            }
        }
        if let Some(chipset) = &self.chipset {
            chipset.validate()?;
        }
        if let Some(upc) = &self.upc {
            upc.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config = MachineConfiguration::from_toml_str(
            r#"
            [xta]
            type = "wdxt150"
            io_base = 0x340
            irq = 4
            bios_addr = 0xCA000

            [[xta.drive]]
            image = "hdd0.img"

            [[xta.drive]]
            image = "hdd1.img"
            cylinders = 615
            heads = 4
            sectors = 17

            [chipset]
            type = "superxt"
            memory_kb = 1024
            ems_config = 0x14

            [upc]
            serial_irq = 3

            [video]
            type = "ct451"
            "#,
        )
        .unwrap();

        let xta = config.xta.as_ref().unwrap();
        let res = xta.resolve().unwrap();
        assert_eq!(res.io_base, 0x340);
        assert_eq!(res.irq, 4);
        assert_eq!(res.rom_address, Some(0xCA000));
        assert!(xta.drive[0].geometry().unwrap().is_none());
        assert_eq!(xta.drive[1].geometry().unwrap().unwrap().c(), 615);

        let chipset = config.chipset.as_ref().unwrap();
        assert_eq!(chipset.memory_kb, 1024);
        assert_eq!(chipset.ems_config, 0x14);

        let upc = config.upc.as_ref().unwrap();
        assert_eq!(upc.serial_irq, 3);
        assert_eq!(upc.parallel_irq, 7);
        assert_eq!(upc.mouse_irq, 2);

        assert_eq!(config.video.as_ref().unwrap().vram_kb, 256);
    }

    #[test]
    fn fixed_controllers_ignore_jumpers() {
        let mut xta = XtaControllerConfig::new(XtaControllerType::T1200);
        xta.io_base = Some(0x340);
        let res = xta.resolve().unwrap();
        assert_eq!(res.io_base, 0x320);
        assert_eq!(res.spt, 34);
        assert_eq!(res.rom_address, None);
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut xta = XtaControllerConfig::new(XtaControllerType::Wdxt150);
        xta.io_base = Some(0x300);
        assert!(matches!(xta.resolve(), Err(ConfigError::BadIoBase { base: 0x300, .. })));

        assert!(MachineConfiguration::from_toml_str("[upc]\nparallel_irq = 2\n").is_err());
        assert!(MachineConfiguration::from_toml_str("[xta]\ntype = \"xebec\"\n").is_err());
        assert!(MachineConfiguration::from_toml_str(
            "[xta]\ntype = \"hd20\"\n[[xta.drive]]\nimage = \"a.img\"\nheads = 4\n"
        )
        .is_err());
    }
}
