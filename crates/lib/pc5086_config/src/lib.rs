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

    lib.rs

    Reads the main configuration file and overlays command line arguments.

*/

//! The `pc5086_config` crate parses the main configuration file and overlays command line
//! arguments on top of it. Command line arguments take priority over the configuration file.
//!
//! The machine sections (`[xta]`, `[chipset]`, `[upc]`, `[video]`) are read into
//! [MachineConfiguration]; `[emulator]` and `[selftest]` hold frontend settings.
//!
//! Features:
//! - `use_bpaf`: Enable BPAF support for command line argument parsing.

#[cfg(feature = "use_bpaf")]
mod bpaf_config;
#[cfg(not(feature = "use_bpaf"))]
mod cmdline;
pub mod mount;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use cfg_if::cfg_if;
use serde_derive::Deserialize;

use pc5086_core::machine_config::{MachineConfiguration, XtaControllerConfig, XtaDriveConfig, XTA_MAX_DRIVES};

#[cfg(feature = "use_bpaf")]
pub use bpaf_config::CmdLineArgs;
#[cfg(feature = "use_bpaf")]
use bpaf_config::cli_args;
#[cfg(not(feature = "use_bpaf"))]
pub use cmdline::CmdLineArgs;

use mount::{ChsSpec, MountSpec, MountableDeviceType};

fn default_rom_dir() -> PathBuf {
    PathBuf::from("roms")
}
const fn default_count() -> u8 {
    1
}

#[derive(Debug, Deserialize)]
pub struct Emulator {
    #[serde(default = "default_rom_dir")]
    pub rom_dir: PathBuf,
}

impl Default for Emulator {
    fn default() -> Self {
        Self {
            rom_dir: default_rom_dir(),
        }
    }
}

/// Parameters of the headless controller self-test.
#[derive(Debug, Deserialize)]
pub struct SelfTest {
    #[serde(default)]
    pub drive: usize,
    #[serde(default)]
    pub cylinder: u16,
    #[serde(default)]
    pub head: u8,
    #[serde(default)]
    pub sector: u8,
    #[serde(default = "default_count")]
    pub count: u8,
    #[serde(default)]
    pub dma: bool,
}

impl Default for SelfTest {
    fn default() -> Self {
        Self {
            drive: 0,
            cylinder: 0,
            head: 0,
            sector: 0,
            count: default_count(),
            dma: false,
        }
    }
}

impl SelfTest {
    pub fn chs(&self) -> ChsSpec {
        ChsSpec {
            c: self.cylinder,
            h: self.head,
            s: self.sector,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileParams {
    #[serde(default)]
    pub emulator: Emulator,
    #[serde(default)]
    pub selftest: SelfTest,
    #[serde(flatten)]
    pub machine: MachineConfiguration,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) -> Result<(), anyhow::Error> {
        if let Some(rom_dir) = shell_args.rom_dir {
            self.emulator.rom_dir = rom_dir;
        }
        if let Some(drive) = shell_args.drive {
            self.selftest.drive = drive;
        }
        if let Some(chs) = shell_args.chs {
            self.selftest.cylinder = chs.c;
            self.selftest.head = chs.h;
            self.selftest.sector = chs.s;
        }
        self.selftest.dma |= shell_args.dma;

        for mount in shell_args.mounts {
            self.mount(mount)?;
        }
        Ok(())
    }

    /// Put the image named by a mount spec into the corresponding drive slot, replacing whatever
    /// the configuration file placed there.
    fn mount(&mut self, mount: MountSpec) -> Result<(), anyhow::Error> {
        match mount.device {
            MountableDeviceType::HardDisk => {
                let geometry = mount.geometry().map_err(anyhow::Error::msg)?;
                let drive = XtaDriveConfig {
                    image: mount.path.to_string_lossy().into_owned(),
                    cylinders: geometry.map(|g| g.c()),
                    heads: geometry.map(|g| g.h()),
                    sectors: geometry.map(|g| g.s()),
                    read_only: mount.read_only(),
                };

                let xta = self
                    .machine
                    .xta
                    .get_or_insert_with(|| XtaControllerConfig::new(Default::default()));
                if mount.index >= XTA_MAX_DRIVES {
                    bail!("Hard disk index {} out of range [0..{}]", mount.index, XTA_MAX_DRIVES - 1);
                }
                if mount.index < xta.drive.len() {
                    log::debug!("Replacing hard disk {} with {}", mount.index, drive.image);
                    xta.drive[mount.index] = drive;
                }
                else if mount.index == xta.drive.len() {
                    log::debug!("Mounting {} as hard disk {}", drive.image, mount.index);
                    xta.drive.push(drive);
                }
                else {
                    bail!("Cannot mount hard disk {} without hard disk {}", mount.index, xta.drive.len());
                }
            }
        }
        Ok(())
    }
}

/// Parse a TOML configuration string and overlay the supplied arguments.
pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, anyhow::Error> {
    let mut toml_args: ConfigFileParams =
        toml::from_str(toml_string.as_ref()).context("Failed to parse configuration file")?;

    // Command line arguments override config file arguments
    toml_args.overlay(shell_args)?;
    toml_args.machine.validate()?;

    Ok(toml_args)
}

fn shell_args() -> CmdLineArgs {
    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            log::debug!("Reading command line arguments...");
            cli_args().run()
        } else {
            log::debug!("Argument reading disabled...");
            CmdLineArgs::default()
        }
    }
}

/// Read the TOML configuration from a file path, parse and overlay command line arguments.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    let shell_args = shell_args();

    // Allow configuration file path to be overridden by command line argument 'config_file'
    let path = shell_args
        .config_file
        .clone()
        .unwrap_or_else(|| default_path.as_ref().to_path_buf());
    let toml_string = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;

    read_config(toml_string, shell_args)
}
