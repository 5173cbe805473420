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

    mount.rs

    Parses media mount specifications given on the command line, of the
    form hd:0:disk.img?ro&chs=615:4:17

*/

use std::{fmt, path::PathBuf, str::FromStr};

use fxhash::FxHashMap;
use pc5086_core::device_types::geometry::DriveGeometry;

#[derive(Debug, PartialEq)]
pub enum MountableDeviceType {
    HardDisk,
}

#[derive(Debug, PartialEq)]
pub struct MountSpec {
    pub device:  MountableDeviceType,
    pub index:   usize,
    pub path:    PathBuf,
    pub options: FxHashMap<String, String>,
}

impl MountSpec {
    pub fn read_only(&self) -> bool {
        self.options.get("ro").is_some_and(|v| v != "false")
    }

    /// The geometry given with the `chs` option, if any.
    pub fn geometry(&self) -> Result<Option<DriveGeometry>, String> {
        match self.options.get("chs") {
            Some(chs) => {
                let chs = chs.parse::<ChsSpec>()?;
                Ok(Some(DriveGeometry::xt(chs.c, chs.h, chs.s)))
            }
            None => Ok(None),
        }
    }
}

impl FromStr for MountSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split once for optional options
        let (main, opt_str) = match s.split_once('?') {
            Some((left, right)) => (left, Some(right)),
            None => (s, None),
        };

        let mut parts = main.splitn(3, ':');

        let device_str = parts.next().ok_or("Missing device type")?;
        let index_str = parts.next().ok_or("Missing device unit")?;
        let path_str = parts.next().ok_or("Missing file path")?;

        let device = match device_str {
            "hd" => MountableDeviceType::HardDisk,
            other => return Err(format!("Unknown device type: {other}")),
        };

        let index: usize = index_str
            .parse()
            .map_err(|_| format!("Invalid device index: {index_str}"))?;

        if path_str.is_empty() {
            return Err("Missing file path".to_string());
        }
        let path = PathBuf::from(path_str);
        let mut options = FxHashMap::default();

        if let Some(opts) = opt_str {
            for entry in opts.split('&') {
                let (k, v) = entry.split_once('=').unwrap_or((entry, "true"));
                options.insert(k.to_string(), v.to_string());
            }
        }

        Ok(MountSpec {
            device,
            index,
            path,
            options,
        })
    }
}

/// A cylinder:head:sector triple.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ChsSpec {
    pub c: u16,
    pub h: u8,
    pub s: u8,
}

impl FromStr for ChsSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 3 {
            return Err(format!("Expected c:h:s, got: {s}"));
        }
        let c = fields[0].parse().map_err(|_| format!("Invalid cylinder: {}", fields[0]))?;
        let h = fields[1].parse().map_err(|_| format!("Invalid head: {}", fields[1]))?;
        let s = fields[2].parse().map_err(|_| format!("Invalid sector: {}", fields[2]))?;
        Ok(ChsSpec { c, h, s })
    }
}

impl fmt::Display for ChsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.c, self.h, self.s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_spec_parses_options() {
        let spec: MountSpec = "hd:1:images/dos.img?ro&chs=615:4:17".parse().unwrap();
        assert_eq!(spec.device, MountableDeviceType::HardDisk);
        assert_eq!(spec.index, 1);
        assert_eq!(spec.path, PathBuf::from("images/dos.img"));
        assert!(spec.read_only());
        let geometry = spec.geometry().unwrap().unwrap();
        assert_eq!((geometry.c(), geometry.h(), geometry.s()), (615, 4, 17));

        // Paths may contain colons.
        let spec: MountSpec = "hd:0:C:\\disk.img".parse().unwrap();
        assert_eq!(spec.path, PathBuf::from("C:\\disk.img"));
        assert!(!spec.read_only());
        assert_eq!(spec.geometry(), Ok(None));
    }

    #[test]
    fn bad_mount_specs_are_rejected() {
        assert!("fd:0:floppy.img".parse::<MountSpec>().is_err());
        assert!("hd:x:disk.img".parse::<MountSpec>().is_err());
        assert!("hd:0".parse::<MountSpec>().is_err());
        assert!("hd:0:".parse::<MountSpec>().is_err());
    }

    #[test]
    fn chs_spec_parses() {
        assert_eq!("12:3:17".parse::<ChsSpec>(), Ok(ChsSpec { c: 12, h: 3, s: 17 }));
        assert!("12:3".parse::<ChsSpec>().is_err());
        assert!("12:300:1".parse::<ChsSpec>().is_err());
        assert_eq!(ChsSpec { c: 1, h: 2, s: 3 }.to_string(), "1:2:3");
    }
}
