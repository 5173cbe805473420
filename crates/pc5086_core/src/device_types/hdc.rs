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

    device_types::hdc.rs

    The fixed disk types an XT BIOS knows about, used to recognize the
    geometry of a raw image from its length.

*/

use std::fmt::{Display, Formatter};

pub const HDC_SECTOR_SIZE: usize = 512;

/// A drive type from the XT fixed disk parameter table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct XtDriveType {
    pub id: u8,
    pub cylinders: u16,
    pub heads: u8,
    pub spt: u8,
    /// Write precompensation cylinder, if the drive needs one.
    pub wpc: Option<u16>,
}

impl XtDriveType {
    pub const fn size(&self) -> usize {
        self.cylinders as usize * self.heads as usize * self.spt as usize * HDC_SECTOR_SIZE
    }

    /// The first drive type whose capacity is exactly `size` bytes.
    pub fn from_size(size: usize) -> Option<XtDriveType> {
        XT_DRIVE_TYPES.iter().find(|t| t.size() == size).copied()
    }
}

impl Display for XtDriveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type {}: c:{} h:{} s:{} ({:.1}MB)",
            self.id,
            self.cylinders,
            self.heads,
            self.spt,
            self.size() as f32 / (1024.0 * 1024.0)
        )
    }
}

const fn xt_type(id: u8, cylinders: u16, heads: u8, wpc: Option<u16>) -> XtDriveType {
    XtDriveType {
        id,
        cylinders,
        heads,
        spt: 17,
        wpc,
    }
}

// Types 3 and 4 have the same capacity; type 3 wins.
pub const XT_DRIVE_TYPES: [XtDriveType; 6] = [
    xt_type(1, 306, 4, Some(306)),
    xt_type(2, 615, 4, Some(300)),
    xt_type(3, 306, 8, Some(128)),
    xt_type(4, 612, 4, Some(0)),
    xt_type(5, 733, 5, None),
    xt_type(6, 940, 6, Some(512)),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_types_match_by_capacity() {
        assert_eq!(XtDriveType::from_size(10_653_696).map(|t| t.id), Some(1));
        assert_eq!(XtDriveType::from_size(21_307_392).map(|t| t.id), Some(3));
        assert!(XtDriveType::from_size(21_307_393).is_none());
        assert_eq!(XT_DRIVE_TYPES[1].to_string(), "type 2: c:615 h:4 s:17 (20.4MB)");
    }
}
