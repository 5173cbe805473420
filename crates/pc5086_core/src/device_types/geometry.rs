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
*/

//! Define a [DriveGeometry] that represents cylinder, head, and sector based
//! fixed disk geometry. XTA controllers number sectors from 0.

use crate::device_types::hdc::{XtDriveType, HDC_SECTOR_SIZE};
use std::fmt::Display;

/// How sectors are laid out on a fixed disk:
///  - Cylinder count (c)
///  - Head count (h)
///  - Sectors per track (s)
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct DriveGeometry {
    c: u16,
    h: u8,
    s: u8,
}

impl Display for DriveGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:4} h:{:2} s:{:2}]", self.c, self.h, self.s)
    }
}

impl From<&XtDriveType> for DriveGeometry {
    fn from(drive_type: &XtDriveType) -> Self {
        Self::xt(drive_type.cylinders, drive_type.heads, drive_type.spt)
    }
}

impl DriveGeometry {
    /// Create a geometry of 512 byte sectors from cylinder, head and sector counts.
    pub fn xt(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }

    /// Derive a geometry from the length of a raw image in bytes.
    ///
    /// Known XT drive types are matched first. Otherwise, a geometry of `heads` heads and
    /// `spt` sectors per track is assumed and the cylinder count is derived from the length.
    pub fn from_image_size(len: usize, heads: u8, spt: u8) -> Option<Self> {
        if len == 0 || len % HDC_SECTOR_SIZE != 0 {
            return None;
        }
        if let Some(drive_type) = XtDriveType::from_size(len) {
            log::debug!("Image of {} bytes matches XT drive {}", len, drive_type);
            return Some(DriveGeometry::from(&drive_type));
        }
        if heads == 0 || spt == 0 {
            return None;
        }
        let track_size = heads as usize * spt as usize * HDC_SECTOR_SIZE;
        let cylinders = len / track_size;
        if cylinders == 0 || cylinders > u16::MAX as usize {
            return None;
        }
        Some(Self::xt(cylinders as u16, heads, spt))
    }

    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    #[inline]
    pub fn s(&self) -> u8 {
        self.s
    }
    /// Return the number of sectors on the disk.
    pub fn total_sectors(&self) -> usize {
        (self.c as usize) * (self.h as usize) * (self.s as usize)
    }
    /// Return the size of the disk in bytes.
    pub fn total_size(&self) -> usize {
        self.total_sectors() * HDC_SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_xt_types_are_detected() {
        // Type 2, 615 x 4 x 17
        let geom = DriveGeometry::from_image_size(21_411_840, 4, 17).unwrap();
        assert_eq!(geom, DriveGeometry::xt(615, 4, 17));
    }

    #[test]
    fn unknown_size_falls_back_to_track_math() {
        let len = 100 * 4 * 34 * HDC_SECTOR_SIZE;
        let geom = DriveGeometry::from_image_size(len, 4, 34).unwrap();
        assert_eq!(geom, DriveGeometry::xt(100, 4, 34));
        assert_eq!(geom.total_size(), len);

        assert!(DriveGeometry::from_image_size(1000, 4, 17).is_none());
        assert!(DriveGeometry::from_image_size(0, 4, 17).is_none());
    }
}
