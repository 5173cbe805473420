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

    device_traits::storage.rs

    Defines the SectorStorage trait, the backend of a fixed disk drive.
*/

use crate::device_types::geometry::DriveGeometry;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Sector {lba} is out of range for a disk of {total} sectors.")]
    OutOfRange { lba: usize, total: usize },
    #[error("Sector {0} can't be written: the image is read-only.")]
    ReadOnly(usize),
    #[error("Buffer length {0} is not a whole sector.")]
    BadBufferLength(usize),
    #[error("Image IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sector addressable read/write access to a disk image plus its geometry.
pub trait SectorStorage {
    /// The geometry of the image: cylinders, heads and sectors per track.
    fn geometry(&self) -> DriveGeometry;
    /// Read the sector at the given logical block address into `buf`.
    fn read_sector(&mut self, lba: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    /// Write the sector at the given logical block address from `buf`.
    fn write_sector(&mut self, lba: usize, buf: &[u8]) -> Result<(), StorageError>;
    /// Flush any buffered writes to the underlying medium.
    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
