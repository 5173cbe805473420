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

    raw_image.rs

    Implements raw sector images: a flat file (or buffer) of back-to-back
    512 byte sectors in cylinder, head, sector order.

*/

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};

use crate::{
    device_traits::storage::{SectorStorage, StorageError},
    device_types::{geometry::DriveGeometry, hdc::HDC_SECTOR_SIZE},
};

// Geometry assumed for images that don't match a known drive type.
pub const FALLBACK_HEADS: u8 = 4;

#[derive(Debug, thiserror::Error)]
pub enum RawImageError {
    #[error("The image length {0} is not a whole number of sectors.")]
    InvalidLength(u64),
    #[error("The image is {actual} bytes, but the requested geometry {geometry} needs {expected}.")]
    GeometryMismatch {
        geometry: DriveGeometry,
        expected: u64,
        actual:   u64,
    },
    #[error("Couldn't derive a geometry for an image of {0} bytes.")]
    UnknownGeometry(u64),
}

fn check_buf(buf_len: usize) -> Result<(), StorageError> {
    if buf_len != HDC_SECTOR_SIZE {
        return Err(StorageError::BadBufferLength(buf_len));
    }
    Ok(())
}

fn check_lba(lba: usize, geometry: &DriveGeometry) -> Result<usize, StorageError> {
    let total = geometry.total_sectors();
    if lba >= total {
        return Err(StorageError::OutOfRange { lba, total });
    }
    Ok(lba * HDC_SECTOR_SIZE)
}

/// A raw image file on disk.
pub struct RawImage {
    file: File,
    geometry: DriveGeometry,
    read_only: bool,
}

impl RawImage {
    /// Open a raw image file.
    ///
    /// If `geometry` is None, the geometry is derived from the file length, using `spt` as the
    /// sectors per track for images that don't match a known drive type.
    pub fn open(path: impl AsRef<Path>, geometry: Option<DriveGeometry>, spt: u8, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .with_context(|| format!("Failed to open image file: {}", path.display()))?;

        let len = file
            .metadata()
            .with_context(|| format!("Failed to read image metadata: {}", path.display()))?
            .len();

        if len == 0 || len % HDC_SECTOR_SIZE as u64 != 0 {
            bail!(RawImageError::InvalidLength(len));
        }

        let geometry = match geometry {
            Some(geometry) => {
                let expected = geometry.total_size() as u64;
                if expected > len {
                    bail!(RawImageError::GeometryMismatch {
                        geometry,
                        expected,
                        actual: len
                    });
                }
                geometry
            }
            None => match DriveGeometry::from_image_size(len as usize, FALLBACK_HEADS, spt) {
                Some(geometry) => geometry,
                None => bail!(RawImageError::UnknownGeometry(len)),
            },
        };

        log::debug!(
            "Opened raw image {} ({} bytes) with geometry {}{}",
            path.display(),
            len,
            geometry,
            if read_only { " (read-only)" } else { "" }
        );

        Ok(Self {
            file,
            geometry,
            read_only,
        })
    }

    /// Create a new zero-filled image file with the specified geometry.
    /// An existing file will not be overwritten.
    pub fn create(path: impl AsRef<Path>, geometry: DriveGeometry) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("Failed to create image file: {}", path.display()))?;

        let zero_sector = vec![0u8; HDC_SECTOR_SIZE];
        for _ in 0..geometry.total_sectors() {
            file.write_all(&zero_sector)
                .context("Error writing image file to disk.")?;
        }
        file.flush()?;

        Ok(Self {
            file,
            geometry,
            read_only: false,
        })
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }
}

impl SectorStorage for RawImage {
    fn geometry(&self) -> DriveGeometry {
        self.geometry
    }

    fn read_sector(&mut self, lba: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_buf(buf.len())?;
        let offset = check_lba(lba, &self.geometry)?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_sector(&mut self, lba: usize, buf: &[u8]) -> Result<(), StorageError> {
        check_buf(buf.len())?;
        let offset = check_lba(lba, &self.geometry)?;
        if self.read_only {
            log::warn!("Write to sector {} of read-only image refused", lba);
            return Err(StorageError::ReadOnly(lba));
        }
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.file.flush()?;
        Ok(())
    }
}

/// A raw image held in memory.
pub struct MemoryImage {
    data: Vec<u8>,
    geometry: DriveGeometry,
}

impl MemoryImage {
    /// Create a zero-filled image with the specified geometry.
    pub fn new(geometry: DriveGeometry) -> Self {
        Self {
            data: vec![0; geometry.total_size()],
            geometry,
        }
    }

    /// Wrap an existing buffer. The buffer is resized to match the geometry.
    pub fn from_vec(mut data: Vec<u8>, geometry: DriveGeometry) -> Self {
        data.resize(geometry.total_size(), 0);
        Self { data, geometry }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl SectorStorage for MemoryImage {
    fn geometry(&self) -> DriveGeometry {
        self.geometry
    }

    fn read_sector(&mut self, lba: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_buf(buf.len())?;
        let offset = check_lba(lba, &self.geometry)?;
        buf.copy_from_slice(&self.data[offset..offset + HDC_SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&mut self, lba: usize, buf: &[u8]) -> Result<(), StorageError> {
        check_buf(buf.len())?;
        let offset = check_lba(lba, &self.geometry)?;
        self.data[offset..offset + HDC_SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_image_rejects_out_of_range() {
        let mut image = MemoryImage::new(DriveGeometry::xt(2, 2, 17));
        let mut buf = vec![0u8; HDC_SECTOR_SIZE];
        assert!(image.read_sector(67, &mut buf).is_ok());
        assert!(matches!(
            image.read_sector(68, &mut buf),
            Err(StorageError::OutOfRange { lba: 68, total: 68 })
        ));
        assert!(matches!(
            image.write_sector(0, &buf[0..100]),
            Err(StorageError::BadBufferLength(100))
        ));
    }

    #[test]
    fn raw_image_file_round_trip() {
        let path = std::env::temp_dir().join(format!("pc5086_raw_image_{}.img", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let geometry = DriveGeometry::xt(3, FALLBACK_HEADS, 17);
        {
            let mut image = RawImage::create(&path, geometry).unwrap();
            let sector = vec![0xA5u8; HDC_SECTOR_SIZE];
            image.write_sector(40, &sector).unwrap();
            image.flush().unwrap();
        }

        // Geometry comes from the length and the sectors per track hint.
        let mut image = RawImage::open(&path, None, 17, false).unwrap();
        assert_eq!(image.geometry().c(), 3);
        let mut buf = vec![0u8; HDC_SECTOR_SIZE];
        image.read_sector(40, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0xA5));
        image.read_sector(39, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
        drop(image);

        // Writes to a read-only image fail and leave the file alone.
        let mut image = RawImage::open(&path, Some(geometry), 17, true).unwrap();
        assert!(matches!(
            image.write_sector(40, &[0u8; HDC_SECTOR_SIZE]),
            Err(StorageError::ReadOnly(40))
        ));
        image.read_sector(40, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0xA5));

        drop(image);
        let _ = std::fs::remove_file(&path);
    }
}
