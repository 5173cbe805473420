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

    test_support.rs

    Host-side collaborators for device tests: an interrupt controller that
    records requests, a DMA channel backed by byte queues, and storage
    that can be inspected after the device is done with it.

*/

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::{
    device_traits::{
        dma::DmaChannel,
        pic::InterruptController,
        storage::{SectorStorage, StorageError},
    },
    device_types::geometry::DriveGeometry,
    raw_image::MemoryImage,
};

#[derive(Default)]
pub struct RecordingPic {
    pub requests: Vec<u8>,
    pub clears: Vec<u8>,
    lines: u16,
}

impl RecordingPic {
    pub fn asserted(&self, irq: u8) -> bool {
        self.lines & (1 << irq) != 0
    }
}

impl InterruptController for RecordingPic {
    fn request_interrupt(&mut self, irq: u8) {
        self.requests.push(irq);
        self.lines |= 1 << irq;
    }

    fn clear_interrupt(&mut self, irq: u8) {
        self.clears.push(irq);
        self.lines &= !(1 << irq);
    }
}

/// A DMA channel that accepts device writes into `from_device` (up to `limit` bytes) and serves
/// device reads from `to_device`.
#[derive(Default)]
pub struct VecDma {
    pub to_device: VecDeque<u8>,
    pub from_device: Vec<u8>,
    pub limit: Option<usize>,
    pub channels: Vec<usize>,
}

impl VecDma {
    pub fn with_data(data: &[u8]) -> Self {
        Self {
            to_device: data.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl DmaChannel for VecDma {
    fn dma_write_u8(&mut self, channel: usize, data: u8) -> bool {
        self.channels.push(channel);
        if self.limit.is_some_and(|limit| self.from_device.len() >= limit) {
            return false;
        }
        self.from_device.push(data);
        true
    }

    fn dma_read_u8(&mut self, channel: usize) -> Option<u8> {
        self.channels.push(channel);
        self.to_device.pop_front()
    }
}

/// A MemoryImage that stays readable by the test after being attached to a controller.
pub struct SharedImage(pub Rc<RefCell<MemoryImage>>);

impl SharedImage {
    pub fn new(geometry: DriveGeometry) -> (Box<Self>, Rc<RefCell<MemoryImage>>) {
        let image = Rc::new(RefCell::new(MemoryImage::new(geometry)));
        (Box::new(Self(image.clone())), image)
    }
}

impl SectorStorage for SharedImage {
    fn geometry(&self) -> DriveGeometry {
        self.0.borrow().geometry()
    }

    fn read_sector(&mut self, lba: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.0.borrow_mut().read_sector(lba, buf)
    }

    fn write_sector(&mut self, lba: usize, buf: &[u8]) -> Result<(), StorageError> {
        self.0.borrow_mut().write_sector(lba, buf)
    }
}

/// Storage whose every transfer fails.
pub struct FailingStorage(pub DriveGeometry);

impl SectorStorage for FailingStorage {
    fn geometry(&self) -> DriveGeometry {
        self.0
    }

    fn read_sector(&mut self, _lba: usize, _buf: &mut [u8]) -> Result<(), StorageError> {
        Err(std::io::Error::other("media error").into())
    }

    fn write_sector(&mut self, _lba: usize, _buf: &[u8]) -> Result<(), StorageError> {
        Err(std::io::Error::other("media error").into())
    }
}
