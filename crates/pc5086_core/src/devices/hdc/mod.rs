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

    devices::hdc::mod.rs

    Hard disk controller implementations.

*/

pub mod xta;
pub mod xta_dcb;

use crate::device_traits::storage::StorageError;

pub use crate::device_types::hdc::HDC_SECTOR_SIZE as SECTOR_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("The specified drive slot {0} was out of range [0..1]")]
    InvalidDevice(usize),
    #[error("The drive image geometry {0} is not usable by this controller")]
    UnsupportedGeometry(String),
    #[error("Drive storage error: {0}")]
    Storage(#[from] StorageError),
}

/// An unrecoverable internal fault of a device. Emulated software cannot observe these; the host
/// decides whether to stop the machine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceFault {
    #[error("{command} ran out of DMA data (idx={index}, len={len})")]
    DmaUnderrun {
        command: &'static str,
        index: usize,
        len: usize,
    },
}
