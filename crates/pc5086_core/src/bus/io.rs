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

    bus::io.rs

    IO port dispatch for the system bus.

*/

//! IO routines for [BusInterface].

use crate::bus::{BusInterface, DeviceEvent, IoDevice, IoDeviceType, NO_IO_BYTE, NULL_DELTA_US};

impl BusInterface {
    /// Read an 8-bit value from an IO port. Ports no device services read as NO_IO_BYTE.
    pub fn io_read_u8(&mut self, port: u16) -> u8 {
        let delta = NULL_DELTA_US;
        let mut byte = None;
        if let Some(device_id) = self.io_map.get(&port) {
            match device_id {
                IoDeviceType::HardDiskController => {
                    if let Some(xta) = &mut self.xta {
                        byte = Some(xta.read_u8(port, delta));
                    }
                }
                IoDeviceType::Chipset => {
                    if let Some(chipset) = &mut self.chipset {
                        byte = Some(chipset.read_u8(port, delta));
                    }
                }
                IoDeviceType::Upc => {
                    if let Some(upc) = &mut self.upc {
                        byte = Some(upc.read_u8(port, delta));
                    }
                }
                IoDeviceType::Video => {
                    if let Some(video) = &mut self.video {
                        byte = Some(video.read_u8(port, delta));
                    }
                }
            }
        }
        else {
            log::trace!("Unhandled IO read from port: {:04X}", port);
        }
        byte.unwrap_or(NO_IO_BYTE)
    }

    /// Write an 8-bit value to an IO port.
    ///
    /// Devices whose port set or memory mapping depends on their registers are re-registered
    /// after the write, and any events they raised are queued for the host.
    pub fn io_write_u8(&mut self, port: u16, data: u8) {
        let delta = NULL_DELTA_US;
        match self.io_map.get(&port).copied() {
            Some(IoDeviceType::HardDiskController) => {
                if let Some(mut xta) = self.xta.take() {
                    xta.write_u8(port, data, Some(self), delta);
                    self.xta = Some(xta);
                }
            }
            Some(IoDeviceType::Chipset) => {
                if let Some(mut chipset) = self.chipset.take() {
                    chipset.write_u8(port, data, Some(self), delta);
                    if let Some(turbo) = chipset.take_turbo_event() {
                        self.events.push_back(DeviceEvent::TurboToggled(turbo));
                    }
                    let ports = chipset.port_list();
                    self.chipset = Some(chipset);
                    self.sync_io_ports(IoDeviceType::Chipset, ports);
                    self.update_ems_mapping();
                }
            }
            Some(IoDeviceType::Upc) => {
                if let Some(mut upc) = self.upc.take() {
                    upc.write_u8(port, data, Some(self), delta);
                    self.events.extend(upc.drain_events().map(DeviceEvent::Upc));
                    let ports = upc.port_list();
                    self.upc = Some(upc);
                    self.sync_io_ports(IoDeviceType::Upc, ports);
                }
            }
            Some(IoDeviceType::Video) => {
                if let Some(mut video) = self.video.take() {
                    video.write_u8(port, data, Some(self), delta);
                    self.video = Some(video);
                }
            }
            None => {
                log::trace!("Unhandled IO write to port: {:04X} data: {:02X}", port, data);
            }
        }
    }
}
