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

    devices::f82c710.rs

    Implementation of the Chips & Technologies F82C710 Universal Peripheral
    Controller. The UPC integrates a serial port, a parallel port, an IDE
    interface, floppy chip selects and a PS/2 mouse interface, all enabled
    and placed through 15 configuration registers.

    The configuration registers are hidden until a handshake sequence is
    written to ports 0x2FA and 0x3FA, which also chooses where the
    configuration index (CRI) and access (CAP) ports appear.

    This module only tracks what the UPC has enabled and where. The
    peripherals themselves are reported to the host as events.

*/

use std::collections::VecDeque;

use crate::{
    bus::{BusInterface, DeviceRunTimeUnit, IoDevice, NO_IO_BYTE},
    machine_config::UpcConfig,
};

pub const UPC_CONFIG_PORT_A: u16 = 0x2FA;
pub const UPC_CONFIG_PORT_B: u16 = 0x3FA;
pub const UPC_REG_COUNT: usize = 15;

const HANDSHAKE_MAGIC: u8 = 0x36;
const CRI_EXIT: u8 = 0x0F;

const REG_ENABLES: usize = 0;
const REG_FEATURES: usize = 1;
const REG_UART_CLOCK: usize = 2;
const REG_SERIAL_BASE: usize = 4;
const REG_PARALLEL_BASE: usize = 6;
const REG_GPCS_BASE: usize = 9;
const REG_IDE_FDC: usize = 12;
const REG_MOUSE_BASE: usize = 13;
const REG_TEST: usize = 14;

const GPCS_DEFAULT: u8 = 0xB0;

const UPC_DEFAULT_REGS: [u8; UPC_REG_COUNT] = [
    0x0C, 0x00, 0x00, 0x00, 0xFE, 0x00, 0x9E, 0x00, 0x00, 0xB0, 0x00, 0x00, 0xA0, 0x00, 0x00,
];

// Mouse status register bits
pub const MOUSE_DEV_IDLE: u8 = 0x01;
pub const MOUSE_RX_FULL: u8 = 0x02;
pub const MOUSE_TX_IDLE: u8 = 0x04;
pub const MOUSE_RESET: u8 = 0x08;
pub const MOUSE_INTS_ON: u8 = 0x10;
pub const MOUSE_ERROR: u8 = 0x20;
pub const MOUSE_CLEAR: u8 = 0x40;
pub const MOUSE_ENABLE: u8 = 0x80;

/// A change in the set of peripherals the UPC exposes. An IRQ of None means the IRQ is disabled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpcEvent {
    SerialEnabled { base: u16, irq: Option<u8> },
    SerialDisabled,
    ParallelEnabled { base: u16, irq: Option<u8> },
    ParallelDisabled,
    IdeEnabled,
    IdeDisabled,
    FdcEnabled,
    FdcDisabled,
    MouseEnabled { base: u16, irq: Option<u8> },
    MouseDisabled,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PeripheralState {
    pub serial: Option<u16>,
    pub parallel: Option<u16>,
    pub ide: bool,
    pub fdc: bool,
    pub mouse: Option<u16>,
}

pub type MouseSink = Box<dyn FnMut(u8)>;

pub struct Upc {
    handshake: u8,
    config_mode: bool,
    next_value: u8,
    cri_addr: u16,
    cri: u8,
    regs: [u8; UPC_REG_COUNT],

    serial_irq: Option<u8>,
    parallel_irq: Option<u8>,
    mouse_irq: Option<u8>,

    mouse_status: u8,
    mouse_sink: Option<MouseSink>,

    peripherals: PeripheralState,
    events: VecDeque<UpcEvent>,
}

fn irq_option(irq: u8) -> Option<u8> {
    (irq != 0).then_some(irq)
}

impl Upc {
    pub fn new(config: &UpcConfig) -> Self {
        let mut upc = Self {
            handshake: 0,
            config_mode: false,
            next_value: 0,
            cri_addr: 0,
            cri: 0,
            regs: UPC_DEFAULT_REGS,
            serial_irq: irq_option(config.serial_irq),
            parallel_irq: irq_option(config.parallel_irq),
            mouse_irq: irq_option(config.mouse_irq),
            mouse_status: 0,
            mouse_sink: None,
            peripherals: PeripheralState::default(),
            events: VecDeque::new(),
        };
        for index in 0..UPC_REG_COUNT {
            upc.update_config(index);
        }
        upc
    }

    /// Leave configuration mode and restart the handshake. The configuration registers keep their
    /// values across a reset.
    pub fn reset(&mut self) {
        self.handshake = 0;
        self.config_mode = false;
        self.cri = 0;
    }

    pub fn set_mouse_sink(&mut self, sink: MouseSink) {
        self.mouse_sink = Some(sink);
    }

    pub fn peripherals(&self) -> PeripheralState {
        self.peripherals
    }

    pub fn regs(&self) -> &[u8; UPC_REG_COUNT] {
        &self.regs
    }

    pub fn in_config_mode(&self) -> bool {
        self.config_mode
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = UpcEvent> + '_ {
        self.events.drain(..)
    }

    #[inline]
    fn cap_addr(&self) -> u16 {
        self.cri_addr + 1
    }

    fn mouse_ports(&self) -> Option<(u16, u16)> {
        self.peripherals.mouse.map(|base| (base, base + 1))
    }

    fn set_serial(&mut self, base: Option<u16>) {
        if self.peripherals.serial != base {
            self.peripherals.serial = base;
            self.events.push_back(match base {
                Some(base) => UpcEvent::SerialEnabled {
                    base,
                    irq: self.serial_irq,
                },
                None => UpcEvent::SerialDisabled,
            });
        }
    }

    fn set_parallel(&mut self, base: Option<u16>) {
        if self.peripherals.parallel != base {
            self.peripherals.parallel = base;
            self.events.push_back(match base {
                Some(base) => UpcEvent::ParallelEnabled {
                    base,
                    irq: self.parallel_irq,
                },
                None => UpcEvent::ParallelDisabled,
            });
        }
    }

    fn set_ide(&mut self, enabled: bool) {
        if self.peripherals.ide != enabled {
            self.peripherals.ide = enabled;
            self.events.push_back(if enabled {
                UpcEvent::IdeEnabled
            }
            else {
                UpcEvent::IdeDisabled
            });
        }
    }

    fn set_fdc(&mut self, enabled: bool) {
        if self.peripherals.fdc != enabled {
            self.peripherals.fdc = enabled;
            self.events.push_back(if enabled {
                UpcEvent::FdcEnabled
            }
            else {
                UpcEvent::FdcDisabled
            });
        }
    }

    fn set_mouse(&mut self, base: Option<u16>) {
        if self.peripherals.mouse != base {
            self.peripherals.mouse = base;
            self.events.push_back(match base {
                Some(base) => UpcEvent::MouseEnabled {
                    base,
                    irq: self.mouse_irq,
                },
                None => UpcEvent::MouseDisabled,
            });
        }
    }

    /// Apply the effect of configuration register `index`.
    fn update_config(&mut self, index: usize) {
        let val = self.regs[index];
        match index {
            REG_ENABLES => {
                let serial = (val & 0x04 != 0).then(|| self.regs[REG_SERIAL_BASE] as u16 * 4);
                self.set_serial(serial);
                match serial {
                    Some(base) => log::debug!("UPC: UART at {:04X}, irq {:?}", base, self.serial_irq),
                    None => log::debug!("UPC: UART disabled"),
                }

                let parallel = (val & 0x08 != 0).then(|| self.regs[REG_PARALLEL_BASE] as u16 * 4);
                self.set_parallel(parallel);
                match parallel {
                    Some(base) => log::debug!("UPC: parallel port at {:04X}, irq {:?}", base, self.parallel_irq),
                    None => log::debug!("UPC: parallel port disabled"),
                }

                if val & 0x60 != 0 {
                    log::warn!("UPC: oscillator control not implemented");
                }
            }
            REG_FEATURES => {
                if val & 0x80 != 0 {
                    log::warn!("UPC: restricted serial reset not implemented");
                }
                if val & 0x40 != 0 {
                    log::warn!("UPC: bidirectional parallel port not implemented");
                }
                if val & 0x38 != 0 {
                    log::warn!("UPC: UART force CTS, DSR, DCD not implemented");
                }
            }
            REG_UART_CLOCK => {
                if val & 0x70 != 0 {
                    log::warn!("UPC: UART clock control not implemented");
                }
            }
            REG_GPCS_BASE => {
                if val == GPCS_DEFAULT {
                    log::warn!("UPC: GPCS not implemented (at default address {:04X})", val as u16 * 4);
                }
                else if val != 0 {
                    log::warn!("UPC: GPCS not implemented (at address {:04X})", val as u16 * 4);
                }
            }
            REG_IDE_FDC => {
                if val & 0x40 != 0 {
                    log::warn!("UPC: XT IDE mode not implemented");
                    self.set_ide(false);
                }
                else {
                    self.set_ide(val & 0x80 != 0);
                    log::debug!("UPC: AT IDE {}", if val & 0x80 != 0 { "enabled" } else { "disabled" });
                }

                self.set_fdc(val & 0x20 != 0);
                log::debug!("UPC: FDC {}", if val & 0x20 != 0 { "enabled" } else { "disabled" });

                if val & 0x10 != 0 {
                    log::warn!("UPC: FDC power down mode not implemented");
                }
                if val & 0x0C != 0 {
                    log::warn!("UPC: RTCCS not implemented");
                }
                if val & 0x01 != 0 {
                    log::warn!("UPC: PS/2 mouse port power down not implemented");
                }
            }
            REG_MOUSE_BASE => {
                let mouse = (val != 0).then(|| val as u16 * 4);
                self.set_mouse(mouse);
                match mouse {
                    Some(base) => log::debug!("UPC: PS/2 mouse port at {:04X}, irq {:?}", base, self.mouse_irq),
                    None => log::debug!("UPC: PS/2 mouse port disabled"),
                }
            }
            REG_TEST => {
                if val != 0 {
                    log::warn!("UPC: test mode not implemented");
                }
            }
            _ => {}
        }
    }

    fn is_config_port(&self, port: u16) -> bool {
        port == UPC_CONFIG_PORT_A
            || port == UPC_CONFIG_PORT_B
            || (self.config_mode && (port == self.cri_addr || port == self.cap_addr()))
    }

    fn config_write(&mut self, port: u16, val: u8) {
        let mut step = false;

        match port {
            UPC_CONFIG_PORT_A => match self.handshake {
                0 => {
                    // The next value must be the one's complement of this one.
                    self.next_value = 0xFF - val;
                    step = true;
                }
                4 => {
                    let sum = ((self.cri_addr / 4) as u8).wrapping_add(val);
                    if sum == 0xFF {
                        self.config_mode = true;
                        log::debug!("UPC: in configuration mode at {:04X}", self.cri_addr);
                    }
                    else {
                        self.config_mode = false;
                        log::debug!("UPC: configuration mode failed (sum = {:02X})", sum);
                    }
                }
                _ => {}
            },
            UPC_CONFIG_PORT_B => match self.handshake {
                1 if val == self.next_value => step = true,
                2 if val == HANDSHAKE_MAGIC => step = true,
                3 => {
                    self.cri_addr = val as u16 * 4;
                    step = true;
                }
                _ => {}
            },
            _ => {}
        }

        if self.config_mode {
            if port == self.cri_addr {
                self.cri = val & 0x0F;
            }
            else if port == self.cap_addr() {
                if self.cri == CRI_EXIT {
                    log::debug!("UPC: exiting configuration mode");
                    self.config_mode = false;
                }
                else {
                    self.regs[self.cri as usize] = val;
                    self.update_config(self.cri as usize);
                }
            }
        }

        self.handshake = if step { self.handshake + 1 } else { 0 };
    }

    fn config_read(&self, port: u16) -> u8 {
        if !self.config_mode {
            return NO_IO_BYTE;
        }
        if port == self.cri_addr {
            self.cri
        }
        else if port == self.cap_addr() {
            if self.cri == CRI_EXIT {
                (self.cri_addr / 4) as u8
            }
            else {
                self.regs[self.cri as usize]
            }
        }
        else {
            NO_IO_BYTE
        }
    }
}

impl IoDevice for Upc {
    fn read_u8(&mut self, port: u16, _delta: DeviceRunTimeUnit) -> u8 {
        if self.is_config_port(port) {
            return self.config_read(port);
        }
        match self.mouse_ports() {
            Some((_, status)) if port == status => self.mouse_status,
            Some((data, _)) if port == data => {
                log::trace!("UPC: mouse data read");
                NO_IO_BYTE
            }
            _ => NO_IO_BYTE,
        }
    }

    fn write_u8(&mut self, port: u16, data: u8, _bus: Option<&mut BusInterface>, _delta: DeviceRunTimeUnit) {
        if self.is_config_port(port) {
            self.config_write(port, data);
            return;
        }
        match self.mouse_ports() {
            Some((_, status)) if port == status => self.mouse_status = data,
            Some((mdata, _)) if port == mdata => {
                log::trace!("UPC: mouse data write {:02X}", data);
                if let Some(sink) = self.mouse_sink.as_mut() {
                    sink(data);
                }
            }
            _ => {}
        }
    }

    fn port_list(&self) -> Vec<(String, u16)> {
        let mut ports = vec![
            (String::from("UPC Configuration Port A"), UPC_CONFIG_PORT_A),
            (String::from("UPC Configuration Port B"), UPC_CONFIG_PORT_B),
        ];
        if self.config_mode {
            ports.push((String::from("UPC Configuration Index"), self.cri_addr));
            ports.push((String::from("UPC Configuration Access"), self.cap_addr()));
        }
        if let Some((data, status)) = self.mouse_ports() {
            ports.push((String::from("UPC Mouse Data"), data));
            ports.push((String::from("UPC Mouse Status"), status));
        }
        ports
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::bus::NULL_DELTA_US;

    const CRI: u16 = 0x0F0;
    const CAP: u16 = 0x0F1;

    fn out(upc: &mut Upc, port: u16, data: u8) {
        upc.write_u8(port, data, None, NULL_DELTA_US);
    }

    fn inp(upc: &mut Upc, port: u16) -> u8 {
        upc.read_u8(port, NULL_DELTA_US)
    }

    fn handshake(upc: &mut Upc, index_port: u16, verify: u8) {
        out(upc, UPC_CONFIG_PORT_A, 0x55);
        out(upc, UPC_CONFIG_PORT_B, 0xAA);
        out(upc, UPC_CONFIG_PORT_B, HANDSHAKE_MAGIC);
        out(upc, UPC_CONFIG_PORT_B, (index_port / 4) as u8);
        out(upc, UPC_CONFIG_PORT_A, verify);
    }

    fn set_reg(upc: &mut Upc, index: u8, val: u8) {
        out(upc, CRI, index);
        out(upc, CAP, val);
    }

    #[test]
    fn defaults_enable_onboard_peripherals() {
        let mut upc = Upc::new(&UpcConfig::default());
        assert_eq!(
            upc.peripherals(),
            PeripheralState {
                serial: Some(0x3F8),
                parallel: Some(0x278),
                ide: true,
                fdc: true,
                mouse: None,
            }
        );
        let events: Vec<UpcEvent> = upc.drain_events().collect();
        assert_eq!(
            events,
            vec![
                UpcEvent::SerialEnabled {
                    base: 0x3F8,
                    irq: Some(4)
                },
                UpcEvent::ParallelEnabled {
                    base: 0x278,
                    irq: Some(7)
                },
                UpcEvent::IdeEnabled,
                UpcEvent::FdcEnabled,
            ]
        );
        assert!(!upc.in_config_mode());
        assert_eq!(upc.port_list().len(), 2);
    }

    #[test]
    fn handshake_opens_configuration_registers() {
        let mut upc = Upc::new(&UpcConfig::default());
        upc.drain_events().for_each(drop);

        // Nothing responds at the index port before the handshake.
        assert_eq!(inp(&mut upc, CRI), NO_IO_BYTE);

        handshake(&mut upc, CRI, 0xFF - 0x3C);
        assert!(upc.in_config_mode());
        let ports: Vec<u16> = upc.port_list().iter().map(|(_, port)| *port).collect();
        assert!(ports.contains(&CRI) && ports.contains(&CAP));

        out(&mut upc, CRI, 0x0F);
        assert_eq!(inp(&mut upc, CRI), 0x0F);
        assert_eq!(inp(&mut upc, CAP), 0x3C);
        out(&mut upc, CRI, 0x00);
        assert_eq!(inp(&mut upc, CAP), 0x0C);

        // Disable the serial port and move the parallel port.
        set_reg(&mut upc, 6, 0xDE);
        set_reg(&mut upc, 0, 0x08);
        assert_eq!(upc.peripherals().serial, None);
        assert_eq!(upc.peripherals().parallel, Some(0x378));
        let events: Vec<UpcEvent> = upc.drain_events().collect();
        assert_eq!(
            events,
            vec![
                UpcEvent::SerialDisabled,
                UpcEvent::ParallelEnabled {
                    base: 0x378,
                    irq: Some(7)
                },
            ]
        );

        set_reg(&mut upc, 0x0F, 0x00);
        assert!(!upc.in_config_mode());
        assert_eq!(upc.port_list().len(), 2);
        assert_eq!(inp(&mut upc, CAP), NO_IO_BYTE);
        assert_eq!(upc.regs()[6], 0xDE);
    }

    #[test]
    fn bad_handshake_is_rejected() {
        let mut upc = Upc::new(&UpcConfig::default());

        // Wrong complement restarts the sequence.
        out(&mut upc, UPC_CONFIG_PORT_A, 0x55);
        assert_eq!(upc.handshake, 1);
        out(&mut upc, UPC_CONFIG_PORT_B, 0x00);
        assert_eq!(upc.handshake, 0);

        // Wrong magic value
        out(&mut upc, UPC_CONFIG_PORT_A, 0x55);
        out(&mut upc, UPC_CONFIG_PORT_B, 0xAA);
        out(&mut upc, UPC_CONFIG_PORT_B, 0x37);
        assert_eq!(upc.handshake, 0);

        // Wrong checksum
        handshake(&mut upc, CRI, 0x00);
        assert!(!upc.in_config_mode());
        assert_eq!(upc.handshake, 0);

        // The sequence can be started again right away.
        handshake(&mut upc, CRI, 0xC3);
        assert!(upc.in_config_mode());

        upc.reset();
        assert!(!upc.in_config_mode());
    }

    #[test]
    fn mouse_interface() {
        let mut upc = Upc::new(&UpcConfig::default());
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        upc.set_mouse_sink(Box::new(move |byte| sink.borrow_mut().push(byte)));
        upc.drain_events().for_each(drop);

        handshake(&mut upc, CRI, 0xC3);
        set_reg(&mut upc, 13, 0x19);
        assert_eq!(upc.peripherals().mouse, Some(0x64));
        assert_eq!(
            upc.drain_events().collect::<Vec<_>>(),
            vec![UpcEvent::MouseEnabled {
                base: 0x64,
                irq: Some(2)
            }]
        );

        out(&mut upc, 0x65, MOUSE_ENABLE | MOUSE_INTS_ON);
        assert_eq!(inp(&mut upc, 0x65), MOUSE_ENABLE | MOUSE_INTS_ON);
        assert_eq!(inp(&mut upc, 0x64), NO_IO_BYTE);
        out(&mut upc, 0x64, 0xF4);
        assert_eq!(*received.borrow(), vec![0xF4]);

        set_reg(&mut upc, 13, 0x00);
        assert_eq!(upc.peripherals().mouse, None);
        assert!(!upc.port_list().iter().any(|(_, port)| *port == 0x64));
        assert_eq!(upc.drain_events().collect::<Vec<_>>(), vec![UpcEvent::MouseDisabled]);
    }

    #[test]
    fn ide_and_fdc_selection() {
        let mut upc = Upc::new(&UpcConfig {
            serial_irq: 3,
            parallel_irq: 0,
            mouse_irq: 2,
        });
        let events: Vec<UpcEvent> = upc.drain_events().collect();
        assert_eq!(
            events[..2],
            [
                UpcEvent::SerialEnabled {
                    base: 0x3F8,
                    irq: Some(3)
                },
                UpcEvent::ParallelEnabled { base: 0x278, irq: None },
            ]
        );

        handshake(&mut upc, CRI, 0xC3);
        // XT IDE mode is not available, so the interface turns off.
        set_reg(&mut upc, 12, 0xC0);
        assert!(!upc.peripherals().ide);
        assert!(!upc.peripherals().fdc);
        set_reg(&mut upc, 12, 0xA0);
        assert!(upc.peripherals().ide);
        assert!(upc.peripherals().fdc);
        set_reg(&mut upc, 12, 0x00);
        assert!(!upc.peripherals().ide);
        assert_eq!(
            upc.drain_events().collect::<Vec<_>>(),
            vec![
                UpcEvent::IdeDisabled,
                UpcEvent::FdcDisabled,
                UpcEvent::IdeEnabled,
                UpcEvent::FdcEnabled,
                UpcEvent::IdeDisabled,
                UpcEvent::FdcDisabled,
            ]
        );
    }
}
