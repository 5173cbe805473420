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

    Headless front-end main library component.

*/

//! Headless front-end: builds the chipset from the configuration file, reports what was
//! installed and runs the disk controller self-test.

#![forbid(unsafe_code)]

pub mod selftest;

use anyhow::Context;

use pc5086_core::bus::{BusInterface, DeviceEvent};

use crate::selftest::{run_selftest, SelfTestParams};

pub const DEFAULT_CONFIG_FILE: &str = "./pc5086.toml";

fn log_events(bus: &mut BusInterface) {
    while let Some(event) = bus.get_event() {
        match event {
            DeviceEvent::TurboToggled(turbo) => log::info!("Turbo {}", if turbo { "on" } else { "off" }),
            DeviceEvent::Upc(upc_event) => log::info!("UPC: {:?}", upc_event),
        }
    }
}

pub fn run() -> Result<(), anyhow::Error> {
    // Resolve the configuration by parsing the configuration toml and merging it with command
    // line arguments.
    let config = pc5086_config::read_config_file(DEFAULT_CONFIG_FILE).with_context(|| {
        format!(
            "Couldn't load configuration. Create {} or provide the path to a configuration file with --configfile.",
            DEFAULT_CONFIG_FILE
        )
    })?;

    let mut bus = BusInterface::new();
    bus.install_devices(&config.machine, &config.emulator.rom_dir)?;
    log_events(&mut bus);

    for desc in bus.mem_descriptors() {
        log::info!(
            "{} at {:05X}-{:05X}",
            if desc.read_only { "ROM" } else { "RAM image" },
            desc.address,
            (desc.address + desc.size).saturating_sub(1)
        );
    }
    if let Some(chipset) = bus.chipset() {
        log::info!(
            "SuperXT: {} EMS pages, page registers at {:04X}, frame at {:05X}",
            chipset.ems_pages(),
            chipset.ems_port(),
            chipset.ems_base()
        );
    }
    if let Some(video) = bus.video() {
        log::info!("CT451: {}K VRAM, ROM at {:05X}", video.vram_kb(), video.rom_address());
    }

    if bus.xta().is_none() {
        log::warn!("No XTA controller configured; nothing to test");
        return Ok(());
    }

    let st = &config.selftest;
    let params = SelfTestParams {
        drive: st.drive,
        cylinder: st.cylinder,
        head: st.head,
        sector: st.sector,
        count: st.count,
        dma: st.dma,
    };
    let report = run_selftest(&mut bus, &params)?;
    log_events(&mut bus);

    if report.passed() {
        println!(
            "Self-test passed: read {} bytes from drive {} at {}",
            report.data.len(),
            params.drive,
            st.chs()
        );
    }
    else {
        println!(
            "Self-test failed: ready completion {:02X}, read completion {:02X}, sense {:02X?}",
            report.ready_completion, report.read_completion, report.sense
        );
    }

    bus.remove_xta()?;
    Ok(())
}
