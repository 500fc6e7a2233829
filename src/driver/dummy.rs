//! In-memory flash emulation, for development and tests.

use anyhow::Result;

use crate::catalog::Catalog;
use crate::progress::{Event, EventSink, Phase, pack_mismatch};

use super::{Detection, Device, FlashDriver};

/// Size of the mapped window the emulator exposes, matching the aperture a
/// memory-mapped firmware flash sits behind.
const WINDOW_SIZE: usize = 0x0100_0000;

/// Shape of the emulated chip.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    pub manufacturer_id: u8,
    pub device_id: u8,
    /// Total chip size in bytes; must not exceed the mapped window.
    pub size: u32,
    /// Smallest erasable unit.
    pub sector_size: u32,
    /// Programming granularity; also the update cadence.
    pub page_size: u32,
    pub write_protected: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        // SST 49LF020 from the built-in table
        DummyConfig {
            manufacturer_id: 0xBF,
            device_id: 0x61,
            size: 0x0004_0000,
            sector_size: 0x1000,
            page_size: 0x100,
            write_protected: false,
        }
    }
}

/// Emulated flash chip behind a flat mapped window.
///
/// Erase sets the covering sectors to 0xFF; programming clears bits the way
/// NOR cells do, so programming over unerased data shows up in the verify
/// pass exactly as it would on hardware.
#[derive(Debug)]
pub struct DummyFlash {
    config: DummyConfig,
    window: Vec<u8>,
}

impl DummyFlash {
    pub fn new(config: DummyConfig) -> Self {
        DummyFlash {
            config,
            window: vec![0xFF; WINDOW_SIZE],
        }
    }

    /// Emulated chip whose cells start out holding `data`.
    pub fn with_data(config: DummyConfig, data: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = data.len().min(flash.window.len());
        flash.window[..len].copy_from_slice(&data[..len]);
        flash
    }

    /// The emulated chip contents.
    pub fn data(&self) -> &[u8] {
        &self.window[..self.config.size as usize]
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Sector-aligned range covering the device's used area.
    fn covering_range(&self, device: &Device) -> (u32, u32) {
        let sector = self.config.sector_size;
        let start = device.start_offset / sector * sector;
        let end = (device.start_offset + device.used_area).div_ceil(sector) * sector;
        (start, end.min(self.config.size))
    }
}

impl FlashDriver for DummyFlash {
    fn detect(&mut self, catalog: &Catalog) -> Result<Detection> {
        let signature = catalog
            .find(self.config.manufacturer_id, self.config.device_id)
            .cloned();
        log::debug!(
            "dummy probe 0x{:02X}/0x{:02X}: {}",
            self.config.manufacturer_id,
            self.config.device_id,
            signature.as_ref().map_or("no match", |s| s.description.as_str())
        );
        Ok(Detection {
            manufacturer_id: self.config.manufacturer_id,
            device_id: self.config.device_id,
            signature,
            write_capable: !self.config.write_protected,
        })
    }

    fn erase_covering(&mut self, device: &Device, sink: &mut dyn EventSink) -> Result<()> {
        let (start, end) = self.covering_range(device);
        let extent = end - start;
        let sector = self.config.sector_size as usize;

        sink.report(Event::Start(Phase::Erase));
        let mut position = 0;
        while position < extent {
            let lo = (start + position) as usize;
            let hi = (lo + sector).min(end as usize);
            self.window[lo..hi].fill(0xFF);
            position += (hi - lo) as u32;
            if !sink.report(Event::Update { phase: Phase::Erase, position, extent }) {
                anyhow::bail!("erase aborted at +0x{:X}", start + position);
            }
        }
        sink.report(Event::End(Phase::Erase));
        Ok(())
    }

    fn program(&mut self, device: &Device, image: &[u8], sink: &mut dyn EventSink) -> Result<()> {
        if self.config.write_protected {
            anyhow::bail!("device is write-protected");
        }
        let base = device.start_offset as usize;
        let page = self.config.page_size as usize;
        let extent = image.len() as u32;

        sink.report(Event::Start(Phase::Program));
        let mut done = 0;
        for chunk in image.chunks(page) {
            for (offset, &byte) in chunk.iter().enumerate() {
                // NOR cells: programming only clears bits
                self.window[base + done + offset] &= byte;
            }
            done += chunk.len();
            if !sink.report(Event::Update { phase: Phase::Program, position: done as u32, extent }) {
                anyhow::bail!("programming aborted at +0x{:X}", base + done);
            }
        }
        sink.report(Event::End(Phase::Program));

        sink.report(Event::Start(Phase::Verify));
        for (offset, &wrote) in image.iter().enumerate() {
            let read = self.window[base + offset];
            if read != wrote {
                sink.report(Event::Error {
                    phase: Phase::Verify,
                    address: (base + offset) as u32,
                    detail: pack_mismatch(wrote, read),
                });
                anyhow::bail!(
                    "verify mismatch at +0x{:X}: wrote 0x{:02X} read 0x{:02X}",
                    base + offset,
                    wrote,
                    read
                );
            }
            let position = (offset + 1) as u32;
            if position % self.config.page_size == 0 || position == extent {
                if !sink.report(Event::Update { phase: Phase::Verify, position, extent }) {
                    anyhow::bail!("verify aborted at +0x{:X}", base + offset);
                }
            }
        }
        sink.report(Event::End(Phase::Verify));
        Ok(())
    }

    fn window(&self) -> &[u8] {
        &self.window
    }
}
