//! Programming orchestration: detect, validate, erase, program, read back.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::catalog::Catalog;
use crate::driver::{Device, FlashDriver};
use crate::jedec;
use crate::progress::EventSink;

/// Dump length used when the device size is unknown.
pub const FALLBACK_DUMP_SIZE: u32 = 0x0010_0000;

/// One invocation's worth of requested actions. Programming and readback
/// are independent; either, both, or neither may be set.
#[derive(Debug, Default, Clone)]
pub struct Options {
    pub program: Option<PathBuf>,
    pub readback: Option<PathBuf>,
    pub start_offset: u32,
}

/// Run the requested actions against the attached device.
///
/// Detection resolves the chip against the catalog; a chip the catalog does
/// not know degrades the run to read-only. Size and capability problems are
/// fatal before the driver mutates anything; an erase or program failure
/// reported by the driver is surfaced, a requested readback still runs, and
/// the run then ends with failure status.
pub fn run(
    driver: &mut dyn FlashDriver,
    catalog: &Catalog,
    opts: &Options,
    sink: &mut dyn EventSink,
) -> Result<()> {
    let detection = driver.detect(catalog)?;

    // An even-parity manufacturer id means the probe read garbage; no
    // operation is safe against the device at that point.
    if !jedec::is_valid_manufacturer_id(detection.manufacturer_id) {
        anyhow::bail!(
            "invalid manufacturer id 0x{:02X}; check the solder joints and \
             that the write-enable switch is on",
            detection.manufacturer_id
        );
    }

    let recognized = detection.signature.is_some();
    let mut device = match &detection.signature {
        Some(signature) => {
            log::info!(
                "detected: {} (0x{:02X}/0x{:02X}, {} KiB)",
                signature.description,
                detection.manufacturer_id,
                detection.device_id,
                signature.size_bytes / 1024
            );
            Device {
                manufacturer_id: detection.manufacturer_id,
                device_id: detection.device_id,
                description: signature.description.clone(),
                total_size: signature.size_bytes,
                start_offset: opts.start_offset,
                used_area: 0,
                write_capable: detection.write_capable,
            }
        }
        None => {
            log::warn!(
                "unknown device 0x{:02X}/0x{:02X}; try adding its signature to the \
                 configuration file",
                detection.manufacturer_id,
                detection.device_id
            );
            Device {
                manufacturer_id: detection.manufacturer_id,
                device_id: detection.device_id,
                description: "Unknown".to_string(),
                total_size: 0,
                start_offset: opts.start_offset,
                used_area: 0,
                write_capable: false,
            }
        }
    };

    if opts.program.is_some() && !recognized {
        anyhow::bail!("unrecognized devices can only be read back, not programmed");
    }

    // Advisory only; programming against a bad offset still fails the size
    // check below before any hardware is touched.
    if device.start_offset >= device.total_size {
        log::warn!(
            "start offset 0x{:X} is too large for device size 0x{:X}",
            device.start_offset,
            device.total_size
        );
    }

    let mut program_error = None;
    if let Some(path) = &opts.program {
        if !device.write_capable {
            anyhow::bail!("flash is locked, unable to write (is the chip write-protected?)");
        }
        let image = fs::read(path)
            .with_context(|| format!("unable to read image {}", path.display()))?;
        log::info!("programming {} ({} bytes)", path.display(), image.len());
        device.used_area = image.len() as u32;

        let available = u64::from(device.total_size).saturating_sub(u64::from(device.start_offset));
        if image.len() as u64 > available {
            anyhow::bail!("file is too large for the available space");
        }

        let result = driver
            .erase_covering(&device, sink)
            .map_err(|e| e.context("erase failed (could the chip be write-protected?)"))
            .and_then(|()| {
                driver
                    .program(&device, &image, sink)
                    .map_err(|e| e.context("programming error"))
            });
        if let Err(error) = result {
            log::error!("{:#}", error);
            program_error = Some(error);
        }
    }

    if let Some(path) = &opts.readback {
        let dump_size = if device.total_size == 0 {
            FALLBACK_DUMP_SIZE
        } else {
            device.total_size
        };
        let length = dump_size as usize;
        let window = driver.window();
        anyhow::ensure!(
            length <= window.len(),
            "dump length 0x{:X} exceeds the mapped window (0x{:X} bytes)",
            length,
            window.len()
        );
        log::info!("reading back 0x{:X} bytes to {}", length, path.display());
        let mut file = File::create(path)
            .with_context(|| format!("unable to create {}", path.display()))?;
        // one bulk write; a short write is not retried
        let _ = file
            .write(&window[..length])
            .with_context(|| format!("writing {}", path.display()))?;
    }

    match program_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Signature;
    use crate::driver::{Detection, DummyConfig, DummyFlash};
    use crate::progress::{Event, Phase};

    struct RecordingSink(Vec<Event>);

    impl EventSink for RecordingSink {
        fn report(&mut self, event: Event) -> bool {
            self.0.push(event);
            true
        }
    }

    /// Driver double that records how often the mutating operations run.
    #[derive(Debug)]
    struct MockDriver {
        detection: Detection,
        window: Vec<u8>,
        erase_calls: usize,
        program_calls: usize,
        fail_program: bool,
    }

    impl MockDriver {
        fn new(detection: Detection) -> Self {
            MockDriver {
                detection,
                window: vec![0xAB; 0x0020_0000],
                erase_calls: 0,
                program_calls: 0,
                fail_program: false,
            }
        }

        fn recognized(size_bytes: u32) -> Self {
            Self::new(Detection {
                manufacturer_id: 0x01,
                device_id: 0xAD,
                signature: Some(Signature::new(0x01, 0xAD, "MockChip", size_bytes)),
                write_capable: true,
            })
        }

        fn unrecognized() -> Self {
            Self::new(Detection {
                manufacturer_id: 0x01,
                device_id: 0x99,
                signature: None,
                write_capable: false,
            })
        }
    }

    impl FlashDriver for MockDriver {
        fn detect(&mut self, _catalog: &Catalog) -> Result<Detection> {
            Ok(self.detection.clone())
        }

        fn erase_covering(&mut self, _device: &Device, _sink: &mut dyn EventSink) -> Result<()> {
            self.erase_calls += 1;
            Ok(())
        }

        fn program(
            &mut self,
            _device: &Device,
            _image: &[u8],
            _sink: &mut dyn EventSink,
        ) -> Result<()> {
            self.program_calls += 1;
            if self.fail_program {
                anyhow::bail!("emulated programming fault");
            }
            Ok(())
        }

        fn window(&self) -> &[u8] {
            &self.window
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mmflash-test-{}-{}", std::process::id(), name))
    }

    fn catalog() -> Catalog {
        Catalog::builtin()
    }

    #[test]
    fn test_oversized_image_rejected_before_hardware() {
        let image_path = temp_path("oversized.bin");
        fs::write(&image_path, vec![0u8; 0x2000]).unwrap();

        let mut driver = MockDriver::recognized(0x1000);
        let opts = Options { program: Some(image_path.clone()), ..Options::default() };
        let error = run(&mut driver, &catalog(), &opts, &mut RecordingSink(Vec::new())).unwrap_err();

        assert!(error.to_string().contains("too large"));
        assert_eq!(driver.erase_calls, 0);
        assert_eq!(driver.program_calls, 0);
        let _ = fs::remove_file(&image_path);
    }

    #[test]
    fn test_invalid_manufacturer_id_is_always_fatal() {
        let mut driver = MockDriver::new(Detection {
            manufacturer_id: 0x03, // even parity
            device_id: 0xAD,
            signature: Some(Signature::new(0x03, 0xAD, "BadParity", 0x1000)),
            write_capable: true,
        });
        // read-only intent does not soften it
        let opts = Options { readback: Some(temp_path("never-written.bin")), ..Options::default() };
        let error = run(&mut driver, &catalog(), &opts, &mut RecordingSink(Vec::new())).unwrap_err();
        assert!(error.to_string().contains("invalid manufacturer id"));
    }

    #[test]
    fn test_unrecognized_device_cannot_be_programmed() {
        let image_path = temp_path("unknown.bin");
        fs::write(&image_path, vec![0u8; 16]).unwrap();

        let mut driver = MockDriver::unrecognized();
        let opts = Options {
            program: Some(image_path.clone()),
            readback: Some(temp_path("unknown-dump.bin")),
            ..Options::default()
        };
        let error = run(&mut driver, &catalog(), &opts, &mut RecordingSink(Vec::new())).unwrap_err();
        assert!(error.to_string().contains("read back"));
        assert_eq!(driver.erase_calls, 0);
        let _ = fs::remove_file(&image_path);
    }

    #[test]
    fn test_unrecognized_readback_uses_fallback_length() {
        let dump_path = temp_path("fallback-dump.bin");
        let mut driver = MockDriver::unrecognized();
        let opts = Options { readback: Some(dump_path.clone()), ..Options::default() };
        run(&mut driver, &catalog(), &opts, &mut RecordingSink(Vec::new())).unwrap();

        let dump = fs::read(&dump_path).unwrap();
        assert_eq!(dump.len(), FALLBACK_DUMP_SIZE as usize);
        assert!(dump.iter().all(|&b| b == 0xAB));
        let _ = fs::remove_file(&dump_path);
    }

    #[test]
    fn test_write_protected_device_is_fatal_before_erase() {
        let image_path = temp_path("protected.bin");
        fs::write(&image_path, vec![0u8; 16]).unwrap();

        let mut driver = MockDriver::recognized(0x1000);
        driver.detection.write_capable = false;
        let opts = Options { program: Some(image_path.clone()), ..Options::default() };
        let error = run(&mut driver, &catalog(), &opts, &mut RecordingSink(Vec::new())).unwrap_err();
        assert!(error.to_string().contains("locked"));
        assert_eq!(driver.erase_calls, 0);
        let _ = fs::remove_file(&image_path);
    }

    #[test]
    fn test_program_failure_still_runs_readback_and_fails() {
        let image_path = temp_path("failing.bin");
        let dump_path = temp_path("failing-dump.bin");
        fs::write(&image_path, vec![0u8; 16]).unwrap();

        let mut driver = MockDriver::recognized(0x1000);
        driver.fail_program = true;
        let opts = Options {
            program: Some(image_path.clone()),
            readback: Some(dump_path.clone()),
            ..Options::default()
        };
        let error = run(&mut driver, &catalog(), &opts, &mut RecordingSink(Vec::new())).unwrap_err();
        assert!(format!("{:#}", error).contains("emulated programming fault"));
        assert_eq!(driver.program_calls, 1);
        assert_eq!(fs::read(&dump_path).unwrap().len(), 0x1000);
        let _ = fs::remove_file(&image_path);
        let _ = fs::remove_file(&dump_path);
    }

    #[test]
    fn test_offset_beyond_size_is_advisory_for_readback() {
        let dump_path = temp_path("advisory-dump.bin");
        let mut driver = MockDriver::recognized(0x1000);
        let opts = Options {
            readback: Some(dump_path.clone()),
            start_offset: 0x2000,
            ..Options::default()
        };
        // only a warning; the dump still happens
        run(&mut driver, &catalog(), &opts, &mut RecordingSink(Vec::new())).unwrap();
        assert_eq!(fs::read(&dump_path).unwrap().len(), 0x1000);
        let _ = fs::remove_file(&dump_path);
    }

    #[test]
    fn test_end_to_end_program_with_dummy_backend() {
        let image_path = temp_path("happy.bin");
        let image: Vec<u8> = (0..=255u8).cycle().take(0x2000).collect();
        fs::write(&image_path, &image).unwrap();

        let mut flash = DummyFlash::new(DummyConfig::default());
        let mut sink = RecordingSink(Vec::new());
        let opts = Options {
            program: Some(image_path.clone()),
            start_offset: 0x1800,
            ..Options::default()
        };
        run(&mut flash, &catalog(), &opts, &mut sink).unwrap();

        assert_eq!(&flash.data()[0x1800..0x3800], &image[..]);

        let phases: Vec<Phase> = sink
            .0
            .iter()
            .filter_map(|event| match event {
                Event::Start(phase) => Some(*phase),
                _ => None,
            })
            .collect();
        assert_eq!(phases, [Phase::Erase, Phase::Program, Phase::Verify]);
        assert!(sink.0.iter().any(|e| matches!(e, Event::End(Phase::Verify))));
        assert!(!sink.0.iter().any(|e| matches!(e, Event::Error { .. })));
        let _ = fs::remove_file(&image_path);
    }

    #[test]
    fn test_readback_after_program_sees_programmed_data() {
        let image_path = temp_path("roundtrip.bin");
        let dump_path = temp_path("roundtrip-dump.bin");
        let image = vec![0x5A; 0x1000];
        fs::write(&image_path, &image).unwrap();

        let mut flash = DummyFlash::new(DummyConfig::default());
        let opts = Options {
            program: Some(image_path.clone()),
            readback: Some(dump_path.clone()),
            ..Options::default()
        };
        run(&mut flash, &catalog(), &opts, &mut RecordingSink(Vec::new())).unwrap();

        let dump = fs::read(&dump_path).unwrap();
        assert_eq!(dump.len(), 0x0004_0000);
        assert_eq!(&dump[..0x1000], &image[..]);
        assert!(dump[0x1000..].iter().all(|&b| b == 0xFF));
        let _ = fs::remove_file(&image_path);
        let _ = fs::remove_file(&dump_path);
    }
}
