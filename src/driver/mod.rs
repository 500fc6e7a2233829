//! Flash programming backend seam.
//!
//! The hardware access layer - descriptor probing, chip command sequences,
//! the memory-mapped window itself - lives behind [`FlashDriver`]. The
//! orchestrator drives whichever backend is attached without knowing how it
//! talks to the part.

use anyhow::Result;

use crate::catalog::{Catalog, Signature};
use crate::progress::EventSink;

pub use self::dummy::{DummyConfig, DummyFlash};

mod dummy;

/// What a probe learned about the attached chip.
#[derive(Debug, Clone)]
pub struct Detection {
    pub manufacturer_id: u8,
    pub device_id: u8,
    /// Catalog entry the probed ids resolved to, if any.
    pub signature: Option<Signature>,
    pub write_capable: bool,
}

/// Descriptor of the device being operated on.
#[derive(Debug, Clone)]
pub struct Device {
    pub manufacturer_id: u8,
    pub device_id: u8,
    pub description: String,
    pub total_size: u32,
    pub start_offset: u32,
    /// Length of the loaded image, once one is loaded.
    pub used_area: u32,
    pub write_capable: bool,
}

/// A flash programming backend.
///
/// Erase and program stream their progress through the sink; when the sink
/// returns `false` the backend abandons the phase and reports failure.
/// Errors carry the diagnostic text shown to the operator.
pub trait FlashDriver: std::fmt::Debug {
    /// Probe the chip and resolve its ids against the catalog. A pair the
    /// catalog does not know is not an error; it comes back with
    /// `signature: None` and the probed ids.
    fn detect(&mut self, catalog: &Catalog) -> Result<Detection>;

    /// Erase the smallest erase-block-aligned range covering
    /// `start_offset..start_offset + used_area`.
    fn erase_covering(&mut self, device: &Device, sink: &mut dyn EventSink) -> Result<()>;

    /// Program `image` at `start_offset`, then verify it against the
    /// device.
    fn program(&mut self, device: &Device, image: &[u8], sink: &mut dyn EventSink) -> Result<()>;

    /// The raw memory-mapped device window, addressable from offset zero.
    /// The window covers at least the device's total size.
    fn window(&self) -> &[u8];
}

/// Open a programming backend by name.
///
/// `dummy` is the only built-in backend; hardware backends implement
/// [`FlashDriver`] out of tree.
pub fn open(name: &str) -> Result<Box<dyn FlashDriver>> {
    match name {
        "dummy" => Ok(Box::new(DummyFlash::new(DummyConfig::default()))),
        other => anyhow::bail!("unknown programmer '{}' (supported: dummy)", other),
    }
}
