//! Flash-type catalog and programming orchestration for memory-mapped
//! flash chips.
//!
//! The hardware access layer lives behind [`driver::FlashDriver`]; this
//! crate supplies the signature catalog, the configuration-file parser, the
//! JEDEC identity check, the progress protocol, and the sequencing of
//! detect, erase, program, and readback.

pub mod catalog;
pub mod config;
pub mod driver;
pub mod flashing;
pub mod jedec;
pub mod progress;

pub use self::catalog::{Catalog, Signature};
pub use self::driver::{Detection, Device, DummyConfig, DummyFlash, FlashDriver};
pub use self::flashing::{Options, run};
pub use self::progress::{ConsoleReporter, Event, EventSink, Phase};
