//! Progress event protocol and the console renderer.

use indicatif::{ProgressBar, ProgressStyle};

/// Width of the rendered progress bar, in cells.
pub const BAR_WIDTH: u32 = 40;

/// Long-running operation phases, in the order a programming run visits
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Erase,
    Program,
    Verify,
}

impl Phase {
    pub fn banner(self) -> &'static str {
        match self {
            Phase::Erase => "Erasing",
            Phase::Program => "Programming",
            Phase::Verify => "Verifying",
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Phase::Erase => "ERASE",
            Phase::Program => "PROGRAM",
            Phase::Verify => "VERIFY",
        }
    }
}

/// One progress report from a driver operation.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    /// A phase has begun.
    Start(Phase),
    /// `position` of `extent` units are done; `extent` is nonzero.
    Update { phase: Phase, position: u32, extent: u32 },
    /// The phase finished.
    End(Phase),
    /// The device disagreed with what was written: `address` is the
    /// offending offset, `detail` the packed byte values.
    Error { phase: Phase, address: u32, detail: u32 },
}

/// Where drivers deliver progress while an operation runs.
///
/// `report` is called synchronously from inside driver operations and must
/// return promptly. Returning `false` asks the driver to abandon the
/// current phase at its next opportunity.
pub trait EventSink {
    fn report(&mut self, event: Event) -> bool;
}

/// Pack a program/verify mismatch: written byte high, read byte low.
pub fn pack_mismatch(wrote: u8, read: u8) -> u32 {
    u32::from(wrote) << 8 | u32::from(read)
}

/// Pack an erase mismatch: only the byte read back.
pub fn pack_observed(read: u8) -> u32 {
    u32::from(read)
}

/// The written/read pair from an error detail.
pub fn unpack_mismatch(detail: u32) -> (u8, u8) {
    ((detail >> 8) as u8, detail as u8)
}

/// Whole percentage of `position` through `extent`, truncating.
pub fn percent(position: u32, extent: u32) -> u32 {
    (u64::from(position) * 100 / u64::from(extent)) as u32
}

/// How many of the [`BAR_WIDTH`] cells a given percentage fills,
/// truncating.
pub fn filled_cells(percent: u32) -> u32 {
    BAR_WIDTH * percent / 100
}

/// Renders progress events as an animated fixed-width terminal bar: a
/// banner line per phase, in-place updates while it runs, and a completion
/// line once it ends.
pub struct ConsoleReporter {
    bar: Option<ProgressBar>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        ConsoleReporter { bar: None }
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ConsoleReporter {
    fn report(&mut self, event: Event) -> bool {
        match event {
            Event::Start(phase) => {
                self.clear();
                println!(" {}...", phase.banner());
                let style = ProgressStyle::with_template("  {percent:>3}% .:({bar:40}):.")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("*.");
                self.bar = Some(ProgressBar::new(100).with_style(style));
            }
            Event::Update { position, extent, .. } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(u64::from(percent(position, extent)));
                }
            }
            Event::End(_) => {
                self.clear();
                println!("  Done");
            }
            Event::Error { phase, address, detail } => {
                self.clear();
                let (wrote, read) = unpack_mismatch(detail);
                match phase {
                    Phase::Erase => {
                        log::error!("{} error at +0x{:X}: read 0x{:02X}", phase.tag(), address, read)
                    }
                    Phase::Program | Phase::Verify => log::error!(
                        "{} error at +0x{:X}: wrote 0x{:02X} read 0x{:02X}",
                        phase.tag(),
                        address,
                        wrote,
                        read
                    ),
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_truncates() {
        assert_eq!(percent(20, 40), 50);
        assert_eq!(percent(0, 40), 0);
        assert_eq!(percent(40, 40), 100);
        assert_eq!(percent(1, 3), 33);
        // large extents must not overflow the multiply
        assert_eq!(percent(0xC000_0000, 0xFFFF_FFFF), 75);
    }

    #[test]
    fn test_bar_fill_rule() {
        // 20 of 40 units -> 50% -> exactly 20 of 40 cells
        assert_eq!(filled_cells(percent(20, 40)), 20);
        assert_eq!(filled_cells(0), 0);
        assert_eq!(filled_cells(100), BAR_WIDTH);
        assert_eq!(filled_cells(percent(1, 3)), 13);
    }

    #[test]
    fn test_mismatch_packing() {
        let detail = pack_mismatch(0xA5, 0x5A);
        assert_eq!(detail, 0xA55A);
        assert_eq!(unpack_mismatch(detail), (0xA5, 0x5A));
        // erase failures only carry the observed byte
        assert_eq!(unpack_mismatch(pack_observed(0x3C)), (0x00, 0x3C));
    }
}
