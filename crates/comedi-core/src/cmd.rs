//! Asynchronous acquisition commands.
//!
//! A [`Command`] describes a streaming acquisition as five trigger stages:
//!
//! ```text
//! start ──► scan_begin ──► convert × scan_end ──► ... ──► stop
//! ```
//!
//! Each stage pairs a [`TrigSrc`] with an argument whose meaning depends on
//! the source (nanoseconds for `TIMER`, an encoded line for `EXT`, a count
//! for `COUNT`). Drivers validate commands in four steps, see
//! [`CmdTestStep`], correcting fields in place so callers can resubmit.
//!
//! # Example
//!
//! ```
//! use comedi_core::{AnalogReference, ChanDesc, Command, TrigSrc};
//!
//! let cmd = Command::builder(0)
//!     .start(TrigSrc::NOW, 0)
//!     .scan_begin(TrigSrc::TIMER, 2_000_000)
//!     .convert(TrigSrc::TIMER, 500_000)
//!     .stop(TrigSrc::COUNT, 100)
//!     .channels((0..4).map(|c| ChanDesc::pack(c, 0, AnalogReference::Ground)))
//!     .build();
//! assert_eq!(cmd.scan_end_arg, 4);
//! ```

use std::fmt;

use bitflags::bitflags;

use crate::chan::ChanDesc;
use crate::error::{ComediError, Result};

bitflags! {
    /// Trigger sources. A command field carries exactly one of them; a
    /// [`CommandMask`] carries the set a subdevice supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TrigSrc: u32 {
        /// No trigger (run forever)
        const NONE = 0x0001;
        /// Trigger immediately
        const NOW = 0x0002;
        /// Follow the previous stage
        const FOLLOW = 0x0004;
        /// Absolute time
        const TIME = 0x0008;
        /// Onboard periodic timer
        const TIMER = 0x0010;
        /// After N events
        const COUNT = 0x0020;
        /// External line
        const EXT = 0x0040;
        /// Software (internal) trigger
        const INT = 0x0080;
        /// Driver-specific
        const OTHER = 0x0100;
    }
}

bitflags! {
    /// Command flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CmdFlags: u32 {
        /// Wake the consumer at every end of scan
        const WAKE_EOS = 0x0020;
        /// Round timer arguments down
        const ROUND_DOWN = 0x0001_0000;
        /// Round timer arguments up
        const ROUND_UP = 0x0002_0000;
    }
}

/// Rounding applied when converting a period into timer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundMode {
    /// Closest achievable period
    #[default]
    Nearest,
    /// Largest achievable period not above the request
    Down,
    /// Smallest achievable period not below the request
    Up,
}

impl CmdFlags {
    const ROUND_MASK: u32 = 0x0003_0000;

    /// Rounding mode requested by the flags.
    pub fn round_mode(self) -> RoundMode {
        match self.bits() & Self::ROUND_MASK {
            0x0001_0000 => RoundMode::Down,
            0x0002_0000 => RoundMode::Up,
            _ => RoundMode::Nearest,
        }
    }
}

/// Step of the command test that rejected a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CmdTestStep {
    /// A source is not supported or not unique
    Sources = 1,
    /// An argument had to be forced for its source
    Arguments = 2,
    /// A numeric argument was clamped into range
    Bounds = 3,
    /// A timer argument was not exactly achievable
    Quantization = 4,
}

impl fmt::Display for CmdTestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sources => "sources",
            Self::Arguments => "arguments",
            Self::Bounds => "bounds",
            Self::Quantization => "quantization",
        };
        write!(f, "{} ({name})", *self as i32)
    }
}

/// An acquisition command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Subdevice index
    pub idx_subd: usize,
    /// Flags
    pub flags: CmdFlags,
    /// Start trigger
    pub start_src: TrigSrc,
    /// Start argument
    pub start_arg: u32,
    /// Scan begin trigger
    pub scan_begin_src: TrigSrc,
    /// Scan begin argument
    pub scan_begin_arg: u32,
    /// Convert trigger
    pub convert_src: TrigSrc,
    /// Convert argument
    pub convert_arg: u32,
    /// Scan end trigger
    pub scan_end_src: TrigSrc,
    /// Scan end argument (number of conversions per scan)
    pub scan_end_arg: u32,
    /// Stop trigger
    pub stop_src: TrigSrc,
    /// Stop argument (number of scans for `COUNT`)
    pub stop_arg: u32,
    /// Channel descriptors in scan order
    pub chan_descs: Vec<ChanDesc>,
}

impl Command {
    /// Start building a command for a subdevice.
    pub fn builder(idx_subd: usize) -> CommandBuilder {
        CommandBuilder::new(idx_subd)
    }

    /// Number of channels in the scan list.
    pub fn nb_chan(&self) -> u32 {
        self.chan_descs.len() as u32
    }

    /// Total samples the command produces, `None` when it runs until cancelled.
    pub fn total_samples(&self) -> Option<u64> {
        (self.stop_src == TrigSrc::COUNT)
            .then(|| u64::from(self.stop_arg) * u64::from(self.nb_chan()))
    }
}

/// Builder for [`Command`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    cmd: Command,
    scan_end_set: bool,
}

impl CommandBuilder {
    fn new(idx_subd: usize) -> Self {
        Self {
            cmd: Command {
                idx_subd,
                flags: CmdFlags::empty(),
                start_src: TrigSrc::NOW,
                start_arg: 0,
                scan_begin_src: TrigSrc::TIMER,
                scan_begin_arg: 0,
                convert_src: TrigSrc::TIMER,
                convert_arg: 0,
                scan_end_src: TrigSrc::COUNT,
                scan_end_arg: 0,
                stop_src: TrigSrc::NONE,
                stop_arg: 0,
                chan_descs: Vec::new(),
            },
            scan_end_set: false,
        }
    }

    /// Set flags.
    pub fn flags(mut self, flags: CmdFlags) -> Self {
        self.cmd.flags = flags;
        self
    }

    /// Set the start trigger.
    pub fn start(mut self, src: TrigSrc, arg: u32) -> Self {
        self.cmd.start_src = src;
        self.cmd.start_arg = arg;
        self
    }

    /// Set the scan begin trigger.
    pub fn scan_begin(mut self, src: TrigSrc, arg: u32) -> Self {
        self.cmd.scan_begin_src = src;
        self.cmd.scan_begin_arg = arg;
        self
    }

    /// Set the convert trigger.
    pub fn convert(mut self, src: TrigSrc, arg: u32) -> Self {
        self.cmd.convert_src = src;
        self.cmd.convert_arg = arg;
        self
    }

    /// Set the scan end trigger explicitly (defaults to `COUNT` of the channel count).
    pub fn scan_end(mut self, src: TrigSrc, arg: u32) -> Self {
        self.cmd.scan_end_src = src;
        self.cmd.scan_end_arg = arg;
        self.scan_end_set = true;
        self
    }

    /// Set the stop trigger.
    pub fn stop(mut self, src: TrigSrc, arg: u32) -> Self {
        self.cmd.stop_src = src;
        self.cmd.stop_arg = arg;
        self
    }

    /// Set the scan list.
    pub fn channels(mut self, descs: impl IntoIterator<Item = ChanDesc>) -> Self {
        self.cmd.chan_descs = descs.into_iter().collect();
        self
    }

    /// Finish the command. No validation happens here; run the subdevice's
    /// command test.
    pub fn build(mut self) -> Command {
        if !self.scan_end_set {
            self.cmd.scan_end_arg = self.cmd.nb_chan();
        }
        self.cmd
    }
}

/// Trigger sources a subdevice accepts for each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMask {
    /// Allowed start sources
    pub start_src: TrigSrc,
    /// Allowed scan begin sources
    pub scan_begin_src: TrigSrc,
    /// Allowed convert sources
    pub convert_src: TrigSrc,
    /// Allowed scan end sources
    pub scan_end_src: TrigSrc,
    /// Allowed stop sources
    pub stop_src: TrigSrc,
}

impl CommandMask {
    /// Step 1: each source is a single supported trigger.
    pub fn check(&self, cmd: &Command) -> Result<()> {
        let fields = [
            (cmd.start_src, self.start_src),
            (cmd.scan_begin_src, self.scan_begin_src),
            (cmd.convert_src, self.convert_src),
            (cmd.scan_end_src, self.scan_end_src),
            (cmd.stop_src, self.stop_src),
        ];
        let ok = fields
            .iter()
            .all(|(src, mask)| src.bits().count_ones() == 1 && mask.contains(*src));
        if ok {
            Ok(())
        } else {
            Err(ComediError::CmdTest {
                step: CmdTestStep::Sources,
            })
        }
    }
}

/// Accumulates in-place argument corrections for one command test step.
///
/// ```
/// use comedi_core::{CmdTestStep, Corrections};
///
/// let mut arg = 0;
/// let mut fix = Corrections::new(CmdTestStep::Bounds);
/// fix.at_least(&mut arg, 1);
/// assert_eq!(arg, 1);
/// assert!(fix.finish().is_err());
/// ```
#[derive(Debug)]
pub struct Corrections {
    step: CmdTestStep,
    changed: bool,
}

impl Corrections {
    /// Start collecting corrections for a step.
    pub fn new(step: CmdTestStep) -> Self {
        Self {
            step,
            changed: false,
        }
    }

    /// Force an argument to a value.
    pub fn force(&mut self, arg: &mut u32, value: u32) {
        if *arg != value {
            *arg = value;
            self.changed = true;
        }
    }

    /// Raise an argument to a minimum.
    pub fn at_least(&mut self, arg: &mut u32, min: u32) {
        if *arg < min {
            *arg = min;
            self.changed = true;
        }
    }

    /// Lower an argument to a maximum.
    pub fn at_most(&mut self, arg: &mut u32, max: u32) {
        if *arg > max {
            *arg = max;
            self.changed = true;
        }
    }

    /// Record a rejection without touching an argument.
    pub fn reject(&mut self) {
        self.changed = true;
    }

    /// Whether any correction was recorded.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// `Ok` when nothing changed, otherwise the step's rejection.
    pub fn finish(self) -> Result<()> {
        if self.changed {
            Err(ComediError::CmdTest { step: self.step })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::AnalogReference;

    fn ai_mask() -> CommandMask {
        CommandMask {
            start_src: TrigSrc::NOW | TrigSrc::INT | TrigSrc::EXT,
            scan_begin_src: TrigSrc::TIMER | TrigSrc::EXT,
            convert_src: TrigSrc::TIMER | TrigSrc::EXT | TrigSrc::NOW,
            scan_end_src: TrigSrc::COUNT,
            stop_src: TrigSrc::COUNT | TrigSrc::NONE,
        }
    }

    fn base_cmd() -> Command {
        Command::builder(0)
            .scan_begin(TrigSrc::TIMER, 1000)
            .convert(TrigSrc::TIMER, 100)
            .stop(TrigSrc::COUNT, 10)
            .channels([ChanDesc::pack(0, 0, AnalogReference::Ground)])
            .build()
    }

    #[test]
    fn test_mask_accepts_supported_sources() {
        assert!(ai_mask().check(&base_cmd()).is_ok());
    }

    #[test]
    fn test_mask_rejects_multiple_bits() {
        let mut cmd = base_cmd();
        cmd.start_src = TrigSrc::NOW | TrigSrc::INT;
        let err = ai_mask().check(&cmd).unwrap_err();
        assert_eq!(
            err,
            ComediError::CmdTest {
                step: CmdTestStep::Sources
            }
        );
    }

    #[test]
    fn test_mask_rejects_unsupported_and_empty() {
        let mut cmd = base_cmd();
        cmd.scan_begin_src = TrigSrc::NOW;
        assert!(ai_mask().check(&cmd).is_err());

        let mut cmd = base_cmd();
        cmd.stop_src = TrigSrc::empty();
        assert!(ai_mask().check(&cmd).is_err());
    }

    #[test]
    fn test_round_mode_decoding() {
        assert_eq!(CmdFlags::empty().round_mode(), RoundMode::Nearest);
        assert_eq!(CmdFlags::ROUND_DOWN.round_mode(), RoundMode::Down);
        assert_eq!(CmdFlags::ROUND_UP.round_mode(), RoundMode::Up);
        assert_eq!(
            (CmdFlags::ROUND_UP | CmdFlags::ROUND_DOWN).round_mode(),
            RoundMode::Nearest
        );
    }

    #[test]
    fn test_builder_defaults_scan_end_to_channel_count() {
        let cmd = Command::builder(2)
            .channels((0..3).map(|c| ChanDesc::pack(c, 0, AnalogReference::Diff)))
            .build();
        assert_eq!(cmd.scan_end_arg, 3);
        assert_eq!(cmd.idx_subd, 2);
        assert_eq!(cmd.total_samples(), None);
    }

    #[test]
    fn test_corrections_untouched_is_ok() {
        let mut arg = 5;
        let mut fix = Corrections::new(CmdTestStep::Arguments);
        fix.force(&mut arg, 5);
        fix.at_least(&mut arg, 1);
        fix.at_most(&mut arg, 10);
        assert!(!fix.changed());
        assert!(fix.finish().is_ok());
    }
}
