//! Subdevice descriptors and the operation set drivers implement.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::chan::{AnalogReference, ChanDesc};
use crate::cmd::{Command, CommandMask};
use crate::error::{ComediError, Result, SubdeviceKind};
use crate::transfer::Transfer;

bitflags! {
    /// Subdevice capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SubdeviceFlags: u32 {
        /// Supports asynchronous commands
        const CMD = 0x0001;
        /// Commands produce data for the consumer
        const READABLE = 0x0002;
        /// Commands consume data from the producer
        const WRITABLE = 0x0004;
        /// Samples are 32-bit
        const LSAMPL = 0x0008;
    }
}

bitflags! {
    /// Analog references a channel accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ArefFlags: u32 {
        /// Ground referenced
        const GROUND = 0x1;
        /// Common referenced
        const COMMON = 0x2;
        /// Differential
        const DIFF = 0x4;
        /// Board-specific
        const OTHER = 0x8;
    }
}

impl ArefFlags {
    /// Whether a reference is accepted. An empty set accepts anything.
    pub fn accepts(self, aref: AnalogReference) -> bool {
        if self.is_empty() {
            return true;
        }
        let bit = match aref {
            AnalogReference::Ground => Self::GROUND,
            AnalogReference::Common => Self::COMMON,
            AnalogReference::Diff => Self::DIFF,
            AnalogReference::Other => Self::OTHER,
        };
        self.contains(bit)
    }
}

/// Channel description shared by all channels of a subdevice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Number of channels
    pub count: u32,
    /// Resolution in bits
    pub nb_bits: u32,
    /// Accepted analog references
    pub arefs: ArefFlags,
}

impl ChannelDescriptor {
    /// Bytes per sample in the ring buffer.
    pub fn sample_size(&self) -> usize {
        if self.nb_bits > 16 {
            4
        } else {
            2
        }
    }
}

/// Physical unit of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeUnit {
    /// Volts
    Volts,
    /// Milliamps
    MilliAmps,
    /// Fraction of an external reference
    External,
    /// Dimensionless
    None,
}

/// One selectable range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Physical minimum
    pub min: f64,
    /// Physical maximum
    pub max: f64,
    /// Unit
    pub unit: RangeUnit,
}

impl Range {
    /// `[-v, +v]` volts.
    pub const fn bipolar(v: f64) -> Self {
        Self {
            min: -v,
            max: v,
            unit: RangeUnit::Volts,
        }
    }

    /// `[0, v]` volts.
    pub const fn unipolar(v: f64) -> Self {
        Self {
            min: 0.0,
            max: v,
            unit: RangeUnit::Volts,
        }
    }

    /// Range scaled by an external reference.
    pub const fn external(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            unit: RangeUnit::External,
        }
    }

    /// Whether the range spans negative values.
    pub fn is_bipolar(&self) -> bool {
        self.min < 0.0
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            RangeUnit::Volts => " V",
            RangeUnit::MilliAmps => " mA",
            RangeUnit::External => " x ext",
            RangeUnit::None => "",
        };
        write!(f, "[{}, {}]{}", self.min, self.max, unit)
    }
}

/// Instruction kind for single-shot operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnKind {
    /// Read samples
    Read,
    /// Write samples
    Write,
    /// Masked digital read-modify-write: `data[0]` mask, `data[1]` bits
    Bits,
    /// Configuration: `data[0]` is the configuration id
    Config,
}

/// A single-shot instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    /// Kind
    pub kind: InsnKind,
    /// Target channel
    pub chan_desc: ChanDesc,
    /// In/out payload
    pub data: Vec<u32>,
}

impl Insn {
    /// Read `n` samples.
    pub fn read(chan_desc: ChanDesc, n: usize) -> Self {
        Self {
            kind: InsnKind::Read,
            chan_desc,
            data: vec![0; n],
        }
    }

    /// Write samples.
    pub fn write(chan_desc: ChanDesc, data: Vec<u32>) -> Self {
        Self {
            kind: InsnKind::Write,
            chan_desc,
            data,
        }
    }

    /// Masked digital update.
    pub fn bits(mask: u32, bits: u32) -> Self {
        Self {
            kind: InsnKind::Bits,
            chan_desc: ChanDesc::default(),
            data: vec![mask, bits],
        }
    }

    /// Configuration request.
    pub fn config(chan_desc: ChanDesc, data: Vec<u32>) -> Self {
        Self {
            kind: InsnKind::Config,
            chan_desc,
            data,
        }
    }

    /// Payload word or `InvalidArgument` when the payload is too short.
    pub fn word(&self, i: usize) -> Result<u32> {
        self.data
            .get(i)
            .copied()
            .ok_or_else(|| ComediError::invalid(format!("instruction payload needs {} words", i + 1)))
    }

    /// Set a payload word, growing the payload when needed.
    pub fn set_word(&mut self, i: usize, value: u32) {
        if self.data.len() <= i {
            self.data.resize(i + 1, 0);
        }
        self.data[i] = value;
    }
}

/// Configuration instruction ids (`data[0]` of a config instruction).
pub mod insn_config {
    #![allow(missing_docs)]
    pub const DIO_INPUT: u32 = 0;
    pub const DIO_OUTPUT: u32 = 1;
    pub const ALT_SOURCE: u32 = 20;
    pub const BLOCK_SIZE: u32 = 22;
    pub const FILTER: u32 = 24;
    pub const SERIAL_CLOCK: u32 = 26;
    pub const BIDIRECTIONAL_DATA: u32 = 27;
    pub const DIO_QUERY: u32 = 28;
    pub const PWM_OUTPUT: u32 = 29;
    pub const GET_PWM_OUTPUT: u32 = 30;
    pub const ARM: u32 = 31;
    pub const DISARM: u32 = 32;
    pub const GET_COUNTER_STATUS: u32 = 33;
    pub const RESET: u32 = 34;
    pub const SET_GATE_SRC: u32 = 2001;
    pub const GET_GATE_SRC: u32 = 2002;
    pub const SET_CLOCK_SRC: u32 = 2003;
    pub const GET_CLOCK_SRC: u32 = 2004;
    pub const GET_HARDWARE_BUFFER_SIZE: u32 = 2006;
    pub const SET_COUNTER_MODE: u32 = 4097;
    pub const SET_ROUTING: u32 = 4099;
    pub const GET_ROUTING: u32 = 4109;
    pub const GET_CMD_TIMING_CONSTRAINTS: u32 = 4110;
}

/// Operations a subdevice implements. Every method defaults to
/// `NotSupported` so drivers only fill in what the hardware does.
pub trait SubdeviceOps: Send + Sync {
    /// Single-shot read.
    fn insn_read(&self, _insn: &mut Insn) -> Result<()> {
        Err(ComediError::not_supported("insn_read"))
    }

    /// Single-shot write.
    fn insn_write(&self, _insn: &mut Insn) -> Result<()> {
        Err(ComediError::not_supported("insn_write"))
    }

    /// Masked digital update; `data[1]` returns the line state.
    fn insn_bits(&self, _insn: &mut Insn) -> Result<()> {
        Err(ComediError::not_supported("insn_bits"))
    }

    /// Configuration.
    fn insn_config(&self, _insn: &mut Insn) -> Result<()> {
        Err(ComediError::not_supported("insn_config"))
    }

    /// Trigger sources accepted by [`SubdeviceOps::do_cmdtest`].
    fn cmd_mask(&self) -> Option<CommandMask> {
        None
    }

    /// Validate and correct a command in place.
    fn do_cmdtest(&self, _cmd: &mut Command) -> Result<()> {
        Err(ComediError::not_supported("cmdtest"))
    }

    /// Program and arm a validated command.
    fn do_cmd(&self, _cmd: &Command) -> Result<()> {
        Err(ComediError::not_supported("cmd"))
    }

    /// Stop any running command and reset the hardware. Must be safe to
    /// call when idle.
    fn cancel(&self) -> Result<()> {
        Ok(())
    }

    /// Software trigger for `TRIG_INT` stages.
    fn inttrig(&self, _trignum: u32) -> Result<()> {
        Err(ComediError::not_supported("inttrig"))
    }
}

/// Operation set of a subdevice slot that exists only to keep indices stable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnusedOps;

impl SubdeviceOps for UnusedOps {}

/// What a driver registers for each subdevice.
#[derive(Clone)]
pub struct SubdeviceDescriptor {
    /// Function of the subdevice
    pub kind: SubdeviceKind,
    /// Capabilities
    pub flags: SubdeviceFlags,
    /// Channel description
    pub channels: ChannelDescriptor,
    /// Selectable ranges; empty when ranges do not apply
    pub ranges: &'static [Range],
    /// Operation set
    pub ops: Arc<dyn SubdeviceOps>,
    /// Asynchronous context for command-capable subdevices
    pub transfer: Option<Arc<Transfer>>,
}

impl SubdeviceDescriptor {
    /// An unused placeholder slot.
    pub fn unused() -> Self {
        Self {
            kind: SubdeviceKind::Unused,
            flags: SubdeviceFlags::empty(),
            channels: ChannelDescriptor {
                count: 0,
                nb_bits: 0,
                arefs: ArefFlags::empty(),
            },
            ranges: &[],
            ops: Arc::new(UnusedOps),
            transfer: None,
        }
    }

    /// Check a descriptor against the channel and range description.
    pub fn check_chan_desc(&self, index: usize, desc: ChanDesc) -> Result<()> {
        if desc.chan() >= self.channels.count {
            return Err(ComediError::InvalidChannel {
                subdevice: index,
                channel: desc.chan(),
                max: self.channels.count,
            });
        }
        let n_ranges = self.ranges.len().max(1) as u32;
        if desc.range() >= n_ranges {
            return Err(ComediError::InvalidRange {
                subdevice: index,
                range: desc.range(),
                max: n_ranges,
            });
        }
        if !self.channels.arefs.accepts(desc.aref()) {
            return Err(ComediError::invalid(format!(
                "subdevice {index} does not accept {} reference",
                desc.aref()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for SubdeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubdeviceDescriptor")
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("channels", &self.channels)
            .field("ranges", &self.ranges.len())
            .field("transfer", &self.transfer.is_some())
            .finish()
    }
}
