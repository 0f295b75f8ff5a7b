//! Comedi acquisition framework.
//!
//! This crate holds everything a data-acquisition driver needs that is not
//! tied to a particular board:
//!
//! - [`ChanDesc`] channel descriptor encoding
//! - [`Command`], trigger sources and the [`CommandMask`] step-1 check
//! - [`RingBuffer`] with events and DMA prepare/commit bookkeeping
//! - [`Transfer`], the per-subdevice asynchronous context
//! - [`SubdeviceOps`] and [`SubdeviceDescriptor`], the driver seam
//! - [`Device`], the subdevice registry and command lifecycle
//! - [`IrqSlot`] interrupt registration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  cmdtest/command/cancel   ┌────────────────────┐
//! │   caller    │ ────────────────────────► │      Device        │
//! └─────────────┘                           │  (registry, lock)  │
//!        ▲ read/write/poll                  └─────────┬──────────┘
//!        │                                            │ SubdeviceOps
//! ┌──────┴──────┐   put/commit (IRQ, DMA)   ┌─────────▼──────────┐
//! │  Transfer   │ ◄──────────────────────── │      driver        │
//! │ RingBuffer  │                           │ (interrupt handler)│
//! └─────────────┘                           └────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```
//! use comedi_core::{AnalogReference, ChanDesc, Command, TrigSrc};
//!
//! let mut cmd = Command::builder(0)
//!     .start(TrigSrc::NOW, 0)
//!     .scan_begin(TrigSrc::TIMER, 2_000_000)
//!     .convert(TrigSrc::TIMER, 500_000)
//!     .stop(TrigSrc::COUNT, 100)
//!     .channels((0..4).map(|c| ChanDesc::pack(c, 0, AnalogReference::Diff)))
//!     .build();
//! cmd.stop_arg = 0;
//! assert_eq!(cmd.total_samples(), Some(0));
//! ```

pub mod buffer;
pub mod chan;
pub mod cmd;
pub mod device;
pub mod error;
pub mod irq;
pub mod subdevice;
pub mod transfer;
pub mod wait;

pub use buffer::{BufDirection, BufEvents, RingBuffer};
pub use chan::{AnalogReference, ChanDesc, ChanFlags};
pub use cmd::{CmdFlags, CmdTestStep, Command, CommandBuilder, CommandMask, Corrections, RoundMode, TrigSrc};
pub use device::{Device, DeviceInfo, SubdeviceInfo};
pub use error::{ComediError, Result, SubdeviceKind};
pub use irq::{IrqFlags, IrqHandler, IrqReturn, IrqSlot};
pub use subdevice::{
    insn_config, ArefFlags, ChannelDescriptor, Insn, InsnKind, Range, RangeUnit,
    SubdeviceDescriptor, SubdeviceFlags, SubdeviceOps, UnusedOps,
};
pub use transfer::{Munge, Transfer, TransferKind};
