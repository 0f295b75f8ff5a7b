//! Driver for National Instruments E-series and M-series boards built
//! around the DAQ-STC timing controller.
//!
//! The driver plugs into the [`comedi_core`] framework: [`attach`] builds a
//! [`comedi_core::Device`] whose subdevices are served by this crate, and
//! installs one interrupt handler for the whole board.
//!
//! # Supported Hardware
//!
//! - Classic E-series (PCI-MIO-16E-1, PCI-6052E, PCI-MIO-16XE-10)
//! - Simultaneous-sampling 611x and the 6143
//! - M-series (PCI-6221, PCI-6251, PCI-6281)
//!
//! See [`board::BOARDS`] for the full table.
//!
//! # Architecture
//!
//! ## Board access
//! - [`io::RegisterIo`] - raw register window supplied by the bus
//! - [`io::Stc`] - DAQ-STC register access (windowed or direct)
//! - [`device::Bus`] - register access plus shared soft copies
//!
//! ## Subdevices
//! - Analog input and output, static and correlated DIO, 8255 ports
//! - Counters ([`gpct`]), frequency output ([`fout`]), PFI ([`pfi`])
//! - Calibration DACs, EEPROM, serial DIO
//!
//! ## Data movement
//! - [`dma::TransferStrategy`] - MITE DMA or FIFO polling
//! - [`continuous::ContinuousReader`] - ring buffer to multiple sinks
//!
//! ## Testing
//! - [`sim::SimBoard`] - register-level board model
//! - [`sim::SimRig`] - a simulated board attached the normal way
//!
//! # Example
//!
//! ```
//! use comedi_core::{AnalogReference, ChanDesc, Insn};
//! use daq_driver_ni_mio::attach::subdev;
//! use daq_driver_ni_mio::sim::SimRig;
//!
//! let rig = SimRig::polled("pci-6221").unwrap();
//! let mut insn = Insn::read(ChanDesc::pack(3, 0, AnalogReference::Ground), 2);
//! rig.device.insn(subdev::AI, &mut insn).unwrap();
//! assert_eq!(insn.data.len(), 2);
//! ```

pub(crate) mod ai;
pub(crate) mod ao;
pub mod attach;
pub mod board;
pub(crate) mod calib;
pub(crate) mod chanlist;
pub mod config;
pub mod continuous;
pub mod device;
pub(crate) mod dio;
pub mod dma;
pub mod eeprom;
pub(crate) mod family;
pub mod fout;
pub mod gpct;
pub(crate) mod interrupt;
pub mod io;
pub mod pfi;
pub mod port8255;
pub mod ranges;
pub mod regs;
pub mod serial;
pub mod sim;
pub mod timing;

pub use attach::{attach, detach, subdev, DRIVER_NAME};
pub use board::{find_board, BoardInfo, BoardKind, BOARDS};
pub use config::{AttachConfig, ConfigError};
pub use continuous::{ContinuousReader, ReaderOutcome, ReaderStats, SampleBatch, SinkReceiver};
pub use device::{NiMio, StatsSnapshot};
pub use dma::{Mite, TransferStrategy};
pub use io::RegisterIo;
