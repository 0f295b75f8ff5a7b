//! Front end for the NI E/M-series acquisition engine.
//!
//! The `ni-mio` binary attaches a board from the driver's table to the
//! register simulator and exercises it through the framework API:
//!
//! - [`config`] - layered configuration (defaults, TOML, `NI_MIO_*`
//!   environment, command line)
//! - [`bench`] - attach report, streamed acquisition, waveform output
//! - [`logging`] - tracing subscriber setup
//! - [`error`] - the front end's error type
//!
//! # Example
//! ```
//! use ni_mio_daq::bench::Bench;
//! use ni_mio_daq::config::AppConfig;
//!
//! let bench = Bench::attach(&AppConfig::default()).unwrap();
//! println!("{}", bench.report());
//! ```

pub mod bench;
pub mod config;
pub mod error;
pub mod logging;

pub use bench::{AcquireSummary, AttachReport, Bench, WaveformSummary};
pub use config::{AppConfig, Overrides};
pub use error::{AppError, AppResult};
