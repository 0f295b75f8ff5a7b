//! Error types for Comedi operations.

use std::fmt;

use thiserror::Error;

use crate::cmd::CmdTestStep;

/// Result type alias for Comedi operations.
pub type Result<T> = std::result::Result<T, ComediError>;

/// Errors that can occur while validating, running or servicing acquisitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComediError {
    /// A caller-supplied value is structurally invalid
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong
        message: String,
    },

    /// Invalid subdevice index
    #[error("Invalid subdevice {index}: device has {count} subdevices")]
    InvalidSubdevice {
        /// Requested index
        index: usize,
        /// Number of registered subdevices
        count: usize,
    },

    /// Channel descriptor references a channel the subdevice does not have
    #[error("Invalid channel {channel}: subdevice {subdevice} has {max} channels")]
    InvalidChannel {
        /// Subdevice index
        subdevice: usize,
        /// Requested channel
        channel: u32,
        /// Number of channels
        max: u32,
    },

    /// Channel descriptor references a range the subdevice does not have
    #[error("Invalid range {range} on subdevice {subdevice}: {max} ranges available")]
    InvalidRange {
        /// Subdevice index
        subdevice: usize,
        /// Requested range index
        range: u32,
        /// Number of available ranges
        max: u32,
    },

    /// Subdevice already runs a command or a resource slot is taken
    #[error("Subdevice {subdevice} is busy")]
    Busy {
        /// Subdevice index
        subdevice: usize,
    },

    /// Command test rejected the command at the given step
    #[error("Command test failed at step {step}")]
    CmdTest {
        /// Failing step (1..=4)
        step: CmdTestStep,
    },

    /// No interrupt line is registered for the device
    #[error("No interrupt line registered; asynchronous commands need one")]
    NoIrq,

    /// No DMA channel could be acquired for a transfer role
    #[error("No DMA channel available for {role}")]
    DmaUnavailable {
        /// Transfer role (AI, AO, GPCT0...)
        role: String,
    },

    /// A busy-wait exhausted its iteration budget
    #[error("Timed out waiting for {what}")]
    Timeout {
        /// Condition that never became true
        what: String,
    },

    /// Hardware I/O failure
    #[error("I/O error: {message}")]
    Io {
        /// Error description
        message: String,
    },

    /// The hardware or buffer pipeline could not keep up (EPIPE)
    #[error("Broken pipe: {message}")]
    Pipe {
        /// Error description
        message: String,
    },

    /// Producer outran the ring buffer
    #[error("Buffer overrun: {requested} bytes requested, {free} free")]
    BufferOverrun {
        /// Bytes the producer tried to add
        requested: usize,
        /// Free bytes at the time
        free: usize,
    },

    /// Consumer starved the ring buffer
    #[error("Buffer underrun: {requested} bytes requested, {available} available")]
    BufferUnderrun {
        /// Bytes the consumer tried to remove
        requested: usize,
        /// Bytes available at the time
        available: usize,
    },

    /// An ERROR event is pending on the subdevice buffer and must be cleared first
    #[error("Subdevice {subdevice} has a pending buffer error")]
    PendingBufferError {
        /// Subdevice index
        subdevice: usize,
    },

    /// Operation requires a different state or value (EAGAIN)
    #[error("Try again: {message}")]
    Again {
        /// Error description
        message: String,
    },

    /// Operation not supported by this subdevice or board
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Operation name
        operation: String,
    },

    /// A programming contract was violated (double DMA slot acquisition, unmapped register)
    #[error("Internal contract violation: {message}")]
    Internal {
        /// Error description
        message: String,
    },
}

/// Linux errno values surfaced through [`ComediError::errno`].
pub mod errno {
    #![allow(missing_docs)]
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const EFAULT: i32 = 14;
    pub const EBUSY: i32 = 16;
    pub const EINVAL: i32 = 22;
    pub const EPIPE: i32 = 32;
    pub const ETIME: i32 = 62;
    pub const ENOTSUPP: i32 = 524;
}

impl ComediError {
    /// Shorthand for [`ComediError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for [`ComediError::NotSupported`].
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Shorthand for [`ComediError::Timeout`].
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    /// Shorthand for [`ComediError::Io`].
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Shorthand for [`ComediError::Pipe`].
    pub fn pipe(message: impl Into<String>) -> Self {
        Self::Pipe {
            message: message.into(),
        }
    }

    /// Report a programming contract violation.
    ///
    /// Panics in debug builds; release builds get [`ComediError::Internal`].
    #[allow(clippy::panic)]
    pub fn contract(message: impl Into<String>) -> Self {
        let message = message.into();
        if cfg!(debug_assertions) {
            panic!("contract violation: {message}");
        }
        tracing::error!(%message, "contract violation");
        Self::Internal { message }
    }

    /// Code a C caller would see: negative errno, or the positive step for
    /// a command test failure.
    pub fn errno(&self) -> i32 {
        match self {
            Self::CmdTest { step } => *step as i32,
            Self::InvalidArgument { .. }
            | Self::InvalidSubdevice { .. }
            | Self::InvalidChannel { .. }
            | Self::InvalidRange { .. }
            | Self::Internal { .. } => -errno::EINVAL,
            Self::Busy { .. } | Self::DmaUnavailable { .. } => -errno::EBUSY,
            Self::NoIrq | Self::Io { .. } => -errno::EIO,
            Self::Timeout { .. } => -errno::ETIME,
            Self::Pipe { .. } | Self::BufferOverrun { .. } | Self::BufferUnderrun { .. } => {
                -errno::EPIPE
            }
            Self::PendingBufferError { .. } => -errno::EFAULT,
            Self::Again { .. } => -errno::EAGAIN,
            Self::NotSupported { .. } => -errno::ENOTSUPP,
        }
    }

    /// Check if this is a command test rejection.
    pub fn is_cmdtest(&self) -> bool {
        matches!(self, Self::CmdTest { .. })
    }

    /// Check if the subdevice or a resource is busy.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::DmaUnavailable { .. })
    }

    /// Check if this is a busy-wait timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the error reports lost data (overrun, underrun, broken pipe).
    pub fn is_data_loss(&self) -> bool {
        matches!(
            self,
            Self::BufferOverrun { .. } | Self::BufferUnderrun { .. } | Self::Pipe { .. }
        )
    }
}

/// Subdevice kind for error and log messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SubdeviceKind {
    Unused,
    AnalogInput,
    AnalogOutput,
    DigitalIO,
    Counter,
    Calibration,
    Memory,
    Serial,
    Pfi,
    FrequencyOutput,
}

impl fmt::Display for SubdeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unused => write!(f, "Unused"),
            Self::AnalogInput => write!(f, "Analog Input"),
            Self::AnalogOutput => write!(f, "Analog Output"),
            Self::DigitalIO => write!(f, "Digital I/O"),
            Self::Counter => write!(f, "Counter"),
            Self::Calibration => write!(f, "Calibration"),
            Self::Memory => write!(f, "Memory"),
            Self::Serial => write!(f, "Serial"),
            Self::Pfi => write!(f, "PFI"),
            Self::FrequencyOutput => write!(f, "Frequency Output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ComediError::InvalidChannel {
            subdevice: 0,
            channel: 20,
            max: 16,
        };
        assert!(err.to_string().contains("20"));
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(
            ComediError::CmdTest {
                step: CmdTestStep::Bounds
            }
            .errno(),
            3
        );
        assert_eq!(ComediError::NoIrq.errno(), -errno::EIO);
        assert_eq!(ComediError::timeout("fifo").errno(), -errno::ETIME);
        assert_eq!(ComediError::not_supported("cmd").errno(), -errno::ENOTSUPP);
        assert_eq!(
            ComediError::DmaUnavailable { role: "AI".into() }.errno(),
            -errno::EBUSY
        );
    }

    #[test]
    fn test_classification() {
        assert!(ComediError::Busy { subdevice: 0 }.is_busy());
        assert!(ComediError::pipe("ao").is_data_loss());
        assert!(!ComediError::NoIrq.is_timeout());
    }

    #[test]
    fn test_subdevice_kind_display() {
        assert_eq!(SubdeviceKind::AnalogInput.to_string(), "Analog Input");
        assert_eq!(SubdeviceKind::Pfi.to_string(), "PFI");
    }
}
