//! Attach options.
//!
//! [`AttachConfig`] carries what `comedi_config` would pass as driver
//! parameters: which board, which interrupt line, whether to use DMA and
//! how large the ring buffers are.
//!
//! # Example Configuration
//!
//! ```toml
//! board = "pci-6052e"
//! irq = 11
//! dma = true
//! ai_buffer_size = 65536
//! ```

use std::path::Path;
use std::time::Duration;

use comedi_core::{ComediError, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::board::{find_board, BoardInfo, BOARDS};

/// Errors loading an attach configuration from disk.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for an attach configuration
    #[error("Failed to parse attach configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Driver parameters of one attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachConfig {
    /// Board name from the board table
    pub board: String,

    /// Interrupt line; `None` attaches without one (commands are refused)
    pub irq: Option<u32>,

    /// STC interrupt output pin routed to the line (0..=7)
    pub irq_pin: u32,

    /// Interrupt output is active low
    pub irq_polarity_low: bool,

    /// Move samples with the MITE engine instead of servicing FIFOs
    pub dma: bool,

    /// Analog input ring buffer in bytes
    pub ai_buffer_size: usize,

    /// Analog output ring buffer in bytes
    pub ao_buffer_size: usize,

    /// Counter ring buffers in bytes
    pub gpct_buffer_size: usize,

    /// Correlated digital output ring buffer in bytes
    pub cdo_buffer_size: usize,

    /// Settling time after the calibration relay switches, in µs
    pub relay_settle_us: u64,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            board: "pci-6052e".to_string(),
            irq: None,
            irq_pin: 0,
            irq_polarity_low: true,
            dma: true,
            ai_buffer_size: 64 * 1024,
            ao_buffer_size: 64 * 1024,
            gpct_buffer_size: 16 * 1024,
            cdo_buffer_size: 16 * 1024,
            relay_settle_us: 100_000,
        }
    }
}

impl AttachConfig {
    /// Configuration for `board` with defaults elsewhere.
    pub fn for_board(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> std::result::Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Board table entry named by [`AttachConfig::board`].
    pub fn board_info(&self) -> Result<&'static BoardInfo> {
        find_board(&self.board).ok_or_else(|| {
            let known: Vec<_> = BOARDS.iter().map(|b| b.name).collect();
            ComediError::invalid(format!(
                "unknown board '{}' (known: {})",
                self.board,
                known.join(", ")
            ))
        })
    }

    /// Calibration relay settling time.
    pub fn relay_settle(&self) -> Duration {
        Duration::from_micros(self.relay_settle_us)
    }

    /// Check values that do not depend on the board.
    pub fn validate(&self) -> Result<()> {
        if self.irq_pin > 7 {
            return Err(ComediError::invalid(format!(
                "irq_pin {} out of range 0..=7",
                self.irq_pin
            )));
        }
        for (name, size) in [
            ("ai_buffer_size", self.ai_buffer_size),
            ("ao_buffer_size", self.ao_buffer_size),
            ("gpct_buffer_size", self.gpct_buffer_size),
            ("cdo_buffer_size", self.cdo_buffer_size),
        ] {
            if size < 64 {
                return Err(ComediError::invalid(format!("{name} must be at least 64 bytes")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = AttachConfig::from_toml("board = \"pci-6221\"\nirq = 5\n").unwrap();
        assert_eq!(config.board, "pci-6221");
        assert_eq!(config.irq, Some(5));
        assert!(config.dma);
        assert_eq!(config.relay_settle(), Duration::from_millis(100));
    }

    #[test]
    fn test_unknown_board_lists_known_ones() {
        let err = AttachConfig::for_board("pci-9999").board_info().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("pci-9999"));
        assert!(text.contains("pci-6052e"));
    }

    #[test]
    fn test_validate_rejects_bad_pin_and_tiny_buffers() {
        let mut config = AttachConfig {
            irq_pin: 9,
            ..AttachConfig::default()
        };
        assert!(config.validate().is_err());
        config.irq_pin = 0;
        config.cdo_buffer_size = 8;
        assert!(config.validate().is_err());
        config.cdo_buffer_size = 4096;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "board = \"pci-6110\"\ndma = false").unwrap();
        let config = AttachConfig::load(file.path()).unwrap();
        assert_eq!(config.board, "pci-6110");
        assert!(!config.dma);
        assert!(matches!(
            AttachConfig::load("/nonexistent/attach.toml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(matches!(
            AttachConfig::from_toml("irq = \"eleven\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
