//! Layered configuration for the `ni-mio` front end.
//!
//! Configuration is merged from, in order of increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`ni-mio.toml` unless `--config` names another)
//! 3. environment variables prefixed with `NI_MIO_`, nested keys split on
//!    `__` (`NI_MIO_ATTACH__BOARD=pci-6221`)
//! 4. command-line overrides
//!
//! # Example
//! ```toml
//! [attach]
//! board = "pci-6221"
//! irq = 11
//! dma = true
//!
//! [acquisition]
//! channels = [0, 1, 2, 3]
//! scan_period_ns = 2000000
//! convert_period_ns = 500000
//! scans = 100
//! ```

use std::path::Path;

use daq_driver_ni_mio::AttachConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ni-mio.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NI_MIO_";

/// Everything the front end needs for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Driver attach options
    #[serde(default = "default_attach")]
    pub attach: AttachConfig,
    /// Analog input command parameters
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Analog output waveform parameters
    #[serde(default)]
    pub waveform: WaveformConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Analog input command built by `ni-mio read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Channels in scan order
    pub channels: Vec<u32>,
    /// Range index applied to every channel
    pub range: u32,
    /// Analog reference: "ground", "common", "diff" or "other"
    pub aref: String,
    /// Scan period in ns
    pub scan_period_ns: u32,
    /// Convert period in ns
    pub convert_period_ns: u32,
    /// Scans to acquire
    pub scans: u32,
    /// Scans per batch handed to the output sink
    pub batch_scans: usize,
    /// Batches the output sink may hold before batches are dropped
    pub sink_capacity: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channels: vec![0],
            range: 0,
            aref: "ground".to_string(),
            scan_period_ns: 1_000_000,
            convert_period_ns: 100_000,
            scans: 1000,
            batch_scans: 100,
            sink_capacity: 256,
        }
    }
}

/// Analog output waveform played by `ni-mio write`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    /// DAC channel
    pub channel: u32,
    /// Range index
    pub range: u32,
    /// Update period in ns
    pub update_period_ns: u32,
    /// Samples per period of the waveform
    pub period_samples: u32,
    /// Periods to play
    pub periods: u32,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            range: 0,
            update_period_ns: 100_000,
            period_samples: 100,
            periods: 10,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn default_attach() -> AttachConfig {
    AttachConfig {
        irq: Some(11),
        ..AttachConfig::default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            attach: default_attach(),
            acquisition: AcquisitionConfig::default(),
            waveform: WaveformConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Values given on the command line. `None` leaves the layered value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Board name
    pub board: Option<String>,
    /// Interrupt line
    pub irq: Option<u32>,
    /// DMA on or off
    pub dma: Option<bool>,
    /// Analog input channels
    pub channels: Option<Vec<u32>>,
    /// Scans to acquire
    pub scans: Option<u32>,
    /// JSON log output
    pub json: Option<bool>,
    /// Default log filter
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Figment with defaults, the TOML file at `path` and the environment.
    /// A missing file is not an error.
    pub fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Load from `path` (or [`DEFAULT_CONFIG_FILE`]) and the `NI_MIO_`
    /// environment, then apply `overrides` and validate.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> AppResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::load_with_prefix(path, ENV_PREFIX, overrides)
    }

    /// [`AppConfig::load`] with an explicit environment prefix.
    pub fn load_with_prefix(path: &Path, env_prefix: &str, overrides: &Overrides) -> AppResult<Self> {
        let mut config: AppConfig = Self::figment(path, env_prefix)
            .extract()
            .map_err(|e| AppError::Config(Box::new(e)))?;
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(board) = &overrides.board {
            self.attach.board.clone_from(board);
        }
        if let Some(irq) = overrides.irq {
            self.attach.irq = Some(irq);
        }
        if let Some(dma) = overrides.dma {
            self.attach.dma = dma;
        }
        if let Some(channels) = &overrides.channels {
            self.acquisition.channels.clone_from(channels);
        }
        if let Some(scans) = overrides.scans {
            self.acquisition.scans = scans;
        }
        if let Some(json) = overrides.json {
            self.logging.json = json;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level.clone_from(level);
        }
    }

    /// Check values the driver does not check itself.
    pub fn validate(&self) -> AppResult<()> {
        self.attach
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        self.attach
            .board_info()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let acq = &self.acquisition;
        if acq.channels.is_empty() {
            return Err(AppError::Validation(
                "acquisition.channels must list at least one channel".to_string(),
            ));
        }
        parse_aref(&acq.aref)?;
        if acq.batch_scans == 0 || acq.sink_capacity == 0 {
            return Err(AppError::Validation(
                "acquisition.batch_scans and acquisition.sink_capacity must be non-zero".to_string(),
            ));
        }
        if self.waveform.period_samples == 0 {
            return Err(AppError::Validation(
                "waveform.period_samples must be non-zero".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(AppError::Validation(format!(
                "invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse an analog reference name.
pub fn parse_aref(name: &str) -> AppResult<comedi_core::AnalogReference> {
    use comedi_core::AnalogReference;
    match name.to_ascii_lowercase().as_str() {
        "ground" | "gnd" => Ok(AnalogReference::Ground),
        "common" | "nrse" => Ok(AnalogReference::Common),
        "diff" | "differential" => Ok(AnalogReference::Diff),
        "other" => Ok(AnalogReference::Other),
        other => Err(AppError::Validation(format!(
            "unknown analog reference '{other}' (ground, common, diff, other)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load_with_prefix(
            Path::new("/nonexistent/ni-mio.toml"),
            "NI_MIO_TEST_DEFAULTS_",
            &Overrides::default(),
        )
        .unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.attach.irq, Some(11));
    }

    #[test]
    fn test_file_values_and_partial_sections() {
        let file = write_config(
            r#"
            [attach]
            board = "pci-6221"
            dma = false

            [acquisition]
            channels = [3, 1]
            scans = 20
            "#,
        );
        let config =
            AppConfig::load_with_prefix(file.path(), "NI_MIO_TEST_FILE_", &Overrides::default())
                .unwrap();
        assert_eq!(config.attach.board, "pci-6221");
        assert!(!config.attach.dma);
        // keys the file leaves out keep their defaults
        assert_eq!(config.attach.ai_buffer_size, 64 * 1024);
        assert_eq!(config.acquisition.channels, vec![3, 1]);
        assert_eq!(config.acquisition.scan_period_ns, 1_000_000);
    }

    #[test]
    fn test_environment_beats_file_and_overrides_beat_environment() {
        let file = write_config("[attach]\nboard = \"pci-6221\"\n");
        std::env::set_var("NI_MIO_TEST_LAYER_ATTACH__BOARD", "pci-6251");
        std::env::set_var("NI_MIO_TEST_LAYER_ACQUISITION__SCANS", "7");
        let config =
            AppConfig::load_with_prefix(file.path(), "NI_MIO_TEST_LAYER_", &Overrides::default())
                .unwrap();
        assert_eq!(config.attach.board, "pci-6251");
        assert_eq!(config.acquisition.scans, 7);

        let overrides = Overrides {
            board: Some("pci-6110".to_string()),
            ..Overrides::default()
        };
        let config =
            AppConfig::load_with_prefix(file.path(), "NI_MIO_TEST_LAYER_", &overrides).unwrap();
        assert_eq!(config.attach.board, "pci-6110");
        std::env::remove_var("NI_MIO_TEST_LAYER_ATTACH__BOARD");
        std::env::remove_var("NI_MIO_TEST_LAYER_ACQUISITION__SCANS");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AppConfig::default();
        config.attach.board = "pci-9999".to_string();
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));

        let mut config = AppConfig::default();
        config.acquisition.channels.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.acquisition.aref = "floating".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let file = write_config("[attach]\nirq = \"eleven\"\n");
        let err = AppConfig::load_with_prefix(file.path(), "NI_MIO_TEST_BAD_", &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_toml_dump_reloads() {
        let mut config = AppConfig::default();
        config.attach.board = "pci-6281".to_string();
        config.acquisition.channels = vec![0, 4];
        let text = config.to_toml().unwrap();
        let file = write_config(&text);
        let back =
            AppConfig::load_with_prefix(file.path(), "NI_MIO_TEST_DUMP_", &Overrides::default())
                .unwrap();
        assert_eq!(back, config);
    }
}
