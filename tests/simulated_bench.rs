//! Front end pipeline against the simulated board: configuration file,
//! attach, streamed acquisition into a file, waveform output.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_file_configured_acquisition` | TOML file selects board and channels; CSV holds every scan |
//! | `test_acquisition_values_follow_channels` | Simulated codes carry the channel number |
//! | `test_commands_refused_without_irq` | No interrupt line: attach works, acquisition fails |
//! | `test_waveform_on_m_series` | Sine waveform plays to completion |

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use comedi_core::ComediError;
use ni_mio_daq::{AppConfig, AppError, Bench, Overrides};

fn load(text: &str, prefix: &str) -> AppConfig {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ni-mio.toml");
    fs::write(&path, text).unwrap();
    AppConfig::load_with_prefix(&path, prefix, &Overrides::default()).unwrap()
}

fn rows(csv: &str) -> Vec<Vec<u32>> {
    csv.lines()
        .skip(1)
        .map(|l| l.split(',').map(|v| v.parse().unwrap()).collect())
        .collect()
}

#[test]
fn test_file_configured_acquisition() {
    let config = load(
        r#"
        [attach]
        board = "pci-6052e"
        dma = false
        relay_settle_us = 1000

        [acquisition]
        channels = [0, 1, 2, 3]
        scan_period_ns = 2000000
        convert_period_ns = 500000
        scans = 100
        batch_scans = 10
        "#,
        "NI_MIO_IT_FILE_",
    );
    let bench = Bench::attach(&config).unwrap();
    assert!(!bench.report().dma);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scans.csv");
    let mut out = BufWriter::new(File::create(&path).unwrap());
    let summary = bench.acquire(&config.acquisition, &mut out).unwrap();
    out.flush().unwrap();
    drop(out);

    assert_eq!(summary.scans, 100);
    assert_eq!(summary.batches, 10);
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("scan,ch0,ch1,ch2,ch3\n"));
    let rows = rows(&text);
    assert_eq!(rows.len(), 100);
    assert!(rows.iter().all(|r| r.len() == 5));
    assert_eq!(rows[99][0], 99);
}

#[test]
fn test_acquisition_values_follow_channels() {
    let config = load(
        "[attach]\nboard = \"pci-6221\"\n[acquisition]\nchannels = [5, 2]\nscans = 40\n",
        "NI_MIO_IT_VALUES_",
    );
    let bench = Bench::attach(&config).unwrap();
    let mut out = Vec::new();
    bench.acquire(&config.acquisition, &mut out).unwrap();
    for row in rows(&String::from_utf8(out).unwrap()) {
        assert_eq!(row[1] >> 8, 5);
        assert_eq!(row[2] >> 8, 2);
    }
}

#[test]
fn test_commands_refused_without_irq() {
    let mut config = AppConfig::default();
    config.attach.irq = None;
    config.attach.dma = false;
    let bench = Bench::attach(&config).unwrap();
    assert_eq!(bench.report().irq, None);
    let err = bench.acquire(&config.acquisition, &mut Vec::new()).unwrap_err();
    assert!(matches!(err, AppError::Driver(ComediError::NoIrq)));
    assert_eq!(err.errno(), Some(ComediError::NoIrq.errno()));
}

#[test]
fn test_waveform_on_m_series() {
    let config = load(
        "[attach]\nboard = \"pci-6251\"\n[waveform]\nperiod_samples = 64\nperiods = 8\n",
        "NI_MIO_IT_WAVE_",
    );
    let bench = Bench::attach(&config).unwrap();
    let summary = bench.generate(&config.waveform).unwrap();
    assert_eq!(summary.samples_written, 512);
    assert_eq!(summary.updates, 512);
}
