//! A simulated board driven through the framework API.
//!
//! [`Bench`] attaches the configured board to the register simulator and
//! runs the same calls a program would make against real hardware:
//! `command`, `read` through a [`ContinuousReader`], `write` and
//! `inttrig`. The simulator only moves when asked, so the bench clocks it
//! in steps and lets the consumer catch up between steps.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use comedi_core::{
    BufDirection, BufEvents, ChanDesc, Command, Device, DeviceInfo, SubdeviceKind, TrigSrc,
};
use daq_driver_ni_mio::sim::{SimBoard, SimRig};
use daq_driver_ni_mio::{subdev, ContinuousReader, NiMio, ReaderOutcome, SampleBatch};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{parse_aref, AcquisitionConfig, AppConfig, WaveformConfig};
use crate::error::{AppError, AppResult};

/// Scans or updates clocked per step.
const CLOCK_STEP: usize = 256;

/// Longest wait for the reader to drain the ring buffer after a step.
const CATCH_UP_TIMEOUT: Duration = Duration::from_millis(500);

/// A simulated board attached with the front end's configuration.
pub struct Bench {
    device: Arc<Device>,
    driver: Arc<NiMio>,
    sim: Arc<SimBoard>,
    dma: bool,
}

/// Attach summary in the manner of `comedi_config`'s report.
#[derive(Debug, Clone, Serialize)]
pub struct AttachReport {
    /// Board name
    pub board: String,
    /// Driver name
    pub driver: String,
    /// Interrupt line
    pub irq: Option<u32>,
    /// Samples move by DMA
    pub dma: bool,
    /// Subdevices in index order
    pub subdevices: Vec<SubdeviceLine>,
}

/// One subdevice of an [`AttachReport`].
#[derive(Debug, Clone, Serialize)]
pub struct SubdeviceLine {
    /// Index
    pub index: usize,
    /// Function
    pub kind: SubdeviceKind,
    /// Channels
    pub n_channels: u32,
    /// Largest sample value
    pub maxdata: u32,
    /// Ranges per channel
    pub n_ranges: usize,
    /// Accepts commands
    pub commands: bool,
}

impl From<DeviceInfo> for AttachReport {
    fn from(info: DeviceInfo) -> Self {
        Self {
            board: info.board_name,
            driver: info.driver_name,
            irq: info.irq,
            dma: false,
            subdevices: info
                .subdevices
                .iter()
                .map(|s| SubdeviceLine {
                    index: s.index,
                    kind: s.kind,
                    n_channels: s.n_channels,
                    maxdata: s.maxdata,
                    n_ranges: s.n_ranges,
                    commands: s.supports_commands(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for AttachReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "board:  {} (driver {})", self.board, self.driver)?;
        match self.irq {
            Some(irq) => writeln!(f, "irq:    {irq}")?,
            None => writeln!(f, "irq:    none (commands disabled)")?,
        }
        writeln!(f, "dma:    {}", if self.dma { "on" } else { "off" })?;
        for s in &self.subdevices {
            if s.kind == SubdeviceKind::Unused {
                writeln!(f, "{:>3}  unused", s.index)?;
                continue;
            }
            writeln!(
                f,
                "{:>3}  {:<18} {:>3} ch  maxdata 0x{:x}  {} range(s){}",
                s.index,
                s.kind.to_string(),
                s.n_channels,
                s.maxdata,
                s.n_ranges,
                if s.commands { "  cmd" } else { "" }
            )?;
        }
        Ok(())
    }
}

/// What an acquisition delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AcquireSummary {
    /// Complete scans written to the output
    pub scans: u64,
    /// Batches written to the output
    pub batches: u64,
    /// Samples lost because the output sink was full
    pub samples_dropped: u64,
}

/// What a waveform run put out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaveformSummary {
    /// Samples accepted into the output buffer
    pub samples_written: u64,
    /// Updates the DAC performed
    pub updates: u64,
}

impl Bench {
    /// Attach the configured board to a fresh simulator.
    pub fn attach(config: &AppConfig) -> AppResult<Self> {
        let SimRig {
            device,
            driver,
            sim,
            mite,
        } = SimRig::attach_with(config.attach.clone())?;
        info!(board = %config.attach.board, dma = mite.is_some(), "simulated board attached");
        Ok(Self {
            device: Arc::new(device),
            driver,
            sim,
            dma: mite.is_some(),
        })
    }

    /// The attached device.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Attach summary.
    pub fn report(&self) -> AttachReport {
        AttachReport {
            dma: self.dma,
            ..AttachReport::from(self.device.info())
        }
    }

    /// Run the configured AI command and write one CSV row per scan to
    /// `out`.
    pub fn acquire<W: Write>(&self, acq: &AcquisitionConfig, out: &mut W) -> AppResult<AcquireSummary> {
        let mut cmd = ai_command(acq)?;
        // a rejected command comes back corrected; settle within a few passes
        for _ in 0..4 {
            match self.device.cmdtest(&mut cmd) {
                Ok(()) => break,
                Err(e) if e.is_cmdtest() => warn!(error = %e, "command adjusted by the driver"),
                Err(e) => return Err(e.into()),
            }
        }
        let reader = ContinuousReader::new(Arc::clone(&self.device), subdev::AI, acq.batch_scans)?;
        let mut rx = reader.add_sink("output", acq.sink_capacity)?;

        write!(out, "scan")?;
        for c in &acq.channels {
            write!(out, ",ch{c}")?;
        }
        writeln!(out)?;

        reader.start(cmd)?;
        let target = acq.scans as usize;
        let mut summary = AcquireSummary::default();
        let mut clocked = 0;
        while clocked < target {
            let step = CLOCK_STEP.min(target - clocked);
            let n = self.sim.run_scans(step);
            clocked += n;
            self.catch_up(subdev::AI)?;
            while let Ok(batch) = rx.try_recv() {
                write_batch(out, &batch, &mut summary)?;
            }
            if n < step {
                debug!(clocked, "sequencer stopped early");
                break;
            }
        }

        let outcome = reader.wait()?;
        while let Some(batch) = rx.blocking_recv() {
            write_batch(out, &batch, &mut summary)?;
        }
        summary.samples_dropped = reader.stats().samples_dropped;
        info!(
            scans = summary.scans,
            batches = summary.batches,
            dropped = summary.samples_dropped,
            interrupts = self.driver.stats().interrupts,
            "acquisition complete"
        );
        match outcome {
            ReaderOutcome::Finished => Ok(summary),
            ReaderOutcome::Failed(e) => Err(AppError::Driver(e)),
            ReaderOutcome::Stopped => Err(AppError::Acquisition("reader stopped".to_string())),
        }
    }

    /// Play the configured waveform on the AO subdevice.
    pub fn generate(&self, wave: &WaveformConfig) -> AppResult<WaveformSummary> {
        let ao = self.device.subdevice(subdev::AO)?;
        if ao.kind == SubdeviceKind::Unused {
            return Err(AppError::Acquisition(format!(
                "{} has no analog output",
                self.device.board_name()
            )));
        }
        let maxdata = ((1u64 << ao.channels.nb_bits) - 1) as u32;
        let total = wave.period_samples * wave.periods;
        let cmd = Command::builder(subdev::AO)
            .start(TrigSrc::INT, 0)
            .scan_begin(TrigSrc::TIMER, wave.update_period_ns)
            .convert(TrigSrc::NOW, 0)
            .stop(TrigSrc::COUNT, total)
            .channels([ChanDesc::pack(
                wave.channel,
                wave.range,
                comedi_core::AnalogReference::Ground,
            )])
            .build();
        let samples = sine(maxdata, wave.period_samples, total);
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        self.device.command(cmd)?;
        let mut written = self.device.write(subdev::AO, &bytes)?;
        self.device.inttrig(subdev::AO, 0)?;

        let mut updates = 0u64;
        loop {
            let n = self.sim.run_updates(CLOCK_STEP);
            updates += n as u64;
            if written < bytes.len() {
                written += self.device.write(subdev::AO, &bytes[written..])?;
            }
            if n == 0 {
                break;
            }
        }
        let events = self.device.take_events(subdev::AO)?;
        if events.contains(BufEvents::ERROR) {
            return Err(AppError::Acquisition(format!(
                "output underrun after {updates} updates"
            )));
        }
        info!(updates, samples = written / 2, "waveform complete");
        Ok(WaveformSummary {
            samples_written: (written / 2) as u64,
            updates,
        })
    }

    /// Wait until the consumer has taken everything out of the ring buffer
    /// of subdevice `index`.
    fn catch_up(&self, index: usize) -> AppResult<()> {
        let transfer = self.device.transfer(index)?;
        let deadline = Instant::now() + CATCH_UP_TIMEOUT;
        while transfer.buffer().count(BufDirection::Get) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

impl fmt::Debug for Bench {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bench")
            .field("board", &self.device.board_name())
            .field("dma", &self.dma)
            .finish()
    }
}

/// AI command for `acq`.
pub fn ai_command(acq: &AcquisitionConfig) -> AppResult<Command> {
    let aref = parse_aref(&acq.aref)?;
    Ok(Command::builder(subdev::AI)
        .start(TrigSrc::NOW, 0)
        .scan_begin(TrigSrc::TIMER, acq.scan_period_ns)
        .convert(TrigSrc::TIMER, acq.convert_period_ns)
        .stop(TrigSrc::COUNT, acq.scans)
        .channels(acq.channels.iter().map(|&c| ChanDesc::pack(c, acq.range, aref)))
        .build())
}

fn write_batch<W: Write>(out: &mut W, batch: &SampleBatch, summary: &mut AcquireSummary) -> AppResult<()> {
    for scan in batch.data.chunks(batch.n_channels.max(1)) {
        write!(out, "{}", summary.scans)?;
        for s in scan {
            write!(out, ",{s}")?;
        }
        writeln!(out)?;
        summary.scans += 1;
    }
    summary.batches += 1;
    Ok(())
}

/// Offset-binary sine, `period` samples per cycle, `total` samples.
fn sine(maxdata: u32, period: u32, total: u32) -> Vec<u16> {
    let mid = f64::from(maxdata + 1) / 2.0;
    let amplitude = mid - 1.0;
    (0..total)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * f64::from(i % period) / f64::from(period);
            (mid + amplitude * phase.sin()).round() as u16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn config(board: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.attach.board = board.to_string();
        config.attach.relay_settle_us = 1_000;
        config
    }

    #[test]
    fn test_sine_stays_in_range() {
        let s = sine(0xffff, 100, 200);
        assert_eq!(s.len(), 200);
        assert_eq!(s[0], 0x8000);
        assert_eq!(s[25], 0xffff);
        assert_eq!(s[75], 1);
        assert_eq!(s[100], s[0]);
    }

    #[test]
    #[traced_test]
    fn test_report_lists_subdevices() {
        let bench = Bench::attach(&config("pci-6052e")).unwrap();
        assert!(logs_contain("simulated board attached"));
        let report = bench.report();
        assert_eq!(report.board, "pci-6052e");
        assert_eq!(report.irq, Some(11));
        assert!(report.dma);
        assert_eq!(report.subdevices.len(), bench.device().n_subdevices());
        assert!(report.subdevices[subdev::AI].commands);
        let text = report.to_string();
        assert!(text.contains("Analog Input"));
        assert!(text.contains("unused"));
    }

    #[test]
    fn test_acquire_writes_csv() {
        let bench = Bench::attach(&config("pci-6221")).unwrap();
        let acq = AcquisitionConfig {
            channels: vec![0, 2],
            scans: 600,
            batch_scans: 50,
            ..AcquisitionConfig::default()
        };
        let mut out = Vec::new();
        let summary = bench.acquire(&acq, &mut out).unwrap();
        assert_eq!(summary.scans, 600);
        assert_eq!(summary.samples_dropped, 0);
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("scan,ch0,ch2"));
        assert_eq!(lines.count(), 600);
    }

    #[test]
    fn test_generate_plays_every_sample() {
        let bench = Bench::attach(&config("pci-6052e")).unwrap();
        let wave = WaveformConfig {
            period_samples: 50,
            periods: 4,
            ..WaveformConfig::default()
        };
        let summary = bench.generate(&wave).unwrap();
        assert_eq!(summary.samples_written, 200);
        assert_eq!(summary.updates, 200);
    }

    #[test]
    fn test_generate_without_dacs() {
        let bench = Bench::attach(&config("pci-6143")).unwrap();
        assert!(matches!(
            bench.generate(&WaveformConfig::default()),
            Err(AppError::Acquisition(_))
        ));
    }
}
