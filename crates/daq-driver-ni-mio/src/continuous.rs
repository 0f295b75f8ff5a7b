//! Continuous acquisition with multi-sink fan-out.
//!
//! A reader thread drains the ring buffer of one input subdevice, cuts the
//! raw samples into batches of whole scans and offers every batch to each
//! registered sink. Sinks are bounded `tokio` channels; a sink that is full
//! loses the batch instead of stalling the reader.
//!
//! ```text
//!   interrupt / DMA ──► ring buffer ──► reader thread ──┬──► sink "display"
//!                                                       ├──► sink "storage"
//!                                                       └──► sink ...
//! ```
//!
//! The reader ends when the command reaches its end of acquisition, when
//! the driver reports an error, or when [`ContinuousReader::stop`] is
//! called. Sinks see their channel close once the reader is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use comedi_core::{BufEvents, ComediError, Command, Device, Result, Transfer, TransferKind};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// How long the reader sleeps on an empty buffer before checking for stop.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bytes copied out of the ring buffer per read.
const READ_CHUNK: usize = 16 * 1024;

/// Raw samples of whole scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBatch {
    /// Samples in scan order: `[scan0_ch0, scan0_ch1, ..., scan1_ch0, ...]`
    pub data: Vec<u32>,
    /// Channels per scan
    pub n_channels: usize,
    /// Position of this batch in the stream
    pub sequence: u64,
    /// When the reader cut the batch
    pub timestamp: Instant,
}

impl SampleBatch {
    /// Complete scans in the batch.
    pub fn n_scans(&self) -> usize {
        if self.n_channels > 0 {
            self.data.len() / self.n_channels
        } else {
            0
        }
    }

    /// Samples of one scan position.
    pub fn channel_data(&self, channel: usize) -> Vec<u32> {
        if channel >= self.n_channels {
            return Vec::new();
        }
        self.data
            .iter()
            .skip(channel)
            .step_by(self.n_channels)
            .copied()
            .collect()
    }
}

/// Receiving end of a sink.
pub type SinkReceiver = mpsc::Receiver<SampleBatch>;

struct Sink {
    /// `None` once the reader is gone, which closes the channel
    sender: Option<mpsc::Sender<SampleBatch>>,
    drops: AtomicU64,
}

/// How the reader ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderOutcome {
    /// The command reached its end of acquisition and every sample was
    /// delivered
    Finished,
    /// [`ContinuousReader::stop`] was called
    Stopped,
    /// The driver ended the command with an error
    Failed(ComediError),
}

/// Reader counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Samples taken out of the ring buffer
    pub samples_read: u64,
    /// Batches cut
    pub batches_produced: u64,
    /// Samples lost to full sinks, summed over sinks
    pub samples_dropped: u64,
    /// Batches lost per sink
    pub sink_drops: HashMap<String, u64>,
}

#[derive(Default)]
struct Counters {
    samples_read: AtomicU64,
    batches_produced: AtomicU64,
    samples_dropped: AtomicU64,
}

/// Drains one input subdevice into any number of sinks.
pub struct ContinuousReader {
    device: Arc<Device>,
    index: usize,
    batch_scans: usize,
    sinks: Arc<RwLock<HashMap<String, Sink>>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    thread: Mutex<Option<JoinHandle<ReaderOutcome>>>,
}

impl ContinuousReader {
    /// Reader for subdevice `index`, cutting batches of `batch_scans`
    /// scans.
    pub fn new(device: Arc<Device>, index: usize, batch_scans: usize) -> Result<Self> {
        let transfer = device.transfer(index)?;
        if transfer.kind() != TransferKind::Input {
            return Err(ComediError::invalid(format!(
                "subdevice {index} does not produce samples"
            )));
        }
        if batch_scans == 0 {
            return Err(ComediError::invalid("batch size must be at least one scan"));
        }
        Ok(Self {
            device,
            index,
            batch_scans,
            sinks: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            thread: Mutex::new(None),
        })
    }

    /// Register a sink holding up to `capacity` batches.
    pub fn add_sink(&self, name: &str, capacity: usize) -> Result<SinkReceiver> {
        if capacity == 0 {
            return Err(ComediError::invalid("sink capacity must be at least one batch"));
        }
        let mut sinks = self.sinks.write();
        if sinks.contains_key(name) {
            return Err(ComediError::invalid(format!("sink '{name}' already exists")));
        }
        let (sender, rx) = mpsc::channel(capacity);
        sinks.insert(
            name.to_string(),
            Sink {
                sender: Some(sender),
                drops: AtomicU64::new(0),
            },
        );
        debug!(sink = name, capacity, "sink added");
        Ok(rx)
    }

    /// Drop a sink; its receiver sees the channel close.
    pub fn remove_sink(&self, name: &str) -> bool {
        self.sinks.write().remove(name).is_some()
    }

    /// Names of the registered sinks.
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.read().keys().cloned().collect()
    }

    /// Start `cmd` on the subdevice and spawn the reader.
    pub fn start(&self, cmd: Command) -> Result<()> {
        if cmd.idx_subd != self.index {
            return Err(ComediError::invalid(format!(
                "command targets subdevice {}, reader serves {}",
                cmd.idx_subd, self.index
            )));
        }
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Err(ComediError::Busy {
                subdevice: self.index,
            });
        }
        let n_channels = cmd.chan_descs.len().max(1);
        self.device.command(cmd)?;
        self.running.store(true, Ordering::SeqCst);

        let job = ReaderJob {
            device: Arc::clone(&self.device),
            index: self.index,
            batch_len: self.batch_scans * n_channels,
            n_channels,
            sinks: Arc::clone(&self.sinks),
            running: Arc::clone(&self.running),
            counters: Arc::clone(&self.counters),
        };
        let handle = thread::Builder::new()
            .name(format!("ni-mio-reader-{}", self.index))
            .spawn(move || job.run())
            .map_err(|e| ComediError::io(format!("failed to spawn reader thread: {e}")))?;
        *slot = Some(handle);
        info!(
            subdevice = self.index,
            n_channels,
            batch_scans = self.batch_scans,
            "continuous reader started"
        );
        Ok(())
    }

    /// Whether the reader thread is still moving samples.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for the reader to end on its own (end of acquisition or error).
    pub fn wait(&self) -> Result<ReaderOutcome> {
        self.join()
    }

    /// Stop the reader and cancel the command if it is still running.
    pub fn stop(&self) -> Result<ReaderOutcome> {
        self.running.store(false, Ordering::SeqCst);
        let outcome = self.join()?;
        if self.device.transfer(self.index)?.is_running() {
            self.device.cancel(self.index)?;
        }
        Ok(outcome)
    }

    fn join(&self) -> Result<ReaderOutcome> {
        let Some(handle) = self.thread.lock().take() else {
            return Err(ComediError::invalid("reader was not started"));
        };
        let outcome = handle
            .join()
            .map_err(|_| ComediError::Internal {
                message: "reader thread panicked".to_string(),
            })?;
        let stats = self.stats();
        info!(
            subdevice = self.index,
            ?outcome,
            samples = stats.samples_read,
            batches = stats.batches_produced,
            dropped = stats.samples_dropped,
            "continuous reader ended"
        );
        Ok(outcome)
    }

    /// Current counters.
    pub fn stats(&self) -> ReaderStats {
        let sink_drops = self
            .sinks
            .read()
            .iter()
            .map(|(name, sink)| (name.clone(), sink.drops.load(Ordering::SeqCst)))
            .collect();
        ReaderStats {
            samples_read: self.counters.samples_read.load(Ordering::SeqCst),
            batches_produced: self.counters.batches_produced.load(Ordering::SeqCst),
            samples_dropped: self.counters.samples_dropped.load(Ordering::SeqCst),
            sink_drops,
        }
    }
}

impl Drop for ContinuousReader {
    fn drop(&mut self) {
        if self.thread.lock().is_some() {
            if let Err(e) = self.stop() {
                error!(error = %e, "failed to stop reader on drop");
            }
        }
    }
}

/// State moved into the reader thread.
struct ReaderJob {
    device: Arc<Device>,
    index: usize,
    batch_len: usize,
    n_channels: usize,
    sinks: Arc<RwLock<HashMap<String, Sink>>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl ReaderJob {
    fn run(self) -> ReaderOutcome {
        let outcome = self.read_loop();
        self.running.store(false, Ordering::SeqCst);
        // receivers see the end of the stream; drop counts stay readable
        for sink in self.sinks.write().values_mut() {
            sink.sender = None;
        }
        outcome
    }

    fn read_loop(&self) -> ReaderOutcome {
        let transfer = match self.device.transfer(self.index) {
            Ok(t) => Arc::clone(t),
            Err(e) => return ReaderOutcome::Failed(e),
        };
        let sample_size = transfer.sample_size();
        let mut raw = vec![0u8; READ_CHUNK - READ_CHUNK % sample_size];
        let mut partial: Vec<u8> = Vec::with_capacity(sample_size);
        let mut pending: Vec<u32> = Vec::with_capacity(self.batch_len);
        let mut sequence = 0u64;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return ReaderOutcome::Stopped;
            }
            if let Err(e) = self.device.poll(self.index, POLL_INTERVAL) {
                return ReaderOutcome::Failed(e);
            }
            let n = match self.device.read(self.index, &mut raw) {
                Ok(n) => n,
                Err(e) => {
                    error!(subdevice = self.index, error = %e, "acquisition failed");
                    return ReaderOutcome::Failed(e);
                }
            };
            if n > 0 {
                decode(&raw[..n], sample_size, &mut partial, &mut pending);
                self.counters
                    .samples_read
                    .fetch_add((n / sample_size) as u64, Ordering::SeqCst);
                while pending.len() >= self.batch_len {
                    let data: Vec<u32> = pending.drain(..self.batch_len).collect();
                    self.dispatch(data, &mut sequence);
                }
                continue;
            }
            if let Some(outcome) = self.check_end(&transfer, &mut pending, &mut sequence) {
                return outcome;
            }
        }
    }

    /// With the buffer drained, decide whether the command is over.
    fn check_end(
        &self,
        transfer: &Transfer,
        pending: &mut Vec<u32>,
        sequence: &mut u64,
    ) -> Option<ReaderOutcome> {
        let events = transfer.buffer().events();
        if events.contains(BufEvents::ERROR) {
            transfer.buffer().take_events();
            let e = ComediError::pipe(format!("acquisition error on subdevice {}", self.index));
            error!(subdevice = self.index, error = %e, "acquisition failed");
            return Some(ReaderOutcome::Failed(e));
        }
        if events.contains(BufEvents::EOA) || !transfer.is_running() {
            transfer.buffer().take_events();
            // trailing partial scan data is delivered as a short batch
            let whole = pending.len() - pending.len() % self.n_channels;
            if whole > 0 {
                let data: Vec<u32> = pending.drain(..whole).collect();
                self.dispatch(data, sequence);
            }
            if !pending.is_empty() {
                warn!(subdevice = self.index, samples = pending.len(), "incomplete scan discarded");
            }
            return Some(ReaderOutcome::Finished);
        }
        None
    }

    fn dispatch(&self, data: Vec<u32>, sequence: &mut u64) {
        let batch = SampleBatch {
            data,
            n_channels: self.n_channels,
            sequence: *sequence,
            timestamp: Instant::now(),
        };
        *sequence += 1;
        let len = batch.data.len() as u64;
        for (name, sink) in self.sinks.read().iter() {
            let Some(sender) = &sink.sender else {
                continue;
            };
            match sender.try_send(batch.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sink.drops.fetch_add(1, Ordering::SeqCst);
                    self.counters.samples_dropped.fetch_add(len, Ordering::SeqCst);
                    trace!(sink = %name, sequence = batch.sequence, "sink full, batch dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(sink = %name, "sink closed");
                }
            }
        }
        self.counters.batches_produced.fetch_add(1, Ordering::SeqCst);
    }
}

/// Append the little-endian samples in `bytes` to `out`. A sample split
/// across reads is carried in `partial`.
fn decode(bytes: &[u8], sample_size: usize, partial: &mut Vec<u8>, out: &mut Vec<u32>) {
    let mut bytes = bytes;
    if !partial.is_empty() {
        let need = sample_size - partial.len();
        let take = need.min(bytes.len());
        partial.extend_from_slice(&bytes[..take]);
        bytes = &bytes[take..];
        if partial.len() == sample_size {
            out.push(sample_from(partial));
            partial.clear();
        }
    }
    let mut chunks = bytes.chunks_exact(sample_size);
    out.extend(chunks.by_ref().map(sample_from));
    partial.extend_from_slice(chunks.remainder());
}

fn sample_from(bytes: &[u8]) -> u32 {
    match *bytes {
        [a, b] => u32::from(u16::from_le_bytes([a, b])),
        [a, b, c, d] => u32::from_le_bytes([a, b, c, d]),
        _ => 0,
    }
}
