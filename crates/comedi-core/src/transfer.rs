//! Per-subdevice asynchronous context: ring buffer, active command, munge.
//!
//! A [`Transfer`] is created by the driver for each command-capable
//! subdevice and shared between the registry (which starts and stops
//! commands) and the driver's interrupt path (which moves data). Data
//! entering the buffer from the producer side passes through the installed
//! [`Munge`] before it becomes visible.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{BufDirection, BufEvents, RingBuffer};
use crate::cmd::Command;
use crate::error::{ComediError, Result};

/// Post-acquisition sample transform applied as data is committed.
///
/// Implementations must be pure functions of their own state and the
/// buffer contents.
pub trait Munge: Send + Sync {
    /// Transform whole samples in place. `first_chan` is the scan position
    /// of the first sample in `samples`.
    fn munge(&self, first_chan: usize, samples: &mut [u8]);
}

/// Which side the device works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Device produces (AI, counters)
    Input,
    /// Device consumes (AO, correlated DO)
    Output,
}

#[derive(Default)]
struct Active {
    cmd: Option<Arc<Command>>,
    munge: Option<Arc<dyn Munge>>,
    sample_size: usize,
}

/// Asynchronous context of one subdevice.
pub struct Transfer {
    kind: TransferKind,
    buffer: RingBuffer,
    active: Mutex<Active>,
}

impl Transfer {
    /// Create a context with a buffer of `capacity` bytes.
    pub fn new(kind: TransferKind, capacity: usize) -> Self {
        Self {
            kind,
            buffer: RingBuffer::new(capacity),
            active: Mutex::new(Active::default()),
        }
    }

    /// Direction of device data flow.
    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// The ring buffer.
    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }

    /// The active command, if any.
    pub fn command(&self) -> Option<Arc<Command>> {
        self.active.lock().cmd.clone()
    }

    /// Whether a command is active.
    pub fn is_running(&self) -> bool {
        self.active.lock().cmd.is_some()
    }

    /// Sample size of the active command in bytes.
    pub fn sample_size(&self) -> usize {
        self.active.lock().sample_size
    }

    /// Enter the running state: reset the buffer and, for input, arm the
    /// end-of-acquisition count.
    ///
    /// The idle check and the claim happen under one lock, so of two
    /// concurrent callers exactly one gets the subdevice and the other
    /// gets [`ComediError::Busy`]. A pending `ERROR` event refuses the
    /// start until the consumer has taken it.
    pub(crate) fn begin(
        &self,
        subdevice: usize,
        cmd: Arc<Command>,
        sample_size: usize,
    ) -> Result<()> {
        let mut active = self.active.lock();
        if active.cmd.is_some() {
            return Err(ComediError::Busy { subdevice });
        }
        if self.buffer.events().contains(BufEvents::ERROR) {
            return Err(ComediError::PendingBufferError { subdevice });
        }
        self.buffer.reset();
        if self.kind == TransferKind::Input {
            let end = cmd.total_samples().map(|n| n * sample_size as u64);
            self.buffer.set_end_count(end);
        }
        active.cmd = Some(cmd);
        active.munge = None;
        active.sample_size = sample_size;
        Ok(())
    }

    /// Install the transform for the running command.
    pub fn set_munge(&self, munge: Option<Arc<dyn Munge>>) {
        self.active.lock().munge = munge;
    }

    /// Leave the running state. Pending events stay for the consumer.
    pub fn finish(&self) {
        let mut active = self.active.lock();
        if active.cmd.take().is_some() {
            debug!(kind = ?self.kind, "transfer finished");
        }
        active.munge = None;
    }

    fn munger(&self) -> (Option<Arc<dyn Munge>>, usize, usize) {
        let active = self.active.lock();
        let nb_chan = active
            .cmd
            .as_ref()
            .map_or(1, |c| c.chan_descs.len().max(1));
        (active.munge.clone(), active.sample_size.max(1), nb_chan)
    }

    /// Apply the munge to chunks starting at producer position `start`.
    fn munge_chunks(
        munge: Option<Arc<dyn Munge>>,
        sample_size: usize,
        nb_chan: usize,
        start: u64,
    ) -> impl FnMut(&mut [u8]) {
        let mut sample = (start / sample_size as u64) as usize;
        move |chunk: &mut [u8]| {
            if let Some(m) = &munge {
                m.munge(sample % nb_chan, chunk);
            }
            sample += chunk.len() / sample_size;
        }
    }

    /// Producer-side copy for drivers servicing a FIFO.
    pub fn put(&self, data: &[u8]) -> Result<()> {
        let (munge, size, nb_chan) = self.munger();
        let start = self.buffer.put_count();
        self.buffer
            .put_with(data, Self::munge_chunks(munge, size, nb_chan, start))
    }

    /// Producer-side commit for DMA engines that already stored the data.
    pub fn commit_absput(&self, count: u64) -> Result<()> {
        let (munge, size, nb_chan) = self.munger();
        let start = self.buffer.put_count();
        self.buffer
            .commit_absput_with(count, Self::munge_chunks(munge, size, nb_chan, start))
    }

    /// User-side write for output subdevices; returns bytes accepted.
    pub fn write(&self, data: &[u8]) -> usize {
        let (munge, size, nb_chan) = self.munger();
        let start = self.buffer.put_count();
        let whole = data.len() - data.len() % size;
        self.buffer
            .write_with(&data[..whole], Self::munge_chunks(munge, size, nb_chan, start))
    }

    /// Publish bytes the user stored in place (shared-memory writes).
    pub fn mark_written(&self, len: usize) -> Result<()> {
        self.buffer.prepare_put(len)?;
        let target = self.buffer.put_count() + len as u64;
        self.commit_absput(target)
    }

    /// User-side read for input subdevices.
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.buffer.read(out)
    }

    /// Bytes the user side can move right now.
    pub fn user_count(&self) -> usize {
        match self.kind {
            TransferKind::Input => self.buffer.count(BufDirection::Get),
            TransferKind::Output => self.buffer.count(BufDirection::Put),
        }
    }

    /// Raise buffer events.
    pub fn event(&self, events: BufEvents) {
        self.buffer.event(events);
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("kind", &self.kind)
            .field("running", &self.is_running())
            .field("buffer", &self.buffer)
            .finish()
    }
}
