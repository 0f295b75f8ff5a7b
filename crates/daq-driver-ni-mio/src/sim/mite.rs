//! Simulated MITE engine.
//!
//! Channels copy straight between the simulated board FIFOs and the ring
//! buffer of the transfer they were prepared with. The device-side
//! position is what the engine reports as transferred; nothing is ever
//! in transit unless a test asks for it.

use std::sync::Arc;

use comedi_core::Transfer;
use parking_lot::Mutex;

use crate::dma::{DmaWidths, Mite};
use crate::regs::mite::Chsr;

#[derive(Default)]
struct SimChannel {
    claimed: bool,
    transfer: Option<Arc<Transfer>>,
    widths: Option<DmaWidths>,
    armed: bool,
    position: u64,
    in_transit: u64,
    status: Chsr,
}

/// MITE engine model with a fixed number of channels.
pub struct SimMite {
    channels: Mutex<Vec<SimChannel>>,
}

impl SimMite {
    /// Engine with `n_channels` free channels.
    pub fn new(n_channels: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new((0..n_channels).map(|_| SimChannel::default()).collect()),
        })
    }

    /// Store raw bytes at the channel's position in its ring buffer, as the
    /// engine does for an input transfer, and raise link-complete.
    pub fn push_input(&self, channel: usize, data: &[u8]) {
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(channel) else {
            return;
        };
        let Some(transfer) = ch.transfer.as_ref().filter(|_| ch.armed) else {
            return;
        };
        transfer.buffer().store_at(ch.position, data);
        ch.position += data.len() as u64;
        ch.status |= Chsr::LINKC | Chsr::INT;
    }

    /// Encode `samples` at the channel's memory width and store them.
    /// Returns `false` when the channel is not running.
    pub(crate) fn push_samples(&self, channel: usize, samples: &[u32]) -> bool {
        let memory = {
            let channels = self.channels.lock();
            match channels.get(channel) {
                Some(ch) if ch.armed && ch.transfer.is_some() => {
                    ch.widths.map_or(16, |w| w.memory)
                }
                _ => return false,
            }
        };
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for &s in samples {
            if memory == 32 {
                bytes.extend_from_slice(&s.to_le_bytes());
            } else {
                bytes.extend_from_slice(&(s as u16).to_le_bytes());
            }
        }
        self.push_input(channel, &bytes);
        true
    }

    /// Fetch up to `max_bytes` of output data from the channel's ring
    /// buffer, in whole memory-width units.
    pub(crate) fn pull_output(&self, channel: usize, max_bytes: usize) -> Vec<u8> {
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(channel) else {
            return Vec::new();
        };
        let Some(transfer) = ch.transfer.as_ref().filter(|_| ch.armed) else {
            return Vec::new();
        };
        let unit = (ch.widths.map_or(16, |w| w.memory) / 8) as usize;
        let available = transfer.buffer().put_count().saturating_sub(ch.position) as usize;
        let n = available.min(max_bytes);
        let n = n - n % unit.max(1);
        if n == 0 {
            return Vec::new();
        }
        let mut out = vec![0u8; n];
        transfer.buffer().load_at(ch.position, &mut out);
        ch.position += n as u64;
        ch.status |= Chsr::LINKC | Chsr::INT;
        out
    }

    /// Report `bytes` as held by the engine on `channel`.
    pub fn set_in_transit(&self, channel: usize, bytes: u64) {
        if let Some(ch) = self.channels.lock().get_mut(channel) {
            ch.in_transit = bytes;
        }
    }

    /// Latch extra status bits on `channel`, e.g. a transfer error.
    pub fn inject_status(&self, channel: usize, bits: Chsr) {
        if let Some(ch) = self.channels.lock().get_mut(channel) {
            ch.status |= bits | Chsr::INT;
        }
    }

    /// Whether `channel` is armed.
    pub fn is_armed(&self, channel: usize) -> bool {
        self.channels.lock().get(channel).is_some_and(|c| c.armed)
    }

    /// Channels currently claimed.
    pub fn claimed(&self) -> usize {
        self.channels.lock().iter().filter(|c| c.claimed).count()
    }

    /// Widths the channel was prepared with.
    pub fn widths(&self, channel: usize) -> Option<DmaWidths> {
        self.channels.lock().get(channel).and_then(|c| c.widths)
    }

    /// Any channel is asserting its interrupt.
    pub(crate) fn interrupt_pending(&self) -> bool {
        self.channels
            .lock()
            .iter()
            .any(|c| c.armed && c.status.contains(Chsr::INT))
    }
}

impl Mite for SimMite {
    fn n_channels(&self) -> usize {
        self.channels.lock().len()
    }

    fn request_channel(&self) -> Option<usize> {
        let mut channels = self.channels.lock();
        let (i, ch) = channels.iter_mut().enumerate().find(|(_, c)| !c.claimed)?;
        ch.claimed = true;
        Some(i)
    }

    fn release_channel(&self, channel: usize) {
        if let Some(ch) = self.channels.lock().get_mut(channel) {
            *ch = SimChannel::default();
        }
    }

    fn prep(&self, channel: usize, transfer: Arc<Transfer>, widths: DmaWidths) {
        if let Some(ch) = self.channels.lock().get_mut(channel) {
            ch.position = transfer.buffer().get_count().min(transfer.buffer().put_count());
            ch.transfer = Some(transfer);
            ch.widths = Some(widths);
            ch.status = Chsr::empty();
            ch.in_transit = 0;
        }
    }

    fn arm(&self, channel: usize) {
        if let Some(ch) = self.channels.lock().get_mut(channel) {
            ch.armed = true;
        }
    }

    fn disarm(&self, channel: usize) {
        if let Some(ch) = self.channels.lock().get_mut(channel) {
            ch.armed = false;
        }
    }

    fn status(&self, channel: usize) -> Chsr {
        self.channels
            .lock()
            .get(channel)
            .map_or(Chsr::empty(), |c| c.status)
    }

    fn ack_linkc(&self, channel: usize) {
        if let Some(ch) = self.channels.lock().get_mut(channel) {
            ch.status.remove(Chsr::LINKC | Chsr::INT);
        }
    }

    fn bytes_transferred(&self, channel: usize) -> u64 {
        self.channels.lock().get(channel).map_or(0, |c| c.position)
    }

    fn bytes_in_transit(&self, channel: usize) -> u64 {
        self.channels.lock().get(channel).map_or(0, |c| c.in_transit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comedi_core::TransferKind;

    #[test]
    fn test_channels_are_claimed_in_order() {
        let mite = SimMite::new(2);
        assert_eq!(mite.request_channel(), Some(0));
        assert_eq!(mite.request_channel(), Some(1));
        assert_eq!(mite.request_channel(), None);
        mite.release_channel(0);
        assert_eq!(mite.claimed(), 1);
        assert_eq!(mite.request_channel(), Some(0));
    }

    #[test]
    fn test_samples_follow_memory_width() {
        let mite = SimMite::new(1);
        let t = Arc::new(Transfer::new(TransferKind::Input, 64));
        let ch = mite.request_channel().unwrap();
        mite.prep(ch, t, DmaWidths { device: 32, memory: 16 });
        assert!(!mite.push_samples(ch, &[1, 2]));
        mite.arm(ch);
        assert!(mite.push_samples(ch, &[1, 2]));
        assert_eq!(mite.bytes_transferred(ch), 4);
        assert!(mite.status(ch).contains(Chsr::LINKC));
        mite.ack_linkc(ch);
        assert!(!mite.interrupt_pending());
    }

    #[test]
    fn test_pull_stops_at_producer() {
        let mite = SimMite::new(1);
        let t = Arc::new(Transfer::new(TransferKind::Output, 64));
        t.buffer().put(&[1, 0, 2, 0, 3, 0]).unwrap();
        let ch = mite.request_channel().unwrap();
        mite.prep(ch, Arc::clone(&t), DmaWidths { device: 16, memory: 32 });
        mite.arm(ch);
        let out = mite.pull_output(ch, 64);
        assert_eq!(out, vec![1, 0, 2, 0]);
        assert_eq!(mite.bytes_transferred(ch), 4);
    }
}
