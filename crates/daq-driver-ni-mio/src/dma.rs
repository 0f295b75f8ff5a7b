//! MITE DMA channel bookkeeping and the two transfer strategies.
//!
//! Every command-capable function that can move samples by DMA owns one
//! slot ([`DmaRole`]). A slot holds at most one MITE channel; the channel
//! is routed to the function through a select bitfield in the shared
//! soft copies.
//!
//! Which strategy a board uses is decided once at attach:
//!
//! - [`DmaTransfers`] drives a [`Mite`] engine. Samples move without the
//!   CPU; the interrupt handler only synchronises ring buffer counters with
//!   the engine's position.
//! - [`PolledTransfers`] has no engine. The interrupt handler drains and
//!   fills FIFOs itself.

use std::fmt;
use std::sync::Arc;

use comedi_core::{ComediError, Result, Transfer, TransferKind};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::device::{Bitfield, Bus};
use crate::regs::{board, dma_channel_select_bits, m_series, mite::Chsr};

/// Function a DMA channel is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaRole {
    /// Analog input
    Ai,
    /// Analog output
    Ao,
    /// General-purpose counter 0 or 1
    Gpct(usize),
    /// Correlated digital output
    Cdo,
}

const N_SLOTS: usize = 5;

impl DmaRole {
    fn slot(self) -> usize {
        match self {
            Self::Ai => 0,
            Self::Ao => 1,
            Self::Gpct(i) => 2 + (i & 1),
            Self::Cdo => 4,
        }
    }

    /// Select register, field mask and field shift routing a channel here.
    fn select(self) -> (Bitfield, u32, u32) {
        match self {
            Self::Ai => (
                Bitfield::AiAoSelect,
                board::AI_DMA_SELECT_MASK.into(),
                board::AI_DMA_SELECT_SHIFT,
            ),
            Self::Ao => (
                Bitfield::AiAoSelect,
                board::AO_DMA_SELECT_MASK.into(),
                board::AO_DMA_SELECT_SHIFT,
            ),
            Self::Gpct(i) => (
                Bitfield::G0G1Select,
                board::gpct_dma_select_mask(i & 1).into(),
                4 * (i as u32 & 1),
            ),
            Self::Cdo => (
                Bitfield::CdioDmaSelect,
                m_series::CDO_DMA_SELECT_MASK.into(),
                m_series::CDO_DMA_SELECT_SHIFT,
            ),
        }
    }
}

impl fmt::Display for DmaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ai => f.write_str("AI"),
            Self::Ao => f.write_str("AO"),
            Self::Gpct(i) => write!(f, "GPCT{i}"),
            Self::Cdo => f.write_str("CDO"),
        }
    }
}

/// Transfer widths of a DMA channel in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaWidths {
    /// Width of a device-side (FIFO) access
    pub device: u32,
    /// Width of a memory-side (ring buffer) access
    pub memory: u32,
}

impl DmaWidths {
    /// Same width on both sides.
    pub const fn uniform(bits: u32) -> Self {
        Self {
            device: bits,
            memory: bits,
        }
    }
}

/// A MITE scatter-gather DMA engine.
///
/// Positions are absolute byte counts in the ring buffer of the transfer
/// the channel was prepared with.
pub trait Mite: Send + Sync {
    /// Hardware channels on the engine.
    fn n_channels(&self) -> usize;
    /// Claim a free channel.
    fn request_channel(&self) -> Option<usize>;
    /// Return a channel to the pool.
    fn release_channel(&self, channel: usize);
    /// Point a channel at a transfer's ring buffer.
    fn prep(&self, channel: usize, transfer: Arc<Transfer>, widths: DmaWidths);
    /// Start moving data.
    fn arm(&self, channel: usize);
    /// Stop moving data.
    fn disarm(&self, channel: usize);
    /// Channel status register.
    fn status(&self, channel: usize) -> Chsr;
    /// Clear a pending link-complete condition.
    fn ack_linkc(&self, channel: usize);
    /// Bytes the engine finished moving.
    fn bytes_transferred(&self, channel: usize) -> u64;
    /// Bytes the engine holds that are not yet in place.
    fn bytes_in_transit(&self, channel: usize) -> u64;
}

/// How samples move between the board FIFOs and the ring buffers.
pub trait TransferStrategy: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether an engine moves the samples.
    fn is_dma(&self) -> bool;

    /// Claim a channel for `role`, route it, point it at `transfer` and arm
    /// it.
    fn setup(&self, role: DmaRole, transfer: &Arc<Transfer>, widths: DmaWidths) -> Result<()>;

    /// Disarm and release the channel of `role`, if any.
    fn release(&self, role: DmaRole);

    /// Whether `role` holds a channel.
    fn has_channel(&self, role: DmaRole) -> bool;

    /// Channel status of `role`; a pending link-complete is acknowledged.
    fn take_status(&self, role: DmaRole) -> Chsr;

    /// Bring the ring buffer counters of `transfer` up to the engine's
    /// position.
    fn sync(&self, role: DmaRole, transfer: &Transfer) -> Result<()>;

    /// Bytes in flight on the channel of `role`.
    fn in_transit(&self, role: DmaRole) -> u64;
}

/// Strategy backed by a MITE engine.
pub struct DmaTransfers {
    mite: Arc<dyn Mite>,
    bus: Arc<Bus>,
    slots: Mutex<[Option<usize>; N_SLOTS]>,
}

impl DmaTransfers {
    /// Strategy over `mite`, routing channels through `bus`.
    pub fn new(mite: Arc<dyn Mite>, bus: Arc<Bus>) -> Self {
        Self {
            mite,
            bus,
            slots: Mutex::new([None; N_SLOTS]),
        }
    }

    fn channel(&self, role: DmaRole) -> Option<usize> {
        self.slots.lock()[role.slot()]
    }

    fn sync_input(&self, channel: usize, transfer: &Transfer) -> Result<()> {
        let done = self.mite.bytes_transferred(channel);
        let in_flight = done + self.mite.bytes_in_transit(channel);
        let buffer = transfer.buffer();
        if done <= buffer.put_count() {
            return Ok(());
        }
        buffer.prepare_absput(in_flight.max(done))?;
        transfer.commit_absput(done)
    }

    fn sync_output(&self, channel: usize, transfer: &Transfer) -> Result<()> {
        let done = self.mite.bytes_transferred(channel);
        let buffer = transfer.buffer();
        let mut reserved = done + self.mite.bytes_in_transit(channel);
        if let Some(total) = transfer.command().and_then(|c| c.total_samples()) {
            reserved = reserved.min(total * transfer.sample_size() as u64);
        }
        let reserved = reserved.max(done).min(buffer.put_count());
        if reserved < buffer.get_count() {
            return Ok(());
        }
        buffer.prepare_absget(reserved)?;
        buffer.commit_absget(done.min(reserved))
    }
}

impl TransferStrategy for DmaTransfers {
    fn name(&self) -> &'static str {
        "mite-dma"
    }

    fn is_dma(&self) -> bool {
        true
    }

    fn setup(&self, role: DmaRole, transfer: &Arc<Transfer>, widths: DmaWidths) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = role.slot();
        if let Some(held) = slots[slot] {
            return Err(ComediError::contract(format!(
                "{role} already holds DMA channel {held}"
            )));
        }
        let channel = self
            .mite
            .request_channel()
            .ok_or_else(|| ComediError::DmaUnavailable {
                role: role.to_string(),
            })?;
        let Some(bits) = dma_channel_select_bits(channel) else {
            self.mite.release_channel(channel);
            return Err(ComediError::contract(format!(
                "MITE channel {channel} cannot be routed to {role}"
            )));
        };
        let (field, mask, shift) = role.select();
        self.bus.set_bitfield(field, mask, u32::from(bits) << shift);
        slots[slot] = Some(channel);
        self.mite.prep(channel, Arc::clone(transfer), widths);
        self.mite.arm(channel);
        debug!(%role, channel, ?widths, "DMA channel armed");
        Ok(())
    }

    fn release(&self, role: DmaRole) {
        let mut slots = self.slots.lock();
        if let Some(channel) = slots[role.slot()].take() {
            let (field, mask, _) = role.select();
            self.bus.set_bitfield(field, mask, 0);
            self.mite.disarm(channel);
            self.mite.release_channel(channel);
            debug!(%role, channel, "DMA channel released");
        }
    }

    fn has_channel(&self, role: DmaRole) -> bool {
        self.channel(role).is_some()
    }

    fn take_status(&self, role: DmaRole) -> Chsr {
        let Some(channel) = self.channel(role) else {
            return Chsr::empty();
        };
        let status = self.mite.status(channel);
        if status.contains(Chsr::LINKC) {
            self.mite.ack_linkc(channel);
        }
        trace!(%role, channel, status = format_args!("0x{:08x}", status.bits()), "mite status");
        status
    }

    fn sync(&self, role: DmaRole, transfer: &Transfer) -> Result<()> {
        let Some(channel) = self.channel(role) else {
            return Ok(());
        };
        match transfer.kind() {
            TransferKind::Input => self.sync_input(channel, transfer),
            TransferKind::Output => self.sync_output(channel, transfer),
        }
    }

    fn in_transit(&self, role: DmaRole) -> u64 {
        self.channel(role)
            .map_or(0, |channel| self.mite.bytes_in_transit(channel))
    }
}

impl fmt::Debug for DmaTransfers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaTransfers")
            .field("channels", &self.mite.n_channels())
            .field("slots", &*self.slots.lock())
            .finish()
    }
}

/// Strategy for boards without a usable DMA engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolledTransfers;

impl TransferStrategy for PolledTransfers {
    fn name(&self) -> &'static str {
        "polled-fifo"
    }

    fn is_dma(&self) -> bool {
        false
    }

    fn setup(&self, role: DmaRole, _transfer: &Arc<Transfer>, _widths: DmaWidths) -> Result<()> {
        Err(ComediError::not_supported(format!("{role} DMA")))
    }

    fn release(&self, _role: DmaRole) {}

    fn has_channel(&self, _role: DmaRole) -> bool {
        false
    }

    fn take_status(&self, _role: DmaRole) -> Chsr {
        Chsr::empty()
    }

    fn sync(&self, _role: DmaRole, _transfer: &Transfer) -> Result<()> {
        Ok(())
    }

    fn in_transit(&self, _role: DmaRole) -> u64 {
        0
    }
}
