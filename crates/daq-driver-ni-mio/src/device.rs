//! Driver state of one attached board.
//!
//! [`Bus`] owns register access and the soft copies of registers that
//! several features share. [`NiMio`] owns everything else: the board
//! description, the family strategy, the transfer strategy, per-subsystem
//! state and the asynchronous contexts of the command-capable subdevices.
//!
//! # Locking
//!
//! ```text
//! device lock ─► subsystem state (ai / ao / dio / counter / cal / pfi)
//!             ─► DMA slots ─► shadow ─► STC window ─► ring buffer
//! ```
//!
//! Locks are always taken left to right. The interrupt handler, `do_cmd`
//! and `inttrig` take the device lock for their whole run. `cancel` is
//! called by the registry with the device lock already held and must not
//! take it again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use comedi_core::{IrqSlot, Transfer};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::ai::AiState;
use crate::ao::AoState;
use crate::board::BoardInfo;
use crate::calib::CalState;
use crate::config::AttachConfig;
use crate::dio::DioState;
use crate::dma::TransferStrategy;
use crate::family::BoardFamily;
use crate::gpct::CounterState;
use crate::io::{RegisterIo, Stc};
use crate::pfi::PfiState;
use crate::regs::{r611x, stc};

/// Poll budget for FIFO and status waits, in polling steps.
pub(crate) const NI_TIMEOUT: u32 = 1000;

/// Registers shared between features through a soft copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitfield {
    /// `Interrupt_A_Enable`
    InterruptAEnable,
    /// `Interrupt_B_Enable`
    InterruptBEnable,
    /// `IO_Bidirection_Pin` (PFI direction)
    IoBidirectionPin,
    /// `AI_AO_Select` (AI and AO DMA channel routing)
    AiAoSelect,
    /// `G0_G1_Select` (counter DMA channel routing)
    G0G1Select,
    /// `CDIO_DMA_Select` (M-series correlated DIO DMA routing)
    CdioDmaSelect,
}

/// Soft copies of the shared registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shadow {
    /// `Interrupt_A_Enable`
    pub int_a_enable: u16,
    /// `Interrupt_B_Enable`
    pub int_b_enable: u16,
    /// `IO_Bidirection_Pin`
    pub io_bidirection_pin: u16,
    /// `AI_AO_Select`
    pub ai_ao_select: u8,
    /// `G0_G1_Select`
    pub g0_g1_select: u8,
    /// `CDIO_DMA_Select`
    pub cdio_dma_select: u8,
}

/// Register access plus the shared soft copies.
pub struct Bus {
    stc: Stc,
    shadow: Mutex<Shadow>,
    ao_window: Mutex<()>,
}

impl Bus {
    /// Wrap an STC accessor.
    pub fn new(stc: Stc) -> Self {
        Self {
            stc,
            shadow: Mutex::new(Shadow::default()),
            ao_window: Mutex::new(()),
        }
    }

    /// DAQ-STC accessor.
    pub fn stc(&self) -> &Stc {
        &self.stc
    }

    /// Raw board registers.
    pub fn io(&self) -> &dyn RegisterIo {
        self.stc.io()
    }

    /// Current soft copies.
    pub fn shadow(&self) -> Shadow {
        *self.shadow.lock()
    }

    /// Replace the bits of `mask` in a shared register with `value` and
    /// write it out. The write is flushed before the shadow lock drops.
    pub fn set_bitfield(&self, field: Bitfield, mask: u32, value: u32) {
        let mut shadow = self.shadow.lock();
        let io = self.stc.io();
        match field {
            Bitfield::InterruptAEnable => {
                shadow.int_a_enable = merge16(shadow.int_a_enable, mask, value);
                self.stc.writew(shadow.int_a_enable, stc::INTERRUPT_A_ENABLE);
            }
            Bitfield::InterruptBEnable => {
                shadow.int_b_enable = merge16(shadow.int_b_enable, mask, value);
                self.stc.writew(shadow.int_b_enable, stc::INTERRUPT_B_ENABLE);
            }
            Bitfield::IoBidirectionPin => {
                shadow.io_bidirection_pin = merge16(shadow.io_bidirection_pin, mask, value);
                self.stc
                    .writew(shadow.io_bidirection_pin, stc::IO_BIDIRECTION_PIN);
            }
            Bitfield::AiAoSelect => {
                shadow.ai_ao_select = merge8(shadow.ai_ao_select, mask, value);
                io.write8(crate::regs::board::AI_AO_SELECT, shadow.ai_ao_select);
            }
            Bitfield::G0G1Select => {
                shadow.g0_g1_select = merge8(shadow.g0_g1_select, mask, value);
                io.write8(crate::regs::board::G0_G1_SELECT, shadow.g0_g1_select);
            }
            Bitfield::CdioDmaSelect => {
                shadow.cdio_dma_select = merge8(shadow.cdio_dma_select, mask, value);
                io.write8(crate::regs::m_series::CDIO_DMA_SELECT, shadow.cdio_dma_select);
            }
        }
        trace!(?field, mask, value, "bitfield update");
        self.stc.barrier();
    }

    /// Set or clear `bits` of a shared register.
    pub fn set_bits(&self, field: Bitfield, bits: u32, on: bool) {
        self.set_bitfield(field, bits, if on { bits } else { 0 });
    }

    /// Write a 16-bit register behind the 611x AO window.
    pub fn ao_window_write(&self, addr: u16, data: u16) {
        let _guard = self.ao_window.lock();
        let io = self.stc.io();
        io.write16(r611x::AO_WINDOW_ADDRESS, addr);
        io.write16(r611x::AO_WINDOW_DATA, data);
    }

    /// Write a 32-bit register behind the 611x AO window.
    pub fn ao_window_write32(&self, addr: u16, data: u32) {
        let _guard = self.ao_window.lock();
        let io = self.stc.io();
        io.write16(r611x::AO_WINDOW_ADDRESS, addr);
        io.write32(r611x::AO_WINDOW_DATA, data);
    }
}

fn merge16(old: u16, mask: u32, value: u32) -> u16 {
    (old & !(mask as u16)) | (value & mask) as u16
}

fn merge8(old: u8, mask: u32, value: u32) -> u8 {
    (old & !(mask as u8)) | (value & mask) as u8
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("stc", &self.stc)
            .field("shadow", &self.shadow())
            .finish()
    }
}

/// Interrupt and data-path counters.
#[derive(Debug, Default)]
pub struct Stats {
    pub(crate) interrupts: AtomicU64,
    pub(crate) fifo_retry_exhausted: AtomicU64,
    pub(crate) ai_errors: AtomicU64,
    pub(crate) ao_errors: AtomicU64,
    pub(crate) dma_syncs: AtomicU64,
}

impl Stats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            interrupts: self.interrupts.load(Ordering::Relaxed),
            fifo_retry_exhausted: self.fifo_retry_exhausted.load(Ordering::Relaxed),
            ai_errors: self.ai_errors.load(Ordering::Relaxed),
            ao_errors: self.ao_errors.load(Ordering::Relaxed),
            dma_syncs: self.dma_syncs.load(Ordering::Relaxed),
        }
    }
}

/// Counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Interrupts serviced
    pub interrupts: u64,
    /// Half-full FIFO service loops that ran out of retries
    pub fifo_retry_exhausted: u64,
    /// AI commands ended by an error status
    pub ai_errors: u64,
    /// AO overruns and underruns
    pub ao_errors: u64,
    /// DMA position synchronisations
    pub dma_syncs: u64,
}

/// Asynchronous contexts of the command-capable subdevices.
#[derive(Debug, Clone)]
pub struct Transfers {
    /// Analog input
    pub ai: Arc<Transfer>,
    /// Analog output, when the board has an AO FIFO
    pub ao: Option<Arc<Transfer>>,
    /// Correlated digital output (M-series)
    pub cdo: Option<Arc<Transfer>>,
    /// Counters 0 and 1
    pub gpct: [Arc<Transfer>; 2],
}

/// One attached NI E/M-series board.
pub struct NiMio {
    pub(crate) dev_lock: Arc<Mutex<()>>,
    pub(crate) board: &'static BoardInfo,
    pub(crate) family: Box<dyn BoardFamily>,
    pub(crate) bus: Arc<Bus>,
    pub(crate) dma: Box<dyn TransferStrategy>,
    pub(crate) irq: Arc<IrqSlot>,
    pub(crate) transfers: Transfers,
    pub(crate) config: AttachConfig,
    pub(crate) ai: Mutex<AiState>,
    pub(crate) ao: Mutex<AoState>,
    pub(crate) dio: Mutex<DioState>,
    pub(crate) counters: [Mutex<CounterState>; 2],
    pub(crate) cal: Mutex<CalState>,
    pub(crate) pfi: Mutex<PfiState>,
    pub(crate) clock_and_fout: Mutex<u16>,
    pub(crate) eeprom: Vec<u8>,
    pub(crate) stats: Stats,
}

impl NiMio {
    /// Board description.
    pub fn board(&self) -> &'static BoardInfo {
        self.board
    }

    /// Register access.
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Whether samples move by DMA.
    pub fn uses_dma(&self) -> bool {
        self.dma.is_dma()
    }

    /// Attach configuration in effect.
    pub fn config(&self) -> &AttachConfig {
        &self.config
    }

    /// Diagnostic counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Per-scan-position offsets of the last loaded AI channel list.
    pub fn ai_offsets(&self) -> Vec<u32> {
        self.ai.lock().offsets.clone()
    }

    pub(crate) fn has_irq(&self) -> bool {
        self.irq.line().is_some()
    }
}

impl fmt::Debug for NiMio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NiMio")
            .field("board", &self.board.name)
            .field("family", &self.family)
            .field("transfers", &self.dma.name())
            .field("irq", &self.irq.line())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;

    #[test]
    fn test_set_bitfield_preserves_other_bits() {
        let sim = SimBoard::new(crate::board::find_board("pci-6052e").unwrap());
        let bus = Bus::new(Stc::windowed(sim.clone()));
        bus.set_bitfield(Bitfield::AiAoSelect, 0x0f, 0x02);
        bus.set_bitfield(Bitfield::AiAoSelect, 0xf0, 0x40);
        assert_eq!(bus.shadow().ai_ao_select, 0x42);
        bus.set_bitfield(Bitfield::AiAoSelect, 0x0f, 0);
        assert_eq!(bus.shadow().ai_ao_select, 0x40);
        assert_eq!(sim.read8(crate::regs::board::AI_AO_SELECT), 0x40);
    }

    #[test]
    fn test_set_bits_on_interrupt_enable() {
        let sim = SimBoard::new(&crate::board::BOARDS[1]);
        let bus = Bus::new(Stc::windowed(sim.clone()));
        bus.set_bits(Bitfield::InterruptAEnable, 0x21, true);
        bus.set_bits(Bitfield::InterruptAEnable, 0x01, false);
        assert_eq!(bus.shadow().int_a_enable, 0x20);
        assert_eq!(sim.stc_reg(stc::INTERRUPT_A_ENABLE), 0x20);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = Stats::default();
        Stats::bump(&stats.interrupts);
        Stats::bump(&stats.fifo_retry_exhausted);
        let snap = stats.snapshot();
        assert_eq!(snap.interrupts, 1);
        assert_eq!(snap.fifo_retry_exhausted, 1);
        assert_eq!(snap.dma_syncs, 0);
    }
}
