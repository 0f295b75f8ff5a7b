//! Register-level board simulator.
//!
//! [`SimBoard`] implements [`RegisterIo`] for one board of the table and
//! models enough of the DAQ-STC for the driver to run unmodified: the AI
//! sequencer with its configuration memory and FIFO, the AO FIFO and
//! update counter, two counters, the M-series correlated DIO FIFO, the DIO
//! and serial lines, and the EEPROM and caldac shift registers. [`SimMite`]
//! stands in for the DMA engine.
//!
//! Time only moves when a test asks: [`SimBoard::run_scans`] clocks the AI
//! sequencer, [`SimBoard::run_updates`] the AO, and so on. After every step
//! the board raises its interrupt line if an enabled condition is pending;
//! the handler runs on the calling thread.
//!
//! Samples are deterministic: the code of channel `c` in scan `s` is
//! [`sample_code`]`(c, s, maxdata)`, converted to the raw format the family
//! delivers.
//!
//! ```
//! use daq_driver_ni_mio::sim::SimRig;
//!
//! let rig = SimRig::attach("pci-6052e").unwrap();
//! assert_eq!(rig.device.board_name(), "pci-6052e");
//! ```

mod engine;
mod mite;

use std::sync::Arc;

use comedi_core::{Device, IrqReturn, IrqSlot, Result};
use parking_lot::Mutex;

use crate::attach;
use crate::board::BoardInfo;
use crate::config::AttachConfig;
use crate::device::NiMio;
use crate::dma::Mite;
use crate::io::RegisterIo;

pub use mite::SimMite;

use engine::SimState;

/// MITE channels of a simulated engine.
pub const SIM_MITE_CHANNELS: usize = 3;

/// One entry of the AI configuration memory as the board latched it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigEntry {
    /// `Configuration_Memory_High` (zero on M-series)
    pub high: u16,
    /// `Configuration_Memory_Low`, or the M-series configuration FIFO word
    pub low: u16,
}

/// A word shifted into a calibration DAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaldacLoad {
    /// Index of the load strobe that latched the word
    pub dac: usize,
    /// Bits shifted in, MSB first
    pub word: u32,
    /// Number of bits shifted in
    pub bits: u32,
}

/// Code the simulated ADC produces for `chan` in scan `scan`.
pub fn sample_code(chan: u32, scan: u64, maxdata: u32) -> u32 {
    ((chan << 8) | (scan as u32 & 0xff)) & maxdata
}

/// Simulated board.
pub struct SimBoard {
    board: &'static BoardInfo,
    state: Mutex<SimState>,
    irq: Mutex<Option<Arc<IrqSlot>>>,
}

impl SimBoard {
    /// A powered-up board with empty FIFOs.
    pub fn new(board: &'static BoardInfo) -> Arc<Self> {
        Arc::new(Self {
            board,
            state: Mutex::new(SimState::new(board)),
            irq: Mutex::new(None),
        })
    }

    /// Board being simulated.
    pub fn board(&self) -> &'static BoardInfo {
        self.board
    }

    /// Route the interrupt line to `slot`.
    pub fn connect_irq(&self, slot: Arc<IrqSlot>) {
        *self.irq.lock() = Some(slot);
    }

    /// Let the board move samples through `mite`.
    pub fn attach_mite(&self, mite: Arc<SimMite>) {
        self.state.lock().mite = Some(mite);
    }

    /// Raise the interrupt line if anything enabled is pending. Returns what
    /// the handler reported.
    pub fn interrupt(&self) -> IrqReturn {
        if !self.state.lock().irq_asserted() {
            return IrqReturn::None;
        }
        let slot = self.irq.lock().clone();
        slot.map_or(IrqReturn::None, |s| s.fire())
    }

    fn step(&self, f: impl FnOnce(&mut SimState) -> bool) -> bool {
        let progressed = f(&mut *self.state.lock());
        if progressed {
            self.interrupt();
        }
        progressed
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// 8-bit read, as the driver would do it.
    pub fn read8(&self, offset: u32) -> u8 {
        <Self as RegisterIo>::read8(self, offset)
    }

    /// Last value written to a board register at `offset`, any width.
    pub fn board_reg(&self, offset: u32) -> u32 {
        self.state.lock().board_reg(offset)
    }

    /// Writes seen at `offset`, any width.
    pub fn writes_to(&self, offset: u32) -> usize {
        self.state.lock().writes_to(offset)
    }

    /// Last value written to STC register `reg`.
    pub fn stc_reg(&self, reg: u32) -> u16 {
        self.state.lock().stc_reg(reg)
    }

    /// Writes seen on STC register `reg`.
    pub fn stc_writes(&self, reg: u32) -> usize {
        self.state.lock().stc_writes(reg)
    }

    /// AI configuration memory in scan order.
    pub fn config_memory(&self) -> Vec<ConfigEntry> {
        self.state.lock().config.clone()
    }

    /// Samples waiting in the AI FIFO.
    pub fn ai_fifo_len(&self) -> usize {
        self.state.lock().ai_fifo_len()
    }

    /// Data reads the driver made from the AI FIFO.
    pub fn ai_fifo_reads(&self) -> usize {
        self.state.lock().ai_fifo_reads()
    }

    /// The AI sequencer is running.
    pub fn ai_running(&self) -> bool {
        self.state.lock().ai_running()
    }

    /// The AO is running.
    pub fn ao_running(&self) -> bool {
        self.state.lock().ao_running()
    }

    /// Every value the AO has put on its DACs, in update order.
    pub fn dac_outputs(&self) -> Vec<u16> {
        self.state.lock().ao_outputs()
    }

    /// Last direct write to DAC `chan`.
    pub fn dac_direct(&self, chan: u32) -> Option<u32> {
        self.state.lock().dac_direct.get(&chan).copied()
    }

    /// Every word the correlated DO has put out.
    pub fn cdo_outputs(&self) -> Vec<u32> {
        self.state.lock().cdo_outputs()
    }

    /// Words latched into the calibration DACs.
    pub fn caldac_loads(&self) -> Vec<CaldacLoad> {
        self.state.lock().caldac_loads.clone()
    }

    // ------------------------------------------------------------------
    // Stimulus
    // ------------------------------------------------------------------

    /// Clock up to `n` AI scans; returns the scans performed.
    pub fn run_scans(&self, n: usize) -> usize {
        (0..n).take_while(|_| self.step(SimState::timed_scan)).count()
    }

    /// Assert the external start trigger.
    pub fn external_start(&self) {
        self.state.lock().external_start();
        self.interrupt();
    }

    /// Latch an AI overrun and raise the line.
    pub fn inject_ai_overrun(&self) {
        self.state.lock().inject_ai_overrun();
        self.interrupt();
    }

    /// Keep the AI half-full flag asserted whatever the FIFO holds, as a
    /// board that re-raises it straight after servicing does. The line is
    /// raised when `on`.
    pub fn hold_ai_half_full(&self, on: bool) {
        self.state.lock().hold_ai_half_full(on);
        if on {
            self.interrupt();
        }
    }

    /// Pull the card: every read returns all ones from now on.
    pub fn remove_card(&self) {
        self.state.lock().removed = true;
        self.interrupt();
    }

    /// Clock up to `n` AO updates; returns the updates performed.
    pub fn run_updates(&self, n: usize) -> usize {
        (0..n).take_while(|_| self.step(SimState::update)).count()
    }

    /// Count `n` source edges on counter `i`.
    pub fn tick_counter(&self, i: usize, n: u32) {
        self.state.lock().tick_counter(i, n);
    }

    /// Gate counter `i`: latch its count into the DMA stream and raise TC.
    pub fn latch_counter(&self, i: usize) {
        self.state.lock().latch_counter(i);
        self.interrupt();
    }

    /// Clock up to `n` correlated DO sample edges.
    pub fn run_cdo_updates(&self, n: usize) -> usize {
        (0..n).take_while(|_| self.step(SimState::cdo_update)).count()
    }

    /// Levels driven onto the DIO lines from outside.
    pub fn set_dio_inputs(&self, bits: u32) {
        self.state.lock().dio_inputs = bits;
    }

    /// Levels driven onto the PFI lines from outside.
    pub fn set_pfi_inputs(&self, bits: u16) {
        self.state.lock().pfi_inputs = bits;
    }

    /// Wire serial out back to serial in.
    pub fn set_serial_loopback(&self, on: bool) {
        self.state.lock().serial_loopback = on;
    }

    /// Byte a serial peer shifts in when not looped back.
    pub fn set_serial_input(&self, byte: u8) {
        self.state.lock().serial_input = byte;
    }

    /// Replace the EEPROM contents.
    pub fn set_eeprom(&self, image: &[u8]) {
        self.state.lock().eeprom_image = image.to_vec();
    }
}

impl RegisterIo for SimBoard {
    fn read8(&self, offset: u32) -> u8 {
        self.state.lock().read8(offset)
    }

    fn read16(&self, offset: u32) -> u16 {
        self.state.lock().read16(offset)
    }

    fn read32(&self, offset: u32) -> u32 {
        self.state.lock().read32(offset)
    }

    fn write8(&self, offset: u32, value: u8) {
        self.state.lock().write8(offset, value);
    }

    fn write16(&self, offset: u32, value: u16) {
        self.state.lock().write16(offset, value);
    }

    fn write32(&self, offset: u32, value: u32) {
        self.state.lock().write32(offset, value);
    }
}

impl std::fmt::Debug for SimBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBoard").field("board", &self.board.name).finish()
    }
}

/// A simulated board attached through the normal attach path.
pub struct SimRig {
    /// The registry the caller drives
    pub device: Device,
    /// Driver state behind the registry
    pub driver: Arc<NiMio>,
    /// The board
    pub sim: Arc<SimBoard>,
    /// The DMA engine, when DMA is enabled
    pub mite: Option<Arc<SimMite>>,
}

impl SimRig {
    /// Configuration used by [`SimRig::attach`]: IRQ 11, DMA on, a short
    /// relay settle time.
    pub fn config(board: &str) -> AttachConfig {
        AttachConfig {
            board: board.to_string(),
            irq: Some(11),
            dma: true,
            relay_settle_us: 1_000,
            ..AttachConfig::default()
        }
    }

    /// Attach `board` with DMA and an interrupt line.
    pub fn attach(board: &str) -> Result<Self> {
        Self::attach_with(Self::config(board))
    }

    /// Attach `board` with FIFO polling instead of DMA.
    pub fn polled(board: &str) -> Result<Self> {
        Self::attach_with(AttachConfig {
            dma: false,
            ..Self::config(board)
        })
    }

    /// Attach with an explicit configuration.
    pub fn attach_with(config: AttachConfig) -> Result<Self> {
        let info = config.board_info()?;
        let sim = SimBoard::new(info);
        let mite = config.dma.then(|| SimMite::new(SIM_MITE_CHANNELS));
        if let Some(m) = &mite {
            sim.attach_mite(Arc::clone(m));
        }
        let engine = mite.clone().map(|m| m as Arc<dyn Mite>);
        let (device, driver) = attach::attach(config, sim.clone(), engine)?;
        sim.connect_irq(Arc::clone(device.irq()));
        Ok(Self {
            device,
            driver,
            sim,
            mite,
        })
    }
}

impl std::fmt::Debug for SimRig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRig")
            .field("board", &self.sim.board.name)
            .field("dma", &self.mite.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::find_board;
    use crate::io::Stc;
    use crate::regs::{ai_command_1, ai_command_2, ai_mode_1, board, m_series, stc, AiStatus1};

    fn e_series() -> (Arc<SimBoard>, Stc) {
        let sim = SimBoard::new(find_board("pci-6052e").unwrap());
        let stc = Stc::windowed(sim.clone());
        (sim, stc)
    }

    #[test]
    fn test_window_reaches_stc_registers() {
        let (sim, stc) = e_series();
        stc.writew(0x1234, stc::AI_MODE_2);
        assert_eq!(sim.stc_reg(stc::AI_MODE_2), 0x1234);
        stc.writel(0x0001_0002, stc::AI_SC_LOAD_A);
        assert_eq!(sim.stc_reg(stc::AI_SC_LOAD_A), 1);
        assert_eq!(sim.stc_reg(stc::AI_SC_LOAD_A + 1), 2);
    }

    #[test]
    fn test_software_conversion_fills_fifo() {
        let (sim, stc) = e_series();
        let io: &dyn RegisterIo = sim.as_ref();
        io.write16(board::CONFIGURATION_MEMORY_HIGH, 3);
        io.write16(board::CONFIGURATION_MEMORY_LOW, board::AI_LAST_CHANNEL | 0x100);
        let status = AiStatus1::from_bits_retain(stc.readw(stc::AI_STATUS_1));
        assert!(status.contains(AiStatus1::FIFO_EMPTY));
        stc.writew(ai_command_1::CONVERT_PULSE, stc::AI_COMMAND_1);
        assert_eq!(sim.ai_fifo_len(), 1);
        assert_eq!(io.read16(board::ADC_FIFO_DATA) as u32, sample_code(3, 0, 0xffff));
    }

    #[test]
    fn test_trigger_once_stops_after_sc_plus_one() {
        let (sim, stc) = e_series();
        let io: &dyn RegisterIo = sim.as_ref();
        io.write16(board::CONFIGURATION_MEMORY_HIGH, 0);
        io.write16(board::CONFIGURATION_MEMORY_LOW, board::AI_LAST_CHANNEL);
        stc.writew(ai_mode_1::TRIGGER_ONCE, stc::AI_MODE_1);
        stc.writel(4, stc::AI_SC_LOAD_A);
        stc.writew(ai_command_1::SC_LOAD | ai_command_1::SC_ARM, stc::AI_COMMAND_1);
        stc.writew(ai_command_2::START1_PULSE, stc::AI_COMMAND_2);
        assert_eq!(sim.run_scans(10), 5);
        assert!(!sim.ai_running());
        let status = AiStatus1::from_bits_retain(stc.readw(stc::AI_STATUS_1));
        assert!(status.contains(AiStatus1::SC_TC));
    }

    #[test]
    fn test_removed_card_reads_all_ones() {
        let (sim, stc) = e_series();
        sim.remove_card();
        assert_eq!(stc.readw(stc::AI_STATUS_1), 0xffff);
        assert_eq!(sim.read8(board::XXX_STATUS), 0xff);
    }

    #[test]
    fn test_m_series_eeprom_image_is_byte_mapped() {
        let sim = SimBoard::new(find_board("pci-6221").unwrap());
        sim.set_eeprom(&[9, 8, 7]);
        assert_eq!(sim.read8(m_series::EEPROM_IMAGE + 1), 8);
        assert_eq!(sim.read8(m_series::EEPROM_IMAGE + 5), 0xff);
    }

    #[test]
    fn test_sample_code_masks_to_resolution() {
        assert_eq!(sample_code(5, 3, 0xffff), 0x0503);
        assert_eq!(sample_code(31, 0x1ff, 0xfff), 0xfff);
    }
}
