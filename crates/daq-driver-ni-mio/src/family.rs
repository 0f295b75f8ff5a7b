//! Board-family strategies.
//!
//! The four register families differ in how the channel list is stored,
//! how the AI FIFO is read, how single conversions complete and how the
//! DACs are configured. Everything else in the driver is shared. The
//! strategy is picked once at attach from [`BoardInfo::kind`].

use std::fmt;

use comedi_core::{ChanDesc, Result, TrigSrc};

use crate::ai::fifo;
use crate::ai::AiState;
use crate::ao::{self, AoState};
use crate::board::{BoardInfo, BoardKind};
use crate::chanlist;
use crate::device::NiMio;
use crate::dma::DmaWidths;
use crate::ranges::GainTable;
use crate::regs::{ai_output_control as aoc, ai_personal};

/// Behaviour that varies between board families.
pub(crate) trait BoardFamily: Send + Sync + fmt::Debug {
    /// Family this strategy serves.
    fn kind(&self) -> BoardKind;

    /// Program configuration memory for `list` and record the per-position
    /// offsets in `ai`.
    fn load_chanlist(&self, dev: &NiMio, ai: &mut AiState, list: &[ChanDesc]) -> Result<()>;

    /// Shortest scan period for `nb_chan` channels in ns.
    fn min_scan_period(&self, board: &BoardInfo, nb_chan: u32) -> u32 {
        board.ai_speed.saturating_mul(nb_chan)
    }

    /// All channels convert at once; the convert timer is not used.
    fn simultaneous(&self) -> bool {
        false
    }

    /// Convert sources accepted by AI commands.
    fn ai_convert_sources(&self) -> TrigSrc {
        TrigSrc::TIMER | TrigSrc::EXT
    }

    /// Largest AI stop count.
    fn ai_stop_count_max(&self, board: &BoardInfo) -> u32 {
        0x0100_0000 - board.adc_stages()
    }

    /// `AI_Personal` written by an AI reset.
    fn ai_personal(&self) -> u16 {
        ai_personal::SHIFTIN_PULSE_WIDTH
            | ai_personal::SOC_POLARITY
            | ai_personal::CONVERT_PULSE_WIDTH
            | ai_personal::LOCALMUX_CLK_PULSE_WIDTH
    }

    /// `AI_Output_Control` written by an AI reset.
    fn ai_output_control(&self, board: &BoardInfo) -> u16;

    /// AI DMA transfer widths.
    fn ai_dma_widths(&self, board: &BoardInfo) -> DmaWidths;

    /// AO DMA transfer widths.
    fn ao_dma_widths(&self) -> DmaWidths {
        DmaWidths {
            device: 16,
            memory: 32,
        }
    }

    /// Read `n` samples the FIFO reports as present.
    fn read_ai_fifo(&self, dev: &NiMio, n: usize, out: &mut Vec<u32>);

    /// Read everything left in the AI FIFO.
    fn ai_fifo_dregs(&self, dev: &NiMio, out: &mut Vec<u32>);

    /// A sample stranded by a packed FIFO after the dregs are gone.
    fn ai_last_sample(&self, _dev: &NiMio) -> Option<u32> {
        None
    }

    /// One software-timed conversion of the loaded channel.
    fn ai_convert_one(&self, dev: &NiMio, signbits: u32) -> Result<u32>;

    /// Configure the DACs for `list`. Returns nothing; inversion masks are
    /// stored in `ao`.
    fn ao_config_chanlist(&self, dev: &NiMio, ao: &mut AoState, list: &[ChanDesc], timed: bool);

    /// Write one DAC directly.
    fn ao_write_direct(&self, dev: &NiMio, ao: &mut AoState, desc: ChanDesc, value: u32);

    /// Push samples into the DAC FIFO.
    fn ao_fifo_load(&self, dev: &NiMio, samples: &[u16]);
}

/// Classic E-series boards.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ESeries;

/// 611x simultaneous-sampling boards.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Pci611x;

/// 6143 boards.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Pci6143;

/// M-series boards.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MSeries;

/// Strategy for a board.
pub(crate) fn for_board(board: &BoardInfo) -> Box<dyn BoardFamily> {
    match board.kind {
        BoardKind::ESeries => Box::new(ESeries),
        BoardKind::Pci611x => Box::new(Pci611x),
        BoardKind::Pci6143 => Box::new(Pci6143),
        BoardKind::MSeries => Box::new(MSeries),
    }
}

fn output_control(convert: u16) -> u16 {
    aoc::scan_in_prog_select(3)
        | aoc::extmux_clk_select(0)
        | aoc::localmux_clk_select(2)
        | aoc::sc_tc_select(3)
        | convert
}

const SIMULTANEOUS_PERSONAL: u16 = ai_personal::SHIFTIN_PULSE_WIDTH
    | ai_personal::SOC_POLARITY
    | ai_personal::LOCALMUX_CLK_PULSE_WIDTH;

impl BoardFamily for ESeries {
    fn kind(&self) -> BoardKind {
        BoardKind::ESeries
    }

    fn load_chanlist(&self, dev: &NiMio, ai: &mut AiState, list: &[ChanDesc]) -> Result<()> {
        chanlist::load_legacy(dev, ai, list)
    }

    fn ai_output_control(&self, _board: &BoardInfo) -> u16 {
        output_control(aoc::CONVERT_ENABLE_LOW)
    }

    fn ai_dma_widths(&self, _board: &BoardInfo) -> DmaWidths {
        DmaWidths::uniform(16)
    }

    fn read_ai_fifo(&self, dev: &NiMio, n: usize, out: &mut Vec<u32>) {
        fifo::read_words(dev, n, out);
    }

    fn ai_fifo_dregs(&self, dev: &NiMio, out: &mut Vec<u32>) {
        fifo::dregs_words(dev, out);
    }

    fn ai_convert_one(&self, dev: &NiMio, signbits: u32) -> Result<u32> {
        fifo::convert_one_word(dev, signbits)
    }

    fn ao_config_chanlist(&self, dev: &NiMio, ao: &mut AoState, list: &[ChanDesc], _timed: bool) {
        ao::config_legacy(dev, ao, list);
    }

    fn ao_write_direct(&self, dev: &NiMio, ao: &mut AoState, desc: ChanDesc, value: u32) {
        ao::write_direct_legacy(dev, ao, desc, value);
    }

    fn ao_fifo_load(&self, dev: &NiMio, samples: &[u16]) {
        ao::fifo_load_words(dev, samples);
    }
}

impl BoardFamily for Pci611x {
    fn kind(&self) -> BoardKind {
        BoardKind::Pci611x
    }

    fn load_chanlist(&self, dev: &NiMio, ai: &mut AiState, list: &[ChanDesc]) -> Result<()> {
        chanlist::load_legacy(dev, ai, list)
    }

    fn min_scan_period(&self, board: &BoardInfo, _nb_chan: u32) -> u32 {
        board.ai_speed
    }

    fn simultaneous(&self) -> bool {
        true
    }

    fn ai_convert_sources(&self) -> TrigSrc {
        TrigSrc::TIMER | TrigSrc::EXT | TrigSrc::NOW
    }

    fn ai_personal(&self) -> u16 {
        SIMULTANEOUS_PERSONAL
    }

    fn ai_output_control(&self, _board: &BoardInfo) -> u16 {
        output_control(aoc::CONVERT_ENABLE_HIGH)
    }

    fn ai_dma_widths(&self, _board: &BoardInfo) -> DmaWidths {
        DmaWidths {
            device: 32,
            memory: 16,
        }
    }

    fn ao_dma_widths(&self) -> DmaWidths {
        DmaWidths::uniform(32)
    }

    fn read_ai_fifo(&self, dev: &NiMio, n: usize, out: &mut Vec<u32>) {
        fifo::read_packed_611x(dev, n, out);
    }

    fn ai_fifo_dregs(&self, dev: &NiMio, out: &mut Vec<u32>) {
        fifo::dregs_packed_611x(dev, out);
    }

    fn ai_last_sample(&self, dev: &NiMio) -> Option<u32> {
        fifo::last_sample_611x(dev)
    }

    fn ai_convert_one(&self, dev: &NiMio, signbits: u32) -> Result<u32> {
        fifo::convert_one_611x(dev, signbits)
    }

    fn ao_config_chanlist(&self, dev: &NiMio, ao: &mut AoState, list: &[ChanDesc], _timed: bool) {
        ao::config_legacy(dev, ao, list);
    }

    fn ao_write_direct(&self, dev: &NiMio, ao: &mut AoState, desc: ChanDesc, value: u32) {
        ao::write_direct_611x(dev, ao, desc, value);
    }

    fn ao_fifo_load(&self, dev: &NiMio, samples: &[u16]) {
        ao::fifo_load_packed(dev, samples);
    }
}

impl BoardFamily for Pci6143 {
    fn kind(&self) -> BoardKind {
        BoardKind::Pci6143
    }

    fn load_chanlist(&self, dev: &NiMio, ai: &mut AiState, list: &[ChanDesc]) -> Result<()> {
        chanlist::load_legacy(dev, ai, list)
    }

    fn min_scan_period(&self, board: &BoardInfo, _nb_chan: u32) -> u32 {
        board.ai_speed
    }

    fn simultaneous(&self) -> bool {
        true
    }

    fn ai_convert_sources(&self) -> TrigSrc {
        TrigSrc::TIMER | TrigSrc::EXT | TrigSrc::NOW
    }

    fn ai_personal(&self) -> u16 {
        SIMULTANEOUS_PERSONAL
    }

    fn ai_output_control(&self, _board: &BoardInfo) -> u16 {
        output_control(aoc::CONVERT_ENABLE_LOW)
    }

    fn ai_dma_widths(&self, _board: &BoardInfo) -> DmaWidths {
        DmaWidths {
            device: 32,
            memory: 16,
        }
    }

    fn read_ai_fifo(&self, dev: &NiMio, n: usize, out: &mut Vec<u32>) {
        fifo::read_packed_6143(dev, n, out);
    }

    fn ai_fifo_dregs(&self, dev: &NiMio, out: &mut Vec<u32>) {
        fifo::dregs_packed_6143(dev, out);
    }

    fn ai_last_sample(&self, dev: &NiMio) -> Option<u32> {
        fifo::stranded_sample_6143(dev)
    }

    fn ai_convert_one(&self, dev: &NiMio, signbits: u32) -> Result<u32> {
        fifo::convert_one_6143(dev, signbits)
    }

    // The 6143 has no analog outputs; these are never reached because no AO
    // subdevice is registered.
    fn ao_config_chanlist(&self, _dev: &NiMio, _ao: &mut AoState, _list: &[ChanDesc], _timed: bool) {}

    fn ao_write_direct(&self, _dev: &NiMio, _ao: &mut AoState, _desc: ChanDesc, _value: u32) {}

    fn ao_fifo_load(&self, _dev: &NiMio, _samples: &[u16]) {}
}

impl BoardFamily for MSeries {
    fn kind(&self) -> BoardKind {
        BoardKind::MSeries
    }

    fn load_chanlist(&self, dev: &NiMio, ai: &mut AiState, list: &[ChanDesc]) -> Result<()> {
        chanlist::load_m_series(dev, ai, list)
    }

    fn ai_output_control(&self, board: &BoardInfo) -> u16 {
        if board.gains == GainTable::Gain622x {
            output_control(aoc::CONVERT_ENABLE_HIGH)
        } else {
            output_control(aoc::CONVERT_ENABLE_LOW)
        }
    }

    fn ai_dma_widths(&self, board: &BoardInfo) -> DmaWidths {
        if board.ai_lsampl() {
            DmaWidths::uniform(32)
        } else {
            DmaWidths::uniform(16)
        }
    }

    fn read_ai_fifo(&self, dev: &NiMio, n: usize, out: &mut Vec<u32>) {
        fifo::read_m_series(dev, n, out);
    }

    fn ai_fifo_dregs(&self, dev: &NiMio, out: &mut Vec<u32>) {
        fifo::dregs_m_series(dev, out);
    }

    fn ai_convert_one(&self, dev: &NiMio, _signbits: u32) -> Result<u32> {
        fifo::convert_one_m_series(dev)
    }

    fn ao_config_chanlist(&self, dev: &NiMio, ao: &mut AoState, list: &[ChanDesc], timed: bool) {
        ao::config_m_series(dev, ao, list, timed);
    }

    fn ao_write_direct(&self, dev: &NiMio, ao: &mut AoState, desc: ChanDesc, value: u32) {
        ao::write_direct_m_series(dev, ao, desc, value);
    }

    fn ao_fifo_load(&self, dev: &NiMio, samples: &[u16]) {
        ao::fifo_load_m_series(dev, samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::find_board;

    #[test]
    fn test_strategy_matches_board_kind() {
        for name in ["pci-6052e", "pci-6110", "pci-6143", "pci-6251"] {
            let board = find_board(name).unwrap();
            assert_eq!(for_board(board).kind(), board.kind, "{name}");
        }
    }

    #[test]
    fn test_min_scan_period_multiplexed_vs_simultaneous() {
        let e = find_board("pci-6052e").unwrap();
        assert_eq!(ESeries.min_scan_period(e, 4), 12_000);
        let s = find_board("pci-6110").unwrap();
        assert_eq!(Pci611x.min_scan_period(s, 4), s.ai_speed);
    }

    #[test]
    fn test_stop_count_accounts_for_pipeline() {
        let s = find_board("pci-6110").unwrap();
        assert_eq!(Pci611x.ai_stop_count_max(s), 0x00ff_fffd);
        let m = find_board("pci-6221").unwrap();
        assert_eq!(MSeries.ai_stop_count_max(m), 0x0100_0000);
    }

    #[test]
    fn test_dma_widths() {
        let m = find_board("pci-6281").unwrap();
        assert_eq!(MSeries.ai_dma_widths(m), DmaWidths::uniform(32));
        assert_eq!(Pci611x.ai_dma_widths(m).device, 32);
        assert_eq!(ESeries.ao_dma_widths(), DmaWidths { device: 16, memory: 32 });
    }

    #[test]
    fn test_622x_drives_convert_high() {
        let b = find_board("pci-6221").unwrap();
        assert_eq!(MSeries.ai_output_control(b) & 3, aoc::CONVERT_ENABLE_HIGH);
        let b = find_board("pci-6251").unwrap();
        assert_eq!(MSeries.ai_output_control(b) & 3, aoc::CONVERT_ENABLE_LOW);
    }
}
