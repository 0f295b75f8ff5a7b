//! Supported boards.
//!
//! | Board | Family | AI | AO | Notes |
//! |-------|--------|----|----|-------|
//! | pci-mio-16xe-10 | E | 16 × 16 bit | 2 × 16 bit | always dithers |
//! | pci-6052e | E | 16 × 16 bit | 2 × 16 bit | |
//! | pci-mio-16e-1 | E | 16 × 12 bit | 2 × 12 bit | 8255 on board |
//! | pci-6110 | 611x | 4 × 12 bit | 2 × 16 bit | pipelined ADC, packed FIFO |
//! | pci-6143 | 6143 | 8 × 16 bit | - | calibration relay, PWM calibration |
//! | pci-6221 | M | 16 × 16 bit | 2 × 16 bit | |
//! | pci-6251 | M | 16 × 16 bit | 2 × 16 bit | |
//! | pci-6281 | M | 16 × 18 bit | 2 × 16 bit | |

use crate::ranges::{AoRanges, GainTable};

/// Register and data-path family of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardKind {
    /// Classic E-series: windowed STC, 16-bit FIFO words
    ESeries,
    /// 611x simultaneous sampling: 32-bit packed FIFO, 3 ADC pipeline stages
    Pci611x,
    /// 6143: own FIFO register block, calibration relay
    Pci6143,
    /// M-series: memory-mapped STC, configuration FIFO
    MSeries,
}

/// Calibration DAC packer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaldacKind {
    /// Fujitsu MB88341, 12 channels × 8 bit
    Mb88341,
    /// Analog Devices DAC8800, 8 × 8 bit
    Dac8800,
    /// DAC8043, 1 × 12 bit
    Dac8043,
    /// AD8522, 2 × 12 bit
    Ad8522,
    /// AD8804, 12 × 8 bit
    Ad8804,
    /// AD8842, 8 × 8 bit
    Ad8842,
}

impl CaldacKind {
    /// Number of calibration channels.
    pub fn n_chans(self) -> u32 {
        match self {
            Self::Mb88341 => 12,
            Self::Dac8800 => 8,
            Self::Dac8043 => 1,
            Self::Ad8522 => 2,
            Self::Ad8804 => 12,
            Self::Ad8842 => 8,
        }
    }

    /// Bits per channel.
    pub fn n_bits(self) -> u32 {
        match self {
            Self::Mb88341 | Self::Dac8800 | Self::Ad8804 | Self::Ad8842 => 8,
            Self::Dac8043 | Self::Ad8522 => 12,
        }
    }

    /// Serial word for `(addr, val)` and its length in bits.
    pub fn pack(self, addr: u32, val: u32) -> (u32, u32) {
        match self {
            Self::Mb88341 => {
                // address is 1-based and sent bit-reversed
                let a = addr + 1;
                let bits = ((a & 0x1) << 11)
                    | ((a & 0x2) << 9)
                    | ((a & 0x4) << 7)
                    | ((a & 0x8) << 5)
                    | (val & 0xff);
                (bits, 12)
            }
            Self::Dac8800 => (((addr & 0x7) << 8) | (val & 0xff), 11),
            Self::Dac8043 => (val & 0xfff, 12),
            Self::Ad8522 => ((val & 0xfff) | if addr != 0 { 0xc000 } else { 0xa000 }, 16),
            Self::Ad8804 => (((addr & 0xf) << 8) | (val & 0xff), 12),
            Self::Ad8842 => (((addr + 1) << 8) | (val & 0xff), 12),
        }
    }
}

/// Static description of a board.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardInfo {
    /// Board name
    pub name: &'static str,
    /// Family
    pub kind: BoardKind,
    /// Analog input channels
    pub n_adchan: u32,
    /// ADC resolution
    pub adbits: u32,
    /// AI FIFO depth in samples
    pub ai_fifo_depth: u32,
    /// Dither is always on
    pub alwaysdither: bool,
    /// Input gain table
    pub gains: GainTable,
    /// Minimum conversion period in ns
    pub ai_speed: u32,
    /// Analog output channels
    pub n_aochan: u32,
    /// DAC resolution
    pub aobits: u32,
    /// AO FIFO depth in samples; 0 when the board has no AO FIFO
    pub ao_fifo_depth: u32,
    /// Output ranges
    pub ao_ranges: AoRanges,
    /// Output supports unipolar ranges
    pub ao_unipolar: bool,
    /// Minimum update period in ns
    pub ao_speed: u32,
    /// Static DIO lines on port 0
    pub n_dio_channels: u32,
    /// Board carries an 8255
    pub has_8255: bool,
    /// Calibration DACs, chained in order
    pub caldacs: &'static [CaldacKind],
}

impl BoardInfo {
    /// M-series register layout.
    pub fn is_m_series(&self) -> bool {
        self.kind == BoardKind::MSeries
    }

    /// Number of ADC pipeline stages the stop count must account for.
    pub fn adc_stages(&self) -> u32 {
        match self.kind {
            BoardKind::Pci611x => 3,
            _ => 0,
        }
    }

    /// Largest code the ADC produces.
    pub fn ai_maxdata(&self) -> u32 {
        (1u32 << self.adbits) - 1
    }

    /// Samples are 32-bit in the ring buffer.
    pub fn ai_lsampl(&self) -> bool {
        self.adbits > 16
    }
}

/// The board table.
pub static BOARDS: &[BoardInfo] = &[
    BoardInfo {
        name: "pci-mio-16xe-10",
        kind: BoardKind::ESeries,
        n_adchan: 16,
        adbits: 16,
        ai_fifo_depth: 512,
        alwaysdither: true,
        gains: GainTable::Gain14,
        ai_speed: 10_000,
        n_aochan: 2,
        aobits: 16,
        ao_fifo_depth: 2048,
        ao_ranges: AoRanges::ExternalRef,
        ao_unipolar: true,
        ao_speed: 10_000,
        n_dio_channels: 8,
        has_8255: false,
        caldacs: &[CaldacKind::Dac8800, CaldacKind::Dac8043],
    },
    BoardInfo {
        name: "pci-6052e",
        kind: BoardKind::ESeries,
        n_adchan: 16,
        adbits: 16,
        ai_fifo_depth: 512,
        alwaysdither: true,
        gains: GainTable::Gain16,
        ai_speed: 3_000,
        n_aochan: 2,
        aobits: 16,
        ao_fifo_depth: 2048,
        ao_ranges: AoRanges::ExternalRef,
        ao_unipolar: true,
        ao_speed: 3_000,
        n_dio_channels: 8,
        has_8255: false,
        caldacs: &[CaldacKind::Ad8804, CaldacKind::Ad8804, CaldacKind::Ad8522],
    },
    BoardInfo {
        name: "pci-mio-16e-1",
        kind: BoardKind::ESeries,
        n_adchan: 16,
        adbits: 12,
        ai_fifo_depth: 512,
        alwaysdither: false,
        gains: GainTable::Gain16,
        ai_speed: 800,
        n_aochan: 2,
        aobits: 12,
        ao_fifo_depth: 2048,
        ao_ranges: AoRanges::ExternalRef,
        ao_unipolar: true,
        ao_speed: 1_000,
        n_dio_channels: 8,
        has_8255: true,
        caldacs: &[CaldacKind::Mb88341],
    },
    BoardInfo {
        name: "pci-6110",
        kind: BoardKind::Pci611x,
        n_adchan: 4,
        adbits: 12,
        ai_fifo_depth: 8192,
        alwaysdither: false,
        gains: GainTable::Gain611x,
        ai_speed: 200,
        n_aochan: 2,
        aobits: 16,
        ao_fifo_depth: 2048,
        ao_ranges: AoRanges::Bipolar10,
        ao_unipolar: false,
        ao_speed: 250,
        n_dio_channels: 8,
        has_8255: false,
        caldacs: &[CaldacKind::Ad8804, CaldacKind::Ad8804],
    },
    BoardInfo {
        name: "pci-6143",
        kind: BoardKind::Pci6143,
        n_adchan: 8,
        adbits: 16,
        ai_fifo_depth: 1024,
        alwaysdither: false,
        gains: GainTable::Gain6143,
        ai_speed: 4_000,
        n_aochan: 0,
        aobits: 0,
        ao_fifo_depth: 0,
        ao_ranges: AoRanges::Bipolar10,
        ao_unipolar: false,
        ao_speed: 0,
        n_dio_channels: 8,
        has_8255: false,
        caldacs: &[],
    },
    BoardInfo {
        name: "pci-6221",
        kind: BoardKind::MSeries,
        n_adchan: 16,
        adbits: 16,
        ai_fifo_depth: 4095,
        alwaysdither: false,
        gains: GainTable::Gain622x,
        ai_speed: 4_000,
        n_aochan: 2,
        aobits: 16,
        ao_fifo_depth: 8191,
        ao_ranges: AoRanges::Bipolar10,
        ao_unipolar: false,
        ao_speed: 1_200,
        n_dio_channels: 32,
        has_8255: false,
        caldacs: &[],
    },
    BoardInfo {
        name: "pci-6251",
        kind: BoardKind::MSeries,
        n_adchan: 16,
        adbits: 16,
        ai_fifo_depth: 4095,
        alwaysdither: false,
        gains: GainTable::Gain628x,
        ai_speed: 800,
        n_aochan: 2,
        aobits: 16,
        ao_fifo_depth: 8191,
        ao_ranges: AoRanges::M625x,
        ao_unipolar: false,
        ao_speed: 357,
        n_dio_channels: 8,
        has_8255: false,
        caldacs: &[],
    },
    BoardInfo {
        name: "pci-6281",
        kind: BoardKind::MSeries,
        n_adchan: 16,
        adbits: 18,
        ai_fifo_depth: 2047,
        alwaysdither: false,
        gains: GainTable::Gain628x,
        ai_speed: 1_600,
        n_aochan: 2,
        aobits: 16,
        ao_fifo_depth: 8191,
        ao_ranges: AoRanges::M628x,
        ao_unipolar: true,
        ao_speed: 357,
        n_dio_channels: 8,
        has_8255: false,
        caldacs: &[],
    },
];

/// Look a board up by name.
pub fn find_board(name: &str) -> Option<&'static BoardInfo> {
    BOARDS.iter().find(|b| b.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_board() {
        let b = find_board("PCI-6052E").unwrap();
        assert_eq!(b.kind, BoardKind::ESeries);
        assert!(find_board("pci-9999").is_none());
    }

    #[test]
    fn test_board_table_consistency() {
        for b in BOARDS {
            assert_eq!(b.is_m_series(), b.kind == BoardKind::MSeries);
            assert!(b.ai_speed > 0, "{}", b.name);
            if b.n_aochan > 0 {
                assert!(b.ao_speed > 0, "{}", b.name);
            }
        }
        assert_eq!(find_board("pci-6110").unwrap().adc_stages(), 3);
        assert!(find_board("pci-6281").unwrap().ai_lsampl());
    }

    #[test]
    fn test_caldac_packing() {
        assert_eq!(CaldacKind::Ad8804.pack(3, 0x80), (0x380, 12));
        assert_eq!(CaldacKind::Ad8842.pack(0, 0x10), (0x110, 12));
        assert_eq!(CaldacKind::Ad8522.pack(1, 0xfff), (0xcfff, 16));
        assert_eq!(CaldacKind::Mb88341.pack(1, 0x55), (0x400 | 0x55, 12));
    }
}
