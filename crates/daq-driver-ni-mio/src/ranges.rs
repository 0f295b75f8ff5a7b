//! Input gain tables and the range tables exposed to callers.
//!
//! Each board selects one [`GainTable`]. The range index of a channel
//! descriptor picks both the physical range reported to the caller and the
//! gain code programmed into configuration memory. On E-series boards bit
//! `0x100` of the code selects unipolar operation.

use comedi_core::Range;

/// E-series gain code bit selecting unipolar conversion.
pub const UNIPOLAR_CODE: u16 = 0x100;

static E_AI: [Range; 16] = [
    Range::bipolar(10.0),
    Range::bipolar(5.0),
    Range::bipolar(2.5),
    Range::bipolar(1.0),
    Range::bipolar(0.5),
    Range::bipolar(0.25),
    Range::bipolar(0.1),
    Range::bipolar(0.05),
    Range::unipolar(20.0),
    Range::unipolar(10.0),
    Range::unipolar(5.0),
    Range::unipolar(2.0),
    Range::unipolar(1.0),
    Range::unipolar(0.5),
    Range::unipolar(0.2),
    Range::unipolar(0.1),
];

static E_AI_LIMITED: [Range; 8] = [
    Range::bipolar(10.0),
    Range::bipolar(5.0),
    Range::bipolar(1.0),
    Range::bipolar(0.1),
    Range::unipolar(10.0),
    Range::unipolar(5.0),
    Range::unipolar(1.0),
    Range::unipolar(0.1),
];

static E_AI_LIMITED14: [Range; 14] = [
    Range::bipolar(10.0),
    Range::bipolar(5.0),
    Range::bipolar(2.0),
    Range::bipolar(1.0),
    Range::bipolar(0.5),
    Range::bipolar(0.2),
    Range::bipolar(0.1),
    Range::unipolar(10.0),
    Range::unipolar(5.0),
    Range::unipolar(2.0),
    Range::unipolar(1.0),
    Range::unipolar(0.5),
    Range::unipolar(0.2),
    Range::unipolar(0.1),
];

static E_AI_BIPOLAR4: [Range; 4] = [
    Range::bipolar(10.0),
    Range::bipolar(5.0),
    Range::bipolar(0.5),
    Range::bipolar(0.05),
];

static E_AI_611X: [Range; 8] = [
    Range::bipolar(50.0),
    Range::bipolar(20.0),
    Range::bipolar(10.0),
    Range::bipolar(5.0),
    Range::bipolar(2.0),
    Range::bipolar(1.0),
    Range::bipolar(0.5),
    Range::bipolar(0.2),
];

static M_AI_622X: [Range; 4] = [
    Range::bipolar(10.0),
    Range::bipolar(5.0),
    Range::bipolar(1.0),
    Range::bipolar(0.2),
];

static M_AI_628X: [Range; 7] = [
    Range::bipolar(10.0),
    Range::bipolar(5.0),
    Range::bipolar(2.0),
    Range::bipolar(1.0),
    Range::bipolar(0.5),
    Range::bipolar(0.2),
    Range::bipolar(0.1),
];

static S_AI_6143: [Range; 1] = [Range::bipolar(5.0)];

/// Analog input gain table of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainTable {
    /// Full E-series table, 8 bipolar and 8 unipolar ranges
    Gain16,
    /// Reduced E-series table
    Gain8,
    /// 14-range E-series table (16-bit boards)
    Gain14,
    /// Bipolar-only E-series table
    Gain4,
    /// 611x simultaneous-sampling front end
    Gain611x,
    /// M-series 622x
    Gain622x,
    /// M-series 625x/628x
    Gain628x,
    /// 6143 fixed range
    Gain6143,
}

impl GainTable {
    /// Ranges reported for the analog input subdevice.
    pub fn ranges(self) -> &'static [Range] {
        match self {
            Self::Gain16 => &E_AI,
            Self::Gain8 => &E_AI_LIMITED,
            Self::Gain14 => &E_AI_LIMITED14,
            Self::Gain4 => &E_AI_BIPOLAR4,
            Self::Gain611x => &E_AI_611X,
            Self::Gain622x => &M_AI_622X,
            Self::Gain628x => &M_AI_628X,
            Self::Gain6143 => &S_AI_6143,
        }
    }

    /// Hardware gain codes, indexed like [`GainTable::ranges`].
    pub fn codes(self) -> &'static [u16] {
        match self {
            Self::Gain16 => &[
                0, 1, 2, 3, 4, 5, 6, 7, 0x100, 0x101, 0x102, 0x103, 0x104, 0x105, 0x106, 0x107,
            ],
            Self::Gain8 => &[1, 2, 4, 7, 0x101, 0x102, 0x104, 0x107],
            Self::Gain14 => &[
                1, 2, 3, 4, 5, 6, 7, 0x101, 0x102, 0x103, 0x104, 0x105, 0x106, 0x107,
            ],
            Self::Gain4 => &[0, 1, 4, 7],
            Self::Gain611x => &[0x00a, 0x00b, 0x001, 0x002, 0x003, 0x004, 0x005, 0x006],
            Self::Gain622x => &[0, 1, 4, 5],
            Self::Gain628x => &[1, 2, 3, 4, 5, 6, 7],
            Self::Gain6143 => &[0],
        }
    }

    /// Gain code of a range index.
    pub fn code(self, range: u32) -> Option<u16> {
        self.codes().get(range as usize).copied()
    }
}

static E_AO_EXT: [Range; 4] = [
    Range::bipolar(10.0),
    Range::unipolar(10.0),
    Range::external(-1.0, 1.0),
    Range::external(0.0, 1.0),
];

static AO_BIPOLAR10: [Range; 1] = [Range::bipolar(10.0)];

static M_AO_625X: [Range; 2] = [Range::bipolar(10.0), Range::bipolar(5.0)];

static M_AO_628X: [Range; 5] = [
    Range::bipolar(10.0),
    Range::bipolar(5.0),
    Range::bipolar(2.0),
    Range::bipolar(1.0),
    Range::unipolar(10.0),
];

/// Analog output range table of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AoRanges {
    /// E-series: bipolar/unipolar, internal/external reference
    ExternalRef,
    /// Fixed ±10 V
    Bipolar10,
    /// M-series 625x
    M625x,
    /// M-series 628x
    M628x,
}

impl AoRanges {
    /// Ranges reported for the analog output subdevice.
    pub fn ranges(self) -> &'static [Range] {
        match self {
            Self::ExternalRef => &E_AO_EXT,
            Self::Bipolar10 => &AO_BIPOLAR10,
            Self::M625x => &M_AO_625X,
            Self::M628x => &M_AO_628X,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [GainTable; 8] = [
        GainTable::Gain16,
        GainTable::Gain8,
        GainTable::Gain14,
        GainTable::Gain4,
        GainTable::Gain611x,
        GainTable::Gain622x,
        GainTable::Gain628x,
        GainTable::Gain6143,
    ];

    #[test]
    fn test_codes_cover_every_range() {
        for table in ALL {
            assert_eq!(table.ranges().len(), table.codes().len(), "{table:?}");
        }
    }

    #[test]
    fn test_unipolar_code_matches_range_polarity() {
        for table in [GainTable::Gain16, GainTable::Gain8, GainTable::Gain14] {
            for (range, code) in table.ranges().iter().zip(table.codes()) {
                assert_eq!(range.is_bipolar(), code & UNIPOLAR_CODE == 0, "{table:?} {range}");
            }
        }
        assert_eq!(GainTable::Gain4.code(4), None);
    }
}
