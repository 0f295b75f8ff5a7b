//! Channel descriptor (`CR_*`) encoding.
//!
//! A channel descriptor packs channel index, range index, analog reference
//! and modifier flags into one `u32`:
//!
//! ```text
//!  31  30  29..28  27  26  25..24  23..16   15..0
//! INV EDGE   --   ALT ALT  AREF    RANGE   CHANNEL
//!                 SRC FLT
//! ```
//!
//! The order of descriptors in a command defines the scan order.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Modifier bits carried in the upper byte of a descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChanFlags: u32 {
        /// Alternate filter (AI) / dither (AI) / deglitch (AO); one bit, three meanings
        const ALT_FILTER = 1 << 26;
        /// Route the calibration source instead of the pin
        const ALT_SOURCE = 1 << 27;
        /// Edge-sensitive trigger
        const EDGE = 1 << 30;
        /// Inverted polarity
        const INVERT = 1 << 31;
    }
}

impl ChanFlags {
    /// Dither enable (AI), shares the alternate-filter bit
    pub const DITHER: Self = Self::ALT_FILTER;
    /// Deglitch enable (AO), shares the alternate-filter bit
    pub const DEGLITCH: Self = Self::ALT_FILTER;
}

/// Analog reference of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum AnalogReference {
    /// Referenced to ground
    #[default]
    Ground = 0,
    /// Referenced to a common line
    Common = 1,
    /// Differential pair
    Diff = 2,
    /// Board-specific reference
    Other = 3,
}

impl AnalogReference {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::Ground,
            1 => Self::Common,
            2 => Self::Diff,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for AnalogReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ground => write!(f, "ground"),
            Self::Common => write!(f, "common"),
            Self::Diff => write!(f, "diff"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A packed channel descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChanDesc(u32);

impl ChanDesc {
    const CHAN_MASK: u32 = 0xffff;
    const RANGE_SHIFT: u32 = 16;
    const RANGE_MASK: u32 = 0xff;
    const AREF_SHIFT: u32 = 24;

    /// Pack channel, range and reference.
    pub fn pack(chan: u32, range: u32, aref: AnalogReference) -> Self {
        Self(
            (chan & Self::CHAN_MASK)
                | ((range & Self::RANGE_MASK) << Self::RANGE_SHIFT)
                | ((aref as u32) << Self::AREF_SHIFT),
        )
    }

    /// Pack with modifier flags.
    pub fn pack_flags(chan: u32, range: u32, aref: AnalogReference, flags: ChanFlags) -> Self {
        Self(Self::pack(chan, range, aref).0 | flags.bits())
    }

    /// Wrap a raw encoded descriptor.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw encoded value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Channel index.
    pub const fn chan(self) -> u32 {
        self.0 & Self::CHAN_MASK
    }

    /// Range index.
    pub const fn range(self) -> u32 {
        (self.0 >> Self::RANGE_SHIFT) & Self::RANGE_MASK
    }

    /// Analog reference.
    pub fn aref(self) -> AnalogReference {
        AnalogReference::from_bits(self.0 >> Self::AREF_SHIFT)
    }

    /// Modifier flags.
    pub fn flags(self) -> ChanFlags {
        ChanFlags::from_bits_truncate(self.0)
    }

    /// Whether a modifier is set.
    pub fn has(self, flag: ChanFlags) -> bool {
        self.flags().contains(flag)
    }
}

impl fmt::Debug for ChanDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChanDesc")
            .field("chan", &self.chan())
            .field("range", &self.range())
            .field("aref", &self.aref())
            .field("flags", &self.flags())
            .finish()
    }
}

impl From<u32> for ChanDesc {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}
