//! Timer arithmetic for the DAQ-STC.
//!
//! Every STC timer counts the 20 MHz master timebase, so one tick is 50 ns
//! and a divider value `n` produces a period of `n + 1` ticks.
//!
//! ```text
//!   period_ns = CLOCK_NS × (timer + 1)
//! ```
//!
//! Converting a requested period into a divider rounds according to the
//! command's [`RoundMode`]; converting back yields the exactly achievable
//! period. A period survives the round trip unchanged only when it is a
//! whole number of ticks.
//!
//! # Example
//!
//! ```
//! use comedi_core::RoundMode;
//! use daq_driver_ni_mio::timing::{ns_to_timer, quantize, timer_to_ns};
//!
//! assert_eq!(ns_to_timer(500_000, RoundMode::Nearest), 9_999);
//! assert_eq!(timer_to_ns(9_999), 500_000);
//! assert_eq!(quantize(1_020, RoundMode::Nearest), 1_000);
//! assert_eq!(quantize(1_020, RoundMode::Up), 1_050);
//! ```

use comedi_core::RoundMode;

/// Master timebase period in nanoseconds (20 MHz).
pub const CLOCK_NS: u32 = 50;

/// Largest value of the 24-bit scan interval timer.
pub const SI_MAX: u32 = 0x00ff_ffff;

/// Largest value of the 16-bit convert interval timer.
pub const SI2_MAX: u32 = 0xffff;

/// Largest value of the 24-bit update interval timer (AO).
pub const UI_MAX: u32 = 0x00ff_ffff;

/// Divider value for a period.
///
/// Periods shorter than one tick give divider 0 (one tick), never a
/// negative count.
pub fn ns_to_timer(ns: u32, round: RoundMode) -> u32 {
    let ns = u64::from(ns);
    let clk = u64::from(CLOCK_NS);
    let ticks = match round {
        RoundMode::Nearest => (ns + clk / 2) / clk,
        RoundMode::Down => ns / clk,
        RoundMode::Up => (ns + clk - 1) / clk,
    };
    ticks.saturating_sub(1).min(u64::from(u32::MAX)) as u32
}

/// Period of a divider value.
pub fn timer_to_ns(timer: u32) -> u32 {
    CLOCK_NS.saturating_mul(timer.saturating_add(1))
}

/// Closest achievable period under the rounding mode.
pub fn quantize(ns: u32, round: RoundMode) -> u32 {
    timer_to_ns(ns_to_timer(ns, round))
}

/// Largest period a timer of `max_timer` can produce.
pub fn max_period(max_timer: u32) -> u32 {
    CLOCK_NS.saturating_mul(max_timer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding_modes() {
        assert_eq!(ns_to_timer(1_024, RoundMode::Nearest), 19);
        assert_eq!(ns_to_timer(1_025, RoundMode::Nearest), 20);
        assert_eq!(ns_to_timer(1_049, RoundMode::Down), 19);
        assert_eq!(ns_to_timer(1_001, RoundMode::Up), 20);
    }

    #[test]
    fn test_short_periods_clamp_to_one_tick() {
        assert_eq!(ns_to_timer(0, RoundMode::Nearest), 0);
        assert_eq!(ns_to_timer(10, RoundMode::Down), 0);
        assert_eq!(timer_to_ns(0), CLOCK_NS);
    }

    #[test]
    fn test_whole_ticks_survive_round_trip() {
        for ticks in [1u32, 2, 7, 40_000, SI_MAX] {
            let ns = ticks * CLOCK_NS;
            for round in [RoundMode::Nearest, RoundMode::Down, RoundMode::Up] {
                assert_eq!(quantize(ns, round), ns, "{ns} ns {round:?}");
            }
        }
    }

    #[test]
    fn test_quantize_moves_to_neighbouring_tick() {
        assert_eq!(quantize(2_000_010, RoundMode::Nearest), 2_000_000);
        assert_eq!(quantize(2_000_010, RoundMode::Down), 2_000_000);
        assert_eq!(quantize(2_000_010, RoundMode::Up), 2_000_050);
    }

    #[test]
    fn test_max_period() {
        assert_eq!(max_period(SI2_MAX), 50 * 0xffff);
    }
}
