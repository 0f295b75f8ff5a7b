//! Bounded busy-wait polling.

use std::time::Duration;

use crate::error::{ComediError, Result};

/// Poll `cond` up to `budget` times, sleeping `delay` between reads.
///
/// Returns the number of polls it took. Exhausting the budget is a
/// [`ComediError::Timeout`]; the condition may still become true later.
pub fn poll_until(
    budget: u32,
    delay: Duration,
    what: &str,
    mut cond: impl FnMut() -> bool,
) -> Result<u32> {
    for i in 0..budget {
        if cond() {
            return Ok(i);
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
    Err(ComediError::timeout(what))
}

/// `udelay` equivalent.
pub fn udelay(us: u64) {
    if us > 0 {
        std::thread::sleep(Duration::from_micros(us));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_until_counts_polls() {
        let mut n = 0;
        let polls = poll_until(10, Duration::ZERO, "counter", || {
            n += 1;
            n == 3
        })
        .unwrap();
        assert_eq!(polls, 2);
    }

    #[test]
    fn test_poll_until_times_out() {
        let err = poll_until(5, Duration::ZERO, "never", || false).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("never"));
    }
}
