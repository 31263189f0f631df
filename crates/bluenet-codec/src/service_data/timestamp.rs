//! Reconstruction of 16-bit partial timestamps.

use serde::{Deserialize, Serialize};

/// Half the rollover period of the 16-bit counter.
const HALF_ROLLOVER: i64 = 0x7FFF;
const ROLLOVER: i64 = 0xFFFF;

/// Time carried by a service-data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Timestamp {
    /// Seconds since the epoch in the observer's (offset) clock.
    Reconstructed(u32),
    /// The device clock is not set; the value only counts up.
    Counter(u16),
}

impl Timestamp {
    pub fn as_seconds(&self) -> u32 {
        match self {
            Self::Reconstructed(seconds) => *seconds,
            Self::Counter(count) => u32::from(*count),
        }
    }
}

/// Combines `partial` (the low 16 bits of the device clock) with the high
/// bits of `reference` (observer time in seconds, UTC offset applied).
///
/// When the result lands more than half a rollover away from `reference`
/// the counter wrapped, so the neighbouring window is used instead.
pub fn reconstruct_timestamp(reference: i64, partial: u16) -> u32 {
    let restored = restore(reference, partial);
    let delta = reference - restored;
    let adjusted = if delta < -HALF_ROLLOVER {
        restore(reference - ROLLOVER, partial)
    } else if delta > HALF_ROLLOVER {
        restore(reference + ROLLOVER, partial)
    } else {
        restored
    };
    u32::try_from(adjusted).unwrap_or(u32::from(partial))
}

fn restore(reference: i64, partial: u16) -> i64 {
    (reference & !0xFFFF) | i64::from(partial)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: i64 = 1_700_000_000;

    #[test]
    fn low_bits_come_from_the_device() {
        let ts = reconstruct_timestamp(REFERENCE, 1000);
        assert_eq!(ts & 0xFFFF, 1000);
        assert!((i64::from(ts) - REFERENCE).abs() <= HALF_ROLLOVER);
    }

    #[test]
    fn exact_reference_round_trips() {
        let partial = (REFERENCE & 0xFFFF) as u16;
        assert_eq!(reconstruct_timestamp(REFERENCE, partial), REFERENCE as u32);
    }

    #[test]
    fn device_slightly_ahead_across_rollover() {
        // observer just below a 16-bit boundary, device just past it
        let reference = 0x6000_FFF0_i64;
        let ts = reconstruct_timestamp(reference, 0x0005);
        assert_eq!(ts, 0x6001_0005);
    }

    #[test]
    fn device_slightly_behind_across_rollover() {
        let reference = 0x6001_0005_i64;
        let ts = reconstruct_timestamp(reference, 0xFFF0);
        assert_eq!(ts & 0xFFFF, 0xFFF0);
        assert!(i64::from(ts) < reference);
        assert!(reference - i64::from(ts) < HALF_ROLLOVER);
    }

    #[test]
    fn counter_exposes_raw_value() {
        assert_eq!(Timestamp::Counter(77).as_seconds(), 77);
        assert_eq!(Timestamp::Reconstructed(5).as_seconds(), 5);
    }
}
