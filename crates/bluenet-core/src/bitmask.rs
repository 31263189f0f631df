//! Named expansions of Crownstone bitmasks.

use serde::{Deserialize, Serialize};

/// Returns bit `index` of `value`, counting from the least significant bit.
pub fn bit_u8(value: u8, index: u8) -> bool {
    index < 8 && (value >> index) & 1 == 1
}

/// Returns bit `index` of `value`, counting from the least significant bit.
pub fn bit_u32(value: u32, index: u8) -> bool {
    index < 32 && (value >> index) & 1 == 1
}

/// Expanded 32-bit Crownstone error bitmask.
///
/// Bit 0 is over-current, bit 5 is dimmer-off failure; the remaining bits
/// are reserved and only visible through [`CrownstoneErrors::bitmask`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrownstoneErrors {
    pub over_current: bool,
    pub over_current_dimmer: bool,
    pub temperature_chip: bool,
    pub temperature_dimmer: bool,
    pub dimmer_on_failure: bool,
    pub dimmer_off_failure: bool,
    bitmask: u32,
}

impl CrownstoneErrors {
    pub fn from_bitmask(bitmask: u32) -> Self {
        Self {
            over_current: bit_u32(bitmask, 0),
            over_current_dimmer: bit_u32(bitmask, 1),
            temperature_chip: bit_u32(bitmask, 2),
            temperature_dimmer: bit_u32(bitmask, 3),
            dimmer_on_failure: bit_u32(bitmask, 4),
            dimmer_off_failure: bit_u32(bitmask, 5),
            bitmask,
        }
    }

    pub fn bitmask(&self) -> u32 {
        self.bitmask
    }

    pub fn has_errors(&self) -> bool {
        self.bitmask != 0
    }
}

impl From<u32> for CrownstoneErrors {
    fn from(value: u32) -> Self {
        Self::from_bitmask(value)
    }
}
