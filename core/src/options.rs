//! Prediction option flags.
use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bit set of options accepted by `predict`/`predictp`.
///
/// Values match the flag numbers used by callers that pass plain integers,
/// so `PredictOptions::from_bits(256)` is `NORMALIZE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictOptions(u32);

impl PredictOptions {
    pub const NONE: Self = Self(0);
    /// Fold case of candidates when matching the prefix.
    pub const CASE_INSENSITIVE: Self = Self(1);
    /// Fold case only where the typed character is lower case.
    pub const CASE_INSENSITIVE_SMART: Self = Self(2);
    /// Strip accents of candidates when matching the prefix.
    pub const ACCENT_INSENSITIVE: Self = Self(4);
    /// Strip accents only where the typed character carries none.
    pub const ACCENT_INSENSITIVE_SMART: Self = Self(8);
    /// Drop candidates starting with an upper case letter.
    pub const IGNORE_CAPITALIZED: Self = Self(16);
    /// Drop candidates not starting with an upper case letter.
    pub const IGNORE_NON_CAPITALIZED: Self = Self(32);
    /// Allow `<unk>`, `<s>`, `</s>` and `<num>` as candidates.
    pub const INCLUDE_CONTROL_WORDS: Self = Self(64);
    /// Keep candidates in vocabulary order.
    pub const NO_SORT: Self = Self(128);
    /// Rescale the returned probabilities to sum to 1.
    pub const NORMALIZE: Self = Self(256);

    /// Options that restrict the candidate set and therefore force a
    /// vocabulary search even without a typed prefix.
    pub const FILTER_OPTIONS: Self = Self(1 | 4 | 8 | 16 | 32);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if any flag of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if all flags of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PredictOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PredictOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PredictOptions {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl From<u32> for PredictOptions {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_query() {
        let opts = PredictOptions::NORMALIZE | PredictOptions::INCLUDE_CONTROL_WORDS;
        assert_eq!(opts.bits(), 320);
        assert!(opts.contains(PredictOptions::NORMALIZE));
        assert!(!opts.contains(PredictOptions::NO_SORT));
        assert!(!opts.intersects(PredictOptions::FILTER_OPTIONS));
        assert!(PredictOptions::IGNORE_CAPITALIZED.intersects(PredictOptions::FILTER_OPTIONS));
        assert!(PredictOptions::default().is_empty());
    }
}
