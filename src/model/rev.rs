//! Per-list revision numbers.
//!
//! A revision is the shared store's wall clock at commit time, seconds plus
//! a microsecond fraction, formatted as `"%d.%06d"`. It travels as a string
//! on the wire and in the store so no precision is lost; in process it is an
//! exact integer pair with total ordering.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Revision parse failure.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid revision string: {0:?}")]
pub struct ParseRevError(pub String);

/// A per-list revision drawn from the shared store's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rev {
    secs: u64,
    micros: u32,
}

impl Rev {
    /// The zero revision, older than every committed write.
    pub const ZERO: Rev = Rev { secs: 0, micros: 0 };

    /// Build a revision from whole seconds and a microsecond fraction.
    ///
    /// Microsecond overflow is carried into the seconds component.
    pub fn new(secs: u64, micros: u32) -> Self {
        Self {
            secs: secs + (micros / 1_000_000) as u64,
            micros: micros % 1_000_000,
        }
    }

    /// Whole-seconds component.
    pub fn secs(&self) -> u64 {
        self.secs
    }

    /// Microsecond fraction, always < 1_000_000.
    pub fn micros(&self) -> u32 {
        self.micros
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

impl FromStr for Rev {
    type Err = ParseRevError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRevError(s.to_string());
        let (secs_part, frac_part) = match s.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (s, ""),
        };
        let secs: u64 = secs_part.parse().map_err(|_| err())?;

        // The fraction is microseconds: right-pad short fractions, drop
        // digits beyond the sixth.
        let frac_digits: String = frac_part.chars().take(6).collect();
        if !frac_digits.chars().all(|c| c.is_ascii_digit()) || frac_part.chars().any(|c| !c.is_ascii_digit()) {
            return Err(err());
        }
        let micros = if frac_digits.is_empty() {
            0
        } else {
            let padded = format!("{:0<6}", frac_digits);
            padded.parse().map_err(|_| err())?
        };

        Ok(Rev::new(secs, micros))
    }
}

impl Serialize for Rev {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Rev {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display_pads_fraction() {
        assert_eq!(Rev::new(1700000000, 42).to_string(), "1700000000.000042");
        assert_eq!(Rev::ZERO.to_string(), "0.000000");
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!("5".parse::<Rev>().unwrap(), Rev::new(5, 0));
        assert_eq!("5.5".parse::<Rev>().unwrap(), Rev::new(5, 500_000));
        assert_eq!("1700000000.000042".parse::<Rev>().unwrap(), Rev::new(1700000000, 42));
        assert!("".parse::<Rev>().is_err());
        assert!("abc".parse::<Rev>().is_err());
        assert!("1.2x".parse::<Rev>().is_err());
    }

    #[test]
    fn test_micros_overflow_carries() {
        assert_eq!(Rev::new(1, 2_500_000), Rev::new(3, 500_000));
    }

    #[test]
    fn test_serde_as_string() {
        let rev = Rev::new(100, 7);
        let json = serde_json::to_string(&rev).unwrap();
        assert_eq!(json, "\"100.000007\"");
        let back: Rev = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rev);
    }

    proptest! {
        /// Ordering of revisions matches ordering of the store clock.
        #[test]
        fn prop_ordering_matches_clock(
            s1 in 0u64..=2_000_000_000,
            m1 in 0u32..1_000_000,
            s2 in 0u64..=2_000_000_000,
            m2 in 0u32..1_000_000,
        ) {
            let a = Rev::new(s1, m1);
            let b = Rev::new(s2, m2);
            let clock_a = (s1, m1);
            let clock_b = (s2, m2);
            prop_assert_eq!(a.cmp(&b), clock_a.cmp(&clock_b));
        }

        /// Display and parse are inverse.
        #[test]
        fn prop_display_parse_roundtrip(s in 0u64..=2_000_000_000, m in 0u32..1_000_000) {
            let rev = Rev::new(s, m);
            let back: Rev = rev.to_string().parse().unwrap();
            prop_assert_eq!(back, rev);
        }
    }
}
