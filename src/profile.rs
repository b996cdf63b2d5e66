//! Share profiles and the capacity/IOPS policy tables.
//!
//! A profile is a named performance tier governing the legal capacity range
//! and, for IOPS-tunable tiers, the legal IOPS range at each capacity. The
//! tables are static ordered band lists; lookup finds the first band whose
//! size range contains the requested capacity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per GiB, the unit the backend provisions capacity in.
pub const GIB: u64 = 1 << 30;

/// One `{minSize, maxSize, minIops, maxIops}` band of an IOPS table.
/// Sizes are whole GiB; bands are contiguous and non-overlapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct IopsBand {
    min_size: u64,
    max_size: u64,
    min_iops: u64,
    max_iops: u64,
}

const fn band(min_size: u64, max_size: u64, min_iops: u64, max_iops: u64) -> IopsBand {
    IopsBand {
        min_size,
        max_size,
        min_iops,
        max_iops,
    }
}

/// Custom-IOPS bands for the `dp2` profile.
const DP2_BANDS: [IopsBand; 10] = [
    band(10, 39, 100, 1_000),
    band(40, 79, 100, 2_000),
    band(80, 99, 100, 4_000),
    band(100, 499, 100, 6_000),
    band(500, 999, 100, 10_000),
    band(1_000, 1_999, 100, 20_000),
    band(2_000, 3_999, 200, 40_000),
    band(4_000, 7_999, 300, 40_000),
    band(8_000, 15_999, 500, 64_000),
    band(16_000, 32_000, 1_000, 96_000),
];

/// Performance tier a share is provisioned under.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Profile {
    /// General-purpose tier with caller-tunable IOPS.
    Dp2,
    /// Regional file-share tier with fixed IOPS.
    Rfs,
}

impl Profile {
    /// Smallest capacity this profile provisions, in GiB.
    #[must_use]
    pub const fn min_capacity_gib(self) -> u64 {
        10
    }

    /// Largest capacity this profile provisions, in GiB.
    #[must_use]
    pub const fn max_capacity_gib(self) -> u64 {
        32_000
    }

    /// Whether callers may request a specific IOPS value for this profile.
    #[must_use]
    pub const fn supports_custom_iops(self) -> bool {
        matches!(self, Self::Dp2)
    }

    /// Stable lower-case name of the profile.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dp2 => "dp2",
            Self::Rfs => "rfs",
        }
    }

    /// Checks that `capacity_gib` lies within this profile's legal range.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::CapacityOutOfRange`] naming the overall
    /// bounds when the capacity falls outside them.
    pub const fn validate_capacity(self, capacity_gib: u64) -> Result<(), ProfileError> {
        if capacity_gib < self.min_capacity_gib() || capacity_gib > self.max_capacity_gib() {
            return Err(ProfileError::CapacityOutOfRange {
                capacity_gib,
                min_gib: self.min_capacity_gib(),
                max_gib: self.max_capacity_gib(),
            });
        }
        Ok(())
    }

    /// Checks that `iops` is legal for `capacity_gib` under this profile.
    ///
    /// Lookup finds the first band containing the capacity; the IOPS value
    /// must then lie within that band's bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::IopsNotSupported`] for fixed-IOPS profiles,
    /// [`ProfileError::CapacityOutOfRange`] when no band contains the
    /// capacity, and [`ProfileError::IopsOutOfRange`] when the IOPS value
    /// falls outside the matched band.
    pub fn validate_iops(self, capacity_gib: u64, iops: u64) -> Result<(), ProfileError> {
        if !self.supports_custom_iops() {
            return Err(ProfileError::IopsNotSupported { profile: self });
        }

        let matched = DP2_BANDS
            .iter()
            .find(|entry| capacity_gib >= entry.min_size && capacity_gib <= entry.max_size);
        let Some(found) = matched else {
            return Err(ProfileError::CapacityOutOfRange {
                capacity_gib,
                min_gib: self.min_capacity_gib(),
                max_gib: self.max_capacity_gib(),
            });
        };

        if iops < found.min_iops || iops > found.max_iops {
            return Err(ProfileError::IopsOutOfRange {
                iops,
                capacity_gib,
                min_iops: found.min_iops,
                max_iops: found.max_iops,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Profile {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dp2" => Ok(Self::Dp2),
            "rfs" => Ok(Self::Rfs),
            other => Err(ProfileError::Unsupported {
                value: other.to_owned(),
            }),
        }
    }
}

/// Errors raised by profile and policy-table validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProfileError {
    /// Raised when the profile name is not in the supported set.
    #[error("unsupported profile '{value}', expected one of: dp2, rfs")]
    Unsupported {
        /// Profile name supplied by the caller.
        value: String,
    },
    /// Raised when the capacity falls outside the profile's legal range.
    #[error("invalid size {capacity_gib} GiB for class, must be in [{min_gib}, {max_gib}]")]
    CapacityOutOfRange {
        /// Requested capacity in GiB.
        capacity_gib: u64,
        /// Smallest legal capacity for the profile.
        min_gib: u64,
        /// Largest legal capacity for the profile.
        max_gib: u64,
    },
    /// Raised when the IOPS value falls outside the band matching the
    /// capacity.
    #[error(
        "invalid IOPS {iops} for capacity {capacity_gib} GiB, must be in [{min_iops}, {max_iops}]"
    )]
    IopsOutOfRange {
        /// Requested IOPS value.
        iops: u64,
        /// Capacity used for the band lookup, in GiB.
        capacity_gib: u64,
        /// Smallest legal IOPS for the band.
        min_iops: u64,
        /// Largest legal IOPS for the band.
        max_iops: u64,
    },
    /// Raised when custom IOPS are requested for a fixed-IOPS profile.
    #[error("profile '{profile}' does not support custom IOPS")]
    IopsNotSupported {
        /// Profile the request named.
        profile: Profile,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn bands_are_contiguous_and_non_overlapping() {
        for pair in DP2_BANDS.windows(2) {
            let [lower, upper] = pair else {
                panic!("windows(2) yielded a slice of unexpected length");
            };
            assert_eq!(lower.max_size + 1, upper.min_size);
        }
    }

    #[rstest]
    #[case(10, 100)]
    #[case(39, 1_000)]
    #[case(40, 2_000)]
    #[case(100, 6_000)]
    #[case(500, 10_000)]
    #[case(32_000, 96_000)]
    fn accepts_iops_inside_band(#[case] capacity_gib: u64, #[case] iops: u64) {
        assert_eq!(Profile::Dp2.validate_iops(capacity_gib, iops), Ok(()));
    }

    #[rstest]
    #[case(10, 1_001)]
    #[case(10, 99)]
    #[case(40, 2_001)]
    #[case(16_000, 999)]
    fn rejects_iops_outside_band(#[case] capacity_gib: u64, #[case] iops: u64) {
        assert!(matches!(
            Profile::Dp2.validate_iops(capacity_gib, iops),
            Err(ProfileError::IopsOutOfRange { .. })
        ));
    }

    #[rstest]
    #[case(9)]
    #[case(32_001)]
    fn rejects_capacity_outside_all_bands(#[case] capacity_gib: u64) {
        assert!(matches!(
            Profile::Dp2.validate_iops(capacity_gib, 100),
            Err(ProfileError::CapacityOutOfRange { .. })
        ));
    }

    #[test]
    fn fixed_iops_profile_rejects_custom_iops() {
        assert!(matches!(
            Profile::Rfs.validate_iops(100, 100),
            Err(ProfileError::IopsNotSupported { .. })
        ));
    }

    #[test]
    fn parses_supported_profiles() {
        assert_eq!("dp2".parse::<Profile>(), Ok(Profile::Dp2));
        assert_eq!("rfs".parse::<Profile>(), Ok(Profile::Rfs));
        assert!(matches!(
            "premium".parse::<Profile>(),
            Err(ProfileError::Unsupported { .. })
        ));
    }
}
