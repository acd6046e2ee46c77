use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::VaultShiftError;

/// A `major.minor.patch` release number.
///
/// Ordering is the numeric comparison of the triple, which is what the derived
/// `Ord` gives us given the field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Lowest possible version. Used when no version has ever been persisted.
    pub const ZERO: Version = Version::new(0, 0, 0);

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted version string.
    ///
    /// Missing trailing components default to 0 (`"1.2"` is `1.2.0`). A component
    /// that is present but not a non-negative integer is rejected: silently turning
    /// `"1.x"` into `1.0` would put migrations in the wrong order.
    pub fn parse(s: &str) -> Result<Self, VaultShiftError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid(s, "empty version string"));
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() > 3 {
            return Err(invalid(s, "more than three components"));
        }

        let mut numbers = [0u64; 3];
        for (idx, part) in parts.iter().enumerate() {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(
                    s,
                    &format!("component '{}' is not a non-negative integer", part),
                ));
            }
            numbers[idx] = part
                .parse::<u64>()
                .map_err(|e| invalid(s, &format!("component '{}': {}", part, e)))?;
        }

        Ok(Version::new(numbers[0], numbers[1], numbers[2]))
    }

    /// Key used for the per-version completion flag in the persisted state
    /// (`1.1.0` becomes `upgrade_1_1_0`).
    pub fn flag_key(&self) -> String {
        format!("upgrade_{}_{}_{}", self.major, self.minor, self.patch)
    }
}

fn invalid(input: &str, reason: &str) -> VaultShiftError {
    VaultShiftError::InvalidVersionFormat {
        input: input.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Three-way comparison returning a negative, zero or positive value.
pub fn compare_versions(a: &Version, b: &Version) -> i32 {
    match a.cmp(b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// True when `min <= v` and, if given, `v <= max`.
pub fn is_in_range(v: &Version, min: &Version, max: Option<&Version>) -> bool {
    if compare_versions(v, min) < 0 {
        return false;
    }
    match max {
        Some(max) => compare_versions(v, max) <= 0,
        None => true,
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VaultShiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_full_and_partial() {
        assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v("1.2"), Version::new(1, 2, 0));
        assert_eq!(v("7"), Version::new(7, 0, 0));
        assert_eq!(v(" 1.10.0 "), Version::new(1, 10, 0));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        for bad in ["1.x.0", "a", "1..2", "1.2.3.4", "", "-1.0.0", "1.0.0-beta", "1.+2"] {
            let err = Version::parse(bad).unwrap_err();
            assert!(
                matches!(err, VaultShiftError::InvalidVersionFormat { .. }),
                "expected InvalidVersionFormat for {bad:?}"
            );
        }
    }

    #[test]
    fn test_compare_numeric_not_lexical() {
        assert_eq!(compare_versions(&v("1.10.0"), &v("1.9.0")), 1);
        assert_eq!(compare_versions(&v("1.0.6"), &v("1.1.0")), -1);
        assert_eq!(compare_versions(&v("2.0"), &v("2.0.0")), 0);
    }

    #[test]
    fn test_is_in_range_bounds() {
        let min = v("1.0.0");
        let max = v("1.2.0");
        assert!(is_in_range(&min, &min, Some(&max)));
        assert!(is_in_range(&max, &min, Some(&max)));
        assert!(is_in_range(&v("1.1.5"), &min, Some(&max)));
        assert!(!is_in_range(&v("1.2.1"), &min, Some(&max)));
        assert!(!is_in_range(&v("0.9.9"), &min, Some(&max)));
        assert!(is_in_range(&v("99.0.0"), &min, None));
    }

    #[test]
    fn test_flag_key_and_display() {
        let version = v("1.1.0");
        assert_eq!(version.to_string(), "1.1.0");
        assert_eq!(version.flag_key(), "upgrade_1_1_0");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("1.2.3")).unwrap();
        assert_eq!(json, "\"1.2.3\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2.3"));
        assert!(serde_json::from_str::<Version>("\"1.q\"").is_err());
    }

    fn version_strategy() -> impl Strategy<Value = Version> {
        (0u64..6, 0u64..6, 0u64..6).prop_map(|(a, b, c)| Version::new(a, b, c))
    }

    proptest! {
        #[test]
        fn prop_compare_is_reflexive(a in version_strategy()) {
            prop_assert_eq!(compare_versions(&a, &a), 0);
        }

        #[test]
        fn prop_compare_is_antisymmetric(a in version_strategy(), b in version_strategy()) {
            prop_assert_eq!(compare_versions(&a, &b), -compare_versions(&b, &a));
        }

        #[test]
        fn prop_compare_is_transitive(
            a in version_strategy(),
            b in version_strategy(),
            c in version_strategy(),
        ) {
            if compare_versions(&a, &b) <= 0 && compare_versions(&b, &c) <= 0 {
                prop_assert!(compare_versions(&a, &c) <= 0);
            }
        }

        #[test]
        fn prop_range_is_inclusive(a in version_strategy(), b in version_strategy()) {
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(is_in_range(&min, &min, Some(&max)));
            prop_assert!(is_in_range(&max, &min, Some(&max)));
        }

        #[test]
        fn prop_display_parses_back(a in version_strategy()) {
            prop_assert_eq!(Version::parse(&a.to_string()).unwrap(), a);
        }
    }
}
