//! Python version identification and feature gating.
//!
//! A `.pyc` file names its compiler through the magic number in the first two
//! bytes of the header. This module maps magic numbers onto a
//! [`PythonVersion`] and provides the comparison helpers the rest of the
//! pipeline uses for feature detection (`version.gte(3, 11)` and friends).
//!
//! The table covers every release magic from Python 1.5 through 3.14,
//! including the intermediate alpha/beta magics CPython burned along the way.

use std::fmt;

/// A `major.minor` Python release, as identified by a `.pyc` magic number.
///
/// Micro versions never change bytecode semantics, so they are not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PythonVersion {
    /// Major version (1, 2, or 3).
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl PythonVersion {
    /// Creates a version from major and minor components.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Returns true if this version is at least `major.minor`.
    #[must_use]
    pub const fn gte(self, major: u8, minor: u8) -> bool {
        self.major > major || (self.major == major && self.minor >= minor)
    }

    /// Returns true if this version is strictly older than `major.minor`.
    #[must_use]
    pub const fn lt(self, major: u8, minor: u8) -> bool {
        !self.gte(major, minor)
    }

    /// Returns true for the 2.x line (and the 1.x line, which shares its
    /// instruction format and most of its opcode table).
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        self.major < 3
    }

    /// Resolves a `.pyc` magic number to a version.
    ///
    /// CPython burns several magics per release cycle; each release's range
    /// is matched rather than only its final value. Returns `None` for bytes
    /// that never shipped.
    #[must_use]
    pub fn from_magic(magic: u16) -> Option<Self> {
        let version = match magic {
            20121 => Self::new(1, 5),
            50428 => Self::new(1, 6),
            50823 => Self::new(2, 0),
            60202 => Self::new(2, 1),
            60717 => Self::new(2, 2),
            62011 | 62021 => Self::new(2, 3),
            62041 | 62051 | 62061 => Self::new(2, 4),
            62071..=62131 => Self::new(2, 5),
            62151 | 62161 => Self::new(2, 6),
            62171..=62211 => Self::new(2, 7),
            3000..=3131 => Self::new(3, 0),
            3141 | 3151 => Self::new(3, 1),
            3160..=3180 => Self::new(3, 2),
            3190..=3230 => Self::new(3, 3),
            3250..=3310 => Self::new(3, 4),
            3320..=3351 => Self::new(3, 5),
            3360..=3379 => Self::new(3, 6),
            3390..=3399 => Self::new(3, 7),
            3400..=3419 => Self::new(3, 8),
            3420..=3429 => Self::new(3, 9),
            3430..=3449 => Self::new(3, 10),
            3450..=3499 => Self::new(3, 11),
            3500..=3549 => Self::new(3, 12),
            3550..=3599 => Self::new(3, 13),
            3600..=3649 => Self::new(3, 14),
            _ => return None,
        };
        Some(version)
    }

    /// Returns true when instructions are two-byte wordcode (3.6+).
    #[must_use]
    pub const fn is_wordcode(self) -> bool {
        self.gte(3, 6)
    }

    /// Returns true when exception handling is table-driven rather than
    /// driven by `SETUP_*` instructions (3.11+).
    #[must_use]
    pub const fn has_exception_table(self) -> bool {
        self.gte(3, 11)
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::PythonVersion;

    #[test]
    fn release_magics_resolve() {
        assert_eq!(PythonVersion::from_magic(20121), Some(PythonVersion::new(1, 5)));
        assert_eq!(PythonVersion::from_magic(62211), Some(PythonVersion::new(2, 7)));
        assert_eq!(PythonVersion::from_magic(3413), Some(PythonVersion::new(3, 8)));
        assert_eq!(PythonVersion::from_magic(3439), Some(PythonVersion::new(3, 10)));
        assert_eq!(PythonVersion::from_magic(3495), Some(PythonVersion::new(3, 11)));
        assert_eq!(PythonVersion::from_magic(3531), Some(PythonVersion::new(3, 12)));
        assert_eq!(PythonVersion::from_magic(3571), Some(PythonVersion::new(3, 13)));
    }

    #[test]
    fn unknown_magic_is_rejected() {
        assert_eq!(PythonVersion::from_magic(1), None);
        assert_eq!(PythonVersion::from_magic(9999), None);
        assert_eq!(PythonVersion::from_magic(u16::MAX), None);
    }

    #[test]
    fn comparisons() {
        let v = PythonVersion::new(3, 11);
        assert!(v.gte(3, 11));
        assert!(v.gte(2, 7));
        assert!(v.lt(3, 12));
        assert!(!v.is_legacy());
        assert!(PythonVersion::new(2, 7).is_legacy());
    }
}
