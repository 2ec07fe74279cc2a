//! Migration version identifiers
//!
//! A version is the sole ordering key for migrations: a 14-digit UTC
//! timestamp (`YYYYMMDDHHMMSS`) compared as a plain integer. Ordering
//! never consults the wall clock at comparison time, only the value
//! embedded in the identifier.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when a version string does not match the
/// fixed-width timestamp contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid migration version '{input}': expected a 14-digit UTC timestamp")]
pub struct ParseVersionError {
    pub input: String,
}

/// Opaque, strictly-increasing migration identifier.
///
/// The canonical textual form is 14 digits; the zero sentinel renders
/// as `"0"` and means "nothing applied".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MigrationVersion(u64);

impl MigrationVersion {
    /// Sentinel for an empty applied set.
    pub const ZERO: MigrationVersion = MigrationVersion(0);

    /// Digits in the canonical textual form.
    pub const WIDTH: usize = 14;

    /// Derive a version from a UTC instant, second precision.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let date = now.date_naive();
        let time = now.time();
        MigrationVersion(
            date.year().unsigned_abs() as u64 * 10_000_000_000
                + u64::from(date.month()) * 100_000_000
                + u64::from(date.day()) * 1_000_000
                + u64::from(time.hour()) * 10_000
                + u64::from(time.minute()) * 100
                + u64::from(time.second()),
        )
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The next representable version. Used by the generator to step
    /// past a collision when two migrations are created within the
    /// same second.
    pub fn next(&self) -> Self {
        MigrationVersion(self.0 + 1)
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "0")
        } else {
            write!(f, "{:0width$}", self.0, width = Self::WIDTH)
        }
    }
}

impl FromStr for MigrationVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "0" {
            return Ok(MigrationVersion::ZERO);
        }
        if s.len() != Self::WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseVersionError {
                input: s.to_string(),
            });
        }
        s.parse::<u64>()
            .map(MigrationVersion)
            .map_err(|_| ParseVersionError {
                input: s.to_string(),
            })
    }
}
