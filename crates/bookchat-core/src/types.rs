//! Strong type definitions for BookChat.
//!
//! Identifiers are newtypes so a username can never be passed where a record
//! id is expected, and both are validated on construction.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Minimum username length.
pub const USERNAME_MIN_LEN: usize = 3;

/// Maximum username length.
pub const USERNAME_MAX_LEN: usize = 20;

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A human-chosen display name: 3-20 characters of `[A-Za-z0-9_]`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate and wrap a username.
    pub fn parse(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        let len = s.chars().count();
        if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) || !s.chars().all(is_word_char) {
            return Err(ValidationError::InvalidUsername(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Username({})", self.0)
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Username {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Username {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<Username> for String {
    fn from(u: Username) -> Self {
        u.0
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A record identifier: `YYYYMMDD_HHMMSS_<author>`, optionally followed by
/// `_<n>` when several records by one author share a second.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Derive the id for a record created at `created_at` by `author`.
    ///
    /// `collision` is the number of earlier records by the same author in the
    /// same second; zero yields the bare form.
    pub fn derive(created_at: &Timestamp, author: &Username, collision: u32) -> Self {
        let base = format!("{}_{}", created_at.id_prefix(), author);
        if collision == 0 {
            Self(base)
        } else {
            Self(format!("{}_{}", base, collision))
        }
    }

    /// Parse an id received from outside (e.g. a `Parent` header).
    pub fn parse(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.is_empty() || !s.chars().all(is_word_char) {
            return Err(ValidationError::MalformedRecord(format!(
                "invalid record id {:?}",
                s
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RecordId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// A UTC instant with microsecond precision.
///
/// Rendered on the wire as `2026-01-14T12:00:00.000000Z`; exactly that form
/// is accepted back, which keeps decode/encode byte-exact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current time, truncated to microseconds.
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(6))
    }

    /// From microseconds since the Unix epoch.
    pub fn from_micros(micros: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_micros(micros).map(Self)
    }

    pub fn as_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    /// Whole seconds since the epoch; records sharing this value share an
    /// id prefix.
    pub fn second(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// `YYYYMMDD_HHMMSS`, the record id prefix.
    pub fn id_prefix(&self) -> String {
        self.0.format("%Y%m%d_%H%M%S").to_string()
    }

    /// The canonical wire rendering.
    pub fn to_wire(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Parse the canonical wire rendering. Any other RFC 3339 spelling of the
    /// same instant is rejected.
    pub fn from_wire(s: &str) -> Result<Self, ValidationError> {
        let parsed = DateTime::parse_from_rfc3339(s)
            .map_err(|e| ValidationError::MalformedRecord(format!("bad date {:?}: {}", s, e)))?;
        let ts = Self(parsed.with_timezone(&Utc));
        if ts.to_wire() != s {
            return Err(ValidationError::MalformedRecord(format!(
                "date {:?} is not in canonical form",
                s
            )));
        }
        Ok(ts)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(6))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_wire())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}
