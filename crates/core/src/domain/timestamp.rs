use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_OFFSET_SECONDS: i32 = 5 * 3600;

/// Fixed UTC offset every timestamp of a session must carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionOffset(FixedOffset);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid UTC offset `{0}`; expected forms like +05:00, -0330 or Z")]
pub struct OffsetParseError(pub String);

impl SessionOffset {
    pub fn new(offset: FixedOffset) -> Self {
        Self(offset)
    }

    pub fn fixed(&self) -> FixedOffset {
        self.0
    }

    pub fn seconds_east(&self) -> i32 {
        self.0.local_minus_utc()
    }

    pub fn now(&self) -> ZonedTimestamp {
        ZonedTimestamp(Utc::now().with_timezone(&self.0))
    }
}

impl Default for SessionOffset {
    fn default() -> Self {
        Self(FixedOffset::east_opt(DEFAULT_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix()))
    }
}

impl fmt::Display for SessionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionOffset {
    type Err = OffsetParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
            return Ok(Self(Utc.fix()));
        }

        let invalid = || OffsetParseError(raw.to_owned());
        let (sign, rest) = match trimmed.as_bytes().first() {
            Some(b'+') => (1, &trimmed[1..]),
            Some(b'-') => (-1, &trimmed[1..]),
            _ => return Err(invalid()),
        };
        let digits: String = rest.chars().filter(|ch| *ch != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(invalid());
        }
        let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
        let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
        if hours > 14 || minutes > 59 {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(Self).ok_or_else(invalid)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("`{0}` is not an ISO-8601 timestamp with an explicit UTC offset")]
    Malformed(String),
    #[error("`{raw}` carries offset {found}, expected {expected}")]
    OffsetMismatch { raw: String, found: String, expected: String },
}

/// Instant with an explicit offset, always rendered back with that offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZonedTimestamp(DateTime<FixedOffset>);

impl ZonedTimestamp {
    pub fn new(instant: DateTime<FixedOffset>) -> Self {
        Self(instant)
    }

    /// Parses `raw` and requires its offset to equal the session offset.
    pub fn parse_in(raw: &str, offset: SessionOffset) -> Result<Self, TimestampError> {
        let trimmed = raw.trim();
        let parsed = DateTime::parse_from_rfc3339(trimmed)
            .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M%:z"))
            .map_err(|_| TimestampError::Malformed(raw.to_owned()))?;

        if parsed.offset().local_minus_utc() != offset.seconds_east() {
            return Err(TimestampError::OffsetMismatch {
                raw: raw.to_owned(),
                found: parsed.offset().to_string(),
                expected: offset.to_string(),
            });
        }

        Ok(Self(parsed))
    }

    pub fn instant(&self) -> DateTime<FixedOffset> {
        self.0
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}

impl fmt::Display for ZonedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: ZonedTimestamp,
    pub end: ZonedTimestamp,
}

impl TimeWindow {
    pub fn new(start: ZonedTimestamp, end: ZonedTimestamp) -> Self {
        Self { start, end }
    }

    /// Half-open overlap: a window ending at 16:00 does not touch one starting at 16:00.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start.instant() < other.end.instant() && other.start.instant() < self.end.instant()
    }
}
