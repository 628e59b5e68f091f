//! Temporal coordinates of a question.
//!
//! Time in EOQL is projection, not filtering:
//! - **AS_OF**: reconstruct the world as it could be known at an instant
//! - **BETWEEN**: a bounded interval, used for ranges and absence windows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InvariantId, ValidationError};

/// The time coordinate of a query.
///
/// # Examples
///
/// ```
/// use eoql::TimeSpec;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let window = TimeSpec::between(now - Duration::days(1), now).unwrap();
/// assert!(window.is_between());
/// assert!(window.contains(now));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub enum TimeSpec {
    /// Point-in-time world reconstruction.
    AsOf {
        /// The projection instant.
        at: DateTime<Utc>,
    },

    /// Closed interval `[start, end]`.
    Between {
        /// Start of the interval (inclusive).
        start: DateTime<Utc>,
        /// End of the interval (inclusive).
        end: DateTime<Utc>,
    },
}

impl TimeSpec {
    /// Creates an AS_OF time coordinate.
    #[must_use]
    pub const fn as_of(at: DateTime<Utc>) -> Self {
        Self::AsOf { at }
    }

    /// Creates a BETWEEN time coordinate.
    ///
    /// # Errors
    ///
    /// Returns an I2 violation at `time` if `start > end`. A zero-length
    /// interval (`start == end`) is allowed.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        let spec = Self::Between { start, end };
        if spec.is_well_formed() {
            Ok(spec)
        } else {
            Err(ValidationError::invariant(
                InvariantId::I2,
                "time",
                format!("BETWEEN start ({start}) must not be after end ({end})"),
            ))
        }
    }

    /// Returns true for AS_OF.
    pub const fn is_as_of(&self) -> bool {
        matches!(self, Self::AsOf { .. })
    }

    /// Returns true for BETWEEN.
    pub const fn is_between(&self) -> bool {
        matches!(self, Self::Between { .. })
    }

    /// Returns false for an inverted BETWEEN interval.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::AsOf { .. } => true,
            Self::Between { start, end } => start <= end,
        }
    }

    /// The earliest instant this coordinate covers.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        match self {
            Self::AsOf { at } => *at,
            Self::Between { start, .. } => *start,
        }
    }

    /// The latest instant this coordinate covers.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        match self {
            Self::AsOf { at } => *at,
            Self::Between { end, .. } => *end,
        }
    }

    /// For AS_OF, true if `time` is not after the projection instant.
    /// For BETWEEN, true if `time` lies in `[start, end]`.
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        match self {
            Self::AsOf { at } => time <= *at,
            Self::Between { start, end } => time >= *start && time <= *end,
        }
    }

    /// Stable name of the variant.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::AsOf { .. } => "AS_OF",
            Self::Between { .. } => "BETWEEN",
        }
    }
}

impl std::fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AsOf { at } => write!(f, "AS OF {}", at.to_rfc3339()),
            Self::Between { start, end } => {
                write!(f, "BETWEEN {} AND {}", start.to_rfc3339(), end.to_rfc3339())
            }
        }
    }
}
