//! Expectation definitions.
//!
//! An expectation states what should happen; an absence is an expectation
//! that did not hold over a window. Definitions are versioned and live in an
//! external store behind [`ExpectationRegistry`](crate::ExpectationRegistry).
//!
//! The validator only needs the part of a definition that fixes the absence
//! window. That part travels inside the IR as an [`ExpectationSchedule`], so
//! a decoded IR can be re-checked without the store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::absence::{ExpectationRef, GroundingPointer};
use crate::frame::FrameRef;
use crate::time::TimeSpec;
use crate::value::Value;

/// How often the expected event should occur.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpectationFrequency {
    /// Exactly once, optionally by a deadline.
    #[default]
    Once,
    /// Every calendar day (UTC).
    Daily,
    /// Every ISO week, Monday to Monday (UTC).
    Weekly,
    /// Every calendar month (UTC).
    Monthly,
    /// Custom recurrence; the deadline is the period.
    Recurring,
    /// Should hold at all times.
    Continuous,
}

impl fmt::Display for ExpectationFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Once => "ONCE",
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Recurring => "RECURRING",
            Self::Continuous => "CONTINUOUS",
        })
    }
}

/// The rule an expectation evaluates. Opaque to the core apart from the
/// frequency and deadline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpectationRule {
    /// Entities the expectation applies to.
    pub entity_filter: BTreeMap<String, Value>,
    /// Claim type expected to appear.
    pub claim_type: Option<String>,
    /// How often the claim is expected.
    pub frequency: ExpectationFrequency,
    /// Deadline for `ONCE`, period for `RECURRING`.
    pub deadline_hours: Option<u32>,
    /// Extra scope constraints.
    pub scope: BTreeMap<String, Value>,
    /// Cron-like pattern for `RECURRING`.
    pub recurrence_pattern: Option<String>,
}

impl ExpectationRule {
    /// A rule with the given frequency and nothing else.
    #[must_use]
    pub fn new(frequency: ExpectationFrequency) -> Self {
        Self {
            frequency,
            ..Self::default()
        }
    }

    /// Sets the deadline (or period) in hours.
    #[must_use]
    pub const fn with_deadline_hours(mut self, hours: u32) -> Self {
        self.deadline_hours = Some(hours);
        self
    }

    /// Sets the expected claim type.
    #[must_use]
    pub fn expecting_claim(mut self, claim_type: impl Into<String>) -> Self {
        self.claim_type = Some(claim_type.into());
        self
    }
}

/// Window-relevant part of an expectation definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationSchedule {
    /// Expected frequency.
    pub frequency: ExpectationFrequency,
    /// Deadline or period in hours.
    pub deadline_hours: Option<u32>,
    /// Start of the activity period, inclusive.
    pub active_from: Option<DateTime<Utc>>,
    /// End of the activity period, inclusive.
    pub active_until: Option<DateTime<Utc>>,
}

impl ExpectationSchedule {
    /// Returns true if the schedule alone fixes an absence window around a
    /// reference instant.
    ///
    /// Calendar frequencies always do. `ONCE` needs a deadline or a start,
    /// `RECURRING` needs a period. `CONTINUOUS` never does: the caller
    /// states the window.
    #[must_use]
    pub const fn defines_window(&self) -> bool {
        match self.frequency {
            ExpectationFrequency::Daily
            | ExpectationFrequency::Weekly
            | ExpectationFrequency::Monthly => true,
            ExpectationFrequency::Once => {
                self.deadline_hours.is_some() || self.active_from.is_some()
            }
            ExpectationFrequency::Recurring => self.deadline_hours.is_some(),
            ExpectationFrequency::Continuous => false,
        }
    }

    /// The absence window the schedule defines around `reference`.
    ///
    /// - `ONCE`: from `active_from` (or `reference`) to the deadline, or to
    ///   `reference` when there is no deadline
    /// - `DAILY`: the UTC day containing `reference`
    /// - `WEEKLY`: Monday 00:00 of that week plus seven days
    /// - `MONTHLY`: the first of that month to the first of the next
    /// - `RECURRING`: one period back from `reference`
    ///
    /// Windows are closed; calendar windows end on the next period's start.
    /// Returns `None` when the schedule does not define a window or the
    /// computed bounds are inverted.
    #[must_use]
    pub fn absence_window(&self, reference: DateTime<Utc>) -> Option<TimeSpec> {
        if !self.defines_window() {
            return None;
        }
        let deadline = self.deadline_hours.map(|h| Duration::hours(i64::from(h)));
        let day = reference.date_naive();

        let (start, end) = match self.frequency {
            ExpectationFrequency::Once => {
                let start = self.active_from.unwrap_or(reference);
                (start, deadline.map_or(reference, |d| start + d))
            }
            ExpectationFrequency::Daily => {
                let start = midnight(day)?;
                (start, start + Duration::days(1))
            }
            ExpectationFrequency::Weekly => {
                let back = i64::from(day.weekday().num_days_from_monday());
                let start = midnight(day - Duration::days(back))?;
                (start, start + Duration::days(7))
            }
            ExpectationFrequency::Monthly => {
                let first = NaiveDate::from_ymd_opt(day.year(), day.month(), 1)?;
                let next = if day.month() == 12 {
                    NaiveDate::from_ymd_opt(day.year() + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(day.year(), day.month() + 1, 1)?
                };
                (midnight(first)?, midnight(next)?)
            }
            ExpectationFrequency::Recurring => (reference - deadline?, reference),
            ExpectationFrequency::Continuous => return None,
        };

        TimeSpec::between(start, end).ok()
    }

    /// Returns true if the expectation is active at `at`.
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.active_from.map_or(true, |from| at >= from)
            && self.active_until.map_or(true, |until| at <= until)
    }

    /// Returns true if the activity period intersects `window`.
    #[must_use]
    pub fn overlaps(&self, window: &TimeSpec) -> bool {
        self.active_from.map_or(true, |from| window.end() >= from)
            && self.active_until.map_or(true, |until| window.start() <= until)
    }
}

fn midnight(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n))
}

/// The expectation an absence was validated against.
///
/// `schedule` is present only when the expectation was resolved through a
/// registry; an unresolved reference never defines its own window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedExpectation {
    /// Expectation id.
    pub expectation_id: String,
    /// Resolved version, or the caller's pin when unresolved.
    pub version: Option<String>,
    /// Window-relevant rule, when resolved.
    pub schedule: Option<ExpectationSchedule>,
}

impl ResolvedExpectation {
    /// Carries a reference through validation without a registry.
    #[must_use]
    pub fn unresolved(reference: &ExpectationRef) -> Self {
        Self {
            expectation_id: reference.expectation_id.clone(),
            version: reference.version.clone(),
            schedule: None,
        }
    }

    /// Returns true if the resolved rule fixes its own absence window.
    #[must_use]
    pub fn defines_window(&self) -> bool {
        self.schedule
            .as_ref()
            .is_some_and(ExpectationSchedule::defines_window)
    }

    /// The draft-side reference, pinned to the resolved version.
    #[must_use]
    pub fn to_ref(&self) -> ExpectationRef {
        ExpectationRef {
            expectation_id: self.expectation_id.clone(),
            version: self.version.clone(),
        }
    }
}

impl fmt::Display for ResolvedExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{v}", self.expectation_id),
            None => f.write_str(&self.expectation_id),
        }
    }
}

/// A versioned expectation as held by an expectation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationDefinition {
    expectation_id: String,
    version: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    rule: ExpectationRule,
    #[serde(default)]
    active_from: Option<DateTime<Utc>>,
    #[serde(default)]
    active_until: Option<DateTime<Utc>>,
    /// Frame the expectation is relative to, if any.
    #[serde(default)]
    frame: Option<FrameRef>,
    #[serde(default)]
    grounding_ref: Option<GroundingPointer>,
}

impl ExpectationDefinition {
    /// Creates a `ONCE` expectation with no deadline and no activity bounds.
    #[must_use]
    pub fn new(
        expectation_id: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            expectation_id: expectation_id.into(),
            version: version.into(),
            name: name.into(),
            description: None,
            rule: ExpectationRule::default(),
            active_from: None,
            active_until: None,
            frame: None,
            grounding_ref: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replaces the rule.
    #[must_use]
    pub fn with_rule(mut self, rule: ExpectationRule) -> Self {
        self.rule = rule;
        self
    }

    /// Bounds the activity period; either end may be open.
    #[must_use]
    pub const fn active_between(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.active_from = from;
        self.active_until = until;
        self
    }

    /// Makes the expectation relative to a frame.
    #[must_use]
    pub fn under_frame(mut self, frame: FrameRef) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Records the assertion the expectation is grounded on.
    #[must_use]
    pub fn grounded_on(mut self, pointer: impl Into<GroundingPointer>) -> Self {
        self.grounding_ref = Some(pointer.into());
        self
    }

    /// Expectation id.
    pub fn expectation_id(&self) -> &str {
        &self.expectation_id
    }

    /// Registered version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The evaluated rule.
    pub const fn rule(&self) -> &ExpectationRule {
        &self.rule
    }

    /// Frame the expectation is relative to.
    pub const fn frame(&self) -> Option<&FrameRef> {
        self.frame.as_ref()
    }

    /// Assertion backing the expectation.
    pub const fn grounding_ref(&self) -> Option<&GroundingPointer> {
        self.grounding_ref.as_ref()
    }

    /// The window-relevant part of the definition.
    #[must_use]
    pub fn schedule(&self) -> ExpectationSchedule {
        ExpectationSchedule {
            frequency: self.rule.frequency,
            deadline_hours: self.rule.deadline_hours,
            active_from: self.active_from,
            active_until: self.active_until,
        }
    }

    /// Returns true if the expectation is active at `at`.
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.schedule().is_active_at(at)
    }

    /// The absence window this expectation defines around `reference`.
    #[must_use]
    pub fn absence_window(&self, reference: DateTime<Utc>) -> Option<TimeSpec> {
        self.schedule().absence_window(reference)
    }

    /// The resolution recorded in a validated IR.
    #[must_use]
    pub fn resolved(&self) -> ResolvedExpectation {
        ResolvedExpectation {
            expectation_id: self.expectation_id.clone(),
            version: Some(self.version.clone()),
            schedule: Some(self.schedule()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn schedule(frequency: ExpectationFrequency, deadline_hours: Option<u32>) -> ExpectationSchedule {
        ExpectationSchedule {
            frequency,
            deadline_hours,
            active_from: None,
            active_until: None,
        }
    }

    fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<TimeSpec> {
        Some(TimeSpec::between(start, end).unwrap())
    }

    #[test]
    fn test_daily_window_is_the_utc_day() {
        let s = schedule(ExpectationFrequency::Daily, None);
        assert_eq!(
            s.absence_window(at(2025, 3, 12, 15)),
            window(at(2025, 3, 12, 0), at(2025, 3, 13, 0))
        );
    }

    #[test]
    fn test_weekly_window_starts_monday() {
        // 2025-03-13 is a Thursday.
        let s = schedule(ExpectationFrequency::Weekly, None);
        assert_eq!(
            s.absence_window(at(2025, 3, 13, 9)),
            window(at(2025, 3, 10, 0), at(2025, 3, 17, 0))
        );
    }

    #[test]
    fn test_monthly_window_rolls_year() {
        let s = schedule(ExpectationFrequency::Monthly, None);
        assert_eq!(
            s.absence_window(at(2024, 12, 20, 0)),
            window(at(2024, 12, 1, 0), at(2025, 1, 1, 0))
        );
    }

    #[test]
    fn test_once_runs_from_activation_to_deadline() {
        let mut s = schedule(ExpectationFrequency::Once, Some(48));
        s.active_from = Some(at(2025, 1, 1, 0));
        assert_eq!(
            s.absence_window(at(2025, 6, 1, 0)),
            window(at(2025, 1, 1, 0), at(2025, 1, 3, 0))
        );
    }

    #[test]
    fn test_recurring_looks_back_one_period() {
        let s = schedule(ExpectationFrequency::Recurring, Some(6));
        assert_eq!(
            s.absence_window(at(2025, 1, 1, 12)),
            window(at(2025, 1, 1, 6), at(2025, 1, 1, 12))
        );
    }

    #[test]
    fn test_open_ended_schedules_define_no_window() {
        assert!(!schedule(ExpectationFrequency::Continuous, Some(6)).defines_window());
        assert!(!schedule(ExpectationFrequency::Once, None).defines_window());
        assert!(!schedule(ExpectationFrequency::Recurring, None).defines_window());
        assert!(schedule(ExpectationFrequency::Continuous, None)
            .absence_window(at(2025, 1, 1, 0))
            .is_none());
    }

    #[test]
    fn test_once_without_deadline_rejects_future_activation() {
        let mut s = schedule(ExpectationFrequency::Once, None);
        s.active_from = Some(at(2025, 2, 1, 0));
        assert!(s.defines_window());
        assert!(s.absence_window(at(2025, 1, 1, 0)).is_none());
    }

    #[test]
    fn test_activity_bounds() {
        let def = ExpectationDefinition::new("exp", "1", "Exp")
            .active_between(Some(at(2025, 1, 1, 0)), Some(at(2025, 1, 31, 0)));
        assert!(def.is_active_at(at(2025, 1, 15, 0)));
        assert!(!def.is_active_at(at(2024, 12, 31, 0)));
        assert!(!def.is_active_at(at(2025, 2, 1, 0)));

        let s = def.schedule();
        assert!(s.overlaps(&TimeSpec::between(at(2024, 12, 1, 0), at(2025, 1, 1, 0)).unwrap()));
        assert!(!s.overlaps(&TimeSpec::between(at(2025, 2, 1, 0), at(2025, 3, 1, 0)).unwrap()));
    }

    #[test]
    fn test_resolved_carries_schedule() {
        let def = ExpectationDefinition::new("daily-report", "3", "Daily report")
            .with_rule(ExpectationRule::new(ExpectationFrequency::Daily).expecting_claim("report"));
        let resolved = def.resolved();
        assert!(resolved.defines_window());
        assert_eq!(resolved.to_string(), "daily-report@3");
        assert_eq!(resolved.to_ref().version.as_deref(), Some("3"));

        let unresolved = ResolvedExpectation::unresolved(&ExpectationRef::new("daily-report"));
        assert!(!unresolved.defines_window());
    }

    #[test]
    fn test_rule_wire_names() {
        let rule = ExpectationRule::new(ExpectationFrequency::Weekly).with_deadline_hours(12);
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["frequency"], "WEEKLY");
        assert_eq!(json["deadline_hours"], 12);
        let back: ExpectationRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }
}
