//! How recurring resource unavailability is expressed and expanded.

use crate::data::interval::TimeInterval;
use chrono::{DateTime, Days, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Once every `n` units. Fields are added together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Frequency {
    /// Repeat every `n` seconds
    #[serde(default)]
    pub seconds: u8,
    /// Repeat every `n` minutes
    #[serde(default)]
    pub minutes: u8,
    /// Repeat every `n` hours
    #[serde(default)]
    pub hours: u8,
    /// Repeat every `n` days
    #[serde(default)]
    pub days: u8,
    /// Repeat every `n` weeks
    #[serde(default)]
    pub weeks: u8,
    /// Repeat every `n` months
    #[serde(default)]
    pub months: u8,
    /// Repeat every `n` years
    #[serde(default)]
    pub years: u16,
}

impl Frequency {
    #[inline]
    fn checked_add_date(self, date: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let seconds =
            i64::from(self.seconds) + 60 * i64::from(self.minutes) + 3600 * i64::from(self.hours);
        let days = u64::from(self.days) + 7 * u64::from(self.weeks);
        let months = u32::from(self.months) + 12 * u32::from(self.years);
        date.checked_add_signed(TimeDelta::seconds(seconds))?
            .checked_add_days(Days::new(days))?
            .checked_add_months(Months::new(months))
    }
}

/// How to repeat a [`DnsRule`]'s intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repetition {
    /// The frequency of the repetition.
    pub every: Frequency,

    /// When the repetition begins.
    pub start: DateTime<Utc>,

    /// When the repetition should end. [`None`] if permanent — bounded at
    /// materialization time by the caller-supplied horizon instead.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

struct RepetitionIter<'a> {
    rep: &'a Repetition,
    horizon: DateTime<Utc>,
    curr: Option<DateTime<Utc>>,
}

impl Iterator for RepetitionIter<'_> {
    type Item = DateTime<Utc>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let limit = match self.rep.until {
            Some(until) => until.min(self.horizon),
            None => self.horizon,
        };
        self.curr
            .filter(|date| *date <= limit)
            .inspect(|date| {
                self.curr = self.rep.every.checked_add_date(*date);
            })
    }
}

impl Repetition {
    #[inline]
    fn iter(&self, horizon: DateTime<Utc>) -> RepetitionIter<'_> {
        RepetitionIter {
            rep: self,
            horizon,
            curr: Some(self.start),
        }
    }
}

/// A recurring do-not-schedule declaration for a resource.
///
/// Ex:
/// - "unavailable every Saturday-Sunday"
/// - "out the first week of every month"
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DnsRule {
    /// The specific intervals this rule involves, before repeating.
    pub include: SmallVec<[TimeInterval; 1]>,

    /// How often `include` repeats. [`None`] if one-off.
    #[serde(default)]
    pub rep: Option<Repetition>,
}

impl FromIterator<TimeInterval> for DnsRule {
    #[inline]
    fn from_iter<T: IntoIterator<Item = TimeInterval>>(iter: T) -> Self {
        Self {
            include: SmallVec::from_iter(iter),
            rep: None,
        }
    }
}

impl DnsRule {
    /// Whether the rule fully covers the interval with at least one
    /// `include` or the repetition of an `include`, up to `horizon`.
    pub fn contains(&self, interval: &TimeInterval, horizon: DateTime<Utc>) -> bool {
        match self.rep {
            Some(rep) => {
                (interval.start >= rep.start && rep.until.is_none_or(|end| interval.end <= end))
                    && rep.iter(horizon).any(|date| {
                        let offset = date.signed_duration_since(rep.start);
                        self.include
                            .iter()
                            .filter_map(|t| {
                                t.start
                                    .checked_add_signed(offset)
                                    .zip(t.end.checked_add_signed(offset))
                                    .map(|(start, end)| TimeInterval { start, end })
                            })
                            .any(|t| t.contains(interval))
                    })
            }
            None => self.include.iter().any(|t| t.contains(interval)),
        }
    }

    /// Expand this rule into concrete, independent [`TimeInterval`]s, one per
    /// repetition occurring at or before `horizon`. Unbounded rules (`until`
    /// is [`None`]) stop expanding at `horizon`.
    pub fn materialize(&self, horizon: DateTime<Utc>) -> Vec<TimeInterval> {
        match self.rep {
            Some(rep) => rep
                .iter(horizon)
                .flat_map(|date| {
                    let offset = date.signed_duration_since(rep.start);
                    self.include.iter().filter_map(move |t| {
                        t.start
                            .checked_add_signed(offset)
                            .zip(t.end.checked_add_signed(offset))
                            .map(|(start, end)| TimeInterval { start, end })
                    })
                })
                .filter(|iv| iv.start <= horizon)
                .collect(),
            None => self.include.iter().copied().collect(),
        }
    }
}
