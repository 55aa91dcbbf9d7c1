//! See [`TimeInterval`].

use chrono::prelude::*;
use serde::{Deserialize, Serialize, de::Visitor};

/// A half-open span of time: `start` inclusive, `end` exclusive.
///
/// # [Ordering](`Ord`)
///
/// [`TimeInterval`] is ordered by start, then end. In other words, if
/// [`TimeInterval`] `a` starts before [`TimeInterval`] `b`, then `a` will be
/// ordered ahead of `b` no matter when either ends. However, if both start at
/// the same time, then the one that ends first is ordered ahead of the one
/// that ends later.
///
/// The main purpose of implementing [`Ord`] for [`TimeInterval`] is so that a
/// resource's busy/DNS intervals can be kept in a sorted `Vec` and queried
/// with binary search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeInterval {
    /// Beginning of the interval, inclusive.
    pub start: DateTime<Utc>,

    /// Conclusion of the interval, exclusive.
    pub end: DateTime<Utc>,
}

/// Custom [`Deserialize`] implementation so a [`TimeInterval`] can come from
/// either `{"start": ..., "end": ...}`, a two-element array, or `"a..b"`.
impl<'de> Deserialize<'de> for TimeInterval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct TimeIntervalVisitor;
        use serde::de::Error;

        impl<'de> Visitor<'de> for TimeIntervalVisitor {
            type Value = TimeInterval;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("struct TimeInterval")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let start = seq
                    .next_element::<DateTime<Utc>>()?
                    .ok_or_else(|| Error::invalid_length(0, &self))?;
                let end = seq
                    .next_element::<DateTime<Utc>>()?
                    .ok_or_else(|| Error::invalid_length(1, &self))?;
                Ok(TimeInterval { start, end })
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                #[derive(Deserialize)]
                #[serde(field_identifier, rename_all = "lowercase")]
                enum Field {
                    Start,
                    End,
                }

                let mut start = None;
                let mut end = None;
                while let Some((key, value)) = map.next_entry()? {
                    match key {
                        Field::Start => {
                            if start.is_some() {
                                return Err(Error::duplicate_field("start"));
                            }
                            start = Some(value);
                        }
                        Field::End => {
                            if end.is_some() {
                                return Err(Error::duplicate_field("end"));
                            }
                            end = Some(value);
                        }
                    }
                }
                let start = start.ok_or_else(|| Error::missing_field("start"))?;
                let end = end.ok_or_else(|| Error::missing_field("end"))?;
                Ok(TimeInterval { start, end })
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                let (start, end) = v
                    .split_once("..")
                    .ok_or_else(|| Error::invalid_length(1, &self))?;
                let start = start.parse::<DateTime<Utc>>().map_err(Error::custom)?;
                let end = end.parse::<DateTime<Utc>>().map_err(Error::custom)?;
                Ok(TimeInterval { start, end })
            }
        }

        deserializer
            .deserialize_map(TimeIntervalVisitor)
            .and_then(|interval| {
                if interval.start <= interval.end {
                    Ok(interval)
                } else {
                    Err(Error::invalid_value(
                        serde::de::Unexpected::Other("time-reversed interval"),
                        &TimeIntervalVisitor,
                    ))
                }
            })
    }
}

impl PartialOrd for TimeInterval {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeInterval {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.start.cmp(&other.start) {
            std::cmp::Ordering::Equal => self.end.cmp(&other.end),
            ord => ord,
        }
    }
}

impl TimeInterval {
    /// Construct an interval, panicking if it is time-reversed.
    ///
    /// # Panics
    /// If `end < start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "time-reversed interval: {start} > {end}");
        Self { start, end }
    }

    /// Returns whether `self` and `other` share any instant.
    pub fn overlaps(&self, other: &Self) -> bool {
        debug_assert!(self.start <= self.end && other.start <= other.end);
        self.start < other.end && other.start < self.end
    }

    /// Returns whether `self` completely encloses `other`.
    pub fn contains(&self, other: &Self) -> bool {
        debug_assert!(self.start <= self.end && other.start <= other.end);
        self.start <= other.start && other.end <= self.end
    }

    /// Returns whether `instant` falls within `self`.
    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// The length of the interval.
    pub fn duration(&self) -> chrono::TimeDelta {
        self.end - self.start
    }
}

/// Merge a list of (possibly overlapping, possibly unsorted) intervals into
/// the minimal sorted, non-overlapping, non-touching cover.
pub fn merge_intervals(mut intervals: Vec<TimeInterval>) -> Vec<TimeInterval> {
    intervals.sort_unstable();
    let mut merged: Vec<TimeInterval> = Vec::with_capacity(intervals.len());
    for iv in intervals {
        match merged.last_mut() {
            Some(last) if iv.start <= last.end => {
                if iv.end > last.end {
                    last.end = iv.end;
                }
            }
            _ => merged.push(iv),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use crate::time_interval;

    #[test]
    fn test_interval_contains_self() {
        assert!(
            time_interval! { 4/5/2025 - 4/8/2025 }
                .contains(&time_interval! { 4/5/2025 - 4/8/2025 }),
            "an interval should contain itself"
        );
    }

    #[test]
    fn test_interval_contains_later_start() {
        assert!(
            time_interval! { 4/5/2025 - 4/8/2025 }
                .contains(&time_interval! { 4/6/2025 - 4/8/2025 }),
            "an interval starting later but sharing an end should count as contained"
        );
    }

    #[test]
    fn test_interval_contains_earlier_end() {
        assert!(
            time_interval! { 4/5/2025 - 4/8/2025 }
                .contains(&time_interval! { 4/5/2025 - 4/7/2025 }),
            "an interval sharing a start but ending earlier should count as contained"
        );
    }

    #[test]
    fn test_interval_not_contains_earlier_start() {
        assert!(
            !time_interval! { 4/5/2025 - 4/8/2025 }
                .contains(&time_interval! { 4/4/2025 - 4/6/2025 }),
            "an interval starting earlier should not count as contained"
        );
    }

    #[test]
    fn test_overlaps_touching_is_not_overlapping() {
        assert!(
            !time_interval! { 4/5/2025 - 4/8/2025 }.overlaps(&time_interval! { 4/8/2025 - 4/9/2025 }),
            "half-open intervals that merely touch at a boundary should not overlap"
        );
    }

    #[test]
    fn test_overlaps_true() {
        assert!(
            time_interval! { 4/5/2025 - 4/8/2025 }.overlaps(&time_interval! { 4/7/2025 - 4/9/2025 }),
        );
    }

    #[test]
    fn test_merge_intervals_joins_touching_and_overlapping() {
        let merged = super::merge_intervals(vec![
            time_interval! { 1/1/2025 - 1/5/2025 },
            time_interval! { 1/5/2025 - 1/8/2025 },
            time_interval! { 1/10/2025 - 1/12/2025 },
            time_interval! { 1/11/2025 - 1/15/2025 },
        ]);
        assert_eq!(
            merged,
            vec![
                time_interval! { 1/1/2025 - 1/8/2025 },
                time_interval! { 1/10/2025 - 1/15/2025 },
            ]
        );
    }
}
