//! Per-resource busy-interval store.
//!
//! A [`ResourceSchedule`] is a sorted, non-overlapping list of `TimeInterval`s
//! — DNS periods and committed task spans alike, indistinguishable once
//! merged in — downstream code only ever sees the merged view. Queries use
//! binary search via `partition_point`; insertion has an
//! O(1) fast path when the new interval strictly follows the last one, which
//! is the common case while the forward pass walks chronologically.

use chrono::{DateTime, TimeDelta, Utc};

use crate::data::interval::{TimeInterval, merge_intervals};
use crate::data::resource::ResourceId;

/// Convert a (possibly fractional) day count to a [`TimeDelta`].
pub fn days_to_duration(days: f64) -> TimeDelta {
    TimeDelta::seconds((days * 86_400.0).round() as i64)
}

/// Convert a [`TimeDelta`] back to a day count.
pub fn duration_to_days(duration: TimeDelta) -> f64 {
    duration.num_seconds() as f64 / 86_400.0
}

/// One resource's merged busy/DNS timeline.
#[derive(Debug, Clone)]
pub struct ResourceSchedule {
    /// Which resource this tracks.
    pub resource: ResourceId,
    /// Sorted, non-overlapping intervals: DNS and committed task spans alike.
    busy: Vec<TimeInterval>,
}

impl ResourceSchedule {
    /// Build a schedule with the resource's merged DNS already installed.
    pub fn new(resource: ResourceId, dns_periods: Vec<TimeInterval>) -> Self {
        Self {
            resource,
            busy: merge_intervals(dns_periods),
        }
    }

    /// Busy/DNS intervals in chronological order.
    pub fn intervals(&self) -> &[TimeInterval] {
        &self.busy
    }

    fn first_overlap_index(&self, probe: &TimeInterval) -> usize {
        self.busy.partition_point(|iv| iv.end <= probe.start)
    }

    /// Whether `[start, start + duration)` is entirely free.
    pub fn is_free(&self, start: DateTime<Utc>, duration: TimeDelta) -> bool {
        let probe = TimeInterval::new(start, start + duration);
        let idx = self.first_overlap_index(&probe);
        !matches!(self.busy.get(idx), Some(iv) if iv.overlaps(&probe))
    }

    /// Earliest instant at or after `from` such that `duration` fits without
    /// touching a busy/DNS interval.
    pub fn next_free_at(&self, from: DateTime<Utc>, duration: TimeDelta) -> DateTime<Utc> {
        let mut candidate = from;
        loop {
            let probe = TimeInterval::new(candidate, candidate + duration);
            let idx = self.first_overlap_index(&probe);
            match self.busy.get(idx) {
                Some(iv) if iv.overlaps(&probe) => candidate = iv.end,
                _ => return candidate,
            }
        }
    }

    /// Whether `instant` itself falls inside a busy/DNS interval.
    pub fn is_busy_at(&self, instant: DateTime<Utc>) -> bool {
        let idx = self.busy.partition_point(|iv| iv.end <= instant);
        matches!(self.busy.get(idx), Some(iv) if iv.contains_instant(instant))
    }

    /// `from` if it isn't busy, otherwise the end of the busy/DNS interval
    /// (or run of touching intervals) covering it. Unlike
    /// [`next_free_at`](Self::next_free_at), this asks only whether a task
    /// could *begin* at an instant, not whether a whole span fits.
    pub fn next_free_instant(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let mut candidate = from;
        loop {
            let idx = self.busy.partition_point(|iv| iv.end <= candidate);
            match self.busy.get(idx) {
                Some(iv) if iv.contains_instant(candidate) => candidate = iv.end,
                _ => return candidate,
            }
        }
    }

    /// The end instant after accruing `effort` of actual working time
    /// starting at `from`, allowing DNS interruption: calendar time advances
    /// through busy/DNS periods but effort does not accrue during them.
    pub fn completion_time(&self, from: DateTime<Utc>, effort: TimeDelta) -> DateTime<Utc> {
        let mut cursor = from;
        let mut remaining = effort;
        if remaining <= TimeDelta::zero() {
            return cursor;
        }
        loop {
            let idx = self.busy.partition_point(|iv| iv.end <= cursor);
            match self.busy.get(idx) {
                Some(iv) if iv.contains_instant(cursor) => {
                    cursor = iv.end;
                }
                Some(iv) => {
                    let free_span = iv.start - cursor;
                    if free_span >= remaining {
                        return cursor + remaining;
                    }
                    remaining -= free_span;
                    cursor = iv.end;
                }
                None => return cursor + remaining,
            }
        }
    }

    /// Commit a busy interval. O(1) when it strictly follows every interval
    /// already present; otherwise a sorted insert (binary search + shift).
    pub fn insert(&mut self, interval: TimeInterval) {
        match self.busy.last() {
            Some(last) if last.end <= interval.start => self.busy.push(interval),
            _ => {
                let idx = self.busy.partition_point(|iv| iv.start <= interval.start);
                self.busy.insert(idx, interval);
            }
        }
    }

    /// Commit a busy interval that may overlap existing ones (a fixed-date
    /// task claiming a span that overlaps its own DNS: the fixed date wins,
    /// but the merged view must stay sorted and non-overlapping).
    pub fn insert_overriding(&mut self, interval: TimeInterval) {
        self.busy.push(interval);
        self.busy = merge_intervals(std::mem::take(&mut self.busy));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_interval;

    fn schedule_with_dns() -> ResourceSchedule {
        ResourceSchedule::new(
            ResourceId::from("alice"),
            vec![time_interval! { 1/6/2025 - 1/10/2025 }],
        )
    }

    #[test]
    fn test_is_free_around_dns() {
        let sched = schedule_with_dns();
        let one_day = days_to_duration(1.0);
        assert!(sched.is_free(time_interval! { 1/1/2025 - 1/2/2025 }.start, one_day));
        assert!(!sched.is_free(time_interval! { 1/6/2025 - 1/7/2025 }.start, one_day));
    }

    #[test]
    fn test_next_free_at_skips_dns() {
        let sched = schedule_with_dns();
        let three_days = days_to_duration(3.0);
        let next = sched.next_free_at(time_interval! { 1/8/2025 - 1/9/2025 }.start, three_days);
        assert_eq!(next, time_interval! { 1/10/2025 - 1/11/2025 }.start);
    }

    #[test]
    fn test_completion_time_interrupted_by_dns() {
        // alice DNS [1/6, 1/10); task dur=10d starting 1/1 accrues 5 effort
        // days up to the DNS boundary, skips to 1/10, then accrues the
        // remaining 5 -> ends 1/15.
        let sched = schedule_with_dns();
        let end = sched.completion_time(
            time_interval! { 1/1/2025 - 1/2/2025 }.start,
            days_to_duration(10.0),
        );
        assert_eq!(end, time_interval! { 1/15/2025 - 1/16/2025 }.start);
    }

    #[test]
    fn test_insert_fast_path_append() {
        let mut sched = schedule_with_dns();
        sched.insert(time_interval! { 1/11/2025 - 1/12/2025 });
        assert_eq!(sched.intervals().len(), 2);
        assert_eq!(sched.intervals()[1], time_interval! { 1/11/2025 - 1/12/2025 });
    }

    #[test]
    fn test_insert_out_of_order_sorts() {
        let mut sched = schedule_with_dns();
        sched.insert(time_interval! { 1/1/2025 - 1/2/2025 });
        assert_eq!(sched.intervals()[0], time_interval! { 1/1/2025 - 1/2/2025 });
        assert_eq!(sched.intervals()[1], time_interval! { 1/6/2025 - 1/10/2025 });
    }
}
