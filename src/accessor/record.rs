use crate::bottleneck::Bottleneck;
use crate::clock::{duration_to_ticks, ticks_to_duration};
use crate::error::{Result, SurveyError};
use std::cmp::Ordering;
use std::time::Duration;

/// A frozen view of one or more accesses to a single bottleneck
///
/// Records are what surveyors accumulate and rank. [`AccessRecord::combine`]
/// folds two records of the same bottleneck into a new one without touching
/// either input.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub(crate) bottleneck: Bottleneck,
    pub(crate) access_begin: u64,
    pub(crate) access_end: Option<u64>,
    pub(crate) access_count: u64,
    pub(crate) limit_used: f64,
    pub(crate) access_duration_ticks: u64,
    pub(crate) frequency: u64,
}

impl AccessRecord {
    pub fn bottleneck(&self) -> &Bottleneck {
        &self.bottleneck
    }

    /// Clock tick at which the earliest folded access began
    pub fn access_begin(&self) -> u64 {
        self.access_begin
    }

    /// Clock tick at which the latest folded access ended, `None` while any is open
    pub fn access_end(&self) -> Option<u64> {
        self.access_end
    }

    pub fn is_in_progress(&self) -> bool {
        self.access_end.is_none()
    }

    /// Number of closed accesses folded into this record
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// Accumulated usage quantity (ticks for auto-detect bottlenecks)
    pub fn limit_used(&self) -> f64 {
        self.limit_used
    }

    /// Ticks covered by the merged interval
    pub fn access_duration_ticks(&self) -> u64 {
        self.access_duration_ticks
    }

    pub fn access_duration(&self) -> Duration {
        ticks_to_duration(self.access_duration_ticks, self.frequency)
    }

    /// Ticks per second of the clock that produced this record
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Observed usage rate over one limit period, divided by the limit
    ///
    /// 0 for unlimited bottlenecks or when nothing was used. A zero-length
    /// interval is measured as one tick. Without a limit period the limit is
    /// taken to cover the whole access.
    pub fn linear_utilization(&self) -> f64 {
        let Some(limit) = self.bottleneck.limit() else {
            return 0.0;
        };
        if self.limit_used <= 0.0 {
            return 0.0;
        }
        if limit == 0.0 {
            return f64::INFINITY;
        }
        match self.bottleneck.limit_period() {
            Some(period) => {
                let period_ticks = duration_to_ticks(period, self.frequency) as f64;
                let duration = self.access_duration_ticks.max(1) as f64;
                (self.limit_used / duration) * (period_ticks / limit)
            }
            None => self.limit_used / limit,
        }
    }

    /// Utilization under the bottleneck's algorithm
    pub fn utilization(&self) -> f64 {
        self.bottleneck
            .algorithm()
            .apply(self.linear_utilization())
    }

    /// Merge two records of the same bottleneck
    ///
    /// The result spans from the earlier begin to the later end, is open if
    /// either input is open, sums counts and usage, and recomputes the
    /// duration from the merged interval so overlap is not counted twice.
    ///
    /// # Errors
    /// [`SurveyError::BottleneckMismatch`] if the records belong to
    /// different bottlenecks.
    pub fn combine(&self, other: &AccessRecord) -> Result<AccessRecord> {
        if self.bottleneck != other.bottleneck {
            return Err(SurveyError::BottleneckMismatch {
                expected: self.bottleneck.id().to_string(),
                found: other.bottleneck.id().to_string(),
            });
        }
        Ok(self.merged_with(other))
    }

    /// Field-wise merge; callers guarantee both records share a bottleneck
    pub(crate) fn merged_with(&self, other: &AccessRecord) -> AccessRecord {
        let access_begin = self.access_begin.min(other.access_begin);
        let horizon = self.horizon().max(other.horizon());
        let access_end = match (self.access_end, other.access_end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        AccessRecord {
            bottleneck: self.bottleneck.clone(),
            access_begin,
            access_end,
            access_count: self.access_count.saturating_add(other.access_count),
            limit_used: self.limit_used + other.limit_used,
            access_duration_ticks: horizon.saturating_sub(access_begin),
            frequency: self.frequency,
        }
    }

    /// Rank by utilization, then by raw usage
    pub fn compare(&self, other: &AccessRecord) -> Ordering {
        self.utilization()
            .total_cmp(&other.utilization())
            .then_with(|| self.limit_used.total_cmp(&other.limit_used))
    }

    /// [`AccessRecord::compare`] where a missing record ranks below any record
    pub fn compare_optional(a: Option<&AccessRecord>, b: Option<&AccessRecord>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.compare(b),
        }
    }

    /// Last tick covered: the end if closed, otherwise begin plus duration
    fn horizon(&self) -> u64 {
        self.access_end
            .unwrap_or_else(|| self.access_begin.saturating_add(self.access_duration_ticks))
    }

    /// True when nothing at all was attributed
    pub(crate) fn is_empty(&self) -> bool {
        self.access_count == 0 && self.limit_used == 0.0 && self.access_duration_ticks == 0
    }
}

/// Identity: same bottleneck over the same interval
impl PartialEq for AccessRecord {
    fn eq(&self, other: &Self) -> bool {
        self.bottleneck == other.bottleneck
            && self.access_begin == other.access_begin
            && self.access_end == other.access_end
    }
}
