//! Accesses to a bottleneck
//!
//! [`Accessor`] is the guard handed to instrumented code by
//! [`Bottleneck::enter`](crate::bottleneck::Bottleneck::enter). It is open
//! until disposed (explicitly or on drop). Surveyors keep their own handle on
//! the shared access state and read it as [`AccessRecord`] snapshots.

mod record;

pub use record::AccessRecord;

use crate::ambient::Services;
use crate::bottleneck::Bottleneck;
use crate::clock::Clock;
use crate::detector::Detector;
use crate::error::{Result, SurveyError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ACCESS_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Usage {
    end: Option<u64>,
    access_count: u64,
    limit_used: f64,
    explicit: bool,
}

/// What part of an access a surveyor has already accounted for
///
/// Time windows advance this when they rotate so that the remainder of an
/// access that straddles a boundary lands in the next window only.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Attribution {
    pub(crate) since: u64,
    pub(crate) usage: f64,
    pub(crate) count: u64,
}

impl Attribution {
    pub(crate) fn starting_at(since: u64) -> Self {
        Self {
            since,
            usage: 0.0,
            count: 0,
        }
    }
}

/// State shared between the owning [`Accessor`] and observing surveyors
#[derive(Debug)]
pub(crate) struct AccessState {
    id: u64,
    bottleneck: Bottleneck,
    clock: Arc<dyn Clock>,
    begin: u64,
    usage: Mutex<Usage>,
}

impl AccessState {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn bottleneck(&self) -> &Bottleneck {
        &self.bottleneck
    }

    pub(crate) fn begin(&self) -> u64 {
        self.begin
    }

    /// Record of everything not yet attributed, measured up to `until` if still open
    pub(crate) fn record_since(&self, attributed: Attribution, until: u64) -> AccessRecord {
        let usage = self.usage.lock();
        let begin = self.begin.max(attributed.since);
        let horizon = usage.end.unwrap_or(until);
        let duration = horizon.saturating_sub(begin);
        let limit_used = if self.bottleneck.auto_detect() && !usage.explicit {
            duration as f64
        } else {
            (usage.limit_used - attributed.usage).max(0.0)
        };
        AccessRecord {
            bottleneck: self.bottleneck.clone(),
            access_begin: begin,
            access_end: usage.end,
            access_count: usage.access_count.saturating_sub(attributed.count),
            limit_used,
            access_duration_ticks: duration,
            frequency: self.clock.frequency(),
        }
    }

    /// Split off the part of the access that falls before `boundary`
    ///
    /// Returns the record for that part and the attribution to carry into the
    /// next window, or `None` once the access closed at or before the
    /// boundary and is fully reported. An access closed after the boundary is
    /// still in progress at the boundary: its count moves on, and explicit
    /// usage is shared in proportion to time. Returns no record when the
    /// unattributed part begins at or after the boundary.
    pub(crate) fn split_at(
        &self,
        attributed: Attribution,
        boundary: u64,
    ) -> (Option<AccessRecord>, Option<Attribution>) {
        let begin = self.begin.max(attributed.since);
        if begin >= boundary {
            return (None, Some(attributed));
        }
        let usage = self.usage.lock();
        let closes_within = usage.end.is_some_and(|end| end <= boundary);
        let horizon = usage.end.map_or(boundary, |end| end.min(boundary));
        let duration = horizon.saturating_sub(begin);
        let timed = self.bottleneck.auto_detect() && !usage.explicit;
        let remaining = (usage.limit_used - attributed.usage).max(0.0);
        let limit_used = match usage.end {
            _ if timed => duration as f64,
            Some(end) if end > boundary => {
                remaining * duration as f64 / end.saturating_sub(begin) as f64
            }
            _ => remaining,
        };
        let access_count = match usage.end {
            Some(end) if end > boundary => 0,
            _ => usage.access_count.saturating_sub(attributed.count),
        };
        let record = AccessRecord {
            bottleneck: self.bottleneck.clone(),
            access_begin: begin,
            access_end: if closes_within { usage.end } else { None },
            access_count,
            limit_used,
            access_duration_ticks: duration,
            frequency: self.clock.frequency(),
        };
        let next = (!closes_within).then(|| Attribution {
            since: boundary,
            usage: if timed { attributed.usage } else { attributed.usage + limit_used },
            count: attributed.count.saturating_add(access_count),
        });
        (Some(record), next)
    }
}

/// One open-to-close use of a bottleneck
///
/// Disposal is idempotent and happens automatically on drop.
#[derive(Debug)]
pub struct Accessor {
    state: Arc<AccessState>,
    detector: Option<Arc<Detector>>,
}

impl Accessor {
    pub(crate) fn open(bottleneck: Bottleneck, services: &Services) -> Self {
        let clock = Arc::clone(services.clock());
        let begin = clock.ticks();
        let state = Arc::new(AccessState {
            id: NEXT_ACCESS_ID.fetch_add(1, Ordering::Relaxed),
            bottleneck,
            clock,
            begin,
            usage: Mutex::new(Usage::default()),
        });
        let accessor = Self {
            state,
            detector: services.detector().cloned(),
        };
        if let Some(detector) = &accessor.detector {
            detector.bottleneck_entered(&accessor);
        }
        accessor
    }

    pub(crate) fn state(&self) -> &Arc<AccessState> {
        &self.state
    }

    pub fn bottleneck(&self) -> &Bottleneck {
        &self.state.bottleneck
    }

    /// Clock tick at which the access began
    pub fn access_begin(&self) -> u64 {
        self.state.begin
    }

    /// Clock tick at which the access was disposed
    pub fn access_end(&self) -> Option<u64> {
        self.state.usage.lock().end
    }

    pub fn is_closed(&self) -> bool {
        self.access_end().is_some()
    }

    /// Replace the reported count and usage
    ///
    /// # Errors
    /// [`SurveyError::AccessClosed`] once the access has been disposed.
    pub fn set_usage(&self, count: u64, usage: f64) -> Result<()> {
        self.update_usage(|u| {
            u.access_count = count;
            u.limit_used = usage;
        })
    }

    /// Add to the reported count and usage
    ///
    /// # Errors
    /// [`SurveyError::AccessClosed`] once the access has been disposed.
    pub fn add_usage(&self, count_delta: u64, usage_delta: f64) -> Result<()> {
        self.update_usage(|u| {
            u.access_count = u.access_count.saturating_add(count_delta);
            u.limit_used += usage_delta;
        })
    }

    fn update_usage(&self, apply: impl FnOnce(&mut Usage)) -> Result<()> {
        let mut usage = self.state.usage.lock();
        if usage.end.is_some() {
            return Err(SurveyError::AccessClosed {
                bottleneck: self.state.bottleneck.id().to_string(),
            });
        }
        apply(&mut usage);
        usage.explicit = true;
        Ok(())
    }

    /// Snapshot of this access as of now
    pub fn record(&self) -> AccessRecord {
        self.state.record_since(
            Attribution::starting_at(self.state.begin),
            self.state.clock.ticks(),
        )
    }

    /// Close the access and notify the detector; later calls do nothing
    pub fn dispose(&self) {
        let closed_now = {
            let mut usage = self.state.usage.lock();
            if usage.end.is_some() {
                false
            } else {
                let now = self.state.clock.ticks();
                usage.end = Some(now);
                usage.access_count = usage.access_count.max(1);
                if self.state.bottleneck.auto_detect() && !usage.explicit {
                    usage.limit_used = now.saturating_sub(self.state.begin) as f64;
                }
                true
            }
        };
        if closed_now {
            if let Some(detector) = &self.detector {
                detector.bottleneck_exited(self);
            }
        }
    }
}

impl Drop for Accessor {
    fn drop(&mut self) {
        self.dispose();
    }
}
