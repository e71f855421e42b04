use super::{Registration, Surveyor, SurveyorCore};
use crate::accessor::Accessor;
use crate::clock::Clock;
use crate::error::Result;
use crate::survey::{SurveySnapshot, WindowBounds};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Async callback receiving each closed window
pub(crate) type WindowCallback =
    Arc<dyn Fn(SurveySnapshot) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Scope name used when none is given
pub(crate) fn default_scope_name(period: Duration) -> String {
    format!("TimeWindow-{}ms", period.as_millis())
}

#[derive(Debug)]
struct Position {
    index: u64,
    start: u64,
}

/// Rotation state of one time window surveyor, driven by the coordinator
pub(crate) struct WindowState {
    core: Arc<SurveyorCore>,
    period: Duration,
    period_ticks: u64,
    callback: WindowCallback,
    position: Mutex<Position>,
    last: Mutex<Option<SurveySnapshot>>,
}

impl WindowState {
    pub(crate) fn new(core: Arc<SurveyorCore>, period: Duration, callback: WindowCallback) -> Self {
        let start = core
            .window_start()
            .unwrap_or_else(|| core.clock().ticks());
        let period_ticks = core.clock().duration_to_ticks(period).max(1);
        Self {
            core,
            period,
            period_ticks,
            callback,
            position: Mutex::new(Position { index: 0, start }),
            last: Mutex::new(None),
        }
    }

    pub(crate) fn callback(&self) -> WindowCallback {
        Arc::clone(&self.callback)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Close every window whose boundary is at or before `now`
    ///
    /// The accumulator is swapped under the survey lock and each access is
    /// split at the boundary it crossed, so late rotation moves no time
    /// between windows.
    pub(crate) fn rotate_due(&self, now: u64) -> Vec<SurveySnapshot> {
        let mut position = self.position.lock();
        let mut closed = Vec::new();
        while !self.core.is_disposed() && now >= position.start.saturating_add(self.period_ticks) {
            let boundary = position.start + self.period_ticks;
            let records = self.core.rotate(boundary);
            let bounds = WindowBounds {
                index: position.index,
                start_ticks: position.start,
                end_ticks: boundary,
                closed_at: self.core.clock().utc_now(),
            };
            tracing::debug!(
                "Window {} of '{}' closed with {} records",
                bounds.index,
                self.core.scope_name(),
                records.len()
            );
            let snapshot =
                SurveySnapshot::new(self.core.scope_name().to_string(), boundary, Some(bounds), records);
            *self.last.lock() = Some(snapshot.clone());
            position.index += 1;
            position.start = boundary;
            closed.push(snapshot);
        }
        closed
    }

    fn last(&self) -> Option<SurveySnapshot> {
        self.last.lock().clone()
    }

    fn current_index(&self) -> u64 {
        self.position.lock().index
    }
}

impl fmt::Debug for WindowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowState")
            .field("scope_name", &self.core.scope_name())
            .field("period", &self.period)
            .field("position", &*self.position.lock())
            .finish_non_exhaustive()
    }
}

/// Accumulates every access and reports it one window at a time
///
/// Queries read the most recently closed window, never the live
/// accumulator. Before the first window closes they return nothing.
#[derive(Debug)]
pub struct TimeWindowSurveyor {
    registration: Registration,
    window: Arc<WindowState>,
}

impl TimeWindowSurveyor {
    pub(crate) fn new(registration: Registration, window: Arc<WindowState>) -> Self {
        Self {
            registration,
            window,
        }
    }

    pub fn period(&self) -> Duration {
        self.window.period
    }

    /// The most recently closed window
    pub fn last_snapshot(&self) -> Option<SurveySnapshot> {
        self.window.last()
    }

    /// Index of the window currently accumulating
    pub fn current_window_index(&self) -> u64 {
        self.window.current_index()
    }
}

impl Surveyor for TimeWindowSurveyor {
    fn scope_name(&self) -> &str {
        self.registration.core().scope_name()
    }

    fn bottleneck_entered(&self, accessor: &Accessor) {
        self.registration.entered(accessor);
    }

    fn bottleneck_exited(&self, accessor: &Accessor) {
        self.registration.exited(accessor);
    }

    fn snapshot(&self) -> SurveySnapshot {
        self.window.last().unwrap_or_else(|| {
            SurveySnapshot::new(
                self.scope_name().to_string(),
                self.registration.core().clock().ticks(),
                None,
                Vec::new(),
            )
        })
    }

    fn dispose(&self) -> Result<()> {
        self.registration.release();
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.registration.core().is_disposed()
    }
}

impl Drop for TimeWindowSurveyor {
    fn drop(&mut self) {
        self.registration.release();
    }
}
