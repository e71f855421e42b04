//! Surveyors: scoped observers of bottleneck accesses
//!
//! All four flavors share one accumulator and differ only in which events
//! fall inside their scope:
//!
//! | Flavor | Observes |
//! |--------|----------|
//! | [`ProcessSurveyor`] | every access in the process, for its whole life |
//! | [`ThreadSurveyor`] | accesses made on the thread that created it |
//! | [`CallContextSurveyor`] | accesses made in the logical call chain that created it |
//! | [`TimeWindowSurveyor`] | every access, reported window by window |
//!
//! Surveyors are created by the [`Coordinator`](crate::coordinator::Coordinator)
//! and stop observing as soon as they are disposed (explicitly or on drop).

pub(crate) mod call_context;
pub(crate) mod process;
pub(crate) mod thread;
pub(crate) mod time_window;

pub use call_context::CallContextSurveyor;
pub use process::ProcessSurveyor;
pub use thread::ThreadSurveyor;
pub use time_window::TimeWindowSurveyor;

pub(crate) use time_window::{WindowCallback, WindowState};

use crate::accessor::{AccessRecord, AccessState, Accessor};
use crate::call_context::CallChain;
use crate::clock::Clock;
use crate::detector::Detector;
use crate::error::Result;
use crate::filter::BottleneckFilter;
use crate::survey::{Survey, SurveySnapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

static NEXT_SURVEYOR_ID: AtomicU64 = AtomicU64::new(1);

/// Capability surface shared by every surveyor flavor
pub trait Surveyor: Send + Sync {
    /// Human-readable name of the scope
    fn scope_name(&self) -> &str;

    /// Feed an enter event directly, bypassing the scope check
    fn bottleneck_entered(&self, accessor: &Accessor);

    /// Feed an exit event directly, bypassing the scope check
    fn bottleneck_exited(&self, accessor: &Accessor);

    /// Ranked view of the accumulated records
    fn snapshot(&self) -> SurveySnapshot;

    fn most_utilized_bottleneck(&self) -> Option<AccessRecord> {
        self.snapshot().most_utilized_bottleneck().cloned()
    }

    /// Up to `n` records, most utilized first, one per bottleneck
    fn most_utilized_bottlenecks(&self, n: usize) -> Vec<AccessRecord> {
        self.snapshot().most_utilized_bottlenecks(n).to_vec()
    }

    /// Stop observing; calling it again does nothing
    fn dispose(&self) -> Result<()>;

    fn is_disposed(&self) -> bool;
}

/// Optional scope name and filter overrides for a new surveyor
#[derive(Debug, Clone, Default)]
pub struct SurveyorOptions {
    pub scope_name: Option<String>,
    pub allow: Option<String>,
    pub block: Option<String>,
}

impl SurveyorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope_name(mut self, name: impl Into<String>) -> Self {
        self.scope_name = Some(name.into());
        self
    }

    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allow = Some(pattern.into());
        self
    }

    pub fn block(mut self, pattern: impl Into<String>) -> Self {
        self.block = Some(pattern.into());
        self
    }
}

#[derive(Debug)]
pub(crate) enum Scope {
    Process,
    Thread(ThreadId),
    CallContext(Arc<CallChain>),
    TimeWindow,
}

/// Shared state of one surveyor, registered with the detector
#[derive(Debug)]
pub(crate) struct SurveyorCore {
    id: u64,
    scope_name: String,
    scope: Scope,
    filter: BottleneckFilter,
    clock: Arc<dyn Clock>,
    survey: Mutex<Survey>,
    disposed: AtomicBool,
}

impl SurveyorCore {
    pub(crate) fn new(
        scope_name: String,
        scope: Scope,
        filter: BottleneckFilter,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let survey = match &scope {
            Scope::TimeWindow => Survey::windowed(clock.ticks()),
            _ => Survey::default(),
        };
        Arc::new(Self {
            id: NEXT_SURVEYOR_ID.fetch_add(1, Ordering::Relaxed),
            scope_name,
            scope,
            filter,
            clock,
            survey: Mutex::new(survey),
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether an event from `thread` in `chain` falls inside this scope
    pub(crate) fn observes(&self, thread: ThreadId, chain: &CallChain) -> bool {
        if self.is_disposed() {
            return false;
        }
        match &self.scope {
            Scope::Process | Scope::TimeWindow => true,
            Scope::Thread(owner) => *owner == thread,
            Scope::CallContext(_) => chain.contains(self.id),
        }
    }

    pub(crate) fn is_tracking(&self, access_id: u64) -> bool {
        self.survey.lock().is_tracking(access_id)
    }

    pub(crate) fn entered(&self, access: &Arc<AccessState>) {
        if self.accepts(access) {
            self.survey.lock().entered(access);
        }
    }

    pub(crate) fn exited(&self, access: &Arc<AccessState>) {
        if self.accepts(access) {
            let now = self.clock.ticks();
            self.survey.lock().exited(access, now);
        }
    }

    fn accepts(&self, access: &AccessState) -> bool {
        !self.is_disposed() && self.filter.should_track(access.bottleneck().id())
    }

    /// Live view including accesses still open
    pub(crate) fn snapshot(&self) -> SurveySnapshot {
        let now = self.clock.ticks();
        let records = self.survey.lock().records_at(now);
        SurveySnapshot::new(self.scope_name.clone(), now, None, records)
    }

    /// First tick of the window accumulating, for time window scopes
    pub(crate) fn window_start(&self) -> Option<u64> {
        self.survey.lock().window_start()
    }

    pub(crate) fn rotate(&self, boundary: u64) -> Vec<AccessRecord> {
        self.survey.lock().rotate(boundary)
    }

    /// Returns true only for the call that actually disposed
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Detach from any call chain this surveyor was pushed onto
    pub(crate) fn retire(&self) {
        if let Scope::CallContext(chain) = &self.scope {
            chain.remove(self.id);
        }
    }
}

/// A surveyor's registration with its coordinator's detector
#[derive(Debug)]
pub(crate) struct Registration {
    core: Arc<SurveyorCore>,
    detector: Arc<Detector>,
}

impl Registration {
    pub(crate) fn new(core: Arc<SurveyorCore>, detector: Arc<Detector>) -> Self {
        Self { core, detector }
    }

    pub(crate) fn core(&self) -> &Arc<SurveyorCore> {
        &self.core
    }

    /// Unregister and mark disposed; false if already disposed
    pub(crate) fn release(&self) -> bool {
        if !self.core.mark_disposed() {
            return false;
        }
        self.detector.unregister(self.core.id());
        self.core.retire();
        tracing::debug!("Surveyor '{}' disposed", self.core.scope_name());
        true
    }

    pub(crate) fn entered(&self, accessor: &Accessor) {
        self.core.entered(accessor.state());
    }

    pub(crate) fn exited(&self, accessor: &Accessor) {
        self.core.exited(accessor.state());
    }
}

#[cfg(test)]
mod tests;
