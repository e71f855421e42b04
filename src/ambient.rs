//! Ambient service resolution
//!
//! Instrumented code calls [`Bottleneck::enter`](crate::bottleneck::Bottleneck::enter)
//! without passing anything around, so the detector, clock and settings are
//! resolved in three tiers:
//!
//! 1. explicit [`Services`] handed to an `*_with` call
//! 2. the value installed for the current task by [`scope`] or [`sync_scope`]
//! 3. the process default from [`set_process_default`]
//!
//! When none is set the built-in fallback applies: no detector (every access
//! goes unobserved), the shared [`SystemClock`] and [`NoSettings`].

use crate::clock::{Clock, SystemClock};
use crate::detector::Detector;
use crate::settings::{NoSettings, Settings};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::{Arc, OnceLock};

tokio::task_local! {
    static SCOPED: Services;
}

static PROCESS_DEFAULT: RwLock<Option<Services>> = parking_lot::const_rwlock(None);

fn system_clock() -> Arc<dyn Clock> {
    static CLOCK: OnceLock<Arc<SystemClock>> = OnceLock::new();
    CLOCK.get_or_init(|| Arc::new(SystemClock::new())).clone()
}

/// The collaborators an access or coordinator runs against
#[derive(Debug, Clone)]
pub struct Services {
    detector: Option<Arc<Detector>>,
    clock: Arc<dyn Clock>,
    settings: Arc<dyn Settings>,
}

impl Services {
    /// No detector, the shared system clock and no settings
    pub fn new() -> Self {
        Self {
            detector: None,
            clock: system_clock(),
            settings: Arc::new(NoSettings),
        }
    }

    pub fn with_detector(mut self, detector: Arc<Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn without_detector(mut self) -> Self {
        self.detector = None;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn Settings>) -> Self {
        self.settings = settings;
        self
    }

    pub fn detector(&self) -> Option<&Arc<Detector>> {
        self.detector.as_ref()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &Arc<dyn Settings> {
        &self.settings
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}

/// Services for the current task, falling back to the process default
pub fn current() -> Services {
    SCOPED
        .try_with(Services::clone)
        .ok()
        .or_else(|| PROCESS_DEFAULT.read().clone())
        .unwrap_or_default()
}

/// Explicit services if given, otherwise [`current`]
pub fn resolve(explicit: Option<&Services>) -> Services {
    explicit.cloned().unwrap_or_else(current)
}

/// Run `future` with `services` as the scoped value
pub async fn scope<F: Future>(services: Services, future: F) -> F::Output {
    SCOPED.scope(services, future).await
}

/// Run `f` synchronously with `services` as the scoped value
pub fn sync_scope<R>(services: Services, f: impl FnOnce() -> R) -> R {
    SCOPED.sync_scope(services, f)
}

/// Install the process-wide default
pub fn set_process_default(services: Services) {
    *PROCESS_DEFAULT.write() = Some(services);
}

/// Remove the process-wide default
pub fn clear_process_default() {
    *PROCESS_DEFAULT.write() = None;
}
