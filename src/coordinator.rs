//! Surveyor factory and lifetime manager
//!
//! A coordinator owns one [`Detector`] and every surveyor created through it
//! is registered there until disposed. Time window rotation is driven by the
//! coordinator's clock: call [`Coordinator::rotate_due_windows`] after
//! skipping a [`ManualClock`](crate::clock::ManualClock) forward, or let
//! [`Coordinator::spawn_window_scheduler`] poll it on a tokio interval.
//!
//! # Example
//!
//! ```
//! use bottleneck_survey::ambient;
//! use bottleneck_survey::bottleneck::{Bottleneck, UtilizationAlgorithm};
//! use bottleneck_survey::coordinator::Coordinator;
//! use bottleneck_survey::surveyor::{Surveyor, SurveyorOptions};
//!
//! let coordinator = Coordinator::default();
//! let surveyor = coordinator.create_process_surveyor(SurveyorOptions::new())?;
//! let lock = Bottleneck::new("cache.lock", UtilizationAlgorithm::Linear, true, "");
//!
//! ambient::sync_scope(coordinator.services(), || {
//!     let _access = lock.enter();
//! });
//!
//! let top = surveyor.most_utilized_bottleneck().unwrap();
//! assert_eq!(top.bottleneck().id(), "cache.lock");
//! # Ok::<(), bottleneck_survey::error::SurveyError>(())
//! ```

use crate::ambient::Services;
use crate::call_context;
use crate::clock::Clock;
use crate::detector::Detector;
use crate::error::{Result, SurveyError};
use crate::filter::BottleneckFilter;
use crate::survey::SurveySnapshot;
use crate::surveyor::{
    self, CallContextSurveyor, ProcessSurveyor, Registration, Scope, SurveyorCore,
    SurveyorOptions, ThreadSurveyor, TimeWindowSurveyor, WindowCallback, WindowState,
};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Creates surveyors and owns their registration
#[derive(Debug)]
pub struct Coordinator {
    services: Services,
    detector: Arc<Detector>,
    windows: Mutex<Vec<Arc<WindowState>>>,
    disposed: AtomicBool,
}

impl Coordinator {
    /// Create a coordinator with its own detector, using the clock and
    /// settings of `services`
    pub fn new(services: Services) -> Self {
        let detector = Arc::new(Detector::new());
        Self {
            services: services.with_detector(Arc::clone(&detector)),
            detector,
            windows: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Create a coordinator running on `clock` with no settings
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new(Services::new().with_clock(clock))
    }

    /// Services carrying this coordinator's detector, for
    /// [`ambient::scope`](crate::ambient::scope) or as process default
    pub fn services(&self) -> Services {
        self.services.clone()
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    /// Number of surveyors still registered
    pub fn active_surveyors(&self) -> usize {
        self.detector.surveyor_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn create_process_surveyor(&self, options: SurveyorOptions) -> Result<ProcessSurveyor> {
        let name = options
            .scope_name
            .clone()
            .unwrap_or_else(|| surveyor::process::DEFAULT_SCOPE_NAME.to_string());
        let registration = self.register(name, Scope::Process, &options)?;
        Ok(ProcessSurveyor::new(registration))
    }

    /// Create a surveyor bound to the calling thread
    pub fn create_thread_surveyor(&self, options: SurveyorOptions) -> Result<ThreadSurveyor> {
        let name = options
            .scope_name
            .clone()
            .unwrap_or_else(surveyor::thread::default_scope_name);
        let scope = Scope::Thread(std::thread::current().id());
        let registration = self.register(name, scope, &options)?;
        Ok(ThreadSurveyor::new(registration))
    }

    /// Create a surveyor bound to the caller's logical call chain
    ///
    /// Without a scope name the caller's `file:line` is used.
    ///
    /// In async code call this inside [`call_context::scope`] or
    /// [`call_context::fork_scope`]. Outside them the chain belongs to the OS
    /// thread, so tasks sharing a worker thread see each other's accesses and
    /// work resumed on another worker is missed.
    #[track_caller]
    pub fn create_call_context_surveyor(
        &self,
        options: SurveyorOptions,
    ) -> Result<CallContextSurveyor> {
        let location = Location::caller();
        let name = options
            .scope_name
            .clone()
            .unwrap_or_else(|| surveyor::call_context::default_scope_name(location));
        let chain = call_context::current();
        let registration = self.register(name, Scope::CallContext(Arc::clone(&chain)), &options)?;
        let core = registration.core();
        if !core.is_disposed() {
            chain.push(core.id(), core.scope_name());
        }
        Ok(CallContextSurveyor::new(registration))
    }

    /// Create a surveyor that reports every `period` to `on_window_closed`
    ///
    /// # Errors
    /// [`SurveyError::InvalidWindowPeriod`] for a zero period, or an invalid
    /// filter pattern.
    pub fn create_time_window_surveyor<F, Fut>(
        &self,
        period: Duration,
        on_window_closed: F,
        options: SurveyorOptions,
    ) -> Result<TimeWindowSurveyor>
    where
        F: Fn(SurveySnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(SurveyError::InvalidWindowPeriod);
        }
        let name = options
            .scope_name
            .clone()
            .unwrap_or_else(|| surveyor::time_window::default_scope_name(period));
        let registration = self.register(name, Scope::TimeWindow, &options)?;
        let callback: WindowCallback = Arc::new(
            move |snapshot| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(on_window_closed(snapshot))
            },
        );
        let window = Arc::new(WindowState::new(
            Arc::clone(registration.core()),
            period,
            callback,
        ));
        if !registration.core().is_disposed() {
            self.windows.lock().push(Arc::clone(&window));
        }
        Ok(TimeWindowSurveyor::new(registration, window))
    }

    fn register(&self, scope_name: String, scope: Scope, options: &SurveyorOptions) -> Result<Registration> {
        let filter = BottleneckFilter::resolve(
            options.allow.as_deref(),
            options.block.as_deref(),
            self.services.settings().as_ref(),
        )?;
        let core = SurveyorCore::new(scope_name, scope, filter, Arc::clone(self.services.clock()));
        if self.is_disposed() {
            core.mark_disposed();
            tracing::debug!("Coordinator disposed; surveyor '{}' will not observe", core.scope_name());
        } else {
            self.detector.register(Arc::clone(&core));
            if self.is_disposed() {
                self.detector.unregister(core.id());
                core.mark_disposed();
            } else {
                tracing::debug!("Surveyor '{}' created", core.scope_name());
            }
        }
        Ok(Registration::new(core, Arc::clone(&self.detector)))
    }

    /// Close every time window whose boundary has passed and deliver the
    /// snapshots to their callbacks, returning how many were delivered
    ///
    /// A clock skipped forward by several periods yields one snapshot per
    /// elapsed window.
    pub async fn rotate_due_windows(&self) -> usize {
        let now = self.services.clock().ticks();
        let due: Vec<(WindowCallback, SurveySnapshot)> = {
            let mut windows = self.windows.lock();
            windows.retain(|window| !window.is_disposed());
            windows
                .iter()
                .flat_map(|window| {
                    window
                        .rotate_due(now)
                        .into_iter()
                        .map(move |snapshot| (window.callback(), snapshot))
                })
                .collect()
        };
        let delivered = due.len();
        for (callback, snapshot) in due {
            callback(snapshot).await;
        }
        delivered
    }

    /// Poll [`Coordinator::rotate_due_windows`] every `poll` on the current
    /// tokio runtime
    ///
    /// The task ends once the coordinator is disposed or dropped.
    pub fn spawn_window_scheduler(self: &Arc<Self>, poll: Duration) -> JoinHandle<()> {
        let coordinator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            loop {
                interval.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                if coordinator.is_disposed() {
                    break;
                }
                coordinator.rotate_due_windows().await;
            }
        })
    }

    /// Dispose every surveyor still registered; later calls do nothing
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let surveyors = self.detector.drain();
        for core in &surveyors {
            core.mark_disposed();
            core.retire();
        }
        self.windows.lock().clear();
        tracing::debug!("Coordinator disposed {} surveyors", surveyors.len());
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(Services::new())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}
