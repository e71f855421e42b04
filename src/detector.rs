//! Enter/exit fan-out to registered surveyors
//!
//! Notifications are delivered synchronously on the thread that entered or
//! exited the bottleneck. Each surveyor decides from the calling thread and
//! call chain whether the event is inside its scope.

use crate::accessor::Accessor;
use crate::call_context;
use crate::surveyor::SurveyorCore;
use parking_lot::RwLock;
use std::sync::Arc;

/// Event hub between bottleneck accesses and surveyors
#[derive(Debug, Default)]
pub struct Detector {
    surveyors: RwLock<Vec<Arc<SurveyorCore>>>,
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an enter event to every surveyor whose scope covers the caller
    pub fn bottleneck_entered(&self, accessor: &Accessor) {
        let chain = call_context::current();
        let thread = std::thread::current().id();
        for surveyor in self.surveyors.read().iter() {
            if surveyor.observes(thread, &chain) {
                surveyor.entered(accessor.state());
            }
        }
    }

    /// Deliver an exit event to every surveyor whose scope covers the caller
    /// or that saw the matching enter
    pub fn bottleneck_exited(&self, accessor: &Accessor) {
        let chain = call_context::current();
        let thread = std::thread::current().id();
        let access_id = accessor.state().id();
        for surveyor in self.surveyors.read().iter() {
            if surveyor.observes(thread, &chain) || surveyor.is_tracking(access_id) {
                surveyor.exited(accessor.state());
            }
        }
    }

    /// Number of registered surveyors
    pub fn surveyor_count(&self) -> usize {
        self.surveyors.read().len()
    }

    pub(crate) fn register(&self, surveyor: Arc<SurveyorCore>) {
        self.surveyors.write().push(surveyor);
    }

    pub(crate) fn unregister(&self, surveyor_id: u64) {
        self.surveyors.write().retain(|s| s.id() != surveyor_id);
    }

    /// Remove and return every registered surveyor
    pub(crate) fn drain(&self) -> Vec<Arc<SurveyorCore>> {
        std::mem::take(&mut *self.surveyors.write())
    }
}
