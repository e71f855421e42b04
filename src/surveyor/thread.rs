use super::{Registration, Scope, Surveyor};
use crate::accessor::Accessor;
use crate::error::Result;
use crate::survey::SurveySnapshot;
use std::thread::{self, ThreadId};

/// `Thread-<name>`, or `Thread-<id>` for unnamed threads
pub(crate) fn default_scope_name() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => format!("Thread-{name}"),
        None => {
            let id = format!("{:?}", current.id());
            let id = id.trim_start_matches("ThreadId(").trim_end_matches(')');
            format!("Thread-{id}")
        }
    }
}

/// Observes accesses made on the thread that created it
#[derive(Debug)]
pub struct ThreadSurveyor {
    registration: Registration,
}

impl ThreadSurveyor {
    pub(crate) fn new(registration: Registration) -> Self {
        Self { registration }
    }

    /// The thread this surveyor is bound to
    pub fn thread_id(&self) -> Option<ThreadId> {
        match self.registration.core().scope() {
            Scope::Thread(id) => Some(*id),
            _ => None,
        }
    }
}

impl Surveyor for ThreadSurveyor {
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
        self.registration.core().snapshot()
    }

    fn dispose(&self) -> Result<()> {
        self.registration.release();
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.registration.core().is_disposed()
    }
}

impl Drop for ThreadSurveyor {
    fn drop(&mut self) {
        self.registration.release();
    }
}
