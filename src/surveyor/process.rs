use super::{Registration, Surveyor};
use crate::accessor::Accessor;
use crate::error::Result;
use crate::survey::SurveySnapshot;

/// Scope name used when none is given
pub(crate) const DEFAULT_SCOPE_NAME: &str = "Process";

/// Observes every access in the process and never resets
#[derive(Debug)]
pub struct ProcessSurveyor {
    registration: Registration,
}

impl ProcessSurveyor {
    pub(crate) fn new(registration: Registration) -> Self {
        Self { registration }
    }
}

impl Surveyor for ProcessSurveyor {
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

impl Drop for ProcessSurveyor {
    fn drop(&mut self) {
        self.registration.release();
    }
}
