use super::{Registration, Scope, Surveyor};
use crate::accessor::Accessor;
use crate::call_context::CallChain;
use crate::error::{Result, SurveyError};
use crate::survey::SurveySnapshot;
use std::panic::Location;
use std::sync::Arc;

/// `file:line` of the code that created the surveyor
pub(crate) fn default_scope_name(location: &Location<'_>) -> String {
    format!("{}:{}", location.file(), location.line())
}

/// Observes accesses made anywhere in the logical call chain that created it
///
/// Call-context surveyors nest: each one is pushed onto its chain when
/// created and must be disposed innermost first.
#[derive(Debug)]
pub struct CallContextSurveyor {
    registration: Registration,
}

impl CallContextSurveyor {
    pub(crate) fn new(registration: Registration) -> Self {
        Self { registration }
    }

    fn chain(&self) -> Option<&Arc<CallChain>> {
        match self.registration.core().scope() {
            Scope::CallContext(chain) => Some(chain),
            _ => None,
        }
    }
}

impl Surveyor for CallContextSurveyor {
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

    /// # Errors
    /// [`SurveyError::OutOfOrderDisposal`] while a surveyor created later in
    /// the same chain is still active. The surveyor stays active, so it can
    /// be disposed again once the inner one is gone.
    fn dispose(&self) -> Result<()> {
        let core = self.registration.core();
        if core.is_disposed() {
            return Ok(());
        }
        if let Some(chain) = self.chain() {
            chain
                .pop_if_top(core.id())
                .map_err(|top| SurveyError::OutOfOrderDisposal {
                    scope: core.scope_name().to_string(),
                    top,
                })?;
        }
        self.registration.release();
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.registration.core().is_disposed()
    }
}

impl Drop for CallContextSurveyor {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!("{}; releasing on drop", e);
            self.registration.release();
        }
    }
}
