//! Bottleneck definitions
//!
//! A bottleneck is a named contention point with an optional capacity. The
//! definition is immutable and cheap to clone; all clones refer to the same
//! shared definition.
//!
//! # Example
//!
//! ```
//! use bottleneck_survey::bottleneck::{Bottleneck, UtilizationAlgorithm};
//! use std::time::Duration;
//!
//! let pool = Bottleneck::with_limit(
//!     "db.pool",
//!     UtilizationAlgorithm::Linear,
//!     false,
//!     "Connection pool checkouts",
//!     Some(50.0),
//!     Some(Duration::from_secs(1)),
//! )?;
//!
//! let access = pool.enter();
//! access.add_usage(1, 1.0)?;
//! access.dispose();
//! # Ok::<(), bottleneck_survey::error::SurveyError>(())
//! ```

use crate::accessor::Accessor;
use crate::ambient::{self, Services};
use crate::error::{Result, SurveyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How raw usage is turned into a utilization score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UtilizationAlgorithm {
    /// Always 0: presence-only tracking
    Zero,
    /// Usage rate projected over one limit period, divided by the limit
    Linear,
    /// `e^linear - 1`: agrees with Linear at 0 and grows faster near and past capacity
    ExponentialLimitApproach,
}

impl UtilizationAlgorithm {
    /// Map a linear utilization onto this algorithm's curve
    pub fn apply(self, linear: f64) -> f64 {
        match self {
            Self::Zero => 0.0,
            Self::Linear => linear,
            Self::ExponentialLimitApproach => linear.exp_m1(),
        }
    }
}

impl fmt::Display for UtilizationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => write!(f, "Zero"),
            Self::Linear => write!(f, "Linear"),
            Self::ExponentialLimitApproach => write!(f, "ExponentialLimitApproach"),
        }
    }
}

#[derive(Debug)]
struct Definition {
    id: String,
    description: String,
    algorithm: UtilizationAlgorithm,
    auto_detect: bool,
    limit: Option<f64>,
    limit_period: Option<Duration>,
}

/// A named contention point being measured
#[derive(Debug, Clone)]
pub struct Bottleneck {
    inner: Arc<Definition>,
}

impl Bottleneck {
    /// Create an unlimited bottleneck (its utilization is always 0)
    pub fn new(
        id: impl Into<String>,
        algorithm: UtilizationAlgorithm,
        auto_detect: bool,
        description: impl Into<String>,
    ) -> Self {
        Self::build(id.into(), algorithm, auto_detect, description.into(), None, None)
    }

    /// Create a bottleneck with a capacity of `limit` usage per `limit_period`
    ///
    /// For auto-detect bottlenecks usage is measured in clock ticks, so a
    /// limit equal to the tick count of `limit_period` means "held 100% of
    /// the time".
    ///
    /// # Errors
    /// [`SurveyError::LimitOutOfRange`] if `limit` is negative or NaN.
    pub fn with_limit(
        id: impl Into<String>,
        algorithm: UtilizationAlgorithm,
        auto_detect: bool,
        description: impl Into<String>,
        limit: Option<f64>,
        limit_period: Option<Duration>,
    ) -> Result<Self> {
        if let Some(limit) = limit {
            if limit.is_nan() || limit < 0.0 {
                return Err(SurveyError::LimitOutOfRange(limit));
            }
        }
        Ok(Self::build(
            id.into(),
            algorithm,
            auto_detect,
            description.into(),
            limit,
            limit_period,
        ))
    }

    fn build(
        id: String,
        algorithm: UtilizationAlgorithm,
        auto_detect: bool,
        description: String,
        limit: Option<f64>,
        limit_period: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Definition {
                id,
                description,
                algorithm,
                auto_detect,
                limit,
                limit_period,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn algorithm(&self) -> UtilizationAlgorithm {
        self.inner.algorithm
    }

    /// Whether usage is derived from time spent inside the access
    pub fn auto_detect(&self) -> bool {
        self.inner.auto_detect
    }

    pub fn limit(&self) -> Option<f64> {
        self.inner.limit
    }

    pub fn limit_period(&self) -> Option<Duration> {
        self.inner.limit_period
    }

    /// Begin an access using the ambient services
    ///
    /// Never blocks and never fails. Without an ambient detector the access
    /// still works but no surveyor observes it.
    pub fn enter(&self) -> Accessor {
        self.enter_with(&ambient::current())
    }

    /// Begin an access using explicit services
    pub fn enter_with(&self, services: &Services) -> Accessor {
        Accessor::open(self.clone(), services)
    }
}

impl PartialEq for Bottleneck {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.id == other.inner.id
    }
}

impl Eq for Bottleneck {}

impl fmt::Display for Bottleneck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.id)
    }
}
