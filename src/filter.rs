//! Bottleneck filtering for surveyors
//!
//! Each surveyor decides per bottleneck id whether to track it at all:
//! - block pattern matches: never tracked (block wins over allow)
//! - allow pattern present: tracked only if it matches
//! - neither: everything is tracked
//!
//! Patterns are unanchored regular expressions, so `Linear` matches
//! `db.Linear.pool`. Patterns not given explicitly fall back to the
//! coordinator defaults from settings.

use crate::error::{Result, SurveyError};
use crate::settings::{default_allow_key, default_block_key, Settings};
use regex::Regex;

/// Allow/block regex pair applied to bottleneck ids
#[derive(Debug, Clone, Default)]
pub struct BottleneckFilter {
    allow: Option<Regex>,
    block: Option<Regex>,
}

impl BottleneckFilter {
    /// A filter that tracks every bottleneck
    pub fn all() -> Self {
        Self::default()
    }

    /// Compile explicit patterns
    pub fn new(allow: Option<&str>, block: Option<&str>) -> Result<Self> {
        Ok(Self {
            allow: compile("allow", allow)?,
            block: compile("block", block)?,
        })
    }

    /// Compile explicit patterns, filling gaps from configured defaults
    ///
    /// An explicit pattern that fails to compile is an error. A configured
    /// default that fails to compile is logged and ignored.
    pub fn resolve(
        allow: Option<&str>,
        block: Option<&str>,
        settings: &dyn Settings,
    ) -> Result<Self> {
        Ok(Self {
            allow: match allow {
                Some(pattern) => compile("allow", Some(pattern))?,
                None => configured(&default_allow_key(), settings),
            },
            block: match block {
                Some(pattern) => compile("block", Some(pattern))?,
                None => configured(&default_block_key(), settings),
            },
        })
    }

    /// Check if a bottleneck should be tracked
    pub fn should_track(&self, bottleneck_id: &str) -> bool {
        if let Some(block) = &self.block {
            if block.is_match(bottleneck_id) {
                return false;
            }
        }
        match &self.allow {
            None => true,
            Some(allow) => allow.is_match(bottleneck_id),
        }
    }
}

fn compile(key: &str, pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|source| SurveyError::InvalidPattern {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
}

fn configured(key: &str, settings: &dyn Settings) -> Option<Regex> {
    let pattern = settings.get(key).filter(|p| !p.is_empty())?;
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!("Ignoring invalid default pattern {}={:?}: {}", key, pattern, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MapSettings, NoSettings};

    #[test]
    fn test_filter_all_tracks_everything() {
        let filter = BottleneckFilter::all();
        assert!(filter.should_track("lock"));
        assert!(filter.should_track("anything"));
    }

    #[test]
    fn test_allow_only() {
        let filter = BottleneckFilter::new(Some("^db\\."), None).unwrap();
        assert!(filter.should_track("db.pool"));
        assert!(!filter.should_track("disk"));
    }

    #[test]
    fn test_block_only() {
        let filter = BottleneckFilter::new(None, Some("replica")).unwrap();
        assert!(filter.should_track("db.primary"));
        assert!(!filter.should_track("db.replica"));
    }

    #[test]
    fn test_block_wins_over_allow() {
        let filter = BottleneckFilter::new(Some(".*(Zero|Linear).*"), Some(".*Linear.*")).unwrap();
        assert!(filter.should_track("TestZero"));
        assert!(!filter.should_track("TestLinear"));
        assert!(!filter.should_track("TestExponential"));
    }

    #[test]
    fn test_invalid_explicit_pattern() {
        let err = BottleneckFilter::new(Some("("), None).unwrap_err();
        assert!(matches!(err, SurveyError::InvalidPattern { ref key, .. } if key == "allow"));
    }

    #[test]
    fn test_resolve_falls_back_to_settings() {
        let settings = MapSettings::new()
            .with(default_allow_key(), "^svc")
            .with(default_block_key(), "slow");
        let filter = BottleneckFilter::resolve(None, None, &settings).unwrap();
        assert!(filter.should_track("svc.fast"));
        assert!(!filter.should_track("svc.slow"));
        assert!(!filter.should_track("other"));
    }

    #[test]
    fn test_resolve_explicit_beats_settings() {
        let settings = MapSettings::new().with(default_block_key(), "svc");
        let filter = BottleneckFilter::resolve(None, Some("nothing-matches-this"), &settings).unwrap();
        assert!(filter.should_track("svc.fast"));
    }

    #[test]
    fn test_resolve_ignores_bad_default() {
        let settings = MapSettings::new().with(default_block_key(), "(");
        let filter = BottleneckFilter::resolve(None, None, &settings).unwrap();
        assert!(filter.should_track("anything"));
    }

    #[test]
    fn test_resolve_without_settings() {
        let filter = BottleneckFilter::resolve(None, None, &NoSettings).unwrap();
        assert!(filter.should_track("anything"));
    }
}
