//! Rendering survey snapshots as text tables or JSON

use crate::survey::SurveySnapshot;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One ranked bottleneck in a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Bottleneck id (e.g., "db.pool")
    pub bottleneck: String,
    pub description: String,
    pub utilization: f64,
    pub limit_used: f64,
    pub access_count: u64,
    /// Merged interval length in microseconds
    pub duration_us: u64,
    /// True while any folded access is still open
    pub in_progress: bool,
}

/// Top-N view of one surveyor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyReport {
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_index: Option<u64>,
    pub entries: Vec<ReportEntry>,
}

impl SurveyReport {
    /// Build a report of the `top` most utilized bottlenecks
    pub fn from_snapshot(snapshot: &SurveySnapshot, top: usize) -> Self {
        let entries = snapshot
            .most_utilized_bottlenecks(top)
            .iter()
            .map(|record| ReportEntry {
                bottleneck: record.bottleneck().id().to_string(),
                description: record.bottleneck().description().to_string(),
                utilization: record.utilization(),
                limit_used: record.limit_used(),
                access_count: record.access_count(),
                duration_us: u64::try_from(record.access_duration().as_micros())
                    .unwrap_or(u64::MAX),
                in_progress: record.is_in_progress(),
            })
            .collect();
        Self {
            scope: snapshot.scope_name().to_string(),
            window_index: snapshot.window().map(|w| w.index),
            entries,
        }
    }

    /// Human-readable table
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let title = match self.window_index {
            Some(index) => format!("{} (window {})", self.scope, index),
            None => self.scope.clone(),
        };
        let _ = writeln!(out, "=== {} ===", title);
        if self.entries.is_empty() {
            let _ = writeln!(out, "No bottleneck activity recorded.");
            return out;
        }
        let _ = writeln!(
            out,
            "{:<32} {:>12} {:>14} {:>8} {:>14}",
            "Bottleneck", "Utilization", "Limit Used", "Count", "Duration"
        );
        let _ = writeln!(out, "{}", "─".repeat(84));
        for entry in &self.entries {
            let marker = if entry.in_progress { "*" } else { "" };
            let _ = writeln!(
                out,
                "{:<32} {:>12.4} {:>14.1} {:>8} {:>12.6}s{}",
                entry.bottleneck,
                entry.utilization,
                entry.limit_used,
                entry.access_count,
                entry.duration_us as f64 / 1_000_000.0,
                marker
            );
        }
        let _ = writeln!(out, "{}", "─".repeat(84));
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
