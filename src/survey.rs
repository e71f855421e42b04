//! Scoped survey records and ranked snapshots
//!
//! [`Survey`] is the per-surveyor accumulator: one running [`AccessRecord`]
//! per bottleneck, plus the accesses that are still open. [`SurveySnapshot`]
//! is the immutable, ranked view handed out to callers.

use crate::accessor::{AccessRecord, AccessState, Attribution};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug)]
struct OpenAccess {
    state: Arc<AccessState>,
    attributed: Attribution,
}

/// Running per-bottleneck records for one surveyor
///
/// A windowed survey keeps closed accesses until the window rotates, so an
/// access is split at the boundary it actually crossed rather than at the
/// moment rotation happens to run.
#[derive(Debug, Default)]
pub(crate) struct Survey {
    records: HashMap<String, AccessRecord>,
    open: HashMap<u64, OpenAccess>,
    window_start: Option<u64>,
}

impl Survey {
    /// Survey for a time window accumulating from `start`
    pub(crate) fn windowed(start: u64) -> Self {
        Self {
            window_start: Some(start),
            ..Self::default()
        }
    }

    pub(crate) fn window_start(&self) -> Option<u64> {
        self.window_start
    }

    /// Nothing before the current window is attributed to it
    fn starting_point(&self, access: &AccessState) -> Attribution {
        let begin = access.begin();
        Attribution::starting_at(self.window_start.map_or(begin, |start| begin.max(start)))
    }

    pub(crate) fn entered(&mut self, access: &Arc<AccessState>) {
        let attributed = self.starting_point(access);
        self.open.entry(access.id()).or_insert_with(|| OpenAccess {
            state: Arc::clone(access),
            attributed,
        });
    }

    /// Fold a closed access into its bottleneck's record
    ///
    /// Accesses that were already open when this surveyor started are folded
    /// from their own begin. A windowed survey only marks the access for the
    /// next rotation.
    pub(crate) fn exited(&mut self, access: &Arc<AccessState>, now: u64) {
        if self.window_start.is_some() {
            self.entered(access);
            return;
        }
        let attributed = self
            .open
            .remove(&access.id())
            .map(|open| open.attributed)
            .unwrap_or_else(|| self.starting_point(access));
        let record = access.record_since(attributed, now);
        if !record.is_empty() {
            fold(&mut self.records, record);
        }
    }

    /// Closed records plus open accesses measured up to `now`
    pub(crate) fn records_at(&self, now: u64) -> Vec<AccessRecord> {
        let mut records = self.records.clone();
        for open in self.open.values() {
            fold(&mut records, open.state.record_since(open.attributed, now));
        }
        records.into_values().collect()
    }

    /// Close the current window at `boundary` and start an empty one
    ///
    /// Accesses open at the boundary are included as in-progress records
    /// truncated there. Accesses beginning at or after the boundary wait for
    /// a later window.
    pub(crate) fn rotate(&mut self, boundary: u64) -> Vec<AccessRecord> {
        let mut closed = std::mem::take(&mut self.records);
        self.open.retain(|_, open| {
            let (record, next) = open.state.split_at(open.attributed, boundary);
            if let Some(record) = record.filter(|record| !record.is_empty()) {
                fold(&mut closed, record);
            }
            match next {
                Some(attributed) => {
                    open.attributed = attributed;
                    true
                }
                None => false,
            }
        });
        if self.window_start.is_some() {
            self.window_start = Some(boundary);
        }
        closed.into_values().collect()
    }

    pub(crate) fn is_tracking(&self, access_id: u64) -> bool {
        self.open.contains_key(&access_id)
    }

    pub(crate) fn open_count(&self) -> usize {
        self.open.len()
    }
}

fn fold(records: &mut HashMap<String, AccessRecord>, record: AccessRecord) {
    match records.entry(record.bottleneck().id().to_string()) {
        Entry::Occupied(mut existing) => {
            let merged = existing.get().merged_with(&record);
            existing.insert(merged);
        }
        Entry::Vacant(slot) => {
            slot.insert(record);
        }
    }
}

/// Bounds of a closed time window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBounds {
    /// Zero-based window number
    pub index: u64,
    /// First tick of the window
    pub start_ticks: u64,
    /// Tick at which the window closed
    pub end_ticks: u64,
    /// UTC time the window was closed
    pub closed_at: SystemTime,
}

/// Immutable ranked view of a surveyor's records
#[derive(Debug, Clone)]
pub struct SurveySnapshot {
    scope_name: String,
    taken_at_ticks: u64,
    window: Option<WindowBounds>,
    records: Vec<AccessRecord>,
}

impl SurveySnapshot {
    pub(crate) fn new(
        scope_name: impl Into<String>,
        taken_at_ticks: u64,
        window: Option<WindowBounds>,
        mut records: Vec<AccessRecord>,
    ) -> Self {
        records.sort_by(|a, b| {
            b.compare(a)
                .then_with(|| a.bottleneck().id().cmp(b.bottleneck().id()))
        });
        Self {
            scope_name: scope_name.into(),
            taken_at_ticks,
            window,
            records,
        }
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn taken_at_ticks(&self) -> u64 {
        self.taken_at_ticks
    }

    /// Window bounds, for snapshots emitted by a time window surveyor
    pub fn window(&self) -> Option<&WindowBounds> {
        self.window.as_ref()
    }

    /// All records, most utilized first
    pub fn records(&self) -> &[AccessRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record for a specific bottleneck
    pub fn get(&self, bottleneck_id: &str) -> Option<&AccessRecord> {
        self.records
            .iter()
            .find(|record| record.bottleneck().id() == bottleneck_id)
    }

    pub fn most_utilized_bottleneck(&self) -> Option<&AccessRecord> {
        self.records.first()
    }

    /// Up to `n` records, most utilized first, one per bottleneck
    pub fn most_utilized_bottlenecks(&self, n: usize) -> &[AccessRecord] {
        &self.records[..n.min(self.records.len())]
    }
}
