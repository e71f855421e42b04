// Tests for surveyor scoping, filtering, disposal and time windows

use super::*;
use crate::ambient::Services;
use crate::bottleneck::{Bottleneck, UtilizationAlgorithm};
use crate::call_context as chain;
use crate::clock::ManualClock;
use crate::coordinator::Coordinator;
use crate::error::SurveyError;
use crate::settings::{default_allow_key, default_block_key, MapSettings};
use std::time::Duration;

fn manual_coordinator() -> (Arc<ManualClock>, Coordinator) {
    let clock = Arc::new(ManualClock::new());
    let coordinator = Coordinator::with_clock(clock.clone());
    (clock, coordinator)
}

fn timed(id: &str) -> Bottleneck {
    Bottleneck::with_limit(
        id,
        UtilizationAlgorithm::Linear,
        true,
        "",
        Some(1_000_000_000.0),
        Some(Duration::from_secs(1)),
    )
    .unwrap()
}

fn hold(bottleneck: &Bottleneck, services: &Services, clock: &ManualClock, millis: u64) {
    let _access = bottleneck.enter_with(services);
    clock.advance(Duration::from_millis(millis));
}

#[test]
fn test_process_surveyor_sees_every_thread() {
    let (clock, coordinator) = manual_coordinator();
    let surveyor = coordinator
        .create_process_surveyor(SurveyorOptions::new())
        .unwrap();
    assert_eq!(surveyor.scope_name(), "Process");

    let db = timed("db");
    let services = coordinator.services();
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| hold(&db, &services, &clock, 1));
        }
    });

    let top = surveyor.most_utilized_bottleneck().unwrap();
    assert_eq!(top.bottleneck().id(), "db");
    assert_eq!(top.access_count(), 4);
}

#[test]
fn test_thread_surveyor_ignores_other_threads() {
    let (clock, coordinator) = manual_coordinator();
    let surveyor = coordinator
        .create_thread_surveyor(SurveyorOptions::new())
        .unwrap();
    assert_eq!(surveyor.thread_id(), Some(std::thread::current().id()));

    let mine = timed("mine");
    let theirs = timed("theirs");
    let services = coordinator.services();
    hold(&mine, &services, &clock, 5);
    std::thread::scope(|s| {
        s.spawn(|| hold(&theirs, &services, &clock, 5));
    });

    let snapshot = surveyor.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.get("mine").is_some());
    assert!(snapshot.get("theirs").is_none());
}

#[test]
fn test_exit_on_another_thread_still_counts() {
    let (clock, coordinator) = manual_coordinator();
    let surveyor = coordinator
        .create_thread_surveyor(SurveyorOptions::new())
        .unwrap();
    let db = timed("db");

    let access = db.enter_with(&coordinator.services());
    clock.advance(Duration::from_millis(10));
    std::thread::spawn(move || drop(access)).join().unwrap();

    let record = surveyor.most_utilized_bottleneck().unwrap();
    assert_eq!(record.access_count(), 1);
    assert!(!record.is_in_progress());
}

#[test]
fn test_access_open_before_surveyor_is_folded_from_its_begin() {
    let (clock, coordinator) = manual_coordinator();
    let db = timed("db");

    let access = db.enter_with(&coordinator.services());
    clock.advance(Duration::from_millis(10));
    let surveyor = coordinator
        .create_process_surveyor(SurveyorOptions::new())
        .unwrap();
    clock.advance(Duration::from_millis(10));
    access.dispose();

    let record = surveyor.most_utilized_bottleneck().unwrap();
    assert_eq!(record.access_duration(), Duration::from_millis(20));
}

#[test]
fn test_live_snapshot_includes_open_access() {
    let (clock, coordinator) = manual_coordinator();
    let surveyor = coordinator
        .create_process_surveyor(SurveyorOptions::new())
        .unwrap();
    let db = timed("db");

    let _access = db.enter_with(&coordinator.services());
    clock.advance(Duration::from_millis(30));

    let record = surveyor.most_utilized_bottleneck().unwrap();
    assert!(record.is_in_progress());
    assert_eq!(record.access_duration(), Duration::from_millis(30));
}

#[test]
fn test_call_context_surveyor_scoping() {
    let (clock, coordinator) = manual_coordinator();
    let services = coordinator.services();
    let db = timed("db");
    let cache = timed("cache");

    let surveyor = chain::sync_scope(|| {
        let surveyor = coordinator
            .create_call_context_surveyor(SurveyorOptions::new().scope_name("request"))
            .unwrap();
        hold(&db, &services, &clock, 5);
        surveyor
    });
    chain::sync_scope(|| hold(&cache, &services, &clock, 5));

    assert_eq!(surveyor.scope_name(), "request");
    let snapshot = surveyor.snapshot();
    assert!(snapshot.get("db").is_some());
    assert!(snapshot.get("cache").is_none());
}

#[test]
fn test_call_context_default_name_is_caller_location() {
    let coordinator = Coordinator::default();
    let surveyor = chain::sync_scope(|| {
        coordinator
            .create_call_context_surveyor(SurveyorOptions::new())
            .unwrap()
    });
    assert!(surveyor.scope_name().contains("tests.rs:"));
}

#[test]
fn test_nested_call_context_out_of_order_dispose() {
    let coordinator = Coordinator::default();
    chain::sync_scope(|| {
        let outer = coordinator
            .create_call_context_surveyor(SurveyorOptions::new().scope_name("outer"))
            .unwrap();
        let inner = coordinator
            .create_call_context_surveyor(SurveyorOptions::new().scope_name("inner"))
            .unwrap();
        assert_eq!(chain::current().depth(), 2);

        for _ in 0..2 {
            match outer.dispose() {
                Err(SurveyError::OutOfOrderDisposal { scope, top }) => {
                    assert_eq!(scope, "outer");
                    assert_eq!(top, "inner");
                }
                other => panic!("expected out-of-order error, got {:?}", other),
            }
            assert!(!outer.is_disposed());
        }

        inner.dispose().unwrap();
        outer.dispose().unwrap();
        assert!(outer.is_disposed());
        assert_eq!(chain::current().depth(), 0);
    });
}

#[test]
fn test_dropping_outer_first_releases_it() {
    let coordinator = Coordinator::default();
    chain::sync_scope(|| {
        let outer = coordinator
            .create_call_context_surveyor(SurveyorOptions::new().scope_name("outer"))
            .unwrap();
        let inner = coordinator
            .create_call_context_surveyor(SurveyorOptions::new().scope_name("inner"))
            .unwrap();
        drop(outer);
        assert_eq!(coordinator.active_surveyors(), 1);
        assert_eq!(chain::current().depth(), 1);
        inner.dispose().unwrap();
        assert_eq!(chain::current().depth(), 0);
    });
}

#[test]
fn test_filter_block_wins_over_allow() {
    let (clock, coordinator) = manual_coordinator();
    let surveyor = coordinator
        .create_process_surveyor(SurveyorOptions::new().allow("^db").block("replica"))
        .unwrap();
    let services = coordinator.services();
    for id in ["db.primary", "db.replica", "cache"] {
        hold(&timed(id), &services, &clock, 1);
    }

    let snapshot = surveyor.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.get("db.primary").is_some());
}

#[test]
fn test_filter_defaults_come_from_settings() {
    let clock = Arc::new(ManualClock::new());
    let settings = MapSettings::new()
        .with(default_allow_key(), "db|cache")
        .with(default_block_key(), "cache");
    let coordinator = Coordinator::new(
        Services::new()
            .with_clock(clock.clone())
            .with_settings(Arc::new(settings)),
    );
    let defaulted = coordinator
        .create_process_surveyor(SurveyorOptions::new())
        .unwrap();
    let overridden = coordinator
        .create_process_surveyor(SurveyorOptions::new().allow("queue"))
        .unwrap();

    let services = coordinator.services();
    for id in ["db", "cache", "queue"] {
        hold(&timed(id), &services, &clock, 1);
    }

    let defaulted = defaulted.snapshot();
    assert!(defaulted.get("db").is_some());
    assert!(defaulted.get("cache").is_none());
    assert!(defaulted.get("queue").is_none());

    let overridden = overridden.snapshot();
    assert_eq!(overridden.len(), 1);
    assert!(overridden.get("queue").is_some());
}

#[test]
fn test_invalid_explicit_pattern_is_rejected() {
    let coordinator = Coordinator::default();
    let err = coordinator
        .create_process_surveyor(SurveyorOptions::new().block("(unclosed"))
        .unwrap_err();
    assert!(matches!(err, SurveyError::InvalidPattern { .. }));
    assert_eq!(coordinator.active_surveyors(), 0);
}

#[test]
fn test_dispose_stops_observation() {
    let (clock, coordinator) = manual_coordinator();
    let surveyor = coordinator
        .create_process_surveyor(SurveyorOptions::new())
        .unwrap();
    let services = coordinator.services();
    hold(&timed("before"), &services, &clock, 1);

    surveyor.dispose().unwrap();
    surveyor.dispose().unwrap();
    assert!(surveyor.is_disposed());
    assert_eq!(coordinator.active_surveyors(), 0);

    hold(&timed("after"), &services, &clock, 1);
    let snapshot = surveyor.snapshot();
    assert!(snapshot.get("before").is_some());
    assert!(snapshot.get("after").is_none());
}

#[test]
fn test_coordinator_dispose_disposes_all() {
    let coordinator = Coordinator::default();
    let process = coordinator
        .create_process_surveyor(SurveyorOptions::new())
        .unwrap();
    let thread = coordinator
        .create_thread_surveyor(SurveyorOptions::new())
        .unwrap();
    assert_eq!(coordinator.active_surveyors(), 2);

    coordinator.dispose();
    assert!(process.is_disposed());
    assert!(thread.is_disposed());
    assert_eq!(coordinator.active_surveyors(), 0);

    let late = coordinator
        .create_process_surveyor(SurveyorOptions::new())
        .unwrap();
    assert!(late.is_disposed());
    assert_eq!(coordinator.active_surveyors(), 0);
}

#[test]
fn test_direct_feed_bypasses_scope() {
    let clock = Arc::new(ManualClock::new());
    let coordinator = Coordinator::with_clock(clock.clone());
    let surveyor = coordinator
        .create_thread_surveyor(SurveyorOptions::new())
        .unwrap();
    let unobserved = Services::new().with_clock(clock.clone());

    let access = timed("db").enter_with(&unobserved);
    surveyor.bottleneck_entered(&access);
    clock.advance(Duration::from_millis(3));
    access.dispose();
    surveyor.bottleneck_exited(&access);

    let record = surveyor.most_utilized_bottleneck().unwrap();
    assert_eq!(record.access_count(), 1);
    assert_eq!(record.access_duration(), Duration::from_millis(3));
}

#[test]
fn test_ranking_across_bottlenecks() {
    let (clock, coordinator) = manual_coordinator();
    let surveyor = coordinator
        .create_process_surveyor(SurveyorOptions::new())
        .unwrap();
    let services = coordinator.services();

    let busy = timed("busy");
    let quiet = Bottleneck::with_limit(
        "quiet",
        UtilizationAlgorithm::Linear,
        false,
        "",
        Some(100.0),
        Some(Duration::from_secs(1)),
    )
    .unwrap();
    hold(&busy, &services, &clock, 50);
    {
        let access = quiet.enter_with(&services);
        access.add_usage(1, 10.0).unwrap();
        clock.advance(Duration::from_secs(1));
    }

    let top = surveyor.most_utilized_bottlenecks(5);
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].bottleneck().id(), "busy");
    assert_eq!(top[1].bottleneck().id(), "quiet");
    assert_eq!(surveyor.most_utilized_bottlenecks(1).len(), 1);
    assert!(surveyor.most_utilized_bottlenecks(0).is_empty());
}

type Collected = Arc<Mutex<Vec<SurveySnapshot>>>;

fn collecting_window(coordinator: &Coordinator, period: Duration) -> (TimeWindowSurveyor, Collected) {
    let seen: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let surveyor = coordinator
        .create_time_window_surveyor(
            period,
            move |snapshot| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(snapshot);
                }
            },
            SurveyorOptions::new(),
        )
        .unwrap();
    (surveyor, seen)
}

#[tokio::test]
async fn test_time_window_truncates_straddling_access() {
    let (clock, coordinator) = manual_coordinator();
    let (surveyor, seen) = collecting_window(&coordinator, Duration::from_millis(100));
    assert_eq!(surveyor.scope_name(), "TimeWindow-100ms");
    assert!(surveyor.snapshot().is_empty());

    clock.advance(Duration::from_millis(50));
    let access = timed("db").enter_with(&coordinator.services());
    clock.advance(Duration::from_millis(50));
    assert_eq!(coordinator.rotate_due_windows().await, 1);

    clock.advance(Duration::from_millis(50));
    access.dispose();
    clock.advance(Duration::from_millis(50));
    assert_eq!(coordinator.rotate_due_windows().await, 1);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);

    let first = seen[0].get("db").unwrap();
    assert!(first.is_in_progress());
    assert_eq!(first.access_duration(), Duration::from_millis(50));
    assert_eq!(first.access_count(), 0);
    assert_eq!(seen[0].window().unwrap().index, 0);

    let second = seen[1].get("db").unwrap();
    assert!(!second.is_in_progress());
    assert_eq!(second.access_duration(), Duration::from_millis(50));
    assert_eq!(second.access_count(), 1);
    assert_eq!(second.limit_used(), 50_000_000.0);
    assert_eq!(seen[1].window().unwrap().index, 1);

    // queries read the last closed window
    let last = surveyor.snapshot();
    assert_eq!(last.window().unwrap().index, 1);
    assert_eq!(surveyor.current_window_index(), 2);
}

#[tokio::test]
async fn test_time_window_skipped_clock_closes_each_window() {
    let (clock, coordinator) = manual_coordinator();
    let (surveyor, seen) = collecting_window(&coordinator, Duration::from_millis(100));

    hold(&timed("db"), &coordinator.services(), &clock, 10);
    clock.advance(Duration::from_millis(340));
    assert_eq!(coordinator.rotate_due_windows().await, 3);
    assert_eq!(coordinator.rotate_due_windows().await, 0);

    let seen = seen.lock();
    let indices: Vec<u64> = seen.iter().map(|s| s.window().unwrap().index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(seen[0].len(), 1);
    assert!(seen[1].is_empty());
    assert!(seen[2].is_empty());
    assert_eq!(surveyor.last_snapshot().unwrap().window().unwrap().end_ticks, 300_000_000);
}

#[tokio::test]
async fn test_disposed_time_window_stops_rotating() {
    let (clock, coordinator) = manual_coordinator();
    let (surveyor, seen) = collecting_window(&coordinator, Duration::from_millis(10));

    surveyor.dispose().unwrap();
    clock.advance(Duration::from_millis(50));
    assert_eq!(coordinator.rotate_due_windows().await, 0);
    assert!(seen.lock().is_empty());
}

fn assert_within_window(snapshot: &SurveySnapshot) {
    let bounds = snapshot.window().unwrap();
    for record in snapshot.records() {
        let last = record.access_begin() + record.access_duration_ticks();
        assert!(record.access_begin() >= bounds.start_ticks, "{record:?} before {bounds:?}");
        assert!(last <= bounds.end_ticks, "{record:?} after {bounds:?}");
    }
}

#[tokio::test]
async fn test_exit_after_boundary_before_rotation_is_split() {
    let (clock, coordinator) = manual_coordinator();
    let (_surveyor, seen) = collecting_window(&coordinator, Duration::from_millis(100));
    let services = coordinator.services();

    clock.advance(Duration::from_millis(50));
    let db = timed("db").enter_with(&services);
    clock.advance(Duration::from_millis(100));
    db.dispose();
    hold(&timed("late"), &services, &clock, 10);
    clock.advance(Duration::from_millis(50));
    assert_eq!(coordinator.rotate_due_windows().await, 2);

    let seen = seen.lock();
    assert_within_window(&seen[0]);
    assert_within_window(&seen[1]);

    let first = seen[0].get("db").unwrap();
    assert_eq!(first.access_duration(), Duration::from_millis(50));
    assert!(first.is_in_progress());
    assert_eq!(first.access_count(), 0);
    assert!(seen[0].get("late").is_none());

    let second = seen[1].get("db").unwrap();
    assert_eq!(second.access_duration(), Duration::from_millis(50));
    assert_eq!(second.access_count(), 1);
    let late = seen[1].get("late").unwrap();
    assert_eq!(late.access_duration(), Duration::from_millis(10));
    assert_eq!(late.access_count(), 1);
}

#[tokio::test]
async fn test_time_window_ignores_time_before_it_started() {
    let (clock, coordinator) = manual_coordinator();
    let services = coordinator.services();
    let db = timed("db").enter_with(&services);
    clock.advance(Duration::from_millis(40));

    let (_surveyor, seen) = collecting_window(&coordinator, Duration::from_millis(100));
    clock.advance(Duration::from_millis(20));
    db.dispose();
    clock.advance(Duration::from_millis(80));
    assert_eq!(coordinator.rotate_due_windows().await, 1);

    let seen = seen.lock();
    assert_within_window(&seen[0]);
    let record = seen[0].get("db").unwrap();
    assert_eq!(record.access_begin(), 40_000_000);
    assert_eq!(record.access_duration(), Duration::from_millis(20));
    assert_eq!(record.limit_used(), 20_000_000.0);
    assert_eq!(record.access_count(), 1);
}

#[test]
fn test_zero_window_period_is_rejected() {
    let coordinator = Coordinator::default();
    let err = coordinator
        .create_time_window_surveyor(Duration::ZERO, |_| async {}, SurveyorOptions::new())
        .unwrap_err();
    assert!(matches!(err, SurveyError::InvalidWindowPeriod));
}
