mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{episode, test_config, three_segments, write_wav, FakeRemote};
use segment_forge::audio::Timeline;
use segment_forge::kernel::lease::{current_holder, RunLease, LEASE_FILE};
use segment_forge::kernel::telemetry::RunEvent;
use segment_forge::services::tts::QueueStatus;
use segment_forge::{Orchestrator, RunError};
use uuid::Uuid;

fn orchestrator(dir: &std::path::Path, remote: &Arc<FakeRemote>) -> Orchestrator {
    Orchestrator::new(dir, test_config(), remote.clone())
}

#[tokio::test(start_paused = true)]
async fn fail_once_then_succeed_uses_one_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(FakeRemote::new().failing("01_script_01", 1));

    let report = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap();

    assert_eq!(
        report.timeline.names(),
        vec!["00_intro", "01_script_01", "02_outro"]
    );
    assert_eq!(report.retries_used, 1);
    assert_eq!(remote.submit_count("01_script_01"), 2);
    assert_eq!(remote.submit_count("00_intro"), 1);
    assert_eq!(remote.submit_count("02_outro"), 1);
    assert!(tmp.path().join("01_script_01.wav").exists());
    assert_eq!(report.metrics.retries_used, 1);
    assert_eq!(report.metrics.failed, 1);
}

#[tokio::test(start_paused = true)]
async fn existing_artifacts_are_never_resubmitted() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = episode(3); // 7 segments
    let names: Vec<String> = catalog.names().iter().map(|s| s.to_string()).collect();
    write_wav(tmp.path(), &names[0], 1.0);
    write_wav(tmp.path(), &names[3], 1.0);
    // Truncated leftover from a crashed run does not count.
    std::fs::write(tmp.path().join(format!("{}.wav", names[5])), b"RIFF").unwrap();

    let remote = Arc::new(FakeRemote::new());
    let report = orchestrator(tmp.path(), &remote).run(&catalog).await.unwrap();

    assert_eq!(remote.submits().len(), catalog.len() - 2);
    assert_eq!(remote.submit_count(&names[0]), 0);
    assert_eq!(remote.submit_count(&names[3]), 0);
    assert_eq!(remote.submit_count(&names[5]), 1);
    assert_eq!(report.existing, vec![names[0].clone(), names[3].clone()]);
    assert_eq!(report.submitted, catalog.len() - 2);
    assert_eq!(report.timeline.entries().len(), catalog.len());
}

#[tokio::test(start_paused = true)]
async fn all_present_means_zero_submits() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["00_intro", "01_script_01", "02_outro"] {
        write_wav(tmp.path(), name, 1.0);
    }

    let remote = Arc::new(FakeRemote::new());
    let report = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap();

    assert!(remote.submits().is_empty());
    assert_eq!(report.submitted, 0);
    assert_eq!(report.retries_used, 0);
    assert_eq!(
        report.timeline.names(),
        vec!["00_intro", "01_script_01", "02_outro"]
    );
    assert!(report.timeline.output().exists());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_name_the_segment_and_produce_no_timeline() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(FakeRemote::new().always_failing("01_script_01"));

    let err = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap_err();

    match &err {
        RunError::Exhausted { failures, attempts } => {
            assert_eq!(*attempts, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].name, "01_script_01");
            assert!(failures[0].reason.to_string().contains("500"));
        }
        other => panic!("expected exhausted, got {other:?}"),
    }
    assert_eq!(err.category(), "persistent-failure");
    assert_eq!(err.failed_segments(), vec!["01_script_01"]);
    assert_eq!(remote.submit_count("01_script_01"), 3);
    assert!(!tmp.path().join("timeline.json").exists());
    assert!(!tmp.path().join("episode.wav").exists());
    // The segments that did succeed stay on disk for the next run.
    assert!(tmp.path().join("00_intro.wav").exists());
    assert!(!tmp.path().join(LEASE_FILE).exists());
}

#[tokio::test(start_paused = true)]
async fn completion_order_does_not_change_timeline_order() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(
        FakeRemote::new()
            .delayed("00_intro", Duration::from_secs(30))
            .delayed("01_script_01", Duration::from_secs(20))
            .delayed("02_outro", Duration::from_secs(10)),
    );

    let report = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap();

    assert_eq!(remote.finished(), vec!["02_outro", "01_script_01", "00_intro"]);
    assert_eq!(
        report.timeline.names(),
        vec!["00_intro", "01_script_01", "02_outro"]
    );
    let offsets: Vec<Duration> = report
        .timeline
        .entries()
        .iter()
        .map(|e| e.start_offset)
        .collect();
    assert_eq!(
        offsets,
        vec![
            Duration::from_secs(0),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn busy_remote_aborts_before_dispatch() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(FakeRemote::new().with_status(QueueStatus::new(2, 3, 10)));

    let err = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::OrphanedRemoteWork {
            active: 2,
            queued: 3
        }
    ));
    assert!(remote.submits().is_empty());
    assert!(current_holder(tmp.path()).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn busy_remote_can_be_overridden() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(FakeRemote::new().with_status_feed(vec![
        QueueStatus::new(1, 0, 10),
        QueueStatus::new(0, 0, 10),
    ]));
    let mut config = test_config();
    config.dispatch.queue_policy = segment_forge::kernel::gate::QueuePolicy::Proceed;

    let report = Orchestrator::new(tmp.path(), config, remote.clone())
        .run(&three_segments())
        .await
        .unwrap();

    assert_eq!(remote.submits().len(), 3);
    assert_eq!(report.timeline.entries().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn unreachable_remote_fails_preflight() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(FakeRemote::new().unreachable());

    let err = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "remote-unreachable");
    assert!(remote.submits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn held_lease_fails_fast_without_touching_the_remote() {
    let tmp = tempfile::tempdir().unwrap();
    let held = RunLease::acquire(tmp.path(), Uuid::new_v4()).unwrap();
    let remote = Arc::new(FakeRemote::new());

    let err = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap_err();

    match err {
        RunError::LeaseConflict { holder } => assert_eq!(holder.run_id, held.holder().run_id),
        other => panic!("expected lease conflict, got {other:?}"),
    }
    assert_eq!(remote.polls(), 0);
    assert!(remote.submits().is_empty());
    // The first holder keeps its lease.
    assert_eq!(
        current_holder(tmp.path()).unwrap().unwrap().run_id,
        held.holder().run_id
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_remote_is_reported_separately_from_exhaustion() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(FakeRemote::new().hanging("01_script_01"));

    let started = tokio::time::Instant::now();
    let err = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap_err();

    match &err {
        RunError::Stalled {
            completed,
            missing,
            attempts,
        } => {
            assert_eq!(*completed, 2);
            assert_eq!(missing, &vec!["01_script_01".to_string()]);
            assert_eq!(*attempts, 1);
        }
        other => panic!("expected stall, got {other:?}"),
    }
    assert_eq!(err.category(), "stall");
    assert_eq!(remote.submit_count("01_script_01"), 1);
    // Threshold plus at most two poll intervals, then one drain grace for
    // the abandoned call to land.
    assert!(started.elapsed() > Duration::from_secs(360));
    assert!(started.elapsed() <= Duration::from_secs(370));
    assert!(!tmp.path().join(LEASE_FILE).exists());
}

#[tokio::test(start_paused = true)]
async fn second_run_after_failure_only_submits_what_is_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let flaky = Arc::new(FakeRemote::new().always_failing("02_outro"));
    orchestrator(tmp.path(), &flaky)
        .run(&three_segments())
        .await
        .unwrap_err();

    let healthy = Arc::new(FakeRemote::new());
    let report = orchestrator(tmp.path(), &healthy)
        .run(&three_segments())
        .await
        .unwrap();

    assert_eq!(healthy.submits(), vec!["02_outro"]);
    assert_eq!(report.existing, vec!["00_intro", "01_script_01"]);
}

#[tokio::test(start_paused = true)]
async fn report_carries_timeline_file_and_events() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(FakeRemote::new().with_duration("01_script_01", 2.5));

    let report = orchestrator(tmp.path(), &remote)
        .run(&three_segments())
        .await
        .unwrap();

    let saved = Timeline::load(&report.timeline_path).unwrap();
    assert_eq!(saved, report.timeline);
    assert_eq!(
        saved.entry("01_script_01").unwrap().duration,
        Duration::from_millis(2500)
    );
    assert!(matches!(
        report.events.first(),
        Some(RunEvent::LeaseAcquired { run_id }) if *run_id == report.run_id
    ));
    assert!(matches!(report.events.last(), Some(RunEvent::Assembled { segments: 3, .. })));
    assert_eq!(report.metrics.submitted, 3);
    assert_eq!(report.metrics.completed, 3);
}
