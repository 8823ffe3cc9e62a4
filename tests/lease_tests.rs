use chrono::Utc;
use segment_forge::kernel::lease::{current_holder, LeaseError, LeaseHolder, RunLease, LEASE_FILE};
use uuid::Uuid;

#[test]
fn second_acquire_fails_while_first_is_held() {
    let tmp = tempfile::tempdir().unwrap();
    let first = RunLease::acquire(tmp.path(), Uuid::new_v4()).unwrap();

    let err = RunLease::acquire(tmp.path(), Uuid::new_v4()).unwrap_err();
    match err {
        LeaseError::Busy { holder, .. } => {
            assert_eq!(holder.run_id, first.holder().run_id);
            assert_eq!(holder.pid, std::process::id());
        }
        other => panic!("expected busy, got {other:?}"),
    }
}

#[test]
fn release_is_idempotent_and_frees_the_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let mut lease = RunLease::acquire(tmp.path(), Uuid::new_v4()).unwrap();
    assert!(tmp.path().join(LEASE_FILE).exists());

    lease.release().unwrap();
    lease.release().unwrap();
    assert!(lease.is_released());
    assert!(!tmp.path().join(LEASE_FILE).exists());

    RunLease::acquire(tmp.path(), Uuid::new_v4()).unwrap();
}

#[test]
fn drop_releases() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let _lease = RunLease::acquire(tmp.path(), Uuid::new_v4()).unwrap();
        assert!(current_holder(tmp.path()).unwrap().is_some());
    }
    assert!(current_holder(tmp.path()).unwrap().is_none());
}

#[cfg(target_os = "linux")]
#[test]
fn dead_holder_is_reclaimed_silently() {
    let tmp = tempfile::tempdir().unwrap();
    let stale = LeaseHolder {
        // Above any real pid_max.
        pid: u32::MAX - 1,
        run_id: Uuid::new_v4(),
        acquired_at: Utc::now(),
    };
    std::fs::write(
        tmp.path().join(LEASE_FILE),
        serde_json::to_string(&stale).unwrap(),
    )
    .unwrap();

    let run_id = Uuid::new_v4();
    let lease = RunLease::acquire(tmp.path(), run_id).unwrap();

    assert_eq!(lease.holder().run_id, run_id);
    assert_eq!(current_holder(tmp.path()).unwrap().unwrap().run_id, run_id);
}

#[cfg(target_os = "linux")]
#[test]
fn racing_acquirers_reclaim_a_stale_marker_exactly_once() {
    use std::sync::{Arc, Barrier};

    for _ in 0..200 {
        let tmp = tempfile::tempdir().unwrap();
        let stale = LeaseHolder {
            pid: 4_000_000,
            run_id: Uuid::new_v4(),
            acquired_at: Utc::now(),
        };
        std::fs::write(
            tmp.path().join(LEASE_FILE),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let start = Arc::new(Barrier::new(2));
        let racers: Vec<_> = (0..2)
            .map(|_| {
                let start = start.clone();
                let dir = tmp.path().to_path_buf();
                std::thread::spawn(move || {
                    start.wait();
                    RunLease::acquire(&dir, Uuid::new_v4())
                })
            })
            .collect();
        let results: Vec<_> = racers.into_iter().map(|r| r.join().unwrap()).collect();

        let winners: Vec<&RunLease> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "{results:?}");
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(LeaseError::Busy { holder, .. }) if holder.run_id == winners[0].holder().run_id)));
        assert_eq!(
            current_holder(tmp.path()).unwrap().unwrap().run_id,
            winners[0].holder().run_id
        );
    }
}

#[test]
fn corrupt_marker_is_reclaimed() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join(LEASE_FILE), "{not json").unwrap();

    let lease = RunLease::acquire(tmp.path(), Uuid::new_v4()).unwrap();
    assert!(!lease.is_released());
}

#[test]
fn release_leaves_a_marker_that_names_someone_else() {
    let tmp = tempfile::tempdir().unwrap();
    let mut lease = RunLease::acquire(tmp.path(), Uuid::new_v4()).unwrap();

    let other = LeaseHolder {
        pid: std::process::id(),
        run_id: Uuid::new_v4(),
        acquired_at: Utc::now(),
    };
    std::fs::write(
        tmp.path().join(LEASE_FILE),
        serde_json::to_string(&other).unwrap(),
    )
    .unwrap();

    lease.release().unwrap();
    assert_eq!(
        current_holder(tmp.path()).unwrap().unwrap().run_id,
        other.run_id
    );
}

#[test]
fn acquire_creates_the_output_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("episode/audio");

    let lease = RunLease::acquire(&dir, Uuid::new_v4()).unwrap();
    assert!(dir.is_dir());
    assert_eq!(lease.path(), dir.join(LEASE_FILE));
}
