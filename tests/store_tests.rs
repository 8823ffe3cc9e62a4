mod common;

use common::{three_segments, wav_bytes, write_wav};
use segment_forge::store::{ArtifactState, ArtifactStore, FsArtifactStore, StoreError, ValidityRule};

fn store(dir: &std::path::Path) -> FsArtifactStore {
    FsArtifactStore::new(dir, ValidityRule::default())
}

#[test]
fn inspect_walks_absent_invalid_valid() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());

    assert_eq!(store.inspect("00_intro").unwrap(), ArtifactState::Absent);

    std::fs::write(tmp.path().join("00_intro.wav"), b"").unwrap();
    assert!(matches!(
        store.inspect("00_intro").unwrap(),
        ArtifactState::Invalid { size: 0, .. }
    ));

    write_wav(tmp.path(), "00_intro", 0.5);
    match store.inspect("00_intro").unwrap() {
        ArtifactState::Valid(artifact) => {
            assert_eq!(artifact.name, "00_intro");
            assert_eq!(artifact.path, tmp.path().join("00_intro.wav"));
            assert!(artifact.size > 1000);
        }
        other => panic!("expected valid, got {other:?}"),
    }
}

#[test]
fn size_threshold_is_strict() {
    let rule = ValidityRule {
        min_bytes: 1000,
        require_riff_header: false,
    };
    assert!(rule.check_size(1000).is_err());
    assert!(rule.check_size(1001).is_ok());
}

#[test]
fn large_file_without_riff_header_is_invalid() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    std::fs::write(tmp.path().join("00_intro.wav"), vec![b'x'; 4096]).unwrap();

    match store.inspect("00_intro").unwrap() {
        ArtifactState::Invalid { size, reason } => {
            assert_eq!(size, 4096);
            assert!(reason.contains("RIFF"), "{reason}");
        }
        other => panic!("expected invalid, got {other:?}"),
    }
}

#[test]
fn write_rejects_short_or_non_wav_payloads() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());

    let err = store.write("00_intro", b"RIFF").unwrap_err();
    assert!(matches!(err, StoreError::Rejected { ref name, .. } if name == "00_intro"));

    let err = store.write("00_intro", &vec![0u8; 5000]).unwrap_err();
    assert!(matches!(err, StoreError::Rejected { .. }));

    assert_eq!(store.inspect("00_intro").unwrap(), ArtifactState::Absent);
}

#[test]
fn write_replaces_atomically_and_leaves_no_staging_files() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    std::fs::write(tmp.path().join("00_intro.wav"), b"RIFF-truncated").unwrap();

    let audio = wav_bytes(1.0);
    let artifact = store.write("00_intro", &audio).unwrap();

    assert_eq!(artifact.size, audio.len() as u64);
    assert_eq!(std::fs::read(&artifact.path).unwrap(), audio);
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn existing_valid_segments_splits_the_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    write_wav(tmp.path(), "00_intro", 1.0);
    std::fs::write(tmp.path().join("01_script_01.wav"), vec![0u8; 10]).unwrap();
    // Not in the catalog; ignored.
    write_wav(tmp.path(), "99_stray", 1.0);

    let existing = store.existing_valid_segments(&three_segments()).unwrap();

    assert_eq!(existing.len(), 1);
    assert!(existing.contains("00_intro"));
    assert!(!existing.contains("01_script_01"));
    assert!(existing.artifacts.contains_key("00_intro"));
    assert!(store.is_valid("00_intro"));
    assert!(!store.is_valid("02_outro"));
}

#[test]
fn missing_root_reads_as_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(&tmp.path().join("not-yet"));

    assert_eq!(store.inspect("00_intro").unwrap(), ArtifactState::Absent);
    assert!(store.existing_valid_segments(&three_segments()).unwrap().valid_names.is_empty());
}
