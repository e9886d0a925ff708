//! Semaphore create protocol against a real directory.
//!
//! The protocol is directory-parameterized, so everything except the final
//! delegated open can run in a temp directory with no interception active.

use snapbox_preload::hooks::sem::{
    create_sem_object_in, sem_final_path, CreateOutcome, SemError,
};

use std::fs;
use std::mem;
use std::os::unix::fs::PermissionsExt;

use nix::errno::Errno;
use tempfile::TempDir;

const NAME: &str = "snap.myapp.testsem";

#[test]
fn test_create_publishes_a_fully_initialized_object() {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_str().unwrap();

    let outcome = create_sem_object_in(dir_path, NAME, 0o600, 3, false).unwrap();
    assert_eq!(outcome, CreateOutcome::Created);

    // The object must never be observable in a partial state: the file
    // appears under its final name only after it holds a whole sem_t.
    let meta = fs::metadata(sem_final_path(dir_path, NAME)).unwrap();
    assert_eq!(meta.len() as usize, mem::size_of::<libc::sem_t>());
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);
}

#[test]
fn test_staging_file_never_survives() {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_str().unwrap();

    create_sem_object_in(dir_path, NAME, 0o600, 0, false).unwrap();

    let entries: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec![format!("sem.{}", NAME)]);
}

#[test]
fn test_existing_object_reused_without_exclusive() {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_str().unwrap();

    assert_eq!(
        create_sem_object_in(dir_path, NAME, 0o600, 1, false).unwrap(),
        CreateOutcome::Created
    );
    assert_eq!(
        create_sem_object_in(dir_path, NAME, 0o600, 7, false).unwrap(),
        CreateOutcome::Existing
    );

    // Reuse must not reinitialize: the second value never lands.
    let meta = fs::metadata(sem_final_path(dir_path, NAME)).unwrap();
    assert_eq!(meta.len() as usize, mem::size_of::<libc::sem_t>());
}

#[test]
fn test_exclusive_create_on_existing_object_fails_eexist() {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_str().unwrap();

    create_sem_object_in(dir_path, NAME, 0o600, 0, false).unwrap();
    let err = create_sem_object_in(dir_path, NAME, 0o600, 0, true).unwrap_err();
    assert!(matches!(err, SemError::Exists));
    assert_eq!(err.errno(), Errno::EEXIST);
}

#[test]
fn test_concurrent_exclusive_creators_race_to_one_winner() {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_str().unwrap();

    let outcomes: Vec<_> = std::thread::scope(|s| {
        (0..8)
            .map(|_| s.spawn(|| create_sem_object_in(dir_path, NAME, 0o600, 1, true)))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect()
    });

    let created = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(CreateOutcome::Created)))
        .count();
    let collided = outcomes
        .iter()
        .filter(|r| matches!(r, Err(SemError::Exists)))
        .count();
    assert_eq!(created, 1);
    assert_eq!(collided, outcomes.len() - 1);

    // No staging leftovers even under contention.
    let entries = fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 1);
}

#[test]
fn test_oversized_value_rejected_before_the_directory_is_touched() {
    let err = create_sem_object_in(
        "/nonexistent-snapbox-sem-dir",
        NAME,
        0o600,
        u32::MAX,
        false,
    )
    .unwrap_err();
    assert_eq!(err.errno(), Errno::EINVAL);
}

#[test]
fn test_unwritable_directory_surfaces_staging_errno() {
    let err = create_sem_object_in("/nonexistent-snapbox-sem-dir", NAME, 0o600, 0, false)
        .unwrap_err();
    assert!(matches!(err, SemError::Staging(_)));
    assert_eq!(err.errno(), Errno::ENOENT);
}
