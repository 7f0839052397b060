use std::fs;

use pathsync_engine::{
    ensure_state_dir, AtomicFileWriter, FileTelemetryStore, PersistError, TelemetryEvent,
    TelemetryStore,
};
use tempfile::TempDir;

#[test]
fn creates_missing_state_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("state").join("nested");
    assert!(!new_dir.exists());
    ensure_state_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_previous_content() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("telemetry.json");
    let writer = AtomicFileWriter::new(target.clone());

    writer.write("[1]").unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "[1]");

    writer.write("[1,2]").unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "[1,2]");
    let leftovers = fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn no_partial_file_when_parent_is_a_file() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("not_a_dir");
    fs::write(&blocker, "x").unwrap();

    let writer = AtomicFileWriter::new(blocker.join("telemetry.json"));
    assert!(matches!(writer.prepare(), Err(PersistError::StateDir(_))));
    assert!(matches!(writer.write("[]"), Err(PersistError::Io(_))));
    assert_eq!(fs::read_to_string(&blocker).unwrap(), "x");
}

#[test]
fn file_store_checks_its_directory_once() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("state");
    let store = FileTelemetryStore::new(dir.join("telemetry.json"));

    let events = vec![TelemetryEvent::new("node_opened").with_node("N1")];
    store.save(&events).unwrap();
    assert_eq!(store.load().unwrap(), events);

    // Saves after the first skip the directory probe, so a vanished
    // directory surfaces as a plain write error instead of being recreated.
    fs::remove_dir_all(&dir).unwrap();
    assert!(matches!(store.save(&events), Err(PersistError::Io(_))));
    assert!(!dir.exists());
}

#[test]
fn file_store_rejects_a_file_as_its_directory() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("not_a_dir");
    fs::write(&blocker, "x").unwrap();

    let store = FileTelemetryStore::new(blocker.join("telemetry.json"));
    assert!(matches!(store.load(), Err(PersistError::StateDir(_))));
}
