//! Polling detector against a real directory tree

mod common;

use common::{eventually, is, wait_for_event, TestTree};
use filetime::FileTime;
use std::fs;
use std::time::Duration;
use treewatch::{EventKind, FileSystemWatcher, WatcherConfig};

const INTERVAL: Duration = Duration::from_millis(25);

fn polling_watcher() -> FileSystemWatcher {
    let watcher = FileSystemWatcher::new(WatcherConfig::default()).unwrap();
    watcher.create_polling(INTERVAL).unwrap();
    watcher
}

#[test]
fn test_create_and_modify_file() -> anyhow::Result<()> {
    let tree = TestTree::new();
    let watcher = polling_watcher();
    assert!(watcher.is_polling());
    watcher.register_path_with(tree.root(), true, false)?;
    let stream = watcher.subscribe();
    watcher.start()?;

    let file = tree.write("a.txt", "one");
    let created = wait_for_event(&stream, is(EventKind::Create, &file));
    assert_eq!(created.registered_path, tree.root());

    filetime::set_file_mtime(&file, FileTime::from_unix_time(1_000_000, 0))?;
    wait_for_event(&stream, is(EventKind::Modify, &file));

    fs::remove_file(&file)?;
    wait_for_event(&stream, is(EventKind::Delete, &file));

    assert!(watcher.stop()?);
    Ok(())
}

#[test]
fn test_new_subdirectory_is_followed() -> anyhow::Result<()> {
    let tree = TestTree::new();
    let watcher = polling_watcher();
    watcher.register_path_with(tree.root(), true, false)?;
    let stream = watcher.subscribe();
    watcher.start()?;

    let sub = tree.mkdir("sub");
    wait_for_event(&stream, is(EventKind::Create, &sub));
    assert!(eventually(|| watcher.is_watched(&sub)));

    let inner = tree.write("sub/inner.txt", "x");
    let event = wait_for_event(&stream, is(EventKind::Create, &inner));
    assert_eq!(event.registered_path, sub);

    watcher.stop()?;
    Ok(())
}

#[test]
fn test_removed_directory_unregistered() -> anyhow::Result<()> {
    let tree = TestTree::new();
    let sub = tree.mkdir("sub");
    let watcher = polling_watcher();
    watcher.register_path_with(tree.root(), true, false)?;
    assert!(watcher.is_watched(&sub));
    watcher.start()?;

    fs::remove_dir(&sub)?;
    assert!(eventually(|| !watcher.is_watched(&sub)));
    assert!(watcher.is_watched(tree.root()));

    watcher.stop()?;
    Ok(())
}

#[test]
fn test_from_config() -> anyhow::Result<()> {
    let config = WatcherConfig::from_toml_str("detector = \"polling\"\npoll_interval_ms = 30\n")?;
    let watcher = FileSystemWatcher::new(config)?;
    let detector = watcher.create_from_config()?;
    assert_eq!(detector.kind(), treewatch::DetectorKind::Polling);
    assert!(watcher.is_polling());
    Ok(())
}
