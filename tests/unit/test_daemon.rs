//! Change-detection loop tests over the file-backed checkpoint store

use rewind::checkpoint::DirectorySource;
use rewind::config::Config;
use rewind::state::{SessionPointer, SessionStore};
use rewind::sync::{loop_control, SyncDaemon, TrackingState, Transition};
use rewind::{Checkpoint, CheckpointId};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn config_for(workspace: &Path) -> Config {
    let mut config = Config::default();
    config.workspace = workspace.to_path_buf();
    config.validation.check_vcs = false;
    config
}

#[tokio::test]
async fn test_directory_source_drives_full_lifecycle() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let store = DirectorySource::new(config.checkpoint_store());
    let mut daemon = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config);

    // Nothing published yet
    let tick = daemon.tick().await.unwrap();
    assert_eq!(tick.transition, Transition::None);
    assert_eq!(daemon.state(), TrackingState::Uninitialized);

    store
        .publish(
            "main-thread",
            &Checkpoint::new("1", 1)
                .with_file("src/lib.rs", "pub fn one() {}\n")
                .with_file("README.md", "# v1\n"),
        )
        .unwrap();
    let tick = daemon.tick().await.unwrap();
    assert_eq!(tick.transition, Transition::Init);
    assert_eq!(daemon.state(), TrackingState::Tracking);
    assert_eq!(
        fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
        "pub fn one() {}\n"
    );

    store
        .publish(
            "main-thread",
            &Checkpoint::new("2", 2).with_file("src/lib.rs", "pub fn two() {}\n"),
        )
        .unwrap();
    assert_eq!(daemon.tick().await.unwrap().transition, Transition::Forward);

    // The producer branches back to an earlier step under a new id
    fs::write(dir.path().join("src/lib.rs"), "pub fn local_edit() {}\n").unwrap();
    store
        .publish(
            "main-thread",
            &Checkpoint::new("3", 1).with_file("src/lib.rs", "pub fn one() {}\n"),
        )
        .unwrap();
    let tick = daemon.tick().await.unwrap();
    assert_eq!(tick.transition, Transition::Rollback);
    let result = tick.restoration.unwrap();
    assert_eq!(result.files_backed_up, vec!["src/lib.rs"]);

    // The user's edit can be recovered from that restoration's backup
    let rollback = daemon.synchronizer().rollback(&result.backup_id);
    assert!(rollback.success);
    assert_eq!(
        fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
        "pub fn local_edit() {}\n"
    );

    let pointer = SessionStore::new(config.session_file()).load().unwrap().unwrap();
    assert_eq!(pointer.checkpoint_id.as_str(), "3");
    assert_eq!(pointer.step_index, Some(1));

    let log = fs::read_to_string(config.audit_log()).unwrap();
    let events: Vec<&str> = log
        .lines()
        .filter_map(|l| l.split(" - ").nth(1))
        .collect();
    assert_eq!(events, vec!["INIT", "FORWARD", "ROLLBACK"]);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let store = DirectorySource::new(config.checkpoint_store());
    store
        .publish("other-thread", &Checkpoint::new("1", 1).with_file("a.txt", "other"))
        .unwrap();

    let mut daemon = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config);
    assert_eq!(daemon.tick().await.unwrap().transition, Transition::None);

    let mut daemon = daemon.with_session("other-thread");
    assert_eq!(daemon.tick().await.unwrap().transition, Transition::Init);
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "other");
}

#[tokio::test]
async fn test_restart_resumes_from_pointer() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let store = DirectorySource::new(config.checkpoint_store());
    store
        .publish("main-thread", &Checkpoint::new("1", 1).with_file("a.txt", "one"))
        .unwrap();

    let mut first = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config);
    assert_eq!(first.tick().await.unwrap().transition, Transition::Init);
    drop(first);

    // A fresh process sees the committed pointer and has nothing to do
    let mut second = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config);
    assert_eq!(second.tick().await.unwrap().transition, Transition::None);
    assert_eq!(second.state(), TrackingState::Tracking);
}

#[tokio::test]
async fn test_restart_adopts_session_of_pointer() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let store = DirectorySource::new(config.checkpoint_store());
    store
        .publish("review-thread", &Checkpoint::new("4", 4).with_file("a.txt", "four"))
        .unwrap();
    store
        .publish("main-thread", &Checkpoint::new("9", 9).with_file("a.txt", "nine"))
        .unwrap();

    let first = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config);
    let mut first = first.with_session("review-thread");
    assert_eq!(first.tick().await.unwrap().transition, Transition::Init);
    drop(first);

    // No pin: the pointer's session wins over sync.default_session
    let mut second = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config);
    assert_eq!(second.session_id(), "review-thread");
    assert_eq!(second.tick().await.unwrap().transition, Transition::None);
    assert_eq!(second.state(), TrackingState::Tracking);
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "four");
}

#[tokio::test]
async fn test_pinned_session_overrides_pointer() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(dir.path());
    SessionStore::new(config.session_file())
        .commit(&SessionPointer::new("review-thread", CheckpointId::new("4"), Some(4)))
        .unwrap();
    DirectorySource::new(config.checkpoint_store())
        .publish("main-thread", &Checkpoint::new("9", 9).with_file("a.txt", "nine"))
        .unwrap();

    config.sync.session = Some("main-thread".to_string());
    let mut daemon = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config);
    assert_eq!(daemon.session_id(), "main-thread");
    assert_eq!(daemon.tick().await.unwrap().transition, Transition::Init);
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "nine");
}

#[tokio::test]
async fn test_unreadable_pointer_falls_back_to_default_session() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    fs::create_dir_all(config.session_file().parent().unwrap()).unwrap();
    fs::write(config.session_file(), "{ not json").unwrap();

    let daemon = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config);
    assert_eq!(daemon.session_id(), "main-thread");
}

#[tokio::test]
async fn test_malformed_checkpoint_files_are_skipped() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let session_dir = config.checkpoint_store().join("main-thread");
    fs::create_dir_all(&session_dir).unwrap();
    fs::write(session_dir.join("9.json"), "{ truncated").unwrap();

    let store = DirectorySource::new(config.checkpoint_store());
    store
        .publish("main-thread", &Checkpoint::new("1", 1).with_file("a.txt", "ok"))
        .unwrap();

    let mut daemon = SyncDaemon::new(store, &config);
    let tick = daemon.tick().await.unwrap();
    assert_eq!(tick.transition, Transition::Init);
    assert_eq!(tick.checkpoint_id.unwrap().as_str(), "1");
}

#[tokio::test]
async fn test_watch_loop_picks_up_new_checkpoints() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let store = DirectorySource::new(config.checkpoint_store());

    let mut daemon = SyncDaemon::new(DirectorySource::new(config.checkpoint_store()), &config)
        .with_poll_interval(Duration::from_millis(10));
    let (handle, control) = loop_control();
    let task = tokio::spawn(async move { daemon.run(control).await });

    store
        .publish("main-thread", &Checkpoint::new("1", 1).with_file("a.txt", "first"))
        .unwrap();
    let pointer_store = SessionStore::new(config.session_file());
    for _ in 0..300 {
        if pointer_store.load().ok().flatten().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.stop();
    task.await.unwrap().unwrap();

    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "first");
    let pointer = pointer_store.load().unwrap().unwrap();
    assert_eq!(pointer.checkpoint_id.as_str(), "1");
}
