//! Restoration validator tests
//!
//! Uses temporary git repositories for the working-tree checks.

use rewind::config::Config;
use rewind::validation::RestorationValidator;
use rewind::{CheckpointId, FileSnapshots};
use std::fs;
use std::process::Command;
use tempfile::TempDir;

/// Create a temporary git repository with one committed file
fn create_test_repo() -> TempDir {
    let dir = TempDir::new().unwrap();

    let git = |args: &[&str]| {
        Command::new("git")
            .args(args)
            .current_dir(dir.path())
            .output()
            .expect("Failed to run git");
    };

    git(&["init"]);
    git(&["config", "user.email", "test@example.com"]);
    git(&["config", "user.name", "Test User"]);

    fs::write(dir.path().join("README.md"), "# Test").unwrap();
    git(&["add", "."]);
    git(&["commit", "-m", "Initial commit"]);

    dir
}

fn snapshots(pairs: &[(&str, &str)]) -> FileSnapshots {
    pairs
        .iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
}

fn cp() -> CheckpointId {
    CheckpointId::new("cp-1")
}

#[test]
fn test_clean_repo_is_safe() {
    let dir = create_test_repo();
    let validator = RestorationValidator::new(dir.path());

    let report = validator.validate(&cp(), &snapshots(&[("README.md", "# Restored")]));

    assert!(report.valid);
    assert!(report.safe_to_proceed);
    assert!(!report.requires_confirmation, "{:?}", report.warnings);
    let vcs = report.vcs.unwrap();
    assert_eq!(vcs.total_changes, 0);
}

#[test]
fn test_dirty_repo_warns() {
    let dir = create_test_repo();
    fs::write(dir.path().join("README.md"), "# Changed").unwrap();
    fs::write(dir.path().join("notes.txt"), "untracked").unwrap();
    let validator = RestorationValidator::new(dir.path());

    let report = validator.validate(&cp(), &snapshots(&[("README.md", "# Restored")]));

    assert!(report.valid);
    assert!(report.requires_confirmation);
    let vcs = report.vcs.unwrap();
    assert_eq!(vcs.modified_count, 1);
    assert_eq!(vcs.untracked_count, 1);
    assert_eq!(vcs.total_changes, 2);
    assert!(report
        .warnings
        .iter()
        .any(|w| w == "Git working tree has uncommitted changes: 1 modified, 1 untracked"));
}

#[test]
fn test_engine_files_do_not_dirty_the_tree() {
    let dir = create_test_repo();
    fs::create_dir_all(dir.path().join(".rewind/backups/b1")).unwrap();
    fs::write(dir.path().join(".rewind/backups/b1/README.md"), "old").unwrap();
    fs::write(dir.path().join(".rewind/session.json"), "{}").unwrap();

    let mut config = Config::default();
    config.workspace = dir.path().to_path_buf();
    let validator = RestorationValidator::from_config(&config);

    let report = validator.validate(&cp(), &snapshots(&[("README.md", "x")]));
    assert_eq!(report.vcs.unwrap().total_changes, 0);
    assert!(!report.requires_confirmation);
}

#[test]
fn test_vcs_check_can_be_disabled() {
    let dir = create_test_repo();
    fs::write(dir.path().join("dirty.txt"), "x").unwrap();
    let validator = RestorationValidator::new(dir.path()).with_vcs_check(false);

    let report = validator.validate(&cp(), &snapshots(&[("a.txt", "a")]));
    assert!(report.vcs.is_none());
    assert!(!report.requires_confirmation);
}

#[test]
fn test_non_repository_has_no_vcs_status() {
    let dir = TempDir::new().unwrap();
    let validator = RestorationValidator::new(dir.path());

    let report = validator.validate(&cp(), &snapshots(&[("a.txt", "a")]));
    assert!(report.valid);
    assert!(report.vcs.is_none());
}

#[test]
fn test_size_guard() {
    let dir = TempDir::new().unwrap();
    let validator = RestorationValidator::new(dir.path()).with_size_warning_bytes(1024 * 1024);
    let big = "x".repeat(3 * 1024 * 1024);

    let report = validator.validate(&cp(), &snapshots(&[("big.txt", big.as_str())]));

    assert!(report.valid);
    assert!(report.requires_confirmation);
    assert!(report
        .warnings
        .contains(&"Large restoration (3MB) - may take time".to_string()));
}

#[cfg(unix)]
#[test]
fn test_read_only_parent_blocks_unless_root() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let ro = dir.path().join("ro");
    fs::create_dir(&ro).unwrap();
    fs::set_permissions(&ro, fs::Permissions::from_mode(0o555)).unwrap();

    let validator = RestorationValidator::new(dir.path());
    let report = validator.validate(
        &cp(),
        &snapshots(&[("ro/locked.txt", "x"), ("ok.txt", "y")]),
    );
    fs::set_permissions(&ro, fs::Permissions::from_mode(0o755)).unwrap();

    if nix::unistd::geteuid().is_root() {
        assert!(report.valid, "root can write into 0555: {:?}", report.errors);
        return;
    }
    assert!(!report.valid);
    assert!(!report.safe_to_proceed);
    assert_eq!(report.errors, vec!["No write permission: ro/locked.txt"]);
    assert!(report.ensure_allowed(true).is_err());
}

#[test]
fn test_file_in_place_of_parent_blocks_for_any_user() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("notes"), "a file, not a directory").unwrap();

    let validator = RestorationValidator::new(dir.path());
    let report = validator.validate(&cp(), &snapshots(&[("notes/today.md", "x")]));

    assert!(!report.valid);
    assert_eq!(report.errors, vec!["No write permission: notes/today.md"]);
}
