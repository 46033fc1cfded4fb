//! Symlink defense for configuration writes.
//!
//! A hostile (or simply surprising) symlink sitting where an init command
//! wants to write must never cause the linked-to file to change, and the
//! failure must not reveal where the link points.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::symlink;

use nexus3::nexus3::config::{init_local, write_guarded};

#[test]
fn test_init_refuses_symlinked_config_and_preserves_target() {
    let dir = tempfile::tempdir().unwrap();
    let victim_dir = tempfile::tempdir().unwrap();

    // Plant a symlink where init wants to write config.json.
    let nexus_dir = dir.path().join(".nexus3");
    fs::create_dir_all(&nexus_dir).unwrap();
    let victim = victim_dir.path().join("important.json");
    fs::write(&victim, "{\"precious\": true}").unwrap();
    symlink(&victim, nexus_dir.join("config.json")).unwrap();

    // The directory exists, so force is required; the symlinked file must
    // still refuse the write.
    let err = init_local(dir.path(), true).unwrap_err();
    assert!(err.contains("config.json"), "unexpected error: {}", err);
    assert!(
        !err.contains("important.json"),
        "error leaked the resolved target: {}",
        err
    );

    // The linked-to file is bitwise unchanged.
    assert_eq!(fs::read_to_string(&victim).unwrap(), "{\"precious\": true}");
}

#[test]
fn test_guarded_write_allows_regular_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.json");
    write_guarded(&path, "{}").unwrap();
    // Overwriting a regular file is fine.
    write_guarded(&path, "{\"v\": 2}").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "{\"v\": 2}");
}

#[test]
fn test_dangling_symlink_also_refused() {
    let dir = tempfile::tempdir().unwrap();
    let link = dir.path().join("dangling.json");
    symlink(dir.path().join("nowhere"), &link).unwrap();
    let err = write_guarded(&link, "data").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
    assert!(!link.exists() || fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
}
