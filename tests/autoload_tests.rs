//! Integration tests for autoload discovery and the safety filter.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use corvid::autoload::{BinaryKind, load_extensions, load_modules};

use common::test_config;

fn touch(path: &PathBuf) {
    std::fs::write(path, b"").unwrap();
}

#[test]
fn test_mixed_autoload_file_keeps_only_safe_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());

    let good = dir.path().join("good.ext");
    touch(&good);
    let wrong_suffix = dir.path().join("tool.bin");
    touch(&wrong_suffix);
    let world_writable = dir.path().join("bad.ext");
    touch(&world_writable);
    std::fs::set_permissions(&world_writable, std::fs::Permissions::from_mode(0o666)).unwrap();

    let loadfile = dir.path().join("extensions.load");
    std::fs::write(
        &loadfile,
        format!(
            "# managed extensions\n{}\n  {}  \n{}\n; trailing comment\n\n/missing/ghost.ext\n",
            good.display(),
            wrong_suffix.display(),
            world_writable.display()
        ),
    )
    .unwrap();
    config.extensions_autoload = loadfile.to_string_lossy().into_owned();

    let mut found = Vec::new();
    load_extensions(&config, &mut |p| found.push(p)).unwrap();
    assert_eq!(found, vec![good]);
}

#[test]
fn test_missing_list_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    let loadfile = dir.path().join("absent.load");
    config.extensions_autoload = loadfile.to_string_lossy().into_owned();

    let err = load_extensions(&config, &mut |_| {}).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Failed reading: {}", loadfile.display())
    );
}

#[test]
fn test_module_failure_is_aggregate_but_survivors_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());

    let good = dir
        .path()
        .join(format!("plugin.{}", BinaryKind::Module.suffix()));
    touch(&good);

    let loadfile = dir.path().join("modules.load");
    std::fs::write(
        &loadfile,
        format!("{}\n/missing/rogue.{}\n", good.display(), BinaryKind::Module.suffix()),
    )
    .unwrap();
    config.modules_autoload = loadfile.to_string_lossy().into_owned();

    let mut found = Vec::new();
    let result = load_modules(&config, &mut |p| found.push(p));
    assert!(result.is_err());
    assert_eq!(found, vec![good]);
}

#[test]
fn test_extension_failure_is_not_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());

    let loadfile = dir.path().join("extensions.load");
    std::fs::write(&loadfile, "/missing/one.ext\n/missing/two.ext\n").unwrap();
    config.extensions_autoload = loadfile.to_string_lossy().into_owned();

    let mut found = Vec::new();
    // Unsafe entries are skipped, but a readable list file is a success.
    load_extensions(&config, &mut |p| found.push(p)).unwrap();
    assert!(found.is_empty());
}
