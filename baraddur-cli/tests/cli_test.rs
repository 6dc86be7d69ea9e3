#![cfg(unix)]

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn write_config(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.yaml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_help_mentions_scanning() {
    Command::cargo_bin("baraddur")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("regex matches"));
}

#[test]
fn test_scan_once_echoes_matched_target() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("watched");
    fs::create_dir(&root)?;
    fs::write(root.join("hit.txt"), "")?;

    let config = write_config(
        dir.path(),
        r#"
scanner_concurrency: 1
worker_concurrency: 1
jobsSettings:
  - scan:
      regex: "\\.txt$"
      mode: once
    work:
      script: "/bin/echo"
"#,
    );

    Command::cargo_bin("baraddur")
        .unwrap()
        .arg(&root)
        .arg("-c")
        .arg(&config)
        .arg("-o")
        .arg("no-color")
        .assert()
        .success()
        .stdout(predicate::str::contains("hit.txt"));
    Ok(())
}

#[test]
fn test_once_flag_overrides_watch_mode_jobs() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("watched");
    fs::create_dir(&root)?;
    fs::write(root.join("hit.txt"), "")?;

    // A watch job never finishes on its own; --once must make it complete
    let config = write_config(
        dir.path(),
        r#"
scanner_concurrency: 1
worker_concurrency: 1
jobsSettings:
  - scan:
      regex: "\\.txt$"
      mode: watch
    work:
      script: "/bin/echo"
"#,
    );

    Command::cargo_bin("baraddur")
        .unwrap()
        .arg(&root)
        .arg("-c")
        .arg(&config)
        .arg("--once")
        .arg("-o")
        .arg("no-color")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("hit.txt"));
    Ok(())
}

#[test]
fn test_once_and_watch_flags_conflict() {
    Command::cargo_bin("baraddur")
        .unwrap()
        .arg("--once")
        .arg("--watch")
        .assert()
        .failure();
}

#[test]
fn test_invalid_regex_lists_the_job() -> Result<()> {
    let dir = tempdir()?;
    let config = write_config(
        dir.path(),
        r#"
scanner_concurrency: 1
worker_concurrency: 1
jobsSettings:
  - scan:
      regex: "(broken"
    work:
      script: "/bin/echo"
"#,
    );

    Command::cargo_bin("baraddur")
        .unwrap()
        .arg(dir.path())
        .arg("-c")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("job 0"));
    Ok(())
}

#[test]
fn test_failed_job_yields_nonzero_exit() -> Result<()> {
    let dir = tempdir()?;
    let config = write_config(
        dir.path(),
        r#"
scanner_concurrency: 1
worker_concurrency: 1
jobsSettings:
  - scan:
      regex: "\\.txt$"
      mode: once
    work:
      script: "/bin/echo"
"#,
    );

    Command::cargo_bin("baraddur")
        .unwrap()
        .arg("/no/such/root/anywhere")
        .arg("-c")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed"));
    Ok(())
}

#[test]
fn test_dry_run_does_not_execute_scripts() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("watched");
    fs::create_dir(&root)?;
    fs::write(root.join("hit.txt"), "")?;
    let marker = dir.path().join("ran");

    let config = write_config(
        dir.path(),
        &format!(
            r#"
scanner_concurrency: 1
worker_concurrency: 1
jobsSettings:
  - scan:
      regex: "\\.txt$"
      mode: once
    work:
      script: "/usr/bin/touch {}"
"#,
            marker.display()
        ),
    );

    Command::cargo_bin("baraddur")
        .unwrap()
        .arg(&root)
        .arg("-c")
        .arg(&config)
        .arg("--dry-run")
        .assert()
        .success();

    assert!(!marker.exists());
    Ok(())
}
