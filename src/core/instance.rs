//! Probes and mutations against the target application instance.
//!
//! The instance is a directory tree owned by the application being
//! upgraded: a version marker file, a cache directory with known subpaths,
//! and a repair/rebuild entry point runnable with the configured
//! interpreter.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, ErrorCode, Result};
use crate::process::CommandRunner;
use crate::runlog::RunLog;
use crate::utils::shell;
use crate::version::ReleaseVersion;

/// Read the instance's installed version from its marker file.
///
/// The marker usually assigns a quoted version string
/// (`$app_version = '9.0.1';`); a marker that is nothing but the version
/// string also works.
pub fn current_version(instance: &Path, marker: &str) -> Result<ReleaseVersion> {
    let marker_path = instance.join(marker);
    let content = std::fs::read_to_string(&marker_path).map_err(|_| {
        Error::preflight_not_an_instance(instance.display().to_string(), marker.to_string())
    })?;

    extract_marker_version(&content).ok_or_else(|| {
        Error::preflight_not_an_instance(instance.display().to_string(), marker.to_string())
            .with_hint("The version marker exists but holds no recognizable version string")
    })
}

fn extract_marker_version(content: &str) -> Option<ReleaseVersion> {
    let re = Regex::new(r#"["']([0-9]+(?:\.[0-9]+)+)["']"#).ok()?;
    if let Some(caps) = re.captures(content) {
        if let Ok(version) = caps[1].parse() {
            return Some(version);
        }
    }
    content.trim().parse().ok()
}

/// Check that a directory exists and is readable and writable.
/// Returns a description of the problem on failure.
pub fn dir_is_accessible(path: &Path) -> std::result::Result<(), String> {
    if !path.is_dir() {
        return Err(format!("'{}' is not a directory", path.display()));
    }
    if std::fs::read_dir(path).is_err() {
        return Err(format!("'{}' is not readable", path.display()));
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.permissions().readonly() => {
            Err(format!("'{}' is not writable", path.display()))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(format!("'{}': {}", path.display(), e)),
    }
}

/// Recursively delete everything inside a directory without removing the
/// directory itself.
pub fn clear_directory(
    runner: &dyn CommandRunner,
    log: &RunLog,
    dir: &Path,
) -> std::result::Result<(), String> {
    let rendered = dir.display().to_string();
    if rendered.is_empty() || rendered == "/" {
        return Err("Refusing to clear the root directory".to_string());
    }
    if !dir.is_dir() {
        return Err(format!(
            "{} is not a directory or doesn't exist",
            dir.display()
        ));
    }

    log.log(&format!("Clearing directory {}", dir.display()));
    let command = format!("rm -rf {}/*", shell::quote_path(&rendered));
    let output = runner.run(&command, None);
    if output.success {
        Ok(())
    } else {
        Err(output.combined())
    }
}

/// Delete a directory tree entirely.
pub fn delete_directory(
    runner: &dyn CommandRunner,
    log: &RunLog,
    dir: &Path,
) -> std::result::Result<(), String> {
    let rendered = dir.display().to_string();
    if rendered.is_empty() || rendered == "/" {
        return Err("Refusing to delete the root directory".to_string());
    }
    if !dir.is_dir() {
        return Err(format!("'{}' is not a directory", dir.display()));
    }

    log.log(&format!("Deleting directory {}", dir.display()));
    let command = format!("rm -rf {}", shell::quote_path(&rendered));
    let output = runner.run(&command, None);
    if output.success {
        Ok(())
    } else {
        Err(output.combined())
    }
}

/// Selectively empty known cache entries under `<instance>/cache`.
///
/// A full cache wipe breaks the repair routine, and leaving the compiled
/// class map gives the autoloader a stale cache, so only the configured
/// subpaths are touched. The cache directory itself must exist and is
/// never removed; per-entry failures are logged and skipped.
pub fn clear_cache(
    runner: &dyn CommandRunner,
    log: &RunLog,
    instance: &Path,
    subpaths: &[String],
) -> Result<()> {
    let cache_path = instance.join("cache");
    log.log(&format!("Clearing cache directory {}", cache_path.display()));

    if !cache_path.is_dir() {
        return Err(Error::step_failed(
            ErrorCode::StepCacheClearFailed,
            format!("{} is not a directory", cache_path.display()),
        ));
    }

    for entry in subpaths {
        let entry_path = cache_path.join(entry);
        if entry_path.is_dir() {
            if let Err(problem) = clear_directory(runner, log, &entry_path) {
                log.log(&format!(
                    "Could not clear cache directory {}: {}",
                    entry_path.display(),
                    problem
                ));
            }
        } else if entry_path.is_file() {
            if std::fs::remove_file(&entry_path).is_err() {
                log.log(&format!(
                    "Could not delete cache file {}",
                    entry_path.display()
                ));
            }
        }
    }

    Ok(())
}

/// Remove the instance's `tests/` directory contents if present. Internal
/// builds ship one and it trips downstream health checks; customer
/// installs never have it. Best-effort.
pub fn remove_tests_directory(runner: &dyn CommandRunner, log: &RunLog, instance: &Path) {
    let tests_dir = instance.join("tests");
    if let Err(problem) = clear_directory(runner, log, &tests_dir) {
        log.log(&format!("Skipping tests directory cleanup: {}", problem));
    }
}

/// Run the instance's repair/rebuild routine and require a zero exit.
///
/// The routine is installed from the coordinator's `assets/` directory when
/// the instance doesn't already carry it, and the installed copy is removed
/// afterwards either way.
pub fn run_repair(
    runner: &dyn CommandRunner,
    log: &RunLog,
    instance: &Path,
    workdir: &Path,
    interpreter: &str,
    repair_script: &str,
) -> Result<()> {
    log.log("Running repair/rebuild");

    let installed = instance.join(repair_script);
    if !installed.exists() {
        let source = workdir.join("assets").join(repair_script);
        std::fs::copy(&source, &installed).map_err(|e| {
            Error::step_failed(
                ErrorCode::StepRepairFailed,
                format!(
                    "Cannot install repair routine from {}: {}",
                    source.display(),
                    e
                ),
            )
        })?;
    }

    let command = format!(
        "{} -f {}",
        shell::quote_arg(interpreter),
        shell::quote_arg(repair_script),
    );
    log.log(&format!("running {}", command));
    let instance_dir = instance.display().to_string();
    let output = runner.run(&command, Some(instance_dir.as_str()));

    if std::fs::remove_file(&installed).is_err() {
        log.log(&format!(
            "Could not remove installed repair routine {}",
            installed.display()
        ));
    }

    if output.success {
        Ok(())
    } else {
        Err(Error::step_command_failed(
            ErrorCode::StepRepairFailed,
            "Repair/rebuild routine failed",
            command,
            output.exit_code,
            output.combined(),
        ))
    }
}

/// Build the path of a version's component directory under the upgrades
/// root, e.g. `upgrades/8.0.4/files/pre`. Returns None when the directory
/// does not exist.
pub fn component_path(
    upgrades_dir: &Path,
    version: &str,
    component: &str,
    stage: Option<&str>,
) -> Option<PathBuf> {
    let mut path = upgrades_dir.join(version).join(component);
    if let Some(stage) = stage {
        path = path.join(stage);
    }
    path.is_dir().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;
    use tempfile::tempdir;

    fn runlog(dir: &Path) -> RunLog {
        RunLog::new(dir.join("test.log"))
    }

    #[test]
    fn marker_version_from_php_assignment() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("version.php"),
            "<?php\n$app_version = '8.0.2';\n",
        )
        .unwrap();

        let version = current_version(dir.path(), "version.php").unwrap();
        assert_eq!(version.as_str(), "8.0.2");
    }

    #[test]
    fn marker_version_from_plain_text() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("version.php"), "9.1.0\n").unwrap();

        let version = current_version(dir.path(), "version.php").unwrap();
        assert_eq!(version.as_str(), "9.1.0");
    }

    #[test]
    fn missing_marker_is_not_an_instance() {
        let dir = tempdir().unwrap();
        let err = current_version(dir.path(), "version.php").unwrap_err();
        assert_eq!(err.code.as_str(), "preflight.not_an_instance");
    }

    #[test]
    fn marker_without_version_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("version.php"), "<?php // nothing\n").unwrap();
        assert!(current_version(dir.path(), "version.php").is_err());
    }

    #[test]
    fn accessible_directory_passes() {
        let dir = tempdir().unwrap();
        assert!(dir_is_accessible(dir.path()).is_ok());
    }

    #[test]
    fn missing_directory_is_not_accessible() {
        let problem = dir_is_accessible(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(problem.contains("not a directory"));
    }

    #[test]
    fn clear_directory_refuses_root() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let problem = clear_directory(&runner, &runlog(dir.path()), Path::new("/")).unwrap_err();
        assert!(problem.contains("root"));
        assert_eq!(runner.run_count(), 0);
    }

    #[test]
    fn clear_directory_empties_but_keeps_dir() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("cache_entry");
        std::fs::create_dir(&target).unwrap();

        let runner = ScriptedRunner::new();
        clear_directory(&runner, &runlog(dir.path()), &target).unwrap();
        assert!(runner.ran("rm -rf"));
        assert!(runner.ran("cache_entry"));
    }

    #[test]
    fn clear_cache_requires_cache_directory() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let err = clear_cache(&runner, &runlog(dir.path()), dir.path(), &[]).unwrap_err();
        assert_eq!(err.code.as_str(), "step.cache_clear_failed");
    }

    #[test]
    fn clear_cache_deletes_files_and_clears_dirs() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(cache.join("javascript/base")).unwrap();
        std::fs::write(cache.join("class_map.php"), "<?php").unwrap();

        let subpaths = vec![
            "class_map.php".to_string(),
            "javascript/base".to_string(),
            "include/javascript".to_string(), // absent: silently skipped
        ];

        let runner = ScriptedRunner::new();
        clear_cache(&runner, &runlog(dir.path()), dir.path(), &subpaths).unwrap();

        assert!(!cache.join("class_map.php").exists());
        assert!(cache.join("javascript/base").exists());
        assert!(runner.ran("javascript/base"));
    }

    #[test]
    fn run_repair_installs_runs_and_removes_routine() {
        let dir = tempdir().unwrap();
        let instance = dir.path().join("instance");
        let workdir = dir.path().join("work");
        std::fs::create_dir_all(&instance).unwrap();
        std::fs::create_dir_all(workdir.join("assets")).unwrap();
        std::fs::write(workdir.join("assets/repairAndRebuild.php"), "<?php").unwrap();

        let log = runlog(dir.path());
        let runner = ScriptedRunner::new();
        run_repair(
            &runner,
            &log,
            &instance,
            &workdir,
            "php",
            "repairAndRebuild.php",
        )
        .unwrap();

        assert!(runner.ran("php -f repairAndRebuild.php"));
        assert!(!instance.join("repairAndRebuild.php").exists());
    }

    #[test]
    fn run_repair_fails_on_nonzero_exit() {
        let dir = tempdir().unwrap();
        let instance = dir.path().join("instance");
        std::fs::create_dir_all(&instance).unwrap();
        std::fs::write(instance.join("repairAndRebuild.php"), "<?php").unwrap();

        let log = runlog(dir.path());
        let runner = ScriptedRunner::new().on("repairAndRebuild.php", 2, "");
        let err = run_repair(
            &runner,
            &log,
            &instance,
            dir.path(),
            "php",
            "repairAndRebuild.php",
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "step.repair_failed");
    }

    #[test]
    fn component_path_requires_existing_directory() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("8.0.4/files/pre")).unwrap();

        assert!(component_path(dir.path(), "8.0.4", "files", Some("pre")).is_some());
        assert!(component_path(dir.path(), "8.0.4", "files", Some("post")).is_none());
        assert!(component_path(dir.path(), "8.0.4", "upgrade", None).is_none());
    }
}
