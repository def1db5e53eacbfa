//! Archive packaging.
//!
//! Directory trees transit into the instance as zip artifacts built and
//! unpacked by the host's `zip`/`unzip` utilities (preflight verifies both).
//! Artifacts are ephemeral: the coordinator records every path returned or
//! consumed here and deletes them after each version step.

use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorCode, Result};
use crate::process::CommandRunner;
use crate::runlog::RunLog;
use crate::utils::shell;

/// Zip the contents of `src_dir` into `<workdir>/<zip_name>`.
///
/// `.placeholder` files (used to keep empty directories under version
/// control) are excluded from the archive.
pub fn zip_directory(
    runner: &dyn CommandRunner,
    log: &RunLog,
    src_dir: &Path,
    zip_name: &str,
    workdir: &Path,
) -> Result<PathBuf> {
    if src_dir.as_os_str().is_empty() {
        return Err(Error::validation_invalid_argument(
            "path",
            "Cannot zip an empty path",
            None,
        ));
    }
    if zip_name.is_empty() {
        return Err(Error::validation_invalid_argument(
            "zipName",
            "A zip file name is required",
            None,
        ));
    }

    let zip_path = workdir.join(zip_name);
    let command = format!(
        "cd {}; zip --exclude .placeholder -q -r {} *",
        shell::quote_path(&src_dir.display().to_string()),
        shell::quote_path(&zip_path.display().to_string()),
    );

    log.log(&format!("running {}", command));
    let output = runner.run(&command, None);
    if !output.success {
        log.log(&format!("Failed to zip {}", src_dir.display()));
        log.log(&output.combined());
        return Err(Error::step_command_failed(
            ErrorCode::StepArchiveFailed,
            format!("Failed to zip {}", src_dir.display()),
            command,
            output.exit_code,
            output.combined(),
        ));
    }

    log.log(&format!(
        "Zipped {} to {}",
        src_dir.display(),
        zip_path.display()
    ));
    Ok(zip_path)
}

/// Unpack `archive` into the directory `dest`, overwriting existing files.
pub fn unzip(
    runner: &dyn CommandRunner,
    log: &RunLog,
    archive: &Path,
    dest: &Path,
) -> Result<()> {
    log.log(&format!("unzipping {}", archive.display()));

    if !archive.is_file() {
        return Err(Error::step_failed(
            ErrorCode::StepUnpackFailed,
            format!("{} is not a valid file", archive.display()),
        ));
    }
    if !dest.is_dir() {
        return Err(Error::step_failed(
            ErrorCode::StepUnpackFailed,
            format!(
                "Cannot unzip {} to {} - it's not a directory",
                archive.display(),
                dest.display()
            ),
        ));
    }

    let command = format!(
        "unzip -o {} -d {}",
        shell::quote_path(&archive.display().to_string()),
        shell::quote_path(&dest.display().to_string()),
    );
    let output = runner.run(&command, None);
    if !output.success {
        log.log(&format!(
            "Unzipping {} to {} failed with exit code {}",
            archive.display(),
            dest.display(),
            output.exit_code
        ));
        return Err(Error::step_command_failed(
            ErrorCode::StepUnpackFailed,
            format!("Failed to unzip {}", archive.display()),
            command,
            output.exit_code,
            output.combined(),
        ));
    }

    Ok(())
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
    fn zip_directory_requires_a_name() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let err = zip_directory(&runner, &runlog(dir.path()), dir.path(), "", dir.path())
            .unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert_eq!(runner.run_count(), 0);
    }

    #[test]
    fn zip_directory_builds_archive_in_workdir() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let path = zip_directory(
            &runner,
            &runlog(dir.path()),
            dir.path(),
            "files.8.0.4.pre.zip",
            dir.path(),
        )
        .unwrap();

        assert_eq!(path, dir.path().join("files.8.0.4.pre.zip"));
        assert!(runner.ran("zip --exclude .placeholder -q -r"));
    }

    #[test]
    fn zip_directory_surfaces_command_failure() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new().on("zip --exclude", 12, "");
        let err = zip_directory(
            &runner,
            &runlog(dir.path()),
            dir.path(),
            "out.zip",
            dir.path(),
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "step.archive_failed");
        assert_eq!(err.details["exitCode"], 12);
    }

    #[test]
    fn unzip_rejects_missing_archive() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let err = unzip(
            &runner,
            &runlog(dir.path()),
            &dir.path().join("missing.zip"),
            dir.path(),
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "step.unpack_failed");
        assert_eq!(runner.run_count(), 0);
    }

    #[test]
    fn unzip_rejects_non_directory_destination() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        std::fs::write(&archive, "fake").unwrap();

        let runner = ScriptedRunner::new();
        let err = unzip(
            &runner,
            &runlog(dir.path()),
            &archive,
            &dir.path().join("nodir"),
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "step.unpack_failed");
    }

    #[test]
    fn unzip_runs_overwriting_extract() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        std::fs::write(&archive, "fake").unwrap();

        let runner = ScriptedRunner::new();
        unzip(&runner, &runlog(dir.path()), &archive, dir.path()).unwrap();
        assert!(runner.ran("unzip -o"));
    }
}
