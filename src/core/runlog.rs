//! The coordinator's run log.
//!
//! Every message is appended to a timestamped text log and mirrored to
//! stderr. A log that cannot be written must never stop an upgrade, so
//! write failures degrade to the stderr mirror alone.

use std::path::{Path, PathBuf};

use crate::log_status;
use crate::utils::io;

pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, msg: &str) {
        log_status!("upgrade", "{}", msg);

        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{}: {}", stamp, msg);
        if io::append_line(&self.path, &line, "append run log").is_err() {
            eprintln!("Cannot write to log file {}", self.path.display());
            eprintln!("{}", msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_appends_timestamped_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coordinator.log");
        let log = RunLog::new(&path);

        log.log("first message");
        log.log("second message");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(": first message"));
        assert!(lines[1].ends_with(": second message"));
        // leading timestamp: "YYYY-MM-DD HH:MM:SS"
        assert_eq!(&lines[0][4..5], "-");
    }

    #[test]
    fn log_survives_unwritable_path() {
        let log = RunLog::new("/nonexistent/dir/coordinator.log");
        log.log("does not panic");
    }
}
