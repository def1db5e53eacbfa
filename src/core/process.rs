//! Shell command execution.
//!
//! Every external collaborator (archiving utilities, the instance's
//! repair/rebuild routine, the silent installer, the staged script launcher)
//! is reached through the `CommandRunner` trait. Calls are synchronous and
//! blocking; the exit code plus captured output is the only completion
//! signal.

use std::process::Command;

use crate::utils::shell;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Trimmed stdout and stderr joined into one block, for log lines.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        if err.is_empty() {
            out.to_string()
        } else if out.is_empty() {
            err.to_string()
        } else {
            format!("{}\n{}", out, err)
        }
    }
}

/// Trait for running shell commands - the seam between the upgrade logic
/// and the host system.
pub trait CommandRunner {
    fn run(&self, command: &str, current_dir: Option<&str>) -> CommandOutput;
}

/// Runs commands through `sh -c` on the local host.
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, current_dir: Option<&str>) -> CommandOutput {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);

        if let Some(dir) = current_dir {
            cmd.current_dir(dir);
        }

        match cmd.output() {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput {
                stdout: String::new(),
                stderr: format!("Command error: {}", e),
                success: false,
                exit_code: -1,
            },
        }
    }
}

/// Returns true if the named utility can be resolved on this host.
pub fn utility_available(runner: &dyn CommandRunner, name: &str) -> bool {
    let output = runner.run(&format!("command -v {}", shell::quote_arg(name)), None);
    output.success
}

#[cfg(test)]
pub mod testing {
    use super::{CommandOutput, CommandRunner};
    use std::cell::RefCell;

    /// A scripted runner for tests: matches commands by substring and
    /// returns the scripted result, recording everything it was asked to run.
    /// Unmatched commands succeed with empty output.
    pub struct ScriptedRunner {
        rules: Vec<(String, i32, String)>,
        pub commands: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self {
                rules: Vec::new(),
                commands: RefCell::new(Vec::new()),
            }
        }

        /// When a command contains `pattern`, respond with `exit_code` and
        /// `stdout`. First matching rule wins.
        pub fn on(mut self, pattern: &str, exit_code: i32, stdout: &str) -> Self {
            self.rules
                .push((pattern.to_string(), exit_code, stdout.to_string()));
            self
        }

        pub fn ran(&self, pattern: &str) -> bool {
            self.commands
                .borrow()
                .iter()
                .any(|c| c.contains(pattern))
        }

        pub fn run_count(&self) -> usize {
            self.commands.borrow().len()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, command: &str, _current_dir: Option<&str>) -> CommandOutput {
            self.commands.borrow_mut().push(command.to_string());

            for (pattern, exit_code, stdout) in &self.rules {
                if command.contains(pattern.as_str()) {
                    return CommandOutput {
                        stdout: stdout.clone(),
                        stderr: String::new(),
                        success: *exit_code == 0,
                        exit_code: *exit_code,
                    };
                }
            }

            CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                success: true,
                exit_code: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_runner_captures_stdout_and_exit_code() {
        let runner = ShellRunner::new();
        let output = runner.run("printf hello", None);
        assert!(output.success);
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "hello");
    }

    #[test]
    fn shell_runner_reports_failure() {
        let runner = ShellRunner::new();
        let output = runner.run("exit 3", None);
        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
    }

    #[test]
    fn combined_output_merges_streams() {
        let output = CommandOutput {
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
            success: false,
            exit_code: 1,
        };
        assert_eq!(output.combined(), "out\nerr");
    }

    #[test]
    fn scripted_runner_matches_rules_in_order() {
        use testing::ScriptedRunner;

        let runner = ScriptedRunner::new()
            .on("zip", 1, "")
            .on("unzip", 0, "ok");
        let output = runner.run("cd /tmp; zip -q -r out.zip *", None);
        assert!(!output.success);
        assert!(runner.ran("zip"));
    }
}
