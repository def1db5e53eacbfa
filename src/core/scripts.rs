//! Custom upgrade script execution.
//!
//! Each upgrade version may carry per-stage scripts. The coordinator stages
//! them into the instance and re-invokes this binary's internal `scripts`
//! subcommand, so script execution happens in a separate process whose exit
//! code is the only success signal crossing the boundary (plus the
//! persisted execution log).
//!
//! Script definitions are small JSON documents next to their payload files:
//!
//! ```json
//! { "name": "RebuildSavedSearches", "priority": 50, "kind": "php", "file": "rebuild.php" }
//! { "name": "FlushQueue", "kind": "shell", "command": "rm -f var/queue/*.job" }
//! ```
//!
//! The set of kinds is a closed registry; a definition that names anything
//! else does not resolve to a valid script type and fails the stage.
//! Priority orders execution (lowest first, ties keep discovery order);
//! every script that completes is recorded in the execution log immediately,
//! which is what makes a re-run skip it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::process::CommandRunner;
use crate::utils::{io, shell};
use crate::version::Stage;

const DEFAULT_PRIORITY: i64 = 100;

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

/// What a script needs to run: where the instance lives, which interpreter
/// to use, and where its staged payload files sit relative to the instance.
pub struct ScriptContext {
    pub instance_path: PathBuf,
    pub interpreter: String,
    pub staged_dir: String,
}

/// A unit of upgrade work: reports its priority, performs its action, may
/// fail.
pub trait CustomScript {
    fn name(&self) -> &str;
    fn priority(&self) -> i64;
    fn execute(&self, runner: &dyn CommandRunner, ctx: &ScriptContext) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ScriptDefinition {
    name: String,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(flatten)]
    kind: ScriptKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ScriptKind {
    Php { file: String },
    Shell { command: String },
}

/// Runs a staged PHP file through the configured interpreter, from the
/// instance directory.
struct PhpScript {
    name: String,
    priority: i64,
    file: String,
}

impl CustomScript for PhpScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn execute(&self, runner: &dyn CommandRunner, ctx: &ScriptContext) -> Result<()> {
        let staged_file = format!("{}/{}", ctx.staged_dir, self.file);
        let command = format!(
            "{} -f {}",
            shell::quote_arg(&ctx.interpreter),
            shell::quote_path(&staged_file),
        );
        run_script_command(runner, ctx, &self.name, &command)
    }
}

/// Runs a command line from the instance directory.
struct ShellCommandScript {
    name: String,
    priority: i64,
    command: String,
}

impl CustomScript for ShellCommandScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn execute(&self, runner: &dyn CommandRunner, ctx: &ScriptContext) -> Result<()> {
        run_script_command(runner, ctx, &self.name, &self.command)
    }
}

fn run_script_command(
    runner: &dyn CommandRunner,
    ctx: &ScriptContext,
    name: &str,
    command: &str,
) -> Result<()> {
    let instance_dir = ctx.instance_path.display().to_string();
    let output = runner.run(command, Some(instance_dir.as_str()));
    if output.success {
        Ok(())
    } else {
        Err(Error::script_execution_failed(
            name.to_string(),
            Some(output.combined()),
        ))
    }
}

/// Resolve a parsed definition into a script object.
fn instantiate(definition: ScriptDefinition) -> Box<dyn CustomScript> {
    match definition.kind {
        ScriptKind::Php { file } => Box::new(PhpScript {
            name: definition.name,
            priority: definition.priority,
            file,
        }),
        ScriptKind::Shell { command } => Box::new(ShellCommandScript {
            name: definition.name,
            priority: definition.priority,
            command,
        }),
    }
}

/// The per-(version, stage) record of successfully executed scripts.
/// Append-only; never rewritten or deleted here.
pub struct ExecutionLog {
    path: PathBuf,
}

impl ExecutionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn completed(&self) -> HashSet<String> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return HashSet::new();
        };
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn record(&self, identifier: &str) -> Result<()> {
        io::append_line(&self.path, identifier, "append script execution log")
    }
}

/// Fully-qualified identifier of a script within one upgrade step.
pub fn qualified_name(version: &str, stage: &str, name: &str) -> String {
    format!("{}.{}.{}", version, stage, name)
}

#[derive(Debug)]
pub struct ScriptReport {
    pub executed: Vec<String>,
    pub already_run: usize,
}

/// Discovers, orders and executes one stage's custom scripts.
pub struct ScriptRunner<'a> {
    version: String,
    stage: String,
    scripts_dir: PathBuf,
    staged_dir: String,
    instance_path: PathBuf,
    interpreter: String,
    log: ExecutionLog,
    runner: &'a dyn CommandRunner,
}

impl<'a> ScriptRunner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: impl Into<String>,
        stage: impl Into<String>,
        scripts_dir: impl Into<PathBuf>,
        staged_dir: impl Into<String>,
        instance_path: impl Into<PathBuf>,
        interpreter: impl Into<String>,
        log_file: impl Into<PathBuf>,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            version: version.into(),
            stage: stage.into(),
            scripts_dir: scripts_dir.into(),
            staged_dir: staged_dir.into(),
            instance_path: instance_path.into(),
            interpreter: interpreter.into(),
            log: ExecutionLog::new(log_file),
            runner,
        }
    }

    /// Validate the stage, discover and instantiate the stage's scripts,
    /// drop the ones already recorded, sort by priority and run the rest in
    /// order. The first failure aborts the remainder; everything that
    /// finished stays recorded.
    pub fn execute_scripts(&self) -> Result<ScriptReport> {
        let stage = Stage::parse(&self.stage)
            .ok_or_else(|| Error::script_stage_invalid(self.stage.clone()))?;

        let scripts = self.collect_scripts()?;

        let completed = self.log.completed();
        let total = scripts.len();
        let mut pending: Vec<Box<dyn CustomScript>> = scripts
            .into_iter()
            .filter(|script| {
                !completed.contains(&qualified_name(&self.version, stage.as_str(), script.name()))
            })
            .collect();
        let already_run = total - pending.len();

        // sort_by_key is stable: equal priorities keep discovery order
        pending.sort_by_key(|script| script.priority());

        let ctx = ScriptContext {
            instance_path: self.instance_path.clone(),
            interpreter: self.interpreter.clone(),
            staged_dir: self.staged_dir.clone(),
        };

        let mut executed = Vec::new();
        for script in &pending {
            script.execute(self.runner, &ctx)?;
            let identifier = qualified_name(&self.version, stage.as_str(), script.name());
            self.log.record(&identifier)?;
            executed.push(identifier);
        }

        Ok(ScriptReport {
            executed,
            already_run,
        })
    }

    /// Read every definition file in the scripts directory, in filename
    /// order, and instantiate each through the kind registry.
    fn collect_scripts(&self) -> Result<Vec<Box<dyn CustomScript>>> {
        if !self.scripts_dir.is_dir() {
            return Err(Error::script_dir_missing(
                self.scripts_dir.display().to_string(),
            ));
        }

        let mut scripts = Vec::new();
        for name in io::list_dir_names(&self.scripts_dir) {
            if !name.ends_with(".json") {
                continue; // payload file for one of the definitions
            }

            let path = self.scripts_dir.join(&name);
            let content = io::read_file(&path, "read script definition")?;
            let definition: ScriptDefinition = serde_json::from_str(&content)
                .map_err(|e| Error::script_definition_invalid(name.clone(), e.to_string()))?;
            scripts.push(instantiate(definition));
        }

        Ok(scripts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;
    use tempfile::tempdir;

    fn write_shell_script(dir: &Path, file: &str, name: &str, priority: i64) {
        let definition = format!(
            r#"{{ "name": "{}", "priority": {}, "kind": "shell", "command": "run-{}" }}"#,
            name, priority, name
        );
        std::fs::write(dir.join(file), definition).unwrap();
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("scripts")).unwrap();
            std::fs::create_dir_all(dir.path().join("instance")).unwrap();
            Self { dir }
        }

        fn scripts_dir(&self) -> PathBuf {
            self.dir.path().join("scripts")
        }

        fn runner_for<'a>(&self, stage: &str, runner: &'a ScriptedRunner) -> ScriptRunner<'a> {
            ScriptRunner::new(
                "8.0.4",
                stage,
                self.scripts_dir(),
                "upgrade/custom/pre",
                self.dir.path().join("instance"),
                "php",
                self.dir.path().join("scripts.log"),
                runner,
            )
        }
    }

    #[test]
    fn invalid_stage_is_rejected() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new();
        let err = fixture
            .runner_for("mid", &runner)
            .execute_scripts()
            .unwrap_err();
        assert_eq!(err.code.as_str(), "script.stage_invalid");
    }

    #[test]
    fn missing_scripts_directory_fails() {
        let fixture = Fixture::new();
        std::fs::remove_dir(fixture.scripts_dir()).unwrap();
        let runner = ScriptedRunner::new();
        let err = fixture
            .runner_for("pre", &runner)
            .execute_scripts()
            .unwrap_err();
        assert_eq!(err.code.as_str(), "script.dir_missing");
    }

    #[test]
    fn unknown_kind_does_not_resolve() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.scripts_dir().join("bad.json"),
            r#"{ "name": "Bad", "kind": "python", "command": "x" }"#,
        )
        .unwrap();

        let runner = ScriptedRunner::new();
        let err = fixture
            .runner_for("pre", &runner)
            .execute_scripts()
            .unwrap_err();
        assert_eq!(err.code.as_str(), "script.definition_invalid");
    }

    #[test]
    fn priority_sort_is_stable_across_ties() {
        let fixture = Fixture::new();
        let dir = fixture.scripts_dir();
        // discovery order is filename order: a..e
        write_shell_script(&dir, "a.json", "A", 500);
        write_shell_script(&dir, "b.json", "B", 50);
        write_shell_script(&dir, "c.json", "C", 250);
        write_shell_script(&dir, "d.json", "D", 350);
        write_shell_script(&dir, "e.json", "E", 50);

        let runner = ScriptedRunner::new();
        let report = fixture
            .runner_for("pre", &runner)
            .execute_scripts()
            .unwrap();

        let commands = runner.commands.borrow().clone();
        assert_eq!(
            commands,
            vec!["run-B", "run-E", "run-C", "run-D", "run-A"]
        );
        assert_eq!(report.executed.len(), 5);
        assert_eq!(report.already_run, 0);
    }

    #[test]
    fn logged_scripts_are_never_executed_twice() {
        let fixture = Fixture::new();
        write_shell_script(&fixture.scripts_dir(), "a.json", "A", 10);
        write_shell_script(&fixture.scripts_dir(), "b.json", "B", 20);

        let first = ScriptedRunner::new();
        let report = fixture
            .runner_for("pre", &first)
            .execute_scripts()
            .unwrap();
        assert_eq!(report.executed.len(), 2);

        let second = ScriptedRunner::new();
        let report = fixture
            .runner_for("pre", &second)
            .execute_scripts()
            .unwrap();
        assert_eq!(report.executed.len(), 0);
        assert_eq!(report.already_run, 2);
        assert_eq!(second.run_count(), 0);
    }

    #[test]
    fn failing_script_aborts_but_keeps_earlier_successes_logged() {
        let fixture = Fixture::new();
        write_shell_script(&fixture.scripts_dir(), "a.json", "First", 10);
        write_shell_script(&fixture.scripts_dir(), "b.json", "Breaks", 20);
        write_shell_script(&fixture.scripts_dir(), "c.json", "Never", 30);

        let runner = ScriptedRunner::new().on("run-Breaks", 1, "");
        let err = fixture
            .runner_for("pre", &runner)
            .execute_scripts()
            .unwrap_err();
        assert_eq!(err.code.as_str(), "script.execution_failed");
        assert!(!runner.ran("run-Never"));

        let log = ExecutionLog::new(fixture.dir.path().join("scripts.log"));
        let completed = log.completed();
        assert!(completed.contains("8.0.4.pre.First"));
        assert!(!completed.contains("8.0.4.pre.Breaks"));
    }

    #[test]
    fn php_scripts_run_through_the_interpreter() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.scripts_dir().join("a.json"),
            r#"{ "name": "Rebuild", "kind": "php", "file": "rebuild.php" }"#,
        )
        .unwrap();

        let runner = ScriptedRunner::new();
        fixture
            .runner_for("pre", &runner)
            .execute_scripts()
            .unwrap();
        assert!(runner.ran("php -f 'upgrade/custom/pre/rebuild.php'"));
    }

    #[test]
    fn qualified_names_nest_version_and_stage() {
        assert_eq!(qualified_name("8.0.4", "pre", "Fix"), "8.0.4.pre.Fix");
    }
}
