//! Internal launcher for staged upgrade scripts.
//!
//! The coordinator re-invokes its own binary with this hidden subcommand
//! after staging a version+stage's scripts into the instance. The exit
//! code is the only signal that crosses back; the execution log persists
//! which scripts completed.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use stagehand::scripts::ScriptRunner;
use stagehand::ShellRunner;

use super::CmdResult;

#[derive(Args)]
pub struct ScriptsArgs {
    /// Upgrade version being applied
    #[arg(long)]
    pub version: String,

    /// Stage to execute: pre or post
    #[arg(long)]
    pub stage: String,

    /// Staged scripts directory, relative to the instance
    #[arg(long)]
    pub scripts_dir: String,

    /// Instance path
    #[arg(long)]
    pub instance: String,

    /// Interpreter used for php-kind scripts
    #[arg(long)]
    pub interpreter: String,

    /// Execution log file (absolute path)
    #[arg(long)]
    pub log_file: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptsOutput {
    pub command: String,
    pub version: String,
    pub stage: String,
    pub executed: Vec<String>,
    pub already_run: usize,
}

pub fn run(args: ScriptsArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<ScriptsOutput> {
    let instance = PathBuf::from(&args.instance);
    let scripts_dir = instance.join(&args.scripts_dir);

    let runner = ShellRunner::new();
    let script_runner = ScriptRunner::new(
        args.version.clone(),
        args.stage.clone(),
        scripts_dir,
        args.scripts_dir.clone(),
        instance,
        args.interpreter.clone(),
        PathBuf::from(&args.log_file),
        &runner,
    );

    let report = script_runner.execute_scripts()?;

    Ok((
        ScriptsOutput {
            command: "scripts.exec".to_string(),
            version: args.version,
            stage: args.stage,
            executed: report.executed,
            already_run: report.already_run,
        },
        0,
    ))
}
