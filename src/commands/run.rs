use clap::Args;
use serde::Serialize;

use stagehand::coordinator::{Coordinator, VersionOutcome};
use stagehand::ShellRunner;

use super::{CmdResult, TargetArgs};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub command: String,
    pub instance_path: String,
    pub initial_version: String,
    pub final_version: String,
    pub plan: Vec<String>,
    pub outcomes: Vec<VersionOutcome>,
    pub success: bool,
}

pub fn run(args: RunArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<RunOutput> {
    let config = args.target.build_config()?;
    let workdir = super::workdir()?;
    let instance_path = config.instance_path.clone();

    let runner = ShellRunner::new();
    let mut coordinator = Coordinator::new(config, workdir, &runner);
    let report = coordinator.run()?;

    let exit_code = if report.success { 0 } else { 1 };

    Ok((
        RunOutput {
            command: "run".to_string(),
            instance_path,
            initial_version: report.initial_version,
            final_version: report.final_version,
            plan: report.plan,
            outcomes: report.outcomes,
            success: report.success,
        },
        exit_code,
    ))
}
