use clap::Args;
use serde::Serialize;

use stagehand::coordinator::{Coordinator, PlanEntry};
use stagehand::ShellRunner;

use super::{CmdResult, TargetArgs};

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutput {
    pub command: String,
    pub instance_path: String,
    pub current_version: String,
    pub entries: Vec<PlanEntry>,
}

pub fn run(args: PlanArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<PlanOutput> {
    let config = args.target.build_config()?;
    let workdir = super::workdir()?;
    let instance_path = config.instance_path.clone();

    let runner = ShellRunner::new();
    let coordinator = Coordinator::new(config, workdir, &runner);
    let report = coordinator.plan_preview()?;

    Ok((
        PlanOutput {
            command: "plan".to_string(),
            instance_path,
            current_version: report.current_version,
            entries: report.entries,
        },
        0,
    ))
}
