use clap::Args;
use serde::Serialize;

use stagehand::coordinator::Coordinator;
use stagehand::ShellRunner;

use super::{CmdResult, TargetArgs};

#[derive(Args)]
pub struct PreflightArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightOutput {
    pub command: String,
    pub instance_path: String,
    pub passed: bool,
}

pub fn run(
    args: PreflightArgs,
    _global: &crate::commands::GlobalArgs,
) -> CmdResult<PreflightOutput> {
    let config = args.target.build_config()?;
    let workdir = super::workdir()?;
    let instance_path = config.instance_path.clone();

    let runner = ShellRunner::new();
    let mut coordinator = Coordinator::new(config, workdir, &runner);
    coordinator.preflight_only()?;

    Ok((
        PreflightOutput {
            command: "preflight".to_string(),
            instance_path,
            passed: true,
        },
        0,
    ))
}
