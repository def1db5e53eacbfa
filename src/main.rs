use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::GlobalArgs;
use commands::{plan, preflight, run, scripts};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version = VERSION)]
#[command(about = "CLI for staged, multi-version application instance upgrades")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every pending upgrade version to an instance
    Run(run::RunArgs),
    /// Show the computed upgrade plan without applying anything
    Plan(plan::PlanArgs),
    /// Run preflight checks only
    Preflight(preflight::PreflightArgs),
    /// Execute staged upgrade scripts (spawned internally during a run)
    #[command(hide = true)]
    Scripts(scripts::ScriptsArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs {};

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    let _ = output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
