use std::path::PathBuf;

use clap::Args;

use stagehand::config::CoordinatorConfig;

pub type CmdResult<T> = stagehand::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

/// Target selection shared by `run`, `plan` and `preflight`.
#[derive(Args, Default, Debug)]
pub struct TargetArgs {
    /// Instance path (defaults to the configured value)
    pub instance_path: Option<String>,

    /// Interpreter path or alias used for the instance's routines
    #[arg(long, value_name = "PATH")]
    pub interpreter: Option<String>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Administrative user passed to the silent installer
    #[arg(long, value_name = "USER")]
    pub admin_user: Option<String>,

    /// Minimum interpreter version (empty string disables the check)
    #[arg(long, value_name = "VERSION")]
    pub min_php_version: Option<String>,

    /// Filename prefix of the core installer payload
    #[arg(long, value_name = "PREFIX")]
    pub package_prefix: Option<String>,

    /// Upgrades directory, relative to the working directory
    #[arg(long, value_name = "DIR")]
    pub upgrades_dir: Option<String>,
}

impl TargetArgs {
    /// Defaults, then the config file, then flag overrides.
    pub fn build_config(&self) -> stagehand::Result<CoordinatorConfig> {
        let mut config = match &self.config {
            Some(path) => CoordinatorConfig::load(std::path::Path::new(path))?,
            None => CoordinatorConfig::default(),
        };

        if let Some(instance_path) = &self.instance_path {
            config.instance_path = instance_path.clone();
        }
        if let Some(interpreter) = &self.interpreter {
            config.php_path = interpreter.clone();
        }
        if let Some(admin_user) = &self.admin_user {
            config.admin_user = admin_user.clone();
        }
        if let Some(min) = &self.min_php_version {
            config.php_version_required = min.clone();
        }
        if let Some(prefix) = &self.package_prefix {
            config.package_prefix = prefix.clone();
        }
        if let Some(dir) = &self.upgrades_dir {
            config.upgrades_dir = dir.clone();
        }

        config.validated()
    }
}

pub fn workdir() -> stagehand::Result<PathBuf> {
    std::env::current_dir().map_err(|e| {
        stagehand::Error::internal_io(e.to_string(), Some("resolve working directory".to_string()))
    })
}

pub mod plan;
pub mod preflight;
pub mod run;
pub mod scripts;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (stagehand::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Preflight(args) => dispatch!(args, global, preflight),
        crate::Commands::Scripts(args) => dispatch!(args, global, scripts),
    }
}
