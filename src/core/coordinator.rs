//! The upgrade coordinator.
//!
//! Discovers the upgrade versions available under the working directory,
//! validates the environment, and drives each version through the staged
//! pipeline: delete-list, pre patches, pre scripts, cache clear, repair,
//! silent install, post patches, post scripts, cache clear, repair. A step
//! failure aborts the version and the run; a version at or below the
//! instance's installed version is skipped, which is what makes a re-run
//! after a partial failure resume at the first unapplied version.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::archive;
use crate::config::CoordinatorConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::instance;
use crate::process::{self, CommandRunner};
use crate::runlog::RunLog;
use crate::utils::{io, shell};
use crate::version::{self, ReleaseVersion, Stage, UpgradeVersion};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Applied,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionOutcome {
    pub version: String,
    pub status: VersionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub initial_version: String,
    pub final_version: String,
    pub plan: Vec<String>,
    pub outcomes: Vec<VersionOutcome>,
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub version: String,
    pub action: PlanAction,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Apply,
    Skip,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub current_version: String,
    pub entries: Vec<PlanEntry>,
}

pub struct Coordinator<'a> {
    config: CoordinatorConfig,
    workdir: PathBuf,
    runner: &'a dyn CommandRunner,
    log: RunLog,
    current_version: Option<ReleaseVersion>,
    artifacts: Vec<PathBuf>,
}

impl<'a> Coordinator<'a> {
    pub fn new(config: CoordinatorConfig, workdir: PathBuf, runner: &'a dyn CommandRunner) -> Self {
        let log = RunLog::new(workdir.join(&config.log_file));
        Self {
            config,
            workdir,
            runner,
            log,
            current_version: None,
            artifacts: Vec::new(),
        }
    }

    fn instance_path(&self) -> PathBuf {
        PathBuf::from(&self.config.instance_path)
    }

    fn upgrades_root(&self) -> PathBuf {
        self.workdir.join(&self.config.upgrades_dir)
    }

    /// Run the whole upgrade: preflight, then every planned version in
    /// order. Ephemeral archives are removed after every version step
    /// regardless of that step's outcome. Stops at the first failed
    /// version.
    pub fn run(&mut self) -> Result<RunReport> {
        self.ensure_logs_dir()?;
        self.current_version = instance::current_version(
            &self.instance_path(),
            &self.config.version_marker,
        )
        .ok();

        let plan = self.collect_upgrades();

        // Internal builds ship a tests/ tree that trips the instance's own
        // health checks once upgraded, so drop it before anything else.
        instance::remove_tests_directory(self.runner, &self.log, &self.instance_path());

        self.preflight(&plan)?;

        let initial_version = self.current_version_string();
        self.log.log("Starting upgrade steps");

        let mut outcomes = Vec::new();
        let mut success = true;
        for version in &plan {
            let result = self.execute_upgrade(version);
            self.cleanup_artifacts();

            match result {
                Ok(true) => outcomes.push(VersionOutcome {
                    version: version.to_string(),
                    status: VersionStatus::Applied,
                    error: None,
                }),
                Ok(false) => outcomes.push(VersionOutcome {
                    version: version.to_string(),
                    status: VersionStatus::Skipped,
                    error: None,
                }),
                Err(err) => {
                    self.log
                        .log(&format!("Upgrade step targeting version {} failed!", version));
                    outcomes.push(VersionOutcome {
                        version: version.to_string(),
                        status: VersionStatus::Failed,
                        error: Some(err.message.clone()),
                    });
                    success = false;
                    break;
                }
            }
        }

        if success {
            self.log.log("All upgrade steps complete");
        } else {
            self.log.log("Upgrade Failed");
        }

        Ok(RunReport {
            initial_version,
            final_version: self.current_version_string(),
            plan: plan.iter().map(|v| v.to_string()).collect(),
            outcomes,
            success,
        })
    }

    /// Compute the plan and predict, per version, whether a run would apply
    /// or skip it.
    pub fn plan_preview(&self) -> Result<PlanReport> {
        let current =
            instance::current_version(&self.instance_path(), &self.config.version_marker)?;
        let plan = self.collect_upgrades();

        let entries = plan
            .iter()
            .map(|version| PlanEntry {
                version: version.to_string(),
                action: if version.is_higher_than(&current) {
                    PlanAction::Apply
                } else {
                    PlanAction::Skip
                },
            })
            .collect();

        Ok(PlanReport {
            current_version: current.as_str().to_string(),
            entries,
        })
    }

    /// Run preflight checks only (for the `preflight` subcommand).
    pub fn preflight_only(&mut self) -> Result<()> {
        self.ensure_logs_dir()?;
        let plan = self.collect_upgrades();
        self.preflight(&plan)
    }

    fn ensure_logs_dir(&self) -> Result<()> {
        std::fs::create_dir_all(self.workdir.join("logs"))
            .map_err(|e| Error::internal_io(e.to_string(), Some("create logs directory".to_string())))
    }

    fn current_version_string(&self) -> String {
        self.current_version
            .as_ref()
            .map(|v| v.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn current_version_required(&self) -> Result<ReleaseVersion> {
        self.current_version.clone().ok_or_else(|| {
            Error::internal_unexpected("Instance version is unknown after preflight")
        })
    }

    /// Scan the upgrades root and build the ordered plan. Non-version
    /// entries are logged and skipped.
    fn collect_upgrades(&self) -> Vec<UpgradeVersion> {
        let root = self.upgrades_root();
        let names = self.upgrade_dir_names(&root);
        if names.is_empty() {
            self.log.log(&format!(
                "There are no upgrades in {} - you should check that path.",
                root.display()
            ));
        }

        let log = &self.log;
        version::build_plan(&names, |warning| log.log(warning))
    }

    fn upgrade_dir_names(&self, root: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(root) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    /// Everything that must be in place before the first version is
    /// touched. Any failure aborts the run before mutating the instance.
    fn preflight(&mut self, plan: &[UpgradeVersion]) -> Result<()> {
        if let Err(problem) = instance::dir_is_accessible(&self.workdir) {
            self.log.log("Cannot access current working directory.");
            return Err(Error::preflight_dir_not_accessible(
                self.workdir.display().to_string(),
                problem,
            ));
        }

        let instance_path = self.instance_path();
        if let Err(problem) = instance::dir_is_accessible(&instance_path) {
            self.log.log("Cannot access instance directory");
            return Err(Error::preflight_dir_not_accessible(
                instance_path.display().to_string(),
                problem,
            ));
        }

        match instance::current_version(&instance_path, &self.config.version_marker) {
            Ok(version) => {
                self.log.log(&format!(
                    "Determined the current instance version - {}",
                    version
                ));
                self.current_version = Some(version);
            }
            Err(err) => {
                self.log.log(&format!(
                    "Could not find {} in {} - is this really the instance directory?",
                    self.config.version_marker,
                    instance_path.display()
                ));
                return Err(err);
            }
        }

        let missing: Vec<String> = ["zip", "unzip"]
            .iter()
            .filter(|name| !process::utility_available(self.runner, name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            self.log.log("Zip and/or Unzip are not available.");
            return Err(Error::preflight_utility_missing(missing));
        }

        self.check_interpreter()?;
        self.check_upgrade_packages(plan)?;

        Ok(())
    }

    /// The default interpreter alias is taken on faith (resolved through
    /// PATH); an overridden path must point at a real file. The reported
    /// version must meet the configured minimum unless the minimum is
    /// unset.
    fn check_interpreter(&self) -> Result<()> {
        let php_path = &self.config.php_path;
        if php_path != "php" && !Path::new(php_path).is_file() {
            self.log
                .log(&format!("Invalid php path: {} is not a file.", php_path));
            return Err(Error::preflight_interpreter_invalid(php_path.clone()));
        }

        if !self.config.requires_interpreter_version() {
            self.log
                .log("No minimum php version has been specified - not checking PHP version");
            return Ok(());
        }

        let required = self.config.php_version_required.trim();
        let output = self
            .runner
            .run(&format!("{} -v", shell::quote_arg(php_path)), None);
        if !output.success {
            return Err(
                Error::preflight_interpreter_invalid(php_path.clone())
                    .with_hint("The interpreter could not report its version"),
            );
        }

        let found = version::extract_version_token(&output.stdout);
        match found {
            Some(found) if version::minimum_version_met(&found, required) => {
                self.log.log(&format!("PHP version is OK! {}", found));
                Ok(())
            }
            Some(found) => {
                self.log.log(&format!(
                    "Installed PHP version is {}, which is lower than the minimum required version {}",
                    found, required
                ));
                Err(Error::preflight_interpreter_too_old(found, required))
            }
            None => Err(Error::preflight_interpreter_too_old(
                "unknown", required,
            )),
        }
    }

    /// Every non-final planned version must carry a non-empty core
    /// installer package and a non-empty silent upgrader. The final step
    /// carries only patches and scripts, which are optional everywhere, so
    /// it is exempt. All problems are reported before failing.
    fn check_upgrade_packages(&self, plan: &[UpgradeVersion]) -> Result<()> {
        let root = self.upgrades_root();
        let mut problems = Vec::new();

        for version in plan {
            if version.is_final() {
                continue;
            }
            let name = version.to_string();

            for component in ["upgrade", "silent_upgrader"] {
                match instance::component_path(&root, &name, component, None) {
                    Some(dir) if !io::list_dir_names(&dir).is_empty() => {}
                    Some(dir) => {
                        let problem = format!(
                            "{} directory for {} ({}) is empty - cannot run upgrade",
                            component,
                            name,
                            dir.display()
                        );
                        self.log.log(&problem);
                        problems.push(problem);
                    }
                    None => {
                        let problem = format!(
                            "Cannot find {} directory for {} - cannot run upgrade",
                            component, name
                        );
                        self.log.log(&problem);
                        problems.push(problem);
                    }
                }
            }
        }

        if !problems.is_empty() {
            self.log
                .log("Missing upgrade packages and/or silent upgrader - upgrade check failed.");
            return Err(Error::preflight_package_incomplete(problems));
        }

        self.log.log("All upgrade packages look ok");
        Ok(())
    }

    /// Apply one planned version. Returns Ok(false) when the instance is
    /// already at or past it - a designed no-op, not a failure.
    fn execute_upgrade(&mut self, version: &UpgradeVersion) -> Result<bool> {
        self.artifacts.clear();

        let current = self.current_version_required()?;
        if !version.is_higher_than(&current) {
            self.log.log(&format!(
                "Our current instance version is {}, so skipping the upgrade to {}",
                current, version
            ));
            return Ok(false);
        }

        let name = version.to_string();

        self.delete_files_from_list(&name)?;
        self.deploy_patch_files(&name, Stage::Pre)?;
        self.run_custom_scripts(&name, Stage::Pre)?;
        self.clear_cache()?;
        self.run_repair()?;
        self.execute_silent_install(version)?;
        self.deploy_patch_files(&name, Stage::Post)?;
        self.run_custom_scripts(&name, Stage::Post)?;
        self.clear_cache()?;
        self.run_repair()?;

        self.current_version = Some(instance::current_version(
            &self.instance_path(),
            &self.config.version_marker,
        )?);

        self.log.log(&format!("Upgrade to {} complete", version));
        Ok(true)
    }

    /// Delete every file named in the version's delete-list manifest from
    /// the instance. No manifest means nothing to delete; a listed file
    /// that is already gone counts as deleted.
    fn delete_files_from_list(&self, version: &str) -> Result<()> {
        let manifest = self.upgrades_root().join(version).join("delete_list.txt");
        if !manifest.is_file() {
            self.log.log(&format!(
                "no delete list file exists at {} - skipping",
                manifest.display()
            ));
            return Ok(());
        }

        self.log.log(&format!(
            "Getting ready to delete files listed in {}",
            manifest.display()
        ));
        let content = io::read_file(&manifest, "read delete list").map_err(|e| {
            Error::step_failed(
                ErrorCode::StepDeleteListFailed,
                format!("Cannot read {}: {}", manifest.display(), e),
            )
        })?;

        for line in content.lines() {
            let entry = line.trim();
            if entry.is_empty() {
                continue;
            }

            let target = self.instance_path().join(entry);
            self.log.log(&format!("deleting {}", target.display()));
            if !target.exists() {
                self.log.log(&format!(
                    "cannot delete {} - it does not exist - already deleted?",
                    target.display()
                ));
                continue;
            }

            std::fs::remove_file(&target).map_err(|e| {
                Error::step_failed(
                    ErrorCode::StepDeleteListFailed,
                    format!("Failed to delete {}: {}", target.display(), e),
                )
            })?;
        }

        Ok(())
    }

    fn deploy_patch_files(&mut self, version: &str, stage: Stage) -> Result<()> {
        self.build_and_deploy_zip(version, "files", stage)
    }

    /// Zip a stage's patch tree and unpack it over the instance root.
    /// An absent or empty source is "nothing to deploy", not a failure.
    fn build_and_deploy_zip(&mut self, version: &str, component: &str, stage: Stage) -> Result<()> {
        let Some(src_dir) =
            instance::component_path(&self.upgrades_root(), version, component, Some(stage.as_str()))
        else {
            self.log.log(&format!(
                "No {} directory for the {} stage of {} - skipping",
                component, stage, version
            ));
            return Ok(());
        };

        if io::list_dir_names(&src_dir).is_empty() {
            self.log.log(&format!(
                "Patch files for {} {} ({}) is empty - skipping",
                version,
                stage,
                src_dir.display()
            ));
            return Ok(());
        }

        let zip_name = format!("{}.{}.{}.zip", component, version, stage);
        let zip_path =
            archive::zip_directory(self.runner, &self.log, &src_dir, &zip_name, &self.workdir)?;
        self.artifacts.push(zip_path.clone());

        archive::unzip(self.runner, &self.log, &zip_path, &self.instance_path())
    }

    fn clear_cache(&self) -> Result<()> {
        instance::clear_cache(
            self.runner,
            &self.log,
            &self.instance_path(),
            &self.config.cache_subpaths,
        )
    }

    fn run_repair(&self) -> Result<()> {
        instance::run_repair(
            self.runner,
            &self.log,
            &self.instance_path(),
            &self.workdir,
            &self.config.php_path,
            &self.config.repair_script,
        )
    }

    /// Run the external silent installer for a numbered version. The final
    /// step carries no core installer, so it is skipped outright.
    fn execute_silent_install(&mut self, version: &UpgradeVersion) -> Result<()> {
        if version.is_final() {
            self.log
                .log("Final step carries no core installer - skipping silent upgrade");
            return Ok(());
        }

        let name = version.to_string();
        let root = self.upgrades_root();

        let package_dir = instance::component_path(&root, &name, "upgrade", None).ok_or_else(|| {
            Error::step_failed(
                ErrorCode::StepInstallerFailed,
                format!("Core installer package directory is missing for {}", name),
            )
        })?;
        let package_name = self.find_package_name(&package_dir)?;

        let zip_path = archive::zip_directory(
            self.runner,
            &self.log,
            &package_dir,
            &format!("{}.zip", package_name),
            &self.workdir,
        )?;
        self.artifacts.push(zip_path.clone());

        let installer_dir =
            instance::component_path(&root, &name, "silent_upgrader", None).ok_or_else(|| {
                Error::step_failed(
                    ErrorCode::StepInstallerFailed,
                    format!("Silent upgrader directory is missing for {}", name),
                )
            })?;

        let command = self.build_installer_command(&name, &installer_dir, &zip_path);
        self.log.log(&format!("running {}", command));
        let workdir = self.workdir.display().to_string();
        let output = self.runner.run(&command, Some(workdir.as_str()));
        self.log.log(&output.combined());

        if output.success {
            Ok(())
        } else {
            Err(Error::step_command_failed(
                ErrorCode::StepInstallerFailed,
                format!("Silent upgrade for {} failed", name),
                command,
                output.exit_code,
                output.combined(),
            ))
        }
    }

    /// The core installer payload keeps the name of the original package:
    /// the one entry of `upgrade/` whose name starts with the configured
    /// prefix.
    fn find_package_name(&self, package_dir: &Path) -> Result<String> {
        let prefix = self.config.package_prefix.to_lowercase();
        io::list_dir_names(package_dir)
            .into_iter()
            .find(|name| name.to_lowercase().starts_with(&prefix))
            .ok_or_else(|| {
                Error::step_failed(
                    ErrorCode::StepInstallerFailed,
                    format!(
                        "No entry in {} starts with the package prefix '{}'",
                        package_dir.display(),
                        self.config.package_prefix
                    ),
                )
            })
    }

    /// Installer invocation: archive, no backups, instance path,
    /// per-version log, admin user, non-interactive.
    fn build_installer_command(&self, version: &str, installer_dir: &Path, zip_path: &Path) -> String {
        let parts = [
            shell::quote_arg(&self.config.php_path),
            shell::quote_path(
                &installer_dir
                    .join(&self.config.installer_script)
                    .display()
                    .to_string(),
            ),
            format!("-z {}", shell::quote_path(&zip_path.display().to_string())),
            "-b 0".to_string(),
            format!("-s {}", shell::quote_path(&self.config.instance_path)),
            format!("-l {}", shell::quote_path(&format!("logs/{}.log", version))),
            format!("-u {}", shell::quote_arg(&self.config.admin_user)),
            "-A 1".to_string(),
        ];
        parts.join(" ")
    }

    /// Stage this version+stage's custom scripts into the instance, run
    /// them through a spawned child process, and tear the staging down
    /// again. The child's exit code is the step outcome; the persisted
    /// execution log keeps already-run scripts from repeating.
    fn run_custom_scripts(&mut self, version: &str, stage: Stage) -> Result<()> {
        let Some(scripts_src) =
            instance::component_path(&self.upgrades_root(), version, "scripts", Some(stage.as_str()))
        else {
            self.log.log(&format!(
                "No scripts for the {} stage of {} - skipping",
                stage, version
            ));
            return Ok(());
        };

        if io::list_dir_names(&scripts_src).is_empty() {
            self.log.log(&format!(
                "Upgrade scripts for {} {} ({}) is empty - skipping",
                version,
                stage,
                scripts_src.display()
            ));
            return Ok(());
        }

        let staged_rel = format!("upgrade/custom/{}", stage);
        let staging_base = self
            .workdir
            .join(format!("stage_scripts_{}_{}", version, stage));
        let staged_scripts = staging_base.join(&staged_rel);
        std::fs::create_dir_all(&staged_scripts).map_err(|e| {
            Error::internal_io(e.to_string(), Some("create script staging directory".to_string()))
        })?;

        // Transit the scripts into the staging tree, then the staging tree
        // into the instance, with the same archive discipline as patches.
        let scripts_zip = archive::zip_directory(
            self.runner,
            &self.log,
            &scripts_src,
            &format!("scripts.{}.{}.zip", version, stage),
            &self.workdir,
        )?;
        self.artifacts.push(scripts_zip.clone());
        archive::unzip(self.runner, &self.log, &scripts_zip, &staged_scripts)?;

        let staged_zip = archive::zip_directory(
            self.runner,
            &self.log,
            &staging_base,
            &format!("stagedScripts.{}.{}.zip", version, stage),
            &self.workdir,
        )?;
        self.artifacts.push(staged_zip.clone());
        archive::unzip(self.runner, &self.log, &staged_zip, &self.instance_path())?;

        let result = self.spawn_script_child(version, stage, &staged_rel);

        // Tear the staged copies down whether the child succeeded or not.
        let staged_instance_dir = self.instance_path().join("upgrade/custom");
        if let Err(problem) =
            instance::delete_directory(self.runner, &self.log, &staged_instance_dir)
        {
            self.log.log(&format!(
                "Could not remove staged scripts from the instance: {}",
                problem
            ));
        }
        if std::fs::remove_dir_all(&staging_base).is_err() {
            self.log.log(&format!(
                "Could not remove staging directory {}",
                staging_base.display()
            ));
        }

        result
    }

    fn spawn_script_child(&self, version: &str, stage: Stage, staged_rel: &str) -> Result<()> {
        let exe = std::env::current_exe().map_err(|e| {
            Error::internal_io(e.to_string(), Some("resolve coordinator binary".to_string()))
        })?;
        let log_file = self
            .workdir
            .join("logs")
            .join(format!("scripts.{}.{}.log", version, stage));

        let command = format!(
            "{} scripts --version {} --stage {} --scripts-dir {} --instance {} --interpreter {} --log-file {}",
            shell::quote_path(&exe.display().to_string()),
            shell::quote_arg(version),
            stage,
            shell::quote_path(staged_rel),
            shell::quote_path(&self.config.instance_path),
            shell::quote_arg(&self.config.php_path),
            shell::quote_path(&log_file.display().to_string()),
        );

        self.log.log(&format!("running {}", command));
        let output = self
            .runner
            .run(&command, Some(self.config.instance_path.as_str()));

        if output.success {
            Ok(())
        } else {
            self.log
                .log(&format!("Upgrade scripts failed: {}", output.combined()));
            Err(Error::step_command_failed(
                ErrorCode::StepScriptsFailed,
                format!("{} stage scripts failed for {}", stage, version),
                command,
                output.exit_code,
                output.combined(),
            ))
        }
    }

    /// Best-effort removal of the version step's ephemeral archives.
    /// A leftover artifact is worth a log line, never a failed run.
    fn cleanup_artifacts(&mut self) {
        if self.artifacts.is_empty() {
            return;
        }

        self.log.log("cleaning up zip files.");
        for path in self.artifacts.drain(..) {
            if !path.exists() {
                continue;
            }
            if std::fs::remove_file(&path).is_err() {
                self.log.log(&format!(
                    "Could not delete file {}. File exists but cannot be deleted.",
                    path.display()
                ));
            }
        }
    }
}
