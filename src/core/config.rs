//! Coordinator configuration.
//!
//! All run parameters live in one immutable structure built before the
//! coordinator is constructed: defaults, then an optional JSON config file,
//! then command-line overrides. Nothing mutates it afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::io;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
    /// Absolute path of the application instance being upgraded.
    pub instance_path: String,

    /// Administrative user passed to the silent installer.
    pub admin_user: String,

    /// Interpreter used for the repair routine, the silent installer and
    /// staged scripts. The default alias is resolved through PATH; an
    /// overridden value must point at an existing executable file.
    pub php_path: String,

    /// Minimum interpreter version. Empty disables the check.
    pub php_version_required: String,

    /// Directory under the working directory holding one subdirectory per
    /// upgrade version.
    pub upgrades_dir: String,

    /// Filename prefix that identifies the core installer payload inside a
    /// version's `upgrade/` directory.
    pub package_prefix: String,

    /// Installer entry point inside a version's `silent_upgrader/` directory.
    pub installer_script: String,

    /// Repair/rebuild routine filename, bundled under `assets/` in the
    /// working directory and installed into the instance on demand.
    pub repair_script: String,

    /// File inside the instance that records the installed version.
    pub version_marker: String,

    /// Cache entries cleared selectively between steps. Paths are relative
    /// to `<instance>/cache`; the cache directory itself is never removed.
    pub cache_subpaths: Vec<String>,

    /// Run log path, relative to the working directory.
    pub log_file: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance_path: "/var/www/html/app".to_string(),
            admin_user: "admin".to_string(),
            php_path: "php".to_string(),
            php_version_required: "7.1.0".to_string(),
            upgrades_dir: "upgrades".to_string(),
            package_prefix: "Upgrade-".to_string(),
            installer_script: "CliUpgrader.php".to_string(),
            repair_script: "repairAndRebuild.php".to_string(),
            version_marker: "version.php".to_string(),
            cache_subpaths: vec![
                "class_map.php".to_string(),
                "javascript/base".to_string(),
                "include/javascript".to_string(),
            ],
            log_file: "logs/coordinator.log".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a JSON file, falling back to defaults for
    /// any absent key.
    pub fn load(path: &Path) -> Result<Self> {
        let content = io::read_file(path, "read config file")?;
        let config: CoordinatorConfig = serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
        config.validated()
    }

    /// Apply tilde expansion and strip the trailing slash from the instance
    /// path, then reject obviously unusable values.
    pub fn validated(mut self) -> Result<Self> {
        let expanded = shellexpand::tilde(&self.instance_path).to_string();
        self.instance_path = if expanded != "/" {
            expanded.trim_end_matches('/').to_string()
        } else {
            expanded
        };

        if self.instance_path.is_empty() {
            return Err(Error::config_invalid_value(
                "instancePath",
                None,
                "Instance path must not be empty",
            ));
        }
        if self.instance_path == "/" {
            return Err(Error::config_invalid_value(
                "instancePath",
                Some(self.instance_path.clone()),
                "Refusing to target the filesystem root",
            ));
        }
        if self.package_prefix.is_empty() {
            return Err(Error::config_invalid_value(
                "packagePrefix",
                None,
                "Package prefix must not be empty",
            ));
        }

        Ok(self)
    }

    /// True when the minimum-interpreter-version check is enabled.
    pub fn requires_interpreter_version(&self) -> bool {
        !self.php_version_required.trim().is_empty()
    }
}
