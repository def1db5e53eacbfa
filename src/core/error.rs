use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    PreflightDirNotAccessible,
    PreflightNotAnInstance,
    PreflightUtilityMissing,
    PreflightInterpreterInvalid,
    PreflightInterpreterTooOld,
    PreflightPackageIncomplete,

    StepDeleteListFailed,
    StepArchiveFailed,
    StepUnpackFailed,
    StepCacheClearFailed,
    StepRepairFailed,
    StepInstallerFailed,
    StepScriptsFailed,

    ScriptStageInvalid,
    ScriptDirMissing,
    ScriptDefinitionInvalid,
    ScriptExecutionFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::PreflightDirNotAccessible => "preflight.dir_not_accessible",
            ErrorCode::PreflightNotAnInstance => "preflight.not_an_instance",
            ErrorCode::PreflightUtilityMissing => "preflight.utility_missing",
            ErrorCode::PreflightInterpreterInvalid => "preflight.interpreter_invalid",
            ErrorCode::PreflightInterpreterTooOld => "preflight.interpreter_too_old",
            ErrorCode::PreflightPackageIncomplete => "preflight.package_incomplete",

            ErrorCode::StepDeleteListFailed => "step.delete_list_failed",
            ErrorCode::StepArchiveFailed => "step.archive_failed",
            ErrorCode::StepUnpackFailed => "step.unpack_failed",
            ErrorCode::StepCacheClearFailed => "step.cache_clear_failed",
            ErrorCode::StepRepairFailed => "step.repair_failed",
            ErrorCode::StepInstallerFailed => "step.installer_failed",
            ErrorCode::StepScriptsFailed => "step.scripts_failed",

            ErrorCode::ScriptStageInvalid => "script.stage_invalid",
            ErrorCode::ScriptDirMissing => "script.dir_missing",
            ErrorCode::ScriptDefinitionInvalid => "script.definition_invalid",
            ErrorCode::ScriptExecutionFailed => "script.execution_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirNotAccessibleDetails {
    pub path: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageIncompleteDetails {
    pub problems: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptFailureDetails {
    pub script: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    fn with_details<D: Serialize>(code: ErrorCode, message: impl Into<String>, details: D) -> Self {
        let details =
            serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(code, message, details)
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::with_details(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            serde_json::json!({ "args": args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self::with_details(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            InvalidArgumentDetails {
                field: field.into(),
                problem: problem.into(),
                value,
            },
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::with_details(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            serde_json::json!({ "path": path.into(), "error": err.to_string() }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::with_details(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            serde_json::json!({
                "key": key.into(),
                "value": value,
                "problem": problem.into(),
            }),
        )
    }

    pub fn preflight_dir_not_accessible(
        path: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::with_details(
            ErrorCode::PreflightDirNotAccessible,
            "Directory is not accessible",
            DirNotAccessibleDetails {
                path: path.into(),
                problem: problem.into(),
            },
        )
    }

    pub fn preflight_not_an_instance(path: impl Into<String>, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self::with_details(
            ErrorCode::PreflightNotAnInstance,
            "Target directory does not look like an application instance",
            serde_json::json!({ "path": path.into(), "marker": marker.clone() }),
        )
        .with_hint(format!(
            "Expected to find a readable version marker '{}' in the instance directory",
            marker
        ))
    }

    pub fn preflight_utility_missing(names: Vec<String>) -> Self {
        let list = names.join(", ");
        Self::with_details(
            ErrorCode::PreflightUtilityMissing,
            format!("Required utilities are not available: {}", list),
            serde_json::json!({ "utilities": names }),
        )
        .with_hint("Install the archiving utilities before re-running the upgrade")
    }

    pub fn preflight_interpreter_invalid(path: impl Into<String>) -> Self {
        Self::with_details(
            ErrorCode::PreflightInterpreterInvalid,
            "Configured interpreter path is not a file",
            serde_json::json!({ "path": path.into() }),
        )
    }

    pub fn preflight_interpreter_too_old(
        found: impl Into<String>,
        required: impl Into<String>,
    ) -> Self {
        Self::with_details(
            ErrorCode::PreflightInterpreterTooOld,
            "Installed interpreter version is below the required minimum",
            serde_json::json!({ "found": found.into(), "required": required.into() }),
        )
    }

    pub fn preflight_package_incomplete(problems: Vec<String>) -> Self {
        Self::with_details(
            ErrorCode::PreflightPackageIncomplete,
            "Missing upgrade packages and/or silent upgrader",
            PackageIncompleteDetails { problems },
        )
    }

    pub fn step_failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, Value::Object(serde_json::Map::new()))
    }

    pub fn step_command_failed(
        code: ErrorCode,
        message: impl Into<String>,
        command: impl Into<String>,
        exit_code: i32,
        output: impl Into<String>,
    ) -> Self {
        Self::with_details(
            code,
            message,
            CommandFailedDetails {
                command: command.into(),
                exit_code,
                output: output.into(),
            },
        )
    }

    pub fn script_stage_invalid(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self::with_details(
            ErrorCode::ScriptStageInvalid,
            format!("'{}' is not a valid stage", stage),
            serde_json::json!({ "stage": stage }),
        )
        .with_hint("Stage must be 'pre' or 'post'")
    }

    pub fn script_dir_missing(path: impl Into<String>) -> Self {
        Self::with_details(
            ErrorCode::ScriptDirMissing,
            "Scripts directory does not exist or is not a directory",
            serde_json::json!({ "path": path.into() }),
        )
    }

    pub fn script_definition_invalid(file: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::with_details(
            ErrorCode::ScriptDefinitionInvalid,
            "Script file does not resolve to a known script type",
            serde_json::json!({ "file": file.into(), "problem": problem.into() }),
        )
    }

    pub fn script_execution_failed(script: impl Into<String>, output: Option<String>) -> Self {
        let script = script.into();
        Self::with_details(
            ErrorCode::ScriptExecutionFailed,
            format!("Upgrade script '{}' failed", script),
            ScriptFailureDetails { script, output },
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::with_details(
            ErrorCode::InternalIoError,
            "IO error",
            InternalIoErrorDetails {
                error: error.into(),
                context,
            },
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::with_details(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_strings_are_dotted() {
        assert_eq!(
            ErrorCode::PreflightNotAnInstance.as_str(),
            "preflight.not_an_instance"
        );
        assert_eq!(ErrorCode::StepArchiveFailed.as_str(), "step.archive_failed");
        assert_eq!(
            ErrorCode::ScriptDefinitionInvalid.as_str(),
            "script.definition_invalid"
        );
    }

    #[test]
    fn hints_accumulate() {
        let err = Error::internal_unexpected("boom")
            .with_hint("first")
            .with_hint("second");
        assert_eq!(err.hints.len(), 2);
        assert_eq!(err.hints[0].message, "first");
    }

    #[test]
    fn command_failure_carries_details() {
        let err = Error::step_command_failed(
            ErrorCode::StepInstallerFailed,
            "Silent installer failed",
            "php CliUpgrader.php",
            3,
            "bad package",
        );
        assert_eq!(err.code, ErrorCode::StepInstallerFailed);
        assert_eq!(err.details["exitCode"], 3);
    }
}
