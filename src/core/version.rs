//! Upgrade version ordering and plan construction.
//!
//! Version directory names are dot-separated numeric segments compared
//! numerically segment by segment - `7.9.1.2` sorts before `7.9.1.14`,
//! which alpha-numeric ordering gets wrong. The sentinel `final` always
//! sorts last and is always considered newer than any numbered version.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::Regex;

/// A dotted-numeric version, e.g. `8.0.4` or `7.9.4.0`.
///
/// Keeps the original string so directory lookups and log lines round-trip
/// exactly; ordering uses the parsed segments with missing segments
/// treated as zero.
#[derive(Debug, Clone)]
pub struct ReleaseVersion {
    raw: String,
    segments: Vec<u64>,
}

impl ReleaseVersion {
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for ReleaseVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("version string is empty".to_string());
        }

        let segments = trimmed
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<u64>, _>>()
            .map_err(|_| format!("'{}' is not a dotted numeric version", trimmed))?;

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

/// Directory name of the sentinel step that runs after all numbered versions.
pub const FINAL_VERSION: &str = "final";

/// One entry of an upgrade plan: a numbered release or the `final` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeVersion {
    Release(ReleaseVersion),
    Final,
}

impl UpgradeVersion {
    pub fn is_final(&self) -> bool {
        matches!(self, UpgradeVersion::Final)
    }

    /// True if this planned version is strictly newer than the currently
    /// installed one. `final` is always newer.
    pub fn is_higher_than(&self, current: &ReleaseVersion) -> bool {
        match self {
            UpgradeVersion::Final => true,
            UpgradeVersion::Release(v) => v > current,
        }
    }
}

impl FromStr for UpgradeVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == FINAL_VERSION {
            Ok(UpgradeVersion::Final)
        } else {
            ReleaseVersion::from_str(s).map(UpgradeVersion::Release)
        }
    }
}

impl fmt::Display for UpgradeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeVersion::Release(v) => write!(f, "{}", v),
            UpgradeVersion::Final => write!(f, "{}", FINAL_VERSION),
        }
    }
}

/// Build the ordered upgrade plan from the names found under the upgrades
/// root: numbered versions ascending, `final` appended exactly once.
///
/// Names that parse as neither a version nor `final` are reported through
/// `warn` and excluded from the plan.
pub fn build_plan(names: &[String], mut warn: impl FnMut(&str)) -> Vec<UpgradeVersion> {
    let mut releases: Vec<ReleaseVersion> = Vec::new();

    for name in names {
        if name == FINAL_VERSION {
            continue;
        }
        match ReleaseVersion::from_str(name) {
            Ok(version) => releases.push(version),
            Err(problem) => warn(&format!("Skipping '{}': {}", name, problem)),
        }
    }

    releases.sort();

    let mut plan: Vec<UpgradeVersion> = releases.into_iter().map(UpgradeVersion::Release).collect();
    plan.push(UpgradeVersion::Final);
    plan
}

/// Denotes whether a patch/script/cache step runs before or after the core
/// installer for a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pre,
    Post,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pre => "pre",
            Stage::Post => "post",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "pre" => Some(Stage::Pre),
            "post" => Some(Stage::Post),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pull the first three-segment version token out of interpreter output,
/// e.g. `PHP 7.1.29 (cli) (built: ...)` -> `7.1.29`.
pub fn extract_version_token(text: &str) -> Option<String> {
    let re = Regex::new(r"(\d+\.\d+\.\d+)").ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// True when `version` satisfies `minimum` (semver comparison). Unparseable
/// input fails the check rather than passing silently.
pub fn minimum_version_met(version: &str, minimum: &str) -> bool {
    let (Ok(found), Ok(required)) = (
        semver::Version::parse(version),
        semver::Version::parse(minimum),
    ) else {
        return false;
    };
    found >= required
}
