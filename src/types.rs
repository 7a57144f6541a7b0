use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a Request reacts to a failed Stage.
///
/// - `Abort`: the first failed Stage fails the Request and every later Stage's
///   tasks are aborted without dispatch.
/// - `Continue`: later Stages run regardless of earlier failures.
/// - `ContinueOnSkippable`: later Stages run only when the failed Stage was
///   flagged skippable; otherwise behaves like `Abort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    Abort,
    Continue,
    ContinueOnSkippable,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            "continue_on_skippable" => Ok(FailurePolicy::ContinueOnSkippable),
            other => Err(format!(
                "invalid failure policy: {other} (expected \"abort\", \"continue\" or \"continue_on_skippable\")"
            )),
        }
    }
}

/// Direction of an upgrade Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl Direction {
    pub fn is_downgrade(self) -> bool {
        matches!(self, Direction::Downgrade)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upgrade => f.write_str("UPGRADE"),
            Direction::Downgrade => f.write_str("DOWNGRADE"),
        }
    }
}

/// Operator decision for a task parked in one of the `HOLDING*` statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldingAction {
    Retry,
    Skip,
    Abort,
}

impl FromStr for HoldingAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(HoldingAction::Retry),
            "skip" => Ok(HoldingAction::Skip),
            "abort" => Ok(HoldingAction::Abort),
            other => Err(format!(
                "invalid holding action: {other} (expected \"retry\", \"skip\" or \"abort\")"
            )),
        }
    }
}

/// Where Request/Stage/Task rows are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One JSON document per row under `[storage].path`.
    File,
    /// Process memory only (lost on restart).
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Memory
    }
}

/// Parse a duration string such as `"500ms"`, `"1s"`, `"10m"` or `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' missing unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_suffixes() {
        assert_eq!(parse_duration("600s"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn failure_policy_accepts_dashes() {
        assert_eq!(
            "continue-on-skippable".parse::<FailurePolicy>(),
            Ok(FailurePolicy::ContinueOnSkippable)
        );
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }
}
