//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A declarative pipeline attached to a project.
///
/// `spec` is the stored JSON document enumerating stages and steps; it is
/// parsed with [`crate::spec::PipelineSpec`] when a run is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Stored pipeline spec document (JSON).
    pub spec: String,
    pub trigger: TriggerKind,
    /// Required (non-empty, parseable) when `trigger` is `Schedule`.
    pub cron_expr: Option<String>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// How a pipeline run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Webhook,
    Schedule,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Webhook => "webhook",
            TriggerKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerKind::Manual),
            "webhook" => Ok(TriggerKind::Webhook),
            "schedule" => Ok(TriggerKind::Schedule),
            other => Err(format!("unknown trigger kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_kind_round_trip() {
        for kind in [TriggerKind::Manual, TriggerKind::Webhook, TriggerKind::Schedule] {
            assert_eq!(kind.as_str().parse::<TriggerKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_trigger_kind_rejects_unknown() {
        assert!("push".parse::<TriggerKind>().is_err());
    }
}
