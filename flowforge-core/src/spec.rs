//! Declarative pipeline spec document
//!
//! A pipeline carries its spec as a stored JSON document:
//!
//! ```json
//! {
//!   "stages": [
//!     { "name": "build",
//!       "steps": [
//!         { "name": "compile",
//!           "type": "script",
//!           "config": { "script": "make", "env": { "CC": "clang" } } } ] } ]
//! }
//! ```
//!
//! Stages run sequentially in document order, as do the steps inside each
//! stage. Parsing and re-emitting a valid document is the identity map
//! modulo whitespace.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing or validating a spec document.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("invalid pipeline spec: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid pipeline spec: {0}")]
    Invalid(String),
}

/// Parsed pipeline spec: an ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub stages: Vec<Stage>,
}

/// An ordered group of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub steps: Vec<Step>,
}

/// A single action within a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub config: StepConfig,
}

/// The action a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    GitClone,
    Script,
    Build,
    Deploy,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::GitClone => "git_clone",
            StepKind::Script => "script",
            StepKind::Build => "build",
            StepKind::Deploy => "deploy",
        };
        f.write_str(s)
    }
}

/// Per-step configuration map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Script body for `script` steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Builder kind for `build` steps.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildKind>,
    /// Extra environment variables injected into the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

/// Builder selection for `build` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    Node,
    Go,
    Docker,
    Auto,
}

impl PipelineSpec {
    /// Parses a stored spec document. Unknown step or build kinds are
    /// rejected here, before any run record exists.
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        let spec: PipelineSpec = serde_json::from_str(raw)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Emits the document back to JSON.
    pub fn to_json(&self) -> Result<String, SpecError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), SpecError> {
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(SpecError::Invalid("stage name must not be empty".into()));
            }
            for step in &stage.steps {
                if step.name.trim().is_empty() {
                    return Err(SpecError::Invalid(format!(
                        "step in stage '{}' has an empty name",
                        stage.name
                    )));
                }
                if step.kind == StepKind::Script
                    && step.config.script.as_deref().map_or(true, |s| s.trim().is_empty())
                {
                    return Err(SpecError::Invalid(format!(
                        "script step '{}' has no script body",
                        step.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total number of steps across all stages.
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    {
      "stages": [
        { "name": "build",
          "steps": [
            { "name": "fetch", "type": "git_clone", "config": {} },
            { "name": "compile", "type": "build", "config": { "type": "go" } },
            { "name": "hello", "type": "script",
              "config": { "script": "echo hello", "env": { "FOO": "bar" } } }
          ]
        },
        { "name": "ship",
          "steps": [
            { "name": "deploy", "type": "deploy", "config": {} }
          ]
        }
      ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let spec = PipelineSpec::parse(SAMPLE).unwrap();
        assert_eq!(spec.stages.len(), 2);
        assert_eq!(spec.step_count(), 4);
        assert_eq!(spec.stages[0].steps[0].kind, StepKind::GitClone);
        assert_eq!(spec.stages[0].steps[1].config.build, Some(BuildKind::Go));
        let env = spec.stages[0].steps[2].config.env.as_ref().unwrap();
        assert_eq!(env.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_parse_emit_is_identity_modulo_whitespace() {
        let spec = PipelineSpec::parse(SAMPLE).unwrap();
        let emitted = spec.to_json().unwrap();
        let reparsed = PipelineSpec::parse(&emitted).unwrap();
        assert_eq!(spec, reparsed);

        // The emitted document carries the same JSON value as the input.
        let a: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        let b: serde_json::Value = serde_json::from_str(&emitted).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let raw = r#"{ "stages": [ { "name": "s", "steps": [
            { "name": "x", "type": "teleport", "config": {} } ] } ] }"#;
        assert!(PipelineSpec::parse(raw).is_err());
    }

    #[test]
    fn test_script_step_requires_body() {
        let raw = r#"{ "stages": [ { "name": "s", "steps": [
            { "name": "x", "type": "script", "config": {} } ] } ] }"#;
        assert!(matches!(PipelineSpec::parse(raw), Err(SpecError::Invalid(_))));
    }

    #[test]
    fn test_empty_stages_is_valid() {
        let spec = PipelineSpec::parse(r#"{ "stages": [] }"#).unwrap();
        assert_eq!(spec.step_count(), 0);
    }

    #[test]
    fn test_missing_config_defaults() {
        let raw = r#"{ "stages": [ { "name": "s", "steps": [
            { "name": "x", "type": "git_clone" } ] } ] }"#;
        let spec = PipelineSpec::parse(raw).unwrap();
        assert_eq!(spec.stages[0].steps[0].config, StepConfig::default());
    }
}
