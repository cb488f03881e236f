use std::path::PathBuf;

use thiserror::Error;

use crate::eval::{Decision, ErrorCode, Reason};

/// The configuration store could not be read. This is the only fault the
/// evaluator lets escape; everything else becomes a deny decision.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A deny surfaced as a fault, for callers that abort the tool call at the
/// call site instead of inspecting the decision.
#[derive(Debug, Clone, Error)]
#[error("tool call denied [{code}]: {message}")]
pub struct GuardrailViolation {
    pub code: String,
    pub message: String,
    pub reasons: Vec<Reason>,
    pub request_id: String,
}

impl GuardrailViolation {
    /// Returns `None` for an allow.
    pub fn from_decision(decision: &Decision) -> Option<Self> {
        if decision.is_allowed() {
            return None;
        }
        let primary = decision.reasons().first();
        Some(Self {
            code: primary
                .and_then(|r| r.code.clone())
                .unwrap_or_else(|| ErrorCode::PolicyDenied.as_str().to_string()),
            message: primary
                .map(|r| r.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Policy evaluation denied the tool call".to_string()),
            reasons: decision.reasons().to_vec(),
            request_id: decision.request_id().to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Violation(#[from] GuardrailViolation),
}
