//! aport-guardrails: a pre-tool-call guardrail for AI agents.
//!
//! Before an agent runs a tool, the framework adapter hands the tool name and
//! its input to an [`Evaluator`](crate::eval::Evaluator), which returns an
//! allow/deny [`Decision`](crate::eval::Decision) with structured reasons.
//! Evaluation either runs a local guardrail script against a passport file or
//! calls the remote verification API. Missing configuration denies by default.
//!
//! # Architecture
//!
//! - **[`eval`]**: Evaluator, decision envelope, error codes, call context.
//! - **[`validate`]**: Input checks: tool names, contexts, passport paths, ids.
//! - **[`identity`]**: Passport and guardrail-script resolution.
//! - **[`mapping`]**: Embedded tool→policy-pack and default-passport tables.
//! - **[`backend`]**: Local script runner and remote API client.
//! - **[`config`]**: Configuration loading: embedded defaults, file overlay, environment.
//! - **[`error`]**: Configuration faults and guardrail violations.
//! - **[`logging`]**: Logger setup and the decision audit log.

/// Local script and remote API decision backends.
pub mod backend;
/// Configuration types, discovery, and overlay merge logic.
pub mod config;
/// Fault types.
pub mod error;
/// Evaluation engine: evaluator, decisions, error codes.
pub mod eval;
/// Passport and guardrail-script resolution.
pub mod identity;
/// Decision audit log and logger initialisation.
pub mod logging;
/// Embedded lookup tables.
pub mod mapping;
/// Input validation and log sanitising.
pub mod validate;

pub use error::{ConfigError, Error, GuardrailViolation};
pub use eval::{Decision, ErrorCode, Evaluator, Passport, PolicyRef, Reason, ToolCallContext};

/// Framework assumed when neither the caller nor the config names one.
pub const DEFAULT_FRAMEWORK: &str = "openclaw";
