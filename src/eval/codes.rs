//! The closed error-code space behind every deny produced by the evaluator.
//!
//! Codes are namespaced as `oap.<category>.<subcategory>`. Each code that has
//! a standard remediation maps to one fixed resolution string, so the same
//! failure always carries the same hint no matter where it was raised.

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // invalid input
    InvalidToolName,
    InvalidContext,
    ContextTooLarge,
    ContextTooNested,
    ContextNotSerializable,
    InvalidAgentId,
    InvalidPolicyPackId,

    // path security
    PathNotAllowed,
    PathTraversalAttempt,
    PathInvalidCharacters,
    PathResolutionError,

    // identity
    PassportNotFound,
    PassportInvalidFormat,
    PassportExpired,
    PassportRevoked,
    PassportMissingCapability,

    // policy
    PolicyNotFound,
    PolicyInvalidFormat,
    PolicyEvaluationFailed,
    PolicyEvaluationTimeout,
    PolicyDenied,

    // transport
    ApiConnectionFailed,
    ApiAuthenticationFailed,
    ApiRateLimitExceeded,
    ApiTimeout,
    ApiInvalidResponse,
    ApiNotFound,
    ApiError,

    // configuration
    ConfigNotFound,
    ConfigInvalidFormat,
    ConfigMissingRequired,
    Misconfigured,

    // system
    EvaluatorError,
    CommandInjectionDetected,
    DependencyMissing,
    InsufficientPermissions,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 36] = [
        ErrorCode::InvalidToolName,
        ErrorCode::InvalidContext,
        ErrorCode::ContextTooLarge,
        ErrorCode::ContextTooNested,
        ErrorCode::ContextNotSerializable,
        ErrorCode::InvalidAgentId,
        ErrorCode::InvalidPolicyPackId,
        ErrorCode::PathNotAllowed,
        ErrorCode::PathTraversalAttempt,
        ErrorCode::PathInvalidCharacters,
        ErrorCode::PathResolutionError,
        ErrorCode::PassportNotFound,
        ErrorCode::PassportInvalidFormat,
        ErrorCode::PassportExpired,
        ErrorCode::PassportRevoked,
        ErrorCode::PassportMissingCapability,
        ErrorCode::PolicyNotFound,
        ErrorCode::PolicyInvalidFormat,
        ErrorCode::PolicyEvaluationFailed,
        ErrorCode::PolicyEvaluationTimeout,
        ErrorCode::PolicyDenied,
        ErrorCode::ApiConnectionFailed,
        ErrorCode::ApiAuthenticationFailed,
        ErrorCode::ApiRateLimitExceeded,
        ErrorCode::ApiTimeout,
        ErrorCode::ApiInvalidResponse,
        ErrorCode::ApiNotFound,
        ErrorCode::ApiError,
        ErrorCode::ConfigNotFound,
        ErrorCode::ConfigInvalidFormat,
        ErrorCode::ConfigMissingRequired,
        ErrorCode::Misconfigured,
        ErrorCode::EvaluatorError,
        ErrorCode::CommandInjectionDetected,
        ErrorCode::DependencyMissing,
        ErrorCode::InsufficientPermissions,
    ];

    /// Wire form of the code, as it appears in `Decision.reasons[].code`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidToolName => "oap.invalid_input.tool_name",
            ErrorCode::InvalidContext => "oap.invalid_input.context",
            ErrorCode::ContextTooLarge => "oap.invalid_input.context_too_large",
            ErrorCode::ContextTooNested => "oap.invalid_input.context_too_nested",
            ErrorCode::ContextNotSerializable => "oap.invalid_input.context_not_serializable",
            ErrorCode::InvalidAgentId => "oap.invalid_input.agent_id",
            ErrorCode::InvalidPolicyPackId => "oap.invalid_input.policy_pack_id",
            ErrorCode::PathNotAllowed => "oap.path.not_allowed",
            ErrorCode::PathTraversalAttempt => "oap.path.traversal_attempt",
            ErrorCode::PathInvalidCharacters => "oap.path.invalid_characters",
            ErrorCode::PathResolutionError => "oap.path.resolution_error",
            ErrorCode::PassportNotFound => "oap.passport.not_found",
            ErrorCode::PassportInvalidFormat => "oap.passport.invalid_format",
            ErrorCode::PassportExpired => "oap.passport.expired",
            ErrorCode::PassportRevoked => "oap.passport.revoked",
            ErrorCode::PassportMissingCapability => "oap.passport.missing_capability",
            ErrorCode::PolicyNotFound => "oap.policy.not_found",
            ErrorCode::PolicyInvalidFormat => "oap.policy.invalid_format",
            ErrorCode::PolicyEvaluationFailed => "oap.policy.evaluation_failed",
            ErrorCode::PolicyEvaluationTimeout => "oap.policy.evaluation_timeout",
            ErrorCode::PolicyDenied => "oap.policy.denied",
            ErrorCode::ApiConnectionFailed => "oap.api.connection_failed",
            ErrorCode::ApiAuthenticationFailed => "oap.api.authentication_failed",
            ErrorCode::ApiRateLimitExceeded => "oap.api.rate_limit_exceeded",
            ErrorCode::ApiTimeout => "oap.api.timeout",
            ErrorCode::ApiInvalidResponse => "oap.api.invalid_response",
            ErrorCode::ApiNotFound => "oap.api.not_found_404",
            ErrorCode::ApiError => "oap.api.error",
            ErrorCode::ConfigNotFound => "oap.config.not_found",
            ErrorCode::ConfigInvalidFormat => "oap.config.invalid_format",
            ErrorCode::ConfigMissingRequired => "oap.config.missing_required",
            ErrorCode::Misconfigured => "oap.misconfigured",
            ErrorCode::EvaluatorError => "oap.system.evaluator_error",
            ErrorCode::CommandInjectionDetected => "oap.system.command_injection_detected",
            ErrorCode::DependencyMissing => "oap.system.dependency_missing",
            ErrorCode::InsufficientPermissions => "oap.system.insufficient_permissions",
        }
    }

    /// Look a code up by its wire form.
    pub fn from_wire(code: &str) -> Option<ErrorCode> {
        ErrorCode::ALL.iter().copied().find(|c| c.as_str() == code)
    }

    /// Standard remediation text for this code.
    pub fn resolution(self) -> &'static str {
        match self {
            ErrorCode::InvalidToolName => {
                "Use only letters, digits, dots, underscores and hyphens in tool names \
                 and keep them under 128 characters."
            }
            ErrorCode::InvalidContext => "Pass the tool call context as a JSON object.",
            ErrorCode::ContextTooLarge => {
                "Trim the tool input: drop unneeded fields or summarise large payloads. \
                 The default limit is 100KB (APORT_MAX_CONTEXT_SIZE raises it)."
            }
            ErrorCode::ContextTooNested => {
                "Flatten the tool input; at most 10 levels of nesting are accepted."
            }
            ErrorCode::ContextNotSerializable => {
                "Make sure every value in the tool input can be represented as JSON."
            }
            ErrorCode::InvalidAgentId => "Agent ids look like ap_<letters, digits, underscores>.",
            ErrorCode::InvalidPolicyPackId => {
                "Policy pack ids may only contain letters, digits, dots, underscores and hyphens."
            }
            ErrorCode::PathNotAllowed => {
                "Keep passport files under ~/.openclaw/, ~/.aport/ or /tmp/aport-*."
            }
            ErrorCode::PathTraversalAttempt => {
                "Use a path without parent directory references (..)."
            }
            ErrorCode::PathInvalidCharacters => "Remove null bytes from the path.",
            ErrorCode::PathResolutionError => {
                "Check that the passport path and its parent directories exist and are readable."
            }
            ErrorCode::PassportNotFound => {
                "Create a passport with the guardrails setup for your framework, or point \
                 OPENCLAW_PASSPORT_FILE at an existing passport."
            }
            ErrorCode::PassportInvalidFormat => {
                "Make sure the passport file is a JSON object; regenerate it with the setup tool."
            }
            ErrorCode::PassportExpired => "Renew the passport or issue a new one.",
            ErrorCode::PassportRevoked => {
                "The passport was revoked; issue a new passport for this agent."
            }
            ErrorCode::PassportMissingCapability => {
                "Add the required capability to the passport or issue a new passport that has it."
            }
            ErrorCode::PolicyNotFound => {
                "Check the policy pack id and make sure the policy registry is up to date."
            }
            ErrorCode::PolicyInvalidFormat => {
                "Full policy packs need an id and a requires_capabilities list."
            }
            ErrorCode::PolicyEvaluationFailed => {
                "Check the guardrail script and policy pack for errors, then retry."
            }
            ErrorCode::PolicyEvaluationTimeout => {
                "Simplify the policy or raise the evaluation timeout."
            }
            ErrorCode::PolicyDenied => "Review the policy rules and confirm the operation is allowed.",
            ErrorCode::ApiConnectionFailed => {
                "Check connectivity and the API URL (APORT_API_URL), and that outbound HTTPS \
                 is permitted."
            }
            ErrorCode::ApiAuthenticationFailed => {
                "Check that APORT_API_KEY is set and still valid; issue a new key if needed."
            }
            ErrorCode::ApiRateLimitExceeded => {
                "Wait for the rate limit window to reset, reduce call frequency, or switch to \
                 local evaluation."
            }
            ErrorCode::ApiTimeout => {
                "The verification API did not answer in time; check its status or raise \
                 APORT_API_TIMEOUT."
            }
            ErrorCode::ApiInvalidResponse => {
                "The verification API sent an unexpected answer; check APORT_API_URL points at \
                 the verification service and retry."
            }
            ErrorCode::ApiNotFound => {
                "Check APORT_API_URL and the policy pack id; the endpoint was not found."
            }
            ErrorCode::ApiError => {
                "Configure an agent id or passport for API mode, check the verification \
                 service status, and retry."
            }
            ErrorCode::ConfigNotFound => {
                "Create ~/.aport/config.toml or pass --config with an existing file."
            }
            ErrorCode::ConfigInvalidFormat => "Fix the syntax of the configuration file.",
            ErrorCode::ConfigMissingRequired => {
                "Add the missing setting to the configuration file or the environment."
            }
            ErrorCode::Misconfigured => {
                "Run the guardrails setup for your framework so that a passport and the \
                 guardrail script are installed (~/.openclaw/passport.json and \
                 ~/.openclaw/.skills/aport-guardrail.sh), or switch to mode = \"api\" with an \
                 agent id."
            }
            ErrorCode::EvaluatorError => {
                "Check that the guardrail script runs on its own and writes a decision to \
                 $OPENCLAW_DECISION_FILE; raise APORT_SUBPROCESS_TIMEOUT if it is slow."
            }
            ErrorCode::CommandInjectionDetected => {
                "Remove shell metacharacters from the tool input."
            }
            ErrorCode::DependencyMissing => {
                "Install the missing dependency and rerun the guardrails setup."
            }
            ErrorCode::InsufficientPermissions => {
                "Make the passport readable and the guardrail script executable by this user."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
