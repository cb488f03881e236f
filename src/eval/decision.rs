use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::codes::ErrorCode;

/// One structured reason attached to a decision.
///
/// Reasons produced by the core always carry a namespaced code and the
/// standard resolution text for that code. Reasons produced by an external
/// backend are kept as they arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Fields a backend sent that the core does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reason {
    /// Build a reason for a core error code, attaching its standard resolution.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.as_str().to_string()),
            message: message.into(),
            details: None,
            resolution: Some(code.resolution().to_string()),
            extra: Map::new(),
        }
    }

    /// A reason with only a message, as external backends sometimes send.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
            resolution: None,
            extra: Map::new(),
        }
    }

    /// Take a reason exactly as a backend reported it. Known fields are
    /// lifted out only when they have the expected type; everything else
    /// stays in `extra`, so the reason serialises back unchanged. A bare
    /// string becomes the message.
    pub fn from_external(value: Value) -> Self {
        let mut map = match value {
            Value::Object(map) => map,
            Value::String(message) => return Self::message(message),
            other => return Self::message(other.to_string()),
        };
        let mut reason = Self::message(String::new());
        reason.code = take_string(&mut map, "code");
        if let Some(message) = take_string(&mut map, "message") {
            reason.message = message;
        }
        reason.resolution = take_string(&mut map, "resolution");
        if map.get("details").is_some_and(|d| !d.is_null()) {
            reason.details = map.remove("details");
        }
        reason.extra = map;
        reason
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Remove `key` only if it holds a non-empty string.
fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !matches!(map.get(key), Some(Value::String(s)) if !s.is_empty()) {
        return None;
    }
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// The allow/deny verdict for one tool call.
///
/// Allow and deny share this one envelope. A deny always carries at least one
/// reason; the constructors enforce it, which is why the fields are private.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    allow: bool,
    reasons: Vec<Reason>,
    request_id: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_id: Option<String>,
}

impl Decision {
    /// An allow, optionally with informational reasons.
    pub fn allowed(reasons: Vec<Reason>) -> Self {
        Self::envelope(true, reasons)
    }

    /// A deny with a single reason.
    pub fn denied(reason: Reason) -> Self {
        Self::envelope(false, vec![reason])
    }

    /// A deny for a core error code.
    pub fn deny(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::denied(Reason::new(code, message))
    }

    /// Wrap a verdict reported by a backend. A deny that arrives without any
    /// reasons gets a generic `policy.denied` reason so the invariant holds.
    pub fn from_verdict(allow: bool, mut reasons: Vec<Reason>) -> Self {
        if !allow && reasons.is_empty() {
            reasons.push(Reason::new(
                ErrorCode::PolicyDenied,
                "Policy evaluation denied the tool call",
            ));
        }
        Self::envelope(allow, reasons)
    }

    fn envelope(allow: bool, reasons: Vec<Reason>) -> Self {
        Self {
            allow,
            reasons,
            request_id: new_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            policy_id: None,
        }
    }

    /// Use a caller-supplied request id instead of the generated one.
    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        if let Some(id) = request_id.filter(|id| !id.is_empty()) {
            self.request_id = id.to_string();
        }
        self
    }

    pub fn with_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.allow
    }

    pub fn reasons(&self) -> &[Reason] {
        &self.reasons
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn policy_id(&self) -> Option<&str> {
        self.policy_id.as_deref()
    }

    /// Reason codes in order, skipping reasons without one.
    pub fn codes(&self) -> Vec<&str> {
        self.reasons.iter().filter_map(|r| r.code.as_deref()).collect()
    }

    /// True if any reason carries the given core code.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.codes().contains(&code.as_str())
    }

    pub fn as_str(&self) -> &'static str {
        if self.allow { "allow" } else { "deny" }
    }
}

/// `req_<epoch millis>_<6 hex>`.
fn new_request_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("req_{millis}_{}", &suffix[..6])
}
