use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on a passport file read from disk.
pub const MAX_PASSPORT_BYTES: u64 = 1024 * 1024;

/// The canonical shape of one tool invocation, built by a framework adapter.
///
/// `input` is the raw serialized payload and `params` its structured form.
/// When `params` is non-empty, `input` is always its JSON serialization; the
/// constructors are the only way to build a context, so this holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallContext {
    tool: String,
    input: String,
    params: Map<String, Value>,
    request_id: Option<String>,
}

impl ToolCallContext {
    /// Build a context from a tool name and whatever input the framework had.
    ///
    /// Objects become `params` (and are serialized into `input`), strings are
    /// taken as the raw input, null is an empty input, and any other value is
    /// kept as its JSON text.
    pub fn from_input(tool: impl Into<String>, input: Value) -> Self {
        match input {
            Value::Object(params) => Self::from_params(tool, params),
            Value::String(raw) => Self::from_raw(tool, raw),
            Value::Null => Self::from_raw(tool, String::new()),
            other => Self::from_raw(tool, other.to_string()),
        }
    }

    pub fn from_params(tool: impl Into<String>, params: Map<String, Value>) -> Self {
        let input = if params.is_empty() {
            String::new()
        } else {
            Value::Object(params.clone()).to_string()
        };
        Self {
            tool: tool.into(),
            input,
            params,
            request_id: None,
        }
    }

    pub fn from_raw(tool: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            input: input.into(),
            params: Map::new(),
            request_id: None,
        }
    }

    /// Correlate the resulting decision with a caller-chosen request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// JSON mapping handed to validators and backends: `{tool, input, params}`.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("tool".into(), Value::String(self.tool.clone()));
        map.insert("input".into(), Value::String(self.input.clone()));
        map.insert("params".into(), Value::Object(self.params.clone()));
        Value::Object(map)
    }
}

/// An externally issued credential document. Opaque apart from `agent_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Passport(Map<String, Value>);

impl Passport {
    /// A passport that only names an agent (cloud identity).
    pub fn from_agent_id(agent_id: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("agent_id".into(), Value::String(agent_id.into()));
        Self(map)
    }

    /// Wrap a document. Returns `None` unless it is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::normalized(map)),
            _ => None,
        }
    }

    /// Read a passport document from disk.
    ///
    /// Missing, oversized, unreadable or non-object files all yield `None`:
    /// the caller treats that as "no local identity".
    pub fn load(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() || meta.len() > MAX_PASSPORT_BYTES {
            log::debug!("passport at {} skipped (not a file or too large)", path.display());
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Self::from_value(value),
            Err(e) => {
                log::debug!("passport at {} is not valid JSON: {e}", path.display());
                None
            }
        }
    }

    fn normalized(mut map: Map<String, Value>) -> Self {
        let has_agent_id = map
            .get("agent_id")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if !has_agent_id && let Some(pid) = map.get("passport_id").cloned() {
            map.insert("agent_id".into(), pid);
        }
        Self(map)
    }

    /// The agent id, if the document names one.
    pub fn agent_id(&self) -> Option<&str> {
        self.0
            .get("agent_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// A complete policy pack sent in the request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyPack {
    pub id: String,
    pub requires_capabilities: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What the caller said about the governing policy.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyRef {
    /// A short policy identifier (or capability name).
    Identifier(String),
    /// A full policy pack document.
    Pack(PolicyPack),
}

impl PolicyRef {
    /// Classify a caller-supplied policy value.
    ///
    /// Objects that pass [`is_full_policy_pack`] become [`PolicyRef::Pack`].
    /// Everything else is a bare identifier: a string as-is, an object's
    /// `capability` or `id` string, or empty.
    pub fn from_value(value: &Value) -> Self {
        if is_full_policy_pack(value)
            && let Ok(pack) = serde_json::from_value::<PolicyPack>(value.clone())
        {
            return PolicyRef::Pack(pack);
        }
        let ident = match value {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("capability")
                .or_else(|| map.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        PolicyRef::Identifier(ident)
    }

    pub fn as_pack(&self) -> Option<&PolicyPack> {
        match self {
            PolicyRef::Pack(pack) => Some(pack),
            PolicyRef::Identifier(_) => None,
        }
    }
}

/// A value is a full policy pack iff it is an object with a non-empty string
/// `id` and a defined `requires_capabilities` sequence (possibly empty).
pub fn is_full_policy_pack(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    let has_id = map
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    let has_caps = map
        .get("requires_capabilities")
        .is_some_and(|caps| caps.is_array());
    has_id && has_caps
}
