//! Input validation for everything that crosses into a subprocess, a file
//! path, or a network request.
//!
//! All checks are pure apart from path resolution (which reads symlinks) and
//! return a [`ValidationResult`]; a well-formed but invalid input is never a
//! panic or a fault.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde_json::{Value, json};

use crate::eval::ErrorCode;
use crate::eval::Reason;

pub const MAX_TOOL_NAME_LEN: usize = 128;
pub const MAX_AGENT_ID_LEN: usize = 128;
pub const MAX_POLICY_PACK_ID_LEN: usize = 128;
pub const DEFAULT_MAX_CONTEXT_BYTES: usize = 100 * 1024;
pub const MAX_CONTEXT_DEPTH: usize = 10;
pub const MAX_LOG_VALUE_LEN: usize = 200;

/// Prefix every temp-directory passport folder must carry.
pub const TEMP_DIR_MARKER: &str = "aport-";
pub const AGENT_ID_PREFIX: &str = "ap_";

/// Why an input was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ValidationError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The deny reason this failure turns into.
    pub fn to_reason(&self) -> Reason {
        let reason = Reason::new(self.code, self.message.clone());
        match &self.details {
            Some(d) => reason.with_details(d.clone()),
            None => reason,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// `Ok(())` when valid; the error carries code, message and details otherwise.
pub type ValidationResult = Result<(), ValidationError>;

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Shared length + character-class discipline for ids that end up in argv,
/// URL path segments, or file names.
fn check_identifier(
    value: &str,
    code: ErrorCode,
    what: &str,
    max_len: usize,
) -> ValidationResult {
    if value.is_empty() {
        return Err(ValidationError::new(code, format!("{what} cannot be empty")));
    }
    let len = value.chars().count();
    if len > max_len {
        return Err(ValidationError::new(
            code,
            format!("{what} exceeds maximum length of {max_len} characters"),
        )
        .with_details(json!({"length": len, "max_length": max_len})));
    }
    if !value.chars().all(is_identifier_char) {
        return Err(
            ValidationError::new(code, format!("{what} contains invalid characters"))
                .with_details(json!({"allowed_pattern": "^[A-Za-z0-9._-]+$"})),
        );
    }
    Ok(())
}

/// Tool names flow into the script's argument vector, so only
/// `[A-Za-z0-9._-]`, at most 128 characters, and no `..` are accepted.
pub fn validate_tool_name(name: &str) -> ValidationResult {
    check_identifier(name, ErrorCode::InvalidToolName, "Tool name", MAX_TOOL_NAME_LEN)?;
    if name.contains("..") {
        return Err(ValidationError::new(
            ErrorCode::InvalidToolName,
            "Tool name contains a parent directory reference",
        ));
    }
    Ok(())
}

pub fn validate_policy_pack_id(pack_id: &str) -> ValidationResult {
    check_identifier(
        pack_id,
        ErrorCode::InvalidPolicyPackId,
        "Policy pack ID",
        MAX_POLICY_PACK_ID_LEN,
    )
}

/// Agent ids are `ap_` followed by letters, digits or underscores.
pub fn validate_agent_id(agent_id: &str) -> ValidationResult {
    check_identifier(agent_id, ErrorCode::InvalidAgentId, "Agent ID", MAX_AGENT_ID_LEN)?;
    let well_formed = agent_id
        .strip_prefix(AGENT_ID_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !well_formed {
        return Err(
            ValidationError::new(ErrorCode::InvalidAgentId, "Agent ID has invalid format")
                .with_details(json!({"expected_format": "ap_<alphanumeric>"})),
        );
    }
    Ok(())
}

/// Check a call context for shape, serialized size and nesting depth.
///
/// Size is measured on the compact JSON serialization; a context of exactly
/// `max_bytes` passes. Depth counts one level per non-empty mapping or
/// sequence on the deepest path; scalars and empty containers add nothing.
pub fn validate_context_structure(context: &Value, max_bytes: usize) -> ValidationResult {
    if !context.is_object() {
        return Err(ValidationError::new(
            ErrorCode::InvalidContext,
            "Context must be a mapping",
        ));
    }

    let size = match serde_json::to_vec(context) {
        Ok(bytes) => bytes.len(),
        Err(e) => {
            return Err(ValidationError::new(
                ErrorCode::ContextNotSerializable,
                "Context cannot be serialized to JSON",
            )
            .with_details(json!({"error": e.to_string()})));
        }
    };
    if size > max_bytes {
        return Err(ValidationError::new(
            ErrorCode::ContextTooLarge,
            format!("Context exceeds maximum size of {max_bytes} bytes"),
        )
        .with_details(json!({"size_bytes": size, "max_bytes": max_bytes})));
    }

    let depth = nesting_depth(context);
    if depth > MAX_CONTEXT_DEPTH {
        return Err(ValidationError::new(
            ErrorCode::ContextTooNested,
            format!("Context exceeds maximum nesting depth of {MAX_CONTEXT_DEPTH}"),
        )
        .with_details(json!({"depth": depth, "max_depth": MAX_CONTEXT_DEPTH})));
    }
    Ok(())
}

/// Iterative so a hostile, deeply nested value cannot blow the stack.
fn nesting_depth(value: &Value) -> usize {
    let mut max = 0;
    let mut stack = vec![(value, 0usize)];
    while let Some((v, depth)) = stack.pop() {
        match v {
            Value::Object(map) if !map.is_empty() => {
                stack.extend(map.values().map(|child| (child, depth + 1)));
            }
            Value::Array(items) if !items.is_empty() => {
                stack.extend(items.iter().map(|child| (child, depth + 1)));
            }
            _ => max = max.max(depth),
        }
    }
    max
}

// ── Passport paths ──

/// A directory under which passport files may live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedBase {
    /// Any descendant of this directory.
    Directory(PathBuf),
    /// Only descendants of `root` whose first component below it starts
    /// with `marker` (e.g. `/tmp/aport-*`).
    Marked { root: PathBuf, marker: String },
}

/// Allowed passport locations plus the home directory used for `~`.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    home: Option<PathBuf>,
    bases: Vec<AllowedBase>,
}

impl PathPolicy {
    pub fn new(home: Option<PathBuf>, bases: Vec<AllowedBase>) -> Self {
        Self { home, bases }
    }

    /// `~/.openclaw`, `~/.aport` and `/tmp/aport-*`.
    pub fn with_defaults(home: Option<PathBuf>) -> Self {
        let mut bases = Vec::new();
        if let Some(h) = &home {
            bases.push(AllowedBase::Directory(h.join(".openclaw")));
            bases.push(AllowedBase::Directory(h.join(".aport")));
        }
        bases.push(AllowedBase::Marked {
            root: PathBuf::from("/tmp"),
            marker: TEMP_DIR_MARKER.to_string(),
        });
        Self { home, bases }
    }

    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    pub fn bases(&self) -> &[AllowedBase] {
        &self.bases
    }

    /// Expand a leading `~` against this policy's home directory.
    pub fn expand(&self, raw: &str) -> PathBuf {
        let home = self.home.as_ref().and_then(|h| h.to_str());
        PathBuf::from(shellexpand::tilde_with_context(raw, || home).as_ref())
    }

    fn expand_path(&self, path: &Path) -> PathBuf {
        match path.to_str() {
            Some(s) => self.expand(s),
            None => path.to_path_buf(),
        }
    }

    fn permits(&self, resolved: &Path) -> bool {
        self.bases.iter().any(|base| match base {
            AllowedBase::Directory(dir) => {
                resolve_lenient(&self.expand_path(dir)).is_ok_and(|d| resolved.starts_with(d))
            }
            AllowedBase::Marked { root, marker } => {
                let Ok(root) = resolve_lenient(&self.expand_path(root)) else {
                    return false;
                };
                resolved
                    .strip_prefix(&root)
                    .ok()
                    .and_then(|rest| rest.components().next())
                    .and_then(|first| match first {
                        Component::Normal(name) => name.to_str(),
                        _ => None,
                    })
                    .is_some_and(|name| name.starts_with(marker.as_str()))
            }
        })
    }
}

/// Check that a passport path stays inside the allowed base directories.
///
/// The raw path is checked first for null bytes and parent-directory
/// references, so a traversal attempt is reported as such even when it
/// happens to land inside an allowed base. The path is then resolved to an
/// absolute, symlink-free form and matched against the bases.
pub fn validate_passport_path(path: &Path, policy: &PathPolicy) -> ValidationResult {
    if path.as_os_str().as_encoded_bytes().contains(&0) {
        return Err(ValidationError::new(
            ErrorCode::PathInvalidCharacters,
            "Path contains null bytes",
        ));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(
            ValidationError::new(ErrorCode::PathTraversalAttempt, "Path contains traversal sequences")
                .with_details(json!({"path": path.display().to_string()})),
        );
    }

    let resolved = match resolve_lenient(&policy.expand_path(path)) {
        Ok(p) => p,
        Err(e) => {
            return Err(
                ValidationError::new(ErrorCode::PathResolutionError, "Failed to resolve path")
                    .with_details(json!({"error": e.to_string()})),
            );
        }
    };

    if !policy.permits(&resolved) {
        let bases: Vec<String> = policy
            .bases
            .iter()
            .map(|b| match b {
                AllowedBase::Directory(d) => d.display().to_string(),
                AllowedBase::Marked { root, marker } => {
                    format!("{}/{marker}*", root.display())
                }
            })
            .collect();
        return Err(ValidationError::new(
            ErrorCode::PathNotAllowed,
            "Path is not within allowed directories",
        )
        .with_details(json!({"path": resolved.display().to_string(), "allowed_bases": bases})));
    }
    Ok(())
}

/// Make a path absolute and free of symlinks, `.` and `..`, without requiring
/// it to exist. Every existing prefix that is a symlink is replaced by its
/// canonical target before the next component is applied.
pub fn resolve_lenient(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if std::fs::symlink_metadata(&resolved).is_ok_and(|m| m.file_type().is_symlink()) {
                    resolved = std::fs::canonicalize(&resolved)?;
                }
            }
        }
    }
    Ok(resolved)
}

// ── Log hygiene ──

const KEY_PREFIXES: [&str; 3] = ["aprt_", "sk_", "pk_"];
const SENSITIVE_VALUE_PREFIXES: [&str; 6] = ["password", "passwd", "pwd", "secret", "token", "key"];
const SENSITIVE_FIELD_WORDS: [&str; 5] = ["password", "secret", "token", "key", "api"];

/// Mask or redact a value before it reaches a log line.
///
/// API keys keep their first four characters, bearer tokens keep the scheme,
/// values that look like secrets or sit in a sensitive-sounding field are
/// redacted, and anything else is cut to 200 characters.
pub fn sanitize_log_value(value: &str, field_name: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let lower = value.to_ascii_lowercase();

    if KEY_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        let head: String = value.chars().take(4).collect();
        return format!("{head}****");
    }
    if let Some(rest) = lower.strip_prefix("bearer")
        && rest.starts_with(char::is_whitespace)
    {
        let head: String = value.chars().take(7).collect();
        return format!("{head}****");
    }
    if SENSITIVE_VALUE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return "[REDACTED]".into();
    }

    let field = field_name.to_ascii_lowercase();
    if SENSITIVE_FIELD_WORDS.iter().any(|w| field.contains(w)) {
        return "[REDACTED]".into();
    }

    if value.chars().count() > MAX_LOG_VALUE_LEN {
        let head: String = value.chars().take(MAX_LOG_VALUE_LEN).collect();
        return format!("{head}...");
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_of(r: ValidationResult) -> Option<ErrorCode> {
        r.err().map(|e| e.code)
    }

    // ── tool names ──

    #[test]
    fn tool_names_accepted() {
        let longest = "x".repeat(128);
        for name in ["run_command", "system.command.execute", "git-push", "A1", longest.as_str()] {
            assert!(validate_tool_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn tool_names_rejected() {
        let long = "x".repeat(129);
        for name in ["", long.as_str(), "rm; ls", "a/b", "a b", "tab\t", "a..b", "..", "$(id)", "naïve"] {
            assert_eq!(
                code_of(validate_tool_name(name)),
                Some(ErrorCode::InvalidToolName),
                "{name:?}"
            );
        }
    }

    #[test]
    fn length_details_reported() {
        let err = validate_tool_name(&"y".repeat(200)).unwrap_err();
        assert_eq!(err.details.unwrap()["length"], 200);
    }

    // ── ids ──

    #[test]
    fn agent_ids() {
        assert!(validate_agent_id("ap_1").is_ok());
        assert!(validate_agent_id("ap_abc_DEF_123").is_ok());
        for bad in ["", "ap_", "agent-1", "ap-1", "ap_a.b", "xap_1"] {
            assert_eq!(code_of(validate_agent_id(bad)), Some(ErrorCode::InvalidAgentId), "{bad}");
        }
    }

    #[test]
    fn policy_pack_ids() {
        assert!(validate_policy_pack_id("system.command.execute.v1").is_ok());
        assert_eq!(
            code_of(validate_policy_pack_id("a/b")),
            Some(ErrorCode::InvalidPolicyPackId)
        );
        assert_eq!(code_of(validate_policy_pack_id("")), Some(ErrorCode::InvalidPolicyPackId));
    }

    // ── contexts ──

    fn nested(levels: usize) -> Value {
        let mut v = json!(1);
        for _ in 0..levels {
            v = json!({ "a": v });
        }
        v
    }

    #[test]
    fn context_must_be_mapping() {
        assert_eq!(
            code_of(validate_context_structure(&json!([1, 2]), 1024)),
            Some(ErrorCode::InvalidContext)
        );
    }

    #[test]
    fn context_size_boundary() {
        // {"k":"<n x's>"} is n + 8 bytes
        let limit = 64;
        let at_limit = json!({ "k": "x".repeat(limit - 8) });
        assert_eq!(serde_json::to_vec(&at_limit).unwrap().len(), limit);
        assert!(validate_context_structure(&at_limit, limit).is_ok());

        let over = json!({ "k": "x".repeat(limit - 7) });
        assert_eq!(
            code_of(validate_context_structure(&over, limit)),
            Some(ErrorCode::ContextTooLarge)
        );
    }

    #[test]
    fn context_default_limit() {
        let big = json!({ "blob": "x".repeat(DEFAULT_MAX_CONTEXT_BYTES) });
        assert_eq!(
            code_of(validate_context_structure(&big, DEFAULT_MAX_CONTEXT_BYTES)),
            Some(ErrorCode::ContextTooLarge)
        );
    }

    #[test]
    fn context_depth_boundary() {
        assert!(validate_context_structure(&nested(10), 1024).is_ok());
        assert_eq!(
            code_of(validate_context_structure(&nested(11), 1024)),
            Some(ErrorCode::ContextTooNested)
        );
    }

    #[test]
    fn depth_rules() {
        assert_eq!(nesting_depth(&json!(1)), 0);
        assert_eq!(nesting_depth(&json!({})), 0);
        assert_eq!(nesting_depth(&json!({"a": {}})), 1);
        assert_eq!(nesting_depth(&json!({"a": [1, {"b": 2}]})), 3);
    }

    // ── paths ──

    fn policy_with_home(home: &Path) -> PathPolicy {
        PathPolicy::with_defaults(Some(home.to_path_buf()))
    }

    #[test]
    fn home_passport_paths() {
        let home = tempfile::Builder::new().prefix("home-").tempdir().unwrap();
        let policy = policy_with_home(home.path());
        assert!(validate_passport_path(Path::new("~/.aport/x/passport.json"), &policy).is_ok());
        assert!(validate_passport_path(Path::new("~/.openclaw/passport.json"), &policy).is_ok());
        assert_eq!(
            code_of(validate_passport_path(Path::new("~/elsewhere/passport.json"), &policy)),
            Some(ErrorCode::PathNotAllowed)
        );
    }

    #[test]
    fn temp_marker_rule() {
        let policy = PathPolicy::with_defaults(None);
        assert!(validate_passport_path(Path::new("/tmp/aport-xyz/passport.json"), &policy).is_ok());
        assert_eq!(
            code_of(validate_passport_path(Path::new("/tmp/other/passport.json"), &policy)),
            Some(ErrorCode::PathNotAllowed)
        );
        assert_eq!(
            code_of(validate_passport_path(Path::new("/tmp"), &policy)),
            Some(ErrorCode::PathNotAllowed)
        );
    }

    #[test]
    fn traversal_reported_even_inside_allowed_base() {
        let home = tempfile::Builder::new().prefix("home-").tempdir().unwrap();
        let policy = policy_with_home(home.path());
        assert_eq!(
            code_of(validate_passport_path(Path::new("~/.aport/../etc/passwd"), &policy)),
            Some(ErrorCode::PathTraversalAttempt)
        );
        // resolves back inside ~/.aport, still rejected
        assert_eq!(
            code_of(validate_passport_path(
                Path::new("~/.aport/a/../passport.json"),
                &policy
            )),
            Some(ErrorCode::PathTraversalAttempt)
        );
    }

    #[test]
    fn null_bytes_rejected() {
        let policy = PathPolicy::with_defaults(None);
        assert_eq!(
            code_of(validate_passport_path(Path::new("/tmp/aport-x/pa\0ss.json"), &policy)),
            Some(ErrorCode::PathInvalidCharacters)
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_rejected() {
        let home = tempfile::Builder::new().prefix("home-").tempdir().unwrap();
        let outside = tempfile::Builder::new().prefix("outside-").tempdir().unwrap();
        let aport = home.path().join(".aport");
        std::fs::create_dir_all(&aport).unwrap();
        std::os::unix::fs::symlink(outside.path(), aport.join("link")).unwrap();

        let policy = policy_with_home(home.path());
        assert_eq!(
            code_of(validate_passport_path(Path::new("~/.aport/link/passport.json"), &policy)),
            Some(ErrorCode::PathNotAllowed)
        );
    }

    #[test]
    fn custom_bases() {
        let dir = tempfile::Builder::new().prefix("custom-").tempdir().unwrap();
        let policy = PathPolicy::new(None, vec![AllowedBase::Directory(dir.path().to_path_buf())]);
        assert!(validate_passport_path(&dir.path().join("p.json"), &policy).is_ok());
        assert!(validate_passport_path(Path::new("/tmp/aport-x/p.json"), &policy).is_err());
    }

    #[test]
    fn lenient_resolution_of_missing_tail() {
        let dir = tempfile::tempdir().unwrap();
        let p = resolve_lenient(&dir.path().join("missing/./deeper/../file.json")).unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(p, root.join("missing/file.json"));
    }

    // ── log hygiene ──

    #[test]
    fn sanitize_api_keys_and_tokens() {
        assert_eq!(sanitize_log_value("aprt_live_123456", ""), "aprt****");
        assert_eq!(sanitize_log_value("sk_test_abc", ""), "sk_t****");
        assert_eq!(sanitize_log_value("Bearer abc.def", ""), "Bearer ****");
        assert_eq!(sanitize_log_value("secret-value", ""), "[REDACTED]");
    }

    #[test]
    fn sanitize_by_field_name() {
        assert_eq!(sanitize_log_value("hunter2", "db_password"), "[REDACTED]");
        assert_eq!(sanitize_log_value("abc", "API_URL"), "[REDACTED]");
        assert_eq!(sanitize_log_value("run_command", "tool"), "run_command");
    }

    #[test]
    fn sanitize_truncates() {
        let out = sanitize_log_value(&"z".repeat(500), "input");
        assert_eq!(out.len(), MAX_LOG_VALUE_LEN + 3);
        assert!(out.ends_with("..."));
        assert_eq!(sanitize_log_value("", "api_key"), "");
    }
}
