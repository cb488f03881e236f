//! Remote evaluation: `POST {api_url}/api/verify/policy/{pack}`.
//!
//! Identity travels either as `context.agent_id` (cloud passport) or as the
//! full passport document in the body. A full policy pack travels in the body
//! with the reserved `IN_BODY` path segment; otherwise the pack id is the
//! path segment.

use std::io::Read;
use std::time::Duration;

use serde_json::{Map, Value, json};

use super::Verdict;
use crate::eval::{Decision, ErrorCode, Passport, PolicyPack, Reason};
use crate::validate::validate_policy_pack_id;

/// Path segment meaning "the policy is in the request body".
pub const IN_BODY_PACK_ID: &str = "IN_BODY";
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
/// How much of an error body is quoted back in the deny message.
const ERROR_SNIPPET_BYTES: usize = 200;

/// Connection settings for the verification API.
#[derive(Debug)]
pub struct RemoteBackend<'a> {
    pub api_url: &'a str,
    pub api_key: Option<&'a str>,
    pub timeout: Duration,
    pub verify_ssl: bool,
}

/// What to verify in one call.
#[derive(Debug)]
pub struct RemoteCall<'a> {
    pub pack_id: &'a str,
    /// The `{tool, input, params}` mapping.
    pub context: &'a Value,
    pub agent_id: Option<&'a str>,
    pub passport: Option<&'a Passport>,
    pub policy: Option<&'a PolicyPack>,
}

impl RemoteCall<'_> {
    /// The URL path segment: `IN_BODY` when a full pack is sent.
    pub fn path_segment(&self) -> &str {
        if self.policy.is_some() {
            IN_BODY_PACK_ID
        } else {
            self.pack_id
        }
    }

    /// `{context: {...context, agent_id?, policy_id}, passport?, policy?}`.
    pub fn body(&self) -> Value {
        let mut context = match self.context {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if let Some(agent_id) = self.agent_id {
            context.insert("agent_id".into(), Value::String(agent_id.to_string()));
        }
        let policy_id = match self.policy {
            Some(pack) => pack.id.as_str(),
            None => self.pack_id,
        };
        context
            .entry("policy_id")
            .or_insert_with(|| Value::String(policy_id.to_string()));

        let mut body = Map::new();
        body.insert("context".into(), Value::Object(context));
        if let Some(passport) = self.passport {
            body.insert("passport".into(), Value::Object(passport.as_map().clone()));
        }
        if let Some(pack) = self.policy
            && let Ok(doc) = serde_json::to_value(pack)
        {
            body.insert("policy".into(), doc);
        }
        Value::Object(body)
    }
}

impl RemoteBackend<'_> {
    pub fn endpoint(&self, segment: &str) -> String {
        format!("{}/api/verify/policy/{segment}", self.api_url.trim_end_matches('/'))
    }

    pub fn evaluate(&self, call: &RemoteCall<'_>) -> Decision {
        if call.agent_id.is_none() && call.passport.is_none() {
            return Decision::deny(
                ErrorCode::ApiError,
                "Agent identity required: configure an agent_id or a passport",
            );
        }
        let segment = call.path_segment();
        if let Err(e) = validate_policy_pack_id(segment) {
            return Decision::denied(e.to_reason());
        }

        let url = self.endpoint(segment);
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none());
        if !self.verify_ssl {
            log::warn!("TLS certificate verification is disabled for {url}");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = match builder.build() {
            Ok(c) => c,
            Err(e) => {
                return Decision::deny(ErrorCode::ApiError, format!("HTTP client setup failed: {e}"));
            }
        };

        let mut request = client.post(&url).json(&call.body());
        if let Some(key) = self.api_key {
            request = request.bearer_auth(key);
        }
        log::debug!("POST {url}");
        let mut response = match request.send() {
            Ok(r) => r,
            Err(e) => return transport_failure(&e),
        };

        let status = response.status();
        let body = read_response_limited(&mut response, MAX_RESPONSE_BYTES);

        if !status.is_success() {
            let code = match status.as_u16() {
                401 | 403 => ErrorCode::ApiAuthenticationFailed,
                404 => ErrorCode::ApiNotFound,
                429 => ErrorCode::ApiRateLimitExceeded,
                _ => ErrorCode::ApiError,
            };
            let snippet = body
                .as_deref()
                .map(|b| String::from_utf8_lossy(&b[..b.len().min(ERROR_SNIPPET_BYTES)]).into_owned())
                .unwrap_or_default();
            return Decision::denied(
                Reason::new(code, format!("Verification API returned HTTP {status}: {snippet}"))
                    .with_details(json!({ "status": status.as_u16() })),
            );
        }

        let body = match body {
            Ok(b) => b,
            Err(e) => {
                return Decision::deny(
                    ErrorCode::ApiInvalidResponse,
                    format!("Cannot read verification API response: {e}"),
                );
            }
        };
        match Verdict::from_slice(&body) {
            Some(v) => v.into_decision(),
            None => Decision::deny(
                ErrorCode::ApiInvalidResponse,
                "Verification API response is not JSON with a boolean allow field",
            ),
        }
    }
}

fn transport_failure(e: &reqwest::Error) -> Decision {
    let code = if e.is_timeout() {
        ErrorCode::ApiTimeout
    } else if e.is_connect() {
        ErrorCode::ApiConnectionFailed
    } else {
        ErrorCode::ApiError
    };
    log::warn!("verification API call failed: {e}");
    Decision::deny(code, format!("Verification API request failed: {e}"))
}

/// Reads the response body while enforcing a byte limit.
fn read_response_limited(
    response: &mut reqwest::blocking::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, String> {
    if let Some(expected) = response.content_length()
        && expected > max_bytes as u64
    {
        return Err(format!("response of {expected} bytes exceeds {max_bytes}"));
    }
    let mut buf = Vec::new();
    response
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut buf)
        .map_err(|e| e.to_string())?;
    if buf.len() > max_bytes {
        return Err(format!("response exceeds {max_bytes} bytes"));
    }
    Ok(buf)
}
