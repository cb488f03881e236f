//! Decision backends: the local guardrail script and the remote
//! verification API. Both turn every failure into a deny; neither returns a
//! fault.

pub mod local;
pub mod remote;

use serde_json::Value;

use crate::eval::{Decision, Reason};

/// The `{allow, reasons}` pair both backends report.
#[derive(Debug)]
pub struct Verdict {
    pub allow: bool,
    pub reasons: Vec<Reason>,
}

impl Verdict {
    /// Parse a verdict from either `{allow, ...}` or `{decision: {allow, ...}}`.
    /// Only `allow` is checked: it must be a boolean. Reasons are taken as
    /// reported, whatever their shape.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };
        if let Some(Value::Object(nested)) = map.remove("decision") {
            map = nested;
        }
        let allow = map.get("allow")?.as_bool()?;
        let reasons = match map.remove("reasons") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.into_iter().map(Reason::from_external).collect(),
            Some(single) => vec![Reason::from_external(single)],
        };
        Some(Self { allow, reasons })
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Value>(bytes)
            .ok()
            .and_then(Self::from_value)
    }

    pub fn into_decision(self) -> Decision {
        Decision::from_verdict(self.allow, self.reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_and_nested() {
        let top = Verdict::from_value(json!({"allow": true})).unwrap();
        assert!(top.allow);

        let nested = Verdict::from_value(json!({
            "decision": {"allow": false, "reasons": [{"code": "oap.denied", "message": "blocked"}]},
            "request_id": "x"
        }))
        .unwrap();
        assert!(!nested.allow);
        assert_eq!(nested.reasons[0].code.as_deref(), Some("oap.denied"));
    }

    #[test]
    fn non_object_decision_key_is_ignored() {
        let v = Verdict::from_value(json!({"allow": true, "decision": "allow"})).unwrap();
        assert!(v.allow);
    }

    #[test]
    fn allow_must_be_boolean() {
        assert!(Verdict::from_value(json!({"allow": "yes"})).is_none());
        assert!(Verdict::from_value(json!({"reasons": []})).is_none());
        assert!(Verdict::from_value(json!([true])).is_none());
        assert!(Verdict::from_slice(b"not json").is_none());
    }

    #[test]
    fn string_reasons_accepted() {
        let v = Verdict::from_value(json!({"allow": true, "reasons": ["passed all checks"]})).unwrap();
        assert!(v.allow);
        assert_eq!(v.reasons[0].message, "passed all checks");

        let v = Verdict::from_value(json!({"allow": false, "reasons": null})).unwrap();
        assert!(v.reasons.is_empty());
    }

    #[test]
    fn reasons_round_trip_unchanged() {
        let reasons = json!([
            {"code": "oap.denied", "message": "blocked", "severity": "high"},
            {"message": "second", "docs": "https://example.test/r"}
        ]);
        let v = Verdict::from_value(json!({"allow": false, "reasons": reasons.clone()})).unwrap();
        let d = v.into_decision();
        assert_eq!(serde_json::to_value(d.reasons()).unwrap(), reasons);
    }

    #[test]
    fn empty_deny_gets_reason() {
        let d = Verdict::from_value(json!({"allow": false})).unwrap().into_decision();
        assert!(!d.reasons().is_empty());
    }
}
