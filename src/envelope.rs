use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

/// The single JSON document every command prints to stdout.
///
/// Log lines go to stderr; stdout carries exactly one envelope so callers
/// can pipe it. Error messages never include absolute filesystem paths.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub message: String,
    pub data: Value,
}

impl Envelope {
    /// A success envelope with serialized payload.
    pub fn success(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            status: "success",
            kind: None,
            message: message.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    /// An error envelope carrying the stable error kind.
    pub fn failure(error: &Error) -> Self {
        Self {
            status: "error",
            kind: Some(error.kind()),
            message: error.to_string(),
            data: Value::Null,
        }
    }

    /// Render as pretty JSON with a trailing newline.
    pub fn render(&self) -> String {
        let mut out = serde_json::to_string_pretty(self).unwrap_or_else(|_| {
            "{\"status\":\"error\",\"message\":\"envelope serialization failed\"}".to_string()
        });
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let envelope = Envelope::success("written", serde_json::json!({"id": "learning-x"}));
        let value: Value = serde_json::from_str(&envelope.render()).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["message"], "written");
        assert_eq!(value["data"]["id"], "learning-x");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn failure_envelope_carries_kind() {
        let err = Error::Invalid("bad tag".into());
        let envelope = Envelope::failure(&err);
        let value: Value = serde_json::from_str(&envelope.render()).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["kind"], "invalid");
        assert_eq!(value["data"], Value::Null);
    }

    #[test]
    fn render_ends_with_newline() {
        let envelope = Envelope::success("ok", Value::Null);
        assert!(envelope.render().ends_with('\n'));
    }
}
