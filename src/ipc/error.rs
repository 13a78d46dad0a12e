use serde_json::json;

use crate::commit::EditError;
use crate::timetable::TimetableError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// A protocol error not yet bound to a request id.
#[derive(Debug, Clone)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    /// Wraps a plumbing failure; the underlying error becomes the message.
    pub fn failed(code: &'static str, e: anyhow::Error) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<TimetableError> for HandlerErr {
    fn from(e: TimetableError) -> Self {
        Self {
            code: "bad_params",
            message: e.to_string(),
            details: Some(json!({ "field": e.field() })),
        }
    }
}

impl From<EditError> for HandlerErr {
    fn from(e: EditError) -> Self {
        let code = match &e {
            EditError::NoActiveEdit => "no_active_edit",
            EditError::Stale { .. } => "stale_edit",
            EditError::Write(_) => "write_failed",
        };
        Self::new(code, e.to_string())
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}
