//! Request parameter readers shared by the handler families.

use rusqlite::Connection;
use serde_json::Value;

use super::error::HandlerErr;
use super::types::{AppState, Request};
use crate::timetable::{validate_id, Day, SlotKey};

pub fn conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn opt_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

pub fn str_param<'a>(req: &'a Request, key: &str) -> Result<&'a str, HandlerErr> {
    opt_str(req, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

/// A required id-like parameter, trimmed and checked for separators.
pub fn id_param(req: &Request, key: &'static str) -> Result<String, HandlerErr> {
    Ok(validate_id(str_param(req, key)?, key)?)
}

pub fn token_param(req: &Request) -> Result<u64, HandlerErr> {
    req.params
        .get("token")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing token"))
}

/// `day` plus `period`; the period may arrive as a number or a numeric string.
pub fn slot_params(req: &Request) -> Result<SlotKey, HandlerErr> {
    let day = Day::parse(str_param(req, "day")?)?;
    let period = match req.params.get("period") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| HandlerErr::bad_params("missing period"))?;
    Ok(SlotKey::new(day, period)?)
}
