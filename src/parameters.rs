//! Scheduling parameters: stored per key, validated on write, never read by
//! the conflict checks.

use crate::db;
use crate::timetable::{validate_id, TimetableError};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKey {
    WorkHours,
    TeacherPrefs,
    LabPlacementDefault,
    PreventConsecTheory,
    PreventConsecLab,
    ForcedAssignments,
}

impl ParameterKey {
    pub const ALL: [ParameterKey; 6] = [
        ParameterKey::WorkHours,
        ParameterKey::TeacherPrefs,
        ParameterKey::LabPlacementDefault,
        ParameterKey::PreventConsecTheory,
        ParameterKey::PreventConsecLab,
        ParameterKey::ForcedAssignments,
    ];

    pub fn parse(s: &str) -> Result<Self, TimetableError> {
        match s {
            "workHours" => Ok(Self::WorkHours),
            "teacherPrefs" => Ok(Self::TeacherPrefs),
            "labPlacementDefault" => Ok(Self::LabPlacementDefault),
            "preventConsecTheory" => Ok(Self::PreventConsecTheory),
            "preventConsecLab" => Ok(Self::PreventConsecLab),
            "forcedAssignments" => Ok(Self::ForcedAssignments),
            other => Err(TimetableError::UnknownParameter(other.to_string())),
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::WorkHours => "workHours",
            Self::TeacherPrefs => "teacherPrefs",
            Self::LabPlacementDefault => "labPlacementDefault",
            Self::PreventConsecTheory => "preventConsecTheory",
            Self::PreventConsecLab => "preventConsecLab",
            Self::ForcedAssignments => "forcedAssignments",
        }
    }

    pub fn default_value(self) -> Value {
        match self {
            Self::WorkHours | Self::TeacherPrefs => json!({}),
            Self::LabPlacementDefault => json!("either"),
            Self::PreventConsecTheory | Self::PreventConsecLab => json!(true),
            Self::ForcedAssignments => json!([]),
        }
    }

    /// Checks `value` and returns the normalized form that gets stored.
    pub fn normalize(self, value: &Value) -> Result<Value, TimetableError> {
        let key = self.key();
        match self {
            Self::WorkHours => normalize_work_hours(key, value),
            Self::TeacherPrefs => normalize_teacher_prefs(key, value),
            Self::LabPlacementDefault => {
                let s = one_of(key, value, &["first", "second", "either"])?;
                Ok(Value::String(s))
            }
            Self::PreventConsecTheory | Self::PreventConsecLab => value
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| bad(key, "must be boolean")),
            Self::ForcedAssignments => normalize_forced(key, value),
        }
    }
}

fn bad(key: &'static str, message: impl Into<String>) -> TimetableError {
    TimetableError::BadParameter {
        key,
        message: message.into(),
    }
}

fn as_object<'a>(key: &'static str, value: &'a Value) -> Result<&'a Map<String, Value>, TimetableError> {
    value.as_object().ok_or_else(|| bad(key, "must be an object"))
}

fn one_of(key: &'static str, value: &Value, allowed: &[&str]) -> Result<String, TimetableError> {
    let s = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| bad(key, "must be a string"))?;
    if !allowed.contains(&s) {
        return Err(bad(key, format!("must be one of {}", allowed.join("|"))));
    }
    Ok(s.to_string())
}

/// `HH:MM`, 24-hour.
fn parse_clock(key: &'static str, value: Option<&Value>, default: &str) -> Result<(String, u32), TimetableError> {
    let raw = match value {
        None | Some(Value::Null) => default,
        Some(v) => v.as_str().ok_or_else(|| bad(key, "times must be strings"))?.trim(),
    };
    let minutes = raw
        .split_once(':')
        .and_then(|(h, m)| {
            if h.len() != 2 || m.len() != 2 {
                return None;
            }
            let h: u32 = h.parse().ok()?;
            let m: u32 = m.parse().ok()?;
            (h < 24 && m < 60).then_some(h * 60 + m)
        })
        .ok_or_else(|| bad(key, format!("invalid time: {raw}")))?;
    Ok((raw.to_string(), minutes))
}

fn normalize_work_hours(key: &'static str, value: &Value) -> Result<Value, TimetableError> {
    let mut out = Map::new();
    for (teacher_id, entry) in as_object(key, value)? {
        let entry = as_object(key, entry)?;
        let designation = match entry.get("designation") {
            None | Some(Value::Null) => "Prof".to_string(),
            Some(v) => one_of(key, v, &["Prof", "Asst", "AsstProf", "Other"])?,
        };
        let (start, start_min) = parse_clock(key, entry.get("start"), "09:00")?;
        let (end, end_min) = parse_clock(key, entry.get("end"), "17:00")?;
        if end_min <= start_min {
            return Err(bad(key, format!("{teacher_id}: end must be after start")));
        }
        out.insert(
            teacher_id.clone(),
            json!({ "designation": designation, "start": start, "end": end }),
        );
    }
    Ok(Value::Object(out))
}

fn normalize_teacher_prefs(key: &'static str, value: &Value) -> Result<Value, TimetableError> {
    let mut out = Map::new();
    for (teacher_id, pref) in as_object(key, value)? {
        let pref = one_of(key, pref, &["UG", "PG", "Both"])?;
        out.insert(teacher_id.clone(), Value::String(pref));
    }
    Ok(Value::Object(out))
}

fn normalize_forced(key: &'static str, value: &Value) -> Result<Value, TimetableError> {
    let items = value.as_array().ok_or_else(|| bad(key, "must be an array"))?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let item = as_object(key, item)?;
        let text = |field: &str| -> Result<String, TimetableError> {
            let raw = item.get(field).and_then(|v| v.as_str()).unwrap_or("");
            validate_id(raw, "forcedAssignments")
                .map_err(|_| bad(key, format!("entry {i}: {field} is required")))
        };
        let restrict_lab = match item.get("restrictLab") {
            None | Some(Value::Null) => true,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| bad(key, format!("entry {i}: restrictLab must be boolean")))?,
        };
        out.push(json!({
            "routineId": text("routineId")?,
            "className": text("className")?,
            "subjectCode": text("subjectCode")?,
            "teacherId": text("teacherId")?,
            "restrictLab": restrict_lab,
        }));
    }
    Ok(Value::Array(out))
}

/// Every key, stored value or default, as `{key: {value, updatedAt}}`.
pub fn load_all(conn: &Connection) -> anyhow::Result<Value> {
    let mut out = Map::new();
    for key in ParameterKey::ALL {
        let stored = db::parameter_get_json(conn, key.key())?;
        let entry = match stored {
            Some(v) if v.get("value").is_some() => v,
            _ => json!({ "value": key.default_value(), "updatedAt": null }),
        };
        out.insert(key.key().to_string(), entry);
    }
    Ok(Value::Object(out))
}

pub fn store(conn: &Connection, key: ParameterKey, value: &Value) -> anyhow::Result<Value> {
    let updated_at = db::now_rfc3339();
    let doc = json!({ "value": value, "updatedAt": updated_at });
    db::parameter_set_json(conn, key.key(), &doc)?;
    Ok(doc)
}
