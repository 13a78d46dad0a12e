use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimetableError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} cannot contain '/'")]
    Separator { field: &'static str },
    #[error("unknown day: {0}")]
    UnknownDay(String),
    #[error("period {0} does not exist")]
    UnknownPeriod(i64),
    #[error("period {0} is a break slot")]
    BreakPeriod(u8),
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("{key}: {message}")]
    BadParameter { key: &'static str, message: String },
}

impl TimetableError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Empty { field } | Self::Separator { field } => field,
            Self::UnknownDay(_) => "day",
            Self::UnknownPeriod(_) | Self::BreakPeriod(_) => "period",
            Self::UnknownParameter(_) => "key",
            Self::BadParameter { .. } => "value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
}

impl Day {
    pub const ALL: [Day; 5] = [Day::Mon, Day::Tue, Day::Wed, Day::Thu, Day::Fri];

    pub fn key(self) -> &'static str {
        match self {
            Day::Mon => "mon",
            Day::Tue => "tue",
            Day::Wed => "wed",
            Day::Thu => "thu",
            Day::Fri => "fri",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Day::Mon => "Monday",
            Day::Tue => "Tuesday",
            Day::Wed => "Wednesday",
            Day::Thu => "Thursday",
            Day::Fri => "Friday",
        }
    }

    /// Accepts either the storage key (`mon`) or the display name (`Monday`).
    pub fn parse(raw: &str) -> Result<Day, TimetableError> {
        let t = raw.trim();
        Day::ALL
            .into_iter()
            .find(|d| t.eq_ignore_ascii_case(d.key()) || t.eq_ignore_ascii_case(d.display_name()))
            .ok_or_else(|| TimetableError::UnknownDay(t.to_string()))
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub period: u8,
    pub time: &'static str,
    pub is_break: bool,
}

pub const TIME_SLOTS: [TimeSlot; 8] = [
    TimeSlot { period: 1, time: "9:00 - 10:00", is_break: false },
    TimeSlot { period: 2, time: "10:00 - 11:00", is_break: false },
    TimeSlot { period: 3, time: "11:00 - 12:00", is_break: false },
    TimeSlot { period: 4, time: "12:00 - 1:00", is_break: true },
    TimeSlot { period: 5, time: "1:00 - 2:00", is_break: false },
    TimeSlot { period: 6, time: "2:00 - 3:00", is_break: false },
    TimeSlot { period: 7, time: "3:00 - 4:00", is_break: false },
    TimeSlot { period: 8, time: "4:00 - 5:00", is_break: false },
];

pub const BREAK_LABEL: &str = "Lunch Break";

pub fn time_slot(period: u8) -> Option<&'static TimeSlot> {
    TIME_SLOTS.iter().find(|s| s.period == period)
}

pub fn teaching_periods() -> impl Iterator<Item = u8> {
    TIME_SLOTS.iter().filter(|s| !s.is_break).map(|s| s.period)
}

/// A (day, teaching period) coordinate. Break slots cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    day: Day,
    period: u8,
}

impl SlotKey {
    pub fn new(day: Day, period: i64) -> Result<SlotKey, TimetableError> {
        let slot = u8::try_from(period)
            .ok()
            .and_then(time_slot)
            .ok_or(TimetableError::UnknownPeriod(period))?;
        if slot.is_break {
            return Err(TimetableError::BreakPeriod(slot.period));
        }
        Ok(SlotKey {
            day,
            period: slot.period,
        })
    }

    pub fn day(&self) -> Day {
        self.day
    }

    pub fn period(&self) -> u8 {
        self.period
    }

    /// Period documents are keyed by the string-encoded period number.
    pub fn period_key(&self) -> String {
        self.period.to_string()
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.day.key(), self.period)
    }
}

/// Ids double as document keys, so they must be usable as a single path segment.
pub fn validate_id(raw: &str, field: &'static str) -> Result<String, TimetableError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(TimetableError::Empty { field });
    }
    if id.contains('/') {
        return Err(TimetableError::Separator { field });
    }
    Ok(id.to_string())
}

pub fn validate_name(raw: &str, field: &'static str) -> Result<String, TimetableError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TimetableError::Empty { field });
    }
    Ok(name.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub subject_code: String,
    pub subject_name: String,
    pub teacher_id: Option<String>,
    pub teacher_name: String,
    pub room: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Assignment {
    pub fn is_empty(&self) -> bool {
        self.subject_code.trim().is_empty()
    }

    pub fn teacher(&self) -> Option<&str> {
        self.teacher_id.as_deref().filter(|t| !t.is_empty())
    }
}
