//! Student roster model.

use serde::{Deserialize, Serialize};

use super::StudentAttributes;

/// Call state of a student or a single call attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    InProgress,
    Attempted,
    Completed,
    NoAnswer,
    Busy,
    Failed,
    CallbackRequested,
    Cancelled,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::InProgress => "in_progress",
            CallStatus::Attempted => "attempted",
            CallStatus::Completed => "completed",
            CallStatus::NoAnswer => "no_answer",
            CallStatus::Busy => "busy",
            CallStatus::Failed => "failed",
            CallStatus::CallbackRequested => "callback_requested",
            CallStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CallStatus::Pending),
            "in_progress" => Some(CallStatus::InProgress),
            "attempted" => Some(CallStatus::Attempted),
            "completed" => Some(CallStatus::Completed),
            "no_answer" => Some(CallStatus::NoAnswer),
            "busy" => Some(CallStatus::Busy),
            "failed" => Some(CallStatus::Failed),
            "callback_requested" => Some(CallStatus::CallbackRequested),
            "cancelled" => Some(CallStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the call attempt has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Pending | CallStatus::InProgress)
    }
}

/// A student record keyed by phone number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub phone_number: String,
    pub attributes: StudentAttributes,
    pub call_status: CallStatus,
    /// Calling queue priority, higher first
    pub priority: i32,
    pub call_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_call_attempt: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Student {
    pub fn student_name(&self) -> Option<String> {
        self.attributes.text("student_name")
    }

    /// Student name, or the phone number when no name is recorded.
    pub fn display_name(&self) -> String {
        self.student_name()
            .unwrap_or_else(|| format!("Student ({})", self.phone_number))
    }
}

/// Request body for creating a student.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudentRequest {
    pub phone_number: String,
    #[serde(default)]
    pub attributes: StudentAttributes,
    #[serde(default)]
    pub call_status: Option<CallStatus>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Request body for updating a student. `attributes` is merged into the existing bag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStudentRequest {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub attributes: Option<StudentAttributes>,
    #[serde(default)]
    pub call_status: Option<CallStatus>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Query parameters for listing and searching students.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentQuery {
    #[serde(default)]
    pub call_status: Option<CallStatus>,
    /// Substring matched against phone number, student name and parent name
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Normalize a phone number for storage: keep digits and a leading '+'.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '+' if i == 0 => out.push(c),
            '0'..='9' => out.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }
    let digits = out.chars().filter(char::is_ascii_digit).count();
    (7..=15).contains(&digits).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_status_round_trips_through_str() {
        for status in [
            CallStatus::Pending,
            CallStatus::InProgress,
            CallStatus::CallbackRequested,
            CallStatus::NoAnswer,
        ] {
            assert_eq!(CallStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::parse("ringing"), None);
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+91 98765-43210").as_deref(), Some("+919876543210"));
        assert_eq!(normalize_phone("(022) 2345 6789").as_deref(), Some("02223456789"));
        assert_eq!(normalize_phone("12ab34"), None);
        assert_eq!(normalize_phone("123"), None);
    }
}
