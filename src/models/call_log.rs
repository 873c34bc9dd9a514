//! Call log model and voice-gateway event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::CallStatus;

/// One call attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallLog {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<i64>,
    pub phone_number: String,
    pub call_status: CallStatus,
    /// Seconds
    pub call_duration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_call_id: Option<String>,
    /// Free-form event trail (`events`, `outcome`, `startedAt`, ...)
    pub conversation_data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Query parameters for listing call logs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogQuery {
    #[serde(default)]
    pub status: Option<CallStatus>,
    #[serde(default)]
    pub student_id: Option<i64>,
    #[serde(default)]
    pub campaign_id: Option<i64>,
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Request body for calling one student right away.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerCallRequest {
    pub student_id: i64,
    /// Campaign whose stored brief should be used
    #[serde(default)]
    pub campaign_id: Option<i64>,
    /// Used when no campaign brief applies
    #[serde(default)]
    pub custom_message: Option<String>,
    #[serde(default)]
    pub priority_override: Option<i32>,
}

/// Kinds of events the voice gateway reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallEventKind {
    CallStarted,
    CallConnected,
    CallCompleted,
    CallFailed,
}

impl CallEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallEventKind::CallStarted => "call_started",
            CallEventKind::CallConnected => "call_connected",
            CallEventKind::CallCompleted => "call_completed",
            CallEventKind::CallFailed => "call_failed",
        }
    }
}

/// Identifiers echoed back by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CallEventMetadata {
    #[serde(default)]
    pub student_id: Option<i64>,
    #[serde(default)]
    pub campaign_id: Option<i64>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Event-specific details.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CallEventData {
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub transcript: Option<String>,
    /// Final student status reported for a completed call, e.g. "callback_requested"
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

/// Webhook payload posted by the voice gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEvent {
    pub call_id: String,
    pub event_type: CallEventKind,
    #[serde(default)]
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: CallEventMetadata,
    #[serde(default)]
    pub data: Option<CallEventData>,
}

impl CallEvent {
    /// Status the call log and student should move to after this event.
    pub fn resulting_status(&self) -> CallStatus {
        match self.event_type {
            CallEventKind::CallStarted | CallEventKind::CallConnected => CallStatus::InProgress,
            CallEventKind::CallFailed => CallStatus::Failed,
            CallEventKind::CallCompleted => self
                .data
                .as_ref()
                .and_then(|d| d.outcome.as_deref())
                .and_then(CallStatus::parse)
                .unwrap_or(CallStatus::Completed),
        }
    }

    /// Whether this event counts as a successful call for campaign stats.
    pub fn is_success(&self) -> bool {
        self.event_type == CallEventKind::CallCompleted
            && matches!(
                self.resulting_status(),
                CallStatus::Completed | CallStatus::CallbackRequested
            )
    }
}

/// Acknowledgement returned to the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEventAck {
    pub call_id: String,
    pub event_type: CallEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_log_id: Option<i64>,
}

/// Outcome of a single trigger request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredCall {
    pub call_log_id: i64,
    pub student_id: i64,
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_call_id: Option<String>,
    pub call_status: CallStatus,
}
