//! Campaign model and the per-student calling briefs it owns.

use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "active" => Some(CampaignStatus::Active),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "cancelled" => Some(CampaignStatus::Cancelled),
            _ => None,
        }
    }
}

/// Which generation path produced a brief.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    Ai,
    Fallback,
}

/// The calling brief stored for one student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedContext {
    pub student_name: String,
    pub phone_number: String,
    pub context: String,
    pub source: ContextSource,
}

/// Briefs keyed by the student id rendered as a string.
pub type PersonalizedContexts = BTreeMap<String, PersonalizedContext>;

/// A calling campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub context_note_ids: Vec<i64>,
    pub student_ids: Vec<i64>,
    pub call_from_time: String,
    pub call_to_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_end_date: Option<String>,
    pub status: CampaignStatus,
    pub total_students: i64,
    pub students_called: i64,
    pub successful_calls: i64,
    pub failed_calls: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personalized_contexts: Option<PersonalizedContexts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    pub version: i64,
}

impl Campaign {
    /// Percentage of students that have been called.
    pub fn completion_rate(&self) -> f64 {
        if self.total_students == 0 {
            return 0.0;
        }
        self.students_called as f64 / self.total_students as f64 * 100.0
    }

    /// Percentage of placed calls that completed successfully.
    pub fn success_rate(&self) -> f64 {
        if self.students_called == 0 {
            return 0.0;
        }
        self.successful_calls as f64 / self.students_called as f64 * 100.0
    }

    pub fn context_for(&self, student_id: i64) -> Option<&PersonalizedContext> {
        self.personalized_contexts
            .as_ref()?
            .get(&student_id.to_string())
    }
}

/// Campaign plus derived rates, as returned by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignResponse {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub completion_rate: f64,
    pub success_rate: f64,
}

impl From<Campaign> for CampaignResponse {
    fn from(campaign: Campaign) -> Self {
        Self {
            completion_rate: campaign.completion_rate(),
            success_rate: campaign.success_rate(),
            campaign,
        }
    }
}

/// Request body for creating a campaign.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub context_note_ids: Vec<i64>,
    pub student_ids: Vec<i64>,
    #[serde(default = "default_from_time")]
    pub call_from_time: String,
    #[serde(default = "default_to_time")]
    pub call_to_time: String,
    #[serde(default)]
    pub campaign_start_date: Option<String>,
    #[serde(default)]
    pub campaign_end_date: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_from_time() -> String {
    "10:00".to_string()
}

fn default_to_time() -> String {
    "18:00".to_string()
}

/// Request body for updating a campaign. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCampaignRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context_note_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub student_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub call_from_time: Option<String>,
    #[serde(default)]
    pub call_to_time: Option<String>,
    #[serde(default)]
    pub campaign_start_date: Option<String>,
    #[serde(default)]
    pub campaign_end_date: Option<String>,
    #[serde(default)]
    pub status: Option<CampaignStatus>,
    /// Expected version for optimistic concurrency (optional)
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for overwriting one student's brief.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStudentContextRequest {
    pub context: String,
}

/// Request body for a single-student preview.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewContextRequest {
    pub student_id: i64,
    pub context_note_ids: Vec<i64>,
}

/// Query parameters for listing campaigns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignQuery {
    #[serde(default)]
    pub status: Option<CampaignStatus>,
}

/// One student's brief as shown in the contexts view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentContextView {
    pub student_id: i64,
    pub student_name: String,
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ContextSource>,
}

/// All briefs of a campaign, ordered like the campaign's student list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignContextsView {
    pub campaign_id: i64,
    pub campaign_name: String,
    pub students: Vec<StudentContextView>,
}

/// Result of a single-student preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPreview {
    pub student_id: i64,
    #[serde(flatten)]
    pub entry: PersonalizedContext,
}

/// Parse an `HH:MM` calling-window bound.
pub fn parse_call_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Validate a calling window, returning a message on failure.
pub fn validate_call_window(from: &str, to: &str) -> Result<(), String> {
    let start = parse_call_time(from)
        .ok_or_else(|| format!("Invalid callFromTime '{}', expected HH:MM", from))?;
    let end = parse_call_time(to)
        .ok_or_else(|| format!("Invalid callToTime '{}', expected HH:MM", to))?;
    if start >= end {
        return Err("callFromTime must be before callToTime".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign() -> Campaign {
        Campaign {
            id: 1,
            name: "Scholarship round 1".to_string(),
            description: None,
            context_note_ids: vec![1],
            student_ids: vec![1, 2, 3, 4],
            call_from_time: "10:00".to_string(),
            call_to_time: "18:00".to_string(),
            campaign_start_date: None,
            campaign_end_date: None,
            status: CampaignStatus::Draft,
            total_students: 4,
            students_called: 2,
            successful_calls: 1,
            failed_calls: 1,
            personalized_contexts: None,
            created_by: None,
            created_at: String::new(),
            updated_at: String::new(),
            version: 1,
        }
    }

    #[test]
    fn test_rates() {
        let c = campaign();
        assert!((c.completion_rate() - 50.0).abs() < f64::EPSILON);
        assert!((c.success_rate() - 50.0).abs() < f64::EPSILON);

        let mut empty = campaign();
        empty.total_students = 0;
        empty.students_called = 0;
        assert_eq!(empty.completion_rate(), 0.0);
        assert_eq!(empty.success_rate(), 0.0);
    }

    #[test]
    fn test_call_window() {
        assert!(validate_call_window("10:00", "18:00").is_ok());
        assert!(validate_call_window("18:00", "10:00").is_err());
        assert!(validate_call_window("10:00", "10:00").is_err());
        assert!(validate_call_window("25:00", "18:00").is_err());
        assert!(validate_call_window("10am", "18:00").is_err());
    }

    #[test]
    fn test_source_serializes_lowercase() {
        let entry = PersonalizedContext {
            student_name: "Asha".to_string(),
            phone_number: "+919800000001".to_string(),
            context: "brief".to_string(),
            source: ContextSource::Fallback,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["source"], "fallback");
        assert_eq!(json["studentName"], "Asha");
    }

    #[test]
    fn test_response_flattens_campaign() {
        let json = serde_json::to_value(CampaignResponse::from(campaign())).unwrap();
        assert_eq!(json["name"], "Scholarship round 1");
        assert_eq!(json["completionRate"], 50.0);
        assert!(json.get("personalizedContexts").is_none());
    }
}
