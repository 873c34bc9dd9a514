//! Call dispatch through the voice gateway.
//!
//! Activation of a campaign hands each student's stored brief to the gateway,
//! one call per student, with at most `max_concurrent_calls` initiations in
//! flight. The gateway reports progress back through call events, which update
//! the call log, the student and the campaign counters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::VoiceConfig;
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    CallEvent, CallEventAck, CallEventKind, CallLog, CallStatus, CampaignStatus, Student,
    TriggerCallRequest, TriggeredCall,
};

/// Errors from the voice gateway.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("voice gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("voice gateway error {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("invalid voice gateway response: {0}")]
    InvalidResponse(String),
}

/// One outbound call to place.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub phone_number: String,
    /// Brief handed to the voice agent unmodified
    pub context: String,
    pub priority: i32,
    pub student_id: i64,
    pub campaign_id: Option<i64>,
}

/// Gateway handle for a placed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    pub call_id: String,
}

/// Something that can place outbound voice calls.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn place_call(&self, request: CallRequest) -> Result<CallHandle, DispatchError>;
}

#[derive(Debug, Serialize)]
struct InitiateCallBody<'a> {
    phone_number: &'a str,
    script_id: &'a str,
    context: &'a str,
    webhook_url: &'a str,
    priority: i32,
    metadata: InitiateCallMetadata,
}

#[derive(Debug, Serialize)]
struct InitiateCallMetadata {
    student_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    campaign_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InitiateCallResponse {
    call_id: Option<String>,
}

/// HTTP client for the voice gateway's call-initiation endpoint.
pub struct HttpVoiceGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    script_id: String,
    webhook_url: String,
}

impl HttpVoiceGateway {
    pub fn new(config: &VoiceConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            script_id: config.script_id.clone(),
            webhook_url: config.webhook_url.clone(),
        })
    }
}

#[async_trait]
impl VoiceGateway for HttpVoiceGateway {
    async fn place_call(&self, request: CallRequest) -> Result<CallHandle, DispatchError> {
        let url = format!("{}/api/voice/initiate-call", self.base_url);
        let body = InitiateCallBody {
            phone_number: &request.phone_number,
            script_id: &self.script_id,
            context: &request.context,
            webhook_url: &self.webhook_url,
            priority: request.priority,
            metadata: InitiateCallMetadata {
                student_id: request.student_id,
                campaign_id: request.campaign_id,
            },
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DispatchError::Gateway {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: InitiateCallResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?;

        match parsed.call_id {
            Some(call_id) if !call_id.is_empty() => Ok(CallHandle { call_id }),
            _ => Err(DispatchError::InvalidResponse(
                "response has no call_id".to_string(),
            )),
        }
    }
}

/// Counts from one campaign dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub placed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Places calls and applies gateway events.
pub struct CallDispatcher {
    gateway: Arc<dyn VoiceGateway>,
    repo: Arc<Repository>,
    permits: Arc<Semaphore>,
}

impl CallDispatcher {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        repo: Arc<Repository>,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            gateway,
            repo,
            permits: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
        }
    }

    /// Run [`Self::dispatch_campaign`] in the background.
    pub fn spawn_campaign(self: &Arc<Self>, campaign_id: i64) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            match dispatcher.dispatch_campaign(campaign_id).await {
                Ok(summary) => tracing::info!(
                    campaign_id,
                    placed = summary.placed,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Campaign dispatch finished"
                ),
                Err(e) => tracing::error!(campaign_id, "Campaign dispatch stopped: {}", e),
            }
        })
    }

    /// Call every student of an active campaign in campaign order.
    ///
    /// Stops early when the campaign leaves `active` (e.g. it was paused).
    pub async fn dispatch_campaign(
        self: Arc<Self>,
        campaign_id: i64,
    ) -> Result<DispatchSummary, AppError> {
        let campaign = self
            .repo
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))?;

        let mut summary = DispatchSummary::default();
        let mut calls = JoinSet::new();

        for student_id in &campaign.student_ids {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(format!("Call semaphore closed: {}", e)))?;

            // Re-read so a pause takes effect between calls
            let current = self.repo.get_campaign(campaign_id).await?;
            let Some(current) = current.filter(|c| c.status == CampaignStatus::Active) else {
                tracing::info!(campaign_id, "Campaign no longer active, stopping dispatch");
                break;
            };

            let Some(brief) = current.context_for(*student_id).map(|c| c.context.clone()) else {
                tracing::warn!(campaign_id, student_id, "No calling brief, skipping student");
                summary.skipped += 1;
                continue;
            };

            let Some(student) = self.repo.get_student(*student_id).await? else {
                tracing::warn!(campaign_id, student_id, "Student no longer exists, skipping");
                summary.skipped += 1;
                continue;
            };

            if self.repo.has_call_in_progress(student.id).await? {
                tracing::warn!(campaign_id, student_id, "Call already in progress, skipping");
                summary.skipped += 1;
                continue;
            }

            let dispatcher = Arc::clone(&self);
            calls.spawn(async move {
                let _permit = permit;
                let priority = student.priority;
                dispatcher
                    .place(&student, Some(campaign_id), brief, priority)
                    .await
            });
        }

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok(Ok(call)) if call.call_status == CallStatus::InProgress => summary.placed += 1,
                Ok(Ok(_)) => summary.failed += 1,
                Ok(Err(e)) => {
                    tracing::error!(campaign_id, "Failed to record call: {}", e);
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::error!(campaign_id, "Call task panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Call one student right away.
    pub async fn trigger_single(
        &self,
        request: &TriggerCallRequest,
    ) -> Result<TriggeredCall, AppError> {
        let student = self
            .repo
            .get_student(request.student_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Student {} not found", request.student_id))
            })?;

        if self.repo.has_call_in_progress(student.id).await? {
            return Err(AppError::Duplicate(format!(
                "Student {} already has a call in progress",
                student.id
            )));
        }

        let campaign_brief = match request.campaign_id {
            Some(campaign_id) => {
                let campaign = self.repo.get_campaign(campaign_id).await?.ok_or_else(|| {
                    AppError::NotFound(format!("Campaign {} not found", campaign_id))
                })?;
                campaign.context_for(student.id).map(|c| c.context.clone())
            }
            None => None,
        };

        let brief = campaign_brief
            .or_else(|| request.custom_message.clone())
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation(
                    "No calling brief for this student: give a campaign with a brief or a customMessage"
                        .to_string(),
                )
            })?;

        let priority = request.priority_override.unwrap_or(student.priority);
        let triggered = self
            .place(&student, request.campaign_id, brief, priority)
            .await?;
        if triggered.call_status == CallStatus::Failed {
            return Err(AppError::Upstream(format!(
                "Voice gateway could not place the call for student {}",
                student.id
            )));
        }
        Ok(triggered)
    }

    /// Create the call log, hand the brief to the gateway and record the result.
    ///
    /// Gateway failures are recorded on the log and student, not returned.
    async fn place(
        &self,
        student: &Student,
        campaign_id: Option<i64>,
        brief: String,
        priority: i32,
    ) -> Result<TriggeredCall, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut log = self
            .repo
            .create_call_log(
                Some(student.id),
                campaign_id,
                &student.phone_number,
                CallStatus::InProgress,
                None,
            )
            .await?;
        log.conversation_data
            .insert("initiated_at".to_string(), Value::String(now.clone()));
        self.repo
            .record_call_attempt(student.id, CallStatus::InProgress, &now)
            .await?;
        if let Some(id) = campaign_id {
            self.repo.add_campaign_call_stats(id, 1, 0, 0).await?;
        }

        let request = CallRequest {
            phone_number: student.phone_number.clone(),
            context: brief,
            priority,
            student_id: student.id,
            campaign_id,
        };

        match self.gateway.place_call(request).await {
            Ok(handle) => {
                tracing::info!(
                    student_id = student.id,
                    call_id = %handle.call_id,
                    "Call placed"
                );
                log.external_call_id = Some(handle.call_id);
            }
            Err(e) => {
                tracing::error!(student_id = student.id, "Failed to place call: {}", e);
                log.call_status = CallStatus::Failed;
                log.conversation_data
                    .insert("outcome".to_string(), Value::String("failed".to_string()));
                log.conversation_data
                    .insert("failure_reason".to_string(), Value::String(e.to_string()));
                self.repo
                    .set_student_call_status(student.id, CallStatus::Failed)
                    .await?;
                if let Some(id) = campaign_id {
                    self.repo.add_campaign_call_stats(id, 0, 0, 1).await?;
                }
            }
        }

        let log = self.repo.save_call_log(&log).await?;
        Ok(TriggeredCall {
            call_log_id: log.id,
            student_id: student.id,
            phone_number: log.phone_number,
            external_call_id: log.external_call_id,
            call_status: log.call_status,
        })
    }

    /// Apply a gateway event to the call log, student and campaign.
    pub async fn handle_event(&self, event: &CallEvent) -> Result<CallEventAck, AppError> {
        tracing::info!(
            call_id = %event.call_id,
            event_type = event.event_type.as_str(),
            "Call event received"
        );

        let ack = |call_log_id| CallEventAck {
            call_id: event.call_id.clone(),
            event_type: event.event_type,
            call_log_id,
        };

        let (mut log, known_call) = match self
            .repo
            .get_call_log_by_external_id(&event.call_id)
            .await?
        {
            Some(log) => (log, true),
            None => match self.log_from_metadata(event).await? {
                Some(log) => (log, false),
                None => {
                    tracing::warn!(
                        call_id = %event.call_id,
                        "Call event matches no call log and carries no student, ignoring"
                    );
                    return Ok(ack(None));
                }
            },
        };

        // A finished call keeps its outcome; late events only join the trail
        if log.call_status.is_terminal() {
            push_event(&mut log, event);
            let log = self.repo.save_call_log(&log).await?;
            tracing::info!(
                call_id = %event.call_id,
                call_status = log.call_status.as_str(),
                "Event for a finished call recorded without state change"
            );
            return Ok(ack(Some(log.id)));
        }

        let status = event.resulting_status();
        apply_event(&mut log, event, status);
        let log = self.repo.save_call_log(&log).await?;

        let timestamp = event.timestamp.to_rfc3339();
        if let Some(student_id) = log.student_id {
            if self.repo.get_student(student_id).await?.is_some() {
                if known_call {
                    self.repo
                        .record_call_outcome(student_id, status, &timestamp)
                        .await?;
                } else {
                    self.repo
                        .record_call_attempt(student_id, status, &timestamp)
                        .await?;
                }
            } else {
                tracing::warn!(student_id, "Student for call event not found");
            }
        }

        if let Some(campaign_id) = log.campaign_id {
            let called = i64::from(!known_call);
            let finished = status.is_terminal();
            let successful = i64::from(finished && event.is_success());
            let failed = i64::from(finished && !event.is_success());
            if called + successful + failed > 0 {
                self.repo
                    .add_campaign_call_stats(campaign_id, called, successful, failed)
                    .await?;
            }
        }

        Ok(ack(Some(log.id)))
    }

    /// Build a call log for an event the dispatcher did not place.
    async fn log_from_metadata(&self, event: &CallEvent) -> Result<Option<CallLog>, AppError> {
        let meta = &event.metadata;
        let student_phone = match meta.student_id {
            Some(id) => self.repo.get_student(id).await?.map(|s| s.phone_number),
            None => None,
        };
        let Some(phone) = meta.phone_number.clone().or(student_phone) else {
            return Ok(None);
        };

        let log = self
            .repo
            .create_call_log(
                meta.student_id,
                meta.campaign_id,
                &phone,
                CallStatus::InProgress,
                Some(&event.call_id),
            )
            .await?;
        Ok(Some(log))
    }
}

/// Append an event to the call log's `conversation_data.events` trail.
fn push_event(log: &mut CallLog, event: &CallEvent) {
    let entry = json!({
        "event_type": event.event_type.as_str(),
        "status": event.status,
        "timestamp": event.timestamp.to_rfc3339(),
        "data": event.data,
    });
    let data = &mut log.conversation_data;
    match data.get_mut("events") {
        Some(Value::Array(events)) => events.push(entry),
        _ => {
            data.insert("events".to_string(), Value::Array(vec![entry]));
        }
    }
}

/// Record an event on a call log: event trail, status and outcome details.
fn apply_event(log: &mut CallLog, event: &CallEvent, status: CallStatus) {
    push_event(log, event);

    let timestamp = event.timestamp.to_rfc3339();
    let data = &mut log.conversation_data;

    match event.event_type {
        CallEventKind::CallStarted => {}
        CallEventKind::CallConnected => {
            data.insert("started_at".to_string(), Value::String(timestamp));
        }
        CallEventKind::CallCompleted => {
            data.insert("ended_at".to_string(), Value::String(timestamp));
            data.insert(
                "outcome".to_string(),
                Value::String(status.as_str().to_string()),
            );
            if let Some(details) = &event.data {
                if let Some(duration) = details.duration {
                    log.call_duration = duration.max(0);
                }
                if let Some(transcript) = details.transcript.as_ref().filter(|t| !t.is_empty()) {
                    log.ai_summary = Some(transcript.clone());
                }
            }
        }
        CallEventKind::CallFailed => {
            data.insert("ended_at".to_string(), Value::String(timestamp));
            data.insert("outcome".to_string(), Value::String("failed".to_string()));
            let reason = event
                .data
                .as_ref()
                .and_then(|d| d.error_reason.clone())
                .unwrap_or_else(|| "Unknown error".to_string());
            data.insert("failure_reason".to_string(), Value::String(reason));
        }
    }

    log.call_status = status;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::{
        ContextSource, CreateCampaignRequest, CreateStudentRequest, PersonalizedContext,
        PersonalizedContexts, StudentAttributes,
    };
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records every request; fails for the listed phone numbers.
    #[derive(Default)]
    struct RecordingGateway {
        requests: Mutex<Vec<CallRequest>>,
        fail_for: HashSet<String>,
    }

    #[async_trait]
    impl VoiceGateway for RecordingGateway {
        async fn place_call(&self, request: CallRequest) -> Result<CallHandle, DispatchError> {
            let fail = self.fail_for.contains(&request.phone_number);
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            if fail {
                return Err(DispatchError::Gateway {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(CallHandle {
                call_id: format!("avr-{}", requests.len()),
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        repo: Arc<Repository>,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        Fixture {
            _dir: dir,
            repo: Arc::new(Repository::new(pool)),
        }
    }

    async fn add_student(repo: &Repository, phone: &str, name: &str) -> Student {
        let mut attributes = StudentAttributes::new();
        attributes.insert("student_name", json!(name));
        repo.create_student(
            phone,
            &CreateStudentRequest {
                phone_number: phone.to_string(),
                attributes,
                call_status: None,
                priority: None,
            },
        )
        .await
        .unwrap()
    }

    /// Active campaign with a brief for every student except `without_brief`.
    async fn active_campaign(repo: &Repository, students: &[&Student], without_brief: &[i64]) -> i64 {
        let campaign = repo
            .create_campaign(&CreateCampaignRequest {
                name: "June results".to_string(),
                description: None,
                context_note_ids: vec![1],
                student_ids: students.iter().map(|s| s.id).collect(),
                call_from_time: "10:00".to_string(),
                call_to_time: "18:00".to_string(),
                campaign_start_date: None,
                campaign_end_date: None,
                created_by: None,
            })
            .await
            .unwrap();

        let contexts: PersonalizedContexts = students
            .iter()
            .filter(|s| !without_brief.contains(&s.id))
            .map(|s| {
                (
                    s.id.to_string(),
                    PersonalizedContext {
                        student_name: s.display_name(),
                        phone_number: s.phone_number.clone(),
                        context: format!("Brief for {}", s.display_name()),
                        source: ContextSource::Fallback,
                    },
                )
            })
            .collect();
        repo.set_personalized_contexts(campaign.id, &contexts)
            .await
            .unwrap();
        repo.transition_campaign(campaign.id, CampaignStatus::Draft, CampaignStatus::Active)
            .await
            .unwrap();
        campaign.id
    }

    fn event(value: Value) -> CallEvent {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_http_gateway_posts_brief_and_reads_call_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/voice/initiate-call"))
            .and(body_partial_json(json!({
                "phone_number": "+919800000001",
                "script_id": "scholarship_notification",
                "context": "Brief for Asha",
                "webhook_url": "http://localhost:8000/api/webhooks/call-events",
                "priority": 2,
                "metadata": { "student_id": 1, "campaign_id": 7 }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "call_id": "avr-123", "status": "initiated" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpVoiceGateway::new(&VoiceConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let handle = gateway
            .place_call(CallRequest {
                phone_number: "+919800000001".to_string(),
                context: "Brief for Asha".to_string(),
                priority: 2,
                student_id: 1,
                campaign_id: Some(7),
            })
            .await
            .unwrap();
        assert_eq!(handle.call_id, "avr-123");
    }

    #[tokio::test]
    async fn test_http_gateway_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/voice/initiate-call"))
            .respond_with(ResponseTemplate::new(500).set_body_string("no trunks"))
            .mount(&server)
            .await;

        let gateway = HttpVoiceGateway::new(&VoiceConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        let result = gateway
            .place_call(CallRequest {
                phone_number: "+1".to_string(),
                context: "x".to_string(),
                priority: 1,
                student_id: 1,
                campaign_id: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::Gateway { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_hands_stored_briefs_in_campaign_order() {
        let fx = fixture().await;
        let asha = add_student(&fx.repo, "+919800000001", "Asha").await;
        let ravi = add_student(&fx.repo, "+919800000002", "Ravi").await;
        let meera = add_student(&fx.repo, "+919800000003", "Meera").await;
        let campaign_id = active_campaign(&fx.repo, &[&asha, &ravi, &meera], &[meera.id]).await;

        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = Arc::new(CallDispatcher::new(gateway.clone(), fx.repo.clone(), 1));

        let summary = dispatcher.dispatch_campaign(campaign_id).await.unwrap();
        assert_eq!(
            summary,
            DispatchSummary {
                placed: 2,
                failed: 0,
                skipped: 1
            }
        );

        let requests = gateway.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].context, "Brief for Asha");
        assert_eq!(requests[0].campaign_id, Some(campaign_id));
        assert_eq!(requests[1].phone_number, "+919800000002");

        let asha = fx.repo.get_student(asha.id).await.unwrap().unwrap();
        assert_eq!(asha.call_status, CallStatus::InProgress);
        assert_eq!(asha.call_count, 1);
        assert!(asha.last_call_attempt.is_some());

        let campaign = fx.repo.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.students_called, 2);
        assert_eq!(campaign.failed_calls, 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_marks_log_and_student_failed() {
        let fx = fixture().await;
        let asha = add_student(&fx.repo, "+919800000001", "Asha").await;
        let ravi = add_student(&fx.repo, "+919800000002", "Ravi").await;
        let campaign_id = active_campaign(&fx.repo, &[&asha, &ravi], &[]).await;

        let gateway = Arc::new(RecordingGateway {
            fail_for: HashSet::from(["+919800000002".to_string()]),
            ..Default::default()
        });
        let dispatcher = Arc::new(CallDispatcher::new(gateway, fx.repo.clone(), 5));

        let summary = dispatcher.dispatch_campaign(campaign_id).await.unwrap();
        assert_eq!(summary.placed, 1);
        assert_eq!(summary.failed, 1);

        let ravi = fx.repo.get_student(ravi.id).await.unwrap().unwrap();
        assert_eq!(ravi.call_status, CallStatus::Failed);

        let logs = fx
            .repo
            .list_call_logs(&crate::models::CallLogQuery {
                student_id: Some(ravi.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].call_status, CallStatus::Failed);
        assert!(logs[0].external_call_id.is_none());

        let campaign = fx.repo.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.students_called, 2);
        assert_eq!(campaign.failed_calls, 1);
    }

    #[tokio::test]
    async fn test_paused_campaign_places_no_calls() {
        let fx = fixture().await;
        let asha = add_student(&fx.repo, "+919800000001", "Asha").await;
        let campaign_id = active_campaign(&fx.repo, &[&asha], &[]).await;
        fx.repo
            .transition_campaign(campaign_id, CampaignStatus::Active, CampaignStatus::Paused)
            .await
            .unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = Arc::new(CallDispatcher::new(gateway.clone(), fx.repo.clone(), 5));
        let summary = dispatcher.dispatch_campaign(campaign_id).await.unwrap();

        assert_eq!(summary, DispatchSummary::default());
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_rejects_student_already_in_progress() {
        let fx = fixture().await;
        let asha = add_student(&fx.repo, "+919800000001", "Asha").await;
        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = CallDispatcher::new(gateway.clone(), fx.repo.clone(), 5);

        let request = TriggerCallRequest {
            student_id: asha.id,
            campaign_id: None,
            custom_message: Some("Congratulations call".to_string()),
            priority_override: Some(9),
        };
        let first = dispatcher.trigger_single(&request).await.unwrap();
        assert_eq!(first.call_status, CallStatus::InProgress);
        assert_eq!(first.external_call_id.as_deref(), Some("avr-1"));
        assert_eq!(gateway.requests.lock().unwrap()[0].priority, 9);

        let second = dispatcher.trigger_single(&request).await;
        assert!(matches!(second, Err(AppError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_trigger_without_brief_is_rejected() {
        let fx = fixture().await;
        let asha = add_student(&fx.repo, "+919800000001", "Asha").await;
        let dispatcher =
            CallDispatcher::new(Arc::new(RecordingGateway::default()), fx.repo.clone(), 5);

        let result = dispatcher
            .trigger_single(&TriggerCallRequest {
                student_id: asha.id,
                campaign_id: None,
                custom_message: None,
                priority_override: None,
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_completed_event_updates_log_student_and_campaign() {
        let fx = fixture().await;
        let asha = add_student(&fx.repo, "+919800000001", "Asha").await;
        let campaign_id = active_campaign(&fx.repo, &[&asha], &[]).await;
        let dispatcher = Arc::new(CallDispatcher::new(
            Arc::new(RecordingGateway::default()),
            fx.repo.clone(),
            5,
        ));
        Arc::clone(&dispatcher)
            .dispatch_campaign(campaign_id)
            .await
            .unwrap();

        let completed = event(json!({
            "call_id": "avr-1",
            "event_type": "call_completed",
            "status": "completed",
            "timestamp": "2025-06-01T10:15:00Z",
            "metadata": { "student_id": asha.id, "campaign_id": campaign_id },
            "data": { "duration": 95, "transcript": "Parent thanked us", "outcome": "callback_requested" }
        }));
        let ack = dispatcher.handle_event(&completed).await.unwrap();
        let log = fx
            .repo
            .get_call_log(ack.call_log_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.call_status, CallStatus::CallbackRequested);
        assert_eq!(log.call_duration, 95);
        assert_eq!(log.ai_summary.as_deref(), Some("Parent thanked us"));
        assert_eq!(log.conversation_data["outcome"], "callback_requested");
        assert_eq!(log.conversation_data["events"].as_array().unwrap().len(), 1);

        let student = fx.repo.get_student(asha.id).await.unwrap().unwrap();
        assert_eq!(student.call_status, CallStatus::CallbackRequested);
        assert_eq!(student.call_count, 1);

        // A repeated terminal event must not count twice
        dispatcher.handle_event(&completed).await.unwrap();

        let campaign = fx.repo.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.successful_calls, 1);
        assert_eq!(campaign.failed_calls, 0);
        assert_eq!(campaign.status, CampaignStatus::Active);
    }

    #[tokio::test]
    async fn test_late_event_does_not_reopen_finished_call() {
        let fx = fixture().await;
        let asha = add_student(&fx.repo, "+919800000001", "Asha").await;
        let campaign_id = active_campaign(&fx.repo, &[&asha], &[]).await;
        let dispatcher = Arc::new(CallDispatcher::new(
            Arc::new(RecordingGateway::default()),
            fx.repo.clone(),
            5,
        ));
        Arc::clone(&dispatcher)
            .dispatch_campaign(campaign_id)
            .await
            .unwrap();

        let completed = event(json!({
            "call_id": "avr-1",
            "event_type": "call_completed",
            "status": "completed",
            "timestamp": "2025-06-01T10:15:00Z",
            "data": { "duration": 60 }
        }));
        let connected = event(json!({
            "call_id": "avr-1",
            "event_type": "call_connected",
            "status": "in_progress",
            "timestamp": "2025-06-01T10:16:00Z"
        }));
        dispatcher.handle_event(&completed).await.unwrap();
        let ack = dispatcher.handle_event(&connected).await.unwrap();
        dispatcher.handle_event(&completed).await.unwrap();

        let log = fx
            .repo
            .get_call_log(ack.call_log_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.call_status, CallStatus::Completed);
        assert_eq!(log.call_duration, 60);
        assert_eq!(log.conversation_data["events"].as_array().unwrap().len(), 3);
        assert!(log.conversation_data.get("started_at").is_none());

        let student = fx.repo.get_student(asha.id).await.unwrap().unwrap();
        assert_eq!(student.call_status, CallStatus::Completed);
        assert_eq!(student.call_count, 1);
        assert!(!fx.repo.has_call_in_progress(asha.id).await.unwrap());

        let campaign = fx.repo.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.students_called, 1);
        assert_eq!(campaign.successful_calls, 1);
    }

    #[tokio::test]
    async fn test_event_for_unknown_call_creates_log_from_metadata() {
        let fx = fixture().await;
        let ravi = add_student(&fx.repo, "+919800000002", "Ravi").await;
        let dispatcher =
            CallDispatcher::new(Arc::new(RecordingGateway::default()), fx.repo.clone(), 5);

        let failed = event(json!({
            "call_id": "external-9",
            "event_type": "call_failed",
            "status": "failed",
            "timestamp": "2025-06-01T11:00:00Z",
            "metadata": { "student_id": ravi.id },
            "data": { "error_reason": "Number unreachable" }
        }));
        let ack = dispatcher.handle_event(&failed).await.unwrap();

        let log = fx
            .repo
            .get_call_log_by_external_id("external-9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(log.id), ack.call_log_id);
        assert_eq!(log.phone_number, "+919800000002");
        assert_eq!(log.call_status, CallStatus::Failed);
        assert_eq!(log.conversation_data["failure_reason"], "Number unreachable");

        let ravi = fx.repo.get_student(ravi.id).await.unwrap().unwrap();
        assert_eq!(ravi.call_status, CallStatus::Failed);
        assert_eq!(ravi.call_count, 1);
        assert_eq!(ravi.last_call_attempt.as_deref(), Some("2025-06-01T11:00:00+00:00"));
    }

    #[tokio::test]
    async fn test_event_without_log_or_metadata_is_ignored() {
        let fx = fixture().await;
        let dispatcher =
            CallDispatcher::new(Arc::new(RecordingGateway::default()), fx.repo.clone(), 5);
        let ack = dispatcher
            .handle_event(&event(json!({
                "call_id": "stray",
                "event_type": "call_started",
                "timestamp": "2025-06-01T11:00:00Z"
            })))
            .await
            .unwrap();
        assert!(ack.call_log_id.is_none());
    }
}
