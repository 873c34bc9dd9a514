//! Database repository for CRUD operations.
//!
//! Uses prepared statements and conditional updates for data integrity.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    AnalyticsSummary, CallLog, CallLogQuery, CallStatus, Campaign, CampaignStatus, CategoryCount,
    ContextNote, ContextNoteQuery, CreateCampaignRequest, CreateContextNoteRequest,
    CreateFieldRequest, CreateStudentRequest, FieldConfiguration, FieldOrder, FieldType,
    PersonalizedContexts,
    Student, StudentAttributes, StudentQuery, UpdateCampaignRequest, UpdateContextNoteRequest,
    UpdateFieldRequest, UpdateStudentRequest,
};

const NOTE_COLUMNS: &str =
    "id, topic, information, priority, tags, is_active, created_at, updated_at";

const FIELD_COLUMNS: &str = "id, field_name, field_type, field_label, is_required, \
     is_visible_in_list, field_options, validation_rules, display_order, is_active, created_at";

const STUDENT_COLUMNS: &str = "id, phone_number, attributes, call_status, priority, call_count, \
     last_call_attempt, created_at, updated_at";

const CAMPAIGN_COLUMNS: &str = "id, name, description, context_note_ids, student_ids, \
     call_from_time, call_to_time, campaign_start_date, campaign_end_date, status, \
     total_students, students_called, successful_calls, failed_calls, personalized_contexts, \
     created_by, created_at, updated_at, version";

const CALL_LOG_COLUMNS: &str = "id, student_id, campaign_id, phone_number, call_status, \
     call_duration, external_call_id, conversation_data, ai_summary, created_at, updated_at";

const DEFAULT_PAGE_LIMIT: i64 = 100;
const MAX_PAGE_LIMIT: i64 = 1000;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== CONTEXT NOTE OPERATIONS ====================

    /// List context notes, highest priority first.
    pub async fn list_context_notes(
        &self,
        query: &ContextNoteQuery,
    ) -> Result<Vec<ContextNote>, AppError> {
        let sql = if query.active_only.unwrap_or(false) {
            format!(
                "SELECT {} FROM context_notes WHERE is_active = 1 ORDER BY priority DESC, topic",
                NOTE_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM context_notes ORDER BY priority DESC, topic",
                NOTE_COLUMNS
            )
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let notes = rows.iter().map(note_from_row);

        // Category lives in the JSON tag list, so it is filtered here
        Ok(match query.category.as_deref() {
            Some(category) => notes.filter(|n| n.category() == category).collect(),
            None => notes.collect(),
        })
    }

    /// Get a context note by ID.
    pub async fn get_context_note(&self, id: i64) -> Result<Option<ContextNote>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM context_notes WHERE id = ?",
            NOTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(note_from_row))
    }

    /// Resolve note IDs in the given order, once each, skipping IDs that no longer exist.
    pub async fn get_context_notes_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<ContextNote>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM context_notes WHERE id IN (",
            NOTE_COLUMNS
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let by_id: HashMap<i64, ContextNote> = rows
            .iter()
            .map(note_from_row)
            .map(|n| (n.id, n))
            .collect();
        Ok(dedup_ids(ids)
            .into_iter()
            .filter_map(|id| by_id.get(&id).cloned())
            .collect())
    }

    /// Create a new context note.
    pub async fn create_context_note(
        &self,
        request: &CreateContextNoteRequest,
    ) -> Result<ContextNote, AppError> {
        let now = Utc::now().to_rfc3339();
        let tags = clean_tags(&request.tags);
        let tags_json = serde_json::to_string(&tags)?;

        let result = sqlx::query(
            "INSERT INTO context_notes (topic, information, priority, tags, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(request.topic.trim())
        .bind(&request.information)
        .bind(request.priority)
        .bind(&tags_json)
        .bind(request.is_active as i32)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(ContextNote {
            id: result.last_insert_rowid(),
            topic: request.topic.trim().to_string(),
            information: request.information.clone(),
            priority: request.priority,
            tags,
            is_active: request.is_active,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Update a context note. Absent fields keep their current value.
    pub async fn update_context_note(
        &self,
        id: i64,
        request: &UpdateContextNoteRequest,
    ) -> Result<ContextNote, AppError> {
        let existing = self
            .get_context_note(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Context note {} not found", id)))?;

        let now = Utc::now().to_rfc3339();
        let topic = request
            .topic
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.topic)
            .to_string();
        let information = request
            .information
            .clone()
            .unwrap_or(existing.information);
        let priority = request.priority.unwrap_or(existing.priority);
        let tags = request
            .tags
            .as_ref()
            .map(|t| clean_tags(t))
            .unwrap_or(existing.tags);
        let is_active = request.is_active.unwrap_or(existing.is_active);
        let tags_json = serde_json::to_string(&tags)?;

        sqlx::query(
            "UPDATE context_notes SET topic = ?, information = ?, priority = ?, tags = ?, is_active = ?, updated_at = ? WHERE id = ?"
        )
        .bind(&topic)
        .bind(&information)
        .bind(priority)
        .bind(&tags_json)
        .bind(is_active as i32)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(ContextNote {
            id,
            topic,
            information,
            priority,
            tags,
            is_active,
            created_at: existing.created_at,
            updated_at: now,
        })
    }

    /// Soft delete: mark the note inactive.
    pub async fn deactivate_context_note(&self, id: i64) -> Result<ContextNote, AppError> {
        self.update_context_note(
            id,
            &UpdateContextNoteRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Hard delete a context note.
    pub async fn delete_context_note(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM context_notes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Context note {} not found", id)));
        }
        Ok(())
    }

    /// Count active notes per category, sorted by category name.
    pub async fn context_note_categories(&self) -> Result<Vec<CategoryCount>, AppError> {
        let notes = self
            .list_context_notes(&ContextNoteQuery {
                active_only: Some(true),
                category: None,
            })
            .await?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for note in &notes {
            *counts.entry(note.category().to_string()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect())
    }

    // ==================== FIELD CONFIGURATION OPERATIONS ====================

    /// List field configurations in display order.
    pub async fn list_fields(&self, active_only: bool) -> Result<Vec<FieldConfiguration>, AppError> {
        let filter = if active_only { "WHERE is_active = 1" } else { "" };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM field_configurations {} ORDER BY display_order, field_name",
            FIELD_COLUMNS, filter
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(field_from_row).collect())
    }

    /// Get a field configuration by ID.
    pub async fn get_field(&self, id: i64) -> Result<Option<FieldConfiguration>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM field_configurations WHERE id = ?",
            FIELD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(field_from_row))
    }

    /// Create a new field configuration.
    pub async fn create_field(
        &self,
        request: &CreateFieldRequest,
    ) -> Result<FieldConfiguration, AppError> {
        let now = Utc::now().to_rfc3339();
        let options_json = serde_json::to_string(&request.field_options)?;
        let rules_json = serde_json::to_string(&request.validation_rules)?;

        let result = sqlx::query(
            "INSERT INTO field_configurations (field_name, field_type, field_label, is_required, is_visible_in_list, field_options, validation_rules, display_order, is_active, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)"
        )
        .bind(&request.field_name)
        .bind(request.field_type.as_str())
        .bind(&request.field_label)
        .bind(request.is_required as i32)
        .bind(request.is_visible_in_list as i32)
        .bind(&options_json)
        .bind(&rules_json)
        .bind(request.display_order)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Duplicate(_) => AppError::Duplicate(format!(
                "Field '{}' already exists",
                request.field_name
            )),
            other => other,
        })?;

        Ok(FieldConfiguration {
            id: result.last_insert_rowid(),
            field_name: request.field_name.clone(),
            field_type: request.field_type,
            field_label: request.field_label.clone(),
            is_required: request.is_required,
            is_visible_in_list: request.is_visible_in_list,
            field_options: request.field_options.clone(),
            validation_rules: request.validation_rules.clone(),
            display_order: request.display_order,
            is_active: true,
            created_at: now,
        })
    }

    /// Update a field configuration. Existing student data is left untouched.
    pub async fn update_field(
        &self,
        id: i64,
        request: &UpdateFieldRequest,
    ) -> Result<FieldConfiguration, AppError> {
        let existing = self
            .get_field(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Field {} not found", id)))?;

        let updated = FieldConfiguration {
            id,
            field_name: existing.field_name,
            field_type: request.field_type.unwrap_or(existing.field_type),
            field_label: request
                .field_label
                .clone()
                .unwrap_or(existing.field_label),
            is_required: request.is_required.unwrap_or(existing.is_required),
            is_visible_in_list: request
                .is_visible_in_list
                .unwrap_or(existing.is_visible_in_list),
            field_options: request
                .field_options
                .clone()
                .unwrap_or(existing.field_options),
            validation_rules: request
                .validation_rules
                .clone()
                .unwrap_or(existing.validation_rules),
            display_order: request.display_order.unwrap_or(existing.display_order),
            is_active: request.is_active.unwrap_or(existing.is_active),
            created_at: existing.created_at,
        };

        let options_json = serde_json::to_string(&updated.field_options)?;
        let rules_json = serde_json::to_string(&updated.validation_rules)?;

        sqlx::query(
            "UPDATE field_configurations SET field_type = ?, field_label = ?, is_required = ?, is_visible_in_list = ?, field_options = ?, validation_rules = ?, display_order = ?, is_active = ? WHERE id = ?"
        )
        .bind(updated.field_type.as_str())
        .bind(&updated.field_label)
        .bind(updated.is_required as i32)
        .bind(updated.is_visible_in_list as i32)
        .bind(&options_json)
        .bind(&rules_json)
        .bind(updated.display_order)
        .bind(updated.is_active as i32)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(updated)
    }

    /// Soft delete a field configuration.
    pub async fn deactivate_field(&self, id: i64) -> Result<FieldConfiguration, AppError> {
        self.update_field(
            id,
            &UpdateFieldRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Set display orders for several fields at once. Unknown IDs are skipped.
    ///
    /// Returns how many fields were updated.
    pub async fn reorder_fields(&self, orders: &[FieldOrder]) -> Result<usize, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for order in orders {
            let result =
                sqlx::query("UPDATE field_configurations SET display_order = ? WHERE id = ?")
                    .bind(order.display_order)
                    .bind(order.field_id)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() > 0 {
                updated += 1;
            } else {
                tracing::debug!(field_id = order.field_id, "Reorder skipped unknown field");
            }
        }

        tx.commit().await?;
        Ok(updated)
    }

    // ==================== STUDENT OPERATIONS ====================

    /// List students with optional status and text filters.
    pub async fn list_students(&self, query: &StudentQuery) -> Result<Vec<Student>, AppError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM students WHERE 1 = 1",
            STUDENT_COLUMNS
        ));
        if let Some(status) = query.call_status {
            qb.push(" AND call_status = ").push_bind(status.as_str());
        }
        if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", q);
            qb.push(" AND (phone_number LIKE ")
                .push_bind(pattern.clone())
                .push(" OR json_extract(attributes, '$.student_name') LIKE ")
                .push_bind(pattern.clone())
                .push(" OR json_extract(attributes, '$.parent_name') LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        let (limit, skip) = page(query.limit, query.skip);
        qb.push(" ORDER BY priority DESC, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(student_from_row).collect())
    }

    /// Get a student by ID.
    pub async fn get_student(&self, id: i64) -> Result<Option<Student>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM students WHERE id = ?",
            STUDENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(student_from_row))
    }

    /// Resolve student IDs in the given order, once each, skipping IDs that no longer exist.
    pub async fn get_students_by_ids(&self, ids: &[i64]) -> Result<Vec<Student>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM students WHERE id IN (",
            STUDENT_COLUMNS
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let by_id: HashMap<i64, Student> = rows
            .iter()
            .map(student_from_row)
            .map(|s| (s.id, s))
            .collect();
        Ok(dedup_ids(ids)
            .into_iter()
            .filter_map(|id| by_id.get(&id).cloned())
            .collect())
    }

    /// Create a new student. The phone number must already be normalized.
    pub async fn create_student(
        &self,
        phone_number: &str,
        request: &CreateStudentRequest,
    ) -> Result<Student, AppError> {
        let now = Utc::now().to_rfc3339();
        let status = request.call_status.unwrap_or(CallStatus::Pending);
        let priority = request.priority.unwrap_or(1);
        let attributes_json = serde_json::to_string(&request.attributes)?;

        let result = sqlx::query(
            "INSERT INTO students (phone_number, attributes, call_status, priority, call_count, created_at, updated_at) VALUES (?, ?, ?, ?, 0, ?, ?)"
        )
        .bind(phone_number)
        .bind(&attributes_json)
        .bind(status.as_str())
        .bind(priority)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_phone(e, phone_number))?;

        Ok(Student {
            id: result.last_insert_rowid(),
            phone_number: phone_number.to_string(),
            attributes: request.attributes.clone(),
            call_status: status,
            priority,
            call_count: 0,
            last_call_attempt: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Write an already-merged student back.
    pub async fn save_student(&self, student: &Student) -> Result<Student, AppError> {
        let now = Utc::now().to_rfc3339();
        let attributes_json = serde_json::to_string(&student.attributes)?;

        let result = sqlx::query(
            "UPDATE students SET phone_number = ?, attributes = ?, call_status = ?, priority = ?, updated_at = ? WHERE id = ?"
        )
        .bind(&student.phone_number)
        .bind(&attributes_json)
        .bind(student.call_status.as_str())
        .bind(student.priority)
        .bind(&now)
        .bind(student.id)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_phone(e, &student.phone_number))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Student {} not found", student.id)));
        }

        Ok(Student {
            updated_at: now,
            ..student.clone()
        })
    }

    /// Merge an update request into an existing student (without saving).
    pub fn merge_student(existing: &Student, request: &UpdateStudentRequest) -> Student {
        let mut attributes: StudentAttributes = existing.attributes.clone();
        if let Some(patch) = &request.attributes {
            attributes.merge(patch);
        }
        Student {
            phone_number: request
                .phone_number
                .clone()
                .unwrap_or_else(|| existing.phone_number.clone()),
            attributes,
            call_status: request.call_status.unwrap_or(existing.call_status),
            priority: request.priority.unwrap_or(existing.priority),
            ..existing.clone()
        }
    }

    /// Delete a student.
    pub async fn delete_student(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM students WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Student {} not found", id)));
        }
        Ok(())
    }

    /// Set a student's call status without counting an attempt.
    pub async fn set_student_call_status(
        &self,
        id: i64,
        status: CallStatus,
    ) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE students SET call_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the start of a call attempt: status, attempt count and timestamp.
    pub async fn record_call_attempt(
        &self,
        id: i64,
        status: CallStatus,
        at: &str,
    ) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE students SET call_status = ?, call_count = call_count + 1, last_call_attempt = ?, updated_at = ? WHERE id = ?"
        )
        .bind(status.as_str())
        .bind(at)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the outcome of a call reported by the gateway.
    pub async fn record_call_outcome(
        &self,
        id: i64,
        status: CallStatus,
        at: &str,
    ) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE students SET call_status = ?, last_call_attempt = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== CAMPAIGN OPERATIONS ====================

    /// List campaigns, newest first.
    pub async fn list_campaigns(
        &self,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM campaigns WHERE status = ? ORDER BY created_at DESC, id DESC",
                    CAMPAIGN_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM campaigns ORDER BY created_at DESC, id DESC",
                    CAMPAIGN_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(campaign_from_row).collect())
    }

    /// Get a campaign by ID.
    pub async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM campaigns WHERE id = ?",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(campaign_from_row))
    }

    /// Create a campaign in draft status, without briefs.
    pub async fn create_campaign(
        &self,
        request: &CreateCampaignRequest,
    ) -> Result<Campaign, AppError> {
        let now = Utc::now().to_rfc3339();
        let context_note_ids = dedup_ids(&request.context_note_ids);
        let student_ids = dedup_ids(&request.student_ids);
        let total_students = student_ids.len() as i64;

        let result = sqlx::query(
            r#"INSERT INTO campaigns (
                name, description, context_note_ids, student_ids, call_from_time, call_to_time,
                campaign_start_date, campaign_end_date, status, total_students,
                students_called, successful_calls, failed_calls, personalized_contexts,
                created_by, created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?, 0, 0, 0, NULL, ?, ?, ?, 1)"#,
        )
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(serde_json::to_string(&context_note_ids)?)
        .bind(serde_json::to_string(&student_ids)?)
        .bind(request.call_from_time.trim())
        .bind(request.call_to_time.trim())
        .bind(&request.campaign_start_date)
        .bind(&request.campaign_end_date)
        .bind(total_students)
        .bind(&request.created_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Campaign {
            id: result.last_insert_rowid(),
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            context_note_ids,
            student_ids,
            call_from_time: request.call_from_time.trim().to_string(),
            call_to_time: request.call_to_time.trim().to_string(),
            campaign_start_date: request.campaign_start_date.clone(),
            campaign_end_date: request.campaign_end_date.clone(),
            status: CampaignStatus::Draft,
            total_students,
            students_called: 0,
            successful_calls: 0,
            failed_calls: 0,
            personalized_contexts: None,
            created_by: request.created_by.clone(),
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update a campaign with optimistic concurrency control.
    ///
    /// Changing `student_ids` drops briefs of students no longer in the campaign.
    pub async fn update_campaign(
        &self,
        id: i64,
        request: &UpdateCampaignRequest,
    ) -> Result<Campaign, AppError> {
        let existing = self
            .get_campaign(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, existing.version
                    ),
                    current_version: existing.version,
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        let new_version = existing.version + 1;

        let student_ids = request
            .student_ids
            .as_deref()
            .map(dedup_ids)
            .unwrap_or_else(|| existing.student_ids.clone());
        let personalized_contexts = match (&request.student_ids, existing.personalized_contexts.clone()) {
            (Some(_), Some(contexts)) => Some(prune_contexts(contexts, &student_ids)),
            (_, contexts) => contexts,
        };

        let updated = Campaign {
            id,
            name: request
                .name
                .as_deref()
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.name),
            description: request.description.clone().or(existing.description),
            context_note_ids: request
                .context_note_ids
                .as_deref()
                .map(dedup_ids)
                .unwrap_or(existing.context_note_ids),
            total_students: student_ids.len() as i64,
            student_ids,
            call_from_time: request
                .call_from_time
                .clone()
                .unwrap_or(existing.call_from_time),
            call_to_time: request
                .call_to_time
                .clone()
                .unwrap_or(existing.call_to_time),
            campaign_start_date: request
                .campaign_start_date
                .clone()
                .or(existing.campaign_start_date),
            campaign_end_date: request
                .campaign_end_date
                .clone()
                .or(existing.campaign_end_date),
            status: request.status.unwrap_or(existing.status),
            personalized_contexts,
            updated_at: now,
            version: new_version,
            ..existing
        };

        let contexts_json = updated
            .personalized_contexts
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Use conditional UPDATE with version check to prevent race conditions
        let result = sqlx::query(
            r#"UPDATE campaigns SET
                name = ?, description = ?, context_note_ids = ?, student_ids = ?,
                call_from_time = ?, call_to_time = ?, campaign_start_date = ?,
                campaign_end_date = ?, status = ?, total_students = ?,
                personalized_contexts = ?, updated_at = ?, version = ?
            WHERE id = ? AND version = ?"#,
        )
        .bind(&updated.name)
        .bind(&updated.description)
        .bind(serde_json::to_string(&updated.context_note_ids)?)
        .bind(serde_json::to_string(&updated.student_ids)?)
        .bind(&updated.call_from_time)
        .bind(&updated.call_to_time)
        .bind(&updated.campaign_start_date)
        .bind(&updated.campaign_end_date)
        .bind(updated.status.as_str())
        .bind(updated.total_students)
        .bind(&contexts_json)
        .bind(&updated.updated_at)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Race condition - version changed between read and write
            let current = self.get_campaign(id).await?;
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|c| c.version).unwrap_or(0),
            });
        }

        Ok(updated)
    }

    /// Replace the whole brief map of a campaign.
    pub async fn set_personalized_contexts(
        &self,
        id: i64,
        contexts: &PersonalizedContexts,
    ) -> Result<Campaign, AppError> {
        let now = Utc::now().to_rfc3339();
        let contexts_json = serde_json::to_string(contexts)?;

        let result = sqlx::query(
            "UPDATE campaigns SET personalized_contexts = ?, updated_at = ?, version = version + 1 WHERE id = ?",
        )
        .bind(&contexts_json)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Campaign {} not found", id)));
        }

        self.get_campaign(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", id)))
    }

    /// Overwrite one student's brief text in place.
    ///
    /// Only the `context` value of that entry changes; the rest of the row is untouched.
    pub async fn update_student_context(
        &self,
        id: i64,
        student_id: i64,
        context: &str,
    ) -> Result<Campaign, AppError> {
        let entry_path = format!("$.\"{}\"", student_id);
        let context_path = format!("$.\"{}\".context", student_id);

        let result = sqlx::query(
            r#"UPDATE campaigns
               SET personalized_contexts = json_set(personalized_contexts, ?, ?)
               WHERE id = ? AND json_type(personalized_contexts, ?) = 'object'"#,
        )
        .bind(&context_path)
        .bind(context)
        .bind(id)
        .bind(&entry_path)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_campaign(id).await? {
                None => Err(AppError::NotFound(format!("Campaign {} not found", id))),
                Some(_) => Err(AppError::NotFound(format!(
                    "No context for student {} in campaign {}",
                    student_id, id
                ))),
            };
        }

        self.get_campaign(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", id)))
    }

    /// Move a campaign from one status to another, atomically.
    pub async fn transition_campaign(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<Campaign, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE campaigns SET status = ?, updated_at = ?, version = version + 1 WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(&now)
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        let campaign = self
            .get_campaign(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", id)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Validation(format!(
                "Campaign {} is {}, expected {}",
                id,
                campaign.status.as_str(),
                from.as_str()
            )));
        }
        Ok(campaign)
    }

    /// Delete a campaign; only drafts may be deleted.
    pub async fn delete_campaign(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ? AND status = 'draft'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return match self.get_campaign(id).await? {
                None => Err(AppError::NotFound(format!("Campaign {} not found", id))),
                Some(c) => Err(AppError::Validation(format!(
                    "Only draft campaigns can be deleted (campaign {} is {})",
                    id,
                    c.status.as_str()
                ))),
            };
        }
        Ok(())
    }

    /// Adjust campaign call counters. Counters do not bump the version.
    pub async fn add_campaign_call_stats(
        &self,
        id: i64,
        called: i64,
        successful: i64,
        failed: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE campaigns SET students_called = students_called + ?, successful_calls = successful_calls + ?, failed_calls = failed_calls + ? WHERE id = ?"
        )
        .bind(called)
        .bind(successful)
        .bind(failed)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== CALL LOG OPERATIONS ====================

    /// List call logs, newest first.
    pub async fn list_call_logs(&self, query: &CallLogQuery) -> Result<Vec<CallLog>, AppError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM call_logs WHERE 1 = 1",
            CALL_LOG_COLUMNS
        ));
        if let Some(status) = query.status {
            qb.push(" AND call_status = ").push_bind(status.as_str());
        }
        if let Some(student_id) = query.student_id {
            qb.push(" AND student_id = ").push_bind(student_id);
        }
        if let Some(campaign_id) = query.campaign_id {
            qb.push(" AND campaign_id = ").push_bind(campaign_id);
        }
        let (limit, skip) = page(query.limit, query.skip);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(call_log_from_row).collect())
    }

    /// Get a call log by ID.
    pub async fn get_call_log(&self, id: i64) -> Result<Option<CallLog>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM call_logs WHERE id = ?",
            CALL_LOG_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(call_log_from_row))
    }

    /// Find the call log for a gateway call ID.
    pub async fn get_call_log_by_external_id(
        &self,
        external_call_id: &str,
    ) -> Result<Option<CallLog>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM call_logs WHERE external_call_id = ?",
            CALL_LOG_COLUMNS
        ))
        .bind(external_call_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(call_log_from_row))
    }

    /// Whether the student has a call log still in progress.
    pub async fn has_call_in_progress(&self, student_id: i64) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM call_logs WHERE student_id = ? AND call_status = 'in_progress'",
        )
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    /// Insert a new call log.
    pub async fn create_call_log(
        &self,
        student_id: Option<i64>,
        campaign_id: Option<i64>,
        phone_number: &str,
        status: CallStatus,
        external_call_id: Option<&str>,
    ) -> Result<CallLog, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut conversation_data = Map::new();
        conversation_data.insert("events".to_string(), Value::Array(Vec::new()));
        let data_json = serde_json::to_string(&conversation_data)?;

        let result = sqlx::query(
            "INSERT INTO call_logs (student_id, campaign_id, phone_number, call_status, call_duration, external_call_id, conversation_data, created_at, updated_at) VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?)"
        )
        .bind(student_id)
        .bind(campaign_id)
        .bind(phone_number)
        .bind(status.as_str())
        .bind(external_call_id)
        .bind(&data_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(CallLog {
            id: result.last_insert_rowid(),
            student_id,
            campaign_id,
            phone_number: phone_number.to_string(),
            call_status: status,
            call_duration: 0,
            external_call_id: external_call_id.map(str::to_string),
            conversation_data,
            ai_summary: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Write back a modified call log.
    pub async fn save_call_log(&self, log: &CallLog) -> Result<CallLog, AppError> {
        let now = Utc::now().to_rfc3339();
        let data_json = serde_json::to_string(&log.conversation_data)?;

        let result = sqlx::query(
            "UPDATE call_logs SET call_status = ?, call_duration = ?, external_call_id = ?, conversation_data = ?, ai_summary = ?, updated_at = ? WHERE id = ?"
        )
        .bind(log.call_status.as_str())
        .bind(log.call_duration)
        .bind(&log.external_call_id)
        .bind(&data_json)
        .bind(&log.ai_summary)
        .bind(&now)
        .bind(log.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Call log {} not found", log.id)));
        }

        Ok(CallLog {
            updated_at: now,
            ..log.clone()
        })
    }

    // ==================== ANALYTICS ====================

    /// Aggregate counts for the dashboard.
    pub async fn analytics_summary(&self) -> Result<AnalyticsSummary, AppError> {
        let mut summary = AnalyticsSummary {
            students_by_status: self.count_by("students", "call_status").await?,
            calls_by_status: self.count_by("call_logs", "call_status").await?,
            campaigns_by_status: self.count_by("campaigns", "status").await?,
            ..Default::default()
        };
        summary.total_students = summary.students_by_status.values().sum();
        summary.total_calls = summary.calls_by_status.values().sum();
        summary.compute_completion_rate();

        let row = sqlx::query(
            "SELECT COALESCE(AVG(call_duration), 0.0) AS avg_duration FROM call_logs WHERE call_status = 'completed'",
        )
        .fetch_one(&self.pool)
        .await?;
        let avg: f64 = row.get("avg_duration");
        summary.average_call_duration = (avg * 100.0).round() / 100.0;

        let row = sqlx::query(
            r#"SELECT
                (SELECT COUNT(*) FROM context_notes WHERE is_active = 1) AS notes,
                (SELECT COUNT(*) FROM field_configurations WHERE is_active = 1) AS fields"#,
        )
        .fetch_one(&self.pool)
        .await?;
        summary.active_context_notes = row.get("notes");
        summary.configured_fields = row.get("fields");

        Ok(summary)
    }

    async fn count_by(
        &self,
        table: &'static str,
        column: &'static str,
    ) -> Result<BTreeMap<String, i64>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {column} AS k, COUNT(*) AS n FROM {table} GROUP BY {column}"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("k"), row.get::<i64, _>("n")))
            .collect())
    }
}

// Helper functions for row conversion

fn note_from_row(row: &sqlx::sqlite::SqliteRow) -> ContextNote {
    let is_active: i32 = row.get("is_active");
    let tags: String = row.get("tags");
    ContextNote {
        id: row.get("id"),
        topic: row.get("topic"),
        information: row.get("information"),
        priority: row.get("priority"),
        tags: parse_json(&tags),
        is_active: is_active != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn field_from_row(row: &sqlx::sqlite::SqliteRow) -> FieldConfiguration {
    let is_required: i32 = row.get("is_required");
    let is_visible_in_list: i32 = row.get("is_visible_in_list");
    let is_active: i32 = row.get("is_active");
    let field_type: String = row.get("field_type");
    let field_options: String = row.get("field_options");
    let validation_rules: String = row.get("validation_rules");
    FieldConfiguration {
        id: row.get("id"),
        field_name: row.get("field_name"),
        field_type: FieldType::parse(&field_type).unwrap_or(FieldType::Text),
        field_label: row.get("field_label"),
        is_required: is_required != 0,
        is_visible_in_list: is_visible_in_list != 0,
        field_options: parse_json(&field_options),
        validation_rules: parse_json(&validation_rules),
        display_order: row.get("display_order"),
        is_active: is_active != 0,
        created_at: row.get("created_at"),
    }
}

fn student_from_row(row: &sqlx::sqlite::SqliteRow) -> Student {
    let attributes: String = row.get("attributes");
    let call_status: String = row.get("call_status");
    Student {
        id: row.get("id"),
        phone_number: row.get("phone_number"),
        attributes: parse_json(&attributes),
        call_status: CallStatus::parse(&call_status).unwrap_or(CallStatus::Pending),
        priority: row.get("priority"),
        call_count: row.get("call_count"),
        last_call_attempt: row.get("last_call_attempt"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn campaign_from_row(row: &sqlx::sqlite::SqliteRow) -> Campaign {
    let context_note_ids: String = row.get("context_note_ids");
    let student_ids: String = row.get("student_ids");
    let status: String = row.get("status");
    let contexts: Option<String> = row.get("personalized_contexts");
    Campaign {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        context_note_ids: parse_json(&context_note_ids),
        student_ids: parse_json(&student_ids),
        call_from_time: row.get("call_from_time"),
        call_to_time: row.get("call_to_time"),
        campaign_start_date: row.get("campaign_start_date"),
        campaign_end_date: row.get("campaign_end_date"),
        status: CampaignStatus::parse(&status).unwrap_or(CampaignStatus::Draft),
        total_students: row.get("total_students"),
        students_called: row.get("students_called"),
        successful_calls: row.get("successful_calls"),
        failed_calls: row.get("failed_calls"),
        personalized_contexts: contexts.and_then(|s| serde_json::from_str(&s).ok()),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn call_log_from_row(row: &sqlx::sqlite::SqliteRow) -> CallLog {
    let call_status: String = row.get("call_status");
    let conversation_data: String = row.get("conversation_data");
    CallLog {
        id: row.get("id"),
        student_id: row.get("student_id"),
        campaign_id: row.get("campaign_id"),
        phone_number: row.get("phone_number"),
        call_status: CallStatus::parse(&call_status).unwrap_or(CallStatus::Pending),
        call_duration: row.get("call_duration"),
        external_call_id: row.get("external_call_id"),
        conversation_data: parse_json(&conversation_data),
        ai_summary: row.get("ai_summary"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_json<T: DeserializeOwned + Default>(s: &str) -> T {
    serde_json::from_str(s).unwrap_or_default()
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Keep only briefs whose student is still part of the campaign.
pub(crate) fn prune_contexts(
    mut contexts: PersonalizedContexts,
    student_ids: &[i64],
) -> PersonalizedContexts {
    let keep: HashSet<String> = student_ids.iter().map(|id| id.to_string()).collect();
    contexts.retain(|key, _| keep.contains(key));
    contexts
}

fn page(limit: Option<i64>, skip: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        skip.unwrap_or(0).max(0),
    )
}

fn duplicate_phone(err: sqlx::Error, phone_number: &str) -> AppError {
    match AppError::from(err) {
        AppError::Duplicate(_) => AppError::Duplicate(format!(
            "A student with phone number {} already exists",
            phone_number
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContextSource, PersonalizedContext};

    fn entry(name: &str) -> PersonalizedContext {
        PersonalizedContext {
            student_name: name.to_string(),
            phone_number: String::new(),
            context: format!("brief for {}", name),
            source: ContextSource::Ai,
        }
    }

    #[test]
    fn test_prune_contexts_drops_removed_students() {
        let mut contexts = PersonalizedContexts::new();
        contexts.insert("1".to_string(), entry("Asha"));
        contexts.insert("2".to_string(), entry("Ravi"));
        let pruned = prune_contexts(contexts, &[2, 3]);
        assert_eq!(pruned.keys().collect::<Vec<_>>(), vec!["2"]);
    }

    #[test]
    fn test_dedup_ids_keeps_first_occurrence() {
        assert_eq!(dedup_ids(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page(None, None), (DEFAULT_PAGE_LIMIT, 0));
        assert_eq!(page(Some(0), Some(-5)), (1, 0));
        assert_eq!(page(Some(5000), Some(20)), (MAX_PAGE_LIMIT, 20));
    }
}
