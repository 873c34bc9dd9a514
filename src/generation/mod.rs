//! Campaign context generation.
//!
//! Produces one calling brief per student from the campaign's context notes and
//! the student's attributes. Students are processed one at a time with exactly
//! one completion request each; a failed request is replaced by the
//! deterministic fallback brief, so every student always gets an entry.

mod fallback;
mod profile;
mod prompt;

pub use fallback::fallback_context;
pub use profile::StudentProfile;
pub use prompt::{build_prompt, knowledge_block, SYSTEM_PERSONA};

use std::sync::Arc;

use thiserror::Error;

use crate::db::Repository;
use crate::errors::AppError;
use crate::llm::CompletionClient;
use crate::models::{
    Campaign, ContextNote, ContextSource, PersonalizedContext, PersonalizedContexts, Student,
};

/// Failures that stop generation before any student is processed.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("no context notes available for generation")]
    NoContextNotes,

    #[error("no students available for generation")]
    NoStudents,

    #[error("{0}")]
    Store(#[from] AppError),
}

/// Writes calling briefs through a [`CompletionClient`].
pub struct ContextGenerator {
    client: Arc<dyn CompletionClient>,
}

impl ContextGenerator {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Generate briefs for every student, keyed by the student id as a string.
    pub async fn generate_campaign_contexts(
        &self,
        campaign_id: i64,
        context_notes: &[ContextNote],
        students: &[Student],
    ) -> Result<PersonalizedContexts, GenerationError> {
        if context_notes.is_empty() {
            return Err(GenerationError::NoContextNotes);
        }
        if students.is_empty() {
            return Err(GenerationError::NoStudents);
        }

        tracing::info!(
            campaign_id,
            notes = context_notes.len(),
            students = students.len(),
            model = self.client.model(),
            "Generating campaign contexts"
        );

        let knowledge = knowledge_block(context_notes);
        let mut contexts = PersonalizedContexts::new();
        let mut fallbacks = 0usize;

        for student in students {
            let entry = self
                .generate_for_student(student, context_notes, &knowledge)
                .await;
            if entry.source == ContextSource::Fallback {
                fallbacks += 1;
            }
            contexts.insert(student.id.to_string(), entry);
        }

        tracing::info!(
            campaign_id,
            generated = contexts.len(),
            fallbacks,
            "Campaign contexts generated"
        );
        Ok(contexts)
    }

    /// Brief for one student. Never fails: completion errors yield the fallback.
    pub async fn generate_for_student(
        &self,
        student: &Student,
        context_notes: &[ContextNote],
        knowledge: &str,
    ) -> PersonalizedContext {
        let profile = StudentProfile::from_attributes(&student.attributes);
        let user = build_prompt(&profile, &student.attributes, knowledge);

        let (context, source) = match self.client.complete(SYSTEM_PERSONA, &user).await {
            Ok(text) => (text, ContextSource::Ai),
            Err(e) => {
                tracing::warn!(
                    student_id = student.id,
                    "Completion failed, using fallback context: {}",
                    e
                );
                (fallback_context(&profile, context_notes), ContextSource::Fallback)
            }
        };

        PersonalizedContext {
            student_name: profile
                .student_name
                .unwrap_or_else(|| format!("Student {}", student.id)),
            phone_number: student.phone_number.clone(),
            context,
            source,
        }
    }

    /// Re-resolve a campaign's notes and students, regenerate every brief and store them.
    pub async fn regenerate(
        &self,
        repo: &Repository,
        campaign: &Campaign,
    ) -> Result<Campaign, GenerationError> {
        let notes = repo
            .get_context_notes_by_ids(&campaign.context_note_ids)
            .await?;
        let students = repo.get_students_by_ids(&campaign.student_ids).await?;

        let contexts = self
            .generate_campaign_contexts(campaign.id, &notes, &students)
            .await?;
        Ok(repo.set_personalized_contexts(campaign.id, &contexts).await?)
    }

    /// Brief for one student and an ad hoc note selection; nothing is stored.
    pub async fn preview(
        &self,
        repo: &Repository,
        student_id: i64,
        context_note_ids: &[i64],
    ) -> Result<PersonalizedContext, GenerationError> {
        let student = repo
            .get_student(student_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Student {} not found", student_id)))?;
        let notes = repo.get_context_notes_by_ids(context_note_ids).await?;
        if notes.is_empty() {
            return Err(GenerationError::NoContextNotes);
        }

        let knowledge = knowledge_block(&notes);
        Ok(self.generate_for_student(&student, &notes, &knowledge).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::models::{CallStatus, StudentAttributes};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails for the listed student names, echoes a short brief otherwise.
    struct ScriptedClient {
        fail_for: HashSet<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn failing_for(names: &[&'static str]) -> Self {
            Self {
                fail_for: names.iter().copied().collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(system, SYSTEM_PERSONA);
            let name = user
                .lines()
                .find_map(|l| l.strip_prefix("Student: "))
                .unwrap_or_default()
                .to_string();
            if self.fail_for.contains(name.as_str()) {
                return Err(LlmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(format!("Call {}'s parents and congratulate them.", name))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl CompletionClient for AlwaysFails {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Err(LlmError::NotConfigured)
        }

        fn model(&self) -> &str {
            "none"
        }
    }

    fn note(id: i64, topic: &str, information: &str) -> ContextNote {
        ContextNote {
            id,
            topic: topic.to_string(),
            information: information.to_string(),
            priority: 0,
            tags: Vec::new(),
            is_active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn student(id: i64, attributes: serde_json::Value) -> Student {
        let attributes: StudentAttributes = serde_json::from_value(attributes).unwrap();
        Student {
            id,
            phone_number: format!("+9198000000{:02}", id),
            attributes,
            call_status: CallStatus::Pending,
            priority: 1,
            call_count: 0,
            last_call_attempt: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn has_fallback_shape(text: &str) -> bool {
        ["PERSONALIZED CONVERSATION CONTEXT FOR", "KEY TALKING POINTS", "CONVERSATION GUIDANCE"]
            .iter()
            .all(|h| text.contains(h))
    }

    #[tokio::test]
    async fn test_failing_completion_yields_fallback_for_every_student() {
        let generator = ContextGenerator::new(Arc::new(AlwaysFails));
        let notes = [note(1, "Fees", "₹50,000/year")];
        let students = [
            student(1, json!({ "student_name": "Asha", "scholarship_amount": 5000 })),
            student(2, json!({ "student_name": "Ravi" })),
        ];

        let contexts = generator
            .generate_campaign_contexts(9, &notes, &students)
            .await
            .unwrap();

        assert_eq!(contexts.keys().collect::<Vec<_>>(), vec!["1", "2"]);

        let asha = &contexts["1"];
        assert_eq!(asha.student_name, "Asha");
        assert_eq!(asha.phone_number, "+919800000001");
        assert_eq!(asha.source, ContextSource::Fallback);
        assert!(asha.context.contains("Asha"));
        assert!(asha.context.contains("5000"));
        assert!(asha.context.contains("Fees"));
        assert!(has_fallback_shape(&asha.context));

        let ravi = &contexts["2"];
        assert_eq!(ravi.student_name, "Ravi");
        assert!(ravi.context.contains("Ravi"));
    }

    #[tokio::test]
    async fn test_partial_failures_only_affect_those_students() {
        let client = Arc::new(ScriptedClient::failing_for(&["Ravi"]));
        let generator = ContextGenerator::new(client.clone());
        let notes = [note(1, "Fees", "₹50,000/year"), note(2, "Hostel", "Available")];
        let students = [
            student(1, json!({ "student_name": "Asha" })),
            student(2, json!({ "student_name": "Ravi" })),
            student(3, json!({ "student_name": "Meera" })),
        ];

        let contexts = generator
            .generate_campaign_contexts(1, &notes, &students)
            .await
            .unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(contexts.len(), 3);
        assert!(contexts.values().all(|c| !c.context.is_empty()));

        assert_eq!(contexts["2"].source, ContextSource::Fallback);
        assert!(has_fallback_shape(&contexts["2"].context));

        for key in ["1", "3"] {
            assert_eq!(contexts[key].source, ContextSource::Ai);
            assert!(!has_fallback_shape(&contexts[key].context));
        }
        assert_eq!(contexts["1"].context, "Call Asha's parents and congratulate them.");
    }

    #[tokio::test]
    async fn test_unnamed_student_gets_placeholder_name() {
        let generator = ContextGenerator::new(Arc::new(AlwaysFails));
        let contexts = generator
            .generate_campaign_contexts(1, &[note(1, "Fees", "x")], &[student(42, json!({}))])
            .await
            .unwrap();
        assert_eq!(contexts["42"].student_name, "Student 42");
        assert!(contexts["42"].context.contains("FOR THE STUDENT"));
    }

    #[tokio::test]
    async fn test_rerun_with_same_input_is_stable() {
        let generator = ContextGenerator::new(Arc::new(ScriptedClient::failing_for(&["Ravi"])));
        let notes = [note(1, "Fees", "₹50,000/year")];
        let students = [
            student(1, json!({ "student_name": "Asha" })),
            student(2, json!({ "student_name": "Ravi" })),
        ];

        let first = generator.generate_campaign_contexts(1, &notes, &students).await.unwrap();
        let second = generator.generate_campaign_contexts(1, &notes, &students).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_inputs_are_rejected() {
        let generator = ContextGenerator::new(Arc::new(AlwaysFails));
        let students = [student(1, json!({}))];
        let notes = [note(1, "Fees", "x")];

        assert!(matches!(
            generator.generate_campaign_contexts(1, &[], &students).await,
            Err(GenerationError::NoContextNotes)
        ));
        assert!(matches!(
            generator.generate_campaign_contexts(1, &notes, &[]).await,
            Err(GenerationError::NoStudents)
        ));
    }
}
