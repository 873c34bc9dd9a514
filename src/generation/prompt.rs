//! Prompt text for calling-brief generation.

use super::profile::{or_blank, StudentProfile};
use crate::models::{ContextNote, StudentAttributes};

pub const SYSTEM_PERSONA: &str = "\
You are an expert educational consultant and communication specialist creating personalized \
conversation contexts for parent outreach calls about scholarship achievements.

Your expertise includes:
- Educational counseling and parent communication
- Scholarship and admission processes
- Understanding student and family concerns
- Creating natural, warm conversation guidance

Create detailed, actionable context that enables meaningful, personalized conversations. \
Focus on being specific, relevant, and helpful while maintaining a warm, professional tone.";

const REQUIREMENTS: &str = r#"=== CONVERSATION CONTEXT REQUIREMENTS ===

Create a rich, personalized context that enables natural conversation. Include:

🎯 **PERSONALIZED OPENING**
- Specific congratulations mentioning their exact achievement
- Reference their rank, score, and scholarship amount specifically
- Connect to their course interest or location if relevant

📋 **KEY TALKING POINTS**
- Scholarship details: amount, percentage, what it covers
- Next steps with specific deadlines and requirements
- Course-specific benefits (if course interest is known)
- Campus facilities most relevant to this student profile
- Success stories of similar students (rank range, location, courses)

❓ **ANTICIPATED QUESTIONS & RESPONSES**
- Fee structure and payment options
- Admission timeline and documentation required
- Hostel facilities (especially if student is from out of town)
- Course curriculum and career prospects
- Comparison with other institutes

🎯 **CONVERSATION FLOW GUIDANCE**
- Start with warm congratulations and specific achievement recognition
- Transition naturally to scholarship benefits
- Address likely concerns based on student profile
- Provide clear, actionable next steps
- Maintain encouraging, professional tone throughout

💡 **PERSONALIZATION NOTES**
- Reference specific aspects of institute information that align with student's interests
- Adjust communication style based on student's background
- Highlight opportunities most relevant to their career path
- Address location-specific considerations if student is from outside local area

OUTPUT FORMAT: Write 400-600 words of rich context that the AI agent can use to conduct a natural, informed conversation. Focus on conversation guidance, not scripted dialogue.

PERSONALIZED CONVERSATION CONTEXT:"#;

/// Flatten notes into one block: `**topic**\ninformation`, separated by blank lines.
pub fn knowledge_block(notes: &[ContextNote]) -> String {
    notes
        .iter()
        .map(|n| format!("**{}**\n{}", n.topic, n.information))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// User message for one student.
pub fn build_prompt(
    profile: &StudentProfile,
    attributes: &StudentAttributes,
    knowledge: &str,
) -> String {
    format!(
        "You are creating a personalized conversation context for an AI voice agent making a \
congratulatory call to parents about their child's scholarship achievement. This is NOT a script \
- it's background context and talking points.

=== STUDENT PROFILE ===
Student: {student}
Parent: {parent}
Test Score: {score}
National Rank: {rank}
Scholarship Awarded: ₹{amount} ({percentage}% fee waiver)
Course Interest: {course}
Location: {city}
School: {school}

=== COMPLETE STUDENT DATA ===
{data}

=== INSTITUTE INFORMATION TO LEVERAGE ===
{knowledge}

{requirements}
",
        student = profile.name(),
        parent = profile.parent(),
        score = or_blank(&profile.test_score),
        rank = or_blank(&profile.rank_achieved),
        amount = or_blank(&profile.scholarship_amount),
        percentage = or_blank(&profile.scholarship_percentage),
        course = or_blank(&profile.course_interest),
        city = or_blank(&profile.city),
        school = or_blank(&profile.school),
        data = attributes.to_pretty_json(),
        knowledge = knowledge,
        requirements = REQUIREMENTS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(topic: &str, information: &str) -> ContextNote {
        ContextNote {
            id: 1,
            topic: topic.to_string(),
            information: information.to_string(),
            priority: 0,
            tags: Vec::new(),
            is_active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_knowledge_block_keeps_every_note_in_order() {
        let block = knowledge_block(&[
            note("Fees", "₹50,000/year"),
            note("Hostel", "Available"),
            note("Fees", "₹50,000/year"),
        ]);
        assert_eq!(
            block,
            "**Fees**\n₹50,000/year\n\n**Hostel**\nAvailable\n\n**Fees**\n₹50,000/year"
        );
    }

    #[test]
    fn test_prompt_embeds_profile_bag_and_knowledge() {
        let attrs: StudentAttributes = serde_json::from_value(json!({
            "student_name": "Asha",
            "scholarship_amount": 5000,
            "hobby": "chess"
        }))
        .unwrap();
        let profile = StudentProfile::from_attributes(&attrs);
        let prompt = build_prompt(&profile, &attrs, "**Fees**\n₹50,000/year");

        assert!(prompt.contains("Student: Asha\n"));
        assert!(prompt.contains("Parent: Parent\n"));
        assert!(prompt.contains("Scholarship Awarded: ₹5000 (% fee waiver)"));
        assert!(prompt.contains("\"hobby\": \"chess\""));
        assert!(prompt.contains("**Fees**\n₹50,000/year"));
        assert!(prompt.contains("400-600 words"));
        assert!(prompt.trim_end().ends_with("PERSONALIZED CONVERSATION CONTEXT:"));
    }
}
