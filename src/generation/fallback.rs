//! Deterministic brief used when the model cannot produce one.
//!
//! Pure string assembly: no clock, no randomness, no I/O.

use std::fmt::Write;

use super::profile::{or_blank, StudentProfile};
use crate::models::ContextNote;

/// Characters of each note's information quoted in the brief.
pub const NOTE_EXCERPT_CHARS: usize = 200;

pub fn fallback_context(profile: &StudentProfile, notes: &[ContextNote]) -> String {
    let name = profile.name();
    let parent = profile.parent();
    let rank = or_blank(&profile.rank_achieved);
    let score = or_blank(&profile.test_score);
    let amount = or_blank(&profile.scholarship_amount);
    let percentage = or_blank(&profile.scholarship_percentage);
    let course = profile
        .course_interest
        .as_deref()
        .unwrap_or("Discuss available programs");

    let mut out = String::new();

    // Writing to a String never fails
    let _ = write!(
        out,
        "🎉 PERSONALIZED CONVERSATION CONTEXT FOR {upper}

**OPENING CONGRATULATIONS**
Congratulations to {name} on achieving excellent results in the entrance examination! \
{name} has earned a rank of {rank} with a score of {score}, which qualifies for a scholarship \
of ₹{amount} ({percentage}% fee waiver).

**KEY TALKING POINTS**
- Acknowledge {name}'s specific achievement (rank {rank}, score {score})
- Scholarship Details: ₹{amount} scholarship ({percentage}% fee waiver)
- Course Interest: {course}
- Next Steps: Complete admission formalities and document submission

**CONVERSATION GUIDANCE**
When speaking with {parent}:
1. Start with warm congratulations and specific achievement recognition
2. Clearly explain scholarship benefits and what it covers
3. Provide admission timeline and required documentation
4. Address questions about facilities, courses, and career prospects
5. Offer assistance with admission process and next steps

**AVAILABLE INSTITUTE INFORMATION**",
        upper = name.to_uppercase(),
    );

    for note in notes {
        let excerpt = note.excerpt(NOTE_EXCERPT_CHARS);
        let ellipsis = if excerpt.len() < note.information.len() {
            "..."
        } else {
            ""
        };
        let _ = write!(out, "\n- **{}**: {}{}", note.topic, excerpt, ellipsis);
    }

    let _ = write!(
        out,
        "

**CONVERSATION OBJECTIVES**
- Ensure {parent} understands the scholarship value and next steps
- Address any concerns about admission process or institute facilities
- Provide clear timeline for admission completion
- Maintain warm, supportive, and professional tone throughout
- Offer ongoing support and contact information for further queries

**PERSONALIZATION NOTES**
- Use {name}'s name frequently to personalize the conversation
- Reference their specific achievements to build confidence
- Adapt information based on {parent}'s questions and concerns
- Maintain encouraging tone about {name}'s bright future prospects"
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudentAttributes;
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

    fn profile(value: serde_json::Value) -> StudentProfile {
        let attrs: StudentAttributes = serde_json::from_value(value).unwrap();
        StudentProfile::from_attributes(&attrs)
    }

    #[test]
    fn test_fallback_has_section_headers_and_facts() {
        let text = fallback_context(
            &profile(json!({ "student_name": "Asha", "scholarship_amount": 5000 })),
            &[note("Fees", "₹50,000/year")],
        );
        assert!(text.contains("PERSONALIZED CONVERSATION CONTEXT FOR ASHA"));
        assert!(text.contains("KEY TALKING POINTS"));
        assert!(text.contains("CONVERSATION GUIDANCE"));
        assert!(text.contains("Congratulations to Asha"));
        assert!(text.contains("₹5000 scholarship"));
        assert!(text.contains("- **Fees**: ₹50,000/year"));
        assert!(text.contains("Course Interest: Discuss available programs"));
        assert!(text.contains("When speaking with Parent:"));
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let p = profile(json!({ "student_name": "Ravi", "rank_achieved": 12 }));
        let notes = [note("Hostel", "Separate hostels for boys and girls")];
        assert_eq!(fallback_context(&p, &notes), fallback_context(&p, &notes));
    }

    #[test]
    fn test_long_note_is_excerpted() {
        let long = "x".repeat(250);
        let text = fallback_context(&profile(json!({})), &[note("Long", &long)]);
        let expected = format!("- **Long**: {}...", "x".repeat(200));
        assert!(text.contains(&expected));
        assert!(!text.contains(&"x".repeat(201)));
        assert!(text.contains("FOR THE STUDENT"));
    }
}
