//! The student facts a calling brief is built from.

use crate::models::StudentAttributes;

const DEFAULT_STUDENT_NAME: &str = "the student";
const DEFAULT_PARENT_NAME: &str = "Parent";

/// Known attributes pulled out of a student's attribute bag.
///
/// Every fact is optional; rendering helpers decide how a gap reads in prose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentProfile {
    pub student_name: Option<String>,
    pub parent_name: Option<String>,
    pub scholarship_amount: Option<String>,
    pub scholarship_percentage: Option<String>,
    pub test_score: Option<String>,
    pub rank_achieved: Option<String>,
    pub course_interest: Option<String>,
    pub city: Option<String>,
    pub school: Option<String>,
}

impl StudentProfile {
    pub fn from_attributes(attributes: &StudentAttributes) -> Self {
        Self {
            student_name: attributes.text("student_name"),
            parent_name: attributes.text("parent_name"),
            scholarship_amount: attributes.text("scholarship_amount"),
            scholarship_percentage: attributes.text("scholarship_percentage"),
            test_score: attributes.text("test_score"),
            rank_achieved: attributes.text("rank_achieved"),
            course_interest: attributes.first_text(&["course_interested", "preferred_course"]),
            city: attributes.first_text(&["city", "location"]),
            school: attributes.first_text(&["school_name", "current_school"]),
        }
    }

    /// Name used in prose; "the student" when unknown.
    pub fn name(&self) -> &str {
        self.student_name.as_deref().unwrap_or(DEFAULT_STUDENT_NAME)
    }

    /// Parent salutation; "Parent" when unknown.
    pub fn parent(&self) -> &str {
        self.parent_name.as_deref().unwrap_or(DEFAULT_PARENT_NAME)
    }
}

/// Render an optional fact, leaving a gap when it is missing.
pub(crate) fn or_blank(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}
