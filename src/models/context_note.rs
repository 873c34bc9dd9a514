//! Context note model: one knowledge-base fact usable as grounding for calling briefs.

use serde::{Deserialize, Serialize};

/// Category used when a note carries no tags.
pub const DEFAULT_CATEGORY: &str = "Other";

/// An admin-authored knowledge-base fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextNote {
    pub id: i64,
    pub topic: String,
    pub information: String,
    /// Higher number = higher priority
    pub priority: i32,
    /// Ordered tags; the first one is the note's category
    pub tags: Vec<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl ContextNote {
    pub fn category(&self) -> &str {
        self.tags
            .first()
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// First `max_chars` characters of the information text.
    pub fn excerpt(&self, max_chars: usize) -> &str {
        match self.information.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.information[..idx],
            None => &self.information,
        }
    }
}

/// Request body for creating a context note.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContextNoteRequest {
    pub topic: String,
    pub information: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Request body for updating a context note. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContextNoteRequest {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub information: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Query parameters for listing notes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextNoteQuery {
    #[serde(default)]
    pub active_only: Option<bool>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Number of notes per category.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(tags: Vec<&str>, information: &str) -> ContextNote {
        ContextNote {
            id: 1,
            topic: "Fees".to_string(),
            information: information.to_string(),
            priority: 0,
            tags: tags.into_iter().map(String::from).collect(),
            is_active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_category_is_first_tag() {
        assert_eq!(note(vec!["Fee Structure", "fees"], "x").category(), "Fee Structure");
        assert_eq!(note(vec![], "x").category(), DEFAULT_CATEGORY);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let n = note(vec![], "₹50,000/year");
        assert_eq!(n.excerpt(3), "₹50");
        assert_eq!(n.excerpt(200), "₹50,000/year");
    }
}
