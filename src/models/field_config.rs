//! Admin-configured field definitions that describe the student attribute bag.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StudentAttributes;

/// Supported field types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Currency,
    Date,
    Boolean,
    Select,
    Email,
    Phone,
}

impl FieldType {
    pub const ALL: [FieldType; 8] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::Currency,
        FieldType::Date,
        FieldType::Boolean,
        FieldType::Select,
        FieldType::Email,
        FieldType::Phone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Currency => "currency",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
            FieldType::Select => "select",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Number | FieldType::Currency)
    }
}

/// Optional constraints on a field's value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Definition of one allowed student attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfiguration {
    pub id: i64,
    /// Attribute key, e.g. "scholarship_amount"
    pub field_name: String,
    pub field_type: FieldType,
    /// Human label, e.g. "Scholarship Amount"
    pub field_label: String,
    pub is_required: bool,
    pub is_visible_in_list: bool,
    /// Allowed values for select fields
    pub field_options: Vec<String>,
    pub validation_rules: ValidationRules,
    pub display_order: i32,
    pub is_active: bool,
    pub created_at: String,
}

impl FieldConfiguration {
    /// Check a single attribute value against this definition.
    pub fn validate_value(&self, value: Option<&Value>) -> Result<(), String> {
        let label = &self.field_label;
        let value = match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v),
        };
        let Some(value) = value else {
            if self.is_required {
                return Err(format!("{} is required", label));
            }
            return Ok(());
        };

        let rules = &self.validation_rules;
        match self.field_type {
            FieldType::Number | FieldType::Currency => {
                let num = as_number(value).ok_or_else(|| {
                    if self.field_type == FieldType::Currency {
                        format!("{} must be a valid amount", label)
                    } else {
                        format!("{} must be a valid number", label)
                    }
                })?;
                if self.field_type == FieldType::Currency && num < 0.0 {
                    return Err(format!("{} cannot be negative", label));
                }
                if let Some(min) = rules.min {
                    if num < min {
                        return Err(format!("{} must be at least {}", label, min));
                    }
                }
                if let Some(max) = rules.max {
                    if num > max {
                        return Err(format!("{} must be at most {}", label, max));
                    }
                }
            }
            FieldType::Select => {
                let text = as_text(value);
                if !self.field_options.iter().any(|o| *o == text) {
                    return Err(format!(
                        "{} must be one of: {}",
                        label,
                        self.field_options.join(", ")
                    ));
                }
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    return Err(format!("{} must be true or false", label));
                }
            }
            FieldType::Date => {
                let text = as_text(value);
                if NaiveDate::parse_from_str(&text, "%Y-%m-%d").is_err() {
                    return Err(format!("{} must be a date in YYYY-MM-DD format", label));
                }
            }
            FieldType::Email => {
                let text = as_text(value);
                let valid = text
                    .split_once('@')
                    .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
                if !valid {
                    return Err(format!("{} must be a valid email address", label));
                }
            }
            FieldType::Phone => {
                if super::normalize_phone(&as_text(value)).is_none() {
                    return Err(format!("{} must be a valid phone number", label));
                }
            }
            FieldType::Text => {
                let text = as_text(value);
                let len = text.chars().count();
                if let Some(min_length) = rules.min_length {
                    if len < min_length {
                        return Err(format!(
                            "{} must be at least {} characters",
                            label, min_length
                        ));
                    }
                }
                if let Some(max_length) = rules.max_length {
                    if len > max_length {
                        return Err(format!(
                            "{} must be at most {} characters",
                            label, max_length
                        ));
                    }
                }
                if let Some(pattern) = &rules.pattern {
                    match Regex::new(pattern) {
                        Ok(re) if !re.is_match(&text) => {
                            return Err(format!("{} has an invalid format", label));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(
                                "Ignoring invalid pattern on field {}: {}",
                                self.field_name,
                                e
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Validate an attribute bag against every active field definition.
///
/// Returns one message per failing field, in configuration order.
pub fn validate_attributes(
    configs: &[FieldConfiguration],
    attributes: &StudentAttributes,
) -> Vec<String> {
    configs
        .iter()
        .filter(|c| c.is_active)
        .filter_map(|c| c.validate_value(attributes.raw(&c.field_name)).err())
        .collect()
}

/// Request body for creating a field configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFieldRequest {
    pub field_name: String,
    pub field_type: FieldType,
    pub field_label: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default = "default_true")]
    pub is_visible_in_list: bool,
    #[serde(default)]
    pub field_options: Vec<String>,
    #[serde(default)]
    pub validation_rules: ValidationRules,
    #[serde(default)]
    pub display_order: i32,
}

fn default_true() -> bool {
    true
}

/// Request body for updating a field configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFieldRequest {
    #[serde(default)]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub field_label: Option<String>,
    #[serde(default)]
    pub is_required: Option<bool>,
    #[serde(default)]
    pub is_visible_in_list: Option<bool>,
    #[serde(default)]
    pub field_options: Option<Vec<String>>,
    #[serde(default)]
    pub validation_rules: Option<ValidationRules>,
    #[serde(default)]
    pub display_order: Option<i32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Query parameters for listing field configurations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldQuery {
    #[serde(default)]
    pub active_only: Option<bool>,
}

/// New position for one field in a bulk reorder.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOrder {
    pub field_id: i64,
    pub display_order: i32,
}

/// Result of a bulk reorder.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderResult {
    pub updated_count: usize,
}

/// Active fields in display order, for rendering the student form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicFormSchema {
    pub fields: Vec<FieldConfiguration>,
    pub schema_version: &'static str,
    pub last_updated: String,
}

pub const FORM_SCHEMA_VERSION: &str = "1.0";

/// Whether `name` is usable as an attribute key.
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
