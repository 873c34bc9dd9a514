//! Data models for the outreach backend.
//!
//! All API-facing structs serialize with camelCase keys.

mod analytics;
mod attributes;
mod call_log;
mod campaign;
mod context_note;
mod field_config;
mod student;

pub use analytics::*;
pub use attributes::*;
pub use call_log::*;
pub use campaign::*;
pub use context_note::*;
pub use field_config::*;
pub use student::*;
