//! Dashboard summary returned by the analytics endpoint.

use std::collections::BTreeMap;

use serde::Serialize;

/// Aggregate counts across the outreach data.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_students: i64,
    pub students_by_status: BTreeMap<String, i64>,
    pub total_calls: i64,
    pub calls_by_status: BTreeMap<String, i64>,
    /// Completed calls as a percentage of all call logs, rounded to two decimals
    pub call_completion_rate: f64,
    /// Mean duration of completed calls in seconds
    pub average_call_duration: f64,
    pub campaigns_by_status: BTreeMap<String, i64>,
    pub active_context_notes: i64,
    pub configured_fields: i64,
}

impl AnalyticsSummary {
    pub fn compute_completion_rate(&mut self) {
        let completed = self.calls_by_status.get("completed").copied().unwrap_or(0);
        self.call_completion_rate = if self.total_calls > 0 {
            (completed as f64 / self.total_calls as f64 * 10000.0).round() / 100.0
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_rate_rounds_to_two_decimals() {
        let mut summary = AnalyticsSummary {
            total_calls: 3,
            ..Default::default()
        };
        summary.calls_by_status.insert("completed".to_string(), 1);
        summary.compute_completion_rate();
        assert_eq!(summary.call_completion_rate, 33.33);

        let mut empty = AnalyticsSummary::default();
        empty.compute_completion_rate();
        assert_eq!(empty.call_completion_rate, 0.0);
    }
}
