//! Status management utilities.
//!
//! Provides helpers for building and updating cluster status conditions.
//! A condition keeps its `lastTransitionTime` while its status is
//! unchanged, so rewriting the same conditions every pass does not churn.

use jiff::Timestamp;

use crate::crd::{Condition, ConditionType};

/// Builder over an existing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
    now: Timestamp,
}

impl ConditionBuilder {
    /// Start from the conditions currently on the object
    pub fn new(existing: &[Condition], generation: Option<i64>, now: Timestamp) -> Self {
        Self {
            conditions: existing.to_vec(),
            generation,
            now,
        }
    }

    /// Add or update a condition
    pub fn set(
        &mut self,
        condition_type: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
    ) -> &mut Self {
        let mut condition = Condition::new(condition_type, status, reason, message, self.generation);
        condition.last_transition_time = self.now.to_string();

        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Ready condition
    pub fn ready(&mut self, ready: bool, reason: &str, message: &str) -> &mut Self {
        self.set(ConditionType::Ready, ready, reason, message)
    }

    /// Set Progressing condition
    pub fn progressing(&mut self, progressing: bool, reason: &str, message: &str) -> &mut Self {
        self.set(ConditionType::Progressing, progressing, reason, message)
    }

    /// Set Degraded condition
    pub fn degraded(&mut self, degraded: bool, reason: &str, message: &str) -> &mut Self {
        self.set(ConditionType::Degraded, degraded, reason, message)
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    get_condition(conditions, condition_type).is_some_and(Condition::is_true)
}

/// Get the reason for a condition
pub fn get_condition_reason(conditions: &[Condition], condition_type: ConditionType) -> Option<&str> {
    get_condition(conditions, condition_type).map(|c| c.reason.as_str())
}

pub fn get_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    let wanted = condition_type.to_string();
    conditions.iter().find(|c| c.r#type == wanted)
}
