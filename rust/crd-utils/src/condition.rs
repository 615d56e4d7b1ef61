//! Typed status conditions, used as a signal channel between independent controllers.

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::Utc},
    schemars::{self, JsonSchema},
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of the condition, unique within a [`ConditionSet`].
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// Machine-readable, CamelCase reason for the last transition.
    #[serde(default)]
    pub reason: String,
    /// Human-readable details about the last transition.
    #[serde(default)]
    pub message: String,
    /// When the condition last changed its status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Conditions keyed by their type.
///
/// Serialized as a plain list so that it stays compatible with the usual `status.conditions`
/// layout. Iteration (and serialization) follows insertion order.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|cond| cond.type_ == type_)
    }

    pub fn is_true_for(&self, type_: &str) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }

    /// Upserts `condition` by type, stamping the transition time with the current time.
    ///
    /// Returns whether anything observable changed.
    pub fn set(&mut self, condition: Condition) -> bool {
        self.set_at(condition, Time(Utc::now()))
    }

    /// Like [`Self::set`], with an explicit clock.
    ///
    /// The transition time is only moved when the condition is new or its status flips,
    /// updating just the reason or message keeps the previous transition time.
    pub fn set_at(&mut self, mut condition: Condition, now: Time) -> bool {
        match self.0.iter_mut().find(|cond| cond.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time.clone();
                } else {
                    condition.last_transition_time = Some(now);
                }
                let changed = *existing != condition;
                *existing = condition;
                changed
            }
            None => {
                condition.last_transition_time = Some(now);
                self.0.push(condition);
                true
            }
        }
    }

    /// Removes the condition of type `type_`, if any.
    pub fn remove(&mut self, type_: &str) -> Option<Condition> {
        let index = self.0.iter().position(|cond| cond.type_ == type_)?;
        Some(self.0.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> + '_ {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
