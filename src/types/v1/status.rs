// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Status conditions shared by every CRD.

use chrono::{SecondsFormat, Utc};
use k8s_openapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display, EnumString)]
pub enum ConditionType {
    Ready,
    Progressing,
    Connecting,
    Connected,
    Updating,
    Upgrading,
    Deleting,
    DeletionIsBlocked,
    Failure,
    Ignored,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema, Display)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Coarse lifecycle phase written to `status.phase`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display)]
pub enum Phase {
    Progressing,
    Ready,
    Failure,
    Deleting,
    Connecting,
    Connected,
    Updating,
    Ignored,
}

pub mod reason {
    pub const CLUSTER_PROGRESSING: &str = "ClusterProgressing";
    pub const CLUSTER_CREATED: &str = "ClusterCreated";
    pub const CLUSTER_CONNECTING: &str = "ClusterConnecting";
    pub const CLUSTER_CONNECTED: &str = "ClusterConnected";
    pub const CLUSTER_UPGRADING: &str = "ClusterUpgrading";
    pub const RECONCILE_STARTED: &str = "ReconcileStarted";
    pub const RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const PROGRESSING_COMPLETED: &str = "ProgressingCompleted";
    pub const UPDATE_COMPLETED: &str = "UpdateCompleted";
    pub const UPGRADE_COMPLETED: &str = "UpgradeCompleted";
    pub const DELETING: &str = "Deleting";
    pub const OBJECT_HAS_DEPENDENTS: &str = "ObjectHasDependents";
    pub const OBJECT_HAS_NO_DEPENDENTS: &str = "ObjectHasNoDependents";
    pub const WAITING_FOR_DEPENDENCY: &str = "WaitingForDependency";
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.to_owned(),
            message: message.into(),
            last_heartbeat_time: None,
            last_transition_time: None,
        }
    }
}

pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Upserts `new` into `conditions`.
///
/// A condition that already reads the same is left alone, heartbeat included,
/// so repeated passes produce the same status. `lastTransitionTime` only moves
/// when the status flips. Setting `Ready=True` closes any open
/// Progressing/Updating/Upgrading condition and clears Failure.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition, now: &str) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing)
            if existing.status == new.status
                && existing.reason == new.reason
                && existing.message == new.message => {}
        Some(existing) => {
            new.last_heartbeat_time = Some(now.to_owned());
            new.last_transition_time = if existing.status == new.status {
                existing
                    .last_transition_time
                    .clone()
                    .or_else(|| Some(now.to_owned()))
            } else {
                Some(now.to_owned())
            };
            *existing = new.clone();
        }
        None => {
            new.last_heartbeat_time = Some(now.to_owned());
            new.last_transition_time = Some(now.to_owned());
            conditions.push(new.clone());
        }
    }

    if new.type_ == ConditionType::Ready && new.status == ConditionStatus::True {
        for c in conditions.iter_mut() {
            if c.status != ConditionStatus::True {
                continue;
            }
            let completed = match c.type_ {
                ConditionType::Progressing => reason::PROGRESSING_COMPLETED,
                ConditionType::Updating => reason::UPDATE_COMPLETED,
                ConditionType::Upgrading => reason::UPGRADE_COMPLETED,
                ConditionType::Failure => reason::RECONCILE_SUCCEEDED,
                _ => continue,
            };
            c.status = ConditionStatus::False;
            c.reason = completed.to_owned();
            c.last_transition_time = Some(now.to_owned());
            c.last_heartbeat_time = Some(now.to_owned());
        }
    }
}

pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: ConditionType) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Status blocks that carry a phase and a condition list.
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn set_phase(&mut self, phase: Phase, message: Option<String>);

    fn set_observed_generation(&mut self, generation: Option<i64>);

    fn set_condition(&mut self, condition: Condition) {
        set_condition(self.conditions_mut(), condition, &now());
    }

    fn is_ready(&self) -> bool {
        is_condition_true(self.conditions(), ConditionType::Ready)
    }
}

/// Implements [`Conditioned`] for a status struct with the usual
/// `phase`/`message`/`conditions`/`observed_generation` fields.
macro_rules! impl_conditioned {
    ($status:ty) => {
        impl $crate::types::v1::status::Conditioned for $status {
            fn conditions(&self) -> &[$crate::types::v1::status::Condition] {
                &self.conditions
            }

            fn conditions_mut(&mut self) -> &mut Vec<$crate::types::v1::status::Condition> {
                &mut self.conditions
            }

            fn set_phase(
                &mut self,
                phase: $crate::types::v1::status::Phase,
                message: Option<String>,
            ) {
                self.phase = Some(phase);
                self.message = message;
            }

            fn set_observed_generation(&mut self, generation: Option<i64>) {
                self.observed_generation = generation;
            }
        }
    };
}

pub(crate) use impl_conditioned;

/// Status used by CRDs that need nothing beyond phase and conditions.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl_conditioned!(CommonStatus);

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(t: ConditionType, s: ConditionStatus) -> Condition {
        Condition::new(t, s, "Reason", "msg")
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut conditions = vec![];
        set_condition(&mut conditions, cond(ConditionType::Progressing, ConditionStatus::True), "t1");
        let mut waiting = cond(ConditionType::Progressing, ConditionStatus::True);
        waiting.message = "still waiting".to_owned();
        set_condition(&mut conditions, waiting, "t2");

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some("t1"));
        assert_eq!(conditions[0].last_heartbeat_time.as_deref(), Some("t2"));
    }

    #[test]
    fn test_repeated_condition_is_unchanged() {
        let mut conditions = vec![];
        set_condition(&mut conditions, cond(ConditionType::Ready, ConditionStatus::True), "t1");
        let first = conditions.clone();
        set_condition(&mut conditions, cond(ConditionType::Ready, ConditionStatus::True), "t2");
        assert_eq!(conditions, first);
        assert_eq!(conditions[0].last_heartbeat_time.as_deref(), Some("t1"));
    }

    #[test]
    fn test_transition_time_moves_on_flip() {
        let mut conditions = vec![];
        set_condition(&mut conditions, cond(ConditionType::Failure, ConditionStatus::True), "t1");
        set_condition(&mut conditions, cond(ConditionType::Failure, ConditionStatus::False), "t2");

        assert_eq!(conditions[0].last_transition_time.as_deref(), Some("t2"));
    }

    #[test]
    fn test_ready_closes_progressing_and_upgrading() {
        let mut conditions = vec![];
        set_condition(&mut conditions, cond(ConditionType::Progressing, ConditionStatus::True), "t1");
        set_condition(&mut conditions, cond(ConditionType::Upgrading, ConditionStatus::True), "t1");
        set_condition(&mut conditions, cond(ConditionType::Ready, ConditionStatus::True), "t2");

        let progressing = find_condition(&conditions, ConditionType::Progressing).unwrap();
        assert_eq!(progressing.status, ConditionStatus::False);
        assert_eq!(progressing.reason, reason::PROGRESSING_COMPLETED);

        let upgrading = find_condition(&conditions, ConditionType::Upgrading).unwrap();
        assert_eq!(upgrading.status, ConditionStatus::False);
        assert_eq!(upgrading.reason, reason::UPGRADE_COMPLETED);

        assert!(is_condition_true(&conditions, ConditionType::Ready));
    }

    #[test]
    fn test_condition_serializes_type_field() {
        let c = cond(ConditionType::DeletionIsBlocked, ConditionStatus::True);
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["type"], "DeletionIsBlocked");
        assert_eq!(value["status"], "True");
    }
}
