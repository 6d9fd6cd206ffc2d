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

use crate::types::v1::status::{CommonStatus, Conditioned};
use k8s_openapi::schemars::JsonSchema;
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephBucketNotification",
    namespaced,
    status = "CommonStatus",
    plural = "cephbucketnotifications",
    singular = "cephbucketnotification",
    printcolumn = r#"{"name":"Topic", "type":"string", "jsonPath":".spec.topic"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpec {
    /// Name of a CephBucketTopic in the same namespace.
    pub topic: String,

    /// S3 event names; empty means every event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<NotificationFilter>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_filters: Vec<KeyFilter>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, KubeSchema)]
pub struct KeyFilter {
    /// `prefix`, `suffix` or `regex`.
    #[x_kube(validation = Rule::new("self in ['prefix', 'suffix', 'regex']").message("key filter name must be prefix, suffix or regex"))]
    pub name: String,
    pub value: String,
}

impl CephBucketNotification {
    /// Label a claim carries to attach this notification.
    pub fn claim_label(&self) -> String {
        format!("{}{}", crate::reconcile::notification::LABEL_PREFIX, self.name_any())
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.is_ready())
    }
}
