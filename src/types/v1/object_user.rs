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

use crate::types::v1::k8s::parse_quantity_bytes;
use crate::types::v1::status::{Condition, Phase, impl_conditioned};
use k8s_openapi::schemars::JsonSchema;
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const USER_SECRET_PREFIX: &str = "rook-ceph-object-user";
pub const SECRET_NAME_INFO_KEY: &str = "secretName";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephObjectStoreUser",
    namespaced,
    status = "ObjectUserStatus",
    shortname = "rcou",
    shortname = "objectuser",
    plural = "cephobjectstoreusers",
    singular = "cephobjectstoreuser",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUserSpec {
    #[x_kube(validation = Rule::new("self.size() > 0").message("store must be set"))]
    pub store: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Admin capabilities, e.g. `users: read`, `buckets: "*"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotas: Option<UserQuotaSpec>,

    /// Namespace of the object store when it differs from the user's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserQuotaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_buckets: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_objects: Option<i64>,
}

impl UserQuotaSpec {
    pub fn max_size_bytes(&self) -> Option<i64> {
        self.max_size.as_deref().and_then(parse_quantity_bytes)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUserStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, String>,
}

impl_conditioned!(ObjectUserStatus);

pub const VALID_CAP_PERMS: [&str; 4] = ["*", "read", "write", "read, write"];

impl CephObjectStoreUser {
    pub fn uid(&self) -> String {
        self.name_any()
    }

    pub fn secret_name(&self) -> String {
        format!("{USER_SECRET_PREFIX}-{}-{}", self.spec.store, self.name_any())
    }

    pub fn store_namespace(&self) -> Option<String> {
        self.spec
            .cluster_namespace
            .clone()
            .or_else(|| ResourceExt::namespace(self))
    }

    /// `radosgw-admin caps` strings, e.g. `buckets=*;users=read`.
    pub fn caps_string(&self) -> Result<String, String> {
        let mut parts = vec![];
        for (cap, perm) in &self.spec.capabilities {
            if !VALID_CAP_PERMS.contains(&perm.as_str()) {
                return Err(format!("invalid permission {perm:?} for capability {cap:?}"));
            }
            let perm = if perm == "read, write" { "*" } else { perm.as_str() };
            parts.push(format!("{cap}={perm}"));
        }
        Ok(parts.join(";"))
    }
}
