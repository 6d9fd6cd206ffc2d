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
use crate::types::v1::status::{Condition, Conditioned, Phase};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::schemars::JsonSchema;
use kube::{CustomResource, KubeSchema, Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

pub const BUCKET_OWNER_KEY: &str = "bucketOwner";
pub const MAX_OBJECTS_KEY: &str = "maxObjects";
pub const MAX_SIZE_KEY: &str = "maxSize";

pub const STORE_NAME_PARAM: &str = "objectStoreName";
pub const STORE_NAMESPACE_PARAM: &str = "objectStoreNamespace";
pub const REGION_PARAM: &str = "region";
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "objectbucket.io",
    version = "v1alpha1",
    kind = "ObjectBucketClaim",
    namespaced,
    status = "BucketClaimStatus",
    shortname = "obc",
    plural = "objectbucketclaims",
    singular = "objectbucketclaim",
    printcolumn = r#"{"name":"StorageClass", "type":"string", "jsonPath":".spec.storageClassName"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimSpec {
    pub storage_class_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_bucket_name: Option<String>,

    /// `bucketOwner`, `maxObjects` and `maxSize` are understood.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_config: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Deleting,
    Failed,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ClaimPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Backend user currently owning the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Conditioned for BucketClaimStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn set_phase(&mut self, phase: Phase, message: Option<String>) {
        self.phase = Some(match phase {
            Phase::Ready => ClaimPhase::Bound,
            Phase::Failure => ClaimPhase::Failed,
            Phase::Deleting => ClaimPhase::Deleting,
            _ => ClaimPhase::Pending,
        });
        self.message = message;
    }

    fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.observed_generation = generation;
    }
}

/// Object store a bucket StorageClass provisions from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimStore {
    pub name: String,
    pub namespace: String,
    pub region: String,
    pub reclaim_delete: bool,
}

impl ClaimStore {
    pub fn from_storage_class(class: &StorageClass) -> Option<Self> {
        let params = class.parameters.as_ref()?;
        let name = params.get(STORE_NAME_PARAM).filter(|s| !s.is_empty())?;
        let namespace = params.get(STORE_NAMESPACE_PARAM).filter(|s| !s.is_empty())?;
        Some(Self {
            name: name.clone(),
            namespace: namespace.clone(),
            region: params
                .get(REGION_PARAM)
                .cloned()
                .unwrap_or_else(|| DEFAULT_REGION.to_owned()),
            reclaim_delete: class.reclaim_policy.as_deref() != Some("Retain"),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketQuota {
    pub max_objects: Option<i64>,
    pub max_size: Option<i64>,
}

impl ObjectBucketClaim {
    /// Explicit owner from `additionalConfig.bucketOwner`, if non-empty.
    pub fn requested_owner(&self) -> Option<&str> {
        self.spec
            .additional_config
            .get(BUCKET_OWNER_KEY)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// Owner created on behalf of the claim when none is named.
    pub fn generated_owner(&self) -> String {
        format!(
            "obc-{}-{}",
            ResourceExt::namespace(self).unwrap_or_default(),
            self.name_any()
        )
    }

    pub fn current_owner(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.owner.as_deref())
    }

    pub fn is_bound(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.phase == Some(ClaimPhase::Bound))
    }

    pub fn bucket_quota(&self) -> Result<BucketQuota, String> {
        let config = &self.spec.additional_config;
        let max_objects = match config.get(MAX_OBJECTS_KEY) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .map_err(|e| format!("invalid {MAX_OBJECTS_KEY} {raw:?}: {e}"))?,
            ),
            None => None,
        };
        let max_size = match config.get(MAX_SIZE_KEY) {
            Some(raw) => Some(
                parse_quantity_bytes(raw)
                    .ok_or_else(|| format!("invalid {MAX_SIZE_KEY} {raw:?}"))?,
            ),
            None => None,
        };
        Ok(BucketQuota {
            max_objects,
            max_size,
        })
    }

    /// Resolved bucket name. Generated names derive from the claim uid so
    /// repeated reconciles agree.
    pub fn bucket_name(&self) -> Option<String> {
        if let Some(name) = self.status.as_ref().and_then(|s| s.bucket_name.clone()) {
            return Some(name);
        }
        if let Some(name) = self.spec.bucket_name.as_ref().filter(|n| !n.is_empty()) {
            return Some(name.clone());
        }
        let prefix = self.spec.generate_bucket_name.as_ref()?;
        let uid = self.meta().uid.as_deref()?.replace('-', "");
        Some(format!("{prefix}-{}", &uid[..uid.len().min(8)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_owner_ignores_blank() {
        let mut claim = crate::tests::create_test_claim("c1", None);
        assert_eq!(claim.requested_owner(), None);

        claim
            .spec
            .additional_config
            .insert(BUCKET_OWNER_KEY.to_owned(), "  ".to_owned());
        assert_eq!(claim.requested_owner(), None);

        claim
            .spec
            .additional_config
            .insert(BUCKET_OWNER_KEY.to_owned(), "alice".to_owned());
        assert_eq!(claim.requested_owner(), Some("alice"));
    }

    #[test]
    fn test_bucket_quota_parsing() {
        let mut claim = crate::tests::create_test_claim("c1", None);
        claim
            .spec
            .additional_config
            .insert(MAX_OBJECTS_KEY.to_owned(), "1000".to_owned());
        claim
            .spec
            .additional_config
            .insert(MAX_SIZE_KEY.to_owned(), "2G".to_owned());
        assert_eq!(
            claim.bucket_quota().unwrap(),
            BucketQuota {
                max_objects: Some(1000),
                max_size: Some(2_000_000_000)
            }
        );

        claim
            .spec
            .additional_config
            .insert(MAX_OBJECTS_KEY.to_owned(), "lots".to_owned());
        assert!(claim.bucket_quota().is_err());
    }

    #[test]
    fn test_generated_bucket_name_is_stable() {
        let mut claim = crate::tests::create_test_claim("c1", None);
        claim.spec.bucket_name = None;
        claim.spec.generate_bucket_name = Some("photos".to_owned());
        let first = claim.bucket_name().unwrap();
        assert!(first.starts_with("photos-"));
        assert_eq!(claim.bucket_name().unwrap(), first);
    }

    #[test]
    fn test_claim_store_from_storage_class() {
        let mut class = StorageClass {
            parameters: Some(
                [
                    (STORE_NAME_PARAM.to_owned(), "my-store".to_owned()),
                    (STORE_NAMESPACE_PARAM.to_owned(), "rook-ceph".to_owned()),
                ]
                .into(),
            ),
            reclaim_policy: Some("Retain".to_owned()),
            ..Default::default()
        };
        let store = ClaimStore::from_storage_class(&class).unwrap();
        assert_eq!(store.name, "my-store");
        assert_eq!(store.region, DEFAULT_REGION);
        assert!(!store.reclaim_delete);

        class.parameters = None;
        assert!(ClaimStore::from_storage_class(&class).is_none());
    }

    #[test]
    fn test_phase_mapping() {
        let mut status = BucketClaimStatus::default();
        status.set_phase(Phase::Ready, None);
        assert_eq!(status.phase, Some(ClaimPhase::Bound));
        status.set_phase(Phase::Progressing, Some("waiting".to_owned()));
        assert_eq!(status.phase, Some(ClaimPhase::Pending));
        status.set_phase(Phase::Deleting, None);
        assert_eq!(status.phase, Some(ClaimPhase::Deleting));
        status.set_phase(Phase::Failure, Some("no store".to_owned()));
        assert_eq!(status.phase, Some(ClaimPhase::Failed));
    }
}
