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

pub mod block_pool;
pub mod bucket_claim;
pub mod cluster;
pub mod filesystem;
pub mod k8s;
pub mod nfs;
pub mod notification;
pub mod object_store;
pub mod object_user;
pub mod pool;
pub mod rbd_mirror;
pub mod status;
pub mod topic;

use crate::types;
use crate::types::error::NoNamespaceSnafu;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{Resource, ResourceExt};
use snafu::OptionExt;
use std::collections::BTreeMap;

/// Label carrying the namespace of the owning CephCluster.
pub const CLUSTER_LABEL: &str = "rook_cluster";
pub const APP_LABEL: &str = "app";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "rook-ceph-operator";

/// Identity helpers shared by every custom resource the operator manages.
pub trait ResourceIdentity: Resource<DynamicType = ()> + ResourceExt {
    fn require_namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    /// `<namespace>/<name>`, used for locks, cancellation and log fields.
    fn key(&self) -> String {
        format!(
            "{}/{}",
            ResourceExt::namespace(self).unwrap_or_default(),
            self.name_any()
        )
    }

    /// `<Kind>/<namespace>/<name>`, keys the per-object locks, cancellation tokens and retry counters.
    fn lock_key(&self) -> String {
        format!("{}/{}", Self::kind(&()), self.key())
    }

    fn new_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name_any(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

impl<T> ResourceIdentity for T where T: Resource<DynamicType = ()> + ResourceExt {}

/// Object metadata for a namespaced child owned by `owner`.
pub fn child_meta<K: ResourceIdentity>(
    owner: &K,
    name: impl Into<String>,
    labels: BTreeMap<String, String>,
) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(name.into()),
        namespace: ResourceExt::namespace(owner),
        labels: Some(labels),
        owner_references: Some(vec![owner.new_owner_ref()]),
        ..Default::default()
    }
}

/// Base label set for a daemon of `app` in the cluster namespace `ns`.
pub fn daemon_labels(app: &str, ns: &str) -> BTreeMap<String, String> {
    [
        (APP_LABEL.to_owned(), app.to_owned()),
        (CLUSTER_LABEL.to_owned(), ns.to_owned()),
        (MANAGED_BY_LABEL.to_owned(), MANAGED_BY.to_owned()),
    ]
    .into_iter()
    .collect()
}
