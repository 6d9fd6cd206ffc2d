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

//! Deletion gate: a parent keeps its finalizer while dependents exist.

use crate::context::{self, Context};
use crate::object::{self, ObjectAdmin, StoreContext};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::block_pool::CephBlockPool;
use crate::types::v1::bucket_claim::{ClaimStore, ObjectBucketClaim};
use crate::types::v1::cluster::CephCluster;
use crate::types::v1::filesystem::CephFilesystem;
use crate::types::v1::nfs::CephNFS;
use crate::types::v1::notification::CephBucketNotification;
use crate::types::v1::object_store::CephObjectStore;
use crate::types::v1::object_user::CephObjectStoreUser;
use crate::types::v1::rbd_mirror::CephRBDMirror;
use crate::types::v1::status::{
    Condition, ConditionStatus, ConditionType, Conditioned, Phase, reason,
};
use crate::types::v1::topic::CephBucketTopic;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::core::object::HasStatus;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;
use tracing::info;

/// Kind under which gateway buckets with no claim are listed.
pub const BUCKETS: &str = "Buckets";

/// Dependent names grouped by plural kind, e.g. `CephBlockPools: [replicapool]`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependentList {
    by_kind: BTreeMap<String, Vec<String>>,
}

/// `CephNFS` → `CephNFSes`, `CephBlockPool` → `CephBlockPools`.
pub fn plural_kind(kind: &str) -> String {
    if kind.ends_with('s') || kind.ends_with('S') {
        format!("{kind}es")
    } else {
        format!("{kind}s")
    }
}

impl DependentList {
    pub fn add(&mut self, plural_kind: &str, name: impl Into<String>) {
        let names = self.by_kind.entry(plural_kind.to_owned()).or_default();
        names.push(name.into());
        names.sort();
        names.dedup();
    }

    pub fn add_all<K: Resource<DynamicType = ()> + ResourceExt>(&mut self, items: &[K]) {
        let kind = plural_kind(&K::kind(&()));
        for item in items {
            self.add(&kind, item.name_any());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    pub fn names(&self, plural_kind: &str) -> &[String] {
        self.by_kind.get(plural_kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Message written when deletion of `kind` `<ns>/<name>` is blocked.
    pub fn blocked_message(&self, kind: &str, key: &str) -> String {
        format!("{kind} \"{key}\" will not be deleted until all dependents are removed: {self}")
    }
}

impl fmt::Display for DependentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (kind, names)) in self.by_kind.iter().enumerate() {
            if i > 0 {
                write!(f, ". ")?;
            }
            write!(f, "{kind}: [{}]", names.join(" "))?;
        }
        Ok(())
    }
}

/// Ceph custom resources in the cluster namespace.
pub async fn of_cluster(ctx: &Context, cluster: &CephCluster) -> Result<DependentList, context::Error> {
    let ns = cluster.require_namespace()?;
    let mut deps = DependentList::default();
    deps.add_all(&ctx.list::<CephBlockPool>(&ns).await?);
    deps.add_all(&ctx.list::<CephFilesystem>(&ns).await?);
    deps.add_all(&ctx.list::<CephNFS>(&ns).await?);
    deps.add_all(&ctx.list::<CephObjectStore>(&ns).await?);
    deps.add_all(&ctx.list::<CephObjectStoreUser>(&ns).await?);
    deps.add_all(&ctx.list::<CephBucketTopic>(&ns).await?);
    deps.add_all(&ctx.list::<CephBucketNotification>(&ns).await?);
    deps.add_all(&ctx.list::<CephRBDMirror>(&ns).await?);
    Ok(deps)
}

/// Users, topics and bucket claims served by `store`, from any namespace.
pub async fn of_object_store(
    ctx: &Context,
    store: &CephObjectStore,
) -> Result<DependentList, context::Error> {
    let ns = store.require_namespace()?;
    let name = store.name_any();

    let users: Vec<_> = ctx
        .list_global::<CephObjectStoreUser>()
        .await?
        .into_iter()
        .filter(|u| u.spec.store == name && u.store_namespace().as_deref() == Some(ns.as_str()))
        .collect();
    let topics: Vec<_> = ctx
        .list_global::<CephBucketTopic>()
        .await?
        .into_iter()
        .filter(|t| t.spec.object_store_name == name && t.store_namespace() == ns)
        .collect();

    let classes: Vec<String> = ctx
        .list_global::<StorageClass>()
        .await?
        .iter()
        .filter(|class| {
            ClaimStore::from_storage_class(class)
                .is_some_and(|s| s.name == name && s.namespace == ns)
        })
        .map(|class| class.name_any())
        .collect();
    let claims: Vec<_> = ctx
        .list_global::<ObjectBucketClaim>()
        .await?
        .into_iter()
        .filter(|c| classes.contains(&c.spec.storage_class_name))
        .collect();

    let mut deps = DependentList::default();
    deps.add_all(&users);
    deps.add_all(&topics);
    deps.add_all(&claims);
    Ok(deps)
}

/// Adds every bucket the gateway still holds, claimed or not.
pub async fn add_store_buckets(
    admin: &dyn ObjectAdmin,
    store: &StoreContext,
    deps: &mut DependentList,
) -> Result<(), object::Error> {
    for bucket in admin.list_buckets(store).await? {
        deps.add(BUCKETS, bucket);
    }
    Ok(())
}

/// Records the blocked deletion on `resource`. The caller requeues; the finalizer stays.
pub async fn report_blocked<K>(
    ctx: &Context,
    resource: &K,
    deps: &DependentList,
) -> Result<String, context::Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + HasStatus
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
    K::Status: Conditioned + Default + Clone,
{
    let message = deps.blocked_message(&K::kind(&()), &resource.key());
    info!("{}", message);

    ctx.update_status(resource, |status| {
        status.set_phase(Phase::Deleting, Some(message.clone()));
        status.set_condition(Condition::new(
            ConditionType::DeletionIsBlocked,
            ConditionStatus::True,
            reason::OBJECT_HAS_DEPENDENTS,
            message.clone(),
        ));
    })
    .await?;
    ctx.record(resource, EventType::Warning, reason::OBJECT_HAS_DEPENDENTS, &message)
        .await?;
    Ok(message)
}

/// Records that deletion of `resource` may proceed.
pub async fn report_not_blocked<K>(ctx: &Context, resource: &K) -> Result<(), context::Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + HasStatus
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
    K::Status: Conditioned + Default + Clone,
{
    let kind = K::kind(&());
    let key = resource.key();
    let safe = format!("{kind} \"{key}\" can be deleted safely");
    info!("{}. deleting {} \"{}\"", safe, kind, key);

    ctx.update_status(resource, |status| {
        status.set_phase(Phase::Deleting, None);
        status.set_condition(Condition::new(
            ConditionType::DeletionIsBlocked,
            ConditionStatus::False,
            reason::OBJECT_HAS_NO_DEPENDENTS,
            safe.clone(),
        ));
    })
    .await?;
    ctx.record(
        resource,
        EventType::Normal,
        reason::DELETING,
        &format!("deleting {kind} \"{key}\""),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural_kind() {
        assert_eq!(plural_kind("CephBlockPool"), "CephBlockPools");
        assert_eq!(plural_kind("CephNFS"), "CephNFSes");
        assert_eq!(plural_kind("ObjectBucketClaim"), "ObjectBucketClaims");
    }

    #[test]
    fn test_blocked_message() {
        let mut deps = DependentList::default();
        deps.add("CephObjectStores", "store-b");
        deps.add("CephBlockPools", "replicapool");
        deps.add("CephObjectStores", "store-a");
        assert_eq!(
            deps.blocked_message("CephCluster", "rook-ceph/my-cluster"),
            "CephCluster \"rook-ceph/my-cluster\" will not be deleted until all dependents are removed: \
             CephBlockPools: [replicapool]. CephObjectStores: [store-a store-b]"
        );
    }

    #[tokio::test]
    async fn test_backend_buckets_block_store_deletion() {
        use crate::ceph::ClusterInfo;
        use crate::object::admin::MockObjectAdmin;
        use std::path::Path;

        let store = StoreContext::new(ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid"), "my-store");
        let mut admin = MockObjectAdmin::new();
        admin
            .expect_list_buckets()
            .times(1)
            .returning(|_| Ok(vec!["manual".to_owned(), "logs".to_owned()]));
        let mut deps = DependentList::default();
        add_store_buckets(&admin, &store, &mut deps).await.unwrap();
        assert!(!deps.is_empty());
        assert_eq!(deps.names(BUCKETS), ["logs", "manual"]);

        let mut admin = MockObjectAdmin::new();
        admin.expect_list_buckets().returning(|_| Ok(Vec::new()));
        let mut deps = DependentList::default();
        add_store_buckets(&admin, &store, &mut deps).await.unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_add_all_uses_kind() {
        let users = vec![
            crate::tests::create_test_user("alice", "my-store"),
            crate::tests::create_test_user("bob", "my-store"),
        ];
        let mut deps = DependentList::default();
        assert!(deps.is_empty());
        deps.add_all(&users);
        assert_eq!(deps.names("CephObjectStoreUsers"), ["alice", "bob"]);
        assert!(deps.names("CephBucketTopics").is_empty());
    }
}
