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

use crate::ceph::{CephExecutor, CommandExecutor};
use crate::config::OperatorConfig;
use crate::object::{ObjectAdmin, RadosGwAdmin, S3Agent, S3Api};
use crate::reconcile::mon::MonTracker;
use crate::types;
use crate::utils::lock::{Cancellations, EndpointLimits, KeyedLocks, Retries};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::object::HasStatus;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt, api::Api};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::Snafu;
use snafu::futures::TryFutureExt;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info};

pub const FIELD_MANAGER: &str = "rook-ceph-operator";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self.api_code(), Some(400) | Some(422)) || matches!(self, Error::Types { .. })
    }
}

/// Finalizer owned by the operator on resources of kind `K`.
pub fn finalizer_name<K: Resource<DynamicType = ()>>() -> String {
    format!("{}.ceph.rook.io", K::kind(&()).to_lowercase())
}

pub struct Context {
    pub(crate) client: kube::Client,
    pub(crate) recorder: Recorder,
    pub(crate) config: OperatorConfig,
    pub(crate) executor: Arc<dyn CephExecutor>,
    pub(crate) object_admin: Arc<dyn ObjectAdmin>,
    pub(crate) s3: Arc<dyn S3Api>,
    pub(crate) locks: KeyedLocks,
    pub(crate) cancellations: Cancellations,
    pub(crate) retries: Retries,
    pub(crate) mon_tracker: MonTracker,
}

impl Context {
    pub fn new(client: kube::Client, config: OperatorConfig) -> Self {
        let executor: Arc<dyn CephExecutor> = Arc::new(CommandExecutor::new(
            config.ceph_bin_dir.clone(),
            config.command_timeout(),
        ));
        let limits = EndpointLimits::new(config.admin_concurrency);
        let object_admin = Arc::new(RadosGwAdmin::new(executor.clone(), limits.clone()));
        let s3 = Arc::new(S3Agent::new(limits));
        Self::with_backends(client, config, executor, object_admin, s3)
    }

    pub fn with_backends(
        client: kube::Client,
        config: OperatorConfig,
        executor: Arc<dyn CephExecutor>,
        object_admin: Arc<dyn ObjectAdmin>,
        s3: Arc<dyn S3Api>,
    ) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            recorder,
            config,
            executor,
            object_admin,
            s3,
            locks: KeyedLocks::default(),
            cancellations: Cancellations::default(),
            retries: Retries::default(),
            mon_tracker: MonTracker::default(),
        }
    }

    /// send event
    #[inline]
    pub async fn record<K>(
        &self,
        resource: &K,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error>
    where
        K: Resource<DynamicType = ()>,
    {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.to_owned(),
                    note: Some(message.into()),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &resource.object_ref(&()),
            )
            .context(RecordSnafu)
            .await
    }

    /// Applies `mutate` to the latest status of `resource` and writes it through the
    /// status subresource, retrying once on a conflict. Nothing is written when
    /// `mutate` leaves the status as it was.
    pub async fn update_status<K, F>(&self, resource: &K, mutate: F) -> Result<K, Error>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + HasStatus
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
        K::Status: Default + Clone,
        F: Fn(&mut K::Status),
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &types::v1::ResourceIdentity::require_namespace(resource)?);
        let name = resource.name_any();

        let update_func = async |obj: &K| {
            let mut status = obj.status().cloned().unwrap_or_default();
            mutate(&mut status);
            let mut body = obj.clone();
            *body.status_mut() = Some(status);
            if !status_changed(obj, &body)? {
                return Ok(obj.clone());
            }
            let status_body = serde_json::to_vec(&body)?;

            api.replace_status(&name, &PostParams::default(), status_body)
                .context(KubeSnafu)
                .await
        };

        match update_func(resource).await {
            Err(e) if e.is_conflict() => {}
            other => return other,
        }

        info!("status update failed due to conflict, retrieve the latest resource and retry.");

        let new_one = api.get(&name).context(KubeSnafu).await?;
        update_func(&new_one).await
    }

    pub async fn delete<T>(&self, name: &str, namespace: &str) -> Result<(), Error>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).context(KubeSnafu).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    pub async fn get<T>(&self, name: &str, namespace: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).context(KubeSnafu).await
    }

    pub async fn get_opt<T>(&self, name: &str, namespace: &str) -> Result<Option<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).context(KubeSnafu).await
    }

    /// Cluster-scoped lookup, e.g. StorageClasses.
    pub async fn get_global_opt<T>(&self, name: &str) -> Result<Option<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        api.get_opt(name).context(KubeSnafu).await
    }

    pub async fn create<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    pub async fn list<T>(&self, namespace: &str) -> Result<Vec<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        self.list_labeled(namespace, None).await
    }

    pub async fn list_labeled<T>(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        let params = match selector {
            Some(s) => ListParams::default().labels(s),
            None => ListParams::default(),
        };
        Ok(api.list(&params).context(KubeSnafu).await?.items)
    }

    /// Lists a resource across namespaces, or cluster-scoped resources such as Nodes.
    pub async fn list_global<T>(&self) -> Result<Vec<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).context(KubeSnafu).await?.items)
    }

    pub async fn apply<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &resource.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(resource),
        )
        .context(KubeSnafu)
        .await
    }

    /// Merge-patches labels or annotations onto an existing object.
    pub async fn patch_merge<T>(&self, name: &str, namespace: &str, patch: serde_json::Value) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .context(KubeSnafu)
            .await
    }

    /// Strategic-merge patch, e.g. container images keyed by container name.
    pub async fn patch_strategic<T>(&self, name: &str, namespace: &str, patch: serde_json::Value) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .context(KubeSnafu)
            .await
    }

    /// Adds the operator finalizer unless present. Returns the updated object.
    pub async fn add_finalizer<K>(&self, resource: &K) -> Result<K, Error>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    {
        let finalizer = finalizer_name::<K>();
        if resource.finalizers().iter().any(|f| f == &finalizer) {
            return Ok(resource.clone());
        }
        let mut finalizers = resource.finalizers().to_vec();
        finalizers.push(finalizer);
        debug!("adding finalizer to {}", resource.name_any());
        self.set_finalizers(resource, finalizers).await
    }

    pub async fn remove_finalizer<K>(&self, resource: &K) -> Result<(), Error>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    {
        let finalizer = finalizer_name::<K>();
        if !resource.finalizers().iter().any(|f| f == &finalizer) {
            return Ok(());
        }
        let finalizers: Vec<String> = resource
            .finalizers()
            .iter()
            .filter(|f| **f != finalizer)
            .cloned()
            .collect();
        debug!("removing finalizer from {}", resource.name_any());
        match self.set_finalizers(resource, finalizers).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn set_finalizers<K>(&self, resource: &K, finalizers: Vec<String>) -> Result<K, Error>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    {
        let ns = types::v1::ResourceIdentity::require_namespace(resource)?;
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": resource.resource_version(),
                "finalizers": finalizers,
            }
        });
        self.patch_merge::<K>(&resource.name_any(), &ns, patch).await
    }
}

/// Compares the serialized forms, so an absent status and a defaulted one
/// that serializes to the same fields count as equal.
fn status_changed<K: Serialize>(before: &K, after: &K) -> Result<bool, serde_json::Error> {
    Ok(serde_json::to_value(before)? != serde_json::to_value(after)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::v1::bucket_claim::ObjectBucketClaim;
    use crate::types::v1::cluster::CephCluster;

    #[test]
    fn test_finalizer_names() {
        assert_eq!(finalizer_name::<CephCluster>(), "cephcluster.ceph.rook.io");
        assert_eq!(
            finalizer_name::<ObjectBucketClaim>(),
            "objectbucketclaim.ceph.rook.io"
        );
    }

    #[test]
    fn test_repeated_ready_leaves_status_unchanged() {
        use crate::types::v1::status::{Condition, ConditionStatus, ConditionType, Conditioned, Phase};

        let mutate = |status: &mut crate::types::v1::bucket_claim::BucketClaimStatus| {
            status.set_phase(Phase::Ready, None);
            status.set_condition(Condition::new(
                ConditionType::Ready,
                ConditionStatus::True,
                "ReconcileSucceeded",
                "bucket photos bound to alice",
            ));
        };

        let mut claim = crate::tests::create_test_claim("photos", Some("alice"));
        let before = claim.clone();
        mutate(claim.status.get_or_insert_default());
        assert!(status_changed(&before, &claim).unwrap());

        let settled = claim.clone();
        mutate(claim.status.get_or_insert_default());
        assert!(!status_changed(&settled, &claim).unwrap());
    }
}
