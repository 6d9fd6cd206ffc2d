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

//! Per-kind reconcilers and the plumbing that turns their outcome into status and requeues.

pub mod block_pool;
pub mod bucket;
pub mod certificate;
pub mod cluster;
pub mod external;
pub mod filesystem;
pub mod mgr;
pub mod mon;
pub mod nfs;
pub mod notification;
pub mod object_store;
pub mod object_user;
pub mod osd;
pub mod rbd_mirror;
pub mod topic;
pub mod upgrade;

use crate::context::{Context, finalizer_name};
use crate::error::{Error, ErrorKind};
use crate::reconcile::cluster::Connection;
use crate::types::v1::ResourceIdentity;
use crate::types::v1::status::{Condition, ConditionStatus, ConditionType, Conditioned, Phase, reason};
use crate::{ceph, keyring};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use kube::core::object::HasStatus;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// Requeue interval after a reported Failure.
pub const FAILURE_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue interval while waiting on another object.
pub const DEPENDENCY_REQUEUE: Duration = Duration::from_secs(10);

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; wait for the next change.
    Done,
    /// Not converged yet, or converged but needs periodic attention.
    RequeueAfter(Duration),
    /// Cannot make progress. `reason` is a stable PascalCase token, backend
    /// detail goes into `message`.
    Failure { reason: String, message: String },
}

impl Outcome {
    pub fn failure(reason: &str, message: impl Into<String>) -> Self {
        Outcome::Failure {
            reason: reason.to_owned(),
            message: message.into(),
        }
    }

    /// Combines the outcomes of independent steps: a failure wins, then the
    /// earliest requeue.
    pub fn merge(self, other: Outcome) -> Outcome {
        match (self, other) {
            (failure @ Outcome::Failure { .. }, _) | (_, failure @ Outcome::Failure { .. }) => failure,
            (Outcome::RequeueAfter(a), Outcome::RequeueAfter(b)) => Outcome::RequeueAfter(a.min(b)),
            (requeue @ Outcome::RequeueAfter(_), Outcome::Done)
            | (Outcome::Done, requeue @ Outcome::RequeueAfter(_)) => requeue,
            (Outcome::Done, Outcome::Done) => Outcome::Done,
        }
    }
}

/// Marks `resource` Ready with `phase` and records the observed generation.
pub async fn set_ready<K>(
    ctx: &Context,
    resource: &K,
    phase: Phase,
    reason: &str,
    message: &str,
) -> Result<K, Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + HasStatus
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
    K::Status: Conditioned + Default + Clone,
{
    let generation = resource.meta().generation;
    Ok(ctx
        .update_status(resource, |status| {
            status.set_phase(phase, None);
            status.set_observed_generation(generation);
            status.set_condition(Condition::new(
                ConditionType::Ready,
                ConditionStatus::True,
                reason,
                message,
            ));
        })
        .await?)
}

pub async fn set_progressing<K>(
    ctx: &Context,
    resource: &K,
    reason: &str,
    message: &str,
) -> Result<K, Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + HasStatus
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
    K::Status: Conditioned + Default + Clone,
{
    Ok(ctx
        .update_status(resource, |status| {
            status.set_phase(Phase::Progressing, Some(message.to_owned()));
            status.set_condition(Condition::new(
                ConditionType::Progressing,
                ConditionStatus::True,
                reason,
                message,
            ));
        })
        .await?)
}

async fn set_failure<K>(ctx: &Context, resource: &K, reason: &str, message: &str) -> Result<(), Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + HasStatus
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
    K::Status: Conditioned + Default + Clone,
{
    ctx.update_status(resource, |status| {
        status.set_phase(Phase::Failure, Some(message.to_owned()));
        status.set_condition(Condition::new(
            ConditionType::Failure,
            ConditionStatus::True,
            reason,
            message,
        ));
    })
    .await?;
    ctx.record(resource, EventType::Warning, reason, message).await?;
    Ok(())
}

/// Writes the pass result into the status of `resource` and converts it into
/// a controller action. Errors are returned for `error_policy` after their
/// kind-specific status has been written; transient ones leave status alone.
pub async fn finish<K>(ctx: &Context, resource: &K, result: Result<Outcome, Error>) -> Result<Action, Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + HasStatus
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
    K::Status: Conditioned + Default + Clone,
{
    let key = resource.key();
    match result {
        Ok(outcome) => {
            ctx.retries.reset(&resource.lock_key());
            match outcome {
                Outcome::Done => Ok(Action::await_change()),
                Outcome::RequeueAfter(after) => {
                    debug!("{} requeued after {:?}", key, after);
                    Ok(Action::requeue(after))
                }
                Outcome::Failure { reason, message } => {
                    warn!("{} failed: {}: {}", key, reason, message);
                    set_failure(ctx, resource, &reason, &message).await?;
                    Ok(Action::requeue(FAILURE_REQUEUE))
                }
            }
        }
        Err(e) => {
            let written = match e.kind() {
                ErrorKind::Transient => Ok(()),
                ErrorKind::Dependency => set_progressing(ctx, resource, reason::WAITING_FOR_DEPENDENCY, &e.to_string())
                    .await
                    .map(|_| ()),
                _ => set_failure(ctx, resource, e.reason(), &e.to_string()).await,
            };
            if let Err(status_err) = written {
                warn!("{}: could not record error in status: {}", key, status_err);
            }
            Err(e)
        }
    }
}

/// Drives one pass for a dependent resource: serializes on its key, reloads
/// it, and runs `cleanup` once deletion started or `apply` otherwise. The
/// finalizer comes off only after `cleanup` returns [`Outcome::Done`].
pub async fn run<K>(
    ctx: &Context,
    resource: &K,
    apply: impl AsyncFnOnce(&K) -> Result<Outcome, Error>,
    cleanup: impl AsyncFnOnce(&K) -> Result<Outcome, Error>,
) -> Result<Action, Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + HasStatus
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
    K::Status: Conditioned + Default + Clone,
{
    let ns = resource.require_namespace()?;
    let key = resource.lock_key();
    if resource.is_deleting() {
        ctx.cancellations.cancel(&key);
    }
    let guard = ctx.locks.lock(&key).await;

    let Some(latest) = ctx.get_opt::<K>(&resource.name_any(), &ns).await? else {
        debug!("{} is gone", resource.key());
        forget(ctx, &key, guard);
        return Ok(Action::await_change());
    };

    if latest.is_deleting() {
        if !latest.finalizers().contains(&finalizer_name::<K>()) {
            return Ok(Action::await_change());
        }
        let result = cleanup(&latest).await;
        if matches!(result, Ok(Outcome::Done)) {
            ctx.remove_finalizer(&latest).await?;
            forget(ctx, &key, guard);
            debug!("{} released", latest.key());
            return Ok(Action::await_change());
        }
        return finish(ctx, &latest, result).await;
    }

    let latest = ctx.add_finalizer(&latest).await?;
    let result = apply(&latest).await;
    finish(ctx, &latest, result).await
}

/// Drops the lock, token and retry count kept for `key`.
fn forget(ctx: &Context, key: &str, guard: OwnedMutexGuard<()>) {
    drop(guard);
    ctx.locks.forget(key);
    ctx.cancellations.remove(key);
    ctx.retries.reset(key);
}

/// Creates (or reads) the cephx key for `entity` and stores its keyring in Secret `secret_name`.
pub async fn apply_daemon_keyring<K: ResourceIdentity>(
    ctx: &Context,
    owner: &K,
    conn: &Connection,
    entity: &str,
    daemon: &str,
    secret_name: &str,
    app: &str,
) -> Result<(), Error> {
    let caps = ceph::auth::daemon_caps(daemon);
    let key = ceph::auth::get_or_create_key(ctx.executor.as_ref(), &conn.info, entity, &caps).await?;
    let secret = keyring::new_keyring_secret(
        owner,
        secret_name,
        app,
        &conn.info.namespace,
        keyring::keyring(entity, &key, &caps),
    );
    ctx.apply(&secret, &owner.require_namespace()?).await?;
    Ok(())
}

/// Deletes a daemon Deployment, its keyring Secret and its cephx identity.
pub async fn remove_daemon(
    ctx: &Context,
    conn: &Connection,
    ns: &str,
    deployment: &str,
    secret: &str,
    entity: &str,
) -> Result<(), Error> {
    ctx.delete::<Deployment>(deployment, ns).await?;
    ctx.delete::<Secret>(secret, ns).await?;
    ceph::auth::delete(ctx.executor.as_ref(), &conn.info, entity).await?;
    debug!("removed daemon {}", entity);
    Ok(())
}

/// Daemon ids on the Deployments matching `selector`, read from label `id_label`.
pub async fn running_daemon_ids(
    ctx: &Context,
    ns: &str,
    selector: &str,
    id_label: &str,
) -> Result<Vec<String>, Error> {
    let mut ids: Vec<String> = ctx
        .list_labeled::<Deployment>(ns, Some(selector))
        .await?
        .iter()
        .filter_map(|d| d.metadata.labels.as_ref()?.get(id_label).cloned())
        .collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// Ids present in `existing` but not in `wanted`.
pub fn surplus(existing: &[String], wanted: &[String]) -> Vec<String> {
    existing
        .iter()
        .filter(|id| !wanted.contains(id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_outcome() {
        assert_eq!(
            Outcome::failure("MonPlacementFailed", "no node"),
            Outcome::Failure {
                reason: "MonPlacementFailed".to_owned(),
                message: "no node".to_owned()
            }
        );
    }

    #[test]
    fn test_surplus() {
        let existing = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let wanted = vec!["a".to_owned()];
        assert_eq!(surplus(&existing, &wanted), ["b", "c"]);
        assert!(surplus(&wanted, &existing).is_empty());
    }

    #[test]
    fn test_merge_prefers_failure_then_earliest_requeue() {
        let soon = Outcome::RequeueAfter(Duration::from_secs(5));
        let later = Outcome::RequeueAfter(Duration::from_secs(45));
        assert_eq!(Outcome::Done.merge(Outcome::Done), Outcome::Done);
        assert_eq!(later.clone().merge(soon.clone()), soon);
        assert_eq!(Outcome::Done.merge(later.clone()), later);

        let failed = Outcome::failure("OsdProvisionFailed", "job failed");
        assert_eq!(soon.merge(failed.clone()), failed);
        assert_eq!(failed.clone().merge(Outcome::Done), failed);
    }
}
