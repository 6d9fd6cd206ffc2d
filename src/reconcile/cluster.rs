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

//! CephCluster reconciler: identity, mons, mgrs, osds and health, in that order.

use crate::context::Context;
use crate::error::{DependencySnafu, Error, InvariantSnafu};
use crate::health::{self, StatusDetails};
use crate::keyring::{self, ClusterSecrets, MON_SECRET};
use crate::reconcile::{
    DEPENDENCY_REQUEUE, Outcome, external, finish, mgr, mon, osd, set_progressing, set_ready,
    upgrade,
};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::cluster::config::{MonEndpoints, render_ceph_conf};
use crate::types::v1::cluster::mon::{MON_APP, MONS_KEYRING_SECRET};
use crate::types::v1::cluster::{CephCluster, CephHealth, ClusterVersion, MAX_MON_COUNT};
use crate::types::v1::status::{Phase, now, reason};
use crate::{ceph, dependents};
use crate::ceph::ClusterInfo;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use snafu::ensure;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything the operator needs to run CLI calls against one cluster.
#[derive(Debug, Clone)]
pub struct Connection {
    pub info: ClusterInfo,
    pub secrets: ClusterSecrets,
}

/// Health check interval for `cluster`, honoring the per-cluster override.
pub fn health_interval(ctx: &Context, cluster: &CephCluster) -> Duration {
    cluster
        .spec
        .health_check
        .mon
        .interval_seconds
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.mon_healthcheck_interval())
}

pub fn validate(cluster: &CephCluster) -> Result<(), Error> {
    if cluster.is_external() {
        return Ok(());
    }
    let spec = &cluster.spec;
    ensure!(
        !spec.ceph_version.image.is_empty(),
        InvariantSnafu {
            message: "cephVersion.image must be set"
        }
    );
    ensure!(
        (1..=MAX_MON_COUNT).contains(&spec.mon.count),
        InvariantSnafu {
            message: format!("mon count must be between 1 and {MAX_MON_COUNT}, got {}", spec.mon.count)
        }
    );
    ensure!(
        (1..=2).contains(&spec.mgr.count),
        InvariantSnafu {
            message: format!("mgr count must be 1 or 2, got {}", spec.mgr.count)
        }
    );
    if spec.mon.count % 2 == 0 {
        warn!(
            "{} mons requested for {}; an odd count tolerates the same failures with one mon less",
            spec.mon.count,
            cluster.key()
        );
    }
    Ok(())
}

/// Reads `rook-ceph-mon`, creating it with a fresh identity on first use.
pub async fn ensure_secrets(ctx: &Context, cluster: &CephCluster) -> Result<ClusterSecrets, Error> {
    let ns = cluster.require_namespace()?;
    if let Some(secret) = ctx.get_opt::<Secret>(MON_SECRET, &ns).await? {
        return Ok(ClusterSecrets::from_secret(&secret)?);
    }

    let secrets = ClusterSecrets::generate(&ns)?;
    match ctx.create(&secrets.to_secret(cluster)?, &ns).await {
        Ok(_) => {
            info!("generated cluster identity for {} (fsid {})", ns, secrets.fsid);
            Ok(secrets)
        }
        Err(e) if e.is_conflict() => {
            let secret = ctx.get::<Secret>(MON_SECRET, &ns).await?;
            Ok(ClusterSecrets::from_secret(&secret)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Publishes the mon map to the endpoints and config ConfigMaps and to the
/// operator's own config directory.
pub async fn publish_config(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    endpoints: &MonEndpoints,
) -> Result<(), Error> {
    let ns = cluster.require_namespace()?;
    ctx.apply(&cluster.new_mon_endpoints_configmap(endpoints)?, &ns)
        .await?;
    ctx.apply(&cluster.new_config_configmap(&conn.info.fsid, endpoints)?, &ns)
        .await?;
    write_local_config(conn, &cluster.spec.network, endpoints).await
}

/// Writes `ceph.conf` and the admin keyring for the operator's CLI calls.
pub async fn write_local_config(
    conn: &Connection,
    network: &crate::types::v1::cluster::NetworkSpec,
    endpoints: &MonEndpoints,
) -> Result<(), Error> {
    let conf = render_ceph_conf(&conn.info.fsid, endpoints, network);
    keyring::write_config_files(&conn.info, &conf, &conn.secrets.admin_secret).await?;
    Ok(())
}

/// Connection to the ready cluster in `ns`, for resources that live on it.
pub async fn connect(ctx: &Context, ns: &str) -> Result<(CephCluster, Connection), Error> {
    let cluster = ctx
        .list::<CephCluster>(ns)
        .await?
        .into_iter()
        .find(|c| !c.is_deleting());
    let Some(cluster) = cluster else {
        return DependencySnafu {
            kind: "CephCluster",
            name: ns,
            reason: "no CephCluster in namespace",
        }
        .fail();
    };
    ensure!(
        cluster.ready_cluster(),
        DependencySnafu {
            kind: "CephCluster",
            name: cluster.key(),
            reason: "cluster is not ready",
        }
    );

    let Some(secret) = ctx.get_opt::<Secret>(MON_SECRET, ns).await? else {
        return DependencySnafu {
            kind: "Secret",
            name: MON_SECRET,
            reason: "cluster identity not created yet",
        }
        .fail();
    };
    let secrets = ClusterSecrets::from_secret(&secret)?;
    let conn = Connection {
        info: ClusterInfo::new(&ctx.config.config_dir, ns, &secrets.fsid),
        secrets,
    };
    let endpoints = mon::load_endpoints(ctx, ns).await?;
    write_local_config(&conn, &cluster.spec.network, &endpoints).await?;
    Ok((cluster, conn))
}

/// Connection for tearing down a dependent resource. Unlike [`connect`] it
/// accepts a cluster that is itself being deleted, and yields `None` when no
/// usable cluster is left, in which case there is nothing to clean up.
pub async fn connect_for_cleanup(ctx: &Context, ns: &str) -> Result<Option<Connection>, Error> {
    let cluster = ctx
        .list::<CephCluster>(ns)
        .await?
        .into_iter()
        .find(|c| c.ready_cluster());
    let Some(cluster) = cluster else {
        return Ok(None);
    };
    let Some(secret) = ctx.get_opt::<Secret>(MON_SECRET, ns).await? else {
        return Ok(None);
    };
    let secrets = ClusterSecrets::from_secret(&secret)?;
    let conn = Connection {
        info: ClusterInfo::new(&ctx.config.config_dir, ns, &secrets.fsid),
        secrets,
    };
    let endpoints = mon::load_endpoints(ctx, ns).await?;
    write_local_config(&conn, &cluster.spec.network, &endpoints).await?;
    Ok(Some(conn))
}

pub async fn refresh_health(ctx: &Context, conn: &Connection) -> Result<StatusDetails, Error> {
    let status = ceph::status::status(ctx.executor.as_ref(), &conn.info).await?;
    let quorum = ceph::status::quorum_status(ctx.executor.as_ref(), &conn.info).await?;
    Ok(health::aggregate(&status, &quorum))
}

pub async fn record_health(
    ctx: &Context,
    cluster: &CephCluster,
    details: &StatusDetails,
) -> Result<CephCluster, Error> {
    let operator_version = crate::operator_version();
    let spec_image = cluster.spec.ceph_version.image.clone();
    Ok(ctx
        .update_status(cluster, |status| {
            let unchanged = status
                .ceph
                .as_ref()
                .is_some_and(|c| c.health == details.health && c.details.as_ref() == Some(details));
            if !unchanged {
                status.ceph = Some(CephHealth {
                    health: details.health.clone(),
                    last_checked: Some(now()),
                    details: Some(details.clone()),
                });
            }
            if status.version.is_none() && !spec_image.is_empty() {
                status.version = Some(ClusterVersion {
                    image: spec_image.clone(),
                    version: None,
                });
            }
            if status.operator_version.is_none() {
                status.operator_version = Some(operator_version.to_owned());
            }
        })
        .await?)
}

async fn reconcile_cluster(ctx: &Context, cluster: &CephCluster) -> Result<Outcome, Error> {
    let key = cluster.key();
    let cancel = ctx.cancellations.token(&cluster.lock_key());

    if cluster.is_external() {
        return external::reconcile(ctx, cluster, &cancel).await;
    }
    validate(cluster)?;

    let ns = cluster.require_namespace()?;
    if cluster.status.as_ref().and_then(|s| s.phase).is_none() {
        set_progressing(ctx, cluster, reason::CLUSTER_PROGRESSING, "Configuring Ceph Mons").await?;
    }

    let secrets = ensure_secrets(ctx, cluster).await?;
    ctx.apply(
        &keyring::new_keyring_secret(cluster, MONS_KEYRING_SECRET, MON_APP, &ns, secrets.mons_keyring()),
        &ns,
    )
    .await?;
    let conn = Connection {
        info: ClusterInfo::new(&ctx.config.config_dir, &ns, &secrets.fsid),
        secrets,
    };
    let endpoints = mon::load_endpoints(ctx, &ns).await?;
    publish_config(ctx, cluster, &conn, &endpoints).await?;

    if !endpoints.endpoints.is_empty() && upgrade::needed(cluster, crate::operator_version()) {
        return upgrade::reconcile(ctx, cluster, &conn, &cancel).await;
    }

    let mons = mon::reconcile(ctx, cluster, &conn, &cancel).await?;
    if endpoints.endpoints.is_empty() {
        debug!("first mon of {} created, continuing on the next pass", key);
        return Ok(mons);
    }

    let mgrs = mgr::reconcile(ctx, cluster, &conn).await?;
    let osds = osd::reconcile(ctx, cluster, &conn, &cancel).await?;

    let details = refresh_health(ctx, &conn).await?;
    let cluster = record_health(ctx, cluster, &details).await?;

    let outcome = mons.merge(mgrs).merge(osds);
    if outcome == Outcome::Done {
        let problems = health::unhealthy_reasons(&details, cluster.spec.mon.count);
        let message = if problems.is_empty() {
            "Cluster created successfully".to_owned()
        } else {
            format!("Cluster created, health: {}", problems.join("; "))
        };
        set_ready(ctx, &cluster, Phase::Ready, reason::CLUSTER_CREATED, &message).await?;
    }

    Ok(outcome.merge(Outcome::RequeueAfter(health_interval(ctx, &cluster))))
}

async fn cleanup(ctx: &Context, cluster: &CephCluster) -> Result<Action, Error> {
    let key = cluster.key();
    let deps = dependents::of_cluster(ctx, cluster).await?;
    if !deps.is_empty() {
        dependents::report_blocked(ctx, cluster, &deps).await?;
        return Ok(Action::requeue(DEPENDENCY_REQUEUE));
    }
    dependents::report_not_blocked(ctx, cluster).await?;

    ctx.mon_tracker.forget(&key);
    ctx.cancellations.remove(&cluster.lock_key());
    ctx.retries.reset(&cluster.lock_key());
    ctx.remove_finalizer(cluster).await?;
    info!("cluster {} released", key);
    Ok(Action::await_change())
}

pub async fn reconcile(cluster: Arc<CephCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = cluster.require_namespace()?;
    let key = cluster.lock_key();

    // stop in-flight creation before waiting for the orchestration lock
    if cluster.is_deleting() {
        ctx.cancellations.cancel(&key);
    }
    let _guard = ctx.locks.lock(&key).await;

    let Some(latest) = ctx.get_opt::<CephCluster>(&cluster.name_any(), &ns).await? else {
        debug!("cluster {} is gone", cluster.key());
        return Ok(Action::await_change());
    };

    if latest.is_deleting() {
        return match cleanup(&ctx, &latest).await {
            Ok(action) => Ok(action),
            Err(e) => finish(&ctx, &latest, Err(e)).await,
        };
    }

    let latest = ctx.add_finalizer(&latest).await?;
    let result = reconcile_cluster(&ctx, &latest).await;
    finish(&ctx, &latest, result).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_counts() {
        let mut cluster = crate::tests::create_test_cluster(3);
        assert!(validate(&cluster).is_ok());

        cluster.spec.mon.count = 0;
        assert!(validate(&cluster).is_err());

        cluster.spec.mon.count = 10;
        assert!(validate(&cluster).is_err());

        cluster.spec.mon.count = 2;
        assert!(validate(&cluster).is_ok());

        cluster.spec.mgr.count = 3;
        assert!(validate(&cluster).is_err());
    }

    #[test]
    fn test_validate_requires_image_unless_external() {
        let mut cluster = crate::tests::create_test_cluster(3);
        cluster.spec.ceph_version.image.clear();
        assert!(validate(&cluster).is_err());

        cluster.spec.external.enable = true;
        assert!(validate(&cluster).is_ok());
    }
}
