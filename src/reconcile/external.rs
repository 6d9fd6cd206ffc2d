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

//! Clusters managed outside this operator: import endpoints and credentials,
//! verify connectivity, and expose the same status surface.

use crate::context::Context;
use crate::error::{DependencySnafu, Error};
use crate::keyring::{ClusterSecrets, MON_SECRET};
use crate::reconcile::cluster::{Connection, health_interval, record_health, refresh_health, write_local_config};
use crate::reconcile::{Outcome, mon, set_ready};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::cluster::CephCluster;
use crate::types::v1::cluster::config::MON_ENDPOINTS_CONFIGMAP;
use crate::types::v1::status::{
    Condition, ConditionStatus, ConditionType, Conditioned, Phase, is_condition_true, reason,
};
use crate::ceph::ClusterInfo;
use k8s_openapi::api::core::v1::Secret;
use snafu::ensure;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn connected(cluster: &CephCluster) -> bool {
    cluster
        .status
        .as_ref()
        .is_some_and(|s| is_condition_true(&s.conditions, ConditionType::Connected))
}

pub async fn reconcile(
    ctx: &Context,
    cluster: &CephCluster,
    cancel: &CancellationToken,
) -> Result<Outcome, Error> {
    let ns = cluster.require_namespace()?;

    if !connected(cluster) {
        ctx.update_status(cluster, |status| {
            status.set_phase(Phase::Connecting, Some("Attempting to connect to an external Ceph cluster".to_owned()));
            status.set_condition(Condition::new(
                ConditionType::Connecting,
                ConditionStatus::True,
                reason::CLUSTER_CONNECTING,
                "Attempting to connect to an external Ceph cluster",
            ));
        })
        .await?;
    }

    let endpoints = mon::load_endpoints(ctx, &ns).await?;
    ensure!(
        !endpoints.endpoints.is_empty(),
        DependencySnafu {
            kind: "ConfigMap",
            name: MON_ENDPOINTS_CONFIGMAP,
            reason: "no mon endpoints imported",
        }
    );
    let Some(secret) = ctx.get_opt::<Secret>(MON_SECRET, &ns).await? else {
        return DependencySnafu {
            kind: "Secret",
            name: MON_SECRET,
            reason: "external cluster credentials not imported",
        }
        .fail();
    };
    let secrets = ClusterSecrets::from_secret(&secret)?;
    let conn = Connection {
        info: ClusterInfo::new(&ctx.config.config_dir, &ns, &secrets.fsid),
        secrets,
    };

    ctx.apply(&cluster.new_config_configmap(&conn.info.fsid, &endpoints)?, &ns)
        .await?;
    write_local_config(&conn, &cluster.spec.network, &endpoints).await?;
    if cancel.is_cancelled() {
        return Ok(Outcome::Done);
    }

    let details = refresh_health(ctx, &conn).await?;
    let was_connected = connected(cluster);
    let cluster = record_health(ctx, cluster, &details).await?;
    let cluster = ctx
        .update_status(&cluster, |status| {
            status.set_condition(Condition::new(
                ConditionType::Connecting,
                ConditionStatus::False,
                reason::CLUSTER_CONNECTED,
                "",
            ));
            status.set_condition(Condition::new(
                ConditionType::Connected,
                ConditionStatus::True,
                reason::CLUSTER_CONNECTED,
                "Cluster connected successfully",
            ));
        })
        .await?;
    set_ready(
        ctx,
        &cluster,
        Phase::Connected,
        reason::CLUSTER_CONNECTED,
        &format!("Cluster connected, health {}", details.health),
    )
    .await?;
    if !was_connected {
        info!("connected to external cluster {} (fsid {})", cluster.key(), conn.info.fsid);
    }

    Ok(Outcome::RequeueAfter(health_interval(ctx, &cluster)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::v1::cluster::ClusterStatus;

    #[test]
    fn test_connected_reads_condition() {
        let mut cluster = crate::tests::create_test_cluster(3);
        cluster.spec.external.enable = true;
        assert!(!connected(&cluster));

        let mut status = ClusterStatus::default();
        status.set_condition(Condition::new(
            ConditionType::Connected,
            ConditionStatus::True,
            reason::CLUSTER_CONNECTED,
            "",
        ));
        cluster.status = Some(status);
        assert!(connected(&cluster));
    }
}
