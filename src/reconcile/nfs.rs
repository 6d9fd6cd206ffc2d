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

use crate::context::Context;
use crate::error::{Error, InvariantSnafu};
use crate::reconcile::cluster::{self, Connection};
use crate::reconcile::{Outcome, apply_daemon_keyring, remove_daemon, run, running_daemon_ids, set_ready, surplus};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::nfs::{CephNFS, NFS_APP};
use crate::types::v1::pool::PoolSpec;
use crate::types::v1::status::{Phase, reason};
use crate::ceph;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use snafu::ensure;
use std::sync::Arc;
use tracing::info;

const INSTANCE_LABEL: &str = "instance";

async fn apply(ctx: &Context, nfs: &CephNFS) -> Result<Outcome, Error> {
    let ns = nfs.require_namespace()?;
    ensure!(
        nfs.spec.server.active >= 1,
        InvariantSnafu {
            message: "server.active must be at least 1"
        }
    );
    let (cluster, conn) = cluster::connect(ctx, &ns).await?;
    let exec = ctx.executor.as_ref();

    let pool = nfs.pool();
    ceph::pool::ensure(exec, &conn.info, &pool, &PoolSpec::default(), "nfs").await?;
    ceph::pool::ensure_object(
        exec,
        &conn.info,
        &pool,
        &nfs.rados_namespace(),
        &format!("conf-nfs.{}", nfs.name_any()),
    )
    .await?;

    let wanted = nfs.daemon_ids();
    for id in &wanted {
        apply_daemon_keyring(
            ctx,
            nfs,
            &conn,
            &nfs.ganesha_entity(id),
            "nfs",
            &nfs.keyring_secret(id),
            NFS_APP,
        )
        .await?;
        ctx.apply(&nfs.new_ganesha_configmap(id)?, &ns).await?;
        ctx.apply(&nfs.new_nfs_deployment(&cluster, id)?, &ns).await?;
        ctx.apply(&nfs.new_nfs_service(id)?, &ns).await?;
    }

    let selector = format!("app={NFS_APP},ceph_nfs={}", nfs.name_any());
    let existing = running_daemon_ids(ctx, &ns, &selector, INSTANCE_LABEL).await?;
    for id in surplus(&existing, &wanted) {
        info!("scaling down nfs server {}", nfs.daemon_name(&id));
        remove_server(ctx, &conn, nfs, &ns, &id).await?;
    }

    set_ready(
        ctx,
        nfs,
        Phase::Ready,
        reason::RECONCILE_SUCCEEDED,
        &format!("{} nfs servers exporting from pool {}", wanted.len(), pool),
    )
    .await?;
    Ok(Outcome::Done)
}

async fn remove_server(
    ctx: &Context,
    conn: &Connection,
    nfs: &CephNFS,
    ns: &str,
    id: &str,
) -> Result<(), Error> {
    let name = nfs.daemon_name(id);
    ctx.delete::<Service>(&name, ns).await?;
    ctx.delete::<ConfigMap>(&name, ns).await?;
    remove_daemon(ctx, conn, ns, &name, &nfs.keyring_secret(id), &nfs.ganesha_entity(id)).await
}

async fn cleanup(ctx: &Context, nfs: &CephNFS) -> Result<Outcome, Error> {
    let ns = nfs.require_namespace()?;
    if let Some(conn) = cluster::connect_for_cleanup(ctx, &ns).await? {
        for id in nfs.daemon_ids() {
            remove_server(ctx, &conn, nfs, &ns, &id).await?;
        }
    }
    info!("nfs {} removed", nfs.name_any());
    Ok(Outcome::Done)
}

pub async fn reconcile(nfs: Arc<CephNFS>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        nfs.as_ref(),
        async |n: &CephNFS| apply(&ctx, n).await,
        async |n: &CephNFS| cleanup(&ctx, n).await,
    )
    .await
}
