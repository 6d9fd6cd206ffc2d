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
use crate::types::v1::filesystem::{CephFilesystem, MDS_APP};
use crate::types::v1::status::{Phase, reason};
use crate::ceph;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use snafu::ensure;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const MDS_ID_LABEL: &str = "mds";
const MDS_POLL: Duration = Duration::from_secs(15);

fn mds_entity(id: &str) -> String {
    format!("mds.{id}")
}

fn validate(fs: &CephFilesystem) -> Result<(), String> {
    if fs.spec.data_pools.is_empty() {
        return Err("at least one data pool is required".to_owned());
    }
    if fs.spec.metadata_server.active_count < 1 {
        return Err("metadataServer.activeCount must be at least 1".to_owned());
    }
    fs.spec.metadata_pool.validate()?;
    for pool in &fs.spec.data_pools {
        pool.pool.validate()?;
    }
    let mut names = fs.data_pool_names();
    names.sort();
    names.dedup();
    if names.len() != fs.spec.data_pools.len() {
        return Err("data pool names must be unique".to_owned());
    }
    Ok(())
}

async fn apply(ctx: &Context, fs: &CephFilesystem) -> Result<Outcome, Error> {
    let ns = fs.require_namespace()?;
    validate(fs).map_err(|message| InvariantSnafu { message }.build())?;
    let (cluster, conn) = cluster::connect(ctx, &ns).await?;
    let exec = ctx.executor.as_ref();
    let name = fs.name_any();

    let metadata = fs.metadata_pool_name();
    ceph::pool::ensure(exec, &conn.info, &metadata, &fs.spec.metadata_pool, "cephfs").await?;
    let data = fs.data_pool_names();
    for (pool, spec) in data.iter().zip(&fs.spec.data_pools) {
        ceph::pool::ensure(exec, &conn.info, pool, &spec.pool, "cephfs").await?;
    }
    ceph::fs::ensure(exec, &conn.info, &name, &metadata, &data).await?;
    ceph::fs::set_mds_counts(
        exec,
        &conn.info,
        &name,
        fs.spec.metadata_server.active_count,
        fs.spec.metadata_server.active_standby,
    )
    .await?;

    let wanted = fs.mds_ids();
    for id in &wanted {
        apply_daemon_keyring(
            ctx,
            fs,
            &conn,
            &mds_entity(id),
            "mds",
            &CephFilesystem::mds_keyring_secret(id),
            MDS_APP,
        )
        .await?;
        ctx.apply(&fs.new_mds_deployment(&cluster, id)?, &ns).await?;
    }

    let selector = format!("app={MDS_APP},rook_file_system={name}");
    let existing = running_daemon_ids(ctx, &ns, &selector, MDS_ID_LABEL).await?;
    for id in surplus(&existing, &wanted) {
        info!("scaling down mds {}", id);
        remove_mds(ctx, &conn, &ns, &id).await?;
    }

    let active = ceph::fs::status(exec, &conn.info, &name).await?.active_count();
    if active == 0 {
        debug!("filesystem {} has no active mds yet", name);
        return Ok(Outcome::RequeueAfter(MDS_POLL));
    }

    set_ready(
        ctx,
        fs,
        Phase::Ready,
        reason::RECONCILE_SUCCEEDED,
        &format!("filesystem {name} has {active} active mds"),
    )
    .await?;
    Ok(Outcome::Done)
}

async fn remove_mds(ctx: &Context, conn: &Connection, ns: &str, id: &str) -> Result<(), Error> {
    remove_daemon(
        ctx,
        conn,
        ns,
        &format!("{MDS_APP}-{id}"),
        &CephFilesystem::mds_keyring_secret(id),
        &mds_entity(id),
    )
    .await
}

async fn cleanup(ctx: &Context, fs: &CephFilesystem) -> Result<Outcome, Error> {
    let ns = fs.require_namespace()?;
    let Some(conn) = cluster::connect_for_cleanup(ctx, &ns).await? else {
        return Ok(Outcome::Done);
    };
    let exec = ctx.executor.as_ref();
    let name = fs.name_any();

    for id in fs.mds_ids() {
        remove_mds(ctx, &conn, &ns, &id).await?;
    }
    ceph::fs::remove(exec, &conn.info, &name).await?;
    if fs.spec.preserve_pools_on_delete {
        info!("filesystem {} removed, pools preserved", name);
        return Ok(Outcome::Done);
    }
    for pool in fs.data_pool_names() {
        ceph::pool::delete(exec, &conn.info, &pool).await?;
    }
    ceph::pool::delete(exec, &conn.info, &fs.metadata_pool_name()).await?;
    info!("filesystem {} and its pools removed", name);
    Ok(Outcome::Done)
}

pub async fn reconcile(fs: Arc<CephFilesystem>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        fs.as_ref(),
        async |f: &CephFilesystem| apply(&ctx, f).await,
        async |f: &CephFilesystem| cleanup(&ctx, f).await,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::v1::filesystem::NamedPoolSpec;

    #[test]
    fn test_validate_requires_data_pool() {
        let mut fs = crate::tests::create_test_filesystem("myfs");
        assert!(validate(&fs).is_ok());

        fs.spec.data_pools.clear();
        assert!(validate(&fs).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_pool_names() {
        let mut fs = crate::tests::create_test_filesystem("myfs");
        let named = NamedPoolSpec {
            name: Some("replicated".to_owned()),
            pool: Default::default(),
        };
        fs.spec.data_pools = vec![named.clone(), named];
        assert_eq!(
            validate(&fs),
            Err("data pool names must be unique".to_owned())
        );
    }

    #[test]
    fn test_mds_entity() {
        assert_eq!(mds_entity("myfs-a"), "mds.myfs-a");
    }
}
