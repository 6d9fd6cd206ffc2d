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
use crate::reconcile::cluster;
use crate::reconcile::{Outcome, run, set_ready};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::block_pool::CephBlockPool;
use crate::types::v1::status::{Phase, reason};
use crate::ceph;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::sync::Arc;
use tracing::{info, warn};

pub const POOL_IN_USE: &str = "PoolInUse";

/// Mirroring mode to enable, if any.
pub fn mirroring_mode(pool: &CephBlockPool) -> Result<Option<&str>, String> {
    let Some(mirroring) = pool.spec.mirroring.as_ref().filter(|m| m.enabled) else {
        return Ok(None);
    };
    match mirroring.mode.as_deref().unwrap_or("image") {
        mode @ ("pool" | "image") => Ok(Some(mode)),
        other => Err(format!("mirroring mode must be pool or image, got {other:?}")),
    }
}

async fn apply(ctx: &Context, pool: &CephBlockPool) -> Result<Outcome, Error> {
    let ns = pool.require_namespace()?;
    pool.spec
        .pool
        .validate()
        .map_err(|message| InvariantSnafu { message }.build())?;
    let mode = mirroring_mode(pool).map_err(|message| InvariantSnafu { message }.build())?;

    let (_, conn) = cluster::connect(ctx, &ns).await?;
    let exec = ctx.executor.as_ref();
    let name = pool.name_any();
    ceph::pool::ensure(exec, &conn.info, &name, &pool.spec.pool, "rbd").await?;
    if let Some(mode) = mode {
        ceph::pool::enable_mirroring(exec, &conn.info, &name, mode).await?;
    }

    set_ready(ctx, pool, Phase::Ready, reason::RECONCILE_SUCCEEDED, "pool created").await?;
    Ok(Outcome::Done)
}

async fn cleanup(ctx: &Context, pool: &CephBlockPool) -> Result<Outcome, Error> {
    let ns = pool.require_namespace()?;
    let Some(conn) = cluster::connect_for_cleanup(ctx, &ns).await? else {
        return Ok(Outcome::Done);
    };
    let exec = ctx.executor.as_ref();
    let name = pool.name_any();

    let images = match ceph::pool::rbd_images(exec, &conn.info, &name).await {
        Ok(images) => images,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    if !images.is_empty() {
        warn!("pool {} still holds {} images", name, images.len());
        return Ok(Outcome::failure(
            POOL_IN_USE,
            format!("pool {name} still has images: {}", images.join(" ")),
        ));
    }

    ceph::pool::delete(exec, &conn.info, &name).await?;
    info!("pool {} deleted", name);
    Ok(Outcome::Done)
}

pub async fn reconcile(pool: Arc<CephBlockPool>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        pool.as_ref(),
        async |p: &CephBlockPool| apply(&ctx, p).await,
        async |p: &CephBlockPool| cleanup(&ctx, p).await,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::v1::block_pool::MirroringSpec;

    #[test]
    fn test_mirroring_mode() {
        let mut pool = crate::tests::create_test_block_pool("replicapool");
        assert_eq!(mirroring_mode(&pool), Ok(None));

        pool.spec.mirroring = Some(MirroringSpec {
            enabled: true,
            mode: None,
        });
        assert_eq!(mirroring_mode(&pool), Ok(Some("image")));

        pool.spec.mirroring = Some(MirroringSpec {
            enabled: true,
            mode: Some("journal".to_owned()),
        });
        assert!(mirroring_mode(&pool).is_err());
    }
}
