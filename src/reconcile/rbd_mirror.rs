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
use crate::error::Error;
use crate::reconcile::cluster::{self, Connection};
use crate::reconcile::{Outcome, apply_daemon_keyring, remove_daemon, run, running_daemon_ids, set_ready, surplus};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::rbd_mirror::{CephRBDMirror, RBD_MIRROR_APP};
use crate::types::v1::status::{Phase, reason};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::sync::Arc;
use tracing::info;

const MIRROR_ID_LABEL: &str = "rbd-mirror";

fn deployment_name(id: &str) -> String {
    format!("{RBD_MIRROR_APP}-{id}")
}

async fn apply(ctx: &Context, mirror: &CephRBDMirror) -> Result<Outcome, Error> {
    let ns = mirror.require_namespace()?;
    let (cluster, conn) = cluster::connect(ctx, &ns).await?;
    let wanted = mirror.daemon_ids();

    for id in &wanted {
        apply_daemon_keyring(
            ctx,
            mirror,
            &conn,
            &CephRBDMirror::entity(id),
            "rbd-mirror",
            &CephRBDMirror::keyring_secret(id),
            RBD_MIRROR_APP,
        )
        .await?;
        ctx.apply(&mirror.new_mirror_deployment(&cluster, id)?, &ns)
            .await?;
    }

    let selector = format!("app={RBD_MIRROR_APP}");
    let existing = running_daemon_ids(ctx, &ns, &selector, MIRROR_ID_LABEL).await?;
    for id in surplus(&existing, &wanted) {
        info!("scaling down rbd-mirror {} in {}", id, ns);
        remove_mirror(ctx, &conn, &ns, &id).await?;
    }

    set_ready(
        ctx,
        mirror,
        Phase::Ready,
        reason::RECONCILE_SUCCEEDED,
        &format!("{} rbd-mirror daemons configured", wanted.len()),
    )
    .await?;
    Ok(Outcome::Done)
}

async fn remove_mirror(ctx: &Context, conn: &Connection, ns: &str, id: &str) -> Result<(), Error> {
    remove_daemon(
        ctx,
        conn,
        ns,
        &deployment_name(id),
        &CephRBDMirror::keyring_secret(id),
        &CephRBDMirror::entity(id),
    )
    .await
}

async fn cleanup(ctx: &Context, mirror: &CephRBDMirror) -> Result<Outcome, Error> {
    let ns = mirror.require_namespace()?;
    if let Some(conn) = cluster::connect_for_cleanup(ctx, &ns).await? {
        for id in mirror.daemon_ids() {
            remove_mirror(ctx, &conn, &ns, &id).await?;
        }
    }
    info!("rbd-mirror {} removed", mirror.name_any());
    Ok(Outcome::Done)
}

pub async fn reconcile(mirror: Arc<CephRBDMirror>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        mirror.as_ref(),
        async |m: &CephRBDMirror| apply(&ctx, m).await,
        async |m: &CephRBDMirror| cleanup(&ctx, m).await,
    )
    .await
}
