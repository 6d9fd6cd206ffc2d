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
use crate::reconcile::cluster::Connection;
use crate::reconcile::{Outcome, apply_daemon_keyring, remove_daemon, running_daemon_ids, surplus};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::cluster::CephCluster;
use crate::types::v1::cluster::mgr::{MGR_APP, mgr_deployment_name, mgr_keyring_secret};
use crate::utils::naming::index_to_name;
use crate::ceph;
use std::time::Duration;
use tracing::{debug, info};

const MGR_ID_LABEL: &str = "mgr";
const MGR_WAIT: Duration = Duration::from_secs(10);

pub fn mgr_ids(count: u32) -> Vec<String> {
    (0..count as usize).map(index_to_name).collect()
}

/// Keeps `spec.mgr.count` mgr daemons and reports whether one is available.
pub async fn reconcile(ctx: &Context, cluster: &CephCluster, conn: &Connection) -> Result<Outcome, Error> {
    let ns = cluster.require_namespace()?;
    let wanted = mgr_ids(cluster.spec.mgr.count);

    for id in &wanted {
        apply_daemon_keyring(
            ctx,
            cluster,
            conn,
            &format!("mgr.{id}"),
            "mgr",
            &mgr_keyring_secret(id),
            MGR_APP,
        )
        .await?;
        ctx.apply(&cluster.new_mgr_deployment(id)?, &ns).await?;
    }
    ctx.apply(&cluster.new_mgr_service()?, &ns).await?;

    let existing = running_daemon_ids(ctx, &ns, &format!("app={MGR_APP}"), MGR_ID_LABEL).await?;
    for id in surplus(&existing, &wanted) {
        info!("removing surplus mgr {} from {}", id, ns);
        remove_daemon(
            ctx,
            conn,
            &ns,
            &mgr_deployment_name(&id),
            &mgr_keyring_secret(&id),
            &format!("mgr.{id}"),
        )
        .await?;
    }

    let status = ceph::status::status(ctx.executor.as_ref(), &conn.info).await?;
    if status.mgrmap.available {
        Ok(Outcome::Done)
    } else {
        debug!("no mgr available yet in {}", ns);
        Ok(Outcome::RequeueAfter(MGR_WAIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mgr_ids() {
        assert_eq!(mgr_ids(1), ["a"]);
        assert_eq!(mgr_ids(2), ["a", "b"]);
    }
}
