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

//! RADOS write/read round trip used as the data-path gate between upgrade steps.

use crate::ceph::{CephExecutor, ClusterInfo, Error, Tool, UnexpectedSnafu, WriteConfigSnafu};
use snafu::{ResultExt, ensure};
use tracing::debug;

const CHECK_OBJECT: &str = "rook-ceph-operator-data-check";

pub async fn rados_round_trip(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    pool: &str,
) -> Result<(), Error> {
    let payload = uuid::Uuid::new_v4().to_string();
    let put_path = cluster.dir.join("data-check.put");
    let get_path = cluster.dir.join("data-check.get");

    tokio::fs::write(&put_path, payload.as_bytes())
        .await
        .context(WriteConfigSnafu {
            path: put_path.display().to_string(),
        })?;

    let rados = |verb: &str, path: Option<String>| {
        let mut args = vec!["-p".to_owned(), pool.to_owned(), verb.to_owned(), CHECK_OBJECT.to_owned()];
        args.extend(path);
        args
    };

    exec.run(cluster, Tool::Rados, rados("put", Some(put_path.display().to_string())))
        .await?;
    exec.run(cluster, Tool::Rados, rados("get", Some(get_path.display().to_string())))
        .await?;

    let read = tokio::fs::read(&get_path).await.context(WriteConfigSnafu {
        path: get_path.display().to_string(),
    })?;
    exec.run(cluster, Tool::Rados, rados("rm", None)).await?;

    ensure!(
        read == payload.as_bytes(),
        UnexpectedSnafu {
            what: "rados round trip",
            message: format!("object read back from pool {pool} differs from what was written"),
        }
    );
    debug!(pool, "rados round trip succeeded");
    Ok(())
}
