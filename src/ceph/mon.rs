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

use crate::ceph::{CephExecutor, ClusterInfo, Error, ceph, ceph_json};
use serde::Deserialize;

pub async fn remove(exec: &dyn CephExecutor, cluster: &ClusterInfo, name: &str) -> Result<(), Error> {
    match ceph(exec, cluster, &["mon", "remove", name]).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[derive(Deserialize, Debug, Default)]
struct MonDump {
    #[serde(default)]
    mons: Vec<super::status::MonMapEntry>,
}

/// Names of every mon in the current monmap.
pub async fn monmap_names(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
) -> Result<Vec<String>, Error> {
    let dump: MonDump = ceph_json(exec, cluster, &["mon", "dump"]).await?;
    Ok(dump.mons.into_iter().map(|m| m.name).collect())
}
