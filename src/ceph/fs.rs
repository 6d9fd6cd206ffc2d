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

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FsEntry {
    pub name: String,
    #[serde(default)]
    pub metadata_pool: String,
    #[serde(default)]
    pub data_pools: Vec<String>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FsStatus {
    #[serde(default)]
    pub mdsmap: Vec<MdsInfo>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MdsInfo {
    pub name: String,
    #[serde(default)]
    pub state: String,
}

impl FsStatus {
    pub fn active_count(&self) -> usize {
        self.mdsmap.iter().filter(|m| m.state == "active").count()
    }
}

pub async fn list(exec: &dyn CephExecutor, cluster: &ClusterInfo) -> Result<Vec<FsEntry>, Error> {
    ceph_json(exec, cluster, &["fs", "ls"]).await
}

/// Creates the filesystem when absent and attaches any missing data pools.
pub async fn ensure(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    name: &str,
    metadata_pool: &str,
    data_pools: &[String],
) -> Result<(), Error> {
    let Some(first) = data_pools.first() else {
        return super::UnexpectedSnafu {
            what: "filesystem layout",
            message: format!("filesystem {name} has no data pools"),
        }
        .fail();
    };

    let existing = list(exec, cluster).await?;
    let current = existing.iter().find(|fs| fs.name == name);
    if current.is_none() {
        ceph(exec, cluster, &["fs", "new", name, metadata_pool, first]).await?;
    }

    let attached = current.map(|fs| fs.data_pools.clone()).unwrap_or_else(|| vec![first.clone()]);
    for pool in data_pools.iter().filter(|p| !attached.contains(p)) {
        ceph(exec, cluster, &["fs", "add_data_pool", name, pool]).await?;
    }
    Ok(())
}

pub async fn set_mds_counts(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    name: &str,
    active: u32,
    standby_replay: bool,
) -> Result<(), Error> {
    ceph(exec, cluster, &["fs", "set", name, "max_mds", &active.to_string()]).await?;
    ceph(
        exec,
        cluster,
        &["fs", "set", name, "allow_standby_replay", if standby_replay { "true" } else { "false" }],
    )
    .await
}

pub async fn status(exec: &dyn CephExecutor, cluster: &ClusterInfo, name: &str) -> Result<FsStatus, Error> {
    ceph_json(exec, cluster, &["fs", "status", name]).await
}

pub async fn remove(exec: &dyn CephExecutor, cluster: &ClusterInfo, name: &str) -> Result<(), Error> {
    if !list(exec, cluster).await?.iter().any(|fs| fs.name == name) {
        return Ok(());
    }
    ceph(exec, cluster, &["fs", "fail", name]).await?;
    ceph(exec, cluster, &["fs", "rm", name, "--yes-i-really-mean-it"]).await
}
