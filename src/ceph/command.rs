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

use crate::ceph::{CommandFailedSnafu, Error, SpawnSnafu, TimeoutSnafu};
use async_trait::async_trait;
use snafu::{ResultExt, ensure};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use strum::Display;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Tool {
    #[strum(serialize = "ceph")]
    Ceph,
    #[strum(serialize = "radosgw-admin")]
    RadosgwAdmin,
    #[strum(serialize = "rados")]
    Rados,
    #[strum(serialize = "rbd")]
    Rbd,
}

/// Where the admin identity of one cluster lives on the operator's disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub namespace: String,
    pub fsid: String,
    pub dir: PathBuf,
}

impl ClusterInfo {
    pub fn new(config_dir: &Path, namespace: &str, fsid: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            fsid: fsid.to_owned(),
            dir: config_dir.join(namespace),
        }
    }

    pub fn conf_path(&self) -> PathBuf {
        self.dir.join(format!("{}.config", self.namespace))
    }

    pub fn keyring_path(&self) -> PathBuf {
        self.dir.join("client.admin.keyring")
    }

    /// Connection flags prepended to every tool invocation.
    pub fn base_args(&self) -> Vec<String> {
        vec![
            "--cluster".to_owned(),
            self.namespace.clone(),
            "--conf".to_owned(),
            self.conf_path().display().to_string(),
            "--name".to_owned(),
            "client.admin".to_owned(),
            "--keyring".to_owned(),
            self.keyring_path().display().to_string(),
        ]
    }
}

/// Runs a storage engine tool against a cluster and returns its stdout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CephExecutor: Send + Sync {
    async fn run(&self, cluster: &ClusterInfo, tool: Tool, args: Vec<String>)
    -> Result<Vec<u8>, Error>;
}

pub struct CommandExecutor {
    bin_dir: PathBuf,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(bin_dir: PathBuf, timeout: Duration) -> Self {
        Self { bin_dir, timeout }
    }
}

#[async_trait]
impl CephExecutor for CommandExecutor {
    async fn run(
        &self,
        cluster: &ClusterInfo,
        tool: Tool,
        args: Vec<String>,
    ) -> Result<Vec<u8>, Error> {
        let joined = args.join(" ");
        debug!(cluster = %cluster.namespace, "running {} {}", tool, joined);

        let mut cmd = tokio::process::Command::new(self.bin_dir.join(tool.to_string()));
        cmd.args(cluster.base_args())
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                TimeoutSnafu {
                    tool: tool.to_string(),
                    args: joined.clone(),
                    timeout: self.timeout,
                }
                .build()
            })?
            .context(SpawnSnafu {
                tool: tool.to_string(),
            })?;

        ensure!(
            output.status.success(),
            CommandFailedSnafu {
                tool: tool.to_string(),
                args: joined,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }
        );

        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_args() {
        let info = ClusterInfo::new(Path::new("/var/lib/rook"), "rook-ceph", "fsid");
        let args = info.base_args();
        assert_eq!(args[1], "rook-ceph");
        assert_eq!(args[3], "/var/lib/rook/rook-ceph/rook-ceph.config");
        assert_eq!(args[7], "/var/lib/rook/rook-ceph/client.admin.keyring");
    }

    #[test]
    fn test_tool_names() {
        assert_eq!(Tool::RadosgwAdmin.to_string(), "radosgw-admin");
        assert_eq!(Tool::Ceph.to_string(), "ceph");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let exec = CommandExecutor::new(
            PathBuf::from("/nonexistent-ceph-bin"),
            Duration::from_secs(5),
        );
        let info = ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid");
        let err = exec
            .run(&info, Tool::Ceph, vec!["status".to_owned()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
