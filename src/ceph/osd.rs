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

/// Exit code of `ok-to-stop` and `safe-to-destroy` when the answer is "not yet".
const EBUSY: i32 = 16;

pub async fn out(exec: &dyn CephExecutor, cluster: &ClusterInfo, id: u32) -> Result<(), Error> {
    ceph(exec, cluster, &["osd", "out", &id.to_string()]).await
}

#[derive(Deserialize, Debug, Default)]
struct SafeToDestroy {
    #[serde(default)]
    safe_to_destroy: Vec<u32>,
}

/// Whether all data on `id` has been redistributed.
pub async fn safe_to_destroy(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    id: u32,
) -> Result<bool, Error> {
    match ceph_json::<SafeToDestroy>(exec, cluster, &["osd", "safe-to-destroy", &id.to_string()])
        .await
    {
        Ok(res) => Ok(res.safe_to_destroy.contains(&id)),
        Err(e) if e.exit_code() == Some(EBUSY) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether stopping `id` keeps every PG available.
pub async fn ok_to_stop(exec: &dyn CephExecutor, cluster: &ClusterInfo, id: u32) -> Result<bool, Error> {
    match ceph(exec, cluster, &["osd", "ok-to-stop", &id.to_string()]).await {
        Ok(()) => Ok(true),
        Err(e) if e.exit_code() == Some(EBUSY) => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn purge(exec: &dyn CephExecutor, cluster: &ClusterInfo, id: u32) -> Result<(), Error> {
    match ceph(
        exec,
        cluster,
        &["osd", "purge", &id.to_string(), "--yes-i-really-mean-it"],
    )
    .await
    {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceph::command::MockCephExecutor;
    use std::path::Path;

    fn info() -> ClusterInfo {
        ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid")
    }

    #[tokio::test]
    async fn test_ok_to_stop_busy_is_false() {
        let mut exec = MockCephExecutor::new();
        exec.expect_run().returning(|_, _, _| {
            Err(Error::CommandFailed {
                tool: "ceph".to_owned(),
                args: "osd ok-to-stop 0".to_owned(),
                code: EBUSY,
                stderr: "unsafe to stop osd(s)".to_owned(),
            })
        });
        assert!(!ok_to_stop(&exec, &info(), 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_safe_to_destroy_parses_ids() {
        let mut exec = MockCephExecutor::new();
        exec.expect_run()
            .withf(|_, _, args| args[..2] == ["osd".to_owned(), "safe-to-destroy".to_owned()])
            .returning(|_, _, _| Ok(br#"{"safe_to_destroy":[4],"active":[],"missing_stats":[],"stored_pgs":[]}"#.to_vec()));
        assert!(safe_to_destroy(&exec, &info(), 4).await.unwrap());
    }
}
