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

use crate::ceph::{CephExecutor, ClusterInfo, Error, Tool, ceph, ceph_json};
use crate::types::v1::pool::PoolSpec;
use snafu::ResultExt;
use tracing::info;

const DEFAULT_PG_COUNT: &str = "8";
const EEXIST: i32 = 17;

pub async fn list(exec: &dyn CephExecutor, cluster: &ClusterInfo) -> Result<Vec<String>, Error> {
    ceph_json(exec, cluster, &["osd", "pool", "ls"]).await
}

fn rule_name(pool: &str) -> String {
    format!("{pool}_rule")
}

/// Creates `name` if missing and converges size, crush rule, compression and application.
pub async fn ensure(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    name: &str,
    spec: &PoolSpec,
    application: &str,
) -> Result<(), Error> {
    let existing = list(exec, cluster).await?;
    let rule = rule_name(name);

    if let Some(ec) = &spec.erasure_coded {
        let profile = format!("{name}_ecprofile");
        ceph(
            exec,
            cluster,
            &[
                "osd",
                "erasure-code-profile",
                "set",
                &profile,
                &format!("k={}", ec.data_chunks),
                &format!("m={}", ec.coding_chunks),
                &format!("crush-failure-domain={}", spec.failure_domain()),
                "--force",
            ],
        )
        .await?;
        if !existing.iter().any(|p| p == name) {
            info!(pool = name, "creating erasure coded pool");
            ceph(
                exec,
                cluster,
                &["osd", "pool", "create", name, DEFAULT_PG_COUNT, "erasure", &profile],
            )
            .await?;
            ceph(exec, cluster, &["osd", "pool", "set", name, "allow_ec_overwrites", "true"]).await?;
        }
    } else {
        let mut args = vec![
            "osd",
            "crush",
            "rule",
            "create-replicated",
            rule.as_str(),
            "default",
            spec.failure_domain(),
        ];
        if let Some(class) = spec.device_class.as_deref() {
            args.push(class);
        }
        ceph(exec, cluster, &args).await?;

        if !existing.iter().any(|p| p == name) {
            info!(pool = name, "creating replicated pool");
            ceph(
                exec,
                cluster,
                &["osd", "pool", "create", name, DEFAULT_PG_COUNT, "replicated", &rule],
            )
            .await?;
        }
        let size = spec.replicated.size.to_string();
        ceph(exec, cluster, &["osd", "pool", "set", name, "size", &size, "--yes-i-really-mean-it"])
            .await?;
        ceph(exec, cluster, &["osd", "pool", "set", name, "crush_rule", &rule]).await?;
    }

    if let Some(mode) = spec.compression_mode.as_deref() {
        ceph(exec, cluster, &["osd", "pool", "set", name, "compression_mode", mode]).await?;
    }
    for (key, value) in &spec.parameters {
        ceph(exec, cluster, &["osd", "pool", "set", name, key, value]).await?;
    }

    ceph(
        exec,
        cluster,
        &["osd", "pool", "application", "enable", name, application, "--yes-i-really-mean-it"],
    )
    .await
}

pub async fn delete(exec: &dyn CephExecutor, cluster: &ClusterInfo, name: &str) -> Result<(), Error> {
    if !list(exec, cluster).await?.iter().any(|p| p == name) {
        return Ok(());
    }
    info!(pool = name, "deleting pool");
    ceph(
        exec,
        cluster,
        &["osd", "pool", "delete", name, name, "--yes-i-really-really-mean-it"],
    )
    .await
}

/// Block images stored in `pool`.
pub async fn rbd_images(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    pool: &str,
) -> Result<Vec<String>, Error> {
    let out = exec
        .run(
            cluster,
            Tool::Rbd,
            vec!["ls".to_owned(), "-p".to_owned(), pool.to_owned(), "--format".to_owned(), "json".to_owned()],
        )
        .await?;
    serde_json::from_slice(&out).context(super::ParseSnafu { what: "rbd ls" })
}

pub async fn enable_mirroring(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    pool: &str,
    mode: &str,
) -> Result<(), Error> {
    exec.run(
        cluster,
        Tool::Rbd,
        vec!["mirror".to_owned(), "pool".to_owned(), "enable".to_owned(), pool.to_owned(), mode.to_owned()],
    )
    .await
    .map(|_| ())
}

/// Creates an empty RADOS object unless it already exists.
pub async fn ensure_object(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    pool: &str,
    namespace: &str,
    object: &str,
) -> Result<(), Error> {
    let args = ["-p", pool, "--namespace", namespace, "create", object]
        .map(str::to_owned)
        .to_vec();
    match exec.run(cluster, Tool::Rados, args).await {
        Err(e) if e.exit_code() == Some(EEXIST) => Ok(()),
        other => other.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceph::command::MockCephExecutor;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_existing_pool_is_not_recreated() {
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = calls.clone();
        let mut exec = MockCephExecutor::new();
        exec.expect_run().returning(move |_, _, args| {
            let joined = args.join(" ");
            seen.lock().unwrap().push(joined.clone());
            if joined.starts_with("osd pool ls") {
                Ok(br#"["replicapool"]"#.to_vec())
            } else {
                Ok(Vec::new())
            }
        });

        let info = ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid");
        ensure(&exec, &info, "replicapool", &PoolSpec::default(), "rbd")
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c.starts_with("osd pool create")));
        assert!(calls.iter().any(|c| c.starts_with("osd pool set replicapool size 3")));
        assert!(calls.iter().any(|c| c.starts_with("osd pool application enable replicapool rbd")));
    }

    #[tokio::test]
    async fn test_ensure_object_tolerates_existing() {
        let mut exec = MockCephExecutor::new();
        exec.expect_run().returning(|_, tool, args| {
            Err(crate::ceph::Error::CommandFailed {
                tool: tool.to_string(),
                args: args.join(" "),
                code: 17,
                stderr: "File exists".to_owned(),
            })
        });
        let info = ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid");
        ensure_object(&exec, &info, ".nfs", "my-nfs", "conf-nfs.my-nfs")
            .await
            .unwrap();
    }
}
