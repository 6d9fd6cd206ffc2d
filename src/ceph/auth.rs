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

#[derive(Deserialize)]
struct AuthKey {
    key: String,
}

/// `ceph auth get-or-create-key` for `entity` with `caps` given as (service, capability) pairs.
pub async fn get_or_create_key(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    entity: &str,
    caps: &[(&str, &str)],
) -> Result<String, Error> {
    let mut args = vec!["auth", "get-or-create-key", entity];
    for (service, cap) in caps {
        args.push(service);
        args.push(cap);
    }
    let res: AuthKey = ceph_json(exec, cluster, &args).await?;
    Ok(res.key)
}

pub async fn delete(exec: &dyn CephExecutor, cluster: &ClusterInfo, entity: &str) -> Result<(), Error> {
    match ceph(exec, cluster, &["auth", "del", entity]).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Capabilities for the daemon identities the operator creates.
pub fn daemon_caps(daemon: &str) -> Vec<(&'static str, &'static str)> {
    match daemon {
        "mgr" => vec![("mon", "allow profile mgr"), ("mds", "allow *"), ("osd", "allow *")],
        "mds" => vec![("osd", "allow *"), ("mds", "allow"), ("mon", "allow profile mds")],
        "rgw" => vec![("osd", "allow rwx"), ("mon", "allow rw")],
        "rbd-mirror" => vec![("mon", "profile rbd-mirror"), ("osd", "profile rbd")],
        "nfs" => vec![("mon", "allow r"), ("osd", "allow rw pool=.nfs")],
        "bootstrap-osd" => vec![("mon", "allow profile bootstrap-osd")],
        "osd" => vec![("mon", "allow profile osd"), ("mgr", "allow profile osd"), ("osd", "allow *")],
        _ => vec![("mon", "allow r")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceph::command::MockCephExecutor;
    use std::path::Path;

    #[tokio::test]
    async fn test_get_or_create_key_passes_caps() {
        let mut exec = MockCephExecutor::new();
        exec.expect_run()
            .withf(|_, _, args| {
                args.join(" ")
                    == "auth get-or-create-key client.rgw.my.store mon allow rw --format json"
            })
            .returning(|_, _, _| Ok(br#"{"key":"QVFE"}"#.to_vec()));
        let info = ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid");
        let key = get_or_create_key(&exec, &info, "client.rgw.my.store", &[("mon", "allow rw")])
            .await
            .unwrap();
        assert_eq!(key, "QVFE");
    }
}
