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

//! Decoded `ceph status` and `ceph quorum_status` output.

use crate::ceph::{CephExecutor, ClusterInfo, Error, ceph_json};
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CephStatus {
    #[serde(default)]
    pub fsid: String,
    #[serde(default)]
    pub health: HealthSummary,
    #[serde(default)]
    pub quorum_names: Vec<String>,
    #[serde(default)]
    pub monmap: MonMapSummary,
    #[serde(default)]
    pub osdmap: OsdMapSummary,
    #[serde(default)]
    pub mgrmap: MgrMapSummary,
    #[serde(default)]
    pub pgmap: PgMapSummary,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct HealthSummary {
    #[serde(default)]
    pub status: String,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MonMapSummary {
    #[serde(default)]
    pub num_mons: u32,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OsdMapSummary {
    #[serde(default)]
    pub num_osds: u32,
    #[serde(default)]
    pub num_up_osds: u32,
    #[serde(default)]
    pub num_in_osds: u32,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MgrMapSummary {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub num_standbys: u32,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PgMapSummary {
    #[serde(default)]
    pub num_pgs: u32,
    #[serde(default)]
    pub pgs_by_state: Vec<PgStateCount>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PgStateCount {
    pub state_name: String,
    pub count: u32,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct QuorumStatus {
    #[serde(default)]
    pub quorum_names: Vec<String>,
    #[serde(default)]
    pub monmap: MonMap,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MonMap {
    #[serde(default)]
    pub mons: Vec<MonMapEntry>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MonMapEntry {
    pub name: String,
    #[serde(default)]
    pub rank: i32,
    #[serde(default)]
    pub public_addr: String,
}

impl QuorumStatus {
    pub fn in_quorum(&self, name: &str) -> bool {
        self.quorum_names.iter().any(|n| n == name)
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.monmap.mons.iter().map(|m| m.name.as_str())
    }
}

/// `ceph versions`: daemon type to version string to count.
pub type Versions = std::collections::BTreeMap<String, std::collections::BTreeMap<String, u32>>;

pub async fn versions(exec: &dyn CephExecutor, cluster: &ClusterInfo) -> Result<Versions, Error> {
    ceph_json(exec, cluster, &["versions"]).await
}

/// Distinct versions reported for `daemon` (`mon`, `osd`, `overall`, ...).
pub fn daemon_versions<'a>(versions: &'a Versions, daemon: &str) -> Vec<&'a str> {
    versions
        .get(daemon)
        .map(|v| v.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

pub async fn status(exec: &dyn CephExecutor, cluster: &ClusterInfo) -> Result<CephStatus, Error> {
    ceph_json(exec, cluster, &["status"]).await
}

pub async fn quorum_status(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
) -> Result<QuorumStatus, Error> {
    ceph_json(exec, cluster, &["quorum_status"]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_JSON: &str = r#"{
        "fsid": "c0ffee",
        "health": {"status": "HEALTH_OK", "checks": {}},
        "quorum_names": ["a", "b", "c"],
        "monmap": {"epoch": 3, "num_mons": 3},
        "osdmap": {"epoch": 10, "num_osds": 3, "num_up_osds": 3, "num_in_osds": 3},
        "mgrmap": {"available": true, "num_standbys": 0},
        "pgmap": {"num_pgs": 33, "pgs_by_state": [{"state_name": "active+clean", "count": 33}]}
    }"#;

    #[test]
    fn test_decode_status() {
        let status: CephStatus = serde_json::from_str(STATUS_JSON).unwrap();
        assert_eq!(status.health.status, "HEALTH_OK");
        assert_eq!(status.osdmap.num_up_osds, 3);
        assert!(status.mgrmap.available);
        assert_eq!(status.pgmap.pgs_by_state[0].count, 33);
    }

    #[test]
    fn test_decode_quorum_status() {
        let raw = r#"{
            "election_epoch": 10,
            "quorum": [0, 1],
            "quorum_names": ["a", "b"],
            "monmap": {"mons": [
                {"rank": 0, "name": "a", "public_addr": "10.0.0.1:6789/0"},
                {"rank": 1, "name": "b", "public_addr": "10.0.0.2:6789/0"},
                {"rank": 2, "name": "c", "public_addr": "10.0.0.3:6789/0"}
            ]}
        }"#;
        let quorum: QuorumStatus = serde_json::from_str(raw).unwrap();
        assert!(quorum.in_quorum("a"));
        assert!(!quorum.in_quorum("c"));
        assert_eq!(quorum.members().count(), 3);
    }

    #[test]
    fn test_daemon_versions() {
        let raw = r#"{
            "mon": {"ceph version 18.2.4 (e7ad) reef (stable)": 2, "ceph version 19.2.0 (16063) squid (stable)": 1},
            "overall": {"ceph version 18.2.4 (e7ad) reef (stable)": 2}
        }"#;
        let versions: Versions = serde_json::from_str(raw).unwrap();
        assert_eq!(daemon_versions(&versions, "mon").len(), 2);
        assert!(daemon_versions(&versions, "osd").is_empty());
    }
}
