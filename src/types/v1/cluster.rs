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

pub mod config;
pub mod mgr;
pub mod mon;
pub mod osd;

use crate::health::StatusDetails;
use crate::types::v1::k8s::{ImagePullPolicy, Placement};
use crate::types::v1::status::{Condition, Phase, impl_conditioned};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::schemars::JsonSchema;
use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use strum::Display;

pub const DEFAULT_MON_COUNT: u32 = 3;
pub const MAX_MON_COUNT: u32 = 9;
pub const DEFAULT_DATA_DIR_HOST_PATH: &str = "/var/lib/rook";
pub const DEFAULT_DATA_CHECK_POOL: &str = ".mgr";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephCluster",
    namespaced,
    status = "ClusterStatus",
    shortname = "ceph",
    plural = "cephclusters",
    singular = "cephcluster",
    printcolumn = r#"{"name":"DataDirHostPath", "type":"string", "jsonPath":".spec.dataDirHostPath"}"#,
    printcolumn = r#"{"name":"MonCount", "type":"string", "jsonPath":".spec.mon.count"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Message", "type":"string", "jsonPath":".status.message"}"#,
    printcolumn = r#"{"name":"Health", "type":"string", "jsonPath":".status.ceph.health"}"#,
    printcolumn = r#"{"name":"External", "type":"boolean", "jsonPath":".spec.external.enable"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub ceph_version: CephVersionSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir_host_path: Option<String>,

    #[serde(default)]
    #[x_kube(validation = Rule::new("self.count >= 1 && self.count <= 9").message("mon count must be between 1 and 9"))]
    pub mon: MonSpec,

    #[serde(default)]
    pub mgr: MgrSpec,

    #[serde(default)]
    pub storage: StorageSpec,

    #[serde(default)]
    pub network: NetworkSpec,

    #[serde(default)]
    pub external: ExternalSpec,

    #[serde(default)]
    pub health_check: HealthCheckSpec,

    /// Placement per daemon type (`all`, `mon`, `mgr`, `osd`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub placement: BTreeMap<String, Placement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<ImagePullPolicy>,

    /// Proceed with an upgrade step even if the cluster is not healthy.
    #[serde(default)]
    pub continue_upgrade_after_checks_even_if_not_healthy: bool,

    #[serde(default)]
    pub skip_upgrade_checks: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CephVersionSpec {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub allow_unsupported: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonSpec {
    pub count: u32,

    #[serde(default)]
    pub allow_multiple_per_node: bool,
}

impl Default for MonSpec {
    fn default() -> Self {
        Self {
            count: DEFAULT_MON_COUNT,
            allow_multiple_per_node: false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MgrSpec {
    pub count: u32,
}

impl Default for MgrSpec {
    fn default() -> Self {
        Self { count: 1 }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default)]
    pub use_all_nodes: bool,

    #[serde(default)]
    pub use_all_devices: bool,

    /// Regular expression matched against device names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_filter: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeSpec>,

    /// Claim-backed placement: each set yields `count` PVC-backed OSDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_class_device_sets: Vec<DeviceSetSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_filter: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSetSpec {
    pub name: String,

    pub count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub host_network: bool,

    #[serde(default)]
    pub connections: ConnectionsSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsSpec {
    #[serde(default)]
    pub encryption: Toggle,

    #[serde(default)]
    pub compression: Toggle,

    #[serde(default)]
    pub require_msgr2: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Toggle {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ExternalSpec {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default)]
    pub mon: MonHealthSpec,

    /// Pool used for the write/read check between upgrade steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_check_pool: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonHealthSpec {
    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,

    /// Out-of-quorum time before a mon is failed over. 0 disables failover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceph: Option<CephHealth>,

    /// Image every daemon has been rolled to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ClusterVersion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeProgress>,
}

impl_conditioned!(ClusterStatus);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CephHealth {
    pub health: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersion {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Daemon groups rolled by an upgrade, in upgrade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UpgradeStep {
    OperatorVersion,
    Mons,
    Mgrs,
    Mds,
    Osds,
    Rgw,
    RbdMirror,
    Nfs,
}

pub const UPGRADE_STEPS: [UpgradeStep; 8] = [
    UpgradeStep::OperatorVersion,
    UpgradeStep::Mons,
    UpgradeStep::Mgrs,
    UpgradeStep::Mds,
    UpgradeStep::Osds,
    UpgradeStep::Rgw,
    UpgradeStep::RbdMirror,
    UpgradeStep::Nfs,
];

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeProgress {
    pub target_image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_steps: Vec<String>,

    /// Step whose Deployments are being rolled right now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

impl UpgradeProgress {
    /// The step has started; its daemons belong on the target image.
    pub fn reached(&self, step: UpgradeStep) -> bool {
        let step = step.to_string();
        self.completed_steps.contains(&step) || self.current_step.as_ref() == Some(&step)
    }
}

impl CephCluster {
    pub fn data_dir_host_path(&self) -> &str {
        self.spec
            .data_dir_host_path
            .as_deref()
            .unwrap_or(DEFAULT_DATA_DIR_HOST_PATH)
    }

    pub fn is_external(&self) -> bool {
        self.spec.external.enable
    }

    /// Image the daemons currently run. New daemons use it too, so that
    /// only the upgrade path moves the cluster to `spec.cephVersion.image`.
    pub fn effective_image(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_ref())
            .map(|v| v.image.as_str())
            .filter(|image| !image.is_empty())
            .unwrap_or(&self.spec.ceph_version.image)
    }

    /// Image for the daemons rolled by `step`. While an upgrade runs, daemons
    /// whose step has started render the target image and the rest keep the
    /// running one, so re-applied manifests agree with the rollout.
    pub fn daemon_image(&self, step: UpgradeStep) -> &str {
        match self.status.as_ref().and_then(|s| s.upgrade.as_ref()) {
            Some(upgrade) if upgrade.reached(step) => &upgrade.target_image,
            _ => self.effective_image(),
        }
    }

    pub fn placement(&self, daemon: &str) -> Placement {
        self.spec
            .placement
            .get(daemon)
            .or_else(|| self.spec.placement.get("all"))
            .cloned()
            .unwrap_or_default()
    }

    pub fn image_pull_policy(&self) -> String {
        self.spec
            .image_pull_policy
            .clone()
            .unwrap_or_default()
            .to_string()
    }

    /// `None` means failover is disabled.
    pub fn mon_out_timeout(&self, default: Duration) -> Option<Duration> {
        let mon = &self.spec.health_check.mon;
        if mon.disabled {
            return None;
        }
        match mon.timeout_seconds {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(default),
        }
    }

    pub fn data_check_pool(&self) -> &str {
        self.spec
            .health_check
            .data_check_pool
            .as_deref()
            .unwrap_or(DEFAULT_DATA_CHECK_POOL)
    }

    pub fn ready_cluster(&self) -> bool {
        use crate::types::v1::status::Conditioned;
        self.status.as_ref().is_some_and(|s| {
            s.is_ready()
                || matches!(s.phase, Some(Phase::Ready) | Some(Phase::Connected))
        })
    }

    pub fn common_volumes(&self) -> (Vec<corev1::Volume>, Vec<corev1::VolumeMount>) {
        config::config_volumes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_image_prefers_status() {
        let mut cluster = crate::tests::create_test_cluster(3);
        assert_eq!(cluster.effective_image(), "quay.io/ceph/ceph:v18.2.4");

        cluster.spec.ceph_version.image = "quay.io/ceph/ceph:v19.2.0".to_owned();
        cluster.status = Some(ClusterStatus {
            version: Some(ClusterVersion {
                image: "quay.io/ceph/ceph:v18.2.4".to_owned(),
                version: None,
            }),
            ..Default::default()
        });
        assert_eq!(cluster.effective_image(), "quay.io/ceph/ceph:v18.2.4");
    }

    #[test]
    fn test_daemon_image_follows_upgrade_steps() {
        let mut cluster = crate::tests::create_test_cluster(3);
        cluster.spec.ceph_version.image = "quay.io/ceph/ceph:v19.2.0".to_owned();
        cluster.status = Some(ClusterStatus {
            version: Some(ClusterVersion {
                image: "quay.io/ceph/ceph:v18.2.4".to_owned(),
                version: None,
            }),
            upgrade: Some(UpgradeProgress {
                target_image: "quay.io/ceph/ceph:v19.2.0".to_owned(),
                completed_steps: ["OperatorVersion", "Mons", "Mgrs", "Mds", "Osds"]
                    .map(str::to_owned)
                    .to_vec(),
                current_step: Some("Rgw".to_owned()),
            }),
            ..Default::default()
        });

        assert_eq!(cluster.daemon_image(UpgradeStep::Mons), "quay.io/ceph/ceph:v19.2.0");
        assert_eq!(cluster.daemon_image(UpgradeStep::Rgw), "quay.io/ceph/ceph:v19.2.0");
        assert_eq!(cluster.daemon_image(UpgradeStep::Nfs), "quay.io/ceph/ceph:v18.2.4");

        // no upgrade in flight: the running image
        if let Some(status) = cluster.status.as_mut() {
            status.upgrade = None;
        }
        assert_eq!(cluster.daemon_image(UpgradeStep::Rgw), "quay.io/ceph/ceph:v18.2.4");
    }

    #[test]
    fn test_mon_out_timeout() {
        let mut cluster = crate::tests::create_test_cluster(3);
        let default = Duration::from_secs(600);
        assert_eq!(cluster.mon_out_timeout(default), Some(default));

        cluster.spec.health_check.mon.timeout_seconds = Some(0);
        assert_eq!(cluster.mon_out_timeout(default), None);

        cluster.spec.health_check.mon.timeout_seconds = Some(30);
        assert_eq!(
            cluster.mon_out_timeout(default),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_placement_falls_back_to_all() {
        let mut cluster = crate::tests::create_test_cluster(3);
        cluster.spec.placement.insert(
            "all".to_owned(),
            Placement {
                node_selector: Some([("role".to_owned(), "storage".to_owned())].into()),
                ..Default::default()
            },
        );
        let placement = cluster.placement("mon");
        assert_eq!(
            placement.node_selector.unwrap().get("role").map(String::as_str),
            Some("storage")
        );
    }
}
