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

use crate::types;
use crate::types::v1::cluster::{CephCluster, UpgradeStep};
use crate::types::v1::cluster::config::{KEYRING_MOUNT_PATH, config_volumes, keyring_volume};
use crate::types::v1::k8s::Placement;
use crate::types::v1::pool::PoolSpec;
use crate::types::v1::status::CommonStatus;
use crate::types::v1::{ResourceIdentity, child_meta, daemon_labels};
use crate::utils::naming;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::schemars::JsonSchema;
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};

pub const MDS_APP: &str = "rook-ceph-mds";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephFilesystem",
    namespaced,
    status = "CommonStatus",
    shortname = "cephfs",
    plural = "cephfilesystems",
    singular = "cephfilesystem",
    printcolumn = r#"{"name":"ActiveMDS", "type":"string", "jsonPath":".spec.metadataServer.activeCount"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemSpec {
    #[serde(default)]
    pub metadata_pool: PoolSpec,

    #[x_kube(validation = Rule::new("self.size() > 0").message("at least one data pool is required"))]
    pub data_pools: Vec<NamedPoolSpec>,

    #[serde(default)]
    pub preserve_pools_on_delete: bool,

    #[x_kube(validation = Rule::new("self.activeCount >= 1 && self.activeCount <= 50").message("activeCount must be between 1 and 50"))]
    pub metadata_server: MetadataServerSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamedPoolSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub pool: PoolSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetadataServerSpec {
    pub active_count: u32,

    #[serde(default)]
    pub active_standby: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

impl Default for MetadataServerSpec {
    fn default() -> Self {
        Self {
            active_count: 1,
            active_standby: false,
            placement: None,
        }
    }
}

impl CephFilesystem {
    pub fn metadata_pool_name(&self) -> String {
        format!("{}-metadata", self.name_any())
    }

    pub fn data_pool_names(&self) -> Vec<String> {
        self.spec
            .data_pools
            .iter()
            .enumerate()
            .map(|(i, p)| match &p.name {
                Some(name) if !name.is_empty() => format!("{}-{name}", self.name_any()),
                _ => format!("{}-data{i}", self.name_any()),
            })
            .collect()
    }

    /// Number of mds daemons: one per active rank, doubled for standby-replay.
    pub fn mds_count(&self) -> u32 {
        let active = self.spec.metadata_server.active_count;
        if self.spec.metadata_server.active_standby {
            active * 2
        } else {
            active
        }
    }

    pub fn mds_ids(&self) -> Vec<String> {
        (0..self.mds_count() as usize)
            .map(|i| format!("{}-{}", self.name_any(), naming::index_to_name(i)))
            .collect()
    }

    pub fn mds_keyring_secret(id: &str) -> String {
        format!("{MDS_APP}-{id}-keyring")
    }

    pub fn new_mds_deployment(
        &self,
        cluster: &CephCluster,
        id: &str,
    ) -> Result<appsv1::Deployment, types::error::Error> {
        let mut labels = daemon_labels(MDS_APP, &self.require_namespace()?);
        labels.insert("rook_file_system".to_owned(), self.name_any());
        labels.insert("mds".to_owned(), id.to_owned());
        labels.insert("ceph_daemon_type".to_owned(), "mds".to_owned());
        labels.insert("ceph_daemon_id".to_owned(), id.to_owned());

        let (mut volumes, mut mounts) = config_volumes();
        let (keyring, keyring_mount) = keyring_volume(&Self::mds_keyring_secret(id));
        volumes.push(keyring);
        mounts.push(keyring_mount);

        let mut pod = corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "mds".to_owned(),
                image: Some(cluster.daemon_image(UpgradeStep::Mds).to_owned()),
                image_pull_policy: Some(cluster.image_pull_policy()),
                command: Some(vec!["ceph-mds".to_owned()]),
                args: Some(vec![
                    "--foreground".to_owned(),
                    format!("--id={id}"),
                    format!("--keyring={KEYRING_MOUNT_PATH}/keyring"),
                ]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        };
        self.spec
            .metadata_server
            .placement
            .clone()
            .unwrap_or_else(|| cluster.placement("mds"))
            .apply(&mut pod, None);

        Ok(appsv1::Deployment {
            metadata: child_meta(self, format!("{MDS_APP}-{id}"), labels.clone()),
            spec: Some(appsv1::DeploymentSpec {
                replicas: Some(1),
                selector: metav1::LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(pod),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_mds_ids_with_standby() {
        let mut fs = crate::tests::create_test_filesystem("myfs");
        assert_eq!(fs.mds_ids(), vec!["myfs-a".to_owned()]);

        fs.spec.metadata_server.active_count = 2;
        fs.spec.metadata_server.active_standby = true;
        assert_eq!(fs.mds_count(), 4);
        assert_eq!(fs.mds_ids().last().map(String::as_str), Some("myfs-d"));
    }

    #[test]
    fn test_pool_names() {
        let fs = crate::tests::create_test_filesystem("myfs");
        assert_eq!(fs.metadata_pool_name(), "myfs-metadata");
        assert_eq!(fs.data_pool_names(), vec!["myfs-data0".to_owned()]);
    }
}
