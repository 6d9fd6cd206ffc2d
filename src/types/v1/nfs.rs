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
use crate::types::v1::cluster::config::{config_volumes, keyring_volume};
use crate::types::v1::k8s::Placement;
use crate::types::v1::status::CommonStatus;
use crate::types::v1::{ResourceIdentity, child_meta, daemon_labels};
use crate::utils::naming;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr;
use k8s_openapi::schemars::JsonSchema;
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NFS_APP: &str = "rook-ceph-nfs";
pub const NFS_PORT: i32 = 2049;
pub const DEFAULT_NFS_POOL: &str = ".nfs";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephNFS",
    namespaced,
    status = "CommonStatus",
    shortname = "nfs",
    plural = "cephnfses",
    singular = "cephnfs",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct NfsSpec {
    #[serde(default)]
    pub rados: NfsRadosSpec,

    #[x_kube(validation = Rule::new("self.active >= 1").message("at least one active server is required"))]
    pub server: NfsServerSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NfsRadosSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NfsServerSpec {
    pub active: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

impl CephNFS {
    pub fn pool(&self) -> String {
        self.spec
            .rados
            .pool
            .clone()
            .unwrap_or_else(|| DEFAULT_NFS_POOL.to_owned())
    }

    pub fn rados_namespace(&self) -> String {
        self.spec
            .rados
            .namespace
            .clone()
            .unwrap_or_else(|| self.name_any())
    }

    pub fn daemon_ids(&self) -> Vec<String> {
        (0..self.spec.server.active as usize)
            .map(naming::index_to_name)
            .collect()
    }

    pub fn daemon_name(&self, id: &str) -> String {
        format!("{NFS_APP}-{}-{id}", self.name_any())
    }

    pub fn keyring_secret(&self, id: &str) -> String {
        format!("{}-keyring", self.daemon_name(id))
    }

    pub fn ganesha_entity(&self, id: &str) -> String {
        format!("client.nfs-ganesha.{}.{id}", self.name_any())
    }

    pub fn ganesha_conf(&self, id: &str) -> String {
        let name = self.name_any();
        let pool = self.pool();
        let ns = self.rados_namespace();
        format!(
            r#"NFS_CORE_PARAM {{
    Enable_NLM = false;
    Enable_RQUOTA = false;
    Protocols = 4;
}}

MDCACHE {{
    Dir_Chunk = 0;
}}

EXPORT_DEFAULTS {{
    Attr_Expiration_Time = 0;
}}

NFSv4 {{
    Delegations = false;
    RecoveryBackend = "rados_cluster";
    Minor_Versions = 1, 2;
}}

RADOS_KV {{
    ceph_conf = "/etc/ceph/ceph.conf";
    userid = nfs-ganesha.{name}.{id};
    nodeid = {name}.{id};
    pool = "{pool}";
    namespace = "{ns}";
}}

RADOS_URLS {{
    ceph_conf = "/etc/ceph/ceph.conf";
    userid = nfs-ganesha.{name}.{id};
    watch_url = "rados://{pool}/{ns}/conf-nfs.{name}";
}}

%url rados://{pool}/{ns}/conf-nfs.{name}
"#
        )
    }

    fn nfs_labels(&self, id: &str) -> Result<BTreeMap<String, String>, types::error::Error> {
        let mut labels = daemon_labels(NFS_APP, &self.require_namespace()?);
        labels.insert("ceph_nfs".to_owned(), self.name_any());
        labels.insert("instance".to_owned(), id.to_owned());
        labels.insert("ceph_daemon_type".to_owned(), "nfs".to_owned());
        labels.insert("ceph_daemon_id".to_owned(), format!("{}-{id}", self.name_any()));
        Ok(labels)
    }

    pub fn new_ganesha_configmap(&self, id: &str) -> Result<corev1::ConfigMap, types::error::Error> {
        Ok(corev1::ConfigMap {
            metadata: child_meta(self, self.daemon_name(id), self.nfs_labels(id)?),
            data: Some(BTreeMap::from([("config".to_owned(), self.ganesha_conf(id))])),
            ..Default::default()
        })
    }

    pub fn new_nfs_deployment(
        &self,
        cluster: &CephCluster,
        id: &str,
    ) -> Result<appsv1::Deployment, types::error::Error> {
        let labels = self.nfs_labels(id)?;
        let (mut volumes, mut mounts) = config_volumes();
        let (keyring, keyring_mount) = keyring_volume(&self.keyring_secret(id));
        volumes.push(keyring);
        mounts.push(keyring_mount);
        volumes.push(corev1::Volume {
            name: "ganesha-config".to_owned(),
            config_map: Some(corev1::ConfigMapVolumeSource {
                name: self.daemon_name(id),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(corev1::VolumeMount {
            name: "ganesha-config".to_owned(),
            mount_path: "/etc/ganesha".to_owned(),
            read_only: Some(true),
            ..Default::default()
        });

        let mut pod = corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "nfs-ganesha".to_owned(),
                image: Some(cluster.daemon_image(UpgradeStep::Nfs).to_owned()),
                image_pull_policy: Some(cluster.image_pull_policy()),
                command: Some(vec!["ganesha.nfsd".to_owned()]),
                args: Some(vec![
                    "-F".to_owned(),
                    "-L".to_owned(),
                    "STDERR".to_owned(),
                    "-f".to_owned(),
                    "/etc/ganesha/config".to_owned(),
                ]),
                ports: Some(vec![corev1::ContainerPort {
                    name: Some("nfs".to_owned()),
                    container_port: NFS_PORT,
                    ..Default::default()
                }]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        };
        self.spec
            .server
            .placement
            .clone()
            .unwrap_or_else(|| cluster.placement("nfs"))
            .apply(&mut pod, None);

        Ok(appsv1::Deployment {
            metadata: child_meta(self, self.daemon_name(id), labels.clone()),
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

    pub fn new_nfs_service(&self, id: &str) -> Result<corev1::Service, types::error::Error> {
        let labels = self.nfs_labels(id)?;
        Ok(corev1::Service {
            metadata: child_meta(self, self.daemon_name(id), labels.clone()),
            spec: Some(corev1::ServiceSpec {
                selector: Some(labels),
                ports: Some(vec![corev1::ServicePort {
                    name: Some("nfs".to_owned()),
                    port: NFS_PORT,
                    target_port: Some(intstr::IntOrString::Int(NFS_PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_ganesha_conf_points_at_pool() {
        let nfs = crate::tests::create_test_nfs("share", 2);
        let conf = nfs.ganesha_conf("a");
        assert!(conf.contains("pool = \".nfs\";"));
        assert!(conf.contains("namespace = \"share\";"));
        assert!(conf.contains("%url rados://.nfs/share/conf-nfs.share"));
        assert_eq!(nfs.daemon_ids(), vec!["a".to_owned(), "b".to_owned()]);
    }
}
