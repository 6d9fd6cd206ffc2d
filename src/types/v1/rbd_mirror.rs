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
use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};

pub const RBD_MIRROR_APP: &str = "rook-ceph-rbd-mirror";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephRBDMirror",
    namespaced,
    status = "CommonStatus",
    plural = "cephrbdmirrors",
    singular = "cephrbdmirror",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct RbdMirrorSpec {
    #[x_kube(validation = Rule::new("self >= 1").message("count must be at least 1"))]
    pub count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

impl CephRBDMirror {
    pub fn daemon_ids(&self) -> Vec<String> {
        (0..self.spec.count as usize).map(naming::index_to_name).collect()
    }

    pub fn entity(id: &str) -> String {
        format!("client.rbd-mirror.{id}")
    }

    pub fn keyring_secret(id: &str) -> String {
        format!("{RBD_MIRROR_APP}-{id}-keyring")
    }

    pub fn new_mirror_deployment(
        &self,
        cluster: &CephCluster,
        id: &str,
    ) -> Result<appsv1::Deployment, types::error::Error> {
        let mut labels = daemon_labels(RBD_MIRROR_APP, &self.require_namespace()?);
        labels.insert("rbd-mirror".to_owned(), id.to_owned());
        labels.insert("ceph_daemon_type".to_owned(), "rbd-mirror".to_owned());
        labels.insert("ceph_daemon_id".to_owned(), id.to_owned());

        let (mut volumes, mut mounts) = config_volumes();
        let (keyring, keyring_mount) = keyring_volume(&Self::keyring_secret(id));
        volumes.push(keyring);
        mounts.push(keyring_mount);

        let mut pod = corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "rbd-mirror".to_owned(),
                image: Some(cluster.daemon_image(UpgradeStep::RbdMirror).to_owned()),
                image_pull_policy: Some(cluster.image_pull_policy()),
                command: Some(vec!["rbd-mirror".to_owned()]),
                args: Some(vec![
                    "--foreground".to_owned(),
                    format!("--name={}", Self::entity(id)),
                ]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        };
        self.spec
            .placement
            .clone()
            .unwrap_or_else(|| cluster.placement("rbdmirror"))
            .apply(&mut pod, None);

        Ok(appsv1::Deployment {
            metadata: child_meta(self, format!("{RBD_MIRROR_APP}-{id}"), labels.clone()),
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
