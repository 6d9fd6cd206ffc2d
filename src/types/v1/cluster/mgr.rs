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
use crate::types::v1::ResourceIdentity;
use crate::types::v1::cluster::{CephCluster, UpgradeStep};
use crate::types::v1::cluster::config::{KEYRING_MOUNT_PATH, config_volumes, keyring_volume};
use crate::types::v1::{child_meta, daemon_labels};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr;

pub const MGR_APP: &str = "rook-ceph-mgr";
pub const MGR_METRICS_PORT: i32 = 9283;

pub fn mgr_deployment_name(id: &str) -> String {
    format!("{MGR_APP}-{id}")
}

pub fn mgr_keyring_secret(id: &str) -> String {
    format!("{MGR_APP}-{id}-keyring")
}

impl CephCluster {
    pub fn new_mgr_deployment(&self, id: &str) -> Result<appsv1::Deployment, types::error::Error> {
        let mut labels = daemon_labels(MGR_APP, &self.require_namespace()?);
        labels.insert("mgr".to_owned(), id.to_owned());
        labels.insert("ceph_daemon_type".to_owned(), "mgr".to_owned());
        labels.insert("ceph_daemon_id".to_owned(), id.to_owned());

        let (mut volumes, mut mounts) = config_volumes();
        let (keyring, keyring_mount) = keyring_volume(&mgr_keyring_secret(id));
        volumes.push(keyring);
        mounts.push(keyring_mount);

        let mut pod = corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "mgr".to_owned(),
                image: Some(self.daemon_image(UpgradeStep::Mgrs).to_owned()),
                image_pull_policy: Some(self.image_pull_policy()),
                command: Some(vec!["ceph-mgr".to_owned()]),
                args: Some(vec![
                    "--foreground".to_owned(),
                    format!("--id={id}"),
                    format!("--keyring={KEYRING_MOUNT_PATH}/keyring"),
                ]),
                ports: Some(vec![corev1::ContainerPort {
                    name: Some("http-metrics".to_owned()),
                    container_port: MGR_METRICS_PORT,
                    ..Default::default()
                }]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            host_network: Some(self.spec.network.host_network),
            ..Default::default()
        };
        self.placement("mgr").apply(&mut pod, None);

        Ok(appsv1::Deployment {
            metadata: child_meta(self, mgr_deployment_name(id), labels.clone()),
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

    pub fn new_mgr_service(&self) -> Result<corev1::Service, types::error::Error> {
        let labels = daemon_labels(MGR_APP, &self.require_namespace()?);
        Ok(corev1::Service {
            metadata: child_meta(self, MGR_APP, labels.clone()),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(labels),
                ports: Some(vec![corev1::ServicePort {
                    name: Some("http-metrics".to_owned()),
                    port: MGR_METRICS_PORT,
                    target_port: Some(intstr::IntOrString::Int(MGR_METRICS_PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
