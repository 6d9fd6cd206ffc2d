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
use crate::types::v1::cluster::config::{
    KEYRING_MOUNT_PATH, MON_V1_PORT, MON_V2_PORT, config_volumes, keyring_volume,
};
use crate::types::v1::{child_meta, daemon_labels};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr;
use std::collections::BTreeMap;

pub const MON_APP: &str = "rook-ceph-mon";
pub const MON_ID_LABEL: &str = "mon";
pub const CANARY_LABEL: &str = "mon_canary";
pub const MONS_KEYRING_SECRET: &str = "rook-ceph-mons-keyring";

pub fn mon_deployment_name(id: &str) -> String {
    format!("{MON_APP}-{id}")
}

pub fn mon_canary_name(id: &str) -> String {
    format!("{MON_APP}-{id}-canary")
}

impl CephCluster {
    fn mon_labels(&self, id: &str, canary: bool) -> Result<BTreeMap<String, String>, types::error::Error> {
        let mut labels = daemon_labels(MON_APP, &self.require_namespace()?);
        labels.insert(MON_ID_LABEL.to_owned(), id.to_owned());
        labels.insert("ceph_daemon_type".to_owned(), "mon".to_owned());
        labels.insert("ceph_daemon_id".to_owned(), id.to_owned());
        if canary {
            labels.insert(CANARY_LABEL.to_owned(), "true".to_owned());
        }
        Ok(labels)
    }

    /// Stable-address Service fronting one mon.
    pub fn new_mon_service(&self, id: &str) -> Result<corev1::Service, types::error::Error> {
        let labels = self.mon_labels(id, false)?;
        let selector: BTreeMap<String, String> = labels
            .iter()
            .filter(|(k, _)| k.as_str() == "app" || k.as_str() == MON_ID_LABEL || k.as_str() == "rook_cluster")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(corev1::Service {
            metadata: child_meta(self, mon_deployment_name(id), labels),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(selector),
                ports: Some(vec![
                    corev1::ServicePort {
                        name: Some("tcp-msgr1".to_owned()),
                        port: MON_V1_PORT as i32,
                        target_port: Some(intstr::IntOrString::Int(MON_V1_PORT as i32)),
                        ..Default::default()
                    },
                    corev1::ServicePort {
                        name: Some("tcp-msgr2".to_owned()),
                        port: MON_V2_PORT as i32,
                        target_port: Some(intstr::IntOrString::Int(MON_V2_PORT as i32)),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// A mon Deployment pinned to `node`.
    ///
    /// Canaries share the identity and placement of the real mon but run a
    /// sleeping container without the data volume, so a failed placement
    /// leaves nothing behind.
    pub fn new_mon_deployment(
        &self,
        id: &str,
        node: &str,
        public_ip: Option<&str>,
        fsid: &str,
        canary: bool,
    ) -> Result<appsv1::Deployment, types::error::Error> {
        let labels = self.mon_labels(id, canary)?;
        let name = if canary {
            mon_canary_name(id)
        } else {
            mon_deployment_name(id)
        };

        let (mut volumes, mut mounts) = config_volumes();
        let (keyring, keyring_mount) = keyring_volume(MONS_KEYRING_SECRET);
        volumes.push(keyring);
        mounts.push(keyring_mount);

        let mon_data = format!("/var/lib/ceph/mon/ceph-{id}");
        let mut init_containers = None;

        let (command, args) = if canary {
            (vec!["sleep".to_owned()], vec!["3600".to_owned()])
        } else {
            volumes.push(corev1::Volume {
                name: "ceph-daemon-data".to_owned(),
                host_path: Some(corev1::HostPathVolumeSource {
                    path: format!("{}/mon-{id}/data", self.data_dir_host_path()),
                    type_: Some("DirectoryOrCreate".to_owned()),
                }),
                ..Default::default()
            });
            mounts.push(corev1::VolumeMount {
                name: "ceph-daemon-data".to_owned(),
                mount_path: mon_data.clone(),
                ..Default::default()
            });

            let mut args = vec![
                format!("--fsid={fsid}"),
                format!("--keyring={KEYRING_MOUNT_PATH}/keyring"),
                "--foreground".to_owned(),
                format!("--id={id}"),
                format!("--mon-data={mon_data}"),
            ];
            if let Some(ip) = public_ip {
                args.push(format!("--public-addr={ip}"));
            }

            init_containers = Some(vec![corev1::Container {
                name: "init-mon-fs".to_owned(),
                image: Some(self.daemon_image(UpgradeStep::Mons).to_owned()),
                command: Some(vec!["ceph-mon".to_owned()]),
                args: Some(vec![
                    format!("--fsid={fsid}"),
                    format!("--keyring={KEYRING_MOUNT_PATH}/keyring"),
                    format!("--id={id}"),
                    format!("--mon-data={mon_data}"),
                    "--mkfs".to_owned(),
                ]),
                volume_mounts: Some(mounts.clone()),
                ..Default::default()
            }]);

            (vec!["ceph-mon".to_owned()], args)
        };

        let mut pod = corev1::PodSpec {
            init_containers,
            containers: vec![corev1::Container {
                name: "mon".to_owned(),
                image: Some(self.daemon_image(UpgradeStep::Mons).to_owned()),
                image_pull_policy: Some(self.image_pull_policy()),
                command: Some(command),
                args: Some(args),
                ports: Some(vec![
                    corev1::ContainerPort {
                        name: Some("tcp-msgr1".to_owned()),
                        container_port: MON_V1_PORT as i32,
                        ..Default::default()
                    },
                    corev1::ContainerPort {
                        name: Some("tcp-msgr2".to_owned()),
                        container_port: MON_V2_PORT as i32,
                        ..Default::default()
                    },
                ]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            host_network: Some(self.spec.network.host_network),
            restart_policy: Some("Always".to_owned()),
            ..Default::default()
        };
        self.placement("mon").apply(&mut pod, Some(node));

        Ok(appsv1::Deployment {
            metadata: child_meta(self, name, labels.clone()),
            spec: Some(appsv1::DeploymentSpec {
                replicas: Some(1),
                selector: metav1::LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                strategy: Some(appsv1::DeploymentStrategy {
                    type_: Some("Recreate".to_owned()),
                    ..Default::default()
                }),
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
    fn test_canary_has_no_data_volume() {
        let cluster = crate::tests::create_test_cluster(3);
        let canary = cluster
            .new_mon_deployment("d", "node-1", None, "fsid", true)
            .unwrap();

        assert_eq!(canary.metadata.name.as_deref(), Some("rook-ceph-mon-d-canary"));
        let pod = canary.spec.unwrap().template.spec.unwrap();
        assert!(pod.init_containers.is_none());
        assert!(
            pod.volumes
                .unwrap()
                .iter()
                .all(|v| v.name != "ceph-daemon-data")
        );
        assert_eq!(
            pod.node_selector
                .unwrap()
                .get("kubernetes.io/hostname")
                .map(String::as_str),
            Some("node-1")
        );
    }

    #[test]
    fn test_mon_deployment_identity() {
        let cluster = crate::tests::create_test_cluster(3);
        let mon = cluster
            .new_mon_deployment("a", "node-1", Some("10.0.0.1"), "fsid", false)
            .unwrap();

        assert_eq!(mon.metadata.name.as_deref(), Some("rook-ceph-mon-a"));
        let labels = mon.metadata.labels.unwrap();
        assert_eq!(labels.get("mon").map(String::as_str), Some("a"));
        assert!(!labels.contains_key("mon_canary"));

        let args = mon.spec.unwrap().template.spec.unwrap().containers[0]
            .args
            .clone()
            .unwrap();
        assert!(args.contains(&"--public-addr=10.0.0.1".to_owned()));
    }

    #[test]
    fn test_mon_service_selects_one_mon() {
        let cluster = crate::tests::create_test_cluster(3);
        let svc = cluster.new_mon_service("b").unwrap();
        let selector = svc.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get("mon").map(String::as_str), Some("b"));
        assert_eq!(selector.len(), 3);
    }
}
