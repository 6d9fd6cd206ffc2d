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
use crate::types::v1::cluster::config::{config_volumes, keyring_volume};
use crate::types::v1::cluster::{CephCluster, DeviceSetSpec, UpgradeStep};
use crate::types::v1::{child_meta, daemon_labels};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const OSD_APP: &str = "rook-ceph-osd";
pub const OSD_PREPARE_APP: &str = "rook-ceph-osd-prepare";
pub const OSD_ID_LABEL: &str = "ceph-osd-id";
pub const OSD_LOCATION_LABEL: &str = "ceph.rook.io/location";
pub const OSD_DEVICE_ANNOTATION: &str = "ceph.rook.io/device";
pub const OSD_UUID_ANNOTATION: &str = "ceph.rook.io/osd-uuid";
pub const PVC_LABEL: &str = "ceph.rook.io/pvc";
pub const OSD_KEYRING_SECRET: &str = "rook-ceph-osd-keyring";
/// Key holding the serialized [`OrchestrationStatus`] in the status ConfigMap.
pub const PREPARE_STATUS_KEY: &str = "status";

pub fn osd_deployment_name(id: u32) -> String {
    format!("{OSD_APP}-{id}")
}

pub fn prepare_job_name(location: &str) -> String {
    format!("{OSD_PREPARE_APP}-{location}")
}

pub fn prepare_status_configmap(location: &str) -> String {
    format!("{OSD_APP}-{location}-status")
}

pub fn device_set_pvc_name(set: &str, index: u32) -> String {
    format!("{set}-data-{index}")
}

/// Progress report written by a prepare job into its status ConfigMap.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct OrchestrationStatus {
    pub status: PrepareState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub osds: Vec<PreparedOsd>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrepareState {
    Starting,
    Orchestrating,
    Completed,
    Failed,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PreparedOsd {
    pub id: u32,
    pub uuid: String,
    pub device: String,
}

/// Where an osd lives: a host device or a claim-backed volume.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OsdLocation {
    Host { node: String },
    Claim { pvc: String },
}

impl OsdLocation {
    pub fn name(&self) -> &str {
        match self {
            OsdLocation::Host { node } => node,
            OsdLocation::Claim { pvc } => pvc,
        }
    }
}

impl CephCluster {
    fn osd_volumes(&self) -> (Vec<corev1::Volume>, Vec<corev1::VolumeMount>) {
        let (mut volumes, mut mounts) = config_volumes();
        let (keyring, keyring_mount) = keyring_volume(OSD_KEYRING_SECRET);
        volumes.push(keyring);
        mounts.push(keyring_mount);

        for (name, path) in [("devices", "/dev"), ("run-udev", "/run/udev")] {
            volumes.push(corev1::Volume {
                name: name.to_owned(),
                host_path: Some(corev1::HostPathVolumeSource {
                    path: path.to_owned(),
                    type_: None,
                }),
                ..Default::default()
            });
            mounts.push(corev1::VolumeMount {
                name: name.to_owned(),
                mount_path: path.to_owned(),
                ..Default::default()
            });
        }
        (volumes, mounts)
    }

    fn pvc_volume(pvc: &str) -> corev1::Volume {
        corev1::Volume {
            name: "osd-block".to_owned(),
            persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                claim_name: pvc.to_owned(),
                read_only: None,
            }),
            ..Default::default()
        }
    }

    /// Job that partitions `devices` on `location` and reports the created
    /// osds through its status ConfigMap.
    pub fn new_osd_prepare_job(
        &self,
        location: &OsdLocation,
        devices: &[String],
        operator_image: &str,
    ) -> Result<batchv1::Job, types::error::Error> {
        let ns = self.require_namespace()?;
        let mut labels = daemon_labels(OSD_PREPARE_APP, &ns);
        labels.insert(OSD_LOCATION_LABEL.to_owned(), location.name().to_owned());

        let (mut volumes, mut mounts) = self.osd_volumes();
        let mut volume_devices = None;
        let pinned = match location {
            OsdLocation::Host { node } => Some(node.as_str()),
            OsdLocation::Claim { pvc } => {
                volumes.push(Self::pvc_volume(pvc));
                volume_devices = Some(vec![corev1::VolumeDevice {
                    name: "osd-block".to_owned(),
                    device_path: format!("/mnt/{pvc}"),
                }]);
                None
            }
        };
        mounts.push(corev1::VolumeMount {
            name: "rook-data".to_owned(),
            mount_path: "/var/lib/rook".to_owned(),
            ..Default::default()
        });
        volumes.push(corev1::Volume {
            name: "rook-data".to_owned(),
            host_path: Some(corev1::HostPathVolumeSource {
                path: self.data_dir_host_path().to_owned(),
                type_: Some("DirectoryOrCreate".to_owned()),
            }),
            ..Default::default()
        });

        let env = [
            ("ROOK_CLUSTER_ID", ns.clone()),
            ("ROOK_LOCATION", location.name().to_owned()),
            ("ROOK_DATA_DEVICES", devices.join(",")),
            ("ROOK_CEPH_IMAGE", self.daemon_image(UpgradeStep::Osds).to_owned()),
            (
                "ROOK_STATUS_CONFIGMAP",
                prepare_status_configmap(location.name()),
            ),
        ]
        .into_iter()
        .map(|(name, value)| corev1::EnvVar {
            name: name.to_owned(),
            value: Some(value),
            ..Default::default()
        })
        .collect();

        let mut pod = corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "provision".to_owned(),
                image: Some(operator_image.to_owned()),
                args: Some(vec![
                    "ceph".to_owned(),
                    "osd".to_owned(),
                    "provision".to_owned(),
                ]),
                env: Some(env),
                security_context: Some(corev1::SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                volume_mounts: Some(mounts),
                volume_devices,
                ..Default::default()
            }],
            volumes: Some(volumes),
            restart_policy: Some("OnFailure".to_owned()),
            ..Default::default()
        };
        self.placement("prepareosd").apply(&mut pod, pinned);

        Ok(batchv1::Job {
            metadata: child_meta(self, prepare_job_name(location.name()), labels.clone()),
            spec: Some(batchv1::JobSpec {
                backoff_limit: Some(3),
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

    pub fn new_osd_deployment(
        &self,
        osd: &PreparedOsd,
        location: &OsdLocation,
        fsid: &str,
    ) -> Result<appsv1::Deployment, types::error::Error> {
        let ns = self.require_namespace()?;
        let mut labels = daemon_labels(OSD_APP, &ns);
        labels.insert(OSD_ID_LABEL.to_owned(), osd.id.to_string());
        labels.insert(OSD_LOCATION_LABEL.to_owned(), location.name().to_owned());
        labels.insert("ceph_daemon_type".to_owned(), "osd".to_owned());
        labels.insert("ceph_daemon_id".to_owned(), osd.id.to_string());

        let (mut volumes, mounts) = self.osd_volumes();
        let mut volume_devices = None;
        let pinned = match location {
            OsdLocation::Host { node } => Some(node.as_str()),
            OsdLocation::Claim { pvc } => {
                labels.insert(PVC_LABEL.to_owned(), pvc.clone());
                volumes.push(Self::pvc_volume(pvc));
                volume_devices = Some(vec![corev1::VolumeDevice {
                    name: "osd-block".to_owned(),
                    device_path: osd.device.clone(),
                }]);
                None
            }
        };

        let mut pod = corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "osd".to_owned(),
                image: Some(self.daemon_image(UpgradeStep::Osds).to_owned()),
                image_pull_policy: Some(self.image_pull_policy()),
                command: Some(vec!["ceph-osd".to_owned()]),
                args: Some(vec![
                    "--foreground".to_owned(),
                    format!("--id={}", osd.id),
                    format!("--fsid={fsid}"),
                    format!("--osd-uuid={}", osd.uuid),
                ]),
                security_context: Some(corev1::SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                volume_mounts: Some(mounts),
                volume_devices,
                ..Default::default()
            }],
            volumes: Some(volumes),
            host_network: Some(self.spec.network.host_network),
            ..Default::default()
        };
        self.placement("osd").apply(&mut pod, pinned);

        let mut meta = child_meta(self, osd_deployment_name(osd.id), labels.clone());
        meta.annotations = Some(BTreeMap::from([
            (OSD_DEVICE_ANNOTATION.to_owned(), osd.device.clone()),
            (OSD_UUID_ANNOTATION.to_owned(), osd.uuid.clone()),
        ]));

        Ok(appsv1::Deployment {
            metadata: meta,
            spec: Some(appsv1::DeploymentSpec {
                replicas: Some(1),
                selector: metav1::LabelSelector {
                    match_labels: Some(
                        [
                            ("app".to_owned(), OSD_APP.to_owned()),
                            (OSD_ID_LABEL.to_owned(), osd.id.to_string()),
                        ]
                        .into(),
                    ),
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

    /// Block-mode claims for one storage class device set.
    pub fn new_device_set_pvcs(
        &self,
        set: &DeviceSetSpec,
    ) -> Result<Vec<corev1::PersistentVolumeClaim>, types::error::Error> {
        let ns = self.require_namespace()?;
        let mut labels = daemon_labels(OSD_APP, &ns);
        labels.insert("ceph.rook.io/DeviceSet".to_owned(), set.name.clone());

        let size = set.size.clone().unwrap_or_else(|| "10Gi".to_owned());
        Ok((0..set.count)
            .map(|i| corev1::PersistentVolumeClaim {
                metadata: child_meta(self, device_set_pvc_name(&set.name, i), labels.clone()),
                spec: Some(corev1::PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                    volume_mode: Some("Block".to_owned()),
                    storage_class_name: set.storage_class_name.clone(),
                    resources: Some(corev1::VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([("storage".to_owned(), Quantity(size.clone()))])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orchestration_status() {
        let raw = r#"{"status":"completed","osds":[{"id":3,"uuid":"u-3","device":"/dev/sdb"}]}"#;
        let status: OrchestrationStatus = serde_json::from_str(raw).unwrap();
        assert_eq!(status.status, PrepareState::Completed);
        assert_eq!(status.osds[0].id, 3);
    }

    #[test]
    fn test_osd_deployment_pinned_to_host() {
        let cluster = crate::tests::create_test_cluster(3);
        let osd = PreparedOsd {
            id: 7,
            uuid: "uuid-7".to_owned(),
            device: "/dev/sdc".to_owned(),
        };
        let location = OsdLocation::Host {
            node: "node-2".to_owned(),
        };
        let deploy = cluster.new_osd_deployment(&osd, &location, "fsid").unwrap();

        assert_eq!(deploy.metadata.name.as_deref(), Some("rook-ceph-osd-7"));
        let annotations = deploy.metadata.annotations.clone().unwrap();
        assert_eq!(
            annotations.get(OSD_DEVICE_ANNOTATION).map(String::as_str),
            Some("/dev/sdc")
        );
        let pod = deploy.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.node_selector
                .unwrap()
                .get("kubernetes.io/hostname")
                .map(String::as_str),
            Some("node-2")
        );
    }

    #[test]
    fn test_device_set_pvcs() {
        let cluster = crate::tests::create_test_cluster(3);
        let pvcs = cluster
            .new_device_set_pvcs(&DeviceSetSpec {
                name: "set1".to_owned(),
                count: 2,
                storage_class_name: Some("gp3".to_owned()),
                size: None,
            })
            .unwrap();
        assert_eq!(pvcs.len(), 2);
        assert_eq!(pvcs[1].metadata.name.as_deref(), Some("set1-data-1"));
        assert_eq!(
            pvcs[0].spec.as_ref().unwrap().volume_mode.as_deref(),
            Some("Block")
        );
    }
}
