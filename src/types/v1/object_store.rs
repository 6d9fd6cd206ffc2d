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
use crate::types::v1::pool::PoolSpec;
use crate::types::v1::status::{Condition, Phase, impl_conditioned};
use crate::types::v1::{ResourceIdentity, child_meta, daemon_labels};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr;
use k8s_openapi::schemars::JsonSchema;
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RGW_APP: &str = "rook-ceph-rgw";
pub const RGW_HTTP_PORT: i32 = 8080;
pub const RGW_HTTPS_PORT: i32 = 8443;
pub const CERT_HASH_ANNOTATION: &str = "ceph.rook.io/cert-hash";
pub const CERT_MOUNT_PATH: &str = "/etc/ceph/private";
pub const ADMIN_OPS_USER: &str = "rgw-admin-ops-user";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephObjectStore",
    namespaced,
    status = "ObjectStoreStatus",
    plural = "cephobjectstores",
    singular = "cephobjectstore",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".status.info.endpoint"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    #[serde(default)]
    pub metadata_pool: PoolSpec,

    #[serde(default)]
    pub data_pool: PoolSpec,

    #[serde(default)]
    pub preserve_pools_on_delete: bool,

    #[x_kube(validation = Rule::new("has(self.port) || has(self.securePort)").message("gateway needs a port or a securePort"))]
    pub gateway: GatewaySpec,

    /// Namespaces whose CephObjectStoreUsers may use this store; `*` allows all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_users_in_namespaces: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<i32>,

    #[serde(default = "default_instances")]
    pub instances: i32,

    /// Secret holding `tls.crt` and `tls.key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

fn default_instances() -> i32 {
    1
}

impl Default for GatewaySpec {
    fn default() -> Self {
        Self {
            port: Some(80),
            secure_port: None,
            instances: default_instances(),
            ssl_certificate_ref: None,
            placement: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, String>,
}

impl_conditioned!(ObjectStoreStatus);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Endpoints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insecure: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secure: Vec<String>,
}

/// RADOS pools backing one object store, in creation order.
pub fn store_pools(store: &str) -> Vec<(String, bool)> {
    let mut pools = vec![(".rgw.root".to_owned(), false)];
    for suffix in [
        "rgw.control",
        "rgw.meta",
        "rgw.log",
        "rgw.buckets.index",
        "rgw.buckets.non-ec",
    ] {
        pools.push((format!("{store}.{suffix}"), false));
    }
    pools.push((format!("{store}.rgw.buckets.data"), true));
    pools
}

impl CephObjectStore {
    pub fn service_name(&self) -> String {
        format!("{RGW_APP}-{}", self.name_any())
    }

    pub fn deployment_name(&self) -> String {
        format!("{RGW_APP}-{}-a", self.name_any())
    }

    pub fn keyring_secret_name(&self) -> String {
        format!("{RGW_APP}-{}-a-keyring", self.name_any())
    }

    pub fn rgw_entity(&self) -> String {
        format!("client.rgw.{}.a", self.name_any())
    }

    pub fn is_secure(&self) -> bool {
        self.spec.gateway.port.is_none() && self.spec.gateway.secure_port.is_some()
    }

    /// Cluster-internal S3 endpoint. Plain http wins when both ports are set.
    pub fn endpoint(&self) -> Result<String, types::error::Error> {
        let ns = self.require_namespace()?;
        let svc = self.service_name();
        Ok(match (self.spec.gateway.port, self.spec.gateway.secure_port) {
            (Some(port), _) => format!("http://{svc}.{ns}.svc:{port}"),
            (None, Some(port)) => format!("https://{svc}.{ns}.svc:{port}"),
            (None, None) => format!("http://{svc}.{ns}.svc"),
        })
    }

    pub fn endpoints(&self) -> Result<Endpoints, types::error::Error> {
        let ns = self.require_namespace()?;
        let svc = self.service_name();
        Ok(Endpoints {
            insecure: self
                .spec
                .gateway
                .port
                .map(|p| vec![format!("http://{svc}.{ns}.svc:{p}")])
                .unwrap_or_default(),
            secure: self
                .spec
                .gateway
                .secure_port
                .map(|p| vec![format!("https://{svc}.{ns}.svc:{p}")])
                .unwrap_or_default(),
        })
    }

    pub fn allows_namespace(&self, namespace: &str) -> bool {
        ResourceExt::namespace(self).as_deref() == Some(namespace)
            || self
                .spec
                .allow_users_in_namespaces
                .iter()
                .any(|ns| ns == "*" || ns == namespace)
    }

    pub fn pool_spec(&self, is_data: bool) -> &PoolSpec {
        if is_data {
            &self.spec.data_pool
        } else {
            &self.spec.metadata_pool
        }
    }

    fn rgw_labels(&self) -> Result<BTreeMap<String, String>, types::error::Error> {
        let mut labels = daemon_labels(RGW_APP, &self.require_namespace()?);
        labels.insert("rgw".to_owned(), self.name_any());
        labels.insert("ceph_daemon_type".to_owned(), "rgw".to_owned());
        labels.insert("ceph_daemon_id".to_owned(), self.name_any());
        Ok(labels)
    }

    /// Gateway Deployment. `cert_hash` is stamped on the pod template so a
    /// rotated certificate rolls the pods.
    pub fn new_rgw_deployment(
        &self,
        cluster: &CephCluster,
        cert_hash: Option<&str>,
    ) -> Result<appsv1::Deployment, types::error::Error> {
        let store = self.name_any();
        let labels = self.rgw_labels()?;

        let (mut volumes, mut mounts) = config_volumes();
        let (keyring, keyring_mount) = keyring_volume(&self.keyring_secret_name());
        volumes.push(keyring);
        mounts.push(keyring_mount);

        let mut frontend = String::from("beast");
        if self.spec.gateway.port.is_some() {
            frontend.push_str(&format!(" port={RGW_HTTP_PORT}"));
        }
        if let (Some(_), Some(secret)) = (
            self.spec.gateway.secure_port,
            self.spec.gateway.ssl_certificate_ref.as_ref(),
        ) {
            frontend.push_str(&format!(
                " ssl_port={RGW_HTTPS_PORT} ssl_certificate={CERT_MOUNT_PATH}/tls.crt ssl_private_key={CERT_MOUNT_PATH}/tls.key"
            ));
            volumes.push(corev1::Volume {
                name: "rgw-cert".to_owned(),
                secret: Some(corev1::SecretVolumeSource {
                    secret_name: Some(secret.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(corev1::VolumeMount {
                name: "rgw-cert".to_owned(),
                mount_path: CERT_MOUNT_PATH.to_owned(),
                read_only: Some(true),
                ..Default::default()
            });
        }

        let mut pod = corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "rgw".to_owned(),
                image: Some(cluster.daemon_image(UpgradeStep::Rgw).to_owned()),
                image_pull_policy: Some(cluster.image_pull_policy()),
                command: Some(vec!["radosgw".to_owned()]),
                args: Some(vec![
                    "--foreground".to_owned(),
                    format!("--name={}", self.rgw_entity()),
                    format!("--rgw-realm={store}"),
                    format!("--rgw-zonegroup={store}"),
                    format!("--rgw-zone={store}"),
                    format!("--rgw-frontends={frontend}"),
                ]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        };
        self.spec
            .gateway
            .placement
            .clone()
            .unwrap_or_else(|| cluster.placement("rgw"))
            .apply(&mut pod, None);

        let annotations = cert_hash.map(|hash| {
            BTreeMap::from([(CERT_HASH_ANNOTATION.to_owned(), hash.to_owned())])
        });

        Ok(appsv1::Deployment {
            metadata: child_meta(self, self.deployment_name(), labels.clone()),
            spec: Some(appsv1::DeploymentSpec {
                replicas: Some(self.spec.gateway.instances),
                selector: metav1::LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels),
                        annotations,
                        ..Default::default()
                    }),
                    spec: Some(pod),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    pub fn new_rgw_service(&self) -> Result<corev1::Service, types::error::Error> {
        let labels = self.rgw_labels()?;
        let mut ports = vec![];
        if let Some(port) = self.spec.gateway.port {
            ports.push(corev1::ServicePort {
                name: Some("http".to_owned()),
                port,
                target_port: Some(intstr::IntOrString::Int(RGW_HTTP_PORT)),
                ..Default::default()
            });
        }
        if let Some(port) = self.spec.gateway.secure_port {
            ports.push(corev1::ServicePort {
                name: Some("https".to_owned()),
                port,
                target_port: Some(intstr::IntOrString::Int(RGW_HTTPS_PORT)),
                ..Default::default()
            });
        }

        Ok(corev1::Service {
            metadata: child_meta(self, self.service_name(), labels.clone()),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(labels),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_pools_order() {
        let pools = store_pools("my-store");
        assert_eq!(pools.first().map(|p| p.0.as_str()), Some(".rgw.root"));
        assert_eq!(
            pools.last().map(|p| p.0.as_str()),
            Some("my-store.rgw.buckets.data")
        );
        assert_eq!(pools.iter().filter(|p| p.1).count(), 1);
    }

    #[test]
    fn test_endpoint_scheme() {
        let mut store = crate::tests::create_test_object_store("my-store");
        assert_eq!(
            store.endpoint().unwrap(),
            "http://rook-ceph-rgw-my-store.rook-ceph.svc:80"
        );

        store.spec.gateway.port = None;
        store.spec.gateway.secure_port = Some(443);
        assert!(store.is_secure());
        assert_eq!(
            store.endpoint().unwrap(),
            "https://rook-ceph-rgw-my-store.rook-ceph.svc:443"
        );
    }

    #[test]
    fn test_allows_namespace() {
        let mut store = crate::tests::create_test_object_store("my-store");
        assert!(store.allows_namespace("rook-ceph"));
        assert!(!store.allows_namespace("apps"));

        store.spec.allow_users_in_namespaces = vec!["*".to_owned()];
        assert!(store.allows_namespace("apps"));
    }

    #[test]
    fn test_cert_hash_lands_on_pod_template() {
        let cluster = crate::tests::create_test_cluster(3);
        let mut store = crate::tests::create_test_object_store("my-store");
        store.spec.gateway.secure_port = Some(443);
        store.spec.gateway.ssl_certificate_ref = Some("rgw-tls".to_owned());

        let deploy = store.new_rgw_deployment(&cluster, Some("abc123")).unwrap();
        let template = deploy.spec.unwrap().template;
        assert_eq!(
            template
                .metadata
                .unwrap()
                .annotations
                .unwrap()
                .get(CERT_HASH_ANNOTATION)
                .map(String::as_str),
            Some("abc123")
        );
        let args = template.spec.unwrap().containers[0].args.clone().unwrap();
        assert!(args.iter().any(|a| a.contains("ssl_port=8443")));
    }

    #[test]
    fn test_gateway_image_tracks_upgrade_step() {
        use crate::types::v1::cluster::{ClusterStatus, ClusterVersion, UpgradeProgress};

        let mut cluster = crate::tests::create_test_cluster(3);
        cluster.spec.ceph_version.image = "quay.io/ceph/ceph:v19.2.0".to_owned();
        let mut status = ClusterStatus {
            version: Some(ClusterVersion {
                image: "quay.io/ceph/ceph:v18.2.4".to_owned(),
                version: None,
            }),
            upgrade: Some(UpgradeProgress {
                target_image: "quay.io/ceph/ceph:v19.2.0".to_owned(),
                completed_steps: vec!["OperatorVersion".to_owned(), "Mons".to_owned()],
                current_step: None,
            }),
            ..Default::default()
        };
        cluster.status = Some(status.clone());
        let store = crate::tests::create_test_object_store("my-store");
        let image = |cluster: &CephCluster| {
            store.new_rgw_deployment(cluster, None).unwrap().spec.unwrap().template.spec.unwrap().containers[0]
                .image
                .clone()
        };
        assert_eq!(image(&cluster).as_deref(), Some("quay.io/ceph/ceph:v18.2.4"));

        if let Some(upgrade) = status.upgrade.as_mut() {
            upgrade.completed_steps.push("Rgw".to_owned());
        }
        cluster.status = Some(status);
        assert_eq!(image(&cluster).as_deref(), Some("quay.io/ceph/ceph:v19.2.0"));
    }
}
