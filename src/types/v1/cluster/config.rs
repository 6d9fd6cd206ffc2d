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

//! Cluster-wide configuration objects: the mon endpoint map and `ceph.conf`.

use crate::types;
use crate::types::error::InvalidFieldSnafu;
use crate::types::v1::cluster::{CephCluster, NetworkSpec};
use crate::types::v1::{ResourceIdentity, child_meta, daemon_labels};
use crate::utils::naming;
use k8s_openapi::api::core::v1 as corev1;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::collections::BTreeMap;

pub const MON_ENDPOINTS_CONFIGMAP: &str = "rook-ceph-mon-endpoints";
pub const CONFIG_CONFIGMAP: &str = "rook-ceph-config";
pub const CONFIG_MOUNT_PATH: &str = "/etc/ceph";
pub const KEYRING_MOUNT_PATH: &str = "/etc/ceph/keyring-store";

pub const ENDPOINTS_KEY: &str = "data";
pub const MAX_MON_ID_KEY: &str = "maxMonId";
pub const MAPPING_KEY: &str = "mapping";

pub const MON_V1_PORT: u16 = 6789;
pub const MON_V2_PORT: u16 = 3300;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct MonMapping {
    #[serde(default)]
    pub node: BTreeMap<String, NodeInfo>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub address: String,
}

/// Contents of the `rook-ceph-mon-endpoints` ConfigMap.
#[derive(Clone, Debug, PartialEq)]
pub struct MonEndpoints {
    /// mon name to `ip:port`
    pub endpoints: BTreeMap<String, String>,
    /// Highest mon index ever handed out; never reused.
    pub max_mon_id: i64,
    pub mapping: MonMapping,
}

impl Default for MonEndpoints {
    fn default() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            max_mon_id: -1,
            mapping: MonMapping::default(),
        }
    }
}

impl MonEndpoints {
    pub fn parse(data: &BTreeMap<String, String>) -> Result<Self, types::error::Error> {
        let mut endpoints = BTreeMap::new();
        for entry in data
            .get(ENDPOINTS_KEY)
            .map(String::as_str)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            let Some((name, addr)) = entry.split_once('=') else {
                return InvalidFieldSnafu {
                    field: ENDPOINTS_KEY,
                    message: format!("malformed mon endpoint {entry:?}"),
                }
                .fail();
            };
            endpoints.insert(name.to_owned(), addr.to_owned());
        }

        let max_mon_id = match data.get(MAX_MON_ID_KEY) {
            Some(raw) if !raw.is_empty() => {
                raw.parse::<i64>().map_err(|e| types::error::Error::InvalidField {
                    field: MAX_MON_ID_KEY.to_owned(),
                    message: e.to_string(),
                })?
            }
            _ => -1,
        };

        let mapping = match data.get(MAPPING_KEY) {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => MonMapping::default(),
        };

        let parsed = Self {
            endpoints,
            max_mon_id,
            mapping,
        };

        let highest = parsed
            .endpoints
            .keys()
            .filter_map(|n| naming::name_to_index(n))
            .max();
        ensure!(
            highest.is_none_or(|h| (h as i64) <= parsed.max_mon_id),
            InvalidFieldSnafu {
                field: MAX_MON_ID_KEY,
                message: format!(
                    "maxMonId {} is lower than an existing mon index",
                    parsed.max_mon_id
                ),
            }
        );

        Ok(parsed)
    }

    pub fn to_data(&self) -> Result<BTreeMap<String, String>, types::error::Error> {
        let data = self
            .endpoints
            .iter()
            .map(|(name, addr)| format!("{name}={addr}"))
            .collect::<Vec<_>>()
            .join(",");

        Ok([
            (ENDPOINTS_KEY.to_owned(), data),
            (MAX_MON_ID_KEY.to_owned(), self.max_mon_id.to_string()),
            (MAPPING_KEY.to_owned(), serde_json::to_string(&self.mapping)?),
        ]
        .into_iter()
        .collect())
    }

    /// Name for the next mon. Indexes are never recycled.
    pub fn next_name(&self) -> String {
        naming::index_to_name((self.max_mon_id + 1).max(0) as usize)
    }

    pub fn add(&mut self, name: &str, address: &str, node: &str) {
        self.endpoints
            .insert(name.to_owned(), format!("{address}:{MON_V1_PORT}"));
        self.mapping.node.insert(
            name.to_owned(),
            NodeInfo {
                name: node.to_owned(),
                hostname: node.to_owned(),
                address: address.to_owned(),
            },
        );
        if let Some(index) = naming::name_to_index(name) {
            self.max_mon_id = self.max_mon_id.max(index as i64);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.endpoints.remove(name);
        self.mapping.node.remove(name);
    }

    pub fn node_of(&self, name: &str) -> Option<&str> {
        self.mapping.node.get(name).map(|n| n.name.as_str())
    }

    /// `mon_host` value in msgr2 form.
    pub fn mon_host(&self) -> String {
        self.endpoints
            .values()
            .map(|addr| {
                let ip = addr.rsplit_once(':').map(|(ip, _)| ip).unwrap_or(addr);
                format!("[v2:{ip}:{MON_V2_PORT},v1:{ip}:{MON_V1_PORT}]")
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Renders `ceph.conf` for daemons and for the operator's own CLI calls.
pub fn render_ceph_conf(fsid: &str, endpoints: &MonEndpoints, network: &NetworkSpec) -> String {
    let mut conf = String::from("[global]\n");
    conf.push_str(&format!("fsid = {fsid}\n"));
    conf.push_str(&format!(
        "mon initial members = {}\n",
        endpoints.endpoints.keys().cloned().collect::<Vec<_>>().join(" ")
    ));
    conf.push_str(&format!("mon host = {}\n", endpoints.mon_host()));

    let connections = &network.connections;
    if connections.encryption.enabled {
        conf.push_str("ms_cluster_mode = secure\n");
        conf.push_str("ms_service_mode = secure\n");
        conf.push_str("ms_client_mode = secure\n");
    }
    if connections.compression.enabled {
        conf.push_str("ms_osd_compress_mode = force\n");
    }
    if connections.require_msgr2 {
        conf.push_str("ms_bind_msgr1 = false\n");
    }
    conf
}

impl CephCluster {
    pub fn new_mon_endpoints_configmap(
        &self,
        endpoints: &MonEndpoints,
    ) -> Result<corev1::ConfigMap, types::error::Error> {
        let ns = self.require_namespace()?;
        Ok(corev1::ConfigMap {
            metadata: child_meta(
                self,
                MON_ENDPOINTS_CONFIGMAP,
                daemon_labels("rook-ceph-mon", &ns),
            ),
            data: Some(endpoints.to_data()?),
            ..Default::default()
        })
    }

    pub fn new_config_configmap(
        &self,
        fsid: &str,
        endpoints: &MonEndpoints,
    ) -> Result<corev1::ConfigMap, types::error::Error> {
        let ns = self.require_namespace()?;
        Ok(corev1::ConfigMap {
            metadata: child_meta(self, CONFIG_CONFIGMAP, daemon_labels("rook-ceph", &ns)),
            data: Some(
                [(
                    "ceph.conf".to_owned(),
                    render_ceph_conf(fsid, endpoints, &self.spec.network),
                )]
                .into(),
            ),
            ..Default::default()
        })
    }
}

/// Volume and mount for the shared `ceph.conf`.
pub fn config_volumes() -> (Vec<corev1::Volume>, Vec<corev1::VolumeMount>) {
    (
        vec![corev1::Volume {
            name: "rook-config".to_owned(),
            config_map: Some(corev1::ConfigMapVolumeSource {
                name: CONFIG_CONFIGMAP.to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        }],
        vec![corev1::VolumeMount {
            name: "rook-config".to_owned(),
            mount_path: CONFIG_MOUNT_PATH.to_owned(),
            read_only: Some(true),
            ..Default::default()
        }],
    )
}

/// Volume and mount for a daemon keyring Secret.
pub fn keyring_volume(secret_name: &str) -> (corev1::Volume, corev1::VolumeMount) {
    (
        corev1::Volume {
            name: "keyring".to_owned(),
            secret: Some(corev1::SecretVolumeSource {
                secret_name: Some(secret_name.to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        },
        corev1::VolumeMount {
            name: "keyring".to_owned(),
            mount_path: KEYRING_MOUNT_PATH.to_owned(),
            read_only: Some(true),
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_mon_endpoints() {
        let parsed = MonEndpoints::parse(&data(&[
            ("data", "a=10.0.0.1:6789,b=10.0.0.2:6789"),
            ("maxMonId", "2"),
            (
                "mapping",
                r#"{"node":{"a":{"Name":"n1","Hostname":"n1","Address":"10.1.0.1"}}}"#,
            ),
        ]))
        .unwrap();

        assert_eq!(parsed.endpoints.len(), 2);
        assert_eq!(parsed.max_mon_id, 2);
        assert_eq!(parsed.node_of("a"), Some("n1"));
        assert_eq!(parsed.next_name(), "d");
    }

    #[test]
    fn test_empty_configmap_starts_at_a() {
        let parsed = MonEndpoints::parse(&BTreeMap::new()).unwrap();
        assert_eq!(parsed.next_name(), "a");
    }

    #[test]
    fn test_max_mon_id_below_existing_is_rejected() {
        let result = MonEndpoints::parse(&data(&[("data", "c=10.0.0.3:6789"), ("maxMonId", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_removed_name_is_not_reused() {
        let mut endpoints = MonEndpoints::default();
        endpoints.add("a", "10.0.0.1", "n1");
        endpoints.add("b", "10.0.0.2", "n2");
        endpoints.remove("b");
        assert_eq!(endpoints.next_name(), "c");

        let round = MonEndpoints::parse(&endpoints.to_data().unwrap()).unwrap();
        assert_eq!(round, endpoints);
    }

    #[test]
    fn test_render_conf_wire_settings() {
        let mut endpoints = MonEndpoints::default();
        endpoints.add("a", "10.0.0.1", "n1");
        let mut network = NetworkSpec::default();
        network.connections.encryption.enabled = true;
        network.connections.compression.enabled = true;

        let conf = render_ceph_conf("fsid-1", &endpoints, &network);
        assert!(conf.contains("fsid = fsid-1"));
        assert!(conf.contains("mon host = [v2:10.0.0.1:3300,v1:10.0.0.1:6789]"));
        assert!(conf.contains("ms_cluster_mode = secure"));
        assert!(conf.contains("ms_osd_compress_mode = force"));
    }
}
