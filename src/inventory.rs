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

//! Candidate hosts and devices for storage daemons.

use crate::types::v1::cluster::{NodeSpec, StorageSpec};
use k8s_openapi::api::core::v1 as corev1;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEVICE_CONFIGMAP_PREFIX: &str = "local-device-";
pub const DEVICES_KEY: &str = "devices";
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// One entry of the device list the discovery daemon publishes per node.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalDevice {
    pub name: String,
    #[serde(default)]
    pub dev_links: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default)]
    pub filesystem: String,
    #[serde(default)]
    pub available: bool,
}

pub fn device_configmap_name(node: &str) -> String {
    format!("{DEVICE_CONFIGMAP_PREFIX}{node}")
}

/// Devices listed in a discovery ConfigMap. Missing or malformed data yields no devices.
pub fn parse_devices(cm: &corev1::ConfigMap) -> Vec<LocalDevice> {
    cm.data
        .as_ref()
        .and_then(|d| d.get(DEVICES_KEY))
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

/// Name the node is addressed by in the storage spec.
pub fn node_hostname(node: &corev1::Node) -> String {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(HOSTNAME_LABEL))
        .cloned()
        .or_else(|| node.metadata.name.clone())
        .unwrap_or_default()
}

/// Ready and schedulable.
pub fn is_candidate_node(node: &corev1::Node) -> bool {
    let schedulable = !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"));
    schedulable && ready
}

/// Hosts that should run storage daemons: every candidate node with
/// `useAllNodes`, otherwise the listed nodes that are candidates.
pub fn discover_nodes(storage: &StorageSpec, nodes: &[corev1::Node]) -> Vec<String> {
    let mut hosts: Vec<String> = nodes
        .iter()
        .filter(|n| is_candidate_node(n))
        .map(node_hostname)
        .filter(|host| storage.use_all_nodes || storage.nodes.iter().any(|n| &n.name == host))
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

fn strip_dev(name: &str) -> &str {
    name.strip_prefix("/dev/").unwrap_or(name)
}

/// Devices on one host to provision, by name.
pub fn select_devices(
    storage: &StorageSpec,
    node: Option<&NodeSpec>,
    devices: &[LocalDevice],
) -> Result<Vec<String>, String> {
    let usable = devices
        .iter()
        .filter(|d| d.available && d.filesystem.is_empty());

    if let Some(listed) = node.filter(|n| !n.devices.is_empty()) {
        return Ok(usable
            .filter(|d| listed.devices.iter().any(|l| strip_dev(&l.name) == strip_dev(&d.name)))
            .map(|d| d.name.clone())
            .collect());
    }

    let filter = node
        .and_then(|n| n.device_filter.as_deref())
        .or(storage.device_filter.as_deref());
    if let Some(pattern) = filter {
        let re = Regex::new(pattern).map_err(|e| format!("invalid deviceFilter {pattern:?}: {e}"))?;
        return Ok(usable
            .filter(|d| re.is_match(strip_dev(&d.name)))
            .map(|d| d.name.clone())
            .collect());
    }

    if storage.use_all_devices {
        return Ok(usable.map(|d| d.name.clone()).collect());
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::v1::cluster::DeviceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

    fn node(name: &str, ready: bool, unschedulable: bool) -> corev1::Node {
        corev1::Node {
            metadata: metav1::ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            spec: Some(corev1::NodeSpec {
                unschedulable: Some(unschedulable),
                ..Default::default()
            }),
            status: Some(corev1::NodeStatus {
                conditions: Some(vec![corev1::NodeCondition {
                    type_: "Ready".to_owned(),
                    status: if ready { "True" } else { "False" }.to_owned(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn dev(name: &str, available: bool, fs: &str) -> LocalDevice {
        LocalDevice {
            name: name.to_owned(),
            available,
            filesystem: fs.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_discover_nodes_filters_unready_and_cordoned() {
        let nodes = vec![
            node("n1", true, false),
            node("n2", false, false),
            node("n3", true, true),
        ];
        let storage = StorageSpec {
            use_all_nodes: true,
            ..Default::default()
        };
        assert_eq!(discover_nodes(&storage, &nodes), vec!["n1"]);

        let storage = StorageSpec {
            nodes: vec![NodeSpec {
                name: "n2".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(discover_nodes(&storage, &nodes).is_empty());
    }

    #[test]
    fn test_select_devices_skips_used() {
        let devices = vec![dev("sda", false, ""), dev("sdb", true, ""), dev("sdc", true, "ext4")];
        let storage = StorageSpec {
            use_all_devices: true,
            ..Default::default()
        };
        assert_eq!(select_devices(&storage, None, &devices).unwrap(), vec!["sdb"]);
    }

    #[test]
    fn test_select_devices_precedence() {
        let devices = vec![dev("sdb", true, ""), dev("nvme0n1", true, "")];
        let storage = StorageSpec {
            use_all_devices: true,
            device_filter: Some("^sd".to_owned()),
            ..Default::default()
        };
        assert_eq!(select_devices(&storage, None, &devices).unwrap(), vec!["sdb"]);

        let node = NodeSpec {
            name: "n1".to_owned(),
            devices: vec![DeviceSpec {
                name: "/dev/nvme0n1".to_owned(),
            }],
            device_filter: None,
        };
        assert_eq!(
            select_devices(&storage, Some(&node), &devices).unwrap(),
            vec!["nvme0n1"]
        );
    }

    #[test]
    fn test_invalid_filter_is_error() {
        let storage = StorageSpec {
            device_filter: Some("(".to_owned()),
            ..Default::default()
        };
        assert!(select_devices(&storage, None, &[dev("sdb", true, "")]).is_err());
    }

    #[test]
    fn test_parse_devices() {
        let cm = corev1::ConfigMap {
            data: Some(
                [(
                    DEVICES_KEY.to_owned(),
                    r#"[{"name":"sdb","devLinks":"/dev/disk/by-id/x","size":1000,"rotational":true,"filesystem":"","available":true}]"#
                        .to_owned(),
                )]
                .into(),
            ),
            ..Default::default()
        };
        let devices = parse_devices(&cm);
        assert_eq!(devices.len(), 1);
        assert!(devices[0].available);
    }
}
