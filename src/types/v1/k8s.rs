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

//! Common Kubernetes enum types used across the operator

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

/// Image pull policy for containers.
/// - Always: Always pull the image
/// - Never: Never pull the image
/// - IfNotPresent: Pull the image if not present locally (default)
///
/// https://kubernetes.io/docs/concepts/containers/images/#image-pull-policy
#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Display)]
#[serde(rename_all = "PascalCase")]
#[schemars(rename_all = "PascalCase")]
pub enum ImagePullPolicy {
    #[strum(to_string = "Always")]
    Always,

    #[strum(to_string = "Never")]
    Never,

    #[strum(to_string = "IfNotPresent")]
    #[default]
    IfNotPresent,
}

/// What happens to backing data when the claim goes away.
#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Display)]
#[serde(rename_all = "PascalCase")]
#[schemars(rename_all = "PascalCase")]
pub enum ReclaimPolicy {
    #[strum(to_string = "Delete")]
    #[default]
    Delete,

    #[strum(to_string = "Retain")]
    Retain,
}

/// Scheduling constraints for one daemon type.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<corev1::Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<corev1::Affinity>,
}

impl Placement {
    /// Applies the placement to a pod spec. A pinned node (mon canaries,
    /// osds) wins over any user node selector.
    pub fn apply(&self, pod: &mut corev1::PodSpec, pinned_node: Option<&str>) {
        let mut selector = self.node_selector.clone().unwrap_or_default();
        if let Some(node) = pinned_node {
            selector.insert("kubernetes.io/hostname".to_owned(), node.to_owned());
        }
        if !selector.is_empty() {
            pod.node_selector = Some(selector);
        }
        if !self.tolerations.is_empty() {
            pod.tolerations = Some(self.tolerations.clone());
        }
        if pinned_node.is_none() {
            pod.affinity = self.affinity.clone();
        }
    }
}

impl Placement {
    /// Whether `node`'s labels satisfy the node selector. Affinity is left to the scheduler.
    pub fn matches_node(&self, node: &corev1::Node) -> bool {
        let Some(selector) = &self.node_selector else {
            return true;
        };
        let labels = node.metadata.labels.clone().unwrap_or_default();
        selector.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Parses a Kubernetes quantity (`10Gi`, `500M`, `1024`) into bytes.
pub fn parse_quantity_bytes(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, suffix) = raw.split_at(split);
    let value: i64 = digits.parse().ok()?;
    let factor: i64 = match suffix {
        "" => 1,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        _ => return None,
    };
    value.checked_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity_bytes() {
        assert_eq!(parse_quantity_bytes("1024"), Some(1024));
        assert_eq!(parse_quantity_bytes("10Gi"), Some(10 * 1024 * 1024 * 1024));
        assert_eq!(parse_quantity_bytes("2M"), Some(2_000_000));
        assert_eq!(parse_quantity_bytes("1Xi"), None);
        assert_eq!(parse_quantity_bytes(""), None);
    }

    #[test]
    fn test_pinned_node_overrides_affinity() {
        let placement = Placement {
            affinity: Some(corev1::Affinity::default()),
            ..Default::default()
        };
        let mut pod = corev1::PodSpec::default();
        placement.apply(&mut pod, Some("node-a"));
        assert!(pod.affinity.is_none());
        assert_eq!(
            pod.node_selector
                .unwrap()
                .get("kubernetes.io/hostname")
                .map(String::as_str),
            Some("node-a")
        );
    }
}
