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

use k8s_openapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_FAILURE_DOMAIN: &str = "host";
pub const DEFAULT_REPLICA_SIZE: u32 = 3;

/// Durability and placement settings for a RADOS pool.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,

    #[serde(default)]
    pub replicated: ReplicatedSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erasure_coded: Option<ErasureCodedSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_mode: Option<String>,

    /// Extra `ceph osd pool set` key/value pairs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedSpec {
    pub size: u32,

    #[serde(default)]
    pub require_safe_replica_size: bool,
}

impl Default for ReplicatedSpec {
    fn default() -> Self {
        Self {
            size: DEFAULT_REPLICA_SIZE,
            require_safe_replica_size: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErasureCodedSpec {
    pub data_chunks: u32,
    pub coding_chunks: u32,
}

impl PoolSpec {
    pub fn failure_domain(&self) -> &str {
        self.failure_domain
            .as_deref()
            .unwrap_or(DEFAULT_FAILURE_DOMAIN)
    }

    pub fn is_erasure_coded(&self) -> bool {
        self.erasure_coded.is_some()
    }

    /// Rejects shapes the storage engine would refuse.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ec) = &self.erasure_coded {
            if ec.data_chunks < 2 || ec.coding_chunks < 1 {
                return Err(format!(
                    "erasure coded pools need at least 2 data and 1 coding chunks, got {}+{}",
                    ec.data_chunks, ec.coding_chunks
                ));
            }
            return Ok(());
        }

        if self.replicated.size == 0 {
            return Err("replicated size must be at least 1".to_owned());
        }
        if self.replicated.size == 1 && self.replicated.require_safe_replica_size {
            return Err(
                "replicated size 1 needs requireSafeReplicaSize set to false".to_owned(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_is_three_way_replicated() {
        let spec = PoolSpec::default();
        assert_eq!(spec.replicated.size, 3);
        assert_eq!(spec.failure_domain(), "host");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_single_replica_requires_opt_out() {
        let mut spec = PoolSpec::default();
        spec.replicated.size = 1;
        assert!(spec.validate().is_err());

        spec.replicated.require_safe_replica_size = false;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_erasure_coded_chunk_minimums() {
        let spec = PoolSpec {
            erasure_coded: Some(ErasureCodedSpec {
                data_chunks: 1,
                coding_chunks: 1,
            }),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }
}
