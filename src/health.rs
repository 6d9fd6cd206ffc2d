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

//! Folds backend status into the per-cluster health snapshot written to
//! `CephCluster.status.ceph.details`.

use crate::ceph::status::{CephStatus, QuorumStatus};
use k8s_openapi::schemars::JsonSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const ACTIVE_CLEAN: &str = "active+clean";

static CLEAN_STATE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(active\+clean|active\+clean\+scrubbing|active\+clean\+scrubbing\+deep)$").ok()
});

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    pub health: String,
    #[serde(default)]
    pub mons: Vec<MonState>,
    #[serde(default)]
    pub osds: OsdCounts,
    #[serde(default)]
    pub mgr_available: bool,
    #[serde(default)]
    pub pgs: PgCounts,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonState {
    pub name: String,
    pub in_quorum: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OsdCounts {
    pub total: u32,
    pub number_up: u32,
    pub number_in: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PgCounts {
    pub total: u32,
    #[serde(default)]
    pub state_counts: BTreeMap<String, u32>,
}

pub fn aggregate(status: &CephStatus, quorum: &QuorumStatus) -> StatusDetails {
    let mut mons: Vec<MonState> = quorum
        .members()
        .map(|name| MonState {
            name: name.to_owned(),
            in_quorum: quorum.in_quorum(name),
        })
        .collect();
    mons.sort_by(|a, b| a.name.cmp(&b.name));

    StatusDetails {
        health: status.health.status.clone(),
        mons,
        osds: OsdCounts {
            total: status.osdmap.num_osds,
            number_up: status.osdmap.num_up_osds,
            number_in: status.osdmap.num_in_osds,
        },
        mgr_available: status.mgrmap.available,
        pgs: PgCounts {
            total: status.pgmap.num_pgs,
            state_counts: status
                .pgmap
                .pgs_by_state
                .iter()
                .map(|s| (s.state_name.clone(), s.count))
                .collect(),
        },
    }
}

/// Reasons the cluster is not healthy; empty means healthy.
pub fn unhealthy_reasons(details: &StatusDetails, min_mons: u32) -> Vec<String> {
    let mut reasons = Vec::new();

    let in_quorum = details.mons.iter().filter(|m| m.in_quorum).count() as u32;
    if (details.mons.len() as u32) < min_mons {
        reasons.push(format!(
            "{} mons found, at least {min_mons} required",
            details.mons.len()
        ));
    }
    if in_quorum as usize != details.mons.len() {
        let out: Vec<&str> = details
            .mons
            .iter()
            .filter(|m| !m.in_quorum)
            .map(|m| m.name.as_str())
            .collect();
        reasons.push(format!("mons out of quorum: {out:?}"));
    }

    let osds = &details.osds;
    if osds.total == 0 {
        reasons.push("no osds".to_owned());
    } else if osds.number_up != osds.total || osds.number_in != osds.total {
        reasons.push(format!(
            "osds up {} in {} of {}",
            osds.number_up, osds.number_in, osds.total
        ));
    }

    if !details.mgr_available {
        reasons.push("mgr not available".to_owned());
    }

    let clean = details.pgs.state_counts.get(ACTIVE_CLEAN).copied().unwrap_or(0);
    if details.pgs.total > 0 && clean != details.pgs.total {
        reasons.push(format!("{clean} of {} pgs active+clean", details.pgs.total));
    }

    reasons
}

pub fn is_healthy(details: &StatusDetails, min_mons: u32) -> bool {
    unhealthy_reasons(details, min_mons).is_empty()
}

/// Every PG is in a clean state, scrubbing included.
pub fn is_clean(details: &StatusDetails) -> bool {
    let Some(re) = LazyLock::force(&CLEAN_STATE).as_ref() else {
        return false;
    };
    let clean: u32 = details
        .pgs
        .state_counts
        .iter()
        .filter(|(state, _)| re.is_match(state))
        .map(|(_, count)| *count)
        .sum();
    clean == details.pgs.total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> StatusDetails {
        StatusDetails {
            health: "HEALTH_OK".to_owned(),
            mons: ["a", "b", "c"]
                .iter()
                .map(|n| MonState {
                    name: n.to_string(),
                    in_quorum: true,
                })
                .collect(),
            osds: OsdCounts {
                total: 3,
                number_up: 3,
                number_in: 3,
            },
            mgr_available: true,
            pgs: PgCounts {
                total: 10,
                state_counts: [(ACTIVE_CLEAN.to_owned(), 10)].into(),
            },
        }
    }

    #[test]
    fn test_healthy_cluster() {
        assert!(is_healthy(&healthy(), 3));
        assert!(is_clean(&healthy()));
    }

    #[test]
    fn test_mon_out_of_quorum_is_unhealthy() {
        let mut details = healthy();
        details.mons[1].in_quorum = false;
        let reasons = unhealthy_reasons(&details, 3);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("\"b\""));
    }

    #[test]
    fn test_too_few_mons() {
        let mut details = healthy();
        details.mons.pop();
        assert!(!is_healthy(&details, 3));
        assert!(is_healthy(&details, 2));
    }

    #[test]
    fn test_osd_counts() {
        let mut details = healthy();
        details.osds.number_in = 2;
        assert!(!is_healthy(&details, 3));

        details.osds = OsdCounts::default();
        assert!(!is_healthy(&details, 3));
    }

    #[test]
    fn test_scrubbing_is_clean_but_not_healthy() {
        let mut details = healthy();
        details.pgs.state_counts = [
            (ACTIVE_CLEAN.to_owned(), 7),
            ("active+clean+scrubbing+deep".to_owned(), 3),
        ]
        .into();
        assert!(is_clean(&details));
        assert!(!is_healthy(&details, 3));

        details
            .pgs
            .state_counts
            .insert("active+undersized+degraded".to_owned(), 1);
        details.pgs.total = 11;
        assert!(!is_clean(&details));
    }

    #[test]
    fn test_no_pgs_is_fine() {
        let mut details = healthy();
        details.pgs = PgCounts::default();
        assert!(is_healthy(&details, 3));
    }

    #[test]
    fn test_aggregate() {
        let status: CephStatus = serde_json::from_str(
            r#"{"health":{"status":"HEALTH_WARN"},"osdmap":{"num_osds":2,"num_up_osds":1,"num_in_osds":2},
                "mgrmap":{"available":true},"pgmap":{"num_pgs":4,"pgs_by_state":[{"state_name":"active+clean","count":4}]}}"#,
        )
        .unwrap();
        let quorum: QuorumStatus = serde_json::from_str(
            r#"{"quorum_names":["a"],"monmap":{"mons":[{"name":"b"},{"name":"a"}]}}"#,
        )
        .unwrap();
        let details = aggregate(&status, &quorum);
        assert_eq!(details.mons[0].name, "a");
        assert!(details.mons[0].in_quorum);
        assert!(!details.mons[1].in_quorum);
        assert_eq!(details.osds.number_up, 1);
        assert_eq!(details.pgs.state_counts[ACTIVE_CLEAN], 4);
    }
}
