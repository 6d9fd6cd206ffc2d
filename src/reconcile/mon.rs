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

//! Monitor quorum management: placement through canaries, failover and scale-down.

use crate::context::Context;
use crate::error::{DependencySnafu, Error};
use crate::inventory::{is_candidate_node, node_hostname};
use crate::reconcile::Outcome;
use crate::reconcile::cluster::{Connection, publish_config};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::cluster::CephCluster;
use crate::types::v1::cluster::config::{MON_ENDPOINTS_CONFIGMAP, MonEndpoints};
use crate::types::v1::cluster::mon::{
    CANARY_LABEL, MON_APP, MON_ID_LABEL, mon_canary_name, mon_deployment_name,
};
use crate::utils::naming;
use crate::utils::wait::{Backoff, wait_for};
use crate::ceph;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Service};
use kube::ResourceExt;
use kube::runtime::events::EventType;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MON_PLACEMENT_FAILED: &str = "MonPlacementFailed";
pub const MON_REMOVAL_REFUSED: &str = "MonRemovalRefused";

const QUORUM_WAIT: Duration = Duration::from_secs(300);
const MON_SETTLE: Duration = Duration::from_secs(5);

/// Remembers since when each mon has been out of quorum, per cluster.
#[derive(Default)]
pub struct MonTracker {
    out_since: Mutex<HashMap<String, HashMap<String, Instant>>>,
}

impl MonTracker {
    /// Records the mons currently out of quorum and returns how long each has been out.
    pub fn observe(&self, cluster: &str, out: &[String], now: Instant) -> BTreeMap<String, Duration> {
        let mut map = self.out_since.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = map.entry(cluster.to_owned()).or_default();
        seen.retain(|name, _| out.contains(name));
        for name in out {
            seen.entry(name.clone()).or_insert(now);
        }
        seen.iter()
            .map(|(name, since)| (name.clone(), now.saturating_duration_since(*since)))
            .collect()
    }

    pub fn forget_mon(&self, cluster: &str, mon: &str) {
        let mut map = self.out_since.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(seen) = map.get_mut(cluster) {
            seen.remove(mon);
        }
    }

    pub fn forget(&self, cluster: &str) {
        let mut map = self.out_since.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(cluster);
    }
}

/// What the quorum manager knows at the start of a pass.
#[derive(Debug, Clone, Default)]
pub struct QuorumView {
    pub desired: usize,
    /// Mons in the endpoints map, with the node each is pinned to.
    pub members: BTreeMap<String, String>,
    pub in_quorum: BTreeSet<String>,
    /// Mons in the monmap, which may include ones the endpoints map forgot.
    pub monmap: Vec<String>,
    pub out_for: BTreeMap<String, Duration>,
    /// `None` disables failover.
    pub out_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonAction {
    Steady,
    Add,
    Remove(String),
    /// Add a replacement, then remove the named mon.
    Failover(String),
    /// A change is needed but would put quorum at risk.
    Hold(String),
}

fn keeps_majority(remaining_in_quorum: usize, desired: usize) -> bool {
    2 * remaining_in_quorum > desired
}

fn index_of(name: &str) -> usize {
    naming::name_to_index(name).unwrap_or(0)
}

impl QuorumView {
    fn in_quorum_members_except(&self, victim: &str) -> usize {
        self.members
            .keys()
            .filter(|m| m.as_str() != victim && self.in_quorum.contains(*m))
            .count()
    }

    /// Scale-down victim: out of quorum first, then a mon sharing a node, then
    /// the highest index.
    fn removal_victim(&self) -> Option<String> {
        let by_index_desc = |names: Vec<&String>| {
            names
                .into_iter()
                .max_by_key(|n| index_of(n))
                .cloned()
        };

        let out: Vec<&String> = self
            .members
            .keys()
            .filter(|m| !self.in_quorum.contains(*m))
            .collect();
        if !out.is_empty() {
            return by_index_desc(out);
        }

        let mut per_node: BTreeMap<&str, usize> = BTreeMap::new();
        for node in self.members.values() {
            *per_node.entry(node.as_str()).or_default() += 1;
        }
        let shared: Vec<&String> = self
            .members
            .iter()
            .filter(|(_, node)| per_node.get(node.as_str()).copied().unwrap_or(0) > 1)
            .map(|(name, _)| name)
            .collect();
        if !shared.is_empty() {
            return by_index_desc(shared);
        }

        by_index_desc(self.members.keys().collect())
    }

    /// Decides the single quorum change for this pass.
    pub fn plan(&self) -> MonAction {
        let orphan = self
            .monmap
            .iter()
            .find(|m| !self.members.contains_key(*m))
            .cloned();
        if let Some(orphan) = orphan.filter(|_| self.monmap.len() > self.desired) {
            let remaining = self
                .in_quorum
                .iter()
                .filter(|m| **m != orphan)
                .count();
            return if keeps_majority(remaining, self.desired) {
                MonAction::Remove(orphan)
            } else {
                MonAction::Hold(format!(
                    "not removing unknown mon {orphan}: only {remaining} mons would remain in quorum"
                ))
            };
        }

        let count = self.members.len();
        if count < self.desired {
            return MonAction::Add;
        }

        if count > self.desired {
            if count == 2 && self.desired == 1 {
                return MonAction::Hold("refusing to reduce mons from 2 to 1".to_owned());
            }
            let Some(victim) = self.removal_victim() else {
                return MonAction::Steady;
            };
            let remaining = self.in_quorum_members_except(&victim);
            return if keeps_majority(remaining, self.desired) {
                MonAction::Remove(victim)
            } else {
                MonAction::Hold(format!(
                    "not removing mon {victim}: only {remaining} of {} mons would remain in quorum",
                    self.desired
                ))
            };
        }

        let Some(timeout) = self.out_timeout else {
            return MonAction::Steady;
        };
        let failed = self
            .members
            .keys()
            .filter(|m| !self.in_quorum.contains(*m))
            .find(|m| self.out_for.get(*m).is_some_and(|d| *d >= timeout))
            .cloned();
        match failed {
            Some(name) => {
                let remaining = self.in_quorum_members_except(&name);
                if keeps_majority(remaining, self.desired) {
                    MonAction::Failover(name)
                } else {
                    MonAction::Hold(format!(
                        "not failing over mon {name}: quorum has only {remaining} members"
                    ))
                }
            }
            None => MonAction::Steady,
        }
    }
}

pub async fn load_endpoints(ctx: &Context, ns: &str) -> Result<MonEndpoints, Error> {
    let cm = ctx.get_opt::<ConfigMap>(MON_ENDPOINTS_CONFIGMAP, ns).await?;
    match cm.and_then(|cm| cm.data) {
        Some(data) => Ok(MonEndpoints::parse(&data)?),
        None => Ok(MonEndpoints::default()),
    }
}

fn pod_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|p| p == "Running")
}

/// A live canary pod for the current placement: scheduled on `node` and not
/// a terminating leftover of an earlier attempt.
fn canary_running_on(pods: &[Pod], node: &str) -> bool {
    pods.iter().any(|pod| {
        pod.metadata.deletion_timestamp.is_none()
            && pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node)
            && pod_running(pod)
    })
}

fn node_internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

/// Schedulable nodes matching the mon placement, least loaded first.
fn candidate_nodes(cluster: &CephCluster, endpoints: &MonEndpoints, nodes: Vec<Node>) -> Vec<Node> {
    let placement = cluster.placement("mon");
    let mut load: BTreeMap<String, usize> = BTreeMap::new();
    for info in endpoints.mapping.node.values() {
        *load.entry(info.name.clone()).or_default() += 1;
    }

    let mut candidates: Vec<(usize, String, Node)> = nodes
        .into_iter()
        .filter(|n| is_candidate_node(n) && placement.matches_node(n))
        .map(|n| {
            let host = node_hostname(&n);
            (load.get(&host).copied().unwrap_or(0), host, n)
        })
        .filter(|(used, _, _)| cluster.spec.mon.allow_multiple_per_node || *used == 0)
        .collect();
    candidates.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    candidates.into_iter().map(|(_, _, n)| n).collect()
}

/// Runs a canary for mon `id` on `node`; true if it reached Running in time.
async fn run_canary(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    id: &str,
    node: &Node,
    cancel: &CancellationToken,
) -> Result<bool, Error> {
    let ns = cluster.require_namespace()?;
    let name = mon_canary_name(id);
    let host = node_hostname(node);
    let node_name = node.name_any();
    ctx.apply(
        &cluster.new_mon_deployment(id, &host, None, &conn.info.fsid, true)?,
        &ns,
    )
    .await?;

    let selector = format!("{MON_ID_LABEL}={id},{CANARY_LABEL}=true");
    let (ns_ref, selector_ref, node_ref) = (ns.as_str(), selector.as_str(), node_name.as_str());
    let result = wait_for(
        &format!("mon canary {name} on {host}"),
        ctx.config.canary_timeout(),
        Backoff::default(),
        cancel,
        move || async move {
            let pods = ctx.list_labeled::<Pod>(ns_ref, Some(selector_ref)).await?;
            Ok::<_, Error>(canary_running_on(&pods, node_ref).then_some(()))
        },
    )
    .await;

    ctx.delete::<Deployment>(&name, &ns).await?;
    match result {
        Ok(()) => Ok(true),
        Err(Error::WaitTimeout { .. }) => {
            warn!("mon canary {} did not start on {}", name, host);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Every mon that is expected to hold quorum after a change.
fn quorum_members(endpoints: &MonEndpoints) -> Vec<String> {
    endpoints.endpoints.keys().cloned().collect()
}

/// Waits until every mon in `names` is in quorum.
pub async fn wait_for_quorum(
    ctx: &Context,
    conn: &Connection,
    names: &[String],
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let info = &conn.info;
    wait_for(
        &format!("mons {names:?} in quorum"),
        QUORUM_WAIT,
        Backoff::default(),
        cancel,
        move || async move {
            match ceph::status::quorum_status(ctx.executor.as_ref(), info).await {
                Ok(q) => Ok::<_, Error>(names.iter().all(|n| q.in_quorum(n)).then_some(())),
                Err(e) => {
                    debug!("quorum status not available yet: {}", e);
                    Ok(None)
                }
            }
        },
    )
    .await
}

async fn add_mon(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    endpoints: &mut MonEndpoints,
    cancel: &CancellationToken,
) -> Result<Outcome, Error> {
    let ns = cluster.require_namespace()?;
    let id = endpoints.next_name();
    let nodes = candidate_nodes(cluster, endpoints, ctx.list_global::<Node>().await?);
    if nodes.is_empty() {
        return Ok(Outcome::failure(
            MON_PLACEMENT_FAILED,
            format!("no node available for mon {id}"),
        ));
    }

    let mut tried = Vec::new();
    let mut chosen = None;
    for node in nodes.into_iter().take(ctx.config.canary_attempts.max(1) as usize) {
        let host = node_hostname(&node);
        if run_canary(ctx, cluster, conn, &id, &node, cancel).await? {
            chosen = Some((host, node));
            break;
        }
        tried.push(host);
    }
    let Some((host, node)) = chosen else {
        return Ok(Outcome::failure(
            MON_PLACEMENT_FAILED,
            format!("mon {id} could not be scheduled on any of {tried:?}"),
        ));
    };

    let service = ctx.apply(&cluster.new_mon_service(&id)?, &ns).await?;
    let address = if cluster.spec.network.host_network {
        node_internal_ip(&node)
    } else {
        service
            .spec
            .and_then(|s| s.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None")
    };
    let Some(address) = address else {
        return DependencySnafu {
            kind: "Service",
            name: mon_deployment_name(&id),
            reason: "no address assigned yet",
        }
        .fail();
    };

    endpoints.add(&id, &address, &host);
    publish_config(ctx, cluster, conn, endpoints).await?;

    let public_ip = (!cluster.spec.network.host_network).then_some(address.as_str());
    ctx.apply(
        &cluster.new_mon_deployment(&id, &host, public_ip, &conn.info.fsid, false)?,
        &ns,
    )
    .await?;
    info!("mon {} scheduled on {} at {}", id, host, address);
    ctx.record(
        cluster,
        EventType::Normal,
        "MonAdded",
        &format!("mon {id} added on node {host}"),
    )
    .await?;

    wait_for_quorum(ctx, conn, &quorum_members(endpoints), cancel).await?;
    Ok(Outcome::RequeueAfter(MON_SETTLE))
}

async fn remove_mon(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    endpoints: &mut MonEndpoints,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let ns = cluster.require_namespace()?;
    info!("removing mon {} from {}", name, ns);

    ctx.delete::<Deployment>(&mon_deployment_name(name), &ns).await?;
    ceph::mon::remove(ctx.executor.as_ref(), &conn.info, name).await?;
    ctx.delete::<Service>(&mon_deployment_name(name), &ns).await?;

    if endpoints.endpoints.contains_key(name) {
        endpoints.remove(name);
        publish_config(ctx, cluster, conn, endpoints).await?;
    }
    ctx.mon_tracker.forget_mon(&cluster.key(), name);
    ctx.record(
        cluster,
        EventType::Normal,
        "MonRemoved",
        &format!("mon {name} removed"),
    )
    .await?;

    wait_for_quorum(ctx, conn, &quorum_members(endpoints), cancel).await
}

async fn cleanup_canaries(ctx: &Context, ns: &str) -> Result<(), Error> {
    let selector = format!("app={MON_APP},{CANARY_LABEL}=true");
    for canary in ctx.list_labeled::<Deployment>(ns, Some(&selector)).await? {
        debug!("removing leftover canary {}", canary.name_any());
        ctx.delete::<Deployment>(&canary.name_any(), ns).await?;
    }
    Ok(())
}

/// One quorum pass. `Done` means the mon set is converged and fully in quorum.
pub async fn reconcile(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    cancel: &CancellationToken,
) -> Result<Outcome, Error> {
    let ns = cluster.require_namespace()?;
    let mut endpoints = load_endpoints(ctx, &ns).await?;

    if endpoints.endpoints.is_empty() {
        info!("bootstrapping the first mon of {}", ns);
        return add_mon(ctx, cluster, conn, &mut endpoints, cancel).await;
    }

    let quorum = ceph::status::quorum_status(ctx.executor.as_ref(), &conn.info).await?;
    let members: BTreeMap<String, String> = endpoints
        .endpoints
        .keys()
        .map(|m| (m.clone(), endpoints.node_of(m).unwrap_or_default().to_owned()))
        .collect();
    let in_quorum: BTreeSet<String> = quorum.quorum_names.iter().cloned().collect();
    let out: Vec<String> = members
        .keys()
        .filter(|m| !in_quorum.contains(*m))
        .cloned()
        .collect();

    let view = QuorumView {
        desired: cluster.spec.mon.count as usize,
        members,
        monmap: quorum.members().map(str::to_owned).collect(),
        out_for: ctx.mon_tracker.observe(&cluster.key(), &out, Instant::now()),
        out_timeout: cluster.mon_out_timeout(ctx.config.mon_out_timeout()),
        in_quorum,
    };

    match view.plan() {
        MonAction::Steady => {
            cleanup_canaries(ctx, &ns).await?;
            if out.is_empty() {
                Ok(Outcome::Done)
            } else {
                debug!("mons {:?} out of quorum, waiting for the timeout", out);
                Ok(Outcome::RequeueAfter(ctx.config.mon_healthcheck_interval()))
            }
        }
        MonAction::Add => add_mon(ctx, cluster, conn, &mut endpoints, cancel).await,
        MonAction::Remove(name) => {
            remove_mon(ctx, cluster, conn, &mut endpoints, &name, cancel).await?;
            Ok(Outcome::RequeueAfter(MON_SETTLE))
        }
        MonAction::Failover(name) => {
            warn!("mon {} out of quorum beyond the timeout, failing over", name);
            let added = add_mon(ctx, cluster, conn, &mut endpoints, cancel).await?;
            if let Outcome::Failure { .. } = added {
                return Ok(added);
            }
            remove_mon(ctx, cluster, conn, &mut endpoints, &name, cancel).await?;
            Ok(Outcome::RequeueAfter(MON_SETTLE))
        }
        MonAction::Hold(message) => {
            warn!("{}", message);
            ctx.record(cluster, EventType::Warning, MON_REMOVAL_REFUSED, &message)
                .await?;
            Ok(Outcome::RequeueAfter(ctx.config.mon_healthcheck_interval()))
        }
    }
}
