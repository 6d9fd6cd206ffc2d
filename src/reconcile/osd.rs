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

//! Storage daemons: topology planning, prepare jobs and safe removal.

use crate::context::Context;
use crate::error::{Error, InvariantSnafu};
use crate::inventory::{self, LocalDevice};
use crate::reconcile::cluster::Connection;
use crate::reconcile::{Outcome, apply_daemon_keyring};
use crate::types::v1::cluster::osd::{
    OSD_APP, OSD_DEVICE_ANNOTATION, OSD_ID_LABEL, OSD_KEYRING_SECRET, OSD_LOCATION_LABEL,
    OSD_UUID_ANNOTATION, OrchestrationStatus, PREPARE_STATUS_KEY,
    device_set_pvc_name, OsdLocation, PVC_LABEL, PrepareState, PreparedOsd,
    osd_deployment_name, prepare_job_name, prepare_status_configmap,
};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::cluster::{CephCluster, StorageSpec};
use crate::ceph;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::runtime::events::EventType;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const OSD_PROVISION_FAILED: &str = "OsdProvisionFailed";

const PREPARE_POLL: Duration = Duration::from_secs(10);
const REBALANCE_POLL: Duration = Duration::from_secs(30);

/// An osd Deployment as found in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningOsd {
    pub id: u32,
    pub location: OsdLocation,
    /// Device path on hosts, claim name for claim-backed osds.
    pub device: String,
    /// Block device path the daemon was prepared on.
    pub path: String,
    pub uuid: String,
}

/// Desired storage layout derived from `spec.storage` and the device inventory.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Devices that are free and selected, per location.
    pub candidates: BTreeMap<OsdLocation, Vec<String>>,
    /// Every device `spec.storage` still selects, free or not, per location with a known inventory.
    pub selected: BTreeMap<OsdLocation, Vec<String>>,
    /// Locations still in `spec.storage` whose inventory is unknown. Their osds are kept.
    pub unknown: BTreeSet<OsdLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsdPlan {
    pub prepare: BTreeMap<OsdLocation, Vec<String>>,
    pub remove: Vec<RunningOsd>,
}

fn normalize(device: &str) -> &str {
    device.strip_prefix("/dev/").unwrap_or(device)
}

/// Rejects two osds claiming the same (location, device).
pub fn check_unique(running: &[RunningOsd]) -> Result<(), String> {
    let mut seen: BTreeMap<(&OsdLocation, &str), u32> = BTreeMap::new();
    for osd in running {
        if let Some(other) = seen.insert((&osd.location, normalize(&osd.device)), osd.id) {
            return Err(format!(
                "osd.{} and osd.{} both claim device {} on {}",
                other,
                osd.id,
                osd.device,
                osd.location.name()
            ));
        }
    }
    Ok(())
}

pub fn plan(topology: &Topology, running: &[RunningOsd]) -> Result<OsdPlan, String> {
    check_unique(running)?;

    let claimed = |location: &OsdLocation, device: &str| {
        running
            .iter()
            .any(|o| &o.location == location && normalize(&o.device) == normalize(device))
    };

    let mut prepare = BTreeMap::new();
    for (location, devices) in &topology.candidates {
        let missing: Vec<String> = devices
            .iter()
            .filter(|d| !claimed(location, d))
            .cloned()
            .collect();
        if !missing.is_empty() {
            prepare.insert(location.clone(), missing);
        }
    }

    let remove = running
        .iter()
        .filter(|osd| {
            if topology.unknown.contains(&osd.location) {
                return false;
            }
            match topology.selected.get(&osd.location) {
                Some(devices) => !devices
                    .iter()
                    .any(|d| normalize(d) == normalize(&osd.device)),
                None => true,
            }
        })
        .cloned()
        .collect();

    Ok(OsdPlan { prepare, remove })
}

pub fn running_osd(deploy: &Deployment) -> Option<RunningOsd> {
    let labels = deploy.metadata.labels.as_ref()?;
    let annotations = deploy.metadata.annotations.clone().unwrap_or_default();
    let id = labels.get(OSD_ID_LABEL)?.parse().ok()?;
    let path = annotations.get(OSD_DEVICE_ANNOTATION)?.clone();
    let (location, device) = match labels.get(PVC_LABEL) {
        Some(pvc) => (OsdLocation::Claim { pvc: pvc.clone() }, pvc.clone()),
        None => (
            OsdLocation::Host {
                node: labels.get(OSD_LOCATION_LABEL)?.clone(),
            },
            path.clone(),
        ),
    };
    Some(RunningOsd {
        id,
        location,
        device,
        path,
        uuid: annotations.get(OSD_UUID_ANNOTATION).cloned().unwrap_or_default(),
    })
}

/// Host part of the topology. `inventories` maps host to its device list,
/// absent when discovery has not reported yet.
pub fn host_topology(
    storage: &StorageSpec,
    nodes: &[Node],
    inventories: &BTreeMap<String, Vec<LocalDevice>>,
    topology: &mut Topology,
) -> Result<(), String> {
    let ready_hosts = inventory::discover_nodes(storage, nodes);
    let spec_hosts: BTreeSet<String> = if storage.use_all_nodes {
        nodes.iter().map(inventory::node_hostname).collect()
    } else {
        storage.nodes.iter().map(|n| n.name.clone()).collect()
    };

    for host in spec_hosts {
        let location = OsdLocation::Host { node: host.clone() };
        let node_spec = storage.nodes.iter().find(|n| n.name == host);
        let Some(devices) = inventories.get(&host) else {
            topology.unknown.insert(location);
            continue;
        };

        let present: Vec<LocalDevice> = devices
            .iter()
            .map(|d| LocalDevice {
                available: true,
                filesystem: String::new(),
                ..d.clone()
            })
            .collect();
        topology.selected.insert(
            location.clone(),
            inventory::select_devices(storage, node_spec, &present)?,
        );

        if ready_hosts.contains(&host) {
            let free = inventory::select_devices(storage, node_spec, devices)?;
            if !free.is_empty() {
                topology.candidates.insert(location, free);
            }
        }
    }
    Ok(())
}

/// Claim-backed part of the topology: every device set PVC is one device.
pub fn claim_topology(storage: &StorageSpec, topology: &mut Topology) {
    for set in &storage.storage_class_device_sets {
        for i in 0..set.count {
            let pvc = device_set_pvc_name(&set.name, i);
            let location = OsdLocation::Claim { pvc: pvc.clone() };
            topology.selected.insert(location.clone(), vec![pvc.clone()]);
            topology.candidates.insert(location, vec![pvc]);
        }
    }
}

async fn load_topology(ctx: &Context, cluster: &CephCluster) -> Result<Topology, Error> {
    let ns = cluster.require_namespace()?;
    let storage = &cluster.spec.storage;
    let mut topology = Topology::default();

    if storage.use_all_nodes || !storage.nodes.is_empty() {
        let nodes = ctx.list_global::<Node>().await?;
        let mut inventories = BTreeMap::new();
        for node in &nodes {
            let host = inventory::node_hostname(node);
            if let Some(cm) = ctx
                .get_opt::<ConfigMap>(&inventory::device_configmap_name(&host), &ns)
                .await?
            {
                inventories.insert(host, inventory::parse_devices(&cm));
            }
        }
        host_topology(storage, &nodes, &inventories, &mut topology)
            .map_err(|message| InvariantSnafu { message }.build())?;
    }

    for set in &storage.storage_class_device_sets {
        for pvc in cluster.new_device_set_pvcs(set)? {
            ctx.apply(&pvc, &ns).await?;
        }
    }
    claim_topology(storage, &mut topology);
    Ok(topology)
}

/// Runs or collects the prepare job for one location.
async fn provision(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    location: &OsdLocation,
    devices: &[String],
    running: &[RunningOsd],
) -> Result<Outcome, Error> {
    let ns = cluster.require_namespace()?;
    let status_name = prepare_status_configmap(location.name());
    let job_name = prepare_job_name(location.name());

    let report = ctx
        .get_opt::<ConfigMap>(&status_name, &ns)
        .await?
        .and_then(|cm| cm.data)
        .and_then(|d| d.get(PREPARE_STATUS_KEY).cloned())
        .map(|raw| serde_json::from_str::<OrchestrationStatus>(&raw));

    let status = match report {
        None => {
            if ctx.get_opt::<Job>(&job_name, &ns).await?.is_none() {
                info!("preparing {:?} on {}", devices, location.name());
                ctx.apply(
                    &cluster.new_osd_prepare_job(location, devices, &ctx.config.operator_image)?,
                    &ns,
                )
                .await?;
            }
            return Ok(Outcome::RequeueAfter(PREPARE_POLL));
        }
        Some(Err(e)) => {
            warn!("discarding unreadable prepare status {}: {}", status_name, e);
            ctx.delete::<ConfigMap>(&status_name, &ns).await?;
            ctx.delete::<Job>(&job_name, &ns).await?;
            return Ok(Outcome::RequeueAfter(PREPARE_POLL));
        }
        Some(Ok(status)) => status,
    };

    match status.status {
        PrepareState::Starting | PrepareState::Orchestrating => {
            debug!("prepare job {} still running", job_name);
            return Ok(Outcome::RequeueAfter(PREPARE_POLL));
        }
        PrepareState::Failed => {
            ctx.delete::<ConfigMap>(&status_name, &ns).await?;
            ctx.delete::<Job>(&job_name, &ns).await?;
            return Ok(Outcome::failure(
                OSD_PROVISION_FAILED,
                format!("preparing {}: {}", location.name(), status.message),
            ));
        }
        PrepareState::Completed => {}
    }

    let mut combined: Vec<RunningOsd> = running.to_vec();
    for osd in &status.osds {
        let device = match location {
            OsdLocation::Claim { pvc } => pvc.clone(),
            OsdLocation::Host { .. } => osd.device.clone(),
        };
        if combined.iter().any(|o| o.id == osd.id) {
            continue;
        }
        combined.push(RunningOsd {
            id: osd.id,
            location: location.clone(),
            device,
            path: osd.device.clone(),
            uuid: osd.uuid.clone(),
        });
    }
    check_unique(&combined).map_err(|message| InvariantSnafu { message }.build())?;

    for osd in &status.osds {
        ctx.apply(&cluster.new_osd_deployment(osd, location, &conn.info.fsid)?, &ns)
            .await?;
        info!("osd.{} created on {} ({})", osd.id, location.name(), osd.device);
    }
    ctx.delete::<ConfigMap>(&status_name, &ns).await?;
    ctx.delete::<Job>(&job_name, &ns).await?;
    Ok(Outcome::Done)
}

/// Takes one osd out and purges it once its data has moved.
async fn remove(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    osd: &RunningOsd,
) -> Result<Outcome, Error> {
    let ns = cluster.require_namespace()?;
    let exec = ctx.executor.as_ref();

    ceph::osd::out(exec, &conn.info, osd.id).await?;
    if !ceph::osd::safe_to_destroy(exec, &conn.info, osd.id).await? {
        info!("osd.{} is out, waiting for its data to move", osd.id);
        return Ok(Outcome::RequeueAfter(REBALANCE_POLL));
    }

    ctx.delete::<Deployment>(&osd_deployment_name(osd.id), &ns).await?;
    ceph::osd::purge(exec, &conn.info, osd.id).await?;
    ceph::auth::delete(exec, &conn.info, &format!("osd.{}", osd.id)).await?;
    ctx.record(
        cluster,
        EventType::Normal,
        "OsdRemoved",
        &format!("osd.{} on {} purged", osd.id, osd.location.name()),
    )
    .await?;
    Ok(Outcome::RequeueAfter(PREPARE_POLL))
}

pub async fn list_running(ctx: &Context, ns: &str) -> Result<Vec<RunningOsd>, Error> {
    let mut running: Vec<RunningOsd> = ctx
        .list_labeled::<Deployment>(ns, Some(&format!("app={OSD_APP}")))
        .await?
        .iter()
        .filter_map(running_osd)
        .collect();
    running.sort_by_key(|o| o.id);
    Ok(running)
}

pub async fn reconcile(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    cancel: &CancellationToken,
) -> Result<Outcome, Error> {
    let ns = cluster.require_namespace()?;
    apply_daemon_keyring(
        ctx,
        cluster,
        conn,
        "client.bootstrap-osd",
        "bootstrap-osd",
        OSD_KEYRING_SECRET,
        OSD_APP,
    )
    .await?;

    let topology = load_topology(ctx, cluster).await?;
    let running = list_running(ctx, &ns).await?;
    let plan = plan(&topology, &running).map_err(|message| InvariantSnafu { message }.build())?;

    for osd in &running {
        if plan.remove.contains(osd) {
            continue;
        }
        let prepared = PreparedOsd {
            id: osd.id,
            uuid: osd.uuid.clone(),
            device: osd.path.clone(),
        };
        ctx.apply(
            &cluster.new_osd_deployment(&prepared, &osd.location, &conn.info.fsid)?,
            &ns,
        )
        .await?;
    }

    let mut outcome = Outcome::Done;
    for (location, devices) in &plan.prepare {
        if cancel.is_cancelled() {
            break;
        }
        let step = provision(ctx, cluster, conn, location, devices, &running).await?;
        outcome = outcome.merge(step);
    }

    // one removal per pass
    if let Some(osd) = plan.remove.first() {
        warn!("osd.{} on {} is no longer desired", osd.id, osd.location.name());
        outcome = outcome.merge(remove(ctx, cluster, conn, osd).await?);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::v1::cluster::{DeviceSpec, NodeSpec};

    fn host(node: &str) -> OsdLocation {
        OsdLocation::Host {
            node: node.to_owned(),
        }
    }

    fn osd(id: u32, node: &str, device: &str) -> RunningOsd {
        RunningOsd {
            id,
            location: host(node),
            device: device.to_owned(),
            path: device.to_owned(),
            uuid: format!("uuid-{id}"),
        }
    }

    fn device(name: &str, available: bool) -> LocalDevice {
        LocalDevice {
            name: name.to_owned(),
            available,
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicate_device_is_rejected() {
        let running = vec![osd(0, "n1", "/dev/sdb"), osd(1, "n1", "sdb")];
        assert!(plan(&Topology::default(), &running).is_err());

        let running = vec![osd(0, "n1", "sdb"), osd(1, "n2", "sdb")];
        assert!(check_unique(&running).is_ok());
    }

    #[test]
    fn test_prepare_only_unclaimed_devices() {
        let mut topology = Topology::default();
        topology
            .candidates
            .insert(host("n1"), vec!["sdb".to_owned(), "sdc".to_owned()]);
        topology
            .selected
            .insert(host("n1"), vec!["sdb".to_owned(), "sdc".to_owned()]);

        let result = plan(&topology, &[osd(0, "n1", "/dev/sdb")]).unwrap();
        assert_eq!(result.prepare.get(&host("n1")).unwrap(), &["sdc"]);
        assert!(result.remove.is_empty());
    }

    #[test]
    fn test_remove_when_host_or_device_gone() {
        let mut topology = Topology::default();
        topology.selected.insert(host("n1"), vec!["sdb".to_owned()]);
        topology.unknown.insert(host("n3"));

        let running = vec![
            osd(0, "n1", "sdb"),
            osd(1, "n1", "sdc"),
            osd(2, "n2", "sdb"),
            osd(3, "n3", "sdb"),
        ];
        let ids: Vec<u32> = plan(&topology, &running)
            .unwrap()
            .remove
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn test_host_topology_keeps_used_devices_selected() {
        let storage = StorageSpec {
            nodes: vec![NodeSpec {
                name: "node-1".to_owned(),
                devices: vec![
                    DeviceSpec {
                        name: "sdb".to_owned(),
                    },
                    DeviceSpec {
                        name: "sdc".to_owned(),
                    },
                ],
                device_filter: None,
            }],
            ..Default::default()
        };
        let nodes = vec![crate::tests::create_test_node("node-1")];
        let inventories = BTreeMap::from([(
            "node-1".to_owned(),
            vec![device("sdb", false), device("sdc", true)],
        )]);

        let mut topology = Topology::default();
        host_topology(&storage, &nodes, &inventories, &mut topology).unwrap();
        assert_eq!(topology.candidates.get(&host("node-1")).unwrap(), &["sdc"]);
        assert_eq!(
            topology.selected.get(&host("node-1")).unwrap(),
            &["sdb", "sdc"]
        );
    }

    #[test]
    fn test_missing_inventory_keeps_osds() {
        let storage = StorageSpec {
            nodes: vec![NodeSpec {
                name: "node-9".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut topology = Topology::default();
        host_topology(&storage, &[], &BTreeMap::new(), &mut topology).unwrap();
        assert!(topology.unknown.contains(&host("node-9")));

        let result = plan(&topology, &[osd(4, "node-9", "sdb")]).unwrap();
        assert!(result.remove.is_empty());
    }

    #[test]
    fn test_running_osd_from_deployment() {
        let cluster = crate::tests::create_test_cluster(3);
        let prepared = PreparedOsd {
            id: 5,
            uuid: "uuid-5".to_owned(),
            device: "/dev/sdd".to_owned(),
        };
        let deploy = cluster
            .new_osd_deployment(&prepared, &host("node-1"), "fsid")
            .unwrap();
        assert_eq!(running_osd(&deploy), Some(RunningOsd {
            id: 5,
            location: host("node-1"),
            device: "/dev/sdd".to_owned(),
            path: "/dev/sdd".to_owned(),
            uuid: "uuid-5".to_owned(),
        }));
    }
}
