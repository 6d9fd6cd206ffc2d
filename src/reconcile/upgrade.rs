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

//! Rolling upgrade of a running cluster to a new Ceph image or operator version.
//!
//! Each step rolls one daemon type, a Deployment at a time, and the cluster
//! must pass the health gate before the next step starts. Completed steps are
//! kept in `status.upgrade` so an interrupted upgrade resumes where it stopped.
//! A failing gate halts the upgrade; nothing is rolled back.

use crate::context::Context;
use crate::error::Error;
use crate::health;
use crate::reconcile::cluster::{Connection, refresh_health};
use crate::reconcile::{Outcome, mon};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::cluster::mgr::MGR_APP;
use crate::types::v1::cluster::mon::{MON_APP, MON_ID_LABEL};
use crate::types::v1::cluster::osd::{OSD_APP, OSD_ID_LABEL};
use crate::types::v1::cluster::{
    CephCluster, ClusterVersion, UPGRADE_STEPS as STEPS, UpgradeProgress, UpgradeStep as Step,
};
use crate::types::v1::filesystem::MDS_APP;
use crate::types::v1::nfs::NFS_APP;
use crate::types::v1::object_store::RGW_APP;
use crate::types::v1::rbd_mirror::RBD_MIRROR_APP;
use crate::types::v1::status::{
    Condition, ConditionStatus, ConditionType, Conditioned, Phase, reason,
};
use crate::utils::wait::{Backoff, wait_for};
use crate::ceph;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const UPGRADE_HEALTH_CHECK_FAILED: &str = "UpgradeHealthCheckFailed";

const ROLLOUT_WAIT: Duration = Duration::from_secs(600);
const OSD_STOP_WAIT: Duration = Duration::from_secs(900);
const CLEAN_WAIT: Duration = Duration::from_secs(900);
const RESUME_AFTER: Duration = Duration::from_secs(5);

fn app(step: Step) -> Option<&'static str> {
    match step {
        Step::OperatorVersion => None,
        Step::Mons => Some(MON_APP),
        Step::Mgrs => Some(MGR_APP),
        Step::Mds => Some(MDS_APP),
        Step::Osds => Some(OSD_APP),
        Step::Rgw => Some(RGW_APP),
        Step::RbdMirror => Some(RBD_MIRROR_APP),
        Step::Nfs => Some(NFS_APP),
    }
}

/// True when the cluster runs something other than what is desired, or an
/// upgrade was started and has not finished.
pub fn needed(cluster: &CephCluster, operator_version: &str) -> bool {
    let Some(status) = cluster.status.as_ref() else {
        return false;
    };
    let Some(running) = status.version.as_ref() else {
        return false;
    };
    running.image != cluster.spec.ceph_version.image
        || status
            .operator_version
            .as_deref()
            .is_some_and(|v| v != operator_version)
        || status.upgrade.is_some()
}

/// Progress toward `target`, restarting from scratch when the target moved.
pub fn progress_for(cluster: &CephCluster, target: &str) -> UpgradeProgress {
    match cluster.status.as_ref().and_then(|s| s.upgrade.clone()) {
        Some(p) if p.target_image == target => p,
        _ => UpgradeProgress {
            target_image: target.to_owned(),
            ..Default::default()
        },
    }
}

pub fn remaining_steps(progress: &UpgradeProgress) -> Vec<Step> {
    STEPS
        .into_iter()
        .filter(|s| !progress.completed_steps.contains(&s.to_string()))
        .collect()
}

/// Strategic merge patch moving every container of `deploy` to `image`,
/// or `None` when it already runs it.
pub fn image_patch(deploy: &Deployment, image: &str) -> Option<serde_json::Value> {
    let pod = deploy.spec.as_ref()?.template.spec.as_ref()?;
    let stale = |containers: &[k8s_openapi::api::core::v1::Container]| -> Vec<serde_json::Value> {
        containers
            .iter()
            .filter(|c| c.image.as_deref() != Some(image))
            .map(|c| json!({ "name": c.name, "image": image }))
            .collect()
    };
    let containers = stale(&pod.containers);
    let init = stale(pod.init_containers.as_deref().unwrap_or_default());
    if containers.is_empty() && init.is_empty() {
        return None;
    }

    let mut spec = serde_json::Map::new();
    if !containers.is_empty() {
        spec.insert("containers".to_owned(), json!(containers));
    }
    if !init.is_empty() {
        spec.insert("initContainers".to_owned(), json!(init));
    }
    Some(json!({ "spec": { "template": { "spec": spec } } }))
}

/// The controller has observed the latest template and every replica runs it.
pub fn deployment_rolled_out(deploy: &Deployment, image: &str) -> bool {
    let on_image = deploy
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .is_some_and(|p| p.containers.iter().all(|c| c.image.as_deref() == Some(image)));
    let want = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = deploy.status.as_ref() else {
        return false;
    };
    let observed = match (status.observed_generation, deploy.metadata.generation) {
        (Some(seen), Some(current)) => seen >= current,
        _ => false,
    };
    on_image
        && observed
        && status.updated_replicas.unwrap_or(0) == want
        && status.ready_replicas.unwrap_or(0) == want
        && status.replicas.unwrap_or(0) == want
}

/// Reason the cluster may not advance to the next step, if any.
async fn health_gate(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
) -> Result<Option<String>, Error> {
    if cluster.spec.skip_upgrade_checks {
        return Ok(None);
    }

    let details = refresh_health(ctx, conn).await?;
    let problems = health::unhealthy_reasons(&details, cluster.spec.mon.count);
    if !problems.is_empty() {
        if !cluster.spec.continue_upgrade_after_checks_even_if_not_healthy {
            return Ok(Some(problems.join("; ")));
        }
        warn!(
            "continuing upgrade of {} although unhealthy: {}",
            cluster.key(),
            problems.join("; ")
        );
    }

    let check = ceph::data_path::rados_round_trip(ctx.executor.as_ref(), &conn.info, cluster.data_check_pool());
    if let Err(e) = check.await {
        return Ok(Some(format!("data path check failed: {e}")));
    }
    Ok(None)
}

async fn wait_rolled_out(
    ctx: &Context,
    ns: &str,
    name: &str,
    image: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    wait_for(
        &format!("deployment {name} rolled out"),
        ROLLOUT_WAIT,
        Backoff::default(),
        cancel,
        move || async move {
            let deploy = ctx.get_opt::<Deployment>(name, ns).await?;
            Ok::<_, Error>(deploy.filter(|d| deployment_rolled_out(d, image)).map(|_| ()))
        },
    )
    .await
}

async fn wait_ok_to_stop(
    ctx: &Context,
    conn: &Connection,
    id: u32,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let info = &conn.info;
    wait_for(
        &format!("osd.{id} ok-to-stop"),
        OSD_STOP_WAIT,
        Backoff::default(),
        cancel,
        move || async move {
            match ceph::osd::ok_to_stop(ctx.executor.as_ref(), info, id).await {
                Ok(ok) => Ok::<_, Error>(ok.then_some(())),
                Err(e) => {
                    debug!("osd.{} ok-to-stop not answered: {}", id, e);
                    Ok(None)
                }
            }
        },
    )
    .await
}

async fn wait_clean(
    ctx: &Context,
    conn: &Connection,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    wait_for(
        "placement groups clean",
        CLEAN_WAIT,
        Backoff::default(),
        cancel,
        move || async move {
            match refresh_health(ctx, conn).await {
                Ok(details) => Ok::<_, Error>(health::is_clean(&details).then_some(())),
                Err(e) => {
                    debug!("cluster status not available: {}", e);
                    Ok(None)
                }
            }
        },
    )
    .await
}

/// Rolls every Deployment of `step` to `image`, one at a time.
async fn roll(
    ctx: &Context,
    conn: &Connection,
    ns: &str,
    step: Step,
    image: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let Some(app) = app(step) else {
        return Ok(());
    };
    let mut deploys = ctx
        .list_labeled::<Deployment>(ns, Some(&format!("app={app}")))
        .await?;
    deploys.sort_by_key(|d| d.name_any());

    for deploy in deploys {
        let Some(patch) = image_patch(&deploy, image) else {
            continue;
        };
        let name = deploy.name_any();
        let labels = deploy.labels();

        let osd_id = labels.get(OSD_ID_LABEL).and_then(|id| id.parse::<u32>().ok());
        if let (Step::Osds, Some(id)) = (step, osd_id) {
            wait_ok_to_stop(ctx, conn, id, cancel).await?;
        }

        info!("upgrading {} to {}", name, image);
        ctx.patch_strategic::<Deployment>(&name, ns, patch).await?;
        wait_rolled_out(ctx, ns, &name, image, cancel).await?;

        match step {
            Step::Mons => {
                if let Some(id) = labels.get(MON_ID_LABEL) {
                    mon::wait_for_quorum(ctx, conn, &[id.clone()], cancel).await?;
                }
            }
            Step::Osds => wait_clean(ctx, conn, cancel).await?,
            _ => {}
        }
    }
    Ok(())
}

pub async fn reconcile(
    ctx: &Context,
    cluster: &CephCluster,
    conn: &Connection,
    cancel: &CancellationToken,
) -> Result<Outcome, Error> {
    let ns = cluster.require_namespace()?;
    let image = cluster.spec.ceph_version.image.clone();
    let operator_version = crate::operator_version();
    let mut progress = progress_for(cluster, &image);

    let started = progress.clone();
    let mut cluster = ctx
        .update_status(cluster, |status| {
            status.upgrade = Some(started.clone());
            status.set_phase(Phase::Progressing, Some(format!("Upgrading to {}", started.target_image)));
            status.set_condition(Condition::new(
                ConditionType::Upgrading,
                ConditionStatus::True,
                reason::CLUSTER_UPGRADING,
                format!("Upgrading to {}", started.target_image),
            ));
        })
        .await?;

    for step in remaining_steps(&progress) {
        if let Some(problem) = health_gate(ctx, &cluster, conn).await? {
            warn!("upgrade of {} halted before {}: {}", cluster.key(), step, problem);
            return Ok(Outcome::failure(
                UPGRADE_HEALTH_CHECK_FAILED,
                format!("upgrade halted before step {step}: {problem}"),
            ));
        }

        progress.current_step = Some(step.to_string());
        let rolling = progress.clone();
        cluster = ctx
            .update_status(&cluster, |status| status.upgrade = Some(rolling.clone()))
            .await?;

        roll(ctx, conn, &ns, step, &image, cancel).await?;
        progress.current_step = None;
        progress.completed_steps.push(step.to_string());
        info!("upgrade of {} finished step {}", cluster.key(), step);

        let done = progress.clone();
        cluster = ctx
            .update_status(&cluster, |status| {
                status.upgrade = Some(done.clone());
                if step == Step::OperatorVersion {
                    status.operator_version = Some(operator_version.to_owned());
                }
            })
            .await?;
    }

    if let Some(problem) = health_gate(ctx, &cluster, conn).await? {
        return Ok(Outcome::failure(
            UPGRADE_HEALTH_CHECK_FAILED,
            format!("cluster unhealthy after upgrade: {problem}"),
        ));
    }

    let versions = ceph::status::versions(ctx.executor.as_ref(), &conn.info).await?;
    let version = ceph::status::daemon_versions(&versions, "overall")
        .first()
        .map(|v| (*v).to_owned());
    let cluster = ctx
        .update_status(&cluster, |status| {
            status.version = Some(ClusterVersion {
                image: image.clone(),
                version: version.clone(),
            });
            status.operator_version = Some(operator_version.to_owned());
            status.upgrade = None;
            status.set_condition(Condition::new(
                ConditionType::Upgrading,
                ConditionStatus::False,
                reason::UPGRADE_COMPLETED,
                format!("Upgraded to {image}"),
            ));
        })
        .await?;
    ctx.record(
        &cluster,
        EventType::Normal,
        reason::UPGRADE_COMPLETED,
        &format!("Cluster upgraded to {image}"),
    )
    .await?;
    Ok(Outcome::RequeueAfter(RESUME_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::v1::cluster::ClusterStatus;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

    fn deployment(image: &str, generation: i64, observed: i64, ready: i32) -> Deployment {
        Deployment {
            metadata: kube::api::ObjectMeta {
                name: Some("rook-ceph-mon-a".to_owned()),
                generation: Some(generation),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "mon".to_owned(),
                            image: Some(image.to_owned()),
                            ..Default::default()
                        }],
                        init_containers: Some(vec![Container {
                            name: "chown".to_owned(),
                            image: Some(image.to_owned()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                observed_generation: Some(observed),
                replicas: Some(1),
                updated_replicas: Some(ready),
                ready_replicas: Some(ready),
                ..Default::default()
            }),
        }
    }

    fn with_status(status: ClusterStatus) -> CephCluster {
        let mut cluster = crate::tests::create_test_cluster(3);
        cluster.status = Some(status);
        cluster
    }

    #[test]
    fn test_needed() {
        let fresh = crate::tests::create_test_cluster(3);
        assert!(!needed(&fresh, "1.0.0"));

        let image = fresh.spec.ceph_version.image.clone();
        let running = with_status(ClusterStatus {
            version: Some(ClusterVersion {
                image: image.clone(),
                version: None,
            }),
            operator_version: Some("1.0.0".to_owned()),
            ..Default::default()
        });
        assert!(!needed(&running, "1.0.0"));
        assert!(needed(&running, "1.1.0"));

        let mut bumped = running.clone();
        bumped.spec.ceph_version.image = "quay.io/ceph/ceph:v19.2.0".to_owned();
        assert!(needed(&bumped, "1.0.0"));
    }

    #[test]
    fn test_progress_resets_on_new_target() {
        let cluster = with_status(ClusterStatus {
            upgrade: Some(UpgradeProgress {
                target_image: "img:v2".to_owned(),
                completed_steps: vec!["OperatorVersion".to_owned(), "Mons".to_owned()],
                current_step: Some("Mgrs".to_owned()),
            }),
            ..Default::default()
        });

        let resumed = progress_for(&cluster, "img:v2");
        assert_eq!(remaining_steps(&resumed).first(), Some(&Step::Mgrs));

        let restarted = progress_for(&cluster, "img:v3");
        assert_eq!(remaining_steps(&restarted), STEPS.to_vec());
    }

    #[test]
    fn test_step_order() {
        let pos = |s: Step| STEPS.iter().position(|x| *x == s).unwrap();
        assert!(pos(Step::Mons) < pos(Step::Mgrs));
        assert!(pos(Step::Mds) < pos(Step::Osds));
        assert!(pos(Step::Osds) < pos(Step::Rgw));
        assert_eq!(STEPS.last(), Some(&Step::Nfs));
    }

    #[test]
    fn test_image_patch() {
        let deploy = deployment("img:v1", 1, 1, 1);
        let patch = image_patch(&deploy, "img:v2").unwrap();
        assert_eq!(
            patch["spec"]["template"]["spec"]["containers"][0],
            json!({"name": "mon", "image": "img:v2"})
        );
        assert_eq!(
            patch["spec"]["template"]["spec"]["initContainers"][0]["name"],
            "chown"
        );
        assert!(image_patch(&deploy, "img:v1").is_none());
    }

    #[test]
    fn test_deployment_rolled_out() {
        assert!(deployment_rolled_out(&deployment("img:v2", 2, 2, 1), "img:v2"));
        // controller has not seen the new template yet
        assert!(!deployment_rolled_out(&deployment("img:v2", 2, 1, 1), "img:v2"));
        assert!(!deployment_rolled_out(&deployment("img:v2", 2, 2, 0), "img:v2"));
        assert!(!deployment_rolled_out(&deployment("img:v1", 2, 2, 1), "img:v2"));
    }
}
