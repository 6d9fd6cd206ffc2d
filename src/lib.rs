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

use crate::config::OperatorConfig;
use crate::context::Context;
use crate::error::Error;
use crate::error_policy::error_policy;
use crate::leader::LeaderElector;
use crate::reconcile::{
    block_pool, bucket, cluster, filesystem, nfs, notification, object_store, object_user, rbd_mirror, topic,
};
use crate::types::v1::block_pool::CephBlockPool;
use crate::types::v1::bucket_claim::ObjectBucketClaim;
use crate::types::v1::cluster::CephCluster;
use crate::types::v1::filesystem::CephFilesystem;
use crate::types::v1::nfs::CephNFS;
use crate::types::v1::notification::CephBucketNotification;
use crate::types::v1::object_store::CephObjectStore;
use crate::types::v1::object_user::CephObjectStoreUser;
use crate::types::v1::rbd_mirror::CephRBDMirror;
use crate::types::v1::topic::CephBucketTopic;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, CustomResourceExt, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub mod ceph;
pub mod config;
mod context;
mod dependents;
pub mod error;
mod error_policy;
pub mod health;
mod inventory;
mod keyring;
pub mod leader;
pub mod object;
pub mod reconcile;
pub mod server;
pub mod types;
pub mod utils;

#[cfg(test)]
mod tests;

shadow_rs::shadow!(build);

/// Version of this operator build, recorded as `status.operatorVersion`.
pub fn operator_version() -> &'static str {
    build::PKG_VERSION
}

fn api<K>(client: &Client, namespace: &str) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    if namespace.is_empty() {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), namespace)
    }
}

fn report<K: Resource<DynamicType = ()>>(
    res: Result<(ObjectRef<K>, Action), controller::Error<Error, watcher::Error>>,
) {
    match res {
        Ok((obj, _)) => debug!("reconciled {}/{}", obj.namespace.unwrap_or_default(), obj.name),
        Err(e) => warn!("reconcile failed: {}", e),
    }
}

fn controller<K>(client: &Client, config: &OperatorConfig) -> Controller<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    Controller::new(api::<K>(client, &config.namespace), watcher::Config::default()).shutdown_on_signal()
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

pub async fn run(config: OperatorConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();
    info!("starting ceph operator {}", operator_version());

    let client = Client::try_default().await?;
    let mut leader = if config.leader_election {
        let identity = std::env::var("HOSTNAME").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let elector = LeaderElector::new(client.clone(), &config.lease_namespace, &identity);
        tokio::select! {
            guard = elector.acquire() => Some(guard),
            _ = wait_for_signal() => {
                info!("shutdown requested before leadership was acquired");
                return Ok(());
            }
        }
    } else {
        None
    };

    let ns = config.namespace.clone();
    let shutdown = CancellationToken::new();
    let ctx = Arc::new(Context::new(client.clone(), config.clone()));

    let clusters = controller::<CephCluster>(&client, &config)
        .owns(api::<appsv1::Deployment>(&client, &ns), watcher::Config::default())
        .owns(api::<corev1::Service>(&client, &ns), watcher::Config::default())
        .owns(api::<corev1::ConfigMap>(&client, &ns), watcher::Config::default())
        .owns(api::<corev1::Secret>(&client, &ns), watcher::Config::default())
        .owns(api::<batchv1::Job>(&client, &ns), watcher::Config::default())
        .run(cluster::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let stores = controller::<CephObjectStore>(&client, &config)
        .owns(api::<appsv1::Deployment>(&client, &ns), watcher::Config::default())
        .owns(api::<corev1::Service>(&client, &ns), watcher::Config::default())
        .run(object_store::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let users = controller::<CephObjectStoreUser>(&client, &config)
        .owns(api::<corev1::Secret>(&client, &ns), watcher::Config::default())
        .run(object_user::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let claims = controller::<ObjectBucketClaim>(&client, &config)
        .owns(api::<corev1::Secret>(&client, &ns), watcher::Config::default())
        .owns(api::<corev1::ConfigMap>(&client, &ns), watcher::Config::default())
        .run(bucket::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let topics = controller::<CephBucketTopic>(&client, &config)
        .run(topic::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let notifications = controller::<CephBucketNotification>(&client, &config)
        .run(notification::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let filesystems = controller::<CephFilesystem>(&client, &config)
        .owns(api::<appsv1::Deployment>(&client, &ns), watcher::Config::default())
        .run(filesystem::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let nfses = controller::<CephNFS>(&client, &config)
        .owns(api::<appsv1::Deployment>(&client, &ns), watcher::Config::default())
        .owns(api::<corev1::Service>(&client, &ns), watcher::Config::default())
        .owns(api::<corev1::ConfigMap>(&client, &ns), watcher::Config::default())
        .run(nfs::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let mirrors = controller::<CephRBDMirror>(&client, &config)
        .owns(api::<appsv1::Deployment>(&client, &ns), watcher::Config::default())
        .run(rbd_mirror::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let pools = controller::<CephBlockPool>(&client, &config)
        .run(block_pool::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move { report(res) });

    let ops = server::run(client.clone(), config.http_port, shutdown.clone());
    let signals = {
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown requested, draining controllers");
            shutdown.cancel();
        }
    };

    let work = async {
        tokio::join!(
            ops,
            signals,
            clusters,
            stores,
            users,
            claims,
            topics,
            notifications,
            filesystems,
            nfses,
            mirrors,
            pools
        )
    };
    let lost = async {
        match leader.as_mut() {
            Some(guard) => guard.lost().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        (served, ..) = work => served?,
        err = lost => return Err(err.into()),
    }
    if let Some(guard) = leader {
        guard.release().await?;
    }
    info!("controllers stopped");
    Ok(())
}

/// Every CRD served by the operator, as one multi-document YAML stream.
pub fn crd_yaml() -> Result<String, serde_yaml_ng::Error> {
    let crds = [
        CephCluster::crd(),
        CephBlockPool::crd(),
        CephFilesystem::crd(),
        CephNFS::crd(),
        CephRBDMirror::crd(),
        CephObjectStore::crd(),
        CephObjectStoreUser::crd(),
        CephBucketTopic::crd(),
        CephBucketNotification::crd(),
        ObjectBucketClaim::crd(),
    ];
    let mut out = String::new();
    for crd in &crds {
        out.push_str("---\n");
        out.push_str(&serde_yaml_ng::to_string(crd)?);
    }
    Ok(out)
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    writer.write_all(crd_yaml()?.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
