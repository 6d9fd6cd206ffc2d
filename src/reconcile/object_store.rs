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

use crate::context::Context;
use crate::dependents;
use crate::error::{DependencySnafu, Error, InvariantSnafu};
use crate::object::admin::{UserConfig, UserInfo};
use crate::object::{Credentials, StoreContext};
use crate::reconcile::certificate;
use crate::reconcile::cluster;
use crate::reconcile::{DEPENDENCY_REQUEUE, Outcome, apply_daemon_keyring, remove_daemon, run, set_ready};
use crate::types::v1::object_store::{ADMIN_OPS_USER, CephObjectStore, RGW_APP, store_pools};
use crate::types::v1::status::{Conditioned, Phase, reason};
use crate::types::v1::{ResourceIdentity, child_meta, daemon_labels};
use crate::{ceph, object};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const ADMIN_OPS_CAPS: &str = "buckets=*;metadata=read;usage=read;users=*;zone=read";
pub const ACCESS_KEY: &str = "accessKey";
pub const SECRET_KEY: &str = "secretKey";

/// A ready object store and the `radosgw-admin` handle for it.
pub struct StoreHandle {
    pub store: CephObjectStore,
    pub admin: StoreContext,
}

impl StoreHandle {
    pub fn endpoint(&self) -> Result<String, Error> {
        Ok(self.store.endpoint()?)
    }
}

/// Resolves `name` in `ns` to a ready store. Anything else is a dependency wait.
pub async fn connect_store(ctx: &Context, ns: &str, name: &str) -> Result<StoreHandle, Error> {
    let store = ctx.get_opt::<CephObjectStore>(name, ns).await?;
    let Some(store) = store.filter(|s| !s.is_deleting()) else {
        return DependencySnafu {
            kind: "CephObjectStore",
            name: format!("{ns}/{name}"),
            reason: "object store not found",
        }
        .fail();
    };
    if !store.status.as_ref().is_some_and(|s| s.is_ready()) {
        return DependencySnafu {
            kind: "CephObjectStore",
            name: format!("{ns}/{name}"),
            reason: "object store is not ready",
        }
        .fail();
    }
    let (_, conn) = cluster::connect(ctx, ns).await?;
    Ok(StoreHandle {
        admin: StoreContext::new(conn.info, name),
        store,
    })
}

fn first_key(user: &UserInfo) -> Result<Credentials, Error> {
    let key = user.keys.first().ok_or_else(|| {
        object::Error::NoKeys {
            uid: user.user_id.clone(),
        }
    })?;
    Ok(Credentials {
        access_key: key.access_key.clone(),
        secret_key: key.secret_key.clone(),
    })
}

/// S3 credentials of the store's admin-ops user.
pub async fn admin_credentials(ctx: &Context, admin: &StoreContext) -> Result<Credentials, Error> {
    let Some(user) = ctx.object_admin.get_user(admin, ADMIN_OPS_USER).await? else {
        return DependencySnafu {
            kind: "CephObjectStore",
            name: admin.name.clone(),
            reason: format!("user {ADMIN_OPS_USER} does not exist yet"),
        }
        .fail();
    };
    first_key(&user)
}

async fn ensure_admin_ops_user(ctx: &Context, admin: &StoreContext) -> Result<Credentials, Error> {
    let user = match ctx.object_admin.get_user(admin, ADMIN_OPS_USER).await? {
        Some(user) => user,
        None => {
            info!("creating admin ops user for store {}", admin.name);
            let config = UserConfig {
                uid: ADMIN_OPS_USER.to_owned(),
                display_name: "RGW Admin Ops User".to_owned(),
                ..Default::default()
            };
            ctx.object_admin.create_user(admin, &config).await?
        }
    };
    let current = user.caps_string();
    if current != ADMIN_OPS_CAPS {
        ctx.object_admin
            .set_caps(admin, ADMIN_OPS_USER, ADMIN_OPS_CAPS, &current)
            .await?;
    }
    first_key(&user)
}

fn admin_ops_secret(store: &CephObjectStore, ns: &str, creds: &Credentials) -> Secret {
    let name = format!("{RGW_APP}-{}-{ADMIN_OPS_USER}", store.name_any());
    Secret {
        metadata: child_meta(store, name, daemon_labels(RGW_APP, ns)),
        string_data: Some(BTreeMap::from([
            (ACCESS_KEY.to_owned(), creds.access_key.clone()),
            (SECRET_KEY.to_owned(), creds.secret_key.clone()),
        ])),
        type_: Some("kubernetes.io/rook".to_owned()),
        ..Default::default()
    }
}

async fn apply(ctx: &Context, store: &CephObjectStore) -> Result<Outcome, Error> {
    let ns = store.require_namespace()?;
    let name = store.name_any();
    for (_, is_data) in store_pools(&name) {
        store
            .pool_spec(is_data)
            .validate()
            .map_err(|message| InvariantSnafu { message }.build())?;
    }
    let cert_hash = certificate::gateway_cert_hash(ctx, store).await?;

    let (cluster, conn) = cluster::connect(ctx, &ns).await?;
    let exec = ctx.executor.as_ref();
    for (pool, is_data) in store_pools(&name) {
        ceph::pool::ensure(exec, &conn.info, &pool, store.pool_spec(is_data), "rgw").await?;
    }

    let endpoint = store.endpoint()?;
    let admin = StoreContext::new(conn.info.clone(), &name);
    ctx.object_admin.ensure_zone(&admin, &endpoint).await?;

    apply_daemon_keyring(
        ctx,
        store,
        &conn,
        &store.rgw_entity(),
        "rgw",
        &store.keyring_secret_name(),
        RGW_APP,
    )
    .await?;
    ctx.apply(&store.new_rgw_deployment(&cluster, cert_hash.as_deref())?, &ns)
        .await?;
    ctx.apply(&store.new_rgw_service()?, &ns).await?;

    let creds = ensure_admin_ops_user(ctx, &admin).await?;
    ctx.apply(&admin_ops_secret(store, &ns, &creds), &ns).await?;

    let endpoints = store.endpoints()?;
    let store = ctx
        .update_status(store, |status| {
            status.endpoints = Some(endpoints.clone());
            status.info = BTreeMap::from([("endpoint".to_owned(), endpoint.clone())]);
        })
        .await?;
    set_ready(
        ctx,
        &store,
        Phase::Ready,
        reason::RECONCILE_SUCCEEDED,
        &format!("object store {name} serving at {endpoint}"),
    )
    .await?;
    Ok(Outcome::Done)
}

async fn cleanup(ctx: &Context, store: &CephObjectStore) -> Result<Outcome, Error> {
    let ns = store.require_namespace()?;
    let name = store.name_any();
    let conn = cluster::connect_for_cleanup(ctx, &ns).await?;

    let mut deps = dependents::of_object_store(ctx, store).await?;
    if let Some(conn) = &conn {
        let admin = StoreContext::new(conn.info.clone(), &name);
        dependents::add_store_buckets(ctx.object_admin.as_ref(), &admin, &mut deps).await?;
    }
    if !deps.is_empty() {
        dependents::report_blocked(ctx, store, &deps).await?;
        return Ok(Outcome::RequeueAfter(DEPENDENCY_REQUEUE));
    }
    dependents::report_not_blocked(ctx, store).await?;

    ctx.delete::<Service>(&store.service_name(), &ns).await?;
    ctx.delete::<Secret>(&format!("{RGW_APP}-{name}-{ADMIN_OPS_USER}"), &ns)
        .await?;
    let Some(conn) = conn else {
        return Ok(Outcome::Done);
    };
    remove_daemon(
        ctx,
        &conn,
        &ns,
        &store.deployment_name(),
        &store.keyring_secret_name(),
        &store.rgw_entity(),
    )
    .await?;

    let admin = StoreContext::new(conn.info.clone(), &name);
    ctx.object_admin.delete_zone(&admin).await?;
    if store.spec.preserve_pools_on_delete {
        info!("object store {} removed, pools preserved", name);
        return Ok(Outcome::Done);
    }

    let others = ctx
        .list::<CephObjectStore>(&ns)
        .await?
        .iter()
        .any(|s| s.name_any() != name);
    let exec = ctx.executor.as_ref();
    for (pool, _) in store_pools(&name) {
        if others && pool == ".rgw.root" {
            debug!("keeping shared pool {}", pool);
            continue;
        }
        ceph::pool::delete(exec, &conn.info, &pool).await?;
    }
    info!("object store {} and its pools removed", name);
    Ok(Outcome::Done)
}

pub async fn reconcile(store: Arc<CephObjectStore>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        store.as_ref(),
        async |s: &CephObjectStore| apply(&ctx, s).await,
        async |s: &CephObjectStore| cleanup(&ctx, s).await,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::admin::UserKey;

    #[test]
    fn test_first_key() {
        let mut user = UserInfo {
            user_id: ADMIN_OPS_USER.to_owned(),
            ..Default::default()
        };
        assert!(first_key(&user).is_err());

        user.keys.push(UserKey {
            user: ADMIN_OPS_USER.to_owned(),
            access_key: "AK".to_owned(),
            secret_key: "SK".to_owned(),
        });
        let creds = first_key(&user).unwrap();
        assert_eq!(creds.access_key, "AK");
        assert_eq!(creds.secret_key, "SK");
    }

    #[test]
    fn test_admin_ops_secret() {
        let store = crate::tests::create_test_object_store("my-store");
        let creds = Credentials {
            access_key: "AK".to_owned(),
            secret_key: "SK".to_owned(),
        };
        let secret = admin_ops_secret(&store, "rook-ceph", &creds);
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("rook-ceph-rgw-my-store-rgw-admin-ops-user")
        );
        let data = secret.string_data.unwrap();
        assert_eq!(data[ACCESS_KEY], "AK");
        assert_eq!(data[SECRET_KEY], "SK");
    }
}
