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
use crate::error::{Error, InvariantSnafu};
use crate::object::admin::{Quota, UserConfig, UserInfo};
use crate::object::{ObjectAdmin, StoreContext};
use crate::reconcile::object_store::{self, StoreHandle};
use crate::reconcile::{Outcome, cluster, run, set_ready};
use crate::types::v1::object_store::CephObjectStore;
use crate::types::v1::object_user::{CephObjectStoreUser, SECRET_NAME_INFO_KEY};
use crate::types::v1::status::{Phase, reason};
use crate::types::v1::{ResourceIdentity, child_meta};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const ACCESS_KEY: &str = "AccessKey";
pub const SECRET_KEY: &str = "SecretKey";
pub const ENDPOINT_KEY: &str = "Endpoint";

fn desired_config(user: &CephObjectStoreUser) -> UserConfig {
    UserConfig {
        uid: user.uid(),
        display_name: user
            .spec
            .display_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| user.uid()),
        email: user.spec.email.clone(),
        max_buckets: user.spec.quotas.as_ref().and_then(|q| q.max_buckets),
    }
}

fn desired_quota(user: &CephObjectStoreUser) -> Quota {
    user.spec
        .quotas
        .as_ref()
        .map(|q| Quota {
            max_objects: q.max_objects,
            max_size: q.max_size_bytes(),
        })
        .unwrap_or_default()
}

fn needs_modify(current: &UserInfo, desired: &UserConfig) -> bool {
    current.display_name != desired.display_name
        || current.email != desired.email.clone().unwrap_or_default()
        || desired.max_buckets.is_some_and(|m| m != current.max_buckets)
}

/// Brings the backend user in line with `user`, calling mutating admin
/// operations only for fields that differ.
pub async fn sync_user(
    admin: &dyn ObjectAdmin,
    store: &StoreContext,
    user: &CephObjectStoreUser,
) -> Result<UserInfo, Error> {
    let caps = user
        .caps_string()
        .map_err(|message| InvariantSnafu { message }.build())?;
    let desired = desired_config(user);

    let mut current = match admin.get_user(store, &desired.uid).await? {
        Some(current) => current,
        None => {
            info!("creating user {} in store {}", desired.uid, store.name);
            admin.create_user(store, &desired).await?
        }
    };
    if needs_modify(&current, &desired) {
        debug!("updating user {}", desired.uid);
        current = admin.modify_user(store, &desired).await?;
    }

    let current_caps = current.caps_string();
    if current_caps != caps {
        admin.set_caps(store, &desired.uid, &caps, &current_caps).await?;
    }

    let quota = desired_quota(user);
    if current.user_quota.as_quota() != quota {
        admin.set_user_quota(store, &desired.uid, &quota).await?;
    }
    Ok(current)
}

fn credentials_secret(user: &CephObjectStoreUser, info: &UserInfo, endpoint: &str) -> Result<Secret, Error> {
    let key = info.keys.first().ok_or_else(|| crate::object::Error::NoKeys {
        uid: info.user_id.clone(),
    })?;
    let labels = BTreeMap::from([
        ("app".to_owned(), "rook-ceph-rgw".to_owned()),
        ("rook_object_store".to_owned(), user.spec.store.clone()),
        ("user".to_owned(), user.uid()),
    ]);
    Ok(Secret {
        metadata: child_meta(user, user.secret_name(), labels),
        string_data: Some(BTreeMap::from([
            (ACCESS_KEY.to_owned(), key.access_key.clone()),
            (SECRET_KEY.to_owned(), key.secret_key.clone()),
            (ENDPOINT_KEY.to_owned(), endpoint.to_owned()),
        ])),
        type_: Some("kubernetes.io/rook".to_owned()),
        ..Default::default()
    })
}

async fn apply(ctx: &Context, user: &CephObjectStoreUser) -> Result<Outcome, Error> {
    let ns = user.require_namespace()?;
    let store_ns = user.store_namespace().unwrap_or_else(|| ns.clone());
    let StoreHandle { store, admin } = object_store::connect_store(ctx, &store_ns, &user.spec.store).await?;
    if !store.allows_namespace(&ns) {
        return InvariantSnafu {
            message: format!(
                "object store {store_ns}/{} does not allow users in namespace {ns}",
                user.spec.store
            ),
        }
        .fail();
    }

    let info = sync_user(ctx.object_admin.as_ref(), &admin, user).await?;
    let endpoint = store.endpoint()?;
    ctx.apply(&credentials_secret(user, &info, &endpoint)?, &ns).await?;

    let secret_name = user.secret_name();
    let user = ctx
        .update_status(user, |status| {
            status.info = BTreeMap::from([(SECRET_NAME_INFO_KEY.to_owned(), secret_name.clone())]);
        })
        .await?;
    set_ready(ctx, &user, Phase::Ready, reason::RECONCILE_SUCCEEDED, "user created").await?;
    Ok(Outcome::Done)
}

async fn cleanup(ctx: &Context, user: &CephObjectStoreUser) -> Result<Outcome, Error> {
    let ns = user.require_namespace()?;
    let store_ns = user.store_namespace().unwrap_or_else(|| ns.clone());
    ctx.delete::<Secret>(&user.secret_name(), &ns).await?;

    if ctx.get_opt::<CephObjectStore>(&user.spec.store, &store_ns).await?.is_none() {
        debug!("store {} is gone, nothing to remove for {}", user.spec.store, user.key());
        return Ok(Outcome::Done);
    }
    let Some(conn) = cluster::connect_for_cleanup(ctx, &store_ns).await? else {
        return Ok(Outcome::Done);
    };
    let admin = StoreContext::new(conn.info, &user.spec.store);
    ctx.object_admin.delete_user(&admin, &user.uid(), false).await?;
    info!("user {} removed from store {}", user.uid(), user.spec.store);
    Ok(Outcome::Done)
}

pub async fn reconcile(user: Arc<CephObjectStoreUser>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        user.as_ref(),
        async |u: &CephObjectStoreUser| apply(&ctx, u).await,
        async |u: &CephObjectStoreUser| cleanup(&ctx, u).await,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceph::ClusterInfo;
    use crate::object::admin::{MockObjectAdmin, QuotaInfo, UserCap, UserKey};
    use crate::types::v1::object_user::UserQuotaSpec;
    use std::path::Path;

    fn store() -> StoreContext {
        StoreContext::new(ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid"), "my-store")
    }

    fn existing(user: &CephObjectStoreUser) -> UserInfo {
        UserInfo {
            user_id: user.uid(),
            display_name: user.uid(),
            keys: vec![UserKey {
                user: user.uid(),
                access_key: "AK".to_owned(),
                secret_key: "SK".to_owned(),
            }],
            caps: vec![UserCap {
                type_: "users".to_owned(),
                perm: "read".to_owned(),
            }],
            user_quota: QuotaInfo {
                enabled: true,
                max_size: -1,
                max_objects: 100,
            },
            ..Default::default()
        }
    }

    fn user() -> CephObjectStoreUser {
        let mut user = crate::tests::create_test_user("alice", "my-store");
        user.spec.capabilities = BTreeMap::from([("users".to_owned(), "read".to_owned())]);
        user.spec.quotas = Some(UserQuotaSpec {
            max_objects: Some(100),
            ..Default::default()
        });
        user
    }

    #[tokio::test]
    async fn test_unchanged_user_makes_no_mutating_call() {
        let user = user();
        let info = existing(&user);
        let mut admin = MockObjectAdmin::new();
        admin
            .expect_get_user()
            .times(1)
            .returning(move |_, _| Ok(Some(info.clone())));
        admin.expect_create_user().never();
        admin.expect_modify_user().never();
        admin.expect_set_caps().never();
        admin.expect_set_user_quota().never();

        let got = sync_user(&admin, &store(), &user).await.unwrap();
        assert_eq!(got.keys[0].access_key, "AK");
    }

    #[tokio::test]
    async fn test_missing_user_is_created_with_caps_and_quota() {
        let user = user();
        let mut created = existing(&user);
        created.caps.clear();
        created.user_quota = QuotaInfo::default();

        let mut admin = MockObjectAdmin::new();
        admin.expect_get_user().returning(|_, _| Ok(None));
        admin
            .expect_create_user()
            .times(1)
            .withf(|_, config| config.uid == "alice" && config.display_name == "alice")
            .returning(move |_, _| Ok(created.clone()));
        admin
            .expect_set_caps()
            .times(1)
            .withf(|_, uid, add, remove| uid == "alice" && add == "users=read" && remove.is_empty())
            .returning(|_, _, _, _| Ok(()));
        admin
            .expect_set_user_quota()
            .times(1)
            .withf(|_, _, quota| quota.max_objects == Some(100) && quota.max_size.is_none())
            .returning(|_, _, _| Ok(()));

        sync_user(&admin, &store(), &user).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_caps_rejected_before_backend() {
        let mut user = user();
        user.spec.capabilities.insert("buckets".to_owned(), "all".to_owned());
        let admin = MockObjectAdmin::new();
        let err = sync_user(&admin, &store(), &user).await.unwrap_err();
        assert!(matches!(err, Error::Invariant { .. }));
    }

    #[test]
    fn test_credentials_secret() {
        let user = user();
        let secret = credentials_secret(&user, &existing(&user), "http://rgw:80").unwrap();
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("rook-ceph-object-user-my-store-alice")
        );
        let data = secret.string_data.unwrap();
        assert_eq!(data[ACCESS_KEY], "AK");
        assert_eq!(data[SECRET_KEY], "SK");
        assert_eq!(data[ENDPOINT_KEY], "http://rgw:80");
    }
}
