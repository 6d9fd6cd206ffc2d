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

//! ObjectBucketClaim provisioning: owner resolution, bucket creation and
//! ownership transfer, bucket quota, and the companion Secret and ConfigMap.

use crate::context::Context;
use crate::error::{DependencySnafu, Error, InvariantSnafu};
use crate::object::admin::{BucketInfo, Quota, UserConfig};
use crate::object::{Credentials, ObjectAdmin, S3Api, StoreContext};
use crate::reconcile::object_store::{self, StoreHandle};
use crate::reconcile::{Outcome, cluster, notification, run, set_progressing, set_ready};
use crate::types::v1::bucket_claim::{ClaimStore, ObjectBucketClaim};
use crate::types::v1::object_store::CephObjectStore;
use crate::types::v1::status::{Conditioned, Phase, reason};
use crate::types::v1::{ResourceIdentity, child_meta};
use crate::{keyring, object};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const OWNER_NOT_FOUND: &str = "BucketOwnerNotFound";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const BUCKET_HOST: &str = "BUCKET_HOST";
pub const BUCKET_PORT: &str = "BUCKET_PORT";
pub const BUCKET_NAME: &str = "BUCKET_NAME";
pub const BUCKET_REGION: &str = "BUCKET_REGION";

/// Backend user a claim's bucket should belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// A pre-existing user, named by the claim or retained from an earlier bind.
    Named(String),
    /// A user created for, and deleted with, the claim.
    Generated(String),
}

/// Picks the owner. A cleared `bucketOwner` keeps whoever owns the bucket
/// now, whatever phase the claim is in.
pub fn resolve_owner(claim: &ObjectBucketClaim) -> Owner {
    if let Some(uid) = claim.requested_owner() {
        return Owner::Named(uid.to_owned());
    }
    let generated = claim.generated_owner();
    match claim.current_owner() {
        Some(current) if current != generated => Owner::Named(current.to_owned()),
        _ => Owner::Generated(generated),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimState {
    /// The named owner does not exist; nothing was created.
    OwnerMissing(String),
    Bound {
        owner: String,
        bucket: String,
        creds: Credentials,
    },
}

/// Endpoint, owner credentials and bucket of a bound claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimAccess {
    pub endpoint: String,
    pub creds: Credentials,
    pub bucket: String,
}

/// Creates or adopts the bucket for `claim` and moves it to the resolved
/// owner. The owner's own quota and keys are never modified.
pub async fn sync_bucket(
    admin: &dyn ObjectAdmin,
    s3: &dyn S3Api,
    store: &StoreContext,
    endpoint: &str,
    claim: &ObjectBucketClaim,
    bucket: &str,
) -> Result<ClaimState, Error> {
    let quota = claim
        .bucket_quota()
        .map_err(|message| InvariantSnafu { message }.build())?;
    let quota = Quota {
        max_objects: quota.max_objects,
        max_size: quota.max_size,
    };

    let user = match resolve_owner(claim) {
        Owner::Named(uid) => match admin.get_user(store, &uid).await? {
            Some(user) => user,
            None => {
                warn!("unable to get user {:?} creds", uid);
                return Ok(ClaimState::OwnerMissing(uid));
            }
        },
        Owner::Generated(uid) => match admin.get_user(store, &uid).await? {
            Some(user) => user,
            None => {
                info!("creating user {} for claim {}", uid, claim.key());
                let config = UserConfig {
                    display_name: uid.clone(),
                    uid,
                    ..Default::default()
                };
                admin.create_user(store, &config).await?
            }
        },
    };
    let owner = user.user_id.clone();
    let key = user.keys.first().ok_or_else(|| object::Error::NoKeys { uid: owner.clone() })?;
    let creds = Credentials {
        access_key: key.access_key.clone(),
        secret_key: key.secret_key.clone(),
    };

    let info = match admin.get_bucket(store, bucket).await? {
        Some(info) => info,
        None => {
            info!("creating bucket {} for {}", bucket, owner);
            s3.create_bucket(endpoint, &creds, bucket).await?;
            admin
                .get_bucket(store, bucket)
                .await?
                .unwrap_or_else(|| BucketInfo {
                    bucket: bucket.to_owned(),
                    owner: owner.clone(),
                    ..Default::default()
                })
        }
    };
    if info.owner != owner {
        info!("moving bucket {} from {:?} to {:?}", bucket, info.owner, owner);
        admin.link_bucket(store, bucket, &owner).await?;
        admin.chown_bucket(store, bucket, &owner).await?;
    }
    if info.bucket_quota.as_quota() != quota {
        admin.set_bucket_quota(store, bucket, &quota).await?;
    }

    Ok(ClaimState::Bound {
        owner,
        bucket: bucket.to_owned(),
        creds,
    })
}

/// Connection data written into the claim's ConfigMap.
pub fn bucket_config(store: &CephObjectStore, region: &str, bucket: &str) -> Result<BTreeMap<String, String>, Error> {
    let host = format!("{}.{}.svc", store.service_name(), store.require_namespace()?);
    let gateway = &store.spec.gateway;
    let port = gateway.port.or(gateway.secure_port).unwrap_or(80);
    Ok(BTreeMap::from([
        (BUCKET_HOST.to_owned(), host),
        (BUCKET_PORT.to_owned(), port.to_string()),
        (BUCKET_NAME.to_owned(), bucket.to_owned()),
        (BUCKET_REGION.to_owned(), region.to_owned()),
    ]))
}

fn claim_labels(claim: &ObjectBucketClaim) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("bucket-provisioner".to_owned(), "ceph.rook.io-bucket".to_owned()),
        ("claim".to_owned(), claim.name_any()),
    ])
}

fn claim_secret(claim: &ObjectBucketClaim, creds: &Credentials) -> Secret {
    Secret {
        metadata: child_meta(claim, claim.name_any(), claim_labels(claim)),
        string_data: Some(BTreeMap::from([
            (AWS_ACCESS_KEY_ID.to_owned(), creds.access_key.clone()),
            (AWS_SECRET_ACCESS_KEY.to_owned(), creds.secret_key.clone()),
        ])),
        type_: Some("Opaque".to_owned()),
        ..Default::default()
    }
}

fn claim_configmap(claim: &ObjectBucketClaim, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: child_meta(claim, claim.name_any(), claim_labels(claim)),
        data: Some(data),
        ..Default::default()
    }
}

async fn claim_store(ctx: &Context, claim: &ObjectBucketClaim) -> Result<ClaimStore, Error> {
    let class_name = &claim.spec.storage_class_name;
    let Some(class) = ctx.get_global_opt::<StorageClass>(class_name).await? else {
        return DependencySnafu {
            kind: "StorageClass",
            name: class_name.clone(),
            reason: "storage class not found",
        }
        .fail();
    };
    ClaimStore::from_storage_class(&class).ok_or_else(|| {
        InvariantSnafu {
            message: format!("storage class {class_name} does not name an object store"),
        }
        .build()
    })
}

/// Access data for a bound claim, read back from its Secret.
pub async fn claim_access(ctx: &Context, claim: &ObjectBucketClaim) -> Result<Option<ClaimAccess>, Error> {
    let Some(bucket) = claim.status.as_ref().and_then(|s| s.bucket_name.clone()) else {
        return Ok(None);
    };
    if !claim.is_bound() {
        return Ok(None);
    }
    let class = claim_store(ctx, claim).await?;
    let handle = object_store::connect_store(ctx, &class.namespace, &class.name).await?;
    let ns = claim.require_namespace()?;
    let Some(secret) = ctx.get_opt::<Secret>(&claim.name_any(), &ns).await? else {
        return Ok(None);
    };
    let creds = keyring::secret_string(&secret, AWS_ACCESS_KEY_ID)
        .zip(keyring::secret_string(&secret, AWS_SECRET_ACCESS_KEY))
        .map(|(access_key, secret_key)| Credentials { access_key, secret_key });
    let Some(creds) = creds else {
        return Ok(None);
    };
    Ok(Some(ClaimAccess {
        endpoint: handle.endpoint()?,
        creds,
        bucket,
    }))
}

async fn apply(ctx: &Context, claim: &ObjectBucketClaim) -> Result<Outcome, Error> {
    let ns = claim.require_namespace()?;
    let class = claim_store(ctx, claim).await?;
    let StoreHandle { store, admin } = object_store::connect_store(ctx, &class.namespace, &class.name).await?;
    let Some(bucket) = claim.bucket_name() else {
        return InvariantSnafu {
            message: "one of bucketName or generateBucketName must be set",
        }
        .fail();
    };
    let endpoint = store.endpoint()?;

    let state = sync_bucket(
        ctx.object_admin.as_ref(),
        ctx.s3.as_ref(),
        &admin,
        &endpoint,
        claim,
        &bucket,
    )
    .await?;
    let (owner, bucket, creds) = match state {
        ClaimState::OwnerMissing(uid) => {
            let message = format!("unable to get user {uid:?} creds");
            set_progressing(ctx, claim, OWNER_NOT_FOUND, &message).await?;
            return Ok(Outcome::Done);
        }
        ClaimState::Bound { owner, bucket, creds } => (owner, bucket, creds),
    };

    ctx.apply(&claim_secret(claim, &creds), &ns).await?;
    let config = bucket_config(&store, &class.region, &bucket)?;
    ctx.apply(&claim_configmap(claim, config), &ns).await?;

    let claim = ctx
        .update_status(claim, |status| {
            status.owner = Some(owner.clone());
            status.bucket_name = Some(bucket.clone());
        })
        .await?;
    let claim = set_ready(
        ctx,
        &claim,
        Phase::Ready,
        reason::RECONCILE_SUCCEEDED,
        &format!("bucket {bucket} bound to {owner}"),
    )
    .await?;

    let access = ClaimAccess { endpoint, creds, bucket };
    notification::sync_claim(ctx, &claim, &access).await
}

/// A class that is gone or names no store leaves nothing to release; any
/// other lookup failure must be retried.
fn store_to_release(found: Result<ClaimStore, Error>) -> Result<Option<ClaimStore>, Error> {
    match found {
        Ok(class) => Ok(Some(class)),
        Err(e @ (Error::Dependency { .. } | Error::Invariant { .. })) => {
            warn!("nothing to release: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn cleanup(ctx: &Context, claim: &ObjectBucketClaim) -> Result<Outcome, Error> {
    let ns = claim.require_namespace()?;
    let claim = &ctx
        .update_status(claim, |status| status.set_phase(Phase::Deleting, None))
        .await?;
    if let Some(class) = store_to_release(claim_store(ctx, claim).await)? {
        release(ctx, claim, &class).await?;
    }
    ctx.delete::<Secret>(&claim.name_any(), &ns).await?;
    ctx.delete::<ConfigMap>(&claim.name_any(), &ns).await?;
    Ok(Outcome::Done)
}

async fn release(ctx: &Context, claim: &ObjectBucketClaim, class: &ClaimStore) -> Result<(), Error> {
    if ctx.get_opt::<CephObjectStore>(&class.name, &class.namespace).await?.is_none() {
        return Ok(());
    }
    let Some(conn) = cluster::connect_for_cleanup(ctx, &class.namespace).await? else {
        return Ok(());
    };
    let admin = StoreContext::new(conn.info, &class.name);

    let bucket = claim.status.as_ref().and_then(|s| s.bucket_name.clone());
    if let (true, Some(bucket)) = (class.reclaim_delete, bucket.as_deref()) {
        info!("deleting bucket {} of claim {}", bucket, claim.key());
        ctx.object_admin.delete_bucket(&admin, bucket, true).await?;
    }

    let generated = claim.generated_owner();
    let holds_bucket = !class.reclaim_delete && claim.current_owner() == Some(generated.as_str());
    if claim.requested_owner() != Some(generated.as_str())
        && !holds_bucket
        && ctx.object_admin.get_user(&admin, &generated).await?.is_some()
    {
        info!("deleting generated user {}", generated);
        ctx.object_admin.delete_user(&admin, &generated, false).await?;
    }
    Ok(())
}

pub async fn reconcile(claim: Arc<ObjectBucketClaim>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        claim.as_ref(),
        async |c: &ObjectBucketClaim| apply(&ctx, c).await,
        async |c: &ObjectBucketClaim| cleanup(&ctx, c).await,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceph::ClusterInfo;
    use crate::object::admin::{MockObjectAdmin, QuotaInfo, UserInfo, UserKey};
    use crate::object::s3::MockS3Api;
    use crate::types::v1::bucket_claim::{BUCKET_OWNER_KEY, BucketClaimStatus, ClaimPhase, MAX_OBJECTS_KEY};
    use std::path::Path;
    use std::sync::Mutex;

    const ENDPOINT: &str = "http://rook-ceph-rgw-my-store.rook-ceph.svc:80";

    fn store() -> StoreContext {
        StoreContext::new(ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid"), "my-store")
    }

    fn user(uid: &str) -> UserInfo {
        UserInfo {
            user_id: uid.to_owned(),
            keys: vec![UserKey {
                user: uid.to_owned(),
                access_key: format!("{uid}-ak"),
                secret_key: format!("{uid}-sk"),
            }],
            ..Default::default()
        }
    }

    fn bound(mut claim: ObjectBucketClaim, owner: &str) -> ObjectBucketClaim {
        claim.status = Some(BucketClaimStatus {
            phase: Some(ClaimPhase::Bound),
            owner: Some(owner.to_owned()),
            bucket_name: Some("photos".to_owned()),
            ..Default::default()
        });
        claim
    }

    /// Admin mock whose only bucket is tracked in `owner`; every user in `users` exists.
    fn admin_with(owner: Arc<Mutex<Option<String>>>, users: &'static [&'static str]) -> MockObjectAdmin {
        let mut admin = MockObjectAdmin::new();
        admin.expect_get_user().returning(move |_, uid| {
            Ok(users.contains(&uid).then(|| user(uid)))
        });
        let current = owner.clone();
        admin.expect_get_bucket().returning(move |_, bucket| {
            let owner = current.lock().unwrap().clone();
            Ok(owner.map(|owner| BucketInfo {
                bucket: bucket.to_owned(),
                owner,
                bucket_quota: QuotaInfo::default(),
            }))
        });
        admin.expect_link_bucket().returning(|_, _, _| Ok(()));
        let current = owner.clone();
        admin.expect_chown_bucket().returning(move |_, _, uid| {
            *current.lock().unwrap() = Some(uid.to_owned());
            Ok(())
        });
        admin.expect_set_user_quota().never();
        admin.expect_modify_user().never();
        admin
    }

    #[test]
    fn test_resolve_owner() {
        let claim = crate::tests::create_test_claim("photos", Some("alice"));
        assert_eq!(resolve_owner(&claim), Owner::Named("alice".to_owned()));

        let claim = crate::tests::create_test_claim("photos", None);
        assert_eq!(resolve_owner(&claim), Owner::Generated("obc-default-photos".to_owned()));

        // cleared on a bound claim: keep the current owner
        let claim = bound(crate::tests::create_test_claim("photos", None), "alice");
        assert_eq!(resolve_owner(&claim), Owner::Named("alice".to_owned()));

        let claim = bound(crate::tests::create_test_claim("photos", None), "obc-default-photos");
        assert_eq!(resolve_owner(&claim), Owner::Generated("obc-default-photos".to_owned()));
    }

    #[test]
    fn test_owner_kept_outside_bound_phase() {
        for phase in [ClaimPhase::Failed, ClaimPhase::Pending] {
            let mut claim = bound(crate::tests::create_test_claim("photos", None), "alice");
            if let Some(status) = claim.status.as_mut() {
                status.phase = Some(phase);
            }
            assert_eq!(resolve_owner(&claim), Owner::Named("alice".to_owned()));
        }
    }

    #[test]
    fn test_only_missing_class_skips_release() {
        let missing = DependencySnafu {
            kind: "StorageClass",
            name: "gone",
            reason: "storage class not found",
        }
        .build();
        assert!(store_to_release(Err(missing)).unwrap().is_none());

        let no_store = InvariantSnafu { message: "no store" }.build();
        assert!(store_to_release(Err(no_store)).unwrap().is_none());

        let api = Error::Fatal {
            message: "api server unavailable".to_owned(),
        };
        assert!(store_to_release(Err(api)).is_err());
    }

    #[tokio::test]
    async fn test_missing_owner_stays_pending() {
        let mut admin = MockObjectAdmin::new();
        admin.expect_get_user().times(1).returning(|_, _| Ok(None));
        admin.expect_get_bucket().never();
        admin.expect_create_user().never();
        admin.expect_set_user_quota().never();
        admin.expect_set_bucket_quota().never();
        let mut s3 = MockS3Api::new();
        s3.expect_create_bucket().never();

        let claim = crate::tests::create_test_claim("photos", Some("ghost"));
        let state = sync_bucket(&admin, &s3, &store(), ENDPOINT, &claim, "photos")
            .await
            .unwrap();
        assert_eq!(state, ClaimState::OwnerMissing("ghost".to_owned()));
    }

    #[tokio::test]
    async fn test_named_owner_gets_bucket_quota_only() {
        let owner = Arc::new(Mutex::new(None));
        let mut admin = admin_with(owner.clone(), &["alice"]);
        admin.expect_create_user().never();
        admin
            .expect_set_bucket_quota()
            .times(1)
            .withf(|_, bucket, quota| bucket == "photos" && quota.max_objects == Some(10))
            .returning(|_, _, _| Ok(()));
        let mut s3 = MockS3Api::new();
        let created = owner.clone();
        s3.expect_create_bucket()
            .times(1)
            .withf(|_, creds, _| creds.access_key == "alice-ak")
            .returning(move |_, _, _| {
                *created.lock().unwrap() = Some("alice".to_owned());
                Ok(())
            });

        let mut claim = crate::tests::create_test_claim("photos", Some("alice"));
        claim
            .spec
            .additional_config
            .insert(MAX_OBJECTS_KEY.to_owned(), "10".to_owned());
        let state = sync_bucket(&admin, &s3, &store(), ENDPOINT, &claim, "photos")
            .await
            .unwrap();
        let ClaimState::Bound { owner, creds, .. } = state else {
            panic!("claim should bind");
        };
        assert_eq!(owner, "alice");
        assert_eq!(creds.secret_key, "alice-sk");
    }

    #[tokio::test]
    async fn test_generated_owner_is_created() {
        let owner = Arc::new(Mutex::new(Some("obc-default-photos".to_owned())));
        let mut admin = admin_with(owner, &[]);
        admin
            .expect_create_user()
            .times(1)
            .withf(|_, config| config.uid == "obc-default-photos")
            .returning(|_, config| Ok(user(&config.uid)));
        admin.expect_set_bucket_quota().never();
        let mut s3 = MockS3Api::new();
        s3.expect_create_bucket().never();

        let claim = crate::tests::create_test_claim("photos", None);
        let state = sync_bucket(&admin, &s3, &store(), ENDPOINT, &claim, "photos")
            .await
            .unwrap();
        assert!(matches!(state, ClaimState::Bound { owner, .. } if owner == "obc-default-photos"));
    }

    #[tokio::test]
    async fn test_retarget_back_and_forth() {
        let owner = Arc::new(Mutex::new(Some("alice".to_owned())));
        let mut admin = admin_with(owner.clone(), &["alice", "bob"]);
        admin.expect_set_bucket_quota().never();
        let s3 = MockS3Api::new();

        let mut claim = crate::tests::create_test_claim("photos", Some("alice"));
        for target in ["bob", "alice"] {
            claim
                .spec
                .additional_config
                .insert(BUCKET_OWNER_KEY.to_owned(), target.to_owned());
            sync_bucket(&admin, &s3, &store(), ENDPOINT, &claim, "photos")
                .await
                .unwrap();
            assert_eq!(owner.lock().unwrap().as_deref(), Some(target));
        }

        // unchanged owner: no transfer
        let before = owner.lock().unwrap().clone();
        sync_bucket(&admin, &s3, &store(), ENDPOINT, &claim, "photos")
            .await
            .unwrap();
        assert_eq!(*owner.lock().unwrap(), before);
    }

    #[test]
    fn test_bucket_config() {
        let store = crate::tests::create_test_object_store("my-store");
        let config = bucket_config(&store, "us-east-1", "photos").unwrap();
        assert_eq!(config[BUCKET_HOST], "rook-ceph-rgw-my-store.rook-ceph.svc");
        assert_eq!(config[BUCKET_PORT], "80");
        assert_eq!(config[BUCKET_NAME], "photos");
        assert_eq!(config[BUCKET_REGION], "us-east-1");
    }
}
