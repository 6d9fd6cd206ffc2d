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

use crate::ceph::{self, CephExecutor, ClusterInfo, Tool};
use crate::object::{AdminSnafu, Error, ParseSnafu};
use crate::types::v1::object_store::RGW_APP;
use crate::utils::lock::EndpointLimits;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::{debug, info};

/// A gateway store as addressed by `radosgw-admin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreContext {
    pub cluster: ClusterInfo,
    pub name: String,
}

impl StoreContext {
    pub fn new(cluster: ClusterInfo, name: &str) -> Self {
        Self {
            cluster,
            name: name.to_owned(),
        }
    }

    /// Service host of the store's gateway; admin and S3 calls share its limit.
    pub fn gateway_host(&self) -> String {
        format!("{RGW_APP}-{}.{}.svc", self.name, self.cluster.namespace)
    }

    /// Realm, zonegroup and zone all carry the store name.
    fn multisite_args(&self) -> Vec<String> {
        vec![
            format!("--rgw-realm={}", self.name),
            format!("--rgw-zonegroup={}", self.name),
            format!("--rgw-zone={}", self.name),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserConfig {
    pub uid: String,
    pub display_name: String,
    pub email: Option<String>,
    pub max_buckets: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quota {
    pub max_objects: Option<i64>,
    pub max_size: Option<i64>,
}

impl Quota {
    pub fn is_empty(&self) -> bool {
        self.max_objects.is_none() && self.max_size.is_none()
    }
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub max_buckets: i64,
    #[serde(default)]
    pub keys: Vec<UserKey>,
    #[serde(default)]
    pub caps: Vec<UserCap>,
    #[serde(default)]
    pub user_quota: QuotaInfo,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserKey {
    #[serde(default)]
    pub user: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserCap {
    #[serde(rename = "type")]
    pub type_: String,
    pub perm: String,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct QuotaInfo {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_size: i64,
    #[serde(default)]
    pub max_objects: i64,
}

impl QuotaInfo {
    /// Quota as requested through a CR, where -1 means unlimited.
    pub fn as_quota(&self) -> Quota {
        if !self.enabled {
            return Quota::default();
        }
        Quota {
            max_objects: (self.max_objects >= 0).then_some(self.max_objects),
            max_size: (self.max_size >= 0).then_some(self.max_size),
        }
    }
}

impl UserInfo {
    /// Caps rendered the way `radosgw-admin caps add` accepts them, sorted by type.
    pub fn caps_string(&self) -> String {
        let mut caps: Vec<_> = self
            .caps
            .iter()
            .map(|c| format!("{}={}", c.type_, c.perm.replace(' ', "")))
            .collect();
        caps.sort();
        caps.join(";")
    }
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketInfo {
    pub bucket: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub bucket_quota: QuotaInfo,
}

/// Administrative operations against one gateway store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectAdmin: Send + Sync {
    async fn get_user(&self, store: &StoreContext, uid: &str) -> Result<Option<UserInfo>, Error>;

    async fn create_user(&self, store: &StoreContext, user: &UserConfig) -> Result<UserInfo, Error>;

    async fn modify_user(&self, store: &StoreContext, user: &UserConfig) -> Result<UserInfo, Error>;

    /// Replaces the user's caps: `remove` first, then `add`. Both use `type=perm;...` form.
    async fn set_caps(
        &self,
        store: &StoreContext,
        uid: &str,
        add: &str,
        remove: &str,
    ) -> Result<(), Error>;

    async fn set_user_quota(&self, store: &StoreContext, uid: &str, quota: &Quota) -> Result<(), Error>;

    async fn delete_user(&self, store: &StoreContext, uid: &str, purge_data: bool) -> Result<(), Error>;

    async fn get_bucket(&self, store: &StoreContext, bucket: &str) -> Result<Option<BucketInfo>, Error>;

    /// Names of every bucket in the store, whoever owns it.
    async fn list_buckets(&self, store: &StoreContext) -> Result<Vec<String>, Error>;

    async fn link_bucket(&self, store: &StoreContext, bucket: &str, uid: &str) -> Result<(), Error>;

    async fn chown_bucket(&self, store: &StoreContext, bucket: &str, uid: &str) -> Result<(), Error>;

    async fn set_bucket_quota(&self, store: &StoreContext, bucket: &str, quota: &Quota) -> Result<(), Error>;

    async fn delete_bucket(&self, store: &StoreContext, bucket: &str, purge_objects: bool) -> Result<(), Error>;

    /// Creates realm, zonegroup and zone named after the store and commits the period
    /// when anything was created.
    async fn ensure_zone(&self, store: &StoreContext, endpoint: &str) -> Result<(), Error>;

    async fn delete_zone(&self, store: &StoreContext) -> Result<(), Error>;
}

/// [`ObjectAdmin`] over the `radosgw-admin` binary.
pub struct RadosGwAdmin {
    exec: Arc<dyn CephExecutor>,
    limits: EndpointLimits,
}

impl RadosGwAdmin {
    pub fn new(exec: Arc<dyn CephExecutor>, limits: EndpointLimits) -> Self {
        Self { exec, limits }
    }

    async fn run(&self, store: &StoreContext, args: &[&str]) -> Result<Vec<u8>, ceph::Error> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        full.extend(store.multisite_args());
        let _permit = self.limits.acquire(&store.gateway_host()).await;
        self.exec.run(&store.cluster, Tool::RadosgwAdmin, full).await
    }

    async fn run_json<T: DeserializeOwned>(&self, store: &StoreContext, args: &[&str]) -> Result<T, Error> {
        let out = self.run(store, args).await.context(AdminSnafu)?;
        serde_json::from_slice(&out).context(ParseSnafu {
            what: format!("radosgw-admin {}", args.join(" ")),
        })
    }

    async fn run_unit(&self, store: &StoreContext, args: &[&str]) -> Result<(), Error> {
        self.run(store, args).await.map(|_| ()).context(AdminSnafu)
    }

    /// Missing entities surface as ENOENT.
    async fn run_optional<T: DeserializeOwned>(
        &self,
        store: &StoreContext,
        args: &[&str],
    ) -> Result<Option<T>, Error> {
        match self.run(store, args).await {
            Ok(out) => serde_json::from_slice(&out).map(Some).context(ParseSnafu {
                what: format!("radosgw-admin {}", args.join(" ")),
            }),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e).context(AdminSnafu),
        }
    }

    async fn exists(&self, store: &StoreContext, args: &[&str]) -> Result<bool, Error> {
        Ok(self.run_optional::<serde_json::Value>(store, args).await?.is_some())
    }

    async fn set_quota(&self, store: &StoreContext, target: &[&str], quota: &Quota) -> Result<(), Error> {
        let mut set = vec!["quota", "set"];
        set.extend_from_slice(target);
        let max_objects = format!("--max-objects={}", quota.max_objects.unwrap_or(-1));
        let max_size = format!("--max-size={}", quota.max_size.unwrap_or(-1));
        set.push(&max_objects);
        set.push(&max_size);
        self.run_unit(store, &set).await?;

        let mut toggle = vec!["quota", if quota.is_empty() { "disable" } else { "enable" }];
        toggle.extend_from_slice(target);
        self.run_unit(store, &toggle).await
    }
}

#[async_trait]
impl ObjectAdmin for RadosGwAdmin {
    async fn get_user(&self, store: &StoreContext, uid: &str) -> Result<Option<UserInfo>, Error> {
        let uid_arg = format!("--uid={uid}");
        self.run_optional(store, &["user", "info", &uid_arg]).await
    }

    async fn create_user(&self, store: &StoreContext, user: &UserConfig) -> Result<UserInfo, Error> {
        info!(store = %store.name, uid = %user.uid, "creating object user");
        let args = user_args(user);
        let mut full = vec!["user", "create"];
        full.extend(args.iter().map(String::as_str));
        self.run_json(store, &full).await
    }

    async fn modify_user(&self, store: &StoreContext, user: &UserConfig) -> Result<UserInfo, Error> {
        debug!(store = %store.name, uid = %user.uid, "modifying object user");
        let args = user_args(user);
        let mut full = vec!["user", "modify"];
        full.extend(args.iter().map(String::as_str));
        self.run_json(store, &full).await
    }

    async fn set_caps(&self, store: &StoreContext, uid: &str, add: &str, remove: &str) -> Result<(), Error> {
        let uid_arg = format!("--uid={uid}");
        if !remove.is_empty() {
            let caps = format!("--caps={remove}");
            self.run_unit(store, &["caps", "rm", &uid_arg, &caps]).await?;
        }
        if !add.is_empty() {
            let caps = format!("--caps={add}");
            self.run_unit(store, &["caps", "add", &uid_arg, &caps]).await?;
        }
        Ok(())
    }

    async fn set_user_quota(&self, store: &StoreContext, uid: &str, quota: &Quota) -> Result<(), Error> {
        let uid_arg = format!("--uid={uid}");
        self.set_quota(store, &["--quota-scope=user", &uid_arg], quota).await
    }

    async fn delete_user(&self, store: &StoreContext, uid: &str, purge_data: bool) -> Result<(), Error> {
        info!(store = %store.name, uid, "deleting object user");
        let uid_arg = format!("--uid={uid}");
        let mut args = vec!["user", "rm", uid_arg.as_str()];
        if purge_data {
            args.push("--purge-data");
        }
        match self.run(store, &args).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()).context(AdminSnafu),
        }
    }

    async fn get_bucket(&self, store: &StoreContext, bucket: &str) -> Result<Option<BucketInfo>, Error> {
        let bucket_arg = format!("--bucket={bucket}");
        self.run_optional(store, &["bucket", "stats", &bucket_arg]).await
    }

    async fn list_buckets(&self, store: &StoreContext) -> Result<Vec<String>, Error> {
        Ok(self
            .run_optional(store, &["bucket", "list"])
            .await?
            .unwrap_or_default())
    }

    async fn link_bucket(&self, store: &StoreContext, bucket: &str, uid: &str) -> Result<(), Error> {
        let bucket_arg = format!("--bucket={bucket}");
        let uid_arg = format!("--uid={uid}");
        self.run_unit(store, &["bucket", "link", &bucket_arg, &uid_arg]).await
    }

    async fn chown_bucket(&self, store: &StoreContext, bucket: &str, uid: &str) -> Result<(), Error> {
        let bucket_arg = format!("--bucket={bucket}");
        let uid_arg = format!("--uid={uid}");
        self.run_unit(store, &["bucket", "chown", &bucket_arg, &uid_arg]).await
    }

    async fn set_bucket_quota(&self, store: &StoreContext, bucket: &str, quota: &Quota) -> Result<(), Error> {
        let bucket_arg = format!("--bucket={bucket}");
        self.set_quota(store, &["--quota-scope=bucket", &bucket_arg], quota).await
    }

    async fn delete_bucket(&self, store: &StoreContext, bucket: &str, purge_objects: bool) -> Result<(), Error> {
        info!(store = %store.name, bucket, "deleting bucket");
        let bucket_arg = format!("--bucket={bucket}");
        let mut args = vec!["bucket", "rm", bucket_arg.as_str()];
        if purge_objects {
            args.push("--purge-objects");
        }
        match self.run(store, &args).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()).context(AdminSnafu),
        }
    }

    async fn ensure_zone(&self, store: &StoreContext, endpoint: &str) -> Result<(), Error> {
        let endpoints = format!("--endpoints={endpoint}");
        let mut created = false;

        if !self.exists(store, &["realm", "get"]).await? {
            self.run_unit(store, &["realm", "create"]).await?;
            created = true;
        }
        if !self.exists(store, &["zonegroup", "get"]).await? {
            self.run_unit(store, &["zonegroup", "create", "--master", &endpoints]).await?;
            created = true;
        }
        if !self.exists(store, &["zone", "get"]).await? {
            self.run_unit(store, &["zone", "create", "--master", &endpoints]).await?;
            created = true;
        }

        if created {
            info!(store = %store.name, "committing period for new realm/zonegroup/zone");
            self.run_unit(store, &["period", "update", "--commit"]).await?;
        }
        Ok(())
    }

    async fn delete_zone(&self, store: &StoreContext) -> Result<(), Error> {
        for kind in ["zone", "zonegroup", "realm"] {
            match self.run(store, &[kind, "delete"]).await {
                Err(e) if e.is_not_found() => {}
                other => {
                    other.context(AdminSnafu)?;
                }
            }
        }
        Ok(())
    }
}

fn user_args(user: &UserConfig) -> Vec<String> {
    let mut args = vec![
        format!("--uid={}", user.uid),
        format!("--display-name={}", user.display_name),
    ];
    if let Some(email) = user.email.as_deref().filter(|e| !e.is_empty()) {
        args.push(format!("--email={email}"));
    }
    if let Some(max) = user.max_buckets {
        args.push(format!("--max-buckets={max}"));
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceph::command::MockCephExecutor;
    use std::path::Path;
    use std::sync::Mutex;

    fn store() -> StoreContext {
        StoreContext::new(
            ClusterInfo::new(Path::new("/tmp"), "rook-ceph", "fsid"),
            "my-store",
        )
    }

    fn admin(exec: MockCephExecutor) -> RadosGwAdmin {
        RadosGwAdmin::new(Arc::new(exec), EndpointLimits::new(4))
    }

    fn enoent() -> ceph::Error {
        ceph::Error::CommandFailed {
            tool: "radosgw-admin".to_owned(),
            args: String::new(),
            code: ceph::ENOENT,
            stderr: "could not fetch user info: no user info saved".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let mut exec = MockCephExecutor::new();
        exec.expect_run()
            .withf(|_, tool, args| {
                *tool == Tool::RadosgwAdmin
                    && args.contains(&"--uid=ghost".to_owned())
                    && args.contains(&"--rgw-zone=my-store".to_owned())
            })
            .returning(|_, _, _| Err(enoent()));
        let admin = admin(exec);
        assert_eq!(admin.get_user(&store(), "ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_user_info_decodes() {
        let mut exec = MockCephExecutor::new();
        exec.expect_run().returning(|_, _, _| {
            Ok(br#"{"user_id":"alice","display_name":"Alice","email":"","max_buckets":1000,
                "keys":[{"user":"alice","access_key":"AK","secret_key":"SK"}],
                "caps":[{"type":"users","perm":"read"},{"type":"buckets","perm":"*"}],
                "user_quota":{"enabled":false,"max_size":-1,"max_objects":-1}}"#
                .to_vec())
        });
        let admin = admin(exec);
        let user = admin.get_user(&store(), "alice").await.unwrap().unwrap();
        assert_eq!(user.keys[0].access_key, "AK");
        assert_eq!(user.caps_string(), "buckets=*;users=read");
        assert!(user.user_quota.as_quota().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_zone_skips_commit_when_present() {
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = calls.clone();
        let mut exec = MockCephExecutor::new();
        exec.expect_run().returning(move |_, _, args| {
            seen.lock().unwrap().push(args[..2].join(" "));
            Ok(b"{}".to_vec())
        });
        let admin = admin(exec);
        admin.ensure_zone(&store(), "http://rgw:80").await.unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.as_slice(), ["realm get", "zonegroup get", "zone get"]);
    }

    #[tokio::test]
    async fn test_ensure_zone_creates_and_commits() {
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = calls.clone();
        let mut exec = MockCephExecutor::new();
        exec.expect_run().returning(move |_, _, args| {
            seen.lock().unwrap().push(args[..2].join(" "));
            if args[1] == "get" { Err(enoent()) } else { Ok(b"{}".to_vec()) }
        });
        let admin = admin(exec);
        admin.ensure_zone(&store(), "http://rgw:80").await.unwrap();
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"realm create".to_owned()));
        assert_eq!(calls.last().map(String::as_str), Some("period update"));
    }

    #[tokio::test]
    async fn test_bucket_quota_disable_when_empty() {
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = calls.clone();
        let mut exec = MockCephExecutor::new();
        exec.expect_run().returning(move |_, _, args| {
            seen.lock().unwrap().push(args.join(" "));
            Ok(Vec::new())
        });
        let admin = admin(exec);
        admin
            .set_bucket_quota(&store(), "b1", &Quota::default())
            .await
            .unwrap();
        let calls = calls.lock().unwrap();
        assert!(calls[0].starts_with("quota set --quota-scope=bucket --bucket=b1 --max-objects=-1"));
        assert!(calls[1].starts_with("quota disable --quota-scope=bucket --bucket=b1"));
    }

    #[tokio::test]
    async fn test_list_buckets_empty_store() {
        let mut exec = MockCephExecutor::new();
        exec.expect_run()
            .withf(|_, _, args| args[..2] == ["bucket".to_owned(), "list".to_owned()])
            .returning(|_, _, _| Err(enoent()));
        assert!(admin(exec).list_buckets(&store()).await.unwrap().is_empty());

        let mut exec = MockCephExecutor::new();
        exec.expect_run()
            .returning(|_, _, _| Ok(br#"["photos","logs"]"#.to_vec()));
        assert_eq!(admin(exec).list_buckets(&store()).await.unwrap(), ["photos", "logs"]);
    }

    #[tokio::test]
    async fn test_admin_calls_wait_for_gateway_slot() {
        let mut exec = MockCephExecutor::new();
        exec.expect_run().returning(|_, _, _| Ok(b"[]".to_vec()));
        let limits = EndpointLimits::new(1);
        let admin = RadosGwAdmin::new(Arc::new(exec), limits.clone());
        assert_eq!(store().gateway_host(), "rook-ceph-rgw-my-store.rook-ceph.svc");

        let held = limits.acquire(&store().gateway_host()).await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(30),
            admin.list_buckets(&store()),
        )
        .await;
        assert!(blocked.is_err());

        drop(held);
        assert!(admin.list_buckets(&store()).await.unwrap().is_empty());
    }
}
