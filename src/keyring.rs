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

//! Cluster identity, cephx keys and the config files the operator's own CLI calls use.

use crate::ceph::{ClusterInfo, WriteConfigSnafu};
use crate::types::error::{Error, InternalSnafu};
use crate::types::v1::cluster::CephCluster;
use crate::types::v1::{ResourceIdentity, child_meta, daemon_labels};
use crate::ceph;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1 as corev1;
use ring::rand::{SecureRandom, SystemRandom};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const MON_SECRET: &str = "rook-ceph-mon";
pub const CLUSTER_NAME_KEY: &str = "cluster-name";
pub const FSID_KEY: &str = "fsid";
pub const MON_SECRET_KEY: &str = "mon-secret";
pub const ADMIN_SECRET_KEY: &str = "admin-secret";
pub const KEYRING_KEY: &str = "keyring";

pub const ADMIN_ENTITY: &str = "client.admin";

/// A fresh cephx secret: little endian type, creation time and length, then 16 random bytes.
pub fn generate_key() -> Result<String, Error> {
    let mut secret = [0u8; 16];
    SystemRandom::new().fill(&mut secret).map_err(|_| {
        InternalSnafu {
            msg: "system random source unavailable",
        }
        .build()
    })?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let mut raw = Vec::with_capacity(28);
    raw.extend_from_slice(&1u16.to_le_bytes());
    raw.extend_from_slice(&(now.as_secs() as u32).to_le_bytes());
    raw.extend_from_slice(&now.subsec_nanos().to_le_bytes());
    raw.extend_from_slice(&(secret.len() as u16).to_le_bytes());
    raw.extend_from_slice(&secret);
    Ok(STANDARD.encode(raw))
}

/// Keyring file section for `entity`.
pub fn keyring(entity: &str, key: &str, caps: &[(&str, &str)]) -> String {
    let mut out = format!("[{entity}]\n\tkey = {key}\n");
    for (service, cap) in caps {
        out.push_str(&format!("\tcaps {service} = \"{cap}\"\n"));
    }
    out
}

pub fn admin_keyring(admin_secret: &str) -> String {
    keyring(
        ADMIN_ENTITY,
        admin_secret,
        &[
            ("mds", "allow *"),
            ("mon", "allow *"),
            ("osd", "allow *"),
            ("mgr", "allow *"),
        ],
    )
}

/// Contents of `rook-ceph-mon`, created once per cluster and never rotated implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSecrets {
    pub cluster_name: String,
    pub fsid: String,
    pub mon_secret: String,
    pub admin_secret: String,
}

fn secret_value(secret: &corev1::Secret, key: &str) -> Option<String> {
    if let Some(v) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(v.0.clone()).ok();
    }
    secret.string_data.as_ref().and_then(|d| d.get(key)).cloned()
}

/// String value of `key` in a Secret's `data` or `stringData`.
pub fn secret_string(secret: &corev1::Secret, key: &str) -> Option<String> {
    secret_value(secret, key).filter(|v| !v.is_empty())
}

impl ClusterSecrets {
    pub fn generate(cluster_name: &str) -> Result<Self, Error> {
        Ok(Self {
            cluster_name: cluster_name.to_owned(),
            fsid: uuid::Uuid::new_v4().to_string(),
            mon_secret: generate_key()?,
            admin_secret: generate_key()?,
        })
    }

    /// Reads the secret; the admin key may be absent on external clusters that
    /// hand over a restricted identity.
    pub fn from_secret(secret: &corev1::Secret) -> Result<Self, Error> {
        let get = |key: &str| {
            secret_string(secret, key).ok_or_else(|| {
                InternalSnafu {
                    msg: format!("secret {MON_SECRET} has no {key}"),
                }
                .build()
            })
        };
        Ok(Self {
            cluster_name: secret_string(secret, CLUSTER_NAME_KEY).unwrap_or_default(),
            fsid: get(FSID_KEY)?,
            mon_secret: secret_string(secret, MON_SECRET_KEY).unwrap_or_default(),
            admin_secret: get(ADMIN_SECRET_KEY)?,
        })
    }

    pub fn to_secret(&self, cluster: &CephCluster) -> Result<corev1::Secret, Error> {
        let ns = cluster.require_namespace()?;
        let data = [
            (CLUSTER_NAME_KEY, &self.cluster_name),
            (FSID_KEY, &self.fsid),
            (MON_SECRET_KEY, &self.mon_secret),
            (ADMIN_SECRET_KEY, &self.admin_secret),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), ByteString(v.as_bytes().to_vec())))
        .collect();
        Ok(corev1::Secret {
            metadata: child_meta(cluster, MON_SECRET, daemon_labels("rook-ceph-mon", &ns)),
            data: Some(data),
            type_: Some("kubernetes.io/rook".to_owned()),
            ..Default::default()
        })
    }

    /// Keyring mounted by mon daemons: the mon key plus the admin identity.
    pub fn mons_keyring(&self) -> String {
        let mut out = keyring("mon.", &self.mon_secret, &[("mon", "allow *")]);
        out.push_str(&admin_keyring(&self.admin_secret));
        out
    }
}

/// A Secret holding one daemon keyring under `keyring`.
pub fn new_keyring_secret<K: ResourceIdentity>(
    owner: &K,
    name: &str,
    app: &str,
    cluster_namespace: &str,
    keyring_text: String,
) -> corev1::Secret {
    corev1::Secret {
        metadata: child_meta(owner, name, daemon_labels(app, cluster_namespace)),
        string_data: Some(BTreeMap::from([(KEYRING_KEY.to_owned(), keyring_text)])),
        type_: Some("kubernetes.io/rook".to_owned()),
        ..Default::default()
    }
}

/// Renders `ceph.conf` and the admin keyring where [`ClusterInfo`] points the CLI.
pub async fn write_config_files(
    info: &ClusterInfo,
    ceph_conf: &str,
    admin_secret: &str,
) -> Result<(), ceph::Error> {
    tokio::fs::create_dir_all(&info.dir)
        .await
        .context(WriteConfigSnafu {
            path: info.dir.display().to_string(),
        })?;

    let keyring_path = info.keyring_path();
    let conf = format!(
        "{ceph_conf}\n[client.admin]\nkeyring = {}\n",
        keyring_path.display()
    );
    for (path, contents) in [
        (info.conf_path(), conf),
        (keyring_path.clone(), admin_keyring(admin_secret)),
    ] {
        tokio::fs::write(&path, contents)
            .await
            .context(WriteConfigSnafu {
                path: path.display().to_string(),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_layout() {
        let key = generate_key().unwrap();
        let raw = STANDARD.decode(&key).unwrap();
        assert_eq!(raw.len(), 28);
        assert_eq!(u16::from_le_bytes([raw[0], raw[1]]), 1);
        assert_eq!(u16::from_le_bytes([raw[10], raw[11]]), 16);
        assert_ne!(generate_key().unwrap(), key);
    }

    #[test]
    fn test_keyring_format() {
        let text = keyring("client.rgw.a", "KEY", &[("mon", "allow rw")]);
        assert_eq!(text, "[client.rgw.a]\n\tkey = KEY\n\tcaps mon = \"allow rw\"\n");
    }

    #[test]
    fn test_secret_round_trip_keeps_identity() {
        let cluster = crate::tests::create_test_cluster(3);
        let secrets = ClusterSecrets::generate("rook-ceph").unwrap();
        let secret = secrets.to_secret(&cluster).unwrap();
        assert_eq!(ClusterSecrets::from_secret(&secret).unwrap(), secrets);
    }

    #[test]
    fn test_missing_fsid_is_error() {
        let secret = corev1::Secret {
            string_data: Some([(ADMIN_SECRET_KEY.to_owned(), "x".to_owned())].into()),
            ..Default::default()
        };
        assert!(ClusterSecrets::from_secret(&secret).is_err());
    }

    #[tokio::test]
    async fn test_write_config_files() {
        let dir = std::env::temp_dir().join(format!("rook-test-{}", uuid::Uuid::new_v4()));
        let info = ClusterInfo::new(&dir, "rook-ceph", "fsid");
        write_config_files(&info, "[global]\nfsid = fsid\n", "ADMINKEY")
            .await
            .unwrap();
        let keyring = tokio::fs::read_to_string(info.keyring_path()).await.unwrap();
        assert!(keyring.contains("key = ADMINKEY"));
        let conf = tokio::fs::read_to_string(info.conf_path()).await.unwrap();
        assert!(conf.starts_with("[global]"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
