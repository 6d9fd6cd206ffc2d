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


use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

use crate::types::v1::block_pool::{BlockPoolSpec, CephBlockPool};
use crate::types::v1::bucket_claim::{BUCKET_OWNER_KEY, BucketClaimSpec, ObjectBucketClaim};
use crate::types::v1::cluster::{CephCluster, CephVersionSpec, ClusterSpec, MonSpec};
use crate::types::v1::filesystem::{CephFilesystem, FilesystemSpec, NamedPoolSpec};
use crate::types::v1::nfs::{CephNFS, NfsServerSpec, NfsSpec};
use crate::types::v1::notification::{CephBucketNotification, NotificationSpec};
use crate::types::v1::object_store::{CephObjectStore, ObjectStoreSpec};
use crate::types::v1::object_user::{CephObjectStoreUser, ObjectUserSpec};
use crate::types::v1::topic::{CephBucketTopic, HttpEndpointSpec, TopicEndpointSpec, TopicSpec};

const NAMESPACE: &str = "rook-ceph";

fn meta(name: &str, namespace: &str) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some("test-uid-123".to_string()),
        ..Default::default()
    }
}

// Helper functions shared by submodule tests via crate::tests
pub fn create_test_cluster(mon_count: u32) -> CephCluster {
    CephCluster {
        metadata: meta("rook-ceph", NAMESPACE),
        spec: ClusterSpec {
            ceph_version: CephVersionSpec {
                image: "quay.io/ceph/ceph:v18.2.4".to_string(),
                allow_unsupported: false,
            },
            mon: MonSpec {
                count: mon_count,
                allow_multiple_per_node: false,
            },
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_object_store(name: &str) -> CephObjectStore {
    CephObjectStore {
        metadata: meta(name, NAMESPACE),
        spec: ObjectStoreSpec::default(),
        status: None,
    }
}

pub fn create_test_user(name: &str, store: &str) -> CephObjectStoreUser {
    CephObjectStoreUser {
        metadata: meta(name, NAMESPACE),
        spec: ObjectUserSpec {
            store: store.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_claim(name: &str, owner: Option<&str>) -> ObjectBucketClaim {
    let mut additional_config = BTreeMap::new();
    if let Some(owner) = owner {
        additional_config.insert(BUCKET_OWNER_KEY.to_string(), owner.to_string());
    }
    ObjectBucketClaim {
        metadata: meta(name, "default"),
        spec: BucketClaimSpec {
            storage_class_name: "rook-ceph-bucket".to_string(),
            bucket_name: Some(name.to_string()),
            generate_bucket_name: None,
            additional_config,
        },
        status: None,
    }
}

pub fn create_test_topic(name: &str, store: &str) -> CephBucketTopic {
    CephBucketTopic {
        metadata: meta(name, NAMESPACE),
        spec: TopicSpec {
            object_store_name: store.to_string(),
            endpoint: TopicEndpointSpec {
                http: Some(HttpEndpointSpec {
                    uri: "http://sink.apps.svc:8080".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_notification(name: &str, topic: &str) -> CephBucketNotification {
    CephBucketNotification {
        metadata: meta(name, "default"),
        spec: NotificationSpec {
            topic: topic.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_filesystem(name: &str) -> CephFilesystem {
    CephFilesystem {
        metadata: meta(name, NAMESPACE),
        spec: FilesystemSpec {
            data_pools: vec![NamedPoolSpec::default()],
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_nfs(name: &str, active: u32) -> CephNFS {
    CephNFS {
        metadata: meta(name, NAMESPACE),
        spec: NfsSpec {
            server: NfsServerSpec {
                active,
                placement: None,
            },
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_block_pool(name: &str) -> CephBlockPool {
    CephBlockPool {
        metadata: meta(name, NAMESPACE),
        spec: BlockPoolSpec::default(),
        status: None,
    }
}

pub fn create_test_node(name: &str) -> corev1::Node {
    corev1::Node {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                [("kubernetes.io/hostname".to_string(), name.to_string())].into(),
            ),
            ..Default::default()
        },
        status: Some(corev1::NodeStatus {
            conditions: Some(vec![corev1::NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
