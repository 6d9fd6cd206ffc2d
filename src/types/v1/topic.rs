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

use crate::types::v1::status::{Condition, Phase, impl_conditioned};
use k8s_openapi::schemars::JsonSchema;
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephBucketTopic",
    namespaced,
    status = "TopicStatus",
    plural = "cephbuckettopics",
    singular = "cephbuckettopic",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"ARN", "type":"string", "jsonPath":".status.arn"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    pub object_store_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opaque_data: Option<String>,

    #[serde(default)]
    pub persistent: bool,

    #[x_kube(validation = Rule::new("[has(self.http), has(self.amqp), has(self.kafka)].filter(x, x).size() == 1").message("exactly one of http, amqp or kafka must be set"))]
    pub endpoint: TopicEndpointSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TopicEndpointSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpEndpointSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amqp: Option<AmqpEndpointSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka: Option<KafkaEndpointSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpEndpointSpec {
    pub uri: String,

    #[serde(default, rename = "disableVerifySSL")]
    pub disable_verify_ssl: bool,

    #[serde(default)]
    pub send_cloud_events: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AmqpEndpointSpec {
    pub uri: String,

    pub exchange: String,

    #[serde(default, rename = "disableVerifySSL")]
    pub disable_verify_ssl: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_level: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaEndpointSpec {
    pub uri: String,

    #[serde(default, rename = "useSSL")]
    pub use_ssl: bool,

    #[serde(default, rename = "disableVerifySSL")]
    pub disable_verify_ssl: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, rename = "ARN", skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    /// Digest of the gateway endpoint and attributes the ARN was created with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_hash: Option<String>,
}

impl_conditioned!(TopicStatus);

impl CephBucketTopic {
    pub fn store_namespace(&self) -> String {
        self.spec
            .object_store_namespace
            .clone()
            .or_else(|| ResourceExt::namespace(self))
            .unwrap_or_default()
    }

    pub fn arn(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.arn.as_deref())
            .filter(|arn| !arn.is_empty())
    }

    /// The recorded ARN was created on `endpoint` with the attributes behind `digest`.
    pub fn is_provisioned(&self, digest: &str) -> bool {
        self.arn().is_some()
            && self
                .status
                .as_ref()
                .and_then(|s| s.attributes_hash.as_deref())
                == Some(digest)
    }

    /// SNS `CreateTopic` attributes for the configured push endpoint.
    pub fn attributes(&self) -> Result<BTreeMap<String, String>, String> {
        let mut attrs = BTreeMap::new();
        let bool_str = |b: bool| if b { "true" } else { "false" }.to_owned();

        if let Some(opaque) = &self.spec.opaque_data {
            attrs.insert("OpaqueData".to_owned(), opaque.clone());
        }
        attrs.insert("persistent".to_owned(), bool_str(self.spec.persistent));

        let endpoint = &self.spec.endpoint;
        match (&endpoint.http, &endpoint.amqp, &endpoint.kafka) {
            (Some(http), None, None) => {
                attrs.insert("push-endpoint".to_owned(), http.uri.clone());
                attrs.insert("verify-ssl".to_owned(), bool_str(!http.disable_verify_ssl));
                attrs.insert("cloudevents".to_owned(), bool_str(http.send_cloud_events));
            }
            (None, Some(amqp), None) => {
                attrs.insert("push-endpoint".to_owned(), amqp.uri.clone());
                attrs.insert("verify-ssl".to_owned(), bool_str(!amqp.disable_verify_ssl));
                attrs.insert("amqp-exchange".to_owned(), amqp.exchange.clone());
                if let Some(level) = &amqp.ack_level {
                    attrs.insert("amqp-ack-level".to_owned(), level.clone());
                }
            }
            (None, None, Some(kafka)) => {
                attrs.insert("push-endpoint".to_owned(), kafka.uri.clone());
                attrs.insert("verify-ssl".to_owned(), bool_str(!kafka.disable_verify_ssl));
                attrs.insert("use-ssl".to_owned(), bool_str(kafka.use_ssl));
                if let Some(level) = &kafka.ack_level {
                    attrs.insert("kafka-ack-level".to_owned(), level.clone());
                }
                if let Some(mechanism) = &kafka.mechanism {
                    attrs.insert("mechanism".to_owned(), mechanism.clone());
                }
            }
            _ => return Err("exactly one of http, amqp or kafka must be set".to_owned()),
        }
        Ok(attrs)
    }
}

pub fn attributes_digest(endpoint: &str, attributes: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.as_bytes());
    for (key, value) in attributes {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Accepts `arn:aws:sns:<zonegroup>::<topic>` naming `topic`.
pub fn validate_arn(arn: &str, topic: &str) -> Result<(), String> {
    if arn.is_empty() {
        return Err("topic ARN is empty".to_owned());
    }
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    match parts.as_slice() {
        ["arn", _, "sns", _, _, resource] if *resource == topic => Ok(()),
        ["arn", _, "sns", _, _, resource] => Err(format!(
            "topic ARN {arn:?} names {resource:?}, expected {topic:?}"
        )),
        ["arn", _, service, ..] => Err(format!(
            "topic ARN {arn:?} has service {service:?}, expected \"sns\""
        )),
        _ => Err(format!("malformed topic ARN {arn:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_attributes() {
        let topic = crate::tests::create_test_topic("t1", "my-store");
        let attrs = topic.attributes().unwrap();
        assert_eq!(
            attrs.get("push-endpoint").map(String::as_str),
            Some("http://sink.apps.svc:8080")
        );
        assert_eq!(attrs.get("verify-ssl").map(String::as_str), Some("true"));
        assert_eq!(attrs.get("persistent").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_two_endpoints_rejected() {
        let mut topic = crate::tests::create_test_topic("t1", "my-store");
        topic.spec.endpoint.kafka = Some(KafkaEndpointSpec {
            uri: "kafka://broker:9092".to_owned(),
            ..Default::default()
        });
        assert!(topic.attributes().is_err());
    }

    #[test]
    fn test_validate_arn() {
        assert!(validate_arn("arn:aws:sns:my-store::t1", "t1").is_ok());
        assert!(validate_arn("", "t1").is_err());
        assert!(validate_arn("arn:aws:s3:my-store::t1", "t1").is_err());
        assert!(validate_arn("arn:aws:sns:my-store::other", "t1").is_err());
        assert!(validate_arn("not-an-arn", "t1").is_err());
    }

    #[test]
    fn test_provisioned_until_attributes_change() {
        let mut topic = crate::tests::create_test_topic("t1", "my-store");
        let endpoint = "http://rook-ceph-rgw-my-store.rook-ceph.svc:80";
        let digest = attributes_digest(endpoint, &topic.attributes().unwrap());
        assert!(!topic.is_provisioned(&digest));

        topic.status = Some(TopicStatus {
            arn: Some("arn:aws:sns:my-store::t1".to_owned()),
            attributes_hash: Some(digest.clone()),
            ..Default::default()
        });
        assert!(topic.is_provisioned(&digest));
        assert_eq!(attributes_digest(endpoint, &topic.attributes().unwrap()), digest);

        if let Some(http) = topic.spec.endpoint.http.as_mut() {
            http.uri = "http://other.apps.svc:8080".to_owned();
        }
        let changed = attributes_digest(endpoint, &topic.attributes().unwrap());
        assert!(!topic.is_provisioned(&changed));
    }
}
