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

use crate::object::{Error, ResponseSnafu};
use crate::utils::lock::{EndpointLimits, endpoint_key};
use async_trait::async_trait;
use aws_credential_types::Credentials as StaticCredentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    Event, FilterRule, FilterRuleName, NotificationConfiguration, NotificationConfigurationFilter, S3KeyFilter,
    TopicConfiguration,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Region used in request signatures; the gateway does not check it.
pub const SIGNING_REGION: &str = "us-east-1";

const PROVIDER_NAME: &str = "ceph-operator";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

/// One `TopicConfiguration` of a bucket notification configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRule {
    pub id: String,
    pub topic_arn: String,
    pub events: Vec<String>,
    /// `(prefix|suffix|regex, value)` key filters.
    pub key_filters: Vec<(String, String)>,
}

impl NotificationRule {
    /// Events and filters sorted, so rules compare equal whatever order the
    /// gateway returns them in.
    pub fn normalized(mut self) -> Self {
        self.events.sort();
        self.events.dedup();
        self.key_filters.sort();
        self
    }

    fn to_topic_configuration(&self) -> Result<TopicConfiguration, Error> {
        let filter = (!self.key_filters.is_empty()).then(|| {
            let rules = self
                .key_filters
                .iter()
                .map(|(name, value)| {
                    FilterRule::builder()
                        .name(FilterRuleName::from(name.as_str()))
                        .value(value)
                        .build()
                })
                .collect();
            NotificationConfigurationFilter::builder()
                .key(S3KeyFilter::builder().set_filter_rules(Some(rules)).build())
                .build()
        });
        TopicConfiguration::builder()
            .id(&self.id)
            .topic_arn(&self.topic_arn)
            .set_events(Some(self.events.iter().map(|e| Event::from(e.as_str())).collect()))
            .set_filter(filter)
            .build()
            .map_err(|e| {
                ResponseSnafu {
                    what: "TopicConfiguration",
                    message: e.to_string(),
                }
                .build()
            })
    }

    fn from_topic_configuration(config: &TopicConfiguration) -> Self {
        let key_filters = config
            .filter()
            .and_then(NotificationConfigurationFilter::key)
            .map(S3KeyFilter::filter_rules)
            .unwrap_or_default()
            .iter()
            .filter_map(|rule| {
                Some((
                    rule.name()?.as_str().to_ascii_lowercase(),
                    rule.value()?.to_owned(),
                ))
            })
            .collect();
        NotificationRule {
            id: config.id().unwrap_or_default().to_owned(),
            topic_arn: config.topic_arn().to_owned(),
            events: config.events().iter().map(|e| e.as_str().to_owned()).collect(),
            key_filters,
        }
        .normalized()
    }
}

/// Data-plane calls made against a gateway endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait S3Api: Send + Sync {
    /// Succeeds when the bucket already exists and belongs to `creds`.
    async fn create_bucket(&self, endpoint: &str, creds: &Credentials, bucket: &str) -> Result<(), Error>;

    /// Returns the topic ARN.
    async fn create_topic(
        &self,
        endpoint: &str,
        creds: &Credentials,
        name: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<String, Error>;

    async fn delete_topic(&self, endpoint: &str, creds: &Credentials, arn: &str) -> Result<(), Error>;

    /// Rules come back normalized.
    async fn get_bucket_notifications(
        &self,
        endpoint: &str,
        creds: &Credentials,
        bucket: &str,
    ) -> Result<Vec<NotificationRule>, Error>;

    /// Replaces the full notification configuration of `bucket`.
    async fn put_bucket_notifications(
        &self,
        endpoint: &str,
        creds: &Credentials,
        bucket: &str,
        rules: &[NotificationRule],
    ) -> Result<(), Error>;
}

type ClientKey = (String, Credentials);

/// S3 and SNS clients per endpoint and key pair, bounded by the same
/// per-gateway limits as `radosgw-admin`.
pub struct S3Agent {
    limits: EndpointLimits,
    s3: Mutex<HashMap<ClientKey, aws_sdk_s3::Client>>,
    sns: Mutex<HashMap<ClientKey, aws_sdk_sns::Client>>,
}

impl S3Agent {
    pub fn new(limits: EndpointLimits) -> Self {
        Self {
            limits,
            s3: Mutex::new(HashMap::new()),
            sns: Mutex::new(HashMap::new()),
        }
    }

    fn static_credentials(creds: &Credentials) -> StaticCredentials {
        StaticCredentials::new(&creds.access_key, &creds.secret_key, None, None, PROVIDER_NAME)
    }

    fn s3_client(&self, endpoint: &str, creds: &Credentials) -> aws_sdk_s3::Client {
        let mut clients = self.s3.lock().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry((endpoint.to_owned(), creds.clone()))
            .or_insert_with(|| {
                debug!(endpoint, "building S3 client");
                let config = aws_sdk_s3::Config::builder()
                    .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                    .region(aws_sdk_s3::config::Region::new(SIGNING_REGION))
                    .endpoint_url(endpoint)
                    .force_path_style(true)
                    .credentials_provider(Self::static_credentials(creds))
                    .build();
                aws_sdk_s3::Client::from_conf(config)
            })
            .clone()
    }

    fn sns_client(&self, endpoint: &str, creds: &Credentials) -> aws_sdk_sns::Client {
        let mut clients = self.sns.lock().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry((endpoint.to_owned(), creds.clone()))
            .or_insert_with(|| {
                debug!(endpoint, "building SNS client");
                let config = aws_sdk_sns::Config::builder()
                    .behavior_version(aws_sdk_sns::config::BehaviorVersion::latest())
                    .region(aws_sdk_sns::config::Region::new(SIGNING_REGION))
                    .endpoint_url(endpoint)
                    .credentials_provider(Self::static_credentials(creds))
                    .build();
                aws_sdk_sns::Client::from_conf(config)
            })
            .clone()
    }
}

/// Service errors keep the gateway's status and code; everything else is a
/// transport failure.
fn sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(_) => Error::S3 {
            operation: operation.to_owned(),
            status: err.raw_response().map(|r| r.status().as_u16()).unwrap_or_default(),
            code: err.code().unwrap_or_default().to_owned(),
            message: err.message().unwrap_or_default().to_owned(),
        },
        _ => Error::Sdk {
            operation: operation.to_owned(),
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

#[async_trait]
impl S3Api for S3Agent {
    async fn create_bucket(&self, endpoint: &str, creds: &Credentials, bucket: &str) -> Result<(), Error> {
        let client = self.s3_client(endpoint, creds);
        let _permit = self.limits.acquire(&endpoint_key(endpoint)).await;
        match client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BucketAlreadyOwnedByYou") => Ok(()),
            Err(e) => Err(sdk_error("CreateBucket", e)),
        }
    }

    async fn create_topic(
        &self,
        endpoint: &str,
        creds: &Credentials,
        name: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let client = self.sns_client(endpoint, creds);
        let _permit = self.limits.acquire(&endpoint_key(endpoint)).await;
        let attributes: HashMap<String, String> =
            attributes.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let out = client
            .create_topic()
            .name(name)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(|e| sdk_error("CreateTopic", e))?;
        out.topic_arn()
            .filter(|arn| !arn.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                ResponseSnafu {
                    what: "CreateTopic",
                    message: "no TopicArn in response",
                }
                .build()
            })
    }

    async fn delete_topic(&self, endpoint: &str, creds: &Credentials, arn: &str) -> Result<(), Error> {
        let client = self.sns_client(endpoint, creds);
        let _permit = self.limits.acquire(&endpoint_key(endpoint)).await;
        match client.delete_topic().topic_arn(arn).send().await {
            Ok(_) => Ok(()),
            Err(e) => match sdk_error("DeleteTopic", e) {
                Error::S3 { status: 404, .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn get_bucket_notifications(
        &self,
        endpoint: &str,
        creds: &Credentials,
        bucket: &str,
    ) -> Result<Vec<NotificationRule>, Error> {
        let client = self.s3_client(endpoint, creds);
        let _permit = self.limits.acquire(&endpoint_key(endpoint)).await;
        let out = client
            .get_bucket_notification_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("GetBucketNotificationConfiguration", e))?;
        Ok(out
            .topic_configurations()
            .iter()
            .map(NotificationRule::from_topic_configuration)
            .collect())
    }

    async fn put_bucket_notifications(
        &self,
        endpoint: &str,
        creds: &Credentials,
        bucket: &str,
        rules: &[NotificationRule],
    ) -> Result<(), Error> {
        let topics = rules
            .iter()
            .map(NotificationRule::to_topic_configuration)
            .collect::<Result<Vec<_>, _>>()?;
        let config = NotificationConfiguration::builder()
            .set_topic_configurations(Some(topics))
            .build();
        let client = self.s3_client(endpoint, creds);
        let _permit = self.limits.acquire(&endpoint_key(endpoint)).await;
        client
            .put_bucket_notification_configuration()
            .bucket(bucket)
            .notification_configuration(config)
            .send()
            .await
            .map_err(|e| sdk_error("PutBucketNotificationConfiguration", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> NotificationRule {
        NotificationRule {
            id: "n1".to_owned(),
            topic_arn: "arn:aws:sns:my-store::t1".to_owned(),
            events: vec!["s3:ObjectRemoved:*".to_owned(), "s3:ObjectCreated:*".to_owned()],
            key_filters: vec![
                ("suffix".to_owned(), ".jpg".to_owned()),
                ("prefix".to_owned(), "logs/".to_owned()),
            ],
        }
    }

    #[test]
    fn test_gateway_rule_is_normalized() {
        let config = rule().to_topic_configuration().unwrap();
        let parsed = NotificationRule::from_topic_configuration(&config);
        assert_eq!(parsed.events, ["s3:ObjectCreated:*", "s3:ObjectRemoved:*"]);
        assert_eq!(
            parsed.key_filters,
            [
                ("prefix".to_owned(), "logs/".to_owned()),
                ("suffix".to_owned(), ".jpg".to_owned())
            ]
        );
        assert_eq!(parsed, rule().normalized());
    }

    #[test]
    fn test_rule_without_filters_has_no_filter_block() {
        let plain = NotificationRule {
            key_filters: Vec::new(),
            ..rule()
        };
        let config = plain.to_topic_configuration().unwrap();
        assert!(config.filter().is_none());
        assert_eq!(config.topic_arn(), "arn:aws:sns:my-store::t1");
    }

    #[tokio::test]
    async fn test_clients_cached_per_endpoint_and_keys() {
        let agent = S3Agent::new(EndpointLimits::new(2));
        let alice = Credentials {
            access_key: "AK".to_owned(),
            secret_key: "SK".to_owned(),
        };
        let bob = Credentials {
            access_key: "AK2".to_owned(),
            secret_key: "SK2".to_owned(),
        };
        agent.s3_client("http://rook-ceph-rgw-a.rook-ceph.svc", &alice);
        agent.s3_client("http://rook-ceph-rgw-a.rook-ceph.svc", &alice);
        agent.s3_client("http://rook-ceph-rgw-a.rook-ceph.svc", &bob);
        agent.sns_client("http://rook-ceph-rgw-a.rook-ceph.svc", &alice);
        assert_eq!(agent.s3.lock().unwrap().len(), 2);
        assert_eq!(agent.sns.lock().unwrap().len(), 1);
    }
}
