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

//! Bucket notifications. A claim opts in with the label
//! `bucket-notification-<name>: <name>`; the rule reaches the bucket once the
//! claim is bound and the notification's topic has an ARN.

use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::object::NotificationRule;
use crate::reconcile::bucket::{self, ClaimAccess};
use crate::reconcile::{DEPENDENCY_REQUEUE, Outcome, run, set_progressing, set_ready};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::bucket_claim::ObjectBucketClaim;
use crate::types::v1::notification::CephBucketNotification;
use crate::types::v1::status::{Phase, reason};
use crate::types::v1::topic::CephBucketTopic;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LABEL_PREFIX: &str = "bucket-notification-";

/// Notification names attached through `labels`.
pub fn attached(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix(LABEL_PREFIX)?;
            if name != value {
                warn!("ignoring label {}: value {:?} does not match {:?}", key, value, name);
                return None;
            }
            Some(name.to_owned())
        })
        .collect()
}

pub fn rule_for(notification: &CephBucketNotification, topic_arn: &str) -> NotificationRule {
    let key_filters = notification
        .spec
        .filter
        .iter()
        .flat_map(|f| f.key_filters.iter())
        .map(|f| (f.name.to_ascii_lowercase(), f.value.clone()))
        .collect();
    NotificationRule {
        id: notification.name_any(),
        topic_arn: topic_arn.to_owned(),
        events: notification.spec.events.clone(),
        key_filters,
    }
    .normalized()
}

/// New configuration for a bucket: `wanted` rules replace same-id ones,
/// `detached` ids are dropped, anything else is left as found.
pub fn merge_rules(
    current: &[NotificationRule],
    wanted: &[NotificationRule],
    detached: &[String],
) -> Vec<NotificationRule> {
    let mut rules: Vec<NotificationRule> = current
        .iter()
        .filter(|r| !detached.contains(&r.id) && !wanted.iter().any(|w| w.id == r.id))
        .cloned()
        .collect();
    rules.extend(wanted.iter().cloned());
    rules.sort_by(|a, b| a.id.cmp(&b.id));
    rules
}

/// Order-insensitive over rules, their events and their key filters.
pub fn same_rules(a: &[NotificationRule], b: &[NotificationRule]) -> bool {
    let sorted = |rules: &[NotificationRule]| {
        let mut rules: Vec<_> = rules.iter().cloned().map(NotificationRule::normalized).collect();
        rules.sort_by(|x, y| x.id.cmp(&y.id));
        rules
    };
    sorted(a) == sorted(b)
}

/// Makes the bucket of a bound claim carry exactly the notifications its labels ask for.
pub async fn sync_claim(ctx: &Context, claim: &ObjectBucketClaim, access: &ClaimAccess) -> Result<Outcome, Error> {
    let ns = claim.require_namespace()?;
    let notifications = ctx.list::<CephBucketNotification>(&ns).await?;
    let attached = attached(claim.labels());

    let mut wanted = vec![];
    let mut pending = vec![];
    for name in &attached {
        let Some(notification) = notifications.iter().find(|n| &n.name_any() == name) else {
            pending.push(name.clone());
            continue;
        };
        let topic = ctx
            .get_opt::<CephBucketTopic>(&notification.spec.topic, &ns)
            .await?;
        match topic.as_ref().and_then(|t| t.arn()) {
            Some(arn) => wanted.push(rule_for(notification, arn)),
            None => pending.push(name.clone()),
        }
    }
    let detached: Vec<String> = notifications
        .iter()
        .map(|n| n.name_any())
        .filter(|n| !attached.contains(n))
        .collect();

    let current = ctx
        .s3
        .get_bucket_notifications(&access.endpoint, &access.creds, &access.bucket)
        .await?;
    let desired = merge_rules(&current, &wanted, &detached);
    if !same_rules(&current, &desired) {
        info!("updating notifications of bucket {}", access.bucket);
        ctx.s3
            .put_bucket_notifications(&access.endpoint, &access.creds, &access.bucket, &desired)
            .await?;
    }

    if pending.is_empty() {
        return Ok(Outcome::Done);
    }
    debug!("bucket {} waits for notifications {:?}", access.bucket, pending);
    Ok(Outcome::RequeueAfter(DEPENDENCY_REQUEUE))
}

async fn labelled_claims(ctx: &Context, notification: &CephBucketNotification) -> Result<Vec<ObjectBucketClaim>, Error> {
    let label = notification.claim_label();
    let name = notification.name_any();
    Ok(ctx
        .list::<ObjectBucketClaim>(&notification.require_namespace()?)
        .await?
        .into_iter()
        .filter(|c| c.labels().get(&label) == Some(&name))
        .collect())
}

async fn apply(ctx: &Context, notification: &CephBucketNotification) -> Result<Outcome, Error> {
    let ns = notification.require_namespace()?;
    let topic = ctx
        .get_opt::<CephBucketTopic>(&notification.spec.topic, &ns)
        .await?;
    if topic.as_ref().and_then(|t| t.arn()).is_none() {
        let message = format!("topic {:?} has no ARN yet", notification.spec.topic);
        set_progressing(ctx, notification, reason::WAITING_FOR_DEPENDENCY, &message).await?;
        return Ok(Outcome::RequeueAfter(DEPENDENCY_REQUEUE));
    }

    let claims = labelled_claims(ctx, notification).await?;
    let mut outcome = Outcome::Done;
    let mut bound = 0;
    for claim in &claims {
        match bucket::claim_access(ctx, claim).await? {
            Some(access) => {
                bound += 1;
                outcome = outcome.merge(sync_claim(ctx, claim, &access).await?);
            }
            None => outcome = outcome.merge(Outcome::RequeueAfter(DEPENDENCY_REQUEUE)),
        }
    }

    set_ready(
        ctx,
        notification,
        Phase::Ready,
        reason::RECONCILE_SUCCEEDED,
        &format!("attached to {bound} of {} labelled buckets", claims.len()),
    )
    .await?;
    Ok(outcome)
}

async fn cleanup(ctx: &Context, notification: &CephBucketNotification) -> Result<Outcome, Error> {
    let name = notification.name_any();
    for claim in labelled_claims(ctx, notification).await? {
        let access = match bucket::claim_access(ctx, &claim).await {
            Ok(Some(access)) => access,
            Ok(None) => continue,
            Err(e) if e.kind() == ErrorKind::Dependency => {
                debug!("skipping {}: {}", claim.key(), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        let rules = ctx
            .s3
            .get_bucket_notifications(&access.endpoint, &access.creds, &access.bucket)
            .await?;
        if rules.iter().any(|r| r.id == name) {
            let remaining = merge_rules(&rules, &[], std::slice::from_ref(&name));
            ctx.s3
                .put_bucket_notifications(&access.endpoint, &access.creds, &access.bucket, &remaining)
                .await?;
            info!("removed notification {} from bucket {}", name, access.bucket);
        }
    }
    Ok(Outcome::Done)
}

pub async fn reconcile(notification: Arc<CephBucketNotification>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        notification.as_ref(),
        async |n: &CephBucketNotification| apply(&ctx, n).await,
        async |n: &CephBucketNotification| cleanup(&ctx, n).await,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::v1::notification::{KeyFilter, NotificationFilter};

    fn rule(id: &str, arn: &str) -> NotificationRule {
        NotificationRule {
            id: id.to_owned(),
            topic_arn: arn.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_attached_requires_matching_value() {
        let labels = BTreeMap::from([
            ("bucket-notification-a".to_owned(), "a".to_owned()),
            ("bucket-notification-b".to_owned(), "c".to_owned()),
            ("app".to_owned(), "web".to_owned()),
        ]);
        assert_eq!(attached(&labels), ["a"]);
    }

    #[test]
    fn test_merge_keeps_foreign_and_drops_detached() {
        let current = vec![
            rule("foreign", "arn:aws:sns:z::x"),
            rule("a", "arn:aws:sns:z::old"),
            rule("b", "arn:aws:sns:z::b"),
        ];
        let wanted = vec![rule("a", "arn:aws:sns:z::new")];
        let merged = merge_rules(&current, &wanted, &["b".to_owned()]);
        assert_eq!(
            merged,
            vec![rule("a", "arn:aws:sns:z::new"), rule("foreign", "arn:aws:sns:z::x")]
        );
    }

    #[test]
    fn test_unchanged_rules_need_no_update() {
        let current = vec![rule("b", "arn:aws:sns:z::b"), rule("a", "arn:aws:sns:z::a")];
        let merged = merge_rules(&current, &[rule("a", "arn:aws:sns:z::a")], &[]);
        assert!(same_rules(&current, &merged));

        let merged = merge_rules(&current, &[], &["a".to_owned()]);
        assert!(!same_rules(&current, &merged));
    }

    #[test]
    fn test_gateway_filter_order_is_not_a_change() {
        let mut notification = crate::tests::create_test_notification("my-notification", "my-topic");
        notification.spec.events = vec!["s3:ObjectRemoved:*".to_owned(), "s3:ObjectCreated:*".to_owned()];
        notification.spec.filter = Some(NotificationFilter {
            key_filters: vec![
                KeyFilter {
                    name: "prefix".to_owned(),
                    value: "images/".to_owned(),
                },
                KeyFilter {
                    name: "suffix".to_owned(),
                    value: ".jpg".to_owned(),
                },
            ],
        });
        let wanted = rule_for(&notification, "arn:aws:sns:my-store::my-topic");
        let from_gateway = NotificationRule {
            id: "my-notification".to_owned(),
            topic_arn: "arn:aws:sns:my-store::my-topic".to_owned(),
            events: vec!["s3:ObjectCreated:*".to_owned(), "s3:ObjectRemoved:*".to_owned()],
            key_filters: vec![
                ("suffix".to_owned(), ".jpg".to_owned()),
                ("prefix".to_owned(), "images/".to_owned()),
            ],
        };
        let current = vec![from_gateway];
        let desired = merge_rules(&current, &[wanted], &[]);
        assert!(same_rules(&current, &desired));
    }

    #[test]
    fn test_rule_for() {
        let mut notification = crate::tests::create_test_notification("my-notification", "my-topic");
        notification.spec.events = vec!["s3:ObjectCreated:*".to_owned()];
        notification.spec.filter = Some(NotificationFilter {
            key_filters: vec![
                KeyFilter {
                    name: "suffix".to_owned(),
                    value: ".jpg".to_owned(),
                },
                KeyFilter {
                    name: "prefix".to_owned(),
                    value: "images/".to_owned(),
                },
            ],
        });
        let rule = rule_for(&notification, "arn:aws:sns:my-store::my-topic");
        assert_eq!(rule.id, "my-notification");
        assert_eq!(rule.events, ["s3:ObjectCreated:*"]);
        assert_eq!(
            rule.key_filters,
            [
                ("prefix".to_owned(), "images/".to_owned()),
                ("suffix".to_owned(), ".jpg".to_owned())
            ]
        );
        assert_eq!(notification.claim_label(), "bucket-notification-my-notification");
    }
}
