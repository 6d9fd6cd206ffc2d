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
use crate::object::StoreContext;
use crate::reconcile::object_store::{self, StoreHandle};
use crate::reconcile::{Outcome, cluster, run, set_ready};
use crate::types::v1::ResourceIdentity;
use crate::types::v1::object_store::CephObjectStore;
use crate::types::v1::status::{Phase, reason};
use crate::types::v1::topic::{CephBucketTopic, attributes_digest, validate_arn};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::sync::Arc;
use tracing::{debug, info};

pub const INVALID_TOPIC_ARN: &str = "InvalidTopicArn";

async fn apply(ctx: &Context, topic: &CephBucketTopic) -> Result<Outcome, Error> {
    let ns = topic.require_namespace()?;
    let name = topic.name_any();
    let attributes = topic
        .attributes()
        .map_err(|message| InvariantSnafu { message }.build())?;

    let store_ns = topic.store_namespace();
    let StoreHandle { store, admin } =
        object_store::connect_store(ctx, &store_ns, &topic.spec.object_store_name).await?;
    if !store.allows_namespace(&ns) {
        return InvariantSnafu {
            message: format!(
                "object store {store_ns}/{} does not allow topics in namespace {ns}",
                topic.spec.object_store_name
            ),
        }
        .fail();
    }

    let endpoint = store.endpoint()?;
    let digest = attributes_digest(&endpoint, &attributes);
    if let (true, Some(arn)) = (topic.is_provisioned(&digest), topic.arn()) {
        debug!("topic {} unchanged, keeping {}", topic.key(), arn);
        set_ready(ctx, topic, Phase::Ready, reason::RECONCILE_SUCCEEDED, arn).await?;
        return Ok(Outcome::Done);
    }

    let creds = object_store::admin_credentials(ctx, &admin).await?;
    let arn = ctx
        .s3
        .create_topic(&endpoint, &creds, &name, &attributes)
        .await?;
    if let Err(message) = validate_arn(&arn, &name) {
        return Ok(Outcome::failure(INVALID_TOPIC_ARN, message));
    }

    info!("topic {} provisioned as {}", topic.key(), arn);
    let topic = ctx
        .update_status(topic, |status| {
            status.arn = Some(arn.clone());
            status.attributes_hash = Some(digest.clone());
        })
        .await?;
    set_ready(ctx, &topic, Phase::Ready, reason::RECONCILE_SUCCEEDED, &arn).await?;
    Ok(Outcome::Done)
}

async fn cleanup(ctx: &Context, topic: &CephBucketTopic) -> Result<Outcome, Error> {
    let Some(arn) = topic.arn() else {
        return Ok(Outcome::Done);
    };
    let store_ns = topic.store_namespace();
    let store_name = &topic.spec.object_store_name;
    let Some(store) = ctx.get_opt::<CephObjectStore>(store_name, &store_ns).await? else {
        debug!("store {} is gone, nothing to remove for {}", store_name, topic.key());
        return Ok(Outcome::Done);
    };
    let Some(conn) = cluster::connect_for_cleanup(ctx, &store_ns).await? else {
        return Ok(Outcome::Done);
    };
    let admin = StoreContext::new(conn.info, store_name);
    let creds = object_store::admin_credentials(ctx, &admin).await?;
    ctx.s3.delete_topic(&store.endpoint()?, &creds, arn).await?;
    info!("topic {} deleted", arn);
    Ok(Outcome::Done)
}

pub async fn reconcile(topic: Arc<CephBucketTopic>, ctx: Arc<Context>) -> Result<Action, Error> {
    run(
        &ctx,
        topic.as_ref(),
        async |t: &CephBucketTopic| apply(&ctx, t).await,
        async |t: &CephBucketTopic| cleanup(&ctx, t).await,
    )
    .await
}
