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

//! Single active operator through a `coordination.k8s.io` Lease.
//!
//! Writes carry the lease's resourceVersion, so two candidates racing for an
//! expired lease cannot both win: the loser gets a 409 and keeps waiting.

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use snafu::Snafu;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const LEASE_NAME: &str = "rook-ceph-operator";

const LEASE_DURATION: Duration = Duration::from_secs(30);
/// Leadership is given up this long after the last good renewal, well before
/// a standby may treat the lease as expired.
const RENEW_DEADLINE: Duration = Duration::from_secs(20);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("lease {name} API error: {source}"))]
    Lease { name: String, source: kube::Error },

    #[snafu(display("lost leadership of lease {name}"))]
    Lost { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Us,
    Other,
    Vacant,
}

fn holder_of(lease: &Lease, identity: &str, now: DateTime<Utc>) -> Holder {
    let Some(spec) = lease.spec.as_ref() else {
        return Holder::Vacant;
    };
    match spec.holder_identity.as_deref() {
        None | Some("") => return Holder::Vacant,
        Some(holder) if holder == identity => return Holder::Us,
        Some(_) => {}
    }
    match (spec.renew_time.as_ref(), spec.lease_duration_seconds) {
        (Some(renewed), Some(secs)) if now <= renewed.0 + chrono::Duration::seconds(i64::from(secs)) => {
            Holder::Other
        }
        _ => Holder::Vacant,
    }
}

/// Lease body that makes `identity` the holder, keeping acquire time and
/// transition count when it already was.
fn desired_lease(namespace: &str, identity: &str, existing: Option<&Lease>, now: DateTime<Utc>) -> Lease {
    let spec = existing.and_then(|l| l.spec.as_ref());
    let ours = spec.and_then(|s| s.holder_identity.as_deref()) == Some(identity);
    let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_owned()),
            namespace: Some(namespace.to_owned()),
            resource_version: existing.and_then(|l| l.metadata.resource_version.clone()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_owned()),
            lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
            acquire_time: if ours {
                spec.and_then(|s| s.acquire_time.clone())
            } else {
                Some(MicroTime(now))
            },
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(if ours || existing.is_none() {
                transitions
            } else {
                transitions + 1
            }),
            ..Default::default()
        }),
    }
}

fn past_renew_deadline(since_renewal: Duration) -> bool {
    since_renewal >= RENEW_DEADLINE
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409)
}

pub struct LeaderElector {
    api: Api<Lease>,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_owned(),
            identity: identity.to_owned(),
        }
    }

    /// One acquire-or-renew round. `Ok(false)` means someone else holds the lease.
    async fn try_acquire(&self) -> Result<bool, Error> {
        let existing = self
            .api
            .get_opt(LEASE_NAME)
            .await
            .map_err(|source| self.lease_error(source))?;
        let now = Utc::now();

        let result = match &existing {
            None => {
                let body = desired_lease(&self.namespace, &self.identity, None, now);
                self.api.create(&PostParams::default(), &body).await
            },
            Some(lease) => match holder_of(lease, &self.identity, now) {
                Holder::Other => return Ok(false),
                Holder::Us | Holder::Vacant => {
                    let body = desired_lease(&self.namespace, &self.identity, Some(lease), now);
                    self.api.replace(LEASE_NAME, &PostParams::default(), &body).await
                }
            },
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => {
                debug!("lease {} changed underneath {}", LEASE_NAME, self.identity);
                Ok(false)
            }
            Err(source) => Err(self.lease_error(source)),
        }
    }

    fn lease_error(&self, source: kube::Error) -> Error {
        Error::Lease {
            name: format!("{}/{}", self.namespace, LEASE_NAME),
            source,
        }
    }

    /// Waits until this process holds the lease.
    pub async fn acquire(self) -> LeaderGuard {
        info!("waiting for lease {}/{} as {}", self.namespace, LEASE_NAME, self.identity);
        loop {
            match self.try_acquire().await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => warn!("lease acquisition failed: {}", e),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
        info!("{} is now the leader", self.identity);

        let elector = Arc::new(self);
        let (lost_tx, lost_rx) = oneshot::channel();
        let renewal = tokio::spawn(Arc::clone(&elector).renew(lost_tx));
        LeaderGuard {
            elector,
            renewal,
            lost: Some(lost_rx),
        }
    }

    async fn renew(self: Arc<Self>, lost: oneshot::Sender<()>) {
        let mut renewed = Instant::now();
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;
            match self.try_acquire().await {
                Ok(true) => renewed = Instant::now(),
                Ok(false) => break,
                Err(e) if !past_renew_deadline(renewed.elapsed()) => warn!("lease renewal failed: {}", e),
                Err(e) => {
                    warn!("lease renewal failed past the renew deadline: {}", e);
                    break;
                }
            }
        }
        warn!("{} lost the lease", self.identity);
        let _ = lost.send(());
    }

    async fn release(&self) -> Result<(), Error> {
        let Some(mut lease) = self
            .api
            .get_opt(LEASE_NAME)
            .await
            .map_err(|source| self.lease_error(source))?
        else {
            return Ok(());
        };
        if holder_of(&lease, &self.identity, Utc::now()) != Holder::Us {
            return Ok(());
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = None;
            spec.renew_time = None;
        }
        match self.api.replace(LEASE_NAME, &PostParams::default(), &lease).await {
            Ok(_) => {
                info!("released lease {}/{}", self.namespace, LEASE_NAME);
                Ok(())
            }
            Err(e) if is_conflict(&e) => Ok(()),
            Err(source) => Err(self.lease_error(source)),
        }
    }
}

/// Held while this process is the leader; renewal stops when it is dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal: JoinHandle<()>,
    lost: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Resolves once renewal has failed.
    pub async fn lost(&mut self) -> Error {
        if let Some(rx) = self.lost.take() {
            let _ = rx.await;
        }
        Error::Lost {
            name: LEASE_NAME.to_owned(),
        }
    }

    /// Stops renewing and clears the holder so a standby can take over at once.
    pub async fn release(self) -> Result<(), Error> {
        self.renewal.abort();
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed_secs_ago: i64) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_owned()),
                resource_version: Some("7".to_owned()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_owned),
                lease_duration_seconds: Some(30),
                renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(renewed_secs_ago))),
                lease_transitions: Some(2),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_holder_of() {
        let now = Utc::now();
        assert_eq!(holder_of(&lease(Some("op-1"), 5), "op-1", now), Holder::Us);
        assert_eq!(holder_of(&lease(Some("op-2"), 5), "op-1", now), Holder::Other);
        assert_eq!(holder_of(&lease(Some("op-2"), 120), "op-1", now), Holder::Vacant);
        assert_eq!(holder_of(&lease(None, 5), "op-1", now), Holder::Vacant);
        assert_eq!(holder_of(&Lease::default(), "op-1", now), Holder::Vacant);
    }

    #[test]
    fn test_leadership_dropped_before_lease_expires() {
        assert!(RENEW_INTERVAL < RENEW_DEADLINE);
        assert!(RENEW_DEADLINE < LEASE_DURATION);
        assert!(!past_renew_deadline(RENEW_INTERVAL));
        assert!(past_renew_deadline(RENEW_DEADLINE));

        // a renewal that failed 25s ago: we stop, while others still see the lease held
        let stale = Duration::from_secs(25);
        assert!(past_renew_deadline(stale));
        let others_view = lease(Some("op-1"), stale.as_secs() as i64);
        assert_eq!(holder_of(&others_view, "op-2", Utc::now()), Holder::Other);
    }

    #[test]
    fn test_desired_lease() {
        let now = Utc::now();
        let fresh = desired_lease("rook-ceph", "op-1", None, now);
        let spec = fresh.spec.unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some("op-1"));
        assert_eq!(spec.lease_transitions, Some(0));
        assert!(fresh.metadata.resource_version.is_none());

        let takeover = desired_lease("rook-ceph", "op-1", Some(&lease(Some("op-2"), 120)), now);
        assert_eq!(takeover.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(takeover.spec.unwrap().lease_transitions, Some(3));

        let renewal = desired_lease("rook-ceph", "op-1", Some(&lease(Some("op-1"), 5)), now);
        assert_eq!(renewal.spec.unwrap().lease_transitions, Some(2));
    }
}
