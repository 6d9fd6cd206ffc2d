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

//! Per-key serialization, cancellation and gateway concurrency limits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// One async mutex per key, created on first use.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key.to_owned()).or_default().clone()
        };
        entry.lock_owned().await
    }

    /// Drops the entry for `key` once nobody holds or waits on it.
    pub fn forget(&self, key: &str) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(key);
        }
    }
}

/// Cancellation tokens keyed by object, so deletion can stop in-flight
/// creation for the same object.
#[derive(Clone, Default)]
pub struct Cancellations {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Cancellations {
    /// Live token for `key`; a cancelled token is replaced.
    pub fn token(&self, key: &str) -> CancellationToken {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let token = map.entry(key.to_owned()).or_default();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    pub fn cancel(&self, key: &str) {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = map.get(key) {
            token.cancel();
        }
    }

    pub fn remove(&self, key: &str) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
    }
}

/// Consecutive transient failures per key, reset after a clean pass.
#[derive(Clone, Default)]
pub struct Retries {
    inner: Arc<Mutex<HashMap<String, u32>>>,
}

impl Retries {
    /// Returns the attempt number before this failure and counts it.
    pub fn bump(&self, key: &str) -> u32 {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let attempts = map.entry(key.to_owned()).or_default();
        let previous = *attempts;
        *attempts = attempts.saturating_add(1);
        previous
    }

    pub fn reset(&self, key: &str) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
    }
}

/// Bounded concurrency per gateway host, shared by `radosgw-admin` and the
/// S3/SNS clients so both count against the same budget.
#[derive(Clone)]
pub struct EndpointLimits {
    permits: usize,
    inner: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl EndpointLimits {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: permits.max(1),
            inner: Arc::default(),
        }
    }

    fn semaphore(&self, key: &str) -> Arc<Semaphore> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(self.permits)))
            .clone()
    }

    /// Waits for a slot on `key`. `None` only for a closed semaphore, and
    /// these are never closed.
    pub async fn acquire(&self, key: &str) -> Option<OwnedSemaphorePermit> {
        self.semaphore(key).acquire_owned().await.ok()
    }
}

/// Limiter key for a gateway endpoint URL: its host, or the raw string when
/// it does not parse.
pub fn endpoint_key(endpoint: &str) -> String {
    endpoint
        .parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.host().map(str::to_owned))
        .unwrap_or_else(|| endpoint.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = KeyedLocks::default();
        let guard = locks.lock("ns/a").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock("ns/a").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::default();
        let _a = locks.lock("ns/a").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock("ns/b"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forget_keeps_held_lock() {
        let locks = KeyedLocks::default();
        let guard = locks.lock("ns/a").await;
        locks.forget("ns/a");
        assert!(locks.inner.lock().unwrap().contains_key("ns/a"));

        drop(guard);
        locks.forget("ns/a");
        assert!(locks.inner.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_limits_are_shared_per_host() {
        let limits = EndpointLimits::new(1);
        let shared = limits.clone();
        let _held = limits.acquire("rook-ceph-rgw-a.rook-ceph.svc").await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(30),
            shared.acquire("rook-ceph-rgw-a.rook-ceph.svc"),
        )
        .await;
        assert!(blocked.is_err());

        let other = tokio::time::timeout(
            Duration::from_millis(30),
            shared.acquire("rook-ceph-rgw-b.rook-ceph.svc"),
        )
        .await;
        assert!(other.unwrap().is_some());
    }

    #[test]
    fn test_endpoint_key_is_host() {
        assert_eq!(
            endpoint_key("http://rook-ceph-rgw-a.rook-ceph.svc:80"),
            "rook-ceph-rgw-a.rook-ceph.svc"
        );
        assert_eq!(endpoint_key("not a url"), "not a url");
    }

    #[test]
    fn test_cancel_then_fresh_token() {
        let cancels = Cancellations::default();
        let token = cancels.token("ns/a");
        cancels.cancel("ns/a");
        assert!(token.is_cancelled());
        assert!(!cancels.token("ns/a").is_cancelled());
    }

    #[test]
    fn test_retries_count_and_reset() {
        let retries = Retries::default();
        assert_eq!(retries.bump("ns/a"), 0);
        assert_eq!(retries.bump("ns/a"), 1);
        assert_eq!(retries.bump("ns/b"), 0);
        retries.reset("ns/a");
        assert_eq!(retries.bump("ns/a"), 0);
    }
}
