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

//! Bounded polling used wherever the reconcilers wait on the cluster or the backend.

use crate::error::{CancelledSnafu, Error, WaitTimeoutSnafu};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(15),
            multiplier: 2,
        }
    }
}

impl Backoff {
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            multiplier: 1,
        }
    }

    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(self.multiplier).min(self.max)
    }

    /// Delay for the n-th consecutive failure, starting at zero.
    pub fn nth(&self, attempt: u32) -> Duration {
        (0..attempt).fold(self.initial, |d, _| self.next(d))
    }
}

/// Polls `check` until it yields `Some`, the deadline passes, or `cancel` fires.
///
/// Errors from `check` are returned immediately; a check that wants to tolerate
/// an error should map it to `Ok(None)`.
pub async fn wait_for<T, F, Fut>(
    what: &str,
    deadline: Duration,
    backoff: Backoff,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let start = Instant::now();
    let mut delay = backoff.initial;

    loop {
        if cancel.is_cancelled() {
            return CancelledSnafu { what }.fail();
        }

        if let Some(value) = check().await? {
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return WaitTimeoutSnafu {
                what,
                after: deadline,
            }
            .fail();
        }

        let sleep = delay.min(deadline - elapsed);
        debug!("waiting {:?} for {}", sleep, what);
        tokio::select! {
            _ = cancel.cancelled() => return CancelledSnafu { what }.fail(),
            _ = tokio::time::sleep(sleep) => {}
        }
        delay = backoff.next(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_caps() {
        let b = Backoff::default();
        assert_eq!(b.nth(0), Duration::from_secs(1));
        assert_eq!(b.nth(2), Duration::from_secs(4));
        assert_eq!(b.nth(10), Duration::from_secs(15));
        assert_eq!(Backoff::fixed(Duration::from_secs(3)).nth(5), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_succeeds_eventually() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let c = calls.clone();
        let value = wait_for(
            "three attempts",
            Duration::from_secs(60),
            Backoff::default(),
            &token,
            move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok((n >= 3).then_some(n))
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let token = CancellationToken::new();
        let res: Result<(), _> = wait_for(
            "never",
            Duration::from_secs(10),
            Backoff::default(),
            &token,
            || async { Ok(None) },
        )
        .await;
        assert!(matches!(res, Err(Error::WaitTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let res: Result<(), _> = wait_for(
            "cancelled",
            Duration::from_secs(10),
            Backoff::default(),
            &token,
            || async { Ok(None) },
        )
        .await;
        assert!(matches!(res, Err(Error::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_propagates_check_error() {
        let token = CancellationToken::new();
        let res: Result<(), _> = wait_for(
            "broken",
            Duration::from_secs(10),
            Backoff::default(),
            &token,
            || async {
                Err(Error::Invariant {
                    message: "boom".to_owned(),
                })
            },
        )
        .await;
        assert!(matches!(res, Err(Error::Invariant { .. })));
    }
}
