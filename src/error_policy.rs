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
use crate::error::{Error, ErrorKind};
use crate::reconcile::DEPENDENCY_REQUEUE;
use crate::types::v1::ResourceIdentity;
use crate::utils::wait::Backoff;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

const TRANSIENT_BACKOFF: Backoff = Backoff {
    initial: Duration::from_secs(2),
    max: Duration::from_secs(60),
    multiplier: 2,
};

const BACKEND_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue delay for an error of `kind`, `None` to wait for a spec change.
pub fn requeue_after(kind: ErrorKind, attempt: u32) -> Option<Duration> {
    match kind {
        ErrorKind::Transient => Some(TRANSIENT_BACKOFF.nth(attempt)),
        ErrorKind::Dependency => Some(DEPENDENCY_REQUEUE),
        ErrorKind::Backend => Some(BACKEND_REQUEUE),
        ErrorKind::Invariant | ErrorKind::Fatal => None,
    }
}

pub fn error_policy<K: ResourceIdentity>(object: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = object.lock_key();
    let kind = error.kind();
    error!("reconcile {} failed ({}): {}", key, kind, error);

    let attempt = match kind {
        ErrorKind::Transient => ctx.retries.bump(&key),
        _ => 0,
    };
    match requeue_after(kind, attempt) {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_by_kind() {
        assert_eq!(
            requeue_after(ErrorKind::Transient, 0),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            requeue_after(ErrorKind::Transient, 3),
            Some(Duration::from_secs(16))
        );
        assert_eq!(
            requeue_after(ErrorKind::Transient, 10),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            requeue_after(ErrorKind::Dependency, 0),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            requeue_after(ErrorKind::Backend, 0),
            Some(Duration::from_secs(30))
        );
        assert_eq!(requeue_after(ErrorKind::Invariant, 0), None);
        assert_eq!(requeue_after(ErrorKind::Fatal, 5), None);
    }
}
