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

use crate::{ceph, context, object, types, utils};
use snafu::Snafu;
use std::time::Duration;
use strum::Display;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Ceph { source: ceph::Error },

    #[snafu(transparent)]
    Object { source: object::Error },

    #[snafu(display("{what} did not complete within {after:?}"))]
    WaitTimeout { what: String, after: Duration },

    #[snafu(display("{what} was cancelled"))]
    Cancelled { what: String },

    #[snafu(display("waiting for {kind} {name:?}: {reason}"))]
    Dependency {
        kind: String,
        name: String,
        reason: String,
    },

    #[snafu(display("{message}"))]
    Invariant { message: String },

    #[snafu(display("{message}"))]
    Fatal { message: String },

    #[snafu(display("TLS material in secret {secret:?} is invalid: {source}"))]
    Tls {
        secret: String,
        source: utils::tls::Error,
    },
}

/// How the control loop should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// Retry with backoff; never surfaced as Failure.
    Transient,
    /// A referenced object or backend entity is missing or not ready yet.
    Dependency,
    /// Desired state is contradictory; needs a spec change.
    Invariant,
    /// The storage backend rejected or failed an operation.
    Backend,
    /// Unrecoverable for this object.
    Fatal,
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Context { source } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Context { source } if source.is_not_found() => ErrorKind::Dependency,
            Error::Context { source } if source.is_bad_request() => ErrorKind::Invariant,
            Error::Context { .. } => ErrorKind::Transient,
            Error::Types { .. } => ErrorKind::Invariant,
            Error::Ceph { source } if source.is_timeout() => ErrorKind::Transient,
            Error::Ceph { .. } => ErrorKind::Backend,
            Error::Object { source } if source.is_transient() => ErrorKind::Transient,
            Error::Object { .. } => ErrorKind::Backend,
            Error::WaitTimeout { .. } | Error::Cancelled { .. } => ErrorKind::Transient,
            Error::Dependency { .. } => ErrorKind::Dependency,
            Error::Invariant { .. } | Error::Tls { .. } => ErrorKind::Invariant,
            Error::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// Stable PascalCase reason for conditions and events.
    pub fn reason(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Transient => "ReconcileRetrying",
            ErrorKind::Dependency => "WaitingForDependency",
            ErrorKind::Invariant => "InvalidSpec",
            ErrorKind::Backend => "BackendError",
            ErrorKind::Fatal => "ReconcileFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err = Error::WaitTimeout {
            what: "mon quorum".to_owned(),
            after: Duration::from_secs(1),
        };
        assert_eq!(err.kind(), ErrorKind::Transient);

        let err = Error::Dependency {
            kind: "CephObjectStore".to_owned(),
            name: "store".to_owned(),
            reason: "not ready".to_owned(),
        };
        assert_eq!(err.kind(), ErrorKind::Dependency);
        assert_eq!(err.reason(), "WaitingForDependency");

        let err = Error::Invariant {
            message: "duplicate device".to_owned(),
        };
        assert_eq!(err.kind(), ErrorKind::Invariant);
        assert!(!err.is_not_found());
    }
}
