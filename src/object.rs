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

//! Object gateway administration: `radosgw-admin` for users, buckets and
//! zones, and the AWS SDK S3/SNS clients for the data-plane calls.

pub mod admin;
pub mod s3;

pub use admin::{BucketInfo, ObjectAdmin, RadosGwAdmin, StoreContext, UserConfig, UserInfo};
pub use s3::{Credentials, NotificationRule, S3Agent, S3Api};

use crate::ceph;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("radosgw-admin: {source}"))]
    Admin { source: ceph::Error },

    #[snafu(display("failed to parse {what}: {source}"))]
    Parse {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("{operation} failed: {message}"))]
    Sdk { operation: String, message: String },

    #[snafu(display("{operation} returned {status} {code}: {message}"))]
    S3 {
        operation: String,
        status: u16,
        code: String,
        message: String,
    },

    #[snafu(display("unexpected {what} response: {message}"))]
    Response { what: String, message: String },

    #[snafu(display("user {uid:?} has no S3 keys"))]
    NoKeys { uid: String },
}

impl Error {
    /// Worth retrying without any change on our side.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Admin { source } => source.is_timeout(),
            Error::Sdk { .. } => true,
            Error::S3 { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
