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

//! Thin typed layer over the storage engine command line tools.

pub mod auth;
pub mod command;
pub mod fs;
pub mod mon;
pub mod osd;
pub mod pool;
pub mod data_path;
pub mod status;

pub use command::{CephExecutor, ClusterInfo, CommandExecutor, Tool};

use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};
use std::time::Duration;

/// Exit code the tools use for ENOENT.
pub const ENOENT: i32 = 2;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to start {tool}: {source}"))]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[snafu(display("{tool} {args} timed out after {timeout:?}"))]
    Timeout {
        tool: String,
        args: String,
        timeout: Duration,
    },

    #[snafu(display("{tool} {args} exited with code {code}: {stderr}"))]
    CommandFailed {
        tool: String,
        args: String,
        code: i32,
        stderr: String,
    },

    #[snafu(display("failed to parse {what} output: {source}"))]
    Parse {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to write {path}: {source}"))]
    WriteConfig {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("unexpected {what}: {message}"))]
    Unexpected { what: String, message: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::CommandFailed { code, .. } if *code == ENOENT)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Exit status of a failed command, if the error came from one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Runs `ceph <args> --format json` and decodes the result.
pub async fn ceph_json<T: DeserializeOwned>(
    exec: &dyn CephExecutor,
    cluster: &ClusterInfo,
    args: &[&str],
) -> Result<T, Error> {
    let mut full = to_args(args);
    full.extend(["--format".to_owned(), "json".to_owned()]);
    let out = exec.run(cluster, Tool::Ceph, full).await?;
    serde_json::from_slice(&out).context(ParseSnafu {
        what: format!("ceph {}", args.join(" ")),
    })
}

/// Runs a `ceph` command whose output is not needed.
pub async fn ceph(exec: &dyn CephExecutor, cluster: &ClusterInfo, args: &[&str]) -> Result<(), Error> {
    exec.run(cluster, Tool::Ceph, to_args(args)).await.map(|_| ())
}
