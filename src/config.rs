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

use clap::{ArgAction, Args};
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide settings for the `server` subcommand.
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the operator runs in; empty watches every namespace.
    #[arg(long, env = "ROOK_OPERATOR_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Directory holding the ceph, radosgw-admin and rados binaries.
    #[arg(long, env = "ROOK_CEPH_BIN_DIR", default_value = "/usr/bin")]
    pub ceph_bin_dir: PathBuf,

    /// Where per-cluster ceph.conf and admin keyrings are rendered.
    #[arg(long, env = "ROOK_CONFIG_DIR", default_value = "/var/lib/rook")]
    pub config_dir: PathBuf,

    /// Seconds a mon may stay out of quorum before it is failed over. 0 disables failover.
    #[arg(long, env = "ROOK_MON_OUT_TIMEOUT", default_value_t = 600)]
    pub mon_out_timeout: u64,

    /// Seconds between mon health checks while the cluster is otherwise idle.
    #[arg(long, env = "ROOK_MON_HEALTHCHECK_INTERVAL", default_value_t = 45)]
    pub mon_healthcheck_interval: u64,

    /// Seconds a mon canary has to reach Running.
    #[arg(long, env = "ROOK_CANARY_TIMEOUT", default_value_t = 150)]
    pub canary_timeout: u64,

    /// Hosts tried for a new mon before the placement is reported as failed.
    #[arg(long, env = "ROOK_CANARY_ATTEMPTS", default_value_t = 3)]
    pub canary_attempts: u32,

    /// Concurrent admin requests allowed per gateway endpoint.
    #[arg(long, env = "ROOK_ADMIN_CONCURRENCY", default_value_t = 4)]
    pub admin_concurrency: usize,

    /// Timeout for a single backend CLI invocation, in seconds.
    #[arg(long, env = "ROOK_CEPH_COMMAND_TIMEOUT", default_value_t = 60)]
    pub command_timeout: u64,

    /// Port of the health and status endpoint.
    #[arg(long, env = "ROOK_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Image used for OSD prepare jobs.
    #[arg(long, env = "ROOK_OPERATOR_IMAGE", default_value = "docker.io/rook/ceph:master")]
    pub operator_image: String,

    /// Run controllers only while holding the operator lease.
    #[arg(long, env = "ROOK_LEADER_ELECTION", default_value_t = true, action = ArgAction::Set)]
    pub leader_election: bool,

    /// Namespace of the leader lease, normally the operator pod's own.
    #[arg(long, env = "POD_NAMESPACE", default_value = "rook-ceph")]
    pub lease_namespace: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            ceph_bin_dir: PathBuf::from("/usr/bin"),
            config_dir: PathBuf::from("/var/lib/rook"),
            mon_out_timeout: 600,
            mon_healthcheck_interval: 45,
            canary_timeout: 150,
            canary_attempts: 3,
            admin_concurrency: 4,
            command_timeout: 60,
            http_port: 8080,
            operator_image: "docker.io/rook/ceph:master".to_owned(),
            leader_election: true,
            lease_namespace: "rook-ceph".to_owned(),
        }
    }
}

impl OperatorConfig {
    pub fn mon_out_timeout(&self) -> Duration {
        Duration::from_secs(self.mon_out_timeout)
    }

    pub fn mon_healthcheck_interval(&self) -> Duration {
        Duration::from_secs(self.mon_healthcheck_interval)
    }

    pub fn canary_timeout(&self) -> Duration {
        Duration::from_secs(self.canary_timeout)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        config: OperatorConfig,
    }

    #[test]
    fn test_defaults_match_flags() {
        let parsed = Harness::parse_from(["op"]).config;
        let defaults = OperatorConfig::default();
        assert_eq!(parsed.mon_out_timeout, defaults.mon_out_timeout);
        assert_eq!(parsed.canary_timeout, defaults.canary_timeout);
        assert_eq!(parsed.config_dir, defaults.config_dir);
        assert_eq!(parsed.operator_image, defaults.operator_image);
    }

    #[test]
    fn test_flags_override() {
        let parsed =
            Harness::parse_from(["op", "--mon-out-timeout", "0", "--http-port", "9090"]).config;
        assert_eq!(parsed.mon_out_timeout(), Duration::ZERO);
        assert_eq!(parsed.http_port, 9090);
        assert!(parsed.leader_election);

        let parsed = Harness::parse_from(["op", "--leader-election", "false"]).config;
        assert!(!parsed.leader_election);
    }
}
