//! Centralized configuration for trellis RPC.
//!
//! [`RpcConfig`] holds the per-deployment identity of a process (its
//! namespace, default service name and port). [`RpcDefaults`] groups the
//! fixed tunables used by discovery, registration and the call path.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed tunables.
pub struct RpcDefaults;

impl RpcDefaults {
    // Call path
    pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(8);
    pub const SERVER_TIMEOUT: Duration = Duration::from_secs(10);
    /// Added to a configured server timeout so the server side never gives
    /// up before the client's own deadline.
    pub const SERVER_TIMEOUT_GRACE: Duration = Duration::from_secs(2);

    // Registration
    pub const REGISTRATION_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
    pub const LEASE_TTL_SECS: i64 = 10;
    pub const LEASE_RETRY_DELAY: Duration = Duration::from_secs(5);

    // Discovery
    pub const DISCOVERY_DEBOUNCE: Duration = Duration::from_secs(1);
    pub const WATCH_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

    // Shutdown
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

    pub const REGISTRY_PREFIX: &'static str = "/rpc-services";
    pub const SERVICE_DOMAIN_SUFFIX: &'static str = "cluster.local";
    pub const SERVICE_NAME: &'static str = "localhost";
    pub const NAMESPACE: &'static str = "localhost";
    pub const SERVER_PORT: u16 = 28000;
    pub const POD_NAME: &'static str = "pod";
}

/// Deployment identity of the current process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Cluster DNS suffix used for cross-namespace URLs.
    pub service_domain_suffix: String,
    /// Service name used when a method does not set one explicitly.
    pub service_name: String,
    /// Namespace this process runs in; same-namespace instances are preferred.
    pub namespace: String,
    /// Port used when a method does not set one explicitly.
    pub server_port: u16,
    /// Unique name of this process, the last segment of registration keys.
    pub pod_name: String,
    /// Key prefix under which registrations live in the coordination store.
    pub registry_prefix: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            service_domain_suffix: RpcDefaults::SERVICE_DOMAIN_SUFFIX.to_string(),
            service_name: RpcDefaults::SERVICE_NAME.to_string(),
            namespace: RpcDefaults::NAMESPACE.to_string(),
            server_port: RpcDefaults::SERVER_PORT,
            pod_name: RpcDefaults::POD_NAME.to_string(),
            registry_prefix: RpcDefaults::REGISTRY_PREFIX.to_string(),
        }
    }
}

impl RpcConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_pod_name(mut self, pod_name: impl Into<String>) -> Self {
        self.pod_name = pod_name.into();
        self
    }
}
