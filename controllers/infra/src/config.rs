//! Controller configuration, read once from environment variables.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_CLOUD_AGENT_URL: &str = "http://cloud-agent.fleet-system:8080";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// How the cloud agent token is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// `CLOUD_AGENT_TOKEN`
    Static(String),
    /// `CLOUD_AGENT_TOKEN_FILE`
    File(PathBuf),
}

/// Reconcile concurrency per watched kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concurrency {
    pub cluster: u16,
    pub load_balancer: u16,
    pub machine: u16,
    pub virtual_machine: u16,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self { cluster: 5, load_balancer: 5, machine: 10, virtual_machine: 10 }
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub cloud_agent_url: String,
    pub token: TokenSource,
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    pub concurrency: Concurrency,
    pub metrics_addr: SocketAddr,
}

impl ControllerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cloud_agent_url = get("CLOUD_AGENT_URL").unwrap_or_else(|| DEFAULT_CLOUD_AGENT_URL.to_string());

        let token = match (get("CLOUD_AGENT_TOKEN"), get("CLOUD_AGENT_TOKEN_FILE")) {
            (Some(token), _) => TokenSource::Static(token),
            (None, Some(path)) => TokenSource::File(PathBuf::from(path)),
            (None, None) => {
                return Err(ControllerError::InvalidConfig(
                    "CLOUD_AGENT_TOKEN or CLOUD_AGENT_TOKEN_FILE environment variable is required".to_string(),
                ));
            }
        };

        let defaults = Concurrency::default();
        let concurrency = Concurrency {
            cluster: parse_number(&get, "CLUSTER_CONCURRENCY", defaults.cluster)?,
            load_balancer: parse_number(&get, "LOADBALANCER_CONCURRENCY", defaults.load_balancer)?,
            machine: parse_number(&get, "MACHINE_CONCURRENCY", defaults.machine)?,
            virtual_machine: parse_number(&get, "VIRTUALMACHINE_CONCURRENCY", defaults.virtual_machine)?,
        };

        let metrics_addr = get("METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string())
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR: {}", e)))?;

        Ok(Self {
            cloud_agent_url,
            token,
            namespace: get("WATCH_NAMESPACE"),
            concurrency,
            metrics_addr,
        })
    }
}

fn parse_number<G>(get: &G, key: &str, default: u16) -> Result<u16, ControllerError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u16>() {
            Ok(0) => Err(ControllerError::InvalidConfig(format!("{} must be at least 1", key))),
            Ok(n) => Ok(n),
            Err(e) => Err(ControllerError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
        },
    }
}
