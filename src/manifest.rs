//! Configuration file parsing for netpath
//!
//! Parses `netpath.toml` configuration files using serde. Every `[path]`
//! value can also come from the command line, which overrides the file.

use crate::error::{Error, Result};
use crate::network::snat::{DEFAULT_TAG, SnatRule};
use crate::network::{netns, veth, AddressPlan};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG: &str = "netpath.toml";

/// Load configuration from a file
pub fn load(path: &Path) -> Result<NetpathConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: NetpathConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the default file is absent
///
/// An explicitly named file must exist.
pub fn load_or_default(path: &Path, explicit: bool) -> Result<NetpathConfig> {
    if !explicit && !path.exists() {
        return Ok(NetpathConfig::default());
    }
    load(path)
}

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct NetpathConfig {
    /// The test path to provision
    #[serde(default)]
    pub path: PathConfig,

    /// Retry/backoff for transient OS failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session lock
    #[serde(default)]
    pub lock: LockConfig,
}

/// Test path definition
///
/// All fields are optional here so the command line can fill the gaps;
/// `resolve` enforces the required ones.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PathConfig {
    /// Existing LAN bridge (uplink)
    pub bridge: Option<String>,

    /// Source address the LAN sees for namespace traffic
    pub nat_address: Option<Ipv4Addr>,

    /// LAN host the namespace talks to
    pub target: Option<Ipv4Addr>,

    /// Isolated subnet shared by both endpoints (e.g., "1.1.1.0/24")
    pub subnet: Option<Ipv4Net>,

    /// Isolated namespace name
    pub namespace: Option<String>,

    /// Root-side endpoint name (A)
    pub host_endpoint: Option<String>,

    /// Namespace-side endpoint name (B)
    pub namespace_endpoint: Option<String>,

    /// Override for A's address (defaults to first host as /32)
    pub host_address: Option<Ipv4Net>,

    /// Override for B's address (defaults to first host)
    pub namespace_address: Option<Ipv4Addr>,

    /// Override for the namespace default-route next hop (defaults to second host)
    pub gateway: Option<Ipv4Addr>,

    /// iptables comment identifying our NAT rule
    pub nat_tag: Option<String>,
}

impl PathConfig {
    /// Merge another PathConfig into this one
    /// Other's values override self's where specified
    pub fn merge(self, other: PathConfig) -> PathConfig {
        PathConfig {
            bridge: other.bridge.or(self.bridge),
            nat_address: other.nat_address.or(self.nat_address),
            target: other.target.or(self.target),
            subnet: other.subnet.or(self.subnet),
            namespace: other.namespace.or(self.namespace),
            host_endpoint: other.host_endpoint.or(self.host_endpoint),
            namespace_endpoint: other.namespace_endpoint.or(self.namespace_endpoint),
            host_address: other.host_address.or(self.host_address),
            namespace_address: other.namespace_address.or(self.namespace_address),
            gateway: other.gateway.or(self.gateway),
            nat_tag: other.nat_tag.or(self.nat_tag),
        }
    }

    /// Resolve into a validated, fully specified path
    pub fn resolve(&self) -> Result<PathSpec> {
        let bridge = required(&self.bridge, "bridge")?;
        let nat_address = required(&self.nat_address, "nat_address")?;
        let target = required(&self.target, "target")?;
        let subnet = required(&self.subnet, "subnet")?;

        let namespace = self.namespace.clone().unwrap_or_else(default_namespace);
        let host_endpoint = self.host_endpoint.clone().unwrap_or_else(default_host_endpoint);
        let namespace_endpoint = self
            .namespace_endpoint
            .clone()
            .unwrap_or_else(default_namespace_endpoint);
        let nat_tag = self.nat_tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string());

        veth::validate_name(&bridge)?;
        veth::validate_name(&host_endpoint)?;
        veth::validate_name(&namespace_endpoint)?;
        netns::validate_name(&namespace)?;

        if host_endpoint == namespace_endpoint {
            return Err(Error::ConfigValidation(format!(
                "Endpoint names must differ (both are '{}')",
                host_endpoint
            )));
        }
        if bridge == host_endpoint || bridge == namespace_endpoint {
            return Err(Error::ConfigValidation(format!(
                "Bridge '{}' cannot also be a veth endpoint",
                bridge
            )));
        }
        if nat_tag.is_empty() || !nat_tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::ConfigValidation(format!(
                "NAT tag '{}' may only contain letters, digits, '-' and '_'",
                nat_tag
            )));
        }

        let mut plan = AddressPlan::from_subnet(subnet)?;
        if let Some(addr) = self.host_address {
            plan = plan.with_host_side(addr);
        }
        if let Some(addr) = self.namespace_address {
            plan = plan.with_namespace_side(addr)?;
        }
        if let Some(gateway) = self.gateway {
            plan = plan.with_gateway(gateway)?;
        }
        plan.validate()?;

        Ok(PathSpec {
            snat: SnatRule::new(&bridge, nat_address, target).with_tag(&nat_tag),
            bridge,
            namespace,
            host_endpoint,
            namespace_endpoint,
            plan,
        })
    }
}

/// A fully resolved test path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub bridge: String,
    pub namespace: String,
    pub host_endpoint: String,
    pub namespace_endpoint: String,
    pub plan: AddressPlan,
    pub snat: SnatRule,
}

fn required<T: Clone>(value: &Option<T>, field: &str) -> Result<T> {
    value.clone().ok_or_else(|| {
        Error::ConfigValidation(format!(
            "Missing '{}' (set it under [path] or pass it on the command line)",
            field
        ))
    })
}

fn default_namespace() -> String {
    "test-ns".into()
}

fn default_host_endpoint() -> String {
    "veth0".into()
}

fn default_namespace_endpoint() -> String {
    "veth1".into()
}

/// Retry configuration for transient OS failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Base delay in milliseconds before first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum number of attempts per transition
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Jitter factor (0.0-1.0) to randomize delays
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u8 {
    3
}

fn default_jitter_factor() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Session lock configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Take an exclusive lock per namespace while provisioning or tearing down
    #[serde(default = "default_lock_enabled")]
    pub enabled: bool,

    /// Directory holding lock files
    #[serde(default = "default_lock_dir")]
    pub dir: PathBuf,
}

fn default_lock_enabled() -> bool {
    true
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/run/lock")
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: default_lock_enabled(),
            dir: default_lock_dir(),
        }
    }
}
