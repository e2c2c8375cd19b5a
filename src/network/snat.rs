//! Source NAT rules for the test path
//!
//! Traffic leaving the uplink bridge towards the target host gets its source
//! rewritten to an address the LAN already associates with this host, so
//! replies come back without the LAN learning the isolated prefix. Rules are
//! tagged with an iptables comment so they can be found again.

use crate::error::{Error, ErrorKind, Result};
use crate::network::NetHost;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{info, warn};

/// Comment tag carried by every rule netpath installs
pub const DEFAULT_TAG: &str = "netpath";

/// An SNAT rule in the nat POSTROUTING chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnatRule {
    /// Egress interface (the uplink bridge)
    pub uplink: String,
    /// Address the LAN should see as source
    pub replacement: Ipv4Addr,
    /// LAN host the rule applies to
    pub target: Ipv4Addr,
    /// Comment tag identifying our rules
    pub tag: String,
}

impl SnatRule {
    /// Create a rule with the default tag
    pub fn new(uplink: &str, replacement: Ipv4Addr, target: Ipv4Addr) -> Self {
        Self {
            uplink: uplink.to_string(),
            replacement,
            target,
            tag: DEFAULT_TAG.to_string(),
        }
    }

    /// Use a different comment tag
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    /// Rule specification as iptables arguments (without `-A`/`-D` and chain)
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            self.uplink.clone(),
            "-d".to_string(),
            format!("{}/32", self.target),
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            self.tag.clone(),
            "-j".to_string(),
            "SNAT".to_string(),
            "--to-source".to_string(),
            self.replacement.to_string(),
        ]
    }

    /// Parse one line of `iptables -t nat -S POSTROUTING`
    ///
    /// Returns `None` for anything that is not a tagged SNAT rule with a
    /// single-host destination and a fixed replacement address.
    pub fn parse_rule_spec(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"-A") || tokens.get(1) != Some(&"POSTROUTING") {
            return None;
        }

        let value = |flag: &str| -> Option<&str> {
            tokens
                .iter()
                .position(|t| *t == flag)
                .and_then(|i| tokens.get(i + 1))
                .copied()
        };

        if value("-j")? != "SNAT" {
            return None;
        }

        let target = value("-d")?;
        let target = target.strip_suffix("/32").unwrap_or(target).parse().ok()?;
        let replacement = value("--to-source")?.parse().ok()?;
        let uplink = value("-o")?.to_string();
        let tag = value("--comment")?.trim_matches('"').to_string();

        Some(Self {
            uplink,
            replacement,
            target,
            tag,
        })
    }
}

impl fmt::Display for SnatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snat on {} to {} -> {} [{}]",
            self.uplink, self.target, self.replacement, self.tag
        )
    }
}

/// Install the rule unless an identical one is already active
///
/// Returns `true` when a rule was inserted, `false` when it was already there.
pub fn install<H: NetHost>(host: &H, rule: &SnatRule) -> Result<bool> {
    if host.nat_rules()?.iter().any(|r| r == rule) {
        info!(rule = %rule, "snat rule already active");
        return Ok(false);
    }

    host.append_nat_rule(rule)?;
    info!(rule = %rule, "snat rule installed");
    Ok(true)
}

/// Remove the rule
///
/// A missing rule is reported as `NotFound`; callers tearing down treat it as
/// a warning.
pub fn remove<H: NetHost>(host: &H, rule: &SnatRule) -> Result<()> {
    if !host.nat_rules()?.iter().any(|r| r == rule) {
        return Err(Error::os(
            ErrorKind::NotFound,
            rule.uplink.as_str(),
            format!("no active rule matching {}", rule),
        ));
    }

    // Duplicates left by other tools are removed too
    while host.nat_rules()?.iter().any(|r| r == rule) {
        if let Err(e) = host.delete_nat_rule(rule) {
            if e.is_not_found() {
                warn!(rule = %rule, "snat rule vanished during removal");
                break;
            }
            return Err(e);
        }
    }

    info!(rule = %rule, "snat rule removed");
    Ok(())
}
