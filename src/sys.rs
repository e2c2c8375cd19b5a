//! Host environment detection for `netpath check`

use crate::error::{Error, Result};
use crate::network::NetHost;
use std::env;
use std::ffi::{CStr, OsStr};
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Tools the system host shells out to
pub const REQUIRED_TOOLS: &[&str] = &["ip", "iptables"];

/// Linux kernel version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: Option<u16>,
    /// Distribution suffix (e.g. `fc-v130` in `6.18.44-fc-v130`)
    pub local: Option<String>,
}

impl KernelVersion {
    /// Detect the running kernel version
    ///
    /// Uses native `uname(2)` rather than spawning a process.
    pub fn detect() -> Result<Self> {
        let mut utsname: libc::utsname = unsafe { std::mem::zeroed() };

        let result = unsafe { libc::uname(&mut utsname) };

        if result != 0 {
            return Err(Error::OutputParse {
                command: "uname(2)".to_string(),
                message: format!("uname syscall failed with code {}", result),
            });
        }

        let release = unsafe { CStr::from_ptr(utsname.release.as_ptr()) };
        let release = release.to_str().map_err(|e| Error::OutputParse {
            command: "uname(2)".to_string(),
            message: format!("Invalid UTF-8 in uname.release: {}", e),
        })?;

        Self::parse(release)
    }

    /// Parse a kernel release string like `6.8.0-45-generic`
    fn parse(s: &str) -> Result<Self> {
        let invalid = |what: &str| Error::OutputParse {
            command: "uname(2)".to_string(),
            message: format!("Invalid kernel release '{}': {}", s, what),
        };

        let (version, local) = match s.split_once('-') {
            Some((v, l)) => (v, Some(l.to_string())),
            None => (s, None),
        };

        let mut nums = version.split('.');
        let major = nums
            .next()
            .and_then(|n| n.parse::<u16>().ok())
            .ok_or_else(|| invalid("bad major version"))?;
        let minor = nums
            .next()
            .and_then(|n| n.parse::<u16>().ok())
            .ok_or_else(|| invalid("bad minor version"))?;
        let patch = match nums.next() {
            Some(n) => Some(n.parse::<u16>().map_err(|_| invalid("bad patch level"))?),
            None => None,
        };

        Ok(KernelVersion {
            major,
            minor,
            patch,
            local,
        })
    }

    /// Whether `ip -j` JSON output and `ip -n` are backed by the kernel
    ///
    /// Netlink strict checking arrived in 4.20; older kernels work but can
    /// report addresses of every interface when one is asked for.
    pub fn supports_strict_netlink(&self) -> bool {
        (self.major, self.minor) >= (4, 20)
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(patch) = self.patch {
            write!(f, ".{}", patch)?;
        }
        if let Some(local) = &self.local {
            write!(f, "-{}", local)?;
        }
        Ok(())
    }
}

/// Locate an executable on a PATH-style search list
pub fn find_in_path(tool: &str, search: &OsStr) -> Option<PathBuf> {
    env::split_paths(search)
        .map(|dir| dir.join(tool))
        .find(|candidate| {
            candidate
                .metadata()
                .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        })
}

/// Result of one environment check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckResult {
    fn new(name: &str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<10} {}",
            if self.ok { " OK " } else { "FAIL" },
            self.name,
            self.detail
        )
    }
}

/// Check everything a provisioning run depends on
pub fn preflight<H: NetHost>(host: &H, bridge: Option<&str>) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let euid = nix::unistd::geteuid();
    results.push(CheckResult::new(
        "privilege",
        euid.is_root(),
        format!("effective uid {}", euid),
    ));

    results.push(match KernelVersion::detect() {
        Ok(kernel) if kernel.supports_strict_netlink() => CheckResult::new("kernel", true, kernel.to_string()),
        Ok(kernel) => CheckResult::new(
            "kernel",
            true,
            format!("{} (pre-4.20, address queries are not strict)", kernel),
        ),
        Err(e) => CheckResult::new("kernel", false, e.to_string()),
    });

    let search = env::var_os("PATH").unwrap_or_default();
    for tool in REQUIRED_TOOLS {
        results.push(match find_in_path(tool, &search) {
            Some(path) => CheckResult::new(tool, true, path.display().to_string()),
            None => CheckResult::new(tool, false, "not found on PATH"),
        });
    }

    if let Some(name) = bridge {
        results.push(match host.link(name, None) {
            Ok(Some(link)) if link.kind.as_deref() == Some("bridge") => {
                CheckResult::new("bridge", true, format!("{} ({})", name, if link.up { "up" } else { "down" }))
            }
            Ok(Some(link)) => CheckResult::new(
                "bridge",
                false,
                format!("{} is a {} device", name, link.kind.as_deref().unwrap_or("unknown")),
            ),
            Ok(None) => CheckResult::new("bridge", false, format!("{} does not exist", name)),
            Err(e) => CheckResult::new("bridge", false, e.to_string()),
        });
    }

    results
}
