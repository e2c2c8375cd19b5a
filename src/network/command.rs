//! Execution of the `ip` and `iptables` tools
//!
//! Every OS change goes through one of these tools and blocks until the tool
//! exits. Failures are classified from the tool's stderr so that callers can
//! tell a name collision from a missing entity or a privilege problem.

use crate::error::{Error, ErrorKind, Result};
use std::process::Command;
use tracing::debug;

/// Run a tool and return its stdout
///
/// `entity` names the object the command acts on and ends up in the error.
pub fn run(program: &str, args: &[&str], entity: &str) -> Result<String> {
    debug!(command = %format!("{} {}", program, args.join(" ")), entity, "exec");

    let output = Command::new(program).args(args).output().map_err(|e| {
        let kind = if e.kind() == std::io::ErrorKind::NotFound {
            ErrorKind::Environment
        } else {
            ErrorKind::Unknown
        };
        Error::os(kind, entity, format!("failed to run {}: {}", program, e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::os(classify(&stderr), entity, format!("{}: {}", program, stderr)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run `ip` in the root namespace or, when `netns` is set, inside it
pub fn ip(netns: Option<&str>, args: &[&str], entity: &str) -> Result<String> {
    match netns {
        Some(ns) => {
            let mut full = vec!["-n", ns];
            full.extend_from_slice(args);
            run("ip", &full, entity)
        }
        None => run("ip", args, entity),
    }
}

/// Run `iptables` against the nat table
pub fn iptables_nat(args: &[&str], entity: &str) -> Result<String> {
    let mut full = vec!["-w", "-t", "nat"];
    full.extend_from_slice(args);
    run("iptables", &full, entity)
}

/// Map tool stderr to an error kind
pub fn classify(stderr: &str) -> ErrorKind {
    let s = stderr.to_ascii_lowercase();

    if s.contains("file exists") || s.contains("already exists") {
        ErrorKind::Conflict
    } else if s.contains("operation not permitted")
        || s.contains("permission denied")
        || s.contains("must be root")
        || s.contains("not supported")
        || s.contains("unknown device type")
        || s.contains("can't initialize iptables table")
    {
        ErrorKind::Environment
    } else if s.contains("cannot find device")
        || s.contains("does not exist")
        || s.contains("no such file or directory")
        || s.contains("no such device")
        || s.contains("no such process")
        || s.contains("cannot open network namespace")
        || s.contains("does a matching rule exist")
    {
        ErrorKind::NotFound
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_conflict() {
        assert_eq!(classify("RTNETLINK answers: File exists"), ErrorKind::Conflict);
        assert_eq!(
            classify("Cannot create namespace file \"/run/netns/test-ns\": File exists"),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_classify_not_found() {
        assert_eq!(classify("Cannot find device \"veth0\""), ErrorKind::NotFound);
        assert_eq!(classify("Device \"veth0\" does not exist."), ErrorKind::NotFound);
        assert_eq!(
            classify("Cannot open network namespace \"test-ns\": No such file or directory"),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify("iptables: Bad rule (does a matching rule exist in that chain?)."),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_classify_environment() {
        assert_eq!(classify("RTNETLINK answers: Operation not permitted"), ErrorKind::Environment);
        assert_eq!(
            classify("iptables v1.8.9 (nf_tables): Permission denied (you must be root)"),
            ErrorKind::Environment
        );
        assert_eq!(
            classify("Error: Unknown device type."),
            ErrorKind::Environment
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify("RTNETLINK answers: Device or resource busy"), ErrorKind::Unknown);
        assert_eq!(classify(""), ErrorKind::Unknown);
    }

    #[test]
    fn test_missing_tool_is_environment() {
        let err = run("netpath-definitely-missing-tool", &[], "check").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Environment);
    }
}
