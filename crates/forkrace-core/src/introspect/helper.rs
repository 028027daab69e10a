//! Introspection through a privileged helper process
//!
//! Runs `cat /proc/<pid>/status` and `lsof -p <pid>` under an elevation
//! prefix (`sudo -n` by default) and parses their output.

use super::{parse_ppid, DescriptorInode, ProcessIntrospector};
use crate::{ForkraceError, Result};
use nix::unistd::Pid;
use std::process::{Command, Stdio};

/// Column holding the descriptor type in default `lsof` output
const LSOF_TYPE_COLUMN: usize = 4;
/// Column holding the node (inode) in default `lsof` output
const LSOF_NODE_COLUMN: usize = 7;

#[derive(Debug, Clone)]
pub struct HelperIntrospector {
    /// Elevation prefix, e.g. `["sudo", "-n"]`; empty runs helpers directly
    elevate: Vec<String>,
}

impl Default for HelperIntrospector {
    fn default() -> Self {
        Self::new(["sudo", "-n"])
    }
}

impl HelperIntrospector {
    pub fn new<I, S>(elevate: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            elevate: elevate.into_iter().map(Into::into).collect(),
        }
    }

    /// Run helpers without any elevation prefix
    #[must_use]
    pub fn unprivileged() -> Self {
        Self { elevate: Vec::new() }
    }

    fn run(&self, pid: Pid, program: &str, args: &[String]) -> Result<String> {
        let mut argv = self.elevate.iter().map(String::as_str).chain([program]);
        // argv always has at least `program`
        let head = argv.next().unwrap_or(program);

        let mut cmd = Command::new(head);
        cmd.args(argv)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::trace!(pid = pid.as_raw(), ?cmd, "running introspection helper");

        let output = cmd
            .output()
            .map_err(|e| ForkraceError::introspection(pid, format!("spawning {program}: {e}")))?;

        if !output.status.success() {
            return Err(ForkraceError::introspection(
                pid,
                format!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| ForkraceError::introspection(pid, format!("{program} output is not utf-8: {e}")))
    }
}

impl ProcessIntrospector for HelperIntrospector {
    fn parent_pid(&self, pid: Pid) -> Result<Pid> {
        let status = self.run(pid, "cat", &[format!("/proc/{pid}/status")])?;
        parse_ppid(&status, pid)
    }

    fn fifo_inodes(&self, pid: Pid) -> Result<Vec<DescriptorInode>> {
        let listing = self.run(pid, "lsof", &["-p".into(), pid.to_string()])?;
        parse_lsof_fifos(&listing, pid)
    }
}

/// Pull the inode of every FIFO row out of default `lsof` output
///
/// ```text
/// COMMAND   PID USER   FD   TYPE DEVICE SIZE/OFF    NODE NAME
/// main    10676 root    3r  FIFO   0,12      0t0  123456 pipe
/// ```
pub fn parse_lsof_fifos(listing: &str, pid: Pid) -> Result<Vec<DescriptorInode>> {
    let mut inodes = Vec::new();

    for line in listing.lines().skip_while(|l| l.starts_with("COMMAND")) {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.get(LSOF_TYPE_COLUMN) != Some(&"FIFO") {
            continue;
        }

        let node = columns
            .get(LSOF_NODE_COLUMN)
            .ok_or_else(|| ForkraceError::introspection(pid, format!("truncated lsof row: '{line}'")))?;
        let inode = node
            .parse::<u64>()
            .map_err(|_| ForkraceError::introspection(pid, format!("invalid lsof node: '{node}'")))?;
        inodes.push(DescriptorInode(inode));
    }

    Ok(inodes)
}
