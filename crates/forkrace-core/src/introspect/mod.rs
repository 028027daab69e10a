//! Process introspection
//!
//! Two queries drive leak detection:
//! - the parent of a pid (to climb from the container's init to the process
//!   that actually forked it)
//! - the FIFO inodes a pid currently holds open
//!
//! The mechanism is swappable:
//! - `procfs` - read `/proc/<pid>/status` and `/proc/<pid>/fd` directly
//! - `helper` - shell out through a privileged helper (`sudo cat`, `sudo lsof`)

pub mod helper;
pub mod procfs;

pub use self::helper::HelperIntrospector;
pub use self::procfs::ProcfsIntrospector;

use crate::{ForkraceError, Result};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kernel inode of an open pipe end; only meaningful for equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorInode(pub u64);

impl fmt::Display for DescriptorInode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Queries against live process state
///
/// Implementations never cache: the process tree and descriptor tables change
/// between calls.
pub trait ProcessIntrospector {
    /// Parent pid recorded for `pid`
    fn parent_pid(&self, pid: Pid) -> Result<Pid>;

    /// Inodes of every FIFO descriptor `pid` holds, in descriptor order
    ///
    /// An empty vector means the process holds no FIFOs.
    fn fifo_inodes(&self, pid: Pid) -> Result<Vec<DescriptorInode>>;
}

impl<T: ProcessIntrospector + ?Sized> ProcessIntrospector for Box<T> {
    fn parent_pid(&self, pid: Pid) -> Result<Pid> {
        (**self).parent_pid(pid)
    }

    fn fifo_inodes(&self, pid: Pid) -> Result<Vec<DescriptorInode>> {
        (**self).fifo_inodes(pid)
    }
}

/// Extract the `PPid:` field from a `/proc/<pid>/status` record
pub fn parse_ppid(status: &str, pid: Pid) -> Result<Pid> {
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("PPid:") {
            let trimmed = rest.trim();
            return parse_positive_pid(trimmed)
                .ok_or_else(|| ForkraceError::introspection(pid, format!("invalid PPid value: '{trimmed}'")));
        }
    }

    Err(ForkraceError::introspection(pid, "PPid field not found"))
}

/// Parse a strictly positive pid
pub fn parse_positive_pid(raw: &str) -> Option<Pid> {
    match raw.parse::<i32>() {
        Ok(value) if value > 0 => Some(Pid::from_raw(value)),
        _ => None,
    }
}

/// Inode of an anonymous pipe from a `/proc/<pid>/fd/<n>` link target
///
/// The kernel renders pipe ends as `pipe:[<inode>]`.
pub fn parse_pipe_link(target: &str) -> Option<DescriptorInode> {
    target
        .strip_prefix("pipe:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
        .map(DescriptorInode)
}
