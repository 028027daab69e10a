//! Direct procfs reads

use super::{parse_pipe_link, parse_ppid, DescriptorInode, ProcessIntrospector};
use crate::{ForkraceError, Result};
use nix::unistd::Pid;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Upper bound on bytes read from a `status` record
const MAX_STATUS_READ_SIZE: u64 = 4096;

/// Reads process state from a procfs mount
///
/// Reading another user's `fd` directory needs the same privilege `lsof`
/// would; run as root (or with `CAP_SYS_PTRACE`) to inspect the container
/// supervisor.
#[derive(Debug, Clone)]
pub struct ProcfsIntrospector {
    root: PathBuf,
}

impl Default for ProcfsIntrospector {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsIntrospector {
    /// Introspect through a procfs mounted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pid_dir(&self, pid: Pid) -> PathBuf {
        self.root.join(pid.as_raw().to_string())
    }
}

impl ProcessIntrospector for ProcfsIntrospector {
    fn parent_pid(&self, pid: Pid) -> Result<Pid> {
        let status = read_bounded(&self.pid_dir(pid).join("status"))
            .map_err(|e| ForkraceError::introspection(pid, format!("reading status: {e}")))?;
        parse_ppid(&status, pid)
    }

    fn fifo_inodes(&self, pid: Pid) -> Result<Vec<DescriptorInode>> {
        let fd_dir = self.pid_dir(pid).join("fd");
        let entries = fs::read_dir(&fd_dir)
            .map_err(|e| ForkraceError::introspection(pid, format!("listing {}: {e}", fd_dir.display())))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| ForkraceError::introspection(pid, format!("listing fd table: {e}")))?;

            let Some(fd) = entry.file_name().to_str().and_then(|name| name.parse::<i32>().ok()) else {
                continue;
            };

            match fifo_inode(&entry.path()) {
                Ok(Some(inode)) => found.push((fd, inode)),
                Ok(None) => {}
                // Closed between listing and lookup
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ForkraceError::introspection(pid, format!("inspecting fd {fd}: {e}")));
                }
            }
        }

        found.sort_unstable_by_key(|(fd, _)| *fd);
        Ok(found.into_iter().map(|(_, inode)| inode).collect())
    }
}

/// Inode behind one `fd/<n>` link, if it is a FIFO
fn fifo_inode(link: &Path) -> io::Result<Option<DescriptorInode>> {
    let target = fs::read_link(link)?;

    if let Some(inode) = target.to_str().and_then(parse_pipe_link) {
        return Ok(Some(inode));
    }

    // Named pipes show up as a filesystem path
    match fs::metadata(link) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(Some(DescriptorInode(meta.ino()))),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_bounded(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut content = String::with_capacity(1024);
    BufReader::new(file)
        .take(MAX_STATUS_READ_SIZE)
        .read_to_string(&mut content)?;
    Ok(content)
}
