//! Anonymous pipe allocation for the descriptor generator

use crate::Result;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd;
use serde::{Deserialize, Serialize};
use std::os::fd::OwnedFd;

/// How close-on-exec is applied to freshly created pipe ends
///
/// Drivers that exec a helper to start the container (`lxc-start`) drop
/// every `O_CLOEXEC` descriptor at the exec, so only `Split` leaves a window
/// for a leak to cross into the fork point. `Atomic` is useful against
/// drivers that fork in-process without exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipeMode {
    /// `pipe2(O_CLOEXEC)`: the flag is set in the same syscall
    Atomic,
    /// `pipe()` then `fcntl(F_SETFD, FD_CLOEXEC)` on each end; a fork in
    /// between inherits both ends across exec
    #[default]
    Split,
}

/// Create a pipe (returns read end, write end)
pub fn open_pipe(mode: PipeMode) -> Result<(OwnedFd, OwnedFd)> {
    let (read_end, write_end) = match mode {
        PipeMode::Atomic => unistd::pipe2(OFlag::O_CLOEXEC)?,
        PipeMode::Split => unistd::pipe()?,
    };

    if mode == PipeMode::Split {
        set_cloexec(&read_end)?;
        set_cloexec(&write_end)?;
    }

    Ok((read_end, write_end))
}

fn set_cloexec(fd: &OwnedFd) -> Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}
