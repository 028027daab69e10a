//! Container lifecycle collaborators
//!
//! The race only needs a container whose start performs a fork/exec of its
//! init process. Drivers:
//! - `lxc` - the LXC command-line tools (`lxc-start`, `lxc-stop`, `lxc-info`)

pub mod lxc;

pub use self::lxc::{LxcContainer, LxcDriver};

use crate::Result;
use nix::unistd::Pid;
use std::path::Path;

/// Creates handles to named containers
pub trait ContainerDriver {
    type Container: Container;

    /// Get a handle to `name` under `lxcpath` without starting it
    fn create(&self, name: &str, lxcpath: &Path) -> Result<Self::Container>;
}

/// A handle to one container
pub trait Container {
    fn name(&self) -> &str;

    /// Start the container; blocks through the fork/exec of its init process
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Pid of the init process as seen from the host
    fn init_pid(&self) -> Result<Pid>;
}
