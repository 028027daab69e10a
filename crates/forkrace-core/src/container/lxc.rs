//! LXC driver backed by the lxc-* command-line tools
//!
//! The fork point is reached through an exec of `lxc-start`, so only
//! descriptors that lack `FD_CLOEXEC` when we fork can leak into it.

use super::{Container, ContainerDriver};
use crate::introspect::parse_positive_pid;
use crate::{ForkraceError, Result};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

#[derive(Debug, Clone, Default)]
pub struct LxcDriver;

impl LxcDriver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ContainerDriver for LxcDriver {
    type Container = LxcContainer;

    fn create(&self, name: &str, lxcpath: &Path) -> Result<LxcContainer> {
        if name.is_empty() {
            return Err(ForkraceError::container(name, "empty container name"));
        }

        let config = lxcpath.join(name).join("config");
        if !config.is_file() {
            return Err(ForkraceError::container(
                name,
                format!("no container definition at {}", config.display()),
            ));
        }

        tracing::debug!(container = name, lxcpath = %lxcpath.display(), "container handle created");

        Ok(LxcContainer {
            name: name.to_string(),
            lxcpath: lxcpath.to_path_buf(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LxcContainer {
    name: String,
    lxcpath: PathBuf,
}

impl LxcContainer {
    fn lxc(&self, tool: &str, extra: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(tool);
        cmd.arg("-n")
            .arg(&self.name)
            .arg("-P")
            .arg(&self.lxcpath)
            .args(extra)
            .stdin(Stdio::null());

        tracing::debug!(container = %self.name, ?cmd, "running lxc tool");

        let output = cmd
            .output()
            .map_err(|e| ForkraceError::container(&self.name, format!("spawning {tool}: {e}")))?;

        if !output.status.success() {
            return Err(ForkraceError::container(
                &self.name,
                format!(
                    "{tool} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(output)
    }
}

impl Container for LxcContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        self.lxc("lxc-start", &["-d"])?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.lxc("lxc-stop", &[])?;
        Ok(())
    }

    fn init_pid(&self) -> Result<Pid> {
        let output = self.lxc("lxc-info", &["-p", "-H"])?;
        parse_info_pid(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| ForkraceError::container(&self.name, "container has no init pid (not running?)"))
    }
}

/// Parse `lxc-info -p -H` output; `-1` or nothing means not running
fn parse_info_pid(stdout: &str) -> Option<Pid> {
    parse_positive_pid(stdout.trim())
}
