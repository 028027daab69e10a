//! Error types for forkrace-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForkraceError {
    /// Process-state or descriptor-table query failed
    #[error("introspection of pid {pid} failed: {reason}")]
    Introspection { pid: i32, reason: String },

    /// Container create/start/stop or init pid lookup failed
    #[error("container {name}: {reason}")]
    Container { name: String, reason: String },

    #[error("descriptor generator failed: {0}")]
    Generator(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ForkraceError {
    pub(crate) fn introspection(pid: nix::unistd::Pid, reason: impl Into<String>) -> Self {
        Self::Introspection {
            pid: pid.as_raw(),
            reason: reason.into(),
        }
    }

    pub(crate) fn container(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Container {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Prefix the reason of an introspection or container error with context
    #[must_use]
    pub fn context(self, what: &str) -> Self {
        match self {
            Self::Introspection { pid, reason } => Self::Introspection {
                pid,
                reason: format!("{what}: {reason}"),
            },
            Self::Container { name, reason } => Self::Container {
                name,
                reason: format!("{what}: {reason}"),
            },
            other => other,
        }
    }
}
