//! # forkrace-core
//!
//! Reproduce and detect a close-on-exec race across a container fork/exec.
//!
//! A supervising process that forks while another thread is allocating
//! descriptors can hand those descriptors to its child if `FD_CLOEXEC` is not
//! applied atomically. This crate builds that window on purpose:
//! - a background task churns anonymous pipes (`generator`)
//! - the container is started through a blocking driver call (`container`)
//! - the fork-point process is resolved from the init pid (`introspect`)
//! - its FIFO inodes are intersected with our own (`attempt`)
//! - attempts repeat until a leak shows up (`retry`)

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod attempt;
pub mod config;
pub mod container;
pub mod error;
pub mod generator;
pub mod introspect;
pub mod pipe;
pub mod report;
pub mod retry;

#[cfg(test)]
mod testing;

pub use attempt::{AttemptOutcome, AttemptReport, RaceAttempt};
pub use config::{RaceConfig, StopMode};
pub use error::ForkraceError;
pub use introspect::{DescriptorInode, ProcessIntrospector};
pub use pipe::PipeMode;
pub use report::RaceReport;
pub use retry::{RetryLoop, RunOutcome};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, ForkraceError>;
