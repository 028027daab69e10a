//! One race attempt: churn descriptors while the container forks its init,
//! then look for our descriptors in the forking process

use crate::config::StopMode;
use crate::container::{Container, ContainerDriver};
use crate::generator::{DescriptorGenerator, GeneratedDescriptors};
use crate::introspect::{DescriptorInode, ProcessIntrospector};
use crate::{RaceConfig, Result};
use nix::unistd::Pid;
use std::collections::{BTreeSet, HashSet};

/// The process that forked the container's init, and the init itself
///
/// The init pid reported by the container runtime sits one level below the
/// fork point, so `parent` is the process whose descriptors matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkPoint {
    pub init: Pid,
    pub parent: Pid,
}

/// Result of an attempt that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub fork_point: ForkPoint,
    /// FIFO inodes held both by the fork point and by this process
    pub intersection: BTreeSet<DescriptorInode>,
}

impl AttemptOutcome {
    #[must_use]
    pub fn is_race(&self) -> bool {
        !self.intersection.is_empty()
    }
}

/// Descriptor bookkeeping for one attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorTally {
    pub generated: usize,
    pub closed: usize,
}

#[derive(Debug)]
pub struct AttemptReport {
    /// 1-based attempt number
    pub sequence: u64,
    pub container: String,
    pub descriptors: DescriptorTally,
    /// Pipe inodes this attempt generated, taken just before they were closed
    pub generated_inodes: BTreeSet<DescriptorInode>,
    pub outcome: Result<AttemptOutcome>,
}

/// Set intersection of two descriptor inventories
///
/// Order of either input does not matter and duplicates collapse.
#[must_use]
pub fn intersect(a: &[DescriptorInode], b: &[DescriptorInode]) -> BTreeSet<DescriptorInode> {
    let b: HashSet<DescriptorInode> = b.iter().copied().collect();
    a.iter().copied().filter(|inode| b.contains(inode)).collect()
}

/// Runs race attempts against one container
#[derive(Debug)]
pub struct RaceAttempt<'a, D, I> {
    driver: &'a D,
    introspector: &'a I,
    config: &'a RaceConfig,
}

impl<'a, D, I> RaceAttempt<'a, D, I>
where
    D: ContainerDriver,
    I: ProcessIntrospector,
{
    pub const fn new(driver: &'a D, introspector: &'a I, config: &'a RaceConfig) -> Self {
        Self {
            driver,
            introspector,
            config,
        }
    }

    pub const fn config(&self) -> &RaceConfig {
        self.config
    }

    /// Run one attempt
    ///
    /// Needs a multi-threaded runtime: the container start blocks its worker
    /// while the generator keeps ticking on another.
    pub async fn run(&self, sequence: u64) -> AttemptReport {
        let config = self.config;
        tracing::info!(attempt = sequence, pid = Pid::this().as_raw(), "attempting race");

        let mut container = match self.driver.create(&config.container_name, &config.lxcpath) {
            Ok(container) => container,
            Err(e) => {
                return AttemptReport {
                    sequence,
                    container: config.container_name.clone(),
                    descriptors: DescriptorTally::default(),
                    generated_inodes: BTreeSet::new(),
                    outcome: Err(e.context("can't create container")),
                };
            }
        };

        let mut generator = DescriptorGenerator::spawn(config.tick_interval, config.pipe_mode);
        let started = tokio::task::block_in_place(|| container.start());
        generator.stop();

        let mut drained = GeneratedDescriptors::default();
        let mut outcome = self
            .observe(&container, &mut generator, &mut drained, started)
            .await;

        // Teardown runs on every path from here on
        if let Err(e) = tokio::task::block_in_place(|| container.stop()) {
            let e = e.context("can't stop container");
            if outcome.is_ok() {
                outcome = Err(e);
            } else {
                tracing::warn!(error = %e, "container stop failed during teardown");
            }
        }

        match generator.finish().await {
            Ok(rest) => drained.extend(rest),
            Err(e) => {
                if outcome.is_ok() {
                    outcome = Err(e);
                } else {
                    tracing::warn!(error = %e, "descriptor generator did not hand back cleanly");
                }
            }
        }

        let generated_inodes = drained.inodes();
        let descriptors = DescriptorTally {
            generated: generator.allocated(),
            closed: drained.close_all(),
        };
        tracing::debug!(
            attempt = sequence,
            generated = descriptors.generated,
            closed = descriptors.closed,
            "attempt torn down"
        );

        if let Ok(found) = &outcome {
            if found.is_race() {
                let inodes: Vec<u64> = found.intersection.iter().map(|i| i.0).collect();
                tracing::info!(attempt = sequence, ?inodes, "found intersecting inodes");
            }
        }

        AttemptReport {
            sequence,
            container: container.name().to_string(),
            descriptors,
            generated_inodes,
            outcome,
        }
    }

    async fn observe(
        &self,
        container: &D::Container,
        generator: &mut DescriptorGenerator,
        drained: &mut GeneratedDescriptors,
        started: Result<()>,
    ) -> Result<AttemptOutcome> {
        started.map_err(|e| e.context("can't start container"))?;

        if self.config.stop_mode == StopMode::Acknowledged {
            drained.extend(generator.finish().await?);
        }

        let init = container
            .init_pid()
            .map_err(|e| e.context("can't get container's init pid"))?;
        let parent = self
            .introspector
            .parent_pid(init)
            .map_err(|e| e.context("can't get container's parent pid"))?;

        tracing::info!(
            container = container.name(),
            init_pid = init.as_raw(),
            parent_pid = parent.as_raw(),
            "container started"
        );

        let fork_parent_inodes = self
            .introspector
            .fifo_inodes(parent)
            .map_err(|e| e.context("can't get container parent's FIFO inodes"))?;
        let self_inodes = self
            .introspector
            .fifo_inodes(Pid::this())
            .map_err(|e| e.context("can't get own FIFO inodes"))?;

        tracing::debug!(
            fork_parent = fork_parent_inodes.len(),
            own = self_inodes.len(),
            "descriptor inventory taken"
        );

        Ok(AttemptOutcome {
            fork_point: ForkPoint { init, parent },
            intersection: intersect(&fork_parent_inodes, &self_inodes),
        })
    }
}
