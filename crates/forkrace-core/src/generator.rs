//! Background pipe generator that widens the fork race window
//!
//! The generator is a tokio task. It owns every descriptor it creates and
//! only hands them back through its join handle, so the attempt never touches
//! the collection while the task can still push to it.

use crate::introspect::DescriptorInode;
use crate::pipe::{open_pipe, PipeMode};
use crate::{ForkraceError, Result};
use nix::sys::stat::fstat;
use std::collections::BTreeSet;
use std::os::fd::OwnedFd;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Descriptors created by one generator run
#[derive(Debug, Default)]
pub struct GeneratedDescriptors {
    fds: Vec<OwnedFd>,
}

impl GeneratedDescriptors {
    #[must_use]
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Pipe inodes behind the held descriptors (both ends share one)
    #[must_use]
    pub fn inodes(&self) -> BTreeSet<DescriptorInode> {
        self.fds
            .iter()
            .filter_map(|fd| fstat(fd).ok())
            .map(|stat| DescriptorInode(u64::from(stat.st_ino)))
            .collect()
    }

    /// Take ownership of another batch
    pub fn extend(&mut self, other: Self) {
        self.fds.extend(other.fds);
    }

    /// Close every descriptor exactly once, returning how many were closed
    pub fn close_all(self) -> usize {
        let count = self.fds.len();
        drop(self.fds);
        count
    }
}

/// Handle to a running pipe generator
#[derive(Debug)]
pub struct DescriptorGenerator {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<GeneratedDescriptors>>,
    allocated: watch::Receiver<usize>,
}

impl DescriptorGenerator {
    /// Start allocating one pipe per `tick`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(tick: Duration, mode: PipeMode) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (count_tx, allocated) = watch::channel(0);

        let task = tokio::spawn(generate(tick, mode, stop_rx, count_tx));

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
            allocated,
        }
    }

    /// Descriptors created so far
    #[must_use]
    pub fn allocated(&self) -> usize {
        *self.allocated.borrow()
    }

    /// Signal the task to stop without waiting for it
    ///
    /// Calling this more than once is a no-op.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // Receiver is gone only if the task already ended
            let _ = tx.send(());
        }
    }

    /// Stop the task and wait for it to hand back its descriptors
    ///
    /// A second call returns an empty collection.
    pub async fn finish(&mut self) -> Result<GeneratedDescriptors> {
        self.stop();

        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ForkraceError::Generator(e.to_string())),
            None => Ok(GeneratedDescriptors::default()),
        }
    }
}

impl Drop for DescriptorGenerator {
    fn drop(&mut self) {
        // The task drops (and closes) its descriptors once it sees the stop
        self.stop();
    }
}

async fn generate(
    tick: Duration,
    mode: PipeMode,
    mut stop_rx: oneshot::Receiver<()>,
    count_tx: watch::Sender<usize>,
) -> GeneratedDescriptors {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut generated = GeneratedDescriptors::default();

    loop {
        tokio::select! {
            biased;
            // Fires on an explicit stop and when the handle is dropped
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                match open_pipe(mode) {
                    Ok((read_end, write_end)) => {
                        generated.fds.push(read_end);
                        generated.fds.push(write_end);
                        count_tx.send_replace(generated.len());
                    }
                    Err(e) => tracing::warn!(error = %e, held = generated.len(), "pipe allocation failed"),
                }
            }
        }
    }

    tracing::debug!(generated = generated.len(), "descriptor generator stopped");
    generated
}
