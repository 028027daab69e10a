//! In-process fakes for the container and introspection collaborators

use crate::container::{Container, ContainerDriver};
use crate::introspect::{DescriptorInode, ProcessIntrospector};
use crate::{ForkraceError, Result};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const INIT: i32 = 10711;
pub const FORK_PARENT: i32 = 10676;

pub fn inodes(raw: &[u64]) -> Vec<DescriptorInode> {
    raw.iter().copied().map(DescriptorInode).collect()
}

#[derive(Debug, Clone)]
pub struct FakeDriver {
    fail_create: bool,
    fail_start: bool,
    fail_stop: bool,
    start_delay: Duration,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            fail_create: false,
            fail_start: false,
            fail_stop: false,
            // Several generator ticks at the 5ms test interval
            start_delay: Duration::from_millis(40),
            starts: Arc::default(),
            stops: Arc::default(),
        }
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

impl ContainerDriver for FakeDriver {
    type Container = FakeContainer;

    fn create(&self, name: &str, _lxcpath: &Path) -> Result<FakeContainer> {
        if self.fail_create {
            return Err(ForkraceError::Container {
                name: name.into(),
                reason: "no container definition".into(),
            });
        }
        Ok(FakeContainer {
            name: name.into(),
            driver: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FakeContainer {
    name: String,
    driver: FakeDriver,
}

impl Container for FakeContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        self.driver.starts.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.driver.start_delay);
        if self.driver.fail_start {
            return Err(ForkraceError::Container {
                name: self.name.clone(),
                reason: "lxc-start exited with 1".into(),
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.driver.stops.fetch_add(1, Ordering::SeqCst);
        if self.driver.fail_stop {
            return Err(ForkraceError::Container {
                name: self.name.clone(),
                reason: "lxc-stop exited with 1".into(),
            });
        }
        Ok(())
    }

    fn init_pid(&self) -> Result<Pid> {
        Ok(Pid::from_raw(INIT))
    }
}

/// Starts a real process tree without exec: a supervisor forked from the
/// test process, and an init forked from the supervisor
///
/// The supervisor keeps every descriptor the test process had open when it
/// forked, so generated pipes show up in its `/proc/<pid>/fd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkingDriver;

impl ContainerDriver for ForkingDriver {
    type Container = ForkingContainer;

    fn create(&self, name: &str, _lxcpath: &Path) -> Result<ForkingContainer> {
        Ok(ForkingContainer {
            name: name.into(),
            supervisor: None,
            init: None,
        })
    }
}

#[derive(Debug)]
pub struct ForkingContainer {
    name: String,
    supervisor: Option<Pid>,
    init: Option<Pid>,
}

impl Container for ForkingContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        // Let the generator open a few pipes first
        std::thread::sleep(Duration::from_millis(40));

        let (handoff_rx, handoff_tx) = nix::unistd::pipe()?;
        match unsafe { nix::unistd::fork() }? {
            ForkResult::Child => supervise(handoff_rx.as_raw_fd(), handoff_tx.as_raw_fd()),
            ForkResult::Parent { child } => {
                self.supervisor = Some(child);
                drop(handoff_tx);

                let mut raw = [0u8; 4];
                File::from(handoff_rx).read_exact(&mut raw)?;
                let init = i32::from_ne_bytes(raw);
                if init <= 0 {
                    return Err(ForkraceError::Container {
                        name: self.name.clone(),
                        reason: "supervisor could not fork init".into(),
                    });
                }
                self.init = Some(Pid::from_raw(init));
                Ok(())
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(init) = self.init.take() {
            kill(init, Signal::SIGKILL)?;
        }
        if let Some(supervisor) = self.supervisor.take() {
            kill(supervisor, Signal::SIGKILL)?;
            waitpid(supervisor, None)?;
        }
        Ok(())
    }

    fn init_pid(&self) -> Result<Pid> {
        self.init.ok_or_else(|| ForkraceError::Container {
            name: self.name.clone(),
            reason: "not started".into(),
        })
    }
}

/// Supervisor side of the fork; async-signal-safe calls only
fn supervise(handoff_rx: RawFd, handoff_tx: RawFd) -> ! {
    unsafe {
        libc::close(handoff_rx);
        let init = libc::fork();
        if init == 0 {
            libc::close(handoff_tx);
            loop {
                libc::pause();
            }
        }
        let bytes = init.to_ne_bytes();
        libc::write(handoff_tx, bytes.as_ptr().cast(), bytes.len());
        libc::close(handoff_tx);
        if init < 0 {
            libc::_exit(1);
        }
        loop {
            libc::pause();
        }
    }
}

/// Descriptor inventories for one attempt
#[derive(Debug, Clone, Default)]
pub struct Round {
    fork_parent: Vec<DescriptorInode>,
    own: Vec<DescriptorInode>,
}

impl Round {
    pub fn new(fork_parent: &[u64], own: &[u64]) -> Self {
        Self {
            fork_parent: inodes(fork_parent),
            own: inodes(own),
        }
    }
}

/// Serves one `Round` per attempt; clean rounds once the script runs out
#[derive(Debug)]
pub struct FakeIntrospector {
    knows_parent: bool,
    rounds: Mutex<VecDeque<Round>>,
}

impl FakeIntrospector {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            knows_parent: true,
            rounds: Mutex::new(rounds.into()),
        }
    }

    /// The init process exits before its parent can be resolved
    pub fn without_parents(rounds: Vec<Round>) -> Self {
        Self {
            knows_parent: false,
            ..Self::new(rounds)
        }
    }
}

impl ProcessIntrospector for FakeIntrospector {
    fn parent_pid(&self, pid: Pid) -> Result<Pid> {
        if self.knows_parent && pid.as_raw() == INIT {
            Ok(Pid::from_raw(FORK_PARENT))
        } else {
            Err(ForkraceError::Introspection {
                pid: pid.as_raw(),
                reason: "reading status: No such file or directory (os error 2)".into(),
            })
        }
    }

    fn fifo_inodes(&self, pid: Pid) -> Result<Vec<DescriptorInode>> {
        let mut rounds = self.rounds.lock().unwrap();
        if pid == Pid::this() {
            // Own inventory is read last in an attempt
            Ok(rounds.pop_front().unwrap_or_default().own)
        } else if pid.as_raw() == FORK_PARENT {
            Ok(rounds.front().cloned().unwrap_or_default().fork_parent)
        } else {
            Err(ForkraceError::Introspection {
                pid: pid.as_raw(),
                reason: "unknown pid".into(),
            })
        }
    }
}
