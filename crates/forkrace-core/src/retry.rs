//! Repeat attempts until a leak shows up

use crate::attempt::RaceAttempt;
use crate::container::ContainerDriver;
use crate::introspect::{DescriptorInode, ProcessIntrospector};
use crate::{ForkraceError, RaceConfig};
use std::collections::BTreeSet;
use std::num::NonZeroU64;
use tokio::sync::watch;

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// A descriptor leaked into the fork point
    RaceDetected {
        attempts: u64,
        inodes: BTreeSet<DescriptorInode>,
    },
    /// The attempt bound was reached with every attempt clean
    Exhausted { attempts: u64 },
    /// Cancellation was requested between attempts
    Cancelled { attempts: u64 },
    /// An attempt hit an environment error
    Failed { attempts: u64, error: ForkraceError },
}

impl RunOutcome {
    /// Attempts that ran (including a failed one)
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        match self {
            Self::RaceDetected { attempts, .. }
            | Self::Exhausted { attempts }
            | Self::Cancelled { attempts }
            | Self::Failed { attempts, .. } => *attempts,
        }
    }

    /// 0 when the race was reproduced, 1 otherwise
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::RaceDetected { .. } => 0,
            _ => 1,
        }
    }
}

/// Repeats race attempts until one finds a leak, one fails, the optional
/// bound runs out, or cancellation is requested
///
/// Cancellation is only checked between attempts, so a running attempt
/// always tears down.
#[derive(Debug)]
pub struct RetryLoop<'a, D, I> {
    attempt: RaceAttempt<'a, D, I>,
    max_attempts: Option<NonZeroU64>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, D, I> RetryLoop<'a, D, I>
where
    D: ContainerDriver,
    I: ProcessIntrospector,
{
    pub const fn new(driver: &'a D, introspector: &'a I, config: &'a RaceConfig) -> Self {
        Self {
            attempt: RaceAttempt::new(driver, introspector, config),
            max_attempts: config.max_attempts,
            cancel: None,
        }
    }

    /// Stop before the next attempt once `cancel` reads `true`
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub async fn run(&self) -> RunOutcome {
        let mut sequence: u64 = 1;

        loop {
            if self.cancelled() {
                tracing::info!(attempts = sequence - 1, "cancelled");
                return RunOutcome::Cancelled {
                    attempts: sequence - 1,
                };
            }

            if let Some(max) = self.max_attempts {
                if sequence > max.get() {
                    return RunOutcome::Exhausted {
                        attempts: max.get(),
                    };
                }
            }

            let report = self.attempt.run(sequence).await;

            match report.outcome {
                Err(error) => {
                    tracing::error!(attempt = sequence, error = %error, "attempt failed");
                    return RunOutcome::Failed {
                        attempts: sequence,
                        error,
                    };
                }
                Ok(outcome) if outcome.is_race() => {
                    return RunOutcome::RaceDetected {
                        attempts: sequence,
                        inodes: outcome.intersection,
                    };
                }
                Ok(_) => {
                    tracing::info!(
                        attempt = sequence,
                        generated = report.descriptors.generated,
                        "no leak observed"
                    );
                }
            }

            sequence += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{inodes, FakeDriver, FakeIntrospector, Round, INIT};
    use std::sync::atomic::Ordering;

    fn config(max_attempts: u64) -> RaceConfig {
        RaceConfig::builder()
            .tick_millis(5)
            .max_attempts(max_attempts)
            .build()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clean_attempt_then_race() {
        let driver = FakeDriver::new();
        let introspector = FakeIntrospector::new(vec![
            Round::new(&[10, 11], &[20, 21]),
            Round::new(&[55, 56], &[56, 99]),
        ]);
        let config = config(0);

        let outcome = RetryLoop::new(&driver, &introspector, &config).run().await;

        match &outcome {
            RunOutcome::RaceDetected { attempts, inodes: found } => {
                assert_eq!(*attempts, 2);
                assert_eq!(found.iter().copied().collect::<Vec<_>>(), inodes(&[56]));
            }
            other => panic!("expected race, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(driver.starts.load(Ordering::SeqCst), 2);
        assert_eq!(driver.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn introspection_failure_is_fatal() {
        let driver = FakeDriver::new();
        let introspector = FakeIntrospector::without_parents(vec![]);
        let config = config(0);

        let outcome = RetryLoop::new(&driver, &introspector, &config).run().await;

        match &outcome {
            RunOutcome::Failed { attempts, error } => {
                assert_eq!(*attempts, 1);
                assert!(matches!(error, ForkraceError::Introspection { pid: INIT, .. }));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn container_failure_is_fatal() {
        let driver = FakeDriver::new().failing_start();
        let introspector = FakeIntrospector::new(vec![]);
        let config = config(0);

        let outcome = RetryLoop::new(&driver, &introspector, &config).run().await;

        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                attempts: 1,
                error: ForkraceError::Container { .. }
            }
        ));
        assert_eq!(driver.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bound_stops_clean_runs() {
        let driver = FakeDriver::new();
        let introspector = FakeIntrospector::new(vec![]);
        let config = config(3);

        let outcome = RetryLoop::new(&driver, &introspector, &config).run().await;

        assert!(matches!(outcome, RunOutcome::Exhausted { attempts: 3 }));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(driver.starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_is_checked_between_attempts() {
        let driver = FakeDriver::new();
        let introspector = FakeIntrospector::new(vec![]);
        let config = config(0);
        let (tx, rx) = watch::channel(true);

        let outcome = RetryLoop::new(&driver, &introspector, &config)
            .with_cancellation(rx)
            .run()
            .await;

        assert!(matches!(outcome, RunOutcome::Cancelled { attempts: 0 }));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(driver.starts.load(Ordering::SeqCst), 0);
        drop(tx);
    }

    #[test]
    fn debug_shows_bound() {
        let driver = FakeDriver::new();
        let introspector = FakeIntrospector::new(vec![]);
        let config = config(3);

        let rendered = format!("{:?}", RetryLoop::new(&driver, &introspector, &config));
        assert!(rendered.starts_with("RetryLoop"));
        assert!(rendered.contains("max_attempts: Some(3)"));
    }
}
