//! Graceful shutdown.
//!
//! The first SIGINT or SIGTERM moves the process from `Running` to
//! `Draining`: the listener stops accepting and in-flight requests finish.
//! A grace timer starts at that moment and is never restarted. Whichever
//! comes first, drain completion or timer expiry, ends the process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Terminated,
}

#[derive(Debug)]
pub enum DrainOutcome<T> {
    Completed(T),
    TimedOut,
}

#[derive(Clone)]
pub struct Shutdown {
    state: Arc<watch::Sender<ShutdownState>>,
    grace: Duration,
}

impl Shutdown {
    pub fn new(grace: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            state: Arc::new(state),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Watch state transitions. Repeated triggers do not notify.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Begin draining. Returns `true` only for the call that made the transition.
    pub fn trigger(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once draining has begun.
    pub async fn draining(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state != ShutdownState::Running).await;
    }

    /// Drive `work` (the serve loop plus any drain bookkeeping) to completion,
    /// giving up `grace` after draining begins.
    pub async fn run<F>(&self, work: F) -> DrainOutcome<F::Output>
    where
        F: Future,
    {
        tokio::pin!(work);

        let outcome = tokio::select! {
            biased;
            output = &mut work => DrainOutcome::Completed(output),
            _ = self.grace_expired() => DrainOutcome::TimedOut,
        };

        self.state.send_replace(ShutdownState::Terminated);
        outcome
    }

    async fn grace_expired(&self) {
        self.draining().await;
        tracing::info!(grace = ?self.grace, "Draining connections");
        tokio::time::sleep(self.grace).await;
        tracing::error!(grace = ?self.grace, "Drain did not finish in time, forcing exit");
    }

    /// Trigger on every SIGINT/SIGTERM for the life of the process.
    pub async fn listen_for_signals(self) {
        #[cfg(unix)]
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                None
            }
        };

        loop {
            #[cfg(unix)]
            let sigterm = async {
                if let Some(stream) = terminate.as_mut() {
                    if stream.recv().await.is_some() {
                        return;
                    }
                }
                std::future::pending::<()>().await
            };

            #[cfg(not(unix))]
            let sigterm = std::future::pending::<()>();

            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                        return;
                    }
                    tracing::info!("Received Ctrl+C");
                },
                _ = sigterm => {
                    tracing::info!("Received terminate signal");
                },
            }

            if self.trigger() {
                tracing::info!("Initiating graceful shutdown");
            } else {
                tracing::info!("Shutdown already in progress");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    const GRACE: Duration = Duration::from_secs(10);

    #[test]
    fn test_trigger_is_one_shot() {
        let shutdown = Shutdown::new(GRACE);
        assert_eq!(shutdown.state(), ShutdownState::Running);

        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(!shutdown.clone().trigger());
        assert_eq!(shutdown.state(), ShutdownState::Draining);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_completes_before_grace() {
        let shutdown = Shutdown::new(GRACE);
        let trigger = shutdown.clone();

        let work = async move {
            trigger.trigger();
            tokio::time::sleep(Duration::from_secs(2)).await;
            "drained"
        };

        let started = Instant::now();
        match shutdown.run(work).await {
            DrainOutcome::Completed(value) => assert_eq!(value, "drained"),
            DrainOutcome::TimedOut => panic!("drain should have completed"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(shutdown.state(), ShutdownState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_drain_times_out() {
        let shutdown = Shutdown::new(GRACE);
        shutdown.trigger();

        let started = Instant::now();
        let outcome = shutdown.run(std::future::pending::<()>()).await;

        assert!(matches!(outcome, DrainOutcome::TimedOut));
        assert_eq!(started.elapsed(), GRACE);
        assert_eq!(shutdown.state(), ShutdownState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_signal_does_not_restart_timer() {
        let shutdown = Shutdown::new(GRACE);
        let signals = shutdown.clone();

        let started = Instant::now();
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let first = signals.trigger();
            tokio::time::sleep(Duration::from_secs(5)).await;
            let second = signals.trigger();
            (first, second)
        });

        let outcome = shutdown.run(std::future::pending::<()>()).await;

        assert!(matches!(outcome, DrainOutcome::TimedOut));
        assert_eq!(started.elapsed(), Duration::from_secs(11));
        assert_eq!(sender.await.unwrap(), (true, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timer_without_signal() {
        let shutdown = Shutdown::new(GRACE);

        let work = tokio::time::sleep(Duration::from_secs(60));
        let outcome = shutdown.run(work).await;

        assert!(matches!(outcome, DrainOutcome::Completed(())));
    }

    #[tokio::test]
    async fn test_draining_resolves_after_trigger() {
        let shutdown = Shutdown::new(GRACE);
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.draining().await }
        });

        shutdown.trigger();
        tokio_test::assert_ok!(waiter.await);
    }
}
