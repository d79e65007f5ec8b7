//! Resettable start/stop gate.
//!
//! Request-time code asks "is the engine up yet?" and either gets an answer
//! immediately or waits with a bound. Each `start`/`stop` cycle is a
//! generation; resetting abandons the previous generation so repeated
//! toggling never leaks stale waiters.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Error type for gate waits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("{0}")]
    Timeout(String),
    #[error("gate is stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct GateState {
    generation: u64,
    phase: Phase,
}

/// A two-state gate wrapping a start/stop pair.
#[derive(Debug)]
pub struct Gate {
    name: &'static str,
    tx: watch::Sender<GateState>,
}

impl Gate {
    pub fn new(name: &'static str) -> Self {
        let (tx, _) = watch::channel(GateState {
            generation: 0,
            phase: Phase::Pending,
        });
        Self { name, tx }
    }

    /// Run the starter under a fresh pending generation; waiters resolve
    /// when it finishes. Starter failure rejects the generation and is
    /// logged.
    pub async fn start<E: Display>(&self, starter: impl Future<Output = Result<(), E>>) {
        self.tx.send_modify(|state| {
            if state.phase != Phase::Pending {
                state.generation += 1;
                state.phase = Phase::Pending;
            }
        });
        let generation = self.tx.borrow().generation;

        match starter.await {
            Ok(()) => self.settle(generation, Phase::Ready),
            Err(e) => {
                log::warn!("{} start failed: {e}", self.name);
                self.settle(generation, Phase::Failed);
            }
        }
    }

    /// Reset to a fresh generation and reject it immediately, so every
    /// current and future waiter fails fast; then run the stopper, whose
    /// own failure is only logged.
    pub async fn stop<E: Display>(&self, stopper: impl Future<Output = Result<(), E>>) {
        self.tx.send_modify(|state| {
            if state.phase != Phase::Pending {
                state.generation += 1;
            }
            state.phase = Phase::Failed;
        });

        if let Err(e) = stopper.await {
            log::warn!("{} stop failed: {e}", self.name);
        }
    }

    /// Resolve immediately when the gate is already settled, otherwise wait
    /// for the current generation with a bound.
    pub async fn is_ready(&self, timeout: Duration, error_message: &str) -> Result<(), GateError> {
        let mut rx = self.tx.subscribe();
        let wait = async {
            loop {
                match rx.borrow_and_update().phase {
                    Phase::Ready => return Ok(()),
                    Phase::Failed => return Err(GateError::Stopped),
                    Phase::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return Err(GateError::Stopped);
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(GateError::Timeout(error_message.to_string())),
        }
    }

    /// Only resolve a generation that is still the pending one; a reset in
    /// between means the result belongs to an abandoned generation.
    fn settle(&self, generation: u64, phase: Phase) {
        self.tx.send_if_modified(|state| {
            if state.generation == generation && state.phase == Phase::Pending {
                state.phase = phase;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    async fn ok() -> Result<(), String> {
        Ok(())
    }

    #[tokio::test]
    async fn ready_after_successful_start() {
        let gate = Gate::new("test");
        gate.start(ok()).await;
        assert_eq!(gate.is_ready(TIMEOUT, "not up").await, Ok(()));
    }

    #[tokio::test]
    async fn pending_wait_times_out_with_message() {
        let gate = Gate::new("test");
        let result = gate.is_ready(Duration::from_millis(10), "engine not started").await;
        assert_eq!(
            result,
            Err(GateError::Timeout("engine not started".to_string()))
        );
    }

    #[tokio::test]
    async fn stop_before_start_rejects_immediately() {
        let gate = std::sync::Arc::new(Gate::new("test"));
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.is_ready(Duration::from_secs(60), "slow").await })
        };
        tokio::task::yield_now().await;

        gate.stop(ok()).await;

        // The waiter must reject now, not after its 60s bound.
        let result = tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should settle immediately")
            .unwrap();
        assert_eq!(result, Err(GateError::Stopped));

        // New waiters reject immediately too.
        assert_eq!(
            gate.is_ready(Duration::from_secs(60), "slow").await,
            Err(GateError::Stopped)
        );
    }

    #[tokio::test]
    async fn start_failure_rejects_and_restart_recovers() {
        let gate = Gate::new("test");
        gate.start(async { Err::<(), _>("boom") }).await;
        assert_eq!(
            gate.is_ready(TIMEOUT, "down").await,
            Err(GateError::Stopped)
        );

        gate.start(ok()).await;
        assert_eq!(gate.is_ready(TIMEOUT, "down").await, Ok(()));
    }

    #[tokio::test]
    async fn stop_then_start_cycles_cleanly() {
        let gate = Gate::new("test");
        gate.start(ok()).await;
        gate.stop(ok()).await;
        assert_eq!(
            gate.is_ready(TIMEOUT, "down").await,
            Err(GateError::Stopped)
        );
        gate.start(ok()).await;
        assert_eq!(gate.is_ready(TIMEOUT, "down").await, Ok(()));
    }
}
