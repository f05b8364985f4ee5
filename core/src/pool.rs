//! Bounded simulation execution with a per-run timeout.
//!
//! RULES:
//!   - At most `max_concurrent` simulations hold a permit at once; further
//!     callers block until one is released.
//!   - A run executes on its own named thread. The permit moves into that
//!     thread and is released only when the thread finishes, so an
//!     abandoned (timed-out) run still counts against the limit until it
//!     observes cancellation.
//!   - The timeout clock starts after the permit is acquired.

use crate::{
    collector::SimulationParameters,
    engine::{SimulationResult, Simulator},
    error::{NavError, NavResult},
    types::AnalysisType,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Counting semaphore over simulation slots: a bounded channel pre-filled
/// with one token per slot. Acquiring takes a token, releasing returns it.
pub struct SimulationPermits {
    give: Sender<()>,
    take: Receiver<()>,
    max:  usize,
}

impl SimulationPermits {
    pub fn new(max: usize) -> Arc<Self> {
        let max = max.max(1);
        let (give, take) = bounded(max);
        for _ in 0..max {
            // Cannot fail: the channel has room for every token and both
            // ends are held here.
            let _ = give.send(());
        }
        Arc::new(Self { give, take, max })
    }

    /// Block until a slot is free.
    pub fn acquire(self: &Arc<Self>) -> NavResult<Permit> {
        self.take
            .recv()
            .map_err(|e| anyhow::anyhow!("simulation permits closed: {e}"))?;
        Ok(Permit { permits: Arc::clone(self) })
    }

    pub fn in_use(&self) -> usize {
        self.max - self.take.len()
    }
}

/// Held for the lifetime of one simulation thread.
pub struct Permit {
    permits: Arc<SimulationPermits>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.permits.give.send(());
    }
}

pub struct SimulationPool {
    simulator: Arc<dyn Simulator>,
    permits:   Arc<SimulationPermits>,
}

impl SimulationPool {
    pub fn new(simulator: Arc<dyn Simulator>, max_concurrent: usize) -> Self {
        Self { simulator, permits: SimulationPermits::new(max_concurrent) }
    }

    /// Run one simulation, waiting at most `timeout` for it to finish.
    /// On timeout the run is signalled to cancel and `ComputationTimeout`
    /// is returned.
    pub fn run(
        &self,
        params:        &SimulationParameters,
        analysis_type: AnalysisType,
        timeout:       Duration,
    ) -> NavResult<SimulationResult> {
        let permit = self.permits.acquire()?;
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(1);

        let simulator = Arc::clone(&self.simulator);
        let worker_cancel = Arc::clone(&cancel);
        let worker_params = params.clone();
        thread::Builder::new()
            .name(format!("sim-{}-{analysis_type}", params.ticker))
            .spawn(move || {
                let _permit = permit;
                let result = simulator.simulate(&worker_params, analysis_type, &worker_cancel);
                // The receiver is gone when the caller already timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| anyhow::anyhow!("failed to spawn simulation thread: {e}"))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::Relaxed);
                log::warn!(
                    "{} {analysis_type}: simulation exceeded {}ms, cancelling",
                    params.ticker,
                    timeout.as_millis()
                );
                Err(NavError::ComputationTimeout {
                    ticker:        params.ticker.clone(),
                    analysis_type,
                    timeout_ms:    timeout.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(NavError::ComputationFailed {
                key:    format!("{}:{analysis_type}", params.ticker),
                reason: "simulation thread exited without a result".into(),
            }),
        }
    }
}
