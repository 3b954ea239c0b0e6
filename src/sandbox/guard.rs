//! Wall-clock bound for script execution.
//!
//! The interpreter is synchronous, so each guarded job runs on its own OS
//! thread while the calling task awaits the result with a deadline. Every
//! job gets a fresh [`Interrupt`]; it is tripped when [`invoke`] returns,
//! whatever the outcome, so a job that outlives its deadline stops at its
//! next statement boundary.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::TemplateExecutionError;
use crate::script::Interrupt;

/// Stack for worker threads. Deeply nested scripts recurse in the parser
/// and the evaluator.
const WORKER_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Trips the interrupt when dropped.
struct TripOnDrop(Interrupt);

impl Drop for TripOnDrop {
    fn drop(&mut self) {
        self.0.trip();
    }
}

/// Runs `job` on a worker thread, giving up after `budget`.
///
/// On expiry returns `timeout_error`. A job that panics, or whose thread
/// cannot be spawned, yields `internal_error`.
pub async fn invoke<T, F>(budget: Duration, job: F) -> Result<T, TemplateExecutionError>
where
    T: Send + 'static,
    F: FnOnce(&Interrupt) -> Result<T, TemplateExecutionError> + Send + 'static,
{
    let interrupt = Interrupt::new();
    let _trip = TripOnDrop(interrupt.clone());

    let (tx, rx) = oneshot::channel();
    let worker_interrupt = interrupt.clone();
    std::thread::Builder::new()
        .name("reel-worker".to_string())
        .stack_size(WORKER_STACK_BYTES)
        .spawn(move || {
            let result = job(&worker_interrupt);
            // The receiver is gone when the deadline already passed.
            let _ = tx.send(result);
        })
        .map_err(|e| TemplateExecutionError::internal(format!("failed to spawn worker: {e}")))?;

    match tokio::time::timeout(budget, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(TemplateExecutionError::internal(
            "worker thread stopped without a result",
        )),
        Err(_) => {
            warn!(
                "Execution exceeded its {:.1}s budget, interrupting worker",
                budget.as_secs_f64()
            );
            debug!("A backend call in flight will finish before the worker stops");
            Err(TemplateExecutionError::timeout())
        }
    }
}
