use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::WorkerHandle;

/// Periodic task loop: runs once immediately, then every `interval` until shutdown.
///
/// Used for the availability + low-stock sweep, the consistency backstop for
/// triggers lost to crashes or out-of-band edits.
#[derive(Debug)]
pub struct SweepWorker;

impl SweepWorker {
    pub fn spawn<T, E>(name: &'static str, interval: Duration, mut task: T) -> WorkerHandle
    where
        T: FnMut() -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || sweep_loop(name, interval, shutdown_rx, &mut task))
            .expect("failed to spawn sweep worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn sweep_loop<T, E>(
    name: &'static str,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    task: &mut T,
) where
    T: FnMut() -> Result<(), E>,
    E: core::fmt::Display,
{
    info!(worker = name, interval_secs = interval.as_secs(), "sweep worker started");
    loop {
        if let Err(err) = task() {
            warn!(worker = name, error = %err, "sweep run failed");
        }

        match shutdown_rx.recv_timeout(interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
        }
    }
    info!(worker = name, "sweep worker stopped");
}
