use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use larder_events::{EventBus, Subscription};

use super::WorkerHandle;

/// Delivers bus messages to a handler on a dedicated thread.
///
/// The handler must be idempotent (at-least-once delivery).
#[derive(Debug)]
pub struct NotificationWorker;

impl NotificationWorker {
    pub fn spawn<M, B, H, E>(name: &'static str, bus: &B, mut handler: H) -> WorkerHandle
    where
        M: Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || delivery_loop(name, sub, shutdown_rx, &mut handler))
            .expect("failed to spawn notification worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn delivery_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = ?err, "notification handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
