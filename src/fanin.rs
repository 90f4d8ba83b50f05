//! # Run errors fan-in.
//!
//! Reduces the run error channels of a dynamic set of services to a
//! single output consumed by a supervisor's interceptor. One worker task
//! multiplexes each registered input; the first crash wins the output,
//! which is then closed, and every later crash is discarded. Stopping the
//! fan-in drains pending values so a crashing service is never left
//! blocked or erroring on its send during a teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::service::RunErrorReceiver;

/// A run error received from a service, tagged with its name.
#[derive(Debug)]
pub(crate) struct Crash {
    pub(crate) service: String,
    pub(crate) error: ServiceError,
}

impl Crash {
    /// Wraps the crash into the outward `<service> crashed: <err>` error.
    pub(crate) fn into_error(self) -> ServiceError {
        ServiceError::Crashed {
            service: self.service,
            source: Box::new(self.error),
        }
    }
}

/// Latch around the output sender: whichever party takes the sender first,
/// a crashing worker or [`ErrorsFanIn::stop`], publishes and closes the
/// output; everyone else observes `None` and discards.
type OutputLatch = Arc<Mutex<Option<mpsc::Sender<Crash>>>>;

struct Worker {
    stop: CancellationToken,
    done: JoinHandle<()>,
}

pub(crate) struct ErrorsFanIn {
    output: OutputLatch,
    workers: HashMap<String, Worker>,
}

impl ErrorsFanIn {
    /// Creates an empty fan-in and returns its read-only output.
    pub(crate) fn new() -> (Self, mpsc::Receiver<Crash>) {
        let (tx, rx) = mpsc::channel(1);
        let fan_in = Self {
            output: Arc::new(Mutex::new(Some(tx))),
            workers: HashMap::new(),
        };
        (fan_in, rx)
    }

    /// Registers a new input, spawning a worker multiplexing it into the
    /// output. The worker is tracked so [`ErrorsFanIn::stop`] can join it.
    pub(crate) fn add(&mut self, service: &str, input: RunErrorReceiver) {
        let stop = CancellationToken::new();
        let done = tokio::spawn(fan_in(
            service.to_owned(),
            input,
            self.output.clone(),
            stop.clone(),
        ));
        self.workers
            .insert(service.to_owned(), Worker { stop, done });
    }

    /// Signals all workers to terminate, waits for them and closes the
    /// output. After this returns no worker is alive.
    ///
    /// A worker panic, raised when a service broke the contract by closing
    /// its run error channel, is resumed here.
    pub(crate) async fn stop(self) {
        for worker in self.workers.values() {
            worker.stop.cancel();
        }
        for (_, worker) in self.workers {
            if let Err(err) = worker.done.await {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }
        self.output.lock().unwrap().take();
    }
}

/// Worker multiplexing one service run error channel into the output.
async fn fan_in(
    service: String,
    mut input: RunErrorReceiver,
    output: OutputLatch,
    stop: CancellationToken,
) {
    tokio::select! {
        _ = stop.cancelled() => {
            // Drain the eventual pending run error so the service send
            // never fails during the teardown.
            let _ = input.try_recv();
        }
        received = input.recv() => match received {
            Some(error) => {
                let sender = output.lock().unwrap().take();
                match sender {
                    // First crash: publish and close the output. The
                    // capacity-1 buffer makes the send immediate.
                    Some(sender) => {
                        let _ = sender.try_send(Crash { service, error });
                    }
                    // Another worker already won the output; discard.
                    None => {}
                }
            }
            None => panic!("run error channel of service {service} closed unexpectedly"),
        }
    }
}
