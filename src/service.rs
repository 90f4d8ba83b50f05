//! # Service abstraction shared by leaf services and supervisors.
//!
//! This module defines the [`Service`] trait (async, cancelable start and
//! stop) together with the run error channel type aliases. The common
//! handle type is [`ServiceRef`], an `Arc<dyn Service>` suitable for
//! handing to a supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

/// Shared handle to a service object.
///
/// This is the primary type used by the supervisors and their settings.
pub type ServiceRef = Arc<dyn Service>;

/// Receiving half of a service run error channel, handed to the caller of
/// [`Service::start`].
pub type RunErrorReceiver = mpsc::Receiver<ServiceError>;

/// Sending half of a service run error channel, kept by the service.
pub type RunErrorSender = mpsc::Sender<ServiceError>;

/// Creates a run error channel.
///
/// The channel holds a single value: the one terminal error a service is
/// allowed to send. The buffer means a crashing service never blocks on
/// its send, even while its supervisor is tearing the channel down.
pub fn run_error_channel() -> (RunErrorSender, RunErrorReceiver) {
    mpsc::channel(1)
}

/// # A long-running activity with a start → run → stop lifecycle.
///
/// All three supervisors ([`Group`](crate::Group),
/// [`Sequence`](crate::Sequence) and [`Restarter`](crate::Restarter))
/// implement `Service` themselves, which is what makes them compose.
///
/// ## Contract
///
/// - [`start`](Service::start) resolves once the service is either running
///   or has failed. If `ctx` is canceled before the service is running,
///   start returns an error reporting the cancellation (see
///   [`ServiceError::with_cancellation`]).
/// - On success, the returned [`RunErrorReceiver`] is hot: the caller
///   consumes it. The service may send **at most one** error on its
///   [`RunErrorSender`], the reason it crashed, and must not send after a
///   normal stop. The send result may be ignored: the caller may already
///   have torn the channel down during a failed group start.
/// - The service must keep its [`RunErrorSender`] alive for as long as the
///   service value itself lives. A supervisor observing the channel closed
///   treats it as a contract violation and panics.
/// - [`stop`](Service::stop) resolves once the service has released all
///   its resources, and may only be called after a successful start.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use servisor::{run_error_channel, RunErrorReceiver, RunErrorSender, Service, ServiceError};
///
/// struct Heartbeat {
///     run_error: std::sync::Mutex<Option<RunErrorSender>>,
/// }
///
/// #[async_trait]
/// impl Service for Heartbeat {
///     fn name(&self) -> &str {
///         "heartbeat"
///     }
///
///     async fn start(&self, _ctx: CancellationToken) -> Result<RunErrorReceiver, ServiceError> {
///         let (tx, rx) = run_error_channel();
///         *self.run_error.lock().unwrap() = Some(tx);
///         // spawn the actual work here, handing it a clone of `tx`...
///         Ok(rx)
///     }
///
///     async fn stop(&self) -> Result<(), ServiceError> {
///         // ...signal the work to stop and wait for it.
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Returns the service name, constant over the lifetime of the service.
    fn name(&self) -> &str;

    /// Starts the service.
    ///
    /// On success it returns the run error channel; on failure the service
    /// is not running and the channel does not exist.
    async fn start(&self, ctx: CancellationToken) -> Result<RunErrorReceiver, ServiceError>;

    /// Stops the service, resolving once its resources are released.
    async fn stop(&self) -> Result<(), ServiceError>;
}
