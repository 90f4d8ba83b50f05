//! # Lifecycle hooks.
//!
//! [`Hooks`] lets callers observe every service lifecycle step a
//! supervisor drives: starting, started, stopping, stopped and crashed.
//! Hooks are purely observational and must not be used for flow control.
//!
//! Two implementations ship with the crate: [`NoopHooks`], the default,
//! and [`LogHooks`] behind the `logging` feature.

use crate::error::ServiceError;

/// # Observer of service lifecycle events.
///
/// A [`Group`](crate::Group) calls hooks from concurrently running tasks,
/// one per service, so implementations must be safe to call from multiple
/// tasks at once. For a given service, the calls are observed in program
/// order: `on_start` then `on_started` around a start, `on_stop` then
/// `on_stopped` around a stop.
pub trait Hooks: Send + Sync {
    /// Called right before a service starts.
    fn on_start(&self, service: &str);

    /// Called right after a service start returned, with its error if it
    /// failed.
    fn on_started(&self, service: &str, err: Option<&ServiceError>);

    /// Called right before a service stops.
    fn on_stop(&self, service: &str);

    /// Called right after a service stop returned, with its error if it
    /// failed.
    fn on_stopped(&self, service: &str, err: Option<&ServiceError>);

    /// Called when a running service emitted its terminal run error.
    fn on_crash(&self, service: &str, err: &ServiceError);
}

/// Hooks implementation that does nothing.
///
/// This is what supervisors use when their settings leave hooks unset.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl Hooks for NoopHooks {
    fn on_start(&self, _service: &str) {}
    fn on_started(&self, _service: &str, _err: Option<&ServiceError>) {}
    fn on_stop(&self, _service: &str) {}
    fn on_stopped(&self, _service: &str, _err: Option<&ServiceError>) {}
    fn on_crash(&self, _service: &str, _err: &ServiceError) {}
}

/// Hooks implementation logging through the [`tracing`] facade.
///
/// Successful lifecycle steps log at the debug level; failures and
/// crashes log at the warn level.
#[cfg(feature = "logging")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHooks;

#[cfg(feature = "logging")]
impl Hooks for LogHooks {
    fn on_start(&self, service: &str) {
        tracing::debug!(service, "starting");
    }

    fn on_started(&self, service: &str, err: Option<&ServiceError>) {
        match err {
            None => tracing::debug!(service, "started"),
            Some(err) => tracing::warn!(service, %err, "failed to start"),
        }
    }

    fn on_stop(&self, service: &str) {
        tracing::debug!(service, "stopping");
    }

    fn on_stopped(&self, service: &str, err: Option<&ServiceError>) {
        match err {
            None => tracing::debug!(service, "stopped"),
            Some(err) => tracing::warn!(service, %err, "failed to stop"),
        }
    }

    fn on_crash(&self, service: &str, err: &ServiceError) {
        tracing::warn!(service, %err, "crashed");
    }
}
