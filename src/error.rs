//! # Error types used by the supervisors and services.
//!
//! This module defines two main error enums:
//!
//! - [`SettingsError`] errors returned by supervisor constructors when
//!   validating their settings. They never occur past construction.
//! - [`ServiceError`] errors produced by service lifecycle operations:
//!   start failures, stop failures, crashes and lifecycle misuse.
//!
//! Underlying errors are preserved through [`std::error::Error::source`]
//! chains so callers can still match the original cause of a wrapped
//! failure.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Boxed error type carried by services.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// # Errors returned when validating supervisor settings.
///
/// These are only ever returned by [`Group::new`](crate::Group::new),
/// [`Sequence::new`](crate::Sequence::new) and
/// [`Restarter::new`](crate::Restarter::new); callers must fix their
/// settings rather than handle them at runtime.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// No service was specified.
    #[error("no service specified")]
    NoService,
    /// The sequence start order is empty.
    #[error("no service start order specified")]
    NoServiceStart,
    /// The sequence stop order is empty.
    #[error("no service stop order specified")]
    NoServiceStop,
    /// The sequence start and stop orders do not hold the same services.
    #[error("services to start and stop mismatch: services to start are {start} but services to stop are {stop}")]
    StartStopMismatch {
        /// And-joined names of the services to start.
        start: String,
        /// And-joined names of the services to stop.
        stop: String,
    },
    /// The same service appears more than once.
    #[error("services are not unique: {details}")]
    NotUnique {
        /// Human-readable list of the duplicated service names.
        details: String,
    },
}

/// # Errors produced by service lifecycle operations.
///
/// The `Crashed`, `Start` and `Stop` variants wrap an underlying service
/// error with the service name; `Aggregate` collects several of them,
/// joined with `"; "`, when more than one service fails to stop during a
/// teardown.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Start was called on a service that is already running.
    #[error("{name}: already started")]
    AlreadyStarted {
        /// Name of the service.
        name: String,
    },
    /// Stop was called on a service that is already stopped.
    #[error("{name}: already stopped")]
    AlreadyStopped {
        /// Name of the service.
        name: String,
    },
    /// A running service emitted its terminal run error.
    #[error("{service} crashed: {source}")]
    Crashed {
        /// Name of the crashed service.
        service: String,
        /// The error the service sent on its run error channel.
        source: Box<ServiceError>,
    },
    /// A service failed to start.
    #[error("starting {service}: {source}")]
    Start {
        /// Name of the service.
        service: String,
        /// The error its start returned.
        source: Box<ServiceError>,
    },
    /// A service failed to stop.
    #[error("stopping {service}: {source}")]
    Stop {
        /// Name of the service.
        service: String,
        /// The error its stop returned.
        source: Box<ServiceError>,
    },
    /// A restart attempt after a crash failed.
    #[error("restarting after crash: {source}")]
    Restart {
        /// The start error of the failed restart attempt.
        source: Box<ServiceError>,
    },
    /// Several lifecycle errors collected during a teardown.
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<ServiceError>),
    /// The start context was canceled before the service was running.
    #[error("{}", canceled_message(.source))]
    Canceled {
        /// The service error the cancellation raced with, if any.
        source: Option<Box<ServiceError>>,
    },
    /// Any other service-defined error.
    #[error(transparent)]
    Other(#[from] BoxError),
}

fn join_errors(errors: &[ServiceError]) -> String {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    messages.join("; ")
}

fn canceled_message(source: &Option<Box<ServiceError>>) -> String {
    match source {
        None => "start canceled".to_owned(),
        Some(source) => format!("{source}: start canceled"),
    }
}

impl ServiceError {
    /// Wraps any error into the [`ServiceError::Other`] variant.
    ///
    /// This is the entry point for services reporting their own failures:
    ///
    /// ```
    /// use servisor::ServiceError;
    ///
    /// let err = ServiceError::other("connection reset");
    /// assert_eq!(err.to_string(), "connection reset");
    /// ```
    pub fn other(err: impl Into<BoxError>) -> Self {
        ServiceError::Other(err.into())
    }

    /// Returns true if the error chain reports a canceled start.
    pub fn is_canceled(&self) -> bool {
        match self {
            ServiceError::Canceled { .. } => true,
            ServiceError::Crashed { source, .. }
            | ServiceError::Start { source, .. }
            | ServiceError::Stop { source, .. }
            | ServiceError::Restart { source } => source.is_canceled(),
            ServiceError::Aggregate(errors) => errors.iter().any(ServiceError::is_canceled),
            _ => false,
        }
    }

    /// Attaches the cancellation cause to the error if `ctx` is canceled
    /// and the error chain does not already report it.
    ///
    /// Start errors returned by a service whose start context was canceled
    /// go through this so callers can always match the cancellation, even
    /// when the service implementation did not report it itself.
    pub fn with_cancellation(self, ctx: &CancellationToken) -> Self {
        if !ctx.is_cancelled() || self.is_canceled() {
            return self;
        }
        ServiceError::Canceled {
            source: Some(Box::new(self)),
        }
    }
}

/// Appends `err` to the collected error, flattening aggregates so the
/// result is at most one level deep.
pub(crate) fn append_error(
    collected: Option<ServiceError>,
    err: ServiceError,
) -> Option<ServiceError> {
    if let ServiceError::Aggregate(errors) = err {
        return errors.into_iter().fold(collected, append_error);
    }
    match collected {
        None => Some(err),
        Some(ServiceError::Aggregate(mut errors)) => {
            errors.push(err);
            Some(ServiceError::Aggregate(errors))
        }
        Some(previous) => Some(ServiceError::Aggregate(vec![previous, err])),
    }
}

/// Collects a service stop result into the running aggregate, wrapping
/// failures as `stopping <name>: <err>` in the order stops were attempted.
pub(crate) fn add_stop_error(
    collected: Option<ServiceError>,
    service: &str,
    result: Result<(), ServiceError>,
) -> Option<ServiceError> {
    match result {
        Ok(()) => collected,
        Err(err) => append_error(
            collected,
            ServiceError::Stop {
                service: service.to_owned(),
                source: Box::new(err),
            },
        ),
    }
}
