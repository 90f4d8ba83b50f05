use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{add_stop_error, ServiceError};
use crate::fanin::{Crash, ErrorsFanIn};
use crate::hooks::Hooks;
use crate::service::{run_error_channel, RunErrorReceiver, RunErrorSender, Service, ServiceRef};
use crate::settings::{hooks_or_noop, SequenceSettings};
use crate::state::State;
use crate::SettingsError;

/// # Starts and stops services in a pre-defined order.
///
/// A `Sequence` starts its services one at a time in the configured start
/// order and stops them in the configured stop order, which is usually
/// the reverse. If any running service crashes, all the others are
/// stopped in the stop order and the crash is forwarded on the outward
/// run error channel.
///
/// It implements [`Service`], so sequences nest inside other supervisors.
pub struct Sequence {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    services_start: Vec<ServiceRef>,
    services_stop: Vec<ServiceRef>,
    hooks: Arc<dyn Hooks>,
    start_stop: Mutex<()>,
    state: RwLock<State>,
    /// Names of the services currently believed to be running.
    running: StdMutex<HashSet<String>>,
    fan_in: StdMutex<Option<ErrorsFanIn>>,
    intercept: StdMutex<Option<Intercept>>,
    /// Keeps the outward run error sender alive after a normal stop: the
    /// channel may only close once a crash was forwarded on it, and a
    /// parent supervisor may still be watching it.
    parked_run_error: StdMutex<Option<RunErrorSender>>,
}

struct Intercept {
    stop: CancellationToken,
    done: JoinHandle<()>,
}

impl Sequence {
    /// Creates a new sequence of services from the settings, validating
    /// that the start and stop orders hold the same, uniquely named,
    /// services.
    pub fn new(settings: SequenceSettings) -> Result<Self, SettingsError> {
        settings.validate()?;

        let name = if settings.name.is_empty() {
            "sequence".to_owned()
        } else {
            format!("sequence {}", settings.name)
        };

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                services_start: settings.services_start,
                services_stop: settings.services_stop,
                hooks: hooks_or_noop(settings.hooks),
                start_stop: Mutex::new(()),
                state: RwLock::new(State::Stopped),
                running: StdMutex::new(HashSet::new()),
                fan_in: StdMutex::new(None),
                intercept: StdMutex::new(None),
                parked_run_error: StdMutex::new(None),
            }),
        })
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> State {
        *self.inner.state.read().await
    }

    async fn join_interceptor(&self) {
        let intercept = self.inner.intercept.lock().unwrap().take();
        if let Some(intercept) = intercept {
            intercept.stop.cancel();
            if let Err(err) = intercept.done.await {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }
    }
}

#[async_trait]
impl Service for Sequence {
    fn name(&self) -> &str {
        &self.inner.name
    }

    /// Starts the services in the configured start order.
    ///
    /// If a service fails to start, every service already running is
    /// stopped in the configured stop order and the error is returned,
    /// with the cancellation cause attached if the token was canceled.
    ///
    /// If a service crashes after this call returned successfully, the
    /// other running services are stopped and the crash error is sent on
    /// the returned channel, which is then closed. A caller should listen
    /// on the channel until its `stop` call fully completes, since a
    /// crash can happen at the same time it stops the sequence.
    ///
    /// Returns [`ServiceError::AlreadyStarted`] if the sequence is
    /// already running.
    async fn start(&self, ctx: CancellationToken) -> Result<RunErrorReceiver, ServiceError> {
        let _lock = self.inner.start_stop.lock().await;

        if *self.inner.state.read().await == State::Running {
            return Err(ServiceError::AlreadyStarted {
                name: self.inner.name.clone(),
            });
        }
        *self.inner.state.write().await = State::Starting;

        let (fan_in, fan_in_errors) = ErrorsFanIn::new();
        *self.inner.fan_in.lock().unwrap() = Some(fan_in);

        for service in &self.inner.services_start {
            let name = service.name().to_owned();

            self.inner.hooks.on_start(&name);
            let res = service.start(ctx.child_token()).await;
            self.inner.hooks.on_started(&name, res.as_ref().err());

            match res {
                Ok(run_error) => {
                    self.inner.running.lock().unwrap().insert(name.clone());
                    let mut fan_in = self.inner.fan_in.lock().unwrap();
                    fan_in
                        .as_mut()
                        .expect("fan-in is set for the whole start")
                        .add(&name, run_error);
                }
                Err(err) => {
                    let err = err.with_cancellation(&ctx);
                    let _ = self.inner.stop_all().await;
                    *self.inner.state.write().await = State::Stopped;
                    return Err(ServiceError::Start {
                        service: name,
                        source: Box::new(err),
                    });
                }
            }
        }

        // Hold the state lock until the interceptor is ready and the state
        // is Running: the interceptor may catch a run error immediately
        // and must not transition the state before then.
        let mut state = self.inner.state.write().await;
        self.inner.parked_run_error.lock().unwrap().take();
        let (run_error_tx, run_error_rx) = run_error_channel();
        let stop = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let done = tokio::spawn(intercept_run_error(
            self.inner.clone(),
            ready_tx,
            fan_in_errors,
            run_error_tx,
            stop.clone(),
        ));
        let _ = ready_rx.await;
        *self.inner.intercept.lock().unwrap() = Some(Intercept { stop, done });
        *state = State::Running;
        drop(state);

        Ok(run_error_rx)
    }

    /// Stops the running services in the configured stop order.
    ///
    /// If a service fails to stop, the others are still stopped and the
    /// failures are aggregated in the returned error; hooks can be used
    /// to process each one individually.
    ///
    /// Returns [`ServiceError::AlreadyStopped`] if the sequence is
    /// already stopped. If the sequence crashed, the first stop call
    /// settles it into stopped and returns successfully.
    async fn stop(&self) -> Result<(), ServiceError> {
        let _lock = self.inner.start_stop.lock().await;

        {
            let mut state = self.inner.state.write().await;
            match *state {
                State::Running => *state = State::Stopping,
                State::Crashed => {
                    drop(state);
                    // The interceptor already tore everything down; wait
                    // for it and settle into stopped.
                    self.join_interceptor().await;
                    *self.inner.state.write().await = State::Stopped;
                    return Ok(());
                }
                State::Stopped => {
                    return Err(ServiceError::AlreadyStopped {
                        name: self.inner.name.clone(),
                    });
                }
                State::Starting | State::Stopping => {
                    panic!("bad sequence implementation: this code path should be unreachable")
                }
            }
        }

        let res = self.inner.stop_all().await;

        // Stop the interceptor only after all the services stopped: the
        // fan-in may still hand it one run error, which it discards since
        // the state is Stopping.
        self.join_interceptor().await;
        *self.inner.state.write().await = State::Stopped;

        res
    }
}

impl Inner {
    /// Stops all running services in the configured stop order, skipping
    /// the ones not running, then stops the fan-in.
    ///
    /// Stop failures do not short-circuit: every running service is
    /// stopped and the failures are aggregated as
    /// `stopping <a>: <ea>; stopping <b>: <eb>; ...` in attempt order.
    async fn stop_all(&self) -> Result<(), ServiceError> {
        let mut collected = None;

        for service in &self.services_stop {
            let name = service.name();
            if !self.running.lock().unwrap().contains(name) {
                continue;
            }

            self.hooks.on_stop(name);
            let res = service.stop().await;
            self.hooks.on_stopped(name, res.as_ref().err());
            collected = add_stop_error(collected, name, res);
            self.running.lock().unwrap().remove(name);
        }

        // Only stop the fan-in after stopping all the services, so it can
        // read and discard any run error they sent while being stopped.
        let fan_in = self.fan_in.lock().unwrap().take();
        if let Some(fan_in) = fan_in {
            fan_in.stop().await;
        }

        match collected {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

/// Waits for the first crash out of the fan-in, stops the surviving
/// services and forwards the crash on the output channel, which is then
/// closed. Returns silently when told to stop instead.
async fn intercept_run_error(
    inner: Arc<Inner>,
    ready: oneshot::Sender<()>,
    mut input: mpsc::Receiver<Crash>,
    output: RunErrorSender,
    stop: CancellationToken,
) {
    let _ = ready.send(());

    tokio::select! {
        _ = stop.cancelled() => {
            // Normal stop: park the sender so the channel stays open.
            *inner.parked_run_error.lock().unwrap() = Some(output);
        }
        received = input.recv() => {
            // The fan-in output closes during a normal teardown.
            let Some(crash) = received else {
                *inner.parked_run_error.lock().unwrap() = Some(output);
                return;
            };

            // Lock the state in case the sequence is being stopped at the
            // same time.
            let mut state = inner.state.write().await;
            if *state == State::Stopping {
                // Discard the run error, the sequence is stopping.
                *inner.parked_run_error.lock().unwrap() = Some(output);
                return;
            }

            // The crashed service must not be stopped again.
            *state = State::Crashed;
            inner.running.lock().unwrap().remove(&crash.service);
            drop(state);

            inner.hooks.on_crash(&crash.service, &crash.error);
            let _ = inner.stop_all().await;

            let _ = output.send(crash.into_error()).await;
        }
    }
}
