use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::hooks::Hooks;
use crate::service::{run_error_channel, RunErrorReceiver, RunErrorSender, Service, ServiceRef};
use crate::settings::{hooks_or_noop, RestarterSettings};
use crate::state::State;
use crate::SettingsError;

/// # Restarts its underlying service whenever it crashes.
///
/// A `Restarter` supervises exactly one service and restarts it
/// transparently on crash. It only crashes itself when a restart attempt
/// fails to start, in which case the start error is escalated on the
/// outward run error channel.
///
/// It implements [`Service`], so it can itself be supervised, for example
/// as a member of a [`Group`](crate::Group) or
/// [`Sequence`](crate::Sequence).
pub struct Restarter {
    inner: Arc<Inner>,
}

struct Inner {
    service: ServiceRef,
    hooks: Arc<dyn Hooks>,
    start_stop: Mutex<()>,
    state: RwLock<State>,
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

impl Restarter {
    /// Creates a new restarter from the settings.
    pub fn new(settings: RestarterSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            inner: Arc::new(Inner {
                service: settings.service,
                hooks: hooks_or_noop(settings.hooks),
                start_stop: Mutex::new(()),
                state: RwLock::new(State::Stopped),
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
impl Service for Restarter {
    fn name(&self) -> &str {
        self.inner.service.name()
    }

    /// Starts the underlying service.
    ///
    /// If the underlying service fails to start, the error is returned and
    /// the restarter is left stopped.
    ///
    /// If the underlying service crashes after this call returned
    /// successfully, it is restarted automatically and nothing is emitted
    /// on the run error channel. Only when a restart attempt fails to
    /// start is the error sent on the channel, which is then closed, and
    /// the restarter crashes. A caller should listen on the channel until
    /// its `stop` call fully completes, since a run error can happen at
    /// the same time it stops the restarter.
    ///
    /// Returns [`ServiceError::AlreadyStarted`] if the restarter is
    /// already running.
    async fn start(&self, ctx: CancellationToken) -> Result<RunErrorReceiver, ServiceError> {
        // Prevent concurrent stop and start calls.
        let _lock = self.inner.start_stop.lock().await;

        if *self.inner.state.read().await == State::Running {
            return Err(ServiceError::AlreadyStarted {
                name: self.name().to_owned(),
            });
        }
        *self.inner.state.write().await = State::Starting;

        let name = self.inner.service.name().to_owned();
        self.inner.hooks.on_start(&name);
        let res = self.inner.service.start(ctx.child_token()).await;
        self.inner.hooks.on_started(&name, res.as_ref().err());
        let input = match res {
            Ok(input) => input,
            Err(err) => {
                *self.inner.state.write().await = State::Stopped;
                return Err(err.with_cancellation(&ctx));
            }
        };

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
            input,
            run_error_tx,
            stop.clone(),
        ));
        let _ = ready_rx.await;
        *self.inner.intercept.lock().unwrap() = Some(Intercept { stop, done });
        *state = State::Running;
        drop(state);

        Ok(run_error_rx)
    }

    /// Stops the underlying service and the internal restart watcher.
    ///
    /// Returns [`ServiceError::AlreadyStopped`] if the restarter is
    /// already stopped. If the restarter crashed, the first stop call
    /// settles it into stopped and returns successfully.
    ///
    /// Note if the restarter is currently restarting the underlying
    /// service, the restart has to finish before the stopping can begin.
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
                        name: self.name().to_owned(),
                    });
                }
                State::Starting | State::Stopping => {
                    panic!("bad restarter implementation: this code path should be unreachable")
                }
            }
        }

        let name = self.inner.service.name().to_owned();
        self.inner.hooks.on_stop(&name);
        let res = self.inner.service.stop().await;
        self.inner.hooks.on_stopped(&name, res.as_ref().err());

        // Stop the watcher only after the underlying service stopped, so
        // a last-second run error is discarded rather than acted on.
        self.join_interceptor().await;
        *self.inner.state.write().await = State::Stopped;

        res
    }
}

/// Watches the underlying service run error channel and restarts the
/// service on crash. Escalates on the output channel only when a restart
/// attempt fails, then closes it.
async fn intercept_run_error(
    inner: Arc<Inner>,
    ready: oneshot::Sender<()>,
    mut input: RunErrorReceiver,
    output: RunErrorSender,
    stop: CancellationToken,
) {
    let _ = ready.send(());

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                // Normal stop: park the sender so the channel stays open.
                *inner.parked_run_error.lock().unwrap() = Some(output);
                return;
            }
            received = input.recv() => {
                let Some(err) = received else {
                    panic!(
                        "run error channel of service {} closed unexpectedly",
                        inner.service.name(),
                    );
                };

                // Lock the state in case the restarter is being stopped at
                // the same time.
                let mut state = inner.state.write().await;
                if *state == State::Stopping {
                    // Discard the run error, the restarter is stopping.
                    *inner.parked_run_error.lock().unwrap() = Some(output);
                    return;
                }

                let name = inner.service.name().to_owned();
                inner.hooks.on_crash(&name, &err);

                inner.hooks.on_start(&name);
                // Restart with a fresh token: the caller's start token is
                // long out of scope once the restarter is running, and
                // only stop may end the service now. Stop cannot proceed
                // while the state lock is held here.
                let res = inner.service.start(CancellationToken::new()).await;
                inner.hooks.on_started(&name, res.as_ref().err());

                match res {
                    Ok(new_input) => {
                        input = new_input;
                        *state = State::Running;
                    }
                    Err(start_err) => {
                        *state = State::Crashed;
                        drop(state);
                        let _ = output
                            .send(ServiceError::Restart {
                                source: Box::new(start_err),
                            })
                            .await;
                        return;
                    }
                }
            }
        }
    }
}
