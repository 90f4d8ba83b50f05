use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{add_stop_error, append_error, ServiceError};
use crate::fanin::{Crash, ErrorsFanIn};
use crate::hooks::Hooks;
use crate::service::{run_error_channel, RunErrorReceiver, RunErrorSender, Service, ServiceRef};
use crate::settings::{hooks_or_noop, GroupSettings};
use crate::state::State;
use crate::SettingsError;

/// # Starts and stops services in parallel.
///
/// A `Group` runs an unordered set of services, starting and stopping
/// them all concurrently. If any running service crashes, all the others
/// are stopped in parallel and the crash is forwarded on the outward run
/// error channel.
///
/// It implements [`Service`], so groups nest inside other supervisors.
pub struct Group {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    services: Vec<ServiceRef>,
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

impl Group {
    /// Creates a new group of services from the settings, validating that
    /// the services are uniquely named.
    pub fn new(settings: GroupSettings) -> Result<Self, SettingsError> {
        settings.validate()?;

        let name = if settings.name.is_empty() {
            "group".to_owned()
        } else {
            format!("group {}", settings.name)
        };

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                services: settings.services,
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
impl Service for Group {
    fn name(&self) -> &str {
        &self.inner.name
    }

    /// Starts all the services in parallel.
    ///
    /// If any service fails to start, the ones that did start are stopped
    /// in parallel and a single error is returned, aggregating the start
    /// errors and any stop error, with the cancellation cause attached
    /// where the token was canceled.
    ///
    /// If a service crashes after this call returned successfully, the
    /// other running services are stopped and the crash error is sent on
    /// the returned channel, which is then closed. A caller should listen
    /// on the channel until its `stop` call fully completes, since a
    /// crash can happen at the same time it stops the group.
    ///
    /// Returns [`ServiceError::AlreadyStarted`] if the group is already
    /// running.
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

        // Start every service on its own task. Hooks run inside the tasks
        // and are therefore called concurrently.
        let mut set = JoinSet::new();
        for service in &self.inner.services {
            let service = Arc::clone(service);
            let hooks = Arc::clone(&self.inner.hooks);
            let child_ctx = ctx.child_token();
            set.spawn(async move {
                let name = service.name().to_owned();
                hooks.on_start(&name);
                let res = service.start(child_ctx).await;
                hooks.on_started(&name, res.as_ref().err());
                (name, res)
            });
        }

        let mut outcomes: HashMap<String, Result<RunErrorReceiver, ServiceError>> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, res)) => {
                    outcomes.insert(name, res);
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => {}
            }
        }

        if outcomes.values().any(|res| res.is_err()) {
            // Collect the start errors in declaration order and mark the
            // started services running so the teardown reaches them. The
            // run error receivers of started services are dropped here: a
            // crash sent in the meantime lands in the channel buffer and
            // is dropped with it.
            let mut collected = None;
            for service in &self.inner.services {
                let name = service.name();
                match outcomes.remove(name) {
                    Some(Ok(_run_error)) => {
                        self.inner.running.lock().unwrap().insert(name.to_owned());
                    }
                    Some(Err(err)) => {
                        collected = append_error(
                            collected,
                            ServiceError::Start {
                                service: name.to_owned(),
                                source: Box::new(err.with_cancellation(&ctx)),
                            },
                        );
                    }
                    None => {}
                }
            }

            if let Err(err) = self.inner.stop_all().await {
                collected = append_error(collected, err);
            }
            *self.inner.state.write().await = State::Stopped;
            return Err(collected.expect("at least one service failed to start"));
        }

        for service in &self.inner.services {
            let name = service.name().to_owned();
            let run_error = outcomes
                .remove(&name)
                .expect("every service has a start outcome")
                .expect("all services started successfully");
            self.inner.running.lock().unwrap().insert(name.clone());
            let mut fan_in = self.inner.fan_in.lock().unwrap();
            fan_in
                .as_mut()
                .expect("fan-in is set for the whole start")
                .add(&name, run_error);
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

    /// Stops all the running services in parallel.
    ///
    /// If a service fails to stop, the others are still stopped and the
    /// failures are aggregated in the returned error; hooks can be used
    /// to process each one individually.
    ///
    /// Returns [`ServiceError::AlreadyStopped`] if the group is already
    /// stopped. If the group crashed, the first stop call settles it into
    /// stopped and returns successfully.
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
                    panic!("bad group implementation: this code path should be unreachable")
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
    /// Stops all running services in parallel, then stops the fan-in.
    ///
    /// Stop failures do not short-circuit: every running service is
    /// stopped and the failures are aggregated in declaration order so
    /// the report is stable despite the parallel teardown.
    async fn stop_all(&self) -> Result<(), ServiceError> {
        let mut set = JoinSet::new();
        for service in &self.services {
            let name = service.name().to_owned();
            if !self.running.lock().unwrap().contains(&name) {
                continue;
            }
            let service = Arc::clone(service);
            let hooks = Arc::clone(&self.hooks);
            set.spawn(async move {
                hooks.on_stop(&name);
                let res = service.stop().await;
                hooks.on_stopped(&name, res.as_ref().err());
                (name, res)
            });
        }

        let mut results: HashMap<String, Result<(), ServiceError>> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, res)) => {
                    self.running.lock().unwrap().remove(&name);
                    results.insert(name, res);
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => {}
            }
        }

        let mut collected = None;
        for service in &self.services {
            if let Some(res) = results.remove(service.name()) {
                collected = add_stop_error(collected, service.name(), res);
            }
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

            // Lock the state in case the group is being stopped at the
            // same time.
            let mut state = inner.state.write().await;
            if *state == State::Stopping {
                // Discard the run error, the group is stopping.
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
