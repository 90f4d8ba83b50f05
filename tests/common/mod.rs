//! Shared test support: a controllable service and recording hooks.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use servisor::{run_error_channel, Hooks, RunErrorReceiver, RunErrorSender, Service, ServiceError};

/// A service whose start and stop outcomes are scripted from the test,
/// and which can be crashed on demand.
pub struct TestService {
    name: String,
    start_results: Mutex<VecDeque<Result<(), ServiceError>>>,
    stop_results: Mutex<VecDeque<Result<(), ServiceError>>>,
    wait_for_cancel: AtomicBool,
    run_error: Mutex<Option<RunErrorSender>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl TestService {
    pub fn arc(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            start_results: Mutex::new(VecDeque::new()),
            stop_results: Mutex::new(VecDeque::new()),
            wait_for_cancel: AtomicBool::new(false),
            run_error: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    /// Makes the next start attempt fail with the given error.
    pub fn fail_next_start(&self, err: ServiceError) {
        self.start_results.lock().unwrap().push_back(Err(err));
    }

    /// Makes the next stop attempt fail with the given error.
    pub fn fail_next_stop(&self, err: ServiceError) {
        self.stop_results.lock().unwrap().push_back(Err(err));
    }

    /// Makes every start attempt block until its token is canceled, then
    /// fail with an error that does not report the cancellation itself.
    pub fn wait_for_cancel(&self) {
        self.wait_for_cancel.store(true, Ordering::SeqCst);
    }

    /// Sends the service's single terminal run error.
    pub fn crash(&self, err: ServiceError) {
        let sender = self
            .run_error
            .lock()
            .unwrap()
            .clone()
            .expect("crash called before start");
        let _ = sender.try_send(err);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for TestService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, ctx: CancellationToken) -> Result<RunErrorReceiver, ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        if self.wait_for_cancel.load(Ordering::SeqCst) {
            ctx.cancelled().await;
            return Err(ServiceError::other("start interrupted"));
        }

        if let Some(result) = self.start_results.lock().unwrap().pop_front() {
            result?;
        }

        let (tx, rx) = run_error_channel();
        // The sender lives in the service, per the contract, so the
        // channel never closes while the service is supervised.
        *self.run_error.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        match self.stop_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }
}

/// Hooks recording every call as a readable event string.
#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<String>>,
}

impl RecordingHooks {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Hooks for RecordingHooks {
    fn on_start(&self, service: &str) {
        self.push(format!("start {service}"));
    }

    fn on_started(&self, service: &str, err: Option<&ServiceError>) {
        match err {
            None => self.push(format!("started {service}")),
            Some(err) => self.push(format!("started {service}: {err}")),
        }
    }

    fn on_stop(&self, service: &str) {
        self.push(format!("stop {service}"));
    }

    fn on_stopped(&self, service: &str, err: Option<&ServiceError>) {
        match err {
            None => self.push(format!("stopped {service}")),
            Some(err) => self.push(format!("stopped {service}: {err}")),
        }
    }

    fn on_crash(&self, service: &str, err: &ServiceError) {
        self.push(format!("crash {service}: {err}"));
    }
}

/// Polls the predicate until it holds, panicking after a few seconds.
pub async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {what}");
}
