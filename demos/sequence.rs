//! Starts a database stub before its worker and stops them in reverse.
//!
//! ```sh
//! cargo run --example sequence --features logging
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use servisor::{
    run_error_channel, LogHooks, RunErrorReceiver, RunErrorSender, Sequence, SequenceSettings,
    Service, ServiceError, ServiceRef,
};

struct Ticker {
    name: String,
    period: Duration,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    run_error: Mutex<Option<RunErrorSender>>,
}

impl Ticker {
    fn arc(name: &str, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            period,
            worker: Mutex::new(None),
            run_error: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Service for Ticker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, _ctx: CancellationToken) -> Result<RunErrorReceiver, ServiceError> {
        let (tx, rx) = run_error_channel();
        let shutdown = CancellationToken::new();

        let name = self.name.clone();
        let period = self.period;
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = interval.tick() => tracing::info!(service = %name, "tick"),
                }
            }
        });

        *self.worker.lock().unwrap() = Some((shutdown, handle));
        *self.run_error.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        let worker = self.worker.lock().unwrap().take();
        if let Some((shutdown, handle)) = worker {
            shutdown.cancel();
            let _ = handle.await;
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let database = Ticker::arc("database", Duration::from_secs(1));
    let worker = Ticker::arc("worker", Duration::from_secs(1));

    let sequence = Sequence::new(SequenceSettings {
        name: "app".to_owned(),
        services_start: vec![database.clone() as ServiceRef, worker.clone() as ServiceRef],
        services_stop: vec![worker as ServiceRef, database as ServiceRef],
        hooks: Some(Arc::new(LogHooks)),
    })?;

    let mut run_error = sequence.start(CancellationToken::new()).await?;

    tokio::select! {
        err = run_error.recv() => {
            tracing::error!(?err, "sequence crashed");
            sequence.stop().await?;
        }
        _ = tokio::signal::ctrl_c() => {
            sequence.stop().await?;
        }
    }
    Ok(())
}
