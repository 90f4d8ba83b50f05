//! Runs two tick services in parallel until Ctrl-C.
//!
//! ```sh
//! cargo run --example group --features logging
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use servisor::{
    run_error_channel, Group, GroupSettings, LogHooks, RunErrorReceiver, RunErrorSender, Service,
    ServiceError, ServiceRef,
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

    let group = Group::new(GroupSettings {
        name: "tickers".to_owned(),
        services: vec![
            Ticker::arc("fast", Duration::from_millis(500)) as ServiceRef,
            Ticker::arc("slow", Duration::from_secs(2)) as ServiceRef,
        ],
        hooks: Some(Arc::new(LogHooks)),
    })?;

    let mut run_error = group.start(CancellationToken::new()).await?;

    tokio::select! {
        err = run_error.recv() => {
            tracing::error!(?err, "group crashed");
            group.stop().await?;
        }
        _ = tokio::signal::ctrl_c() => {
            group.stop().await?;
        }
    }
    Ok(())
}
