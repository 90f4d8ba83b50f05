//! Supervises a service that crashes every few seconds and restarts it.
//!
//! ```sh
//! cargo run --example restarter --features logging
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use servisor::{
    run_error_channel, LogHooks, Restarter, RestarterSettings, RunErrorReceiver, RunErrorSender,
    Service, ServiceError,
};

/// Ticks a few times, then crashes.
struct FlakyTicker {
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    run_error: Mutex<Option<RunErrorSender>>,
}

#[async_trait]
impl Service for FlakyTicker {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn start(&self, _ctx: CancellationToken) -> Result<RunErrorReceiver, ServiceError> {
        let (tx, rx) = run_error_channel();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let crash_tx = tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            for _ in 0..3 {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = interval.tick() => tracing::info!(service = "flaky", "tick"),
                }
            }
            let _ = crash_tx.try_send(ServiceError::other("tick overflow"));
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

    let restarter = Restarter::new(RestarterSettings {
        service: Arc::new(FlakyTicker {
            worker: Mutex::new(None),
            run_error: Mutex::new(None),
        }),
        hooks: Some(Arc::new(LogHooks)),
    })?;

    let mut run_error = restarter.start(CancellationToken::new()).await?;

    tokio::select! {
        err = run_error.recv() => {
            tracing::error!(?err, "restarter crashed");
            restarter.stop().await?;
        }
        _ = tokio::signal::ctrl_c() => {
            restarter.stop().await?;
        }
    }
    Ok(())
}
