//! # servisor
//!
//! **Servisor** is a lightweight service supervision library.
//!
//! It provides a `start → run → stop` lifecycle contract for long-running
//! services and three composable supervisors enforcing it. Supervisors
//! implement the contract themselves, so they nest arbitrarily.
//!
//! ## Features
//!
//! | Area            | Description                                                            | Key types / traits                    |
//! |-----------------|------------------------------------------------------------------------|---------------------------------------|
//! | **Contract**    | Services with a name, a cancelable start and a blocking stop.           | [`Service`], [`ServiceRef`]           |
//! | **Group**       | Start and stop N services in parallel; any crash stops them all.        | [`Group`], [`GroupSettings`]          |
//! | **Sequence**    | Start in a declared order, stop in the declared reverse order.          | [`Sequence`], [`SequenceSettings`]    |
//! | **Restarter**   | Restart a crashed service transparently; escalate when a restart fails. | [`Restarter`], [`RestarterSettings`]  |
//! | **Hooks**       | Observe every lifecycle step (logging, metrics, tests).                 | [`Hooks`], [`NoopHooks`]              |
//! | **Errors**      | Typed settings and lifecycle errors with preserved causes.              | [`SettingsError`], [`ServiceError`]   |
//!
//! ## Optional features
//! - `logging`: exports [`LogHooks`], hooks logging through the `tracing`
//!   facade (debug on success, warn on failure).
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use servisor::{
//!     run_error_channel, Group, GroupSettings, RunErrorReceiver, RunErrorSender,
//!     Service, ServiceError,
//! };
//!
//! struct Worker {
//!     name: String,
//!     run_error: std::sync::Mutex<Option<RunErrorSender>>,
//! }
//!
//! #[async_trait]
//! impl Service for Worker {
//!     fn name(&self) -> &str {
//!         &self.name
//!     }
//!
//!     async fn start(&self, _ctx: CancellationToken) -> Result<RunErrorReceiver, ServiceError> {
//!         let (tx, rx) = run_error_channel();
//!         *self.run_error.lock().unwrap() = Some(tx);
//!         // spawn the actual work here, handing it a clone of `tx`...
//!         Ok(rx)
//!     }
//!
//!     async fn stop(&self) -> Result<(), ServiceError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let worker = |name: &str| -> Arc<Worker> {
//!         Arc::new(Worker {
//!             name: name.to_owned(),
//!             run_error: std::sync::Mutex::new(None),
//!         })
//!     };
//!
//!     let group = Group::new(GroupSettings {
//!         name: "workers".to_owned(),
//!         services: vec![worker("a"), worker("b")],
//!         hooks: None,
//!     })?;
//!
//!     let mut run_error = group.start(CancellationToken::new()).await?;
//!
//!     tokio::select! {
//!         crash = run_error.recv() => {
//!             // The group crashed; its services are already stopped.
//!             eprintln!("group crashed: {:?}", crash);
//!             group.stop().await?;
//!         }
//!         _ = tokio::signal::ctrl_c() => {
//!             group.stop().await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ---

mod error;
mod fanin;
mod group;
mod hooks;
mod restarter;
mod sequence;
mod service;
mod settings;
mod state;

// ---- Public re-exports ----

pub use error::{BoxError, ServiceError, SettingsError};
pub use group::Group;
pub use hooks::{Hooks, NoopHooks};
pub use restarter::Restarter;
pub use sequence::Sequence;
pub use service::{run_error_channel, RunErrorReceiver, RunErrorSender, Service, ServiceRef};
pub use settings::{GroupSettings, RestarterSettings, SequenceSettings};
pub use state::State;

// Optional: expose the tracing-backed log hooks.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use hooks::LogHooks;
