//! # thiz-supervisor
//!
//! Restart coordinator for development servers.
//!
//! Keeps exactly one child process running and restarts it when the source
//! tree or the `.env` files change. Bursts of changes collapse into a single
//! restart, restarts never overlap, and a child that keeps crashing on
//! startup gets a longer debounce.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use thiz_supervisor::{Supervisor, WatchConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> thiz_supervisor::Result<()> {
//! let sup = Supervisor::new(WatchConfig {
//!     entry: "src/server.js".into(),
//!     ..WatchConfig::default()
//! });
//!
//! let handle = sup.handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     handle.shutdown();
//! });
//!
//! let _watchers = sup.watch()?;
//! sup.run().await;
//! # Ok(())
//! # }
//! ```

pub mod coalescer;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod filter;
pub mod process;
pub mod supervisor;
pub mod types;
pub mod watch;

pub use config::{load_config, load_config_file, WatchConfig};
pub use error::{Error, Result};
pub use events::SupervisorEvent;
pub use supervisor::{CoordinatorState, Message, Supervisor, SupervisorHandle};
pub use types::*;
